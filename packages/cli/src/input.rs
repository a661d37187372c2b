//! Line protocol for `watch` and the `--bbox` argument.
//!
//! ```text
//! view <zoom> <west> <south> <east> <north>
//! refresh <zoom> <west> <south> <east> <north>
//! snapshot
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use heat_map_viewport_models::{Bounds, ViewportError};
use thiserror::Error;

/// A parsed `watch` input line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// The map moved.
    Viewport {
        /// Visible bounds.
        bounds: Bounds,
        /// Zoom level.
        zoom: u8,
    },
    /// Explicit reload of a viewport.
    Refresh {
        /// Visible bounds.
        bounds: Bounds,
        /// Zoom level.
        zoom: u8,
    },
    /// Print the current state.
    Snapshot,
    /// Nothing to do.
    Skip,
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("expected {expected} values, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("'{0}' is not a number")]
    Number(String),

    #[error(transparent)]
    Viewport(#[from] ViewportError),
}

pub fn parse_line(line: &str) -> Result<Command, InputError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(Command::Skip);
    }

    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or_default();
    let rest: Vec<&str> = words.collect();

    match command {
        "view" => {
            let (bounds, zoom) = parse_viewport(&rest)?;
            Ok(Command::Viewport { bounds, zoom })
        }
        "refresh" => {
            let (bounds, zoom) = parse_viewport(&rest)?;
            Ok(Command::Refresh { bounds, zoom })
        }
        "snapshot" if rest.is_empty() => Ok(Command::Snapshot),
        "snapshot" => Err(InputError::Arity {
            expected: 0,
            got: rest.len(),
        }),
        other => Err(InputError::UnknownCommand(other.to_string())),
    }
}

fn parse_viewport(words: &[&str]) -> Result<(Bounds, u8), InputError> {
    let [zoom, west, south, east, north] = words else {
        return Err(InputError::Arity {
            expected: 5,
            got: words.len(),
        });
    };
    let zoom = zoom
        .parse()
        .map_err(|_| InputError::Number((*zoom).to_string()))?;
    let bounds = Bounds::new(
        number(north)?,
        number(south)?,
        number(east)?,
        number(west)?,
    )?;
    Ok((bounds, zoom))
}

fn number(word: &str) -> Result<f64, InputError> {
    word.parse()
        .map_err(|_| InputError::Number(word.to_string()))
}

/// Parses a bounding box string `"west,south,east,north"`.
pub fn parse_bbox(s: &str) -> Result<Bounds, String> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|_| format!("'{p}' is not a number")))
        .collect::<Result<_, _>>()?;
    let [west, south, east, north] = parts[..] else {
        return Err(format!("expected 4 values, got {}", parts.len()));
    };
    Bounds::new(north, south, east, west).map_err(|e| e.to_string())
}
