//! Reverse geocoders for the viewport center, in fallback order.
//!
//! The built-in table is `services/reverse.toml`, embedded at compile time.
//! Each `[[provider]]` entry names a backend, its base URL and the language
//! addresses should come back in. Entries are tried in the order they are
//! listed and `disabled = true` entries are left out.

use serde::Deserialize;

use crate::nominatim::Nominatim;
use crate::pelias::Pelias;
use crate::{GeocodeError, ReverseGeocoder};

const BUILT_IN: &str = include_str!("../services/reverse.toml");

/// Which backend an entry talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Self-hosted Pelias (`/v1/reverse`).
    Pelias,
    /// Nominatim / `OpenStreetMap` (`/reverse`).
    Nominatim,
}

/// One row of the provider table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntry {
    pub kind: ProviderKind,
    pub base_url: String,
    /// Preferred address language, sent as `lang` to Pelias and
    /// `accept-language` to Nominatim.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl ProviderEntry {
    /// Builds the client for this entry on top of the shared `client`.
    #[must_use]
    pub fn connect(&self, client: &reqwest::Client) -> Box<dyn ReverseGeocoder> {
        match self.kind {
            ProviderKind::Pelias => Box::new(Pelias::new(
                client.clone(),
                self.base_url.clone(),
                self.language.clone(),
            )),
            ProviderKind::Nominatim => Box::new(Nominatim::new(
                client.clone(),
                self.base_url.clone(),
                self.language.clone(),
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProviderTable {
    #[serde(default, rename = "provider")]
    providers: Vec<ProviderEntry>,
}

/// Parses a provider table and returns its enabled entries in listed
/// order.
///
/// # Errors
///
/// * [`GeocodeError::Table`] if the document is not a valid table
/// * [`GeocodeError::InvalidProvider`] if an entry has an empty base URL
pub fn parse(table: &str) -> Result<Vec<ProviderEntry>, GeocodeError> {
    let table: ProviderTable = toml::de::from_str(table)?;

    if let Some(entry) = table.providers.iter().find(|p| p.base_url.trim().is_empty()) {
        return Err(GeocodeError::InvalidProvider {
            message: format!("{:?} entry has an empty base_url", entry.kind),
        });
    }

    Ok(table.providers.into_iter().filter(|p| !p.disabled).collect())
}

/// Enabled entries of the built-in table.
///
/// # Errors
///
/// Same as [`parse`].
pub fn built_in() -> Result<Vec<ProviderEntry>, GeocodeError> {
    parse(BUILT_IN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_table_queries_nominatim_in_spanish() {
        let entries = built_in().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ProviderKind::Nominatim);
        assert_eq!(entries[0].language.as_deref(), Some("es"));
    }

    #[test]
    fn keeps_listed_order_and_skips_disabled() {
        let entries = parse(
            r#"
            [[provider]]
            kind = "nominatim"
            base_url = "http://osm.local"

            [[provider]]
            kind = "pelias"
            base_url = "http://pelias.local"
            disabled = true

            [[provider]]
            kind = "pelias"
            base_url = "http://pelias-2.local"
            language = "en"
            "#,
        )
        .unwrap();

        let kinds: Vec<_> = entries.iter().map(|e| (e.kind, e.base_url.as_str())).collect();
        assert_eq!(
            kinds,
            [
                (ProviderKind::Nominatim, "http://osm.local"),
                (ProviderKind::Pelias, "http://pelias-2.local"),
            ]
        );
        assert!(entries[0].language.is_none());
    }

    #[test]
    fn rejects_unknown_kind_and_empty_url() {
        assert!(matches!(
            parse("[[provider]]\nkind = \"photon\"\nbase_url = \"http://x\""),
            Err(GeocodeError::Table(_))
        ));
        assert!(matches!(
            parse("[[provider]]\nkind = \"pelias\"\nbase_url = \" \""),
            Err(GeocodeError::InvalidProvider { .. })
        ));
    }

    #[test]
    fn empty_table_has_no_providers() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn connects_each_kind() {
        let client = reqwest::Client::new();
        for (kind, name) in [
            (ProviderKind::Pelias, "pelias"),
            (ProviderKind::Nominatim, "nominatim"),
        ] {
            let entry = ProviderEntry {
                kind,
                base_url: "http://localhost".to_string(),
                language: None,
                disabled: false,
            };
            assert_eq!(entry.connect(&client).name(), name);
        }
    }
}
