use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Case-normalized member identifier.
///
/// Spreadsheet exports carry byte-order marks, zero-width spaces and stray casing; all of
/// them collapse to the same alias so cross-table references line up.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Alias(String);

impl Alias {
    pub fn new(raw: &str) -> Self {
        Self(normalize_alias(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Alias {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Alias {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::new(&raw))
    }
}

pub(crate) fn normalize_alias(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.to_lowercase()
}

/// Role names and metric names keep their casing; only invisible characters and padding go.
pub(crate) fn normalize_label(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_strips_bom_whitespace_and_case() {
        let alias = Alias::new("\u{feff}  Dev01 ");
        assert_eq!(alias.as_str(), "dev01");
        assert_eq!(alias, Alias::new("DEV01"));
    }

    #[test]
    fn labels_keep_casing() {
        assert_eq!(normalize_label("  Code\u{200b}  Review "), "Code Review");
    }

    #[test]
    fn alias_deserializes_normalized() {
        let alias: Alias = serde_json::from_str("\" QA07 \"").expect("alias parses");
        assert_eq!(alias.as_str(), "qa07");
    }
}
