//! Persisted locomotive roster entries and the documents that hold them.
//!
//! The roster is stored as one document per entry (`roster-<address>.json`)
//! plus an index (`locoroster.json`) listing those file names. Older
//! firmware kept every entry inline in a single `roster.json`; that layout
//! is still read by [`LegacyRosterDocument`] so it can be migrated.

use serde::{Deserialize, Deserializer, Serialize};

/// Index document listing the per-entry roster files.
pub const ROSTER_INDEX_FILE: &str = "locoroster.json";

/// Legacy monolithic roster document.
pub const LEGACY_ROSTER_FILE: &str = "roster.json";

/// File name of the document for the roster entry at `address`.
pub fn roster_entry_file(address: u16) -> String {
    format!("roster-{}.json", address)
}

/// Accept JSON booleans as well as the `"true"`/`"false"` strings older
/// firmware wrote.
pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Text(String),
    }

    Ok(match BoolOrString::deserialize(deserializer)? {
        BoolOrString::Bool(value) => value,
        BoolOrString::Text(text) => text.eq_ignore_ascii_case("true"),
    })
}

/// Persisted profile for a locomotive address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    /// Free-form description shown on throttles.
    #[serde(default)]
    pub description: String,
    /// DCC address.
    pub address: u16,
    /// Locomotive type or class tag.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Start the locomotive idling when the station boots.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub idle_on_startup: bool,
    /// Offer this locomotive by default on newly connected throttles.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub default_on_throttles: bool,
}

impl RosterEntry {
    /// Blank entry for `address`.
    pub fn new(address: u16) -> Self {
        Self {
            description: String::new(),
            address,
            kind: String::new(),
            idle_on_startup: false,
            default_on_throttles: false,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Set the type tag
    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    /// Set the idle-on-startup flag
    pub fn with_idle_on_startup(mut self, idle: bool) -> Self {
        self.idle_on_startup = idle;
        self
    }

    /// Set the default-on-throttles flag
    pub fn with_default_on_throttles(mut self, default: bool) -> Self {
        self.default_on_throttles = default;
        self
    }

    /// Name of the document backing this entry.
    pub fn file_name(&self) -> String {
        roster_entry_file(self.address)
    }
}

/// Reference to a per-entity document inside an index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Document name.
    pub file: String,
}

/// `locoroster.json`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterIndex {
    /// Number of entries listed.
    #[serde(default)]
    pub count: usize,
    /// Per-entry documents.
    #[serde(default)]
    pub locos: Vec<FileRef>,
}

/// Legacy `roster.json` with entries inline.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LegacyRosterDocument {
    /// Number of entries the writer claimed.
    #[serde(default)]
    pub count: usize,
    /// Inline entries.
    #[serde(default)]
    pub locos: Vec<RosterEntry>,
}
