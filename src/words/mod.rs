//! Statistics and query layer over the mirror.
//!
//! `repository` builds the SQL, `service` runs it through the session with
//! result caching, `status` implements write-back of word statuses.

pub mod repository;
pub mod service;
pub mod status;

use serde::{Deserialize, Deserializer, Serialize};

pub use status::{StatusChange, WordRef, WordStatus};

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    pub dict_form: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub secondary: String,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "String::is_empty")]
    pub known_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deck {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
}

/// One row of the `GROUP BY knownStatus` query.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusCountRow {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub known_count: i64,
    pub learning_count: i64,
    pub unknown_count: i64,
    pub ignored_count: i64,
}

impl StatusCounts {
    /// Fold grouped rows; statuses outside the four known ones are ignored.
    pub fn from_rows(rows: &[StatusCountRow]) -> Self {
        let mut counts = Self::default();
        for row in rows {
            match row.status.as_str() {
                "KNOWN" => counts.known_count += row.count,
                "LEARNING" => counts.learning_count += row.count,
                "UNKNOWN" => counts.unknown_count += row.count,
                "IGNORED" => counts.ignored_count += row.count,
                _ => {}
            }
        }
        counts
    }

    pub fn total(&self) -> i64 {
        self.known_count + self.learning_count + self.unknown_count + self.ignored_count
    }
}
