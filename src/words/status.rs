//! Word-status write-back: status vocabulary, mirror lookups, push
//! payloads and the local update applied after a successful push.

use std::fmt;
use std::str::FromStr;

use rusqlite::params;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, NotFoundError, QueryError, Result};
use crate::mirror::{MirrorHandle, Row};
use crate::remote::SyncRecord;

/// Status a caller can put a word into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WordStatus {
    Known,
    Learning,
    Ignored,
    /// Unknown, but tracked
    Tracked,
}

impl WordStatus {
    /// Value stored in `WordList.knownStatus`.
    pub fn known_status(self) -> &'static str {
        match self {
            WordStatus::Known => "KNOWN",
            WordStatus::Learning => "LEARNING",
            WordStatus::Ignored => "IGNORED",
            WordStatus::Tracked => "UNKNOWN",
        }
    }

    pub fn tracked(self) -> bool {
        self == WordStatus::Tracked
    }

    fn as_str(self) -> &'static str {
        match self {
            WordStatus::Known => "known",
            WordStatus::Learning => "learning",
            WordStatus::Ignored => "ignored",
            WordStatus::Tracked => "tracked",
        }
    }
}

impl fmt::Display for WordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WordStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "known" => Ok(WordStatus::Known),
            "learning" => Ok(WordStatus::Learning),
            "ignored" => Ok(WordStatus::Ignored),
            "tracked" => Ok(WordStatus::Tracked),
            other => Err(Error::InvalidInput(format!("unsupported status: {:?}", other))),
        }
    }
}

impl TryFrom<String> for WordStatus {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<WordStatus> for String {
    fn from(status: WordStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Identifies one word in the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordRef {
    pub word_text: String,
    #[serde(default)]
    pub secondary: Option<String>,
}

impl WordRef {
    pub fn new(word_text: impl Into<String>) -> Self {
        Self { word_text: word_text.into(), secondary: None }
    }

    pub fn with_secondary(mut self, secondary: impl Into<String>) -> Self {
        self.secondary = Some(secondary.into());
        self
    }
}

impl fmt::Display for WordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.secondary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(secondary) => write!(f, "{} ({})", self.word_text.trim(), secondary),
            None => f.write_str(self.word_text.trim()),
        }
    }
}

/// A batch of words moved to one status.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusChange {
    pub items: Vec<WordRef>,
    pub status: WordStatus,
    #[serde(default)]
    pub language: Option<String>,
}

impl StatusChange {
    pub fn new(items: Vec<WordRef>, status: WordStatus) -> Self {
        Self { items, status, language: None }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(Error::InvalidInput("at least one word is required".to_string()));
        }
        if self.items.iter().any(|item| item.word_text.trim().is_empty()) {
            return Err(Error::InvalidInput("wordText is required".to_string()));
        }
        Ok(())
    }

    fn language(&self) -> Option<&str> {
        self.language.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// A word row as found in the mirror, plus the columns that key it.
#[derive(Debug, Clone)]
pub struct WordRecord {
    pub row: Row,
    pub dict_form: String,
    pub secondary: Option<String>,
    pub part_of_speech: Option<String>,
    pub language: Option<String>,
}

const LOOKUP_SQL: &str = "SELECT dictForm, secondary, partOfSpeech, language, serverMod, knownStatus, hasCard, tracked, \
created, del, isModern, serverVersion, isPendingEnqueue, isPendingApply \
FROM WordList WHERE del = 0 AND dictForm = ?";

fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

/// Find the mirror row for `item`.
pub fn lookup(handle: &MirrorHandle, item: &WordRef, language: Option<&str>) -> Result<WordRecord> {
    let mut sql = String::from(LOOKUP_SQL);
    let mut params = vec![SqlValue::Text(item.word_text.trim().to_string())];
    if let Some(language) = language {
        sql.push_str(" AND language = ?");
        params.push(SqlValue::Text(language.to_string()));
    }
    match item.secondary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(secondary) => {
            sql.push_str(" AND secondary = ?");
            params.push(SqlValue::Text(secondary.to_string()));
        }
        None => sql.push_str(" AND (secondary = '' OR secondary IS NULL)"),
    }
    sql.push_str(" LIMIT 1");

    let row = handle
        .query(&sql, &params)?
        .into_iter()
        .next()
        .ok_or_else(|| NotFoundError { record: item.to_string() })?;

    Ok(WordRecord {
        dict_form: text(&row, "dictForm").unwrap_or_default(),
        secondary: text(&row, "secondary"),
        part_of_speech: text(&row, "partOfSpeech"),
        language: text(&row, "language"),
        row,
    })
}

/// Look up every item of `change`, failing on the first one missing.
pub fn lookup_all(handle: &MirrorHandle, change: &StatusChange) -> Result<Vec<WordRecord>> {
    change
        .items
        .iter()
        .map(|item| lookup(handle, item, change.language()))
        .collect()
}

/// Full record pushed to the remote for one word.
///
/// Nulls are dropped; status, tracking and modification stamps are
/// overridden. `serverMod` is -1 when the row has none.
pub fn push_record(record: &WordRecord, status: WordStatus, modified_at: i64) -> SyncRecord {
    let mut payload: SyncRecord = record
        .row
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let server_mod = record.row.get("serverMod").and_then(Value::as_i64).unwrap_or(-1);
    match record.row.get("hasCard") {
        Some(Value::Bool(has_card)) => {
            payload.insert("hasCard".into(), Value::Bool(*has_card));
        }
        _ => {
            payload.remove("hasCard");
        }
    }
    payload.insert("knownStatus".into(), Value::from(status.known_status()));
    payload.insert("tracked".into(), Value::Bool(status.tracked()));
    payload.insert("mod".into(), Value::from(modified_at));
    payload.insert("serverMod".into(), Value::from(server_mod));
    payload
}

/// Mirror the pushed change locally in one transaction. Returns the
/// number of rows updated.
pub fn apply_local(handle: &MirrorHandle, records: &[WordRecord], status: WordStatus, modified_at: i64) -> Result<usize> {
    let updated = handle.transaction(|tx| {
        let mut updated = 0;
        for record in records {
            updated += tx.execute(
                "UPDATE WordList SET knownStatus = ?, tracked = ?, mod = ? \
                 WHERE dictForm = ? AND secondary IS ? AND partOfSpeech IS ? AND language IS ?",
                params![
                    status.known_status(),
                    status.tracked(),
                    modified_at,
                    record.dict_form,
                    record.secondary,
                    record.part_of_speech,
                    record.language,
                ],
            )?;
        }
        Ok::<_, QueryError>(updated)
    })?;
    Ok(updated)
}
