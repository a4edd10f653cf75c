//! Read queries over the mirrored word tables.
//!
//! Each function builds the SQL and its parameters; execution goes
//! through the session so staleness and caching apply uniformly.

use rusqlite::types::Value as SqlValue;

/// Upper bound for the unfiltered word listing
pub const ALL_WORDS_LIMIT: i64 = 10_000;

/// A query ready to hand to [`crate::session::Session::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Words from `WordList`, optionally filtered by language and status.
pub fn words(lang: Option<&str>, known_status: Option<&str>, limit: Option<i64>) -> Query {
    let mut sql = String::from("SELECT dictForm, secondary, knownStatus FROM WordList WHERE del = 0");
    let mut params = Vec::new();

    if let Some(lang) = lang {
        sql.push_str(" AND language = ?");
        params.push(SqlValue::Text(lang.to_string()));
    }
    if let Some(status) = known_status {
        sql.push_str(" AND knownStatus = ?");
        params.push(SqlValue::Text(status.to_string()));
    }
    if let Some(limit) = limit.filter(|l| *l > 0) {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(limit));
    }
    Query { sql, params }
}

/// Active decks by name.
pub fn decks() -> Query {
    Query {
        sql: "SELECT id, name FROM deck WHERE del = 0 ORDER BY name".to_string(),
        params: Vec::new(),
    }
}

/// Word counts per `knownStatus`.
pub fn status_counts(lang: Option<&str>, deck_id: Option<i64>) -> Query {
    let mut sql = String::from("SELECT knownStatus AS status, count(1) AS count FROM WordList WHERE del = 0");
    let mut params = Vec::new();

    if let Some(deck_id) = deck_id {
        sql.push_str(" AND deckId = ?");
        params.push(SqlValue::Integer(deck_id));
    }
    if let Some(lang) = lang {
        sql.push_str(" AND language = ?");
        params.push(SqlValue::Text(lang.to_string()));
    }
    sql.push_str(" GROUP BY knownStatus");
    Query { sql, params }
}

/// Every table in the mirror.
pub fn tables() -> Query {
    Query {
        sql: "SELECT name FROM sqlite_master WHERE type = 'table'".to_string(),
        params: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MirrorStore;
    use crate::testing::fixture_db_bytes;
    use crate::words::{Deck, StatusCountRow, Table, Word};
    use tempfile::TempDir;

    fn run<T: serde::de::DeserializeOwned>(query: Query) -> Vec<T> {
        let dir = TempDir::new().unwrap();
        let store = MirrorStore::new(dir.path().join("mirror.db"));
        let handle = store.install(&fixture_db_bytes(150)).unwrap();
        handle.query_as(&query.sql, &query.params).unwrap()
    }

    #[test]
    fn test_words_query_shape() {
        let q = words(Some("ja"), Some("KNOWN"), Some(10));
        assert_eq!(
            q.sql,
            "SELECT dictForm, secondary, knownStatus FROM WordList WHERE del = 0 AND language = ? AND knownStatus = ? LIMIT ?"
        );
        assert_eq!(q.params.len(), 3);

        let q = words(None, None, Some(0));
        assert!(!q.sql.contains("LIMIT"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_words_filters() {
        let all: Vec<Word> = run(words(None, None, Some(ALL_WORDS_LIMIT)));
        assert_eq!(all.len(), 150);

        let known: Vec<Word> = run(words(None, Some("KNOWN"), None));
        assert_eq!(known.len(), 38);
        assert!(known.iter().all(|w| w.known_status == "KNOWN"));

        let zh: Vec<Word> = run(words(Some("zh"), None, None));
        assert_eq!(zh.len(), 30);

        let limited: Vec<Word> = run(words(None, None, Some(5)));
        assert_eq!(limited.len(), 5);
    }

    #[test]
    fn test_decks_skip_deleted() {
        let decks: Vec<Deck> = run(decks());
        let names: Vec<_> = decks.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Anime", "Books"]);
    }

    #[test]
    fn test_status_counts_grouping() {
        let rows: Vec<StatusCountRow> = run(status_counts(None, None));
        let total: i64 = rows.iter().map(|r| r.count).sum();
        assert_eq!(total, 150);

        let deck_rows: Vec<StatusCountRow> = run(status_counts(Some("ja"), Some(1)));
        assert!(deck_rows.iter().map(|r| r.count).sum::<i64>() < 150);
    }

    #[test]
    fn test_tables() {
        let tables: Vec<Table> = run(tables());
        let mut names: Vec<_> = tables.into_iter().map(|t| t.name).collect();
        names.sort();
        assert_eq!(names, vec!["WordList", "deck"]);
    }
}
