//! Cache-aware reads. Keys are relative; the session prefixes them with
//! its scope key.

use std::sync::Arc;

use super::repository::{self, ALL_WORDS_LIMIT, Query};
use super::{Deck, StatusCountRow, StatusCounts, Table, Word};
use crate::error::Result;
use crate::remote::RemoteDataSource;
use crate::session::Session;

/// Which slice of the word list to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordFilter {
    All,
    Known,
    Learning,
}

impl WordFilter {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("all") => Some(WordFilter::All),
            Some("known") => Some(WordFilter::Known),
            Some("learning") => Some(WordFilter::Learning),
            _ => None,
        }
    }

    fn key_part(self) -> &'static str {
        match self {
            WordFilter::All => "all",
            WordFilter::Known => "known",
            WordFilter::Learning => "learning",
        }
    }

    fn query(self, lang: Option<&str>) -> Query {
        match self {
            WordFilter::All => repository::words(lang, None, Some(ALL_WORDS_LIMIT)),
            WordFilter::Known => repository::words(lang, Some("KNOWN"), None),
            WordFilter::Learning => repository::words(lang, Some("LEARNING"), None),
        }
    }
}

/// Blank language filters mean "every language".
fn normalize(lang: Option<&str>) -> Option<&str> {
    lang.map(str::trim).filter(|l| !l.is_empty())
}

pub fn words_key(filter: WordFilter, lang: Option<&str>) -> String {
    format!("words:{}:{}", filter.key_part(), normalize(lang).unwrap_or("all"))
}

pub const DECKS_KEY: &str = "decks";
pub const TABLES_KEY: &str = "tables";

pub fn status_counts_key(lang: Option<&str>, deck_id: Option<i64>) -> String {
    let deck = match deck_id {
        Some(id) => format!("deck:{}", id),
        None => "all".to_string(),
    };
    format!("status:counts:{}:{}", deck, normalize(lang).unwrap_or("all"))
}

pub async fn words<R: RemoteDataSource>(
    session: &Arc<Session<R>>,
    filter: WordFilter,
    lang: Option<&str>,
) -> Result<Arc<Vec<Word>>> {
    let lang = normalize(lang);
    let query = filter.query(lang);
    session
        .cached(&words_key(filter, lang), || session.run_as::<Word>(&query.sql, query.params.clone()))
        .await
}

pub async fn all_words<R: RemoteDataSource>(session: &Arc<Session<R>>, lang: Option<&str>) -> Result<Arc<Vec<Word>>> {
    words(session, WordFilter::All, lang).await
}

pub async fn known_words<R: RemoteDataSource>(session: &Arc<Session<R>>, lang: Option<&str>) -> Result<Arc<Vec<Word>>> {
    words(session, WordFilter::Known, lang).await
}

pub async fn learning_words<R: RemoteDataSource>(
    session: &Arc<Session<R>>,
    lang: Option<&str>,
) -> Result<Arc<Vec<Word>>> {
    words(session, WordFilter::Learning, lang).await
}

pub async fn decks<R: RemoteDataSource>(session: &Arc<Session<R>>) -> Result<Arc<Vec<Deck>>> {
    let query = repository::decks();
    session
        .cached(DECKS_KEY, || session.run_as::<Deck>(&query.sql, query.params.clone()))
        .await
}

pub async fn status_counts<R: RemoteDataSource>(
    session: &Arc<Session<R>>,
    lang: Option<&str>,
    deck_id: Option<i64>,
) -> Result<Arc<StatusCounts>> {
    let lang = normalize(lang);
    let query = repository::status_counts(lang, deck_id);
    session
        .cached(&status_counts_key(lang, deck_id), || async {
            let rows = session.run_as::<StatusCountRow>(&query.sql, query.params.clone()).await?;
            Ok(StatusCounts::from_rows(&rows))
        })
        .await
}

pub async fn tables<R: RemoteDataSource>(session: &Arc<Session<R>>) -> Result<Arc<Vec<Table>>> {
    let query = repository::tables();
    session
        .cached(TABLES_KEY, || session.run_as::<Table>(&query.sql, query.params.clone()))
        .await
}
