//! The dashboard document store.
//!
//! One JSON file on disk, one owning [`Store`] in memory. Every read and
//! mutation goes through methods here, serialized by a single mutex, and each
//! mutation rewrites the whole file atomically (temp file + rename).

use crate::model::{Article, CovidSnapshot, Document, Domain, UpdateRecord};
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

const PERSIST_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("update name must be non-empty")]
    InvalidName,
    #[error("an update named {0:?} already exists")]
    NameTaken(String),
    #[error("no update named {0:?} in the {1} list")]
    UpdateNotFound(String, Domain),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub struct Store {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl Store {
    /// Open the document at `path`, initialising a default one (and its
    /// parent directory) if the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let doc = Document::default();
                write_atomic(&path, &doc).await?;
                debug!(path = %path.display(), "initialised dashboard document");
                doc
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Clone of the current document, for rendering and scheduling.
    pub async fn snapshot(&self) -> Document {
        self.doc.lock().await.clone()
    }

    /// Validated add. A rejected add leaves the registry untouched and
    /// records the rejection message for the UI.
    #[instrument(skip(self))]
    pub async fn add_update(
        &self,
        name: &str,
        interval: u64,
        domain: Domain,
        repetitive: bool,
    ) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        if name.trim().is_empty() {
            doc.name_err = Some("Invalid update name.".to_owned());
            persist(&self.path, &doc).await?;
            return Err(StoreError::InvalidName);
        }
        if doc.updates(domain).iter().any(|u| u.name == name) {
            doc.name_err = Some("Update with the same name already exists.".to_owned());
            persist(&self.path, &doc).await?;
            return Err(StoreError::NameTaken(name.to_owned()));
        }
        doc.updates_mut(domain)
            .push(UpdateRecord::new(name, interval, domain, repetitive));
        persist(&self.path, &doc).await
    }

    /// Remove the first record with this name from the domain's list.
    /// Removes at most one record.
    #[instrument(skip(self))]
    pub async fn remove_update(&self, name: &str, domain: Domain) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        let list = doc.updates_mut(domain);
        match list.iter().position(|u| u.name == name) {
            Some(ix) => {
                list.remove(ix);
                persist(&self.path, &doc).await
            }
            None => Err(StoreError::UpdateNotFound(name.to_owned(), domain)),
        }
    }

    /// Blacklist an article URL and drop it from the current news list.
    /// Already-blacklisted URLs are not duplicated.
    #[instrument(skip(self))]
    pub async fn blacklist_article(&self, url: &str) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        if !doc.blacklisted_articles.iter().any(|b| b == url) {
            doc.blacklisted_articles.push(url.to_owned());
        }
        doc.news_articles.retain(|a| a.url != url);
        persist(&self.path, &doc).await
    }

    /// Replace the COVID headline fields wholesale.
    pub async fn apply_covid(&self, snapshot: CovidSnapshot) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        doc.location = snapshot.location;
        doc.nation_location = snapshot.nation_location;
        doc.local_7day_infections = snapshot.local_7day_infections;
        doc.national_7day_infections = snapshot.national_7day_infections;
        doc.hospital_cases = snapshot.hospital_cases;
        doc.deaths_total = snapshot.deaths_total;
        doc.last_updated = Some(Utc::now());
        persist(&self.path, &doc).await
    }

    /// Replace the news list wholesale. Filters against the blacklist under
    /// the lock, so a URL blacklisted mid-fetch still never lands.
    pub async fn apply_news(&self, mut articles: Vec<Article>) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        articles.retain(|a| !doc.blacklisted_articles.iter().any(|b| *b == a.url));
        doc.news_articles = articles;
        doc.last_updated = Some(Utc::now());
        persist(&self.path, &doc).await
    }

    /// Record a form validation message for the UI.
    pub async fn set_name_err(&self, message: &str) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        doc.name_err = Some(message.to_owned());
        persist(&self.path, &doc).await
    }

    /// Take the pending form error, if any. It renders once, then is gone.
    pub async fn take_name_err(&self) -> Result<Option<String>, StoreError> {
        let mut doc = self.doc.lock().await;
        match doc.name_err.take() {
            Some(msg) => {
                persist(&self.path, &doc).await?;
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }
}

/// Rewrite the document, retrying transient I/O failures with a short
/// backoff before giving up.
async fn persist(path: &Path, doc: &Document) -> Result<(), StoreError> {
    let mut attempt = 0;
    loop {
        match write_atomic(path, doc).await {
            Ok(()) => return Ok(()),
            Err(StoreError::Io(err)) if attempt + 1 < PERSIST_ATTEMPTS => {
                warn!(?err, attempt, "dashboard write failed; retrying");
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(50 << attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn write_atomic(path: &Path, doc: &Document) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
