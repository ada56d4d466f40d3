//! The mail store the engine reads commands from and writes entries into.
//!
//! Every operation names its folder explicitly. Implementations that sit on
//! a stateful session (IMAP `SELECT`) are responsible for selecting before
//! they act; the engine never relies on a previously selected folder.

pub mod imap;
pub mod memory;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{FolderPath, MessageId};

pub use imap::ImapStore;
pub use memory::MemoryStore;

/// Which folders `list` returns, relative to the folder it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPattern<'a> {
    /// Every folder below, at any depth (IMAP `*`).
    Descendants,
    /// Direct children only (IMAP `%`).
    Children,
    /// The direct child with exactly this name.
    Named(&'a str),
}

impl ListPattern<'_> {
    pub fn matches(&self, under: &FolderPath, candidate: &FolderPath) -> bool {
        match self {
            ListPattern::Descendants => candidate.is_descendant_of(under),
            ListPattern::Children => candidate.is_child_of(under),
            ListPattern::Named(name) => candidate.is_child_of(under) && candidate.name() == *name,
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait MailStore {
    /// `Ok(false)` when the folder does not exist.
    async fn select(&self, folder: &FolderPath) -> Result<bool>;

    async fn create(&self, folder: &FolderPath) -> Result<()>;

    async fn subscribe(&self, folder: &FolderPath) -> Result<()>;

    async fn unsubscribe(&self, folder: &FolderPath) -> Result<()>;

    async fn delete(&self, folder: &FolderPath) -> Result<()>;

    /// Folders below `under`, sorted by path.
    async fn list(&self, under: &FolderPath, pattern: ListPattern<'_>) -> Result<Vec<FolderPath>>;

    /// Undeleted messages in `folder` whose `header` contains `needle`,
    /// compared case-insensitively as IMAP `SEARCH HEADER` does.
    async fn search_header(
        &self,
        folder: &FolderPath,
        header: &str,
        needle: &str,
    ) -> Result<Vec<MessageId>>;

    async fn fetch(&self, folder: &FolderPath, id: MessageId) -> Result<Vec<u8>>;

    async fn append(&self, folder: &FolderPath, raw: &[u8], timestamp: DateTime<Utc>)
        -> Result<()>;

    async fn copy(&self, folder: &FolderPath, id: MessageId, dest: &FolderPath) -> Result<()>;

    async fn flag_deleted(&self, folder: &FolderPath, id: MessageId) -> Result<()>;

    /// Permanently remove the messages flagged deleted in `folder`.
    async fn expunge(&self, folder: &FolderPath) -> Result<()>;
}

/// Select `folder`, creating and subscribing it first when it is missing.
///
/// Returns whether the folder had to be created.
pub async fn ensure_folder<S: MailStore>(store: &S, folder: &FolderPath) -> Result<bool> {
    if store.select(folder).await? {
        return Ok(false);
    }
    log::info!("Creating folder {}", folder);
    store.create(folder).await?;
    store.subscribe(folder).await?;
    Ok(true)
}
