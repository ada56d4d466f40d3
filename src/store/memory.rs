//! A mail store kept entirely in process memory.
//!
//! Behaves like a single-user IMAP account: folders must exist before they
//! are used, deletes are two-phase (flag, then expunge), and header search is
//! case-insensitive substring matching over undeleted messages.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{ListPattern, MailStore};
use crate::error::{Error, Result};
use crate::mime;
use crate::models::{FolderPath, MessageId};

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: MessageId,
    pub raw: Vec<u8>,
    pub timestamp: DateTime<Utc>,
    pub deleted: bool,
}

#[derive(Debug)]
struct MemoryFolder {
    path: FolderPath,
    subscribed: bool,
    messages: Vec<StoredMessage>,
}

impl MemoryFolder {
    fn new(path: FolderPath) -> Self {
        MemoryFolder {
            path,
            subscribed: false,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    folders: BTreeMap<String, MemoryFolder>,
    next_id: u64,
    read_only: HashSet<String>,
}

#[derive(Debug)]
pub struct MemoryStore {
    delimiter: char,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(delimiter: char) -> Self {
        MemoryStore {
            delimiter,
            state: Mutex::new(State::default()),
        }
    }

    /// Create `folders` up front, e.g. the inbox.
    pub fn with_folders(delimiter: char, folders: &[&str]) -> Self {
        let store = MemoryStore::new(delimiter);
        {
            let mut state = store.lock();
            for f in folders {
                let path = FolderPath::parse(f, delimiter);
                state.folders.insert(path.to_string(), MemoryFolder::new(path));
            }
        }
        store
    }

    /// Drop a message straight into a folder, as a mail client would.
    pub fn deliver(&self, folder: &str, raw: &[u8]) -> Result<MessageId> {
        let path = FolderPath::parse(folder, self.delimiter);
        let mut state = self.lock();
        state.next_id += 1;
        let id = MessageId(state.next_id);
        let f = state
            .folders
            .get_mut(&path.to_string())
            .ok_or_else(|| Error::FolderNotFound(path.to_string()))?;
        f.messages.push(StoredMessage {
            id,
            raw: raw.to_vec(),
            timestamp: Utc::now(),
            deleted: false,
        });
        Ok(id)
    }

    /// Appends to this folder will fail from now on.
    pub fn set_read_only(&self, folder: &FolderPath) {
        self.lock().read_only.insert(folder.to_string());
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.lock().folders.keys().cloned().collect()
    }

    /// Messages not flagged deleted, in arrival order.
    pub fn messages(&self, folder: &FolderPath) -> Vec<StoredMessage> {
        self.lock()
            .folders
            .get(&folder.to_string())
            .map(|f| f.messages.iter().filter(|m| !m.deleted).cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, folder: &FolderPath) -> bool {
        self.lock()
            .folders
            .get(&folder.to_string())
            .map(|f| f.subscribed)
            .unwrap_or(false)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-operation.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_folder<T>(
        &self,
        folder: &FolderPath,
        f: impl FnOnce(&mut MemoryFolder) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.lock();
        let entry = state
            .folders
            .get_mut(&folder.to_string())
            .ok_or_else(|| Error::FolderNotFound(folder.to_string()))?;
        f(entry)
    }
}

impl MailStore for MemoryStore {
    async fn select(&self, folder: &FolderPath) -> Result<bool> {
        Ok(self.lock().folders.contains_key(&folder.to_string()))
    }

    async fn create(&self, folder: &FolderPath) -> Result<()> {
        let mut state = self.lock();
        let key = folder.to_string();
        if state.folders.contains_key(&key) {
            return Err(Error::Store(format!("CREATE {key}: folder already exists")));
        }
        state.folders.insert(key, MemoryFolder::new(folder.clone()));
        Ok(())
    }

    async fn subscribe(&self, folder: &FolderPath) -> Result<()> {
        self.with_folder(folder, |f| {
            f.subscribed = true;
            Ok(())
        })
    }

    async fn unsubscribe(&self, folder: &FolderPath) -> Result<()> {
        self.with_folder(folder, |f| {
            f.subscribed = false;
            Ok(())
        })
    }

    async fn delete(&self, folder: &FolderPath) -> Result<()> {
        self.lock()
            .folders
            .remove(&folder.to_string())
            .map(|_| ())
            .ok_or_else(|| Error::FolderNotFound(folder.to_string()))
    }

    async fn list(&self, under: &FolderPath, pattern: ListPattern<'_>) -> Result<Vec<FolderPath>> {
        Ok(self
            .lock()
            .folders
            .values()
            .map(|f| &f.path)
            .filter(|p| pattern.matches(under, p))
            .cloned()
            .collect())
    }

    async fn search_header(
        &self,
        folder: &FolderPath,
        header: &str,
        needle: &str,
    ) -> Result<Vec<MessageId>> {
        let needle = needle.to_lowercase();
        self.with_folder(folder, |f| {
            Ok(f.messages
                .iter()
                .filter(|m| !m.deleted)
                .filter(|m| {
                    mime::header_value(&m.raw, header)
                        .map(|v| v.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
                .map(|m| m.id)
                .collect())
        })
    }

    async fn fetch(&self, folder: &FolderPath, id: MessageId) -> Result<Vec<u8>> {
        self.with_folder(folder, |f| {
            f.messages
                .iter()
                .find(|m| m.id == id)
                .map(|m| m.raw.clone())
                .ok_or_else(|| Error::Store(format!("FETCH {id} in {folder}: no such message")))
        })
    }

    async fn append(
        &self,
        folder: &FolderPath,
        raw: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.lock();
        let key = folder.to_string();
        if state.read_only.contains(&key) {
            return Err(Error::Store(format!("APPEND {key}: folder is read-only")));
        }
        state.next_id += 1;
        let id = MessageId(state.next_id);
        let f = state
            .folders
            .get_mut(&key)
            .ok_or_else(|| Error::FolderNotFound(key.clone()))?;
        f.messages.push(StoredMessage {
            id,
            raw: raw.to_vec(),
            timestamp,
            deleted: false,
        });
        Ok(())
    }

    async fn copy(&self, folder: &FolderPath, id: MessageId, dest: &FolderPath) -> Result<()> {
        let mut state = self.lock();
        let source = state
            .folders
            .get(&folder.to_string())
            .ok_or_else(|| Error::FolderNotFound(folder.to_string()))?
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| Error::Store(format!("COPY {id} from {folder}: no such message")))?;

        state.next_id += 1;
        let new_id = MessageId(state.next_id);
        let target = state
            .folders
            .get_mut(&dest.to_string())
            .ok_or_else(|| Error::FolderNotFound(dest.to_string()))?;
        target.messages.push(StoredMessage {
            id: new_id,
            deleted: false,
            ..source
        });
        Ok(())
    }

    async fn flag_deleted(&self, folder: &FolderPath, id: MessageId) -> Result<()> {
        self.with_folder(folder, |f| {
            let msg = f
                .messages
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| Error::Store(format!("STORE {id} in {folder}: no such message")))?;
            msg.deleted = true;
            Ok(())
        })
    }

    async fn expunge(&self, folder: &FolderPath) -> Result<()> {
        self.with_folder(folder, |f| {
            f.messages.retain(|m| !m.deleted);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CMD: &[u8] = b"From: a@example.com\r\nSubject: feed http://example.com/rss\r\n\r\nx\r\n";

    #[tokio::test]
    async fn search_skips_deleted_and_is_case_insensitive() {
        let store = MemoryStore::with_folders('.', &["INBOX"]);
        let inbox = FolderPath::parse("INBOX", '.');
        let id = store.deliver("INBOX", CMD).unwrap();

        let hits = store.search_header(&inbox, "Subject", "FEED ").await.unwrap();
        assert_eq!(hits, vec![id]);

        store.flag_deleted(&inbox, id).await.unwrap();
        assert!(store
            .search_header(&inbox, "Subject", "feed ")
            .await
            .unwrap()
            .is_empty());

        store.expunge(&inbox).await.unwrap();
        assert!(store.fetch(&inbox, id).await.is_err());
    }

    #[tokio::test]
    async fn copy_keeps_source_until_expunge() {
        let store = MemoryStore::with_folders('.', &["INBOX", "INBOX.feeds"]);
        let inbox = FolderPath::parse("INBOX", '.');
        let feeds = FolderPath::parse("INBOX.feeds", '.');
        let id = store.deliver("INBOX", CMD).unwrap();

        store.copy(&inbox, id, &feeds).await.unwrap();
        assert_eq!(store.messages(&inbox).len(), 1);
        assert_eq!(store.messages(&feeds).len(), 1);
        assert_eq!(store.messages(&feeds)[0].raw, CMD);
    }

    #[tokio::test]
    async fn folder_lifecycle() {
        let store = MemoryStore::new('.');
        let f = FolderPath::parse("INBOX.feeds", '.');
        assert!(!store.select(&f).await.unwrap());
        store.create(&f).await.unwrap();
        assert!(store.create(&f).await.is_err());
        store.subscribe(&f).await.unwrap();
        assert!(store.is_subscribed(&f));
        store.unsubscribe(&f).await.unwrap();
        assert!(!store.is_subscribed(&f));
        store.delete(&f).await.unwrap();
        assert!(!store.select(&f).await.unwrap());
    }

    #[tokio::test]
    async fn read_only_folder_rejects_append() {
        let store = MemoryStore::with_folders('.', &["INBOX"]);
        let inbox = FolderPath::parse("INBOX", '.');
        store.set_read_only(&inbox);
        assert!(store.append(&inbox, CMD, Utc::now()).await.is_err());
    }
}
