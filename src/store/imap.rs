use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use melib::backends::{
    BackendEventConsumer, EnvelopeHashBatch, FlagOp, IsSubscribedFn, MailBackend,
};
use melib::conf::AccountSettings;
use melib::email::headers::HeaderName;
use melib::email::{Envelope, Flag};
use melib::imap::ImapType;
use melib::search::Query;
use melib::{AccountHash, EnvelopeHash, MailboxHash};

use super::{ListPattern, MailStore};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{FolderPath, MessageId};

/// Mail store backed by a live IMAP session (melib).
///
/// melib addresses mailboxes by hash, so the store keeps a path → hash map
/// that is refreshed whenever a lookup misses or the folder tree changes.
pub struct ImapStore {
    backend: Arc<Mutex<Box<ImapType>>>,
    delimiter: char,
    mailboxes: Mutex<HashMap<String, MailboxHash>>,
    /// Messages flagged deleted per mailbox, waiting for `expunge`.
    pending_expunge: Mutex<HashMap<MailboxHash, HashSet<EnvelopeHash>>>,
    /// Mailboxes whose UIDs melib has mapped to envelope hashes since they
    /// were last selected or written to. `SEARCH` results for UIDs melib has
    /// not seen are dropped, so such a mailbox is re-fetched before a search.
    indexed: Mutex<HashSet<MailboxHash>>,
}

impl std::fmt::Debug for ImapStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapStore")
            .field("delimiter", &self.delimiter)
            .finish_non_exhaustive()
    }
}

impl ImapStore {
    /// Connect to the IMAP server using the given config.
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut extra = IndexMap::new();
        extra.insert("server_hostname".into(), config.imap_server.clone());
        extra.insert("server_username".into(), config.username.clone());
        extra.insert("server_password".into(), config.password.clone());
        extra.insert("server_port".into(), config.imap_port.to_string());
        extra.insert("use_tls".into(), "true".into());
        extra.insert(
            "use_starttls".into(),
            if config.use_starttls { "true" } else { "false" }.into(),
        );
        extra.insert("danger_accept_invalid_certs".into(), "false".into());

        let account_settings = AccountSettings {
            name: config.username.clone(),
            root_mailbox: config.inbox.clone(),
            format: "imap".into(),
            identity: config.recipient.clone(),
            extra,
            ..Default::default()
        };

        let is_subscribed: IsSubscribedFn =
            (Arc::new(|_: &str| true) as Arc<dyn Fn(&str) -> bool + Send + Sync>).into();

        let event_consumer = BackendEventConsumer::new(Arc::new(
            |_account_hash: AccountHash, event: melib::backends::BackendEvent| {
                log::debug!("IMAP backend event: {:?}", event);
            },
        ));

        let backend = ImapType::new(&account_settings, is_subscribed, event_consumer)
            .map_err(|e| Error::Store(format!("Failed to create IMAP backend: {e}")))?;

        let store = ImapStore {
            backend: Arc::new(Mutex::new(backend)),
            delimiter: config.delimiter,
            mailboxes: Mutex::new(HashMap::new()),
            pending_expunge: Mutex::new(HashMap::new()),
            indexed: Mutex::new(HashSet::new()),
        };

        {
            let backend = store.backend.lock().await;
            let online_future = backend
                .is_online()
                .map_err(|e| Error::Store(format!("IMAP is_online failed: {e}")))?;
            online_future
                .await
                .map_err(|e| Error::Store(format!("IMAP connection failed: {e}")))?;
        }
        log::info!("Connected to {}:{}", config.imap_server, config.imap_port);

        store.refresh_mailboxes().await?;
        Ok(store)
    }

    async fn refresh_mailboxes(&self) -> Result<()> {
        let future = {
            let backend = self.backend.lock().await;
            backend
                .mailboxes()
                .map_err(|e| Error::Store(format!("Failed to request mailboxes: {e}")))?
        };
        let mailboxes = future
            .await
            .map_err(|e| Error::Store(format!("Failed to fetch mailboxes: {e}")))?;

        let paths = mailboxes
            .iter()
            .map(|(hash, mailbox)| (mailbox.path().to_string(), *hash))
            .collect();
        *self.mailboxes.lock().await = paths;
        Ok(())
    }

    async fn lookup(&self, folder: &FolderPath) -> Result<Option<MailboxHash>> {
        let key = folder.to_string();
        if let Some(hash) = self.mailboxes.lock().await.get(&key) {
            return Ok(Some(*hash));
        }
        self.refresh_mailboxes().await?;
        Ok(self.mailboxes.lock().await.get(&key).copied())
    }

    async fn mailbox_hash(&self, folder: &FolderPath) -> Result<MailboxHash> {
        self.lookup(folder)
            .await?
            .ok_or_else(|| Error::FolderNotFound(folder.to_string()))
    }

    /// All undeleted envelopes of a mailbox.
    async fn envelopes(&self, mailbox_hash: MailboxHash) -> Result<Vec<Envelope>> {
        let stream = {
            let mut backend = self.backend.lock().await;
            backend
                .fetch(mailbox_hash)
                .map_err(|e| Error::Store(format!("Failed to start fetch: {e}")))?
        };

        let mut stream = std::pin::pin!(stream);
        let mut envelopes = Vec::new();
        while let Some(batch) = stream.next().await {
            let batch =
                batch.map_err(|e| Error::Store(format!("Error fetching envelopes: {e}")))?;
            envelopes.extend(
                batch
                    .into_iter()
                    .filter(|env| !env.flags().contains(Flag::TRASHED)),
            );
        }
        Ok(envelopes)
    }

    async fn bytes(&self, hash: EnvelopeHash) -> Result<Vec<u8>> {
        let future = {
            let backend = self.backend.lock().await;
            backend
                .envelope_bytes_by_hash(hash)
                .map_err(|e| Error::Store(format!("Failed to request message bytes: {e}")))?
        };
        future
            .await
            .map_err(|e| Error::Store(format!("Failed to fetch message bytes: {e}")))
    }

    async fn ensure_indexed(&self, mailbox_hash: MailboxHash) -> Result<()> {
        if self.indexed.lock().await.contains(&mailbox_hash) {
            return Ok(());
        }
        let count = self.envelopes(mailbox_hash).await?.len();
        log::debug!("Indexed {} envelopes in mailbox {}", count, mailbox_hash);
        self.indexed.lock().await.insert(mailbox_hash);
        Ok(())
    }

    async fn invalidate(&self, mailbox_hash: MailboxHash) {
        self.indexed.lock().await.remove(&mailbox_hash);
    }
}

/// `HEADER <name> <needle> NOT DELETED`, evaluated by the server.
fn header_query(header: &str, needle: &str) -> Result<Query> {
    let name = HeaderName::try_from(header)
        .map_err(|e| Error::Store(format!("Invalid header name {header:?}: {e}")))?;
    Ok(Query::And(
        Box::new(Query::Header(name, needle.to_string())),
        Box::new(Query::Not(Box::new(Query::Flags(vec!["deleted".into()])))),
    ))
}

impl MailStore for ImapStore {
    /// Also drops the folder's UID index so the next search sees messages
    /// other clients delivered since.
    async fn select(&self, folder: &FolderPath) -> Result<bool> {
        match self.lookup(folder).await? {
            Some(hash) => {
                self.invalidate(hash).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create(&self, folder: &FolderPath) -> Result<()> {
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .create_mailbox(folder.to_string())
                .map_err(|e| Error::Store(format!("Failed to request create {folder}: {e}")))?
        };
        let (hash, _) = future
            .await
            .map_err(|e| Error::Store(format!("Failed to create {folder}: {e}")))?;
        self.mailboxes.lock().await.insert(folder.to_string(), hash);
        Ok(())
    }

    async fn subscribe(&self, folder: &FolderPath) -> Result<()> {
        let hash = self.mailbox_hash(folder).await?;
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .set_mailbox_subscription(hash, true)
                .map_err(|e| Error::Store(format!("Failed to request subscribe {folder}: {e}")))?
        };
        future
            .await
            .map_err(|e| Error::Store(format!("Failed to subscribe {folder}: {e}")))
    }

    async fn unsubscribe(&self, folder: &FolderPath) -> Result<()> {
        let hash = self.mailbox_hash(folder).await?;
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .set_mailbox_subscription(hash, false)
                .map_err(|e| Error::Store(format!("Failed to request unsubscribe {folder}: {e}")))?
        };
        future
            .await
            .map_err(|e| Error::Store(format!("Failed to unsubscribe {folder}: {e}")))
    }

    async fn delete(&self, folder: &FolderPath) -> Result<()> {
        let hash = self.mailbox_hash(folder).await?;
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .delete_mailbox(hash)
                .map_err(|e| Error::Store(format!("Failed to request delete {folder}: {e}")))?
        };
        future
            .await
            .map_err(|e| Error::Store(format!("Failed to delete {folder}: {e}")))?;
        self.mailboxes.lock().await.remove(&folder.to_string());
        Ok(())
    }

    async fn list(&self, under: &FolderPath, pattern: ListPattern<'_>) -> Result<Vec<FolderPath>> {
        self.refresh_mailboxes().await?;
        let mut folders: Vec<FolderPath> = self
            .mailboxes
            .lock()
            .await
            .keys()
            .map(|path| FolderPath::parse(path, self.delimiter))
            .filter(|p| pattern.matches(under, p))
            .collect();
        folders.sort_by_key(|p| p.to_string());
        Ok(folders)
    }

    async fn search_header(
        &self,
        folder: &FolderPath,
        header: &str,
        needle: &str,
    ) -> Result<Vec<MessageId>> {
        let mailbox_hash = self.mailbox_hash(folder).await?;
        let query = header_query(header, needle)?;

        self.ensure_indexed(mailbox_hash).await?;
        let future = {
            let backend = self.backend.lock().await;
            backend
                .search(query, Some(mailbox_hash))
                .map_err(|e| Error::Store(format!("Failed to request search in {folder}: {e}")))?
        };
        let hits = future
            .await
            .map_err(|e| Error::Store(format!("Failed to search {folder}: {e}")))?;
        Ok(hits.into_iter().map(|hash| MessageId(hash.0)).collect())
    }

    async fn fetch(&self, _folder: &FolderPath, id: MessageId) -> Result<Vec<u8>> {
        self.bytes(EnvelopeHash(id.0)).await
    }

    async fn append(
        &self,
        folder: &FolderPath,
        raw: &[u8],
        _timestamp: DateTime<Utc>,
    ) -> Result<()> {
        // melib's APPEND takes no internal date; servers fall back to the
        // message's own Date header for sorting.
        let mailbox_hash = self.mailbox_hash(folder).await?;
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .save(raw.to_vec(), mailbox_hash, None)
                .map_err(|e| Error::Store(format!("Failed to request append to {folder}: {e}")))?
        };
        future
            .await
            .map_err(|e| Error::Store(format!("Failed to append to {folder}: {e}")))?;
        self.invalidate(mailbox_hash).await;
        Ok(())
    }

    async fn copy(&self, folder: &FolderPath, id: MessageId, dest: &FolderPath) -> Result<()> {
        let source = self.mailbox_hash(folder).await?;
        let destination = self.mailbox_hash(dest).await?;
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .copy_messages(
                    EnvelopeHashBatch::from(EnvelopeHash(id.0)),
                    source,
                    destination,
                    false,
                )
                .map_err(|e| Error::Store(format!("Failed to request copy: {e}")))?
        };
        future
            .await
            .map_err(|e| Error::Store(format!("Failed to copy {id} to {dest}: {e}")))?;
        self.invalidate(destination).await;
        Ok(())
    }

    async fn flag_deleted(&self, folder: &FolderPath, id: MessageId) -> Result<()> {
        let mailbox_hash = self.mailbox_hash(folder).await?;
        let envelope_hash = EnvelopeHash(id.0);
        let future = {
            let mut backend = self.backend.lock().await;
            backend
                .set_flags(
                    EnvelopeHashBatch::from(envelope_hash),
                    mailbox_hash,
                    vec![FlagOp::Set(Flag::TRASHED)],
                )
                .map_err(|e| Error::Store(format!("Failed to request set_flags: {e}")))?
        };
        future
            .await
            .map_err(|e| Error::Store(format!("Failed to flag {id} deleted: {e}")))?;

        self.pending_expunge
            .lock()
            .await
            .entry(mailbox_hash)
            .or_default()
            .insert(envelope_hash);
        Ok(())
    }

    async fn expunge(&self, folder: &FolderPath) -> Result<()> {
        let mailbox_hash = self.mailbox_hash(folder).await?;
        let pending = self
            .pending_expunge
            .lock()
            .await
            .remove(&mailbox_hash)
            .unwrap_or_default();

        for envelope_hash in pending {
            let future = {
                let mut backend = self.backend.lock().await;
                backend
                    .delete_messages(EnvelopeHashBatch::from(envelope_hash), mailbox_hash)
                    .map_err(|e| Error::Store(format!("Failed to request expunge: {e}")))?
            };
            future
                .await
                .map_err(|e| Error::Store(format!("Failed to expunge {folder}: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use melib::imap::ToImapSearch;

    use super::*;

    #[test]
    fn header_search_runs_on_the_server() {
        let search = header_query("X-RSS2IMAP-LINK", "http://x/1")
            .unwrap()
            .to_imap_search()
            .to_ascii_lowercase();
        assert!(
            search.contains(r#"header "x-rss2imap-link" "http://x/1""#),
            "{search}"
        );
        assert!(search.contains("not ("), "{search}");
        assert!(search.contains("deleted"), "{search}");
    }

    #[test]
    fn invalid_header_name_is_a_store_error() {
        assert!(matches!(
            header_query("Bad Header:", "x"),
            Err(Error::Store(_))
        ));
    }
}
