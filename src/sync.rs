use std::collections::HashSet;

use chrono::Utc;

use crate::compose::{self, MARKER_HEADER};
use crate::error::{Error, Result};
use crate::mime;
use crate::models::{Entry, Feed, FolderPath};
use crate::store::MailStore;

/// Outcome of syncing one feed into its folder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub appended: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Append one message per entry of `feed` that `folder` does not hold yet.
///
/// Entries are keyed by link only; a changed title or body on the source
/// does not produce a new message. Every entry is looked up before anything
/// is appended, so the folder is searched in the state it had on entry.
/// Per-entry failures are logged and the remaining entries are still
/// processed.
pub async fn sync_entries<S: MailStore>(
    store: &S,
    feed: &Feed,
    folder: &FolderPath,
    recipient: &str,
) -> Result<SyncStats> {
    if !store.select(folder).await? {
        return Err(Error::FolderNotFound(folder.to_string()));
    }

    let mut stats = SyncStats::default();
    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for entry in &feed.entries {
        if entry.link.trim().is_empty() {
            log::warn!("Entry {:?} of {} has no link, skipping", entry.title, feed.title());
            stats.failed += 1;
            continue;
        }

        let marker = compose::marker_value(&entry.link);
        if !seen.insert(marker.clone()) {
            stats.skipped += 1;
            continue;
        }
        match is_represented(store, folder, &marker).await {
            Ok(true) => stats.skipped += 1,
            Ok(false) => missing.push(entry),
            Err(e) => {
                log::warn!("Failed to look up {} in {}: {}", entry.link, folder, e);
                stats.failed += 1;
            }
        }
    }

    for entry in missing {
        match append_entry(store, feed, entry, folder, recipient).await {
            Ok(()) => {
                log::debug!("Appended {} to {}", entry.link, folder);
                stats.appended += 1;
            }
            Err(e) => {
                log::warn!("Failed to append {} to {}: {}", entry.link, folder, e);
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}

/// Whether an undeleted message in `folder` carries exactly `marker`.
async fn is_represented<S: MailStore>(store: &S, folder: &FolderPath, marker: &str) -> Result<bool> {
    for id in store.search_header(folder, MARKER_HEADER, marker).await? {
        let raw = store.fetch(folder, id).await?;
        if mime::header_value(&raw, MARKER_HEADER).as_deref() == Some(marker) {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn append_entry<S: MailStore>(
    store: &S,
    feed: &Feed,
    entry: &Entry,
    folder: &FolderPath,
    recipient: &str,
) -> Result<()> {
    let raw = compose::entry_message(feed, entry, recipient)?;
    let timestamp = entry
        .published
        .map(|p| p.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    store.append(folder, &raw, timestamp).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::DateTime;

    const ME: &str = "me@example.com";

    fn entry(link: &str) -> Entry {
        Entry {
            title: format!("Title of {link}"),
            link: link.into(),
            content: Some("<p>hi</p>".into()),
            ..Default::default()
        }
    }

    fn feed(entries: Vec<Entry>) -> Feed {
        Feed {
            title: Some("Example".into()),
            encoding: "utf-8".into(),
            entries,
        }
    }

    fn folder() -> FolderPath {
        FolderPath::parse("INBOX.feeds.Example", '.')
    }

    fn store() -> MemoryStore {
        MemoryStore::with_folders('.', &["INBOX.feeds.Example"])
    }

    #[tokio::test]
    async fn second_sync_appends_nothing() {
        let store = store();
        let feed = feed(vec![entry("http://x/1"), entry("http://x/2")]);

        let first = sync_entries(&store, &feed, &folder(), ME).await.unwrap();
        assert_eq!(first.appended, 2);

        let second = sync_entries(&store, &feed, &folder(), ME).await.unwrap();
        assert_eq!(second, SyncStats { appended: 0, skipped: 2, failed: 0 });
        assert_eq!(store.messages(&folder()).len(), 2);
    }

    #[tokio::test]
    async fn changed_content_does_not_update() {
        let store = store();
        sync_entries(&store, &feed(vec![entry("http://x/1")]), &folder(), ME)
            .await
            .unwrap();

        let mut edited = entry("http://x/1");
        edited.title = "Edited".into();
        let stats = sync_entries(&store, &feed(vec![edited]), &folder(), ME)
            .await
            .unwrap();
        assert_eq!(stats.appended, 0);
    }

    #[tokio::test]
    async fn prefix_links_are_distinct() {
        let store = store();
        sync_entries(&store, &feed(vec![entry("http://x/10")]), &folder(), ME)
            .await
            .unwrap();
        let stats = sync_entries(&store, &feed(vec![entry("http://x/1")]), &folder(), ME)
            .await
            .unwrap();
        assert_eq!(stats.appended, 1);
        assert_eq!(store.messages(&folder()).len(), 2);
    }

    #[tokio::test]
    async fn entries_keep_feed_order_and_timestamps() {
        let store = store();
        let mut dated = entry("http://x/old");
        dated.published = DateTime::parse_from_rfc3339("2001-02-03T04:05:06Z").ok();
        sync_entries(&store, &feed(vec![entry("http://x/new"), dated]), &folder(), ME)
            .await
            .unwrap();

        let messages = store.messages(&folder());
        let links: Vec<_> = messages
            .iter()
            .filter_map(|m| mime::header_value(&m.raw, MARKER_HEADER))
            .collect();
        assert_eq!(links, ["http://x/new", "http://x/old"]);
        assert_eq!(messages[1].timestamp.to_rfc3339(), "2001-02-03T04:05:06+00:00");
    }

    #[tokio::test]
    async fn failed_append_does_not_stop_the_feed() {
        let store = store();
        store.set_read_only(&folder());
        let stats = sync_entries(
            &store,
            &feed(vec![entry("http://x/1"), entry("http://x/2")]),
            &folder(),
            ME,
        )
        .await
        .unwrap();
        assert_eq!(stats, SyncStats { appended: 0, skipped: 0, failed: 2 });
    }

    #[tokio::test]
    async fn whitespace_in_links_does_not_duplicate() {
        let store = store();
        let feed = feed(vec![entry("http://example.com/a\tb"), entry("http://example.com/c  d")]);
        for _ in 0..3 {
            sync_entries(&store, &feed, &folder(), ME).await.unwrap();
        }

        let markers: Vec<_> = store
            .messages(&folder())
            .iter()
            .filter_map(|m| mime::header_value(&m.raw, MARKER_HEADER))
            .collect();
        assert_eq!(markers, ["http://example.com/a b", "http://example.com/c d"]);
    }

    #[tokio::test]
    async fn repeated_link_in_one_feed_is_appended_once() {
        let store = store();
        let stats = sync_entries(
            &store,
            &feed(vec![entry("http://x/1"), entry("http://x/1")]),
            &folder(),
            ME,
        )
        .await
        .unwrap();
        assert_eq!(stats, SyncStats { appended: 1, skipped: 1, failed: 0 });
        assert_eq!(store.messages(&folder()).len(), 1);
    }

    #[tokio::test]
    async fn missing_folder_is_an_error() {
        let store = MemoryStore::new('.');
        assert!(matches!(
            sync_entries(&store, &feed(vec![]), &folder(), ME).await,
            Err(Error::FolderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn empty_feed_is_fine() {
        let store = store();
        let stats = sync_entries(&store, &feed(vec![]), &folder(), ME).await.unwrap();
        assert_eq!(stats, SyncStats::default());
    }
}
