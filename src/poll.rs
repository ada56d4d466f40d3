use crate::config::{PollSettings, SyncSettings};
use crate::cycle::UpdateCycle;
use crate::error::Result;
use crate::feed::FeedSource;
use crate::store::MailStore;

/// Run update cycles back to back with `poll.interval` between them.
///
/// Cycles never overlap. A failed cycle is logged and the loop carries on,
/// unless `poll.exit_on_error` is set, in which case the error is returned.
/// Returns `Ok` only once `poll.max_cycles` cycles have run.
pub async fn run<S: MailStore, F: FeedSource>(
    store: &S,
    source: &F,
    settings: &SyncSettings,
    poll: PollSettings,
) -> Result<()> {
    let cycle = UpdateCycle::new(store, source, settings);
    let mut completed = 0usize;

    loop {
        match cycle.run().await {
            Ok(report) => log::info!(
                "Cycle done: {} commands, {} duplicates removed, {} OPML imported, \
                 {} feeds synced, {} failed, {} new entries",
                report.commands,
                report.duplicates_deleted,
                report.opml_imported,
                report.feeds_synced,
                report.feeds_failed,
                report.entries_appended
            ),
            Err(e) if poll.exit_on_error => {
                log::error!("Cycle failed, stopping: {}", e);
                return Err(e);
            }
            Err(e) => log::error!("Cycle failed: {}", e),
        }

        completed += 1;
        if poll.max_cycles.is_some_and(|max| completed >= max) {
            return Ok(());
        }
        tokio::time::sleep(poll.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::error::Error;
    use crate::models::{Feed, FolderPath, MessageId};
    use crate::store::{ListPattern, MemoryStore};

    struct NoFeeds;

    impl FeedSource for NoFeeds {
        async fn fetch(&self, url: &str) -> Result<Feed> {
            Err(Error::feed(url, "offline"))
        }
    }

    /// A store whose every call fails, like a dropped connection.
    struct Unreachable;

    fn down<T>() -> Result<T> {
        Err(Error::Store("connection refused".into()))
    }

    impl MailStore for Unreachable {
        async fn select(&self, _: &FolderPath) -> Result<bool> {
            down()
        }
        async fn create(&self, _: &FolderPath) -> Result<()> {
            down()
        }
        async fn subscribe(&self, _: &FolderPath) -> Result<()> {
            down()
        }
        async fn unsubscribe(&self, _: &FolderPath) -> Result<()> {
            down()
        }
        async fn delete(&self, _: &FolderPath) -> Result<()> {
            down()
        }
        async fn list(&self, _: &FolderPath, _: ListPattern<'_>) -> Result<Vec<FolderPath>> {
            down()
        }
        async fn search_header(&self, _: &FolderPath, _: &str, _: &str) -> Result<Vec<MessageId>> {
            down()
        }
        async fn fetch(&self, _: &FolderPath, _: MessageId) -> Result<Vec<u8>> {
            down()
        }
        async fn append(&self, _: &FolderPath, _: &[u8], _: DateTime<Utc>) -> Result<()> {
            down()
        }
        async fn copy(&self, _: &FolderPath, _: MessageId, _: &FolderPath) -> Result<()> {
            down()
        }
        async fn flag_deleted(&self, _: &FolderPath, _: MessageId) -> Result<()> {
            down()
        }
        async fn expunge(&self, _: &FolderPath) -> Result<()> {
            down()
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings::new("INBOX", "INBOX.rss2imap", '.', "me@example.com")
    }

    fn poll(exit_on_error: bool, max_cycles: Option<usize>) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(1),
            exit_on_error,
            max_cycles,
        }
    }

    #[tokio::test]
    async fn stops_after_max_cycles() {
        let store = MemoryStore::with_folders('.', &["INBOX"]);
        run(&store, &NoFeeds, &settings(), poll(true, Some(3)))
            .await
            .unwrap();
        assert!(store.folder_names().contains(&"INBOX.rss2imap".to_string()));
    }

    #[tokio::test]
    async fn exit_on_error_returns_the_failure() {
        let err = run(&Unreachable, &NoFeeds, &settings(), poll(true, None)).await;
        assert!(matches!(err, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn failures_are_logged_and_looping_continues() {
        run(&Unreachable, &NoFeeds, &settings(), poll(false, Some(2)))
            .await
            .unwrap();
    }
}
