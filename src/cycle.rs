//! One pass of the engine: discover, dedupe, import, resolve, relocate, sync.

use crate::config::SyncSettings;
use crate::dedup::deduplicate;
use crate::error::Result;
use crate::feed::FeedSource;
use crate::models::{Command, CommandKind, FolderPath};
use crate::opml::{import_opml, parse_opml};
use crate::registry::discover;
use crate::resolve::FeedPathResolver;
use crate::store::{ensure_folder, ListPattern, MailStore};
use crate::sync::sync_entries;

/// Counters for one update cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub commands: usize,
    pub duplicates_deleted: usize,
    pub opml_imported: usize,
    pub feeds_synced: usize,
    pub feeds_failed: usize,
    pub entries_appended: usize,
}

pub struct UpdateCycle<'a, S, F> {
    store: &'a S,
    source: &'a F,
    settings: &'a SyncSettings,
}

impl<'a, S: MailStore, F: FeedSource> UpdateCycle<'a, S, F> {
    pub fn new(store: &'a S, source: &'a F, settings: &'a SyncSettings) -> Self {
        UpdateCycle {
            store,
            source,
            settings,
        }
    }

    /// Run one full pass.
    ///
    /// Fails only when the root folder cannot be set up or enumerated;
    /// everything finer-grained is logged and left for the next cycle.
    pub async fn run(&self) -> Result<CycleReport> {
        let root = &self.settings.root;
        ensure_folder(self.store, root).await?;

        let mut folders = vec![self.settings.inbox.clone(), root.clone()];
        folders.extend(self.store.list(root, ListPattern::Descendants).await?);

        let commands = discover(self.store, &folders).await;
        let mut report = CycleReport {
            commands: commands.len(),
            ..Default::default()
        };

        let (survivors, deleted) = deduplicate(self.store, commands).await;
        report.duplicates_deleted = deleted;

        let (opml, feeds): (Vec<Command>, Vec<Command>) = survivors
            .into_iter()
            .partition(|c| matches!(c.kind, CommandKind::Opml { .. }));

        for command in &opml {
            if self.import(command).await {
                report.opml_imported += 1;
            }
        }

        let mut resolver = FeedPathResolver::new(root.clone());
        for (url, group) in group_by_url(feeds) {
            match self.update_feed(&mut resolver, &url, &group).await {
                Ok(appended) => {
                    report.feeds_synced += 1;
                    report.entries_appended += appended;
                }
                Err(e) => {
                    log::warn!("Feed {} not updated this cycle: {}", url, e);
                    report.feeds_failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Import an OPML command and delete it. A payload that does not parse
    /// stays where it is.
    async fn import(&self, command: &Command) -> bool {
        let CommandKind::Opml { payload } = &command.kind else {
            return false;
        };
        let outlines = match parse_opml(payload) {
            Ok(outlines) => outlines,
            Err(e) => {
                log::warn!("OPML command {} in {}: {}", command.id, command.folder, e);
                return false;
            }
        };

        let stats = import_opml(
            self.store,
            self.source,
            &outlines,
            &self.settings.root,
            &self.settings.recipient,
        )
        .await;
        log::info!(
            "Imported OPML from {}: {} folders created, {} feeds subscribed, {} failures",
            command.folder,
            stats.folders_created,
            stats.commands_appended,
            stats.failed
        );

        if let Err(e) = self.remove(&command.folder, command).await {
            log::warn!("Failed to delete OPML command {}: {}", command.id, e);
        }
        true
    }

    async fn remove(&self, folder: &FolderPath, command: &Command) -> Result<()> {
        self.store.flag_deleted(folder, command.id).await?;
        self.store.expunge(folder).await
    }

    /// Fetch, resolve, relocate and sync one feed. Returns entries appended.
    async fn update_feed(
        &self,
        resolver: &mut FeedPathResolver,
        url: &str,
        commands: &[Command],
    ) -> Result<usize> {
        let feed = self.source.fetch(url).await?;
        let candidates: Vec<FolderPath> = commands.iter().map(|c| c.folder.clone()).collect();
        let folder = resolver
            .resolve(self.store, url, &candidates, feed.title())
            .await?;

        self.relocate(commands, &folder).await;

        let stats = sync_entries(self.store, &feed, &folder, &self.settings.recipient).await?;
        log::info!(
            "{} ({}): {} new, {} known, {} failed",
            feed.title(),
            folder,
            stats.appended,
            stats.skipped,
            stats.failed
        );
        Ok(stats.appended)
    }

    /// Move command messages into the feed folder so it carries its own
    /// subscription from now on.
    async fn relocate(&self, commands: &[Command], folder: &FolderPath) {
        let mut sources: Vec<&FolderPath> = Vec::new();
        for command in commands.iter().filter(|c| &c.folder != folder) {
            let moved = async {
                self.store.copy(&command.folder, command.id, folder).await?;
                self.store.flag_deleted(&command.folder, command.id).await
            };
            match moved.await {
                Ok(()) => {
                    log::info!("Moved command {} from {} to {}", command.id, command.folder, folder);
                    if !sources.contains(&&command.folder) {
                        sources.push(&command.folder);
                    }
                }
                Err(e) => log::warn!(
                    "Failed to move command {} from {} to {}: {}",
                    command.id,
                    command.folder,
                    folder,
                    e
                ),
            }
        }

        for source in sources {
            if let Err(e) = self.store.expunge(source).await {
                log::warn!("Failed to expunge {}: {}", source, e);
            }
        }
    }
}

/// Feed commands grouped by URL, groups in first-seen order.
fn group_by_url(commands: Vec<Command>) -> Vec<(String, Vec<Command>)> {
    let mut groups: Vec<(String, Vec<Command>)> = Vec::new();
    for command in commands {
        let Some(url) = command.feed_url().map(str::to_string) else {
            continue;
        };
        match groups.iter_mut().find(|(u, _)| *u == url) {
            Some((_, group)) => group.push(command),
            None => groups.push((url, vec![command])),
        }
    }
    groups
}
