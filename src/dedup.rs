//! Collapse redundant commands.
//!
//! Feed commands are keyed by URL; the one in the deepest folder wins and
//! ties go to the first one seen. OPML commands are keyed by their exact
//! payload bytes; the first one seen wins.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{Command, CommandKind, FolderPath};
use crate::store::MailStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Feed(String),
    Opml(Vec<u8>),
}

impl Key {
    fn of(command: &Command) -> Self {
        match &command.kind {
            CommandKind::Feed { url } => Key::Feed(url.clone()),
            CommandKind::Opml { payload } => Key::Opml(payload.clone()),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DedupPlan {
    /// One command per feed URL / per distinct OPML payload, in first-seen order.
    pub survivors: Vec<Command>,
    /// Everything else; these messages get deleted.
    pub losers: Vec<Command>,
}

/// Decide winners and losers without touching the store.
pub fn plan(commands: Vec<Command>) -> DedupPlan {
    let mut slots: Vec<Command> = Vec::new();
    let mut index: HashMap<Key, usize> = HashMap::new();
    let mut losers = Vec::new();

    for command in commands {
        let key = Key::of(&command);
        let Some(&slot) = index.get(&key) else {
            index.insert(key, slots.len());
            slots.push(command);
            continue;
        };

        let current = &mut slots[slot];
        let replaces = matches!(key, Key::Feed(_))
            && command.folder.cmp_depth(&current.folder) == Ordering::Greater;
        if replaces {
            losers.push(std::mem::replace(current, command));
        } else {
            losers.push(command);
        }
    }

    DedupPlan {
        survivors: slots,
        losers,
    }
}

/// Deduplicate `commands`, deleting the losing messages from the store.
///
/// Returns the survivors and how many messages were deleted. A loser that
/// cannot be deleted is logged; it will be found again on the next cycle.
pub async fn deduplicate<S: MailStore>(store: &S, commands: Vec<Command>) -> (Vec<Command>, usize) {
    let DedupPlan { survivors, losers } = plan(commands);

    let mut touched: Vec<FolderPath> = Vec::new();
    let mut deleted = 0;
    for loser in &losers {
        match store.flag_deleted(&loser.folder, loser.id).await {
            Ok(()) => {
                log::info!("Deleting duplicate command {} in {}", loser.id, loser.folder);
                deleted += 1;
                if !touched.contains(&loser.folder) {
                    touched.push(loser.folder.clone());
                }
            }
            Err(e) => log::warn!(
                "Failed to delete duplicate command {} in {}: {}",
                loser.id,
                loser.folder,
                e
            ),
        }
    }

    for folder in &touched {
        if let Err(e) = store.expunge(folder).await {
            log::warn!("Failed to expunge {}: {}", folder, e);
        }
    }

    (survivors, deleted)
}
