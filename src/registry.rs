//! Command discovery.
//!
//! A command is a message whose subject is `feed <url>` or mentions `OPML`.
//! Entry messages written by the synchronizer carry the marker header and
//! are never treated as commands, whatever their subject says.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::compose::MARKER_HEADER;
use crate::error::{Error, Result};
use crate::mime;
use crate::models::{Command, CommandKind, FolderPath, MessageId};
use crate::store::MailStore;

/// Server-side subject filters used to find candidate commands.
pub const FEED_SUBJECT: &str = "feed ";
pub const OPML_SUBJECT: &str = "OPML";

fn feed_subject() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^feed\s+(\S+)$").expect("static regex"))
}

/// Scan `folders` in order and return every command found.
///
/// A folder that cannot be searched, or a message that cannot be fetched or
/// understood, is logged and skipped; discovery itself never fails.
pub async fn discover<S: MailStore>(store: &S, folders: &[FolderPath]) -> Vec<Command> {
    let mut commands = Vec::new();

    for folder in folders {
        let ids = match candidates(store, folder).await {
            Ok(ids) => ids,
            Err(e) => {
                log::warn!("Skipping {} during discovery: {}", folder, e);
                continue;
            }
        };

        for id in ids {
            let raw = match store.fetch(folder, id).await {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("Failed to fetch message {} in {}: {}", id, folder, e);
                    continue;
                }
            };
            match classify(folder, id, &raw) {
                Ok(Some(command)) => {
                    log::debug!("Found command {:?} in {} ({})", kind_label(&command), folder, id);
                    commands.push(command);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Ignoring message {} in {}: {}", id, folder, e),
            }
        }
    }

    commands
}

/// Ids matching either subject filter, in search order, without repeats.
async fn candidates<S: MailStore>(store: &S, folder: &FolderPath) -> Result<Vec<MessageId>> {
    if !store.select(folder).await? {
        return Err(Error::FolderNotFound(folder.to_string()));
    }
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for needle in [FEED_SUBJECT, OPML_SUBJECT] {
        for id in store.search_header(folder, "Subject", needle).await? {
            if seen.insert(id) {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

/// Decide what a raw message asks for.
///
/// `Ok(None)` for messages that only matched the search loosely (entry
/// messages, subjects that merely contain "feed "). `Err` for messages that
/// look like commands but cannot be carried out.
pub fn classify(folder: &FolderPath, id: MessageId, raw: &[u8]) -> Result<Option<Command>> {
    if mime::header_value(raw, MARKER_HEADER).is_some() {
        return Ok(None);
    }
    let subject = mime::header_value(raw, "Subject").unwrap_or_default();
    let subject = subject.trim();

    let kind = if let Some(caps) = feed_subject().captures(subject) {
        CommandKind::Feed {
            url: caps[1].to_string(),
        }
    } else if subject.to_ascii_uppercase().contains(OPML_SUBJECT) {
        CommandKind::Opml {
            payload: mime::opml_payload(raw)?,
        }
    } else if subject.to_ascii_lowercase().starts_with("feed") {
        return Err(Error::Command(format!(
            "subject {subject:?} has no parseable feed URL"
        )));
    } else {
        return Ok(None);
    };

    Ok(Some(Command {
        folder: folder.clone(),
        id,
        kind,
    }))
}

fn kind_label(command: &Command) -> String {
    match &command.kind {
        CommandKind::Feed { url } => format!("feed {url}"),
        CommandKind::Opml { payload } => format!("OPML ({} bytes)", payload.len()),
    }
}
