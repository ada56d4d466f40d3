pub mod compose;
pub mod config;
pub mod cycle;
pub mod dedup;
pub mod error;
pub mod feed;
pub mod keyring;
pub mod mime;
pub mod models;
pub mod naming;
pub mod opml;
pub mod poll;
pub mod registry;
pub mod resolve;
pub mod store;
pub mod sync;

pub use config::{Config, PollSettings, SyncSettings};
pub use cycle::{CycleReport, UpdateCycle};
pub use error::{Error, Result};
pub use feed::{FeedSource, HttpFeedSource};
pub use models::{Command, CommandKind, Entry, Feed, FolderPath, MessageId};
pub use store::{ImapStore, MailStore, MemoryStore};
