/// Everything that can go wrong inside the engine.
///
/// Store and feed failures are per-item: the cycle logs them and moves on.
/// Only errors that escape [`crate::cycle::UpdateCycle::run`] reach the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A mail store call returned a non-OK status.
    #[error("mail store: {0}")]
    Store(String),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    /// A command message whose subject or body could not be interpreted.
    #[error("command: {0}")]
    Command(String),

    #[error("feed {url}: {reason}")]
    Feed { url: String, reason: String },

    #[error("OPML: {0}")]
    Opml(String),

    #[error("compose: {0}")]
    Compose(String),

    #[error("config: {0}")]
    Config(String),
}

impl Error {
    pub fn feed(url: &str, reason: impl std::fmt::Display) -> Self {
        Error::Feed {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
