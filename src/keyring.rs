//! IMAP password lookup in the platform keychain.

use crate::error::{Error, Result};

const SERVICE: &str = "rss2imap";

/// Entries are keyed `user@server` so one keychain can hold several accounts.
fn key_id(username: &str, server: &str) -> String {
    format!("{username}@{server}")
}

pub fn get_password(username: &str, server: &str) -> Result<String> {
    let key = key_id(username, server);
    log::debug!("keyring lookup: service={SERVICE:?} key={key:?}");
    keyring::Entry::new(SERVICE, &key)
        .and_then(|entry| entry.get_password())
        .map_err(|e| {
            log::warn!("No keyring password for {key}: {e}");
            Error::Config(format!("keyring entry {SERVICE}/{key}: {e}"))
        })
}
