use std::time::SystemTime;

use lettre::message::header::{self, Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart};
use lettre::Message;

use crate::error::{Error, Result};
use crate::mime;
use crate::models::{Entry, Feed};

/// Header that ties an entry message to the entry's link.
pub const MARKER_HEADER: &str = "X-RSS2IMAP-LINK";

/// The value stored in the marker header for `link`.
///
/// Header encoding folds runs of whitespace into one space, so the link is
/// folded the same way before it is written or searched for.
pub fn marker_value(link: &str) -> String {
    link.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The marker header as a typed lettre header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryLink(pub String);

impl Header for EntryLink {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str(MARKER_HEADER)
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(EntryLink(s.trim().to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Build the two-part message that represents one feed entry.
pub fn entry_message(feed: &Feed, entry: &Entry, recipient: &str) -> Result<Vec<u8>> {
    let to: Mailbox = recipient
        .parse()
        .map_err(|e| Error::Compose(format!("Invalid recipient '{recipient}': {e}")))?;

    let sender_name = match entry.author.as_deref().map(str::trim) {
        Some(a) if !a.is_empty() => a,
        _ => feed.title(),
    };
    let from = Mailbox::new(Some(sender_name.to_string()), to.email.clone());

    let body = entry.body();
    let plain = format!(
        "Retrieved from {}\n\n{}",
        entry.link,
        mime::html_to_text(body)
    );
    let html = format!(
        "{}\n<p><a href=\"{}\">Retrieved from {}</a></p>\n",
        body,
        html_escape::encode_double_quoted_attribute(&entry.link),
        html_escape::encode_safe(&entry.link)
    );

    let mut builder = Message::builder()
        .from(from)
        .to(to)
        .subject(entry.title.as_str())
        .header(EntryLink(marker_value(&entry.link)));

    if let Some(published) = entry.published {
        builder = builder.date(SystemTime::from(published));
    }

    let mut message = builder
        .multipart(MultiPart::alternative_plain_html(plain, html))
        .map_err(|e| Error::Compose(format!("Failed to build entry message: {e}")))?;
    // The builder stamps a missing Date with the build time.
    if entry.published.is_none() {
        message.headers_mut().remove::<header::Date>();
    }

    Ok(message.formatted())
}

/// Build a `feed <url>` command message, as a user would send one.
pub fn feed_command(url: &str, recipient: &str) -> Result<Vec<u8>> {
    let mailbox: Mailbox = recipient
        .parse()
        .map_err(|e| Error::Compose(format!("Invalid recipient '{recipient}': {e}")))?;

    let message = Message::builder()
        .from(mailbox.clone())
        .to(mailbox)
        .subject(format!("feed {url}"))
        .header(header::ContentType::TEXT_PLAIN)
        .body(format!("feed {url}\n"))
        .map_err(|e| Error::Compose(format!("Failed to build feed command: {e}")))?;

    Ok(message.formatted())
}
