use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, FixedOffset};

/// Title used when a feed does not declare one.
pub const DEFAULT_FEED_TITLE: &str = "No title";

/// A mail folder, held as its hierarchy segments.
///
/// The delimiter is whatever the server uses between levels (`.` on most
/// Courier/Dovecot setups, `/` elsewhere).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderPath {
    segments: Vec<String>,
    delimiter: char,
}

impl FolderPath {
    pub fn parse(raw: &str, delimiter: char) -> Self {
        let segments = raw
            .split(delimiter)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        FolderPath {
            segments,
            delimiter,
        }
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        FolderPath {
            segments,
            delimiter: self.delimiter,
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Last segment, i.e. the folder's own name.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    /// Strictly below `ancestor` in the hierarchy.
    pub fn is_descendant_of(&self, ancestor: &FolderPath) -> bool {
        self.segments.len() > ancestor.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
    }

    pub fn is_child_of(&self, parent: &FolderPath) -> bool {
        self.segments.len() == parent.segments.len() + 1 && self.is_descendant_of(parent)
    }

    /// Orders folders by how specific they are: segment count first, then
    /// the length of the full path for folders at the same level.
    pub fn cmp_depth(&self, other: &FolderPath) -> Ordering {
        self.depth()
            .cmp(&other.depth())
            .then_with(|| self.to_string().len().cmp(&other.to_string().len()))
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0u8; 4];
        let delim: &str = self.delimiter.encode_utf8(&mut buf);
        f.write_str(&self.segments.join(delim))
    }
}

/// Store-assigned handle of one message inside one folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// `Subject: feed <url>`
    Feed { url: String },
    /// Subject mentions OPML; payload is the raw subscription list.
    Opml { payload: Vec<u8> },
}

/// A user instruction found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub folder: FolderPath,
    pub id: MessageId,
    pub kind: CommandKind,
}

impl Command {
    pub fn feed_url(&self) -> Option<&str> {
        match &self.kind {
            CommandKind::Feed { url } => Some(url),
            CommandKind::Opml { .. } => None,
        }
    }
}

/// A fetched and parsed feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    pub title: Option<String>,
    pub encoding: String,
    pub entries: Vec<Entry>,
}

impl Feed {
    pub fn title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => DEFAULT_FEED_TITLE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    pub author: Option<String>,
    pub title: String,
    /// Dedup key within a feed.
    pub link: String,
    pub published: Option<DateTime<FixedOffset>>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
}

impl Entry {
    /// Body to render: content, then summary, then description.
    pub fn body(&self) -> &str {
        [&self.content, &self.summary, &self.description]
            .into_iter()
            .filter_map(|c| c.as_deref())
            .find(|c| !c.trim().is_empty())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip_segments() {
        let p = FolderPath::parse("INBOX.rss2imap.News", '.');
        assert_eq!(p.segments(), ["INBOX", "rss2imap", "News"]);
        assert_eq!(p.to_string(), "INBOX.rss2imap.News");
        assert_eq!(p.name(), "News");
        assert_eq!(p.depth(), 3);
    }

    #[test]
    fn descendant_and_child_relations() {
        let root = FolderPath::parse("INBOX.rss2imap", '.');
        let child = root.child("News");
        let grandchild = child.child("Tech");
        assert!(child.is_child_of(&root));
        assert!(grandchild.is_descendant_of(&root));
        assert!(!grandchild.is_child_of(&root));
        assert!(!root.is_descendant_of(&root));
        assert!(!FolderPath::parse("INBOX.rss2imapX", '.').is_descendant_of(&root));
    }

    #[test]
    fn depth_beats_string_length() {
        let deep = FolderPath::parse("A.B.C", '.');
        let long = FolderPath::parse("Averyverylongname.B", '.');
        assert_eq!(deep.cmp_depth(&long), Ordering::Greater);

        let short = FolderPath::parse("A.B", '.');
        let longer = FolderPath::parse("A.Bee", '.');
        assert_eq!(longer.cmp_depth(&short), Ordering::Greater);
    }

    #[test]
    fn entry_body_priority() {
        let mut e = Entry {
            description: Some("desc".into()),
            summary: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(e.body(), "desc");
        e.content = Some("<p>full</p>".into());
        assert_eq!(e.body(), "<p>full</p>");
    }

    #[test]
    fn feed_title_default() {
        assert_eq!(Feed::default().title(), DEFAULT_FEED_TITLE);
        let f = Feed {
            title: Some("Example".into()),
            ..Default::default()
        };
        assert_eq!(f.title(), "Example");
    }
}
