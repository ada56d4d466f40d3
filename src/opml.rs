//! OPML subscription lists.
//!
//! Importing a list mirrors its outline tree as folders under the root and
//! drops a `feed <url>` command into every folder whose outline names a
//! feed. The next update cycle picks those commands up like any other.

use chrono::Utc;
use serde::Deserialize;

use crate::compose;
use crate::error::{Error, Result};
use crate::feed::FeedSource;
use crate::models::FolderPath;
use crate::naming::safe_name;
use crate::store::{ensure_folder, MailStore};

#[derive(Debug, Deserialize)]
struct Opml {
    body: OpmlBody,
}

#[derive(Debug, Deserialize)]
struct OpmlBody {
    #[serde(rename = "outline", default)]
    outlines: Vec<Outline>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Outline {
    #[serde(rename = "@text")]
    pub text: Option<String>,
    #[serde(rename = "@title")]
    pub title: Option<String>,
    #[serde(rename = "@xmlUrl")]
    pub xml_url: Option<String>,
    #[serde(rename = "outline", default)]
    pub children: Vec<Outline>,
}

impl Outline {
    /// `title`, else `text`, if either is non-blank.
    pub fn explicit_title(&self) -> Option<&str> {
        [&self.title, &self.text]
            .into_iter()
            .filter_map(|t| t.as_deref().map(str::trim))
            .find(|t| !t.is_empty())
    }

    pub fn feed_url(&self) -> Option<&str> {
        self.xml_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// Top-level outlines of an OPML document.
pub fn parse_opml(payload: &[u8]) -> Result<Vec<Outline>> {
    let xml = String::from_utf8_lossy(payload);
    let opml: Opml =
        quick_xml::de::from_str(&xml).map_err(|e| Error::Opml(format!("parse: {e}")))?;
    Ok(opml.body.outlines)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub folders_created: usize,
    pub commands_appended: usize,
    pub failed: usize,
}

/// Mirror `outlines` below `root`.
///
/// A folder that cannot be created is logged and its subtree skipped.
pub async fn import_opml<S: MailStore, F: FeedSource>(
    store: &S,
    source: &F,
    outlines: &[Outline],
    root: &FolderPath,
    recipient: &str,
) -> ImportStats {
    let mut stats = ImportStats::default();
    let mut pending: Vec<(&Outline, FolderPath)> =
        outlines.iter().rev().map(|o| (o, root.clone())).collect();

    while let Some((outline, parent)) = pending.pop() {
        let title = outline_title(source, outline).await;
        let folder = parent.child(&safe_name(&title, parent.delimiter()));

        match ensure_folder(store, &folder).await {
            Ok(true) => stats.folders_created += 1,
            Ok(false) => {}
            Err(e) => {
                log::warn!("Skipping OPML outline {:?}: {}", title, e);
                stats.failed += 1;
                continue;
            }
        }

        if let Some(url) = outline.feed_url() {
            match seed_command(store, &folder, url, recipient).await {
                Ok(()) => {
                    log::info!("Subscribed {} in {}", url, folder);
                    stats.commands_appended += 1;
                }
                Err(e) => {
                    log::warn!("Failed to subscribe {} in {}: {}", url, folder, e);
                    stats.failed += 1;
                }
            }
        }

        pending.extend(outline.children.iter().rev().map(|c| (c, folder.clone())));
    }

    stats
}

/// Explicit title, else the feed's own title, else the URL's host.
async fn outline_title<F: FeedSource>(source: &F, outline: &Outline) -> String {
    if let Some(title) = outline.explicit_title() {
        return title.to_string();
    }
    let Some(url) = outline.feed_url() else {
        return String::new();
    };
    match source.fetch(url).await {
        Ok(feed) => feed.title().to_string(),
        Err(e) => {
            log::warn!("Could not fetch {} for its title: {}", url, e);
            reqwest::Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| url.to_string())
        }
    }
}

async fn seed_command<S: MailStore>(
    store: &S,
    folder: &FolderPath,
    url: &str,
    recipient: &str,
) -> Result<()> {
    let raw = compose::feed_command(url, recipient)?;
    store.append(folder, &raw, Utc::now()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mime;
    use crate::models::Feed;
    use crate::store::MemoryStore;

    const SUBSCRIPTIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="1.0">
  <head><title>Subscriptions</title></head>
  <body>
    <outline text="Tech">
      <outline text="Ars Technica / News" type="rss" xmlUrl="http://ars/rss"/>
      <outline type="rss" xmlUrl="http://untitled.example.org/feed"/>
    </outline>
    <outline title="Comics" text="ignored" xmlUrl="http://xkcd/rss">
      <outline text="Nested" xmlUrl="http://nested/rss"/>
    </outline>
  </body>
</opml>"#;

    struct Titles;

    impl FeedSource for Titles {
        async fn fetch(&self, url: &str) -> Result<Feed> {
            if url.contains("untitled") {
                Ok(Feed {
                    title: Some("Fetched Title".into()),
                    ..Default::default()
                })
            } else {
                Err(Error::feed(url, "offline"))
            }
        }
    }

    struct Offline;

    impl FeedSource for Offline {
        async fn fetch(&self, url: &str) -> Result<Feed> {
            Err(Error::feed(url, "offline"))
        }
    }

    fn path(s: &str) -> FolderPath {
        FolderPath::parse(s, '.')
    }

    fn subjects(store: &MemoryStore, folder: &str) -> Vec<String> {
        store
            .messages(&path(folder))
            .iter()
            .filter_map(|m| mime::header_value(&m.raw, "Subject"))
            .collect()
    }

    #[test]
    fn parses_nested_outlines() {
        let outlines = parse_opml(SUBSCRIPTIONS.as_bytes()).unwrap();
        assert_eq!(outlines.len(), 2);
        assert_eq!(outlines[0].explicit_title(), Some("Tech"));
        assert_eq!(outlines[0].feed_url(), None);
        assert_eq!(outlines[0].children.len(), 2);
        assert_eq!(outlines[1].explicit_title(), Some("Comics"));
        assert_eq!(outlines[1].children[0].feed_url(), Some("http://nested/rss"));
    }

    #[test]
    fn garbage_is_an_opml_error() {
        assert!(matches!(parse_opml(b"not xml at all"), Err(Error::Opml(_))));
    }

    #[tokio::test]
    async fn mirrors_the_tree_and_seeds_commands() {
        let store = MemoryStore::with_folders('.', &["INBOX", "INBOX.feeds"]);
        let outlines = parse_opml(SUBSCRIPTIONS.as_bytes()).unwrap();
        let stats = import_opml(&store, &Titles, &outlines, &path("INBOX.feeds"), "me@example.com").await;

        assert_eq!(
            store.folder_names(),
            [
                "INBOX",
                "INBOX.feeds",
                "INBOX.feeds.Comics",
                "INBOX.feeds.Comics.Nested",
                "INBOX.feeds.Tech",
                "INBOX.feeds.Tech.Ars Technica _ News",
                "INBOX.feeds.Tech.Fetched Title",
            ]
        );
        assert_eq!(
            stats,
            ImportStats {
                folders_created: 5,
                commands_appended: 4,
                failed: 0
            }
        );
        assert!(subjects(&store, "INBOX.feeds.Tech").is_empty());
        assert_eq!(subjects(&store, "INBOX.feeds.Comics"), ["feed http://xkcd/rss"]);
        assert_eq!(
            subjects(&store, "INBOX.feeds.Tech.Ars Technica _ News"),
            ["feed http://ars/rss"]
        );
        assert!(store.is_subscribed(&path("INBOX.feeds.Comics.Nested")));
    }

    #[tokio::test]
    async fn falls_back_to_host_when_feed_is_unreachable() {
        let store = MemoryStore::with_folders('.', &["INBOX.feeds"]);
        let outlines = vec![Outline {
            xml_url: Some("http://blog.example.org/atom.xml".into()),
            ..Default::default()
        }];
        import_opml(&store, &Offline, &outlines, &path("INBOX.feeds"), "me@example.com").await;
        assert!(store
            .folder_names()
            .contains(&"INBOX.feeds.blog_example_org".to_string()));
    }

    #[tokio::test]
    async fn reimport_reuses_folders() {
        let store = MemoryStore::with_folders('.', &["INBOX.feeds"]);
        let outlines = parse_opml(SUBSCRIPTIONS.as_bytes()).unwrap();
        import_opml(&store, &Titles, &outlines, &path("INBOX.feeds"), "me@example.com").await;
        let again = import_opml(&store, &Titles, &outlines, &path("INBOX.feeds"), "me@example.com").await;
        assert_eq!(again.folders_created, 0);
        assert_eq!(again.failed, 0);
    }
}
