//! Feed fetching and parsing.
//!
//! RSS 2.0, RSS 1.0 (RDF) and Atom are read with quick-xml's serde support.
//! Only the fields the engine uses are modelled; everything else is ignored.

use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::models::{Entry, Feed};

#[allow(async_fn_in_trait)]
pub trait FeedSource {
    async fn fetch(&self, url: &str) -> Result<Feed>;
}

/// Fetches feeds over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rss2imap/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;
        Ok(HttpFeedSource { client })
    }
}

impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Feed> {
        log::debug!("Fetching feed {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::feed(url, e))?;
        if !response.status().is_success() {
            return Err(Error::feed(url, format!("HTTP {}", response.status())));
        }
        let body = response.text().await.map_err(|e| Error::feed(url, e))?;
        parse_feed(&body).map_err(|reason| Error::feed(url, reason))
    }
}

// ============================================================================
// RSS 2.0 / RSS 1.0 structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct Rdf {
    channel: Option<RdfChannel>,
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RdfChannel {
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    author: Option<String>,
    #[serde(rename = "dc:creator", alias = "creator")]
    creator: Option<String>,
    description: Option<String>,
    #[serde(rename = "content:encoded", alias = "encoded")]
    encoded: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "dc:date", alias = "date")]
    dc_date: Option<String>,
}

// ============================================================================
// Atom structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<AtomText>,
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<AtomText>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    id: Option<String>,
    #[serde(rename = "author", default)]
    authors: Vec<AtomPerson>,
    published: Option<String>,
    updated: Option<String>,
    content: Option<AtomText>,
    summary: Option<AtomText>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomPerson {
    name: Option<String>,
}

// ============================================================================
// Parsing
// ============================================================================

/// Parse an RSS or Atom document.
pub fn parse_feed(xml: &str) -> std::result::Result<Feed, String> {
    let (root, encoding) = sniff(xml)?;
    let encoding = encoding.unwrap_or_else(|| "utf-8".into());

    match root.as_str() {
        "rss" => {
            let rss: Rss = quick_xml::de::from_str(xml).map_err(|e| format!("RSS: {e}"))?;
            Ok(Feed {
                title: rss.channel.title,
                encoding,
                entries: rss.channel.items.into_iter().map(rss_entry).collect(),
            })
        }
        "RDF" => {
            let rdf: Rdf = quick_xml::de::from_str(xml).map_err(|e| format!("RDF: {e}"))?;
            Ok(Feed {
                title: rdf.channel.and_then(|c| c.title),
                encoding,
                entries: rdf.items.into_iter().map(rss_entry).collect(),
            })
        }
        "feed" => {
            let atom: AtomFeed = quick_xml::de::from_str(xml).map_err(|e| format!("Atom: {e}"))?;
            Ok(Feed {
                title: atom.title.map(|t| t.value),
                encoding,
                entries: atom.entries.into_iter().map(atom_entry).collect(),
            })
        }
        other => Err(format!("unsupported document root <{other}>")),
    }
}

/// Root element's local name and the declared encoding, if any.
fn sniff(xml: &str) -> std::result::Result<(String, Option<String>), String> {
    let mut reader = Reader::from_str(xml);
    let mut encoding = None;
    loop {
        match reader.read_event() {
            Ok(Event::Decl(decl)) => {
                if let Some(Ok(enc)) = decl.encoding() {
                    encoding = Some(String::from_utf8_lossy(&enc).to_ascii_lowercase());
                }
            }
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let root = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                return Ok((root, encoding));
            }
            Ok(Event::Eof) => return Err("empty document".into()),
            Err(e) => return Err(format!("XML: {e}")),
            _ => {}
        }
    }
}

fn rss_entry(item: RssItem) -> Entry {
    let published = item
        .pub_date
        .as_deref()
        .and_then(parse_date)
        .or_else(|| item.dc_date.as_deref().and_then(parse_date));
    Entry {
        author: non_empty(item.author).or_else(|| non_empty(item.creator)),
        title: item.title.unwrap_or_default().trim().to_string(),
        link: item.link.unwrap_or_default().trim().to_string(),
        published,
        content: non_empty(item.encoded),
        summary: None,
        description: non_empty(item.description),
    }
}

fn atom_entry(entry: AtomEntry) -> Entry {
    let alternate = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string());
    let link = alternate
        .or_else(|| entry.id.as_ref().map(|id| id.trim().to_string()))
        .unwrap_or_default();
    let published = entry
        .published
        .as_deref()
        .and_then(parse_date)
        .or_else(|| entry.updated.as_deref().and_then(parse_date));

    Entry {
        author: entry.authors.into_iter().find_map(|a| non_empty(a.name)),
        title: entry.title.map(|t| t.value.trim().to_string()).unwrap_or_default(),
        link,
        published,
        content: non_empty(entry.content.map(|c| c.value)),
        summary: non_empty(entry.summary.map(|s| s.value)),
        description: None,
    }
}

/// RFC 2822 (RSS) or RFC 3339 (Atom, Dublin Core).
pub fn parse_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    DateTime::parse_from_rfc2822(s)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .ok()
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
