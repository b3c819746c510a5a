use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use atom_syndication::Feed as AtomFeed;
use rss::Channel;
use std::time::Duration;
use tracing::debug;

/// One item of a fetched feed, before any clean-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub id: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
    pub title: Option<String>,
    /// `content:encoded` when present, otherwise the description. Atom
    /// entries use content, then summary.
    pub body: String,
}

impl FeedEntry {
    /// The entry's guid, or `link#published` when it has none.
    pub fn unique_id(&self) -> String {
        match self.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => format!(
                "{}#{}",
                self.link.as_deref().unwrap_or_default(),
                self.published.as_deref().unwrap_or_default()
            ),
        }
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.published.as_deref()?.trim();
        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

pub trait FeedFetcher: Send + Sync {
    /// Entries in feed order.
    fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>>;
}

pub struct HttpFeedFetcher {
    client: Client,
}

impl HttpFeedFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

impl FeedFetcher for HttpFeedFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let unreachable = |reason: String| Error::FeedUnreachable {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .map_err(|e| unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| unreachable(e.to_string()))?;
        let body = response.bytes().map_err(|e| unreachable(e.to_string()))?;
        debug!(url, bytes = body.len(), "Fetched feed");

        parse_feed(url, &body)
    }
}

/// Parse an RSS 2.0 document, or an Atom one when it is not RSS.
pub fn parse_feed(url: &str, bytes: &[u8]) -> Result<Vec<FeedEntry>> {
    let rss_err = match Channel::read_from(bytes) {
        Ok(channel) => return Ok(rss_entries(&channel)),
        Err(e) => e,
    };
    match AtomFeed::read_from(bytes) {
        Ok(feed) => {
            debug!(url, "Parsed feed as Atom");
            Ok(atom_entries(&feed))
        }
        Err(atom_err) => Err(Error::FeedMalformed {
            url: url.to_string(),
            reason: format!("not RSS ({}) or Atom ({})", rss_err, atom_err),
        }),
    }
}

fn rss_entries(channel: &Channel) -> Vec<FeedEntry> {
    channel
        .items()
        .iter()
        .map(|item| FeedEntry {
            id: item.guid().map(|g| g.value().to_string()),
            link: item.link().map(str::to_string),
            published: item.pub_date().map(str::to_string),
            title: item.title().map(str::to_string),
            body: item
                .content()
                .or_else(|| item.description())
                .unwrap_or_default()
                .to_string(),
        })
        .collect()
}

fn atom_entries(feed: &AtomFeed) -> Vec<FeedEntry> {
    feed.entries()
        .iter()
        .map(|entry| {
            let link = entry
                .links()
                .iter()
                .find(|l| l.rel() == "alternate")
                .or_else(|| entry.links().first())
                .map(|l| l.href().to_string());
            let body = entry
                .content()
                .and_then(|c| c.value())
                .or_else(|| entry.summary().map(|t| t.value.as_str()))
                .unwrap_or_default();
            FeedEntry {
                id: Some(entry.id().to_string()).filter(|id| !id.trim().is_empty()),
                link,
                published: Some(entry.published().unwrap_or(entry.updated()).to_rfc3339()),
                title: Some(entry.title().value.clone()).filter(|t| !t.is_empty()),
                body: body.to_string(),
            }
        })
        .collect()
}
