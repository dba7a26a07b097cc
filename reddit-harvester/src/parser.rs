use crate::types::{AutomationError, HarvestedItem, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    subreddit: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    over_18: bool,
    created_utc: f64,
}

/// Turns a channel listing into harvested items.
///
/// Keeps only posts created within `window` of `now`, in listing order, and
/// drops repeated ids. Children that do not look like posts are skipped.
pub struct ListingParser {
    seen_ids: HashSet<String>,
}

impl ListingParser {
    pub fn new() -> Self {
        Self {
            seen_ids: HashSet::new(),
        }
    }

    pub fn parse(&mut self, body: &str, now: DateTime<Utc>, window: chrono::Duration) -> Result<Vec<HarvestedItem>> {
        let listing: Listing =
            serde_json::from_str(body).map_err(|e| AutomationError::Parse(format!("listing JSON: {}", e)))?;

        let cutoff = now - window;
        let mut items = Vec::new();

        for child in listing.data.children {
            let post: Post = match serde_json::from_value(child.data.clone()) {
                Ok(post) => post,
                Err(e) => {
                    warn!("Skipping malformed listing entry: {}", e);
                    continue;
                }
            };

            let Some(created_at) = timestamp(post.created_utc) else {
                warn!("Skipping post {} with invalid timestamp {}", post.id, post.created_utc);
                continue;
            };
            if created_at < cutoff {
                continue;
            }

            if !self.seen_ids.insert(post.id.clone()) {
                debug!("Duplicate post id in batch: {}", post.id);
                continue;
            }

            items.push(to_item(post, created_at, child.data));
        }

        Ok(items)
    }
}

impl Default for ListingParser {
    fn default() -> Self {
        Self::new()
    }
}

fn timestamp(created_utc: f64) -> Option<DateTime<Utc>> {
    if !created_utc.is_finite() {
        return None;
    }
    Utc.timestamp_opt(created_utc.trunc() as i64, 0).single()
}

fn to_item(post: Post, created_at: DateTime<Utc>, raw: serde_json::Value) -> HarvestedItem {
    let url = post
        .permalink
        .as_deref()
        .map(|permalink| format!("https://reddit.com{}", permalink));

    // Link posts point off-site; self posts point back at reddit.
    let media_present = post
        .url
        .as_deref()
        .map(|u| !u.is_empty() && !u.contains("reddit.com"))
        .unwrap_or(false);

    HarvestedItem {
        external_id: post.id,
        channel: post.subreddit.unwrap_or_default(),
        title: post.title,
        body: post.selftext.filter(|s| !s.is_empty()),
        author: post.author.unwrap_or_else(|| "[deleted]".to_string()),
        url,
        permalink: post.permalink,
        nsfw: post.over_18,
        media_present,
        created_at,
        raw,
    }
}
