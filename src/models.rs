use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// An item as served by the upstream `item/{id}.json` endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RankedItem {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub by: Option<String>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub descendants: Option<i64>,
}

impl RankedItem {
    pub fn new(id: u64, score: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: Some(title.into()),
            url: None,
            by: None,
            time: None,
            score,
            descendants: None,
        }
    }
}

/// The externally visible shape of one story in the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateEntry {
    pub title: String,
    #[serde(rename = "uri")]
    pub url: String,
    #[serde(rename = "postedBy")]
    pub author: String,
    pub time: DateTime<Utc>,
    pub score: i64,
    #[serde(rename = "commentCount")]
    pub comment_count: i64,
}

impl From<&RankedItem> for AggregateEntry {
    fn from(item: &RankedItem) -> Self {
        let time = item
            .time
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or_default();

        Self {
            title: item.title.clone().unwrap_or_default(),
            url: item.url.clone().unwrap_or_default(),
            author: item.by.clone().unwrap_or_default(),
            time,
            score: item.score,
            comment_count: item.descendants.unwrap_or(0),
        }
    }
}

/// A fully built aggregate, sorted by score descending.
///
/// Snapshots are never mutated; a rebuild replaces the whole value.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    entries: Arc<[AggregateEntry]>,
    computed_at: Instant,
}

impl CacheSnapshot {
    /// Sorts `entries` by score descending. The sort is stable, so equal
    /// scores keep the order the source ranked them in.
    pub fn new(mut entries: Vec<AggregateEntry>, computed_at: Instant) -> Self {
        entries.sort_by(|a, b| b.score.cmp(&a.score));
        Self {
            entries: entries.into(),
            computed_at,
        }
    }

    /// Fresh until `now` passes `computed_at + ttl`.
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.computed_at) <= ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn computed_at(&self) -> Instant {
        self.computed_at
    }

    pub fn entries(&self) -> &[AggregateEntry] {
        &self.entries
    }

    pub fn top(&self, count: usize) -> Vec<AggregateEntry> {
        self.entries.iter().take(count).cloned().collect()
    }
}
