//! Shared `SourceClient` doubles for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hn_best_stories::config::AppConfig;
use hn_best_stories::{build_state, AppState, RankedItem, SourceClient, SourceError};

/// In-memory upstream with per-endpoint call counters.
#[derive(Default)]
pub struct FakeSource {
    ids: Mutex<Vec<u64>>,
    list_error: Mutex<Option<SourceError>>,
    items: Mutex<HashMap<u64, Result<RankedItem, SourceError>>>,
    list_delay: Mutex<Duration>,
    pub list_calls: AtomicUsize,
    pub item_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ranks `items` in the given order.
    pub fn with_items(items: Vec<RankedItem>) -> Arc<Self> {
        let source = Self::new();
        source.set_items(items);
        source
    }

    pub fn set_items(&self, items: Vec<RankedItem>) {
        *self.ids.lock().unwrap() = items.iter().map(|i| i.id).collect();
        let mut map = self.items.lock().unwrap();
        map.clear();
        for item in items {
            map.insert(item.id, Ok(item));
        }
    }

    /// Lists `ids` without serving items for them.
    pub fn set_ids(&self, ids: Vec<u64>) {
        *self.ids.lock().unwrap() = ids;
    }

    pub fn fail_list(&self, err: SourceError) {
        *self.list_error.lock().unwrap() = Some(err);
    }

    pub fn heal_list(&self) {
        self.list_error.lock().unwrap().take();
    }

    pub fn fail_item(&self, id: u64, err: SourceError) {
        self.items.lock().unwrap().insert(id, Err(err));
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn item_calls(&self) -> usize {
        self.item_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn list_ids(&self) -> Result<Vec<u64>, SourceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.list_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.ids.lock().unwrap().clone())
    }

    async fn get_item(&self, id: u64) -> Result<Option<RankedItem>, SourceError> {
        self.item_calls.fetch_add(1, Ordering::SeqCst);
        match self.items.lock().unwrap().get(&id) {
            Some(Ok(item)) => Ok(Some(item.clone())),
            Some(Err(err)) => Err(err.clone()),
            None => Ok(None),
        }
    }
}

pub fn item(id: u64, score: i64, title: &str) -> RankedItem {
    RankedItem::new(id, score, title)
}

/// Defaults with retries disabled so failing tests stay fast.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retry.max_retries = 0;
    config
}

pub fn test_state(source: Arc<FakeSource>) -> AppState {
    build_state(&test_config(), source)
}
