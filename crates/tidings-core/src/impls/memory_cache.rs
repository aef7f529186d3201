//! InMemoryCache - key ごとに世代番号を持つキャッシュ
//!
//! 読み手は `generation` を見てから store を読み、`put_if_fresh` で書き戻す。
//! その間に invalidate が走っていれば世代が進んでいるので、古い値での
//! 再投入は拒否される（invalidate と再投入の競合対策）。
//!
//! key の世代 = その key 自身の世代 + key にマッチする prefix の世代の合計。
//! prefix invalidate はまだ誰も入れていない key にも効く。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ports::{Cache, CacheError, KeyPattern};

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, serde_json::Value>,
    generations: HashMap<String, u64>,
    prefix_generations: HashMap<String, u64>,
    invalidated: Vec<KeyPattern>,
    unavailable: bool,
}

impl CacheState {
    fn generation(&self, key: &str) -> u64 {
        let own = self.generations.get(key).copied().unwrap_or_default();
        let prefixes: u64 = self
            .prefix_generations
            .iter()
            .filter(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map(|(_, generation)| *generation)
            .sum();
        own + prefixes
    }
}

#[derive(Default)]
pub struct InMemoryCache {
    state: Mutex<CacheState>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.state.lock().await.entries.get(key).cloned()
    }

    pub async fn generation(&self, key: &str) -> u64 {
        self.state.lock().await.generation(key)
    }

    /// Store `value` unless `key` was invalidated after `observed` was read.
    pub async fn put_if_fresh(&self, key: &str, value: serde_json::Value, observed: u64) -> bool {
        let mut state = self.state.lock().await;
        let current = state.generation(key);
        if current != observed {
            debug!(key, observed, current, "stale cache fill refused");
            return false;
        }
        state.entries.insert(key.to_string(), value);
        true
    }

    /// Patterns invalidated so far, in order.
    pub async fn invalidated(&self) -> Vec<KeyPattern> {
        self.state.lock().await.invalidated.clone()
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(CacheError::Unavailable("cache offline".to_string()));
        }

        let matching: Vec<String> = state
            .entries
            .keys()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        for key in &matching {
            state.entries.remove(key);
        }
        let bumped = match pattern {
            KeyPattern::Exact(key) => state.generations.entry(key.clone()).or_default(),
            KeyPattern::Prefix(prefix) => state.prefix_generations.entry(prefix.clone()).or_default(),
        };
        *bumped += 1;

        state.invalidated.push(pattern.clone());
        Ok(matching.len())
    }
}
