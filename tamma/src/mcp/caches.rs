//! Capability and resource content caches.
//!
//! The capability cache is a TTL map of per-server tool/resource/prompt
//! lists. The resource cache bounds total bytes and evicts in insertion
//! order.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::connection::{PromptInfo, ResourceInfo, ToolInfo};

/// Snapshot of what one server exposes.
#[derive(Clone, Debug, Default)]
pub struct CapabilitySet {
    pub tools: Vec<ToolInfo>,
    pub resources: Vec<ResourceInfo>,
    pub prompts: Vec<PromptInfo>,
}

struct TimedEntry {
    value: CapabilitySet,
    stored_at: Instant,
}

/// TTL map of per-server capability sets.
pub struct CapabilityCache {
    ttl: Duration,
    entries: DashMap<String, TimedEntry>,
}

impl CapabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, server: &str) -> Option<CapabilitySet> {
        let entry = self.entries.get(server)?;
        if entry.stored_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(server);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(&self, server: &str, value: CapabilitySet) {
        self.entries.insert(
            server.to_string(),
            TimedEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, server: &str) {
        self.entries.remove(server);
    }
}

/// Byte-bounded content cache with insertion-order eviction.
///
/// Keys are resource URIs; values are raw resource bodies. When an insert
/// pushes the total past `max_bytes`, the oldest inserted entries go first.
pub struct ResourceCache {
    max_bytes: usize,
    inner: Mutex<ResourceCacheInner>,
}

#[derive(Default)]
struct ResourceCacheInner {
    order: VecDeque<String>,
    entries: HashMap<String, Vec<u8>>,
    total_bytes: usize,
}

impl ResourceCache {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            inner: Mutex::new(ResourceCacheInner::default()),
        }
    }

    pub fn get(&self, uri: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(uri).cloned()
    }

    pub fn put(&self, uri: &str, content: Vec<u8>) {
        // Oversized bodies are not cached at all.
        if content.len() > self.max_bytes {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = inner.entries.remove(uri) {
            inner.total_bytes -= old.len();
            inner.order.retain(|k| k != uri);
        }
        inner.total_bytes += content.len();
        inner.order.push_back(uri.to_string());
        inner.entries.insert(uri.to_string(), content);

        while inner.total_bytes > self.max_bytes {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.total_bytes -= evicted.len();
            }
        }
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
