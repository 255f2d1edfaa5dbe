// Copyright 2026 blockcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

/// A node in a tree of memory consumption counters.
///
/// Consumption reported to a tracker is propagated to all of its ancestors. Each tracker also records the peak
/// consumption it has ever observed.
///
/// The tracker only counts; it never refuses consumption.
pub struct MemTracker {
    id: String,
    parent: Option<Arc<MemTracker>>,
    consumption: AtomicI64,
    peak: AtomicI64,
}

impl Debug for MemTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTracker")
            .field("id", &self.id)
            .field("parent", &self.parent.as_ref().map(|p| p.id()))
            .field("consumption", &self.consumption())
            .field("peak", &self.peak_consumption())
            .finish()
    }
}

impl MemTracker {
    /// Create a tracker without parent.
    pub fn new_root(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            parent: None,
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    /// Create a tracker that rolls its consumption up into `parent`.
    pub fn new_child(id: impl Into<String>, parent: &Arc<MemTracker>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            parent: Some(parent.clone()),
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
        })
    }

    /// Identifier of the tracker.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parent of the tracker.
    pub fn parent(&self) -> Option<&Arc<MemTracker>> {
        self.parent.as_ref()
    }

    /// Add `bytes` to the consumption of this tracker and all its ancestors.
    ///
    /// `bytes` may be negative. Consumption saturates at the bounds of `i64`.
    pub fn consume(&self, bytes: i64) {
        if bytes == 0 {
            return;
        }
        let mut tracker = Some(self);
        while let Some(t) = tracker {
            let current = match t.consumption.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(bytes))
            }) {
                Ok(prev) | Err(prev) => prev.saturating_add(bytes),
            };
            if bytes > 0 {
                t.peak.fetch_max(current, Ordering::AcqRel);
            }
            tracker = t.parent.as_deref();
        }
    }

    /// Subtract `bytes` from the consumption of this tracker and all its ancestors.
    pub fn release(&self, bytes: i64) {
        self.consume(-bytes)
    }

    /// Current consumption.
    pub fn consumption(&self) -> i64 {
        self.consumption.load(Ordering::Acquire)
    }

    /// Highest consumption ever observed.
    pub fn peak_consumption(&self) -> i64 {
        self.peak.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumption_and_peak() {
        let tracker = MemTracker::new_root("root");
        tracker.consume(10);
        tracker.consume(5);
        tracker.release(12);
        assert_eq!(tracker.consumption(), 3);
        assert_eq!(tracker.peak_consumption(), 15);
        tracker.consume(0);
        assert_eq!(tracker.consumption(), 3);
    }

    #[test]
    fn test_consumption_saturates() {
        let root = MemTracker::new_root("root");
        let child = MemTracker::new_child("child", &root);
        child.consume(i64::MAX);
        child.consume(i64::MAX);
        assert_eq!(child.consumption(), i64::MAX);
        assert_eq!(root.peak_consumption(), i64::MAX);
        child.release(i64::MAX);
        assert_eq!(root.consumption(), 0);
    }

    #[test]
    fn test_roll_up_to_ancestors() {
        let root = MemTracker::new_root("root");
        let server = MemTracker::new_child("server", &root);
        let a = MemTracker::new_child("a", &server);
        let b = MemTracker::new_child("b", &server);

        a.consume(100);
        b.consume(50);
        a.release(100);

        assert_eq!(a.consumption(), 0);
        assert_eq!(a.peak_consumption(), 100);
        assert_eq!(b.consumption(), 50);
        assert_eq!(server.consumption(), 50);
        assert_eq!(server.peak_consumption(), 150);
        assert_eq!(root.consumption(), 50);
        assert_eq!(a.parent().unwrap().id(), "server");
    }

    #[test]
    fn test_concurrent_consume() {
        let root = MemTracker::new_root("root");
        let handles = (0..8)
            .map(|_| {
                let t = MemTracker::new_child("child", &root);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        t.consume(3);
                        t.release(1);
                    }
                })
            })
            .collect::<Vec<_>>();
        handles.into_iter().for_each(|h| h.join().unwrap());
        assert_eq!(root.consumption(), 8 * 1000 * 2);
    }
}
