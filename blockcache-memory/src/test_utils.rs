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

//! Utilities for testing caches.

use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
};

use blockcache_common::metrics::{
    BoxedCounter, BoxedCounterVec, BoxedGauge, BoxedGaugeVec, Boxer, CounterOps, CounterVecOps, GaugeOps, GaugeVecOps,
    RegistryOps,
};
use parking_lot::{Mutex, MutexGuard};

use crate::record::EvictionCallback;

type Values<T> = Arc<Mutex<HashMap<String, Arc<T>>>>;

fn series(name: &str, labels: &[impl AsRef<str>]) -> String {
    let labels = labels.iter().map(|l| l.as_ref()).collect::<Vec<_>>().join(",");
    format!("{name}{{{labels}}}")
}

#[derive(Debug)]
struct RecordingCounter(Arc<AtomicU64>);

impl CounterOps for RecordingCounter {
    fn increase(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct RecordingGauge(Arc<AtomicI64>);

impl GaugeOps for RecordingGauge {
    fn increase(&self, val: u64) {
        self.0.fetch_add(val as i64, Ordering::Relaxed);
    }

    fn decrease(&self, val: u64) {
        self.0.fetch_sub(val as i64, Ordering::Relaxed);
    }

    fn absolute(&self, val: u64) {
        self.0.store(val as i64, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct RecordingCounterVec {
    name: Cow<'static, str>,
    values: Values<AtomicU64>,
}

impl CounterVecOps for RecordingCounterVec {
    fn counter(&self, labels: &[Cow<'static, str>]) -> BoxedCounter {
        let value = self
            .values
            .lock()
            .entry(series(&self.name, labels))
            .or_default()
            .clone();
        RecordingCounter(value).boxed()
    }
}

#[derive(Debug)]
struct RecordingGaugeVec {
    name: Cow<'static, str>,
    values: Values<AtomicI64>,
}

impl GaugeVecOps for RecordingGaugeVec {
    fn gauge(&self, labels: &[Cow<'static, str>]) -> BoxedGauge {
        let value = self
            .values
            .lock()
            .entry(series(&self.name, labels))
            .or_default()
            .clone();
        RecordingGauge(value).boxed()
    }
}

/// A metrics registry that keeps every value in memory so tests can read it back.
///
/// Metrics with the same name and labels share one value.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetricsRegistry {
    counters: Values<AtomicU64>,
    gauges: Values<AtomicI64>,
}

impl RecordingMetricsRegistry {
    /// Current value of a counter, 0 if it was never registered.
    pub fn counter(&self, name: &str, labels: &[&str]) -> u64 {
        self.counters
            .lock()
            .get(&series(name, labels))
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Current value of a gauge, 0 if it was never registered.
    pub fn gauge(&self, name: &str, labels: &[&str]) -> i64 {
        self.gauges
            .lock()
            .get(&series(name, labels))
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or_default()
    }
}

impl RegistryOps for RecordingMetricsRegistry {
    fn register_counter_vec(
        &self,
        name: Cow<'static, str>,
        _: Cow<'static, str>,
        _: &'static [&'static str],
    ) -> BoxedCounterVec {
        RecordingCounterVec {
            name,
            values: self.counters.clone(),
        }
        .boxed()
    }

    fn register_gauge_vec(
        &self,
        name: Cow<'static, str>,
        _: Cow<'static, str>,
        _: &'static [&'static str],
    ) -> BoxedGaugeVec {
        RecordingGaugeVec {
            name,
            values: self.gauges.clone(),
        }
        .boxed()
    }
}

/// An eviction callback that records the key and value of every reclaimed entry.
#[derive(Debug, Clone, Default)]
pub struct EvictionRecorder {
    evicted: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>>,
}

impl EvictionCallback for EvictionRecorder {
    fn on_evict(&self, key: &[u8], value: &[u8]) {
        self.evicted.lock().push((key.to_vec(), value.to_vec()));
    }
}

impl EvictionRecorder {
    /// Recorded `(key, value)` pairs in reclamation order.
    pub fn evicted(&self) -> MutexGuard<'_, Vec<(Vec<u8>, Vec<u8>)>> {
        self.evicted.lock()
    }

    /// Recorded keys in reclamation order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.evicted.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.evicted.lock().clear();
    }
}
