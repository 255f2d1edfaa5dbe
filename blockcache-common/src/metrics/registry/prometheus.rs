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

use std::{borrow::Cow, collections::HashMap, sync::Arc};

use itertools::Itertools;
use parking_lot::Mutex;
use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

use crate::metrics::{
    registry::noop::NoopMetricsRegistry, BoxedCounter, BoxedCounterVec, BoxedGauge, BoxedGaugeVec, Boxer,
    CounterOps, CounterVecOps, GaugeOps, GaugeVecOps, RegistryOps,
};

#[derive(Debug, Clone)]
enum MetricVec {
    Counter(IntCounterVec),
    Gauge(IntGaugeVec),
}

impl CounterOps for IntCounter {
    fn increase(&self, val: u64) {
        self.inc_by(val);
    }
}

impl CounterVecOps for IntCounterVec {
    fn counter(&self, labels: &[Cow<'static, str>]) -> BoxedCounter {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

impl GaugeOps for IntGauge {
    fn increase(&self, val: u64) {
        self.add(val as _);
    }

    fn decrease(&self, val: u64) {
        self.sub(val as _);
    }

    fn absolute(&self, val: u64) {
        self.set(val as _);
    }
}

impl GaugeVecOps for IntGaugeVec {
    fn gauge(&self, labels: &[Cow<'static, str>]) -> BoxedGauge {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

/// Prometheus metric registry with lib `prometheus`.
///
/// Clones share the registered metric vectors, so several caches can report into the same registry with different
/// `name` labels without registering a metric twice.
#[derive(Debug, Clone)]
pub struct PrometheusMetricsRegistry {
    registry: Arc<Registry>,
    vecs: Arc<Mutex<HashMap<Cow<'static, str>, MetricVec>>>,
}

impl PrometheusMetricsRegistry {
    /// Create an Prometheus metrics registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            vecs: Arc::default(),
        }
    }

    /// The underlying registry, e.g. for gathering.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl RegistryOps for PrometheusMetricsRegistry {
    fn register_counter_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedCounterVec {
        let mut vecs = self.vecs.lock();
        if let Some(MetricVec::Counter(vec)) = vecs.get(&name) {
            return vec.clone().boxed();
        }
        let res = IntCounterVec::new(Opts::new(name.as_ref(), desc.as_ref()), label_names).and_then(|vec| {
            self.registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        });
        match res {
            Ok(vec) => {
                vecs.insert(name, MetricVec::Counter(vec.clone()));
                vec.boxed()
            }
            Err(e) => {
                tracing::warn!("[prometheus]: register counter vec {name} failed, metrics are dropped: {e}");
                NoopMetricsRegistry.boxed()
            }
        }
    }

    fn register_gauge_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedGaugeVec {
        let mut vecs = self.vecs.lock();
        if let Some(MetricVec::Gauge(vec)) = vecs.get(&name) {
            return vec.clone().boxed();
        }
        let res = IntGaugeVec::new(Opts::new(name.as_ref(), desc.as_ref()), label_names).and_then(|vec| {
            self.registry.register(Box::new(vec.clone()))?;
            Ok(vec)
        });
        match res {
            Ok(vec) => {
                vecs.insert(name, MetricVec::Gauge(vec.clone()));
                vec.boxed()
            }
            Err(e) => {
                tracing::warn!("[prometheus]: register gauge vec {name} failed, metrics are dropped: {e}");
                NoopMetricsRegistry.boxed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use prometheus::TextEncoder;

    use super::*;

    fn case(registry: &PrometheusMetricsRegistry) {
        let cv = registry.register_counter_vec("test_counter_1".into(), "test counter 1".into(), &["label1", "label2"]);
        let c = cv.counter(&["l1".into(), "l2".into()]);
        c.increase(42);

        let gv = registry.register_gauge_vec("test_gauge_1".into(), "test gauge 1".into(), &["label1", "label2"]);
        let g = gv.gauge(&["l1".into(), "l2".into()]);
        g.increase(514);
        g.decrease(114);
    }

    fn encode(registry: &PrometheusMetricsRegistry) -> String {
        TextEncoder::new().encode_to_string(&registry.registry().gather()).unwrap()
    }

    #[test]
    fn test_prometheus_metrics_registry() {
        let p8s = PrometheusMetricsRegistry::new(Registry::new());
        case(&p8s);
        let text = encode(&p8s);
        assert!(text.contains(r#"test_counter_1{label1="l1",label2="l2"} 42"#), "{text}");
        assert!(text.contains(r#"test_gauge_1{label1="l1",label2="l2"} 400"#), "{text}");
    }

    #[test]
    fn test_shared_prometheus_metrics_registry() {
        let p8s1 = PrometheusMetricsRegistry::new(Registry::new());
        let p8s2 = p8s1.clone();
        case(&p8s1);
        case(&p8s2);
        let text = encode(&p8s1);
        assert!(text.contains(r#"test_counter_1{label1="l1",label2="l2"} 84"#), "{text}");
    }
}
