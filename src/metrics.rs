//! Metrics sink (C8's "consumed interface") exposing exactly the three
//! series named in the specification's external-interfaces section.
//! Grounded in `eosin-storage-operator`'s `ControllerMetrics`, built on
//! the `prometheus` crate.

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

const LABELS: &[&str] = &["namespace", "name", "resource_kind"];

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dependency_cycles_detected: GaugeVec,
    pub workload_targets: GaugeVec,
    pub restarts_performed_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dependency_cycles_detected = GaugeVec::new(
            Opts::new(
                "cascader_dependency_cycles_detected",
                "Whether a dependency cycle was detected on the most recent reconcile (0 or 1)",
            ),
            LABELS,
        )
        .expect("valid metric definition");

        let workload_targets = GaugeVec::new(
            Opts::new(
                "cascader_workload_targets",
                "Number of outgoing targets extracted on the most recent reconcile",
            ),
            LABELS,
        )
        .expect("valid metric definition");

        let restarts_performed_total = IntCounterVec::new(
            Opts::new(
                "cascader_restarts_performed_total",
                "Count of successful target restarts triggered, labelled by the target",
            ),
            LABELS,
        )
        .expect("valid metric definition");

        registry
            .register(Box::new(dependency_cycles_detected.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(workload_targets.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(restarts_performed_total.clone()))
            .expect("metric registration");

        Metrics {
            registry,
            dependency_cycles_detected,
            workload_targets,
            restarts_performed_total,
        }
    }

    /// Renders the registry in the Prometheus text exposition format, for
    /// the `/metrics` endpoint.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("metrics encode into an in-memory buffer");
        String::from_utf8(buffer).expect("prometheus text encoding is valid UTF-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_series_by_name() {
        let metrics = Metrics::new();
        metrics
            .workload_targets
            .with_label_values(&["ns1", "a", "Deployment"])
            .set(2.0);
        let rendered = metrics.render();
        assert!(rendered.contains("cascader_workload_targets"));
    }
}
