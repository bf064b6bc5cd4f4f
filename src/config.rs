//! Runtime configuration (the parts of the CLI contract C8 reads).
//!
//! Argument parsing itself is out of scope for the reconciliation core;
//! this module only owns the parsed, validated values, loaded from
//! environment variables the way `kube-autorollout`'s `main.rs` reads
//! `CRON_SCHEDULE`.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::extractor::EdgeAnnotation;
use crate::filter::WorkloadKind;

/// `restartedAt` is fixed, not configurable: interop with
/// `kubectl rollout restart` is the point of the system.
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

const MIN_REQUEUE_AFTER_DEFAULT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct Config {
    pub deployment_annotation: String,
    pub statefulset_annotation: String,
    pub daemonset_annotation: String,
    pub last_observed_restart_annotation: String,
    pub requeue_after_annotation: String,
    pub requeue_after_default: Duration,
    pub watch_namespace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            deployment_annotation: "cascader.tkb.ch/deployment".to_string(),
            statefulset_annotation: "cascader.tkb.ch/statefulset".to_string(),
            daemonset_annotation: "cascader.tkb.ch/daemonset".to_string(),
            last_observed_restart_annotation: "cascader.tkb.ch/last-observed-restart".to_string(),
            requeue_after_annotation: "cascader.tkb.ch/requeue-after".to_string(),
            requeue_after_default: Duration::from_secs(5),
            watch_namespace: None,
        }
    }
}

impl Config {
    /// Returns the three edge-annotation keys in the extractor's fixed,
    /// deterministic iteration order (Deployment, StatefulSet, DaemonSet).
    pub fn edge_annotations(&self) -> [&str; 3] {
        [
            &self.deployment_annotation,
            &self.statefulset_annotation,
            &self.daemonset_annotation,
        ]
    }

    /// The three edge-annotation keys paired with the kind each denotes,
    /// in the extractor's fixed iteration order.
    pub fn edges(&self) -> Vec<EdgeAnnotation<'_>> {
        vec![
            EdgeAnnotation {
                kind: WorkloadKind::Deployment,
                key: &self.deployment_annotation,
            },
            EdgeAnnotation {
                kind: WorkloadKind::StatefulSet,
                key: &self.statefulset_annotation,
            },
            EdgeAnnotation {
                kind: WorkloadKind::DaemonSet,
                key: &self.daemonset_annotation,
            },
        ]
    }

    /// Invariant 1: the five annotation keys must be pairwise distinct.
    pub fn validate(&self) -> Result<()> {
        let keys = [
            self.deployment_annotation.as_str(),
            self.statefulset_annotation.as_str(),
            self.daemonset_annotation.as_str(),
            self.last_observed_restart_annotation.as_str(),
            self.requeue_after_annotation.as_str(),
            RESTARTED_AT_ANNOTATION,
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                if a == b {
                    bail!("annotation keys must be pairwise distinct, found duplicate: {a}");
                }
            }
        }
        if self.requeue_after_default < MIN_REQUEUE_AFTER_DEFAULT {
            bail!(
                "requeue-after-default must be at least {:?}, got {:?}",
                MIN_REQUEUE_AFTER_DEFAULT,
                self.requeue_after_default
            );
        }
        Ok(())
    }
}

/// Loads configuration from environment variables, falling back to the
/// defaults in the CLI contract table, then validates it.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();

    if let Ok(v) = std::env::var("DEPLOYMENT_ANNOTATION") {
        config.deployment_annotation = v;
    }
    if let Ok(v) = std::env::var("STATEFULSET_ANNOTATION") {
        config.statefulset_annotation = v;
    }
    if let Ok(v) = std::env::var("DAEMONSET_ANNOTATION") {
        config.daemonset_annotation = v;
    }
    if let Ok(v) = std::env::var("LAST_OBSERVED_RESTART_ANNOTATION") {
        config.last_observed_restart_annotation = v;
    }
    if let Ok(v) = std::env::var("REQUEUE_AFTER_ANNOTATION") {
        config.requeue_after_annotation = v;
    }
    if let Ok(v) = std::env::var("REQUEUE_AFTER_DEFAULT") {
        config.requeue_after_default = parse_duration::parse(&v)
            .with_context(|| format!("invalid REQUEUE_AFTER_DEFAULT value: {v}"))?;
    }
    if let Ok(v) = std::env::var("WATCH_NAMESPACE") {
        config.watch_namespace = Some(v);
    }

    config.validate().context("invalid configuration")?;

    info!(
        deployment_annotation = %config.deployment_annotation,
        statefulset_annotation = %config.statefulset_annotation,
        daemonset_annotation = %config.daemonset_annotation,
        last_observed_restart_annotation = %config.last_observed_restart_annotation,
        requeue_after_annotation = %config.requeue_after_annotation,
        requeue_after_default = ?config.requeue_after_default,
        watch_namespace = ?config.watch_namespace,
        "loaded configuration",
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().expect("should validate");
    }

    #[test]
    fn duplicate_annotation_keys_are_rejected() {
        let mut config = Config::default();
        config.statefulset_annotation = config.deployment_annotation.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn restarted_at_clash_is_rejected() {
        let mut config = Config::default();
        config.requeue_after_annotation = RESTARTED_AT_ANNOTATION.to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn requeue_after_default_below_floor_is_rejected() {
        let mut config = Config::default();
        config.requeue_after_default = Duration::from_secs(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn edge_annotations_preserve_configured_order() {
        let config = Config::default();
        assert_eq!(
            config.edge_annotations(),
            [
                "cascader.tkb.ch/deployment",
                "cascader.tkb.ch/statefulset",
                "cascader.tkb.ch/daemonset",
            ]
        );
    }
}
