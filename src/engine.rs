//! Reconciliation engine (C8).
//!
//! The per-kind adapters (C9) Get the typed object and hand it here; this
//! module owns the eleven-step sequence that is otherwise identical for
//! Deployment, StatefulSet, and DaemonSet. Nothing in here touches a
//! specific kind's API beyond what the `Workload` trait exposes.

use std::time::Duration;

use kube::Client;
use kube::ResourceExt;
use kube::api::Api;
use kube::runtime::events::{Event as RecorderEvent, EventType, Recorder, Reporter};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::cycle::{self, DependencyFetcher};
use crate::error::Error;
use crate::extractor::{self, EdgeAnnotation, TargetRef};
use crate::filter::WorkloadKind;
use crate::marker;
use crate::metrics::Metrics;
use crate::target;
use crate::workload::Workload;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};

pub const CONTROLLER_NAME: &str = "cascader";

/// What `Reconcile` asks C9 to do next. Mirrors `kube::runtime::controller::
/// Action`'s public shape (a `RequeueAfter` or nothing) without depending on
/// its opaque internals, since C9 drives its own watch loop rather than
/// `kube::runtime::Controller` and needs to read the duration back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub requeue_after: Option<Duration>,
}

impl Outcome {
    pub fn done() -> Self {
        Outcome { requeue_after: None }
    }

    pub fn requeue(after: Duration) -> Self {
        Outcome {
            requeue_after: Some(after),
        }
    }
}

/// Shared state handed to every per-kind adapter. Cheap to clone --
/// `Client`, `Metrics`, and `Reporter` are themselves cheaply cloneable.
#[derive(Clone)]
pub struct Engine {
    pub client: Client,
    pub config: Config,
    pub metrics: Metrics,
    pub reporter: Reporter,
}

impl Engine {
    pub fn new(client: Client, config: Config, metrics: Metrics) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: None,
        };
        Engine {
            client,
            config,
            metrics,
            reporter,
        }
    }

    /// Runs the eleven-step pipeline for one already-fetched source
    /// object. Returns the scheduler `Action` C9 should hand back from
    /// its own `Reconcile`.
    pub async fn reconcile<W: Workload>(&self, workload: W) -> Result<Outcome, Error> {
        let kind = W::kind_name();
        let namespace = workload.namespace();
        let name = workload.name();
        let api: Api<W> = Api::namespaced(self.client.clone(), &namespace);
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            workload.object_ref(&()),
        );

        // Step 3: observe restart (C7).
        let new_restart = marker::observe(
            &api,
            &workload,
            crate::config::RESTARTED_AT_ANNOTATION,
            &self.config.last_observed_restart_annotation,
        )
        .await?;
        if let Some(restart) = &new_restart {
            tracing::info!(
                namespace = %namespace, name = %name, kind = %kind,
                restarted_at = %restart.timestamp,
                "observed new restart",
            );
        }

        // Step 4: extract targets (C5).
        let edges = self.config.edges();
        let targets = extractor::extract_targets(&namespace, &workload.metadata_annotations(), &edges)?;

        // Step 5: metrics.
        self.metrics
            .workload_targets
            .with_label_values(&[&namespace, &name, kind])
            .set(targets.len() as f64);

        // Step 6: fast exit.
        if targets.is_empty() {
            tracing::info!(namespace = %namespace, name = %name, kind = %kind, "no targets");
            return Ok(Outcome::done());
        }

        // Step 7: requeue interval.
        let requeue_after = self.resolve_requeue_after(&workload, &namespace, &name, kind);

        // Not a new restart: the cascade for this `restartedAt` either
        // already fired or was already found not-yet-due on a prior
        // reconcile. Re-running the cycle check and re-triggering targets
        // here would fire the same cascade again (the step-3 marker patch
        // itself changes the pod-template hash, re-admitting this source
        // as a spurious "spec changed" event). Re-emit metrics and, if the
        // source is still settling, keep requeueing; otherwise no-op.
        if new_restart.is_none() {
            let (stable, reason) = workload.stable();
            if !stable {
                tracing::info!(
                    namespace = %namespace, name = %name, kind = %kind,
                    reason = %reason, requeue_after = ?requeue_after,
                    "not a new restart and not stable; requeueing",
                );
                return Ok(Outcome::requeue(requeue_after));
            }
            return Ok(Outcome::done());
        }

        // Step 8: cycle check (C6).
        let src_id = workload.id();
        let fetcher = ClusterFetcher {
            client: self.client.clone(),
            config: self.config.clone(),
        };
        match cycle::detect_cycle(&src_id, &targets, &fetcher).await? {
            Some(report) => {
                self.metrics
                    .dependency_cycles_detected
                    .with_label_values(&[&namespace, &name, kind])
                    .set(1.0);
                tracing::error!(
                    namespace = %namespace, name = %name, kind = %kind,
                    path = %report.path, cycle_kind = ?report.kind,
                    "dependency cycle detected",
                );
                recorder
                    .publish(&RecorderEvent {
                        type_: EventType::Warning,
                        reason: "CycleDetected".to_string(),
                        note: Some(report.path.clone()),
                        action: "CycleCheck".to_string(),
                        secondary: None,
                    })
                    .await
                    .map_err(Error::EventPublish)?;
                return Ok(Outcome::done());
            }
            None => {
                self.metrics
                    .dependency_cycles_detected
                    .with_label_values(&[&namespace, &name, kind])
                    .set(0.0);
            }
        }

        // Step 9: stability gate (C2).
        let (stable, reason) = workload.stable();
        if !stable {
            tracing::info!(
                namespace = %namespace, name = %name, kind = %kind,
                reason = %reason, requeue_after = ?requeue_after,
                "not stable; requeueing",
            );
            return Ok(Outcome::requeue(requeue_after));
        }

        // Step 10: trigger targets (C3), left-to-right in extractor order.
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        for t in &targets {
            let result = self.trigger_one(t).await;
            match result {
                Ok(()) => {
                    succeeded += 1;
                    self.metrics
                        .restarts_performed_total
                        .with_label_values(&[&t.namespace, &t.name, extractor::kind_name(t.kind)])
                        .inc();
                    recorder
                        .publish(&RecorderEvent {
                            type_: EventType::Normal,
                            reason: "ReloadSucceeded".to_string(),
                            note: Some(format!("triggered rolling restart of {}", t.id())),
                            action: "Trigger".to_string(),
                            secondary: None,
                        })
                        .await
                        .map_err(Error::EventPublish)?;
                }
                Err(e) => {
                    failed += 1;
                    recorder
                        .publish(&RecorderEvent {
                            type_: EventType::Warning,
                            reason: "ReloadFailed".to_string(),
                            note: Some(format!("{}: {e}", t.id())),
                            action: "Trigger".to_string(),
                            secondary: None,
                        })
                        .await
                        .map_err(Error::EventPublish)?;
                }
            }
        }

        // Step 11: finish. Partial failure is never returned as an error.
        tracing::info!(
            namespace = %namespace, name = %name, kind = %kind,
            succeeded, failed, "finished handling targets",
        );
        Ok(Outcome::done())
    }

    async fn trigger_one(&self, target: &TargetRef) -> Result<(), Error> {
        match target.kind {
            WorkloadKind::Deployment => {
                target::trigger::<Deployment>(
                    self.client.clone(),
                    &target.namespace,
                    &target.name,
                    crate::config::RESTARTED_AT_ANNOTATION,
                )
                .await
            }
            WorkloadKind::StatefulSet => {
                target::trigger::<StatefulSet>(
                    self.client.clone(),
                    &target.namespace,
                    &target.name,
                    crate::config::RESTARTED_AT_ANNOTATION,
                )
                .await
            }
            WorkloadKind::DaemonSet => {
                target::trigger::<DaemonSet>(
                    self.client.clone(),
                    &target.namespace,
                    &target.name,
                    crate::config::RESTARTED_AT_ANNOTATION,
                )
                .await
            }
        }
    }

    fn resolve_requeue_after<W: Workload>(
        &self,
        workload: &W,
        namespace: &str,
        name: &str,
        kind: &str,
    ) -> Duration {
        resolve_requeue_after(
            &workload.metadata_annotations(),
            &self.config.requeue_after_annotation,
            self.config.requeue_after_default,
            namespace,
            name,
            kind,
        )
    }
}

/// Step 7 of the reconcile pipeline: a pure function of the source's
/// metadata annotations, pulled out of `Engine` so it is testable without
/// a cluster client.
fn resolve_requeue_after(
    annotations: &std::collections::BTreeMap<String, String>,
    requeue_after_annotation: &str,
    requeue_after_default: Duration,
    namespace: &str,
    name: &str,
    kind: &str,
) -> Duration {
    match annotations.get(requeue_after_annotation) {
        Some(raw) => match parse_duration::parse(raw) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(
                    namespace = %namespace, name = %name, kind = %kind,
                    value = %raw, error = %e,
                    "failed to parse requeue-after override; using configured default",
                );
                requeue_after_default
            }
        },
        None => requeue_after_default,
    }
}

/// Resolves a target's own outgoing edges from live cluster state, for
/// the cycle detector. One `Get` per visited target; never memoized
/// across `Reconcile` calls.
struct ClusterFetcher {
    client: Client,
    config: Config,
}

impl DependencyFetcher for ClusterFetcher {
    async fn fetch_targets(&self, target: &TargetRef) -> Result<Vec<TargetRef>, Error> {
        let edges = self.config.edges();
        match target.kind {
            WorkloadKind::Deployment => fetch_and_extract::<Deployment>(&self.client, target, &edges).await,
            WorkloadKind::StatefulSet => {
                fetch_and_extract::<StatefulSet>(&self.client, target, &edges).await
            }
            WorkloadKind::DaemonSet => fetch_and_extract::<DaemonSet>(&self.client, target, &edges).await,
        }
    }
}

async fn fetch_and_extract<W>(
    client: &Client,
    target: &TargetRef,
    edges: &[EdgeAnnotation<'_>],
) -> Result<Vec<TargetRef>, Error>
where
    W: Workload + DeserializeOwned,
{
    let api: Api<W> = Api::namespaced(client.clone(), &target.namespace);
    let workload = api.get(&target.name).await?;
    extractor::extract_targets(&target.namespace, &workload.metadata_annotations(), edges)
}
