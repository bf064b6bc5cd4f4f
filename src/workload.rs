//! Workload adapter (C2).
//!
//! A uniform capability surface over the three canonical rollout
//! controllers. Generalizes `kube-autorollout`'s `Rollout` trait (which
//! already abstracted `selector`/`desired_replicas`/`actual_replicas`/
//! `pod_spec` over the same three kinds) to also carry the stability
//! predicate and the pod-template annotation accessors the cascade engine
//! needs.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, PodTemplateSpec, StatefulSet};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;

use crate::filter::WorkloadKind;
use crate::reference;

/// Uniform view over a Deployment, StatefulSet, or DaemonSet.
///
/// `Stable` is a pure function of status fields only -- it never performs
/// I/O, per the specification.
pub trait Workload
where
    Self: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Send
        + Sync
        + DeserializeOwned
        + 'static,
{
    /// `Kind/namespace/name`, e.g. `"Deployment/ns1/a"`.
    fn kind_name() -> &'static str {
        std::any::type_name::<Self>().rsplit("::").next().unwrap()
    }

    fn workload_kind() -> WorkloadKind;

    fn name(&self) -> String {
        self.name_any()
    }

    fn namespace(&self) -> String {
        ResourceExt::namespace(self).unwrap_or_default()
    }

    fn id(&self) -> String {
        reference::id(Self::kind_name(), &self.namespace(), &self.name())
    }

    fn generation(&self) -> i64 {
        self.meta().generation.unwrap_or(0)
    }

    fn observed_generation(&self) -> i64;
    fn desired_replicas(&self) -> i32;
    fn ready_replicas(&self) -> i32;
    fn updated_replicas(&self) -> i32;

    /// `None` when the status type has no such counter (StatefulSet);
    /// `Some(n)` with the observed value otherwise.
    fn unavailable_replicas(&self) -> Option<i32> {
        None
    }

    /// `None` when the status type has no such counter (StatefulSet);
    /// `Some(n)` with the observed value otherwise.
    fn available_replicas(&self) -> Option<i32> {
        None
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec>;

    fn pod_template_annotations(&self) -> BTreeMap<String, String> {
        self.pod_template()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.annotations.clone())
            .unwrap_or_default()
    }

    /// Metadata annotations on the workload itself (where edge annotations
    /// and the requeue-after override live).
    fn metadata_annotations(&self) -> BTreeMap<String, String> {
        self.meta().annotations.clone().unwrap_or_default()
    }

    /// Same skeleton for all three kinds, varying by which status counters
    /// exist. See the specification's stability-predicate algorithm.
    fn stable(&self) -> (bool, String) {
        let generation = self.generation();
        let observed_generation = self.observed_generation();
        if observed_generation < generation {
            return (false, "rollout in progress".to_string());
        }

        let desired = self.desired_replicas();
        if desired == 0 {
            return (true, "scaled to zero replicas".to_string());
        }

        if let Some(unavailable) = self.unavailable_replicas()
            && unavailable > 0
        {
            return (
                false,
                format!("{unavailable} replicas reported unavailable"),
            );
        }

        let updated = self.updated_replicas();
        if updated != desired {
            return (
                false,
                format!("updated replicas ({updated}) != desired ({desired})"),
            );
        }

        let ready = self.ready_replicas();
        if ready != desired {
            return (
                false,
                format!("ready replicas ({ready}) != desired ({desired})"),
            );
        }

        if let Some(available) = self.available_replicas()
            && available != desired
        {
            return (
                false,
                format!("available replicas ({available}) != desired ({desired})"),
            );
        }

        (true, "stable".to_string())
    }
}

impl Workload for Deployment {
    fn observed_generation(&self) -> i64 {
        self.status
            .as_ref()
            .and_then(|s| s.observed_generation)
            .unwrap_or(0)
    }

    fn desired_replicas(&self) -> i32 {
        self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
    }

    fn ready_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
    }

    fn updated_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.updated_replicas)
            .unwrap_or(0)
    }

    fn unavailable_replicas(&self) -> Option<i32> {
        self.status.as_ref().and_then(|s| s.unavailable_replicas)
    }

    fn available_replicas(&self) -> Option<i32> {
        self.status.as_ref().and_then(|s| s.available_replicas)
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl Workload for StatefulSet {
    fn observed_generation(&self) -> i64 {
        self.status
            .as_ref()
            .and_then(|s| s.observed_generation)
            .unwrap_or(0)
    }

    fn desired_replicas(&self) -> i32 {
        self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
    }

    fn ready_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0)
    }

    fn updated_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.updated_replicas)
            .unwrap_or(0)
    }

    // StatefulSetStatus has no unavailable/available counters -- steps 3
    // and 6 of the stability predicate are skipped via the default `None`.

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl Workload for DaemonSet {
    fn observed_generation(&self) -> i64 {
        self.status
            .as_ref()
            .map(|s| s.observed_generation.unwrap_or(0))
            .unwrap_or(0)
    }

    // DaemonSet has no spec-level replica count; "desired" is
    // `desiredNumberScheduled` from status.
    fn desired_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .map(|s| s.desired_number_scheduled)
            .unwrap_or(0)
    }

    fn ready_replicas(&self) -> i32 {
        self.status.as_ref().map(|s| s.number_ready).unwrap_or(0)
    }

    fn updated_replicas(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.updated_number_scheduled)
            .unwrap_or(0)
    }

    fn unavailable_replicas(&self) -> Option<i32> {
        self.status.as_ref().and_then(|s| s.number_unavailable)
    }

    fn available_replicas(&self) -> Option<i32> {
        self.status.as_ref().and_then(|s| s.number_available)
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn deployment(
        generation: i64,
        observed_generation: i64,
        desired: i32,
        ready: i32,
        updated: i32,
        available: Option<i32>,
        unavailable: Option<i32>,
    ) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                generation: Some(generation),
                name: Some("a".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(desired),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                observed_generation: Some(observed_generation),
                ready_replicas: Some(ready),
                updated_replicas: Some(updated),
                available_replicas: available,
                unavailable_replicas: unavailable,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn rollout_in_progress_is_not_stable() {
        let d = deployment(2, 1, 3, 3, 3, Some(3), None);
        let (stable, reason) = d.stable();
        assert!(!stable);
        assert_eq!(reason, "rollout in progress");
    }

    #[test]
    fn scaled_to_zero_is_stable() {
        let d = deployment(1, 1, 0, 0, 0, None, None);
        assert_eq!(d.stable(), (true, "scaled to zero replicas".to_string()));
    }

    #[test]
    fn positive_unavailable_is_not_stable() {
        let d = deployment(1, 1, 3, 3, 3, Some(3), Some(1));
        let (stable, _) = d.stable();
        assert!(!stable);
    }

    #[test]
    fn mismatched_updated_is_not_stable() {
        let d = deployment(1, 1, 3, 3, 2, Some(3), None);
        assert!(!d.stable().0);
    }

    #[test]
    fn mismatched_ready_is_not_stable() {
        let d = deployment(1, 1, 3, 2, 3, Some(3), None);
        assert!(!d.stable().0);
    }

    #[test]
    fn mismatched_available_is_not_stable() {
        let d = deployment(1, 1, 3, 3, 3, Some(2), None);
        assert!(!d.stable().0);
    }

    #[test]
    fn fully_matching_counters_are_stable() {
        let d = deployment(1, 1, 3, 3, 3, Some(3), None);
        assert_eq!(d.stable(), (true, "stable".to_string()));
    }

    #[test]
    fn id_uses_kind_namespace_name() {
        let d = deployment(1, 1, 3, 3, 3, Some(3), None);
        assert_eq!(d.id(), "Deployment/ns1/a");
    }
}
