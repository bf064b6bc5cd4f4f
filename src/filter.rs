//! Event filter (C4).
//!
//! Decides whether an observed change is a restart-worthy source event.
//! Purely functional over the specs/statuses of the old and new objects
//! -- it never performs a cluster call itself. C9 is the only caller that
//! has cluster access; it feeds this module snapshots taken from the
//! watch stream.

use serde_json::Value;

use crate::workload::Workload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

/// FNV-1a-64, matching the spec's hash choice for the pod-template spec
/// hash used by `SpecChanged`.
pub fn fnv1a64(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub fn fnv1a64_hex(data: &[u8]) -> String {
    format!("{:016x}", fnv1a64(data))
}

/// The subset of a workload's spec/status the filter needs to reach an
/// admission decision. Extracted once per watch event so the decision
/// function itself stays a pure function of two value types, independent
/// of `kube`/`k8s-openapi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub has_edge_annotation: bool,
    pub pod_template_hash: u64,
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub updated_replicas: i32,
    pub unavailable_replicas: i32,
}

impl Snapshot {
    pub fn from_workload<W: Workload>(workload: &W, edge_annotation_keys: &[&str]) -> Self {
        let annotations = workload.metadata_annotations();
        let has_edge_annotation = edge_annotation_keys
            .iter()
            .any(|key| annotations.contains_key(*key));
        let template_json: Value =
            serde_json::to_value(workload.pod_template()).unwrap_or(Value::Null);
        let template_bytes = serde_json::to_vec(&template_json).unwrap_or_default();

        Snapshot {
            has_edge_annotation,
            pod_template_hash: fnv1a64(&template_bytes),
            desired_replicas: workload.desired_replicas(),
            ready_replicas: workload.ready_replicas(),
            updated_replicas: workload.updated_replicas(),
            unavailable_replicas: workload.unavailable_replicas().unwrap_or(0),
        }
    }
}

/// `Create` events are never admitted -- this avoids restart storms when
/// Cascader first reconciles an existing fleet.
pub fn admit_create(_new: &Snapshot) -> bool {
    false
}

/// `Generic` events are never admitted.
pub fn admit_generic(_new: &Snapshot) -> bool {
    false
}

/// `Delete` is admitted unconditionally when the annotation predicate
/// holds, so a deleted source no longer pins its downstreams.
pub fn admit_delete(deleted: &Snapshot) -> bool {
    deleted.has_edge_annotation
}

/// `Update` is admitted iff the (current) object carries an edge
/// annotation and any of the update triggers hold.
pub fn admit_update(kind: WorkloadKind, old: &Snapshot, new: &Snapshot) -> bool {
    if !new.has_edge_annotation {
        return false;
    }
    spec_changed(old, new)
        || scaled_to_zero(old, new)
        || scaled_from_zero(old, new)
        || single_replica_pod_deleted(kind, old, new)
        || daemonset_transitioning(kind, new)
}

fn spec_changed(old: &Snapshot, new: &Snapshot) -> bool {
    old.pod_template_hash != new.pod_template_hash
}

fn scaled_to_zero(old: &Snapshot, new: &Snapshot) -> bool {
    old.desired_replicas > 0 && new.desired_replicas == 0
}

fn scaled_from_zero(old: &Snapshot, new: &Snapshot) -> bool {
    old.desired_replicas == 0 && new.desired_replicas > 0
}

fn single_replica_pod_deleted(kind: WorkloadKind, old: &Snapshot, new: &Snapshot) -> bool {
    if kind == WorkloadKind::DaemonSet {
        return false;
    }
    old.desired_replicas == 1
        && new.desired_replicas == 1
        && old.ready_replicas == 1
        && new.ready_replicas == 0
}

fn daemonset_transitioning(kind: WorkloadKind, new: &Snapshot) -> bool {
    if kind != WorkloadKind::DaemonSet {
        return false;
    }
    new.updated_replicas != new.desired_replicas || new.unavailable_replicas > 0
}
