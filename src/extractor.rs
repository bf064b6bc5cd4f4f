//! Dependency extractor (C5).
//!
//! Reads the source's metadata annotations and produces its outgoing
//! target list, in deterministic order: configured-key order, then
//! left-to-right within a key's comma-separated value.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::filter::WorkloadKind;
use crate::reference;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl TargetRef {
    pub fn id(&self) -> String {
        reference::id(kind_name(self.kind), &self.namespace, &self.name)
    }
}

pub fn kind_name(kind: WorkloadKind) -> &'static str {
    match kind {
        WorkloadKind::Deployment => "Deployment",
        WorkloadKind::StatefulSet => "StatefulSet",
        WorkloadKind::DaemonSet => "DaemonSet",
    }
}

/// One extractor entry: the kind an edge-annotation key denotes, and the
/// key itself, listed in the fixed iteration order the extractor walks.
pub struct EdgeAnnotation<'a> {
    pub kind: WorkloadKind,
    pub key: &'a str,
}

/// Extracts the flat, ordered target list from a source's metadata
/// annotations. An unparseable reference aborts extraction entirely with
/// no partial list, per invariant: a source's malformed annotations
/// surface as a single error.
pub fn extract_targets(
    source_namespace: &str,
    source_annotations: &BTreeMap<String, String>,
    edges: &[EdgeAnnotation<'_>],
) -> Result<Vec<TargetRef>, Error> {
    let mut targets = Vec::new();
    for edge in edges {
        let Some(value) = source_annotations.get(edge.key) else {
            continue;
        };
        for segment in value.split(',') {
            let trimmed = segment.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (namespace, name) = reference::parse_ref(trimmed, source_namespace)?;
            targets.push(TargetRef {
                kind: edge.kind,
                namespace,
                name,
            });
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edges() -> Vec<EdgeAnnotation<'static>> {
        vec![
            EdgeAnnotation {
                kind: WorkloadKind::Deployment,
                key: "cascader.tkb.ch/deployment",
            },
            EdgeAnnotation {
                kind: WorkloadKind::StatefulSet,
                key: "cascader.tkb.ch/statefulset",
            },
            EdgeAnnotation {
                kind: WorkloadKind::DaemonSet,
                key: "cascader.tkb.ch/daemonset",
            },
        ]
    }

    #[test]
    fn no_edge_annotations_yields_no_targets() {
        let annotations = BTreeMap::new();
        let targets = extract_targets("ns1", &annotations, &edges()).unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn single_edge_resolves_against_source_namespace() {
        let mut annotations = BTreeMap::new();
        annotations.insert("cascader.tkb.ch/deployment".to_string(), "b".to_string());
        let targets = extract_targets("ns1", &annotations, &edges()).unwrap();
        assert_eq!(
            targets,
            vec![TargetRef {
                kind: WorkloadKind::Deployment,
                namespace: "ns1".to_string(),
                name: "b".to_string(),
            }]
        );
    }

    #[test]
    fn comma_separated_values_are_trimmed_and_ordered_left_to_right() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            "cascader.tkb.ch/deployment".to_string(),
            " b , ns2/c ,d".to_string(),
        );
        let targets = extract_targets("ns1", &annotations, &edges()).unwrap();
        assert_eq!(
            targets,
            vec![
                TargetRef {
                    kind: WorkloadKind::Deployment,
                    namespace: "ns1".to_string(),
                    name: "b".to_string()
                },
                TargetRef {
                    kind: WorkloadKind::Deployment,
                    namespace: "ns2".to_string(),
                    name: "c".to_string()
                },
                TargetRef {
                    kind: WorkloadKind::Deployment,
                    namespace: "ns1".to_string(),
                    name: "d".to_string()
                },
            ]
        );
    }

    #[test]
    fn empty_segments_are_dropped_without_error() {
        let mut annotations = BTreeMap::new();
        annotations.insert("cascader.tkb.ch/deployment".to_string(), ",,".to_string());
        let targets = extract_targets("ns1", &annotations, &edges()).unwrap();
        assert!(targets.is_empty());
    }

    #[test]
    fn keys_are_walked_in_configured_order() {
        let mut annotations = BTreeMap::new();
        annotations.insert("cascader.tkb.ch/daemonset".to_string(), "ds1".to_string());
        annotations.insert("cascader.tkb.ch/deployment".to_string(), "d1".to_string());
        let targets = extract_targets("ns1", &annotations, &edges()).unwrap();
        assert_eq!(targets[0].kind, WorkloadKind::Deployment);
        assert_eq!(targets[1].kind, WorkloadKind::DaemonSet);
    }

    #[test]
    fn unparseable_reference_aborts_with_no_partial_list() {
        let mut annotations = BTreeMap::new();
        annotations.insert("cascader.tkb.ch/deployment".to_string(), "a/b/c".to_string());
        let result = extract_targets("ns1", &annotations, &edges());
        assert!(result.is_err());
    }

    #[test]
    fn single_slash_with_empty_fragment_is_preserved_not_rejected() {
        let mut annotations = BTreeMap::new();
        annotations.insert("cascader.tkb.ch/deployment".to_string(), "/b".to_string());
        let targets = extract_targets("ns1", &annotations, &edges()).unwrap();
        assert_eq!(targets[0].namespace, "");
        assert_eq!(targets[0].name, "b");
    }
}
