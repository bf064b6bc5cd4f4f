//! Cycle detector (C6).
//!
//! Depth-first traversal over the implicit, never-materialized edge
//! graph. Paid for with a cluster `Get` per visited node via the
//! `DependencyFetcher` the caller supplies; not memoized across
//! `Reconcile` invocations, since cluster state may have changed between
//! calls.

use futures::future::BoxFuture;

use crate::error::Error;
use crate::extractor::TargetRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Direct,
    Indirect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub kind: CycleKind,
    /// Serialized as `a -> b -> ... -> a`.
    pub path: String,
}

/// Fetches a target's own outgoing dependencies from live cluster state.
/// `fetch_targets` should surface `NotFound` as an error -- a missing
/// downstream node is fatal to this particular cycle check, per the
/// specification.
#[allow(async_fn_in_trait)]
pub trait DependencyFetcher {
    async fn fetch_targets(&self, target: &TargetRef) -> Result<Vec<TargetRef>, Error>;
}

/// Detects any cycle reachable from `src_id` through `targets`, recursing
/// into the cluster for each target's own dependencies. Depth is bounded
/// only by the currently extractable, finite subgraph -- no artificial
/// cap is imposed.
pub async fn detect_cycle<F>(
    src_id: &str,
    targets: &[TargetRef],
    fetcher: &F,
) -> Result<Option<CycleReport>, Error>
where
    F: DependencyFetcher,
{
    if targets.iter().any(|t| t.id() == src_id) {
        return Ok(Some(CycleReport {
            kind: CycleKind::Direct,
            path: src_id.to_string(),
        }));
    }

    let mut path = vec![src_id.to_string()];
    for target in targets {
        if let Some(report) = visit(src_id, target, &mut path, fetcher).await? {
            return Ok(Some(report));
        }
    }
    Ok(None)
}

fn visit<'a, F>(
    src_id: &'a str,
    target: &'a TargetRef,
    path: &'a mut Vec<String>,
    fetcher: &'a F,
) -> BoxFuture<'a, Result<Option<CycleReport>, Error>>
where
    F: DependencyFetcher,
{
    Box::pin(async move {
        let target_id = target.id();

        if path.contains(&target_id) {
            let mut closed = path.clone();
            closed.push(target_id);
            return Ok(Some(CycleReport {
                kind: CycleKind::Indirect,
                path: closed.join(" -> "),
            }));
        }

        path.push(target_id.clone());

        let dependencies = fetcher
            .fetch_targets(target)
            .await
            .map_err(|e| Error::CycleCheckFailed(e.to_string()))?;

        if dependencies.iter().any(|dep| dep.id() == src_id) {
            let mut closed = path.clone();
            closed.push(src_id.to_string());
            path.pop();
            return Ok(Some(CycleReport {
                kind: CycleKind::Indirect,
                path: closed.join(" -> "),
            }));
        }

        for dependency in &dependencies {
            if let Some(report) = visit(src_id, dependency, path, fetcher).await? {
                path.pop();
                return Ok(Some(report));
            }
        }

        path.pop();
        Ok(None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::WorkloadKind;
    use std::collections::HashMap;

    struct GraphFetcher {
        edges: HashMap<String, Vec<TargetRef>>,
    }

    impl DependencyFetcher for GraphFetcher {
        async fn fetch_targets(&self, target: &TargetRef) -> Result<Vec<TargetRef>, Error> {
            Ok(self.edges.get(&target.id()).cloned().unwrap_or_default())
        }
    }

    fn target(kind: WorkloadKind, ns: &str, name: &str) -> TargetRef {
        TargetRef {
            kind,
            namespace: ns.to_string(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn direct_cycle_reports_source_as_path() {
        let fetcher = GraphFetcher {
            edges: HashMap::new(),
        };
        let targets = vec![target(WorkloadKind::Deployment, "ns1", "a")];
        let report = detect_cycle("Deployment/ns1/a", &targets, &fetcher)
            .await
            .unwrap()
            .expect("should detect a direct cycle");
        assert_eq!(report.kind, CycleKind::Direct);
        assert_eq!(report.path, "Deployment/ns1/a");
    }

    #[tokio::test]
    async fn indirect_cycle_reports_full_path() {
        // A(Deployment) -> B(StatefulSet) -> C(Deployment) -> A
        let b = target(WorkloadKind::StatefulSet, "ns1", "b");
        let c = target(WorkloadKind::Deployment, "ns1", "c");
        let a = target(WorkloadKind::Deployment, "ns1", "a");

        let mut edges = HashMap::new();
        edges.insert(b.id(), vec![c.clone()]);
        edges.insert(c.id(), vec![a.clone()]);
        let fetcher = GraphFetcher { edges };

        let targets = vec![b];
        let report = detect_cycle("Deployment/ns1/a", &targets, &fetcher)
            .await
            .unwrap()
            .expect("should detect an indirect cycle");
        assert_eq!(report.kind, CycleKind::Indirect);
        assert_eq!(
            report.path,
            "Deployment/ns1/a -> StatefulSet/ns1/b -> Deployment/ns1/c -> Deployment/ns1/a"
        );
    }

    #[tokio::test]
    async fn acyclic_graph_reports_no_cycle() {
        let b = target(WorkloadKind::Deployment, "ns1", "b");
        let c = target(WorkloadKind::Deployment, "ns1", "c");
        let mut edges = HashMap::new();
        edges.insert(b.id(), vec![c]);
        let fetcher = GraphFetcher { edges };

        let targets = vec![b];
        let report = detect_cycle("Deployment/ns1/a", &targets, &fetcher)
            .await
            .unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn cycle_not_involving_source_is_still_indirect() {
        // A -> B -> C -> B (B repeats, never touches A)
        let b = target(WorkloadKind::Deployment, "ns1", "b");
        let c = target(WorkloadKind::Deployment, "ns1", "c");
        let mut edges = HashMap::new();
        edges.insert(b.id(), vec![c.clone()]);
        edges.insert(c.id(), vec![b.clone()]);
        let fetcher = GraphFetcher { edges };

        let targets = vec![b];
        let report = detect_cycle("Deployment/ns1/a", &targets, &fetcher)
            .await
            .unwrap()
            .expect("should detect a cycle among downstream nodes");
        assert_eq!(report.kind, CycleKind::Indirect);
        assert_eq!(
            report.path,
            "Deployment/ns1/a -> Deployment/ns1/b -> Deployment/ns1/c -> Deployment/ns1/b"
        );
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_as_cycle_check_error() {
        struct FailingFetcher;
        impl DependencyFetcher for FailingFetcher {
            async fn fetch_targets(&self, _target: &TargetRef) -> Result<Vec<TargetRef>, Error> {
                Err(Error::InvalidAnnotationConfig("boom".to_string()))
            }
        }
        let targets = vec![target(WorkloadKind::Deployment, "ns1", "b")];
        let result = detect_cycle("Deployment/ns1/a", &targets, &FailingFetcher).await;
        assert!(matches!(result, Err(Error::CycleCheckFailed(_))));
    }
}
