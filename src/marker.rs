//! Restart-observation marker (C7).
//!
//! Ensures exactly-once cascade per source restart despite multiple
//! `Reconcile` rounds caused by requeueing while the source stabilizes.
//! Two annotations co-exist on the source's pod-template: `restartedAt`
//! (the intent, written by humans/`kubectl`/Cascader-on-a-target) and
//! `lastObservedRestart` (Cascader's own idempotence ledger).

use kube::api::Api;

use crate::error::Error;
use crate::patch::patch_pod_template_annotation;
use crate::workload::Workload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRestart {
    pub timestamp: String,
}

/// Pure decision function: does `workload` represent a restart Cascader
/// has not yet observed?
///
/// - empty/absent `restartedAt` -> not new.
/// - `lastObservedRestart` empty or different from `restartedAt` -> new.
/// - otherwise -> not new (already handled).
pub fn check<W: Workload>(
    workload: &W,
    restarted_at_key: &str,
    last_observed_key: &str,
) -> Option<NewRestart> {
    let annotations = workload.pod_template_annotations();

    let restarted_at = annotations.get(restarted_at_key)?;
    if restarted_at.is_empty() {
        return None;
    }

    match annotations.get(last_observed_key) {
        Some(last_observed) if last_observed == restarted_at => None,
        _ => Some(NewRestart {
            timestamp: restarted_at.clone(),
        }),
    }
}

/// Runs the decision function and, on a new restart, patches
/// `lastObservedRestart := restartedAt` on the pod-template before
/// returning. The patch uses an optimistic merge against `workload`'s own
/// snapshot; a patch failure aborts with a retryable error, per the
/// specification -- it is safer to retry than to fire a cascade without a
/// marker in place.
pub async fn observe<W: Workload>(
    api: &Api<W>,
    workload: &W,
    restarted_at_key: &str,
    last_observed_key: &str,
) -> Result<Option<NewRestart>, Error> {
    let Some(new_restart) = check(workload, restarted_at_key, last_observed_key) else {
        return Ok(None);
    };

    patch_pod_template_annotation(api, workload, last_observed_key, &new_restart.timestamp)
        .await?;

    Ok(Some(new_restart))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    const RESTARTED_AT: &str = "kubectl.kubernetes.io/restartedAt";
    const LAST_OBSERVED: &str = "cascader.tkb.ch/last-observed-restart";

    fn deployment_with_pod_template_annotations(annotations: BTreeMap<String, String>) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("a".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        annotations: Some(annotations),
                        ..Default::default()
                    }),
                    spec: None,
                },
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn no_restarted_at_is_not_new() {
        let workload = deployment_with_pod_template_annotations(BTreeMap::new());
        assert_eq!(check(&workload, RESTARTED_AT, LAST_OBSERVED), None);
    }

    #[test]
    fn empty_restarted_at_is_not_new() {
        let mut annotations = BTreeMap::new();
        annotations.insert(RESTARTED_AT.to_string(), "".to_string());
        let workload = deployment_with_pod_template_annotations(annotations);
        assert_eq!(check(&workload, RESTARTED_AT, LAST_OBSERVED), None);
    }

    #[test]
    fn unobserved_restart_is_new() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            RESTARTED_AT.to_string(),
            "2024-04-03T12:00:00Z".to_string(),
        );
        let workload = deployment_with_pod_template_annotations(annotations);
        assert_eq!(
            check(&workload, RESTARTED_AT, LAST_OBSERVED),
            Some(NewRestart {
                timestamp: "2024-04-03T12:00:00Z".to_string()
            })
        );
    }

    #[test]
    fn already_observed_restart_is_not_new() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            RESTARTED_AT.to_string(),
            "2024-04-03T12:00:00Z".to_string(),
        );
        annotations.insert(
            LAST_OBSERVED.to_string(),
            "2024-04-03T12:00:00Z".to_string(),
        );
        let workload = deployment_with_pod_template_annotations(annotations);
        assert_eq!(check(&workload, RESTARTED_AT, LAST_OBSERVED), None);
    }

    #[test]
    fn stale_observation_is_a_new_restart() {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            RESTARTED_AT.to_string(),
            "2024-04-03T12:00:00Z".to_string(),
        );
        annotations.insert(
            LAST_OBSERVED.to_string(),
            "2024-04-01T00:00:00Z".to_string(),
        );
        let workload = deployment_with_pod_template_annotations(annotations);
        assert_eq!(
            check(&workload, RESTARTED_AT, LAST_OBSERVED),
            Some(NewRestart {
                timestamp: "2024-04-03T12:00:00Z".to_string()
            })
        );
    }
}
