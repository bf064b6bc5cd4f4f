//! Shared pod-template annotation patch used by the restart-observation
//! marker (C7) and the target adapter (C3) -- Cascader's only two writes.
//!
//! Both use an optimistic merge against a pre-read snapshot: the patch
//! body embeds the just-read `resourceVersion`, so the API server
//! rejects it with a conflict if the object changed underneath us,
//! matching the specification's optimistic-concurrency requirement.

use kube::ResourceExt;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;

use crate::error::Error;
use crate::workload::Workload;

pub const FIELD_MANAGER: &str = "cascader";

pub async fn patch_pod_template_annotation<W: Workload>(
    api: &Api<W>,
    workload: &W,
    key: &str,
    value: &str,
) -> Result<(), Error> {
    let patch = json!({
        "metadata": {
            "resourceVersion": workload.resource_version(),
        },
        "spec": {
            "template": {
                "metadata": {
                    "annotations": {
                        key: value,
                    }
                }
            }
        }
    });

    api.patch(
        &workload.name(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
