//! Target adapter (C3).
//!
//! `trigger` is the *only* write Cascader performs against a downstream
//! workload. A successful return means the cluster accepted the patch --
//! it does not mean the target has finished restarting.

use chrono::Utc;
use kube::Client;
use kube::api::Api;

use crate::error::Error;
use crate::patch::patch_pod_template_annotation;
use crate::workload::Workload;

/// Gets the target by `(namespace, name)`, sets the fixed
/// `restartedAt` annotation on its pod-template to `now()` in RFC3339,
/// and patches with an optimistic merge against the just-read object. A
/// `NotFound` on the `Get` bubbles up as a failure for this target only
/// -- the caller (the reconciliation engine) counts it as a trigger
/// failure, not an extraction failure, and continues with the remaining
/// targets.
pub async fn trigger<W: Workload>(
    client: Client,
    namespace: &str,
    name: &str,
    restarted_at_key: &str,
) -> Result<(), Error> {
    let api: Api<W> = Api::namespaced(client, namespace);
    let workload = api.get(name).await?;
    let now = Utc::now().to_rfc3339();
    patch_pod_template_annotation(&api, &workload, restarted_at_key, &now).await
}
