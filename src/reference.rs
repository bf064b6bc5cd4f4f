//! Reference parser and ID former (C1).
//!
//! Parses `[namespace/]name` target references into `(namespace, name)`
//! pairs, and mints the stable `Kind/namespace/name` identity string used
//! throughout the reconciliation core.

use crate::error::Error;

/// Splits a target reference on `/`.
///
/// Zero slashes resolves the name against `default_ns`. One slash splits
/// into an explicit `(namespace, name)` pair. More than one slash is
/// rejected. Empty fragments (e.g. `"/foo"` or `"ns/"`) are returned
/// verbatim -- the caller (the target adapter, when it tries to `Get` the
/// object) is the one that will observe the resulting failure.
pub fn parse_ref(reference: &str, default_ns: &str) -> Result<(String, String), Error> {
    let parts: Vec<&str> = reference.split('/').collect();
    match parts.as_slice() {
        [name] => Ok((default_ns.to_string(), name.to_string())),
        [ns, name] => Ok((ns.to_string(), name.to_string())),
        _ => Err(Error::InvalidReference(format!(
            "invalid format: {reference}"
        ))),
    }
}

/// Mints the stable `Kind/namespace/name` identity for a workload. Purely
/// syntactic -- it does not validate that namespace/name are well-formed
/// Kubernetes names.
pub fn id(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}
