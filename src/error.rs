use thiserror::Error;

/// Errors surfaced by the reconciliation core (C1-C8).
///
/// The variant chosen determines how `Reconcile` reports back to the
/// scheduler: see the error table in the specification's error-handling
/// section for which of these are retried and which are not.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes reported error: {0}")]
    Kube(#[from] kube::Error),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("dependency cycle check failed: {0}")]
    CycleCheckFailed(String),

    #[error("annotation configuration invalid: {0}")]
    InvalidAnnotationConfig(String),

    #[error("unsupported or unknown workload kind: {0}")]
    UnknownKind(String),

    #[error("failed to parse timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("failed to publish event: {0}")]
    EventPublish(kube::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
