use thiserror::Error;

/// Failures raised while building or differentiating a graph.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum AutodiffError {
    #[error("{found} is not supported: expected {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{operation} does not implement its {rule} rule")]
    NotImplemented {
        operation: &'static str,
        rule: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, AutodiffError>;
