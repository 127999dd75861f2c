//! MW-002: Error taxonomy for a provisioning pass.
//!
//! Every error surfaces to the operator; nothing here retries.

use thiserror::Error;

/// Top-level error enum. Variants map to the failure classes of a pass.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StackError {
    /// Cyclic graph, dangling reference, or invalid stack file.
    /// Raised before any provider call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The provider refused a resource (quota, invalid property value).
    #[error("provider rejected '{resource}': {reason}")]
    ProviderRejection { resource: String, reason: String },

    /// A populate build ran and failed (or never finished).
    #[error("build '{build_id}' failed: {reason}")]
    BuildExecution { build_id: String, reason: String },

    /// The one-shot action call failed or its response had no identity field.
    #[error("trigger '{resource}' failed: {reason}")]
    TriggerInvocation { resource: String, reason: String },

    /// Lock file or event log could not be read or written.
    #[error("state error: {0}")]
    State(String),
}

pub type StackResult<T> = Result<T, StackError>;

impl StackError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for errors raised before any provider call was made.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mw002_display() {
        let e = StackError::ProviderRejection {
            resource: "inference-function".to_string(),
            reason: "ReservedConcurrentExecutions exceeds account limit".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "provider rejected 'inference-function': ReservedConcurrentExecutions exceeds account limit"
        );
        assert!(!e.is_configuration());
    }

    #[test]
    fn test_mw002_config_helper() {
        let e = StackError::config("dependency cycle detected involving: a, b");
        assert!(e.is_configuration());
        assert!(e.to_string().starts_with("configuration error:"));
    }
}
