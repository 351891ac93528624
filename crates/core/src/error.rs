use thiserror::Error;

/// Invalid parameters, detected before any network I/O is attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unsupported {kind}: {value}")]
    Unsupported { kind: &'static str, value: String },
}

impl ConfigurationError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
