use thiserror::Error;

use crate::context::ContextId;

pub type Result<T, E = IntegratorError> = core::result::Result<T, E>;

/// Errors raised by integrator construction, execution and state images.
///
/// Every configuration variant names the function, the parameter and the
/// offending value so a failure can be diagnosed without a backtrace.
#[derive(Debug, Error)]
pub enum IntegratorError {
    #[error("{function}: {param} = {value} is out of range (expected {expected})")]
    OutOfRange {
        function: &'static str,
        param: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{function}: {param} has length {len} but the integrated variable has length {expected}")]
    LengthMismatch {
        function: &'static str,
        param: &'static str,
        len: usize,
        expected: usize,
    },

    #[error("{function}: {param} = {value} has an invalid type (expected {expected})")]
    InvalidType {
        function: &'static str,
        param: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{function}: '{value}' is not a valid {param} (expected one of {expected})")]
    UnknownVariant {
        function: &'static str,
        param: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{function}: {param} is fixed at construction and cannot be overridden per call")]
    NotModulable {
        function: &'static str,
        param: &'static str,
    },

    #[error("{function}: context {context} appears more than once in a single batch")]
    DuplicateContext {
        function: &'static str,
        context: ContextId,
    },

    #[error("{function}: context {context} has no recorded state")]
    UnknownContext {
        function: &'static str,
        context: ContextId,
    },

    #[error("state image: {0}")]
    Image(#[from] std::io::Error),

    #[error("state image encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl IntegratorError {
    /// True for the configuration family (bad values, types, lengths, enums).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            IntegratorError::OutOfRange { .. }
                | IntegratorError::LengthMismatch { .. }
                | IntegratorError::InvalidType { .. }
                | IntegratorError::UnknownVariant { .. }
                | IntegratorError::NotModulable { .. }
        )
    }

    /// Name of the parameter the error refers to, if any.
    pub fn param(&self) -> Option<&'static str> {
        match self {
            IntegratorError::OutOfRange { param, .. }
            | IntegratorError::LengthMismatch { param, .. }
            | IntegratorError::InvalidType { param, .. }
            | IntegratorError::UnknownVariant { param, .. }
            | IntegratorError::NotModulable { param, .. } => Some(param),
            _ => None,
        }
    }
}
