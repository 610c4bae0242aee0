//! Stable error codes returned to callers
//!
//! Every fallible operation in this crate reports a closed [`ErrorCode`] plus a
//! human message. Callers branch on the code, never on the message text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Symbolic error codes surfaced to users and scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    CmuxCapabilityMissing,
    CmuxCreateFailed,
    CmuxRenameFailed,
    CmuxSelectFailed,
    CmuxIdentifyFailed,
    CmuxNotMapped,
    CmuxAmbiguousTarget,
    CmuxRuntimeUnavailable,
    CmuxListFailed,
    StateWriteFailed,
    SessionNotFound,
    SessionRestorePartial,
    WorkspaceNotFound,
    WorkspaceNotActive,
    NonInteractiveSelectionRequired,
    InvalidArgument,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CmuxCapabilityMissing => "cmux_capability_missing",
            ErrorCode::CmuxCreateFailed => "cmux_create_failed",
            ErrorCode::CmuxRenameFailed => "cmux_rename_failed",
            ErrorCode::CmuxSelectFailed => "cmux_select_failed",
            ErrorCode::CmuxIdentifyFailed => "cmux_identify_failed",
            ErrorCode::CmuxNotMapped => "cmux_not_mapped",
            ErrorCode::CmuxAmbiguousTarget => "cmux_ambiguous_target",
            ErrorCode::CmuxRuntimeUnavailable => "cmux_runtime_unavailable",
            ErrorCode::CmuxListFailed => "cmux_list_failed",
            ErrorCode::StateWriteFailed => "state_write_failed",
            ErrorCode::SessionNotFound => "session_not_found",
            ErrorCode::SessionRestorePartial => "session_restore_partial",
            ErrorCode::WorkspaceNotFound => "workspace_not_found",
            ErrorCode::WorkspaceNotActive => "workspace_not_active",
            ErrorCode::NonInteractiveSelectionRequired => "non_interactive_selection_required",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coded failure: short stable code plus a human message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CmuxError {
    pub code: ErrorCode,
    pub message: String,
}

impl CmuxError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Wrap a runtime adapter failure with the name of the operation that failed
    pub fn runtime(code: ErrorCode, operation: &str, error: impl fmt::Display) -> Self {
        Self::new(code, format!("{operation}: {error:#}"))
    }

    pub fn state_write(error: impl fmt::Display) -> Self {
        Self::new(ErrorCode::StateWriteFailed, format!("{error:#}"))
    }

    pub fn internal(error: impl fmt::Display) -> Self {
        Self::new(ErrorCode::InternalError, format!("{error:#}"))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }
}

pub type CmuxResult<T> = Result<T, CmuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serde_matches_as_str() {
        for code in [
            ErrorCode::CmuxCapabilityMissing,
            ErrorCode::CmuxNotMapped,
            ErrorCode::SessionRestorePartial,
            ErrorCode::NonInteractiveSelectionRequired,
            ErrorCode::StateWriteFailed,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_runtime_error_names_operation() {
        let err = CmuxError::runtime(
            ErrorCode::CmuxCreateFailed,
            "workspace.create",
            anyhow::anyhow!("socket closed"),
        );
        assert_eq!(err.code, ErrorCode::CmuxCreateFailed);
        assert_eq!(err.message, "workspace.create: socket closed");
        assert_eq!(
            err.to_string(),
            "cmux_create_failed: workspace.create: socket closed"
        );
    }
}
