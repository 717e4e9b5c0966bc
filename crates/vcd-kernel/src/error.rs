use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use vcd_sdk::{ApiVersion, SdkError};

pub type KernelResult<T> = Result<T, KernelError>;

/// Remote messages that mean "stop the parent first".
pub const POWER_OFF_MARKERS: [&str; 2] = [
    "Stop the vApp and try again",
    "or the target entity is invalid",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelError {
    #[error("invalid configuration: {0}")]
    Validation(String),
    #[error("[ENF] entity not found: {what}")]
    NotFound { what: String },
    #[error("{message}{}", hint_suffix(.hint))]
    Conflict {
        message: String,
        hint: Option<String>,
    },
    #[error("task {task_id} ended with status '{status}': {message}")]
    TaskAborted {
        task_id: String,
        status: String,
        message: String,
    },
    #[error("timed out after {budget:?} waiting for {what}")]
    Timeout { what: String, budget: Duration },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("remote error (HTTP {status}): {message}")]
    Remote { status: u16, message: String },
    #[error(
        "attribute `{field}` requires VCD API version {minimum} or newer (connected: {actual})"
    )]
    CapabilityMissing {
        field: String,
        minimum: ApiVersion,
        actual: ApiVersion,
    },
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error("found {count} {what} named '{name}', import by ID instead:\n{table}")]
    Ambiguous {
        what: String,
        name: String,
        count: usize,
        table: String,
    },
    #[error("invalid import path '{path}': {reason}; accepted forms: {}", .forms.join(", "))]
    ImportPath {
        path: String,
        reason: String,
        forms: Vec<String>,
    },
    #[error("payload error: {0}")]
    Payload(String),
    #[error("unknown resource kind '{0}'")]
    UnknownKind(String),
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(hint) => format!("\n\n{hint}"),
        None => String::new(),
    }
}

/// Coarse classification reported with every error diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    TaskAborted,
    TimeoutExceeded,
    Transport,
    CapabilityMissing,
    Cancelled,
}

impl KernelError {
    pub fn validation(message: impl Into<String>) -> Self {
        KernelError::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        KernelError::NotFound { what: what.into() }
    }

    pub fn payload(message: impl Into<String>) -> Self {
        KernelError::Payload(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::Validation(_)
            | KernelError::Ambiguous { .. }
            | KernelError::ImportPath { .. }
            | KernelError::UnknownKind(_) => ErrorKind::Validation,
            KernelError::NotFound { .. } => ErrorKind::NotFound,
            KernelError::Conflict { .. } => ErrorKind::Conflict,
            KernelError::TaskAborted { .. } => ErrorKind::TaskAborted,
            KernelError::Timeout { .. } => ErrorKind::TimeoutExceeded,
            KernelError::Transport(_) | KernelError::Remote { .. } | KernelError::Payload(_) => {
                ErrorKind::Transport
            }
            KernelError::CapabilityMissing { .. } => ErrorKind::CapabilityMissing,
            KernelError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KernelError::NotFound { .. })
    }

    /// Reports whether the remote refused because the parent is running.
    pub fn requires_power_off(&self) -> bool {
        let message = match self {
            KernelError::Conflict { message, .. }
            | KernelError::Remote { message, .. }
            | KernelError::TaskAborted { message, .. } => message,
            _ => return false,
        };
        POWER_OFF_MARKERS.iter().any(|marker| message.contains(marker))
    }

    /// Attach an actionable hint to a conflict; other kinds are turned into a
    /// conflict carrying their message.
    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        let message = match self {
            KernelError::Conflict { message, .. } => message,
            other => other.to_string(),
        };
        KernelError::Conflict {
            message,
            hint: Some(hint.into()),
        }
    }
}

impl From<SdkError> for KernelError {
    fn from(err: SdkError) -> Self {
        match err {
            SdkError::NotFound(what) => KernelError::NotFound { what },
            SdkError::Rejected { status, message }
                if status == 409
                    || status == 412
                    || POWER_OFF_MARKERS.iter().any(|m| message.contains(m)) =>
            {
                KernelError::Conflict {
                    message: format!("remote rejected the request (HTTP {status}): {message}"),
                    hint: None,
                }
            }
            SdkError::Rejected { status, message } => KernelError::Remote { status, message },
            SdkError::StaleEtag(what) => KernelError::Conflict {
                message: format!("{what} changed since it was read (stale ETag)"),
                hint: None,
            },
            SdkError::Transport(message) => KernelError::Transport(message),
            SdkError::Decode { what, message } => {
                KernelError::Payload(format!("failed to decode {what}: {message}"))
            }
            SdkError::Cancelled(reason) => KernelError::Cancelled(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_off_markers_survive_conversion() {
        let err = KernelError::from(SdkError::rejected(
            400,
            "Network is in use. Stop the vApp and try again.",
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.requires_power_off());

        let plain = KernelError::from(SdkError::rejected(400, "bad request"));
        assert_eq!(plain.kind(), ErrorKind::Transport);
        assert!(!plain.requires_power_off());
    }

    #[test]
    fn hint_is_appended_to_message() {
        let err = KernelError::from(SdkError::rejected(409, "busy")).with_hint("set `x = true`");
        let text = err.to_string();
        assert!(text.starts_with("remote rejected the request (HTTP 409): busy"));
        assert!(text.ends_with("set `x = true`"));
    }

    #[test]
    fn not_found_keeps_enf_marker() {
        let err = KernelError::from(SdkError::not_found("urn:vcloud:network:1"));
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("[ENF]"));
    }
}
