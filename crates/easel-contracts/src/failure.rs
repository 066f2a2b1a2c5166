use serde::{Deserialize, Serialize};

pub const GENERIC_UPSTREAM_MESSAGE: &str = "unknown error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    Empty,
    TooLong,
    RestrictedContent,
    MissingImage,
    CapabilityMismatch,
}

impl ValidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationReason::Empty => "empty",
            ValidationReason::TooLong => "too_long",
            ValidationReason::RestrictedContent => "restricted_content",
            ValidationReason::MissingImage => "missing_image",
            ValidationReason::CapabilityMismatch => "capability_mismatch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub reason: ValidationReason,
    pub message: String,
}

impl ValidationError {
    pub fn new(reason: ValidationReason) -> Self {
        let message = match reason {
            ValidationReason::Empty => "Prompt must not be empty.".to_string(),
            ValidationReason::TooLong => "Prompt must be 500 characters or fewer.".to_string(),
            ValidationReason::RestrictedContent => "Prompt contains restricted content.".to_string(),
            ValidationReason::MissingImage => "Attach an image before sending.".to_string(),
            ValidationReason::CapabilityMismatch => {
                "Input does not match the selected capability.".to_string()
            }
        };
        Self { reason, message }
    }

    pub fn with_message(reason: ValidationReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum FailureKind {
    Validation(ValidationReason),
    MissingCredential,
    Transport,
    Upstream,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation(_) => "validation",
            FailureKind::MissingCredential => "missing_credential",
            FailureKind::Transport => "transport",
            FailureKind::Upstream => "upstream",
        }
    }

    /// Whether issuing the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transport | FailureKind::Upstream)
    }
}

/// Human-readable failure published to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    pub status_code: Option<u16>,
    pub upstream_message: Option<String>,
}

impl FailureDetail {
    pub fn validation(err: &ValidationError) -> Self {
        Self {
            kind: FailureKind::Validation(err.reason),
            message: err.message.clone(),
            status_code: None,
            upstream_message: None,
        }
    }

    pub fn missing_credential() -> Self {
        Self {
            kind: FailureKind::MissingCredential,
            message: "API credential is not configured; requests are disabled.".to_string(),
            status_code: None,
            upstream_message: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "Request failed: network error".to_string()
        } else {
            format!("Request failed: {}", message.trim())
        };
        Self {
            kind: FailureKind::Transport,
            message,
            status_code: None,
            upstream_message: None,
        }
    }

    /// Builds an upstream failure from whatever the service returned.
    ///
    /// The message always names the status code when one is known, and falls
    /// back to [`GENERIC_UPSTREAM_MESSAGE`] when the body carried nothing useful.
    pub fn upstream(status_code: Option<u16>, upstream_message: Option<String>) -> Self {
        let upstream_message = upstream_message
            .map(|value| truncate_text(value.trim(), 512))
            .filter(|value| !value.is_empty());
        let detail = upstream_message
            .as_deref()
            .unwrap_or(GENERIC_UPSTREAM_MESSAGE);
        let message = match status_code {
            Some(code) => format!("Inference service error ({code}): {detail}"),
            None => format!("Inference service error: {detail}"),
        };
        Self {
            kind: FailureKind::Upstream,
            message,
            status_code,
            upstream_message,
        }
    }

    pub fn is_missing_credential(&self) -> bool {
        self.kind == FailureKind::MissingCredential
    }
}

impl std::fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
