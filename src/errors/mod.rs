//! Coded error taxonomy shared by every control-plane component
//!
//! Every failure that crosses a component boundary is a [`CoreError`]: a
//! stable code, a category, a human message, a recoverability flag, a
//! context map, and an optional cause forming an error chain. Outward
//! serialization passes through [`redaction`] and, at the facade,
//! [`presentation`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::RouterId;
use crate::repository::RepositoryError;

pub mod codes;
pub mod presentation;
pub mod redaction;

pub use presentation::{ErrorPresenter, PresentedError};
pub use redaction::{REDACTED, redact_map, redact_value};

/// Category of a [`CoreError`], determining its code prefix, default
/// recoverability, and log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Platform,
    Protocol,
    Network,
    Validation,
    Auth,
    Resource,
    Internal,
}

impl ErrorCategory {
    /// Platform and internal failures are not recoverable by default.
    pub fn default_recoverable(self) -> bool {
        !matches!(self, Self::Platform | Self::Internal)
    }

    /// Log level used when the error is surfaced.
    pub fn log_level(self) -> tracing::Level {
        match self {
            Self::Auth => tracing::Level::INFO,
            Self::Internal => tracing::Level::ERROR,
            _ => tracing::Level::WARN,
        }
    }

    /// Lowercase name used in docs URLs and serialized errors
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::Protocol => "protocol",
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Auth => "auth",
            Self::Resource => "resource",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured context attached to an error
pub type ErrorContext = serde_json::Map<String, serde_json::Value>;

/// The coded error record used throughout the core.
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct CoreError {
    code: &'static str,
    category: ErrorCategory,
    message: String,
    recoverable: bool,
    context: ErrorContext,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

/// Result alias for operations returning [`CoreError`]
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    fn new(category: ErrorCategory, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            category,
            message: message.into(),
            recoverable: category.default_recoverable(),
            context: ErrorContext::new(),
            source: None,
        }
    }

    /// Platform-category error (`P1xx`), not recoverable by default
    pub fn platform(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Platform, code, message)
    }

    /// Protocol-category error (`R2xx`)
    pub fn protocol(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Protocol, code, message)
    }

    /// Network-category error (`N3xx`)
    pub fn network(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Network, code, message)
    }

    /// Validation-category error (`V4xx`)
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, code, message)
    }

    /// Auth-category error (`A5xx`)
    pub fn auth(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Auth, code, message)
    }

    /// Resource-category error (`S6xx`)
    pub fn resource(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Resource, code, message)
    }

    /// Internal error (`I500`), not recoverable by default
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, codes::INTERNAL, message)
    }

    /// Protocol error carrying the router it concerns
    pub fn protocol_for(
        code: &'static str,
        message: impl Into<String>,
        router_id: &RouterId,
    ) -> Self {
        Self::protocol(code, message).with_context("routerId", router_id.to_string())
    }

    /// Network error carrying the peer address
    pub fn network_at(
        code: &'static str,
        message: impl Into<String>,
        host: &str,
        port: Option<u16>,
    ) -> Self {
        let err = Self::network(code, message).with_context("host", host);
        match port {
            Some(p) => err.with_context("port", p),
            None => err,
        }
    }

    /// Validation error carrying the offending field, value, and constraint
    pub fn validation_field(
        code: &'static str,
        message: impl Into<String>,
        field: &str,
        invalid_value: impl Into<serde_json::Value>,
        constraint: &str,
    ) -> Self {
        Self::validation(code, message)
            .with_context("field", field)
            .with_context("invalidValue", invalid_value)
            .with_context("constraint", constraint)
    }

    /// Auth error carrying the permission gap
    pub fn auth_required(
        code: &'static str,
        message: impl Into<String>,
        required_permission: &str,
        user_id: Option<&str>,
    ) -> Self {
        let err =
            Self::auth(code, message).with_context("requiredPermission", required_permission);
        match user_id {
            Some(id) => err.with_context("userId", id),
            None => err,
        }
    }

    /// Resource error carrying the resource's type, id, and state
    pub fn resource_state(
        code: &'static str,
        message: impl Into<String>,
        resource_type: &str,
        id: &str,
        state: &str,
    ) -> Self {
        Self::resource(code, message)
            .with_context("resourceType", resource_type)
            .with_context("resourceId", id)
            .with_context("state", state)
    }

    /// Platform error carrying the platform name and version
    pub fn platform_on(
        code: &'static str,
        message: impl Into<String>,
        platform: &str,
        version: &str,
    ) -> Self {
        Self::platform(code, message)
            .with_context("platform", platform)
            .with_context("version", version)
    }

    /// Adds a context entry
    pub fn with_context(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Attaches a cause, forming an error chain
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Overrides the recoverability flag
    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Stable error code, e.g. `N302`
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// The error's category
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the caller may retry or otherwise recover
    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// Structured context map
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// The cause chain rendered as strings, outermost first
    pub fn chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current: Option<&(dyn std::error::Error + 'static)> =
            self.source.as_deref().map(|s| s as _);
        while let Some(err) = current {
            chain.push(err.to_string());
            current = err.source();
        }
        chain
    }
}

impl From<RepositoryError> for CoreError {
    fn from(err: RepositoryError) -> Self {
        match &err {
            RepositoryError::UniqueViolation { constraint } => CoreError::resource(
                codes::RESOURCE_CONFLICT,
                "conflicting write detected; retry the operation",
            )
            .with_context("constraint", constraint.clone())
            .with_source(err),
            _ => CoreError::internal("repository operation failed").with_source(err),
        }
    }
}
