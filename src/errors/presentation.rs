//! Production presentation of errors
//!
//! Turns a [`CoreError`](super::CoreError) into the shape handed to
//! user-facing surfaces: redacted context, injected request id, suggested
//! fix, docs link, and troubleshooting steps. In production, internal errors
//! collapse to a generic message and every cause chain is stripped.

use serde::Serialize;

use super::{CoreError, ErrorCategory, ErrorContext, codes, redaction};
use crate::domain_types::RequestId;

const GENERIC_INTERNAL_MESSAGE: &str = "An internal error occurred. Please try again later.";

/// A fully prepared, outward-safe error view.
#[derive(Debug, Clone, Serialize)]
pub struct PresentedError {
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    pub request_id: RequestId,
    pub context: ErrorContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    pub docs_url: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub troubleshooting: Vec<String>,
    #[serde(skip)]
    pub log_level: tracing::Level,
}

/// Adapts core errors for a given deployment environment.
#[derive(Debug, Clone, Copy)]
pub struct ErrorPresenter {
    production: bool,
}

impl ErrorPresenter {
    /// Creates a presenter; `production` selects the hardened behavior
    pub fn new(production: bool) -> Self {
        Self { production }
    }

    /// Prepares an error for the outside world.
    pub fn present(&self, error: &CoreError, request_id: RequestId) -> PresentedError {
        if self.production && error.category() == ErrorCategory::Internal {
            return PresentedError {
                code: error.code().to_string(),
                category: ErrorCategory::Internal,
                message: GENERIC_INTERNAL_MESSAGE.to_string(),
                recoverable: error.is_recoverable(),
                request_id,
                context: ErrorContext::new(),
                cause: None,
                suggested_fix: None,
                docs_url: docs_url(error),
                troubleshooting: Vec::new(),
                log_level: ErrorCategory::Internal.log_level(),
            };
        }

        let context = redaction::redacted_copy(error.context());
        let cause = if self.production {
            None
        } else {
            error.chain().first().cloned()
        };

        PresentedError {
            code: error.code().to_string(),
            category: error.category(),
            message: error.message().to_string(),
            recoverable: error.is_recoverable(),
            request_id,
            context,
            cause,
            suggested_fix: suggested_fix(error),
            docs_url: docs_url(error),
            troubleshooting: troubleshooting(error),
            log_level: error.category().log_level(),
        }
    }
}

fn docs_url(error: &CoreError) -> String {
    format!(
        "https://docs.nasnet.io/errors/{}#{}",
        error.category(),
        error.code().to_lowercase()
    )
}

fn suggested_fix(error: &CoreError) -> Option<String> {
    let fix = match error.code() {
        codes::CGROUPS_UNAVAILABLE => {
            "Enable the cgroups-v2 memory and cpu controllers on the host, or accept degraded resource limiting."
        }
        codes::VERSION_UNSUPPORTED => {
            "Upgrade RouterOS to a version that supports this feature."
        }
        codes::PORT_POOL_EXHAUSTED => {
            "Release unused port allocations or run orphan cleanup for this router."
        }
        codes::VLAN_POOL_EXHAUSTED => {
            "Run orphan cleanup, or expand the VLAN pool range in network settings."
        }
        codes::INVALID_POOL_CONFIG => {
            "Choose a pool range within 1-4094 that still contains every allocated VLAN."
        }
        codes::RESOURCE_CONFLICT => "Retry the operation; another writer won the race.",
        codes::RESOURCE_CLOSED => "Recreate the handle; this one has been closed.",
        codes::ROUTER_QUERY_FAILED | codes::ROUTER_COMMAND_FAILED => {
            "Verify the router is reachable and the panel's API credentials are valid."
        }
        _ => return None,
    };
    Some(fix.to_string())
}

fn troubleshooting(error: &CoreError) -> Vec<String> {
    match error.category() {
        ErrorCategory::Protocol | ErrorCategory::Network => vec![
            "Check that the router is powered on and reachable from the panel host.".to_string(),
            "Confirm the RouterOS API service is enabled and not firewalled.".to_string(),
            "Inspect recent panel logs for correlated connection failures.".to_string(),
        ],
        _ => Vec::new(),
    }
}
