//! Request Outcomes
//!
//! Every processed request resolves to an `Outcome` with an explicit success
//! flag - a capability fault becomes a failure Outcome, never a process fault.

use serde::{Deserialize, Serialize};

/// How the classifier resolved a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// An existing capability answers the request
    Execute,
    /// A new capability must be synthesized first
    Synthesize,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Execute => "execute",
            Route::Synthesize => "synthesize",
        }
    }
}

/// Where a capability came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityOrigin {
    Builtin,
    Synthesized,
}

impl CapabilityOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityOrigin::Builtin => "builtin",
            CapabilityOrigin::Synthesized => "synthesized",
        }
    }
}

/// Result of one processed request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub route: Route,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<CapabilityOrigin>,
}

impl Outcome {
    /// Successful invocation result
    pub fn success(
        name: impl Into<String>,
        payload: serde_json::Value,
        route: Route,
        origin: CapabilityOrigin,
    ) -> Self {
        Self {
            succeeded: true,
            capability_name: Some(name.into()),
            payload: Some(payload),
            error: None,
            route,
            origin: Some(origin),
        }
    }

    /// Failure with a human-readable description
    pub fn failure(name: Option<String>, error: impl Into<String>, route: Route) -> Self {
        Self {
            succeeded: false,
            capability_name: name,
            payload: None,
            error: Some(error.into()),
            route,
            origin: None,
        }
    }

    /// One-line summary for request histories
    pub fn summary(&self) -> String {
        match (&self.succeeded, &self.capability_name) {
            (true, Some(name)) => format!("ok via {}", name),
            (true, None) => "ok".to_string(),
            (false, Some(name)) => format!(
                "failed via {}: {}",
                name,
                self.error.as_deref().unwrap_or("unknown error")
            ),
            (false, None) => format!(
                "failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
