//! Capability Invoker
//!
//! Owns the live name→callable mapping (builtins plus synthesized) and
//! executes calls with error containment: a capability fault becomes a
//! failure Outcome carrying the capability name, never a process fault.

use crate::outcome::{CapabilityOrigin, Outcome, Route};
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Async capability callable: named JSON parameters in, JSON payload out
pub type CapabilityFn =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// Wrap a plain async closure into a `CapabilityFn`
pub fn capability<F, Fut>(f: F) -> CapabilityFn
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    Arc::new(move |params| -> BoxFuture<'static, Result<serde_json::Value>> {
        Box::pin(f(params))
    })
}

/// A live registered capability
struct RegisteredCapability {
    origin: CapabilityOrigin,
    func: CapabilityFn,
    invocation_count: u64,
    last_invoked_at: Option<DateTime<Utc>>,
}

/// Live-map view for diagnostics and status output
#[derive(Debug, Clone, Serialize)]
pub struct InvokerSummary {
    pub builtin: Vec<String>,
    pub synthesized: Vec<String>,
    pub total_invocations: u64,
}

/// Live capability registry and executor
#[derive(Default)]
pub struct CapabilityInvoker {
    capabilities: HashMap<String, RegisteredCapability>,
}

impl CapabilityInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a builtin at startup. Builtins are never retirable.
    pub fn add_builtin(&mut self, name: &str, func: CapabilityFn) {
        self.capabilities.insert(
            name.to_string(),
            RegisteredCapability {
                origin: CapabilityOrigin::Builtin,
                func,
                invocation_count: 0,
                last_invoked_at: None,
            },
        );
    }

    /// Register a synthesized capability. Overwrites a previous synthesized
    /// entry under the same name; refuses to shadow a builtin.
    pub fn register(&mut self, name: &str, func: CapabilityFn) -> bool {
        if let Some(existing) = self.capabilities.get(name) {
            if existing.origin == CapabilityOrigin::Builtin {
                warn!("Refusing to register '{}' over a builtin", name);
                return false;
            }
            debug!("Replacing synthesized capability '{}'", name);
        }

        self.capabilities.insert(
            name.to_string(),
            RegisteredCapability {
                origin: CapabilityOrigin::Synthesized,
                func,
                invocation_count: 0,
                last_invoked_at: None,
            },
        );
        true
    }

    /// Remove a synthesized capability. Builtins and unknown names are
    /// reported as failures without touching the map.
    pub fn retire(&mut self, name: &str) -> bool {
        match self.capabilities.get(name) {
            Some(entry) if entry.origin == CapabilityOrigin::Synthesized => {
                self.capabilities.remove(name);
                debug!("Retired capability '{}'", name);
                true
            }
            Some(_) => {
                warn!("Refusing to retire builtin '{}'", name);
                false
            }
            None => false,
        }
    }

    /// Remove every synthesized capability, returning the removed names
    pub fn retire_all_synthesized(&mut self) -> Vec<String> {
        let mut removed = self.synthesized_names();
        removed.sort();
        for name in &removed {
            self.capabilities.remove(name);
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn builtin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .capabilities
            .iter()
            .filter(|(_, c)| c.origin == CapabilityOrigin::Builtin)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn synthesized_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .capabilities
            .iter()
            .filter(|(_, c)| c.origin == CapabilityOrigin::Synthesized)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// All live names, builtins first
    pub fn known_names(&self) -> Vec<String> {
        let mut names = self.builtin_names();
        names.extend(self.synthesized_names());
        names
    }

    pub fn summary(&self) -> InvokerSummary {
        InvokerSummary {
            builtin: self.builtin_names(),
            synthesized: self.synthesized_names(),
            total_invocations: self.capabilities.values().map(|c| c.invocation_count).sum(),
        }
    }

    /// Execute a capability by name
    ///
    /// An unknown name yields a failure Outcome enumerating the known names;
    /// an `Err` from the callable is contained into a failure Outcome.
    pub async fn invoke(&mut self, name: &str, params: serde_json::Value) -> Outcome {
        let (func, origin) = match self.capabilities.get(name) {
            Some(entry) => (entry.func.clone(), entry.origin),
            None => {
                let known = self.known_names().join(", ");
                return Outcome::failure(
                    Some(name.to_string()),
                    format!("unknown capability '{}' (known: {})", name, known),
                    Route::Execute,
                );
            }
        };

        let start = std::time::Instant::now();
        match func(params).await {
            Ok(payload) => {
                if let Some(entry) = self.capabilities.get_mut(name) {
                    entry.invocation_count += 1;
                    entry.last_invoked_at = Some(Utc::now());
                }
                debug!(
                    "Capability '{}' completed in {}ms",
                    name,
                    start.elapsed().as_millis()
                );
                Outcome::success(name, payload, Route::Execute, origin)
            }
            Err(e) => {
                warn!("Capability '{}' failed: {}", name, e);
                Outcome::failure(
                    Some(name.to_string()),
                    format!("capability '{}' failed: {}", name, e),
                    Route::Execute,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixed(value: serde_json::Value) -> CapabilityFn {
        capability(move |_params| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    fn failing(message: &'static str) -> CapabilityFn {
        capability(move |_params| async move { anyhow::bail!(message) })
    }

    #[tokio::test]
    async fn test_invoke_success_tags_origin() {
        let mut invoker = CapabilityInvoker::new();
        invoker.add_builtin("get_current_user_info", fixed(json!({"username": "akhan"})));

        let outcome = invoker.invoke("get_current_user_info", json!({})).await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.origin, Some(CapabilityOrigin::Builtin));
        assert_eq!(outcome.payload.unwrap()["username"], "akhan");
    }

    #[tokio::test]
    async fn test_invoke_unknown_lists_known() {
        let mut invoker = CapabilityInvoker::new();
        invoker.add_builtin("list_all_users", fixed(json!([])));
        invoker.register("get_x_ab12cd34", fixed(json!(null)));

        let outcome = invoker.invoke("no_such_capability", json!({})).await;
        assert!(!outcome.succeeded);
        let error = outcome.error.unwrap();
        assert!(error.contains("list_all_users"));
        assert!(error.contains("get_x_ab12cd34"));
    }

    #[tokio::test]
    async fn test_invoke_contains_failures() {
        let mut invoker = CapabilityInvoker::new();
        invoker.register("get_broken_00000000", failing("directory unreachable"));

        let outcome = invoker.invoke("get_broken_00000000", json!({})).await;
        assert!(!outcome.succeeded);
        assert!(outcome.error.unwrap().contains("directory unreachable"));
        // The invoker stays usable afterwards
        assert!(invoker.contains("get_broken_00000000"));
    }

    #[tokio::test]
    async fn test_register_never_shadows_builtin() {
        let mut invoker = CapabilityInvoker::new();
        invoker.add_builtin("list_all_users", fixed(json!(["a"])));

        assert!(!invoker.register("list_all_users", fixed(json!(["b"]))));

        let outcome = invoker.invoke("list_all_users", json!({})).await;
        assert_eq!(outcome.payload.unwrap(), json!(["a"]));
    }

    #[tokio::test]
    async fn test_retire_rules() {
        let mut invoker = CapabilityInvoker::new();
        invoker.add_builtin("list_all_users", fixed(json!([])));
        invoker.register("get_x_ab12cd34", fixed(json!(null)));

        assert!(!invoker.retire("list_all_users"));
        assert!(invoker.contains("list_all_users"));

        assert!(invoker.retire("get_x_ab12cd34"));
        assert!(!invoker.contains("get_x_ab12cd34"));

        assert!(!invoker.retire("never_registered"));
    }

    #[tokio::test]
    async fn test_retire_all_synthesized() {
        let mut invoker = CapabilityInvoker::new();
        invoker.add_builtin("list_all_users", fixed(json!([])));
        invoker.register("get_b_22222222", fixed(json!(null)));
        invoker.register("get_a_11111111", fixed(json!(null)));

        let removed = invoker.retire_all_synthesized();
        assert_eq!(removed, vec!["get_a_11111111", "get_b_22222222"]);
        assert_eq!(invoker.synthesized_names().len(), 0);
        assert!(invoker.contains("list_all_users"));
    }

    #[tokio::test]
    async fn test_invocation_counter() {
        let mut invoker = CapabilityInvoker::new();
        invoker.add_builtin("list_all_users", fixed(json!([])));

        invoker.invoke("list_all_users", json!({})).await;
        invoker.invoke("list_all_users", json!({})).await;

        assert_eq!(invoker.summary().total_invocations, 2);
    }
}
