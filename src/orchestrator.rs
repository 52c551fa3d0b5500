//! System Orchestrator
//!
//! Owns the classifier, invoker, synthesizer, and catalog, and drives a
//! request end to end:
//! - Classify the request
//! - Execute an existing capability, or synthesize, register, and run a new one
//! - Record the outcome in the request history
//!
//! Every failure inside a cycle is contained into a failure `Outcome`; the
//! error state lasts for that cycle only and the next request starts fresh.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::catalog::{CapabilityCatalog, CapabilityMetadata, CatalogStats, EntryStatus};
use crate::classifier::{ClassifierStats, RequestClassifier, CATEGORY_GENERIC};
use crate::directory::Directory;
use crate::invoker::{CapabilityInvoker, InvokerSummary};
use crate::outcome::{Outcome, Route};
use crate::synthesis::{sandbox, Synthesized, Synthesizer, SynthesisProvider};
use crate::{builtins, probes};

// Bare requests that mean "wipe the synthesized state", checked verbatim
// against the trimmed lowercased input
static RESET_PHRASES: &[&str] = &[
    "reset",
    "reset the system",
    "reset system",
    "clean the system",
    "clear capabilities",
];

/// True when the request text is a bare reset command rather than a query
pub fn is_reset_phrase(text: &str) -> bool {
    RESET_PHRASES.contains(&text.trim().to_lowercase().as_str())
}

/// Lifecycle state of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    /// Constructed (or reset), no request handled yet
    Inactive,
    Processing,
    Ready,
    /// Last request failed; cleared by the next request
    Error,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Inactive => "inactive",
            SystemState::Processing => "processing",
            SystemState::Ready => "ready",
            SystemState::Error => "error",
        }
    }
}

/// What a full-system reset removed
#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub capabilities_removed: Vec<String>,
    pub catalog_cleared: bool,
}

impl ResetReport {
    pub fn summary(&self) -> String {
        let mut text = format!(
            "removed {} synthesized capabilities",
            self.capabilities_removed.len()
        );
        if !self.catalog_cleared {
            text.push_str(" (catalog file could not be deleted)");
        }
        text
    }
}

/// Aggregated view over every component, for `--status`
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub state: SystemState,
    pub requests_processed: u64,
    pub classifier: ClassifierStats,
    pub invoker: InvokerSummary,
    pub catalog: CatalogStats,
}

/// Request-dispatch core: one instance owns the whole pipeline
pub struct Orchestrator {
    classifier: RequestClassifier,
    invoker: CapabilityInvoker,
    synthesizer: Synthesizer,
    catalog: CapabilityCatalog,
    state: SystemState,
    requests_processed: u64,
}

impl Orchestrator {
    /// Build the pipeline: install builtins and probes, then restore any
    /// synthesized capabilities the catalog still holds as active.
    pub fn new(
        directory: Arc<dyn Directory>,
        provider: Arc<dyn SynthesisProvider>,
        catalog: CapabilityCatalog,
        synth_timeout: Duration,
    ) -> Self {
        let mut invoker = CapabilityInvoker::new();
        builtins::install(&mut invoker, directory.clone());
        probes::install(&mut invoker, directory.clone());

        let synthesizer = Synthesizer::new(provider, directory.clone(), synth_timeout);

        let mut orchestrator = Self {
            classifier: RequestClassifier::new(),
            invoker,
            synthesizer,
            catalog,
            state: SystemState::Inactive,
            requests_processed: 0,
        };

        let restored = orchestrator.rehydrate(directory);
        let summary = orchestrator.invoker.summary();
        info!(
            "Orchestrator initialized: {} builtin capabilities, {} restored from catalog",
            summary.builtin.len(),
            restored
        );

        orchestrator
    }

    /// Recompile each active cataloged source and re-register its callable
    /// and learned triggers. A source that no longer compiles, or whose name
    /// now collides with a builtin, is retired with the reason on audit.
    fn rehydrate(&mut self, directory: Arc<dyn Directory>) -> usize {
        let entries: Vec<(String, String, String)> = self
            .catalog
            .list(Some(EntryStatus::Active))
            .into_iter()
            .map(|e| {
                (
                    e.name.clone(),
                    e.synthesized_source.clone(),
                    e.originating_request.clone(),
                )
            })
            .collect();

        let mut restored = 0;
        for (name, source, request) in entries {
            match sandbox::compile(&source) {
                Ok(namespace) => {
                    let callable = sandbox::callable_for(namespace, directory.clone(), &request);
                    if self.invoker.register(&name, callable) {
                        self.classifier.learn(&name, &request);
                        debug!("Restored capability '{}' from catalog", name);
                        restored += 1;
                    } else {
                        warn!("Cataloged name '{}' collides with a builtin, retiring", name);
                        self.catalog
                            .retire(&name, "restore refused: collides with a builtin name");
                    }
                }
                Err(e) => {
                    warn!("Cataloged source for '{}' no longer compiles: {}", name, e);
                    self.catalog
                        .retire(&name, &format!("restore failed: {}", e));
                }
            }
        }
        restored
    }

    /// Process one request end to end. Total: every path resolves to an
    /// `Outcome`, and a failing cycle leaves the orchestrator usable.
    pub async fn process(&mut self, request: &str) -> Outcome {
        self.state = SystemState::Processing;
        self.requests_processed += 1;
        info!(
            "Processing request #{}: {}",
            self.requests_processed, request
        );

        let outcome = self.dispatch(request).await;

        self.classifier.record_processed(request, &outcome.summary());
        self.state = if outcome.succeeded {
            SystemState::Ready
        } else {
            SystemState::Error
        };

        outcome
    }

    async fn dispatch(&mut self, request: &str) -> Outcome {
        let decision = self.classifier.classify(request);

        match (decision.route, decision.resolved_name) {
            (Route::Execute, Some(name)) => self.execute_existing(&name).await,
            (Route::Execute, None) => Outcome::failure(
                None,
                "classifier resolved execute without a capability name",
                Route::Execute,
            ),
            (Route::Synthesize, _) => {
                let category = decision
                    .category_hint
                    .as_deref()
                    .unwrap_or(CATEGORY_GENERIC)
                    .to_string();
                self.synthesize_and_run(request, &category).await
            }
        }
    }

    async fn execute_existing(&mut self, name: &str) -> Outcome {
        debug!("Executing existing capability '{}'", name);
        let outcome = self.invoker.invoke(name, json!({})).await;

        // Usage bookkeeping only covers cataloged (synthesized) names; the
        // catalog ignores builtins on its own.
        if outcome.succeeded {
            self.catalog.record_invocation(name);
        }
        outcome
    }

    async fn synthesize_and_run(&mut self, request: &str, category: &str) -> Outcome {
        info!("No capability matched, synthesizing for category '{}'", category);

        let Synthesized {
            name,
            callable,
            source,
            category,
            used_fallback,
        } = self.synthesizer.synthesize(request, category).await;

        if used_fallback {
            debug!("Capability '{}' built from the {} fallback", name, category);
        }

        // The fallback makes synthesis total, so the only refusal left is a
        // derived name shadowing a builtin.
        if !self.invoker.register(&name, callable) {
            return Outcome::failure(
                Some(name.clone()),
                format!("derived name '{}' collides with a builtin capability", name),
                Route::Synthesize,
            );
        }

        self.catalog.register(
            &name,
            CapabilityMetadata {
                originating_request: request.to_string(),
                synthesized_source: source,
                category,
            },
        );
        self.classifier.learn(&name, request);

        let mut outcome = self.invoker.invoke(&name, json!({})).await;
        outcome.route = Route::Synthesize;
        if outcome.succeeded {
            self.catalog.record_invocation(&name);
        }
        outcome
    }

    /// Wipe every synthesized capability and the durable catalog, returning
    /// to the freshly-initialized state. The removed list is reported in
    /// full even when the catalog file cannot be deleted.
    pub fn reset(&mut self) -> ResetReport {
        let capabilities_removed = self.invoker.retire_all_synthesized();
        let catalog_cleared = self.catalog.reset_all();
        self.classifier.forget_learned();
        self.classifier.clear_history();
        self.state = SystemState::Inactive;
        self.requests_processed = 0;

        info!(
            "System reset: removed {} synthesized capabilities (catalog cleared: {})",
            capabilities_removed.len(),
            catalog_cleared
        );

        ResetReport {
            capabilities_removed,
            catalog_cleared,
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn stats(&self) -> SystemStats {
        SystemStats {
            state: self.state,
            requests_processed: self.requests_processed,
            classifier: self.classifier.stats(),
            invoker: self.invoker.summary(),
            catalog: self.catalog.stats(),
        }
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.catalog
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.invoker.known_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::outcome::CapabilityOrigin;
    use crate::synthesis::ProviderError;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct UnreachableProvider;

    #[async_trait]
    impl SynthesisProvider for UnreachableProvider {
        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            Err(ProviderError::NotConfigured)
        }
    }

    fn orchestrator() -> (Orchestrator, TempDir) {
        let dir = TempDir::new().unwrap();
        let catalog = CapabilityCatalog::open(dir.path().join("catalog.json"));
        let orchestrator = Orchestrator::new(
            Arc::new(StaticDirectory::sample()),
            Arc::new(UnreachableProvider),
            catalog,
            Duration::from_secs(1),
        );
        (orchestrator, dir)
    }

    #[test]
    fn test_reset_phrase_detection() {
        assert!(is_reset_phrase("reset"));
        assert!(is_reset_phrase("  Reset The System  "));
        assert!(!is_reset_phrase("reset my password"));
        assert!(!is_reset_phrase("who am i"));
    }

    #[tokio::test]
    async fn test_trigger_request_executes_builtin() {
        let (mut orchestrator, _dir) = orchestrator();
        assert_eq!(orchestrator.state(), SystemState::Inactive);

        let outcome = orchestrator.process("who am I?").await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.route, Route::Execute);
        assert_eq!(outcome.origin, Some(CapabilityOrigin::Builtin));
        assert_eq!(
            outcome.capability_name.as_deref(),
            Some("get_current_user_info")
        );
        assert_eq!(orchestrator.state(), SystemState::Ready);
    }

    #[tokio::test]
    async fn test_unmatched_request_synthesizes_then_replays() {
        let (mut orchestrator, _dir) = orchestrator();

        // First pass: no trigger matches, the fallback-backed synthesis runs
        let first = orchestrator.process("how many departments exist").await;
        assert!(first.succeeded);
        assert_eq!(first.route, Route::Synthesize);
        assert_eq!(first.origin, Some(CapabilityOrigin::Synthesized));

        let name = first.capability_name.clone().unwrap();
        assert!(name.starts_with("get_"));
        assert_eq!(orchestrator.catalog().active_names(), vec![name.clone()]);

        // Replay: the learned trigger resolves straight to execute
        let second = orchestrator.process("how many departments exist").await;
        assert!(second.succeeded);
        assert_eq!(second.route, Route::Execute);
        assert_eq!(second.capability_name.as_deref(), Some(name.as_str()));
    }

    #[tokio::test]
    async fn test_capability_failure_is_not_sticky() {
        let (mut orchestrator, _dir) = orchestrator();

        // search_users_by_department needs a department parameter that plain
        // dispatch never carries, so this cycle fails in a contained way
        let failed = orchestrator.process("search users by department").await;
        assert!(!failed.succeeded);
        assert!(failed.error.is_some());
        assert_eq!(orchestrator.state(), SystemState::Error);

        let recovered = orchestrator.process("who am I?").await;
        assert!(recovered.succeeded);
        assert_eq!(orchestrator.state(), SystemState::Ready);
    }

    #[tokio::test]
    async fn test_reset_removes_synthesized_and_is_idempotent() {
        let (mut orchestrator, _dir) = orchestrator();

        orchestrator.process("how many departments exist").await;
        assert_eq!(orchestrator.stats().invoker.synthesized.len(), 1);

        let report = orchestrator.reset();
        assert_eq!(report.capabilities_removed.len(), 1);
        assert!(report.catalog_cleared);
        assert_eq!(orchestrator.state(), SystemState::Inactive);
        assert!(orchestrator.stats().invoker.synthesized.is_empty());
        assert_eq!(orchestrator.stats().catalog.total, 0);
        assert_eq!(orchestrator.stats().requests_processed, 0);

        // Second reset removes nothing and still succeeds
        let again = orchestrator.reset();
        assert!(again.capabilities_removed.is_empty());
        assert!(again.catalog_cleared);

        // The wiped capability is gone from classification too
        let outcome = orchestrator.process("how many departments exist").await;
        assert_eq!(outcome.route, Route::Synthesize);
    }

    #[tokio::test]
    async fn test_rehydration_restores_cataloged_capabilities() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        let directory: Arc<dyn Directory> = Arc::new(StaticDirectory::sample());

        let name = {
            let catalog = CapabilityCatalog::open(path.clone());
            let mut first = Orchestrator::new(
                directory.clone(),
                Arc::new(UnreachableProvider),
                catalog,
                Duration::from_secs(1),
            );
            let outcome = first.process("how many departments exist").await;
            assert!(outcome.succeeded);
            outcome.capability_name.unwrap()
        };

        // A fresh orchestrator over the same catalog file resolves the
        // replayed request without synthesizing again
        let catalog = CapabilityCatalog::open(path);
        let mut second = Orchestrator::new(
            directory,
            Arc::new(UnreachableProvider),
            catalog,
            Duration::from_secs(1),
        );
        assert!(second.capability_names().contains(&name));

        let outcome = second.process("how many departments exist").await;
        assert!(outcome.succeeded);
        assert_eq!(outcome.route, Route::Execute);
        assert_eq!(outcome.capability_name.as_deref(), Some(name.as_str()));
    }

    #[tokio::test]
    async fn test_corrupt_cataloged_source_is_retired_on_restore() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");

        {
            let mut catalog = CapabilityCatalog::open(path.clone());
            catalog.register(
                "get_broken_00000000",
                CapabilityMetadata {
                    originating_request: "broken request".to_string(),
                    synthesized_source: "import os; os.system('boom')".to_string(),
                    category: "generic_query".to_string(),
                },
            );
        }

        let catalog = CapabilityCatalog::open(path);
        let orchestrator = Orchestrator::new(
            Arc::new(StaticDirectory::sample()),
            Arc::new(UnreachableProvider),
            catalog,
            Duration::from_secs(1),
        );

        assert!(!orchestrator
            .capability_names()
            .contains(&"get_broken_00000000".to_string()));
        let entry = orchestrator.catalog().get("get_broken_00000000").unwrap();
        assert_eq!(entry.status, EntryStatus::Retired);
    }

    #[tokio::test]
    async fn test_stats_aggregate_components() {
        let (mut orchestrator, _dir) = orchestrator();

        orchestrator.process("who am I?").await;
        orchestrator.process("how many departments exist").await;

        let stats = orchestrator.stats();
        assert_eq!(stats.requests_processed, 2);
        assert_eq!(stats.classifier.processed_requests, 2);
        assert_eq!(stats.invoker.synthesized.len(), 1);
        assert_eq!(stats.catalog.active, 1);
        assert_eq!(stats.state, SystemState::Ready);
    }
}
