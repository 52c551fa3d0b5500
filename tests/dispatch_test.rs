//! Dispatch Pipeline Integration Tests
//!
//! End-to-end flows over the public API: classification, builtin execution,
//! synthesis with registration and replay, reset, and restart rehydration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capforge::catalog::AuditAction;
use capforge::outcome::CapabilityOrigin;
use capforge::synthesis::{ProviderError, SynthesisProvider};
use capforge::{
    CapabilityCatalog, Directory, EntryStatus, Orchestrator, Route, StaticDirectory,
};
use tempfile::TempDir;

/// Provider double that always answers with the same canned response
struct ScriptedProvider {
    response: String,
}

#[async_trait]
impl SynthesisProvider for ScriptedProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Ok(self.response.clone())
    }
}

/// Provider double for the no-API-key deployment
struct UnconfiguredProvider;

#[async_trait]
impl SynthesisProvider for UnconfiguredProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::NotConfigured)
    }
}

fn orchestrator_with(provider: Arc<dyn SynthesisProvider>) -> (Orchestrator, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let catalog = CapabilityCatalog::open(temp_dir.path().join("catalog.json"));
    let orchestrator = Orchestrator::new(
        Arc::new(StaticDirectory::sample()),
        provider,
        catalog,
        Duration::from_secs(5),
    );
    (orchestrator, temp_dir)
}

const DEPARTMENT_SCRIPT: &str = r#"Here is the capability:

```
fn get_department_total() {
    connect()
    rows = search("(objectClass=organizationalUnit)")
    total = count(rows)
    report("departments found: {total}")
}
```
"#;

#[tokio::test]
async fn test_builtin_trigger_end_to_end() {
    let (mut orchestrator, _temp) = orchestrator_with(Arc::new(UnconfiguredProvider));

    let outcome = orchestrator.process("who am I?").await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.route, Route::Execute);
    assert_eq!(outcome.origin, Some(CapabilityOrigin::Builtin));

    let payload = outcome.payload.unwrap();
    assert!(payload["username"].is_string());
    assert!(payload["os"].is_string());

    // Builtins never enter the catalog
    assert_eq!(orchestrator.catalog().stats().total, 0);
}

#[tokio::test]
async fn test_probe_trigger_end_to_end() {
    let (mut orchestrator, _temp) = orchestrator_with(Arc::new(UnconfiguredProvider));

    let outcome = orchestrator.process("try an anonymous bind").await;
    assert!(outcome.succeeded);
    assert_eq!(
        outcome.capability_name.as_deref(),
        Some("probe_anonymous_bind")
    );

    // The bundled sample directory leaves anonymous reads open
    let payload = outcome.payload.unwrap();
    assert_eq!(payload["anonymous_reads_allowed"], true);
    assert_eq!(payload["risk"], "high");
}

#[tokio::test]
async fn test_synthesis_registers_catalogs_and_replays() {
    let (mut orchestrator, _temp) = orchestrator_with(Arc::new(ScriptedProvider {
        response: DEPARTMENT_SCRIPT.to_string(),
    }));

    // First pass synthesizes from provider output and runs the new capability
    let first = orchestrator.process("how many departments exist").await;
    assert!(first.succeeded);
    assert_eq!(first.route, Route::Synthesize);
    assert_eq!(first.origin, Some(CapabilityOrigin::Synthesized));
    assert_eq!(first.payload, Some(serde_json::json!("departments found: 4")));

    let name = first.capability_name.clone().unwrap();
    let entry = orchestrator.catalog().get(&name).unwrap().clone();
    assert_eq!(entry.status, EntryStatus::Active);
    assert_eq!(entry.originating_request, "how many departments exist");
    assert!(entry.synthesized_source.contains("get_department_total"));
    assert_eq!(entry.invocation_count, 1);

    // Replay resolves through the learned trigger, no second synthesis
    let second = orchestrator.process("how many departments exist").await;
    assert!(second.succeeded);
    assert_eq!(second.route, Route::Execute);
    assert_eq!(second.capability_name.as_deref(), Some(name.as_str()));
    assert_eq!(orchestrator.catalog().get(&name).unwrap().invocation_count, 2);

    // Audit trail recorded the register and both invocations
    let registers = orchestrator
        .catalog()
        .audit_trail()
        .iter()
        .filter(|r| r.action == AuditAction::Register)
        .count();
    let invokes = orchestrator
        .catalog()
        .audit_trail()
        .iter()
        .filter(|r| r.action == AuditAction::Invoke)
        .count();
    assert_eq!(registers, 1);
    assert_eq!(invokes, 2);
}

#[tokio::test]
async fn test_unconfigured_provider_still_answers() {
    let (mut orchestrator, _temp) = orchestrator_with(Arc::new(UnconfiguredProvider));

    let outcome = orchestrator.process("how many departments exist").await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.route, Route::Synthesize);

    // The deterministic fallback produced a real directory answer
    let text = outcome.payload.unwrap();
    assert!(text.as_str().unwrap().contains("entries visible"));

    let name = outcome.capability_name.unwrap();
    let entry = orchestrator.catalog().get(&name).unwrap();
    assert!(entry.synthesized_source.contains("(objectClass=*)"));
}

#[tokio::test]
async fn test_generic_request_synthesizes_generic_capability() {
    let (mut orchestrator, _temp) = orchestrator_with(Arc::new(UnconfiguredProvider));

    // No directory keyword anywhere, so the category hint stays generic
    let outcome = orchestrator.process("tell me a joke").await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.route, Route::Synthesize);
    assert_eq!(
        outcome.payload,
        Some(serde_json::json!("acknowledged request: tell me a joke"))
    );

    let name = outcome.capability_name.unwrap();
    let entry = orchestrator.catalog().get(&name).unwrap();
    assert_eq!(entry.category, "generic_query");
}

#[tokio::test]
async fn test_reset_clears_state_and_store() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let catalog_path = temp_dir.path().join("catalog.json");
    let catalog = CapabilityCatalog::open(catalog_path.clone());
    let mut orchestrator = Orchestrator::new(
        Arc::new(StaticDirectory::sample()),
        Arc::new(UnconfiguredProvider),
        catalog,
        Duration::from_secs(5),
    );

    orchestrator.process("how many departments exist").await;
    orchestrator.process("tell me a joke").await;
    assert!(catalog_path.exists());

    let report = orchestrator.reset();
    assert_eq!(report.capabilities_removed.len(), 2);
    assert!(report.catalog_cleared);
    assert!(!catalog_path.exists());

    // Builtins survive and the system keeps working
    let outcome = orchestrator.process("list users").await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.origin, Some(CapabilityOrigin::Builtin));

    // A second reset removes nothing new
    let again = orchestrator.reset();
    assert!(again.capabilities_removed.is_empty());
    assert!(again.catalog_cleared);
}

#[tokio::test]
async fn test_restart_restores_synthesized_capabilities() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let catalog_path = temp_dir.path().join("catalog.json");
    let directory: Arc<dyn Directory> = Arc::new(StaticDirectory::sample());

    let name = {
        let catalog = CapabilityCatalog::open(catalog_path.clone());
        let mut orchestrator = Orchestrator::new(
            directory.clone(),
            Arc::new(ScriptedProvider {
                response: DEPARTMENT_SCRIPT.to_string(),
            }),
            catalog,
            Duration::from_secs(5),
        );
        let outcome = orchestrator.process("how many departments exist").await;
        assert!(outcome.succeeded);
        outcome.capability_name.unwrap()
    };

    // Second process lifetime: the provider is gone, yet the capability is
    // restored from its persisted source and replays as execute
    let catalog = CapabilityCatalog::open(catalog_path);
    let mut orchestrator = Orchestrator::new(
        directory,
        Arc::new(UnconfiguredProvider),
        catalog,
        Duration::from_secs(5),
    );

    let outcome = orchestrator.process("how many departments exist").await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.route, Route::Execute);
    assert_eq!(outcome.capability_name.as_deref(), Some(name.as_str()));
    assert_eq!(outcome.payload, Some(serde_json::json!("departments found: 4")));
}

#[tokio::test]
async fn test_live_map_matches_catalog() {
    let (mut orchestrator, _temp) = orchestrator_with(Arc::new(UnconfiguredProvider));

    orchestrator.process("how many departments exist").await;
    orchestrator.process("tell me a joke").await;

    // Every active catalog name must be invokable
    let known = orchestrator.capability_names();
    for name in orchestrator.catalog().active_names() {
        assert!(known.contains(&name), "{} missing from the live map", name);
    }

    // Builtins and probes stay in the live map alongside synthesized names
    assert!(known.contains(&"get_current_user_info".to_string()));
    assert!(known.contains(&"probe_transport_security".to_string()));
}

#[tokio::test]
async fn test_catalog_export_snapshot() {
    let (mut orchestrator, temp) = orchestrator_with(Arc::new(UnconfiguredProvider));

    orchestrator.process("how many departments exist").await;

    let export_path = temp.path().join("export.json");
    assert!(orchestrator.catalog().export(&export_path));

    let raw = std::fs::read_to_string(&export_path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["stats"]["total"], 1);
    assert!(parsed["capabilities"].is_object());
    assert!(parsed["audit"].is_array());
    assert!(parsed["exported_at"].is_string());
}

#[tokio::test]
async fn test_contained_failure_keeps_system_usable() {
    let (mut orchestrator, _temp) = orchestrator_with(Arc::new(UnconfiguredProvider));

    // This builtin needs a department parameter plain dispatch cannot supply
    let failed = orchestrator.process("search users in department").await;
    assert!(!failed.succeeded);
    assert!(failed.error.unwrap().contains("department"));

    let outcome = orchestrator.process("what groups do I belong to").await;
    assert!(outcome.succeeded);
    assert_eq!(outcome.capability_name.as_deref(), Some("get_user_groups"));
}
