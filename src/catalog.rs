//! Capability Catalog
//!
//! Durable registry of synthesized-capability metadata, usage counters, and
//! an append-only audit trail. Persisted as one JSON document; an absent file
//! is an empty catalog, a corrupt file is a logged warning and an empty
//! catalog. Retirement is a soft delete - rows survive for the audit trail
//! and are only physically removed by a full reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lifecycle status of a catalog row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Retired,
}

/// Durable projection of a synthesized capability (no live callable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub originating_request: String,
    pub synthesized_source: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub status: EntryStatus,
    pub invocation_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_invoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retired_at: Option<DateTime<Utc>>,
}

/// Metadata supplied at registration time
#[derive(Debug, Clone)]
pub struct CapabilityMetadata {
    pub originating_request: String,
    pub synthesized_source: String,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Register,
    Retire,
    Invoke,
}

/// Append-only audit record; never mutated, cleared only by full reset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub context: String,
}

/// On-disk document format
#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogDocument {
    capabilities: BTreeMap<String, CatalogEntry>,
    audit: Vec<AuditRecord>,
    updated_at: Option<DateTime<Utc>>,
}

/// Counters over the catalog
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub total: usize,
    pub active: usize,
    pub retired: usize,
    pub total_invocations: u64,
    pub avg_invocations: f64,
}

/// Durable capability registry
pub struct CapabilityCatalog {
    path: PathBuf,
    document: CatalogDocument,
}

impl CapabilityCatalog {
    /// Open the catalog at the given path. Never fails: absent or unreadable
    /// state starts empty.
    pub fn open(path: PathBuf) -> Self {
        let document = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(document) => document,
                Err(e) => {
                    warn!("Catalog at {} is corrupt, starting empty: {}", path.display(), e);
                    CatalogDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CatalogDocument::default(),
            Err(e) => {
                warn!("Catalog at {} is unreadable, starting empty: {}", path.display(), e);
                CatalogDocument::default()
            }
        };

        Self { path, document }
    }

    /// Register a synthesized capability. Replaces an existing row under the
    /// same name (fresh timestamps and counters) and audits the replacement.
    /// Returns false when the durable write fails; in-memory state still
    /// advances.
    pub fn register(&mut self, name: &str, metadata: CapabilityMetadata) -> bool {
        let replaced = self.document.capabilities.contains_key(name);

        let context = if replaced {
            format!("replaced existing entry; request: {}", metadata.originating_request)
        } else {
            format!("request: {}", metadata.originating_request)
        };

        self.document.capabilities.insert(
            name.to_string(),
            CatalogEntry {
                name: name.to_string(),
                originating_request: metadata.originating_request,
                synthesized_source: metadata.synthesized_source,
                category: metadata.category,
                created_at: Utc::now(),
                status: EntryStatus::Active,
                invocation_count: 0,
                last_invoked_at: None,
                retired_at: None,
            },
        );
        self.append_audit(AuditAction::Register, name, context);

        debug!("Cataloged capability '{}' (replaced: {})", name, replaced);
        self.save()
    }

    /// Soft-delete a row, recording why in the audit trail. False for
    /// unknown or already-retired names.
    pub fn retire(&mut self, name: &str, context: &str) -> bool {
        let Some(entry) = self.document.capabilities.get_mut(name) else {
            return false;
        };
        if entry.status == EntryStatus::Retired {
            return false;
        }

        entry.status = EntryStatus::Retired;
        entry.retired_at = Some(Utc::now());
        self.append_audit(AuditAction::Retire, name, context.to_string());

        if !self.save() {
            warn!("Retirement of '{}' not persisted", name);
        }
        true
    }

    /// Bump usage counters. A no-op for names the catalog does not know.
    pub fn record_invocation(&mut self, name: &str) {
        let Some(entry) = self.document.capabilities.get_mut(name) else {
            return;
        };

        entry.invocation_count += 1;
        entry.last_invoked_at = Some(Utc::now());
        self.append_audit(AuditAction::Invoke, name, "invoked".to_string());

        if !self.save() {
            warn!("Invocation of '{}' not persisted", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.document.capabilities.get(name)
    }

    /// Rows, name-ordered, optionally filtered by status
    pub fn list(&self, status: Option<EntryStatus>) -> Vec<&CatalogEntry> {
        self.document
            .capabilities
            .values()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .collect()
    }

    /// Names of active rows
    pub fn active_names(&self) -> Vec<String> {
        self.list(Some(EntryStatus::Active))
            .into_iter()
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn audit_trail(&self) -> &[AuditRecord] {
        &self.document.audit
    }

    pub fn stats(&self) -> CatalogStats {
        let total = self.document.capabilities.len();
        let active = self
            .document
            .capabilities
            .values()
            .filter(|e| e.status == EntryStatus::Active)
            .count();
        let total_invocations: u64 = self
            .document
            .capabilities
            .values()
            .map(|e| e.invocation_count)
            .sum();

        CatalogStats {
            total,
            active,
            retired: total - active,
            total_invocations,
            avg_invocations: if total == 0 {
                0.0
            } else {
                total_invocations as f64 / total as f64
            },
        }
    }

    /// Clear everything and delete the durable store
    pub fn reset_all(&mut self) -> bool {
        self.document = CatalogDocument::default();

        match std::fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Could not delete catalog at {}: {}", self.path.display(), e);
                false
            }
        }
    }

    /// Timestamped snapshot with stats, for operator export
    pub fn export(&self, path: &Path) -> bool {
        #[derive(Serialize)]
        struct ExportDocument<'a> {
            exported_at: DateTime<Utc>,
            stats: CatalogStats,
            capabilities: &'a BTreeMap<String, CatalogEntry>,
            audit: &'a [AuditRecord],
        }

        let export = ExportDocument {
            exported_at: Utc::now(),
            stats: self.stats(),
            capabilities: &self.document.capabilities,
            audit: &self.document.audit,
        };

        let data = match serde_json::to_string_pretty(&export) {
            Ok(data) => data,
            Err(e) => {
                warn!("Catalog export serialization failed: {}", e);
                return false;
            }
        };

        if let Err(e) = std::fs::write(path, data) {
            warn!("Catalog export to {} failed: {}", path.display(), e);
            return false;
        }
        true
    }

    fn append_audit(&mut self, action: AuditAction, name: &str, context: String) {
        self.document.audit.push(AuditRecord {
            action,
            name: name.to_string(),
            timestamp: Utc::now(),
            context,
        });
    }

    /// Persist the full document: pretty JSON, temp file, atomic rename
    fn save(&mut self) -> bool {
        self.document.updated_at = Some(Utc::now());

        let data = match serde_json::to_string_pretty(&self.document) {
            Ok(data) => data,
            Err(e) => {
                warn!("Catalog serialization failed: {}", e);
                return false;
            }
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!("Could not create catalog directory {}: {}", parent.display(), e);
                    return false;
                }
            }
        }

        let temp_path = self.path.with_extension("tmp");
        if let Err(e) = std::fs::write(&temp_path, &data) {
            warn!("Catalog write to {} failed: {}", temp_path.display(), e);
            return false;
        }
        if let Err(e) = std::fs::rename(&temp_path, &self.path) {
            warn!("Catalog rename to {} failed: {}", self.path.display(), e);
            return false;
        }
        true
    }
}
