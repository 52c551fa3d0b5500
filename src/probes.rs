//! Assessment Probes
//!
//! Read-only posture checks against the directory: metadata disclosure,
//! unauthenticated read exposure, and transport downgrade. Findings are
//! coarse labels, not a scoring engine.

use crate::directory::{Directory, DirectoryError};
use crate::invoker::{capability, CapabilityFn, CapabilityInvoker};
use serde_json::json;
use std::sync::Arc;

/// Install every probe into the invoker
pub fn install(invoker: &mut CapabilityInvoker, directory: Arc<dyn Directory>) {
    invoker.add_builtin("probe_server_info", server_info_probe(directory.clone()));
    invoker.add_builtin("probe_anonymous_bind", anonymous_bind_probe(directory.clone()));
    invoker.add_builtin("probe_transport_security", transport_probe(directory));
}

/// What the server discloses about itself before any privileged access
fn server_info_probe(directory: Arc<dyn Directory>) -> CapabilityFn {
    capability(move |_params| {
        let directory = directory.clone();
        async move {
            let info = directory.server_info().await?;

            let mut findings = vec![format!(
                "server identifies as {} {}",
                info.vendor, info.version
            )];
            if !info.naming_contexts.is_empty() {
                findings.push(format!(
                    "naming contexts disclosed: {}",
                    info.naming_contexts.join(", ")
                ));
            }
            if info.allows_anonymous_reads {
                findings.push("metadata readable without authentication".to_string());
            }

            let risk = if info.allows_anonymous_reads { "medium" } else { "low" };

            Ok(json!({
                "server": info,
                "findings": findings,
                "risk": risk,
            }))
        }
    })
}

/// How much an unauthenticated session can read
fn anonymous_bind_probe(directory: Arc<dyn Directory>) -> CapabilityFn {
    capability(move |_params| {
        let directory = directory.clone();
        async move {
            match directory.anonymous_search("(objectClass=*)").await {
                Ok(entries) => {
                    let users = entries.iter().filter(|e| e.has_class("person")).count();
                    let groups = entries
                        .iter()
                        .filter(|e| e.has_class("groupOfNames"))
                        .count();

                    let risk = if users > 0 { "high" } else { "medium" };

                    Ok(json!({
                        "anonymous_reads_allowed": true,
                        "visible_entries": entries.len(),
                        "visible_users": users,
                        "visible_groups": groups,
                        "findings": [
                            format!("{} entries readable without credentials", entries.len()),
                        ],
                        "risk": risk,
                    }))
                }
                Err(DirectoryError::AnonymousRejected) => Ok(json!({
                    "anonymous_reads_allowed": false,
                    "visible_entries": 0,
                    "findings": ["anonymous reads rejected by the server"],
                    "risk": "low",
                })),
                Err(e) => Err(e.into()),
            }
        }
    })
}

/// Whether a client can be held on (or downgraded to) a plaintext channel
fn transport_probe(directory: Arc<dyn Directory>) -> CapabilityFn {
    capability(move |_params| {
        let directory = directory.clone();
        async move {
            let info = directory.server_info().await?;

            let plaintext_only = info.accepts_plain_transport && !info.supports_secure_transport;
            let downgrade_possible = info.accepts_plain_transport && info.supports_secure_transport;

            let mut findings = Vec::new();
            if plaintext_only {
                findings.push("server offers no secure transport".to_string());
            }
            if downgrade_possible {
                findings.push(
                    "plaintext sessions accepted even though secure transport exists".to_string(),
                );
            }
            if !info.accepts_plain_transport {
                findings.push("plaintext sessions rejected".to_string());
            }

            let risk = if plaintext_only {
                "high"
            } else if downgrade_possible {
                "medium"
            } else {
                "low"
            };

            Ok(json!({
                "accepts_plain_transport": info.accepts_plain_transport,
                "supports_secure_transport": info.supports_secure_transport,
                "downgrade_possible": downgrade_possible,
                "findings": findings,
                "risk": risk,
            }))
        }
    })
}
