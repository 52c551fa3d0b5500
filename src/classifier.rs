//! Request Classifier
//!
//! Routes a free-text request to an existing capability or to synthesis.
//! Case-insensitive substring match against an ordered trigger table; first
//! matching row wins by table order. Unmatched input never errors - it
//! degrades to a synthesize route with a category hint.

use crate::outcome::Route;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

// Trigger rows in priority order. Earlier rows win.
static TRIGGER_TABLE: &[(&[&str], &str)] = &[
    (
        &["who am i", "my user info", "current user"],
        "get_current_user_info",
    ),
    (
        &["what groups", "my groups", "groups do i"],
        "get_user_groups",
    ),
    (&["list users", "all users", "every user"], "list_all_users"),
    (
        &["users by department", "search users", "users in department"],
        "search_users_by_department",
    ),
    (
        &["directory structure", "directory layout", "organizational units"],
        "analyze_directory_structure",
    ),
    (
        &["server info", "root dse", "rootdse", "server metadata"],
        "probe_server_info",
    ),
    (
        &["anonymous bind", "anonymous enum", "unauthenticated"],
        "probe_anonymous_bind",
    ),
    (
        &["starttls", "start tls", "tls downgrade", "transport security"],
        "probe_transport_security",
    ),
];

static DIRECTORY_KEYWORDS: &[&str] = &[
    "user",
    "group",
    "department",
    "member",
    "directory",
    "organizational",
    "account",
    "entry",
    "ldap",
];

pub const CATEGORY_DIRECTORY: &str = "directory_query";
pub const CATEGORY_GENERIC: &str = "generic_query";

/// One routing decision
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationDecision {
    pub route: Route,
    pub resolved_name: Option<String>,
    pub category_hint: Option<String>,
    pub request: String,
    pub reasoning: String,
}

/// Request processed end-to-end, with its outcome summary
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedRequest {
    pub request: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

/// Counters over the classifier's histories
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierStats {
    pub decisions: usize,
    pub execute_decisions: usize,
    pub synthesize_decisions: usize,
    pub processed_requests: usize,
    pub learned_names: usize,
}

struct LearnedTrigger {
    trigger: String,
    name: String,
}

/// Trigger-table request classifier with runtime-learned names
#[derive(Default)]
pub struct RequestClassifier {
    learned: Vec<LearnedTrigger>,
    decisions: Vec<ClassificationDecision>,
    processed: Vec<ProcessedRequest>,
}

impl RequestClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a request. Total: unmatched input routes to synthesize.
    pub fn classify(&mut self, request: &str) -> ClassificationDecision {
        let lower = request.to_lowercase();

        let decision = self.resolve(request, &lower);
        debug!(
            "Classified '{}' as {} ({})",
            request,
            decision.route.as_str(),
            decision.reasoning
        );

        self.decisions.push(decision.clone());
        decision
    }

    fn resolve(&self, request: &str, lower: &str) -> ClassificationDecision {
        // 1. Static trigger rows, in table order
        for (triggers, name) in TRIGGER_TABLE {
            if let Some(matched) = triggers.iter().find(|t| lower.contains(*t)) {
                return ClassificationDecision {
                    route: Route::Execute,
                    resolved_name: Some(name.to_string()),
                    category_hint: None,
                    request: request.to_string(),
                    reasoning: format!("trigger '{}'", matched),
                };
            }
        }

        // 2. Names learned from earlier syntheses, in learn order
        for learned in &self.learned {
            if lower.contains(&learned.trigger) {
                return ClassificationDecision {
                    route: Route::Execute,
                    resolved_name: Some(learned.name.clone()),
                    category_hint: None,
                    request: request.to_string(),
                    reasoning: format!("learned trigger '{}'", learned.trigger),
                };
            }
        }

        // 3. Fall back to synthesis with a category hint
        let category = categorize(lower);
        ClassificationDecision {
            route: Route::Synthesize,
            resolved_name: None,
            category_hint: Some(category.to_string()),
            request: request.to_string(),
            reasoning: "no trigger matched".to_string(),
        }
    }

    /// Teach the classifier a synthesized capability: the name itself and the
    /// originating request both become triggers.
    pub fn learn(&mut self, name: &str, originating_request: &str) {
        let mut triggers = vec![name.to_lowercase()];
        let request_trigger = originating_request.trim().to_lowercase();
        if !request_trigger.is_empty() && request_trigger != triggers[0] {
            triggers.push(request_trigger);
        }

        for trigger in triggers {
            let already = self
                .learned
                .iter()
                .any(|l| l.trigger == trigger && l.name == name);
            if !already {
                self.learned.push(LearnedTrigger {
                    trigger,
                    name: name.to_string(),
                });
            }
        }
    }

    /// Append a processed-request record with its outcome summary
    pub fn record_processed(&mut self, request: &str, summary: &str) {
        self.processed.push(ProcessedRequest {
            request: request.to_string(),
            summary: summary.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn learned_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.learned.iter().map(|l| l.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn decisions(&self) -> &[ClassificationDecision] {
        &self.decisions
    }

    pub fn processed(&self) -> &[ProcessedRequest] {
        &self.processed
    }

    pub fn stats(&self) -> ClassifierStats {
        let execute = self
            .decisions
            .iter()
            .filter(|d| d.route == Route::Execute)
            .count();
        ClassifierStats {
            decisions: self.decisions.len(),
            execute_decisions: execute,
            synthesize_decisions: self.decisions.len() - execute,
            processed_requests: self.processed.len(),
            learned_names: self.learned_names().len(),
        }
    }

    /// Drop every learned trigger, leaving the static table intact
    pub fn forget_learned(&mut self) -> usize {
        let forgotten = self.learned_names().len();
        self.learned.clear();
        forgotten
    }

    /// Drop both append-only histories (full-system reset only)
    pub fn clear_history(&mut self) {
        self.decisions.clear();
        self.processed.clear();
    }
}

/// Coarse category bucket for unmatched requests
fn categorize(lower: &str) -> &'static str {
    if DIRECTORY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        CATEGORY_DIRECTORY
    } else {
        CATEGORY_GENERIC
    }
}
