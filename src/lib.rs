//! CapForge
//!
//! Self-expanding request-dispatch core for a directory security assistant.
//!
//! # Features
//!
//! - **Request Classification**: ordered trigger table with runtime-learned names
//! - **Capability Invocation**: builtin and synthesized callables behind one live map
//! - **Code Synthesis**: provider-backed generation with a deterministic fallback
//! - **Sandboxed Compilation**: restricted script language, fixed primitive set
//! - **Durable Catalog**: JSON document with soft-delete and an append-only audit trail
//! - **Directory Probes**: server metadata, anonymous-bind, and transport checks
//!
//! # Architecture
//!
//! ```text
//! Request ──► Classifier ──► Invoker ──► Outcome
//!                │ (no match)    ▲
//!                ▼               │ register
//!            Synthesizer ────────┤
//!                │               │ learn / audit
//!                ▼               ▼
//!             Sandbox         Catalog (JSON)
//! ```

pub mod builtins;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod directory;
pub mod invoker;
pub mod orchestrator;
pub mod outcome;
pub mod probes;
pub mod synthesis;

pub use catalog::{CapabilityCatalog, CapabilityMetadata, CatalogEntry, EntryStatus};
pub use classifier::{ClassificationDecision, RequestClassifier};
pub use config::Config;
pub use directory::{Directory, DirectoryError, HttpDirectory, StaticDirectory};
pub use invoker::{capability, CapabilityFn, CapabilityInvoker};
pub use orchestrator::{is_reset_phrase, Orchestrator, ResetReport, SystemState, SystemStats};
pub use outcome::{CapabilityOrigin, Outcome, Route};
pub use synthesis::{HttpSynthesisProvider, SynthesisProvider, Synthesizer};
