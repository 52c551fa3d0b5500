//! Code Synthesizer
//!
//! Turns a request plus category hint into a new capability callable:
//! prompt → provider (bounded by a timeout) → layered extraction → sandbox
//! compile → callable. Every failure along the way degrades to a
//! deterministic fallback script for the category, so synthesis as observed
//! by callers never fails outright.
//!
//! Names are content-derived: identical request text always yields the
//! identical capability name.

pub mod extract;
pub mod provider;
pub mod sandbox;

pub use provider::{HttpSynthesisProvider, ProviderError, SynthesisProvider};
pub use sandbox::{SandboxError, SandboxNamespace};

use crate::classifier::CATEGORY_DIRECTORY;
use crate::directory::Directory;
use crate::invoker::{capability, CapabilityFn};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

// Filler words skipped when deriving a name stem
static STOP_WORDS: &[&str] = &[
    "the", "a", "an", "of", "in", "on", "at", "for", "to", "and", "or", "is",
    "are", "am", "do", "does", "did", "how", "what", "who", "which", "many",
    "there", "me", "my", "i", "we", "you", "please", "can", "could",
];

/// A freshly synthesized capability
pub struct Synthesized {
    pub name: String,
    pub callable: CapabilityFn,
    pub source: String,
    pub category: String,
    pub used_fallback: bool,
}

/// Request-to-capability synthesizer
pub struct Synthesizer {
    provider: Arc<dyn SynthesisProvider>,
    directory: Arc<dyn Directory>,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(
        provider: Arc<dyn SynthesisProvider>,
        directory: Arc<dyn Directory>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            directory,
            timeout,
        }
    }

    /// Synthesize a callable for the request. Total: provider, extraction,
    /// and compile failures all degrade to the category fallback.
    pub async fn synthesize(&self, request: &str, category: &str) -> Synthesized {
        let name = derive_name(request);

        match self.attempt_provider(request, category).await {
            Ok((source, namespace)) => {
                if namespace.entry_function().is_none() {
                    warn!(
                        "Synthesized code for '{}' ignores the {} naming convention, relying on namespace scan",
                        name,
                        sandbox::NAMING_PREFIX
                    );
                }
                info!("Synthesized capability '{}' from provider output", name);

                let callable = sandbox::callable_for(namespace, self.directory.clone(), request);
                Synthesized {
                    name,
                    callable,
                    source,
                    category: category.to_string(),
                    used_fallback: false,
                }
            }
            Err(e) => {
                warn!("Provider synthesis for '{}' failed ({:#}), using {} fallback", name, e, category);

                let (source, callable) = self.fallback(request, category);
                Synthesized {
                    name,
                    callable,
                    source,
                    category: category.to_string(),
                    used_fallback: true,
                }
            }
        }
    }

    async fn attempt_provider(
        &self,
        request: &str,
        category: &str,
    ) -> Result<(String, SandboxNamespace)> {
        let prompt = build_prompt(request, category);

        let response = tokio::time::timeout(self.timeout, self.provider.generate(&prompt))
            .await
            .map_err(|_| anyhow::anyhow!("provider timed out after {:?}", self.timeout))?
            .context("provider call failed")?;

        let code = extract::extract_function(&response)
            .context("no function definition found in provider response")?;

        let namespace = sandbox::compile(&code).context("sandbox rejected provider code")?;

        Ok((code, namespace))
    }

    /// Deterministic hand-written fallback for the category
    fn fallback(&self, request: &str, category: &str) -> (String, CapabilityFn) {
        let source = fallback_source(request, category);

        match sandbox::compile(&source) {
            Ok(namespace) => {
                let callable = sandbox::callable_for(namespace, self.directory.clone(), request);
                (source, callable)
            }
            Err(e) => {
                // The fallback scripts are fixed templates; reaching this
                // means the sanitizer let a hostile request through.
                error!("Fallback script failed to compile: {}", e);
                let text = format!("acknowledged request: {}", request);
                let callable = capability(move |_params| {
                    let text = text.clone();
                    async move { Ok(serde_json::Value::String(text)) }
                });
                (source, callable)
            }
        }
    }
}

/// Derive the capability name: `get_<stem>_<hash8>`
///
/// The stem is up to three significant lowercased words of the request, the
/// suffix the first 8 hex chars of the request's SHA-256. Stable by
/// construction: replaying identical text yields the identical name.
pub fn derive_name(request: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let words = significant_words(request);
    let stem = if words.is_empty() {
        "request".to_string()
    } else {
        words.join("_")
    };

    format!("get_{}_{}", stem, &digest[..8])
}

fn significant_words(request: &str) -> Vec<String> {
    request
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(w))
        .take(3)
        .map(|w| w.to_string())
        .collect()
}

fn build_prompt(request: &str, category: &str) -> String {
    if category == CATEGORY_DIRECTORY {
        format!(
            r#"Write one capability function answering this directory request:

{request}

Answer with a single fenced code block containing exactly one zero-argument
function in this restricted form:

fn get_meaningful_name() {{
    connect()
    rows = search("(objectClass=person)")
    total = count(rows)
    report("found {{total}} matching entries")
}}

Rules:
- the function name must start with get_
- only these primitives exist:
  connect() opens the directory session
  rows = search("(attribute=value)") runs a single-clause directory search
  entry = lookup("username") finds one user
  names = groups_of("username") lists a user's group names
  n = count(binding) counts the items in a binding
  report("text with {{binding}} slots") produces the final answer
- no other calls, imports, loops, or conditionals"#
        )
    } else {
        format!(
            r#"Write one capability function answering this request:

{request}

Answer with a single fenced code block containing exactly one zero-argument
function named with a get_ prefix. The only available primitive is
report("..."), which produces the final answer text, so respond with a
single short report statement:

fn get_meaningful_name() {{
    report("a short factual answer")
}}"#
        )
    }
}

/// Strip characters that would break a script string literal or template
fn sanitize_for_script(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| !matches!(c, '"' | '{' | '}'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn fallback_source(request: &str, category: &str) -> String {
    let safe = sanitize_for_script(request);

    if category == CATEGORY_DIRECTORY {
        format!(
            "fn get_directory_fallback() {{\n    connect()\n    rows = search(\"(objectClass=*)\")\n    total = count(rows)\n    report(\"best-effort directory scan for '{}': {{total}} entries visible\")\n}}\n",
            safe
        )
    } else {
        format!(
            "fn get_generic_fallback() {{\n    report(\"acknowledged request: {}\")\n}}\n",
            safe
        )
    }
}
