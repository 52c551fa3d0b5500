//! Code extraction from provider responses
//!
//! Provider output is untrusted free-form text that may bury the function
//! definition in prose. Layered search: tagged fence, bare fence, then a raw
//! function-signature pattern. First non-empty match wins.

use once_cell::sync::Lazy;
use regex::Regex;

static TAGGED_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[a-zA-Z0-9_+-]+[ \t]*\n(.*?)```").unwrap());

static BARE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```[ \t]*\n(.*?)```").unwrap());

// Line-oriented body: matches up to a closing brace at the start of a line
static RAW_FUNCTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?ms)^[ \t]*fn\s+[A-Za-z_][A-Za-z0-9_]*\s*\(\s*\)\s*\{.*?^[ \t]*\}").unwrap());

/// Pull the most plausible function definition out of a free-form response
pub fn extract_function(response: &str) -> Option<String> {
    if let Some(captures) = TAGGED_FENCE.captures(response) {
        let code = captures[1].trim();
        if !code.is_empty() {
            return Some(code.to_string());
        }
    }

    if let Some(captures) = BARE_FENCE.captures(response) {
        let code = captures[1].trim();
        if !code.is_empty() {
            return Some(code.to_string());
        }
    }

    RAW_FUNCTION
        .find(response)
        .map(|m| m.as_str().trim().to_string())
}
