//! Synthesis Sandbox
//!
//! Compiles provider-emitted script text into callables whose only reachable
//! effect is the directory client the namespace was seeded with. The script
//! language is line-oriented: zero-argument functions over a fixed primitive
//! set. No filesystem, network, process, loop, or conditional construct is
//! expressible, so compiled scripts terminate and touch nothing ambient.
//!
//! ```text
//! fn get_department_total() {
//!     connect()
//!     rows = search("(objectClass=organizationalUnit)")
//!     total = count(rows)
//!     report("departments found: {total}")
//! }
//! ```

use crate::directory::Directory;
use crate::invoker::{capability, CapabilityFn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Function-name prefixes the call-time scan accepts
pub const APPROVED_PREFIXES: &[&str] = &["get_", "list_", "count_", "fetch_", "find_"];

/// The naming convention a well-formed synthesized entry point follows
pub const NAMING_PREFIX: &str = "get_";

/// Compile-time script rejections
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("no function definition found")]
    NoFunctions,
    #[error("line {line}: malformed statement: {text}")]
    Malformed { line: usize, text: String },
    #[error("line {line}: unknown primitive '{name}'")]
    UnknownPrimitive { line: usize, name: String },
    #[error("unterminated body for function '{0}'")]
    Unterminated(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stmt {
    Connect,
    Search { binding: String, filter: String },
    Lookup { binding: String, username: String },
    GroupsOf { binding: String, username: String },
    Count { binding: String, source: String },
    Report { template: String },
}

/// One compiled zero-argument function
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    pub name: String,
    body: Vec<Stmt>,
}

/// The isolated namespace a script compiles into: nothing but its functions
#[derive(Debug, Clone, Default)]
pub struct SandboxNamespace {
    functions: Vec<CompiledFunction>,
}

impl SandboxNamespace {
    pub fn function_names(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.name.clone()).collect()
    }

    /// First function following the naming convention
    pub fn entry_function(&self) -> Option<&CompiledFunction> {
        self.functions
            .iter()
            .find(|f| f.name.starts_with(NAMING_PREFIX))
    }

    /// First function with any approved verb prefix, in definition order
    pub fn scan_for_callable(&self) -> Option<&CompiledFunction> {
        self.functions
            .iter()
            .find(|f| APPROVED_PREFIXES.iter().any(|p| f.name.starts_with(p)))
    }
}

static FN_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^fn\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(\s*\)\s*\{$").unwrap());

static BIND_STMT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^([A-Za-z_][A-Za-z0-9_]*)\s*=\s*([a-z_][a-z0-9_]*)\s*\(\s*(?:"([^"]*)"|([A-Za-z_][A-Za-z0-9_]*))\s*\)$"#,
    )
    .unwrap()
});

static CALL_STMT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^([a-z_][a-z0-9_]*)\s*\(\s*(?:"([^"]*)")?\s*\)$"#).unwrap());

static TEMPLATE_SLOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*\}").unwrap());

/// Compile script text into an isolated namespace
///
/// Anything the grammar does not recognize is a hard compile error; the
/// caller absorbs those into its fallback path.
pub fn compile(source: &str) -> Result<SandboxNamespace, SandboxError> {
    let mut functions: Vec<CompiledFunction> = Vec::new();
    let mut current: Option<CompiledFunction> = None;

    for (index, raw_line) in source.lines().enumerate() {
        let line = raw_line.trim();
        let line_no = index + 1;

        if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
            continue;
        }

        if let Some(captures) = FN_HEADER.captures(line) {
            if let Some(open) = current.take() {
                return Err(SandboxError::Unterminated(open.name));
            }
            current = Some(CompiledFunction {
                name: captures[1].to_string(),
                body: Vec::new(),
            });
            continue;
        }

        let Some(function) = current.as_mut() else {
            return Err(SandboxError::Malformed {
                line: line_no,
                text: line.to_string(),
            });
        };

        if line == "}" {
            if let Some(done) = current.take() {
                functions.push(done);
            }
            continue;
        }

        let stmt = parse_statement(line, line_no)?;
        function.body.push(stmt);
    }

    if let Some(open) = current {
        return Err(SandboxError::Unterminated(open.name));
    }
    if functions.is_empty() {
        return Err(SandboxError::NoFunctions);
    }

    debug!(
        "Compiled sandbox namespace: {}",
        functions
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(SandboxNamespace { functions })
}

fn parse_statement(line: &str, line_no: usize) -> Result<Stmt, SandboxError> {
    let malformed = || SandboxError::Malformed {
        line: line_no,
        text: line.to_string(),
    };

    if let Some(captures) = BIND_STMT.captures(line) {
        let binding = captures[1].to_string();
        let callee = captures[2].to_string();
        let string_arg = captures.get(3).map(|m| m.as_str().to_string());
        let ident_arg = captures.get(4).map(|m| m.as_str().to_string());

        return match callee.as_str() {
            "search" => string_arg
                .map(|filter| Stmt::Search { binding, filter })
                .ok_or_else(malformed),
            "lookup" => string_arg
                .map(|username| Stmt::Lookup { binding, username })
                .ok_or_else(malformed),
            "groups_of" => string_arg
                .map(|username| Stmt::GroupsOf { binding, username })
                .ok_or_else(malformed),
            "count" => ident_arg
                .map(|source| Stmt::Count { binding, source })
                .ok_or_else(malformed),
            other => Err(SandboxError::UnknownPrimitive {
                line: line_no,
                name: other.to_string(),
            }),
        };
    }

    if let Some(captures) = CALL_STMT.captures(line) {
        let callee = captures[1].to_string();
        let string_arg = captures.get(2).map(|m| m.as_str().to_string());

        return match (callee.as_str(), string_arg) {
            ("connect", None) => Ok(Stmt::Connect),
            ("report", Some(template)) => Ok(Stmt::Report { template }),
            ("connect", Some(_)) | ("report", None) => Err(malformed()),
            // Value-producing primitives must bind their result
            ("search" | "lookup" | "groups_of" | "count", _) => Err(malformed()),
            (other, _) => Err(SandboxError::UnknownPrimitive {
                line: line_no,
                name: other.to_string(),
            }),
        };
    }

    Err(malformed())
}

#[derive(Debug, Clone)]
enum ScriptValue {
    Entries(usize),
    Names(Vec<String>),
    Number(usize),
}

impl ScriptValue {
    fn count(&self) -> usize {
        match self {
            ScriptValue::Entries(n) => *n,
            ScriptValue::Names(names) => names.len(),
            ScriptValue::Number(n) => *n,
        }
    }

    fn render(&self) -> String {
        match self {
            ScriptValue::Entries(n) => format!("{} entries", n),
            ScriptValue::Names(names) if names.is_empty() => "none".to_string(),
            ScriptValue::Names(names) => names.join(", "),
            ScriptValue::Number(n) => n.to_string(),
        }
    }
}

async fn run_function(
    function: &CompiledFunction,
    directory: &dyn Directory,
) -> anyhow::Result<String> {
    let mut bindings: HashMap<String, ScriptValue> = HashMap::new();
    let mut last_binding: Option<String> = None;
    let mut reported: Option<String> = None;

    for stmt in &function.body {
        match stmt {
            Stmt::Connect => directory.connect().await?,
            Stmt::Search { binding, filter } => {
                let entries = directory.search(filter).await?;
                bindings.insert(binding.clone(), ScriptValue::Entries(entries.len()));
                last_binding = Some(binding.clone());
            }
            Stmt::Lookup { binding, username } => {
                let found = directory
                    .lookup_user(username)
                    .await?
                    .map(|u| format!("{} ({})", u.username, u.full_name));
                bindings.insert(
                    binding.clone(),
                    ScriptValue::Names(found.into_iter().collect()),
                );
                last_binding = Some(binding.clone());
            }
            Stmt::GroupsOf { binding, username } => {
                let groups = directory.user_groups(username).await?;
                bindings.insert(binding.clone(), ScriptValue::Names(groups));
                last_binding = Some(binding.clone());
            }
            Stmt::Count { binding, source } => {
                let value = bindings
                    .get(source)
                    .ok_or_else(|| anyhow::anyhow!("unknown binding '{}'", source))?;
                bindings.insert(binding.clone(), ScriptValue::Number(value.count()));
                last_binding = Some(binding.clone());
            }
            Stmt::Report { template } => {
                reported = Some(render_template(template, &bindings)?);
            }
        }
    }

    if let Some(text) = reported {
        return Ok(text);
    }

    // No report statement: render the last binding descriptively
    Ok(match last_binding.and_then(|name| bindings.get(&name).map(|v| (name, v.render()))) {
        Some((name, rendered)) => format!("{}: {}", name, rendered),
        None => "completed".to_string(),
    })
}

fn render_template(
    template: &str,
    bindings: &HashMap<String, ScriptValue>,
) -> anyhow::Result<String> {
    let mut out = String::new();
    let mut last_end = 0;

    for slot in TEMPLATE_SLOT.find_iter(template) {
        let name = &template[slot.start() + 1..slot.end() - 1];
        let value = bindings
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown binding '{}' in report", name))?;
        out.push_str(&template[last_end..slot.start()]);
        out.push_str(&value.render());
        last_end = slot.end();
    }
    out.push_str(&template[last_end..]);
    Ok(out)
}

/// Turn a compiled namespace into a live capability callable
///
/// The entry function is the first one following the naming convention; when
/// none exists, the callable scans the namespace at call time for any
/// approved verb prefix and otherwise answers with a descriptive stand-in.
pub fn callable_for(
    namespace: SandboxNamespace,
    directory: Arc<dyn Directory>,
    request: &str,
) -> CapabilityFn {
    let namespace = Arc::new(namespace);
    let request = request.to_string();

    capability(move |_params| {
        let namespace = namespace.clone();
        let directory = directory.clone();
        let request = request.clone();
        async move {
            let function = namespace
                .entry_function()
                .or_else(|| namespace.scan_for_callable());

            match function {
                Some(function) => {
                    let text = run_function(function, directory.as_ref()).await?;
                    Ok(serde_json::Value::String(text))
                }
                None => Ok(serde_json::Value::String(format!(
                    "synthesized capability registered for: {}",
                    request
                ))),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use serde_json::json;

    const VALID: &str = r#"fn get_department_total() {
    connect()
    rows = search("(objectClass=organizationalUnit)")
    total = count(rows)
    report("departments found: {total}")
}"#;

    #[test]
    fn test_compile_valid() {
        let namespace = compile(VALID).unwrap();
        assert_eq!(namespace.function_names(), vec!["get_department_total"]);
        assert!(namespace.entry_function().is_some());
    }

    #[test]
    fn test_compile_skips_comments_and_blanks() {
        let source = "// provider chatter\n\nfn get_x() {\n    # inline note\n    connect()\n}\n";
        let namespace = compile(source).unwrap();
        assert_eq!(namespace.function_names(), vec!["get_x"]);
    }

    #[test]
    fn test_unknown_primitive_rejected() {
        let source = "fn get_x() {\n    rows = delete_all(\"(objectClass=*)\")\n}";
        assert!(matches!(
            compile(source),
            Err(SandboxError::UnknownPrimitive { name, .. }) if name == "delete_all"
        ));
    }

    #[test]
    fn test_freeform_code_rejected() {
        let source = "fn get_x() {\n    std::fs::read(\"/etc/passwd\")\n}";
        assert!(matches!(compile(source), Err(SandboxError::Malformed { .. })));

        let source = "use std::process::Command;";
        assert!(matches!(compile(source), Err(SandboxError::Malformed { .. })));
    }

    #[test]
    fn test_unbound_value_rejected() {
        let source = "fn get_x() {\n    search(\"(objectClass=*)\")\n}";
        assert!(matches!(compile(source), Err(SandboxError::Malformed { .. })));
    }

    #[test]
    fn test_unterminated_rejected() {
        let source = "fn get_x() {\n    connect()\n";
        assert!(matches!(compile(source), Err(SandboxError::Unterminated(_))));
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(compile(""), Err(SandboxError::NoFunctions)));
        assert!(matches!(compile("// nothing\n"), Err(SandboxError::NoFunctions)));
    }

    #[tokio::test]
    async fn test_run_reports_count() {
        let namespace = compile(VALID).unwrap();
        let directory = Arc::new(StaticDirectory::sample());

        let callable = callable_for(namespace, directory, "how many departments exist");
        let result = callable(json!({})).await.unwrap();
        assert_eq!(result, json!("departments found: 4"));
    }

    #[tokio::test]
    async fn test_run_lookup_and_groups() {
        let source = r#"fn get_akhan_groups() {
    connect()
    person = lookup("akhan")
    memberships = groups_of("akhan")
    report("{person} is in: {memberships}")
}"#;
        let namespace = compile(source).unwrap();
        let directory = Arc::new(StaticDirectory::sample());

        let callable = callable_for(namespace, directory, "groups for akhan");
        let result = callable(json!({})).await.unwrap();
        let text = result.as_str().unwrap();
        assert!(text.contains("akhan (Amara Khan)"));
        assert!(text.contains("admins"));
    }

    #[tokio::test]
    async fn test_unknown_report_binding_fails_at_run() {
        let source = "fn get_x() {\n    report(\"{missing}\")\n}";
        let namespace = compile(source).unwrap();
        let directory = Arc::new(StaticDirectory::sample());

        let callable = callable_for(namespace, directory, "x");
        let result = callable(json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_no_report_renders_last_binding() {
        let source = "fn get_x() {\n    rows = search(\"(objectClass=person)\")\n}";
        let namespace = compile(source).unwrap();
        let directory = Arc::new(StaticDirectory::sample());

        let callable = callable_for(namespace, directory, "x");
        let result = callable(json!({})).await.unwrap();
        assert_eq!(result, json!("rows: 5 entries"));
    }

    #[tokio::test]
    async fn test_wrapper_scans_approved_prefixes() {
        let source = "fn list_everything() {\n    rows = search(\"(objectClass=*)\")\n    total = count(rows)\n    report(\"{total} total\")\n}";
        let namespace = compile(source).unwrap();
        assert!(namespace.entry_function().is_none());

        let directory = Arc::new(StaticDirectory::sample());
        let callable = callable_for(namespace, directory, "list everything");
        let result = callable(json!({})).await.unwrap();
        assert!(result.as_str().unwrap().ends_with("total"));
    }

    #[tokio::test]
    async fn test_standin_when_no_approved_name() {
        let source = "fn mystery() {\n    connect()\n}";
        let namespace = compile(source).unwrap();
        let directory = Arc::new(StaticDirectory::sample());

        let callable = callable_for(namespace, directory, "do something odd");
        let result = callable(json!({})).await.unwrap();
        assert!(result.as_str().unwrap().contains("do something odd"));
    }
}
