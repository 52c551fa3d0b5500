//! Builtin Capabilities
//!
//! The capability set present at startup: local identity plus the
//! directory-query tools. Each builtin closes over the shared directory
//! client and returns a JSON payload.

use crate::directory::Directory;
use crate::invoker::{capability, CapabilityFn, CapabilityInvoker};
use serde_json::json;
use std::sync::Arc;

/// Install every builtin into the invoker
pub fn install(invoker: &mut CapabilityInvoker, directory: Arc<dyn Directory>) {
    invoker.add_builtin("get_current_user_info", current_user_info(directory.clone()));
    invoker.add_builtin("get_user_groups", user_groups(directory.clone()));
    invoker.add_builtin("list_all_users", list_all_users(directory.clone()));
    invoker.add_builtin(
        "search_users_by_department",
        search_users_by_department(directory.clone()),
    );
    invoker.add_builtin("analyze_directory_structure", directory_structure(directory));
}

/// Username of the invoking operator, from the environment
fn current_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn requested_username(params: &serde_json::Value) -> String {
    params
        .get("username")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(current_username)
}

/// Local identity enriched with the matching directory record, if any
fn current_user_info(directory: Arc<dyn Directory>) -> CapabilityFn {
    capability(move |params| {
        let directory = directory.clone();
        async move {
            let username = requested_username(&params);

            let record = directory.lookup_user(&username).await?;
            let groups = directory.user_groups(&username).await?;

            let home_dir = dirs::home_dir().map(|p| p.display().to_string());

            Ok(json!({
                "username": username,
                "home_dir": home_dir,
                "os": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
                "directory_record": record,
                "groups": groups,
            }))
        }
    })
}

fn user_groups(directory: Arc<dyn Directory>) -> CapabilityFn {
    capability(move |params| {
        let directory = directory.clone();
        async move {
            let username = requested_username(&params);
            let groups = directory.user_groups(&username).await?;

            Ok(json!({
                "username": username,
                "total_groups": groups.len(),
                "groups": groups,
            }))
        }
    })
}

fn list_all_users(directory: Arc<dyn Directory>) -> CapabilityFn {
    capability(move |_params| {
        let directory = directory.clone();
        async move {
            let users = directory.list_users().await?;

            let mut departments: Vec<String> =
                users.iter().map(|u| u.department.clone()).collect();
            departments.sort();
            departments.dedup();

            Ok(json!({
                "total_users": users.len(),
                "departments": departments,
                "users": users,
            }))
        }
    })
}

fn search_users_by_department(directory: Arc<dyn Directory>) -> CapabilityFn {
    capability(move |params| {
        let directory = directory.clone();
        async move {
            let department = params
                .get("department")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("missing required parameter 'department'"))?
                .to_string();

            let users = directory.list_users().await?;
            let matches: Vec<_> = users
                .into_iter()
                .filter(|u| u.department.eq_ignore_ascii_case(&department))
                .collect();

            Ok(json!({
                "department": department,
                "total_matches": matches.len(),
                "users": matches,
            }))
        }
    })
}

fn directory_structure(directory: Arc<dyn Directory>) -> CapabilityFn {
    capability(move |_params| {
        let directory = directory.clone();
        async move {
            let structure = directory.structure().await?;
            Ok(serde_json::to_value(structure)?)
        }
    })
}
