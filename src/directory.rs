//! Directory Client
//!
//! Abstract identity/organization data source probed by the assessment
//! capabilities. Protocol-neutral by design: the trait models the operations
//! the capabilities need, not any concrete wire protocol.
//!
//! Two implementations:
//! - `HttpDirectory`: JSON REST client for a live directory API
//! - `StaticDirectory`: in-memory snapshot for offline runs and tests

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Directory access errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),
    #[error("Anonymous access rejected")]
    AnonymousRejected,
}

/// A user known to the directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub title: String,
    pub department: String,
}

/// A group known to the directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
}

/// A raw directory entry with free-form multi-valued attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl DirectoryEntry {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute append
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes
            .entry(key.to_string())
            .or_default()
            .push(value.into());
        self
    }

    /// Whether the entry carries the given objectClass value
    pub fn has_class(&self, class: &str) -> bool {
        self.matches("objectClass", Some(class))
    }

    fn matches(&self, attr: &str, value: Option<&str>) -> bool {
        let Some(values) = self.attributes.get(attr) else {
            return false;
        };
        match value {
            // Presence filter: (attr=*)
            None => true,
            Some(v) => values.iter().any(|have| have.eq_ignore_ascii_case(v)),
        }
    }
}

/// Server metadata exposed by the directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub vendor: String,
    pub version: String,
    pub root_context: String,
    pub naming_contexts: Vec<String>,
    pub supports_secure_transport: bool,
    pub accepts_plain_transport: bool,
    pub allows_anonymous_reads: bool,
}

/// Organizational layout summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryStructure {
    pub root_context: String,
    pub organizational_units: Vec<OrgUnit>,
    pub total_users: usize,
    pub total_groups: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgUnit {
    pub name: String,
    pub entry_count: usize,
}

/// Abstract directory client
///
/// The single approved external primitive inside the synthesis sandbox.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Verify the directory is reachable
    async fn connect(&self) -> Result<(), DirectoryError>;

    /// Server metadata (vendor, contexts, transport posture)
    async fn server_info(&self) -> Result<ServerInfo, DirectoryError>;

    /// Authenticated search with a single-clause `(attr=value)` filter
    async fn search(&self, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Same search without credentials (exposure probing)
    async fn anonymous_search(&self, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Single user by username
    async fn lookup_user(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError>;

    /// Group names the user is a member of
    async fn user_groups(&self, username: &str) -> Result<Vec<String>, DirectoryError>;

    async fn list_users(&self) -> Result<Vec<UserRecord>, DirectoryError>;

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, DirectoryError>;

    /// Organizational layout summary
    async fn structure(&self) -> Result<DirectoryStructure, DirectoryError>;
}

static FILTER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(([A-Za-z][A-Za-z0-9_-]*)=([^()]*)\)$").unwrap());

/// Parse a single-clause filter into (attribute, value), value `None` for `*`
pub fn parse_filter(filter: &str) -> Result<(String, Option<String>), DirectoryError> {
    let captures = FILTER_PATTERN
        .captures(filter.trim())
        .ok_or_else(|| DirectoryError::UnsupportedFilter(filter.to_string()))?;

    let attr = captures[1].to_string();
    let value = match &captures[2] {
        "*" => None,
        v => Some(v.to_string()),
    };
    Ok((attr, value))
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// JSON REST directory client
///
/// Endpoint layout under the base URL: `/ping`, `/server-info`, `/search`,
/// `/users`, `/users/{name}`, `/users/{name}/groups`, `/groups`, `/structure`.
#[derive(Clone)]
pub struct HttpDirectory {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDirectory {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(|s| s.to_string()),
        }
    }

    fn request(&self, path: &str, authed: bool) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(format!("{}/{}", self.base_url, path));
        if authed {
            if let Some(token) = &self.token {
                builder = builder.bearer_auth(token);
            }
        }
        builder
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        authed: bool,
    ) -> Result<T, DirectoryError> {
        debug!("Directory GET /{}", path);

        let response = self.request(path, authed).query(query).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED && !authed {
            return Err(DirectoryError::AnonymousRejected);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DirectoryError::Connection(format!(
                "directory API error {}: {}",
                status, text
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Directory for HttpDirectory {
    async fn connect(&self) -> Result<(), DirectoryError> {
        let _: serde_json::Value = self.get_json("ping", &[], true).await?;
        Ok(())
    }

    async fn server_info(&self) -> Result<ServerInfo, DirectoryError> {
        self.get_json("server-info", &[], true).await
    }

    async fn search(&self, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.get_json("search", &[("filter", filter)], true).await
    }

    async fn anonymous_search(&self, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.get_json("search", &[("filter", filter)], false).await
    }

    async fn lookup_user(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        match self
            .get_json(&format!("users/{}", username), &[], true)
            .await
        {
            Ok(user) => Ok(Some(user)),
            Err(DirectoryError::Connection(msg)) if msg.contains("404") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn user_groups(&self, username: &str) -> Result<Vec<String>, DirectoryError> {
        self.get_json(&format!("users/{}/groups", username), &[], true)
            .await
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, DirectoryError> {
        self.get_json("users", &[], true).await
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, DirectoryError> {
        self.get_json("groups", &[], true).await
    }

    async fn structure(&self) -> Result<DirectoryStructure, DirectoryError> {
        self.get_json("structure", &[], true).await
    }
}

// ---------------------------------------------------------------------------
// Snapshot implementation
// ---------------------------------------------------------------------------

/// Serializable snapshot of a directory's contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub server: ServerInfo,
    pub users: Vec<UserRecord>,
    pub groups: Vec<GroupRecord>,
    #[serde(default)]
    pub entries: Vec<DirectoryEntry>,
}

/// In-memory directory backed by a snapshot
pub struct StaticDirectory {
    snapshot: DirectorySnapshot,
}

impl StaticDirectory {
    pub fn new(snapshot: DirectorySnapshot) -> Self {
        Self { snapshot }
    }

    /// Load a snapshot file (JSON)
    pub fn from_file(path: &Path) -> Result<Self, DirectoryError> {
        let data = std::fs::read_to_string(path)?;
        let snapshot: DirectorySnapshot = serde_json::from_str(&data)?;
        Ok(Self::new(snapshot))
    }

    /// Small built-in snapshot for offline operation
    pub fn sample() -> Self {
        let server = ServerInfo {
            vendor: "Exemplar Directory Server".to_string(),
            version: "4.2.1".to_string(),
            root_context: "dc=example,dc=org".to_string(),
            naming_contexts: vec!["dc=example,dc=org".to_string()],
            supports_secure_transport: true,
            accepts_plain_transport: true,
            allows_anonymous_reads: true,
        };

        let users = vec![
            user("akhan", "Amara Khan", "Platform Engineer", "engineering"),
            user("bliu", "Bo Liu", "Site Reliability Engineer", "engineering"),
            user("cdiaz", "Carla Diaz", "Account Executive", "sales"),
            user("dmorris", "Dana Morris", "People Operations Lead", "hr"),
            user("efalk", "Erik Falk", "Financial Analyst", "finance"),
        ];

        let groups = vec![
            group("admins", "Directory administrators", &["akhan"]),
            group("engineering", "Engineering staff", &["akhan", "bliu"]),
            group("sales", "Sales staff", &["cdiaz"]),
            group("hr-staff", "People operations", &["dmorris"]),
            group("finance", "Finance staff", &["efalk"]),
            group("vpn-users", "Remote access", &["akhan", "bliu", "cdiaz"]),
        ];

        Self::new(DirectorySnapshot {
            server,
            users,
            groups,
            entries: Vec::new(),
        })
    }

    /// All entries visible to a search, derived from the snapshot
    fn entries(&self) -> Vec<DirectoryEntry> {
        let root = &self.snapshot.server.root_context;
        let mut entries = Vec::new();

        let mut departments: Vec<&str> = self
            .snapshot
            .users
            .iter()
            .map(|u| u.department.as_str())
            .collect();
        departments.sort_unstable();
        departments.dedup();

        for dept in &departments {
            let entry_count = self
                .snapshot
                .users
                .iter()
                .filter(|u| u.department == *dept)
                .count();
            entries.push(
                DirectoryEntry::new(format!("ou={},{}", dept, root))
                    .with("objectClass", "organizationalUnit")
                    .with("ou", *dept)
                    .with("entryCount", entry_count.to_string()),
            );
        }

        for user in &self.snapshot.users {
            entries.push(
                DirectoryEntry::new(format!("uid={},ou={},{}", user.username, user.department, root))
                    .with("objectClass", "person")
                    .with("objectClass", "inetOrgPerson")
                    .with("uid", &user.username)
                    .with("cn", &user.full_name)
                    .with("mail", &user.email)
                    .with("title", &user.title)
                    .with("department", &user.department),
            );
        }

        for group in &self.snapshot.groups {
            let mut entry = DirectoryEntry::new(format!("cn={},ou=groups,{}", group.name, root))
                .with("objectClass", "groupOfNames")
                .with("cn", &group.name)
                .with("description", &group.description);
            for member in &group.members {
                entry = entry.with("member", member);
            }
            entries.push(entry);
        }

        entries.extend(self.snapshot.entries.iter().cloned());
        entries
    }
}

fn user(username: &str, full_name: &str, title: &str, department: &str) -> UserRecord {
    UserRecord {
        username: username.to_string(),
        full_name: full_name.to_string(),
        email: format!("{}@example.org", username),
        title: title.to_string(),
        department: department.to_string(),
    }
}

fn group(name: &str, description: &str, members: &[&str]) -> GroupRecord {
    GroupRecord {
        name: name.to_string(),
        description: description.to_string(),
        members: members.iter().map(|s| s.to_string()).collect(),
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn connect(&self) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn server_info(&self) -> Result<ServerInfo, DirectoryError> {
        Ok(self.snapshot.server.clone())
    }

    async fn search(&self, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let (attr, value) = parse_filter(filter)?;
        Ok(self
            .entries()
            .into_iter()
            .filter(|e| e.matches(&attr, value.as_deref()))
            .collect())
    }

    async fn anonymous_search(&self, filter: &str) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        if !self.snapshot.server.allows_anonymous_reads {
            return Err(DirectoryError::AnonymousRejected);
        }
        self.search(filter).await
    }

    async fn lookup_user(&self, username: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self
            .snapshot
            .users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn user_groups(&self, username: &str) -> Result<Vec<String>, DirectoryError> {
        Ok(self
            .snapshot
            .groups
            .iter()
            .filter(|g| g.members.iter().any(|m| m.eq_ignore_ascii_case(username)))
            .map(|g| g.name.clone())
            .collect())
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, DirectoryError> {
        Ok(self.snapshot.users.clone())
    }

    async fn list_groups(&self) -> Result<Vec<GroupRecord>, DirectoryError> {
        Ok(self.snapshot.groups.clone())
    }

    async fn structure(&self) -> Result<DirectoryStructure, DirectoryError> {
        let mut units: BTreeMap<String, usize> = BTreeMap::new();
        for user in &self.snapshot.users {
            *units.entry(user.department.clone()).or_default() += 1;
        }

        Ok(DirectoryStructure {
            root_context: self.snapshot.server.root_context.clone(),
            organizational_units: units
                .into_iter()
                .map(|(name, entry_count)| OrgUnit { name, entry_count })
                .collect(),
            total_users: self.snapshot.users.len(),
            total_groups: self.snapshot.groups.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            parse_filter("(uid=akhan)").unwrap(),
            ("uid".to_string(), Some("akhan".to_string()))
        );
        assert_eq!(
            parse_filter("(objectClass=*)").unwrap(),
            ("objectClass".to_string(), None)
        );
        assert!(parse_filter("(&(uid=a)(cn=b))").is_err());
        assert!(parse_filter("uid=akhan").is_err());
    }

    #[tokio::test]
    async fn test_search_by_object_class() {
        let dir = StaticDirectory::sample();

        let people = dir.search("(objectClass=person)").await.unwrap();
        assert_eq!(people.len(), 5);

        let units = dir.search("(objectClass=organizationalUnit)").await.unwrap();
        assert_eq!(units.len(), 4); // engineering, sales, hr, finance

        let everything = dir.search("(objectClass=*)").await.unwrap();
        assert!(everything.len() > people.len());
    }

    #[tokio::test]
    async fn test_user_groups() {
        let dir = StaticDirectory::sample();

        let groups = dir.user_groups("akhan").await.unwrap();
        assert!(groups.contains(&"admins".to_string()));
        assert!(groups.contains(&"engineering".to_string()));

        let none = dir.user_groups("nobody").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_rejected() {
        let mut sample = StaticDirectory::sample();
        sample.snapshot.server.allows_anonymous_reads = false;

        let result = sample.anonymous_search("(objectClass=*)").await;
        assert!(matches!(result, Err(DirectoryError::AnonymousRejected)));
    }

    #[tokio::test]
    async fn test_structure() {
        let dir = StaticDirectory::sample();
        let structure = dir.structure().await.unwrap();

        assert_eq!(structure.total_users, 5);
        assert_eq!(structure.organizational_units.len(), 4);
        assert_eq!(structure.root_context, "dc=example,dc=org");
    }
}
