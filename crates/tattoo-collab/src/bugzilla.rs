//! The upstream bug-tracker client.
//!
//! Concrete implementation talks to a Bugzilla instance's REST API
//! (`/rest/bug`), using the `ARCHTESTER_BUGZILLA_APIKEY` environment
//! variable and a `bugs.key` file fallback, matching the original
//! collaborator's API key resolution order.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tattoo_core::{Bug, BugCategory, RuntimeTesting};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BugzillaError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no API key available (set ARCHTESTER_BUGZILLA_APIKEY or write bugs.key)")]
    NoApiKey,
}

/// Operations the core touches on the bug tracker.
#[async_trait]
pub trait BugTracker: Send + Sync {
    /// Fetch bugs from `ids` (or, if empty, every open bug) constrained to
    /// unresolved, sanity-checked, and cc'ing at least one of `cc_arches`.
    async fn find_bugs(
        &self,
        ids: &[u32],
        cc_arches: &[String],
    ) -> Result<HashMap<u32, Bug>, BugzillaError>;

    /// Fetch bugs by id with no other filter.
    async fn fetch_by_ids(&self, ids: &[u32]) -> Result<HashMap<u32, Bug>, BugzillaError>;

    /// Close `id` with `comment`.
    async fn resolve(&self, id: u32, comment: &str) -> Result<(), BugzillaError>;

    /// Remove `arches` from `id`'s cc list.
    async fn uncc(&self, id: u32, arches: &[String]) -> Result<(), BugzillaError>;
}

/// Resolve the API key: `ARCHTESTER_BUGZILLA_APIKEY`, falling back to a
/// local `bugs.key` file on read paths.
pub fn resolve_api_key() -> Option<String> {
    if let Ok(key) = std::env::var("ARCHTESTER_BUGZILLA_APIKEY") {
        if !key.is_empty() {
            return Some(key);
        }
    }
    std::fs::read_to_string(Path::new("bugs.key"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub struct BugzillaClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl BugzillaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        BugzillaClient {
            base_url: base_url.into(),
            api_key: resolve_api_key(),
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BugsResponse {
    bugs: Vec<RawBug>,
}

#[derive(Debug, Deserialize)]
struct RawBug {
    id: u32,
    #[serde(default)]
    component: String,
    #[serde(default)]
    cc: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    cf_stabilisation_atoms: String,
    #[serde(default)]
    cf_runtime_testing_required: String,
    #[serde(default)]
    depends_on: Vec<u32>,
    #[serde(default)]
    is_resolved: bool,
    #[serde(default)]
    groups: Vec<String>,
    #[serde(default)]
    whiteboard: String,
}

impl From<RawBug> for Bug {
    fn from(raw: RawBug) -> Self {
        let category = if raw.component.eq_ignore_ascii_case("keywording") {
            BugCategory::KeywordReq
        } else if raw.component.eq_ignore_ascii_case("stabilization")
        || !raw.cf_stabilisation_atoms.is_empty()
        {
            BugCategory::StableReq
        } else {
            BugCategory::Other
        };
        let runtime_testing_required = if raw.cf_runtime_testing_required == "manual" {
            Some(RuntimeTesting::Manual)
        } else if raw.cf_runtime_testing_required.is_empty() {
            None
        } else {
            Some(RuntimeTesting::Other)
        };
        Bug {
            id: raw.id,
            category,
            cc: raw.cc.into_iter().collect(),
            keywords: raw.keywords.into_iter().collect(),
            sanity_check: raw.whiteboard.contains("sanity-check+"),
            depends: raw.depends_on.into_iter().collect(),
            resolved: raw.is_resolved,
            runtime_testing_required,
            security: raw.groups.iter().any(|g| g.contains("security")),
            atoms: raw
                .cf_stabilisation_atoms
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[async_trait]
impl BugTracker for BugzillaClient {
    async fn find_bugs(
        &self,
        ids: &[u32],
        cc_arches: &[String],
    ) -> Result<HashMap<u32, Bug>, BugzillaError> {
        let Some(key) = &self.api_key else {
            return Err(BugzillaError::NoApiKey);
        };
        let mut req = self
            .http
            .get(format!("{}/rest/bug", self.base_url))
            .query(&[("Bugzilla_api_key", key.as_str())])
            .query(&[("resolution", "---")])
            .query(&[("f1", "cf_sanity_check"), ("o1", "equals"), ("v1", "sanity-check+")]);
        if !ids.is_empty() {
            let id_csv = ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
            req = req.query(&[("id", id_csv)]);
        }
        if !cc_arches.is_empty() {
            req = req.query(&[("cc", cc_arches.join(","))]);
        }
        let resp: BugsResponse = req.send().await?.json().await?;
        Ok(resp.bugs.into_iter().map(|b| (b.id, b.into())).collect())
    }

    async fn fetch_by_ids(&self, ids: &[u32]) -> Result<HashMap<u32, Bug>, BugzillaError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let Some(key) = &self.api_key else {
            return Err(BugzillaError::NoApiKey);
        };
        let id_csv = ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
        let resp: BugsResponse = self
            .http
            .get(format!("{}/rest/bug", self.base_url))
            .query(&[("Bugzilla_api_key", key.as_str()), ("id", &id_csv)])
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.bugs.into_iter().map(|b| (b.id, b.into())).collect())
    }

    async fn resolve(&self, id: u32, comment: &str) -> Result<(), BugzillaError> {
        let Some(key) = &self.api_key else {
            return Err(BugzillaError::NoApiKey);
        };
        self.http
            .put(format!("{}/rest/bug/{id}", self.base_url))
            .query(&[("Bugzilla_api_key", key.as_str())])
            .json(&serde_json::json!({
                "status": "RESOLVED",
                "resolution": "FIXED",
                "comment": { "body": comment },
            }))
            .send()
            .await?;
        Ok(())
    }

    async fn uncc(&self, id: u32, arches: &[String]) -> Result<(), BugzillaError> {
        let Some(key) = &self.api_key else {
            return Err(BugzillaError::NoApiKey);
        };
        self.http
            .put(format!("{}/rest/bug/{id}", self.base_url))
            .query(&[("Bugzilla_api_key", key.as_str())])
            .json(&serde_json::json!({ "cc": { "remove": arches } }))
            .send()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn api_key_prefers_env_var() {
        std::env::set_var("ARCHTESTER_BUGZILLA_APIKEY", "from-env");
        assert_eq!(resolve_api_key().as_deref(), Some("from-env"));
        std::env::remove_var("ARCHTESTER_BUGZILLA_APIKEY");
    }

    #[test]
    #[serial]
    fn api_key_falls_back_to_bugs_key_file() {
        std::env::remove_var("ARCHTESTER_BUGZILLA_APIKEY");
        let dir = tempfile::tempdir().unwrap();
        let prev = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        std::fs::write("bugs.key", "from-file\n").unwrap();
        assert_eq!(resolve_api_key().as_deref(), Some("from-file"));
        std::env::set_current_dir(prev).unwrap();
    }
}
