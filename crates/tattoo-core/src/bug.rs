//! Bug metadata and the pure readiness predicate.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::worker::Worker;

/// What kind of upstream request a bug represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BugCategory {
    KeywordReq,
    StableReq,
    Other,
}

/// `runtime_testing_required` field values that matter to readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeTesting {
    Manual,
    Other,
}

/// Bug metadata as fetched from the upstream tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bug {
    pub id: u32,
    pub category: BugCategory,
    /// `<arch>@<domain>` addresses.
    pub cc: HashSet<String>,
    /// Tag set, may contain `ALLARCHES`, `CC-ARCHES`.
    pub keywords: HashSet<String>,
    pub sanity_check: bool,
    pub depends: HashSet<u32>,
    pub resolved: bool,
    pub runtime_testing_required: Option<RuntimeTesting>,
    pub security: bool,
    /// Package atoms this request covers (e.g. `cat/pkg-1.2.3`), used by the
    /// Controller's apply step to generate one commit per package.
    pub atoms: Vec<String>,
}

impl Bug {
    /// True if `cc` lists `arch@<any domain>` for the given canonical arch.
    pub fn cc_contains_arch(&self, arch: &str) -> bool {
        self.cc.iter().any(|addr| cc_arch(addr) == arch)
    }

    pub fn has_cc_arches(&self) -> bool {
        self.keywords.contains("CC-ARCHES")
    }

    pub fn has_all_arches(&self) -> bool {
        self.keywords.contains("ALLARCHES")
    }
}

/// Extract the arch portion of a `<arch>@<domain>` cc address.
fn cc_arch(addr: &str) -> &str {
    addr.split('@').next().unwrap_or(addr)
}

/// Is `bug` ready for `worker`, given a map of already-fetched dependency
/// bugs ?
///
/// Pure: depends only on its arguments, property 4. Any dependency
/// whose metadata is missing from `deps` is treated as *not* satisfying the
/// exemption in rule 4 (i.e. it blocks readiness), since the caller is
/// expected to have fetched every dependency id up front.
pub fn is_ready(bug: &Bug, deps: &HashMap<u32, Bug>, worker: &Worker) -> bool {
    if bug.resolved || !bug.sanity_check {
        return false;
    }
    if bug.runtime_testing_required == Some(RuntimeTesting::Manual) {
        return false;
    }

    let arch = worker.canonical_arch();
    if !bug.cc_contains_arch(arch) {
        return false;
    }

    let category_matches = (bug.category == BugCategory::KeywordReq) == worker.is_rekeyword();
    if !category_matches {
        return false;
    }

    bug.depends.iter().all(|dep_id| dependency_satisfied(*dep_id, deps, arch))
}

/// Rule 4: either the dependency is resolved, or it is itself a
/// keyword/stabilisation request that has passed sanity check, carries
/// `CC-ARCHES`, and does *not* cc the worker's arch.
fn dependency_satisfied(dep_id: u32, deps: &HashMap<u32, Bug>, arch: &str) -> bool {
    let Some(dep) = deps.get(&dep_id) else {
        return false;
    };
    if dep.resolved {
        return true;
    }
    dep.sanity_check && dep.has_cc_arches() && !dep.cc_contains_arch(arch)
}
