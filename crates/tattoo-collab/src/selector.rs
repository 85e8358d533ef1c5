//! Bug selector: given a candidate bug-id set and a roster of
//! workers, partition upstream bugs per worker using the pure readiness rule
//! in `tattoo_core::is_ready`.

use std::collections::HashMap;

use tattoo_core::{is_ready, Bug, Worker};

use crate::bugzilla::{BugTracker, BugzillaError};

/// Runs the full selector for `workers` against `candidates`
/// (empty means "every open, sanity-checked bug cc'ing one of these
/// architectures" — the scan path).
///
/// Pure with respect to `workers`: makes exactly two tracker queries (bugs,
/// then their dependencies) and no writes.
pub async fn select_bugs(
    tracker: &dyn BugTracker,
    candidates: &[u32],
    workers: &[Worker],
) -> Result<Vec<(Worker, Vec<u32>)>, BugzillaError> {
    let arches: Vec<String> = workers.iter().map(|w| w.canonical_arch().to_string()).collect();
    let bugs = tracker.find_bugs(candidates, &arches).await?;

    let dep_ids: Vec<u32> = bugs
        .values()
        .flat_map(|b| b.depends.iter().copied())
        .collect();
    let deps: HashMap<u32, Bug> = if dep_ids.is_empty() {
        HashMap::new()
    } else {
        tracker.fetch_by_ids(&dep_ids).await?
    };

    let mut out = Vec::new();
    for worker in workers {
        let mut ready: Vec<u32> = bugs
            .values()
            .filter(|bug| is_ready(bug, &deps, worker))
            .map(|bug| bug.id)
            .collect();
        if ready.is_empty() {
            continue;
        }
        ready.sort_unstable();
        out.push((worker.clone(), ready));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tattoo_core::BugCategory;

    struct FakeTracker {
        bugs: HashMap<u32, Bug>,
        calls: Mutex<Vec<&'static str>>,
    }

    fn bug(id: u32, arch: &str) -> Bug {
        Bug {
            id,
            category: BugCategory::StableReq,
            cc: HashSet::from([format!("{arch}@gentoo.org")]),
            keywords: HashSet::new(),
            sanity_check: true,
            depends: HashSet::new(),
            resolved: false,
            runtime_testing_required: None,
            security: false,
            atoms: Vec::new(),
        }
    }

    #[async_trait]
    impl BugTracker for FakeTracker {
        async fn find_bugs(
            &self,
            _ids: &[u32],
            _cc_arches: &[String],
        ) -> Result<HashMap<u32, Bug>, BugzillaError> {
            self.calls.lock().unwrap().push("find_bugs");
            Ok(self.bugs.clone())
        }

        async fn fetch_by_ids(&self, _ids: &[u32]) -> Result<HashMap<u32, Bug>, BugzillaError> {
            self.calls.lock().unwrap().push("fetch_by_ids");
            Ok(HashMap::new())
        }

        async fn resolve(&self, _id: u32, _comment: &str) -> Result<(), BugzillaError> {
            unimplemented!()
        }

        async fn uncc(&self, _id: u32, _arches: &[String]) -> Result<(), BugzillaError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn partitions_bugs_per_worker_omitting_empty_lists() {
        let tracker = FakeTracker {
            bugs: HashMap::from([(100, bug(100, "amd64")), (200, bug(200, "arm64"))]),
            calls: Mutex::new(Vec::new()),
        };
        let workers = vec![Worker::new("alpha", "amd64"), Worker::new("beta", "riscv")];
        let result = select_bugs(&tracker, &[], &workers).await.unwrap();
        assert_eq!(result, vec![(Worker::new("alpha", "amd64"), vec![100])]);
    }

    #[tokio::test]
    async fn skips_dependency_fetch_when_no_bugs_have_dependencies() {
        let tracker = FakeTracker {
            bugs: HashMap::from([(100, bug(100, "amd64"))]),
            calls: Mutex::new(Vec::new()),
        };
        let workers = vec![Worker::new("alpha", "amd64")];
        select_bugs(&tracker, &[], &workers).await.unwrap();
        assert_eq!(*tracker.calls.lock().unwrap(), vec!["find_bugs"]);
    }
}
