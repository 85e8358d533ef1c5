//! Apply step run once after all hosts have been fetched: for each bug that
//! passed on one or more architectures, generate per-package commits and
//! optionally resolve or uncc the bug upstream.

use std::collections::HashMap;

use tattoo_collab::{BugTracker, RepoHelper};
use tattoo_core::{Bug, BugCategory};
use tracing::{error, info, warn};

pub struct ApplyOptions {
    pub resolve: bool,
    pub dry_run: bool,
}

/// Run the apply step over a flattened `(bug, arch)` pass list. Failures on a
/// single `(bug, arch)` pair are logged and do not block the rest.
pub async fn apply_passes(
    passes: &[(u32, String)],
    tracker: &dyn BugTracker,
    repo: &dyn RepoHelper,
    opts: &ApplyOptions,
) {
    let by_bug = group_by_bug(passes);

    for (bug_id, passed_arches) in by_bug {
        if let Err(e) = apply_one_bug(bug_id, &passed_arches, tracker, repo, opts).await {
            error!(bug = bug_id, error = %e, "apply step failed for bug");
        }
    }
}

fn group_by_bug(passes: &[(u32, String)]) -> Vec<(u32, Vec<String>)> {
    let mut map: HashMap<u32, Vec<String>> = HashMap::new();
    for (bug, arch) in passes {
        map.entry(*bug).or_default().push(arch.clone());
    }
    let mut out: Vec<_> = map.into_iter().collect();
    out.sort_by_key(|(bug, _)| *bug);
    for (_, arches) in &mut out {
        arches.sort();
        arches.dedup();
    }
    out
}

async fn apply_one_bug(
    bug_id: u32,
    passed_arches: &[String],
    tracker: &dyn BugTracker,
    repo: &dyn RepoHelper,
    opts: &ApplyOptions,
) -> anyhow::Result<()> {
    let fetched = tracker.fetch_by_ids(&[bug_id]).await?;
    let Some(bug) = fetched.get(&bug_id) else {
        anyhow::bail!("bug {bug_id} not found upstream");
    };

    let qualifying: Vec<String> =
    passed_arches.iter().filter(|arch| bug.cc_contains_arch(arch)).cloned().collect();
    if qualifying.is_empty() {
        warn!(bug = bug_id, "no passed arch is cc'd on this bug, skipping");
        return Ok(());
    }

    for arch in &qualifying {
        for atom in &bug.atoms {
            if opts.dry_run {
                info!(bug = bug_id, %arch, %atom, "dry run: would commit");
                continue;
            }
            let result = match bug.category {
                BugCategory::KeywordReq => repo.keyword(atom, arch, bug_id).await,
                _ => repo.stabilize(atom, arch, bug_id).await,
            };
            if let Err(e) = result {
                error!(bug = bug_id, %arch, %atom, error = %e, "commit failed");
            }
        }
    }

    if opts.dry_run {
        return Ok(());
    }

    let all_cc_done = all_cc_arches_satisfied(bug, &qualifying);
    if opts.resolve && !bug.security && (all_cc_done || bug.has_all_arches()) {
        let comment = resolve_comment(bug, &qualifying, all_cc_done);
        tracker.resolve(bug_id, &comment).await?;
    } else {
        tracker.uncc(bug_id, &qualifying).await?;
    }

    Ok(())
}

/// Every arch the bug cc's is present among `qualifying`.
fn all_cc_arches_satisfied(bug: &Bug, qualifying: &[String]) -> bool {
    bug.cc.iter().all(|addr| {
            let arch = addr.split('@').next().unwrap_or(addr);
            qualifying.iter().any(|a| a == arch)
    })
}

fn resolve_comment(bug: &Bug, qualifying: &[String], all_cc_done: bool) -> String {
    let body = if bug.has_all_arches() {
        format!("{} (ALLARCHES) done", qualifying.join(", "))
    } else if let [only] = qualifying {
        format!("{only} done")
    } else {
        format!("{} done", qualifying.join(", "))
    };
    if all_cc_done {
        format!("{body}\n\nall arches done")
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tattoo_collab::{BugzillaError, RepoError};

    fn bug(id: u32, cc: &[&str], atoms: &[&str], category: BugCategory, all_arches: bool) -> Bug {
        let mut keywords = HashSet::new();
        if all_arches {
            keywords.insert("ALLARCHES".to_string());
        }
        Bug {
            id,
            category,
            cc: cc.iter().map(|s| s.to_string()).collect(),
            keywords,
            sanity_check: true,
            depends: HashSet::new(),
            resolved: false,
            runtime_testing_required: None,
            security: false,
            atoms: atoms.iter().map(|s| s.to_string()).collect(),
        }
    }

    struct FakeTracker {
        bugs: HashMap<u32, Bug>,
        resolved: Mutex<Vec<(u32, String)>>,
        unccd: Mutex<Vec<(u32, Vec<String>)>>,
    }

    #[async_trait]
    impl BugTracker for FakeTracker {
        async fn find_bugs(
            &self,
            _ids: &[u32],
            _cc_arches: &[String],
        ) -> Result<HashMap<u32, Bug>, BugzillaError> {
            Ok(self.bugs.clone())
        }
        async fn fetch_by_ids(&self, ids: &[u32]) -> Result<HashMap<u32, Bug>, BugzillaError> {
            Ok(ids.iter().filter_map(|id| self.bugs.get(id).map(|b| (*id, b.clone()))).collect())
        }
        async fn resolve(&self, id: u32, comment: &str) -> Result<(), BugzillaError> {
            self.resolved.lock().unwrap().push((id, comment.to_string()));
            Ok(())
        }
        async fn uncc(&self, id: u32, arches: &[String]) -> Result<(), BugzillaError> {
            self.unccd.lock().unwrap().push((id, arches.to_vec()));
            Ok(())
        }
    }

    struct FakeRepo {
        commits: Mutex<Vec<(String, String, u32)>>,
    }

    #[async_trait]
    impl RepoHelper for FakeRepo {
        async fn keyword(&self, atom: &str, arch: &str, bug: u32) -> Result<(), RepoError> {
            self.commits.lock().unwrap().push((atom.to_string(), arch.to_string(), bug));
            Ok(())
        }
        async fn stabilize(&self, atom: &str, arch: &str, bug: u32) -> Result<(), RepoError> {
            self.commits.lock().unwrap().push((atom.to_string(), arch.to_string(), bug));
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_arch_bug_is_resolved_with_a_done_comment() {
        let b = bug(100, &["amd64@gentoo.org"], &["cat/pkg-1.0"], BugCategory::StableReq, false);
        let tracker = FakeTracker {
            bugs: HashMap::from([(100, b)]),
            resolved: Mutex::new(vec![]),
            unccd: Mutex::new(vec![]),
        };
        let repo = FakeRepo { commits: Mutex::new(vec![]) };
        let opts = ApplyOptions { resolve: true, dry_run: false };

        apply_passes(&[(100, "amd64".to_string())], &tracker, &repo, &opts).await;

        assert_eq!(repo.commits.lock().unwrap().as_slice(), &[("cat/pkg-1.0".to_string(), "amd64".to_string(), 100)]);
        let resolved = tracker.resolved.lock().unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].1.contains("amd64 done"));
        assert!(resolved[0].1.contains("all arches done"));
    }

    #[tokio::test]
    async fn partial_pass_without_allarches_only_unccs() {
        let b = bug(
            101,
            &["amd64@gentoo.org", "arm64@gentoo.org"],
            &["cat/pkg-1.0"],
            BugCategory::StableReq,
            false,
        );
        let tracker = FakeTracker {
            bugs: HashMap::from([(101, b)]),
            resolved: Mutex::new(vec![]),
            unccd: Mutex::new(vec![]),
        };
        let repo = FakeRepo { commits: Mutex::new(vec![]) };
        let opts = ApplyOptions { resolve: true, dry_run: false };

        apply_passes(&[(101, "amd64".to_string())], &tracker, &repo, &opts).await;

        assert!(tracker.resolved.lock().unwrap().is_empty());
        assert_eq!(tracker.unccd.lock().unwrap().as_slice(), &[(101, vec!["amd64".to_string()])]);
    }

    #[tokio::test]
    async fn allarches_bug_resolves_on_a_single_passed_arch() {
        let b = bug(
            102,
            &["amd64@gentoo.org", "arm64@gentoo.org"],
            &["cat/pkg-2.0"],
            BugCategory::StableReq,
            true,
        );
        let tracker = FakeTracker {
            bugs: HashMap::from([(102, b)]),
            resolved: Mutex::new(vec![]),
            unccd: Mutex::new(vec![]),
        };
        let repo = FakeRepo { commits: Mutex::new(vec![]) };
        let opts = ApplyOptions { resolve: true, dry_run: false };

        apply_passes(&[(102, "amd64".to_string())], &tracker, &repo, &opts).await;

        let resolved = tracker.resolved.lock().unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].1.contains("(ALLARCHES) done"));
    }

    #[tokio::test]
    async fn security_bugs_are_never_resolved() {
        let mut b = bug(103, &["amd64@gentoo.org"], &["cat/pkg-3.0"], BugCategory::StableReq, false);
        b.security = true;
        let tracker = FakeTracker {
            bugs: HashMap::from([(103, b)]),
            resolved: Mutex::new(vec![]),
            unccd: Mutex::new(vec![]),
        };
        let repo = FakeRepo { commits: Mutex::new(vec![]) };
        let opts = ApplyOptions { resolve: true, dry_run: false };

        apply_passes(&[(103, "amd64".to_string())], &tracker, &repo, &opts).await;

        assert!(tracker.resolved.lock().unwrap().is_empty());
        assert_eq!(tracker.unccd.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_makes_no_tracker_or_repo_calls() {
        let b = bug(104, &["amd64@gentoo.org"], &["cat/pkg-4.0"], BugCategory::StableReq, false);
        let tracker = FakeTracker {
            bugs: HashMap::from([(104, b)]),
            resolved: Mutex::new(vec![]),
            unccd: Mutex::new(vec![]),
        };
        let repo = FakeRepo { commits: Mutex::new(vec![]) };
        let opts = ApplyOptions { resolve: true, dry_run: true };

        apply_passes(&[(104, "amd64".to_string())], &tracker, &repo, &opts).await;

        assert!(repo.commits.lock().unwrap().is_empty());
        assert!(tracker.resolved.lock().unwrap().is_empty());
        assert!(tracker.unccd.lock().unwrap().is_empty());
    }
}
