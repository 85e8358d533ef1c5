//! External collaborators. The core
//! protocol treats these as black boxes; this crate gives each a trait seam
//! (so Manager/Tester/CLI logic can be tested against fakes) and one
//! concrete, minimally real adapter.

pub mod bugzilla;
pub mod irc;
pub mod merge_observer;
pub mod repo;
pub mod selector;
pub mod test_driver;

pub use bugzilla::{BugTracker, BugzillaClient, BugzillaError};
pub use irc::IrcRelay;
pub use merge_observer::{MergeObserver, QlopObserver};
pub use repo::{RepoError, RepoHelper, ShellRepoHelper};
pub use selector::select_bugs;
pub use test_driver::{PreparationOutcome, RunningJob, TattTestDriver, TestDriver, TestDriverError};
