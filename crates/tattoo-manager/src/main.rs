//! tattoo-manager: the central per-host dispatcher. No CLI
//! flags; listens on the default (or inherited) socket path.

mod handler;
mod roster;
mod scan;
mod socket;

use std::path::PathBuf;
use std::sync::Arc;

use tattoo_collab::{BugTracker, BugzillaClient};
use tattoo_store::ResultsStore;
use tracing::info;

use crate::roster::Roster;

const DEFAULT_SOCKET_PATH: &str = "tattoo.socket";
const DEFAULT_STORE_PATH: &str = "tattoo-results.db";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if running_under_service_manager() {
        tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false).without_time().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false).init();
    }

    let socket_path = PathBuf::from(
        std::env::var("TATTOO_SOCKET_PATH").unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string()),
    );
    let store_path = PathBuf::from(
        std::env::var("TATTOO_STORE_PATH").unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string()),
    );

    let listener = socket::bind(&socket_path)?;
    let store = Arc::new(ResultsStore::open(&store_path)?);
    let tracker: Arc<dyn BugTracker> = Arc::new(BugzillaClient::new(bugzilla_base_url()));
    let roster = Roster::new();

    tattoo_sdnotify::notify("READY=1");
    info!(socket = %socket_path.display(), "manager listening");

    let auto_scan = tokio::spawn(scan::auto_scan_loop(
        roster.clone(),
        Arc::clone(&store),
        Arc::clone(&tracker),
    ));

    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = match accepted {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let (read_half, write_half) = stream.into_split();
                let roster = roster.clone();
                let store = Arc::clone(&store);
                let tracker = Arc::clone(&tracker);
                tokio::spawn(handler::handle_connection(read_half, write_half, roster, store, tracker));
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down");
                tattoo_sdnotify::notify("STOPPING=1");
                break;
            }
        }
    }

    auto_scan.abort();
    Ok(())
}

fn running_under_service_manager() -> bool {
    std::env::var("NOTIFY_SOCKET").is_ok()
}

fn bugzilla_base_url() -> String {
    std::env::var("TATTOO_BUGZILLA_URL").unwrap_or_else(|_| "https://bugs.gentoo.org".to_string())
}
