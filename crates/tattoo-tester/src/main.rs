//! tattoo-tester: connects to a Manager, runs an N-wide pool of bug test
//! jobs against the priority queue.

mod job;
mod pipeline;
mod watchdog;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tattoo_collab::{BugzillaClient, IrcRelay, QlopObserver, ShellRepoHelper, TattTestDriver};
use tattoo_core::Worker;
use tattoo_proto::Message;
use tattoo_queue::PriorityBugQueue;
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tattoo-tester")]
struct Args {
    /// Identifier for this Tester; defaults to the host name.
    #[arg(long)]
    name: Option<String>,

    /// CPU architecture this Tester serves; defaults to $ARCH.
    #[arg(long)]
    arch: Option<String>,

    /// Number of concurrent job-worker tasks.
    #[arg(long, default_value_t = 1)]
    jobs: usize,

    /// Path to the Manager's stream socket.
    #[arg(long, default_value = "tattoo.socket")]
    socket: PathBuf,

    /// Directory the job pipeline uses as cwd, and where failure logs land.
    #[arg(long, default_value = "/tmp/tattoo-runtime")]
    runtime_dir: PathBuf,
}

const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const MAX_RETRIES: u32 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    if running_under_service_manager() {
        tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false).without_time().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false).init();
    }

    let args = Args::parse();
    let name = args.name.clone().unwrap_or_else(hostname);
    let arch = args
        .arch
        .clone()
        .or_else(|| std::env::var("ARCH").ok())
        .ok_or_else(|| anyhow::anyhow!("--arch is required unless $ARCH is set"))?;

    if !args.socket.exists() {
        anyhow::bail!("manager socket {} does not exist", args.socket.display());
    }
    std::fs::create_dir_all(&args.runtime_dir)?;

    let worker = Worker::new(name.clone(), arch.clone());
    let collaborators = Arc::new(pipeline::Collaborators {
            test_driver: Box::new(TattTestDriver::new("tatt")),
            merge_observer: Box::new(QlopObserver::default()),
            irc: IrcRelay::new(irc_channel(), name.clone()),
            repo: Box::new(ShellRepoHelper::new(".")),
            tracker: Box::new(BugzillaClient::new(bugzilla_base_url())),
    });

    let mut retries = 0;
    loop {
        match run_session(&args, worker.clone(), Arc::clone(&collaborators)).await {
            Ok(()) => {
                retries = 0;
            }
            Err(e) => {
                warn!(error = %e, "tester session ended");
            }
        }
        retries += 1;
        if retries > MAX_RETRIES {
            anyhow::bail!("exceeded {MAX_RETRIES} reconnect attempts");
        }
        tokio::time::sleep(RETRY_BACKOFF).await;
    }
}

async fn run_session(
    args: &Args,
    worker: Worker,
    collaborators: Arc<pipeline::Collaborators>,
) -> anyhow::Result<()> {
    let stream = UnixStream::connect(&args.socket).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    tattoo_proto::write_message(&mut write_half, &Message::Worker(worker.clone())).await?;

    let queue = PriorityBugQueue::new();
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(u32, bool, String)>();

    let mut worker_tasks = Vec::new();
    for _ in 0..args.jobs.max(1) {
        worker_tasks.push(tokio::spawn(pipeline::job_worker(
                    queue.clone(),
                    Arc::clone(&collaborators),
                    args.runtime_dir.clone(),
                    done_tx.clone(),
        )));
    }
    drop(done_tx);

    tattoo_sdnotify::notify("READY=1");
    info!(name = %worker.name, arch = %worker.arch, "connected to manager");

    let result = loop {
        tokio::select! {
            frame = tattoo_proto::read_message(&mut reader) => {
                match frame {
                    Ok(Message::GlobalJob { priority, bugs }) => {
                        let fresh: Vec<u32> = bugs.into_iter().filter(|b| !queue.contains(*b)).collect();
                        let mut shuffled = fresh;
                        shuffle(&mut shuffled);
                        queue.append_bugs(priority, shuffled);
                    }
                    Ok(Message::GetStatus) => {
                        let (running, queued) = queue.snapshot();
                        let merging_atoms = collaborators.merge_observer.merging_atoms().await;
                        let mut bugs_queue = running;
                        bugs_queue.extend(queued);
                        let status = tattoo_proto::TesterStatus { bugs_queue, merging_atoms };
                        if tattoo_proto::write_message(&mut write_half, &Message::TesterStatus(status)).await.is_err() {
                            break Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(tattoo_proto::ProtocolError::ConnectionClosed) => break Ok(()),
                    Err(e) => {
                        warn!(error = %e, "discarding malformed frame");
                    }
                }
            }
            Some((bug, success, _summary)) = done_rx.recv() => {
                let _ = queue.done(bug);
                let msg = Message::BugJobDone { bug_number: bug, success };
                if tattoo_proto::write_message(&mut write_half, &msg).await.is_err() {
                    break Ok(());
                }
            }
            else => break Ok(()),
        }
    };

    tattoo_sdnotify::notify("RELOADING=1");
    for task in worker_tasks {
        task.abort();
    }
    result
}

fn shuffle(bugs: &mut [u32]) {
    use rand::seq::SliceRandom;
    bugs.shuffle(&mut rand::thread_rng());
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn running_under_service_manager() -> bool {
    std::env::var("NOTIFY_SOCKET").is_ok()
}

fn irc_channel() -> String {
    std::env::var("TATTOO_IRC_CHANNEL")
        .unwrap_or_else(|_| "ircs://irc.libera.chat:6697/#gentoo-arthurzam".to_string())
}

fn bugzilla_base_url() -> String {
    std::env::var("TATTOO_BUGZILLA_URL")
        .unwrap_or_else(|_| "https://bugs.gentoo.org".to_string())
}
