//! tattoo: the Controller binary. One transient connection per configured
//! host, a handful of request frames, then an optional apply step once every
//! host has replied.

mod apply;
mod controller;
mod ssh_tunnel;
mod timestamps;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tattoo_collab::{BugzillaClient, ShellRepoHelper};
use tattoo_proto::CompletedJobsResponse;
use tracing::{info, warn};

use crate::controller::HostRequest;

const DEFAULT_HOSTS_DIR: &str = "hosts";
const DEFAULT_TIMESTAMPS_FILE: &str = "controller.datetime.txt";

#[derive(Parser, Debug)]
#[command(name = "tattoo", about = "Controller for the distributed package test harness")]
struct Cli {
    /// Directory holding hosts.list and per-host socket aliases.
    #[arg(long, default_value = DEFAULT_HOSTS_DIR)]
    hosts_dir: PathBuf,

    /// Open an SSH tunnel to the named host and record its socket alias.
    #[arg(short = 'c', long)]
    connect: Option<String>,

    /// Tear down a previously-opened tunnel.
    #[arg(short = 'd', long)]
    disconnect: Option<String>,

    /// Trigger a manual scan, optionally restricted to these hosts.
    #[arg(short = 's', long, num_args = 0..)]
    scan: Option<Vec<String>>,

    /// Request and print aggregated status from every configured host.
    #[arg(short = 'i', long)]
    info: bool,

    /// Submit these bug numbers as a GlobalJob to every configured host.
    #[arg(short = 'b', long, num_args = 1..)]
    bugs: Option<Vec<u32>>,

    /// Priority to use with --bugs (lower sorts first).
    #[arg(short = 'p', long, default_value_t = 0)]
    priority: i32,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch completed-job results from every host and optionally apply them.
    Fetch {
        #[arg(short = 'd', long = "repo")]
        repo: Option<PathBuf>,
        #[arg(short = 'n', long)]
        dry_run: bool,
        #[arg(short = 'a', long)]
        apply: bool,
        #[arg(short = 'r', long)]
        resolve: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.hosts_dir)?;

    if let Some(name) = &cli.connect {
        let hosts = ssh_tunnel::load_hosts(&cli.hosts_dir)?;
        let host = hosts.iter().find(|h| &h.name == name);
        let Some(host) = host else {
            anyhow::bail!("unknown host {name} (add it to hosts.list first)");
        };
        ssh_tunnel::connect(&cli.hosts_dir, host).await?;
        println!("connected {name}");
        return Ok(());
    }

    if let Some(name) = &cli.disconnect {
        let hosts = ssh_tunnel::load_hosts(&cli.hosts_dir)?;
        let host = hosts.iter().find(|h| &h.name == name);
        let Some(host) = host else {
            anyhow::bail!("unknown host {name}");
        };
        ssh_tunnel::disconnect(&cli.hosts_dir, host).await?;
        println!("disconnected {name}");
        return Ok(());
    }

    let hosts = ssh_tunnel::load_hosts(&cli.hosts_dir)?;
    if hosts.is_empty() {
        warn!("no hosts configured in {}", cli.hosts_dir.join("hosts.list").display());
        return Ok(());
    }

    let timestamps_path = cli.hosts_dir.join(DEFAULT_TIMESTAMPS_FILE);
    let mut last_seen = timestamps::load(&timestamps_path);

    let fetching = matches!(&cli.command, Some(Command::Fetch { .. }));
    let epoch = DateTime::<Utc>::UNIX_EPOCH;

    let mut tasks = Vec::new();
    for host in &hosts {
        let socket_path = ssh_tunnel::local_socket_path(&cli.hosts_dir, &host.name);
        let scan = cli.scan.as_ref().map(|filter| filter.is_empty() || filter.contains(&host.name)).unwrap_or(false);
        let req = HostRequest {
            bugs: cli.bugs.as_deref().map(|b| (cli.priority, b)),
            scan,
            info: cli.info,
            fetch_since: fetching.then(|| *last_seen.get(&host.name).unwrap_or(&epoch)),
        };
        let name = host.name.clone();
        tasks.push(async move { (name, controller::run_host(&socket_path, &req).await) });
    }

    let results = futures::future::join_all(tasks).await;

    let mut all_passes: Vec<(u32, String)> = Vec::new();
    let now_marker = DateTime::<Utc>::from_timestamp(
        std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64,
        0,
    )
        .unwrap_or(epoch);

    for (name, result) in results {
        match result {
            Ok(host_result) => {
                if let Some(status) = &host_result.info {
                    println!("{name}: load={:?} cpus={} workers={}", status.load, status.cpu_count, status.workers.len());
                    for (worker, status) in &status.workers {
                        println!(
                            "{name}/{}: queue={:?} merging={:?}",
                            worker.name, status.bugs_queue, status.merging_atoms
                        );
                    }
                }
                if let Some(CompletedJobsResponse { passes, failed }) = host_result.fetched {
                    for (bug, arch) in &passes {
                        println!("{name}: PASS bug={bug} arch={arch}");
                    }
                    for (bug, arch) in &failed {
                        println!("{name}: FAIL bug={bug} arch={arch}");
                    }
                    all_passes.extend(passes);
                    last_seen.insert(name.clone(), now_marker);
                }
            }
            Err(e) => warn!(host = %name, error = %e, "host request failed"),
        }
    }

    if fetching {
        timestamps::save(&timestamps_path, &last_seen)?;
    }

    if let Some(Command::Fetch { repo: Some(repo_path), dry_run, apply: true, resolve }) = &cli.command {
        let tracker = BugzillaClient::new(bugzilla_base_url());
        let repo = ShellRepoHelper::new(repo_path.clone());
        let opts = apply::ApplyOptions { resolve: *resolve, dry_run: *dry_run };
        apply::apply_passes(&all_passes, &tracker, &repo, &opts).await;
        info!(bugs = all_passes.len(), "apply step finished");
    }

    Ok(())
}

fn bugzilla_base_url() -> String {
    std::env::var("TATTOO_BUGZILLA_URL").unwrap_or_else(|_| "https://bugs.gentoo.org".to_string())
}
