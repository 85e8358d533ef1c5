//! Per-host Controller session: one transient
//! connection, a handful of request frames, then close.

use std::path::Path;

use chrono::{DateTime, Utc};
use tattoo_core::Worker;
use tattoo_proto::{CompletedJobsResponse, ManagerStatus, Message};
use tokio::io::BufReader;
use tokio::net::UnixStream;

#[derive(Default)]
pub struct HostResult {
    pub info: Option<ManagerStatus>,
    pub fetched: Option<CompletedJobsResponse>,
}

pub struct HostRequest<'a> {
    pub bugs: Option<(i32, &'a [u32])>,
    pub scan: bool,
    pub info: bool,
    pub fetch_since: Option<DateTime<Utc>>,
}

pub async fn run_host(socket_path: &Path, req: &HostRequest<'_>) -> anyhow::Result<HostResult> {
    let stream = UnixStream::connect(socket_path).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    tattoo_proto::write_message(&mut write_half, &Message::Worker(Worker::controller())).await?;

    let mut result = HostResult::default();

    if let Some((priority, bugs)) = req.bugs {
        tattoo_proto::write_message(
            &mut write_half,
            &Message::GlobalJob { priority, bugs: bugs.to_vec() },
        )
            .await?;
    }

    if req.scan {
        tattoo_proto::write_message(&mut write_half, &Message::DoScan).await?;
    }

    if req.info {
        tattoo_proto::write_message(&mut write_half, &Message::GetStatus).await?;
        match tattoo_proto::read_message(&mut reader).await? {
            Message::ManagerStatus(status) => result.info = Some(status),
            other => anyhow::bail!("expected ManagerStatus, got {other:?}"),
        }
    }

    if let Some(since) = req.fetch_since {
        tattoo_proto::write_message(&mut write_half, &Message::CompletedJobsRequest { since }).await?;
        match tattoo_proto::read_message(&mut reader).await? {
            Message::CompletedJobsResponse(resp) => result.fetched = Some(resp),
            other => anyhow::bail!("expected CompletedJobsResponse, got {other:?}"),
        }
    }

    Ok(result)
}
