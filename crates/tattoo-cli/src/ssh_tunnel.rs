//! SSH multiplexing.
//!
//! Hosts are declared one per line in `<hosts-dir>/hosts.list`:
//! `<name> <ssh-destination> <remote-socket-path>`. `--connect` opens an
//! OpenSSH control-master session forwarding the remote Manager socket to
//! `<hosts-dir>/<name>.sock`; `--disconnect` tears it down via the same
//! control socket.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

pub struct HostEntry {
    pub name: String,
    pub ssh_destination: String,
    pub remote_socket: String,
}

pub fn load_hosts(hosts_dir: &Path) -> std::io::Result<Vec<HostEntry>> {
    let text = std::fs::read_to_string(hosts_dir.join("hosts.list"))?;
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(HostEntry {
                name: parts.next()?.to_string(),
                ssh_destination: parts.next()?.to_string(),
                remote_socket: parts.next()?.to_string(),
            })
        })
        .collect())
}

fn control_path(hosts_dir: &Path, name: &str) -> PathBuf {
    hosts_dir.join(format!("{name}.ctl"))
}

pub fn local_socket_path(hosts_dir: &Path, name: &str) -> PathBuf {
    hosts_dir.join(format!("{name}.sock"))
}

pub async fn connect(hosts_dir: &Path, host: &HostEntry) -> anyhow::Result<()> {
    let local = local_socket_path(hosts_dir, &host.name);
    let control = control_path(hosts_dir, &host.name);
    let forward = format!("{}:{}", local.display(), host.remote_socket);

    let status = Command::new("ssh")
        .args(["-f", "-N", "-M", "-S"])
        .arg(&control)
        .args(["-o", "ExitOnForwardFailure=yes", "-o", "StreamLocalBindUnlink=yes", "-L"])
        .arg(&forward)
        .arg(&host.ssh_destination)
        .stdin(Stdio::null())
        .status()
        .await?;

    anyhow::ensure!(status.success(), "ssh tunnel to {} failed", host.name);
    Ok(())
}

pub async fn disconnect(hosts_dir: &Path, host: &HostEntry) -> anyhow::Result<()> {
    let control = control_path(hosts_dir, &host.name);
    let status = Command::new("ssh")
        .args(["-S"])
        .arg(&control)
        .args(["-O", "exit"])
        .arg(&host.ssh_destination)
        .stdin(Stdio::null())
        .status()
        .await?;
    let _ = std::fs::remove_file(local_socket_path(hosts_dir, &host.name));
    anyhow::ensure!(status.success(), "ssh disconnect for {} failed", host.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hosts_list_skipping_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("hosts.list"),
            "# comment\n\nalpha alpha.example.com:22 /run/tattoo/manager.socket\n",
        )
        .unwrap();
        let hosts = load_hosts(dir.path()).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "alpha");
        assert_eq!(hosts[0].remote_socket, "/run/tattoo/manager.socket");
    }
}
