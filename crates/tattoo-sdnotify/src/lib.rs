//! Service-manager integration: `READY=1` / `RELOADING=1` / `STOPPING=1`
//! notifications over the `NOTIFY_SOCKET` datagram socket, and inherited
//! listening-socket activation (`LISTEN_PID`/`LISTEN_FDS`).
//!
//! Grounded on the original `sdnotify.py` collaborator: a best-effort UDP
//! datagram send that silently no-ops when `NOTIFY_SOCKET` is unset and only
//! logs (never panics) on failure.

use std::os::unix::net::UnixDatagram;

/// Send a state string (`"READY=1"`, `"RELOADING=1"`, `"STOPPING=1"`) to the
/// service manager. No-ops when `NOTIFY_SOCKET` is unset; logs and swallows
/// any other failure.
pub fn notify(state: &str) {
    let Ok(addr) = std::env::var("NOTIFY_SOCKET") else {
        tracing::debug!("NOTIFY_SOCKET is not set");
        return;
    };
    if let Err(e) = send(&addr, state) {
        tracing::warn!(error = %e, "failed to send notification to service manager");
    }
}

fn send(addr: &str, state: &str) -> std::io::Result<()> {
    let sock = UnixDatagram::unbound()?;
    let target = abstract_or_path_addr(addr)?;
    sock.connect_addr(&target)?;
    sock.send(state.as_bytes())?;
    Ok(())
}

/// A leading `@` denotes Linux's abstract-namespace sockets (`\0` prefix).
fn abstract_or_path_addr(addr: &str) -> std::io::Result<std::os::unix::net::SocketAddr> {
    if let Some(rest) = addr.strip_prefix('@') {
        abstract_addr(rest)
    } else {
        std::os::unix::net::SocketAddr::from_pathname(addr)
    }
}

#[cfg(target_os = "linux")]
fn abstract_addr(name: &str) -> std::io::Result<std::os::unix::net::SocketAddr> {
    use std::os::linux::net::SocketAddrExt;
    std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())
}

#[cfg(not(target_os = "linux"))]
fn abstract_addr(_name: &str) -> std::io::Result<std::os::unix::net::SocketAddr> {
    Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "abstract-namespace sockets require Linux",
    ))
}

/// Does the environment describe exactly one inherited listening socket
/// handed to *this* process by the service manager (`LISTEN_PID = getpid()`
/// and `LISTEN_FDS = 1`)?
pub fn has_inherited_listen_fd() -> bool {
    let Ok(pid_s) = std::env::var("LISTEN_PID") else {
        return false;
    };
    let Ok(fds_s) = std::env::var("LISTEN_FDS") else {
        return false;
    };
    let Ok(pid) = pid_s.parse::<u32>() else {
        return false;
    };
    let our_pid = nix::unistd::getpid().as_raw() as u32;
    pid == our_pid && fds_s.trim() == "1"
}

/// File descriptor 3 is the first (and, per [`has_inherited_listen_fd`],
/// only) inherited socket, by systemd convention.
pub const LISTEN_FDS_START: std::os::unix::io::RawFd = 3;

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn no_notify_socket_is_a_silent_noop() {
        std::env::remove_var("NOTIFY_SOCKET");
        notify("READY=1");
    }

    #[test]
    #[serial]
    fn inherited_fd_requires_matching_pid_and_single_fd() {
        std::env::remove_var("LISTEN_PID");
        std::env::remove_var("LISTEN_FDS");
        assert!(!has_inherited_listen_fd());

        let pid = nix::unistd::getpid();
        std::env::set_var("LISTEN_PID", pid.as_raw().to_string());
        std::env::set_var("LISTEN_FDS", "1");
        assert!(has_inherited_listen_fd());

        std::env::set_var("LISTEN_FDS", "2");
        assert!(!has_inherited_listen_fd());

        std::env::remove_var("LISTEN_PID");
        std::env::remove_var("LISTEN_FDS");
    }

    #[test]
    #[serial]
    fn notify_over_a_real_abstract_or_path_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notify.sock");
        let listener = UnixDatagram::bind(&path).unwrap();
        std::env::set_var("NOTIFY_SOCKET", path.to_str().unwrap());

        notify("READY=1");

        let mut buf = [0u8; 64];
        listener.set_read_timeout(Some(std::time::Duration::from_secs(1))).unwrap();
        let (n, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"READY=1");

        std::env::remove_var("NOTIFY_SOCKET");
    }
}
