//! Manager listening-socket setup: either an inherited
//! file descriptor from the service manager, or a freshly bound path with
//! stale-file cleanup and `0666` permissions.

use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::FromRawFd;
use std::path::Path;

use tokio::net::UnixListener;

#[allow(unsafe_code)]
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if tattoo_sdnotify::has_inherited_listen_fd() {
        tracing::info!("using inherited listening socket (fd {})", tattoo_sdnotify::LISTEN_FDS_START);
        // SAFETY: has_inherited_listen_fd() verified exactly one socket was
        // handed to this process at LISTEN_FDS_START by the service manager.
        let std_listener = unsafe {
            std::os::unix::net::UnixListener::from_raw_fd(tattoo_sdnotify::LISTEN_FDS_START)
        };
        std_listener.set_nonblocking(true)?;
        return UnixListener::from_std(std_listener);
    }

    if path.exists() {
        tracing::warn!(path = %path.display(), "removing stale socket file");
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_fresh_and_removes_a_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tattoo.socket");
        std::fs::write(&path, b"stale").unwrap();

        let listener = bind(&path).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o666);
        drop(listener);
    }
}
