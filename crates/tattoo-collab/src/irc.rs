//! IRC relay datagram endpoint: a fire-and-forget
//! UDP JSON datagram sent to a local `irker`-compatible relay, grounded on
//! `original_source/tester.py`'s `send_irker`.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::Serialize;
use tokio::net::UdpSocket;

const DEFAULT_RELAY: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 6659));

#[derive(Serialize)]
struct IrkerMessage<'a> {
    to: &'a str,
    privmsg: String,
}

/// Sends job-completion notices to an IRC channel via a local relay.
pub struct IrcRelay {
    relay_addr: SocketAddr,
    channel: String,
    identifier: String,
}

impl IrcRelay {
    /// `identifier` is the Tester's name, echoed in every message.
    pub fn new(channel: impl Into<String>, identifier: impl Into<String>) -> Self {
        IrcRelay {
            relay_addr: DEFAULT_RELAY,
            channel: channel.into(),
            identifier: identifier.into(),
        }
    }

    pub fn with_relay_addr(mut self, addr: SocketAddr) -> Self {
        self.relay_addr = addr;
        self
    }

    /// Best-effort notify; failures are logged, never propagated — an
    /// unreachable relay must not fail a test job.
    pub async fn notify(&self, bug: u32, summary: &str) {
        let text = format!("[{}]: bug #{bug} - {summary}", self.identifier);
        let payload = IrkerMessage { to: &self.channel, privmsg: text };
        let Ok(json) = serde_json::to_vec(&payload) else {
            return;
        };
        match UdpSocket::bind("0.0.0.0:0").await {
            Ok(sock) => {
                if let Err(e) = sock.send_to(&json, self.relay_addr).await {
                    tracing::debug!(error = %e, "irc relay send failed");
                }
            }
            Err(e) => tracing::debug!(error = %e, "irc relay socket bind failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket as TokioUdp;

    #[tokio::test]
    async fn notify_sends_a_json_datagram_naming_the_identifier_and_bug() {
        let listener = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let relay = IrcRelay::new("ircs://irc.example/#tattoo", "alpha").with_relay_addr(addr);
        relay.notify(42, "success").await;

        let mut buf = [0u8; 512];
        let (n, _) = tokio::time::timeout(std::time::Duration::from_secs(1), listener.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("\"to\":\"ircs://irc.example/#tattoo\""));
        assert!(text.contains("bug #42"));
        assert!(text.contains("success"));
    }
}
