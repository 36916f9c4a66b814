use std::net::{ToSocketAddrs, UdpSocket};

use ksim_protocol::{RemoteTransport, TransportError};
use tracing::debug;

/// Default RPC port of a kernel instance.
pub const DEFAULT_RPC_PORT: u16 = 12345;

/// Sends each power request as a single UDP datagram to `<target>:<port>`.
#[derive(Debug, Clone)]
pub struct UdpRemoteTransport {
    port: u16,
}

impl UdpRemoteTransport {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for UdpRemoteTransport {
    fn default() -> Self {
        Self::new(DEFAULT_RPC_PORT)
    }
}

impl RemoteTransport for UdpRemoteTransport {
    fn send(&self, request: &str, target: &str) -> Result<(), TransportError> {
        let address = (target, self.port)
            .to_socket_addrs()
            .map_err(|error| TransportError::InvalidTarget(format!("{target}: {error}")))?
            .next()
            .ok_or_else(|| TransportError::InvalidTarget(target.to_owned()))?;

        let local = if address.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)?;
        let sent = socket.send_to(request.as_bytes(), address)?;
        debug!(%address, sent, "power request sent");
        Ok(())
    }
}
