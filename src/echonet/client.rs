use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::debug;

use super::frame::Frame;
use super::{hex, EchonetError, ECHONET_PORT};

pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest datagram we accept from a device.
const MAX_DATAGRAM: usize = 1024;

/// Result of one request/response exchange. The caller checks the TID.
#[derive(Debug)]
pub struct Exchange {
    pub tid: u16,
    pub payload: Vec<u8>,
    pub peer: SocketAddr,
}

/// One-shot request/response client for a single device.
///
/// The standard port is bound for the duration of one exchange and released
/// again, so at most one transaction is ever in flight. The TID counter lives
/// here and is valid for the life of the process.
pub struct EchonetClient {
    target: SocketAddr,
    timeout: Duration,
    tid: u16,
}

impl EchonetClient {
    pub fn new(target: IpAddr) -> Self {
        EchonetClient {
            target: SocketAddr::new(target, ECHONET_PORT),
            timeout: RESPONSE_TIMEOUT,
            tid: 0,
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    fn with_target_port(mut self, port: u16) -> Self {
        self.target.set_port(port);
        self
    }

    /// Next transaction ID: wraps from 0xFFFF back to 0x0001, never 0x0000.
    pub fn next_tid(&mut self) -> u16 {
        self.tid = self.tid.wrapping_add(1);
        if self.tid == 0 {
            self.tid = 1;
        }
        self.tid
    }

    /// Verify the standard port can be bound at all. The socket is released
    /// immediately; later exchanges bind it per transaction.
    pub async fn probe_port() -> Result<(), EchonetError> {
        UdpSocket::bind(("0.0.0.0", ECHONET_PORT))
            .await
            .map_err(|e| EchonetError::PortUnavailable(ECHONET_PORT, e))?;
        Ok(())
    }

    /// Send one frame and wait for exactly one datagram within the timeout.
    pub async fn transact(&mut self, frame: &Frame) -> Result<Exchange, EchonetError> {
        let data = frame.encode()?;
        debug!(tid = frame.tid, data = %hex(&data), target = %self.target, "sending request");

        let socket = UdpSocket::bind(("0.0.0.0", ECHONET_PORT))
            .await
            .map_err(|e| EchonetError::PortUnavailable(ECHONET_PORT, e))?;
        socket
            .send_to(&data, self.target)
            .await
            .map_err(EchonetError::Transport)?;

        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, peer) = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| EchonetError::Timeout(self.timeout))?
            .map_err(EchonetError::Transport)?;

        debug!(tid = frame.tid, %peer, data = %hex(&buf[..len]), "received datagram");
        Ok(Exchange {
            tid: frame.tid,
            payload: buf[..len].to_vec(),
            peer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echonet::frame::Property;
    use crate::echonet::{ServiceCode, CONTROLLER_EOJ, Eoj};

    #[test]
    fn tid_allocation_is_monotonic_and_skips_zero() {
        let mut client = EchonetClient::new(IpAddr::from([127, 0, 0, 1]));
        assert_eq!(client.next_tid(), 1);
        assert_eq!(client.next_tid(), 2);
        assert_eq!(client.next_tid(), 3);

        client.tid = 0xFFFE;
        assert_eq!(client.next_tid(), 0xFFFF);
        assert_eq!(client.next_tid(), 0x0001);
        assert_eq!(client.next_tid(), 0x0002);
    }

    fn read_request(tid: u16) -> Frame {
        Frame {
            tid,
            seoj: CONTROLLER_EOJ,
            deoj: Eoj::new(0x02, 0x7D, 0x01),
            esv: ServiceCode::Get,
            opc: 1,
            properties: vec![Property::request(0xE4)],
        }
    }

    // Both cases share one test body: the socket binds the fixed service
    // port, so two tests running in parallel would race for it.
    #[tokio::test]
    async fn transact_loopback_and_timeout() {
        // Addressed to ourselves, the request datagram loops straight back
        // and doubles as the response.
        let mut client = EchonetClient::new(IpAddr::from([127, 0, 0, 1]));
        let tid = client.next_tid();
        let frame = read_request(tid);
        let exchange = client.transact(&frame).await.unwrap();
        assert_eq!(exchange.tid, tid);
        assert_eq!(exchange.payload, frame.encode().unwrap());

        // A local port nobody is bound to never answers; the socket is
        // unconnected, so the ICMP unreachable is not surfaced either.
        let mut client = EchonetClient::new(IpAddr::from([127, 0, 0, 1]))
            .with_target_port(9)
            .with_timeout(Duration::from_millis(100));
        let tid = client.next_tid();
        let err = client.transact(&read_request(tid)).await.unwrap_err();
        assert!(matches!(err, EchonetError::Timeout(_)));
    }
}
