//! Broadcast transport: the interface the session driver consumes, and a LAN implementation
//! (UDP multicast) standing in for BLE advertising on desktop.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nearmatch_core::SessionEvent;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 61, 61);
const MAX_DATAGRAM: usize = 512;
/// Pause after a transient receive error.
const RECV_RETRY_BACKOFF: Duration = Duration::from_millis(20);
/// Consecutive transient errors tolerated before the listener gives up.
const MAX_RECV_RETRIES: u32 = 50;
#[cfg(target_os = "linux")]
const ENOBUFS: i32 = 105;

/// Advertise/scan capability. Calls return quickly; slow work runs on spawned tasks and
/// failures after start arrive on the listener channel as events.
pub trait BroadcastTransport: Send {
    fn is_available(&self) -> bool;
    fn is_enabled(&self) -> bool;
    /// Replace whatever is being advertised with `payload`.
    fn start_broadcast(&mut self, payload: Vec<u8>) -> anyhow::Result<()>;
    fn stop_broadcast(&mut self);
    /// Deliver every received payload to `sink` as `SessionEvent::Packet`.
    fn start_listening(&mut self, sink: UnboundedSender<SessionEvent>) -> anyhow::Result<()>;
    fn stop_listening(&mut self);
}

/// UDP multicast on the local segment (TTL 1). Loopback stays on, so the session sees its own
/// advertisements and filters them as echoes.
pub struct LanTransport {
    socket: Arc<UdpSocket>,
    dest: SocketAddr,
    interval: Duration,
    nominal_rssi: i16,
    broadcast_task: Option<JoinHandle<()>>,
    listen_task: Option<JoinHandle<()>>,
}

impl LanTransport {
    /// Bind and join the group. Must be called inside a tokio runtime.
    pub fn bind(port: u16, interval: Duration, nominal_rssi: i16) -> std::io::Result<Self> {
        let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
        std_sock.set_multicast_ttl_v4(1)?;
        std_sock.set_multicast_loop_v4(true)?;
        std_sock.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_sock)?;
        tracing::info!(group = %MULTICAST_GROUP, port, "LAN transport bound");
        Ok(Self {
            socket: Arc::new(socket),
            dest: SocketAddr::new(MULTICAST_GROUP.into(), port),
            interval,
            nominal_rssi,
            broadcast_task: None,
            listen_task: None,
        })
    }
}

impl BroadcastTransport for LanTransport {
    fn is_available(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn start_broadcast(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        self.stop_broadcast();
        let socket = self.socket.clone();
        let dest = self.dest;
        let interval = self.interval;
        self.broadcast_task = Some(tokio::spawn(async move {
            loop {
                if let Err(e) = socket.send_to(&payload, dest).await {
                    tracing::debug!(error = %e, "advertisement send failed");
                }
                tokio::time::sleep(interval).await;
            }
        }));
        Ok(())
    }

    fn stop_broadcast(&mut self) {
        if let Some(task) = self.broadcast_task.take() {
            task.abort();
        }
    }

    fn start_listening(&mut self, sink: UnboundedSender<SessionEvent>) -> anyhow::Result<()> {
        self.stop_listening();
        let socket = self.socket.clone();
        let recv = move || {
            let socket = socket.clone();
            async move {
                let mut buf = vec![0u8; MAX_DATAGRAM];
                let (n, _from) = socket.recv_from(&mut buf).await?;
                buf.truncate(n);
                Ok::<_, io::Error>(buf)
            }
        };
        self.listen_task = Some(tokio::spawn(receive_loop(recv, sink, self.nominal_rssi)));
        Ok(())
    }

    fn stop_listening(&mut self) {
        if let Some(task) = self.listen_task.take() {
            task.abort();
        }
    }
}

/// Errors after which the next receive may well succeed.
fn is_transient(e: &io::Error) -> bool {
    #[cfg(target_os = "linux")]
    {
        if e.raw_os_error() == Some(ENOBUFS) {
            return true;
        }
    }
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::OutOfMemory
    )
}

/// Forward datagrams from `recv` to `sink` until the sink closes. Transient errors skip one
/// attempt; a fatal error, or too many transient ones in a row, ends with `ScanFailed`.
async fn receive_loop<F, Fut>(mut recv: F, sink: UnboundedSender<SessionEvent>, rssi: i16)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<Vec<u8>>>,
{
    let mut failures = 0u32;
    loop {
        match recv().await {
            Ok(bytes) => {
                failures = 0;
                let event = SessionEvent::Packet {
                    bytes,
                    rssi,
                    at: Instant::now(),
                };
                if sink.send(event).is_err() {
                    return;
                }
            }
            Err(e) if is_transient(&e) && failures < MAX_RECV_RETRIES => {
                failures += 1;
                tracing::debug!(error = %e, failures, "receive failed; retrying");
                tokio::time::sleep(RECV_RETRY_BACKOFF).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, failures, "listener stopped");
                let _ = sink.send(SessionEvent::ScanFailed(e.to_string()));
                return;
            }
        }
    }
}

impl Drop for LanTransport {
    fn drop(&mut self) {
        self.stop_broadcast();
        self.stop_listening();
    }
}
