//! The transport reactor: one OS thread owning every socket and timer.
//!
//! All TCP reads and writes, UDP datagrams, connection state transitions and
//! protocol timers run on this thread, on a current-thread tokio runtime.
//! Other threads talk to it through [`ReactorRequest`]s and the per-peer send
//! queues; it talks back through [`NetEvent`]s.

use crate::connection::run_connection;
use crate::send_queue::PeerQueues;
use quarry_base::{Config, NodeId, Result};
use quarry_protocol::{Frame, Hello, Payload};
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};

/// How long a dial attempt may take before it is abandoned.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Events the reactor reports to the broker thread.
#[derive(Debug)]
pub enum NetEvent {
    /// A connection reached the Established state.
    PeerConnected {
        hello: Hello,
        addr: Option<SocketAddr>,
    },
    /// A connection left the Established state.
    PeerDisconnected { peer: NodeId },
    /// A reliable message arrived over TCP.
    Message {
        peer: NodeId,
        seq: u32,
        payload: Payload,
    },
    /// A short announcement arrived over UDP.
    Datagram {
        addr: SocketAddr,
        payload: Payload,
    },
    /// Status gossip timer fired.
    GossipTick,
    /// Heartbeat timer fired.
    Heartbeat,
    /// The process received an interrupt signal.
    ShutdownRequested,
    /// The transport could not come up (e.g. ports taken); fatal for a
    /// daemon.
    TransportFailed,
}

/// Requests other threads may hand to the reactor.
#[derive(Debug)]
pub enum ReactorRequest {
    /// Dial a peer.
    Connect(SocketAddr),
    /// Fire one unreliable datagram.
    SendUdp { addr: SocketAddr, payload: Payload },
    /// Stop the reactor: drain connections and exit the I/O thread.
    Shutdown,
}

/// State shared by every task on the reactor thread.
pub(crate) struct ReactorShared {
    pub config: Arc<Config>,
    pub hello: Hello,
    pub queues: Arc<PeerQueues>,
    pub events: crossbeam_channel::Sender<NetEvent>,
    pub shutdown: watch::Receiver<bool>,
}

/// Cloneable request channel into the reactor thread.
#[derive(Clone)]
pub struct ReactorHandle {
    requests: mpsc::UnboundedSender<ReactorRequest>,
}

impl ReactorHandle {
    /// A handle with no reactor behind it, plus the receiving end; used by
    /// tests and tools that drive the requests themselves.
    #[must_use]
    pub fn detached() -> (Self, mpsc::UnboundedReceiver<ReactorRequest>) {
        let (requests, rx) = mpsc::unbounded_channel();
        (Self { requests }, rx)
    }

    /// Hands a request to the reactor thread.
    pub fn request(&self, request: ReactorRequest) {
        let _ = self.requests.send(request);
    }

    /// Dials a peer.
    pub fn connect(&self, addr: SocketAddr) {
        self.request(ReactorRequest::Connect(addr));
    }

    /// Fires one unreliable datagram.
    pub fn send_udp(&self, addr: SocketAddr, payload: Payload) {
        self.request(ReactorRequest::SendUdp { addr, payload });
    }
}

/// Handle to the reactor thread.
pub struct Reactor {
    thread: Option<std::thread::JoinHandle<()>>,
    requests: mpsc::UnboundedSender<ReactorRequest>,
}

impl Reactor {
    /// Starts the reactor thread, binding the configured TCP and UDP ports.
    pub fn spawn(
        config: Arc<Config>,
        hello: Hello,
        queues: Arc<PeerQueues>,
        events: crossbeam_channel::Sender<NetEvent>,
    ) -> Result<Self> {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("quarry-reactor".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to build reactor runtime");
                        return;
                    }
                };
                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, reactor_main(config, hello, queues, events, requests_rx));
            })?;
        Ok(Self {
            thread: Some(thread),
            requests,
        })
    }

    /// A cloneable request channel into this reactor.
    #[must_use]
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            requests: self.requests.clone(),
        }
    }

    /// Hands a request to the reactor thread.
    pub fn request(&self, request: ReactorRequest) {
        let _ = self.requests.send(request);
    }

    /// Dials a peer.
    pub fn connect(&self, addr: SocketAddr) {
        self.request(ReactorRequest::Connect(addr));
    }

    /// Stops the reactor and joins its thread.
    pub fn shutdown(mut self) {
        let _ = self.requests.send(ReactorRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        let _ = self.requests.send(ReactorRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn reactor_main(
    config: Arc<Config>,
    hello: Hello,
    queues: Arc<PeerQueues>,
    events: crossbeam_channel::Sender<NetEvent>,
    mut requests: mpsc::UnboundedReceiver<ReactorRequest>,
) {
    // A daemon without its ports is useless and shuts down; a solving node
    // degrades to dial-out only.
    let listener = match TcpListener::bind(("0.0.0.0", config.tcp_port)).await {
        Ok(l) => Some(l),
        Err(e) => {
            tracing::error!(port = config.tcp_port, error = %e, "cannot bind TCP listener");
            if config.daemon {
                let _ = events.send(NetEvent::TransportFailed);
                return;
            }
            None
        }
    };
    let udp = match UdpSocket::bind(("0.0.0.0", config.udp_port)).await {
        Ok(s) => Some(Rc::new(s)),
        Err(e) => {
            tracing::error!(port = config.udp_port, error = %e, "cannot bind UDP socket");
            if config.daemon {
                let _ = events.send(NetEvent::TransportFailed);
                return;
            }
            None
        }
    };
    tracing::info!(
        tcp = config.tcp_port,
        udp = config.udp_port,
        id = hello.peer_id,
        "transport reactor listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shared = Rc::new(ReactorShared {
        config,
        hello,
        queues,
        events,
        shutdown: shutdown_rx,
    });

    if let Some(listener) = listener {
        tokio::task::spawn_local(accept_loop(listener, Rc::clone(&shared)));
    }
    if let Some(udp) = udp.clone() {
        tokio::task::spawn_local(udp_loop(udp, Rc::clone(&shared)));
    }
    tokio::task::spawn_local(timer_loop(Rc::clone(&shared)));
    tokio::task::spawn_local(signal_loop(Rc::clone(&shared)));

    while let Some(request) = requests.recv().await {
        match request {
            ReactorRequest::Connect(addr) => {
                tokio::task::spawn_local(dial(addr, Rc::clone(&shared)));
            }
            ReactorRequest::SendUdp { addr, payload } => {
                let Some(udp) = &udp else { continue };
                let frame = Frame::new(payload.kind(), payload.flags(), 0, payload.encode());
                if let Err(e) = udp.send_to(&frame.encode(), addr).await {
                    tracing::debug!(%addr, error = %e, "udp send failed");
                }
            }
            ReactorRequest::Shutdown => break,
        }
    }

    // Draining: every connection flushes an End frame and closes.
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_millis(200)).await;
    tracing::info!("transport reactor stopped");
}

async fn accept_loop(listener: TcpListener, shared: Rc<ReactorShared>) {
    let mut shutdown = shared.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tracing::debug!(%addr, "inbound connection");
                    tokio::task::spawn_local(run_connection(stream, false, Rc::clone(&shared)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            },
            _ = shutdown.changed() => return,
        }
    }
}

async fn dial(addr: SocketAddr, shared: Rc<ReactorShared>) {
    let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await;
    match connect {
        Ok(Ok(stream)) => {
            tracing::debug!(%addr, "outbound connection");
            run_connection(stream, true, shared).await;
        }
        Ok(Err(e)) => {
            tracing::warn!(%addr, error = %e, "dial failed");
        }
        Err(_) => {
            tracing::warn!(%addr, "dial timed out");
        }
    }
}

async fn udp_loop(udp: Rc<UdpSocket>, shared: Rc<ReactorShared>) {
    let mut shutdown = shared.shutdown.clone();
    let mut buf = vec![0u8; 64 * 1024 + 1024];
    loop {
        tokio::select! {
            received = udp.recv_from(&mut buf) => match received {
                Ok((n, addr)) => match Frame::decode(&buf[..n])
                    .and_then(|f| Payload::decode(f.kind, f.flags, &f.payload))
                {
                    Ok(payload) => {
                        let _ = shared.events.send(NetEvent::Datagram { addr, payload });
                    }
                    Err(e) => {
                        tracing::debug!(%addr, error = %e, "dropped malformed datagram");
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "udp receive failed");
                }
            },
            _ = shutdown.changed() => return,
        }
    }
}

async fn timer_loop(shared: Rc<ReactorShared>) {
    let mut shutdown = shared.shutdown.clone();
    let mut gossip = tokio::time::interval(shared.config.gossip_interval);
    let mut heartbeat = tokio::time::interval(shared.config.heartbeat_interval);
    gossip.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = gossip.tick() => {
                let _ = shared.events.send(NetEvent::GossipTick);
            }
            _ = heartbeat.tick() => {
                let _ = shared.events.send(NetEvent::Heartbeat);
            }
            _ = shutdown.changed() => return,
        }
    }
}

async fn signal_loop(shared: Rc<ReactorShared>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupt received, requesting shutdown");
        let _ = shared.events.send(NetEvent::ShutdownRequested);
    }
}
