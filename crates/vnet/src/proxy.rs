//! Bidirectional UDP bridge between a virtual endpoint and a real server
//! socket (§4.5), grounded on the original `UDPProxy`: one real socket per
//! unique virtual source, dialed lazily and kept for the proxy's lifetime,
//! with one reverse-path task per real socket spawned before the first
//! blocking read so shutdown ordering is deterministic.
//!
//! No in-process virtual-network router is available in this crate's
//! dependency set (unlike the Go original's `pion/transport/vnet`), so the
//! "virtual endpoint" is a real loopback `UdpSocket` on an ephemeral port
//! substituted for the real server address at the client-stack level —
//! tests point their client at the proxy's virtual address instead of the
//! real server's.

use crate::classify::{classify, ChunkKind};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub type Filter = Arc<dyn Fn(ChunkKind, &[u8]) -> bool + Send + Sync>;

const MAX_DATAGRAM: usize = 65_507;

struct Endpoint {
    real_socket: Arc<UdpSocket>,
}

/// One virtual⇄real UDP bridge for a single real server address.
pub struct VnetProxy {
    real_server_addr: SocketAddr,
    vnet_socket: Arc<UdpSocket>,
    endpoints: RwLock<HashMap<SocketAddr, Endpoint>>,
    filters: RwLock<Vec<Filter>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl VnetProxy {
    /// Binds the virtual-side socket on an ephemeral loopback port. The
    /// caller reads `virtual_addr()` back to point test clients at it.
    pub async fn bind(real_server_addr: SocketAddr) -> std::io::Result<Arc<Self>> {
        let vnet_socket = UdpSocket::bind("127.0.0.1:0").await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Arc::new(Self {
            real_server_addr,
            vnet_socket: Arc::new(vnet_socket),
            endpoints: RwLock::new(HashMap::new()),
            filters: RwLock::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            shutdown_rx,
        }))
    }

    pub fn virtual_addr(&self) -> std::io::Result<SocketAddr> {
        self.vnet_socket.local_addr()
    }

    pub fn real_server_addr(&self) -> SocketAddr {
        self.real_server_addr
    }

    /// Registers a filter; the first filter in registration order to
    /// return `false` drops the chunk.
    pub async fn add_filter(&self, filter: Filter) {
        self.filters.write().await.push(filter);
    }

    async fn accepts(&self, payload: &[u8]) -> bool {
        let chunk = classify(payload);
        for filter in self.filters.read().await.iter() {
            if !filter(chunk.kind, payload) {
                return false;
            }
        }
        true
    }

    /// Starts the deliver-to-server loop. Spawned as a background task on
    /// the returned handle's owning runtime; call `stop` to tear it down.
    pub fn start(self: &Arc<Self>) {
        let proxy = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = proxy.vnet_socket.recv_from(&mut buf) => {
                        let (n, source) = match result {
                            Ok(v) => v,
                            Err(e) => {
                                warn!(real_server = %proxy.real_server_addr, "vnet recv error: {e}");
                                continue;
                            }
                        };
                        let payload = &buf[..n];
                        if !proxy.accepts(payload).await {
                            debug!(%source, "vnet dropped chunk by filter");
                            continue;
                        }
                        if let Err(e) = proxy.deliver_to_server(source, payload).await {
                            warn!(%source, "vnet deliver-to-server failed: {e}");
                        }
                    }
                }
            }
        });
        // Intentionally not awaited to completion here; `stop` joins it.
        tokio::spawn(async move {
            let _ = handle.await;
        });
    }

    async fn deliver_to_server(&self, source: SocketAddr, payload: &[u8]) -> std::io::Result<()> {
        let real_socket = self.endpoint_for(source).await?;
        real_socket.send(payload).await?;
        Ok(())
    }

    async fn endpoint_for(&self, source: SocketAddr) -> std::io::Result<Arc<UdpSocket>> {
        if let Some(ep) = self.endpoints.read().await.get(&source) {
            return Ok(Arc::clone(&ep.real_socket));
        }

        let mut endpoints = self.endpoints.write().await;
        if let Some(ep) = endpoints.get(&source) {
            return Ok(Arc::clone(&ep.real_socket));
        }

        let real_socket = UdpSocket::bind("127.0.0.1:0").await?;
        real_socket.connect(self.real_server_addr).await?;
        let real_socket = Arc::new(real_socket);

        self.spawn_reverse_path(source, Arc::clone(&real_socket)).await;

        endpoints.insert(
            source,
            Endpoint {
                real_socket: Arc::clone(&real_socket),
            },
        );
        Ok(real_socket)
    }

    /// Spawned before the caller's blocking read returns, matching the
    /// original's `wg.Add(1)` ordering: the task is registered in `tasks`
    /// before it ever calls `recv`, so `stop` can always join it.
    async fn spawn_reverse_path(&self, virtual_source: SocketAddr, real_socket: Arc<UdpSocket>) {
        let vnet_socket = Arc::clone(&self.vnet_socket);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    result = real_socket.recv(&mut buf) => {
                        let n = match result {
                            Ok(n) => n,
                            Err(_) => break,
                        };
                        if vnet_socket.send_to(&buf[..n], virtual_source).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        self.tasks.lock().await.push(handle);
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }

    pub async fn endpoint_count(&self) -> usize {
        self.endpoints.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket as TokioUdp;

    #[tokio::test]
    async fn bridges_one_client_to_real_server() {
        let real_server = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        let real_addr = real_server.local_addr().unwrap();

        let proxy = VnetProxy::bind(real_addr).await.unwrap();
        proxy.start();
        let virtual_addr = proxy.virtual_addr().unwrap();

        let client = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"hello", virtual_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = tokio::time::timeout(std::time::Duration::from_secs(2), real_server.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_ne!(from, real_addr);

        real_server.send_to(b"world", from).await.unwrap();
        let mut reply = [0u8; 16];
        let (n, _) = tokio::time::timeout(std::time::Duration::from_secs(2), client.recv_from(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply[..n], b"world");

        proxy.stop().await;
    }

    #[tokio::test]
    async fn filter_can_drop_chunks() {
        let real_server = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        let real_addr = real_server.local_addr().unwrap();

        let proxy = VnetProxy::bind(real_addr).await.unwrap();
        proxy
            .add_filter(Arc::new(|kind, _payload| kind != ChunkKind::Stun))
            .await;
        proxy.start();
        let virtual_addr = proxy.virtual_addr().unwrap();

        let client = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[0x00, 0x01], virtual_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            real_server.recv_from(&mut buf),
        )
        .await;
        assert!(result.is_err(), "STUN chunk should have been dropped");

        proxy.stop().await;
    }

    #[tokio::test]
    async fn many_sources_share_one_proxy_with_distinct_endpoints() {
        let real_server = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        let real_addr = real_server.local_addr().unwrap();

        let proxy = VnetProxy::bind(real_addr).await.unwrap();
        proxy.start();
        let virtual_addr = proxy.virtual_addr().unwrap();

        let client_a = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        let client_b = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        client_a.send_to(b"a", virtual_addr).await.unwrap();
        client_b.send_to(b"b", virtual_addr).await.unwrap();

        let mut buf = [0u8; 16];
        for _ in 0..2 {
            tokio::time::timeout(std::time::Duration::from_secs(2), real_server.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
        }

        assert_eq!(proxy.endpoint_count().await, 2);
        proxy.stop().await;
    }
}
