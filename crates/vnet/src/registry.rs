//! Process-wide proxy registry keyed by real-server address, grounded on
//! the original `proxyMux sync.Map` and on the teacher's `ChannelRegistry`
//! (`Arc<RwLock<HashMap<K, Arc<V>>>>` + `get_or_create`) pattern.

use crate::proxy::VnetProxy;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type VnetRegistry = Arc<RwLock<HashMap<SocketAddr, Arc<VnetProxy>>>>;

pub fn new_registry() -> VnetRegistry {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Returns the existing proxy for `real_server_addr` if one is already
/// running, otherwise binds, starts, and registers a new one.
pub async fn get_or_create_proxy(
    registry: &VnetRegistry,
    real_server_addr: SocketAddr,
) -> std::io::Result<Arc<VnetProxy>> {
    {
        let proxies = registry.read().await;
        if let Some(proxy) = proxies.get(&real_server_addr) {
            return Ok(Arc::clone(proxy));
        }
    }

    let mut proxies = registry.write().await;
    if let Some(proxy) = proxies.get(&real_server_addr) {
        return Ok(Arc::clone(proxy));
    }

    let proxy = VnetProxy::bind(real_server_addr).await?;
    proxy.start();
    proxies.insert(real_server_addr, Arc::clone(&proxy));
    Ok(proxy)
}

pub async fn remove_proxy(registry: &VnetRegistry, real_server_addr: SocketAddr) {
    let mut proxies = registry.write().await;
    if let Some(proxy) = proxies.remove(&real_server_addr) {
        proxy.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reuses_existing_proxy_for_same_address() {
        let registry = new_registry();
        let addr: SocketAddr = "127.0.0.1:45100".parse().unwrap();

        let first = get_or_create_proxy(&registry, addr).await.unwrap();
        let second = get_or_create_proxy(&registry, addr).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        remove_proxy(&registry, addr).await;
        assert!(registry.read().await.get(&addr).is_none());
    }
}
