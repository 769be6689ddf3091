//! Endpoints by address and port.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::lookup_host;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ListenerConfig;
use crate::listener::endpoint::EndpointListener;
use crate::listener::http_listener::ListenerCore;
use crate::listener::prefix::{HostKind, ListenerPrefix};
use crate::protocol::ListenerError;

type Endpoints = HashMap<IpAddr, HashMap<u16, EndpointListener>>;

/// Owns the listening sockets shared by every [`HttpListener`](crate::listener::HttpListener)
/// created with it.
///
/// An endpoint is bound when the first prefix for its address and port is registered and
/// closed when the last one is removed.
#[derive(Debug)]
pub struct EndpointManager {
    endpoints: Mutex<Endpoints>,
    config: Arc<ListenerConfig>,
}

impl Default for EndpointManager {
    fn default() -> Self {
        Self::new(ListenerConfig::default())
    }
}

impl EndpointManager {
    pub fn new(config: ListenerConfig) -> Self {
        Self { endpoints: Mutex::new(HashMap::new()), config: Arc::new(config) }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Local addresses of the bound endpoints.
    pub async fn bound_addrs(&self) -> Vec<SocketAddr> {
        let endpoints = self.endpoints.lock().await;
        endpoints.values().flat_map(HashMap::values).map(EndpointListener::local_addr).collect()
    }

    /// Registers every prefix, removing the ones already registered if one of them fails.
    pub(crate) async fn add_listener(&self, prefixes: &[ListenerPrefix], listener: &Arc<ListenerCore>) -> Result<(), ListenerError> {
        let mut endpoints = self.endpoints.lock().await;
        for (index, prefix) in prefixes.iter().enumerate() {
            if let Err(e) = self.add_prefix_locked(&mut endpoints, prefix, listener).await {
                warn!(%prefix, cause = %e, "can't register prefix, roll back");
                for added in &prefixes[..index] {
                    self.remove_prefix_locked(&mut endpoints, added, listener).await;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    pub(crate) async fn remove_listener(&self, prefixes: &[ListenerPrefix], listener: &Arc<ListenerCore>) {
        let mut endpoints = self.endpoints.lock().await;
        for prefix in prefixes {
            self.remove_prefix_locked(&mut endpoints, prefix, listener).await;
        }
    }

    pub(crate) async fn add_prefix(&self, prefix: &ListenerPrefix, listener: &Arc<ListenerCore>) -> Result<(), ListenerError> {
        let mut endpoints = self.endpoints.lock().await;
        self.add_prefix_locked(&mut endpoints, prefix, listener).await
    }

    pub(crate) async fn remove_prefix(&self, prefix: &ListenerPrefix, listener: &Arc<ListenerCore>) {
        let mut endpoints = self.endpoints.lock().await;
        self.remove_prefix_locked(&mut endpoints, prefix, listener).await;
    }

    /// Closes the endpoint bound on `addr` and `port`, whatever prefixes it still serves.
    pub async fn remove_endpoint(&self, addr: IpAddr, port: u16) {
        let mut endpoints = self.endpoints.lock().await;
        remove_endpoint_locked(&mut endpoints, addr, port).await;
    }

    async fn add_prefix_locked(
        &self,
        endpoints: &mut Endpoints,
        prefix: &ListenerPrefix,
        listener: &Arc<ListenerCore>,
    ) -> Result<(), ListenerError> {
        let addr = self.resolve(prefix).await;
        let port = prefix.port();
        let ports = endpoints.entry(addr).or_default();
        if !ports.contains_key(&port) {
            match EndpointListener::bind(SocketAddr::new(addr, port), prefix.is_secure(), Arc::clone(&self.config)).await {
                Ok(endpoint) => {
                    ports.insert(port, endpoint);
                }
                Err(e) => {
                    if ports.is_empty() {
                        endpoints.remove(&addr);
                    }
                    return Err(e);
                }
            }
        }

        let result = ports[&port].add_prefix(prefix, listener);
        if result.is_err() && ports[&port].is_empty() {
            remove_endpoint_locked(endpoints, addr, port).await;
        }
        result
    }

    async fn remove_prefix_locked(&self, endpoints: &mut Endpoints, prefix: &ListenerPrefix, listener: &Arc<ListenerCore>) {
        let addr = self.resolve(prefix).await;
        let Some(endpoint) = endpoints.get(&addr).and_then(|ports| ports.get(&prefix.port())) else {
            debug!(%prefix, "no endpoint for prefix");
            return;
        };
        if endpoint.remove_prefix(prefix, listener) {
            remove_endpoint_locked(endpoints, addr, prefix.port()).await;
        }
    }

    async fn resolve(&self, prefix: &ListenerPrefix) -> IpAddr {
        let host = prefix.host();
        if prefix.host_kind() != HostKind::Exact {
            return self.unspecified();
        }

        let literal = host.strip_prefix('[').and_then(|host| host.strip_suffix(']')).unwrap_or(host);
        if let Ok(ip) = literal.parse::<IpAddr>() {
            return ip;
        }

        match lookup_host((host, prefix.port())).await {
            Ok(mut addrs) => addrs.next().map_or_else(|| self.unspecified(), |addr| addr.ip()),
            Err(e) => {
                debug!(host, cause = %e, "can't resolve host, use the unspecified address");
                self.unspecified()
            }
        }
    }

    fn unspecified(&self) -> IpAddr {
        if self.config.dual_stack { IpAddr::V6(Ipv6Addr::UNSPECIFIED) } else { IpAddr::V4(Ipv4Addr::UNSPECIFIED) }
    }
}

async fn remove_endpoint_locked(endpoints: &mut Endpoints, addr: IpAddr, port: u16) {
    let Some(ports) = endpoints.get_mut(&addr) else {
        return;
    };
    let endpoint = ports.remove(&port);
    if ports.is_empty() {
        endpoints.remove(&addr);
    }
    if let Some(endpoint) = endpoint {
        endpoint.close().await;
    }
}
