//! Dynamic host discovery.
//!
//! A [`ServiceBrowser`] runs on its own task and forwards the services it
//! sees through a channel; a second task registers each found host with the
//! [`Registry`]. Removals are only logged: hosts stay registered until the
//! client shuts down.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::Registry;

/// Capacity of the channel between the browser and the registry.
pub(crate) const EVENT_QUEUE: usize = 64;

/// A change reported by a service browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Found {
        host_name: String,
        address: Option<IpAddr>,
    },
    Removed {
        host_name: String,
    },
}

/// Source of discovery events, e.g. an mDNS/DNS-SD browser for the
/// scanner daemon service type.
#[async_trait]
pub trait ServiceBrowser: Send {
    /// Next event, or `None` once the browser has stopped.
    async fn next_event(&mut self) -> Option<DiscoveryEvent>;
}

/// Event for a service resolved to `host_name` and its addresses. A trailing
/// root dot is dropped from the name and IPv4 addresses are preferred.
pub fn resolved_service<I>(host_name: &str, addresses: I) -> DiscoveryEvent
where
    I: IntoIterator<Item = IpAddr>,
{
    DiscoveryEvent::Found {
        host_name: host_name.trim_end_matches('.').to_string(),
        address: addresses
            .into_iter()
            .min_by_key(|addr| (addr.is_ipv6(), *addr)),
    }
}

/// Browser fed from an in-process channel.
#[derive(Debug)]
pub struct ChannelBrowser {
    rx: mpsc::Receiver<DiscoveryEvent>,
}

impl ChannelBrowser {
    pub fn new(capacity: usize) -> (mpsc::Sender<DiscoveryEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl ServiceBrowser for ChannelBrowser {
    async fn next_event(&mut self) -> Option<DiscoveryEvent> {
        self.rx.recv().await
    }
}

/// Running discovery tasks. Dropping it leaves the tasks running; call
/// [`Discovery::stop`].
#[derive(Debug)]
pub struct Discovery {
    browse: JoinHandle<()>,
    apply: JoinHandle<()>,
}

impl Discovery {
    /// Start browsing and feeding `registry`.
    pub fn spawn(mut browser: Box<dyn ServiceBrowser>, registry: Arc<Registry>) -> Self {
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
        let browse = tokio::spawn(async move {
            while let Some(event) = browser.next_event().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("service browser finished");
        });
        let apply = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                apply_event(&registry, event).await;
            }
        });
        info!("discovery started");
        Self { browse, apply }
    }

    /// Abort both tasks.
    pub fn stop(&self) {
        self.browse.abort();
        self.apply.abort();
        debug!("discovery stopped");
    }
}

/// Register a discovered host under its advertised name, falling back to
/// its address when the name does not resolve.
pub async fn apply_event(registry: &Registry, event: DiscoveryEvent) {
    match event {
        DiscoveryEvent::Found { host_name, address } => {
            let err = match registry.add_host(&host_name).await {
                Ok(_) => return,
                Err(err) => err,
            };
            match address {
                Some(addr) => {
                    debug!(host = %host_name, %addr, %err, "name did not resolve, using address");
                    if let Err(err) = registry.add_host(&addr.to_string()).await {
                        warn!(host = %host_name, %addr, %err, "cannot register discovered host");
                    }
                }
                None => warn!(host = %host_name, %err, "cannot register discovered host"),
            }
        }
        DiscoveryEvent::Removed { host_name } => {
            info!(host = %host_name, "discovered host went away; keeping registration");
        }
    }
}
