//! Network service browser for daemons advertised over mDNS / DNS-SD.

use std::fmt;

use mdns_sd::{ServiceDaemon, ServiceEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::discovery::{resolved_service, DiscoveryEvent, ServiceBrowser, EVENT_QUEUE};

/// DNS-SD service type announced by scanner daemons.
pub const SERVICE_TYPE: &str = "_sane-port._tcp.local.";

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error("mdns: {0}")]
    Mdns(#[from] mdns_sd::Error),
}

/// Browses the local network for scanner daemons. Dropping it stops the
/// mDNS daemon.
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
    service_type: String,
    events: mpsc::Receiver<DiscoveryEvent>,
}

impl fmt::Debug for MdnsBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdnsBrowser")
            .field("service_type", &self.service_type)
            .finish()
    }
}

impl MdnsBrowser {
    /// Browse for [`SERVICE_TYPE`]. Must be called inside a tokio runtime.
    pub fn start() -> Result<Self, BrowseError> {
        Self::browse(SERVICE_TYPE)
    }

    pub fn browse(service_type: &str) -> Result<Self, BrowseError> {
        let daemon = ServiceDaemon::new()?;
        let receiver = daemon.browse(service_type)?;
        let (tx, events) = mpsc::channel(EVENT_QUEUE);
        tokio::task::spawn_blocking(move || {
            // Ends when the daemon shuts down and closes the receiver.
            while let Ok(event) = receiver.recv() {
                if let Some(event) = discovery_event(event) {
                    if tx.blocking_send(event).is_err() {
                        break;
                    }
                }
            }
            debug!("mdns receiver closed");
        });
        info!(%service_type, "browsing for scanner daemons");
        Ok(Self {
            daemon,
            service_type: service_type.to_string(),
            events,
        })
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        if let Err(err) = self.daemon.shutdown() {
            warn!(%err, "mdns daemon shutdown failed");
        }
    }
}

#[async_trait::async_trait]
impl ServiceBrowser for MdnsBrowser {
    async fn next_event(&mut self) -> Option<DiscoveryEvent> {
        self.events.recv().await
    }
}

/// Map an mDNS browse event onto a registry event. Only resolved and removed
/// services matter.
pub fn discovery_event(event: ServiceEvent) -> Option<DiscoveryEvent> {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            debug!(service = %info.get_fullname(), host = %info.get_hostname(), "service resolved");
            Some(resolved_service(
                info.get_hostname(),
                info.get_addresses().iter().copied(),
            ))
        }
        ServiceEvent::ServiceRemoved(_, fullname) => Some(DiscoveryEvent::Removed {
            host_name: fullname,
        }),
        _ => None,
    }
}
