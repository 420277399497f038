//! Known remote hosts and their lazily connected control links.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sane_wire::rpc::GetDevicesReply;
use sane_wire::Procedure;
use tl_net::{ControlLink, NetError};
use tokio::net::lookup_host;
use tokio::sync::{MappedMutexGuard, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, info, warn};

use crate::device::{DeviceName, RemoteDevice};

/// Exclusive access to the control link of one host.
pub type LinkGuard<'a> = MappedMutexGuard<'a, ControlLink>;

/// Settings shared by every host of a registry.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub port: u16,
    pub connect_timeout: Option<Duration>,
    pub username: Option<String>,
}

/// One remote host. Its control link is created on first use and replaced
/// after a transport failure.
#[derive(Debug)]
pub struct HostEntry {
    name: String,
    addrs: Vec<SocketAddr>,
    options: Arc<ConnectOptions>,
    link: AsyncMutex<Option<ControlLink>>,
}

impl HostEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addresses(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.options.connect_timeout
    }

    /// Lock the control link, connecting first when there is none or the
    /// previous one broke.
    pub async fn link(&self) -> Result<LinkGuard<'_>, NetError> {
        let mut slot = self.link.lock().await;
        if slot.as_ref().is_some_and(ControlLink::is_broken) {
            info!(host = %self.name, "dropping broken control link");
            *slot = None;
        }
        if slot.is_none() {
            let link = ControlLink::connect(
                &self.name,
                &self.addrs,
                self.options.connect_timeout,
                self.options.username.as_deref(),
            )
            .await?;
            *slot = Some(link);
        }
        AsyncMutexGuard::try_map(slot, Option::as_mut)
            .map_err(|_| NetError::Invalid(format!("{} has no control link", self.name)))
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Send `EXIT` on a connected link and drop it.
    pub async fn disconnect(&self) {
        if let Some(link) = self.link.lock().await.take() {
            link.exit().await;
        }
    }
}

/// Ordered, de-duplicated set of remote hosts.
#[derive(Debug)]
pub struct Registry {
    hosts: Mutex<Vec<Arc<HostEntry>>>,
    options: Arc<ConnectOptions>,
}

impl Registry {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            hosts: Mutex::new(Vec::new()),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    fn lock_hosts(&self) -> std::sync::MutexGuard<'_, Vec<Arc<HostEntry>>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `name`, resolving it on the configured port. An already known
    /// name returns the existing entry without resolving again.
    pub async fn add_host(&self, name: &str) -> Result<Arc<HostEntry>, NetError> {
        if let Some(entry) = self.find(name) {
            debug!(host = %name, "host already registered");
            return Ok(entry);
        }
        let addrs: Vec<SocketAddr> = lookup_host((name, self.options.port)).await?.collect();
        if addrs.is_empty() {
            return Err(NetError::Invalid(format!("{name} did not resolve")));
        }
        let mut hosts = self.lock_hosts();
        // Another task may have added it while we were resolving.
        if let Some(entry) = hosts.iter().find(|h| h.name == name) {
            return Ok(Arc::clone(entry));
        }
        let entry = Arc::new(HostEntry {
            name: name.to_string(),
            addrs,
            options: Arc::clone(&self.options),
            link: AsyncMutex::new(None),
        });
        info!(host = %name, addrs = ?entry.addrs, "registered host");
        hosts.push(Arc::clone(&entry));
        Ok(entry)
    }

    pub fn find(&self, name: &str) -> Option<Arc<HostEntry>> {
        self.lock_hosts().iter().find(|h| h.name == name).cloned()
    }

    /// Snapshot of the registered hosts in registration order.
    pub fn hosts(&self) -> Vec<Arc<HostEntry>> {
        self.lock_hosts().clone()
    }

    pub fn len(&self) -> usize {
        self.lock_hosts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask every host for its devices. Hosts that cannot be reached or that
    /// report an error are skipped.
    pub async fn enumerate_devices(&self) -> Vec<RemoteDevice> {
        let mut devices = Vec::new();
        for host in self.hosts() {
            match query_devices(&host).await {
                Ok(found) => devices.extend(found),
                Err(err) => warn!(host = %host.name, %err, "skipping host"),
            }
        }
        devices
    }

    /// Close every connected control link.
    pub async fn disconnect_all(&self) {
        for host in self.hosts() {
            host.disconnect().await;
        }
    }
}

async fn query_devices(host: &HostEntry) -> Result<Vec<RemoteDevice>, NetError> {
    let mut link = host.link().await?;
    let reply: GetDevicesReply = link.call(Procedure::GetDevices, &()).await?;
    NetError::check(reply.status, &host.name)?;
    debug!(host = %host.name, count = reply.devices.len(), "device list");
    Ok(reply
        .devices
        .into_iter()
        .map(|device| RemoteDevice {
            name: DeviceName::new(host.name.as_str(), device.name).to_string(),
            vendor: device.vendor,
            model: device.model,
            kind: device.kind,
        })
        .collect())
}
