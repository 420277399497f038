#![cfg_attr(docsrs, feature(doc_cfg))]
//! Client for scanners shared over the network by a remote scanner daemon.
//!
//! ```rust,no_run
//! use sane_remote::{Client, ClientConfig, ReadStatus};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ClientConfig::from_env()?;
//! config.hosts.push("scanhost.local".into());
//! let client = Client::init(config, None).await;
//! for device in client.get_devices(false).await {
//!     println!("{} ({} {})", device.name, device.vendor, device.model);
//! }
//!
//! let mut session = client.open("scanhost.local:").await?;
//! session.start().await?;
//! let mut buf = vec![0u8; 32 * 1024];
//! while let ReadStatus::Data(len) = session.read(&mut buf).await? {
//!     println!("{len} bytes");
//! }
//! session.close().await?;
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub use sane_wire as wire;
pub use tl_net as net;

pub mod config;
pub mod device;
pub mod discovery;
#[cfg(feature = "mdns")]
#[cfg_attr(docsrs, doc(cfg(feature = "mdns")))]
pub mod mdns;
pub mod registry;
pub mod session;

use std::sync::Arc;

use tracing::{debug, info, warn};

pub use config::{ClientConfig, ConfigError};
pub use device::{DeviceName, RemoteDevice};
pub use discovery::{resolved_service, ChannelBrowser, Discovery, DiscoveryEvent, ServiceBrowser};
#[cfg(feature = "mdns")]
pub use mdns::{BrowseError, MdnsBrowser};
pub use registry::{ConnectOptions, HostEntry, Registry};
pub use session::{OptionUpdate, Session};
pub use tl_net::{AuthCallback, Credentials, NetError, ReadStatus};

/// Process-level client context: the host registry, the credential
/// callback, and optional discovery.
pub struct Client {
    registry: Arc<Registry>,
    auth: Option<Arc<dyn AuthCallback>>,
    discovery: Option<Discovery>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.registry)
            .field("auth", &self.auth.is_some())
            .field("discovery", &self.discovery.is_some())
            .finish()
    }
}

impl Client {
    /// Build the registry from `config`. Hosts that do not resolve are
    /// skipped.
    pub async fn init(config: ClientConfig, auth: Option<Arc<dyn AuthCallback>>) -> Self {
        let username = config.effective_username();
        let registry = Arc::new(Registry::new(ConnectOptions {
            port: config.port,
            connect_timeout: config.connect_timeout,
            username,
        }));
        for host in &config.hosts {
            if let Err(err) = registry.add_host(host).await {
                warn!(%host, %err, "ignoring configured host");
            }
        }
        info!(
            version = %Self::version(),
            hosts = registry.len(),
            timeout = ?config.connect_timeout,
            "client initialised"
        );
        Self {
            registry,
            auth,
            discovery: None,
        }
    }

    /// Protocol version implemented by this client.
    pub fn version() -> sane_wire::VersionCode {
        sane_wire::local_version()
    }

    /// Feed hosts from `browser` into the registry until shutdown.
    pub fn start_discovery(&mut self, browser: Box<dyn ServiceBrowser>) {
        if let Some(old) = self.discovery.take() {
            old.stop();
        }
        self.discovery = Some(Discovery::spawn(browser, Arc::clone(&self.registry)));
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Register one more host.
    pub async fn add_host(&self, name: &str) -> Result<Arc<HostEntry>, NetError> {
        self.registry.add_host(name).await
    }

    /// Devices of every reachable host. `local_only` asks for devices attached
    /// to this machine, which a network client never has.
    pub async fn get_devices(&self, local_only: bool) -> Vec<RemoteDevice> {
        if local_only {
            return Vec::new();
        }
        let devices = self.registry.enumerate_devices().await;
        debug!(count = devices.len(), "enumerated devices");
        devices
    }

    /// Open `host:device`. Unknown hosts are registered first.
    pub async fn open(&self, name: &str) -> Result<Session, NetError> {
        let name = DeviceName::parse(name)?;
        let host = match self.registry.find(&name.host) {
            Some(host) => host,
            None => {
                debug!(host = %name.host, "opening device on unregistered host");
                self.registry.add_host(&name.host).await?
            }
        };
        Session::open(host, &name.device, self.auth.clone()).await
    }

    /// Stop discovery and close every control link.
    pub async fn shutdown(mut self) {
        if let Some(discovery) = self.discovery.take() {
            discovery.stop();
        }
        self.registry.disconnect_all().await;
        info!("client shut down");
    }
}
