//! An open remote device: options, parameters, and the scan data stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sane_wire::rpc::{
    ControlOptionReply, ControlOptionReq, GetParametersReply, OpenReply, OpenReq,
    OptionDescriptorArray, StartReply,
};
use sane_wire::{Action, ByteOrder, Info, OptionDescriptor, OptionValue, Parameters, Procedure, ValueType};
use tl_net::{
    call_authorized, AuthCallback, AuthState, ByteOrderRepair, DataLink, IoMode, NetError,
    ReadStatus,
};
use tokio::time;
use tracing::{debug, info, trace, warn};

use crate::registry::HostEntry;

pub mod consts {
    use super::Duration;

    /// Bound on the cancel acknowledgement when no connect timeout is set.
    pub const CANCEL_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Result of a successful control-option call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionUpdate {
    /// Side effects reported by the device.
    pub info: Info,
    /// Current value after the call.
    pub value: OptionValue,
}

#[derive(Debug, Default)]
struct OptionCache {
    descriptors: Vec<OptionDescriptor>,
    valid: bool,
}

/// An open device on a remote host.
pub struct Session {
    host: Arc<HostEntry>,
    device: String,
    handle: i32,
    options: OptionCache,
    params: Option<Parameters>,
    data: Option<DataLink>,
    repair: ByteOrderRepair,
    swap_samples: bool,
    peer_order: Option<ByteOrder>,
    auth: AuthState,
    auth_cb: Option<Arc<dyn AuthCallback>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host.name())
            .field("device", &self.device)
            .field("handle", &self.handle)
            .field("scanning", &self.is_scanning())
            .finish()
    }
}

impl Session {
    /// Open `device` on `host` and fetch its option descriptors. An empty
    /// device name opens the first device of the host.
    pub(crate) async fn open(
        host: Arc<HostEntry>,
        device: &str,
        auth_cb: Option<Arc<dyn AuthCallback>>,
    ) -> Result<Self, NetError> {
        let mut auth = AuthState::Idle;
        let reply: OpenReply = {
            let mut link = host.link().await?;
            let req = OpenReq {
                device_name: device.to_string(),
            };
            call_authorized(&mut link, Procedure::Open, &req, device, auth_cb.as_deref(), &mut auth)
                .await?
        };
        NetError::check(reply.status, host.name())?;
        info!(host = %host.name(), %device, handle = reply.handle, "device opened");

        let mut session = Self {
            host,
            device: device.to_string(),
            handle: reply.handle,
            options: OptionCache::default(),
            params: None,
            data: None,
            repair: ByteOrderRepair::new(),
            swap_samples: false,
            peer_order: None,
            auth,
            auth_cb,
        };
        if let Err(err) = session.fetch_options().await {
            warn!(host = %session.host.name(), %err, "option fetch failed, closing device");
            let _ = session.close_remote().await;
            return Err(err);
        }
        Ok(session)
    }

    /// Peer-issued handle of the open device.
    pub fn handle(&self) -> i32 {
        self.handle
    }

    pub fn host_name(&self) -> &str {
        self.host.name()
    }

    pub fn device_name(&self) -> &str {
        &self.device
    }

    /// Whether credentials were supplied for the last challenged call.
    pub fn auth_active(&self) -> bool {
        self.auth.is_active()
    }

    /// Whether a data link is open.
    pub fn is_scanning(&self) -> bool {
        self.data.as_ref().is_some_and(|d| !d.is_closed())
    }

    /// Byte order announced by the last start reply.
    pub fn peer_byte_order(&self) -> Option<ByteOrder> {
        self.peer_order
    }

    async fn fetch_options(&mut self) -> Result<(), NetError> {
        let array: OptionDescriptorArray = {
            let mut link = self.host.link().await?;
            link.call(Procedure::GetOptionDescriptors, &self.handle).await?
        };
        debug!(handle = self.handle, count = array.descriptors.len(), "option descriptors");
        self.options = OptionCache {
            descriptors: array.descriptors,
            valid: true,
        };
        Ok(())
    }

    /// Fetch the option descriptors again.
    pub async fn reload_options(&mut self) -> Result<(), NetError> {
        self.fetch_options().await
    }

    /// All option descriptors, fetched again when invalidated.
    pub async fn option_descriptors(&mut self) -> Result<&[OptionDescriptor], NetError> {
        if !self.options.valid {
            self.fetch_options().await?;
        }
        Ok(&self.options.descriptors)
    }

    /// Descriptor of option `index`, fetched again when invalidated.
    pub async fn option_descriptor(&mut self, index: usize) -> Result<&OptionDescriptor, NetError> {
        self.option_descriptors()
            .await?
            .get(index)
            .ok_or_else(|| NetError::Invalid(format!("no option {index}")))
    }

    /// Get or set option `index`. Fails with `Invalid` while the descriptor
    /// cache is stale; call [`Session::reload_options`] or
    /// [`Session::option_descriptors`] first.
    pub async fn control_option(
        &mut self,
        index: usize,
        action: Action,
        value: OptionValue,
    ) -> Result<OptionUpdate, NetError> {
        if !self.options.valid {
            return Err(NetError::Invalid("option descriptors reload needed".into()));
        }
        let desc = self
            .options
            .descriptors
            .get(index)
            .ok_or_else(|| NetError::Invalid(format!("no option {index}")))?;
        let value_size = request_size(desc, action, &value);
        let req = ControlOptionReq {
            handle: self.handle,
            option: index as i32,
            action,
            value_type: desc.value_type,
            value_size,
            value: match action {
                Action::SetValue => value,
                _ => OptionValue::None,
            },
        };
        trace!(handle = self.handle, option = index, ?action, "control option");

        let reply: ControlOptionReply = {
            let mut link = self.host.link().await?;
            call_authorized(
                &mut link,
                Procedure::ControlOption,
                &req,
                &self.device,
                self.auth_cb.as_deref(),
                &mut self.auth,
            )
            .await?
        };
        NetError::check(reply.status, self.host.name())?;
        if reply.info.contains(Info::RELOAD_OPTIONS) {
            debug!(handle = self.handle, "option descriptors invalidated");
            self.options.valid = false;
        }
        if reply.info.contains(Info::RELOAD_PARAMS) {
            self.params = None;
        }
        Ok(OptionUpdate {
            info: reply.info,
            value: reply.value,
        })
    }

    /// Current scan parameters.
    pub async fn get_parameters(&mut self) -> Result<Parameters, NetError> {
        let reply: GetParametersReply = {
            let mut link = self.host.link().await?;
            link.call(Procedure::GetParameters, &self.handle).await?
        };
        NetError::check(reply.status, self.host.name())?;
        self.params = Some(reply.params);
        Ok(reply.params)
    }

    /// Start a frame and connect its data link.
    pub async fn start(&mut self) -> Result<(), NetError> {
        if self.is_scanning() {
            return Err(NetError::Invalid("data link already open".into()));
        }
        self.repair.reset();
        let params = match self.params {
            Some(params) => params,
            None => self.get_parameters().await?,
        };

        let (reply, peer): (StartReply, SocketAddr) = {
            let mut link = self.host.link().await?;
            let reply = call_authorized(
                &mut link,
                Procedure::Start,
                &self.handle,
                &self.device,
                self.auth_cb.as_deref(),
                &mut self.auth,
            )
            .await?;
            (reply, link.peer_addr())
        };
        NetError::check(reply.status, self.host.name())?;
        let port = u16::try_from(reply.port)
            .ok()
            .filter(|&port| port != 0)
            .ok_or_else(|| NetError::Invalid(format!("bad data port {}", reply.port)))?;

        let addr = SocketAddr::new(peer.ip(), port);
        let data = DataLink::connect(addr, self.host.connect_timeout()).await?;
        self.swap_samples = params.depth == 16 && reply.byte_order != ByteOrder::native();
        self.peer_order = Some(reply.byte_order);
        self.data = Some(data);
        info!(
            handle = self.handle,
            %addr,
            peer_order = ?reply.byte_order,
            swap = self.swap_samples,
            "scan started"
        );
        Ok(())
    }

    /// Read scan data. 16-bit samples are byte swapped when the peer's byte
    /// order differs from ours.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadStatus, NetError> {
        let Some(data) = self.data.as_mut() else {
            return Err(NetError::Cancelled);
        };
        if !self.swap_samples || buf.is_empty() {
            return data.read(buf).await;
        }
        if let Some(byte) = self.repair.take_left_over() {
            buf[0] = byte;
            return Ok(ReadStatus::Data(1));
        }
        loop {
            match data.read(buf).await? {
                ReadStatus::Data(filled) => {
                    let len = self.repair.repair(buf, filled);
                    // A lone odd byte yields nothing yet; keep reading unless
                    // the caller asked not to block.
                    if len > 0 || filled == 0 || data.io_mode() == IoMode::NonBlocking {
                        return Ok(ReadStatus::Data(len));
                    }
                }
                ReadStatus::Eof => {
                    if self.repair.has_hang_over() {
                        warn!(handle = self.handle, "odd trailing byte in 16-bit data dropped");
                    }
                    return Ok(ReadStatus::Eof);
                }
            }
        }
    }

    /// Cancel the current operation. The data link is torn down before the
    /// peer is told, and the acknowledgement is awaited for at most the
    /// connect timeout (or [`consts::CANCEL_TIMEOUT`]). A missing
    /// acknowledgement breaks the control link and reports `Cancelled`.
    pub async fn cancel(&mut self) -> Result<(), NetError> {
        if let Some(mut data) = self.data.take() {
            data.close();
        }
        self.repair.reset();

        let handle = self.handle;
        let limit = self
            .host
            .connect_timeout()
            .unwrap_or(consts::CANCEL_TIMEOUT);
        let result = async {
            let mut link = self.host.link().await?;
            link.send(Procedure::Cancel, &handle).await?;
            match time::timeout(limit, link.read_reply::<i32>()).await {
                Ok(ack) => ack.map(drop),
                Err(_) => {
                    warn!(handle, ?limit, "no cancel acknowledgement, dropping control link");
                    link.mark_broken();
                    Err(NetError::Cancelled)
                }
            }
        }
        .await;
        info!(handle, ok = result.is_ok(), "scan cancelled");
        result
    }

    /// Switch data link reads between blocking and non-blocking.
    pub fn set_io_mode(&mut self, non_blocking: bool) -> Result<(), NetError> {
        match self.data.as_mut() {
            Some(data) if !data.is_closed() => {
                data.set_io_mode(if non_blocking {
                    IoMode::NonBlocking
                } else {
                    IoMode::Blocking
                });
                Ok(())
            }
            _ => Err(NetError::Invalid("no scan in progress".into())),
        }
    }

    /// Wait until [`Session::read`] can make progress.
    pub async fn readable(&self) -> Result<(), NetError> {
        match &self.data {
            Some(data) => data.readable().await,
            None => Err(NetError::Invalid("no scan in progress".into())),
        }
    }

    /// Close the device on the peer and drop the data link.
    pub async fn close(mut self) -> Result<(), NetError> {
        if let Some(mut data) = self.data.take() {
            data.close();
        }
        let result = self.close_remote().await;
        info!(host = %self.host.name(), handle = self.handle, "device closed");
        result
    }

    async fn close_remote(&mut self) -> Result<(), NetError> {
        let mut link = self.host.link().await?;
        let _ack: i32 = link.call(Procedure::Close, &self.handle).await?;
        Ok(())
    }
}

/// Bytes of value carried by a control-option request.
fn request_size(desc: &OptionDescriptor, action: Action, value: &OptionValue) -> i32 {
    match (action, desc.value_type) {
        (Action::SetAuto, _) | (_, ValueType::Button | ValueType::Group) => 0,
        (Action::SetValue, ValueType::String) => match value {
            OptionValue::String(s) => desc.size.min(s.len() as i32 + 1),
            _ => desc.size,
        },
        _ => desc.size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sane_wire::{Capabilities, Constraint, Unit};

    fn desc(value_type: ValueType, size: i32) -> OptionDescriptor {
        OptionDescriptor {
            name: "mode".into(),
            title: "Mode".into(),
            desc: String::new(),
            value_type,
            unit: Unit::None,
            size,
            cap: Capabilities::SOFT_SELECT,
            constraint: Constraint::None,
        }
    }

    #[test]
    fn short_strings_shrink_the_request() {
        let d = desc(ValueType::String, 32);
        let value = OptionValue::String("Gray".into());
        assert_eq!(request_size(&d, Action::SetValue, &value), 5);
        assert_eq!(request_size(&d, Action::GetValue, &OptionValue::None), 32);
        let long = OptionValue::String("x".repeat(40));
        assert_eq!(request_size(&d, Action::SetValue, &long), 32);
    }

    #[test]
    fn auto_and_buttons_carry_no_value() {
        let d = desc(ValueType::Int, 4);
        assert_eq!(request_size(&d, Action::SetAuto, &OptionValue::None), 0);
        let b = desc(ValueType::Button, 4);
        assert_eq!(request_size(&b, Action::SetValue, &OptionValue::None), 0);
    }
}
