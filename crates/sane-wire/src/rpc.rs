//! Request and reply records of the control connection.
//!
//! Records implement both [`Encode`] and [`Decode`] so that either side of the
//! connection can be driven from this module.

use bytes::Bytes;

use crate::codec::{Decode, Encode, WireError, WireReader, WireWriter};
use crate::types::{
    Action, ByteOrder, Device, Info, OptionDescriptor, OptionValue, Parameters, Status, ValueType,
    VersionCode,
};

/// Remote procedure numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    Init,
    GetDevices,
    Open,
    Close,
    GetOptionDescriptors,
    ControlOption,
    GetParameters,
    Start,
    Cancel,
    Authorize,
    /// Ends the control connection; the peer sends no reply.
    Exit,
}

impl Procedure {
    pub const fn code(self) -> i32 {
        match self {
            Procedure::Init => 0,
            Procedure::GetDevices => 1,
            Procedure::Open => 2,
            Procedure::Close => 3,
            Procedure::GetOptionDescriptors => 4,
            Procedure::ControlOption => 5,
            Procedure::GetParameters => 6,
            Procedure::Start => 7,
            Procedure::Cancel => 8,
            Procedure::Authorize => 9,
            Procedure::Exit => 10,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, WireError> {
        Ok(match code {
            0 => Procedure::Init,
            1 => Procedure::GetDevices,
            2 => Procedure::Open,
            3 => Procedure::Close,
            4 => Procedure::GetOptionDescriptors,
            5 => Procedure::ControlOption,
            6 => Procedure::GetParameters,
            7 => Procedure::Start,
            8 => Procedure::Cancel,
            9 => Procedure::Authorize,
            10 => Procedure::Exit,
            value => {
                return Err(WireError::UnknownValue {
                    kind: "procedure",
                    value,
                })
            }
        })
    }

    /// Whether the peer answers this procedure.
    pub const fn has_reply(self) -> bool {
        !matches!(self, Procedure::Exit)
    }
}

impl Encode for Procedure {
    fn encode(&self, w: &mut WireWriter) {
        w.word(self.code());
    }
}

impl Decode for Procedure {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Procedure::from_code(r.word()?)
    }
}

/// Encode a procedure word followed by its request record.
pub fn encode_call<T: Encode + ?Sized>(procedure: Procedure, request: &T, build: u16) -> Bytes {
    let mut w = WireWriter::new(build);
    procedure.encode(&mut w);
    request.encode(&mut w);
    w.freeze()
}

/// Replies that may ask the client to authorize a resource before the call
/// proceeds.
pub trait AuthChallenge {
    /// Resource the peer wants credentials for, if any.
    fn resource_to_authorize(&self) -> Option<&str>;
}

fn non_empty(resource: &Option<String>) -> Option<&str> {
    resource.as_deref().filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReq {
    pub version_code: VersionCode,
    pub username: Option<String>,
}

impl Encode for InitReq {
    fn encode(&self, w: &mut WireWriter) {
        self.version_code.encode(w);
        w.string(self.username.as_deref());
    }
}

impl Decode for InitReq {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            version_code: VersionCode::decode(r)?,
            username: r.string()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitReply {
    pub status: Status,
    pub version_code: VersionCode,
}

impl Encode for InitReply {
    fn encode(&self, w: &mut WireWriter) {
        self.status.encode(w);
        self.version_code.encode(w);
    }
}

impl Decode for InitReply {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            status: Status::decode(r)?,
            version_code: VersionCode::decode(r)?,
        })
    }
}

/// Device list; on the wire a pointer array terminated by a null pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetDevicesReply {
    pub status: Status,
    pub devices: Vec<Device>,
}

impl Encode for GetDevicesReply {
    fn encode(&self, w: &mut WireWriter) {
        self.status.encode(w);
        w.len(self.devices.len() + 1);
        for device in &self.devices {
            w.ptr(Some(device));
        }
        w.ptr::<Device>(None);
    }
}

impl Decode for GetDevicesReply {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let status = Status::decode(r)?;
        let len = r.len()?;
        let mut devices = Vec::with_capacity(len.saturating_sub(1));
        for _ in 0..len {
            if let Some(device) = r.ptr::<Device>()? {
                devices.push(device);
            }
        }
        Ok(Self { status, devices })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReq {
    pub device_name: String,
}

impl Encode for OpenReq {
    fn encode(&self, w: &mut WireWriter) {
        w.string(Some(&self.device_name));
    }
}

impl Decode for OpenReq {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            device_name: String::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReply {
    pub status: Status,
    pub handle: i32,
    pub resource_to_authorize: Option<String>,
}

impl Encode for OpenReply {
    fn encode(&self, w: &mut WireWriter) {
        self.status.encode(w);
        w.word(self.handle);
        w.string(self.resource_to_authorize.as_deref());
    }
}

impl Decode for OpenReply {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            status: Status::decode(r)?,
            handle: r.word()?,
            resource_to_authorize: r.string()?,
        })
    }
}

impl AuthChallenge for OpenReply {
    fn resource_to_authorize(&self) -> Option<&str> {
        non_empty(&self.resource_to_authorize)
    }
}

/// All option descriptors of an open device, indexed by option number.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OptionDescriptorArray {
    pub descriptors: Vec<OptionDescriptor>,
}

impl Encode for OptionDescriptorArray {
    fn encode(&self, w: &mut WireWriter) {
        w.len(self.descriptors.len());
        for desc in &self.descriptors {
            w.ptr(Some(desc));
        }
    }
}

impl Decode for OptionDescriptorArray {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let len = r.len()?;
        let mut descriptors = Vec::with_capacity(len);
        for _ in 0..len {
            let desc = r
                .ptr::<OptionDescriptor>()?
                .ok_or(WireError::Invalid("null option descriptor"))?;
            descriptors.push(desc);
        }
        Ok(Self { descriptors })
    }
}

/// Get or set one option. With protocol build 3 and later the value fields
/// are left out of `SetAuto` requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOptionReq {
    pub handle: i32,
    pub option: i32,
    pub action: Action,
    pub value_type: ValueType,
    pub value_size: i32,
    pub value: OptionValue,
}

impl ControlOptionReq {
    fn carries_value(action: Action, build: u16) -> bool {
        build < 3 || action != Action::SetAuto
    }
}

impl Encode for ControlOptionReq {
    fn encode(&self, w: &mut WireWriter) {
        w.word(self.handle);
        w.word(self.option);
        self.action.encode(w);
        if Self::carries_value(self.action, w.build()) {
            self.value_type.encode(w);
            w.word(self.value_size);
            self.value.encode_sized(w, self.value_type, self.value_size);
        }
    }
}

impl Decode for ControlOptionReq {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let handle = r.word()?;
        let option = r.word()?;
        let action = Action::decode(r)?;
        if !Self::carries_value(action, r.build()) {
            return Ok(Self {
                handle,
                option,
                action,
                value_type: ValueType::Int,
                value_size: 0,
                value: OptionValue::None,
            });
        }
        let value_type = ValueType::decode(r)?;
        let value_size = r.word()?;
        let value = OptionValue::decode_typed(r, value_type)?;
        Ok(Self {
            handle,
            option,
            action,
            value_type,
            value_size,
            value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOptionReply {
    pub status: Status,
    pub info: Info,
    pub value_type: ValueType,
    pub value_size: i32,
    pub value: OptionValue,
    pub resource_to_authorize: Option<String>,
}

impl Encode for ControlOptionReply {
    fn encode(&self, w: &mut WireWriter) {
        self.status.encode(w);
        w.word(self.info.bits());
        self.value_type.encode(w);
        w.word(self.value_size);
        self.value.encode_sized(w, self.value_type, self.value_size);
        w.string(self.resource_to_authorize.as_deref());
    }
}

impl Decode for ControlOptionReply {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let status = Status::decode(r)?;
        let info = Info::from_bits_retain(r.word()?);
        let value_type = ValueType::decode(r)?;
        let value_size = r.word()?;
        let value = OptionValue::decode_typed(r, value_type)?;
        Ok(Self {
            status,
            info,
            value_type,
            value_size,
            value,
            resource_to_authorize: r.string()?,
        })
    }
}

impl AuthChallenge for ControlOptionReply {
    fn resource_to_authorize(&self) -> Option<&str> {
        non_empty(&self.resource_to_authorize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetParametersReply {
    pub status: Status,
    pub params: Parameters,
}

impl Encode for GetParametersReply {
    fn encode(&self, w: &mut WireWriter) {
        self.status.encode(w);
        self.params.encode(w);
    }
}

impl Decode for GetParametersReply {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            status: Status::decode(r)?,
            params: Parameters::decode(r)?,
        })
    }
}

/// Data port and sample byte order for a starting scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReply {
    pub status: Status,
    pub port: i32,
    pub byte_order: ByteOrder,
    pub resource_to_authorize: Option<String>,
}

impl Encode for StartReply {
    fn encode(&self, w: &mut WireWriter) {
        self.status.encode(w);
        w.word(self.port);
        w.word(self.byte_order.to_word());
        w.string(self.resource_to_authorize.as_deref());
    }
}

impl Decode for StartReply {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            status: Status::decode(r)?,
            port: r.word()?,
            byte_order: ByteOrder::from_word(r.word()?),
            resource_to_authorize: r.string()?,
        })
    }
}

impl AuthChallenge for StartReply {
    fn resource_to_authorize(&self) -> Option<&str> {
        non_empty(&self.resource_to_authorize)
    }
}

/// Credentials relayed for a challenged resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationReq {
    pub resource: String,
    pub username: String,
    pub password: String,
}

impl Encode for AuthorizationReq {
    fn encode(&self, w: &mut WireWriter) {
        w.string(Some(&self.resource));
        w.string(Some(&self.username));
        w.string(Some(&self.password));
    }
}

impl Decode for AuthorizationReq {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            resource: String::decode(r)?,
            username: String::decode(r)?,
            password: String::decode(r)?,
        })
    }
}
