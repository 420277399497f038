//! Typed protocol values shared by requests and replies.

use std::fmt;

use bitflags::bitflags;

use crate::codec::{Decode, Encode, WireError, WireReader, WireWriter, WORD_SIZE};

/// Version triple exchanged during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionCode {
    pub major: u8,
    pub minor: u8,
    pub build: u16,
}

impl VersionCode {
    pub const fn new(major: u8, minor: u8, build: u16) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Pack into the `major << 24 | minor << 16 | build` word layout.
    pub const fn to_word(self) -> i32 {
        ((self.major as u32) << 24 | (self.minor as u32) << 16 | self.build as u32) as i32
    }

    pub const fn from_word(word: i32) -> Self {
        let raw = word as u32;
        Self {
            major: (raw >> 24) as u8,
            minor: (raw >> 16) as u8,
            build: raw as u16,
        }
    }
}

impl fmt::Display for VersionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

impl Encode for VersionCode {
    fn encode(&self, w: &mut WireWriter) {
        w.word(self.to_word());
    }
}

impl Decode for VersionCode {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.word().map(Self::from_word)
    }
}

/// Status codes carried in replies and in the data link error sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Good,
    Unsupported,
    Cancelled,
    DeviceBusy,
    Invalid,
    Eof,
    Jammed,
    NoDocs,
    CoverOpen,
    IoError,
    NoMem,
    AccessDenied,
    WarmingUp,
    HwLocked,
    /// A status code not known to this implementation.
    Unknown(i32),
}

impl Status {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Status::Good,
            1 => Status::Unsupported,
            2 => Status::Cancelled,
            3 => Status::DeviceBusy,
            4 => Status::Invalid,
            5 => Status::Eof,
            6 => Status::Jammed,
            7 => Status::NoDocs,
            8 => Status::CoverOpen,
            9 => Status::IoError,
            10 => Status::NoMem,
            11 => Status::AccessDenied,
            12 => Status::WarmingUp,
            13 => Status::HwLocked,
            other => Status::Unknown(other),
        }
    }

    pub const fn to_raw(self) -> i32 {
        match self {
            Status::Good => 0,
            Status::Unsupported => 1,
            Status::Cancelled => 2,
            Status::DeviceBusy => 3,
            Status::Invalid => 4,
            Status::Eof => 5,
            Status::Jammed => 6,
            Status::NoDocs => 7,
            Status::CoverOpen => 8,
            Status::IoError => 9,
            Status::NoMem => 10,
            Status::AccessDenied => 11,
            Status::WarmingUp => 12,
            Status::HwLocked => 13,
            Status::Unknown(code) => code,
        }
    }

    pub fn is_good(self) -> bool {
        self == Status::Good
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Status::Good => "Success",
            Status::Unsupported => "Operation not supported",
            Status::Cancelled => "Operation was cancelled",
            Status::DeviceBusy => "Device busy",
            Status::Invalid => "Invalid argument",
            Status::Eof => "End of file reached",
            Status::Jammed => "Document feeder jammed",
            Status::NoDocs => "Document feeder out of documents",
            Status::CoverOpen => "Scanner cover is open",
            Status::IoError => "Error during device I/O",
            Status::NoMem => "Out of memory",
            Status::AccessDenied => "Access to resource has been denied",
            Status::WarmingUp => "Lamp not ready, please retry",
            Status::HwLocked => "Scanner mechanism locked for transport",
            Status::Unknown(code) => return write!(f, "Unknown status code ({code})"),
        };
        f.write_str(text)
    }
}

impl Encode for Status {
    fn encode(&self, w: &mut WireWriter) {
        w.word(self.to_raw());
    }
}

impl Decode for Status {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        r.word().map(Status::from_raw)
    }
}

/// Byte order advertised by the server in a start reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    const LITTLE_WORD: i32 = 0x1234;
    const BIG_WORD: i32 = 0x4321;

    /// Byte order of the machine running this code.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }

    /// Anything other than the little-endian marker is taken as big endian.
    pub const fn from_word(word: i32) -> Self {
        if word == Self::LITTLE_WORD {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    pub const fn to_word(self) -> i32 {
        match self {
            ByteOrder::LittleEndian => Self::LITTLE_WORD,
            ByteOrder::BigEndian => Self::BIG_WORD,
        }
    }
}

macro_rules! word_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn from_raw(raw: i32) -> Result<Self, WireError> {
                match raw {
                    $($value => Ok($name::$variant),)+
                    value => Err(WireError::UnknownValue { kind: $kind, value }),
                }
            }

            pub const fn to_raw(self) -> i32 {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl Encode for $name {
            fn encode(&self, w: &mut WireWriter) {
                w.word(self.to_raw());
            }
        }

        impl Decode for $name {
            fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
                $name::from_raw(r.word()?)
            }
        }
    };
}

word_enum!(
    /// How an option value is interpreted.
    ValueType, "value type" {
        Bool = 0,
        Int = 1,
        Fixed = 2,
        String = 3,
        Button = 4,
        Group = 5,
    }
);

word_enum!(
    /// Physical unit of an option value.
    Unit, "unit" {
        None = 0,
        Pixel = 1,
        Bit = 2,
        Mm = 3,
        Dpi = 4,
        Percent = 5,
        Microsecond = 6,
    }
);

word_enum!(
    /// Operation requested by a control-option call.
    Action, "action" {
        GetValue = 0,
        SetValue = 1,
        SetAuto = 2,
    }
);

/// Frame format of the scan data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Frame {
    Gray,
    Rgb,
    Red,
    Green,
    Blue,
    /// Extended or backend specific formats (JPEG, infrared, ...).
    Other(i32),
}

impl Frame {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Frame::Gray,
            1 => Frame::Rgb,
            2 => Frame::Red,
            3 => Frame::Green,
            4 => Frame::Blue,
            other => Frame::Other(other),
        }
    }

    pub const fn to_raw(self) -> i32 {
        match self {
            Frame::Gray => 0,
            Frame::Rgb => 1,
            Frame::Red => 2,
            Frame::Green => 3,
            Frame::Blue => 4,
            Frame::Other(raw) => raw,
        }
    }
}

bitflags! {
    /// Capabilities advertised by an option descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: i32 {
        const SOFT_SELECT = 1 << 0;
        const HARD_SELECT = 1 << 1;
        const SOFT_DETECT = 1 << 2;
        const EMULATED = 1 << 3;
        const AUTOMATIC = 1 << 4;
        const INACTIVE = 1 << 5;
        const ADVANCED = 1 << 6;
    }
}

bitflags! {
    /// Side effects reported by a control-option reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Info: i32 {
        /// The value set was rounded by the device.
        const INEXACT = 1 << 0;
        /// Option descriptors must be fetched again.
        const RELOAD_OPTIONS = 1 << 1;
        /// Scan parameters may have changed.
        const RELOAD_PARAMS = 1 << 2;
    }
}

/// A device as reported by a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Device {
    pub name: String,
    pub vendor: String,
    pub model: String,
    /// Device type, e.g. "flatbed scanner".
    pub kind: String,
}

impl Encode for Device {
    fn encode(&self, w: &mut WireWriter) {
        w.string(Some(&self.name));
        w.string(Some(&self.vendor));
        w.string(Some(&self.model));
        w.string(Some(&self.kind));
    }
}

impl Decode for Device {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            name: String::decode(r)?,
            vendor: String::decode(r)?,
            model: String::decode(r)?,
            kind: String::decode(r)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub min: i32,
    pub max: i32,
    /// Quantization step, 0 when unconstrained.
    pub quant: i32,
}

impl Encode for Range {
    fn encode(&self, w: &mut WireWriter) {
        w.word(self.min);
        w.word(self.max);
        w.word(self.quant);
    }
}

impl Decode for Range {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            min: r.word()?,
            max: r.word()?,
            quant: r.word()?,
        })
    }
}

/// Constraint attached to an option descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    None,
    Range(Range),
    WordList(Vec<i32>),
    StringList(Vec<String>),
}

impl Constraint {
    const fn type_word(&self) -> i32 {
        match self {
            Constraint::None => 0,
            Constraint::Range(_) => 1,
            Constraint::WordList(_) => 2,
            Constraint::StringList(_) => 3,
        }
    }
}

/// Metadata describing one device option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDescriptor {
    pub name: String,
    pub title: String,
    pub desc: String,
    pub value_type: ValueType,
    pub unit: Unit,
    /// Value size in bytes.
    pub size: i32,
    pub cap: Capabilities,
    pub constraint: Constraint,
}

impl OptionDescriptor {
    pub fn is_active(&self) -> bool {
        !self.cap.contains(Capabilities::INACTIVE)
    }

    pub fn is_settable(&self) -> bool {
        self.cap.contains(Capabilities::SOFT_SELECT)
    }
}

impl Encode for OptionDescriptor {
    fn encode(&self, w: &mut WireWriter) {
        w.string(Some(&self.name));
        w.string(Some(&self.title));
        w.string(Some(&self.desc));
        self.value_type.encode(w);
        self.unit.encode(w);
        w.word(self.size);
        w.word(self.cap.bits());
        w.word(self.constraint.type_word());
        match &self.constraint {
            Constraint::None => {}
            Constraint::Range(range) => w.ptr(Some(range)),
            Constraint::WordList(words) => {
                // The first element carries the list length.
                w.len(words.len() + 1);
                w.word(words.len() as i32);
                for &word in words {
                    w.word(word);
                }
            }
            Constraint::StringList(strings) => {
                // Terminated by an absent string, counted in the length.
                w.len(strings.len() + 1);
                for s in strings {
                    w.string(Some(s));
                }
                w.string(None);
            }
        }
    }
}

impl Decode for OptionDescriptor {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        let name = String::decode(r)?;
        let title = String::decode(r)?;
        let desc = String::decode(r)?;
        let value_type = ValueType::decode(r)?;
        let unit = Unit::decode(r)?;
        let size = r.word()?;
        let cap = Capabilities::from_bits_retain(r.word()?);
        let constraint = match r.word()? {
            0 => Constraint::None,
            1 => r
                .ptr::<Range>()?
                .map_or(Constraint::None, Constraint::Range),
            2 => {
                let len = r.len()?;
                let mut words = Vec::with_capacity(len);
                for _ in 0..len {
                    words.push(r.word()?);
                }
                // Drop the leading length element.
                if !words.is_empty() {
                    words.remove(0);
                }
                Constraint::WordList(words)
            }
            3 => {
                let len = r.len()?;
                let mut strings = Vec::with_capacity(len);
                for _ in 0..len {
                    if let Some(s) = r.string()? {
                        strings.push(s);
                    }
                }
                Constraint::StringList(strings)
            }
            value => {
                return Err(WireError::UnknownValue {
                    kind: "constraint type",
                    value,
                })
            }
        };
        Ok(Self {
            name,
            title,
            desc,
            value_type,
            unit,
            size,
            cap,
            constraint,
        })
    }
}

/// Scan parameters of the next or current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parameters {
    pub format: Frame,
    pub last_frame: bool,
    pub bytes_per_line: i32,
    pub pixels_per_line: i32,
    /// Number of lines, or -1 when unknown in advance.
    pub lines: i32,
    /// Bits per sample.
    pub depth: i32,
}

impl Encode for Parameters {
    fn encode(&self, w: &mut WireWriter) {
        w.word(self.format.to_raw());
        w.bool(self.last_frame);
        w.word(self.bytes_per_line);
        w.word(self.pixels_per_line);
        w.word(self.lines);
        w.word(self.depth);
    }
}

impl Decode for Parameters {
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            format: Frame::from_raw(r.word()?),
            last_frame: r.bool()?,
            bytes_per_line: r.word()?,
            pixels_per_line: r.word()?,
            lines: r.word()?,
            depth: r.word()?,
        })
    }
}

/// Value carried by a control-option request or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// No value (buttons, groups, `SET_AUTO`, or a failed call).
    None,
    Bool(bool),
    Int(Vec<i32>),
    /// Fixed point words with 16 fractional bits.
    Fixed(Vec<i32>),
    String(String),
}

impl OptionValue {
    /// Convert a fixed point word into a float.
    pub fn fixed_to_f64(word: i32) -> f64 {
        f64::from(word) / f64::from(1 << 16)
    }

    /// Convert a float into a fixed point word.
    pub fn f64_to_fixed(value: f64) -> i32 {
        (value * f64::from(1 << 16)) as i32
    }

    /// Encode as an array sized by `size` for the given type.
    pub fn encode_sized(&self, w: &mut WireWriter, value_type: ValueType, size: i32) {
        let size = size.max(0) as usize;
        match value_type {
            ValueType::String => {
                let mut raw = vec![0u8; size];
                if let OptionValue::String(s) = self {
                    let n = s.len().min(size.saturating_sub(1));
                    raw[..n].copy_from_slice(&s.as_bytes()[..n]);
                }
                w.len(size);
                w.bytes(&raw);
            }
            ValueType::Button | ValueType::Group => w.len(0),
            ValueType::Bool | ValueType::Int | ValueType::Fixed => {
                let count = size / WORD_SIZE;
                let words: &[i32] = match self {
                    OptionValue::Int(words) | OptionValue::Fixed(words) => words,
                    _ => &[],
                };
                w.len(count);
                for idx in 0..count {
                    let word = match self {
                        OptionValue::Bool(flag) if idx == 0 => i32::from(*flag),
                        _ => words.get(idx).copied().unwrap_or(0),
                    };
                    w.word(word);
                }
            }
        }
    }

    /// Decode an array encoded by [`OptionValue::encode_sized`].
    pub fn decode_typed(r: &mut WireReader<'_>, value_type: ValueType) -> Result<Self, WireError> {
        let len = r.len()?;
        match value_type {
            ValueType::String => {
                let raw = r.bytes(len)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Ok(OptionValue::String(
                    String::from_utf8_lossy(&raw[..end]).into_owned(),
                ))
            }
            ValueType::Button | ValueType::Group => {
                r.bytes(len * WORD_SIZE)?;
                Ok(OptionValue::None)
            }
            ValueType::Bool | ValueType::Int | ValueType::Fixed => {
                let mut words = Vec::with_capacity(len);
                for _ in 0..len {
                    words.push(r.word()?);
                }
                Ok(match value_type {
                    ValueType::Bool => match words.first() {
                        Some(&word) => OptionValue::Bool(word != 0),
                        None => OptionValue::None,
                    },
                    ValueType::Fixed => OptionValue::Fixed(words),
                    _ => OptionValue::Int(words),
                })
            }
        }
    }
}
