//! In-process stand-in for the remote scanner daemon.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use sane_wire::rpc::{
    AuthorizationReq, ControlOptionReply, ControlOptionReq, GetDevicesReply, GetParametersReply,
    InitReply, InitReq, OpenReply, OpenReq, OptionDescriptorArray, StartReply,
};
use sane_wire::{
    encode, Action, ByteOrder, Capabilities, Constraint, Decode, Device, Encode, Frame, Info,
    OptionDescriptor, OptionValue, Parameters, Procedure, Range, Status, Unit, ValueType,
    VersionCode, WireError, WireReader,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const BUILD: u16 = 3;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the daemon serves.
#[derive(Debug, Clone)]
pub struct Script {
    pub devices: Vec<Device>,
    pub descriptors: Vec<OptionDescriptor>,
    pub params: Parameters,
    pub byte_order: ByteOrder,
    /// Raw scan bytes, sent in records of `record_len`.
    pub data: Vec<u8>,
    pub record_len: usize,
    /// Status byte closing the data stream.
    pub final_status: Status,
    /// Report RELOAD_OPTIONS after every set.
    pub reload_on_set: bool,
    /// Never acknowledge CANCEL.
    pub silent_cancel: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            devices: vec![Device {
                name: "pixma".into(),
                vendor: "Canon".into(),
                model: "PIXMA MG3600".into(),
                kind: "multi-function peripheral".into(),
            }],
            descriptors: default_descriptors(),
            params: Parameters {
                format: Frame::Gray,
                last_frame: true,
                bytes_per_line: 8,
                pixels_per_line: 8,
                lines: 4,
                depth: 8,
            },
            byte_order: ByteOrder::native(),
            data: (0..32u8).collect(),
            record_len: 7,
            final_status: Status::Eof,
            reload_on_set: false,
            silent_cancel: false,
        }
    }
}

pub fn default_descriptors() -> Vec<OptionDescriptor> {
    vec![
        OptionDescriptor {
            name: String::new(),
            title: "Number of options".into(),
            desc: String::new(),
            value_type: ValueType::Int,
            unit: Unit::None,
            size: 4,
            cap: Capabilities::SOFT_DETECT,
            constraint: Constraint::None,
        },
        OptionDescriptor {
            name: "resolution".into(),
            title: "Scan resolution".into(),
            desc: "Sets the resolution of the scanned image.".into(),
            value_type: ValueType::Int,
            unit: Unit::Dpi,
            size: 4,
            cap: Capabilities::SOFT_SELECT | Capabilities::SOFT_DETECT,
            constraint: Constraint::WordList(vec![75, 150, 300, 600]),
        },
        OptionDescriptor {
            name: "mode".into(),
            title: "Scan mode".into(),
            desc: String::new(),
            value_type: ValueType::String,
            unit: Unit::None,
            size: 16,
            cap: Capabilities::SOFT_SELECT | Capabilities::SOFT_DETECT,
            constraint: Constraint::StringList(vec!["Color".into(), "Gray".into()]),
        },
        OptionDescriptor {
            name: "tl-x".into(),
            title: "Top-left x".into(),
            desc: String::new(),
            value_type: ValueType::Fixed,
            unit: Unit::Mm,
            size: 4,
            cap: Capabilities::SOFT_SELECT | Capabilities::SOFT_DETECT | Capabilities::AUTOMATIC,
            constraint: Constraint::Range(Range {
                min: 0,
                max: 216 << 16,
                quant: 0,
            }),
        },
    ]
}

/// Counters of calls the daemon has served.
#[derive(Debug, Default)]
pub struct Stats {
    pub connections: AtomicUsize,
    pub get_devices: AtomicUsize,
    pub option_fetches: AtomicUsize,
    pub cancels: AtomicUsize,
    pub closes: AtomicUsize,
    pub exits: AtomicUsize,
    pub usernames: Mutex<Vec<Option<String>>>,
}

impl Stats {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Poll until `counter` reaches `expected`.
    pub async fn wait_for(counter: &AtomicUsize, expected: usize) -> bool {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

pub struct FakeDaemon {
    pub addr: SocketAddr,
    pub stats: Arc<Stats>,
}

impl FakeDaemon {
    pub async fn spawn(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(Stats::default());
        let shared = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                shared.connections.fetch_add(1, Ordering::SeqCst);
                let conn = Connection {
                    sock,
                    rx: BytesMut::new(),
                    script: script.clone(),
                    values: initial_values(&script.descriptors),
                    stats: Arc::clone(&shared),
                };
                tokio::spawn(conn.run());
            }
        });
        Self { addr, stats }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

fn initial_values(descriptors: &[OptionDescriptor]) -> Vec<OptionValue> {
    descriptors
        .iter()
        .enumerate()
        .map(|(idx, desc)| match desc.value_type {
            ValueType::Int if idx == 0 => OptionValue::Int(vec![descriptors.len() as i32]),
            ValueType::Int => OptionValue::Int(vec![150]),
            ValueType::Fixed => OptionValue::Fixed(vec![0]),
            ValueType::String => OptionValue::String("Color".into()),
            ValueType::Bool => OptionValue::Bool(false),
            _ => OptionValue::None,
        })
        .collect()
}

enum Call {
    Init(InitReq),
    GetDevices,
    Open(OpenReq),
    Close(i32),
    GetOptionDescriptors(i32),
    ControlOption(ControlOptionReq),
    GetParameters(i32),
    Start(i32),
    Cancel(i32),
    Authorize(AuthorizationReq),
    Exit,
}

fn parse_call(r: &mut WireReader<'_>) -> Result<Call, WireError> {
    Ok(match Procedure::decode(r)? {
        Procedure::Init => Call::Init(InitReq::decode(r)?),
        Procedure::GetDevices => Call::GetDevices,
        Procedure::Open => Call::Open(OpenReq::decode(r)?),
        Procedure::Close => Call::Close(r.word()?),
        Procedure::GetOptionDescriptors => Call::GetOptionDescriptors(r.word()?),
        Procedure::ControlOption => Call::ControlOption(ControlOptionReq::decode(r)?),
        Procedure::GetParameters => Call::GetParameters(r.word()?),
        Procedure::Start => Call::Start(r.word()?),
        Procedure::Cancel => Call::Cancel(r.word()?),
        Procedure::Authorize => Call::Authorize(AuthorizationReq::decode(r)?),
        Procedure::Exit => Call::Exit,
    })
}

struct Connection {
    sock: TcpStream,
    rx: BytesMut,
    script: Script,
    values: Vec<OptionValue>,
    stats: Arc<Stats>,
}

impl Connection {
    async fn next_call(&mut self) -> Option<Call> {
        loop {
            let mut r = WireReader::new(&self.rx, BUILD);
            match parse_call(&mut r) {
                Ok(call) => {
                    let used = r.consumed();
                    self.rx.advance(used);
                    return Some(call);
                }
                Err(WireError::Incomplete) => match self.sock.read_buf(&mut self.rx).await {
                    Ok(0) | Err(_) => return None,
                    Ok(_) => {}
                },
                Err(err) => panic!("malformed call: {err}"),
            }
        }
    }

    async fn reply<T: Encode>(&mut self, value: &T) {
        let _ = self.sock.write_all(&encode(value, BUILD)).await;
    }

    async fn run(mut self) {
        while let Some(call) = self.next_call().await {
            match call {
                Call::Init(req) => {
                    self.stats.usernames.lock().unwrap().push(req.username);
                    self.reply(&InitReply {
                        status: Status::Good,
                        version_code: VersionCode::new(1, 0, BUILD),
                    })
                    .await;
                }
                Call::GetDevices => {
                    self.stats.get_devices.fetch_add(1, Ordering::SeqCst);
                    let reply = GetDevicesReply {
                        status: Status::Good,
                        devices: self.script.devices.clone(),
                    };
                    self.reply(&reply).await;
                }
                Call::Open(req) => {
                    let known = req.device_name.is_empty()
                        || self.script.devices.iter().any(|d| d.name == req.device_name);
                    self.reply(&OpenReply {
                        status: if known { Status::Good } else { Status::Invalid },
                        handle: if known { 1 } else { 0 },
                        resource_to_authorize: None,
                    })
                    .await;
                }
                Call::GetOptionDescriptors(_) => {
                    self.stats.option_fetches.fetch_add(1, Ordering::SeqCst);
                    let reply = OptionDescriptorArray {
                        descriptors: self.script.descriptors.clone(),
                    };
                    self.reply(&reply).await;
                }
                Call::ControlOption(req) => {
                    let reply = self.control_option(req);
                    self.reply(&reply).await;
                }
                Call::GetParameters(_) => {
                    let reply = GetParametersReply {
                        status: Status::Good,
                        params: self.script.params,
                    };
                    self.reply(&reply).await;
                }
                Call::Start(_) => self.start().await,
                Call::Cancel(_) => {
                    self.stats.cancels.fetch_add(1, Ordering::SeqCst);
                    if !self.script.silent_cancel {
                        self.reply(&0i32).await;
                    }
                }
                Call::Close(_) => {
                    self.stats.closes.fetch_add(1, Ordering::SeqCst);
                    self.reply(&0i32).await;
                }
                Call::Authorize(_) => self.reply(&0i32).await,
                Call::Exit => {
                    self.stats.exits.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    fn control_option(&mut self, req: ControlOptionReq) -> ControlOptionReply {
        let Some(desc) = self.script.descriptors.get(req.option as usize) else {
            return ControlOptionReply {
                status: Status::Invalid,
                info: Info::empty(),
                value_type: ValueType::Int,
                value_size: 0,
                value: OptionValue::None,
                resource_to_authorize: None,
            };
        };
        let mut info = Info::empty();
        match req.action {
            Action::SetValue => {
                self.values[req.option as usize] = req.value;
                if self.script.reload_on_set {
                    info |= Info::RELOAD_OPTIONS | Info::RELOAD_PARAMS;
                }
            }
            Action::SetAuto => info |= Info::RELOAD_PARAMS,
            Action::GetValue => {}
        }
        ControlOptionReply {
            status: Status::Good,
            info,
            value_type: desc.value_type,
            value_size: desc.size,
            value: self.values[req.option as usize].clone(),
            resource_to_authorize: None,
        }
    }

    async fn start(&mut self) {
        let data = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = data.local_addr().unwrap().port();
        self.reply(&StartReply {
            status: Status::Good,
            port: i32::from(port),
            byte_order: self.script.byte_order,
            resource_to_authorize: None,
        })
        .await;
        let payload = self.script.data.clone();
        let record_len = self.script.record_len.max(1);
        let final_status = self.script.final_status;
        tokio::spawn(async move {
            let Ok((mut sock, _)) = data.accept().await else {
                return;
            };
            for chunk in payload.chunks(record_len) {
                let mut record = (chunk.len() as u32).to_be_bytes().to_vec();
                record.extend_from_slice(chunk);
                if sock.write_all(&record).await.is_err() {
                    return;
                }
            }
            let mut tail = 0xFFFF_FFFFu32.to_be_bytes().to_vec();
            tail.push(final_status.to_raw() as u8);
            let _ = sock.write_all(&tail).await;
        });
    }
}
