// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! RDM responder registry: sub-devices, the parameter table, and request
//! dispatch.
//!
//! Mandatory PIDs are answered directly by [`Responder::dispatch`] against
//! well-known [`SubDevice`] fields rather than through the generic parameter
//! table -- the table is reserved for PIDs an integrator registers with
//! [`crate::driver::DmxDriver::rdm_register`], keeping the always-present
//! PIDs as tagged fields instead of subclassing a registered [`Parameter`].

use heapless::{String, Vec};

use crate::frame::{encode_disc_response, CommandClass, DISC_RESPONSE_SIZE};
use crate::hal::{TimerHal, UartHal};
use crate::nvs::NvsBackend;
use crate::rdm::codec::{self, FieldValue};
use crate::sync::Rtos;
use crate::uid::Uid;

/// Hard cap on registered sub-devices. ANSI E1.20 allows up to 512 in the
/// general case; an embedded responder with no heap keeps a much smaller
/// fixed capacity in a flat vector instead.
pub const MAX_SUB_DEVICES: usize = 8;
pub const MAX_PARAMS_PER_DEVICE: usize = 16;
pub const MAX_PERSONALITIES: usize = 8;
pub const STATUS_QUEUE_CAP: usize = 8;
pub const MAX_PD_SIZE: usize = crate::frame::RDM_MAX_PD_SIZE;
pub const MAX_DESCRIPTION_LEN: usize = 32;

/// ANSI E1.20 NACK reason codes the responder can produce.
#[repr(u16)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum NackReason {
    UnknownPid = 0x0000,
    FormatError = 0x0001,
    HardwareFault = 0x0002,
    ProxyReject = 0x0003,
    WriteProtect = 0x0004,
    UnsupportedCommandClass = 0x0005,
    DataOutOfRange = 0x0006,
    BufferFull = 0x0007,
    PacketSizeUnsupported = 0x0008,
    SubDeviceOutOfRange = 0x0009,
    ProxyBufferFull = 0x000a,
}

/// Which command classes a registered PID accepts.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PidCc {
    Get,
    Set,
    GetSet,
    Disc,
}

impl PidCc {
    fn accepts(self, cc: CommandClass) -> bool {
        matches!(
            (self, cc),
            (PidCc::Get | PidCc::GetSet, CommandClass::GetCommand)
                | (PidCc::Set | PidCc::GetSet, CommandClass::SetCommand)
                | (PidCc::Disc, CommandClass::DiscoveryCommand)
        )
    }
}

/// Owner of a registered parameter's bytes: a fixed static slice, a
/// driver-owned buffer, or a buffer that writes through to non-volatile
/// storage on every SET. Without an allocator, the "dynamic" cases are a
/// fixed-capacity `heapless::Vec` rather than `Box<[u8]>`.
pub enum ParamStorage {
    Static(&'static mut [u8]),
    Owned(Vec<u8, MAX_PD_SIZE>),
    NonVolatile(Vec<u8, MAX_PD_SIZE>),
}

impl ParamStorage {
    fn as_slice(&self) -> &[u8] {
        match self {
            ParamStorage::Static(s) => s,
            ParamStorage::Owned(v) | ParamStorage::NonVolatile(v) => v.as_slice(),
        }
    }

    fn write(&mut self, data: &[u8]) -> bool {
        match self {
            ParamStorage::Static(s) => {
                if data.len() != s.len() {
                    return false;
                }
                s.copy_from_slice(data);
                true
            }
            ParamStorage::Owned(v) | ParamStorage::NonVolatile(v) => {
                v.clear();
                v.extend_from_slice(data).is_ok()
            }
        }
    }

    fn is_non_volatile(&self) -> bool { matches!(self, ParamStorage::NonVolatile(_)) }
}

/// Immutable, process-wide per-PID metadata. Format strings describe the
/// request/response parameter-data layout (see `rdm::codec`).
#[derive(Debug, Clone, Copy)]
pub struct ParameterDefinition {
    pub pid_cc: PidCc,
    pub get_format: &'static str,
    pub set_format: &'static str,
    pub description: &'static str,
}

/// A callback invoked after a successful SET, replacing the original's
/// `void*` context pointer with a captured closure -- the idiomatic Rust
/// equivalent that still lets an integrator reach arbitrary state without
/// this crate assuming an allocator.
pub type ParamCallback = &'static (dyn Fn(u16) + Send + Sync);

pub struct Parameter {
    pub pid: u16,
    pub definition: ParameterDefinition,
    pub storage: ParamStorage,
    pub callback: Option<ParamCallback>,
    /// Backend a `NonVolatile`-flagged parameter writes through to on every
    /// SET. `None` for `Static`/`Owned` storage.
    nvs: Option<&'static dyn NvsBackend>,
    nvs_namespace: &'static str,
}

/// A named DMX footprint selectable via DMX_PERSONALITY.
#[derive(Debug, Clone)]
pub struct Personality {
    pub description: String<MAX_DESCRIPTION_LEN>,
    pub footprint: u16,
}

/// One RDM sub-device. `num == 0` is always present and is the root.
pub struct SubDevice {
    pub num: u16,
    pub model_id: u16,
    pub product_category: u16,
    pub software_version_id: u32,
    pub software_version_label: String<MAX_DESCRIPTION_LEN>,
    pub dmx_start_address: u16,
    pub current_personality: u8,
    pub personalities: Vec<Personality, MAX_PERSONALITIES>,
    pub identify_on: bool,
    pub params: Vec<Parameter, MAX_PARAMS_PER_DEVICE>,
}

fn bounded_string<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    // Best-effort: truncate rather than fail if the caller's text is
    // longer than the RDM ASCII field it will be serialized into.
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

impl SubDevice {
    fn root() -> Self {
        let mut personalities = Vec::new();
        let _ = personalities.push(Personality { description: bounded_string("Default"), footprint: 512 });
        Self {
            num: 0,
            model_id: 0,
            product_category: 0x0100, // PRODUCT_CATEGORY_FIXTURE (generic).
            software_version_id: 0,
            software_version_label: String::new(),
            dmx_start_address: 1,
            current_personality: 1,
            personalities,
            identify_on: false,
            params: Vec::new(),
        }
    }

    fn footprint(&self) -> u16 {
        self.personalities
            .get(self.current_personality.saturating_sub(1) as usize)
            .map(|p| p.footprint)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
struct StatusEntry {
    pid: u16,
}

/// The outcome [`Responder::dispatch`] hands back to the driver so it can
/// compose and send the wire response, or stay silent on a broadcast SET.
pub enum DispatchOutcome {
    Ack { pd_len: usize },
    NackReason(NackReason),
    /// Broadcast SET: apply silently, no response.
    NoResponse,
}

pub struct Responder {
    max_sub_devices: usize,
    sub_devices: Vec<SubDevice, MAX_SUB_DEVICES>,
    muted: bool,
    status_queue: Vec<StatusEntry, STATUS_QUEUE_CAP>,
}

/// Well-known PID values for the mandatory set.
pub mod pid {
    pub const DISC_UNIQUE_BRANCH: u16 = 0x0001;
    pub const DISC_MUTE: u16 = 0x0002;
    pub const DISC_UN_MUTE: u16 = 0x0003;
    pub const QUEUED_MESSAGE: u16 = 0x0020;
    pub const SUPPORTED_PARAMETERS: u16 = 0x0050;
    pub const PARAMETER_DESCRIPTION: u16 = 0x0051;
    pub const DEVICE_INFO: u16 = 0x0060;
    pub const SOFTWARE_VERSION_LABEL: u16 = 0x00c0;
    pub const DMX_PERSONALITY: u16 = 0x00e0;
    pub const DMX_PERSONALITY_DESCRIPTION: u16 = 0x00e1;
    pub const DMX_START_ADDRESS: u16 = 0x00f0;
    pub const IDENTIFY_DEVICE: u16 = 0x1000;
}

impl Responder {
    pub fn new(max_sub_devices: usize) -> Self {
        let mut sub_devices = Vec::new();
        let _ = sub_devices.push(SubDevice::root());
        Self { max_sub_devices: max_sub_devices.min(MAX_SUB_DEVICES), sub_devices, muted: false, status_queue: Vec::new() }
    }

    pub fn muted(&self) -> bool { self.muted }

    fn sub_device_mut(&mut self, num: u16) -> Option<&mut SubDevice> {
        self.sub_devices.iter_mut().find(|d| d.num == num)
    }

    fn sub_device(&self, num: u16) -> Option<&SubDevice> {
        self.sub_devices.iter().find(|d| d.num == num)
    }

    /// Adds a new sub-device (`num != 0`). Sub-devices are sparse: callers
    /// may add 1 and 3 without 2 existing.
    pub fn add_sub_device(&mut self, num: u16, model_id: u16, product_category: u16) -> bool {
        if num == 0 || self.sub_devices.len() > self.max_sub_devices {
            return false;
        }
        let mut sd = SubDevice::root();
        sd.num = num;
        sd.model_id = model_id;
        sd.product_category = product_category;
        self.sub_devices.push(sd).is_ok()
    }

    pub fn set_device_info(&mut self, sub_device: u16, model_id: u16, product_category: u16, software_version_id: u32) -> bool {
        match self.sub_device_mut(sub_device) {
            Some(d) => {
                d.model_id = model_id;
                d.product_category = product_category;
                d.software_version_id = software_version_id;
                true
            }
            None => false,
        }
    }

    pub fn set_software_version_label(&mut self, sub_device: u16, label: &str) -> bool {
        match self.sub_device_mut(sub_device) {
            Some(d) => {
                d.software_version_label = bounded_string(label);
                true
            }
            None => false,
        }
    }

    pub fn add_personality(&mut self, sub_device: u16, footprint: u16, description: &str) -> bool {
        match self.sub_device_mut(sub_device) {
            Some(d) => d
                .personalities
                .push(Personality { description: bounded_string(description), footprint })
                .is_ok(),
            None => false,
        }
    }

    /// Registers a custom (non-mandatory) parameter. `NonVolatile` storage
    /// is loaded from `nvs` if present, and `nvs` is retained so every
    /// later SET writes back through it.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &mut self,
        sub_device: u16,
        pid: u16,
        definition: ParameterDefinition,
        mut storage: ParamStorage,
        callback: Option<ParamCallback>,
        nvs: Option<&'static dyn NvsBackend>,
        nvs_namespace: &'static str,
    ) -> bool {
        if pid == 0 {
            return false;
        }
        if storage.is_non_volatile() {
            if let Some(backend) = nvs {
                let mut buf = [0u8; MAX_PD_SIZE];
                let key = pid_key(pid);
                if let Some(n) = backend.get(nvs_namespace, &key, &mut buf) {
                    let _ = storage.write(&buf[..n]);
                }
            }
        }
        match self.sub_device_mut(sub_device) {
            Some(d) => d.params.push(Parameter { pid, definition, storage, callback, nvs, nvs_namespace }).is_ok(),
            None => false,
        }
    }

    fn find_param<'a>(sub_devices: &'a mut Vec<SubDevice, MAX_SUB_DEVICES>, sub_device: u16, pid: u16) -> Option<(usize, usize)> {
        for (di, d) in sub_devices.iter().enumerate() {
            if d.num == sub_device {
                for (pi, p) in d.params.iter().enumerate() {
                    if p.pid == pid {
                        return Some((di, pi));
                    }
                }
            }
        }
        None
    }

    pub fn enqueue_status_message(&mut self, pid: u16) {
        if self.status_queue.iter().any(|e| e.pid == pid) {
            return;
        }
        // Best-effort queue: drop the oldest entry rather than the new one
        // so the most recent change is never silently lost.
        if self.status_queue.is_full() {
            self.status_queue.remove(0);
        }
        let _ = self.status_queue.push(StatusEntry { pid });
    }

    fn drain_status_message(&mut self) -> Option<u16> {
        if self.status_queue.is_empty() {
            None
        } else {
            Some(self.status_queue.remove(0).pid)
        }
    }

    /// Writes back every `NonVolatile` parameter to its registered backend
    /// (used on [`crate::driver::DmxDriver::delete`]; each parameter also
    /// writes through on every SET via [`Self::dispatch_custom_set`], so
    /// this is a best-effort final sync rather than the only write path).
    pub fn flush_non_volatile(&self) {
        for d in &self.sub_devices {
            for p in &d.params {
                if let ParamStorage::NonVolatile(v) = &p.storage {
                    let Some(backend) = p.nvs else { continue };
                    let key = pid_key(p.pid);
                    if !backend.set(p.nvs_namespace, &key, v.as_slice()) {
                        log::warn!("flush_non_volatile: write failed for pid {:#06x}", p.pid);
                    }
                }
            }
        }
    }

    /// Dispatches one parsed inbound RDM request. `request_pd` is the PD
    /// that accompanies GET/SET; DISC_UNIQUE_BRANCH
    /// passes its `(lower, upper)` range in `disc_range` instead.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &mut self,
        self_uid: Uid,
        sub_device_addr: u16,
        cc: CommandClass,
        pid: u16,
        request_pd: &[u8],
        response_pd: &mut [u8; MAX_PD_SIZE],
    ) -> DispatchOutcome {
        // ALL_SUB_DEVICES addresses every sub-device for a SET, but GET/SET
        // lookups in this table fall back to the root sub-device, per
        // spec.md §4.6 step 1.
        let sub_device_addr =
            if sub_device_addr == crate::rdm::controller::RDM_SUB_DEVICE_ALL { 0 } else { sub_device_addr };
        match pid {
            pid::DISC_UNIQUE_BRANCH => {
                if self.muted || request_pd.len() < 12 {
                    return DispatchOutcome::NoResponse;
                }
                let lower = Uid::from_be_bytes(request_pd[0..6].try_into().unwrap());
                let upper = Uid::from_be_bytes(request_pd[6..12].try_into().unwrap());
                if self_uid < lower || self_uid > upper {
                    return DispatchOutcome::NoResponse;
                }
                let n = encode_disc_response(self_uid, response_pd);
                debug_assert_eq!(n, DISC_RESPONSE_SIZE);
                DispatchOutcome::Ack { pd_len: n }
            }
            pid::DISC_MUTE | pid::DISC_UN_MUTE => {
                self.muted = pid == pid::DISC_MUTE;
                // Control field: only the two bits ANSI E1.20 §10.5 names
                // are modeled (see SPEC_FULL.md §9); the rest stay zero.
                response_pd[0..2].copy_from_slice(&0u16.to_be_bytes());
                DispatchOutcome::Ack { pd_len: 2 }
            }
            _ if cc == CommandClass::GetCommand => self.dispatch_get_with_pd(sub_device_addr, pid, request_pd, response_pd),
            _ if cc == CommandClass::SetCommand => self.dispatch_set(sub_device_addr, pid, request_pd, response_pd),
            _ => DispatchOutcome::NackReason(NackReason::UnsupportedCommandClass),
        }
    }

    fn dispatch_get(&mut self, sub_device_addr: u16, pid: u16, out: &mut [u8; MAX_PD_SIZE]) -> DispatchOutcome {
        match pid {
            pid::QUEUED_MESSAGE => match self.drain_status_message() {
                Some(queued_pid) => {
                    out[0..2].copy_from_slice(&queued_pid.to_be_bytes());
                    DispatchOutcome::Ack { pd_len: 2 }
                }
                None => DispatchOutcome::NackReason(NackReason::DataOutOfRange),
            },
            pid::DEVICE_INFO => {
                let Some(d) = self.sub_device(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                // RDM protocol version (1.0), device model ID, product
                // category, software version, footprint, personality
                // (current, count), start address, sub-device count,
                // sensor count -- the fixed DEVICE_INFO layout.
                out[0..2].copy_from_slice(&0x0100u16.to_be_bytes());
                out[2..4].copy_from_slice(&d.model_id.to_be_bytes());
                out[4..6].copy_from_slice(&d.product_category.to_be_bytes());
                out[6..10].copy_from_slice(&d.software_version_id.to_be_bytes());
                out[10..12].copy_from_slice(&d.footprint().to_be_bytes());
                out[12] = d.current_personality;
                out[13] = d.personalities.len() as u8;
                out[14..16].copy_from_slice(&d.dmx_start_address.to_be_bytes());
                out[16..18].copy_from_slice(&((self.sub_devices.len() - 1) as u16).to_be_bytes());
                out[18] = 0; // sensor count: none in this core.
                DispatchOutcome::Ack { pd_len: 19 }
            }
            pid::SOFTWARE_VERSION_LABEL => {
                let Some(d) = self.sub_device(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                let bytes = d.software_version_label.as_bytes();
                out[..bytes.len()].copy_from_slice(bytes);
                DispatchOutcome::Ack { pd_len: bytes.len() }
            }
            pid::IDENTIFY_DEVICE => {
                let Some(d) = self.sub_device(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                out[0] = d.identify_on as u8;
                DispatchOutcome::Ack { pd_len: 1 }
            }
            pid::DMX_START_ADDRESS => {
                let Some(d) = self.sub_device(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                out[0..2].copy_from_slice(&d.dmx_start_address.to_be_bytes());
                DispatchOutcome::Ack { pd_len: 2 }
            }
            pid::DMX_PERSONALITY => {
                let Some(d) = self.sub_device(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                out[0] = d.current_personality;
                out[1] = d.personalities.len() as u8;
                DispatchOutcome::Ack { pd_len: 2 }
            }
            pid::SUPPORTED_PARAMETERS => {
                let Some(d) = self.sub_device(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                let mut pos = 0;
                for p in &d.params {
                    if pos + 2 > out.len() {
                        break;
                    }
                    out[pos..pos + 2].copy_from_slice(&p.pid.to_be_bytes());
                    pos += 2;
                }
                DispatchOutcome::Ack { pd_len: pos }
            }
            _ => self.dispatch_custom_get(sub_device_addr, pid, out),
        }
    }

    /// GET variants that need the request PD (e.g. DMX_PERSONALITY_DESCRIPTION's
    /// personality index, PARAMETER_DESCRIPTION's target PID). Called by
    /// [`Self::dispatch`] instead of [`Self::dispatch_get`] for those PIDs.
    fn dispatch_get_with_pd(&mut self, sub_device_addr: u16, pid: u16, request_pd: &[u8], out: &mut [u8; MAX_PD_SIZE]) -> DispatchOutcome {
        match pid {
            pid::DMX_PERSONALITY_DESCRIPTION => {
                let Some(d) = self.sub_device(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                let Some(&num) = request_pd.first() else {
                    return DispatchOutcome::NackReason(NackReason::FormatError);
                };
                let Some(p) = (num as usize).checked_sub(1).and_then(|i| d.personalities.get(i)) else {
                    return DispatchOutcome::NackReason(NackReason::DataOutOfRange);
                };
                out[0] = num;
                out[1..3].copy_from_slice(&p.footprint.to_be_bytes());
                let desc = p.description.as_bytes();
                out[3..3 + desc.len()].copy_from_slice(desc);
                DispatchOutcome::Ack { pd_len: 3 + desc.len() }
            }
            pid::PARAMETER_DESCRIPTION => {
                let Some(requested) = request_pd.get(0..2).map(|b| u16::from_be_bytes([b[0], b[1]])) else {
                    return DispatchOutcome::NackReason(NackReason::FormatError);
                };
                let Some(d) = self.sub_device(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                let Some(p) = d.params.iter().find(|p| p.pid == requested) else {
                    return DispatchOutcome::NackReason(NackReason::DataOutOfRange);
                };
                out[0..2].copy_from_slice(&requested.to_be_bytes());
                let desc = p.definition.description.as_bytes();
                let n = desc.len().min(MAX_PD_SIZE - 20);
                out[2..20].fill(0);
                out[20..20 + n].copy_from_slice(&desc[..n]);
                DispatchOutcome::Ack { pd_len: 20 + n }
            }
            _ => self.dispatch_get(sub_device_addr, pid, out),
        }
    }

    fn dispatch_custom_get(&mut self, sub_device_addr: u16, pid: u16, out: &mut [u8; MAX_PD_SIZE]) -> DispatchOutcome {
        let Some((di, pi)) = Self::find_param(&mut self.sub_devices, sub_device_addr, pid) else {
            return DispatchOutcome::NackReason(NackReason::UnknownPid);
        };
        let param = &self.sub_devices[di].params[pi];
        if !param.definition.pid_cc.accepts(CommandClass::GetCommand) {
            return DispatchOutcome::NackReason(NackReason::UnsupportedCommandClass);
        }
        let data = param.storage.as_slice();
        out[..data.len()].copy_from_slice(data);
        DispatchOutcome::Ack { pd_len: data.len() }
    }

    fn dispatch_set(&mut self, sub_device_addr: u16, pid: u16, request_pd: &[u8], out: &mut [u8; MAX_PD_SIZE]) -> DispatchOutcome {
        match pid {
            pid::IDENTIFY_DEVICE => {
                let Some(&v) = request_pd.first() else {
                    return DispatchOutcome::NackReason(NackReason::FormatError);
                };
                let Some(d) = self.sub_device_mut(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                d.identify_on = v != 0;
                self.enqueue_status_message(pid);
                DispatchOutcome::Ack { pd_len: 0 }
            }
            pid::DMX_START_ADDRESS => {
                let records = match codec::decode("w$", request_pd) {
                    Ok(r) => r,
                    Err(_) => return DispatchOutcome::NackReason(NackReason::FormatError),
                };
                let Some(&FieldValue::Word(addr)) = records.get(0).and_then(|r| r.first()) else {
                    return DispatchOutcome::NackReason(NackReason::FormatError);
                };
                if !(1..=512).contains(&addr) {
                    return DispatchOutcome::NackReason(NackReason::DataOutOfRange);
                }
                let Some(d) = self.sub_device_mut(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                d.dmx_start_address = addr;
                self.enqueue_status_message(pid);
                let _ = out;
                DispatchOutcome::Ack { pd_len: 0 }
            }
            pid::DMX_PERSONALITY => {
                let Some(&num) = request_pd.first() else {
                    return DispatchOutcome::NackReason(NackReason::FormatError);
                };
                let Some(d) = self.sub_device_mut(sub_device_addr) else {
                    return DispatchOutcome::NackReason(NackReason::SubDeviceOutOfRange);
                };
                if !(1..=d.personalities.len() as u8).contains(&num) {
                    return DispatchOutcome::NackReason(NackReason::DataOutOfRange);
                }
                d.current_personality = num;
                self.enqueue_status_message(pid);
                DispatchOutcome::Ack { pd_len: 0 }
            }
            _ => self.dispatch_custom_set(sub_device_addr, pid, request_pd),
        }
    }

    fn dispatch_custom_set(&mut self, sub_device_addr: u16, pid: u16, request_pd: &[u8]) -> DispatchOutcome {
        let Some((di, pi)) = Self::find_param(&mut self.sub_devices, sub_device_addr, pid) else {
            return DispatchOutcome::NackReason(NackReason::UnknownPid);
        };
        let param = &mut self.sub_devices[di].params[pi];
        if !param.definition.pid_cc.accepts(CommandClass::SetCommand) {
            return DispatchOutcome::NackReason(NackReason::UnsupportedCommandClass);
        }
        if !param.storage.write(request_pd) {
            return DispatchOutcome::NackReason(NackReason::FormatError);
        }
        if param.storage.is_non_volatile() {
            if let Some(backend) = param.nvs {
                let key = pid_key(param.pid);
                if !backend.set(param.nvs_namespace, &key, param.storage.as_slice()) {
                    log::warn!("dispatch_custom_set: nvs write failed for pid {:#06x}", param.pid);
                }
            }
        }
        let callback = param.callback;
        self.enqueue_status_message(pid);
        if let Some(cb) = callback {
            cb(pid);
        }
        DispatchOutcome::Ack { pd_len: 0 }
    }
}

fn pid_key(pid: u16) -> heapless::String<8> {
    let mut s = heapless::String::new();
    let _ = core::fmt::write(&mut s, format_args!("{:04x}", pid));
    s
}

/// Responder-side integration on [`crate::driver::DmxDriver`]: registration
/// and the service loop that answers inbound requests.
impl<U: UartHal, T: TimerHal, R: Rtos> crate::driver::DmxDriver<U, T, R> {
    pub fn rdm_add_sub_device(&self, num: u16, model_id: u16, product_category: u16) -> bool {
        self.responder.lock(&self.rtos).add_sub_device(num, model_id, product_category)
    }

    pub fn rdm_set_device_info(&self, sub_device: u16, model_id: u16, product_category: u16, software_version_id: u32) -> bool {
        self.responder.lock(&self.rtos).set_device_info(sub_device, model_id, product_category, software_version_id)
    }

    pub fn rdm_set_software_version_label(&self, sub_device: u16, label: &str) -> bool {
        self.responder.lock(&self.rtos).set_software_version_label(sub_device, label)
    }

    pub fn rdm_add_personality(&self, sub_device: u16, footprint: u16, description: &str) -> bool {
        self.responder.lock(&self.rtos).add_personality(sub_device, footprint, description)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn rdm_register(
        &self,
        sub_device: u16,
        pid: u16,
        definition: ParameterDefinition,
        storage: ParamStorage,
        callback: Option<ParamCallback>,
        nvs: Option<&'static dyn NvsBackend>,
        nvs_namespace: &'static str,
    ) -> bool {
        self.responder.lock(&self.rtos).register(sub_device, pid, definition, storage, callback, nvs, nvs_namespace)
    }

    pub fn rdm_muted(&self) -> bool { self.responder.lock(&self.rtos).muted() }

    /// Decodes and dispatches one already-received RDM request packet,
    /// composing and sending a response (silent on a broadcast SET).
    /// Returns `Ok(true)` if a request was found and handled.
    pub fn rdm_service(&self, packet: &crate::driver::DmxPacket, timeout: crate::driver::Timeout) -> Result<bool, DmxServiceError> {
        if !packet.is_rdm {
            return Ok(false);
        }
        let mut buf = [0u8; crate::config::DMX_PACKET_SIZE_MAX];
        let n = self.read(&mut buf[..packet.size]);
        let Some((header, pd)) = crate::frame::RdmHeader::decode(&buf[..n]) else {
            return Err(DmxServiceError::Malformed);
        };
        let is_broadcast = header.dest_uid == Uid::BROADCAST_ALL || header.dest_uid.manufacturer_id() == self.rdm_uid().manufacturer_id() && header.dest_uid.is_broadcast();
        if header.dest_uid != self.rdm_uid() && !is_broadcast {
            return Ok(false);
        }
        let Some(cc) = CommandClass::from_u8(header.command_class) else {
            return Err(DmxServiceError::Malformed);
        };
        let mut response_pd = [0u8; MAX_PD_SIZE];
        let outcome = {
            let mut responder = self.responder.lock(&self.rtos);
            responder.dispatch(self.rdm_uid(), header.sub_device, cc, header.parameter_id, pd, &mut response_pd)
        };
        match outcome {
            DispatchOutcome::NoResponse => Ok(true),
            _ if is_broadcast => Ok(true),
            DispatchOutcome::Ack { pd_len } => {
                self.send_rdm_response(&header, crate::frame::ResponseType::Ack, &response_pd[..pd_len], timeout);
                Ok(true)
            }
            DispatchOutcome::NackReason(reason) => {
                self.send_rdm_response(&header, crate::frame::ResponseType::NackReason, &(reason as u16).to_be_bytes(), timeout);
                Ok(true)
            }
        }
    }

    fn send_rdm_response(&self, req: &crate::frame::RdmHeader, response_type: crate::frame::ResponseType, pd: &[u8], timeout: crate::driver::Timeout) {
        let response_cc = if req.command_class == CommandClass::DiscoveryCommand as u8 {
            CommandClass::DiscoveryCommandResponse
        } else if req.command_class == CommandClass::SetCommand as u8 {
            CommandClass::SetCommandResponse
        } else {
            CommandClass::GetCommandResponse
        };
        let header = crate::frame::RdmHeader {
            message_len: (crate::frame::RDM_HEADER_SIZE + pd.len()) as u8,
            dest_uid: req.src_uid,
            src_uid: self.rdm_uid(),
            transaction_num: req.transaction_num,
            port_id_or_response_type: response_type as u8,
            message_count: 0,
            sub_device: req.sub_device,
            command_class: response_cc as u8,
            parameter_id: req.parameter_id,
            pdl: pd.len() as u8,
        };
        let mut frame = [0u8; crate::config::DMX_PACKET_SIZE_MAX];
        let n = header.encode(pd, &mut frame);
        self.load_and_checksum(&frame[..n]);
        let _ = self.send(n, timeout);
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DmxServiceError {
    Malformed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_device_all_falls_back_to_root() {
        let mut r = Responder::new(0);
        r.set_device_info(0, 0x4242, 0x0401, 1);
        let mut out = [0u8; MAX_PD_SIZE];
        match r.dispatch(
            Uid::new(0x1234, 1),
            crate::rdm::controller::RDM_SUB_DEVICE_ALL,
            CommandClass::GetCommand,
            pid::DEVICE_INFO,
            &[],
            &mut out,
        ) {
            DispatchOutcome::Ack { pd_len } => {
                assert_eq!(pd_len, 19);
                assert_eq!(u16::from_be_bytes([out[2], out[3]]), 0x4242);
            }
            _ => panic!("expected ack from root sub-device"),
        }
    }

    #[test]
    fn discovery_branch_respects_mute_and_range() {
        let mut r = Responder::new(0);
        let self_uid = Uid::new(0x1234, 1);
        let mut out = [0u8; MAX_PD_SIZE];

        let lower = Uid::new(0, 0).to_be_bytes();
        let upper = Uid::new(0xffff, 0xffff_ffff).to_be_bytes();
        let mut pd = [0u8; 12];
        pd[0..6].copy_from_slice(&lower);
        pd[6..12].copy_from_slice(&upper);

        match r.dispatch(self_uid, 0, CommandClass::DiscoveryCommand, pid::DISC_UNIQUE_BRANCH, &pd, &mut out) {
            DispatchOutcome::Ack { pd_len } => assert_eq!(pd_len, DISC_RESPONSE_SIZE),
            _ => panic!("expected ack"),
        }

        r.muted = true;
        assert!(matches!(
            r.dispatch(self_uid, 0, CommandClass::DiscoveryCommand, pid::DISC_UNIQUE_BRANCH, &pd, &mut out),
            DispatchOutcome::NoResponse
        ));
    }

    #[test]
    fn device_info_reports_registered_model() {
        let mut r = Responder::new(0);
        r.set_device_info(0, 0x4242, 0x0401, 1);
        let mut out = [0u8; MAX_PD_SIZE];
        match r.dispatch_get(0, pid::DEVICE_INFO, &mut out) {
            DispatchOutcome::Ack { pd_len } => {
                assert_eq!(pd_len, 19);
                assert_eq!(u16::from_be_bytes([out[2], out[3]]), 0x4242);
            }
            _ => panic!("expected ack"),
        }
    }

    #[test]
    fn set_dmx_start_address_updates_and_is_readable() {
        let mut r = Responder::new(0);
        let mut out = [0u8; MAX_PD_SIZE];
        let outcome = r.dispatch_set(0, pid::DMX_START_ADDRESS, &100u16.to_be_bytes(), &mut out);
        assert!(matches!(outcome, DispatchOutcome::Ack { .. }));
        match r.dispatch_get(0, pid::DMX_START_ADDRESS, &mut out) {
            DispatchOutcome::Ack { .. } => assert_eq!(u16::from_be_bytes([out[0], out[1]]), 100),
            _ => panic!("expected ack"),
        }
    }

    #[test]
    fn unknown_pid_is_nacked() {
        let mut r = Responder::new(0);
        let mut out = [0u8; MAX_PD_SIZE];
        assert!(matches!(
            r.dispatch_get(0, 0x8888, &mut out),
            DispatchOutcome::NackReason(NackReason::UnknownPid)
        ));
    }

    #[test]
    fn status_queue_drains_fifo() {
        let mut r = Responder::new(0);
        r.enqueue_status_message(pid::DMX_START_ADDRESS);
        r.enqueue_status_message(pid::DMX_PERSONALITY);
        assert_eq!(r.drain_status_message(), Some(pid::DMX_START_ADDRESS));
        assert_eq!(r.drain_status_message(), Some(pid::DMX_PERSONALITY));
        assert_eq!(r.drain_status_message(), None);
    }

    #[test]
    fn non_volatile_parameter_writes_through_on_every_set() {
        static NVS: crate::testing::TestNvs = crate::testing::TestNvs::new();
        const DEFINITION: ParameterDefinition =
            ParameterDefinition { pid_cc: PidCc::GetSet, get_format: "b$", set_format: "b$", description: "test" };

        let mut r = Responder::new(0);
        assert!(r.register(0, 0x8000, DEFINITION, ParamStorage::NonVolatile(Vec::new()), None, Some(&NVS), "test"));

        let mut out = [0u8; MAX_PD_SIZE];
        assert!(matches!(r.dispatch_set(0, 0x8000, &[42], &mut out), DispatchOutcome::Ack { .. }));

        let mut buf = [0u8; 1];
        assert_eq!(NVS.get("test", &pid_key(0x8000), &mut buf), Some(1));
        assert_eq!(buf[0], 42);
    }
}
