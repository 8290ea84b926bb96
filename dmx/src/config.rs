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

//! Install-time configuration.

use crate::uid::Uid;

/// Identifies which physical UART the driver owns. Opaque to this crate;
/// the integrator's [`crate::hal::UartHal`] impl is what actually maps it
/// to a peripheral instance.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Port(pub u8);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PortMode {
    Read,
    Write,
}

pub const DMX_MIN_BAUD_RATE: u32 = 245_000;
pub const DMX_MAX_BAUD_RATE: u32 = 255_000;
pub const DMX_MIN_BREAK_LEN_US: u32 = 92;
pub const DMX_MAX_BREAK_LEN_US: u32 = 1_000_000;
pub const DMX_MIN_MAB_LEN_US: u32 = 12;
pub const DMX_MAX_MAB_LEN_US: u32 = 1_000_000;

/// Maximum size of a DMX512 frame: a start code byte plus 512 data slots.
pub const DMX_PACKET_SIZE_MAX: usize = 513;

/// Install-time configuration for a [`crate::driver::DmxDriver`]. Defaults
/// match `DMX_DEFAULT_CONFIG`: 250kbit/s, a 176us break, and a 12us
/// mark-after-break.
#[derive(Debug, Clone, Copy)]
pub struct DmxConfig {
    pub baud_rate: u32,
    pub break_len_us: u32,
    pub mab_len_us: u32,
    /// Maximum number of sub-devices (not counting the root device, sub-device 0).
    pub max_sub_devices: usize,
    /// Size of the packet buffer, up to [`DMX_PACKET_SIZE_MAX`]. Bytes
    /// beyond this are dropped by `write`/`send` and trigger an overflow
    /// event on receive.
    pub buffer_size: usize,
    /// This port's 48-bit RDM identifier. Spec.md leaves derivation from a
    /// hardware identifier to the integrator (out of scope, §1); the
    /// resulting UID is threaded through at install time rather than
    /// guessed at by this crate.
    pub uid: Uid,
}

impl Default for DmxConfig {
    fn default() -> Self {
        Self {
            baud_rate: 250_000,
            break_len_us: 176,
            mab_len_us: 12,
            max_sub_devices: 0,
            buffer_size: DMX_PACKET_SIZE_MAX,
            uid: Uid::new(0, 0),
        }
    }
}

impl DmxConfig {
    pub fn baud_rate_is_valid(baud: u32) -> bool {
        (DMX_MIN_BAUD_RATE..=DMX_MAX_BAUD_RATE).contains(&baud)
    }

    pub fn break_len_is_valid(len: u32) -> bool {
        (DMX_MIN_BREAK_LEN_US..=DMX_MAX_BREAK_LEN_US).contains(&len)
    }

    pub fn mab_len_is_valid(len: u32) -> bool {
        (DMX_MIN_MAB_LEN_US..=DMX_MAX_MAB_LEN_US).contains(&len)
    }

    pub fn buffer_size_is_valid(size: usize) -> bool {
        size > 0 && size <= DMX_PACKET_SIZE_MAX
    }
}
