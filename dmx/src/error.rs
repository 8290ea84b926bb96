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

//! Error and status taxonomy for the driver's public API.

use num_enum::{FromPrimitive, IntoPrimitive};

/// Top level error returned by fallible driver operations.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
pub enum DmxError {
    Ok = 0,
    InvalidArg,
    InvalidState,
    NoMem,
    Timeout,
    NotSupported,
    #[default]
    Fail,
}

impl From<DmxError> for Result<(), DmxError> {
    fn from(err: DmxError) -> Self {
        if err == DmxError::Ok {
            Ok(())
        } else {
            Err(err)
        }
    }
}

/// Per-packet status reported by [`crate::driver::DmxDriver::receive`].
///
/// This is separate from [`DmxError`] because a wire-level fault does not
/// invalidate the driver, only the packet currently in the buffer.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
pub enum PacketError {
    #[default]
    Ok = 0,
    Timeout,
    Overrun,
    Framing,
    BufferTooSmall,
}

/// Outcome of an RDM controller transaction.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
pub enum RdmResponseType {
    /// No response was received within the controller turnaround window.
    #[default]
    None = 0,
    Ack,
    AckTimer,
    NackReason,
    AckOverflow,
    /// A response was received but was not a well-formed RDM packet.
    Invalid,
}
