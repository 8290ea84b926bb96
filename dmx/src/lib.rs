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

//! A DMX512/RDM UART driver for embedded targets, built against a hardware
//! abstraction ([`hal::UartHal`]/[`hal::TimerHal`]) and a minimal RTOS
//! surface ([`sync::Rtos`]) rather than a fixed register map or scheduler,
//! so the same driver logic runs on any platform an integrator wires up.
//!
//! [`driver::DmxDriver`] is the entry point: `install` it onto a UART HAL,
//! then drive DMX512 frames with `send`/`receive`, or RDM with
//! `rdm_send_request` (controller side) and `rdm_register` (responder
//! side).

// Hosted unit tests build with `std` available so the mock harness in
// `testing` can use `RefCell`/`VecDeque` instead of hand-rolled
// synchronization; the production build stays `no_std`.
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod hal;
pub mod nvs;
pub mod rdm;
pub mod sync;
pub mod uid;

#[cfg(test)]
mod testing;

pub use config::{DmxConfig, Port, PortMode, DMX_PACKET_SIZE_MAX};
pub use driver::{DmxDriver, DmxPacket, DriverFlags, Timeout};
pub use error::{DmxError, PacketError, RdmResponseType};
pub use hal::{IntrStatus, LineDirection, TimerHal, UartHal};
pub use nvs::{NullNvs, NvsBackend};
pub use sync::Rtos;
pub use uid::Uid;
