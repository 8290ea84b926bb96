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

//! The hardware abstraction the driver is built against. Nothing in this
//! crate touches a register directly; an integrator provides a type that
//! implements [`UartHal`] and, optionally, [`TimerHal`].

/// Logic level driving the half-duplex transceiver's direction pin.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LineDirection {
    Transmit,
    Receive,
}

/// Interrupt flags the ISR dispatch in [`crate::driver`] cares about,
/// grouped the way `dmx_default_intr_handler` masks them: a transmit group
/// and a receive group, tested together rather than bit by bit.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct IntrStatus(pub u16);

impl IntrStatus {
    pub const TXFIFO_EMPTY: u16 = 1 << 0;
    pub const TX_BREAK_IDLE: u16 = 1 << 1;
    pub const TX_DONE: u16 = 1 << 2;
    pub const TX_BREAK_DONE: u16 = 1 << 3;
    pub const RXFIFO_FULL: u16 = 1 << 4;
    pub const RX_FRAME_ERR: u16 = 1 << 5;
    pub const RX_PARITY_ERR: u16 = 1 << 6;
    pub const RX_BREAK_DET: u16 = 1 << 7;
    pub const RXFIFO_TOUT: u16 = 1 << 8;
    pub const RXFIFO_OVF: u16 = 1 << 9;

    pub fn any(self, mask: u16) -> bool { self.0 & mask != 0 }
}

/// Register-level operations the driver needs from a half-duplex UART
/// peripheral. Mirrors the surface `dmx_hal.h`/`dmx_ll.h` expose in the
/// original driver (idle/break bit counts, FIFO read/write, interrupt
/// enable/clear), generalized into a trait instead of a fixed register map
/// so the crate compiles against any concrete peripheral.
pub trait UartHal {
    fn enable_tx(&mut self);
    fn disable_tx(&mut self);
    fn enable_rx(&mut self);
    fn disable_rx(&mut self);

    fn reset_tx_fifo(&mut self);
    fn reset_rx_fifo(&mut self);

    fn set_baud_rate(&mut self, baud: u32);
    fn baud_rate(&self) -> u32;

    /// Inverts the idle line level. Used to generate the break/MAB
    /// sequence on peripherals with no dedicated break generator, the same
    /// trick `dmx_send_packet` plays by inverting TX and letting a timer
    /// flip it back.
    fn invert_tx(&mut self, invert: bool);

    fn set_line_direction(&mut self, direction: LineDirection);

    /// Routes the UART's TX/RX/RTS signals to the given pin numbers. Pin
    /// numbering is platform-defined; this crate treats them as opaque.
    fn set_pins(&mut self, tx: u8, rx: u8, rts: u8);

    /// Number of idle bit periods the controller inserts after a frame
    /// (`dmx_hal_get_idle_num`), used to size the inter-slot MAB.
    fn idle_bit_count(&self) -> u16;
    /// Number of bit periods the controller holds the line low for break
    /// (`dmx_hal_get_break_num`).
    fn break_bit_count(&self) -> u8;
    fn set_break_bit_count(&mut self, bits: u8);
    fn set_idle_bit_count(&mut self, bits: u16);

    /// Pushes as many bytes as fit into the hardware TX FIFO, returning the
    /// count actually written.
    fn fill_tx_fifo(&mut self, data: &[u8]) -> usize;
    fn tx_fifo_empty(&self) -> bool;

    /// Drains up to `buf.len()` bytes from the hardware RX FIFO, returning
    /// the count actually read (`dmx_hal_readn_rxfifo`).
    fn read_rx_fifo(&mut self, buf: &mut [u8]) -> usize;
    fn rx_fifo_len(&self) -> usize;

    /// Sets the number of idle symbol periods of silence the controller
    /// waits before raising `RXFIFO_TOUT`.
    fn set_rx_timeout_threshold(&mut self, symbols: u8);

    fn enable_interrupts(&mut self, mask: u16);
    fn disable_interrupts(&mut self, mask: u16);
    fn clear_interrupts(&mut self, mask: u16);
    fn interrupt_status(&self) -> IntrStatus;
    fn enabled_interrupts(&self) -> u16;
}

/// A one-shot microsecond timer used to time break/MAB generation and
/// packet spacing when the platform offers one. When `None` is supplied at
/// install time the driver falls back to busy-waiting on [`crate::sync::Rtos::now_us`].
pub trait TimerHal {
    fn arm_one_shot(&mut self, micros: u32);
    fn cancel(&mut self);
}
