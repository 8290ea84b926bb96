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

//! Hosted mock harness for driving the interrupt-driven state machine from
//! `std`-backed unit tests. Test code fires ISR events ("hardware" raises a
//! flag, the test calls `on_uart_interrupt`/`on_timer_interrupt`) and then
//! polls with [`crate::driver::Timeout::None`] -- [`MockRtos::block_current_task`]
//! never actually parks, so a blocking wait that outruns what the test
//! already signaled would hang rather than succeed later.

use std::boxed::Box;
use std::cell::Cell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::vec::Vec;

use crate::hal::{IntrStatus, LineDirection, TimerHal, UartHal};
use crate::nvs::NvsBackend;
use crate::sync::Rtos;

pub struct MockUart {
    pub rx_fifo: VecDeque<u8>,
    pub tx_sent: Vec<u8>,
    pub tx_enabled: bool,
    pub rx_enabled: bool,
    pub baud_rate: u32,
    pub break_bits: u8,
    pub idle_bits: u16,
    pub inverted: bool,
    pub direction: LineDirection,
    pub pins: (u8, u8, u8),
    pub enabled_interrupts: u16,
    pub pending: u16,
    pub rx_timeout_threshold: u8,
}

impl Default for MockUart {
    fn default() -> Self {
        Self {
            rx_fifo: VecDeque::new(),
            tx_sent: Vec::new(),
            tx_enabled: false,
            rx_enabled: false,
            baud_rate: 0,
            break_bits: 0,
            idle_bits: 0,
            inverted: false,
            direction: LineDirection::Receive,
            pins: (0, 0, 0),
            enabled_interrupts: 0,
            pending: 0,
            rx_timeout_threshold: 0,
        }
    }
}

impl MockUart {
    /// Simulates hardware raising interrupt flags, for the test to pick up
    /// on the next `on_uart_interrupt` call.
    pub fn raise(&mut self, mask: u16) { self.pending |= mask; }

    /// Queues bytes as if they'd arrived over the wire, for the test to
    /// drain with a subsequent `RXFIFO_FULL`/`RXFIFO_TOUT` interrupt.
    pub fn push_rx(&mut self, bytes: &[u8]) { self.rx_fifo.extend(bytes); }
}

impl UartHal for MockUart {
    fn enable_tx(&mut self) { self.tx_enabled = true; }
    fn disable_tx(&mut self) { self.tx_enabled = false; }
    fn enable_rx(&mut self) { self.rx_enabled = true; }
    fn disable_rx(&mut self) { self.rx_enabled = false; }

    fn reset_tx_fifo(&mut self) { self.tx_sent.clear(); }
    fn reset_rx_fifo(&mut self) { self.rx_fifo.clear(); }

    fn set_baud_rate(&mut self, baud: u32) { self.baud_rate = baud; }
    fn baud_rate(&self) -> u32 { self.baud_rate }

    fn invert_tx(&mut self, invert: bool) { self.inverted = invert; }
    fn set_line_direction(&mut self, direction: LineDirection) { self.direction = direction; }
    fn set_pins(&mut self, tx: u8, rx: u8, rts: u8) { self.pins = (tx, rx, rts); }

    fn idle_bit_count(&self) -> u16 { self.idle_bits }
    fn break_bit_count(&self) -> u8 { self.break_bits }
    fn set_break_bit_count(&mut self, bits: u8) { self.break_bits = bits; }
    fn set_idle_bit_count(&mut self, bits: u16) { self.idle_bits = bits; }

    fn fill_tx_fifo(&mut self, data: &[u8]) -> usize {
        self.tx_sent.extend_from_slice(data);
        data.len()
    }
    fn tx_fifo_empty(&self) -> bool { true }

    fn read_rx_fifo(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.rx_fifo.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.rx_fifo.pop_front().unwrap();
        }
        n
    }
    fn rx_fifo_len(&self) -> usize { self.rx_fifo.len() }

    fn set_rx_timeout_threshold(&mut self, symbols: u8) { self.rx_timeout_threshold = symbols; }

    fn enable_interrupts(&mut self, mask: u16) { self.enabled_interrupts |= mask; }
    fn disable_interrupts(&mut self, mask: u16) { self.enabled_interrupts &= !mask; }
    fn clear_interrupts(&mut self, mask: u16) { self.pending &= !mask; }
    fn interrupt_status(&self) -> IntrStatus { IntrStatus(self.pending) }
    fn enabled_interrupts(&self) -> u16 { self.enabled_interrupts }
}

#[derive(Default)]
pub struct MockTimer {
    pub armed_us: Option<u32>,
}

impl TimerHal for MockTimer {
    fn arm_one_shot(&mut self, micros: u32) { self.armed_us = Some(micros); }
    fn cancel(&mut self) { self.armed_us = None; }
}

/// A single-task `Rtos`: `block_current_task` never actually parks, so
/// tests must fire whatever ISR the wait is waiting on before calling a
/// blocking method (`take`/`receive`/`wait_sent` all check the semaphore
/// before ever blocking).
pub struct MockRtos {
    clock_us: Cell<u64>,
}

impl Default for MockRtos {
    fn default() -> Self { Self { clock_us: Cell::new(0) } }
}

impl MockRtos {
    pub fn advance(&self, us: u64) { self.clock_us.set(self.clock_us.get() + us); }
}

impl Rtos for MockRtos {
    type TaskId = u32;

    fn current_task(&self) -> u32 { 1 }
    fn now_us(&self) -> u64 { self.clock_us.get() }
    fn block_current_task(&self, _timeout_us: Option<u32>) -> bool { false }
    fn wake(&self, _task: u32) {}
}

/// An in-memory `NvsBackend` for exercising `NonVolatile` parameter
/// round-trips without a real flash/EEPROM.
#[derive(Default)]
pub struct TestNvs {
    store: Mutex<BTreeMap<(&'static str, &'static str), Vec<u8>>>,
}

impl TestNvs {
    pub const fn new() -> Self { Self { store: Mutex::new(BTreeMap::new()) } }
}

impl NvsBackend for TestNvs {
    fn exists(&self, namespace: &str, key: &str) -> bool {
        // Keys are always constructed from a fixed `pid_key` alphabet, so a
        // short-lived `&str` compares equal to the `'static` ones stored as
        // map keys without needing to intern it.
        self.store.lock().unwrap().keys().any(|(ns, k)| *ns == namespace && *k == key)
    }

    fn get(&self, namespace: &str, key: &str, out: &mut [u8]) -> Option<usize> {
        let store = self.store.lock().unwrap();
        let (_, v) = store.iter().find(|((ns, k), _)| *ns == namespace && *k == key)?;
        if v.len() > out.len() {
            return None;
        }
        out[..v.len()].copy_from_slice(v);
        Some(v.len())
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> bool {
        // Test-only backend: leaks the namespace/key so they can live as
        // `'static` map keys without a real NVS's string-table allocator.
        let ns: &'static str = Box::leak(namespace.to_owned().into_boxed_str());
        let k: &'static str = Box::leak(key.to_owned().into_boxed_str());
        self.store.lock().unwrap().insert((ns, k), value.to_vec());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DmxConfig, Port, PortMode};
    use crate::driver::{DmxDriver, Timeout};
    use crate::error::PacketError;
    use crate::frame::DMX_START_CODE;

    fn install(mode: PortMode) -> DmxDriver<MockUart, MockTimer, MockRtos> {
        let driver = DmxDriver::install(Port(0), MockUart::default(), Some(MockTimer::default()), MockRtos::default(), DmxConfig::default())
            .expect("valid default config installs");
        driver.set_mode(mode).expect("mode change accepted while idle");
        driver
    }

    #[test]
    fn send_runs_break_mab_and_fifo_fill_to_completion() {
        let driver = install(PortMode::Write);
        let frame = [DMX_START_CODE, 1, 2, 3];
        driver.write(&frame);
        driver.send(frame.len(), Timeout::None).expect("send accepted");

        // Break armed by `send`; firing the timer advances break -> MAB.
        driver.on_timer_interrupt();
        // MAB armed; firing again starts the FIFO fill and arms TX_DONE.
        driver.on_timer_interrupt();
        driver.uart.lock().raise(IntrStatus::TX_DONE);
        driver.on_uart_interrupt();

        assert!(driver.wait_sent(Timeout::None));
        assert_eq!(driver.uart.lock().tx_sent, frame);
    }

    #[test]
    fn receive_assembles_packet_on_break_boundary() {
        let driver = install(PortMode::Read);
        driver.uart.lock().push_rx(&[DMX_START_CODE, 9, 8, 7]);
        driver.uart.lock().raise(IntrStatus::RXFIFO_FULL);
        driver.on_uart_interrupt();
        driver.uart.lock().raise(IntrStatus::RX_BREAK_DET);
        driver.on_uart_interrupt();

        let packet = driver.receive(Timeout::None).expect("no rtos error");
        assert_eq!(packet.err, PacketError::Ok);
        assert_eq!(packet.size, 4);
        assert_eq!(packet.start_code, DMX_START_CODE);

        let mut buf = [0u8; 4];
        driver.read(&mut buf);
        assert_eq!(buf, [DMX_START_CODE, 9, 8, 7]);
    }

    #[test]
    fn receive_reports_buffer_too_small_on_overflow() {
        let driver = DmxDriver::install(
            Port(0),
            MockUart::default(),
            Some(MockTimer::default()),
            MockRtos::default(),
            DmxConfig { buffer_size: 2, ..DmxConfig::default() },
        )
        .expect("small buffer is still a valid config");
        driver.set_mode(PortMode::Read).unwrap();
        driver.uart.lock().push_rx(&[DMX_START_CODE, 1, 2, 3]);
        driver.uart.lock().raise(IntrStatus::RXFIFO_FULL);
        driver.on_uart_interrupt();
        driver.uart.lock().raise(IntrStatus::RX_BREAK_DET);
        driver.on_uart_interrupt();

        let packet = driver.receive(Timeout::None).expect("no rtos error");
        assert_eq!(packet.err, PacketError::BufferTooSmall);
    }

    #[test]
    fn set_mode_rejected_while_sending() {
        let driver = install(PortMode::Write);
        driver.write(&[DMX_START_CODE, 1]);
        driver.send(2, Timeout::None).unwrap();
        assert!(driver.set_mode(PortMode::Read).is_err());
    }
}
