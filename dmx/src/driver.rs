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

//! Per-port driver object: lifecycle, send/receive API, and the UART/timer
//! ISR entry points.
//!
//! The interrupt-driven state machine here mirrors `dmx_default_intr_handler`
//! in the original driver, generalized onto the [`crate::hal::UartHal`] /
//! [`crate::hal::TimerHal`] traits instead of direct register pokes -- ISR
//! entry points only touch shared state through the spinlock and semaphores,
//! never block or allocate, the same discipline a bare-metal interrupt
//! thread reading raw UART registers would have to keep.

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::config::{DmxConfig, Port, PortMode, DMX_PACKET_SIZE_MAX};
use crate::error::{DmxError, PacketError};
use crate::frame::{rdm_checksum, DMX_START_CODE, RDM_START_CODE, RDM_SUB_START_CODE};
use crate::hal::{IntrStatus, LineDirection, TimerHal, UartHal};
use crate::rdm::responder::Responder;
use crate::sync::{BinarySemaphore, ReentrantMutex, Rtos, Spinlock};
use crate::uid::Uid;

/// Minimum time between the last slot of one packet and the break edge of
/// the next.
pub const DMX_BREAK_TO_BREAK_MIN_US: u32 = 1204;

/// The interrupts the receive path cares about.
const RX_INTR_MASK: u16 = IntrStatus::RXFIFO_FULL
    | IntrStatus::RXFIFO_TOUT
    | IntrStatus::RX_BREAK_DET
    | IntrStatus::RX_FRAME_ERR
    | IntrStatus::RX_PARITY_ERR
    | IntrStatus::RXFIFO_OVF;

/// The interrupts the transmit path cares about.
const TX_INTR_MASK: u16 = IntrStatus::TXFIFO_EMPTY | IntrStatus::TX_BREAK_IDLE | IntrStatus::TX_DONE;

/// A blocking call's wait policy: accepts a tick-count timeout, 0 polls
/// once, and the maximum value waits indefinitely.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Timeout {
    /// Poll once, don't block.
    None,
    /// Block for up to this many microseconds.
    Micros(u32),
    /// Block indefinitely.
    Forever,
}

impl Timeout {
    fn to_micros_opt(self) -> Option<u32> {
        match self {
            Timeout::None => Some(0),
            Timeout::Micros(us) => Some(us),
            Timeout::Forever => None,
        }
    }
}

/// Bitset of driver flags. A plain `u8` newtype rather than
/// `modular_bitfield`, which this crate reserves for MMIO register layouts
/// (see `dmx-hal-reference`).
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct DriverFlags(u8);

impl DriverFlags {
    pub const ENABLED: u8 = 1 << 0;
    pub const IDLE: u8 = 1 << 1;
    pub const SENDING: u8 = 1 << 2;
    pub const SENT_LAST: u8 = 1 << 3;
    pub const IN_BREAK: u8 = 1 << 4;
    pub const IN_MAB: u8 = 1 << 5;
    pub const HAS_DATA: u8 = 1 << 6;
    pub const ERROR: u8 = 1 << 7;

    pub const fn empty() -> Self { Self(0) }

    pub fn contains(self, bits: u8) -> bool { self.0 & bits == bits }

    pub fn any(self, bits: u8) -> bool { self.0 & bits != 0 }

    pub fn insert(&mut self, bits: u8) { self.0 |= bits; }

    pub fn remove(&mut self, bits: u8) { self.0 &= !bits; }

    pub fn bits(self) -> u8 { self.0 }
}

/// A received or receivable packet's metadata.
#[derive(Debug, Clone, Copy)]
pub struct DmxPacket {
    pub size: usize,
    pub start_code: u8,
    pub err: PacketError,
    pub is_rdm: bool,
    /// RDM sub-start-code (`0x01`) when `is_rdm`, otherwise `0`.
    pub sub_start_code: u8,
    pub timestamp_us: u64,
}

impl DmxPacket {
    const fn empty() -> Self {
        Self { size: 0, start_code: 0, err: PacketError::Ok, is_rdm: false, sub_start_code: 0, timestamp_us: 0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SnifferState {
    pub last_pos_edge_ts: u64,
    pub last_neg_edge_ts: u64,
}

/// Fields mutated from both the UART/timer ISR and task context, guarded by
/// [`crate::sync::Spinlock`]. The packet buffer itself is included here,
/// rather than relying on the mode/busy flags alone to keep writers mutually
/// exclusive, because Rust has no way to express "trust me, they never
/// overlap" without a lock around the actual bytes.
struct Shared {
    mode: PortMode,
    flags: DriverFlags,
    packet: [u8; DMX_PACKET_SIZE_MAX],
    /// Current fill (RX) or drain (TX) index into `packet`.
    head: usize,
    tx_size: usize,
    last_slot_ts: u64,
    pending: DmxPacket,
}

impl Shared {
    fn new() -> Self {
        let mut flags = DriverFlags::empty();
        flags.insert(DriverFlags::ENABLED | DriverFlags::IDLE);
        Self {
            mode: PortMode::Read,
            flags,
            packet: [0; DMX_PACKET_SIZE_MAX],
            head: 0,
            tx_size: 0,
            last_slot_ts: 0,
            pending: DmxPacket::empty(),
        }
    }
}

/// Per-port driver object. Generic over the three external collaborators it
/// is built against: the UART HAL, an optional one-shot microsecond timer,
/// and a minimal RTOS surface.
pub struct DmxDriver<U: UartHal, T: TimerHal, R: Rtos> {
    port: Port,
    pub(crate) uart: Spinlock<U>,
    timer: Spinlock<Option<T>>,
    pub(crate) rtos: R,
    config: DmxConfig,
    break_len_us: AtomicU32,
    mab_len_us: AtomicU32,
    shared: Spinlock<Shared>,
    pub(crate) mutex: ReentrantMutex<R::TaskId, ()>,
    tx_done: BinarySemaphore<R::TaskId>,
    rx_ready: BinarySemaphore<R::TaskId>,
    uid: Uid,
    pub(crate) rdm_tn: AtomicU8,
    pub(crate) responder: ReentrantMutex<R::TaskId, Responder>,
    sniffer: Spinlock<Option<SnifferState>>,
}

impl<U: UartHal, T: TimerHal, R: Rtos> DmxDriver<U, T, R> {
    /// Installs the driver onto `uart`. Fails if the baud rate, break
    /// length, MAB length, or buffer size is out of range.
    pub fn install(port: Port, mut uart: U, timer: Option<T>, rtos: R, config: DmxConfig) -> Result<Self, DmxError> {
        if !DmxConfig::baud_rate_is_valid(config.baud_rate)
            || !DmxConfig::break_len_is_valid(config.break_len_us)
            || !DmxConfig::mab_len_is_valid(config.mab_len_us)
            || !DmxConfig::buffer_size_is_valid(config.buffer_size)
        {
            return Err(DmxError::InvalidArg);
        }

        // Disable every UART interrupt, clear pending status, configure the
        // baud rate and FIFOs, assert line-direction as receiver, and enable
        // the receive interrupt family.
        uart.disable_interrupts(0xffff);
        uart.clear_interrupts(0xffff);
        uart.set_baud_rate(config.baud_rate);
        uart.reset_tx_fifo();
        uart.reset_rx_fifo();
        uart.set_line_direction(LineDirection::Receive);
        uart.enable_rx();
        uart.enable_interrupts(RX_INTR_MASK);

        let uid = config.uid;
        Ok(Self {
            port,
            uart: Spinlock::new(uart),
            timer: Spinlock::new(timer),
            rtos,
            config,
            break_len_us: AtomicU32::new(config.break_len_us),
            mab_len_us: AtomicU32::new(config.mab_len_us),
            shared: Spinlock::new(Shared::new()),
            mutex: ReentrantMutex::new(()),
            // Both semaphores start "given": the first `wait_sent`/`receive`
            // call must not spuriously block on a semaphore nobody has
            // posted yet.
            tx_done: BinarySemaphore::new_given(),
            rx_ready: BinarySemaphore::new_given(),
            uid,
            rdm_tn: AtomicU8::new(0),
            responder: ReentrantMutex::new(Responder::new(config.max_sub_devices)),
            sniffer: Spinlock::new(None),
        })
    }

    /// Tears the driver down: disables the peripheral, flushes any
    /// `NonVolatile` parameters one last time, and consumes `self` --
    /// ownership makes "nulls the per-port slot" implicit, since there is
    /// no slot left to null.
    pub fn delete(self) -> Result<(), DmxError> {
        {
            let mut uart = self.uart.lock();
            uart.disable_rx();
            uart.disable_tx();
            uart.disable_interrupts(0xffff);
        }
        if let Some(mut timer) = self.timer.lock().take() {
            timer.cancel();
        }
        let mut responder = self.responder.lock(&self.rtos);
        responder.flush_non_volatile();
        Ok(())
    }

    pub fn port(&self) -> Port { self.port }

    pub fn rdm_uid(&self) -> Uid { self.uid }

    pub fn mode(&self) -> PortMode { self.shared.lock().mode }

    /// Changes line direction and which interrupt family is enabled.
    /// Rejected while a send is in flight.
    pub fn set_mode(&self, mode: PortMode) -> Result<(), DmxError> {
        let _guard = self.mutex.lock(&self.rtos);
        let mut shared = self.shared.lock();
        if shared.flags.any(DriverFlags::SENDING) {
            return Err(DmxError::InvalidState);
        }
        shared.mode = mode;
        let mut uart = self.uart.lock();
        match mode {
            PortMode::Read => {
                uart.disable_tx();
                uart.disable_interrupts(TX_INTR_MASK);
                uart.set_line_direction(LineDirection::Receive);
                uart.reset_rx_fifo();
                uart.enable_rx();
                uart.enable_interrupts(RX_INTR_MASK);
            }
            PortMode::Write => {
                uart.disable_rx();
                uart.disable_interrupts(RX_INTR_MASK);
                uart.set_line_direction(LineDirection::Transmit);
                uart.enable_tx();
            }
        }
        Ok(())
    }

    pub fn set_pin(&self, tx: u8, rx: u8, rts: u8) -> Result<(), DmxError> {
        let _guard = self.mutex.lock(&self.rtos);
        self.uart.lock().set_pins(tx, rx, rts);
        Ok(())
    }

    pub fn set_baud_rate(&self, baud: u32) -> Result<(), DmxError> {
        if !DmxConfig::baud_rate_is_valid(baud) {
            return Err(DmxError::InvalidArg);
        }
        let _guard = self.mutex.lock(&self.rtos);
        let shared = self.shared.lock();
        if shared.flags.any(DriverFlags::SENDING) {
            return Err(DmxError::InvalidState);
        }
        self.uart.lock().set_baud_rate(baud);
        Ok(())
    }

    pub fn set_break_len(&self, us: u32) -> Result<(), DmxError> {
        if !DmxConfig::break_len_is_valid(us) {
            return Err(DmxError::InvalidArg);
        }
        self.break_len_us.store(us, Ordering::Release);
        Ok(())
    }

    pub fn set_mab_len(&self, us: u32) -> Result<(), DmxError> {
        if !DmxConfig::mab_len_is_valid(us) {
            return Err(DmxError::InvalidArg);
        }
        self.mab_len_us.store(us, Ordering::Release);
        Ok(())
    }

    pub fn break_len(&self) -> u32 { self.break_len_us.load(Ordering::Acquire) }

    pub fn mab_len(&self) -> u32 { self.mab_len_us.load(Ordering::Acquire) }

    /// Copies up to `buf.len()` bytes of the last completed/current packet
    /// into `buf`, outside an active transfer.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let _guard = self.mutex.lock(&self.rtos);
        let shared = self.shared.lock();
        // `head` is reset to 0 the instant a packet completes
        // (`complete_packet`/`on_rx_frame_boundary`), so the last completed
        // packet's length lives in `pending.size`, not `head`.
        let n = buf.len().min(shared.pending.size).min(self.config.buffer_size);
        buf[..n].copy_from_slice(&shared.packet[..n]);
        n
    }

    /// Copies `buf` into the driver's packet buffer for a subsequent
    /// `send`. Rejected while a send is in flight.
    pub fn write(&self, buf: &[u8]) -> usize {
        let _guard = self.mutex.lock(&self.rtos);
        let mut shared = self.shared.lock();
        if shared.flags.any(DriverFlags::SENDING) {
            return 0;
        }
        let n = buf.len().min(self.config.buffer_size);
        shared.packet[..n].copy_from_slice(&buf[..n]);
        shared.tx_size = n;
        n
    }

    /// Writes `frame` into the packet buffer and recomputes its RDM
    /// checksum if present, since the checksum is recomputed before every
    /// send rather than trusted from the caller. Internal: used by the RDM
    /// controller and responder to commit a composed request/response
    /// before calling [`Self::send`].
    pub(crate) fn load_and_checksum(&self, frame: &[u8]) -> usize {
        let mut shared = self.shared.lock();
        let n = frame.len().min(self.config.buffer_size);
        shared.packet[..n].copy_from_slice(&frame[..n]);
        if n >= 2 && shared.packet[0] == RDM_START_CODE && shared.packet[1] == RDM_SUB_START_CODE {
            let checksum = rdm_checksum(&shared.packet[..n - 2]);
            shared.packet[n - 2..n].copy_from_slice(&checksum.to_be_bytes());
        }
        shared.tx_size = n;
        n
    }

    pub(crate) fn snapshot_buffer(&self) -> ([u8; DMX_PACKET_SIZE_MAX], usize) {
        let shared = self.shared.lock();
        (shared.packet, shared.tx_size)
    }

    pub(crate) fn restore_buffer(&self, saved: &[u8; DMX_PACKET_SIZE_MAX], tx_size: usize) {
        let mut shared = self.shared.lock();
        shared.packet = *saved;
        shared.tx_size = tx_size;
    }

    /// TX entry point. Serializes the first `size` bytes of the buffer
    /// written by `write`, enforces packet-to-packet spacing, drives the
    /// break edge, and returns -- the rest of the transmission runs in
    /// ISR/timer context.
    pub fn send(&self, size: usize, timeout: Timeout) -> Result<usize, DmxError> {
        let _guard = self.mutex.lock(&self.rtos);
        {
            let shared = self.shared.lock();
            if shared.mode != PortMode::Write {
                return Err(DmxError::InvalidState);
            }
            if shared.flags.any(DriverFlags::SENDING) {
                return Err(DmxError::Fail);
            }
        }

        // Enforce packet-to-packet spacing: busy-wait if less than
        // DMX_BREAK_TO_BREAK_MIN_US has elapsed since the last slot, bounded
        // because the gap is at most that constant.
        loop {
            let last_slot_ts = self.shared.lock().last_slot_ts;
            let now = self.rtos.now_us();
            if now.saturating_sub(last_slot_ts) >= DMX_BREAK_TO_BREAK_MIN_US as u64 {
                break;
            }
            match timeout {
                Timeout::None => break,
                _ => {}
            }
        }

        let size = size.min(self.config.buffer_size);
        self.tx_done.try_take();
        {
            let mut shared = self.shared.lock();
            shared.tx_size = size;
            shared.head = 0;
            shared.flags.insert(DriverFlags::SENDING | DriverFlags::IN_BREAK);
            shared.flags.remove(DriverFlags::IDLE);
        }

        {
            let mut uart = self.uart.lock();
            uart.invert_tx(true);
        }

        let has_timer = {
            let mut timer = self.timer.lock();
            if let Some(t) = timer.as_mut() {
                t.arm_one_shot(self.break_len_us.load(Ordering::Acquire));
                true
            } else {
                false
            }
        };

        if !has_timer {
            // When no hardware timer is available, send busy-waits the
            // break and MAB inline instead.
            self.busy_wait_break_then_mab();
            self.begin_tx_fifo_fill();
        }

        Ok(size)
    }

    /// Inline busy-wait fallback for break/MAB when no [`TimerHal`] is
    /// configured. Precision is bounded by preemption: within ±10µs if not
    /// preempted.
    fn busy_wait_break_then_mab(&self) {
        let start = self.rtos.now_us();
        let break_us = self.break_len_us.load(Ordering::Acquire) as u64;
        while self.rtos.now_us().saturating_sub(start) < break_us {}
        {
            let mut uart = self.uart.lock();
            uart.invert_tx(false);
        }
        {
            let mut shared = self.shared.lock();
            shared.flags.remove(DriverFlags::IN_BREAK);
            shared.flags.insert(DriverFlags::IN_MAB);
        }
        let mab_start = self.rtos.now_us();
        let mab_us = self.mab_len_us.load(Ordering::Acquire) as u64;
        while self.rtos.now_us().saturating_sub(mab_start) < mab_us {}
        self.shared.lock().flags.remove(DriverFlags::IN_MAB);
    }

    /// Pushes the first FIFO-load of bytes and enables `TXFIFO_EMPTY`,
    /// shared by both the timer-driven and busy-wait break/MAB paths.
    fn begin_tx_fifo_fill(&self) {
        let mut uart = self.uart.lock();
        let mut shared = self.shared.lock();
        let remaining_end = shared.tx_size;
        let written = uart.fill_tx_fifo(&shared.packet[0..remaining_end]);
        shared.head = written;
        if shared.head < shared.tx_size {
            uart.enable_interrupts(IntrStatus::TXFIFO_EMPTY);
        } else {
            uart.enable_interrupts(IntrStatus::TX_DONE);
        }
    }

    /// Blocks until the in-flight send's shift register has emptied, or
    /// `timeout` elapses.
    pub fn wait_sent(&self, timeout: Timeout) -> bool {
        let woken = self.tx_done.take(&self.rtos, timeout.to_micros_opt());
        if woken {
            self.tx_done.give(&self.rtos);
        }
        woken
    }

    /// Blocking receive. Either drains an already-arrived packet
    /// (`HAS_DATA`) or blocks on the ISR's notification.
    pub fn receive(&self, timeout: Timeout) -> Result<DmxPacket, DmxError> {
        let _guard = self.mutex.lock(&self.rtos);
        {
            let shared = self.shared.lock();
            if shared.mode != PortMode::Read {
                return Err(DmxError::InvalidState);
            }
            if shared.flags.any(DriverFlags::HAS_DATA) {
                return Ok(self.take_pending_packet());
            }
        }
        if !self.rx_ready.take(&self.rtos, timeout.to_micros_opt()) {
            return Ok(DmxPacket { err: PacketError::Timeout, ..DmxPacket::empty() });
        }
        let shared = self.shared.lock();
        if shared.flags.any(DriverFlags::HAS_DATA) {
            drop(shared);
            Ok(self.take_pending_packet())
        } else {
            Ok(DmxPacket { err: PacketError::Timeout, ..DmxPacket::empty() })
        }
    }

    fn take_pending_packet(&self) -> DmxPacket {
        let mut shared = self.shared.lock();
        shared.flags.remove(DriverFlags::HAS_DATA);
        shared.pending
    }

    pub fn sniffer_enable(&self, _gpio: u8) -> Result<(), DmxError> {
        *self.sniffer.lock() = Some(SnifferState { last_pos_edge_ts: 0, last_neg_edge_ts: 0 });
        Ok(())
    }

    pub fn sniffer_disable(&self) {
        *self.sniffer.lock() = None;
    }

    /// Records a GPIO edge for the optional edge-triggered sniffer
    /// peripheral. Called from a GPIO ISR, not the UART/timer ISRs.
    pub fn sniffer_on_edge(&self, rising: bool, timestamp_us: u64) {
        if let Some(state) = self.sniffer.lock().as_mut() {
            if rising {
                state.last_pos_edge_ts = timestamp_us;
            } else {
                state.last_neg_edge_ts = timestamp_us;
            }
        }
    }

    pub fn sniffer_last_edges(&self) -> Option<(u64, u64)> {
        self.sniffer.lock().as_ref().map(|s| (s.last_pos_edge_ts, s.last_neg_edge_ts))
    }

    // ---- ISR entry points -------------------------------------------------
    //
    // Never block, allocate, or log: they mutate `Shared` under the
    // spinlock and signal a semaphore.

    /// UART interrupt handler. Dispatches on `status` the way
    /// `dmx_default_intr_handler` tests each interrupt bit in turn.
    pub fn on_uart_interrupt(&self) {
        let status = self.uart.lock().interrupt_status();

        if status.any(IntrStatus::TXFIFO_EMPTY) {
            self.on_tx_fifo_empty();
        }
        if status.any(IntrStatus::TX_DONE) {
            self.on_tx_done();
        }
        if status.any(IntrStatus::RXFIFO_OVF) || status.any(IntrStatus::RX_PARITY_ERR) {
            self.on_rx_error(if status.any(IntrStatus::RXFIFO_OVF) { PacketError::Overrun } else { PacketError::Framing });
        }
        if status.any(IntrStatus::RX_BREAK_DET) || status.any(IntrStatus::RX_FRAME_ERR) {
            self.on_rx_frame_boundary();
        }
        if status.any(IntrStatus::RXFIFO_FULL) || status.any(IntrStatus::RXFIFO_TOUT) {
            self.on_rx_data_ready(status.any(IntrStatus::RXFIFO_TOUT));
        }

        self.uart.lock().clear_interrupts(status.0);
    }

    fn on_tx_fifo_empty(&self) {
        let mut uart = self.uart.lock();
        let mut shared = self.shared.lock();
        let tx_size = shared.tx_size;
        let written = uart.fill_tx_fifo(&shared.packet[shared.head..tx_size]);
        shared.head += written;
        if shared.head >= shared.tx_size {
            uart.disable_interrupts(IntrStatus::TXFIFO_EMPTY | IntrStatus::TX_BREAK_IDLE);
            uart.enable_interrupts(IntrStatus::TX_DONE);
        }
    }

    fn on_tx_done(&self) {
        let now = self.rtos.now_us();
        {
            let mut shared = self.shared.lock();
            shared.flags.remove(DriverFlags::SENDING);
            shared.flags.insert(DriverFlags::IDLE | DriverFlags::SENT_LAST);
            shared.last_slot_ts = now;
        }
        self.uart.lock().disable_interrupts(IntrStatus::TX_DONE);
        self.tx_done.give(&self.rtos);
    }

    /// Drains the FIFO into the buffer on any data-ready interrupt.
    /// `is_timeout` additionally ends the current packet, the same way
    /// `RXFIFO_TOUT` is handled as an end-of-packet boundary.
    fn on_rx_data_ready(&self, is_timeout: bool) {
        let now = self.rtos.now_us();
        let mut uart = self.uart.lock();
        let mut shared = self.shared.lock();
        loop {
            let remaining = &mut shared.packet[shared.head..];
            if remaining.is_empty() {
                // Buffer smaller than incoming packet: flush and mark an
                // overflow for the next `receive()`.
                uart.reset_rx_fifo();
                shared.pending.err = PacketError::BufferTooSmall;
                break;
            }
            let n = uart.read_rx_fifo(remaining);
            if n == 0 {
                break;
            }
            shared.head += n;
            if uart.rx_fifo_len() == 0 {
                break;
            }
        }
        if is_timeout {
            self.complete_packet(&mut shared, now);
        }
    }

    /// A break or framing-error indicator marks the start of a new packet
    /// boundary: whatever was accumulated becomes a completed packet.
    fn on_rx_frame_boundary(&self) {
        let now = self.rtos.now_us();
        let mut shared = self.shared.lock();
        if shared.head > 0 {
            self.complete_packet(&mut shared, now);
        }
        shared.head = 0;
    }

    fn complete_packet(&self, shared: &mut Shared, now: u64) {
        if shared.head == 0 {
            return;
        }
        let start_code = shared.packet[0];
        let is_rdm = start_code == RDM_START_CODE;
        let sub_start_code = if is_rdm && shared.head > 1 { shared.packet[1] } else { 0 };
        let err = shared.pending.err;
        shared.pending = DmxPacket {
            size: shared.head,
            start_code,
            err,
            is_rdm,
            sub_start_code,
            timestamp_us: now,
        };
        if start_code == DMX_START_CODE || is_rdm {
            shared.last_slot_ts = now;
        }
        shared.flags.insert(DriverFlags::HAS_DATA);
        shared.head = 0;
        self.rx_ready.give(&self.rtos);
    }

    /// Overflow/parity: the current packet is unusable. Flush the FIFO and
    /// raise the error for the next `receive()`.
    fn on_rx_error(&self, err: PacketError) {
        let mut uart = self.uart.lock();
        uart.reset_rx_fifo();
        let mut shared = self.shared.lock();
        shared.flags.insert(DriverFlags::ERROR);
        shared.pending.err = err;
        shared.head = 0;
    }

    /// Timer interrupt handler: advances the break -> MAB -> data-ready
    /// sequence.
    pub fn on_timer_interrupt(&self) {
        let in_break = self.shared.lock().flags.any(DriverFlags::IN_BREAK);
        if in_break {
            self.uart.lock().invert_tx(false);
            {
                let mut shared = self.shared.lock();
                shared.flags.remove(DriverFlags::IN_BREAK);
                shared.flags.insert(DriverFlags::IN_MAB);
            }
            if let Some(t) = self.timer.lock().as_mut() {
                t.arm_one_shot(self.mab_len_us.load(Ordering::Acquire));
            }
            return;
        }
        let in_mab = self.shared.lock().flags.any(DriverFlags::IN_MAB);
        if in_mab {
            self.shared.lock().flags.remove(DriverFlags::IN_MAB);
            self.begin_tx_fifo_fill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_flags_roundtrip() {
        let mut f = DriverFlags::empty();
        assert!(!f.any(DriverFlags::SENDING));
        f.insert(DriverFlags::SENDING | DriverFlags::IN_BREAK);
        assert!(f.contains(DriverFlags::SENDING | DriverFlags::IN_BREAK));
        f.remove(DriverFlags::IN_BREAK);
        assert!(f.any(DriverFlags::SENDING) && !f.any(DriverFlags::IN_BREAK));
    }
}
