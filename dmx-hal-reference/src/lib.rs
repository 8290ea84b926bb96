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

//! Reference [`dmx::UartHal`]/[`dmx::TimerHal`] implementation against the
//! OpenTitan `uart` and `rv_timer` IP blocks.
//! https://docs.opentitan.org/hw/ip/uart/doc/
//! https://docs.opentitan.org/hw/ip/rv_timer/doc/
//!
//! This is wiring, not a product: an integrator points [`ReferenceUart::new`]
//! and [`ReferenceTimer::new`] at the base address their platform maps the
//! peripheral at and gets a working [`dmx::DmxDriver`] backend. The register
//! layouts below mirror OpenTitan's `regtool`-generated ones, translated to
//! plain base-pointer structs so the HAL doesn't depend on any particular
//! IPC/thread framework.

#![no_std]

use modular_bitfield::prelude::*;

use dmx::hal::{IntrStatus as DmxIntrStatus, LineDirection, TimerHal, UartHal};

// Register offsets, relative to the UART block's base address.
const INTR_STATE_OFFSET: usize = 0x00;
const INTR_ENABLE_OFFSET: usize = 0x04;
const CTRL_OFFSET: usize = 0x10;
const STATUS_OFFSET: usize = 0x14;
const RDATA_OFFSET: usize = 0x18;
const WDATA_OFFSET: usize = 0x1c;
const FIFO_CTRL_OFFSET: usize = 0x20;
const FIFO_STATUS_OFFSET: usize = 0x24;
const OVRD_OFFSET: usize = 0x28;
const TIMEOUT_CTRL_OFFSET: usize = 0x30;

const UART_FIFO_CAPACITY: usize = 32;

#[bitfield]
#[derive(Clone, Copy)]
struct IntrState {
    tx_watermark: bool,
    rx_watermark: bool,
    tx_empty: bool,
    rx_overflow: bool,
    rx_frame_err: bool,
    rx_break_err: bool,
    rx_timeout: bool,
    rx_parity_err: bool,
    #[skip]
    __: B24,
}

#[repr(u32)]
#[derive(BitfieldSpecifier, Clone, Copy)]
enum RxBLvl {
    Break2 = 0,
    Break4 = 1,
    Break8 = 2,
    Break16 = 3,
}

#[bitfield]
#[derive(Clone, Copy)]
struct Ctrl {
    tx: bool,
    rx: bool,
    nf: bool,
    #[skip]
    __: B1,
    slpbk: bool,
    llpbk: bool,
    parity_en: bool,
    parity_odd: bool,
    #[bits = 2]
    rxblvl: RxBLvl,
    #[skip]
    __: B6,
    nco: B16,
}

#[bitfield]
#[derive(Clone, Copy)]
struct Status {
    txfull: bool,
    rxfull: bool,
    txempty: bool,
    txidle: bool,
    rxidle: bool,
    rxempty: bool,
    #[skip]
    __: B26,
}

#[repr(u32)]
#[derive(BitfieldSpecifier, Clone, Copy)]
enum RxILvl {
    Level1 = 0,
    Level4 = 1,
    Level8 = 2,
    Level16 = 3,
    Level30 = 4,
}

#[repr(u32)]
#[derive(BitfieldSpecifier, Clone, Copy)]
enum TxILvl {
    Level1 = 0,
    Level4 = 1,
    Level8 = 2,
    Level16 = 3,
}

#[bitfield]
#[derive(Clone, Copy)]
struct FifoCtrl {
    rxrst: bool,
    txrst: bool,
    #[bits = 3]
    rxilvl: RxILvl,
    #[bits = 2]
    txilvl: TxILvl,
    #[skip]
    __: B25,
}

#[bitfield]
#[derive(Clone, Copy)]
struct FifoStatus {
    txlvl: B6,
    #[skip]
    __: B10,
    rxlvl: B6,
    #[skip]
    __: B10,
}

// TX pin override control: forces the TX line to a fixed level regardless of
// the shifter's state, the same trick `dmx::hal::UartHal::invert_tx` uses to
// drive the DMX break on hardware with no dedicated break generator.
#[bitfield]
#[derive(Clone, Copy)]
struct Ovrd {
    txen: bool,
    txval: bool,
    #[skip]
    __: B30,
}

#[bitfield]
#[derive(Clone, Copy)]
struct TimeoutCtrl {
    val: B24,
    #[skip]
    __: B7,
    en: bool,
}

/// Reference clock feeding the UART's baud-rate generator. Platforms with a
/// different `clk_i` should fork [`ReferenceUart::with_ref_clock`] instead of
/// hardcoding this.
pub const DEFAULT_REF_CLOCK_HZ: u64 = 24_000_000;

/// A `UartHal` over a single OpenTitan-layout UART block.
///
/// Idle/break bit counts and pin routing have no register representation on
/// this IP (break generation happens in software via `invert_tx`, and pin
/// muxing lives in a separate crossbar block), so those are tracked in plain
/// fields rather than MMIO.
pub struct ReferenceUart {
    base: *mut u8,
    ref_clock_hz: u64,
    baud_rate: u32,
    break_bits: u8,
    idle_bits: u16,
    direction: LineDirection,
    pins: (u8, u8, u8),
}

// SAFETY: `ReferenceUart` owns exclusive access to the MMIO region its `base`
// points at; the driver never aliases it across tasks without going through
// `dmx`'s own locking.
unsafe impl Send for ReferenceUart {}

impl ReferenceUart {
    /// # Safety
    /// `base` must point to a live, memory-mapped OpenTitan `uart` block, and
    /// nothing else may access those registers for the lifetime of the
    /// returned value.
    pub unsafe fn new(base: *mut u8) -> Self { Self::with_ref_clock(base, DEFAULT_REF_CLOCK_HZ) }

    /// # Safety
    /// Same requirement as [`Self::new`].
    pub unsafe fn with_ref_clock(base: *mut u8, ref_clock_hz: u64) -> Self {
        Self { base, ref_clock_hz, baud_rate: 0, break_bits: 0, idle_bits: 0, direction: LineDirection::Receive, pins: (0, 0, 0) }
    }

    unsafe fn reg(&self, offset: usize) -> *const u32 { self.base.add(offset).cast::<u32>() }
    unsafe fn reg_mut(&mut self, offset: usize) -> *mut u32 { self.base.add(offset).cast::<u32>() }

    fn get_intr_state(&self) -> IntrState {
        unsafe { IntrState::from_bytes(self.reg(INTR_STATE_OFFSET).read_volatile().to_ne_bytes()) }
    }
    fn set_intr_state(&mut self, state: IntrState) {
        unsafe { self.reg_mut(INTR_STATE_OFFSET).write_volatile(u32::from_ne_bytes(state.into_bytes())) }
    }
    fn get_intr_enable(&self) -> IntrState {
        unsafe { IntrState::from_bytes(self.reg(INTR_ENABLE_OFFSET).read_volatile().to_ne_bytes()) }
    }
    fn set_intr_enable(&mut self, state: IntrState) {
        unsafe { self.reg_mut(INTR_ENABLE_OFFSET).write_volatile(u32::from_ne_bytes(state.into_bytes())) }
    }
    fn get_ctrl(&self) -> Ctrl {
        unsafe { Ctrl::from_bytes(self.reg(CTRL_OFFSET).read_volatile().to_ne_bytes()) }
    }
    fn set_ctrl(&mut self, ctrl: Ctrl) {
        unsafe { self.reg_mut(CTRL_OFFSET).write_volatile(u32::from_ne_bytes(ctrl.into_bytes())) }
    }
    fn get_status(&self) -> Status {
        unsafe { Status::from_bytes(self.reg(STATUS_OFFSET).read_volatile().to_ne_bytes()) }
    }
    fn get_rdata(&self) -> u8 {
        unsafe { RData::from_bytes(self.reg(RDATA_OFFSET).read_volatile().to_ne_bytes()).rdata() }
    }
    fn set_wdata(&mut self, byte: u8) {
        unsafe { self.reg_mut(WDATA_OFFSET).write_volatile(u32::from_ne_bytes(WData::new().with_wdata(byte).into_bytes())) }
    }
    fn get_fifo_ctrl(&self) -> FifoCtrl {
        unsafe { FifoCtrl::from_bytes(self.reg(FIFO_CTRL_OFFSET).read_volatile().to_ne_bytes()) }
    }
    fn set_fifo_ctrl(&mut self, ctrl: FifoCtrl) {
        unsafe { self.reg_mut(FIFO_CTRL_OFFSET).write_volatile(u32::from_ne_bytes(ctrl.into_bytes())) }
    }
    fn get_fifo_status(&self) -> FifoStatus {
        unsafe { FifoStatus::from_bytes(self.reg(FIFO_STATUS_OFFSET).read_volatile().to_ne_bytes()) }
    }
    fn set_ovrd(&mut self, ovrd: Ovrd) {
        unsafe { self.reg_mut(OVRD_OFFSET).write_volatile(u32::from_ne_bytes(ovrd.into_bytes())) }
    }
    fn set_timeout_ctrl(&mut self, ctrl: TimeoutCtrl) {
        unsafe { self.reg_mut(TIMEOUT_CTRL_OFFSET).write_volatile(u32::from_ne_bytes(ctrl.into_bytes())) }
    }
}

#[bitfield]
#[derive(Clone, Copy)]
struct RData {
    rdata: u8,
    #[skip]
    __: B24,
}
#[bitfield]
#[derive(Clone, Copy)]
struct WData {
    wdata: u8,
    #[skip]
    __: B24,
}

impl UartHal for ReferenceUart {
    fn enable_tx(&mut self) { self.set_ctrl(self.get_ctrl().with_tx(true)); }
    fn disable_tx(&mut self) { self.set_ctrl(self.get_ctrl().with_tx(false)); }
    fn enable_rx(&mut self) { self.set_ctrl(self.get_ctrl().with_rx(true)); }
    fn disable_rx(&mut self) { self.set_ctrl(self.get_ctrl().with_rx(false)); }

    fn reset_tx_fifo(&mut self) { self.set_fifo_ctrl(self.get_fifo_ctrl().with_txrst(true)); }
    fn reset_rx_fifo(&mut self) { self.set_fifo_ctrl(self.get_fifo_ctrl().with_rxrst(true)); }

    fn set_baud_rate(&mut self, baud: u32) {
        self.baud_rate = baud;
        // nco = 2^20 * baud / fclk (assuming NCO width is 16-bit)
        let nco: u64 = ((baud as u64) << 20) / self.ref_clock_hz;
        self.set_ctrl(self.get_ctrl().with_nco(nco as u16));
    }
    fn baud_rate(&self) -> u32 { self.baud_rate }

    fn invert_tx(&mut self, invert: bool) {
        // Drives the line low through the override path while `invert` is
        // set, letting a timer flip it back to generate break/MAB without a
        // dedicated break generator.
        self.set_ovrd(Ovrd::new().with_txen(invert).with_txval(!invert));
    }

    fn set_line_direction(&mut self, direction: LineDirection) { self.direction = direction; }
    fn set_pins(&mut self, tx: u8, rx: u8, rts: u8) { self.pins = (tx, rx, rts); }

    fn idle_bit_count(&self) -> u16 { self.idle_bits }
    fn break_bit_count(&self) -> u8 { self.break_bits }
    fn set_break_bit_count(&mut self, bits: u8) { self.break_bits = bits; }
    fn set_idle_bit_count(&mut self, bits: u16) { self.idle_bits = bits; }

    fn fill_tx_fifo(&mut self, data: &[u8]) -> usize {
        let mut n = 0;
        while n < data.len() && (self.get_fifo_status().txlvl() as usize) < UART_FIFO_CAPACITY {
            self.set_wdata(data[n]);
            n += 1;
        }
        n
    }
    fn tx_fifo_empty(&self) -> bool { self.get_status().txempty() }

    fn read_rx_fifo(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() && self.get_fifo_status().rxlvl() > 0 {
            buf[n] = self.get_rdata();
            n += 1;
        }
        n
    }
    fn rx_fifo_len(&self) -> usize { self.get_fifo_status().rxlvl() as usize }

    fn set_rx_timeout_threshold(&mut self, symbols: u8) {
        self.set_timeout_ctrl(TimeoutCtrl::new().with_val(symbols as u32).with_en(symbols != 0));
    }

    fn enable_interrupts(&mut self, mask: u16) {
        let want = bits_to_state(mask);
        let cur = self.get_intr_enable();
        self.set_intr_enable(or_state(cur, want));
    }
    fn disable_interrupts(&mut self, mask: u16) {
        let want = bits_to_state(mask);
        let cur = self.get_intr_enable();
        self.set_intr_enable(and_not_state(cur, want));
    }
    fn clear_interrupts(&mut self, mask: u16) {
        // INTR_STATE is write-1-to-clear.
        self.set_intr_state(bits_to_state(mask));
    }
    fn interrupt_status(&self) -> DmxIntrStatus {
        let s = self.get_intr_state();
        let mut bits = 0u16;
        if s.tx_watermark() { bits |= DmxIntrStatus::TXFIFO_EMPTY; }
        if s.tx_empty() { bits |= DmxIntrStatus::TX_DONE; }
        if s.rx_watermark() { bits |= DmxIntrStatus::RXFIFO_FULL; }
        if s.rx_timeout() { bits |= DmxIntrStatus::RXFIFO_TOUT; }
        if s.rx_break_err() { bits |= DmxIntrStatus::RX_BREAK_DET; }
        if s.rx_frame_err() { bits |= DmxIntrStatus::RX_FRAME_ERR; }
        if s.rx_parity_err() { bits |= DmxIntrStatus::RX_PARITY_ERR; }
        if s.rx_overflow() { bits |= DmxIntrStatus::RXFIFO_OVF; }
        DmxIntrStatus(bits)
    }
    fn enabled_interrupts(&self) -> u16 {
        let e = self.get_intr_enable();
        let mut bits = 0u16;
        if e.tx_watermark() { bits |= DmxIntrStatus::TXFIFO_EMPTY; }
        if e.tx_empty() { bits |= DmxIntrStatus::TX_DONE; }
        if e.rx_watermark() { bits |= DmxIntrStatus::RXFIFO_FULL; }
        if e.rx_timeout() { bits |= DmxIntrStatus::RXFIFO_TOUT; }
        if e.rx_break_err() { bits |= DmxIntrStatus::RX_BREAK_DET; }
        if e.rx_frame_err() { bits |= DmxIntrStatus::RX_FRAME_ERR; }
        if e.rx_parity_err() { bits |= DmxIntrStatus::RX_PARITY_ERR; }
        if e.rx_overflow() { bits |= DmxIntrStatus::RXFIFO_OVF; }
        bits
    }
}

/// Translates the generalized [`DmxIntrStatus`] bitmask into the matching
/// `IntrState` bits, so enable/disable/clear can all go through the same
/// mask without listing every flag twice.
fn bits_to_state(mask: u16) -> IntrState {
    IntrState::new()
        .with_tx_watermark(mask & DmxIntrStatus::TXFIFO_EMPTY != 0)
        .with_tx_empty(mask & DmxIntrStatus::TX_DONE != 0)
        .with_rx_watermark(mask & DmxIntrStatus::RXFIFO_FULL != 0)
        .with_rx_timeout(mask & DmxIntrStatus::RXFIFO_TOUT != 0)
        .with_rx_break_err(mask & DmxIntrStatus::RX_BREAK_DET != 0)
        .with_rx_frame_err(mask & DmxIntrStatus::RX_FRAME_ERR != 0)
        .with_rx_parity_err(mask & DmxIntrStatus::RX_PARITY_ERR != 0)
        .with_rx_overflow(mask & DmxIntrStatus::RXFIFO_OVF != 0)
}

fn or_state(a: IntrState, b: IntrState) -> IntrState {
    IntrState::new()
        .with_tx_watermark(a.tx_watermark() || b.tx_watermark())
        .with_rx_watermark(a.rx_watermark() || b.rx_watermark())
        .with_tx_empty(a.tx_empty() || b.tx_empty())
        .with_rx_overflow(a.rx_overflow() || b.rx_overflow())
        .with_rx_frame_err(a.rx_frame_err() || b.rx_frame_err())
        .with_rx_break_err(a.rx_break_err() || b.rx_break_err())
        .with_rx_timeout(a.rx_timeout() || b.rx_timeout())
        .with_rx_parity_err(a.rx_parity_err() || b.rx_parity_err())
}

fn and_not_state(a: IntrState, b: IntrState) -> IntrState {
    IntrState::new()
        .with_tx_watermark(a.tx_watermark() && !b.tx_watermark())
        .with_rx_watermark(a.rx_watermark() && !b.rx_watermark())
        .with_tx_empty(a.tx_empty() && !b.tx_empty())
        .with_rx_overflow(a.rx_overflow() && !b.rx_overflow())
        .with_rx_frame_err(a.rx_frame_err() && !b.rx_frame_err())
        .with_rx_break_err(a.rx_break_err() && !b.rx_break_err())
        .with_rx_timeout(a.rx_timeout() && !b.rx_timeout())
        .with_rx_parity_err(a.rx_parity_err() && !b.rx_parity_err())
}

// Control register, relative to the rv_timer block's base address.
const RV_TIMER_CTRL_OFFSET: usize = 0x00;
const RV_TIMER_CFG0_OFFSET: usize = 0x100;
const RV_TIMER_VALUE_LOWER0_OFFSET: usize = 0x104;
const RV_TIMER_COMPARE_LOWER0_OFFSET: usize = 0x10c;
const RV_TIMER_INTR_ENABLE0_OFFSET: usize = 0x114;
const RV_TIMER_INTR_STATE0_OFFSET: usize = 0x118;

#[bitfield]
#[derive(Clone, Copy)]
struct TimerCtrl {
    active: bool,
    #[skip]
    __: B31,
}

#[bitfield]
#[derive(Clone, Copy)]
struct TimerConfig {
    prescale: B12,
    #[skip]
    __: B4,
    step: u8,
    #[skip]
    __: B8,
}

/// A one-shot [`TimerHal`] over a single `rv_timer` hart counter, armed by
/// writing `now + ticks` into its compare register rather than reloading a
/// countdown, since the IP only exposes a free-running up-counter.
pub struct ReferenceTimer {
    base: *mut u8,
    ticks_per_us: u32,
}

unsafe impl Send for ReferenceTimer {}

impl ReferenceTimer {
    /// # Safety
    /// `base` must point to a live, memory-mapped `rv_timer` block, with
    /// `prescale`/`step` already configured so one tick equals one
    /// microsecond (`ticks_per_us` communicates that rate to
    /// [`TimerHal::arm_one_shot`]).
    pub unsafe fn new(base: *mut u8, ticks_per_us: u32) -> Self {
        let mut timer = Self { base, ticks_per_us };
        // step advances the counter by `ticks_per_us` every cycle, so the
        // deadline math in `arm_one_shot` can stay in whole microseconds.
        timer.set_config(TimerConfig::new().with_prescale(0).with_step(ticks_per_us.min(u8::MAX as u32) as u8));
        timer.set_ctrl(TimerCtrl::new().with_active(false));
        timer
    }

    unsafe fn reg(&self, offset: usize) -> *const u32 { self.base.add(offset).cast::<u32>() }
    unsafe fn reg_mut(&mut self, offset: usize) -> *mut u32 { self.base.add(offset).cast::<u32>() }

    fn set_ctrl(&mut self, ctrl: TimerCtrl) {
        unsafe { self.reg_mut(RV_TIMER_CTRL_OFFSET).write_volatile(u32::from_ne_bytes(ctrl.into_bytes())) }
    }
    fn set_config(&mut self, config: TimerConfig) {
        unsafe { self.reg_mut(RV_TIMER_CFG0_OFFSET).write_volatile(u32::from_ne_bytes(config.into_bytes())) }
    }
    fn value_low(&self) -> u32 { unsafe { self.reg(RV_TIMER_VALUE_LOWER0_OFFSET).read_volatile() } }
    fn set_compare_low(&mut self, value: u32) {
        unsafe { self.reg_mut(RV_TIMER_COMPARE_LOWER0_OFFSET).write_volatile(value) }
    }
    fn set_intr_enable(&mut self, enabled: bool) {
        let bits = if enabled { 1u32 } else { 0u32 };
        unsafe { self.reg_mut(RV_TIMER_INTR_ENABLE0_OFFSET).write_volatile(bits) }
    }
    fn clear_intr_state(&mut self) { unsafe { self.reg_mut(RV_TIMER_INTR_STATE0_OFFSET).write_volatile(1) } }
}

impl TimerHal for ReferenceTimer {
    fn arm_one_shot(&mut self, micros: u32) {
        let ticks = micros.saturating_mul(self.ticks_per_us);
        let deadline = self.value_low().wrapping_add(ticks);
        self.clear_intr_state();
        self.set_compare_low(deadline);
        self.set_intr_enable(true);
        self.set_ctrl(TimerCtrl::new().with_active(true));
    }

    fn cancel(&mut self) {
        self.set_intr_enable(false);
        self.set_ctrl(TimerCtrl::new().with_active(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Validates the modular_bitfield layouts against hand-computed bit
    // positions, the same check opentitan_timer.rs runs for rv_timer.
    fn bit(x: u32) -> u32 { 1 << x }

    #[test]
    fn intr_state_bits() {
        assert_eq!(u32::from_ne_bytes(IntrState::new().with_tx_watermark(true).into_bytes()), bit(0));
        assert_eq!(u32::from_ne_bytes(IntrState::new().with_rx_watermark(true).into_bytes()), bit(1));
        assert_eq!(u32::from_ne_bytes(IntrState::new().with_tx_empty(true).into_bytes()), bit(2));
        assert_eq!(u32::from_ne_bytes(IntrState::new().with_rx_break_err(true).into_bytes()), bit(5));
        assert_eq!(u32::from_ne_bytes(IntrState::new().with_rx_timeout(true).into_bytes()), bit(6));
    }

    #[test]
    fn ctrl_tx_rx_bits() {
        assert_eq!(u32::from_ne_bytes(Ctrl::new().with_tx(true).into_bytes()), bit(0));
        assert_eq!(u32::from_ne_bytes(Ctrl::new().with_rx(true).into_bytes()), bit(1));
    }

    #[test]
    fn ctrl_nco_occupies_high_halfword() {
        let ctrl = Ctrl::new().with_nco(0xbeef);
        assert_eq!(u32::from_ne_bytes(ctrl.into_bytes()) >> 16, 0xbeef);
    }

    #[test]
    fn fifo_ctrl_rxrst_txrst_bits() {
        assert_eq!(u32::from_ne_bytes(FifoCtrl::new().with_rxrst(true).into_bytes()), bit(0));
        assert_eq!(u32::from_ne_bytes(FifoCtrl::new().with_txrst(true).into_bytes()), bit(1));
    }

    #[test]
    fn ovrd_txen_txval_bits() {
        assert_eq!(u32::from_ne_bytes(Ovrd::new().with_txen(true).into_bytes()), bit(0));
        assert_eq!(u32::from_ne_bytes(Ovrd::new().with_txval(true).into_bytes()), bit(1));
    }

    #[test]
    fn timeout_ctrl_en_is_top_bit() {
        assert_eq!(u32::from_ne_bytes(TimeoutCtrl::new().with_en(true).into_bytes()), bit(31));
    }

    #[test]
    fn timer_ctrl_active_bit() {
        assert_eq!(u32::from_ne_bytes(TimerCtrl::new().with_active(true).into_bytes()), bit(0));
    }
}
