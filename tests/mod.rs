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

//! Validates `dmx-hal-reference`'s MMIO register layouts against
//! hand-computed bit positions, the way
//! `examples/.../TimerService/opentitan-timer` validates `rv_timer`'s.
//!
//! `ReferenceUart`/`ReferenceTimer` keep their bitfield structs private, so
//! these drive the registers through the public `UartHal`/`TimerHal` trait
//! surface over a plain byte buffer standing in for MMIO, then read the raw
//! bytes back to check bit placement directly.

#[cfg(test)]
mod tests {
    use dmx::hal::{IntrStatus, TimerHal, UartHal};
    use dmx_hal_reference::{ReferenceTimer, ReferenceUart, DEFAULT_REF_CLOCK_HZ};

    const UART_REGION_SIZE: usize = 0x34;
    const TIMER_REGION_SIZE: usize = 0x120;

    const CTRL: usize = 0x10;
    const STATUS: usize = 0x14;
    const WDATA: usize = 0x1c;
    const OVRD: usize = 0x28;
    const TIMEOUT_CTRL: usize = 0x30;
    const INTR_STATE: usize = 0x00;
    const INTR_ENABLE: usize = 0x04;

    const TIMER_CTRL: usize = 0x00;
    const TIMER_CFG0: usize = 0x100;
    const TIMER_COMPARE_LOW: usize = 0x10c;
    const TIMER_INTR_ENABLE: usize = 0x114;

    fn word_at(region: &[u8], offset: usize) -> u32 {
        u32::from_ne_bytes(region[offset..offset + 4].try_into().unwrap())
    }

    fn new_uart(region: &mut [u8]) -> ReferenceUart { unsafe { ReferenceUart::new(region.as_mut_ptr()) } }
    fn new_timer(region: &mut [u8], ticks_per_us: u32) -> ReferenceTimer {
        unsafe { ReferenceTimer::new(region.as_mut_ptr(), ticks_per_us) }
    }

    #[test]
    fn enable_tx_sets_ctrl_bit_0() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        uart.enable_tx();
        assert_eq!(word_at(&region, CTRL) & 0b1, 1);
    }

    #[test]
    fn enable_rx_sets_ctrl_bit_1() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        uart.enable_rx();
        assert_eq!((word_at(&region, CTRL) >> 1) & 0b1, 1);
    }

    #[test]
    fn disable_tx_clears_ctrl_bit_0_without_disturbing_rx() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        uart.enable_tx();
        uart.enable_rx();
        uart.disable_tx();
        let ctrl = word_at(&region, CTRL);
        assert_eq!(ctrl & 0b1, 0);
        assert_eq!((ctrl >> 1) & 0b1, 1);
    }

    #[test]
    fn set_baud_rate_writes_nco_into_high_halfword() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        uart.set_baud_rate(115_200);
        let nco = word_at(&region, CTRL) >> 16;
        let expected = ((115_200u64 << 20) / DEFAULT_REF_CLOCK_HZ) as u32;
        assert_eq!(nco, expected);
        assert_eq!(uart.baud_rate(), 115_200);
    }

    #[test]
    fn fill_tx_fifo_writes_wdata_register() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        let n = uart.fill_tx_fifo(&[0x42]);
        assert_eq!(n, 1);
        assert_eq!(word_at(&region, WDATA) & 0xff, 0x42);
    }

    #[test]
    fn tx_fifo_empty_reads_status_bit_2() {
        let mut region = [0u8; UART_REGION_SIZE];
        let uart = new_uart(&mut region);
        assert!(!uart.tx_fifo_empty());
        region[STATUS] |= 0b0000_0100;
        assert!(uart.tx_fifo_empty());
    }

    #[test]
    fn invert_tx_enables_override_and_drives_line_low() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        uart.invert_tx(true);
        let ovrd = word_at(&region, OVRD);
        assert_eq!(ovrd & 0b1, 1);
        assert_eq!((ovrd >> 1) & 0b1, 0);

        uart.invert_tx(false);
        assert_eq!(word_at(&region, OVRD) & 0b1, 0);
    }

    #[test]
    fn set_rx_timeout_threshold_sets_value_and_enable_bit() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        uart.set_rx_timeout_threshold(200);
        let reg = word_at(&region, TIMEOUT_CTRL);
        assert_eq!(reg & 0x00ff_ffff, 200);
        assert_eq!(reg >> 31, 1);
    }

    #[test]
    fn enable_interrupts_sets_matching_intr_enable_bits() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        uart.enable_interrupts(IntrStatus::TX_DONE | IntrStatus::RXFIFO_FULL);
        let reg = word_at(&region, INTR_ENABLE);
        assert_eq!(reg & (1 << 1), 1 << 1); // rx_watermark
        assert_eq!(reg & (1 << 2), 1 << 2); // tx_empty
    }

    #[test]
    fn disable_interrupts_clears_only_the_given_bits() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        uart.enable_interrupts(IntrStatus::TX_DONE | IntrStatus::RXFIFO_FULL);
        uart.disable_interrupts(IntrStatus::TX_DONE);
        let reg = word_at(&region, INTR_ENABLE);
        assert_eq!(reg & (1 << 2), 0);
        assert_eq!(reg & (1 << 1), 1 << 1);
    }

    #[test]
    fn clear_interrupts_writes_w1c_pattern() {
        let mut region = [0u8; UART_REGION_SIZE];
        let mut uart = new_uart(&mut region);
        uart.clear_interrupts(IntrStatus::RX_BREAK_DET);
        assert_eq!(word_at(&region, INTR_STATE), 1 << 5);
    }

    #[test]
    fn interrupt_status_maps_hardware_bits_back_to_dmx_flags() {
        let mut region = [0u8; UART_REGION_SIZE];
        region[INTR_STATE] = 0b0010_0100; // rx_break_err | tx_empty
        let uart = new_uart(&mut region);
        let status = uart.interrupt_status();
        assert!(status.any(IntrStatus::TX_DONE));
        assert!(status.any(IntrStatus::RX_BREAK_DET));
        assert!(!status.any(IntrStatus::RXFIFO_FULL));
    }

    #[test]
    fn timer_ctor_configures_step_and_starts_inactive() {
        let mut region = [0u8; TIMER_REGION_SIZE];
        let _timer = new_timer(&mut region, 1);
        assert_eq!(word_at(&region, TIMER_CFG0) >> 16 & 0xff, 1);
        assert_eq!(word_at(&region, TIMER_CTRL), 0);
    }

    #[test]
    fn arm_one_shot_sets_compare_and_activates() {
        let mut region = [0u8; TIMER_REGION_SIZE];
        let mut timer = new_timer(&mut region, 1);
        timer.arm_one_shot(100);
        assert_eq!(word_at(&region, TIMER_COMPARE_LOW), 100);
        assert_eq!(word_at(&region, TIMER_INTR_ENABLE), 1);
        assert_eq!(word_at(&region, TIMER_CTRL) & 1, 1);
    }

    #[test]
    fn cancel_disables_ctrl_and_intr_enable() {
        let mut region = [0u8; TIMER_REGION_SIZE];
        let mut timer = new_timer(&mut region, 1);
        timer.arm_one_shot(50);
        timer.cancel();
        assert_eq!(word_at(&region, TIMER_CTRL), 0);
        assert_eq!(word_at(&region, TIMER_INTR_ENABLE), 0);
    }
}
