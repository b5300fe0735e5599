//! Simulated register file and diagnostic pin for hosted testing. Registers
//! are interior-mutability cells, so the block behaves like volatile hardware
//! behind the same `&self` access the real peripheral gets.

use core::cell::Cell;
use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::regs::{PinDirection, RegisterBlock, TimerPin};

/// In-memory Timer/Counter1 register file.
///
/// The counter advances by a signed stride on every read, so code that spins
/// for a visible tick terminates, and tests can drive the down-counting phase
/// of the up/down waveform modes with a negative stride.
pub struct SimRegs {
    ctrl_a: Cell<u8>,
    ctrl_b: Cell<u8>,
    int_mask: Cell<u8>,
    counter: Cell<u16>,
    icr: Cell<u16>,
    compare_a: Cell<u16>,
    compare_b: Cell<u16>,
    irq_enabled: Cell<bool>,
    stride: Cell<i16>,
    prescaler_resets: Cell<u32>,
    pin_dirs: [Cell<PinDirection>; 4],
}

impl SimRegs {
    pub fn new() -> Self {
        Self {
            ctrl_a: Cell::new(0),
            ctrl_b: Cell::new(0),
            int_mask: Cell::new(0),
            counter: Cell::new(0),
            icr: Cell::new(0),
            compare_a: Cell::new(0),
            compare_b: Cell::new(0),
            irq_enabled: Cell::new(true),
            stride: Cell::new(1),
            prescaler_resets: Cell::new(0),
            pin_dirs: [const { Cell::new(PinDirection::Input) }; 4],
        }
    }

    /// Set how far the counter moves per read. Zero freezes it.
    pub fn set_counter_stride(&self, stride: i16) {
        self.stride.set(stride);
    }

    /// Preload the counter without triggering the per-read stride.
    pub fn preload_counter(&self, val: u16) {
        self.counter.set(val);
    }

    /// Read the counter without advancing it.
    pub fn peek_counter(&self) -> u16 {
        self.counter.get()
    }

    /// How many times the shared prescaler was synchronously reset.
    pub fn prescaler_resets(&self) -> u32 {
        self.prescaler_resets.get()
    }

    /// The configured direction of one of the timer's pins.
    pub fn pin_direction(&self, pin: TimerPin) -> PinDirection {
        self.pin_dirs[pin_index(pin)].get()
    }
}

impl Default for SimRegs {
    fn default() -> Self {
        Self::new()
    }
}

fn pin_index(pin: TimerPin) -> usize {
    match pin {
        TimerPin::OutputA => 0,
        TimerPin::OutputB => 1,
        TimerPin::CaptureInput => 2,
        TimerPin::CountInput => 3,
    }
}

impl RegisterBlock for SimRegs {
    fn ctrl_a(&self) -> u8 {
        self.ctrl_a.get()
    }

    fn set_ctrl_a(&self, val: u8) {
        self.ctrl_a.set(val);
    }

    fn ctrl_b(&self) -> u8 {
        self.ctrl_b.get()
    }

    fn set_ctrl_b(&self, val: u8) {
        self.ctrl_b.set(val);
    }

    fn int_mask(&self) -> u8 {
        self.int_mask.get()
    }

    fn set_int_mask(&self, val: u8) {
        self.int_mask.set(val);
    }

    fn counter(&self) -> u16 {
        let val = self.counter.get();
        self.counter
            .set(val.wrapping_add_signed(self.stride.get()));
        val
    }

    fn set_counter(&self, val: u16) {
        self.counter.set(val);
    }

    fn icr(&self) -> u16 {
        self.icr.get()
    }

    fn set_icr(&self, val: u16) {
        self.icr.set(val);
    }

    fn compare_a(&self) -> u16 {
        self.compare_a.get()
    }

    fn set_compare_a(&self, val: u16) {
        self.compare_a.set(val);
    }

    fn compare_b(&self) -> u16 {
        self.compare_b.get()
    }

    fn set_compare_b(&self, val: u16) {
        self.compare_b.set(val);
    }

    fn reset_prescaler(&self) {
        self.prescaler_resets.set(self.prescaler_resets.get() + 1);
    }

    fn set_pin_direction(&self, pin: TimerPin, dir: PinDirection) {
        self.pin_dirs[pin_index(pin)].set(dir);
    }

    fn irq_enabled(&self) -> bool {
        self.irq_enabled.get()
    }

    fn set_irq_enabled(&self, enabled: bool) {
        self.irq_enabled.set(enabled);
    }
}

/// Simulated diagnostic output pin; records the last level written.
pub struct SimPin {
    pub high: bool,
}

impl SimPin {
    pub fn new() -> Self {
        Self { high: false }
    }
}

impl Default for SimPin {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.high = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::CriticalSection;

    #[test]
    fn test_counter_stride() {
        let regs = SimRegs::new();
        regs.preload_counter(100);
        assert_eq!(regs.counter(), 100);
        assert_eq!(regs.counter(), 101);

        regs.set_counter_stride(-10);
        regs.preload_counter(50);
        assert_eq!(regs.counter(), 50);
        assert_eq!(regs.counter(), 40);
    }

    #[test]
    fn test_critical_section_restores_prior_state() {
        let regs = SimRegs::new();
        {
            let _cs = CriticalSection::enter(&regs);
            assert!(!regs.irq_enabled());
        }
        assert!(regs.irq_enabled());

        regs.set_irq_enabled(false);
        {
            let _cs = CriticalSection::enter(&regs);
            assert!(!regs.irq_enabled());
        }
        // Entered with interrupts off; must stay off.
        assert!(!regs.irq_enabled());
    }
}
