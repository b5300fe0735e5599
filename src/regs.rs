//! The register-file seam for Timer/Counter1. The physical peripheral is an
//! externally given set of memory-mapped registers, addressed by name; this
//! module expresses that register file as the `RegisterBlock` trait so the
//! driver can run against real hardware or against `crate::sim` in hosted
//! tests.

use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, OutputPin};

/// Register bit positions, named as in the ATmega328P datasheet, section 16.11.
pub mod bits {
    /// Control register A: waveform generation mode, bit 1.
    pub const WGM11: u8 = 1 << 1;
    /// Control register A: compare output mode for channel B.
    pub const COM1B1: u8 = 1 << 5;
    /// Control register A: compare output mode for channel A.
    pub const COM1A1: u8 = 1 << 7;

    /// Control register B: clock select field (CS12:CS10).
    pub const CS_MASK: u8 = 0b111;
    /// Control register B: waveform generation mode, bit 2.
    pub const WGM12: u8 = 1 << 3;
    /// Control register B: waveform generation mode, bit 3.
    pub const WGM13: u8 = 1 << 4;
    /// Control register B: input capture edge select. Set = rising.
    pub const ICES1: u8 = 1 << 6;

    /// Interrupt mask register: overflow interrupt enable.
    pub const TOIE1: u8 = 1 << 0;
    /// Interrupt mask register: input capture interrupt enable.
    pub const ICIE1: u8 = 1 << 5;
}

/// Pins owned by the timer peripheral. Direction configuration for these is
/// part of mode entry; everything else about GPIO stays outside this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerPin {
    /// Output-compare channel A pin (OC1A).
    OutputA,
    /// Output-compare channel B pin (OC1B).
    OutputB,
    /// Input capture pin (ICP1).
    CaptureInput,
    /// External clock input pin (T1).
    CountInput,
}

/// Pin direction, as written to the data direction register.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinDirection {
    Input,
    Output,
}

/// The Timer/Counter1 register file.
///
/// Methods take `&self`: implementations model volatile memory-mapped
/// registers (or interior-mutability cells in simulation), not ordinary Rust
/// state. The driver still owns the block exclusively through `Timer1`.
///
/// The 16-bit registers (`counter`, `icr`, the compare registers) are accessed
/// in two bus cycles on the real hardware; callers are responsible for
/// wrapping those accesses in a [`CriticalSection`].
pub trait RegisterBlock {
    /// Control register A (TCCR1A): waveform mode low bits, compare output modes.
    fn ctrl_a(&self) -> u8;
    fn set_ctrl_a(&self, val: u8);

    /// Control register B (TCCR1B): waveform mode high bits, edge select, clock select.
    fn ctrl_b(&self) -> u8;
    fn set_ctrl_b(&self, val: u8);

    /// Interrupt mask register (TIMSK1).
    fn int_mask(&self) -> u8;
    fn set_int_mask(&self, val: u8);

    /// The free-running counter (TCNT1).
    fn counter(&self) -> u16;
    fn set_counter(&self, val: u16);

    /// ICR1: the top value in waveform modes, the capture latch in normal mode.
    fn icr(&self) -> u16;
    fn set_icr(&self, val: u16);

    /// Output-compare register for channel A (OCR1A).
    fn compare_a(&self) -> u16;
    fn set_compare_a(&self, val: u16);

    /// Output-compare register for channel B (OCR1B).
    fn compare_b(&self) -> u16;
    fn set_compare_b(&self, val: u16);

    /// Synchronously reset the shared prescaler (GTCCR PSRSYNC). Note this
    /// prescaler is shared with the other 16-bit timers on the part.
    fn reset_prescaler(&self);

    /// Configure the data-direction register for one of the timer's pins.
    fn set_pin_direction(&self, pin: TimerPin, dir: PinDirection);

    /// The global interrupt enable flag (the SREG I-bit on AVR).
    fn irq_enabled(&self) -> bool;
    fn set_irq_enabled(&self, enabled: bool);

    /// Read-modify-write control register A.
    fn modify_ctrl_a(&self, f: impl FnOnce(u8) -> u8) {
        self.set_ctrl_a(f(self.ctrl_a()));
    }

    /// Read-modify-write control register B.
    fn modify_ctrl_b(&self, f: impl FnOnce(u8) -> u8) {
        self.set_ctrl_b(f(self.ctrl_b()));
    }

    /// Read-modify-write the interrupt mask register.
    fn modify_int_mask(&self, f: impl FnOnce(u8) -> u8) {
        self.set_int_mask(f(self.int_mask()));
    }
}

/// Scoped critical section over the register file's interrupt-enable flag.
///
/// Captures the prior enable state on entry and restores it on drop, rather
/// than unconditionally re-enabling: the calling context may itself be an
/// interrupt handler running with interrupts already off.
pub struct CriticalSection<'a, R: RegisterBlock> {
    regs: &'a R,
    was_enabled: bool,
}

impl<'a, R: RegisterBlock> CriticalSection<'a, R> {
    /// Suspend interrupt delivery for the lifetime of the returned guard.
    pub fn enter(regs: &'a R) -> Self {
        let was_enabled = regs.irq_enabled();
        regs.set_irq_enabled(false);
        Self { regs, was_enabled }
    }
}

impl<R: RegisterBlock> Drop for CriticalSection<'_, R> {
    fn drop(&mut self) {
        self.regs.set_irq_enabled(self.was_enabled);
    }
}

/// Placeholder for the diagnostic edge pin when none is attached.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
