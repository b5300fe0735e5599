//! Hardware abstraction layer for the AVR 16-bit Timer/Counter1 peripheral,
//! as found on the ATmega328P and ATmega644P. Supports periodic interrupts,
//! PWM on the two output-compare channels, input pulse-width capture, and
//! external event counting.
//!
//! The register file sits behind the [`regs::RegisterBlock`] trait, so the
//! driver runs unchanged against the real peripheral or against the
//! simulated block in [`sim`] for hosted tests.

#![no_std]

pub mod regs;
pub mod sim;
pub mod timer;

pub use timer::{CapturePhase, ClockSource, DUTY_MAX, Edge, Mode, OutputChannel, Prescaler, Timer1};
