//! Provides support for the 16-bit Timer/Counter1 peripheral. Includes
//! periodic-interrupt generation, PWM output on the two output-compare
//! channels, input pulse-width capture, and external event counting.
//!
//! The peripheral's interrupt vectors are owned by the application; wire the
//! overflow and capture vectors to [`Timer1::on_overflow`] and
//! [`Timer1::on_capture`].

use core::convert::Infallible;

use embedded_hal::digital::OutputPin;
use embedded_hal::pwm::{ErrorType as PwmErrorType, SetDutyCycle};

use crate::regs::{CriticalSection, NoPin, PinDirection, RegisterBlock, TimerPin, bits};

/// Counter resolution: the top value must stay below this in the up/down
/// phase/frequency-correct mode.
const RESOLUTION: u32 = 65_536;

/// Iteration bound for the tick-visibility spins. The slowest internal clock
/// is ÷1024, so a tick arrives within ~1024 CPU cycles; each probe costs
/// several cycles, leaving ample margin.
const TICK_SPIN_LIMIT: u32 = 2_048;

/// Full-scale PWM duty: duty fractions are 10-bit.
pub const DUTY_MAX: u16 = 1023;

/// Internal clock prescaler selection (CS12:CS10 values).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Prescaler {
    Div1 = 0b001,
    Div8 = 0b010,
    Div64 = 0b011,
    Div256 = 0b100,
    Div1024 = 0b101,
}

impl Prescaler {
    /// Finest to coarsest; the order the period resolver walks.
    const ASCENDING: [Self; 5] = [
        Self::Div1,
        Self::Div8,
        Self::Div64,
        Self::Div256,
        Self::Div1024,
    ];

    /// Clock-select bits, for control register B.
    pub fn cs_bits(self) -> u8 {
        self as u8
    }

    /// log2 of the division ratio; tick counts convert to CPU cycles by this
    /// left shift.
    pub fn shift(self) -> u8 {
        match self {
            Self::Div1 => 0,
            Self::Div8 => 3,
            Self::Div64 => 6,
            Self::Div256 => 8,
            Self::Div1024 => 10,
        }
    }
}

/// Signal edge, for the external clock source and captured transitions.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Edge {
    Falling,
    Rising,
}

/// What clocks the counter: an internally prescaled CPU clock, or edges on
/// the external count input.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    Internal(Prescaler),
    External(Edge),
}

impl ClockSource {
    /// Clock-select bits, for control register B. External clocking uses the
    /// 0b110 (falling) and 0b111 (rising) encodings.
    pub fn cs_bits(self) -> u8 {
        match self {
            Self::Internal(prescaler) => prescaler.cs_bits(),
            Self::External(Edge::Falling) => 0b110,
            Self::External(Edge::Rising) => 0b111,
        }
    }

    /// Scale shift for time conversion. Raw event counts are never converted
    /// to time, so the external source scales by zero.
    pub fn shift(self) -> u8 {
        match self {
            Self::Internal(prescaler) => prescaler.shift(),
            Self::External(_) => 0,
        }
    }
}

/// PWM-capable output-compare channel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputChannel {
    /// OC1A.
    A,
    /// OC1B.
    B,
}

impl OutputChannel {
    /// Look up a channel from the board's digital pin number ({1, 5} map to
    /// OC1A, {2, 4} to OC1B). Unknown pins yield `None`; callers treat that
    /// as a no-op, since pin selection has no failure signal.
    pub fn from_pin(pin: u8) -> Option<Self> {
        match pin {
            1 | 5 => Some(Self::A),
            2 | 4 => Some(Self::B),
            _ => None,
        }
    }
}

/// Which captured semi-period to read.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CapturePhase {
    /// The high semi-period (latched at the falling edge).
    High,
    /// The low semi-period (latched at the rising edge).
    Low,
    /// Sum of both: the full input period.
    Total,
}

/// The timer's operating role. Entering a role fully resets the mode
/// registers and derived state; roles never layer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Idle,
    PeriodicInterrupt,
    Pwm,
    InputCapture,
    EventCounter,
}

/// Represents the Timer/Counter1 peripheral.
///
/// `R` is the register file (real hardware, or [`crate::sim::SimRegs`] in
/// hosted tests). `P` is an optional diagnostic output pin mirrored on
/// captured edges.
pub struct Timer1<R: RegisterBlock, P: OutputPin = NoPin> {
    clock_speed: u32, // CPU clock in Hz.
    regs: R,
    clock: ClockSource,
    period: u32, // Counter top value; set together with `clock`.
    overflows: u32,
    high_ticks: u32,
    low_ticks: u32,
    callback: Option<fn()>,
    edge_pin: Option<P>,
    mode: Mode,
}

impl<R: RegisterBlock> Timer1<R> {
    /// Take ownership of the register file. `clock_speed` is the CPU clock
    /// in Hz. Nothing is written to the hardware until a mode is entered.
    pub fn new(regs: R, clock_speed: u32) -> Self {
        Self {
            clock_speed,
            regs,
            clock: ClockSource::Internal(Prescaler::Div1),
            period: 0,
            overflows: 0,
            high_ticks: 0,
            low_ticks: 0,
            callback: None,
            edge_pin: None,
            mode: Mode::Idle,
        }
    }
}

impl<R: RegisterBlock, P: OutputPin> Timer1<R, P> {
    /// Attach a diagnostic output pin, driven high on captured rising edges
    /// and low on captured falling edges.
    pub fn with_edge_indicator<P2: OutputPin>(self, pin: P2) -> Timer1<R, P2> {
        Timer1 {
            clock_speed: self.clock_speed,
            regs: self.regs,
            clock: self.clock,
            period: self.period,
            overflows: self.overflows,
            high_ticks: self.high_ticks,
            low_ticks: self.low_ticks,
            callback: self.callback,
            edge_pin: Some(pin),
            mode: self.mode,
        }
    }

    /// Configure phase/frequency-correct mode with the given period and the
    /// clock running.
    pub fn init(&mut self, period_us: u32) {
        self.regs.set_ctrl_a(0);
        // Waveform mode 8: phase/frequency-correct PWM, top in ICR1. Clock
        // select stays clear until `set_period` writes it.
        self.regs.set_ctrl_b(bits::WGM13);
        self.set_period(period_us);
        self.mode = Mode::PeriodicInterrupt;
    }

    /// Set the timer period, in microseconds. Selects the finest prescaler
    /// that fits and writes the corresponding top value; out-of-range
    /// requests saturate to the longest representable period. Also starts
    /// the clock.
    pub fn set_period(&mut self, period_us: u32) {
        let (prescaler, top) = resolve_period(period_us, self.clock_speed);
        self.clock = ClockSource::Internal(prescaler);
        self.period = top;

        {
            // 16-bit write; must not be split by an interrupt.
            let _cs = CriticalSection::enter(&self.regs);
            self.regs.set_icr(top as u16);
        }

        // Replace the clock-select field without disturbing the mode bits.
        // Writing a non-zero selection starts the clock.
        self.regs
            .modify_ctrl_b(|b| (b & !bits::CS_MASK) | prescaler.cs_bits());
    }

    /// Generate PWM on one output channel. `duty` is a 10-bit fraction of the
    /// period (see [`DUTY_MAX`]); values above full scale clamp. Without a
    /// period argument, the previously configured period is reused.
    pub fn pwm(&mut self, channel: OutputChannel, duty: u16, period_us: Option<u32>) {
        self.regs.set_ctrl_a(0);
        self.regs.set_ctrl_b(0);

        if let Some(us) = period_us {
            self.set_period(us);
        }
        self.set_pwm_duty(channel, duty);

        // Waveform mode 14: fast PWM with ICR1 as top.
        self.regs.set_ctrl_a(bits::WGM11);
        self.regs.modify_ctrl_b(|b| b | bits::WGM13 | bits::WGM12);

        match channel {
            OutputChannel::A => {
                self.regs
                    .set_pin_direction(TimerPin::OutputA, PinDirection::Output);
                self.regs.modify_ctrl_a(|a| a | bits::COM1A1);
            }
            OutputChannel::B => {
                self.regs
                    .set_pin_direction(TimerPin::OutputB, PinDirection::Output);
                self.regs.modify_ctrl_a(|a| a | bits::COM1B1);
            }
        }

        // Resume without resetting the count: the other channel may be in the
        // middle of a cycle.
        self.resume();
        self.mode = Mode::Pwm;
    }

    /// Update one channel's duty cycle from the configured period. Needs to
    /// be re-run if the period changes.
    pub fn set_pwm_duty(&mut self, channel: OutputChannel, duty: u16) {
        let duty = duty.min(DUTY_MAX);
        let compare = (u64::from(self.period) * u64::from(duty)) >> 10;

        let _cs = CriticalSection::enter(&self.regs);
        match channel {
            OutputChannel::A => self.regs.set_compare_a(compare as u16),
            OutputChannel::B => self.regs.set_compare_b(compare as u16),
        }
    }

    /// Stop PWM on one channel. Clears only that channel's compare-output
    /// bit; the timer keeps running.
    pub fn disable_pwm(&mut self, channel: OutputChannel) {
        let com = match channel {
            OutputChannel::A => bits::COM1A1,
            OutputChannel::B => bits::COM1B1,
        };
        self.regs.modify_ctrl_a(|a| a & !com);
    }

    /// A handle to one channel implementing `embedded_hal::pwm::SetDutyCycle`.
    pub fn pwm_pin(&mut self, channel: OutputChannel) -> PwmPin<'_, R, P> {
        PwmPin {
            timer: self,
            channel,
        }
    }

    /// Register `callback` to run on every counter overflow and enable the
    /// overflow interrupt source. The global interrupt flag is deliberately
    /// left alone: the caller may be inside an interrupt handler.
    pub fn attach_interrupt(&mut self, callback: fn(), period_us: Option<u32>) {
        if let Some(us) = period_us {
            self.set_period(us);
        }
        self.callback = Some(callback);
        self.regs.set_int_mask(bits::TOIE1);
        self.resume();
    }

    /// Disable the overflow interrupt source. The clock keeps running and
    /// the registered callback stays in place for a later re-attach.
    pub fn detach_interrupt(&mut self) {
        self.regs.modify_int_mask(|m| m & !bits::TOIE1);
    }

    /// Resume clocking with the configured source.
    pub fn resume(&mut self) {
        let cs_bits = self.clock.cs_bits();
        self.regs.modify_ctrl_b(|b| b | cs_bits);
    }

    /// Stop the clock. Configuration and the counter value are preserved.
    pub fn stop(&mut self) {
        self.regs.modify_ctrl_b(|b| b & !bits::CS_MASK);
    }

    /// Synchronously reset the counter to zero, then wait for the first
    /// visible tick before returning: returning while the counter still
    /// reads zero risks a phantom overflow interrupt. Masks the overflow
    /// interrupt for the duration; re-enabling is the caller's choice.
    pub fn start(&mut self) {
        self.regs.modify_int_mask(|m| m & !bits::TOIE1);
        // The prescaler is shared with the other 16-bit timers.
        self.regs.reset_prescaler();

        {
            let _cs = CriticalSection::enter(&self.regs);
            self.regs.set_counter(0);
        }
        // Counter is at a known zero.
        self.overflows = 0;

        for _ in 0..TICK_SPIN_LIMIT {
            let cnt = {
                let _cs = CriticalSection::enter(&self.regs);
                self.regs.counter()
            };
            if cnt != 0 {
                break;
            }
        }
    }

    /// The elapsed time indicated by the free-running counter, in
    /// microseconds, aware of the up/down counting of phase/frequency-correct
    /// mode.
    pub fn read_micros(&mut self) -> u32 {
        let first = {
            let _cs = CriticalSection::enter(&self.regs);
            self.regs.counter()
        };

        // Spin until the counter visibly moves; a second sample equal to the
        // first may be the same instant re-read. Bounded by one tick period.
        let mut second = first;
        for _ in 0..TICK_SPIN_LIMIT {
            second = {
                let _cs = CriticalSection::enter(&self.regs);
                self.regs.counter()
            };
            if second != first {
                break;
            }
        }

        let top = u32::from({
            let _cs = CriticalSection::enter(&self.regs);
            self.regs.icr()
        });

        // Still counting up: the first sample is the elapsed distance. Past
        // top and counting down: the distance is (top - current) + top.
        let ticks = if second > first {
            u32::from(first)
        } else {
            top.saturating_sub(u32::from(second)) + top
        };

        self.ticks_to_micros(ticks)
    }

    /// Enter input-capture mode: normal (non-waveform) counting, capture pin
    /// as input, armed for a rising edge first. `approx_period_us` picks a
    /// prescaler roughly matching the expected input period; without it a
    /// default of ÷256 is used. The overflow interrupt is enabled as well,
    /// both to extend capture timestamps past 16 bits and as the only
    /// symptom of a missing input signal.
    pub fn start_capture(&mut self, approx_period_us: Option<u32>) {
        self.regs.set_ctrl_a(0);
        self.regs.set_ctrl_b(0);

        self.regs
            .set_pin_direction(TimerPin::CaptureInput, PinDirection::Input);

        self.clock = ClockSource::Internal(Prescaler::Div256);
        self.period = 0;
        self.regs.set_ctrl_b(Prescaler::Div256.cs_bits());

        if let Some(us) = approx_period_us {
            // Normal mode sweeps the full counter range; the resolver's
            // half-period convention is undone by doubling.
            self.set_period(us << 1);
        }

        self.regs.modify_ctrl_b(|b| b | bits::ICES1);

        self.high_ticks = 0;
        self.low_ticks = 0;
        self.overflows = 0;

        self.regs.set_int_mask(bits::ICIE1 | bits::TOIE1);
        self.resume();
        self.mode = Mode::InputCapture;
    }

    /// Leave capture mode: disable the capture and overflow interrupt
    /// sources and stop the clock. Latched values remain readable.
    pub fn stop_capture(&mut self) {
        self.regs
            .modify_int_mask(|m| m & !(bits::ICIE1 | bits::TOIE1));
        self.stop();
    }

    /// The most recently captured semi-period (or full period), in
    /// microseconds.
    pub fn captured_micros(&self, phase: CapturePhase) -> u32 {
        let ticks = match phase {
            CapturePhase::High => self.high_ticks,
            CapturePhase::Low => self.low_ticks,
            CapturePhase::Total => self.high_ticks.wrapping_add(self.low_ticks),
        };
        self.ticks_to_micros(ticks)
    }

    /// Enter event-counter mode: the counter advances on `edge` transitions
    /// of the external count input. Only the overflow interrupt is enabled,
    /// to extend the count past 16 bits.
    pub fn start_counter(&mut self, edge: Edge) {
        self.regs.set_ctrl_a(0);
        self.regs.set_ctrl_b(0);

        self.regs
            .set_pin_direction(TimerPin::CountInput, PinDirection::Input);

        self.clock = ClockSource::External(edge);
        self.overflows = 0;
        {
            let _cs = CriticalSection::enter(&self.regs);
            self.regs.set_counter(0);
        }

        self.regs.set_int_mask(bits::TOIE1);
        self.resume();
        self.mode = Mode::EventCounter;
    }

    /// The accumulated event count, extended by the overflow count. With
    /// `reset`, the counter and overflow count are zeroed atomically with
    /// the read.
    pub fn read_count(&mut self, reset: bool) -> u32 {
        let _cs = CriticalSection::enter(&self.regs);
        let ticks = u32::from(self.regs.counter()).wrapping_add(self.overflows << 16);
        if reset {
            self.regs.set_counter(0);
            self.overflows = 0;
        }
        ticks
    }

    /// Counter overflow event handler. Call from the overflow interrupt
    /// vector (TIMER1_OVF).
    pub fn on_overflow(&mut self) {
        self.overflows = self.overflows.wrapping_add(1);
        if let Some(callback) = self.callback {
            callback();
        }
    }

    /// Input-capture event handler. Call from the capture interrupt vector
    /// (TIMER1_CAPT). Latches the overflow-extended counter value for the
    /// edge that fired, mirrors the edge on the diagnostic pin, and re-arms
    /// for the opposite edge.
    pub fn on_capture(&mut self) {
        self.regs.set_counter(0);

        let latched = u32::from(self.regs.icr()).wrapping_add(self.overflows << 16);
        let ctrl_b = self.regs.ctrl_b();

        if ctrl_b & bits::ICES1 != 0 {
            // Rising edge: the low semi-period just ended.
            self.low_ticks = latched;
            if let Some(pin) = self.edge_pin.as_mut() {
                pin.set_high().ok();
            }
        } else {
            self.high_ticks = latched;
            if let Some(pin) = self.edge_pin.as_mut() {
                pin.set_low().ok();
            }
        }

        self.overflows = 0;
        // Fire on the opposite edge next time.
        self.regs.set_ctrl_b(ctrl_b ^ bits::ICES1);
    }

    /// The active operating role.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The configured counter clock source.
    pub fn clock_source(&self) -> ClockSource {
        self.clock
    }

    /// The configured top value, in prescaled ticks.
    pub fn period_ticks(&self) -> u32 {
        self.period
    }

    /// The configured full period in microseconds: one up sweep plus one
    /// down sweep of the top value.
    pub fn period_micros(&self) -> u32 {
        2 * self.ticks_to_micros(self.period)
    }

    /// Overflows observed since the counter was last known zero.
    pub fn overflow_count(&self) -> u32 {
        self.overflows
    }

    /// The attached diagnostic edge pin, if any.
    pub fn edge_indicator(&self) -> Option<&P> {
        self.edge_pin.as_ref()
    }

    /// Borrow the register file, e.g. for inspection in tests.
    pub fn regs(&self) -> &R {
        &self.regs
    }

    /// Release the register file.
    pub fn release(self) -> R {
        self.regs
    }

    fn ticks_to_micros(&self, ticks: u32) -> u32 {
        let micros = u64::from(ticks) * 1_000 / (u64::from(self.clock_speed) / 1_000);
        (micros << self.clock.shift()) as u32
    }
}

/// Convert a requested period to a prescaler selection and counter top value.
///
/// `cycles` is halved relative to the raw CPU-cycle count because the
/// up/down counting of phase/frequency-correct mode doubles the effective
/// period. The finest prescaler whose tick count fits the resolution wins;
/// an unsatisfiable request saturates to the coarsest prescaler at full
/// scale rather than failing.
fn resolve_period(period_us: u32, clock_speed: u32) -> (Prescaler, u32) {
    let cycles = u64::from(clock_speed / 2_000_000) * u64::from(period_us);

    for prescaler in Prescaler::ASCENDING {
        let ticks = cycles >> prescaler.shift();
        if ticks < u64::from(RESOLUTION) {
            return (prescaler, ticks as u32);
        }
    }

    #[cfg(feature = "defmt")]
    defmt::warn!(
        "period {=u32} us exceeds the timer range; clamping to maximum",
        period_us
    );
    (Prescaler::Div1024, RESOLUTION - 1)
}

/// One PWM channel of a [`Timer1`], for use through
/// `embedded_hal::pwm::SetDutyCycle`.
pub struct PwmPin<'a, R: RegisterBlock, P: OutputPin> {
    timer: &'a mut Timer1<R, P>,
    channel: OutputChannel,
}

impl<R: RegisterBlock, P: OutputPin> PwmErrorType for PwmPin<'_, R, P> {
    type Error = Infallible;
}

impl<R: RegisterBlock, P: OutputPin> SetDutyCycle for PwmPin<'_, R, P> {
    fn max_duty_cycle(&self) -> u16 {
        DUTY_MAX
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.timer.set_pwm_duty(self.channel, duty);
        Ok(())
    }
}
