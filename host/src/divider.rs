//! Two-stage PWM clock divider search.
//!
//! The PWM clock is divided by an exponential stage `2^h` (`h` in `0..=15`)
//! followed by a linear stage `l + 1` (`l` in `0..=255`). Both searches scan
//! the pairs in the same order, `l` outermost and `h` innermost, and adopt the
//! first pair that satisfies their objective.
use crate::regs::{self, pwm_ctrl};

/// Largest period counter value. The counter has 256 steps.
pub const PERIOD_MAX: u8 = 255;
/// Number of counter steps in one PWM period.
pub const PERIOD_STEPS: u32 = PERIOD_MAX as u32 + 1;
/// Largest exponential divider exponent.
pub const DIV_H_MAX: u8 = 15;
/// Largest linear divider value.
pub const DIV_L_MAX: u8 = 255;
/// Longest period accepted by the period search.
pub const NSEC_PER_SEC: u32 = 1_000_000_000;

/// A pair of clock divider fields.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Divider {
    /// Exponential stage, divides by `2^h`.
    pub h: u8,
    /// Linear stage, divides by `l + 1`.
    pub l: u8,
}

impl Divider {
    /// Returns the combined division factor, `2^h * (l + 1)`.
    #[must_use]
    pub const fn factor(self) -> u32 {
        (1 << self.h) * (self.l as u32 + 1)
    }

    /// Returns the divider fields as they sit in the PWM control register.
    #[must_use]
    pub fn ctrl_bits(self) -> u32 {
        let value = regs::with_field(0, pwm_ctrl::DIV_H, u32::from(self.h));
        regs::with_field(value, pwm_ctrl::DIV_L, u32::from(self.l))
    }

    /// Returns the combined mask of both divider fields.
    #[must_use]
    pub fn ctrl_mask() -> u32 {
        regs::mask(pwm_ctrl::DIV_H) | regs::mask(pwm_ctrl::DIV_L)
    }

    /// Iterates over every divider pair in search order.
    fn candidates() -> impl Iterator<Item = Self> {
        (0..=DIV_L_MAX).flat_map(|l| (0..=DIV_H_MAX).map(move |h| Self { h, l }))
    }
}

/// Result of a [`solve_frequency`] search.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrequencySolution {
    pub divider: Divider,
    /// Achieved PWM output frequency.
    pub freq_hz: u32,
}

/// Finds the first divider pair whose output frequency drops below
/// `target_hz`.
///
/// The output frequency is `clock_hz / 256 / (2^h * (l + 1))`, so the result
/// never exceeds the target. Returns `None` if no pair gets below the target.
#[must_use]
pub fn solve_frequency(clock_hz: u32, target_hz: u32) -> Option<FrequencySolution> {
    let base_hz = clock_hz / PERIOD_STEPS;
    Divider::candidates()
        .map(|divider| FrequencySolution {
            divider,
            freq_hz: base_hz / divider.factor(),
        })
        .find(|solution| solution.freq_hz < target_hz)
}

/// Result of a [`solve_period`] search.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeriodSolution {
    pub divider: Divider,
    /// Duration of one counter step after division.
    pub tick_ns: u32,
    /// Counter value that ends the requested period.
    pub period_ticks: u8,
}

/// Finds the first divider pair whose counter covers `period_ns` within
/// [`PERIOD_MAX`] steps of `tick_ns * 2^h * (l + 1)` each.
///
/// Returns `None` if the period is longer than one second, if `tick_ns` is
/// zero, or if no pair covers the period.
#[must_use]
pub fn solve_period(tick_ns: u32, period_ns: u32) -> Option<PeriodSolution> {
    if period_ns > NSEC_PER_SEC || tick_ns == 0 {
        return None;
    }

    let (divider, tick_ns) = Divider::candidates()
        .map(|divider| (divider, u64::from(tick_ns) * u64::from(divider.factor())))
        .find(|&(_, tick)| tick * u64::from(PERIOD_MAX) >= u64::from(period_ns))?;

    let period_ticks = u8::try_from(u64::from(period_ns) / tick_ns).ok()?;
    Some(PeriodSolution {
        divider,
        tick_ns: u32::try_from(tick_ns).ok()?,
        period_ticks,
    })
}
