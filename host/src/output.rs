//! Time-based PWM outputs for generic PWM consumers.
//!
//! Consumers request an output, then describe it by period and duty cycle in
//! nanoseconds. Dividers are re-derived so the period fits the 256-step
//! counter.
use heapless::Vec;

use crate::{
    divider::{self, Divider, NSEC_PER_SEC},
    fmt::debug,
    regs::{self, pwm_duty, RegisterPort},
    Error, Result, MAX_CHANNELS,
};

/// Generic PWM chip interface, one output per channel.
pub trait PwmChipOps {
    type Error;

    /// Returns the number of outputs.
    fn npwm(&self) -> usize;

    fn request(&mut self, hwpwm: u8) -> core::result::Result<(), Self::Error>;

    fn free(&mut self, hwpwm: u8) -> core::result::Result<(), Self::Error>;

    fn enable(&mut self, hwpwm: u8) -> core::result::Result<(), Self::Error>;

    fn disable(&mut self, hwpwm: u8) -> core::result::Result<(), Self::Error>;

    /// Sets the output's period and duty cycle, in nanoseconds.
    fn config(
        &mut self,
        hwpwm: u8,
        period_ns: u32,
        duty_ns: u32,
    ) -> core::result::Result<(), Self::Error>;
}

/// Last period and duty cycle programmed on a requested output.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmOutputChannel {
    pub period_ns: u32,
    pub duty_ns: u32,
}

/// Tracks requested outputs and programs them by period and duty cycle.
#[derive(Debug)]
pub struct GenericPwmAdapter {
    tick_ns: u32,
    outputs: Vec<Option<PwmOutputChannel>, MAX_CHANNELS>,
}

impl GenericPwmAdapter {
    /// Creates an adapter for `count` outputs clocked at one tick per
    /// `tick_ns`.
    ///
    /// `count` is clamped to [`MAX_CHANNELS`].
    #[must_use]
    pub fn new(tick_ns: u32, count: usize) -> Self {
        let mut outputs = Vec::new();
        for _ in 0..count.min(MAX_CHANNELS) {
            let _ = outputs.push(None);
        }
        Self { tick_ns, outputs }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    #[must_use]
    pub fn tick_ns(&self) -> u32 {
        self.tick_ns
    }

    /// Returns a requested output's cached state.
    #[must_use]
    pub fn output(&self, channel: u8) -> Option<&PwmOutputChannel> {
        self.outputs.get(usize::from(channel))?.as_ref()
    }

    #[must_use]
    pub fn is_requested(&self, channel: u8) -> bool {
        self.output(channel).is_some()
    }

    /// Allocates a zeroed output.
    pub fn request<E>(&mut self, channel: u8) -> Result<(), E> {
        let slot = self
            .outputs
            .get_mut(usize::from(channel))
            .ok_or(Error::<E>::InvalidChannel(channel))?;
        *slot = Some(PwmOutputChannel::default());
        debug!("pwm{}: requested", channel);
        Ok(())
    }

    /// Releases an output. Freeing an output that was never requested does
    /// nothing.
    pub fn free<E>(&mut self, channel: u8) -> Result<(), E> {
        let slot = self
            .outputs
            .get_mut(usize::from(channel))
            .ok_or(Error::<E>::InvalidChannel(channel))?;
        *slot = None;
        debug!("pwm{}: freed", channel);
        Ok(())
    }

    /// Returns a requested output's cached state for editing.
    pub(crate) fn slot<E>(&mut self, channel: u8) -> Result<&mut PwmOutputChannel, E> {
        self.outputs
            .get_mut(usize::from(channel))
            .ok_or(Error::<E>::InvalidChannel(channel))?
            .as_mut()
            .ok_or(Error::ChannelNotRequested(channel))
    }

    /// Programs an output's period and duty cycle.
    ///
    /// The duty cycle is written as the falling point with a rising point of
    /// zero. Only the period, duty and divider fields change; the enable bits
    /// are left alone. Repeating the cached period and duty does nothing.
    pub fn configure<P: RegisterPort>(
        &mut self,
        port: &mut P,
        channel: u8,
        period_ns: u32,
        duty_ns: u32,
    ) -> Result<(), P::Error> {
        let tick_ns = self.tick_ns;
        let output = self.slot::<P::Error>(channel)?;

        if period_ns > NSEC_PER_SEC {
            return Err(Error::PeriodTooLong(period_ns));
        }
        if duty_ns > period_ns {
            return Err(Error::DutyExceedsPeriod { duty_ns, period_ns });
        }
        let next = PwmOutputChannel { period_ns, duty_ns };
        if *output == next {
            return Ok(());
        }

        let solution = divider::solve_period(tick_ns, period_ns)
            .ok_or(Error::<P::Error>::PeriodUnrepresentable(period_ns))?;
        let duty_ticks = u8::try_from(duty_ns / solution.tick_ns)
            .map_err(|_| Error::<P::Error>::DutyExceedsPeriod { duty_ns, period_ns })?;
        debug!(
            "pwm{}: period {}ns = {} ticks of {}ns, duty {} ticks",
            channel, period_ns, solution.period_ticks, solution.tick_ns, duty_ticks
        );

        let mut duty = regs::with_field(0, pwm_duty::PERIOD, u32::from(solution.period_ticks));
        duty = regs::with_field(duty, pwm_duty::FALLING, u32::from(duty_ticks));
        port.update_bits(
            regs::pwm_duty(channel),
            regs::mask(pwm_duty::PERIOD) | regs::mask(pwm_duty::FALLING) | regs::mask(pwm_duty::RISING),
            duty,
        )?;
        port.update_bits(
            regs::pwm_ctrl(channel),
            Divider::ctrl_mask(),
            solution.divider.ctrl_bits(),
        )?;

        *output = next;
        Ok(())
    }
}
