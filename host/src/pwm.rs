//! PWM channel configuration and programming.
use heapless::Vec;

use crate::{
    divider::{self, Divider, PERIOD_MAX},
    fmt::debug,
    regs::{self, pwm_ctrl, pwm_duty, RegisterPort},
    units::{hertz, Frequency},
    Error, Result, MAX_CHANNELS,
};

/// Default PWM output frequency, as specified by Intel "4-Wire Pulse Width
/// Modulation (PWM) Controlled Fans".
pub const DEFAULT_TARGET_FREQ_HZ: u32 = 25_000;
/// Default falling point, a 100% duty cycle.
pub const DEFAULT_FALLING_POINT: u8 = PERIOD_MAX;
/// Default watchdog rising/falling point.
pub const DEFAULT_WATCHDOG_POINT: u8 = 0x10;

/// Selects whether, and on which edge, the duty cycle is loaded as a
/// watchdog value.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WatchdogLoad {
    #[default]
    Disabled,
    OnRising,
    OnFalling,
}

/// Represents the configuration of one PWM channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmChannelConfig {
    /// Desired output frequency.
    pub target_freq_hz: u32,
    /// Output frequency achieved by the last divider search.
    pub actual_freq_hz: u32,
    /// Divider fields written by the last frequency change.
    pub divider: Divider,
    /// Counter value at which the output is asserted.
    pub rising_point: u8,
    /// Counter value at which the output is deasserted. Zero turns the
    /// channel off.
    pub falling_point: u8,
    pub invert: bool,
    pub open_drain: bool,
    pub duty_sync: bool,
    /// Whether the clock and pin enable bits are set.
    pub pin_enabled: bool,
    pub watchdog_load: WatchdogLoad,
    pub watchdog_point: u8,
}

impl Default for PwmChannelConfig {
    fn default() -> Self {
        Self {
            target_freq_hz: DEFAULT_TARGET_FREQ_HZ,
            actual_freq_hz: 0,
            divider: Divider::default(),
            rising_point: 0,
            falling_point: DEFAULT_FALLING_POINT,
            invert: false,
            open_drain: false,
            duty_sync: true,
            pin_enabled: false,
            watchdog_load: WatchdogLoad::Disabled,
            watchdog_point: DEFAULT_WATCHDOG_POINT,
        }
    }
}

impl PwmChannelConfig {
    /// Returns the achieved output frequency.
    #[must_use]
    pub fn actual_frequency(&self) -> Frequency {
        Frequency::new::<hertz>(self.actual_freq_hz)
    }

    /// Builds the PWM control register value, without the enable bits.
    fn ctrl_value(&self) -> u32 {
        let mut value = self.divider.ctrl_bits();
        value = regs::with_bit(value, pwm_ctrl::INVERSE, self.invert);
        value = regs::with_bit(value, pwm_ctrl::OPEN_DRAIN_EN, self.open_drain);
        value = regs::with_bit(value, pwm_ctrl::DUTY_SYNC_DIS, !self.duty_sync);
        match self.watchdog_load {
            WatchdogLoad::Disabled => value,
            WatchdogLoad::OnRising => regs::with_bit(value, pwm_ctrl::DUTY_LOAD_AS_WDT_EN, true),
            WatchdogLoad::OnFalling => {
                value = regs::with_bit(value, pwm_ctrl::DUTY_LOAD_AS_WDT_EN, true);
                regs::with_bit(value, pwm_ctrl::LOAD_AS_WDT, true)
            }
        }
    }

    /// Builds the PWM duty cycle register value.
    fn duty_value(&self) -> u32 {
        let mut value = regs::with_field(0, pwm_duty::PERIOD, u32::from(PERIOD_MAX));
        value = regs::with_field(value, pwm_duty::RISING, u32::from(self.rising_point));
        value = regs::with_field(value, pwm_duty::FALLING, u32::from(self.falling_point));
        if self.watchdog_load != WatchdogLoad::Disabled {
            value = regs::with_field(value, pwm_duty::WDT_POINT, u32::from(self.watchdog_point));
        }
        value
    }
}

/// Drives the PWM half of every channel.
#[derive(Debug)]
pub struct PwmChannelController {
    clock_hz: u32,
    channels: Vec<PwmChannelConfig, MAX_CHANNELS>,
}

impl PwmChannelController {
    /// Creates a controller for `count` channels with default configuration.
    ///
    /// `count` is clamped to [`MAX_CHANNELS`].
    #[must_use]
    pub fn new(clock_hz: u32, count: usize) -> Self {
        let mut channels = Vec::new();
        for _ in 0..count.min(MAX_CHANNELS) {
            let _ = channels.push(PwmChannelConfig::default());
        }
        Self { clock_hz, channels }
    }

    /// Returns the number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Returns a channel's configuration.
    #[must_use]
    pub fn config(&self, channel: u8) -> Option<&PwmChannelConfig> {
        self.channels.get(usize::from(channel))
    }

    /// Returns a channel's configuration for editing. Changes reach the
    /// hardware on the next [`program`](Self::program).
    pub fn config_mut(&mut self, channel: u8) -> Option<&mut PwmChannelConfig> {
        self.channels.get_mut(usize::from(channel))
    }

    /// Returns whether a channel's clock and pin are enabled.
    #[must_use]
    pub fn is_enabled(&self, channel: u8) -> bool {
        self.config(channel).is_some_and(|config| config.pin_enabled)
    }

    fn slot<E>(&mut self, channel: u8) -> Result<&mut PwmChannelConfig, E> {
        self.channels
            .get_mut(usize::from(channel))
            .ok_or(Error::InvalidChannel(channel))
    }

    /// Sets or clears the clock enable and pin enable bits together.
    pub fn enable<P: RegisterPort>(
        &mut self,
        port: &mut P,
        channel: u8,
        enable: bool,
    ) -> Result<(), P::Error> {
        self.slot::<P::Error>(channel)?;
        let bits = regs::with_bit(
            regs::with_bit(0, pwm_ctrl::CLK_ENABLE, true),
            pwm_ctrl::PIN_EN,
            true,
        );
        port.update_bits(regs::pwm_ctrl(channel), bits, if enable { bits } else { 0 })?;
        self.slot::<P::Error>(channel)?.pin_enabled = enable;
        debug!("pwm{}: enabled = {}", channel, enable);
        Ok(())
    }

    /// Sets a channel's falling point.
    ///
    /// Zero turns the channel off; a nonzero level turns an off channel back
    /// on. Otherwise only the falling point field is rewritten. Writing the
    /// current level does nothing.
    pub fn set_duty_level<P: RegisterPort>(
        &mut self,
        port: &mut P,
        channel: u8,
        level: u32,
    ) -> Result<(), P::Error> {
        let level = u8::try_from(level).map_err(|_| Error::<P::Error>::InvalidDuty(level))?;
        let previous = self.slot::<P::Error>(channel)?.falling_point;
        if previous == level {
            return Ok(());
        }

        if level == 0 {
            self.enable(port, channel, false)?;
        } else {
            port.update_bits(
                regs::pwm_duty(channel),
                regs::mask(pwm_duty::FALLING),
                regs::with_field(0, pwm_duty::FALLING, u32::from(level)),
            )?;
        }
        self.slot::<P::Error>(channel)?.falling_point = level;
        debug!("pwm{}: falling point {} -> {}", channel, previous, level);

        if previous == 0 {
            self.enable(port, channel, true)?;
        }
        Ok(())
    }

    /// Sets a channel's target frequency and reprograms it.
    pub fn configure_frequency<P: RegisterPort>(
        &mut self,
        port: &mut P,
        channel: u8,
        target_freq_hz: u32,
    ) -> Result<(), P::Error> {
        let mut next = *self.slot::<P::Error>(channel)?;
        next.target_freq_hz = target_freq_hz;
        self.apply(port, channel, next)
    }

    /// Sets a channel's falling point and reprograms it.
    ///
    /// Level 0 only clears the enable pair; the dividers and the duty
    /// register are left as they are.
    pub fn program_level<P: RegisterPort>(
        &mut self,
        port: &mut P,
        channel: u8,
        level: u8,
    ) -> Result<(), P::Error> {
        if level == 0 {
            self.enable(port, channel, false)?;
            self.slot::<P::Error>(channel)?.falling_point = 0;
            return Ok(());
        }
        let mut next = *self.slot::<P::Error>(channel)?;
        next.falling_point = level;
        self.apply(port, channel, next)
    }

    /// Reprograms a channel from its current configuration.
    pub fn program<P: RegisterPort>(&mut self, port: &mut P, channel: u8) -> Result<(), P::Error> {
        let next = *self.slot::<P::Error>(channel)?;
        self.apply(port, channel, next)
    }

    /// Solves the dividers for the target frequency, writes the duty cycle
    /// and control registers, and enables the channel unless its falling
    /// point is zero. Nothing is written if the dividers cannot reach the
    /// target.
    fn apply<P: RegisterPort>(
        &mut self,
        port: &mut P,
        channel: u8,
        mut next: PwmChannelConfig,
    ) -> Result<(), P::Error> {
        let solution = divider::solve_frequency(self.clock_hz, next.target_freq_hz)
            .ok_or(Error::<P::Error>::FrequencyUnreachable(next.target_freq_hz))?;
        debug!(
            "pwm{}: target {}Hz, achieved {}Hz with h={} l={}",
            channel,
            next.target_freq_hz,
            solution.freq_hz,
            solution.divider.h,
            solution.divider.l,
        );

        next.divider = solution.divider;
        next.actual_freq_hz = solution.freq_hz;
        port.write(regs::pwm_duty(channel), next.duty_value())?;
        port.write(regs::pwm_ctrl(channel), next.ctrl_value())?;
        *self.slot::<P::Error>(channel)? = next;

        self.enable(port, channel, next.falling_point != 0)
    }
}
