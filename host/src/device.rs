//! The PWM/tacho device and the interfaces it exposes.
use core::fmt::{Debug, Write};

use bitvec::{order::Lsb0, BitArr};
use heapless::{String, Vec};

use crate::{
    config::FanConfig,
    cooling::{CoolingDevice, CoolingDeviceOps},
    divider::NSEC_PER_SEC,
    fmt::{debug, info},
    output::{GenericPwmAdapter, PwmChipOps},
    pwm::{PwmChannelController, WatchdogLoad},
    regs::RegisterPort,
    tach::TachoChannelController,
    units::{hertz, AngularVelocity, Frequency},
    Error, Result, MAX_CHANNELS,
};

/// Node name cooling devices are named after.
pub const COOLING_NODE_NAME: &str = "fan";

type ChannelMask = BitArr!(for MAX_CHANNELS, in u16, Lsb0);

/// Text read from or written to a monitoring attribute.
pub type Attribute = String<12>;

/// A PWM/tacho controller with up to [`MAX_CHANNELS`] channel pairs.
///
/// Owns the register window and all per-channel state. Channels are hidden
/// from the monitoring interface until a fan is attached to them.
#[derive(Debug)]
pub struct PwmTacho<P> {
    port: P,
    clock_hz: u32,
    pwm: PwmChannelController,
    tach: TachoChannelController,
    outputs: GenericPwmAdapter,
    cooling: Vec<Option<CoolingDevice>, MAX_CHANNELS>,
    pwm_present: ChannelMask,
    fan_present: ChannelMask,
}

impl<P: RegisterPort> PwmTacho<P> {
    /// Creates a device with `channels` channel pairs clocked at `clock`.
    ///
    /// Nothing is written to the hardware until a channel is configured.
    pub fn new(port: P, clock: Frequency, channels: u8) -> Result<Self, P::Error> {
        let clock_hz = clock.get::<hertz>();
        if clock_hz == 0 {
            return Err(Error::ZeroClock);
        }
        let tick_ns = NSEC_PER_SEC / clock_hz;
        if tick_ns == 0 {
            return Err(Error::ClockTooFast(clock_hz));
        }
        if channels == 0 || usize::from(channels) > MAX_CHANNELS {
            return Err(Error::InvalidChannelCount(channels));
        }

        let count = usize::from(channels);
        let mut cooling = Vec::new();
        for _ in 0..count {
            let _ = cooling.push(None);
        }
        debug!("{}Hz clock, {}ns ticks, {} channels", clock_hz, tick_ns, channels);

        Ok(Self {
            port,
            clock_hz,
            pwm: PwmChannelController::new(clock_hz, count),
            tach: TachoChannelController::new(clock_hz, count),
            outputs: GenericPwmAdapter::new(tick_ns, count),
            cooling,
            pwm_present: ChannelMask::ZERO,
            fan_present: ChannelMask::ZERO,
        })
    }

    /// Creates a device whose channel 0 loads its duty cycle as a watchdog
    /// value on the rising edge, as the hardware does out of reset.
    pub fn with_factory_defaults(port: P, clock: Frequency, channels: u8) -> Result<Self, P::Error> {
        let mut device = Self::new(port, clock, channels)?;
        if let Some(config) = device.pwm.config_mut(0) {
            config.watchdog_load = WatchdogLoad::OnRising;
        }
        Ok(device)
    }

    /// Returns the register window, consuming the device.
    pub fn release(self) -> P {
        self.port
    }

    #[must_use]
    pub fn clock(&self) -> Frequency {
        Frequency::new::<hertz>(self.clock_hz)
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        self.pwm.len()
    }

    #[must_use]
    pub fn pwm(&self) -> &PwmChannelController {
        &self.pwm
    }

    /// Returns the PWM controller for editing channel configuration. Edits
    /// reach the hardware on the next reprogram.
    pub fn pwm_mut(&mut self) -> &mut PwmChannelController {
        &mut self.pwm
    }

    #[must_use]
    pub fn tach(&self) -> &TachoChannelController {
        &self.tach
    }

    pub fn tach_mut(&mut self) -> &mut TachoChannelController {
        &mut self.tach
    }

    #[must_use]
    pub fn outputs(&self) -> &GenericPwmAdapter {
        &self.outputs
    }

    fn check_channel<E>(&self, channel: u8) -> Result<(), E> {
        if usize::from(channel) < self.channels() {
            Ok(())
        } else {
            Err(Error::InvalidChannel(channel))
        }
    }

    /// Attaches a fan: programs its PWM channel, registers its cooling
    /// device and enables its tach channels.
    ///
    /// Nothing is written unless every check on the description passes.
    pub fn attach_fan(&mut self, fan: &FanConfig) -> Result<(), P::Error> {
        let pwm_channel = fan.pwm_channel;
        self.check_channel::<P::Error>(pwm_channel)?;
        for &channel in &fan.tach_channels {
            self.check_channel::<P::Error>(channel)?;
        }
        fan.check().map_err(Error::<P::Error>::Config)?;
        for &channel in &fan.tach_channels {
            self.tach.check_enable::<P::Error>(channel, fan.min_rpm)?;
        }

        self.pwm.configure_frequency(&mut self.port, pwm_channel, fan.target_freq_hz)?;
        self.pwm_present.set(usize::from(pwm_channel), true);

        if let Some(levels) = &fan.cooling_levels {
            let cdev = CoolingDevice::new(COOLING_NODE_NAME, pwm_channel, levels.clone());
            info!("pwm{}: cooling device {}", pwm_channel, cdev.name());
            if let Some(slot) = self.cooling.get_mut(usize::from(pwm_channel)) {
                *slot = Some(cdev);
            }
        }

        for &channel in &fan.tach_channels {
            if let Some(config) = self.tach.config_mut(channel) {
                config.min_rpm = fan.min_rpm;
            }
            self.tach.enable(&mut self.port, channel, true)?;
            self.fan_present.set(usize::from(channel), true);
        }

        info!(
            "pwm{}: fan attached, {} tach channels",
            pwm_channel,
            fan.tach_channels.len()
        );
        Ok(())
    }

    /// Sets a PWM channel's falling point, `0..=255`.
    pub fn set_duty_level(&mut self, channel: u8, level: u32) -> Result<(), P::Error> {
        self.pwm.set_duty_level(&mut self.port, channel, level)
    }

    /// Sets a PWM channel's target frequency and reprograms it.
    pub fn configure_frequency(&mut self, channel: u8, target: Frequency) -> Result<(), P::Error> {
        self.pwm
            .configure_frequency(&mut self.port, channel, target.get::<hertz>())
    }

    pub fn enable_pwm(&mut self, channel: u8, enable: bool) -> Result<(), P::Error> {
        self.pwm.enable(&mut self.port, channel, enable)
    }

    pub fn enable_tach(&mut self, channel: u8, enable: bool) -> Result<(), P::Error> {
        self.tach.enable(&mut self.port, channel, enable)
    }

    pub fn read_rpm(&mut self, channel: u8) -> Result<u32, P::Error> {
        self.tach.read_rpm(&mut self.port, channel)
    }

    pub fn read_speed(&mut self, channel: u8) -> Result<AngularVelocity, P::Error> {
        self.tach.read_speed(&mut self.port, channel)
    }

    #[must_use]
    pub fn is_pwm_visible(&self, channel: u8) -> bool {
        usize::from(channel) < self.channels()
            && self.pwm_present.get(usize::from(channel)).is_some_and(|bit| *bit)
    }

    #[must_use]
    pub fn is_fan_visible(&self, channel: u8) -> bool {
        usize::from(channel) < self.channels()
            && self.fan_present.get(usize::from(channel)).is_some_and(|bit| *bit)
    }

    fn present_pwm<E>(&self, channel: u8) -> Result<(), E> {
        self.check_channel::<E>(channel)?;
        if self.is_pwm_visible(channel) {
            Ok(())
        } else {
            Err(Error::ChannelNotPresent(channel))
        }
    }

    fn present_fan<E>(&self, channel: u8) -> Result<(), E> {
        self.check_channel::<E>(channel)?;
        if self.is_fan_visible(channel) {
            Ok(())
        } else {
            Err(Error::ChannelNotPresent(channel))
        }
    }

    /// Formats a present PWM channel's falling point.
    pub fn pwm_show(&self, channel: u8) -> Result<Attribute, P::Error> {
        self.present_pwm::<P::Error>(channel)?;
        let level = self.pwm.config(channel).map_or(0, |config| config.falling_point);
        Ok(attribute(level))
    }

    /// Parses a decimal falling point and applies it to a present PWM channel.
    pub fn pwm_store(&mut self, channel: u8, buf: &str) -> Result<(), P::Error> {
        self.present_pwm::<P::Error>(channel)?;
        let level = buf
            .trim()
            .parse::<u32>()
            .map_err(|_| Error::<P::Error>::ParseDuty)?;
        self.pwm.set_duty_level(&mut self.port, channel, level)
    }

    /// Formats a present tach channel's speed in RPM.
    pub fn fan_input_show(&mut self, channel: u8) -> Result<Attribute, P::Error> {
        self.present_fan::<P::Error>(channel)?;
        let rpm = self.tach.read_rpm(&mut self.port, channel)?;
        Ok(attribute(rpm))
    }

    /// Returns the cooling device bound to a PWM channel.
    #[must_use]
    pub fn cooling(&self, channel: u8) -> Option<&CoolingDevice> {
        self.cooling.get(usize::from(channel))?.as_ref()
    }

    /// Moves a PWM channel's cooling device to `state`.
    pub fn set_cooling_state(&mut self, channel: u8, state: usize) -> Result<(), P::Error> {
        let cdev = self
            .cooling
            .get_mut(usize::from(channel))
            .and_then(Option::as_mut)
            .ok_or(Error::<P::Error>::NoCoolingDevice(channel))?;
        cdev.set_state(&mut self.pwm, &mut self.port, state)
    }

    /// Returns a handle a thermal governor can drive a channel's cooling
    /// device through.
    pub fn cooling_device(&mut self, channel: u8) -> Result<Cooling<'_, P>, P::Error> {
        if self.cooling(channel).is_none() {
            return Err(Error::NoCoolingDevice(channel));
        }
        Ok(Cooling {
            device: self,
            channel,
        })
    }

    /// Returns an [`embedded_hal::pwm::SetDutyCycle`] handle for a present
    /// PWM channel.
    pub fn fan_pwm(&mut self, channel: u8) -> Result<FanPwm<'_, P>, P::Error> {
        self.present_pwm::<P::Error>(channel)?;
        Ok(FanPwm {
            device: self,
            channel,
        })
    }
}

fn attribute(value: impl core::fmt::Display) -> Attribute {
    let mut text = String::new();
    // A u32 and a newline always fit.
    let _ = writeln!(text, "{value}");
    text
}

impl<P: RegisterPort> PwmChipOps for PwmTacho<P> {
    type Error = Error<P::Error>;

    fn npwm(&self) -> usize {
        self.outputs.len()
    }

    fn request(&mut self, hwpwm: u8) -> Result<(), P::Error> {
        self.outputs.request(hwpwm)
    }

    fn free(&mut self, hwpwm: u8) -> Result<(), P::Error> {
        self.outputs.free(hwpwm)
    }

    fn enable(&mut self, hwpwm: u8) -> Result<(), P::Error> {
        self.outputs.slot::<P::Error>(hwpwm)?;
        self.pwm.enable(&mut self.port, hwpwm, true)
    }

    fn disable(&mut self, hwpwm: u8) -> Result<(), P::Error> {
        self.outputs.slot::<P::Error>(hwpwm)?;
        self.pwm.enable(&mut self.port, hwpwm, false)
    }

    fn config(&mut self, hwpwm: u8, period_ns: u32, duty_ns: u32) -> Result<(), P::Error> {
        self.outputs
            .configure(&mut self.port, hwpwm, period_ns, duty_ns)
    }
}

/// A channel's cooling device, borrowed from its [`PwmTacho`].
#[derive(Debug)]
pub struct Cooling<'a, P> {
    device: &'a mut PwmTacho<P>,
    channel: u8,
}

impl<P: RegisterPort> Cooling<'_, P> {
    #[must_use]
    pub fn name(&self) -> &str {
        self.device.cooling(self.channel).map_or("", CoolingDevice::name)
    }
}

impl<P: RegisterPort> CoolingDeviceOps for Cooling<'_, P> {
    type Error = Error<P::Error>;

    fn get_max_state(&self) -> usize {
        self.device
            .cooling(self.channel)
            .map_or(0, CoolingDevice::max_state)
    }

    fn get_cur_state(&self) -> usize {
        self.device
            .cooling(self.channel)
            .map_or(0, CoolingDevice::cur_state)
    }

    fn set_cur_state(&mut self, state: usize) -> Result<(), P::Error> {
        self.device.set_cooling_state(self.channel, state)
    }
}

/// A fan's PWM channel, borrowed from its [`PwmTacho`]. Duty cycles map
/// directly onto the falling point.
#[derive(Debug)]
pub struct FanPwm<'a, P> {
    device: &'a mut PwmTacho<P>,
    channel: u8,
}

impl<P> embedded_hal::pwm::ErrorType for FanPwm<'_, P>
where
    P: RegisterPort,
    P::Error: Debug,
{
    type Error = Error<P::Error>;
}

impl<P> embedded_hal::pwm::SetDutyCycle for FanPwm<'_, P>
where
    P: RegisterPort,
    P::Error: Debug,
{
    fn max_duty_cycle(&self) -> u16 {
        u16::from(crate::divider::PERIOD_MAX)
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), P::Error> {
        self.device.set_duty_level(self.channel, u32::from(duty))
    }
}
