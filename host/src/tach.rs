//! Fan tachometer configuration and speed measurement.
//!
//! The tachometer counts divided clock ticks between configured edges of the
//! fan's tach signal. With a divider of `4^t` and a raw count `n`, one
//! revolution takes `(n + 1) * 4^t * 2` clock ticks, so
//!
//! ```txt
//!         clock_hz
//! RPM = ------------------- * 60
//!       (n + 1) * 4^t * 2
//! ```
//!
//! The factor of two assumes two tach edges per revolution and is applied
//! regardless of the configured [`EdgeMode`].
use heapless::Vec;

use crate::{
    fmt::{debug, trace, warn},
    regs::{self, tach_ctrl, tach_sts, RegisterPort},
    units::{revolution_per_minute, AngularVelocity},
    Error, Result, MAX_CHANNELS,
};

/// Default lower bound used to size the tacho clock divider.
pub const DEFAULT_MIN_RPM: u32 = 2900;
/// Divider assumed before the first enable derives one from the minimum RPM.
pub const DEFAULT_DIVIDER: u32 = 8;
/// Largest tacho divider exponent, dividing by `4^11`.
pub const DIV_EXP_MAX: u8 = 11;
/// Raw count reported when no edges were observed.
pub const STALLED: u32 = 0xF_FFFF;
/// Largest interrupt threshold.
pub const THRESHOLD_MAX: u32 = 0xF_FFFF;
/// Number of status reads spent waiting for a full measurement.
pub const POLL_RETRIES: usize = 3;

/// Edges of the tach signal between which ticks are counted.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EdgeMode {
    #[default]
    Falling = 0,
    Rising = 1,
    Both = 2,
}

/// Represents the configuration of one tachometer channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TachoChannelConfig {
    /// Slowest expected fan speed. Only sizes the clock divider.
    pub min_rpm: u32,
    /// Clock divisor, `4^t`. Derived from `min_rpm` when the channel is
    /// enabled.
    pub divider: u32,
    pub edge_mode: EdgeMode,
    /// Debounce setting, `0..=3`.
    pub debounce: u8,
    pub limited_inverse: bool,
    /// Interrupt threshold, `0` disables the interrupt. At most
    /// [`THRESHOLD_MAX`].
    pub threshold: u32,
}

impl Default for TachoChannelConfig {
    fn default() -> Self {
        Self {
            min_rpm: DEFAULT_MIN_RPM,
            divider: DEFAULT_DIVIDER,
            edge_mode: EdgeMode::Falling,
            debounce: 0,
            limited_inverse: false,
            threshold: 0,
        }
    }
}

impl TachoChannelConfig {
    fn ctrl_value(&self, div_exp: u8) -> u32 {
        let mut value = regs::with_bit(0, tach_ctrl::ENABLE, true);
        value = regs::with_field(value, tach_ctrl::EDGE, self.edge_mode as u32);
        value = regs::with_field(value, tach_ctrl::DIV, u32::from(div_exp));
        value = regs::with_field(value, tach_ctrl::DEBOUNCE, u32::from(self.debounce));
        value = regs::with_bit(value, tach_ctrl::INVERSE_LIMIT, self.limited_inverse);
        if self.threshold != 0 {
            value = regs::with_bit(value, tach_ctrl::IER, true);
            value = regs::with_field(value, tach_ctrl::THRESHOLD, self.threshold);
        }
        value
    }

    /// Derives the divider exponent and divisor, rejecting settings the
    /// control register cannot hold.
    fn derive<E>(&self, clock_hz: u32, channel: u8) -> Result<(u8, u32), E> {
        if self.threshold > THRESHOLD_MAX {
            return Err(Error::InvalidThreshold(self.threshold));
        }
        derive_divider(clock_hz, self.min_rpm).ok_or(Error::ZeroMinRpm(channel))
    }
}

/// Returns the smallest exponent `t` with `4^t > target_divisor`, saturating
/// at [`DIV_EXP_MAX`].
pub(crate) fn divider_exponent(target_divisor: u64) -> u8 {
    if target_divisor == 0 {
        return 0;
    }
    (0..=DIV_EXP_MAX)
        .find(|&exp| 4u64.pow(u32::from(exp)) > target_divisor)
        .unwrap_or(DIV_EXP_MAX)
}

/// Derives the tacho divider exponent so that a fan at `min_rpm` does not
/// overflow the 20-bit counter. Returns `None` if `min_rpm` is zero.
#[must_use]
pub fn derive_divider(clock_hz: u32, min_rpm: u32) -> Option<(u8, u32)> {
    if min_rpm == 0 {
        return None;
    }
    let target_divisor = u64::from(clock_hz) * 60 / u64::from(min_rpm) * 2 / (u64::from(STALLED) + 1);
    let exp = divider_exponent(target_divisor);
    Some((exp, 4u32.pow(u32::from(exp))))
}

/// Converts a raw tacho count into RPM.
///
/// A count of [`STALLED`] means no edges were seen and reads as 0 RPM.
#[must_use]
pub fn rpm_from_count(clock_hz: u32, divider: u32, raw: u32) -> u32 {
    let raw = raw & STALLED;
    if raw == STALLED {
        return 0;
    }
    let ticks = (u64::from(raw) + 1) * u64::from(divider) * 2;
    if ticks == 0 {
        return 0;
    }
    u32::try_from(u64::from(clock_hz) / ticks * 60).unwrap_or(u32::MAX)
}

/// Drives the tachometer half of every channel.
#[derive(Debug)]
pub struct TachoChannelController {
    clock_hz: u32,
    channels: Vec<TachoChannelConfig, MAX_CHANNELS>,
}

impl TachoChannelController {
    /// Creates a controller for `count` channels with default configuration.
    ///
    /// `count` is clamped to [`MAX_CHANNELS`].
    #[must_use]
    pub fn new(clock_hz: u32, count: usize) -> Self {
        let mut channels = Vec::new();
        for _ in 0..count.min(MAX_CHANNELS) {
            let _ = channels.push(TachoChannelConfig::default());
        }
        Self { clock_hz, channels }
    }

    /// Returns a channel's configuration.
    #[must_use]
    pub fn config(&self, channel: u8) -> Option<&TachoChannelConfig> {
        self.channels.get(usize::from(channel))
    }

    /// Returns a channel's configuration for editing. Changes reach the
    /// hardware on the next [`enable`](Self::enable).
    pub fn config_mut(&mut self, channel: u8) -> Option<&mut TachoChannelConfig> {
        self.channels.get_mut(usize::from(channel))
    }

    fn slot<E>(&mut self, channel: u8) -> Result<&mut TachoChannelConfig, E> {
        self.channels
            .get_mut(usize::from(channel))
            .ok_or(Error::InvalidChannel(channel))
    }

    /// Checks that a channel could be enabled with `min_rpm`, without
    /// touching the hardware.
    pub fn check_enable<E>(&self, channel: u8, min_rpm: u32) -> Result<(), E> {
        let config = self.config(channel).ok_or(Error::<E>::InvalidChannel(channel))?;
        TachoChannelConfig { min_rpm, ..*config }
            .derive(self.clock_hz, channel)
            .map(|_| ())
    }

    /// Enables or disables a tacho channel.
    ///
    /// Enabling derives the divider from the minimum RPM and rewrites the
    /// whole control register. Disabling clears only the enable bit.
    pub fn enable<P: RegisterPort>(
        &mut self,
        port: &mut P,
        channel: u8,
        enable: bool,
    ) -> Result<(), P::Error> {
        let clock_hz = self.clock_hz;
        let config = self.slot::<P::Error>(channel)?;

        if !enable {
            port.update_bits(
                regs::tach_ctrl(channel),
                regs::with_bit(0, tach_ctrl::ENABLE, true),
                0,
            )?;
            debug!("tach{}: disabled", channel);
            return Ok(());
        }

        let (exp, divider) = config.derive::<P::Error>(clock_hz, channel)?;
        port.write(regs::tach_ctrl(channel), config.ctrl_value(exp))?;
        config.divider = divider;
        debug!(
            "tach{}: enabled, min {}rpm, divider {}",
            channel, config.min_rpm, divider
        );
        Ok(())
    }

    /// Reads a channel's fan speed in RPM.
    ///
    /// The status register is read up to [`POLL_RETRIES`] times looking for a
    /// full measurement; the latched count is used either way.
    pub fn read_rpm<P: RegisterPort>(&mut self, port: &mut P, channel: u8) -> Result<u32, P::Error> {
        let divider = self.slot::<P::Error>(channel)?.divider;

        let mut status = 0;
        let mut full = false;
        for _ in 0..POLL_RETRIES {
            status = port.read(regs::tach_sts(channel))?;
            if regs::bit(status, tach_sts::FULL_MEASUREMENT) {
                full = true;
                break;
            }
        }
        if !full {
            warn!("tach{}: no full measurement after {} reads", channel, POLL_RETRIES);
        }

        let raw = regs::field(status, tach_sts::VALUE);
        if raw == STALLED {
            trace!("tach{}: stalled", channel);
        }
        Ok(rpm_from_count(self.clock_hz, divider, raw))
    }

    /// Reads a channel's fan speed.
    pub fn read_speed<P: RegisterPort>(
        &mut self,
        port: &mut P,
        channel: u8,
    ) -> Result<AngularVelocity, P::Error> {
        let rpm = self.read_rpm(port, channel)?;
        Ok(AngularVelocity::new::<revolution_per_minute>(f64::from(rpm)))
    }
}

#[cfg(test)]
mod tests {
    use float_eq::assert_float_eq;

    use super::*;
    use crate::{
        testing::{BusFault, FakePort},
        units::revolution_per_second,
    };

    const FULL: u32 = 1 << 20;

    mod divider {
        use super::*;

        #[test]
        fn slow_clock_needs_no_division() {
            // 24MHz * 60 / 2900 * 2 fits the 20-bit counter undivided.
            assert_eq!(derive_divider(24_000_000, 2900), Some((0, 1)));
        }

        #[test]
        fn fast_clock() {
            // 200MHz * 60 / 2900 * 2 / 2^20 = 7, and 4^2 is the first power above.
            assert_eq!(derive_divider(200_000_000, 2900), Some((2, 16)));
            assert_eq!(derive_divider(200_000_000, 100), Some((4, 256)));
        }

        #[test]
        fn strictly_above_target() {
            assert_eq!(divider_exponent(1), 1);
            assert_eq!(divider_exponent(3), 1);
            assert_eq!(divider_exponent(4), 2);
            assert_eq!(divider_exponent(15), 2);
            assert_eq!(divider_exponent(16), 3);
        }

        #[test]
        fn saturates() {
            assert_eq!(divider_exponent(4_194_303), 11);
            assert_eq!(divider_exponent(4_194_304), 11);
            assert_eq!(divider_exponent(u64::MAX), 11);
        }

        #[test]
        fn zero_min_rpm() {
            assert_eq!(derive_divider(24_000_000, 0), None);
        }

        #[test]
        fn always_power_of_four() {
            for clock_hz in [1_000_000, 24_000_000, 200_000_000, u32::MAX] {
                for min_rpm in [1, 100, 1_000, 2_900, 10_000] {
                    let (exp, divider) = derive_divider(clock_hz, min_rpm).unwrap();
                    assert!(exp <= DIV_EXP_MAX);
                    assert_eq!(divider, 1 << (2 * exp));
                }
            }
        }
    }

    mod rpm {
        use super::*;

        #[test]
        fn formula() {
            assert_eq!(rpm_from_count(24_000_000, 8, 999), 90_000);
            assert_eq!(rpm_from_count(200_000_000, 16, 4_999), 75_000);
        }

        #[test]
        fn stalled() {
            assert_eq!(rpm_from_count(24_000_000, 8, STALLED), 0);
        }

        #[test]
        fn matches_exact_formula_when_divisible() {
            let clock_hz = 24_000_000;
            for raw in [0, 1, 4, 9, 99, 149, 999, 2_999, 14_999] {
                let ticks = (raw + 1) * 8 * 2;
                assert_eq!(rpm_from_count(clock_hz, 8, raw), clock_hz * 60 / ticks);
            }
        }
    }

    #[test]
    fn defaults() {
        let config = TachoChannelConfig::default();
        assert_eq!(config.min_rpm, 2900);
        assert_eq!(config.divider, 8);
        assert_eq!(config.edge_mode, EdgeMode::Falling);
        assert_eq!(config.threshold, 0);
    }

    #[test]
    fn enable() {
        let mut port = FakePort::new();
        let mut tach = TachoChannelController::new(200_000_000, 4);
        tach.enable(&mut port, 1, true).unwrap();

        assert_eq!(port.get(regs::tach_ctrl(1)), 0x1020_0000);
        assert_eq!(tach.config(1).unwrap().divider, 16);
    }

    #[test]
    fn enable_with_options() {
        let mut port = FakePort::new();
        let mut tach = TachoChannelController::new(200_000_000, 4);
        {
            let config = tach.config_mut(0).unwrap();
            config.edge_mode = EdgeMode::Both;
            config.debounce = 1;
            config.limited_inverse = true;
            config.threshold = 0x1234;
        }
        tach.enable(&mut port, 0, true).unwrap();
        assert_eq!(port.get(regs::tach_ctrl(0)), 0xD620_1234);
    }

    #[test]
    fn disable_keeps_fields() {
        let mut port = FakePort::new();
        let mut tach = TachoChannelController::new(200_000_000, 4);
        tach.enable(&mut port, 2, true).unwrap();
        tach.enable(&mut port, 2, false).unwrap();
        assert_eq!(port.get(regs::tach_ctrl(2)), 0x0020_0000);
    }

    #[test]
    fn zero_min_rpm() {
        let mut port = FakePort::new();
        let mut tach = TachoChannelController::new(200_000_000, 4);
        tach.config_mut(0).unwrap().min_rpm = 0;
        assert_eq!(tach.enable(&mut port, 0, true), Err(Error::ZeroMinRpm(0)));
        assert!(port.writes().is_empty());
    }

    #[test]
    fn threshold_too_wide() {
        let mut port = FakePort::new();
        let mut tach = TachoChannelController::new(200_000_000, 4);
        tach.config_mut(1).unwrap().threshold = THRESHOLD_MAX + 1;
        assert_eq!(
            tach.enable(&mut port, 1, true),
            Err(Error::InvalidThreshold(0x10_0000))
        );
        assert!(port.writes().is_empty());
        assert_eq!(tach.config(1).unwrap().divider, DEFAULT_DIVIDER);

        tach.config_mut(1).unwrap().threshold = THRESHOLD_MAX;
        tach.enable(&mut port, 1, true).unwrap();
        assert_eq!(port.get(regs::tach_ctrl(1)), 0x902F_FFFF);
    }

    #[test]
    fn check_enable() {
        let mut tach = TachoChannelController::new(200_000_000, 4);
        assert_eq!(tach.check_enable::<BusFault>(0, 2900), Ok(()));
        assert_eq!(tach.check_enable::<BusFault>(0, 0), Err(Error::ZeroMinRpm(0)));
        assert_eq!(
            tach.check_enable::<BusFault>(4, 2900),
            Err(Error::InvalidChannel(4))
        );
        tach.config_mut(2).unwrap().threshold = u32::MAX;
        assert_eq!(
            tach.check_enable::<BusFault>(2, 2900),
            Err(Error::InvalidThreshold(u32::MAX))
        );
    }

    #[test]
    fn read_rpm_with_default_divider() {
        let mut port = FakePort::new();
        port.set(regs::tach_sts(0), FULL | 999);
        let mut tach = TachoChannelController::new(24_000_000, 4);
        assert_eq!(tach.read_rpm(&mut port, 0), Ok(90_000));
        assert_eq!(port.reads_of(regs::tach_sts(0)), 1);
    }

    #[test]
    fn read_rpm_stalled() {
        let mut port = FakePort::new();
        port.set(regs::tach_sts(0), FULL | STALLED);
        let mut tach = TachoChannelController::new(24_000_000, 4);
        assert_eq!(tach.read_rpm(&mut port, 0), Ok(0));
    }

    #[test]
    fn read_rpm_retries() {
        let mut port = FakePort::new();
        port.script(regs::tach_sts(3), [999, FULL | 4_999]);
        let mut tach = TachoChannelController::new(24_000_000, 4);
        assert_eq!(tach.read_rpm(&mut port, 3), Ok(18_000));
        assert_eq!(port.reads_of(regs::tach_sts(3)), 2);
    }

    #[test]
    fn read_rpm_without_full_measurement() {
        let mut port = FakePort::new();
        port.set(regs::tach_sts(1), 999);
        let mut tach = TachoChannelController::new(24_000_000, 4);
        assert_eq!(tach.read_rpm(&mut port, 1), Ok(90_000));
        assert_eq!(port.reads_of(regs::tach_sts(1)), POLL_RETRIES);
    }

    #[test]
    fn read_rpm_hardware_failure() {
        let mut port = FakePort::new();
        port.fail = true;
        let mut tach = TachoChannelController::new(24_000_000, 4);
        assert_eq!(
            tach.read_rpm(&mut port, 0),
            Err(Error::HardwareUnavailable(BusFault))
        );
    }

    #[test]
    fn read_speed() {
        let mut port = FakePort::new();
        port.set(regs::tach_sts(0), FULL | 999);
        let mut tach = TachoChannelController::new(24_000_000, 4);
        let speed = tach.read_speed(&mut port, 0).unwrap();
        assert_float_eq!(speed.get::<revolution_per_minute>(), 90_000.0, r2nd <= 1e-12);
        assert_float_eq!(speed.get::<revolution_per_second>(), 1_500.0, r2nd <= 1e-12);
    }
}
