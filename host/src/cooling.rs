//! Thermal cooling devices backed by a PWM channel.
use core::fmt::Write;

use heapless::{String, Vec};

use crate::{
    config::ConfigError,
    fmt::info,
    pwm::PwmChannelController,
    regs::RegisterPort,
    Error, Result,
};

/// Largest number of cooling states per device, one per `u8` state index.
pub const MAX_COOLING_LEVELS: usize = 256;
/// Longest cooling device name.
pub const MAX_NAME_LEN: usize = 15;

/// Interface a thermal governor drives a cooling device through.
pub trait CoolingDeviceOps {
    type Error;

    /// Returns the highest valid state.
    fn get_max_state(&self) -> usize;

    fn get_cur_state(&self) -> usize;

    fn set_cur_state(&mut self, state: usize) -> core::result::Result<(), Self::Error>;
}

/// Ordered duty levels, indexed by cooling state.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Deref)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CoolingLevels(#[deref(forward)] Vec<u8, MAX_COOLING_LEVELS>);

impl CoolingLevels {
    pub fn new(levels: &[u8]) -> core::result::Result<Self, ConfigError> {
        if levels.is_empty() {
            return Err(ConfigError::NoCoolingLevels);
        }
        Vec::from_slice(levels)
            .map(Self)
            .map_err(|()| ConfigError::TooManyLevels(levels.len()))
    }

    /// Returns the highest state, one less than the number of levels.
    #[must_use]
    pub fn max_state(&self) -> usize {
        self.0.len() - 1
    }
}

/// Maps a governor's cooling state onto a PWM channel's falling point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoolingDevice {
    name: String<MAX_NAME_LEN>,
    channel: u8,
    levels: CoolingLevels,
    cur_state: usize,
}

impl CoolingDevice {
    /// Creates a device named `<node><channel>`, truncated to
    /// [`MAX_NAME_LEN`], starting in state 0.
    #[must_use]
    pub fn new(node: &str, channel: u8, levels: CoolingLevels) -> Self {
        Self {
            name: device_name(node, channel),
            channel,
            levels,
            cur_state: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn channel(&self) -> u8 {
        self.channel
    }

    #[must_use]
    pub fn levels(&self) -> &CoolingLevels {
        &self.levels
    }

    #[must_use]
    pub fn max_state(&self) -> usize {
        self.levels.max_state()
    }

    #[must_use]
    pub fn cur_state(&self) -> usize {
        self.cur_state
    }

    /// Moves to `state` and reprograms the bound channel with its level.
    ///
    /// `cur_state` only changes once the channel has been programmed.
    pub fn set_state<P: RegisterPort>(
        &mut self,
        pwm: &mut PwmChannelController,
        port: &mut P,
        state: usize,
    ) -> Result<(), P::Error> {
        let level = *self
            .levels
            .get(state)
            .ok_or(Error::<P::Error>::InvalidCoolingState {
                state,
                max: self.max_state(),
            })?;
        pwm.program_level(port, self.channel, level)?;
        info!(
            "{}: state {} -> {}, level {}",
            self.name.as_str(),
            self.cur_state,
            state,
            level
        );
        self.cur_state = state;
        Ok(())
    }
}

fn device_name(node: &str, channel: u8) -> String<MAX_NAME_LEN> {
    let mut index = String::<3>::new();
    let _ = write!(index, "{channel}");

    let mut name = String::new();
    for c in node.chars().chain(index.chars()) {
        if name.push(c).is_err() {
            break;
        }
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{regs, testing::FakePort};

    fn device() -> (CoolingDevice, PwmChannelController, FakePort) {
        let levels = CoolingLevels::new(&[0, 64, 128, 255]).unwrap();
        (
            CoolingDevice::new("fan", 0, levels),
            PwmChannelController::new(24_000_000, 4),
            FakePort::new(),
        )
    }

    #[test]
    fn levels() {
        assert_eq!(CoolingLevels::new(&[]), Err(ConfigError::NoCoolingLevels));
        assert_eq!(
            CoolingLevels::new(&[1; 257]),
            Err(ConfigError::TooManyLevels(257))
        );
        let full = CoolingLevels::new(&[1; 256]).unwrap();
        assert_eq!(full.max_state(), 255);
        let levels = CoolingLevels::new(&[10, 20]).unwrap();
        assert_eq!(levels.max_state(), 1);
        assert_eq!(&levels[..], [10, 20]);
    }

    #[test]
    fn names() {
        assert_eq!(device_name("fan", 0), "fan0");
        assert_eq!(device_name("fan", 15), "fan15");
        assert_eq!(device_name("a-very-long-node", 3), "a-very-long-nod");
        assert_eq!(device_name("thirteen-char", 123), "thirteen-char12");
    }

    #[test]
    fn set_state() {
        let (mut cdev, mut pwm, mut port) = device();
        assert_eq!(cdev.name(), "fan0");
        assert_eq!(cdev.max_state(), 3);
        assert_eq!(cdev.cur_state(), 0);

        cdev.set_state(&mut pwm, &mut port, 2).unwrap();
        assert_eq!(cdev.cur_state(), 2);
        assert_eq!(port.get(regs::pwm_duty(0)), 0xFF00_8000);
        assert_eq!(port.get(regs::pwm_ctrl(0)), 0x0001_1200);
        assert!(pwm.is_enabled(0));
    }

    #[test]
    fn same_state_reprograms() {
        let (mut cdev, mut pwm, mut port) = device();
        cdev.set_state(&mut pwm, &mut port, 3).unwrap();
        port.clear_log();
        cdev.set_state(&mut pwm, &mut port, 3).unwrap();
        assert_eq!(
            port.writes(),
            [
                (regs::pwm_duty(0), 0xFF00_FF00),
                (regs::pwm_ctrl(0), 0x0000_0200),
                (regs::pwm_ctrl(0), 0x0001_1200),
            ]
        );
    }

    #[test]
    fn state_zero_turns_off() {
        let (mut cdev, mut pwm, mut port) = device();
        cdev.set_state(&mut pwm, &mut port, 1).unwrap();
        port.clear_log();
        cdev.set_state(&mut pwm, &mut port, 0).unwrap();
        assert_eq!(cdev.cur_state(), 0);
        // Only the enable pair is cleared; the last duty cycle stays.
        assert_eq!(port.writes(), [(regs::pwm_ctrl(0), 0x0000_0200)]);
        assert_eq!(port.get(regs::pwm_duty(0)), 0xFF00_4000);
        assert!(!pwm.is_enabled(0));
    }

    #[test]
    fn out_of_range() {
        let (mut cdev, mut pwm, mut port) = device();
        cdev.set_state(&mut pwm, &mut port, 1).unwrap();
        port.clear_log();

        assert_eq!(
            cdev.set_state(&mut pwm, &mut port, 4),
            Err(Error::InvalidCoolingState { state: 4, max: 3 })
        );
        assert_eq!(cdev.cur_state(), 1);
        assert!(port.writes().is_empty());
    }

    #[test]
    fn hardware_failure_keeps_state() {
        let (mut cdev, mut pwm, mut port) = device();
        port.fail = true;
        assert_eq!(
            cdev.set_state(&mut pwm, &mut port, 2),
            Err(Error::HardwareUnavailable(crate::testing::BusFault))
        );
        assert_eq!(cdev.cur_state(), 0);
    }
}
