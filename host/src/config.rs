//! Fan descriptions used to attach channels to a [`PwmTacho`].
//!
//! [`PwmTacho`]: crate::PwmTacho
use heapless::Vec;

use crate::{
    cooling::{CoolingLevels, MAX_COOLING_LEVELS},
    pwm::DEFAULT_TARGET_FREQ_HZ,
    tach::DEFAULT_MIN_RPM,
    MAX_CHANNELS,
};

/// Represents an invalid fan description.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("fan has no tach channels")]
    NoTachChannels,
    #[error("invalid tach channel {0}")]
    InvalidTachChannel(u8),
    #[error("too many cooling levels: expected at most {max}, got {0}", max = MAX_COOLING_LEVELS)]
    TooManyLevels(usize),
    #[error("cooling level list is empty")]
    NoCoolingLevels,
    #[error("minimum RPM is zero")]
    ZeroMinRpm,
}

impl From<derive_builder::UninitializedFieldError> for ConfigError {
    fn from(value: derive_builder::UninitializedFieldError) -> Self {
        Self::MissingField(value.field_name())
    }
}

/// Describes one fan: the PWM channel driving it and the tach channels
/// measuring it.
#[derive(Debug, Clone, PartialEq, Eq, derive_builder::Builder)]
#[builder(
    no_std,
    pattern = "owned",
    build_fn(error = "ConfigError", validate = "Self::validate")
)]
pub struct FanConfig {
    pub pwm_channel: u8,
    #[builder(setter(custom))]
    pub tach_channels: Vec<u8, MAX_CHANNELS>,
    #[builder(default = "DEFAULT_TARGET_FREQ_HZ")]
    pub target_freq_hz: u32,
    #[builder(default = "DEFAULT_MIN_RPM")]
    pub min_rpm: u32,
    /// Duty levels for a cooling device, one per thermal state.
    #[builder(default, setter(strip_option))]
    pub cooling_levels: Option<CoolingLevels>,
}

impl FanConfig {
    #[must_use]
    pub fn builder() -> FanConfigBuilder {
        FanConfigBuilder::default()
    }

    /// Checks a description that may have been edited after it was built.
    pub fn check(&self) -> Result<(), ConfigError> {
        check_fan(&self.tach_channels, self.min_rpm)
    }
}

fn check_fan(tach_channels: &[u8], min_rpm: u32) -> Result<(), ConfigError> {
    if tach_channels.is_empty() {
        return Err(ConfigError::NoTachChannels);
    }
    if let Some(&channel) = tach_channels.iter().find(|&&ch| usize::from(ch) >= MAX_CHANNELS) {
        return Err(ConfigError::InvalidTachChannel(channel));
    }
    if min_rpm == 0 {
        return Err(ConfigError::ZeroMinRpm);
    }
    Ok(())
}

impl FanConfigBuilder {
    /// Adds a tach channel. Repeated channels are ignored.
    #[must_use]
    pub fn tach_channel(mut self, channel: u8) -> Self {
        let channels = self.tach_channels.get_or_insert_with(Vec::new);
        if !channels.contains(&channel) {
            if let Err(channel) = channels.push(channel) {
                // A full list of distinct channels already holds every valid
                // one, so keep an invalid channel for `validate` to report.
                if let Some(last) = channels.last_mut() {
                    *last = channel;
                }
            }
        }
        self
    }

    /// Adds several tach channels.
    #[must_use]
    pub fn tach_channels(self, channels: &[u8]) -> Self {
        channels
            .iter()
            .fold(self, |builder, &channel| builder.tach_channel(channel))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let channels = self.tach_channels.as_ref().ok_or(ConfigError::NoTachChannels)?;
        check_fan(channels, self.min_rpm.unwrap_or(DEFAULT_MIN_RPM))
    }
}
