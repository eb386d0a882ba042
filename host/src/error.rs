use crate::config::ConfigError;

pub type Result<T, E> = core::result::Result<T, Error<E>>;

/// Represents a PWM/tacho controller error, generic over the [`RegisterPort`]
/// error.
///
/// [`RegisterPort`]: crate::RegisterPort
#[derive(Debug, PartialEq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    #[error("invalid channel {0}")]
    InvalidChannel(u8),
    #[error("invalid channel count: expected 1≤x≤16, got {0}")]
    InvalidChannelCount(u8),
    #[error("clock rate is zero")]
    ZeroClock,
    #[error("clock rate {0}Hz is too fast for nanosecond ticks")]
    ClockTooFast(u32),
    #[error("invalid duty: expected 0≤x≤255, got {0}")]
    InvalidDuty(u32),
    #[error("duty is not a decimal number")]
    ParseDuty,
    #[error("duty {duty_ns}ns exceeds period {period_ns}ns")]
    DutyExceedsPeriod { duty_ns: u32, period_ns: u32 },
    #[error("period {0}ns exceeds one second")]
    PeriodTooLong(u32),
    #[error("period {0}ns cannot be represented by the clock dividers")]
    PeriodUnrepresentable(u32),
    #[error("frequency {0}Hz cannot be reached by the clock dividers")]
    FrequencyUnreachable(u32),
    #[error("invalid cooling state: expected 0≤x≤{max}, got {state}")]
    InvalidCoolingState { state: usize, max: usize },
    #[error("tacho channel {0} has a minimum RPM of zero")]
    ZeroMinRpm(u8),
    #[error("invalid tacho threshold: expected 0≤x≤0xFFFFF, got {0:#x}")]
    InvalidThreshold(u32),
    #[error("invalid configuration: {0}")]
    Config(ConfigError),
    #[error("channel {0} is not present")]
    ChannelNotPresent(u8),
    #[error("PWM output {0} was not requested")]
    ChannelNotRequested(u8),
    #[error("channel {0} has no cooling device")]
    NoCoolingDevice(u8),
    #[error("register access failed")]
    HardwareUnavailable(#[from] E),
}

/// Broad classification of an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// A value, period, or divider search fell outside what the hardware can
    /// represent.
    OutOfRange,
    /// The channel is not in a state that allows the operation.
    InvalidState,
    /// The register access layer failed.
    HardwareUnavailable,
}

impl<E> Error<E> {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ChannelNotPresent(_) | Self::ChannelNotRequested(_) | Self::NoCoolingDevice(_) => {
                ErrorKind::InvalidState
            }
            Self::HardwareUnavailable(_) => ErrorKind::HardwareUnavailable,
            _ => ErrorKind::OutOfRange,
        }
    }
}

impl<E: core::fmt::Debug> embedded_hal::pwm::Error for Error<E> {
    fn kind(&self) -> embedded_hal::pwm::ErrorKind {
        embedded_hal::pwm::ErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::BusFault;

    #[test]
    fn kinds() {
        assert_eq!(
            Error::<BusFault>::InvalidDuty(256).kind(),
            ErrorKind::OutOfRange
        );
        assert_eq!(
            Error::<BusFault>::PeriodTooLong(1_000_000_001).kind(),
            ErrorKind::OutOfRange
        );
        assert_eq!(
            Error::<BusFault>::Config(ConfigError::ZeroMinRpm).kind(),
            ErrorKind::OutOfRange
        );
        assert_eq!(
            Error::<BusFault>::ChannelNotPresent(3).kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            Error::<BusFault>::from(BusFault).kind(),
            ErrorKind::HardwareUnavailable
        );
    }

    #[test]
    fn messages() {
        assert_eq!(
            Error::<BusFault>::InvalidDuty(300).to_string(),
            "invalid duty: expected 0≤x≤255, got 300"
        );
        assert_eq!(
            Error::<BusFault>::InvalidCoolingState { state: 5, max: 3 }.to_string(),
            "invalid cooling state: expected 0≤x≤3, got 5"
        );
        assert_eq!(
            Error::<BusFault>::Config(ConfigError::ZeroMinRpm).to_string(),
            "invalid configuration: minimum RPM is zero"
        );
        assert_eq!(
            Error::<BusFault>::InvalidThreshold(0x10_0000).to_string(),
            "invalid tacho threshold: expected 0≤x≤0xFFFFF, got 0x100000"
        );
    }
}
