//! PWM/tachometer register window.
//!
//! # Layout
//!
//! Every channel owns a 16 byte stride holding one PWM output and one
//! tachometer input:
//!
//! ```txt
//!  offset  register
//! +------+------------------+
//! | 0x00 | PWM control      |
//! | 0x04 | PWM duty cycle   |
//! | 0x08 | Tacho control    |
//! | 0x0C | Tacho status     |
//! +------+------------------+
//! ```
//!
//! PWM control:
//! - bit 19: load duty as watchdog on the falling point (rising otherwise)
//! - bit 18: enable duty load as watchdog
//! - bit 17: disable duty sync
//! - bit 16: clock enable
//! - bit 14: invert pin
//! - bit 13: open-drain enable
//! - bit 12: pin enable
//! - bits 11:8: exponential clock divider, divides by `2^h`
//! - bits 7:0: linear clock divider, divides by `l + 1`
//!
//! PWM duty cycle:
//! - bits 31:24: period
//! - bits 23:16: watchdog rising/falling point
//! - bits 15:8: falling point
//! - bits 7:0: rising point
//!
//! Tacho control:
//! - bit 31: interrupt enable
//! - bit 30: inverse limit comparison
//! - bit 28: enable
//! - bits 27:26: debounce
//! - bits 25:24: edge mode
//! - bits 23:20: clock divider, divides by `4^t`
//! - bits 19:0: interrupt threshold
//!
//! Tacho status:
//! - bit 21: value updated since the last read
//! - bit 20: full measurement
//! - bits 19:0: measured value
use core::{ops::Range, ptr::NonNull};

use bitvec::prelude::*;

/// Size of the register window, in bytes.
pub const WINDOW_SIZE: u32 = 0x100;
/// Distance between two channels' register blocks, in bytes.
pub const CHANNEL_STRIDE: u32 = 0x10;

pub const PWM_CTRL: u32 = 0x00;
pub const PWM_DUTY: u32 = 0x04;
pub const TACH_CTRL: u32 = 0x08;
pub const TACH_STS: u32 = 0x0C;

pub mod pwm_ctrl {
    use core::ops::Range;

    pub const LOAD_AS_WDT: usize = 19;
    pub const DUTY_LOAD_AS_WDT_EN: usize = 18;
    pub const DUTY_SYNC_DIS: usize = 17;
    pub const CLK_ENABLE: usize = 16;
    pub const INVERSE: usize = 14;
    pub const OPEN_DRAIN_EN: usize = 13;
    pub const PIN_EN: usize = 12;
    pub const DIV_H: Range<usize> = 8..12;
    pub const DIV_L: Range<usize> = 0..8;
}

pub mod pwm_duty {
    use core::ops::Range;

    pub const PERIOD: Range<usize> = 24..32;
    pub const WDT_POINT: Range<usize> = 16..24;
    pub const FALLING: Range<usize> = 8..16;
    pub const RISING: Range<usize> = 0..8;
}

pub mod tach_ctrl {
    use core::ops::Range;

    pub const IER: usize = 31;
    pub const INVERSE_LIMIT: usize = 30;
    pub const ENABLE: usize = 28;
    pub const DEBOUNCE: Range<usize> = 26..28;
    pub const EDGE: Range<usize> = 24..26;
    pub const DIV: Range<usize> = 20..24;
    pub const THRESHOLD: Range<usize> = 0..20;
}

pub mod tach_sts {
    use core::ops::Range;

    pub const VALUE_UPDATE: usize = 21;
    pub const FULL_MEASUREMENT: usize = 20;
    pub const VALUE: Range<usize> = 0..20;
}

/// Byte offset of a channel's PWM control register.
#[must_use]
pub const fn pwm_ctrl(channel: u8) -> u32 {
    channel as u32 * CHANNEL_STRIDE + PWM_CTRL
}

/// Byte offset of a channel's PWM duty cycle register.
#[must_use]
pub const fn pwm_duty(channel: u8) -> u32 {
    channel as u32 * CHANNEL_STRIDE + PWM_DUTY
}

/// Byte offset of a channel's tacho control register.
#[must_use]
pub const fn tach_ctrl(channel: u8) -> u32 {
    channel as u32 * CHANNEL_STRIDE + TACH_CTRL
}

/// Byte offset of a channel's tacho status register.
#[must_use]
pub const fn tach_sts(channel: u8) -> u32 {
    channel as u32 * CHANNEL_STRIDE + TACH_STS
}

/// Reads a bit field out of a register value.
pub(crate) fn field(value: u32, bits: Range<usize>) -> u32 {
    value.view_bits::<Lsb0>()[bits].load_le()
}

/// Returns `value` with the given bit field replaced by the low bits of `field`.
pub(crate) fn with_field(mut value: u32, bits: Range<usize>, field: u32) -> u32 {
    value.view_bits_mut::<Lsb0>()[bits].store_le(field);
    value
}

/// Returns `value` with a single bit set or cleared.
pub(crate) fn with_bit(mut value: u32, bit: usize, set: bool) -> u32 {
    value.view_bits_mut::<Lsb0>().set(bit, set);
    value
}

/// Returns whether a single bit is set.
pub(crate) fn bit(value: u32, bit: usize) -> bool {
    value.view_bits::<Lsb0>()[bit]
}

/// Returns a mask covering the given bit field.
pub(crate) fn mask(bits: Range<usize>) -> u32 {
    let mut value = 0u32;
    value.view_bits_mut::<Lsb0>()[bits].fill(true);
    value
}

/// 32-bit register access at byte offsets into the PWM/tacho window.
pub trait RegisterPort {
    type Error;

    fn read(&mut self, offset: u32) -> Result<u32, Self::Error>;

    fn write(&mut self, offset: u32, value: u32) -> Result<(), Self::Error>;

    /// Replaces the bits selected by `mask` with the matching bits of
    /// `value`. The register is left untouched if nothing changes.
    fn update_bits(&mut self, offset: u32, mask: u32, value: u32) -> Result<(), Self::Error> {
        let old = self.read(offset)?;
        let new = (old & !mask) | (value & mask);
        if new == old {
            return Ok(());
        }
        self.write(offset, new)
    }
}

impl<T: RegisterPort + ?Sized> RegisterPort for &mut T {
    type Error = T::Error;

    fn read(&mut self, offset: u32) -> Result<u32, Self::Error> {
        T::read(self, offset)
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<(), Self::Error> {
        T::write(self, offset, value)
    }

    fn update_bits(&mut self, offset: u32, mask: u32, value: u32) -> Result<(), Self::Error> {
        T::update_bits(self, offset, mask, value)
    }
}

/// Represents a memory-mapped register access error.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MmioError {
    #[error("offset {0:#x} is outside the register window")]
    OutOfWindow(u32),
    #[error("offset {0:#x} is not 32-bit aligned")]
    Unaligned(u32),
}

/// A [`RegisterPort`] over a memory-mapped register window.
#[derive(Debug)]
pub struct Mmio {
    base: NonNull<u32>,
}

impl Mmio {
    /// Creates a new [`Mmio`] port.
    ///
    /// # Safety
    ///
    /// `base` must point to [`WINDOW_SIZE`] bytes of mapped, 32-bit aligned
    /// memory that stays valid, and is not accessed through any other path,
    /// for as long as the port exists.
    #[must_use]
    pub const unsafe fn new(base: NonNull<u32>) -> Self {
        Self { base }
    }

    fn register(&self, offset: u32) -> Result<*mut u32, MmioError> {
        if offset >= WINDOW_SIZE {
            return Err(MmioError::OutOfWindow(offset));
        }
        if offset % 4 != 0 {
            return Err(MmioError::Unaligned(offset));
        }
        // SAFETY: the offset is inside the window the caller of `new` vouched for.
        Ok(unsafe { self.base.as_ptr().byte_add(offset as usize) })
    }
}

impl RegisterPort for Mmio {
    type Error = MmioError;

    fn read(&mut self, offset: u32) -> Result<u32, Self::Error> {
        let register = self.register(offset)?;
        // SAFETY: `register` is aligned and inside the mapped window.
        Ok(unsafe { register.read_volatile() })
    }

    fn write(&mut self, offset: u32, value: u32) -> Result<(), Self::Error> {
        let register = self.register(offset)?;
        // SAFETY: `register` is aligned and inside the mapped window.
        unsafe { register.write_volatile(value) };
        Ok(())
    }
}
