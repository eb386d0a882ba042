//! Driver core for a multi-channel PWM generator and fan tachometer.
//!
//! Every register access goes through a [`RegisterPort`], so the controllers
//! run against memory-mapped hardware ([`Mmio`]) or any other register
//! window alike.
#![cfg_attr(not(test), no_std)]
#![warn(clippy::suspicious, clippy::complexity, clippy::perf, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::similar_names)]

mod fmt;

pub mod config;
pub mod cooling;
pub mod device;
pub mod divider;
pub mod error;
pub mod output;
pub mod pwm;
pub mod regs;
pub mod tach;
pub mod units;

#[cfg(test)]
mod testing;

pub use self::{
    config::{ConfigError, FanConfig},
    cooling::CoolingDeviceOps,
    device::PwmTacho,
    error::{Error, ErrorKind, Result},
    output::PwmChipOps,
    regs::{Mmio, RegisterPort},
};

/// Largest number of PWM/tacho channel pairs.
pub const MAX_CHANNELS: usize = 16;
