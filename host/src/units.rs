//! Physical quantities used at the API boundary.
pub use uom::si::{
    angular_velocity::{revolution_per_minute, revolution_per_second},
    f64::AngularVelocity,
    frequency::{hertz, kilohertz, megahertz},
    u32::Frequency,
};
