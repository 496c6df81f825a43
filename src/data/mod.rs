//! Data structures for scale data.
//!
//! This module contains the core data types used to represent
//! discovered scales and weight readings.

pub mod device;
pub mod weight;

pub use device::ScaleDevice;
pub use weight::{WeightSample, WeightUnit};
