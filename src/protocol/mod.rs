//! Protocol module for encoding commands and decoding notifications.
//!
//! This module contains the implementations for:
//! - Control command encoding
//! - Control response decoding
//! - Weight notification decoding

pub mod commands;
pub mod response;
pub mod weight;

pub use commands::{decode_text, BuzzerMode, ScaleCommand};
pub use response::{parse_control_response, CommandOutcome};
pub use weight::{decode_weight, parse_weight_text, MAX_WEIGHT_KG};
