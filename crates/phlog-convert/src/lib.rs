//! Signal conversion for current-loop transmitters: shunt voltage to loop
//! current, loop current to the transmitted physical quantity.

pub mod calibration;
pub mod shunt;

pub use calibration::{CalibrationRange, LinearConverter};
pub use shunt::{Reading, Shunt, SignalChain};

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum CalibrationError {
    #[error("{name} range [{low}, {high}] is degenerate (high equals low)")]
    Degenerate { name: &'static str, low: f64, high: f64 },
    #[error("{name} range [{low}, {high}] is inverted (high below low)")]
    Inverted { name: &'static str, low: f64, high: f64 },
    #[error("{name} range [{low}, {high}] is not finite")]
    NotFinite { name: &'static str, low: f64, high: f64 },
    #[error("slope {slope} / offset {offset} is not finite")]
    InvalidTransfer { slope: f64, offset: f64 },
    #[error("shunt resistance must be a positive number of ohms, got {0}")]
    InvalidShunt(f64),
}
