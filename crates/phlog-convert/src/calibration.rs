use serde::{Deserialize, Serialize};

use crate::CalibrationError;

/// Pair of bounds, either in amperes (loop current) or in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRange {
    pub low: f64,
    pub high: f64,
}

impl CalibrationRange {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Standard 4-20 mA loop, in amperes.
    pub const fn loop_4_20ma() -> Self {
        Self::new(0.004, 0.020)
    }

    pub fn span(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.low && x <= self.high
    }

    fn validate(&self, name: &'static str) -> Result<(), CalibrationError> {
        let Self { low, high } = *self;
        if !low.is_finite() || !high.is_finite() {
            return Err(CalibrationError::NotFinite { name, low, high });
        }
        if high == low {
            return Err(CalibrationError::Degenerate { name, low, high });
        }
        if high < low {
            return Err(CalibrationError::Inverted { name, low, high });
        }
        Ok(())
    }
}

/// Affine map from loop current (A) to the transmitted quantity.
///
/// Inputs are not clamped: a current outside the calibrated range yields a
/// value outside the value range. Use [`LinearConverter::in_calibration`] to
/// flag such readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearConverter {
    slope: f64,  // units per ampere
    offset: f64, // units
    current_range: Option<CalibrationRange>,
}

impl LinearConverter {
    pub fn from_ranges(
        current: CalibrationRange,
        value: CalibrationRange,
    ) -> Result<Self, CalibrationError> {
        current.validate("current")?;
        value.validate("value")?;

        let slope = value.span() / current.span();
        let offset = value.low - current.low * slope;
        Ok(Self {
            slope,
            offset,
            current_range: Some(current),
        })
    }

    /// For transmitters documented by their transfer function instead of ranges.
    pub fn from_slope_offset(slope: f64, offset: f64) -> Result<Self, CalibrationError> {
        if !slope.is_finite() || !offset.is_finite() || slope == 0.0 {
            return Err(CalibrationError::InvalidTransfer { slope, offset });
        }
        Ok(Self {
            slope,
            offset,
            current_range: None,
        })
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn convert(&self, current: f64) -> f64 {
        self.slope * current + self.offset
    }

    /// `true` when the current lies inside the calibrated range, or when the
    /// converter was built without one.
    pub fn in_calibration(&self, current: f64) -> bool {
        self.current_range.map_or(true, |r| r.contains(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ph_converter() -> LinearConverter {
        LinearConverter::from_ranges(
            CalibrationRange::loop_4_20ma(),
            CalibrationRange::new(0.0, 14.0),
        )
        .unwrap()
    }

    #[test]
    fn slope_and_offset_from_ranges() {
        let c = ph_converter();
        assert_relative_eq!(c.slope(), 875.0, epsilon = 1e-9);
        assert_relative_eq!(c.offset(), -3.5, epsilon = 1e-12);
    }

    #[test]
    fn range_edges_map_onto_each_other() {
        let ranges = [
            (CalibrationRange::loop_4_20ma(), CalibrationRange::new(0.0, 14.0)),
            (CalibrationRange::loop_4_20ma(), CalibrationRange::new(-2.0, 16.0)),
            (CalibrationRange::new(0.0, 0.020), CalibrationRange::new(-40.0, 125.0)),
            (CalibrationRange::new(-1.0, 3.5), CalibrationRange::new(1e-3, 2e-3)),
        ];
        for (current, value) in ranges {
            let c = LinearConverter::from_ranges(current, value).unwrap();
            assert_relative_eq!(c.convert(current.low), value.low, epsilon = 1e-9);
            assert_relative_eq!(c.convert(current.high), value.high, epsilon = 1e-9);
        }
    }

    #[test]
    fn convert_is_affine() {
        let c = ph_converter();
        let points = [(0.004, 0.020), (0.0, 0.1), (-0.003, 0.0125), (0.011, 0.011)];
        for (c1, c2) in points {
            for t in [0.0, 0.25, 0.5, 0.9, 1.0, 1.5] {
                let lhs = c.convert(t * c1 + (1.0 - t) * c2);
                let rhs = t * c.convert(c1) + (1.0 - t) * c.convert(c2);
                assert_relative_eq!(lhs, rhs, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn out_of_range_current_is_not_clamped() {
        let c = ph_converter();
        assert!(c.convert(0.0) < 0.0);
        assert!(c.convert(0.024) > 14.0);
        assert!(!c.in_calibration(0.0));
        assert!(c.in_calibration(0.012));
    }

    #[test]
    fn degenerate_current_range_is_rejected() {
        let err = LinearConverter::from_ranges(
            CalibrationRange::new(0.004, 0.004),
            CalibrationRange::new(0.0, 14.0),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::Degenerate { name: "current", .. }));
    }

    #[test]
    fn inverted_and_non_finite_ranges_are_rejected() {
        assert!(matches!(
            LinearConverter::from_ranges(
                CalibrationRange::loop_4_20ma(),
                CalibrationRange::new(14.0, 0.0),
            ),
            Err(CalibrationError::Inverted { name: "value", .. })
        ));
        assert!(matches!(
            LinearConverter::from_ranges(
                CalibrationRange::new(f64::NAN, 0.02),
                CalibrationRange::new(0.0, 14.0),
            ),
            Err(CalibrationError::NotFinite { .. })
        ));
    }

    #[test]
    fn slope_offset_form() {
        let c = LinearConverter::from_slope_offset(1125.0, -6.5).unwrap();
        assert_relative_eq!(c.convert(0.004), -2.0, epsilon = 1e-9);
        assert!(c.in_calibration(1.0));
        assert!(LinearConverter::from_slope_offset(0.0, 1.0).is_err());
        assert!(LinearConverter::from_slope_offset(f64::INFINITY, 1.0).is_err());
    }
}
