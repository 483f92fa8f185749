use crate::{CalibrationError, LinearConverter};

/// Shunt resistor the loop current is measured across.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shunt {
    ohms: f64,
}

impl Shunt {
    pub fn new(ohms: f64) -> Result<Self, CalibrationError> {
        if !ohms.is_finite() || ohms <= 0.0 {
            return Err(CalibrationError::InvalidShunt(ohms));
        }
        Ok(Self { ohms })
    }

    pub fn ohms(&self) -> f64 {
        self.ohms
    }

    pub fn current(&self, voltage: f64) -> f64 {
        voltage / self.ohms
    }
}

/// One converted measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub voltage: f64, // V
    pub current: f64, // A
    pub value: f64,
}

/// Shunt followed by a transmitter transfer function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalChain {
    pub shunt: Shunt,
    pub converter: LinearConverter,
}

impl SignalChain {
    pub fn new(shunt: Shunt, converter: LinearConverter) -> Self {
        Self { shunt, converter }
    }

    pub fn evaluate(&self, voltage: f64) -> Reading {
        let current = self.shunt.current(voltage);
        Reading {
            voltage,
            current,
            value: self.converter.convert(current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CalibrationRange;
    use approx::assert_relative_eq;

    #[test]
    fn shunt_must_be_positive() {
        assert_eq!(Shunt::new(0.0), Err(CalibrationError::InvalidShunt(0.0)));
        assert_eq!(Shunt::new(-250.0), Err(CalibrationError::InvalidShunt(-250.0)));
        assert!(Shunt::new(f64::NAN).is_err());
        assert_relative_eq!(Shunt::new(250.0).unwrap().current(3.0), 0.012, epsilon = 1e-12);
    }

    #[test]
    fn full_chain() {
        let chain = SignalChain::new(
            Shunt::new(427.3).unwrap(),
            LinearConverter::from_ranges(
                CalibrationRange::loop_4_20ma(),
                CalibrationRange::new(0.0, 14.0),
            )
            .unwrap(),
        );
        let r = chain.evaluate(1.708);
        assert_relative_eq!(r.voltage, 1.708);
        assert_relative_eq!(r.current, 0.003_997_19, epsilon = 1e-8);
        assert!(r.value < 0.0 && r.value > -0.01, "value = {}", r.value);
    }
}
