//! Reference component models.
//!
//! A minimal catalog: enough linear elements, sources, a switch, a
//! decoupled line, two composites and a signal block to exercise the
//! [`Component`](crate::Component) contract end to end.

mod capacitor;
mod controlled_source;
mod current_source;
mod decoupling_line;
mod gain;
mod inductor;
mod pi_line;
mod resistor;
mod switch;
mod voltage_source;

pub use capacitor::Capacitor;
pub use controlled_source::ControlledVoltageSource;
pub use current_source::CurrentSource;
pub use decoupling_line::{DecouplingLine, DecouplingLineHalf};
pub use gain::Gain;
pub use inductor::Inductor;
pub use pi_line::PiLine;
pub use resistor::Resistor;
pub use switch::Switch;
pub use voltage_source::VoltageSource;

use crate::error::ComponentError;

/// Conductance standing in for a DC short in the operating-point solve.
pub(crate) const DC_SHORT: f64 = 1e6;

/// Conductance standing in for a DC open circuit.
pub(crate) const DC_OPEN: f64 = 1e-6;

pub(crate) fn positive(component: &str, parameter: &str, value: f64) -> Result<(), ComponentError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ComponentError::InvalidParameter {
            component: component.to_string(),
            parameter: parameter.to_string(),
            reason: format!("must be finite and positive, got {value}"),
        })
    }
}

pub(crate) fn non_negative(component: &str, parameter: &str, value: f64) -> Result<(), ComponentError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ComponentError::InvalidParameter {
            component: component.to_string(),
            parameter: parameter.to_string(),
            reason: format!("must be finite and non-negative, got {value}"),
        })
    }
}

/// Instantaneous value of the phasor `v` at `time`: `Re(v e^{j 2 pi f t})`.
pub(crate) fn instantaneous(v: kirch_core::Complex64, frequency: f64, time: f64) -> f64 {
    let theta = 2.0 * std::f64::consts::PI * frequency * time;
    v.re * theta.cos() - v.im * theta.sin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kirch_core::Complex64;

    #[test]
    fn rejects_non_positive_parameters() {
        assert!(positive("r1", "resistance", 1.0).is_ok());
        assert!(positive("r1", "resistance", 0.0).is_err());
        assert!(positive("r1", "resistance", f64::NAN).is_err());
        assert!(non_negative("s", "frequency", 0.0).is_ok());
        assert!(non_negative("s", "frequency", -1.0).is_err());
    }

    #[test]
    fn phasor_projection() {
        let v = Complex64::new(0.0, 2.0);
        assert_eq!(instantaneous(v, 0.0, 1.0), 0.0);
        // Quarter period of 50 Hz: e^{j pi/2} = j, so Re(2j * j) = -2.
        assert!((instantaneous(v, 50.0, 0.005) + 2.0).abs() < 1e-12);
    }
}
