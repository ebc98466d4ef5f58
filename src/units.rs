//! Conversion between canonical small units and display units

use std::fmt;

use regex::Regex;

use crate::error::{CostingError, Result};
use crate::models::BaseUnit;

/// Decimal digits kept by conversions. A round trip is exact to within
/// `10^-PRECISION_DIGITS`.
pub const PRECISION_DIGITS: i32 = 6;

/// How quantities are shown and entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum MeasurementSystem {
    /// grams / milliliters
    MetricSmall,
    /// kilograms / liters
    #[default]
    MetricLarge,
}

impl fmt::Display for MeasurementSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MetricSmall => f.write_str("metric-small"),
            Self::MetricLarge => f.write_str("metric-large"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayUnit {
    Grams,
    Milliliters,
    Kilograms,
    Liters,
    Units,
}

impl DisplayUnit {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Grams => "g",
            Self::Milliliters => "ml",
            Self::Kilograms => "kg",
            Self::Liters => "l",
            Self::Units => "un",
        }
    }

    /// Canonical unit this display unit scales to.
    pub fn base_unit(self) -> BaseUnit {
        match self {
            Self::Grams | Self::Kilograms => BaseUnit::Grams,
            Self::Milliliters | Self::Liters => BaseUnit::Milliliters,
            Self::Units => BaseUnit::Units,
        }
    }

    fn factor(self) -> f64 {
        match self {
            Self::Kilograms | Self::Liters => 1000.0,
            Self::Grams | Self::Milliliters | Self::Units => 1.0,
        }
    }

    /// The measurement system this unit is native to. Discrete units belong to
    /// both and report the default.
    pub fn native_system(self) -> MeasurementSystem {
        match self {
            Self::Grams | Self::Milliliters => MeasurementSystem::MetricSmall,
            Self::Kilograms | Self::Liters | Self::Units => MeasurementSystem::MetricLarge,
        }
    }

    fn belongs_to(self, system: MeasurementSystem) -> bool {
        match self {
            Self::Units => true,
            Self::Grams | Self::Milliliters => system == MeasurementSystem::MetricSmall,
            Self::Kilograms | Self::Liters => system == MeasurementSystem::MetricLarge,
        }
    }
}

impl fmt::Display for DisplayUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl MeasurementSystem {
    /// Unit used to display quantities stored in `base`.
    pub fn display_unit(self, base: BaseUnit) -> DisplayUnit {
        match (self, base) {
            (_, BaseUnit::Units) => DisplayUnit::Units,
            (Self::MetricSmall, BaseUnit::Grams) => DisplayUnit::Grams,
            (Self::MetricSmall, BaseUnit::Milliliters) => DisplayUnit::Milliliters,
            (Self::MetricLarge, BaseUnit::Grams) => DisplayUnit::Kilograms,
            (Self::MetricLarge, BaseUnit::Milliliters) => DisplayUnit::Liters,
        }
    }
}

/// Round half away from zero at [`PRECISION_DIGITS`].
pub fn round_fixed(value: f64) -> f64 {
    let scale = 10f64.powi(PRECISION_DIGITS);
    (value * scale).round() / scale
}

/// Convert a value entered in `unit` into the canonical small unit.
pub fn to_canonical(value: f64, unit: DisplayUnit, system: MeasurementSystem) -> Result<f64> {
    if !unit.belongs_to(system) {
        return Err(CostingError::UnitMismatch {
            unit: unit.to_string(),
            system: system.to_string(),
        });
    }
    Ok(round_fixed(value * unit.factor()))
}

/// Convert a canonical value stored in `base` into the display unit of `system`.
pub fn from_canonical(value: f64, base: BaseUnit, system: MeasurementSystem) -> f64 {
    round_fixed(value / system.display_unit(base).factor())
}

/// Parse a user-entered measure such as `"1,5 kg"` or `"250g"`.
pub fn parse_measure(input: &str) -> Result<(f64, DisplayUnit)> {
    let re = Regex::new(r"(?i)^\s*(\d+(?:[.,]\d+)?)\s*(g|gr|grams?|ml|kg|l|lt|un|units?)\s*$")?;
    let caps = re
        .captures(input)
        .ok_or_else(|| CostingError::InvalidQuantity(format!("cannot parse measure '{input}'")))?;

    let value: f64 = caps[1]
        .replace(',', ".")
        .parse()
        .map_err(|_| CostingError::InvalidQuantity(format!("bad number in '{input}'")))?;

    let unit = match caps[2].to_ascii_lowercase().as_str() {
        "g" | "gr" | "gram" | "grams" => DisplayUnit::Grams,
        "ml" => DisplayUnit::Milliliters,
        "kg" => DisplayUnit::Kilograms,
        "l" | "lt" => DisplayUnit::Liters,
        _ => DisplayUnit::Units,
    };

    Ok((value, unit))
}

/// Parse a measure in any supported unit and return it in canonical form.
pub fn canonical_measure(input: &str) -> Result<(f64, BaseUnit)> {
    let (value, unit) = parse_measure(input)?;
    let canonical = to_canonical(value, unit, unit.native_system())?;
    Ok((canonical, unit.base_unit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-6;

    #[test]
    fn kilograms_round_trip() {
        let grams = to_canonical(5.0, DisplayUnit::Kilograms, MeasurementSystem::MetricLarge).unwrap();
        assert_eq!(grams, 5000.0);
        let back = from_canonical(grams, BaseUnit::Grams, MeasurementSystem::MetricLarge);
        assert!((back - 5.0).abs() < TOLERANCE);
    }

    #[test]
    fn round_trip_keeps_fractional_values() {
        let ml = to_canonical(0.3333333, DisplayUnit::Liters, MeasurementSystem::MetricLarge).unwrap();
        let back = from_canonical(ml, BaseUnit::Milliliters, MeasurementSystem::MetricLarge);
        assert!((back - 0.3333333).abs() < TOLERANCE);
    }

    #[test]
    fn units_pass_through() {
        for system in [MeasurementSystem::MetricSmall, MeasurementSystem::MetricLarge] {
            assert_eq!(to_canonical(12.0, DisplayUnit::Units, system).unwrap(), 12.0);
            assert_eq!(from_canonical(12.0, BaseUnit::Units, system), 12.0);
        }
    }

    #[test]
    fn small_system_is_identity() {
        let g = to_canonical(250.0, DisplayUnit::Grams, MeasurementSystem::MetricSmall).unwrap();
        assert_eq!(g, 250.0);
        assert_eq!(from_canonical(g, BaseUnit::Grams, MeasurementSystem::MetricSmall), 250.0);
    }

    #[test]
    fn unit_outside_system_is_rejected() {
        let err = to_canonical(1.0, DisplayUnit::Kilograms, MeasurementSystem::MetricSmall).unwrap_err();
        assert!(matches!(err, CostingError::UnitMismatch { .. }));
    }

    #[test]
    fn parses_measures() {
        assert_eq!(parse_measure("1,5 kg").unwrap(), (1.5, DisplayUnit::Kilograms));
        assert_eq!(parse_measure("250g").unwrap(), (250.0, DisplayUnit::Grams));
        assert_eq!(parse_measure("2 L").unwrap(), (2.0, DisplayUnit::Liters));
        assert_eq!(parse_measure("12 un").unwrap(), (12.0, DisplayUnit::Units));
        assert!(parse_measure("a lot").is_err());
        assert!(matches!(parse_measure("3 cups"), Err(CostingError::InvalidQuantity(_))));
    }

    #[test]
    fn pattern_errors_are_not_input_errors() {
        let err: CostingError = Regex::new("(").unwrap_err().into();
        assert!(matches!(err, CostingError::Pattern(_)));
    }

    #[test]
    fn canonical_measure_uses_the_units_own_system() {
        assert_eq!(canonical_measure("1,5 kg").unwrap(), (1500.0, BaseUnit::Grams));
        assert_eq!(canonical_measure("200 ml").unwrap(), (200.0, BaseUnit::Milliliters));
        assert_eq!(canonical_measure("6 un").unwrap(), (6.0, BaseUnit::Units));
    }
}
