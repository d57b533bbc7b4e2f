//! ZUp model catalog.
//!
//! Limits and argument formats come from the vendor's published tables (ZUp user manual
//! IA549-04-01R, tables 5.5.3, 5.5.4, 5.5.11 and 5.5.13). Voltage, UVP and OVP depend only on
//! the rated voltage; current depends on the exact voltage/current pair.

use crate::error::{Result, ZupError};
use crate::format::NumberFormat;
use phf::phf_map;

/// Inclusive range of values a supply accepts for a quantity, and how to format them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limit {
    pub min: f64,
    pub max: f64,
    pub format: NumberFormat,
}

impl Limit {
    const fn new(min: f64, max: f64, leading: usize, trailing: usize) -> Self {
        Limit {
            min,
            max,
            format: NumberFormat::new(leading, trailing),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

struct VoltageRating {
    rated: f64,
    format: NumberFormat,
    uvp: Limit,
    ovp: Limit,
}

struct CurrentRating {
    rated: f64,
    /// 105% of rated current.
    max: f64,
    format: NumberFormat,
}

static VOLTAGE_RATINGS: phf::Map<&'static str, VoltageRating> = phf_map! {
    "6" => VoltageRating {
        rated: 6.0,
        format: NumberFormat::new(1, 3),
        uvp: Limit::new(0.0, 5.98, 1, 2),
        ovp: Limit::new(0.2, 7.5, 1, 2),
    },
    "10" => VoltageRating {
        rated: 10.0,
        format: NumberFormat::new(2, 3),
        uvp: Limit::new(0.0, 9.97, 1, 2),
        ovp: Limit::new(0.5, 13.0, 2, 1),
    },
    "20" => VoltageRating {
        rated: 20.0,
        format: NumberFormat::new(2, 3),
        uvp: Limit::new(0.0, 19.9, 2, 1),
        ovp: Limit::new(1.0, 24.0, 2, 1),
    },
    "36" => VoltageRating {
        rated: 36.0,
        format: NumberFormat::new(2, 2),
        uvp: Limit::new(0.0, 35.9, 2, 1),
        ovp: Limit::new(1.8, 40.0, 2, 1),
    },
    "60" => VoltageRating {
        rated: 60.0,
        format: NumberFormat::new(2, 2),
        uvp: Limit::new(0.0, 59.8, 2, 1),
        ovp: Limit::new(3.0, 66.0, 2, 1),
    },
    "80" => VoltageRating {
        rated: 80.0,
        format: NumberFormat::new(2, 2),
        uvp: Limit::new(0.0, 79.8, 2, 1),
        ovp: Limit::new(4.0, 88.0, 2, 1),
    },
    "120" => VoltageRating {
        rated: 120.0,
        format: NumberFormat::new(3, 2),
        uvp: Limit::new(0.0, 119.8, 3, 1),
        ovp: Limit::new(6.0, 132.0, 3, 1),
    },
};

static CURRENT_RATINGS: phf::Map<&'static str, CurrentRating> = phf_map! {
    "6-33" => CurrentRating { rated: 33.0, max: 34.65, format: NumberFormat::new(2, 2) },
    "6-66" => CurrentRating { rated: 66.0, max: 69.30, format: NumberFormat::new(2, 2) },
    "6-132" => CurrentRating { rated: 132.0, max: 138.60, format: NumberFormat::new(3, 2) },
    "10-20" => CurrentRating { rated: 20.0, max: 21.0, format: NumberFormat::new(2, 3) },
    "10-40" => CurrentRating { rated: 40.0, max: 42.0, format: NumberFormat::new(2, 2) },
    "10-80" => CurrentRating { rated: 80.0, max: 84.0, format: NumberFormat::new(2, 2) },
    "20-10" => CurrentRating { rated: 10.0, max: 10.5, format: NumberFormat::new(2, 3) },
    "20-20" => CurrentRating { rated: 20.0, max: 21.0, format: NumberFormat::new(2, 3) },
    "20-40" => CurrentRating { rated: 40.0, max: 42.0, format: NumberFormat::new(2, 2) },
    "36-6" => CurrentRating { rated: 6.0, max: 6.3, format: NumberFormat::new(1, 3) },
    "36-12" => CurrentRating { rated: 12.0, max: 12.6, format: NumberFormat::new(2, 3) },
    "36-24" => CurrentRating { rated: 24.0, max: 25.2, format: NumberFormat::new(2, 3) },
    "60-3.5" => CurrentRating { rated: 3.5, max: 3.675, format: NumberFormat::new(1, 3) },
    "60-7" => CurrentRating { rated: 7.0, max: 7.35, format: NumberFormat::new(1, 3) },
    "60-14" => CurrentRating { rated: 14.0, max: 14.7, format: NumberFormat::new(2, 3) },
    "80-2.5" => CurrentRating { rated: 2.5, max: 2.625, format: NumberFormat::new(1, 4) },
    "80-5" => CurrentRating { rated: 5.0, max: 5.25, format: NumberFormat::new(1, 3) },
    "120-1.8" => CurrentRating { rated: 1.8, max: 1.89, format: NumberFormat::new(1, 4) },
    "120-3.6" => CurrentRating { rated: 3.6, max: 3.78, format: NumberFormat::new(1, 3) },
};

/// Ratings, limits and argument formats of one ZUp model.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplyModel {
    /// Model designation as reported by the supply, e.g. `36V-6A`.
    pub name: String,
    pub rated_voltage: f64,
    pub rated_current: f64,
    /// Set-point voltage, `[0, rated]`.
    pub voltage: Limit,
    /// Set-point current, `[0, 105% of rated]`.
    pub current: Limit,
    pub under_voltage_protection: Limit,
    pub over_voltage_protection: Limit,
}

impl SupplyModel {
    /// Resolves the reply to `:MDL?;`, e.g. `Nemic-Lambda ZUP(36V-6A)`.
    ///
    /// A reply without the `(<V>V-<A>A)` designation is a [`ZupError::ProtocolMismatch`];
    /// a well-formed designation missing from the catalog is a [`ZupError::UnknownModel`].
    pub fn resolve(reply: &str) -> Result<SupplyModel> {
        let reply = reply.trim_end_matches(['\r', '\n']);
        let (volts, amps) = parse_designation(reply).ok_or_else(|| ZupError::ProtocolMismatch {
            command: ":MDL?;".to_string(),
            expected: "<vendor> ZUP(<V>V-<A>A)".to_string(),
            reply: reply.to_string(),
        })?;
        let name = format!("{}V-{}A", volts, amps);
        let voltage = VOLTAGE_RATINGS
            .get(volts)
            .ok_or_else(|| ZupError::UnknownModel(name.clone()))?;
        let current = CURRENT_RATINGS
            .get(format!("{}-{}", volts, amps).as_str())
            .ok_or_else(|| ZupError::UnknownModel(name.clone()))?;

        Ok(SupplyModel {
            name,
            rated_voltage: voltage.rated,
            rated_current: current.rated,
            voltage: Limit {
                min: 0.0,
                max: voltage.rated,
                format: voltage.format,
            },
            current: Limit {
                min: 0.0,
                max: current.max,
                format: current.format,
            },
            under_voltage_protection: voltage.uvp,
            over_voltage_protection: voltage.ovp,
        })
    }
}

/// Splits `...(36V-6A)...` into `("36", "6")`.
fn parse_designation(reply: &str) -> Option<(&str, &str)> {
    let open = reply.find('(')?;
    let close = open + reply[open..].find(')')?;
    let inner = &reply[open + 1..close];
    let (volts, rest) = inner.split_once('V')?;
    let amps = rest.strip_prefix('-')?.strip_suffix('A')?;
    if volts.is_empty() || amps.is_empty() {
        return None;
    }
    Some((volts, amps))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_MODELS: [&str; 19] = [
        "6V-33A", "6V-66A", "6V-132A", "10V-20A", "10V-40A", "10V-80A", "20V-10A", "20V-20A",
        "20V-40A", "36V-6A", "36V-12A", "36V-24A", "60V-3.5A", "60V-7A", "60V-14A", "80V-2.5A",
        "80V-5A", "120V-1.8A", "120V-3.6A",
    ];

    #[test]
    fn resolves_every_catalog_model() {
        for name in ALL_MODELS {
            let reply = format!("Nemic-Lambda ZUP({})\r\n", name);
            let model = SupplyModel::resolve(&reply).unwrap();
            assert_eq!(model.name, name);
            assert_eq!(model.voltage.max, model.rated_voltage);
            assert!((model.current.max - model.rated_current * 1.05).abs() < 1e-9);
            assert!(model.over_voltage_protection.min > 0.0);
            assert!(model.under_voltage_protection.max < model.rated_voltage);
            // Resolution is pure.
            assert_eq!(SupplyModel::resolve(&reply).unwrap(), model);
        }
    }

    #[test]
    fn voltage_tables_are_shared_across_current_ratings() {
        let a = SupplyModel::resolve("Nemic-Lambda ZUP(20V-10A)").unwrap();
        let b = SupplyModel::resolve("Nemic-Lambda ZUP(20V-40A)").unwrap();
        assert_eq!(a.voltage, b.voltage);
        assert_eq!(a.over_voltage_protection, b.over_voltage_protection);
        assert_eq!(a.under_voltage_protection, b.under_voltage_protection);
        assert_ne!(a.current, b.current);
        assert_eq!(a.current.format, NumberFormat::new(2, 3));
        assert_eq!(b.current.format, NumberFormat::new(2, 2));
    }

    #[test]
    fn fractional_current_ratings() {
        let model = SupplyModel::resolve("TDK-Lambda ZUP(80V-2.5A)").unwrap();
        assert_eq!(model.rated_voltage, 80.0);
        assert_eq!(model.rated_current, 2.5);
        assert_eq!(model.current.format, NumberFormat::new(1, 4));
        assert_eq!(model.over_voltage_protection.min, 4.0);
        assert_eq!(model.over_voltage_protection.max, 88.0);
    }

    #[test]
    fn unknown_combination_is_rejected() {
        assert!(matches!(
            SupplyModel::resolve("Nemic-Lambda ZUP(20V-6A)"),
            Err(ZupError::UnknownModel(name)) if name == "20V-6A"
        ));
        assert!(matches!(
            SupplyModel::resolve("Nemic-Lambda ZUP(48V-6A)"),
            Err(ZupError::UnknownModel(_))
        ));
    }

    #[test]
    fn malformed_reply_is_a_protocol_mismatch() {
        for reply in ["", "Nemic-Lambda ZUP", "ZUP(36-6)", "ZUP(36V6A)", "ZUP(V-A)"] {
            assert!(
                matches!(SupplyModel::resolve(reply), Err(ZupError::ProtocolMismatch { .. })),
                "{:?}",
                reply
            );
        }
    }

    #[test]
    fn limit_is_inclusive() {
        let model = SupplyModel::resolve("Nemic-Lambda ZUP(6V-33A)").unwrap();
        assert!(model.over_voltage_protection.contains(0.2));
        assert!(model.over_voltage_protection.contains(7.5));
        assert!(!model.over_voltage_protection.contains(7.51));
        assert!(!model.over_voltage_protection.contains(0.19));
    }
}
