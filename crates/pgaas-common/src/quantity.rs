//! Kubernetes resource quantity parsing
//!
//! Supports binary suffixes (`Ki`..`Ei`), decimal suffixes (`n`, `u`, `m`,
//! `k`..`E`) and exponent notation (`1e3`). Values are compared as `f64`,
//! which is exact for every size a PVC or memory limit realistically uses.

use std::cmp::Ordering;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::{Error, Result};

/// Parse a quantity string into its base-unit value
pub fn parse_quantity(input: &str) -> Result<f64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    if number.is_empty() || number == "+" || number == "-" {
        return Err(invalid(input));
    }
    let base: f64 = number.parse().map_err(|_| invalid(input))?;

    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        exp if exp.starts_with(['e', 'E']) => {
            let power: i32 = exp[1..].parse().map_err(|_| invalid(input))?;
            10f64.powi(power)
        }
        _ => return Err(invalid(input)),
    };

    Ok(base * multiplier)
}

fn invalid(input: &str) -> Error {
    Error::validation(format!("invalid quantity: {input:?}"))
}

/// Compare two quantities by value
pub fn compare(a: &Quantity, b: &Quantity) -> Result<Ordering> {
    let (a, b) = (parse_quantity(&a.0)?, parse_quantity(&b.0)?);
    a.partial_cmp(&b)
        .ok_or_else(|| Error::validation("quantities are not comparable"))
}
