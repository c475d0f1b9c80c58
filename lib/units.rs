//! Physical constants in the natural units used by the circuit model
//! (`ħ = 1`, `e² = 4πα`).

use std::f64::consts::PI;

/// Fine-structure constant.
pub const FINE_STRUCTURE: f64 = 7.2973525693e-3;

/// Elementary charge.
pub fn elementary_charge() -> f64 { (4.0 * PI * FINE_STRUCTURE).sqrt() }

/// Resistance quantum `1 / (2e)²`.
pub fn impedance() -> f64 { 1.0 / (2.0 * elementary_charge()).powi(2) }

/// Reduced flux quantum `1 / 2e`.
pub fn flux_quantum() -> f64 { 1.0 / (2.0 * elementary_charge()) }
