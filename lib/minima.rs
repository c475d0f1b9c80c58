//! Classical minima of the two-mode flux-qubit potential.
//!
//! The potential is
//! ```text
//! V(φ1, φ2) = -EJ cos φ1 - EJ cos φ2 - α EJ cos(φ1 - φ2 + 2π f)
//! ```
//! and is searched for minima by running a local minimizer from a fixed
//! seed and then from a short "ramp" of extrapolated guesses
//! `(1.15 · 2πk/3, 2πk/3)` for `k = ±1, ±2, ±3`. Candidates are reduced
//! modulo 2π and kept only if they differ from every known minimum. The
//! search does not check curvature, so a seed that stalls on a saddle point
//! is accepted as a minimum; seeds are fixed, so extreme parameter regimes
//! may have minima that are never found.

use std::f64::consts::TAU;
use ndarray as nd;
use tracing::{ debug, warn };
use crate::{
    config::{ SolverConfig, VchosParams },
    error::{ VchosError, VchosResult },
    optimize::{ self, Minimization },
};

/// Fluxes this close to one half use the frustration-point seed.
const HALF_FLUX_TOL: f64 = 1e-12;

/// A classical minimum together with its potential energy.
#[derive(Clone, Debug, PartialEq)]
pub struct Minimum {
    /// Phase coordinates, each in `[0, 2π)`.
    pub phi: nd::Array1<f64>,
    pub potential: f64,
}

/// Potential energy at `(phi1, phi2)`.
pub fn potential(params: &VchosParams, phi1: f64, phi2: f64) -> f64 {
    -params.ej * phi1.cos()
        - params.ej * phi2.cos()
        - params.ej * params.alpha * (phi1 - phi2 + TAU * params.flux).cos()
}

/// Gradient of [`potential`].
pub fn potential_gradient(params: &VchosParams, phi1: f64, phi2: f64)
    -> [f64; 2]
{
    let coupling
        = params.ej * params.alpha * (phi1 - phi2 + TAU * params.flux).sin();
    [
        params.ej * phi1.sin() + coupling,
        params.ej * phi2.sin() - coupling,
    ]
}

/// Reduce a phase to `[0, 2π)`.
///
/// `rem_euclid` rounds tiny negative inputs up to exactly `2π`; those are
/// mapped to zero.
pub fn wrap_phase(phi: f64) -> f64 {
    let wrapped = phi.rem_euclid(TAU);
    if wrapped >= TAU { 0.0 } else { wrapped }
}

/// `false` if `candidate` coincides, coordinate by coordinate modulo 2π and
/// within `tol`, with any of `known`.
pub fn is_new_minimum(candidate: &nd::Array1<f64>, known: &[nd::Array1<f64>], tol: f64)
    -> bool
{
    let coincide = |minimum: &nd::Array1<f64>| {
        minimum.iter().zip(candidate.iter())
            .all(|(m, c)| {
                let d = (m - c).rem_euclid(TAU);
                d.abs() <= tol || (d - TAU).abs() <= tol
            })
    };
    !known.iter().any(coincide)
}

fn local_minimum(params: &VchosParams, guess: nd::Array1<f64>, config: &SolverConfig)
    -> Option<nd::Array1<f64>>
{
    let f = |phi: &nd::Array1<f64>| potential(params, phi[0], phi[1]);
    let grad = |phi: &nd::Array1<f64>| {
        nd::Array1::from(potential_gradient(params, phi[0], phi[1]).to_vec())
    };
    let gtol = config.minimizer.gtol * params.ej;
    match optimize::bfgs(f, grad, guess.clone(), gtol, &config.minimizer) {
        Minimization::Converged(phi) => Some(phi.mapv(wrap_phase)),
        Minimization::NotConverged(phi) => {
            debug!(
                "minimizer did not converge from ({:.4}, {:.4}); stopped at ({:.4}, {:.4})",
                guess[0], guess[1], phi[0], phi[1],
            );
            None
        },
    }
}

// one ramp seed; true if it found something new
fn ramp(
    params: &VchosParams,
    k: i32,
    minima: &mut Vec<nd::Array1<f64>>,
    config: &SolverConfig,
) -> bool
{
    let kf = k as f64;
    let guess = nd::array![1.15 * TAU * kf / 3.0, TAU * kf / 3.0];
    match local_minimum(params, guess, config) {
        Some(phi) if is_new_minimum(&phi, minima, config.dedup_tol) => {
            debug!("ramp k = {}: new minimum at ({:.6}, {:.6})", k, phi[0], phi[1]);
            minima.push(phi);
            true
        },
        _ => false,
    }
}

/// All distinct minima found by the seeded search, in discovery order.
pub fn find_minima(params: &VchosParams, config: &SolverConfig)
    -> VchosResult<Vec<nd::Array1<f64>>>
{
    let seed
        = if (params.flux - 0.5).abs() < HALF_FLUX_TOL {
            nd::array![0.15, 0.1]
        } else {
            nd::array![0.0, 0.0]
        };
    let mut minima: Vec<nd::Array1<f64>> = Vec::new();
    let mut attempts: usize = 1;
    match local_minimum(params, seed, config) {
        Some(phi) => { minima.push(phi); },
        None => { warn!("minimization from the initial seed did not converge"); },
    }
    for k in 1..=3 {
        let new_pos = ramp(params, k, &mut minima, config);
        let new_neg = ramp(params, -k, &mut minima, config);
        attempts += 2;
        if !new_pos && !new_neg { break; }
    }
    if minima.is_empty() {
        return Err(VchosError::NoMinimaFound { attempts });
    }
    debug!("found {} minima after {} attempts", minima.len(), attempts);
    Ok(minima)
}

/// Order minima by ascending potential energy; index 0 is the global minimum.
pub fn sorted_minima(params: &VchosParams, minima: Vec<nd::Array1<f64>>)
    -> Vec<Minimum>
{
    let mut minima: Vec<Minimum>
        = minima.into_iter()
        .map(|phi| {
            let potential = potential(params, phi[0], phi[1]);
            Minimum { phi, potential }
        })
        .collect();
    minima.sort_by(|l, r| l.potential.total_cmp(&r.potential));
    minima
}
