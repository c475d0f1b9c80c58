//! Capacitance, linearized potential, and the normal-mode oscillator basis
//! at the global minimum.

use std::f64::consts::TAU;
use ndarray as nd;
use tracing::debug;
use crate::{
    NUM_MODES,
    config::VchosParams,
    error::{ Stage, VchosError, VchosResult },
    linalg,
    units,
};

/// Relative tolerance on the `Xi^T C Xi = Ω^-1 / Z0` check.
const XI_CHECK_TOL: f64 = 1e-8;

/// Node capacitance matrix.
pub fn capacitance_matrix(params: &VchosParams) -> nd::Array2<f64> {
    let e = units::elementary_charge();
    let cj = e.powi(2) / (2.0 * params.ecj);
    let cg = e.powi(2) / (2.0 * params.ecg);
    let diag = cj + params.alpha * cj + cg;
    let off = -params.alpha * cj;
    nd::array![[diag, off], [off, diag]]
}

/// Charging-energy matrix `½ e² C⁻¹`.
pub fn ec_matrix(params: &VchosParams) -> VchosResult<nd::Array2<f64>> {
    let e = units::elementary_charge();
    let cinv = linalg::inv_real(&capacitance_matrix(params), Stage::NormalModes)?;
    Ok(cinv * (0.5 * e.powi(2)))
}

/// Second derivative of the potential at `phi`, divided by `Φ0²`.
pub fn gamma_matrix(params: &VchosParams, phi: &nd::Array1<f64>) -> nd::Array2<f64> {
    let g = params.ej / units::flux_quantum().powi(2);
    let c = (TAU * params.flux + phi[0] - phi[1]).cos();
    let g00 = g * phi[0].cos() + params.alpha * g * c;
    let g11 = g * phi[1].cos() + params.alpha * g * c;
    let g01 = -params.alpha * g * c;
    nd::array![[g00, g01], [g01, g11]]
}

/// Normal-mode data of the global minimum.
#[derive(Clone, Debug)]
pub struct NormalModes {
    pub cmat: nd::Array2<f64>,
    pub ec_mat: nd::Array2<f64>,
    /// Squared normal-mode frequencies, ascending.
    pub omega_sq: nd::Array1<f64>,
    /// Oscillator-length matrix; column `i` belongs to mode `i`.
    pub xi: nd::Array2<f64>,
    pub xi_inv: nd::Array2<f64>,
}

impl NormalModes {
    /// Solve `Γ v = ω² C v` at `global_min` and build `Xi`.
    pub fn new(params: &VchosParams, global_min: &nd::Array1<f64>)
        -> VchosResult<Self>
    {
        let cmat = capacitance_matrix(params);
        let ec_mat = ec_matrix(params)?;
        let gamma = gamma_matrix(params, global_min);
        let (omega_sq, V)
            = linalg::generalized_eigh_real(&gamma, &cmat)
            .map_err(VchosError::linalg(Stage::NormalModes))?;
        if let Some(w2) = omega_sq.iter().find(|w2| **w2 <= 0.0) {
            return Err(VchosError::NonPositiveFrequency { omega_sq: *w2 });
        }
        let z0 = units::impedance();
        let mut xi: nd::Array2<f64> = nd::Array2::zeros((NUM_MODES, NUM_MODES));
        xi.columns_mut().into_iter()
            .zip(V.columns())
            .zip(omega_sq.iter())
            .for_each(|((mut xi_col, v), w2)| {
                xi_col.assign(&(&v * (w2.powf(-0.25) / z0.sqrt())));
            });
        let xi_inv = linalg::inv_real(&xi, Stage::NormalModes)?;
        let modes = Self { cmat, ec_mat, omega_sq, xi, xi_inv };
        modes.check()?;
        debug!("normal-mode frequencies {:.6e}", modes.omega());
        Ok(modes)
    }

    fn check(&self) -> VchosResult<()> {
        let z0 = units::impedance();
        let lhs = self.xi.t().dot(&self.cmat).dot(&self.xi);
        let rhs = nd::Array2::from_diag(&self.omega().mapv(|w| 1.0 / (w * z0)));
        let scale = rhs.iter().map(|x| x.abs()).fold(0.0, f64::max);
        let deviation = (&lhs - &rhs).iter().map(|x| x.abs()).fold(0.0, f64::max);
        if !deviation.is_finite() || deviation > XI_CHECK_TOL * scale {
            return Err(VchosError::NormalModeCheck { deviation });
        }
        Ok(())
    }

    /// Normal-mode frequencies.
    pub fn omega(&self) -> nd::Array1<f64> { self.omega_sq.mapv(f64::sqrt) }

    pub fn omega_matrix(&self) -> nd::Array2<f64> {
        nd::Array2::from_diag(&self.omega())
    }

    /// `Xi⁻ᵀ Xi⁻¹`
    pub fn delta_inv_matrix(&self) -> nd::Array2<f64> {
        self.xi_inv.t().dot(&self.xi_inv)
    }

    /// Charging-energy matrix in the oscillator frame, `Xi⁻¹ EC Xi⁻ᵀ`.
    pub fn ec_matrix_transformed(&self) -> nd::Array2<f64> {
        self.xi_inv.dot(&self.ec_mat).dot(&self.xi_inv.t())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn params(ecj: f64, ecg: f64, alpha: f64) -> VchosParams {
        VchosParams {
            ecj, ecg, ej: 1.0,
            ng1: 0.0, ng2: 0.0,
            alpha, flux: 0.0,
            kmax: 0, num_exc: 2,
        }
    }

    #[test]
    fn capacitance_is_symmetric_positive() {
        let c = capacitance_matrix(&params(0.02, 1.0, 0.7));
        assert_eq!(c[[0, 1]], c[[1, 0]]);
        assert!(c[[0, 0]] > c[[0, 1]].abs());
    }

    #[test]
    fn ec_inverts_capacitance() {
        let p = params(0.05, 0.5, 0.6);
        let e2 = units::elementary_charge().powi(2);
        let prod = ec_matrix(&p).unwrap().dot(&capacitance_matrix(&p));
        let eye: nd::Array2<f64> = nd::Array2::eye(2) * (0.5 * e2);
        assert!((&prod - &eye).iter().all(|x| x.abs() < 1e-14));
    }

    #[test]
    fn charging_frame_is_diagonal() {
        // Xi⁻¹ EC Xi⁻ᵀ = Ω / 8
        let p = params(0.02, 1.0, 0.7);
        let modes = NormalModes::new(&p, &nd::array![0.0, 0.0]).unwrap();
        let k = modes.ec_matrix_transformed();
        let omega = modes.omega();
        assert!((k[[0, 0]] - omega[0] / 8.0).abs() < 1e-12);
        assert!((k[[1, 1]] - omega[1] / 8.0).abs() < 1e-12);
        assert!(k[[0, 1]].abs() < 1e-12);
    }

    #[test]
    fn rejects_unstable_point() {
        // (π, π) is a saddle at zero flux
        let p = params(0.02, 1.0, 0.7);
        assert!(matches!(
            NormalModes::new(&p, &nd::array![std::f64::consts::PI, std::f64::consts::PI]),
            Err(VchosError::NonPositiveFrequency { .. }),
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn xi_reproduces_inverse_frequencies(
            ecj in 0.01..0.5_f64,
            ecg in 0.1..5.0_f64,
            alpha in 0.0..0.45_f64,
        ) {
            // the origin is a minimum for zero flux and α < 1/2
            let p = params(ecj, ecg, alpha);
            let modes = NormalModes::new(&p, &nd::array![0.0, 0.0]).unwrap();
            let z0 = units::impedance();
            let lhs = modes.xi.t().dot(&modes.cmat).dot(&modes.xi);
            let omega = modes.omega();
            for i in 0..2 {
                for j in 0..2 {
                    let rhs = if i == j { 1.0 / (omega[i] * z0) } else { 0.0 };
                    prop_assert!((lhs[[i, j]] - rhs).abs() <= 1e-9 * (1.0 / (omega[0] * z0)).max(1.0 / (omega[1] * z0)));
                }
            }
            let ident = modes.xi.dot(&modes.xi_inv);
            prop_assert!((ident[[0, 0]] - 1.0).abs() < 1e-10 && ident[[0, 1]].abs() < 1e-10);
        }
    }
}
