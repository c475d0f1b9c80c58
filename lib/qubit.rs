//! Variational, tight-binding description of a two-mode flux qubit in a basis
//! of squeezed harmonic-oscillator states localized at every classical
//! minimum of the potential (and all of their periodic images).
//!
//! Intermediate results (minima, normal modes, squeezing parameters, operator
//! tables and the three assembled matrices) are computed on first use and
//! then kept for the lifetime of the instance.

use std::cell::OnceCell;
use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::{ debug, info };
use crate::{
    config::{ RunConfig, SolverConfig, VchosParams },
    error::{ VchosError, VchosResult },
    ladder::LadderOps,
    minima::{ self, Minimum },
    normal_modes::{ self, NormalModes },
    operators::{ self, Assembler, DisplacementOps },
    spectrum::{ self, Eigensystem },
    squeezing::{
        PairOperators,
        SqueezingParams,
        SymplecticDecomposition,
        symplectic_decomposition,
    },
};

fn cached<T, F>(cell: &OnceCell<T>, init: F) -> VchosResult<&T>
where F: FnOnce() -> VchosResult<T>
{
    if let Some(val) = cell.get() { return Ok(val); }
    let val = init()?;
    Ok(cell.get_or_init(|| val))
}

/// Two-mode flux qubit solved with variational tight-binding squeezed
/// oscillator states.
#[derive(Debug)]
pub struct FluxQubitVchos {
    params: VchosParams,
    config: SolverConfig,
    ops: LadderOps,
    minima: OnceCell<Vec<Minimum>>,
    modes: OnceCell<NormalModes>,
    squeezing: OnceCell<Vec<SqueezingParams>>,
    pairs: OnceCell<Vec<Vec<PairOperators>>>,
    displacement: OnceCell<DisplacementOps>,
    overlap_mat: OnceCell<nd::Array2<C64>>,
    kinetic_mat: OnceCell<nd::Array2<C64>>,
    potential_mat: OnceCell<nd::Array2<C64>>,
}

impl FluxQubitVchos {
    /// Validate `params` and set up an instance with default numerical
    /// settings.
    pub fn new(params: VchosParams) -> VchosResult<Self> {
        Self::with_config(params, SolverConfig::default())
    }

    pub fn with_config(params: VchosParams, config: SolverConfig)
        -> VchosResult<Self>
    {
        params.validate()?;
        Ok(Self {
            params,
            config,
            ops: LadderOps::new(params.num_exc),
            minima: OnceCell::new(),
            modes: OnceCell::new(),
            squeezing: OnceCell::new(),
            pairs: OnceCell::new(),
            displacement: OnceCell::new(),
            overlap_mat: OnceCell::new(),
            kinetic_mat: OnceCell::new(),
            potential_mat: OnceCell::new(),
        })
    }

    pub fn from_run_config(run: &RunConfig) -> VchosResult<Self> {
        Self::with_config(run.qubit, run.solver)
    }

    pub fn params(&self) -> &VchosParams { &self.params }

    pub fn solver_config(&self) -> &SolverConfig { &self.config }

    /// Classical potential energy at `(phi1, phi2)`.
    pub fn potential(&self, phi1: f64, phi2: f64) -> f64 {
        minima::potential(&self.params, phi1, phi2)
    }

    /// Run the minima search afresh; minima are returned in discovery order.
    pub fn find_minima(&self) -> VchosResult<Vec<nd::Array1<f64>>> {
        minima::find_minima(&self.params, &self.config)
    }

    /// All found minima, ordered by potential energy with the global minimum
    /// first.
    pub fn sorted_minima(&self) -> VchosResult<&[Minimum]> {
        cached(&self.minima, || {
            let found = minima::sorted_minima(&self.params, self.find_minima()?);
            info!(
                "{} minima; global minimum at ({:.6}, {:.6})",
                found.len(), found[0].phi[0], found[0].phi[1],
            );
            Ok(found)
        })
        .map(|m| m.as_slice())
    }

    fn minimum(&self, i: usize) -> VchosResult<&Minimum> {
        let minima = self.sorted_minima()?;
        minima.get(i)
            .ok_or(VchosError::MinimumIndex { index: i, count: minima.len() })
    }

    /// Normal modes of the global minimum.
    pub fn normal_modes(&self) -> VchosResult<&NormalModes> {
        cached(&self.modes, || {
            let global = self.minimum(0)?;
            NormalModes::new(&self.params, &global.phi)
        })
    }

    pub fn capacitance_matrix(&self) -> nd::Array2<f64> {
        normal_modes::capacitance_matrix(&self.params)
    }

    pub fn ec_matrix(&self) -> VchosResult<nd::Array2<f64>> {
        normal_modes::ec_matrix(&self.params)
    }

    /// Potential curvature at minimum `i`, divided by `Φ0²`.
    pub fn gamma_matrix(&self, i: usize) -> VchosResult<nd::Array2<f64>> {
        Ok(normal_modes::gamma_matrix(&self.params, &self.minimum(i)?.phi))
    }

    /// Diagonal matrix of the global-minimum normal-mode frequencies.
    pub fn omega_matrix(&self) -> VchosResult<nd::Array2<f64>> {
        Ok(self.normal_modes()?.omega_matrix())
    }

    pub fn xi_matrix(&self) -> VchosResult<nd::Array2<f64>> {
        Ok(self.normal_modes()?.xi.clone())
    }

    pub fn delta_inv_matrix(&self) -> VchosResult<nd::Array2<f64>> {
        Ok(self.normal_modes()?.delta_inv_matrix())
    }

    /// Symplectic eigensystem of the quadratic Hamiltonian at minimum `i`.
    pub fn symplectic_decomposition(&self, i: usize)
        -> VchosResult<SymplecticDecomposition>
    {
        let phi = &self.minimum(i)?.phi;
        symplectic_decomposition(
            &self.params, self.normal_modes()?, phi, i, self.config.symplectic_tol)
    }

    fn squeezing_table(&self) -> VchosResult<&[SqueezingParams]> {
        cached(&self.squeezing, || {
            let count = self.sorted_minima()?.len();
            let mut table = Vec::with_capacity(count);
            table.push(SqueezingParams::unsqueezed());
            for i in 1..count {
                let dec = self.symplectic_decomposition(i)?;
                debug!("minimum {}: symplectic eigenvalues {:.6e}", i, dec.eigvals);
                table.push(SqueezingParams::from_decomposition(&dec)?);
            }
            Ok(table)
        })
        .map(|t| t.as_slice())
    }

    /// `(ρ, σ, τ)` for minimum `i`; all zero for the global minimum.
    pub fn squeezing_parameters(&self, i: usize) -> VchosResult<&SqueezingParams> {
        self.minimum(i)?;
        Ok(&self.squeezing_table()?[i])
    }

    fn pair_table(&self) -> VchosResult<&[Vec<PairOperators>]> {
        cached(&self.pairs, || {
            let xi_inv = &self.normal_modes()?.xi_inv;
            let sq = self.squeezing_table()?;
            sq.iter()
                .map(|left| {
                    sq.iter()
                        .map(|right| {
                            PairOperators::new(&self.ops, xi_inv, left, right, &self.config)
                        })
                        .collect::<VchosResult<Vec<PairOperators>>>()
                })
                .collect::<VchosResult<Vec<Vec<PairOperators>>>>()
        })
        .map(|p| p.as_slice())
    }

    fn assembler(&self) -> VchosResult<Assembler<'_>> {
        let assembler = Assembler {
            params: &self.params,
            modes: self.normal_modes()?,
            ops: &self.ops,
            minima: self.sorted_minima()?,
            pairs: self.pair_table()?,
        };
        debug!(
            "assembling {0}x{0} matrices over {1} lattice images",
            assembler.matrixdim(),
            (2 * self.params.kmax + 1).pow(2),
        );
        Ok(assembler)
    }

    /// Lowering operator of mode `mu` on the single-minimum Fock space.
    pub fn a_operator(&self, mu: usize) -> VchosResult<&nd::Array2<C64>> {
        self.ops.a(mu)
    }

    /// Fock-space dimension per minimum.
    pub fn hilbertdim(&self) -> usize { self.params.hilbertdim() }

    /// Dimension of the full variational basis.
    pub fn matrixdim(&self) -> VchosResult<usize> {
        Ok(self.hilbertdim() * self.sorted_minima()?.len())
    }

    /// Normal-ordered `exp(i φ_x)` in the global oscillator basis.
    pub fn normal_ordered_exp_i_phi_operator(&self, x: usize)
        -> VchosResult<nd::Array2<C64>>
    {
        operators::exp_i_phi_operator(&self.ops, self.normal_modes()?, x)
    }

    /// Normal-ordered `exp(i φ_x - i φ_y)` in the global oscillator basis.
    pub fn normal_ordered_exp_i_phix_mi_phiy(&self, x: usize, y: usize)
        -> VchosResult<nd::Array2<C64>>
    {
        operators::exp_i_phix_mi_phiy_operator(&self.ops, self.normal_modes()?, x, y)
    }

    fn displacement_ops(&self) -> VchosResult<&DisplacementOps> {
        cached(&self.displacement, || {
            DisplacementOps::new(&self.ops, self.normal_modes()?, self.params.kmax)
        })
    }

    /// Translation operator `V(φ)`.
    pub fn displacement_operator(&self, phi: &nd::Array1<f64>)
        -> VchosResult<nd::Array2<C64>>
    {
        self.displacement_ops()?.displacement(&self.ops, phi)
    }

    /// `V(2πk + minima_diff)`, reusing cached lattice translations.
    pub fn lattice_displacement_operator(
        &self,
        minima_diff: &nd::Array1<f64>,
        k: [i64; 2],
    ) -> VchosResult<nd::Array2<C64>>
    {
        self.displacement_ops()?.lattice_displacement(&self.ops, minima_diff, k)
    }

    /// Overlap matrix of the variational basis.
    pub fn inner_product(&self) -> VchosResult<&nd::Array2<C64>> {
        cached(&self.overlap_mat, || self.assembler()?.inner_product())
    }

    pub fn kineticmat(&self) -> VchosResult<&nd::Array2<C64>> {
        cached(&self.kinetic_mat, || self.assembler()?.kineticmat())
    }

    pub fn potentialmat(&self) -> VchosResult<&nd::Array2<C64>> {
        cached(&self.potential_mat, || self.assembler()?.potentialmat())
    }

    /// `kineticmat + potentialmat`
    pub fn hamiltonian(&self) -> VchosResult<nd::Array2<C64>> {
        Ok(self.kineticmat()? + self.potentialmat()?)
    }

    /// Lowest `count` eigenpairs of the Hamiltonian in the variational basis.
    pub fn eigensystem(&self, count: usize) -> VchosResult<Eigensystem> {
        let H = self.hamiltonian()?;
        let S = self.inner_product()?;
        let sys = spectrum::solve(&H, S, count, &self.config)?;
        info!("lowest eigenvalue {:.9e} ({:?} solver)", sys.evals[0], sys.tier);
        Ok(sys)
    }

    /// Lowest `count` eigenvalues, ascending.
    pub fn eigenvalues(&self, count: usize) -> VchosResult<nd::Array1<f64>> {
        Ok(self.eigensystem(count)?.evals)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;
    use crate::{ error::Stage, linalg };

    fn params(ecj: f64, alpha: f64, flux: f64, kmax: usize, num_exc: usize)
        -> VchosParams
    {
        VchosParams {
            ecj, ecg: 1.0, ej: 1.0,
            ng1: 0.0, ng2: 0.0,
            alpha, flux,
            kmax, num_exc,
        }
    }

    fn close(a: &nd::Array2<C64>, b: &nd::Array2<C64>, tol: f64) -> bool {
        linalg::max_abs(&(a - b)) <= tol
    }

    // every eigenvalue of the overlap matrix is real and non-negative
    fn is_positive_semidefinite(S: &nd::Array2<C64>) -> bool {
        let (vals, _) = linalg::eig(S, Stage::Eigensolve).unwrap();
        let scale = linalg::max_abs(S).max(1.0);
        vals.iter().all(|v| v.re >= -1e-10 * scale && v.im.abs() <= 1e-8 * scale)
    }

    #[test]
    fn single_minimum_reduces_to_oscillators() {
        let qubit = FluxQubitVchos::new(params(0.02, 0.7, 0.0, 1, 5)).unwrap();
        assert_eq!(qubit.sorted_minima().unwrap().len(), 1);
        assert_eq!(qubit.matrixdim().unwrap(), 36);
        let omega = qubit.normal_modes().unwrap().omega();
        let ident = linalg::eye(36);

        // periodic images are suppressed by exp(-|Xi⁻¹ 2πk|² / 4)
        assert!(close(qubit.inner_product().unwrap(), &ident, 1e-8));

        let mut kinetic: nd::Array2<C64> = nd::Array2::zeros((36, 36));
        for mu in 0..2 {
            let a = qubit.a_operator(mu).unwrap();
            let adag = linalg::dagger(a);
            let term
                = a.dot(a) * -2.0
                + adag.dot(a) * 4.0
                + adag.dot(&adag) * -2.0
                + &ident * 2.0;
            kinetic.scaled_add(C64::from(omega[mu] / 8.0), &term);
        }
        assert!(close(qubit.kineticmat().unwrap(), &kinetic, 1e-8));

        let p = qubit.params();
        let e0 = qubit.normal_ordered_exp_i_phi_operator(0).unwrap();
        let e1 = qubit.normal_ordered_exp_i_phi_operator(1).unwrap();
        let e01 = qubit.normal_ordered_exp_i_phix_mi_phiy(0, 1).unwrap();
        let mut potential: nd::Array2<C64> = &ident * ((2.0 + p.alpha) * p.ej);
        for op in [&e0, &e1] {
            potential.scaled_add(C64::from(-0.5 * p.ej), op);
            potential.scaled_add(C64::from(-0.5 * p.ej), &linalg::dagger(op));
        }
        potential.scaled_add(C64::from(-0.5 * p.alpha * p.ej), &e01);
        potential.scaled_add(C64::from(-0.5 * p.alpha * p.ej), &linalg::dagger(&e01));
        assert!(close(qubit.potentialmat().unwrap(), &potential, 1e-8));

        let (direct, _) = linalg::generalized_eigh(&(&kinetic + &potential), &ident).unwrap();
        let evals = qubit.eigenvalues(3).unwrap();
        for k in 0..3 {
            assert!((evals[k] - direct[k]).abs() <= 1e-6 * direct[k].abs());
        }
        // ground state sits near the zero-point energy of the two modes
        assert!((evals[0] - omega.sum() / 2.0).abs() < 0.1 * omega.sum());
    }

    #[test]
    fn periodic_images_converge() {
        let ground = |kmax: usize| -> f64 {
            FluxQubitVchos::new(params(0.2, 0.7, 0.0, kmax, 4)).unwrap()
                .eigenvalues(1).unwrap()[0]
        };
        let e0 = ground(0);
        let e1 = ground(1);
        let e2 = ground(2);
        assert!((e1 - e2).abs() < (e0 - e1).abs());
        assert!((e1 - e2).abs() < 1e-9);
    }

    #[test]
    fn larger_truncation_extends_matrices() {
        let small = FluxQubitVchos::new(params(0.02, 0.8, 0.49, 1, 2)).unwrap();
        let large = FluxQubitVchos::new(params(0.02, 0.8, 0.49, 1, 3)).unwrap();
        let nmin = small.sorted_minima().unwrap().len();
        assert!(nmin >= 2);
        assert_eq!(large.sorted_minima().unwrap().len(), nmin);
        let (ds, dl) = (small.hilbertdim(), large.hilbertdim());
        // |n0, n1> of minimum m
        let idx = |m: usize, n0: usize, n1: usize, nmax: usize, d: usize| {
            m * d + (nmax + 1) * n0 + n1
        };
        let Hs = small.hamiltonian().unwrap();
        let Hl = large.hamiltonian().unwrap();
        let Ss = small.inner_product().unwrap();
        let Sl = large.inner_product().unwrap();
        let hscale = linalg::max_abs(&Hs).max(1.0);
        for m in 0..nmin {
            for p in 0..nmin {
                for (n0, n1, k0, k1) in itertools::iproduct!(0..3, 0..3, 0..3, 0..3) {
                    let (rs, cs) = (idx(m, n0, n1, 2, ds), idx(p, k0, k1, 2, ds));
                    let (rl, cl) = (idx(m, n0, n1, 3, dl), idx(p, k0, k1, 3, dl));
                    assert!((Hs[[rs, cs]] - Hl[[rl, cl]]).norm() < 1e-6 * hscale);
                    assert!((Ss[[rs, cs]] - Sl[[rl, cl]]).norm() < 1e-6);
                }
            }
        }
    }

    #[test]
    fn deep_well_matches_harmonic_ladder() {
        // EJ / EC ~ 10^3: anharmonic shifts are a few percent of ω
        let mut p = params(0.001, 0.7, 0.0, 1, 4);
        p.ecg = 0.0025;
        let qubit = FluxQubitVchos::new(p).unwrap();
        assert_eq!(qubit.sorted_minima().unwrap().len(), 1);
        let omega = qubit.normal_modes().unwrap().omega();
        let mut ladder: Vec<f64>
            = itertools::iproduct!(0..3, 0..3)
            .map(|(n0, n1)| omega[0] * (n0 as f64 + 0.5) + omega[1] * (n1 as f64 + 0.5))
            .collect();
        ladder.sort_by(f64::total_cmp);
        let wmin = omega[0].min(omega[1]);
        let evals = qubit.eigenvalues(3).unwrap();
        for k in 0..3 {
            assert!((evals[k] - ladder[k]).abs() < 0.05 * wmin);
        }
        // the quartic term only lowers the levels
        assert!(evals[0] < ladder[0]);
        assert!(((evals[1] - evals[0]) - wmin).abs() < 0.05 * wmin);
    }

    #[test]
    fn truncation_corrections_shrink() {
        // in the symmetric single well the ground level only couples to
        // states with an even number of quanta in each mode, so the
        // truncation grows by two quanta per step
        let levels = |num_exc: usize| -> nd::Array1<f64> {
            let mut p = params(0.02, 0.7, 0.0, 0, num_exc);
            p.ecg = 0.05;
            FluxQubitVchos::new(p).unwrap().eigenvalues(3).unwrap()
        };
        let energies: Vec<nd::Array1<f64>>
            = [2, 4, 6].into_iter().map(levels).collect();
        for k in 0..3 {
            let d_first = energies[0][k] - energies[1][k];
            let d_second = energies[1][k] - energies[2][k];
            assert!(d_first >= -1e-10 && d_second >= -1e-10);
            assert!(d_second <= d_first + 1e-12);
        }
    }

    #[test]
    fn squeezed_double_well_is_hermitian_and_positive() {
        let qubit = FluxQubitVchos::new(params(0.02, 0.8, 0.49, 1, 2)).unwrap();
        assert!(qubit.sorted_minima().unwrap().len() >= 2);
        let sq = qubit.squeezing_parameters(1).unwrap();
        assert!(linalg::max_abs(&sq.rho) > 1e-6);
        let S = qubit.inner_product().unwrap();
        let H = qubit.hamiltonian().unwrap();
        assert!(linalg::is_hermitian(S, 1e-9));
        assert!(linalg::is_hermitian(&H, 1e-9));
        assert!(is_positive_semidefinite(S));
    }

    #[test]
    fn ground_energy_decreases_with_truncation() {
        let ground = |num_exc: usize| -> f64 {
            FluxQubitVchos::new(params(0.02, 0.8, 0.5, 1, num_exc)).unwrap()
                .eigenvalues(1).unwrap()[0]
        };
        let energies: Vec<f64> = (1..=4).map(ground).collect();
        for pair in energies.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9);
        }
    }

    #[test]
    fn frustration_point_is_unsqueezed_and_hermitian() {
        let qubit = FluxQubitVchos::new(params(0.02, 0.8, 0.5, 1, 3)).unwrap();
        let minima = qubit.sorted_minima().unwrap();
        assert_eq!(minima.len(), 2);
        // both wells have the same curvature
        let sq = qubit.squeezing_parameters(1).unwrap();
        assert!(linalg::max_abs(&sq.rho) < 1e-8);
        assert!(linalg::max_abs(&sq.sigma) < 1e-8);
        let S = qubit.inner_product().unwrap();
        let H = qubit.hamiltonian().unwrap();
        assert!(linalg::is_hermitian(S, 1e-10));
        assert!(linalg::is_hermitian(&H, 1e-10));
        assert!(is_positive_semidefinite(S));
        let evals = qubit.eigenvalues(2).unwrap();
        assert!(evals[0] <= evals[1]);
    }

    #[test]
    fn squeezed_minimum_is_symplectic() {
        let qubit = FluxQubitVchos::new(params(0.02, 0.8, 0.49, 0, 2)).unwrap();
        assert!(qubit.sorted_minima().unwrap().len() >= 2);
        let dec = qubit.symplectic_decomposition(1).unwrap();
        let K = crate::squeezing::symplectic_form();
        let dev = (&dec.M.t().dot(&K).dot(&dec.M) - &K)
            .iter().map(|x| x.abs()).fold(0.0, f64::max);
        assert!(dev < 1e-8);
        let sq = qubit.squeezing_parameters(1).unwrap();
        assert!(linalg::max_abs(&(&sq.rho - &sq.rho.t())) < 1e-9);
        let zero = qubit.squeezing_parameters(0).unwrap();
        assert_eq!(zero, &SqueezingParams::unsqueezed());
    }

    #[test]
    fn lattice_displacement_matches_direct() {
        let qubit = FluxQubitVchos::new(params(0.2, 0.7, 0.0, 1, 3)).unwrap();
        let diff = nd::array![0.3, -0.2];
        for k in [[1, -1], [-1, 0], [0, 0], [2, 1]] {
            let phi: nd::Array1<f64>
                = &diff + &nd::array![std::f64::consts::TAU * k[0] as f64, std::f64::consts::TAU * k[1] as f64];
            let direct = qubit.displacement_operator(&phi).unwrap();
            let cached = qubit.lattice_displacement_operator(&diff, k).unwrap();
            let scale = linalg::max_abs(&direct).max(f64::MIN_POSITIVE);
            assert!(linalg::max_abs(&(&direct - &cached)) <= 1e-9 * scale);
        }
    }

    #[test]
    fn errors_are_reported() {
        assert!(matches!(
            FluxQubitVchos::new(params(-0.02, 0.7, 0.0, 1, 2)),
            Err(VchosError::InvalidParams { name: "ecj", .. }),
        ));
        let qubit = FluxQubitVchos::new(params(0.02, 0.7, 0.0, 0, 2)).unwrap();
        assert!(matches!(
            qubit.squeezing_parameters(3),
            Err(VchosError::MinimumIndex { index: 3, count: 1 }),
        ));
        assert!(matches!(qubit.eigenvalues(0), Err(VchosError::InvalidCount { .. })));
        assert!(matches!(qubit.eigenvalues(10), Err(VchosError::InvalidCount { .. })));
        assert!(matches!(qubit.a_operator(2), Err(VchosError::ModeIndex(2))));
    }

    #[test]
    fn repeated_calls_are_stable() {
        let qubit = FluxQubitVchos::new(params(0.02, 0.8, 0.5, 1, 2)).unwrap();
        let first = qubit.eigenvalues(3).unwrap();
        let second = qubit.eigenvalues(3).unwrap();
        assert_eq!(first, second);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn single_well_matrices_are_hermitian(
            ng1 in -0.5..0.5_f64,
            ng2 in -0.5..0.5_f64,
        ) {
            let mut p = params(0.2, 0.7, 0.0, 1, 2);
            p.ng1 = ng1;
            p.ng2 = ng2;
            let qubit = FluxQubitVchos::new(p).unwrap();
            prop_assert!(linalg::is_hermitian(qubit.inner_product().unwrap(), 1e-10));
            prop_assert!(linalg::is_hermitian(&qubit.hamiltonian().unwrap(), 1e-10));
            prop_assert!(is_positive_semidefinite(qubit.inner_product().unwrap()));
        }

        #[test]
        fn double_well_matrices_are_hermitian(
            flux in 0.45..0.55_f64,
            ng1 in -0.5..0.5_f64,
        ) {
            let mut p = params(0.02, 0.8, flux, 1, 2);
            p.ng1 = ng1;
            let qubit = FluxQubitVchos::new(p).unwrap();
            let S = qubit.inner_product().unwrap();
            prop_assert!(linalg::is_hermitian(S, 1e-9));
            prop_assert!(linalg::is_hermitian(&qubit.hamiltonian().unwrap(), 1e-9));
            prop_assert!(is_positive_semidefinite(S));
        }
    }
}
