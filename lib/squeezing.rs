//! Symplectic (Bogoliubov) diagonalization of the local quadratic
//! Hamiltonian at each minimum, and the normal-ordered squeezing operators
//! shared by every matrix element between a pair of minima.
//!
//! At a minimum `φ_i` the potential is expanded to second order in the
//! oscillator frame of the global minimum,
//! ```text
//! Γ' = Φ0² Xiᵀ Γ(φ_i) Xi
//! ζ  = (Γ' + Ω) / 4
//! η  = (Γ' - Ω) / 4
//! h  = [[ζ, -η], [η, -ζ]]
//! ```
//! and `h` is diagonalized by a real symplectic matrix `M` satisfying
//! `Mᵀ K M = K`, `K = diag(I, -I)`. Writing `M = [[A, B], [B, A]]`, the
//! squeezing parameters of the minimum are
//! ```text
//! u = Aᵀ,  v = Bᵀ,  ρ = u⁻¹ v,  σ = log u,  τ = v u⁻¹
//! ```

use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use crate::{
    NUM_MODES,
    config::{ SolverConfig, VchosParams },
    error::{ Stage, VchosError, VchosResult },
    ladder::LadderOps,
    linalg,
    normal_modes::{ NormalModes, gamma_matrix },
    units,
};

/// Relative tolerance for matching `+λ` with `-λ`.
const PAIR_RTOL: f64 = 1e-5;

/// Quadratic Hamiltonian `[[ζ, -η], [η, -ζ]]` at `phi` in the global
/// normal-mode frame.
pub fn symplectic_hamiltonian(
    params: &VchosParams,
    modes: &NormalModes,
    phi: &nd::Array1<f64>,
) -> nd::Array2<f64>
{
    let n = NUM_MODES;
    let gamma = gamma_matrix(params, phi);
    let gamma_prime
        = modes.xi.t().dot(&gamma).dot(&modes.xi)
        * units::flux_quantum().powi(2);
    let omega = modes.omega_matrix();
    let zeta = (&gamma_prime + &omega) * 0.25;
    let eta = (&gamma_prime - &omega) * 0.25;
    let mut hmat: nd::Array2<f64> = nd::Array2::zeros((2 * n, 2 * n));
    hmat.slice_mut(s![..n, ..n]).assign(&zeta);
    hmat.slice_mut(s![..n, n..]).assign(&(-&eta));
    hmat.slice_mut(s![n.., ..n]).assign(&eta);
    hmat.slice_mut(s![n.., n..]).assign(&(-&zeta));
    hmat
}

/// `diag(I, -I)`
pub fn symplectic_form() -> nd::Array2<f64> {
    let n = NUM_MODES;
    let mut K: nd::Array2<f64> = nd::Array2::eye(2 * n);
    K.slice_mut(s![n.., n..]).mapv_inplace(|x| -x);
    K
}

/// Symplectic eigensystem of one minimum.
#[derive(Clone, Debug)]
pub struct SymplecticDecomposition {
    /// Positive eigenvalues, ordered by mode, followed by their negative
    /// partners in the same order.
    pub eigvals: nd::Array1<f64>,
    /// Columns are the symplectically normalized eigenvectors.
    pub M: nd::Array2<f64>,
}

impl SymplecticDecomposition {
    /// `Aᵀ`
    pub fn u(&self) -> nd::Array2<f64> {
        self.M.slice(s![..NUM_MODES, ..NUM_MODES]).t().to_owned()
    }

    /// `Bᵀ`
    pub fn v(&self) -> nd::Array2<f64> {
        self.M.slice(s![NUM_MODES.., ..NUM_MODES]).t().to_owned()
    }
}

// ⟨x, y⟩ = x_A · y_A - x_B · y_B
fn symplectic_dot(x: &nd::Array1<f64>, y: &nd::Array1<f64>) -> f64 {
    let n = NUM_MODES;
    x.slice(s![..n]).dot(&y.slice(s![..n]))
        - x.slice(s![n..]).dot(&y.slice(s![n..]))
}

/// Diagonalize the quadratic Hamiltonian at minimum number `minimum`
/// (located at `phi`) by a real symplectic transformation.
pub fn symplectic_decomposition(
    params: &VchosParams,
    modes: &NormalModes,
    phi: &nd::Array1<f64>,
    minimum: usize,
    tol: f64,
) -> VchosResult<SymplecticDecomposition>
{
    let n = NUM_MODES;
    let hmat = symplectic_hamiltonian(params, modes, phi);
    let (vals, vecs) = linalg::eig_real(&hmat, Stage::SqueezingTransform)?;
    let scale = vals.iter().map(|v| v.norm()).fold(0.0, f64::max).max(f64::MIN_POSITIVE);
    if let Some(v) = vals.iter().find(|v| v.im.abs() > tol * scale) {
        return Err(VchosError::DegenerateSymplecticSpectrum {
            minimum,
            reason: format!("complex eigenvalue {:.3e}", v),
        });
    }
    let re: Vec<f64> = vals.iter().map(|v| v.re).collect();

    let positive: Vec<usize> = (0..2 * n).filter(|k| re[*k] > 0.0).collect();
    if positive.len() != n {
        return Err(VchosError::DegenerateSymplecticSpectrum {
            minimum,
            reason: format!(
                "expected {} positive eigenvalues, found {}", n, positive.len()),
        });
    }

    // nearest unused negative partner for each positive eigenvalue
    let mut used: Vec<bool> = (0..2 * n).map(|k| re[k] > 0.0).collect();
    let mut partners: Vec<usize> = Vec::with_capacity(n);
    for &k in positive.iter() {
        let target = -re[k];
        let best
            = (0..2 * n)
            .filter(|j| !used[*j])
            .min_by(|&i, &j| {
                (re[i] - target).abs().total_cmp(&(re[j] - target).abs())
            });
        match best {
            Some(j) if (re[j] - target).abs() <= PAIR_RTOL * re[k] + tol * scale => {
                used[j] = true;
                partners.push(j);
            },
            _ => {
                return Err(VchosError::DegenerateSymplecticSpectrum {
                    minimum,
                    reason: format!("no partner for eigenvalue {:.6e}", re[k]),
                });
            },
        }
    }

    let mut cols: Vec<nd::Array1<f64>> = Vec::with_capacity(n);
    for &k in positive.iter() {
        let col = vecs.column(k);
        let norm = col.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
        if col.iter().any(|z| z.im.abs() > tol.sqrt() * norm) {
            return Err(VchosError::DegenerateSymplecticSpectrum {
                minimum,
                reason: "eigenvector is not real".into(),
            });
        }
        cols.push(col.mapv(|z| z.re));
    }

    // assign columns to modes by their dominant A component so that u stays
    // close to diagonal
    let mut weights: Vec<(f64, usize, usize)>
        = (0..n)
        .flat_map(|c| (0..n).map(move |mu| (c, mu)))
        .map(|(c, mu)| (cols[c][mu].abs(), mu, c))
        .collect();
    weights.sort_by(|l, r| r.0.total_cmp(&l.0));
    let mut mode_col: Vec<Option<usize>> = vec![None; n];
    let mut col_taken: Vec<bool> = vec![false; n];
    for (_, mu, c) in weights.into_iter() {
        if mode_col[mu].is_none() && !col_taken[c] {
            mode_col[mu] = Some(c);
            col_taken[c] = true;
        }
    }
    let order: Vec<usize> = mode_col.into_iter().flatten().collect();
    let mut cols: Vec<nd::Array1<f64>>
        = order.iter().map(|c| cols[*c].clone()).collect();
    let eigvals: nd::Array1<f64>
        = order.iter().map(|c| re[positive[*c]])
        .chain(order.iter().map(|c| re[partners[*c]]))
        .collect();

    for col in cols.iter_mut() {
        if col.sum() < 0.0 { col.mapv_inplace(|x| -x); }
    }
    for j in 0..n {
        for i in 0..j {
            let proj = symplectic_dot(&cols[i], &cols[j]);
            let upd = &cols[j] - &(&cols[i] * proj);
            cols[j] = upd;
        }
        let norm2 = symplectic_dot(&cols[j], &cols[j]);
        if !norm2.is_finite() || norm2 <= 0.0 {
            return Err(VchosError::SymplecticNormalization {
                minimum,
                reason: format!("column {} has symplectic norm² {:.3e}", j, norm2),
            });
        }
        cols[j] /= norm2.sqrt();
    }

    let mut M: nd::Array2<f64> = nd::Array2::zeros((2 * n, 2 * n));
    for (mu, col) in cols.iter().enumerate() {
        let a = col.slice(s![..n]);
        let b = col.slice(s![n..]);
        M.slice_mut(s![..n, mu]).assign(&a);
        M.slice_mut(s![n.., mu]).assign(&b);
        M.slice_mut(s![..n, n + mu]).assign(&b);
        M.slice_mut(s![n.., n + mu]).assign(&a);
    }

    let K = symplectic_form();
    let deviation
        = (&M.t().dot(&K).dot(&M) - &K).iter()
        .map(|x| x.abs())
        .fold(0.0, f64::max);
    let mscale = M.iter().map(|x| x * x).fold(1.0, f64::max);
    if !deviation.is_finite() || deviation > tol * mscale {
        return Err(VchosError::SymplecticNormalization {
            minimum,
            reason: format!("Mᵀ K M deviates from K by {:.3e}", deviation),
        });
    }
    Ok(SymplecticDecomposition { eigvals, M })
}

/// Squeezing parameters `(ρ, σ, τ)` of one minimum.
#[derive(Clone, Debug, PartialEq)]
pub struct SqueezingParams {
    pub rho: nd::Array2<C64>,
    pub sigma: nd::Array2<C64>,
    pub tau: nd::Array2<C64>,
}

impl SqueezingParams {
    /// No squeezing; used for the global minimum.
    pub fn unsqueezed() -> Self {
        let zero: nd::Array2<C64> = nd::Array2::zeros((NUM_MODES, NUM_MODES));
        Self { rho: zero.clone(), sigma: zero.clone(), tau: zero }
    }

    pub fn from_decomposition(dec: &SymplecticDecomposition) -> VchosResult<Self> {
        let stage = Stage::SqueezingTransform;
        let u = linalg::complexify(&dec.u());
        let v = linalg::complexify(&dec.v());
        let u_inv = linalg::inv(&u, stage)?;
        Ok(Self {
            rho: u_inv.dot(&v),
            sigma: linalg::logm(&u, stage)?,
            tau: v.dot(&u_inv),
        })
    }
}

/// Everything in a matrix element between minima `m` (bra, unprimed) and
/// `p` (ket, primed) that does not depend on the periodic image.
#[derive(Clone, Debug)]
pub struct PairOperators {
    pub rhoprime: nd::Array2<C64>,
    /// `(I - ρρ')⁻¹ ρ`
    pub deltarho: nd::Array2<C64>,
    /// `exp(Δρ̄) = (I - ρ'ρ)⁻¹`
    pub exp_deltarhobar: nd::Array2<C64>,
    pub zp: nd::Array2<C64>,
    pub zpp: nd::Array2<C64>,
    /// `exp(-σ)`
    pub exp_sigma: nd::Array2<C64>,
    /// `exp(-σ')`
    pub exp_sigmaprime: nd::Array2<C64>,
    /// `det(I - ρρ')^(-1/2)`
    pub scale: C64,
    /// `exp(-tr σ / 2 - tr σ' / 2)`
    pub trace_factor: C64,
    pub exp_adag_adag: nd::Array2<C64>,
    pub exp_a_a: nd::Array2<C64>,
    pub exp_adag_a: nd::Array2<C64>,
}

impl PairOperators {
    pub fn new(
        ops: &LadderOps,
        xi_inv: &nd::Array2<f64>,
        left: &SqueezingParams,
        right: &SqueezingParams,
        config: &SolverConfig,
    ) -> VchosResult<Self>
    {
        let stage = Stage::SqueezingTransform;
        let eye = linalg::eye(NUM_MODES);
        let rho = &left.rho;
        let rhoprime = right.rho.clone();

        let one_m_rrp = &eye - &rho.dot(&rhoprime);
        let inv_rrp = linalg::inv(&one_m_rrp, stage)?;
        let inv_rpr = linalg::inv(&(&eye - &rhoprime.dot(rho)), stage)?;
        let deltarho = inv_rrp.dot(rho);
        let deltarhoprime = inv_rpr.dot(&rhoprime);
        let exp_deltarhobar = inv_rpr;

        let z: nd::Array2<C64>
            = linalg::complexify(&xi_inv.t().to_owned())
            * C64::new(0.0, std::f64::consts::FRAC_1_SQRT_2);
        let dsym = &deltarho + &deltarho.t();
        let zp
            = &z
            + &(z.dot(&rhoprime).dot(&dsym) * 0.5)
            + &(z.dot(&dsym) * 0.5);
        let zpp = z.dot(&rhoprime) + &z;

        let exp_sigma = linalg::expm(&(-&left.sigma), stage)?;
        let exp_sigmaprime = linalg::expm(&(-&right.sigma), stage)?;

        let pf_adag_adag
            = (&left.tau.t() - &exp_sigma.t().dot(&deltarhoprime).dot(&exp_sigma))
            * 0.5;
        let pf_a_a
            = (&right.tau - &exp_sigmaprime.t().dot(&deltarho).dot(&exp_sigmaprime))
            * 0.5;
        let pf_adag_a
            = linalg::logm(
                &exp_sigma.t().dot(&exp_deltarhobar).dot(&exp_sigmaprime),
                stage,
            )?;
        let exp_adag_adag = linalg::expm(&ops.adag_adag_combo(&pf_adag_adag), stage)?;
        let exp_a_a = linalg::expm(&ops.a_a_combo(&pf_a_a), stage)?;
        let exp_adag_a
            = ops.normal_ordered_adag_a_exp(
                &pf_adag_a,
                config.normal_order_tol,
                config.normal_order_max_terms,
            )?;

        let scale = C64::from(1.0) / linalg::det(&one_m_rrp, stage)?.sqrt();
        let trace_factor
            = (-0.5 * linalg::trace(&left.sigma) - 0.5 * linalg::trace(&right.sigma))
            .exp();

        Ok(Self {
            rhoprime,
            deltarho,
            exp_deltarhobar,
            zp,
            zpp,
            exp_sigma,
            exp_sigmaprime,
            scale,
            trace_factor,
            exp_adag_adag,
            exp_a_a,
            exp_adag_a,
        })
    }

    /// `exp(-σ)ᵀ exp(Δρ̄)`
    pub fn exp_sdrb(&self) -> nd::Array2<C64> {
        self.exp_sigma.t().dot(&self.exp_deltarhobar)
    }
}
