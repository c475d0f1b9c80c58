//! Generalized Hermitian eigenproblem `H x = E S x`.
//!
//! The dense LAPACK solver is tried first. When it fails (typically because
//! `S` is numerically singular) a shift-invert solve of `(H - σS)⁻¹ S` is
//! used instead, and every returned pair is checked against `H x = E S x`.

use ndarray as nd;
use num_complex::Complex64 as C64;
use tracing::{ debug, warn };
use crate::{
    config::SolverConfig,
    error::{ Stage, VchosError, VchosResult },
    linalg,
};

/// Which solver produced an eigensystem.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SolverTier {
    Dense,
    ShiftInvert,
}

/// Lowest eigenpairs of a generalized eigenproblem.
#[derive(Clone, Debug)]
pub struct Eigensystem {
    /// Ascending.
    pub evals: nd::Array1<f64>,
    /// Column `k` belongs to `evals[k]`.
    pub evecs: nd::Array2<C64>,
    pub tier: SolverTier,
}

/// Sort eigenpairs by ascending eigenvalue and fix each eigenvector's phase
/// so that its largest-magnitude component is real and positive.
pub fn order_eigensystem(evals: nd::Array1<f64>, evecs: nd::Array2<C64>)
    -> (nd::Array1<f64>, nd::Array2<C64>)
{
    let mut idx: Vec<usize> = (0..evals.len()).collect();
    idx.sort_by(|&i, &j| evals[i].total_cmp(&evals[j]));
    let evals_sorted: nd::Array1<f64> = idx.iter().map(|i| evals[*i]).collect();
    let mut evecs_sorted: nd::Array2<C64> = nd::Array2::zeros((evecs.nrows(), idx.len()));
    for (k, i) in idx.iter().enumerate() {
        let col = evecs.column(*i);
        let pivot
            = col.iter()
            .copied()
            .max_by(|a, b| a.norm().total_cmp(&b.norm()))
            .unwrap_or(C64::from(1.0));
        let phase
            = if pivot.norm() > 0.0 { pivot.conj() / pivot.norm() } else { C64::from(1.0) };
        evecs_sorted.column_mut(k).assign(&col.mapv(|z| z * phase));
    }
    (evals_sorted, evecs_sorted)
}

fn check_count(count: usize, dim: usize) -> VchosResult<()> {
    if count == 0 || count > dim {
        Err(VchosError::InvalidCount { requested: count, dim })
    } else {
        Ok(())
    }
}

fn vec_norm(x: &nd::Array1<C64>) -> f64 {
    x.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt()
}

/// Lowest `count` eigenpairs by shift-invert about `shift`.
///
/// Eigenvalues of `(H - σS)⁻¹ S` are `ν = 1 / (E - σ)`; the pairs with the
/// largest `|ν|` are those with `E` closest to `σ`. Directions in the null
/// space of `S` give `ν = 0` and are discarded.
pub fn shift_invert(
    H: &nd::Array2<C64>,
    S: &nd::Array2<C64>,
    count: usize,
    shift: f64,
    residual_tol: f64,
) -> VchosResult<(nd::Array1<f64>, nd::Array2<C64>)>
{
    let stage = Stage::Eigensolve;
    let dim = H.nrows();
    check_count(count, dim)?;
    let shifted: nd::Array2<C64> = H - &(S * shift);
    let op = linalg::inv(&shifted, stage)?.dot(S);
    let (nu, X) = linalg::eig(&op, stage)?;
    let nu_scale = nu.iter().map(|v| v.norm()).fold(0.0, f64::max);
    let mut idx: Vec<usize>
        = (0..dim)
        .filter(|k| nu[*k].norm() > f64::EPSILON * dim as f64 * nu_scale)
        .collect();
    idx.sort_by(|&i, &j| nu[j].norm().total_cmp(&nu[i].norm()));
    if idx.len() < count {
        return Err(VchosError::InvalidCount { requested: count, dim: idx.len() });
    }

    let mut evals: nd::Array1<f64> = nd::Array1::zeros(count);
    let mut evecs: nd::Array2<C64> = nd::Array2::zeros((dim, count));
    for (k, i) in idx.into_iter().take(count).enumerate() {
        let e = C64::from(shift) + C64::from(1.0) / nu[i];
        let mut x = X.column(i).to_owned();
        let s_norm = x.mapv(|z| z.conj()).dot(&S.dot(&x)).re;
        if s_norm > 0.0 {
            x /= C64::from(s_norm.sqrt());
        } else {
            let n = vec_norm(&x);
            x /= C64::from(n);
        }
        let hx = H.dot(&x);
        let sx = S.dot(&x);
        let residual
            = vec_norm(&(&hx - &(&sx * e.re)))
            / (vec_norm(&hx) + e.re.abs() * vec_norm(&sx)).max(f64::MIN_POSITIVE);
        if !residual.is_finite()
            || residual > residual_tol
            || e.im.abs() > residual_tol * e.re.abs().max(1.0)
        {
            return Err(VchosError::FallbackInaccurate { index: k, residual });
        }
        evals[k] = e.re;
        evecs.column_mut(k).assign(&x);
    }
    Ok(order_eigensystem(evals, evecs))
}

/// Lowest `count` eigenpairs of `H x = E S x`.
pub fn solve(
    H: &nd::Array2<C64>,
    S: &nd::Array2<C64>,
    count: usize,
    config: &SolverConfig,
) -> VchosResult<Eigensystem>
{
    check_count(count, H.nrows())?;
    match linalg::generalized_eigh(H, S) {
        Ok((evals, evecs)) => {
            let evals = evals.slice(nd::s![..count]).to_owned();
            let evecs = evecs.slice(nd::s![.., ..count]).to_owned();
            let (evals, evecs) = order_eigensystem(evals, evecs);
            debug!("dense eigensolve: lowest eigenvalue {:.9e}", evals[0]);
            Ok(Eigensystem { evals, evecs, tier: SolverTier::Dense })
        },
        Err(dense_err) => {
            warn!("dense eigensolve failed ({}); falling back to shift-invert", dense_err);
            match shift_invert(
                H, S, count, config.fallback_shift, config.fallback_residual_tol)
            {
                Ok((evals, evecs)) => {
                    Ok(Eigensystem { evals, evecs, tier: SolverTier::ShiftInvert })
                },
                Err(fallback_err) => Err(VchosError::Eigensolve {
                    dense: dense_err.to_string(),
                    fallback: fallback_err.to_string(),
                }),
            }
        },
    }
}
