//! Dense matrix functions and LAPACK wrappers shared by the rest of the
//! crate.
//!
//! All routines handing data to LAPACK first copy their inputs into
//! column-major (Fortran) layout.

use ndarray::{ self as nd, ShapeBuilder };
use ndarray_linalg::{ Determinant, Eig, EighInto, Inverse, UPLO };
use ndarray_linalg::error::LinalgError;
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::error::{ Stage, VchosError, VchosResult };

/// Condition numbers above this are treated as singular.
pub const MAX_CONDITION: f64 = 1e12;

const EXPM_MAX_TERMS: usize = 64;

/// Copy a matrix into column-major layout.
pub fn to_fortran<A>(a: &nd::Array2<A>) -> nd::Array2<A>
where A: Clone + Zero
{
    let mut f: nd::Array2<A> = nd::Array2::zeros(a.dim().f());
    f.assign(a);
    f
}

/// Complex identity matrix.
pub fn eye(n: usize) -> nd::Array2<C64> { nd::Array2::eye(n) }

/// Promote a real matrix to complex.
pub fn complexify<D>(a: &nd::Array<f64, D>) -> nd::Array<C64, D>
where D: nd::Dimension
{
    a.mapv(|x| C64::new(x, 0.0))
}

/// Largest entry magnitude.
pub fn max_abs<D>(a: &nd::Array<C64, D>) -> f64
where D: nd::Dimension
{
    a.iter().map(|x| x.norm()).fold(0.0, f64::max)
}

/// Maximum absolute row sum.
pub fn norm_inf(a: &nd::Array2<C64>) -> f64 {
    a.rows().into_iter()
        .map(|row| row.iter().map(|x| x.norm()).sum::<f64>())
        .fold(0.0, f64::max)
}

fn norm_inf_real(a: &nd::Array2<f64>) -> f64 {
    a.rows().into_iter()
        .map(|row| row.iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Conjugate transpose.
pub fn dagger(a: &nd::Array2<C64>) -> nd::Array2<C64> {
    a.t().mapv(|x| x.conj())
}

/// `true` if `a` equals its conjugate transpose to within `tol` relative to
/// its largest entry.
pub fn is_hermitian(a: &nd::Array2<C64>, tol: f64) -> bool {
    if a.nrows() != a.ncols() { return false; }
    let scale = max_abs(a).max(1.0);
    a.indexed_iter()
        .all(|((i, j), aij)| (aij - a[[j, i]].conj()).norm() <= tol * scale)
}

/// Matrix exponential by scaling and squaring around a truncated Taylor
/// series.
///
/// Fails on input with non-finite entries.
pub fn expm(a: &nd::Array2<C64>, stage: Stage) -> VchosResult<nd::Array2<C64>> {
    if let Some(x) = a.iter().find(|x| !x.is_finite()) {
        return Err(VchosError::IllConditioned {
            stage,
            reason: format!("exponential of a matrix with entry {}", x),
        });
    }
    let n = a.nrows();
    let norm = norm_inf(a);
    let squarings: i32
        = if norm > 0.5 { (norm / 0.5).log2().ceil() as i32 } else { 0 };
    let scaled: nd::Array2<C64> = a / 2.0_f64.powi(squarings);
    let mut result = eye(n);
    let mut term = eye(n);
    for k in 1..=EXPM_MAX_TERMS {
        term = term.dot(&scaled) / k as f64;
        result += &term;
        if max_abs(&term) <= f64::EPSILON * max_abs(&result) {
            break;
        }
    }
    for _ in 0..squarings {
        result = result.dot(&result);
    }
    Ok(result)
}

/// Principal matrix logarithm through an eigendecomposition.
///
/// Fails if `a` has an eigenvalue at zero or is too far from diagonalizable
/// for the eigenvector basis to be trusted.
pub fn logm(a: &nd::Array2<C64>, stage: Stage)
    -> VchosResult<nd::Array2<C64>>
{
    let scale = max_abs(a).max(f64::MIN_POSITIVE);
    let (vals, V): (nd::Array1<C64>, nd::Array2<C64>)
        = to_fortran(a).eig().map_err(VchosError::linalg(stage))?;
    if let Some(v) = vals.iter().find(|v| v.norm() <= 1e-14 * scale) {
        return Err(VchosError::IllConditioned {
            stage,
            reason: format!("logarithm of a matrix with eigenvalue {:.3e}", v),
        });
    }
    let V_inv = inv(&V, stage)?;
    let L = nd::Array2::from_diag(&vals.mapv(|v| v.ln()));
    Ok(V.dot(&L).dot(&V_inv))
}

/// Matrix inverse, rejecting near-singular input.
pub fn inv(a: &nd::Array2<C64>, stage: Stage) -> VchosResult<nd::Array2<C64>> {
    let a_inv = to_fortran(a).inv().map_err(VchosError::linalg(stage))?;
    let cond = norm_inf(a) * norm_inf(&a_inv);
    if !cond.is_finite() || cond > MAX_CONDITION {
        return Err(VchosError::IllConditioned {
            stage,
            reason: format!("inverse of a matrix with condition number {:.3e}", cond),
        });
    }
    Ok(a_inv)
}

/// Real matrix inverse, rejecting near-singular input.
pub fn inv_real(a: &nd::Array2<f64>, stage: Stage)
    -> VchosResult<nd::Array2<f64>>
{
    let a_inv = to_fortran(a).inv().map_err(VchosError::linalg(stage))?;
    let cond = norm_inf_real(a) * norm_inf_real(&a_inv);
    if !cond.is_finite() || cond > MAX_CONDITION {
        return Err(VchosError::IllConditioned {
            stage,
            reason: format!("inverse of a matrix with condition number {:.3e}", cond),
        });
    }
    Ok(a_inv)
}

/// Determinant.
pub fn det(a: &nd::Array2<C64>, stage: Stage) -> VchosResult<C64> {
    to_fortran(a).det().map_err(VchosError::linalg(stage))
}

/// Integer matrix power; negative powers go through the inverse.
pub fn mat_pow(a: &nd::Array2<C64>, k: i64, stage: Stage)
    -> VchosResult<nd::Array2<C64>>
{
    let mut base = if k < 0 { inv(a, stage)? } else { a.clone() };
    let mut e = k.unsigned_abs();
    let mut acc = eye(a.nrows());
    while e > 0 {
        if e & 1 == 1 { acc = acc.dot(&base); }
        e >>= 1;
        if e > 0 { base = base.dot(&base); }
    }
    Ok(acc)
}

/// Solve `H x = E S x` for Hermitian `H` and Hermitian positive-definite `S`.
///
/// Eigenvalues are returned in ascending order; eigenvectors are the columns
/// of the returned matrix, normalized so that `x^dag S x = 1`.
pub fn generalized_eigh(H: &nd::Array2<C64>, S: &nd::Array2<C64>)
    -> Result<(nd::Array1<f64>, nd::Array2<C64>), LinalgError>
{
    let (E, (V, _)) = (to_fortran(H), to_fortran(S)).eigh_into(UPLO::Lower)?;
    Ok((E, V))
}

/// Real symmetric counterpart of [`generalized_eigh`].
pub fn generalized_eigh_real(A: &nd::Array2<f64>, B: &nd::Array2<f64>)
    -> Result<(nd::Array1<f64>, nd::Array2<f64>), LinalgError>
{
    let (E, (V, _)) = (to_fortran(A), to_fortran(B)).eigh_into(UPLO::Lower)?;
    Ok((E, V))
}

/// General (non-Hermitian) eigendecomposition.
pub fn eig(a: &nd::Array2<C64>, stage: Stage)
    -> VchosResult<(nd::Array1<C64>, nd::Array2<C64>)>
{
    to_fortran(a).eig().map_err(VchosError::linalg(stage))
}

/// Eigendecomposition of a real matrix. Eigenvectors belonging to real
/// eigenvalues have vanishing imaginary parts.
pub fn eig_real(a: &nd::Array2<f64>, stage: Stage)
    -> VchosResult<(nd::Array1<C64>, nd::Array2<C64>)>
{
    to_fortran(a).eig().map_err(VchosError::linalg(stage))
}

/// Sum of diagonal elements.
pub fn trace(a: &nd::Array2<C64>) -> C64 {
    a.diag().iter().fold(C64::zero(), |acc, x| acc + x)
}

/// `x^T A y` without conjugation.
pub fn bilinear(x: &nd::Array1<C64>, A: &nd::Array2<C64>, y: &nd::Array1<C64>)
    -> C64
{
    x.dot(&A.dot(y))
}

/// Scalar `exp(z)` convenience for complex phases.
pub fn cis(phase: f64) -> C64 { C64::from_polar(1.0, phase) }

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;
    use num_traits::One;

    fn close(a: &nd::Array2<C64>, b: &nd::Array2<C64>, tol: f64) -> bool {
        max_abs(&(a - b)) <= tol
    }

    #[test]
    fn expm_of_diagonal() {
        let a = nd::array![
            [C64::new(1.0, 0.0), C64::zero()],
            [C64::zero(), C64::new(-3.0, PI)],
        ];
        let e = expm(&a, Stage::MatrixAssembly).unwrap();
        assert!((e[[0, 0]] - C64::new(1.0_f64.exp(), 0.0)).norm() < 1e-12);
        assert!((e[[1, 1]] - (-3.0_f64).exp() * C64::new(-1.0, 0.0)).norm() < 1e-12);
        assert!(e[[0, 1]].norm() < 1e-14 && e[[1, 0]].norm() < 1e-14);
    }

    #[test]
    fn expm_of_rotation_generator() {
        // exp(θ [[0, -1], [1, 0]]) is a rotation by θ
        let th = 7.3;
        let a = nd::array![
            [C64::zero(), C64::from(-th)],
            [C64::from(th), C64::zero()],
        ];
        let e = expm(&a, Stage::MatrixAssembly).unwrap();
        let r = nd::array![
            [C64::from(th.cos()), C64::from(-th.sin())],
            [C64::from(th.sin()), C64::from(th.cos())],
        ];
        assert!(close(&e, &r, 1e-11));
    }

    #[test]
    fn expm_of_nilpotent_is_finite_series() {
        let a = nd::array![
            [C64::zero(), C64::from(2.0), C64::zero()],
            [C64::zero(), C64::zero(), C64::from(3.0)],
            [C64::zero(), C64::zero(), C64::zero()],
        ];
        let e = expm(&a, Stage::MatrixAssembly).unwrap();
        let expected = nd::array![
            [C64::one(), C64::from(2.0), C64::from(3.0)],
            [C64::zero(), C64::one(), C64::from(3.0)],
            [C64::zero(), C64::zero(), C64::one()],
        ];
        assert!(close(&e, &expected, 1e-12));
    }

    #[test]
    fn expm_rejects_non_finite() {
        let mut a: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        a[[0, 1]] = C64::new(f64::INFINITY, 0.0);
        assert!(matches!(
            expm(&a, Stage::MatrixAssembly),
            Err(VchosError::IllConditioned { stage: Stage::MatrixAssembly, .. }),
        ));
        a[[0, 1]] = C64::new(0.0, f64::NAN);
        assert!(matches!(
            expm(&a, Stage::SqueezingTransform),
            Err(VchosError::IllConditioned { stage: Stage::SqueezingTransform, .. }),
        ));
    }

    #[test]
    fn logm_inverts_expm() {
        let a = nd::array![
            [C64::new(0.3, 0.1), C64::new(-0.2, 0.0)],
            [C64::new(0.15, 0.0), C64::new(-0.4, 0.05)],
        ];
        let l = logm(&expm(&a, Stage::SqueezingTransform).unwrap(), Stage::SqueezingTransform).unwrap();
        assert!(close(&l, &a, 1e-10));
        assert!(close(&logm(&eye(2), Stage::SqueezingTransform).unwrap(), &nd::Array2::zeros((2, 2)), 1e-14));
    }

    #[test]
    fn logm_rejects_singular() {
        let a = nd::array![
            [C64::one(), C64::from(2.0)],
            [C64::from(0.5), C64::one()],
        ];
        assert!(matches!(
            logm(&a, Stage::SqueezingTransform),
            Err(VchosError::IllConditioned { .. }),
        ));
    }

    #[test]
    fn inverse_and_powers() {
        let a = nd::array![
            [C64::new(2.0, 0.0), C64::new(1.0, 1.0)],
            [C64::new(0.0, -1.0), C64::new(3.0, 0.0)],
        ];
        let a_inv = inv(&a, Stage::MatrixAssembly).unwrap();
        assert!(close(&a.dot(&a_inv), &eye(2), 1e-12));
        let a3 = mat_pow(&a, 3, Stage::MatrixAssembly).unwrap();
        assert!(close(&a3, &a.dot(&a).dot(&a), 1e-10));
        let am2 = mat_pow(&a, -2, Stage::MatrixAssembly).unwrap();
        assert!(close(&am2.dot(&a).dot(&a), &eye(2), 1e-10));
        assert!(close(&mat_pow(&a, 0, Stage::MatrixAssembly).unwrap(), &eye(2), 0.0));
        let d = det(&a, Stage::MatrixAssembly).unwrap();
        assert!((d - C64::new(5.0, 1.0)).norm() < 1e-12);
    }

    #[test]
    fn inverse_rejects_singular() {
        let a = nd::array![[1.0, 2.0], [2.0, 4.0 + 1e-15]];
        assert!(inv_real(&a, Stage::NormalModes).is_err());
    }

    #[test]
    fn generalized_eigh_solves_pencil() {
        let H = nd::array![
            [C64::new(2.0, 0.0), C64::new(0.5, -0.5)],
            [C64::new(0.5, 0.5), C64::new(1.0, 0.0)],
        ];
        let S = nd::array![
            [C64::new(1.0, 0.0), C64::new(0.1, 0.2)],
            [C64::new(0.1, -0.2), C64::new(1.5, 0.0)],
        ];
        let (E, V) = generalized_eigh(&H, &S).unwrap();
        assert!(E[0] <= E[1]);
        for (k, e) in E.iter().enumerate() {
            let x = V.column(k).to_owned();
            let r = H.dot(&x) - S.dot(&x) * C64::from(*e);
            assert!(max_abs(&r) < 1e-12);
            let norm = x.mapv(|z| z.conj()).dot(&S.dot(&x));
            assert!((norm - C64::one()).norm() < 1e-12);
        }
    }

    #[test]
    fn hermitian_check() {
        let a = nd::array![
            [C64::new(1.0, 0.0), C64::new(0.0, 1.0)],
            [C64::new(0.0, -1.0), C64::new(2.0, 0.0)],
        ];
        assert!(is_hermitian(&a, 1e-14));
        let mut b = a.clone();
        b[[1, 0]] = C64::new(0.0, 1.0);
        assert!(!is_hermitian(&b, 1e-14));
        assert!(close(&dagger(&a), &a, 0.0));
    }
}
