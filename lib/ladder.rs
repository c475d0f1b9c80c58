//! Bosonic ladder operators for the two oscillator modes, truncated at a
//! fixed excitation number and embedded in the product Fock space.

use ndarray::{ self as nd, s, linalg::kron };
use num_complex::Complex64 as C64;
use crate::{
    NUM_MODES,
    error::{ Stage, VchosError, VchosResult },
    linalg,
};

/// Single-mode lowering operator on `nmax + 1` Fock states.
pub fn lowering(nmax: usize) -> nd::Array2<C64> {
    let n = nmax + 1;
    let mut a: nd::Array2<C64> = nd::Array2::zeros((n, n));
    a
        .slice_mut(s![..n - 1, 1..n])
        .diag_mut()
        .indexed_iter_mut()
        .for_each(|(k, elem)| { *elem = C64::from((k as f64 + 1.0).sqrt()); });
    a
}

/// Embed a single-mode operator at `mode_idx` in the product space of
/// `NUM_MODES` identical modes.
pub(crate) fn modekron(nmax: usize, mode_idx: usize, a: &nd::Array2<C64>)
    -> nd::Array2<C64>
{
    let n = nmax + 1;
    let eyesize1 = n.pow(mode_idx as u32);
    let eyesize2 = n.pow((NUM_MODES - mode_idx - 1) as u32);
    kron(&kron(&nd::Array2::eye(eyesize1), a), &nd::Array2::eye(eyesize2))
}

/// Creation and annihilation operators of every mode, plus products of them
/// that appear repeatedly during matrix assembly.
#[derive(Clone, Debug)]
pub struct LadderOps {
    num_exc: usize,
    a: [nd::Array2<C64>; NUM_MODES],
    adag: [nd::Array2<C64>; NUM_MODES],
}

impl LadderOps {
    pub fn new(num_exc: usize) -> Self {
        let a1 = lowering(num_exc);
        let a: [nd::Array2<C64>; NUM_MODES]
            = std::array::from_fn(|mu| modekron(num_exc, mu, &a1));
        let adag: [nd::Array2<C64>; NUM_MODES]
            = std::array::from_fn(|mu| a[mu].t().to_owned());
        Self { num_exc, a, adag }
    }

    pub fn num_exc(&self) -> usize { self.num_exc }

    /// Dimension of the product Fock space.
    pub fn dim(&self) -> usize { (self.num_exc + 1).pow(NUM_MODES as u32) }

    pub fn identity(&self) -> nd::Array2<C64> { linalg::eye(self.dim()) }

    /// Lowering operator of mode `mu`.
    pub fn a(&self, mu: usize) -> VchosResult<&nd::Array2<C64>> {
        self.a.get(mu).ok_or(VchosError::ModeIndex(mu))
    }

    /// Raising operator of mode `mu`.
    pub fn adag(&self, mu: usize) -> VchosResult<&nd::Array2<C64>> {
        self.adag.get(mu).ok_or(VchosError::ModeIndex(mu))
    }

    /// `Σ_μ c_μ a_μ^†`
    pub fn adag_combo(&self, c: &nd::Array1<C64>) -> nd::Array2<C64> {
        let mut acc: nd::Array2<C64> = nd::Array2::zeros((self.dim(), self.dim()));
        c.iter().zip(self.adag.iter())
            .for_each(|(cmu, adag)| { acc.scaled_add(*cmu, adag); });
        acc
    }

    /// `Σ_μ c_μ a_μ`
    pub fn a_combo(&self, c: &nd::Array1<C64>) -> nd::Array2<C64> {
        let mut acc: nd::Array2<C64> = nd::Array2::zeros((self.dim(), self.dim()));
        c.iter().zip(self.a.iter())
            .for_each(|(cmu, a)| { acc.scaled_add(*cmu, a); });
        acc
    }

    /// `Σ_ij c_ij a_i^† a_j^†`
    pub fn adag_adag_combo(&self, c: &nd::Array2<C64>) -> nd::Array2<C64> {
        let mut acc: nd::Array2<C64> = nd::Array2::zeros((self.dim(), self.dim()));
        c.indexed_iter()
            .for_each(|((i, j), cij)| {
                acc.scaled_add(*cij, &self.adag[i].dot(&self.adag[j]));
            });
        acc
    }

    /// `Σ_ij c_ij a_i a_j`
    pub fn a_a_combo(&self, c: &nd::Array2<C64>) -> nd::Array2<C64> {
        let mut acc: nd::Array2<C64> = nd::Array2::zeros((self.dim(), self.dim()));
        c.indexed_iter()
            .for_each(|((i, j), cij)| {
                acc.scaled_add(*cij, &self.a[i].dot(&self.a[j]));
            });
        acc
    }

    /// `exp(Σ_μ c_μ a_μ^†)`
    pub fn exp_adag(&self, c: &nd::Array1<C64>) -> VchosResult<nd::Array2<C64>> {
        linalg::expm(&self.adag_combo(c), Stage::MatrixAssembly)
    }

    /// `exp(Σ_μ c_μ a_μ)`
    pub fn exp_a(&self, c: &nd::Array1<C64>) -> VchosResult<nd::Array2<C64>> {
        linalg::expm(&self.a_combo(c), Stage::MatrixAssembly)
    }

    /// Normal-ordered form of `exp(Σ_ij x_ij a_i^† a_j)`.
    ///
    /// With `c = exp(x) - I` the operator equals `:exp(Σ_ij c_ij a_i^† a_j):`,
    /// summed as `Σ_k T_k / k!` where `T_0 = I` and
    /// `T_k = Σ_ij c_ij a_i^† T_{k-1} a_j`. Summation stops at the first term
    /// whose entries are all at most `tol`; exceeding `max_terms` is an error.
    pub fn normal_ordered_adag_a_exp(
        &self,
        x: &nd::Array2<C64>,
        tol: f64,
        max_terms: usize,
    ) -> VchosResult<nd::Array2<C64>>
    {
        let c: nd::Array2<C64>
            = linalg::expm(x, Stage::SqueezingTransform)? - linalg::eye(NUM_MODES);
        let mut result = self.identity();
        let mut term = self.identity();
        for k in 1..=max_terms {
            let mut next: nd::Array2<C64>
                = nd::Array2::zeros((self.dim(), self.dim()));
            for ((i, j), cij) in c.indexed_iter() {
                next.scaled_add(*cij, &self.adag[i].dot(&term).dot(&self.a[j]));
            }
            term = next / k as f64;
            result += &term;
            if linalg::max_abs(&term) <= tol {
                return Ok(result);
            }
        }
        Err(VchosError::NormalOrderingDiverged { terms: max_terms })
    }
}
