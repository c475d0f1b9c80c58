//! Matrix elements of the overlap, kinetic, and potential operators between
//! squeezed, displaced oscillator states, summed over periodic images.
//!
//! Every block `(m, p)` of a `matrixdim × matrixdim` matrix is a sum over the
//! lattice `k ∈ [-kmax, kmax]²` of terms
//! ```text
//! e^{-i ng·δ} e^{-¼ |Xi⁻¹ δ|²} e^{-½ tr σ - ½ tr σ'} · E†† · X(k) · Eaa
//! δ = 2πk - (φ_m - φ_p)
//! ```
//! where `E†† = exp(a†ᵀ P a†)`, `Eaa = exp(aᵀ Q a)` come from the
//! [`PairOperators`] of the pair and `X(k)` depends on the operator.

use std::f64::consts::{ FRAC_1_SQRT_2, TAU };
use itertools::Itertools;
use ndarray as nd;
use num_complex::Complex64 as C64;
use rustc_hash::FxHashMap as HashMap;
use crate::{
    NUM_MODES,
    config::VchosParams,
    error::{ Stage, VchosError, VchosResult },
    ladder::LadderOps,
    linalg,
    minima::Minimum,
    normal_modes::NormalModes,
    squeezing::PairOperators,
};

/// All `(j, k)` with `-kmax <= j, k <= kmax`.
pub fn lattice(kmax: usize) -> impl Iterator<Item = [i64; 2]> {
    let k = kmax as i64;
    (-k..=k).cartesian_product(-k..=k).map(|(j, l)| [j, l])
}

fn imag_sqrt2(v: nd::ArrayView1<f64>) -> nd::Array1<C64> {
    v.mapv(|x| C64::new(0.0, x * FRAC_1_SQRT_2))
}

fn real_sqrt2(v: &nd::Array1<f64>) -> nd::Array1<C64> {
    v.mapv(|x| C64::new(x * FRAC_1_SQRT_2, 0.0))
}

/// Normal-ordered `exp(i φ_x)`.
pub fn exp_i_phi_operator(ops: &LadderOps, modes: &NormalModes, x: usize)
    -> VchosResult<nd::Array2<C64>>
{
    if x >= NUM_MODES { return Err(VchosError::ModeIndex(x)); }
    let row = modes.xi.row(x);
    let c = imag_sqrt2(row);
    let pref = (-0.25 * row.dot(&row)).exp();
    Ok(ops.exp_adag(&c)?.dot(&ops.exp_a(&c)?) * pref)
}

/// Normal-ordered `exp(i φ_x - i φ_y)`.
pub fn exp_i_phix_mi_phiy_operator(
    ops: &LadderOps,
    modes: &NormalModes,
    x: usize,
    y: usize,
) -> VchosResult<nd::Array2<C64>>
{
    if x >= NUM_MODES { return Err(VchosError::ModeIndex(x)); }
    if y >= NUM_MODES { return Err(VchosError::ModeIndex(y)); }
    let rx = modes.xi.row(x);
    let ry = modes.xi.row(y);
    let diff = &rx - &ry;
    let c = imag_sqrt2(diff.view());
    let pref = (-0.25 * diff.dot(&diff)).exp();
    Ok(ops.exp_adag(&c)?.dot(&ops.exp_a(&c)?) * pref)
}

/// Translation operators `V(φ) = exp(-⅛ φᵀ Δ⁻¹ φ) exp(Σ_μ (Xi⁻¹ φ)_μ a_μ / √2)`,
/// with the lattice part built from cached integer powers.
#[derive(Clone, Debug)]
pub struct DisplacementOps {
    xi_inv: nd::Array2<f64>,
    delta_inv: nd::Array2<f64>,
    // exp(±2π Σ_μ Xi⁻¹[μ, x] a_μ / √2) for each coordinate x
    unit: Vec<nd::Array2<C64>>,
    unit_inv: Vec<nd::Array2<C64>>,
    powers: HashMap<(usize, i64), nd::Array2<C64>>,
}

impl DisplacementOps {
    /// Precompute lattice powers `-kmax..=kmax` for every coordinate.
    pub fn new(ops: &LadderOps, modes: &NormalModes, kmax: usize)
        -> VchosResult<Self>
    {
        let xi_inv = modes.xi_inv.clone();
        let delta_inv = modes.delta_inv_matrix();
        let generator = |sign: f64| -> VchosResult<Vec<nd::Array2<C64>>> {
            (0..NUM_MODES)
                .map(|x| {
                    let c = xi_inv.column(x)
                        .mapv(|v| C64::from(sign * TAU * v * FRAC_1_SQRT_2));
                    ops.exp_a(&c)
                })
                .collect()
        };
        let unit = generator(1.0)?;
        let unit_inv = generator(-1.0)?;
        let mut this = Self {
            xi_inv, delta_inv, unit, unit_inv, powers: HashMap::default(),
        };
        let k = kmax as i64;
        for x in 0..NUM_MODES {
            for j in -k..=k {
                let pow = this.compute_power(x, j)?;
                this.powers.insert((x, j), pow);
            }
        }
        Ok(this)
    }

    // negative powers go through the negated generator, not an inverse
    fn compute_power(&self, x: usize, j: i64) -> VchosResult<nd::Array2<C64>> {
        let base = if j < 0 { &self.unit_inv[x] } else { &self.unit[x] };
        linalg::mat_pow(base, j.abs(), Stage::MatrixAssembly)
    }

    fn power(&self, x: usize, j: i64) -> VchosResult<nd::Array2<C64>> {
        match self.powers.get(&(x, j)) {
            Some(pow) => Ok(pow.clone()),
            None => self.compute_power(x, j),
        }
    }

    fn prefactor(&self, phi: &nd::Array1<f64>) -> f64 {
        (-0.125 * phi.dot(&self.delta_inv.dot(phi))).exp()
    }

    /// `V(φ)` by direct exponentiation.
    pub fn displacement(&self, ops: &LadderOps, phi: &nd::Array1<f64>)
        -> VchosResult<nd::Array2<C64>>
    {
        let c = real_sqrt2(&self.xi_inv.dot(phi));
        Ok(ops.exp_a(&c)? * self.prefactor(phi))
    }

    /// `V(2πk + minima_diff)` using cached lattice powers.
    pub fn lattice_displacement(
        &self,
        ops: &LadderOps,
        minima_diff: &nd::Array1<f64>,
        k: [i64; NUM_MODES],
    ) -> VchosResult<nd::Array2<C64>>
    {
        let phi: nd::Array1<f64>
            = minima_diff + &nd::Array1::from_iter(k.iter().map(|j| TAU * *j as f64));
        let exp_min_diff = ops.exp_a(&real_sqrt2(&self.xi_inv.dot(minima_diff)))?;
        let mut lattice_part = linalg::eye(ops.dim());
        for (x, j) in k.iter().enumerate() {
            lattice_part = lattice_part.dot(&self.power(x, *j)?);
        }
        Ok(exp_min_diff.dot(&lattice_part) * self.prefactor(&phi))
    }
}

// geometry of one periodic image for the pair (m, p)
struct Image {
    phibar: nd::Array1<f64>,
    w: nd::Array1<f64>,
    common: C64,
}

// scalar and linear pieces of one displaced Gaussian overlap
struct Overlap {
    alpha: C64,
    yrhop: nd::Array1<C64>,
    dpp: nd::Array1<C64>,
    pf_adag: nd::Array1<C64>,
    pf_a: nd::Array1<C64>,
}

fn overlap(pair: &PairOperators, x: &nd::Array1<C64>, y: &nd::Array1<C64>)
    -> Overlap
{
    let yrhop = y.dot(&pair.rhoprime);
    let xm = x - &yrhop;
    let alpha
        = pair.scale
        * (-0.5 * (y.dot(&yrhop) + xm.dot(&pair.deltarho.dot(&xm)))).exp();
    let dsym = &pair.deltarho + &pair.deltarho.t();
    let dpp = xm.dot(&dsym) * 0.5;
    let pf_adag = xm.dot(&pair.exp_deltarhobar.t().dot(&pair.exp_sigma));
    let pf_a = (y - &dpp).dot(&pair.exp_sigmaprime);
    Overlap { alpha, yrhop, dpp, pf_adag, pf_a }
}

/// Assembles the three Hamiltonian-sized matrices from per-pair operator
/// tables.
pub struct Assembler<'a> {
    pub params: &'a VchosParams,
    pub modes: &'a NormalModes,
    pub ops: &'a LadderOps,
    pub minima: &'a [Minimum],
    /// `pairs[m][p]`
    pub pairs: &'a [Vec<PairOperators>],
}

impl<'a> Assembler<'a> {
    pub fn matrixdim(&self) -> usize { self.ops.dim() * self.minima.len() }

    fn image(&self, m: usize, p: usize, k: [i64; 2]) -> Image {
        let phik: nd::Array1<f64> = k.iter().map(|j| TAU * *j as f64).collect();
        let phi_m = &self.minima[m].phi;
        let phi_p = &self.minima[p].phi;
        let delta: nd::Array1<f64> = &phik - &(phi_m - phi_p);
        let phibar: nd::Array1<f64> = (&phik + &(phi_m + phi_p)) * 0.5;
        let w = self.modes.xi_inv.dot(&delta);
        let ng = nd::Array1::from(self.params.ng().to_vec());
        let common
            = C64::new(-0.25 * w.dot(&w), -ng.dot(&delta)).exp();
        Image { phibar, w, common }
    }

    // α exp(a†·pf_adag) N exp(a·pf_a)
    fn gaussian(&self, pair: &PairOperators, ov: &Overlap)
        -> VchosResult<nd::Array2<C64>>
    {
        Ok(
            self.ops.exp_adag(&ov.pf_adag)?
                .dot(&pair.exp_adag_a)
                .dot(&self.ops.exp_a(&ov.pf_a)?)
                * ov.alpha
        )
    }

    fn helper(&self, pair: &PairOperators, x: &nd::Array1<C64>, y: &nd::Array1<C64>)
        -> VchosResult<nd::Array2<C64>>
    {
        self.gaussian(pair, &overlap(pair, x, y))
    }

    fn assemble<F>(&self, mut element: F) -> VchosResult<nd::Array2<C64>>
    where F: FnMut(usize, usize, &PairOperators, &Image) -> VchosResult<nd::Array2<C64>>
    {
        let hdim = self.ops.dim();
        let mut mat: nd::Array2<C64>
            = nd::Array2::zeros((self.matrixdim(), self.matrixdim()));
        for (m, row) in self.pairs.iter().enumerate() {
            for (p, pair) in row.iter().enumerate() {
                let mut block = mat.slice_mut(
                    nd::s![m * hdim..(m + 1) * hdim, p * hdim..(p + 1) * hdim]);
                for k in lattice(self.params.kmax) {
                    let image = self.image(m, p, k);
                    let inner = element(m, p, pair, &image)?;
                    let term
                        = pair.exp_adag_adag.dot(&inner).dot(&pair.exp_a_a)
                        * (pair.trace_factor * image.common);
                    block += &term;
                }
            }
        }
        Ok(mat)
    }

    /// Overlap matrix `S` of the non-orthogonal basis.
    pub fn inner_product(&self) -> VchosResult<nd::Array2<C64>> {
        self.assemble(|_, _, pair, image| {
            let x = real_sqrt2(&image.w);
            let y = -&x;
            self.helper(pair, &x, &y)
        })
    }

    /// Charging-energy part of the Hamiltonian.
    pub fn kineticmat(&self) -> VchosResult<nd::Array2<C64>> {
        let ops = self.ops;
        let ec = linalg::complexify(&self.modes.ec_mat);
        let xi_inv_t = linalg::complexify(&self.modes.xi_inv.t().to_owned());
        let z: nd::Array2<C64> = &xi_inv_t * C64::new(0.0, FRAC_1_SQRT_2);

        // image-independent operator and coefficient tables per pair
        let mut cores: Vec<Vec<(nd::Array2<C64>, nd::Array2<C64>, nd::Array2<C64>)>>
            = Vec::with_capacity(self.pairs.len());
        for row in self.pairs.iter() {
            let mut core_row = Vec::with_capacity(row.len());
            for pair in row.iter() {
                let N = &pair.exp_adag_a;
                let sdrb = pair.exp_sdrb();
                let zp = &pair.zp;
                let zpp = &pair.zpp;
                let esp = &pair.exp_sigmaprime;
                let c1 = esp.t().dot(&zp.t()).dot(&ec).dot(zp).dot(esp);
                let c2 = sdrb.dot(&zpp.t()).dot(&ec).dot(zp).dot(esp);
                let c3 = sdrb.dot(&zpp.t()).dot(&ec).dot(zpp).dot(&sdrb.t());
                let c4 = zpp.t().dot(&ec).dot(zp);
                let d1 = ec.dot(zp).dot(esp);
                let d2 = ec.dot(zpp).dot(&sdrb.t());

                let mut core: nd::Array2<C64>
                    = N.dot(&ops.a_a_combo(&c1)) * 4.0
                    + ops.adag_adag_combo(&c3).dot(N) * 4.0;
                core.scaled_add(c4.sum() * -4.0, N);
                for ((i, j), cij) in c2.indexed_iter() {
                    let adag_N_a = ops.adag(i)?.dot(N).dot(ops.a(j)?);
                    core.scaled_add(*cij * -8.0, &adag_N_a);
                }
                core_row.push((core, d1, d2));
            }
            cores.push(core_row);
        }

        self.assemble(|m, p, pair, image| {
            let (core, d1, d2) = &cores[m][p];
            let N = &pair.exp_adag_a;
            let x = real_sqrt2(&image.w);
            let y = -&x;
            let ov = overlap(pair, &x, &y);
            let shift = pair.rhoprime.dot(&ov.dpp) - &ov.yrhop + &ov.dpp;
            let eps: nd::Array1<C64>
                = -z.dot(&shift)
                - xi_inv_t.dot(&image.w.mapv(C64::from)) * C64::new(0.0, 0.5);
            let l1 = eps.dot(d1);
            let l2 = eps.dot(d2);
            let constant = linalg::bilinear(&eps, &ec, &eps) * 4.0;
            let mut kin: nd::Array2<C64> = core.clone();
            kin.scaled_add(C64::from(-8.0), &N.dot(&ops.a_combo(&l1)));
            kin.scaled_add(C64::from(8.0), &ops.adag_combo(&l2).dot(N));
            kin.scaled_add(constant, N);
            Ok(
                ops.exp_adag(&ov.pf_adag)?
                    .dot(&kin)
                    .dot(&ops.exp_a(&ov.pf_a)?)
                    * ov.alpha
            )
        })
    }

    /// Josephson part of the Hamiltonian, offset by `(2 + α) EJ` times the
    /// overlap so that each cosine enters as `1 - cos`.
    pub fn potentialmat(&self) -> VchosResult<nd::Array2<C64>> {
        let ej = self.params.ej;
        let alpha = self.params.alpha;
        let xi = &self.modes.xi;
        let rows: Vec<nd::Array1<C64>>
            = (0..NUM_MODES).map(|n| imag_sqrt2(xi.row(n))).collect();
        let prefs: Vec<f64>
            = (0..NUM_MODES).map(|n| (-0.25 * xi.row(n).dot(&xi.row(n))).exp()).collect();
        let diff = &xi.row(0) - &xi.row(1);
        let diff_c = imag_sqrt2(diff.view());
        let pref_c = (-0.25 * diff.dot(&diff)).exp();
        let flux_phase = TAU * self.params.flux;

        self.assemble(|_, _, pair, image| {
            let w = real_sqrt2(&image.w);
            let mut acc = self.helper(pair, &w, &(-&w))? * ((2.0 + alpha) * ej);
            for (n, (row, pref)) in rows.iter().zip(prefs.iter()).enumerate() {
                let x = &w + row;
                let y = -&w + row;
                let phase = linalg::cis(image.phibar[n]);
                let fwd = self.helper(pair, &x, &y)?;
                let bwd = self.helper(pair, &x.mapv(|z| z.conj()), &y.mapv(|z| z.conj()))?;
                acc.scaled_add(-0.5 * ej * pref * phase, &fwd);
                acc.scaled_add(-0.5 * ej * pref * phase.conj(), &bwd);
            }
            let x = &w + &diff_c;
            let y = -&w + &diff_c;
            let phase = linalg::cis(flux_phase + image.phibar[0] - image.phibar[1]);
            let fwd = self.helper(pair, &x, &y)?;
            let bwd = self.helper(pair, &x.mapv(|z| z.conj()), &y.mapv(|z| z.conj()))?;
            acc.scaled_add(-0.5 * alpha * ej * pref_c * phase, &fwd);
            acc.scaled_add(-0.5 * alpha * ej * pref_c * phase.conj(), &bwd);
            Ok(acc)
        })
    }
}
