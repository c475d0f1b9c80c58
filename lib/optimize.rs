//! Unconstrained local minimization.

use ndarray as nd;
use crate::config::MinimizerConfig;

/// Outcome of a local minimization.
#[derive(Clone, Debug, PartialEq)]
pub enum Minimization {
    Converged(nd::Array1<f64>),
    NotConverged(nd::Array1<f64>),
}

impl Minimization {
    pub fn converged(self) -> Option<nd::Array1<f64>> {
        match self {
            Self::Converged(x) => Some(x),
            Self::NotConverged(_) => None,
        }
    }
}

fn max_norm(x: &nd::Array1<f64>) -> f64 {
    x.iter().map(|xk| xk.abs()).fold(0.0, f64::max)
}

fn outer(a: &nd::Array1<f64>, b: &nd::Array1<f64>) -> nd::Array2<f64> {
    let a = a.view().insert_axis(nd::Axis(1));
    let b = b.view().insert_axis(nd::Axis(0));
    a.dot(&b)
}

/// BFGS quasi-Newton minimization of `f` with analytic gradient `grad`.
///
/// Steps are capped at `config.max_step` and chosen by Armijo backtracking.
/// Converges when every gradient component is at most `gtol` in magnitude.
pub fn bfgs<F, G>(
    f: F,
    grad: G,
    x0: nd::Array1<f64>,
    gtol: f64,
    config: &MinimizerConfig,
) -> Minimization
where
    F: Fn(&nd::Array1<f64>) -> f64,
    G: Fn(&nd::Array1<f64>) -> nd::Array1<f64>,
{
    const ARMIJO: f64 = 1e-4;
    const MIN_STEP: f64 = 1e-12;

    let n = x0.len();
    let eye: nd::Array2<f64> = nd::Array2::eye(n);
    let mut x = x0;
    let mut fx = f(&x);
    let mut g = grad(&x);
    let mut Hinv = eye.clone();
    for _ in 0..config.max_iter {
        if max_norm(&g) <= gtol {
            return Minimization::Converged(x);
        }
        let mut p: nd::Array1<f64> = -Hinv.dot(&g);
        if p.dot(&g) >= 0.0 {
            Hinv = eye.clone();
            p = -&g;
        }
        let pnorm = p.dot(&p).sqrt();
        if pnorm > config.max_step {
            p *= config.max_step / pnorm;
        }
        let slope = p.dot(&g);
        let gnorm = max_norm(&g);

        let mut t: f64 = 1.0;
        let step = loop {
            let xt = &x + &(&p * t);
            let ft = f(&xt);
            if ft <= fx + ARMIJO * t * slope {
                break Some((xt, ft));
            }
            // near the minimum f is flat to machine precision; fall back on
            // the gradient to decide
            if (ft - fx).abs() <= 4.0 * f64::EPSILON * fx.abs().max(1.0)
                && max_norm(&grad(&xt)) < gnorm
            {
                break Some((xt, ft));
            }
            t *= 0.5;
            if t < MIN_STEP { break None; }
        };
        let Some((x_new, f_new)) = step else {
            return Minimization::NotConverged(x);
        };
        let g_new = grad(&x_new);
        let s = &x_new - &x;
        let y = &g_new - &g;
        let sy = s.dot(&y);
        if sy > f64::EPSILON * s.dot(&s).sqrt() * y.dot(&y).sqrt() {
            let rho = 1.0 / sy;
            let Hy = Hinv.dot(&y);
            let yHy = y.dot(&Hy);
            Hinv = Hinv
                - (outer(&s, &Hy) + outer(&Hy, &s)) * rho
                + outer(&s, &s) * (rho * rho * yHy + rho);
        }
        x = x_new;
        fx = f_new;
        g = g_new;
    }
    if max_norm(&g) <= gtol {
        Minimization::Converged(x)
    } else {
        Minimization::NotConverged(x)
    }
}
