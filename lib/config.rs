//! Qubit parameters and numerical settings, loadable from TOML.

use std::path::{ Path, PathBuf };
use serde::{ Deserialize, Serialize };
use crate::error::{ VchosError, VchosResult };

/// Circuit parameters for a two-mode flux qubit.
///
/// Energies share a common (arbitrary) unit; the returned spectrum is in the
/// same unit.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VchosParams {
    /// Charging energy of the two large junctions.
    pub ecj: f64,
    /// Charging energy of the gate capacitances.
    pub ecg: f64,
    /// Josephson energy of the two large junctions.
    pub ej: f64,
    /// Offset charge on node 1.
    pub ng1: f64,
    /// Offset charge on node 2.
    pub ng2: f64,
    /// Size of the small junction relative to the large ones.
    pub alpha: f64,
    /// External flux in units of the flux quantum.
    pub flux: f64,
    /// Periodic images are summed over `[-kmax, kmax]^2`.
    pub kmax: usize,
    /// Maximum excitation number per mode.
    pub num_exc: usize,
}

impl VchosParams {
    /// Reject parameter sets for which the model is meaningless.
    pub fn validate(&self) -> VchosResult<()> {
        let finite: [(&'static str, f64); 7] = [
            ("ecj", self.ecj),
            ("ecg", self.ecg),
            ("ej", self.ej),
            ("ng1", self.ng1),
            ("ng2", self.ng2),
            ("alpha", self.alpha),
            ("flux", self.flux),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(VchosError::InvalidParams {
                    name,
                    reason: format!("expected a finite value, got {}", value),
                });
            }
        }
        let positive: [(&'static str, f64); 3] = [
            ("ecj", self.ecj),
            ("ecg", self.ecg),
            ("ej", self.ej),
        ];
        for (name, value) in positive {
            if value <= 0.0 {
                return Err(VchosError::InvalidParams {
                    name,
                    reason: format!("energy must be positive, got {}", value),
                });
            }
        }
        if self.alpha < 0.0 {
            return Err(VchosError::InvalidParams {
                name: "alpha",
                reason: format!("must be non-negative, got {}", self.alpha),
            });
        }
        Ok(())
    }

    /// Number of Fock states in the two-mode oscillator basis of one minimum.
    pub fn hilbertdim(&self) -> usize { (self.num_exc + 1).pow(2) }

    /// Offset charges as an array.
    pub fn ng(&self) -> [f64; 2] { [self.ng1, self.ng2] }
}

/// Settings for the local minimizer used in the minima search.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerConfig {
    /// Convergence threshold on the max-norm of the gradient, relative to
    /// the Josephson energy.
    pub gtol: f64,
    /// Maximum number of quasi-Newton iterations.
    pub max_iter: usize,
    /// Largest allowed step length (radians).
    pub max_step: f64,
}

impl Default for MinimizerConfig {
    fn default() -> Self {
        Self { gtol: 1e-10, max_iter: 500, max_step: 0.5 }
    }
}

/// Numerical tolerances and fallbacks used throughout the pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub minimizer: MinimizerConfig,
    /// Two minima closer than this in every coordinate (mod 2π) coincide.
    pub dedup_tol: f64,
    /// Absolute tolerance for eigenvalue pairing and `M^T K M = K`.
    pub symplectic_tol: f64,
    /// Normal-ordering terms with every entry below this are dropped.
    pub normal_order_tol: f64,
    /// Cap on the number of normal-ordering terms.
    pub normal_order_max_terms: usize,
    /// Shift used by the shift-invert eigensolver fallback.
    pub fallback_shift: f64,
    /// Relative residual accepted for fallback eigenpairs.
    pub fallback_residual_tol: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            minimizer: MinimizerConfig::default(),
            dedup_tol: 1e-3,
            symplectic_tol: 1e-8,
            normal_order_tol: 1e-8,
            normal_order_max_terms: 200,
            fallback_shift: 1e-5,
            fallback_residual_tol: 1e-6,
        }
    }
}

/// Output settings for the spectrum binary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of eigenpairs to compute.
    pub num_eigenvalues: usize,
    /// Optional `.npz` archive to receive the eigensystem.
    #[serde(default)]
    pub npz: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self { Self { num_eigenvalues: 6, npz: None } }
}

/// Complete run description, as read from a TOML file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub qubit: VchosParams,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl RunConfig {
    /// Parse and validate a run description.
    pub fn from_toml_str(s: &str) -> VchosResult<Self> {
        let config: Self = toml::from_str(s)?;
        config.qubit.validate()?;
        if config.output.num_eigenvalues == 0 {
            return Err(VchosError::InvalidParams {
                name: "num_eigenvalues",
                reason: "must be at least 1".into(),
            });
        }
        Ok(config)
    }

    /// Read a run description from disk.
    pub fn load<P>(path: P) -> VchosResult<Self>
    where P: AsRef<Path>
    {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}
