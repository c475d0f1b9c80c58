//! Error types for the VCHOS pipeline.

use std::fmt;
use ndarray_linalg::error::LinalgError;
use thiserror::Error;

/// Pipeline stage at which a failure occurred.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    MinimaSearch,
    NormalModes,
    SqueezingTransform,
    MatrixAssembly,
    Eigensolve,
    Config,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MinimaSearch => "minima search",
            Self::NormalModes => "normal-mode basis",
            Self::SqueezingTransform => "squeezing transform",
            Self::MatrixAssembly => "matrix assembly",
            Self::Eigensolve => "eigensolve",
            Self::Config => "configuration",
        };
        write!(f, "{}", name)
    }
}

/// Errors produced while building or diagonalizing a VCHOS Hamiltonian.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VchosError {
    /// Every local minimization attempt failed.
    #[error("minima search: no seed converged to a minimum ({attempts} attempts)")]
    NoMinimaFound {
        /// Number of seeds tried.
        attempts: usize,
    },

    /// A positive symplectic eigenvalue has no negative partner.
    #[error(
        "squeezing transform: symplectic spectrum of minimum {minimum} is not \
        paired ({reason})"
    )]
    DegenerateSymplecticSpectrum {
        minimum: usize,
        reason: String,
    },

    /// An eigenvector could not be scaled onto the symplectic form.
    #[error(
        "squeezing transform: symplectic normalization failed for minimum \
        {minimum}: {reason}"
    )]
    SymplecticNormalization {
        minimum: usize,
        reason: String,
    },

    /// The linearized potential has a non-positive curvature direction.
    #[error("normal-mode basis: non-positive squared frequency {omega_sq:.3e}")]
    NonPositiveFrequency {
        omega_sq: f64,
    },

    /// `Xi^T C Xi` does not reproduce `Omega^-1 / Z0`.
    #[error("normal-mode basis: Xi check failed with deviation {deviation:.3e}")]
    NormalModeCheck {
        deviation: f64,
    },

    /// A matrix function or inverse was requested on a near-singular matrix.
    #[error("{stage}: ill-conditioned linear algebra: {reason}")]
    IllConditioned {
        stage: Stage,
        reason: String,
    },

    /// A LAPACK-backed routine returned an error.
    #[error("{stage}: linear algebra error: {source}")]
    Linalg {
        stage: Stage,
        #[source]
        source: LinalgError,
    },

    /// The normal-ordering series for `exp(a^dag x a)` did not terminate.
    #[error("squeezing transform: normal-ordering series did not vanish after {terms} terms")]
    NormalOrderingDiverged {
        terms: usize,
    },

    /// Both the dense and the shift-invert eigensolvers failed.
    #[error("eigensolve: dense solver failed ({dense}); shift-invert fallback failed ({fallback})")]
    Eigensolve {
        dense: String,
        fallback: String,
    },

    /// The shift-invert fallback returned pairs that do not solve `H x = E S x`.
    #[error("eigensolve: fallback eigenpair {index} has relative residual {residual:.3e}")]
    FallbackInaccurate {
        index: usize,
        residual: f64,
    },

    /// Physically meaningless qubit parameters.
    #[error("configuration: invalid parameter `{name}`: {reason}")]
    InvalidParams {
        name: &'static str,
        reason: String,
    },

    /// Requested eigenpair count is outside `1..=matrixdim`.
    #[error("eigensolve: requested {requested} eigenpairs from a {dim}-dimensional problem")]
    InvalidCount {
        requested: usize,
        dim: usize,
    },

    /// A mode index outside `0..NUM_MODES`.
    #[error("mode index {0} out of range")]
    ModeIndex(usize),

    /// A minimum index outside the list of found minima.
    #[error("minimum index {index} out of range ({count} minima)")]
    MinimumIndex {
        index: usize,
        count: usize,
    },

    #[error("configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("npz output: {0}")]
    Npz(#[from] ndarray_npy::WriteNpzError),
}

impl VchosError {
    /// Wrap a [`LinalgError`] with the stage that produced it.
    pub fn linalg(stage: Stage) -> impl FnOnce(LinalgError) -> Self {
        move |source| Self::Linalg { stage, source }
    }

    /// Pipeline stage responsible for the error.
    pub fn stage(&self) -> Stage {
        match self {
            Self::NoMinimaFound { .. } => Stage::MinimaSearch,
            Self::DegenerateSymplecticSpectrum { .. }
            | Self::SymplecticNormalization { .. }
            | Self::NormalOrderingDiverged { .. } => Stage::SqueezingTransform,
            Self::NonPositiveFrequency { .. }
            | Self::NormalModeCheck { .. } => Stage::NormalModes,
            Self::IllConditioned { stage, .. }
            | Self::Linalg { stage, .. } => *stage,
            Self::Eigensolve { .. }
            | Self::FallbackInaccurate { .. }
            | Self::InvalidCount { .. } => Stage::Eigensolve,
            Self::ModeIndex(_)
            | Self::MinimumIndex { .. } => Stage::MatrixAssembly,
            Self::InvalidParams { .. }
            | Self::Toml(_)
            | Self::Io(_)
            | Self::Npz(_) => Stage::Config,
        }
    }
}

/// Result type for VCHOS computations.
pub type VchosResult<T> = Result<T, VchosError>;
