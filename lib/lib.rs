#![allow(dead_code, non_snake_case, non_upper_case_globals)]

//! Variational tight-binding with squeezed harmonic-oscillator states
//! (VCHOS) for the energy spectrum of a two-mode superconducting flux qubit.

/// Number of dynamical modes (node phases) in the circuit.
pub const NUM_MODES: usize = 2;

pub mod error;
pub mod config;
pub mod units;
pub mod linalg;
pub mod optimize;
pub mod ladder;
pub mod minima;
pub mod normal_modes;
pub mod squeezing;
pub mod operators;
pub mod spectrum;
pub mod qubit;

pub use error::{ Stage, VchosError, VchosResult };
pub use config::{ RunConfig, SolverConfig, VchosParams };
pub use qubit::FluxQubitVchos;

/// Write arrays to a `.npz` archive.
///
/// ```ignore
/// write_npz!(
///     outdir.join("spectrum.npz"),
///     arrays: {
///         "evals" => &evals,
///         "evecs" => &evecs,
///     }
/// )?;
/// ```
#[macro_export]
macro_rules! write_npz {
    (
        $path:expr,
        arrays: { $( $name:literal => $arr:expr ),* $(,)? }
    ) => {
        (|| -> Result<(), $crate::VchosError> {
            let mut npz = ndarray_npy::NpzWriter::new(std::fs::File::create($path)?);
            $( npz.add_array($name, $arr)?; )*
            npz.finish()?;
            Ok(())
        })()
    }
}
