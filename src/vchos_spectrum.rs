#![allow(dead_code, non_snake_case, non_upper_case_globals)]

use std::path::PathBuf;
use ndarray as nd;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vchos_sim::{
    write_npz,
    RunConfig,
    FluxQubitVchos,
};

const DEFAULT_CONFIG: &str = "configs/vchos.toml";

fn main() -> anyhow::Result<()> {
    let filter
        = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path: PathBuf
        = std::env::args().nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let run = RunConfig::load(&config_path)?;
    info!("loaded {}", config_path.display());

    let qubit = FluxQubitVchos::from_run_config(&run)?;
    let found = qubit.sorted_minima()?;
    for (i, m) in found.iter().enumerate() {
        println!("minimum {:2}  ({:.6}, {:.6})  V = {:+.9e}", i, m.phi[0], m.phi[1], m.potential);
    }
    let minima: nd::Array2<f64>
        = nd::Array2::from_shape_vec(
            (found.len(), 2),
            found.iter().flat_map(|m| m.phi.iter().copied()).collect(),
        )?;
    let sys = qubit.eigensystem(run.output.num_eigenvalues)?;
    let e0 = sys.evals[0];
    for (k, e) in sys.evals.iter().enumerate() {
        println!("{:3}  {:+.9e}  {:+.9e}", k, e, e - e0);
    }

    if let Some(path) = run.output.npz.as_ref() {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        write_npz!(
            path,
            arrays: {
                "evals" => &sys.evals,
                "evecs_re" => &sys.evecs.mapv(|z| z.re),
                "evecs_im" => &sys.evecs.mapv(|z| z.im),
                "minima" => &minima,
                "xi" => &qubit.xi_matrix()?,
            }
        )?;
        info!("wrote {}", path.display());
    }
    Ok(())
}
