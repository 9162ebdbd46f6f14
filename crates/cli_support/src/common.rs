use clap::{Args, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Compute backend requested on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    NdArray,
    Wgpu,
}

/// Config file and backend selection shared by every binary.
#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// TOML config file (falls back to $C3D_RETRIEVAL_CONFIG, then ./c3d-retrieval.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
}

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        common: ConfigArgs,
    }

    #[test]
    fn defaults_to_ndarray_without_config() {
        let cli = Cli::parse_from(["bin"]);
        assert_eq!(cli.common.backend, BackendKind::NdArray);
        assert!(cli.common.config.is_none());
    }

    #[test]
    fn parses_backend_and_config() {
        let cli = Cli::parse_from(["bin", "--backend", "wgpu", "--config", "run.toml"]);
        assert_eq!(cli.common.backend, BackendKind::Wgpu);
        assert_eq!(cli.common.config, Some(PathBuf::from("run.toml")));
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
