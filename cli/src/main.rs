//! OLM OCI CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use olm_oci_cli::commands::{dispatch, Cli};
use olm_oci_core::error::OciError;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = dispatch(cli).await {
        let cancelled = e.downcast_ref::<OciError>().is_some_and(OciError::is_cancelled);
        if !cancelled {
            eprintln!("Error: {e}");
        }
        std::process::exit(1);
    }
}
