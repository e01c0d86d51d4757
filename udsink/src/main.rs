use std::error::Error;

use tracing::{error, info};

mod cmdline;
mod setup_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    // Setup the CryptoProvider (controls core cryptography used by rustls) for the process
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        error!(?e, "Installing default CryptoProvider");
        return Err("Installing default CryptoProvider".into());
    }

    if let Err(e) = run().await {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let matches = cmdline::root_cli().get_matches();
    let flavor = cmdline::flavor(&matches).ok_or("Unknown sink flavor")?;

    info!(?flavor, "Starting with flavor");
    udsink_core::run(flavor)
        .await
        .map_err(|e| format!("Error running {flavor:?} sink: {e:?}"))?;

    Ok(())
}
