use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use hostpath::{Config, HostPathProvisioner};
use hostpath_controller::Context;

#[derive(Parser)]
struct Cli {
    /// Path to the config file, built-in defaults are used if omitted
    config: Option<PathBuf>,

    /// Name matched against `StorageClass.provisioner`, overrides the config file
    #[clap(short, long)]
    provisioner_name: Option<String>,

    /// Directory to create volumes in, overrides the config file
    #[clap(short, long)]
    base_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize the env_logger
    env_logger::init();

    // Parse the CLI options
    let args = Cli::parse();

    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(name) = args.provisioner_name {
        cfg.provisioner_name = name;
    }
    if let Some(base_path) = args.base_path {
        cfg.base_path = base_path;
    }

    log::info!("Found config: {:?}", cfg);

    // Uses the in-cluster service account, falling back to the local kubeconfig
    let client = kube::Client::try_default()
        .await
        .map_err(|err| format!("could not create kubernetes client: {}", err))?;

    let provisioner = HostPathProvisioner::from_config(&cfg);
    log::info!(
        "Starting the {} provisioner with volumes in `{}`",
        cfg.provisioner_name,
        provisioner.store().base().to_string_lossy()
    );

    let context = Arc::new(Context::new(client, Arc::new(provisioner), cfg));

    // Stop watching on SIGINT / SIGTERM, letting running reconciliations finish
    let (tx, rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        tx.send_replace(true);
    })
    .map_err(|err| format!("could not set Ctrl-C handler: {}", err))?;

    hostpath_controller::run(context, rx).await;

    log::info!("Provisioner stopped");

    Ok(())
}

fn load_config(path: &Path) -> Result<Config, String> {
    let cfg_file = std::fs::File::open(path).map_err(|err| {
        format!(
            "could not open config file {}: {}",
            path.to_string_lossy(),
            err
        )
    })?;

    serde_yaml::from_reader(cfg_file)
        .map_err(|err| format!("invalid config at {}: {}", path.to_string_lossy(), err))
}
