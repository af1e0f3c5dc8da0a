//! `module-gate` server binary.

// crates.io
use clap::Parser;
// self
use module_gate::{
	config::{Cli, GateConfig},
	error::Result,
	obs, server,
};

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let config = GateConfig::load(&cli.config)?;

	obs::init_subscriber(&config.server.log_level);

	server::serve(config, cli.bind).await
}
