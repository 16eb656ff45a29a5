//! codegraph binary: loads configuration, builds the agent runtime, and
//! serves line-delimited JSON-RPC over stdio until stdin closes (spec §6).

mod log_format;
mod logging;

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "codegraph")]
#[command(about = "codegraph — code-graph retrieval server over stdio JSON-RPC")]
struct Args {
    /// Directory to look for a project `.env` in (default: current directory)
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Application name used for the XDG config path (`~/.config/<name>/config.toml`)
    #[arg(long, value_name = "NAME", default_value = "codegraph")]
    app_name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = codegraph_config::EngineConfig::from_sources(&args.app_name, args.config_dir.as_deref())
        .map_err(|e| format!("failed to load configuration: {e}"))?;

    logging::init()?;

    let runtime = match codegraph_transport::bootstrap::build_runtime(&config).await {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("codegraph: failed to start: {e}");
            std::process::exit(1);
        }
    };

    codegraph_transport::serve_stdio(runtime).await?;
    Ok(())
}
