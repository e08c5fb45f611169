use std::process;

use clap::Parser;
use livehls::cli::{Args, Commands};
use livehls::config::{EdgeConfig, PlayConfig};
use livehls::{Result, edge, play};
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::Play(play_args) => {
            let config = PlayConfig::from_env_or_default().apply_args(&play_args)?;
            play::run_play(&play_args.url, config).await
        }
        Commands::Serve(serve_args) => {
            let config = EdgeConfig::from_env_or_default().apply_args(&serve_args);
            edge::serve(&config, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose))
        .init();
}
