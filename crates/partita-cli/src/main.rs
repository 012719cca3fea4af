//! Partita CLI - render audio files through the partita convolution reverb.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "partita")]
#[command(author, version, about = "Partitioned convolution reverb", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convolve a WAV file with an impulse response
    Render(commands::render::RenderArgs),

    /// Show an impulse response and how it would be partitioned
    Info(commands::info::InfoArgs),

    /// Create or inspect settings files
    Settings(commands::settings::SettingsArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render(args) => commands::render::run(args),
        Commands::Info(args) => commands::info::run(args),
        Commands::Settings(args) => commands::settings::run(args),
    }
}
