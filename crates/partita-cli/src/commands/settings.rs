//! Settings file management commands.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Subcommand};
use partita_config::ConvolutionSettings;

#[derive(Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    command: SettingsCommand,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Write a settings file with default values
    Init {
        /// Path of the file to create
        path: PathBuf,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,

        /// Impulse response file to reference
        #[arg(short, long)]
        impulse: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a settings file and print it with defaults filled in
    Show {
        /// Path of the settings file
        path: PathBuf,
    },
}

pub fn run(args: SettingsArgs) -> anyhow::Result<()> {
    match args.command {
        SettingsCommand::Init {
            path,
            name,
            impulse,
            force,
        } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to replace it)", path.display());
            }
            let mut settings = ConvolutionSettings::default();
            settings.name = name;
            settings.impulse = impulse;
            settings.save(&path)?;
            println!("Wrote {}", path.display());
        }
        SettingsCommand::Show { path } => {
            let settings = ConvolutionSettings::load(&path)?;
            settings
                .validate()
                .with_context(|| format!("{} is not valid", path.display()))?;
            print!("{}", settings.to_toml()?);
        }
    }
    Ok(())
}
