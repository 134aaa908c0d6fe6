//! CLI commands for the settings file
use crate::settings::{Settings, get_settings_file_path};
use anyhow::{Result, ensure};
use clap::Subcommand;
use std::fs;

/// Subcommands for settings
#[derive(Subcommand)]
pub enum SettingsSubcommands {
    /// Get the path to where the settings file is read from
    Path,
    /// Write the contents of a placeholder `settings.toml` to the console
    DumpDefault,
    /// Create a placeholder `settings.toml` in the working directory
    Init,
}

impl SettingsSubcommands {
    /// Execute the supplied settings subcommand
    pub fn execute(self) -> Result<()> {
        match self {
            Self::Path => println!("{}", get_settings_file_path().display()),
            Self::DumpDefault => print!("{}", Settings::default_file_contents()?),
            Self::Init => handle_init_command()?,
        }

        Ok(())
    }
}

/// Handle the `init` command
fn handle_init_command() -> Result<()> {
    let file_path = get_settings_file_path();
    ensure!(
        !file_path.exists(),
        "Settings file already exists: {}",
        file_path.display()
    );
    fs::write(&file_path, Settings::default_file_contents()?)?;
    println!("Created settings file: {}", file_path.display());

    Ok(())
}
