// CLI module - command-line argument parsing and handlers
//
// Subcommands:
// - serve [--strict]: run the relay (the default with no subcommand)
// - config --show: Display effective configuration
// - config --path: Show config file path
// - config --init: Write a default config file if none exists
// - config --reset: Regenerate config file with defaults

use crate::config::{Config, VERSION};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

/// tenant-relay - tenant-isolating streaming relay for agent runtimes
#[derive(Parser, Debug)]
#[command(name = "tenant-relay")]
#[command(version = VERSION)]
#[command(about = "Tenant-isolating streaming relay for agent runtimes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the relay
    Serve {
        /// Refuse to start when the configuration has issues
        #[arg(long)]
        strict: bool,
    },

    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,
    },
}

/// What the binary should do after argument parsing
#[derive(Debug, PartialEq)]
pub enum Action {
    Serve { strict: bool },
    Exit,
}

impl Cli {
    /// Run config subcommands; anything else is a request to serve
    pub fn dispatch(self) -> Result<Action> {
        match self.command {
            None => Ok(Action::Serve { strict: false }),
            Some(Commands::Serve { strict }) => Ok(Action::Serve { strict }),
            Some(Commands::Config {
                show,
                path,
                init,
                reset,
            }) => {
                if path {
                    handle_config_path()?;
                } else if show {
                    handle_config_show()?;
                } else if init {
                    handle_config_init()?;
                } else if reset {
                    handle_config_reset()?;
                } else {
                    // No flag provided, show help
                    println!("Usage: tenant-relay config [--show|--path|--init|--reset]");
                    println!();
                    println!("Options:");
                    println!("  --show    Display effective configuration");
                    println!("  --path    Show config file path");
                    println!("  --init    Write a default config file if none exists");
                    println!("  --reset   Reset config file to defaults");
                }
                Ok(Action::Exit)
            }
        }
    }
}

fn config_path() -> Result<PathBuf> {
    Config::config_path().context("Could not determine config path")
}

fn handle_config_path() -> Result<()> {
    println!("{}", config_path()?.display());
    Ok(())
}

fn handle_config_show() -> Result<()> {
    let config = Config::from_env()?;

    println!("# Effective configuration (env > file > defaults)");
    println!();
    print!("{}", config.to_toml());

    let issues = config.validate();
    if !issues.is_empty() {
        println!();
        for issue in issues {
            println!("# Issue: {}", issue);
        }
    }

    // Show source info
    println!();
    let path = config_path()?;
    if path.exists() {
        println!("# Source: {}", path.display());
    } else {
        println!("# Source: defaults (no config file)");
    }
    Ok(())
}

fn handle_config_init() -> Result<()> {
    let path = config_path()?;
    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }
    write_default(&path)?;
    println!("Created new config file: {}", path.display());
    Ok(())
}

fn handle_config_reset() -> Result<()> {
    let path = config_path()?;

    // Confirm if file exists
    if path.exists() {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    write_default(&path)?;
    println!("Config reset to defaults: {}", path.display());
    Ok(())
}

/// Write the default config (using Config's single source of truth)
fn write_default(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Error creating directory {}", parent.display()))?;
    }
    std::fs::write(path, Config::default().to_toml())
        .with_context(|| format!("Error writing config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_serves() {
        let cli = Cli::try_parse_from(["tenant-relay"]).unwrap();
        assert_eq!(cli.dispatch().unwrap(), Action::Serve { strict: false });
    }

    #[test]
    fn test_serve_strict_flag() {
        let cli = Cli::try_parse_from(["tenant-relay", "serve", "--strict"]).unwrap();
        assert_eq!(cli.dispatch().unwrap(), Action::Serve { strict: true });
    }

    #[test]
    fn test_config_flags_parse() {
        let cli = Cli::try_parse_from(["tenant-relay", "config", "--path"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Config {
                show: false,
                path: true,
                init: false,
                reset: false,
            })
        );
    }

    #[test]
    fn test_write_default_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        write_default(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, Config::default().to_toml());
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["tenant-relay", "serve", "--loose"]).is_err());
    }
}
