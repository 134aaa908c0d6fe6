//! The command line interface.
use crate::input::{LoadedModel, load_model};
use crate::log;
use crate::model::Model;
use crate::output::{create_output_directory, get_output_dir, write_results};
use crate::settings::Settings;
use crate::solver::{Highs, SolveOptions};
use ::log::{info, warn};
use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub mod settings;
use settings::SettingsSubcommands;

/// Compile energy systems into optimisation problems and solve them.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Options for the run command
#[derive(Args, Default)]
pub struct RunOpts {
    /// Directory for output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
    /// Whether to overwrite the output directory if it already exists
    #[arg(long)]
    pub overwrite: bool,
    /// Whether to write results of solves which are not proven optimal
    #[arg(long)]
    pub allow_nonoptimal: bool,
    /// Time limit for the solver in seconds
    #[arg(long)]
    pub time_limit: Option<f64>,
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Build and solve a model and write its results.
    Run {
        /// Path to the model file.
        model_path: PathBuf,
        /// Other run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Load and build a model without solving it.
    Validate {
        /// Path to the model file.
        model_path: PathBuf,
    },
    /// Write the optimisation problem of a model in CPLEX LP format.
    Lp {
        /// Path to the model file.
        model_path: PathBuf,
        /// Path of the LP file to write.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Manage the settings file.
    Settings {
        /// The available subcommands for managing the settings file.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { model_path, opts } => handle_run_command(&model_path, &opts, None),
            Self::Validate { model_path } => handle_validate_command(&model_path, None),
            Self::Lp { model_path, output } => handle_lp_command(&model_path, &output, None),
            Self::Settings { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and run the requested command
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ ensys --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    let Some(command) = cli.command else {
        let help_str = Cli::command().render_long_help().to_string();
        println!("{help_str}");
        return Ok(());
    };

    command.execute()
}

fn load_settings(settings: Option<Settings>) -> Result<Settings> {
    match settings {
        Some(settings) => Ok(settings),
        None => Settings::load().context("Failed to load settings."),
    }
}

/// Install the logger unless an earlier command in this process already did
fn init_logging(settings: &Settings, log_dir: Option<&Path>) -> Result<()> {
    if log::is_logger_initialised() {
        return Ok(());
    }
    log::init(Some(&settings.log_level), log_dir).context("Failed to initialise logging.")
}

fn load(model_path: &Path) -> Result<LoadedModel> {
    let loaded = load_model(model_path).context("Failed to load model.")?;
    info!("Loaded model from {}", model_path.display());
    Ok(loaded)
}

/// Handle the `run` command.
pub fn handle_run_command(
    model_path: &Path,
    opts: &RunOpts,
    settings: Option<Settings>,
) -> Result<()> {
    let settings = load_settings(settings)?;
    let output_path = match &opts.output_dir {
        Some(dir) => dir.clone(),
        None => get_output_dir(model_path)?,
    };
    let overwrite = create_output_directory(&output_path, opts.overwrite || settings.overwrite)
        .with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_path.display()
            )
        })?;
    init_logging(&settings, Some(&output_path))?;
    info!("Output folder: {}", output_path.display());
    if overwrite {
        warn!("Output folder will be overwritten");
    }

    let loaded = load(model_path)?;
    let mut model = Model::new(&loaded.energy_system, loaded.options)
        .context("Failed to build model.")?;
    let solve_options = SolveOptions {
        allow_nonoptimal: opts.allow_nonoptimal || settings.allow_nonoptimal,
        time_limit: opts.time_limit.or(settings.time_limit),
        ..SolveOptions::default()
    };
    model.solve(&Highs, &solve_options)?;
    write_results(&output_path, &model.results()?).context("Failed to write results.")?;
    info!("Results written to {}", output_path.display());

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(model_path: &Path, settings: Option<Settings>) -> Result<()> {
    init_logging(&load_settings(settings)?, None)?;
    let loaded = load(model_path)?;
    let model = Model::new(&loaded.energy_system, loaded.options)
        .context("Failed to validate model.")?;
    let program = model.program();
    info!(
        "Model validation successful: {} variables, {} constraints",
        program.num_variables(),
        program.num_constraints()
    );

    Ok(())
}

/// Handle the `lp` command.
///
/// Variables and constraints are named in the written file.
pub fn handle_lp_command(
    model_path: &Path,
    output: &Path,
    settings: Option<Settings>,
) -> Result<()> {
    init_logging(&load_settings(settings)?, None)?;
    let mut loaded = load(model_path)?;
    loaded.options.debug = true;
    let model = Model::new(&loaded.energy_system, loaded.options)
        .context("Failed to build model.")?;
    let file = File::create(output)
        .with_context(|| format!("Could not create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    model.program().write_lp(&mut writer)?;
    writer.flush()?;
    info!("LP file written to {}", output.display());

    Ok(())
}
