mod race;
mod settings;
mod stages;
mod walk;

use std::future::Future;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Tollgate participant approval pipeline.
#[derive(Parser)]
#[command(name = "tollgate", version, about = "Tollgate participant approval pipeline")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the stage transition table
    Stages,

    /// Walk one participant through the whole pipeline against an in-memory store
    Walk {
        /// Participant id to register
        #[arg(long, default_value = "participant-1")]
        participant: String,
    },

    /// Race concurrent reservations for one training session
    Race {
        /// Seats in the session
        #[arg(long)]
        capacity: u32,
        /// Number of participants reserving at once
        #[arg(long)]
        participants: usize,
        /// Seconds from now until the session starts (0 or less: already started)
        #[arg(long, default_value_t = 86_400, allow_hyphen_values = true)]
        starts_in_secs: i64,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match settings::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            report_error(&e, cli.output);
            process::exit(1);
        }
    };
    settings::init_logging(&config.log_level);

    let result = match cli.command {
        Commands::Stages => stages::cmd_stages(cli.output),
        Commands::Walk { participant } => {
            block_on(walk::cmd_walk(&participant, config, cli.output))
        }
        Commands::Race {
            capacity,
            participants,
            starts_in_secs,
        } => block_on(race::cmd_race(
            capacity,
            participants,
            starts_in_secs,
            config,
            cli.output,
        )),
    };

    if let Err(e) = result {
        report_error(&e, cli.output);
        process::exit(1);
    }
}

fn block_on<F: Future<Output = Result<(), String>>>(future: F) -> Result<(), String> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| format!("failed to create tokio runtime: {}", e))?;
    rt.block_on(future)
}

pub(crate) fn report_error(msg: &str, output: OutputFormat) {
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| format!("serialization: {}", e))?;
    println!("{}", json);
    Ok(())
}
