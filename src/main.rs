use std::env;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use courseware_tools::courseware::tools::sync;
use courseware_tools::{Result, ToolError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_logging().and_then(|()| run(cli)) {
        if let ToolError::Validation(errors) = &error {
            for message in errors {
                eprintln!("{message}");
            }
        }
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn init_logging() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "courseware_tools=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| ToolError::Logging(err.to_string()))
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Build(args) => {
            args.require_input()?;
            sync::build_course(&args.input, &args.output)
        }
        Command::Import(args) => {
            args.require_input()?;
            let warnings = sync::import_course(&args.input, &args.output)?;
            for warning in &warnings {
                eprintln!("warning: {warning}");
            }
            Ok(())
        }
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Convert between course authoring workbooks and OLX course archives."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an OLX `.tar.gz` archive from an authoring workbook.
    Build(ConvertArgs),
    /// Turn an OLX `.tar.gz` archive back into an authoring workbook.
    Import(ConvertArgs),
}

#[derive(clap::Args)]
struct ConvertArgs {
    /// Input file path.
    #[arg(long)]
    input: PathBuf,

    /// Output file path.
    #[arg(long)]
    output: PathBuf,
}

impl ConvertArgs {
    fn require_input(&self) -> Result<()> {
        if self.input.exists() {
            Ok(())
        } else {
            Err(ToolError::MissingInput(self.input.clone()))
        }
    }
}
