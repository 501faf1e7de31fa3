//! ALP CLI — run ALP programs and inspect the vocabulary.

use alp_core::{AlpError, ErrorKind};
use alp_runtime::RuntimeConfig;
use alp_vm::Program;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "alp",
    version,
    about = "ALP — a JSON-line protocol language for model-driven programs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and run an `.alp` program, printing `{result, trace}` JSON
    Run {
        /// Path to the program file
        #[arg()]
        program: PathBuf,

        /// Inbound value for the entry function, as JSON
        #[arg(long)]
        input: Option<String>,

        /// Emit per-step environment snapshots on stderr
        #[arg(long)]
        explain: bool,
    },
    /// Print the token/CID vocabulary table
    Vocab,
}

/// Exit codes by error kind, for scripting around the runner.
fn exit_code_for(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Syntax => 2,
        ErrorKind::Type => 3,
        ErrorKind::Unresolved => 4,
        ErrorKind::Duplicate => 5,
        ErrorKind::Capability => 6,
        ErrorKind::Math | ErrorKind::Op => 7,
        ErrorKind::Io => 8,
        ErrorKind::Http | ErrorKind::Tool | ErrorKind::Llm => 9,
        ErrorKind::Timeout | ErrorKind::Cancelled => 10,
        ErrorKind::FlowDepth | ErrorKind::RetryExhausted => 11,
    }
}

fn report(error: &AlpError) -> ExitCode {
    eprintln!("error: {error}");
    let mut cause = error.cause();
    while let Some(inner) = cause {
        eprintln!("  caused by: {inner}");
        cause = inner.cause();
    }
    ExitCode::from(exit_code_for(error.kind()))
}

fn run_program(program: PathBuf, input: Option<String>, explain: bool) -> ExitCode {
    let mut config = RuntimeConfig::from_env();
    if explain {
        config.explain = true;
    }

    let inbound = match input {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let error = AlpError::syntax(format!("--input is not valid JSON: {e}"));
                return report(&error);
            }
        },
        None => None,
    };

    let loaded = match Program::load(&program, config) {
        Ok(loaded) => loaded,
        Err(error) => return report(&error),
    };
    match loaded.run(inbound.as_ref()) {
        Ok(outcome) => {
            let payload = json!({"result": outcome.result, "trace": outcome.traces});
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
            );
            ExitCode::SUCCESS
        }
        Err(error) => report(&error),
    }
}

fn print_vocab() -> ExitCode {
    for entry in alp_core::vocab::export_vocab() {
        println!("{:10}  {}  {}", entry.token, entry.cid, entry.meaning);
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            program,
            input,
            explain,
        } => run_program(program, input, explain),
        Commands::Vocab => print_vocab(),
    }
}
