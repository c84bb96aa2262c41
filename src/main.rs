use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use miette::Diagnostic;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

use smithy_ls::config::{self, SmithyBuildJson};
use smithy_ls::model::Severity;

#[derive(Parser)]
#[command(name = "smithy-ls", version, about = "Smithy IDL language server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the language server over stdio (the default)
    Serve,

    /// Inspect smithy-build configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the resolved project configuration
    Print(ConfigPrintArgs),

    /// Print the JSON Schema for smithy-build.json files
    Schema,
}

#[derive(clap::Args)]
struct ConfigPrintArgs {
    /// Project root directory (defaults to the current directory)
    #[arg(short = 'r', long)]
    root: Option<PathBuf>,
}

/// A lightweight diagnostic for tool-level errors that have no source code.
#[derive(Debug, Error)]
#[error("{message}")]
struct ToolDiagnostic {
    message: String,
    severity: miette::Severity,
}

impl ToolDiagnostic {
    fn error(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
            severity: miette::Severity::Error,
        }
    }

    fn warning(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
            severity: miette::Severity::Warning,
        }
    }
}

impl Diagnostic for ToolDiagnostic {
    fn severity(&self) -> Option<miette::Severity> {
        Some(self.severity)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_serve(),
        Commands::Config { command } => match command {
            ConfigCommands::Print(args) => run_config_print(args),
            ConfigCommands::Schema => run_config_schema(),
        },
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "smithy-ls", &mut std::io::stdout());
            ExitCode::SUCCESS
        }
    }
}

fn run_serve() -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            let diag = ToolDiagnostic::error(format!("failed to start async runtime: {e}"));
            let _ = writeln!(std::io::stderr().lock(), "{:?}", miette::Report::new(diag));
            return ExitCode::from(2);
        }
    };
    runtime.block_on(smithy_ls::lsp::run_server());
    ExitCode::SUCCESS
}

fn run_config_print(args: ConfigPrintArgs) -> ExitCode {
    let mut stderr = std::io::stderr().lock();

    let root = match args.root {
        Some(root) => root,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                let diag =
                    ToolDiagnostic::error(format!("cannot determine current directory: {e}"));
                let _ = writeln!(stderr, "{:?}", miette::Report::new(diag));
                return ExitCode::from(2);
            }
        },
    };

    let (config, events) = config::load_project_config(&root);
    let mut had_errors = false;
    for event in &events {
        let diag = if event.severity >= Severity::Danger {
            had_errors = true;
            ToolDiagnostic::error(event.message.clone())
        } else {
            ToolDiagnostic::warning(event.message.clone())
        };
        let _ = writeln!(stderr, "{:?}", miette::Report::new(diag));
    }

    let rendered = serde_json::json!({
        "version": config.version,
        "sources": config.sources,
        "imports": config.imports,
        "maven": {
            "dependencies": config.maven_dependencies,
            "repositories": config.maven_repositories,
        },
        "buildFiles": config
            .build_files
            .iter()
            .map(|(_, path)| path.display().to_string())
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&rendered).unwrap());

    if had_errors {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn run_config_schema() -> ExitCode {
    let schema = schemars::schema_for!(SmithyBuildJson);
    println!("{}", serde_json::to_string_pretty(&schema).unwrap());
    ExitCode::SUCCESS
}
