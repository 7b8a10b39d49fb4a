use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod config;
mod error;
mod evaluation;
mod factory;
mod logging;
mod models;
mod output;
mod parser;
mod providers;
mod rubric;
mod runner;

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use crate::output::OutputFormat;
use crate::runner::{GradeRequest, Runner};

/// Answer grading assistant - grade student answers against a standard answer with an LLM
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON (or TOML) configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output format: plain or json
    #[arg(short, long, global = true, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - log every provider request
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Grade a student answer
    Grade {
        /// Document holding the question or standard answer
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Standard answer; defaults to the document content
        #[arg(long)]
        standard: Option<String>,

        /// Student answer to grade
        #[arg(long)]
        student: String,

        /// Provider to use instead of the configured one (openai or ollama)
        #[arg(short, long)]
        provider: Option<String>,

        /// Store the grade report as JSON at this path
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Convert a document to markdown
    Parse {
        file: PathBuf,
    },
    /// Send a single prompt to the provider
    Chat {
        prompt: String,

        #[arg(long)]
        system: Option<String>,

        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Describe an image
    Image {
        path: PathBuf,
        prompt: String,

        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Review a source code file
    Code {
        path: PathBuf,

        #[arg(short, long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = Config::load(&args.config)?;
    let runner = Runner::new(config, args.verbose);

    match args.command {
        Command::Grade {
            file,
            standard,
            student,
            provider,
            save,
        } => {
            let report = runner
                .grade(GradeRequest {
                    file: file.as_deref(),
                    standard_answer: standard.as_deref(),
                    student_answer: &student,
                    provider: provider.as_deref(),
                })
                .await?;

            if let Some(path) = save {
                runner.store_results(&report, &path)?;
            }
            output::print_results(&report, args.output);
        }
        Command::Parse { file } => {
            let document = runner.parse(&file).await?;
            output::print_results(&document, args.output);
        }
        Command::Chat {
            prompt,
            system,
            provider,
        } => {
            let reply = runner
                .chat(&prompt, system.as_deref(), provider.as_deref())
                .await?;
            output::print_results(&reply, args.output);
        }
        Command::Image {
            path,
            prompt,
            provider,
        } => {
            let reply = runner
                .analyze_image(&path, &prompt, provider.as_deref())
                .await?;
            output::print_results(&reply, args.output);
        }
        Command::Code { path, provider } => {
            let analysis = runner.analyze_code(&path, provider.as_deref()).await?;
            output::print_results(&analysis, args.output);
        }
    }

    Ok(())
}
