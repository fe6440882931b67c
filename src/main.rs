mod answer;
mod classifier;
mod client;
mod config;
mod error;
mod protocol;
mod puzzle;
mod runner;
mod stats;
mod store;
mod worker;
mod workflow;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use crate::answer::AnswerError;
use crate::client::{AocClient, PuzzleSite};
use crate::config::Config;
use crate::error::{Blame, SolutionError};
use crate::puzzle::Level;
use crate::runner::{ProcessSpawner, SolutionRunner};
use crate::stats::format_duration;
use crate::store::{DataStore, PuzzleRepository};
use crate::workflow::{RunReport, SubmitReport, SubmitStatus, Workflow};

/// Run, time and submit Advent of Code solutions
#[derive(Parser)]
#[command(name = "aoc")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a solution and print its answer
    Run {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=25))]
        day: u8,

        /// Level to run; both levels when omitted
        #[arg(short, long, value_parser = parse_level)]
        level: Option<Level>,
    },
    /// Run a solution and submit its answer
    Submit {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=25))]
        day: u8,

        #[arg(value_parser = parse_level)]
        level: Level,
    },
    /// Show progress for a year
    Stats {
        #[arg(short, long)]
        year: Option<u16>,
    },
    /// Execute one solution request from stdin (internal)
    #[command(hide = true)]
    Worker,
}

fn parse_level(value: &str) -> Result<Level, String> {
    value
        .parse::<u8>()
        .map_err(|e| e.to_string())
        .and_then(|n| Level::try_from(n).map_err(|e| e.to_string()))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Workers never see .env and keep stdout for the protocol
    if let Commands::Worker = cli.command {
        std::process::exit(worker::main_entry());
    }

    dotenvy::dotenv().ok();

    let filter = match "aoc=info".parse() {
        Ok(directive) => tracing_subscriber::EnvFilter::from_default_env().add_directive(directive),
        Err(_) => tracing_subscriber::EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run(command: Commands) -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Using event year {}", config.year);

    match command {
        Commands::Run { day, level } => {
            let mut workflow = build_workflow(&config)?;
            let levels = level.map(|l| vec![l]).unwrap_or_else(|| Level::ALL.to_vec());
            for level in levels {
                let report = workflow.run(day, level).await?;
                print_run(&report);
            }
        }
        Commands::Submit { day, level } => {
            let mut workflow = build_workflow(&config)?;
            let report = workflow.submit(day, level).await?;
            print_submit(&report);
        }
        Commands::Stats { year } => {
            let store = DataStore::open(&config.data_file)?;
            print!(
                "{}",
                stats::render(year.unwrap_or(config.year), &store.all()?)
            );
        }
        // Dispatched in main before any setup
        Commands::Worker => {}
    }

    Ok(())
}

fn build_workflow(config: &Config) -> Result<Workflow<ProcessSpawner>> {
    let spawner = ProcessSpawner::current_exe(config.redacted_env.clone())
        .context("Failed to locate the aoc executable for workers")?;
    let runner = SolutionRunner::new(config.layout.clone(), spawner);

    // Commands that only need cached input work without a token
    let site = match config.session_token {
        Some(_) => Some(Box::new(AocClient::from_config(config)?) as Box<dyn PuzzleSite>),
        None => None,
    };

    Ok(Workflow::new(
        config.year,
        runner,
        site,
        config.classifier()?,
        DataStore::open(&config.data_file)?,
    ))
}

fn print_run(report: &RunReport) {
    println!("{}: {}", report.coordinate, report.answer);
    println!("  time: {}", format_duration(report.execution_time_ns));
    match report.matches_correct {
        Some(true) if report.new_fastest => println!("  matches the solved answer (new fastest time)"),
        Some(true) => println!("  matches the solved answer"),
        Some(false) => println!("  differs from the solved answer"),
        None => {}
    }
}

fn print_submit(report: &SubmitReport) {
    println!(
        "{}: {} ({})",
        report.coordinate,
        report.answer,
        format_duration(report.execution_time_ns)
    );
    match &report.status {
        SubmitStatus::AlreadySolved { correct_answer } if *correct_answer == report.answer => {
            println!("  already solved with this answer; not submitted")
        }
        SubmitStatus::AlreadySolved { correct_answer } => {
            println!("  already solved with {}; not submitted", correct_answer)
        }
        SubmitStatus::DuplicateIncorrect => {
            println!("  this answer was already rejected; not submitted")
        }
        SubmitStatus::Correct { message } => println!("  correct! {}", message),
        SubmitStatus::Incorrect { message } => println!("  incorrect. {}", message),
        SubmitStatus::Locked { message } => println!("  not submittable. {}", message),
        SubmitStatus::RateLimited {
            message,
            wait_until,
        } => println!(
            "  rate limited until {}. {}",
            wait_until.with_timezone(&chrono::Local).format("%H:%M:%S"),
            message
        ),
    }
}

/// Problems in the user's own code are flagged apart from tool failures
fn report_error(err: &anyhow::Error) {
    let solution_error = err.chain().find_map(|e| e.downcast_ref::<SolutionError>());
    let blame = match solution_error {
        Some(e) => e.blame(),
        None if err.downcast_ref::<AnswerError>().is_some() => Blame::User,
        None => Blame::Tool,
    };

    match (blame, solution_error) {
        (Blame::User, Some(e)) => error!("Your solution needs fixing: {}", e),
        (Blame::User, None) => error!("Your solution needs fixing: {}", err),
        (Blame::Tool, _) => error!("{:#}", err),
    }
}
