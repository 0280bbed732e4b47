use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use toolbench::{
    bench::{evaluate_results, load_prompt, resolve_num_threads, run_benchmark, RunRequest},
    providers::ollama::Ollama,
    BenchConfig, ExecutionMode, LLMError, LLMProvider,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chat-bench")]
#[command(about = "Multi-turn tool-calling benchmark for local models")]
struct Args {
    /// Harness configuration (YAML). Missing file means defaults.
    #[arg(long, global = true, default_value = "bench.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one chat session and persist transcript and metrics
    Run {
        #[arg(long)]
        model: String,

        /// Prompt file with `## System Message` and `## User Message` sections
        #[arg(long)]
        prompt: PathBuf,

        #[arg(long, default_value = "gpu")]
        mode: ExecutionMode,

        /// Context window, overrides the configured value
        #[arg(long)]
        ctx: Option<u32>,

        #[arg(long)]
        num_predict: Option<u32>,

        /// Thread count or share of cores, e.g. `16` or `75%`
        #[arg(long)]
        threads: Option<String>,

        /// Session budget in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Score persisted transcripts and print a leaderboard
    Score {
        #[arg(long, default_value = "gpu")]
        mode: ExecutionMode,

        #[arg(long)]
        ctx: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,toolbench=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    if let Err(err) = execute(args).await {
        tracing::error!(error = %err, "chat-bench failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn execute(args: Args) -> Result<(), LLMError> {
    let config = BenchConfig::load(&args.config)?.with_env_overrides();

    match args.command {
        Command::Run {
            model,
            prompt,
            mode,
            ctx,
            num_predict,
            threads,
            timeout,
        } => {
            let (system_prompt, user_prompt) = load_prompt(&prompt)?;
            let num_threads = threads.as_deref().map(resolve_num_threads).transpose()?;
            let provider: Arc<dyn LLMProvider> = Arc::new(Ollama::from_config(config.ollama())?);

            let request = RunRequest {
                model,
                system_prompt,
                user_prompt,
                mode,
                num_ctx: ctx,
                num_predict,
                num_threads,
                session_timeout: timeout.map(Duration::from_secs),
            };
            let outcome = run_benchmark(&config, provider, &request).await?;

            let classification = outcome
                .metrics
                .chat
                .failure_classification
                .as_ref()
                .map(|c| c.classification.to_string())
                .unwrap_or_default();
            println!(
                "{}: {} | {} turns, {} tool calls, {:.1}s -> {}",
                request.model,
                classification,
                outcome.run.total_turns,
                outcome.run.tool_calls_log.len(),
                outcome.metrics.wall_clock_s,
                outcome.results_dir.display(),
            );
            if let Some(err) = &outcome.run.transport_error {
                println!("  transport error: {err}");
            }
        }
        Command::Score { mode, ctx } => {
            let cards = evaluate_results(&config, mode, ctx)?;
            if cards.is_empty() {
                println!("no results under {}", config.models_dir.display());
            }
            for card in &cards {
                let classification = card
                    .classification
                    .as_ref()
                    .map(|c| c.classification.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<48} {:<2} {:>6.2}  {}",
                    card.model,
                    card.scores.letter_grade.to_string(),
                    card.total(),
                    classification,
                );
            }
        }
    }

    Ok(())
}
