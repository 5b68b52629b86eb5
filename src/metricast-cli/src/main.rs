//! Metricast CLI - Scripted metrics podcast generator
//!
//! A command-line tool that turns a metrics dataset into a three-voice
//! podcast episode: one WAV file plus a transcript.

use clap::{Parser, ValueEnum};
use colored::Colorize;
use metricast_core::{
    Config, ContextSelector, KokoroSynthesizer, OAuthConfig, OpenAiGenerator, PodcastEvent,
    PodcastOrchestrator, PodcastRequest, Speaker, TokenProvider, TokenSource, default_config,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "metricast",
    version,
    about = "Generate a scripted metrics podcast from JSON data",
    long_about = "Runs a host and two analyst personas over a metrics dataset and renders \
                  the conversation to a single WAV file with a transcript."
)]
struct Cli {
    /// Episode topic (inferred from the context data when omitted)
    #[arg(value_name = "TOPIC")]
    topic: Option<String>,

    /// Number of full analyst exchange pairs
    #[arg(short = 't', long, default_value = "6", value_name = "TURNS")]
    max_turns: u32,

    /// Which context files to load
    #[arg(long, value_enum, default_value = "both")]
    context: ContextArg,

    /// Directory containing data.json / metric_data.json
    #[arg(long, default_value = ".", value_name = "DIR")]
    context_dir: PathBuf,

    /// Where the audio, script, and trace files are written
    #[arg(short = 'o', long, default_value = ".", value_name = "DIR")]
    output_dir: PathBuf,

    /// Seed for the conversation-dynamics randomness (reproducible styling)
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Maximum node executions before the run is aborted
    #[arg(long, default_value = "60", value_name = "STEPS")]
    step_limit: u32,

    /// Also write a JSON execution trace
    #[arg(long)]
    trace: bool,

    /// TOML configuration file (personas, voices, prompts, dynamics)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured LLM model
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ContextArg {
    Both,
    Data,
    Metrics,
}

impl From<ContextArg> for ContextSelector {
    fn from(arg: ContextArg) -> Self {
        match arg {
            ContextArg::Both => ContextSelector::Both,
            ContextArg::Data => ContextSelector::Data,
            ContextArg::Metrics => ContextSelector::Metrics,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => default_config(),
    };
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }

    let max_turns = cli.max_turns.max(1);
    if cli.max_turns == 0 {
        eprintln!("{}", "Warning: turns increased to minimum of 1.".yellow());
    }

    let api_base = env::var("OPENAI_API_BASE")
        .or_else(|_| env::var("OPENAI_BASE_URL"))
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let token = token_source_from_env()?;

    // Header
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - scripted metrics podcast", "Metricast".bold())
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!(
        "{} {}",
        "Voices:".bold(),
        format!(
            "{} (host), {} (recommendations), {} (data integrity)",
            config.personas.host.name.bright_cyan(),
            config.personas.analyst_a.name.bright_green(),
            config.personas.analyst_b.name.bright_yellow(),
        )
    );
    println!("{} {}", "Model:".bold(), config.llm.model.dimmed());
    println!("{}", "─".repeat(70).dimmed());

    let generator = OpenAiGenerator::new(api_base, config.llm.model.clone(), token);
    let synthesizer = KokoroSynthesizer::new(config.voices.clone()).await?;

    let mut orchestrator = PodcastOrchestrator::new(
        config,
        Arc::new(generator),
        Arc::new(synthesizer),
        cli.seed,
    )
    .with_callback(create_console_callback());

    let request = PodcastRequest {
        topic: cli.topic,
        max_turns,
        context_dir: cli.context_dir,
        context: cli.context.into(),
        session_id: None,
        step_limit: cli.step_limit,
        output_dir: cli.output_dir,
        write_trace: cli.trace,
    };

    let summary = orchestrator.generate(request).await?;

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Episode complete.".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Audio:".bold(), summary.audio_file.display());
    println!("{} {}", "Script:".bold(), summary.script_file.display());
    if let Some(trace) = &summary.trace_file {
        println!("{} {}", "Trace:".bold(), trace.display());
    }
    println!(
        "{} {:.1} s over {} analyst turns",
        "Duration:".bold(),
        summary.duration_seconds,
        summary.turns_completed
    );
    println!();

    Ok(())
}

/// Build the LLM credential from the environment: OAuth client credentials
/// when an auth URL is configured, otherwise a plain API key.
fn token_source_from_env() -> Result<TokenSource, Box<dyn std::error::Error>> {
    if let Ok(auth_url) = env::var("LLM_AUTH_URL") {
        let provider = TokenProvider::new(OAuthConfig {
            auth_url,
            grant_type: env::var("LLM_GRANT_TYPE")
                .unwrap_or_else(|_| "client_credentials".to_string()),
            scope: env::var("LLM_SCOPE").unwrap_or_default(),
            client_id: env::var("LLM_CLIENT_ID")?,
            client_secret: env::var("LLM_CLIENT_SECRET")?,
        })?;
        return Ok(TokenSource::OAuth(Arc::new(provider)));
    }

    let api_key = env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!(
            "{}",
            "Warning: OPENAI_API_KEY not set. API calls may fail.".yellow()
        );
        String::new()
    });
    Ok(TokenSource::Static(api_key))
}

/// Create a callback that prints generation events to the console.
fn create_console_callback() -> Box<dyn Fn(&PodcastEvent) + Send + Sync> {
    Box::new(move |event| match event {
        PodcastEvent::Started { session_id, topic } => {
            println!();
            println!("{} {}", "Topic:".bold(), topic.bright_white());
            println!("{} {}", "Session:".bold(), session_id.dimmed());
            println!();
        }
        PodcastEvent::PhaseStarted { .. } => {}
        PodcastEvent::LineSpoken { speaker, name, text } => {
            let colored_name = match speaker {
                Speaker::AnalystA => name.bright_green().bold(),
                Speaker::AnalystB => name.bright_yellow().bold(),
                _ => name.bright_cyan().bold(),
            };
            println!("{} {}", "▶".bright_cyan(), colored_name);
            for line in textwrap(text, 66).lines() {
                println!("  {}", line);
            }
            println!();
        }
        PodcastEvent::Finalizing => {
            println!("{}", "Mixing audio...".dimmed());
        }
        PodcastEvent::Completed { .. } => {
            // Handled in main
        }
    })
}

/// Simple text wrapping function.
fn textwrap(text: &str, width: usize) -> String {
    let mut result = String::new();
    let mut current_line_len = 0;

    for word in text.split_whitespace() {
        if current_line_len + word.len() + 1 > width && current_line_len > 0 {
            result.push('\n');
            current_line_len = 0;
        }
        if current_line_len > 0 {
            result.push(' ');
            current_line_len += 1;
        }
        result.push_str(word);
        current_line_len += word.len();
    }

    result
}
