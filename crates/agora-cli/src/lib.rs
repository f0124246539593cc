//! # agora-cli
//!
//! Single-process CLI variant: run a debate from the local configuration
//! and stream it to the terminal, or start the HTTP server.
//!
//! Exit codes: 0 on success (including max rounds reached without
//! consensus), 1 on config or I/O errors, 2 when no debate personalities
//! are available.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use agora_config::AgoraConfig;
use agora_core::{
    AgoraError, CreateDebateRequest, DebateEventKind, DebateSettings, Result,
};
use agora_debates::{DebateService, MemoryBilling, ProviderFactory};
use agora_engine::PersonalityRegistry;
use agora_llm::build_provider;
use agora_store::{DebateRepository, SqliteStore, UsageStore};
use agora_usage::{PricingResolver, UsageService};

#[derive(Parser)]
#[command(name = "agora", version, about = "Multi-perspective LLM debates")]
pub struct Cli {
    /// Path to agora.yaml (defaults to ~/.agora/agora.yaml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one debate and stream it to the terminal.
    Ask {
        /// The question to debate.
        question: String,
        /// Provider tag override.
        #[arg(long)]
        provider: Option<String>,
        /// Model override.
        #[arg(long)]
        model: Option<String>,
        /// Comma-separated personality names (defaults from config).
        #[arg(long, value_delimiter = ',')]
        personalities: Vec<String>,
        /// Maximum debate rounds.
        #[arg(long)]
        rounds: Option<u32>,
        /// Skip the final synthesis.
        #[arg(long)]
        no_synthesis: bool,
    },
    /// Start the HTTP API server.
    Serve,
    /// List available personalities.
    Personalities,
}

/// Map an error to the process exit code contract.
pub fn exit_code_for(err: &AgoraError) -> i32 {
    match err {
        AgoraError::Validation { field, .. } if field == "personalities" => 2,
        _ => 1,
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let config = agora_config::load(self.config.as_deref())?;

        match self.command {
            Command::Ask {
                question,
                provider,
                model,
                personalities,
                rounds,
                no_synthesis,
            } => {
                run_ask(
                    &config,
                    question,
                    provider,
                    model,
                    personalities,
                    rounds,
                    no_synthesis,
                )
                .await
            }
            Command::Serve => {
                let service = build_service(&config)?;
                agora_server::start_server(config.server.clone(), config.auth.clone(), service)
                    .await
            }
            Command::Personalities => {
                let prompts = load_registry(&config)?;
                for name in prompts.debate_names() {
                    println!("{name}");
                }
                println!("(system) consensus_check");
                println!("(system) synthesizer");
                Ok(())
            }
        }
    }
}

fn load_registry(config: &AgoraConfig) -> Result<PersonalityRegistry> {
    let mut prompts = PersonalityRegistry::builtin();
    if let Some(dir) = &config.debate.prompts_dir {
        prompts.load_dir(dir)?;
    }
    Ok(prompts)
}

fn build_service(config: &AgoraConfig) -> Result<Arc<DebateService>> {
    let store = Arc::new(SqliteStore::open(&config.database.path)?);
    let pricing = Arc::new(PricingResolver::new(
        config.providers.openrouter_api_key.clone(),
    ));
    let usage = Arc::new(UsageService::new(
        pricing,
        Arc::clone(&store) as Arc<dyn UsageStore>,
    ));
    let prompts = Arc::new(load_registry(config)?);

    let providers = config.providers.clone();
    let factory: ProviderFactory = Arc::new(move |tag: &str| {
        build_provider(
            tag,
            providers.api_key_for(tag).map(str::to_string),
            providers.base_url_for(tag).map(str::to_string),
        )
    });

    Ok(Arc::new(DebateService::new(
        store as Arc<dyn DebateRepository>,
        usage,
        Arc::new(MemoryBilling::unlimited()),
        prompts,
        factory,
    )))
}

async fn run_ask(
    config: &AgoraConfig,
    question: String,
    provider: Option<String>,
    model: Option<String>,
    personalities: Vec<String>,
    rounds: Option<u32>,
    no_synthesis: bool,
) -> Result<()> {
    let registry = load_registry(config)?;
    let available = registry.debate_names();
    if available.is_empty() {
        return Err(AgoraError::validation(
            "personalities",
            "no debate personalities available",
        ));
    }

    let participants = if personalities.is_empty() {
        available.into_iter().take(3).collect()
    } else {
        personalities
    };

    let mut settings = DebateSettings {
        personalities: participants,
        include_synthesis: !no_synthesis,
        ..Default::default()
    };
    if let Some(rounds) = rounds {
        settings.max_rounds = rounds;
    }

    let request = CreateDebateRequest {
        question,
        provider: provider.unwrap_or_else(|| config.debate.provider.clone()),
        model: model.unwrap_or_else(|| config.debate.model.clone()),
        settings,
    };

    let service = build_service(config)?;
    let debate = service.create("local", request).await?;
    let mut rx = service.start_stream(debate.id, "local").await?;

    let mut failed: Option<String> = None;
    while let Some(event) = rx.recv().await {
        match event.kind {
            DebateEventKind::RoundStarted { round_number } => {
                println!("\n=== Round {round_number} ===");
            }
            DebateEventKind::PersonalityStarted { personality, .. } => {
                println!("\n--- {personality} ---");
            }
            DebateEventKind::AnswerChunk { content, .. }
            | DebateEventKind::ThinkingChunk { content, .. }
            | DebateEventKind::SynthesisChunk { content } => {
                print!("{content}");
            }
            DebateEventKind::PersonalityCompleted { .. } => println!(),
            DebateEventKind::ProgressUpdate { progress } => {
                if progress["phase"] == "consensus_result" {
                    let reached = progress["consensus_reached"].as_bool().unwrap_or(false);
                    let reasoning = progress["reasoning"].as_str().unwrap_or("");
                    println!(
                        "\n[consensus: {}] {reasoning}",
                        if reached { "reached" } else { "not reached" }
                    );
                }
            }
            DebateEventKind::SynthesisStarted => {
                println!("\n=== Synthesis ===");
            }
            DebateEventKind::DebateCompleted { cost, .. } => {
                println!("\n\ndone (total cost: ${cost})");
            }
            DebateEventKind::DebateFailed { error } => {
                failed = Some(error);
            }
            _ => {}
        }
    }

    match failed {
        // Cancellation and provider failures are I/O-class errors here.
        Some(error) => Err(AgoraError::provider("debate", error)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            exit_code_for(&AgoraError::Config("missing key".into())),
            1
        );
        assert_eq!(
            exit_code_for(&AgoraError::Io(std::io::Error::other("disk"))),
            1
        );
        assert_eq!(
            exit_code_for(&AgoraError::validation(
                "personalities",
                "no debate personalities available"
            )),
            2
        );
        assert_eq!(
            exit_code_for(&AgoraError::provider("anthropic", "boom")),
            1
        );
    }

    #[test]
    fn test_cli_parses_ask() {
        let cli = Cli::try_parse_from([
            "agora",
            "ask",
            "What is 2+2?",
            "--provider",
            "ollama",
            "--model",
            "llama3",
            "--personalities",
            "optimist,pessimist",
            "--rounds",
            "2",
        ])
        .unwrap();
        match cli.command {
            Command::Ask {
                question,
                provider,
                personalities,
                rounds,
                ..
            } => {
                assert_eq!(question, "What is 2+2?");
                assert_eq!(provider.as_deref(), Some("ollama"));
                assert_eq!(personalities, vec!["optimist", "pessimist"]);
                assert_eq!(rounds, Some(2));
            }
            _ => panic!("expected ask"),
        }
    }
}
