//! Tokengrid CLI: seed a market and run a deterministic simulation session.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{Level, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use tokengrid::{
    HardwareProfile, MarketConfig, MarketService, Matcher, QualityOracle, StaticQualityOracle,
    score_provider,
};

#[derive(Parser)]
#[command(name = "tokengrid", version, about = "Marketplace scheduler for LLM inference")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed providers and ads from a JSON file and run a simulated session
    Simulate {
        /// Seed file; a built-in demo market is used when omitted
        #[arg(short, long)]
        seed: Option<PathBuf>,

        /// Model requested by the simulated clients
        #[arg(short, long, default_value = "llama-3-70b")]
        model: String,

        /// Quality tier for every request
        #[arg(short, long, default_value = "standard")]
        tier: String,

        /// Number of request/usage/stop sessions to run
        #[arg(short, long, default_value_t = 4)]
        rounds: usize,
    },

    /// Print matcher scores for every provider in a seed file
    Score {
        /// Seed file; a built-in demo market is used when omitted
        #[arg(short, long)]
        seed: Option<PathBuf>,

        #[arg(short, long, default_value = "llama-3-70b")]
        model: String,

        #[arg(short, long, default_value = "standard")]
        tier: String,
    },
}

#[derive(Debug, Deserialize)]
struct MarketSeed {
    providers: Vec<ProviderSeed>,
    #[serde(default)]
    ads: Vec<AdSeed>,
}

#[derive(Debug, Deserialize)]
struct ProviderSeed {
    device: String,
    vram_gb: u32,
    core_count: u32,
    models: Vec<String>,
    price_per_token: f64,
}

#[derive(Debug, Deserialize)]
struct AdSeed {
    id: String,
    category: String,
    content: String,
    keywords: Vec<String>,
    cpm: f64,
    ctr: f64,
}

impl MarketSeed {
    fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading seed file {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing seed file {}", path.display()))
            }
            None => Ok(Self::demo()),
        }
    }

    fn demo() -> Self {
        Self {
            providers: vec![
                ProviderSeed {
                    device: "rtx-4090".to_string(),
                    vram_gb: 24,
                    core_count: 16,
                    models: vec!["llama-3-70b".to_string(), "mistral-7b".to_string()],
                    price_per_token: 0.0001,
                },
                ProviderSeed {
                    device: "rtx-3070".to_string(),
                    vram_gb: 8,
                    core_count: 8,
                    models: vec!["llama-3-70b".to_string()],
                    price_per_token: 0.00005,
                },
                ProviderSeed {
                    device: "a100".to_string(),
                    vram_gb: 80,
                    core_count: 32,
                    models: vec!["llama-3-70b".to_string(), "mistral-7b".to_string()],
                    price_per_token: 0.0004,
                },
            ],
            ads: vec![AdSeed {
                id: "gpu-cloud".to_string(),
                category: "cloud".to_string(),
                content: "SpinUp GPU Cloud - rent by the minute".to_string(),
                keywords: vec!["gpu".to_string(), "inference".to_string(), "model".to_string()],
                cpm: 2.0,
                ctr: 0.08,
            }],
        }
    }
}

fn seed_service(seed: &MarketSeed) -> Result<MarketService> {
    let service = MarketService::new(MarketConfig::default());
    for p in &seed.providers {
        let models: HashSet<String> = p.models.iter().cloned().collect();
        let hardware = HardwareProfile {
            name: p.device.clone(),
            vram_gb: p.vram_gb,
            core_count: p.core_count,
        };
        let id = service.register_provider(hardware, models, p.price_per_token)?;
        info!(provider_id = %id, device = %p.device, "seeded provider");
    }
    for a in &seed.ads {
        service.ads().upsert_ad(tokengrid::Ad::new(
            a.id.clone(),
            a.category.clone(),
            a.content.clone(),
            a.keywords.iter().cloned().collect(),
            a.cpm,
            a.ctr,
        ));
    }
    Ok(service)
}

async fn simulate(seed: MarketSeed, model: &str, tier: &str, rounds: usize) -> Result<()> {
    let service = seed_service(&seed)?;

    for round in 0..rounds {
        let prompt = format!("Round {round}: which GPU model is best for inference? Be brief.");
        let augmented = service.inject_ad(&prompt, "sim-user");
        if augmented != prompt {
            info!(round, "ad injected into prompt");
        }

        let admission = match service.request_stream(model, tier).await {
            Ok(admission) => admission,
            Err(err) => {
                info!(round, %err, "no capacity this round");
                continue;
            }
        };

        // Deterministic usage pattern: two chunks per round.
        let chunk = 250 + (round as i64 * 50);
        service.report_usage(admission.stream_id, chunk, 120.0).await?;
        service.report_usage(admission.stream_id, chunk, 80.0).await?;

        let summary = service
            .end_stream(admission.provider_id, admission.stream_id)
            .await?;
        info!(
            round,
            provider_id = %summary.provider_id,
            tokens = summary.tokens_processed,
            earnings = summary.earnings,
            "session settled"
        );
    }

    let status = service.system_status();
    println!("{}", serde_json::to_string_pretty(&status)?);
    println!(
        "{}",
        serde_json::to_string_pretty(&service.stream_history())?
    );
    for entry in service.top_providers(5) {
        println!(
            "{}  {}  earnings={:.6}  tokens={}",
            entry.provider_id, entry.device, entry.total_earnings, entry.total_tokens_served
        );
    }
    for day in service.revenue_by_day() {
        println!("{}  revenue={:.6}", day.date, day.amount);
    }
    Ok(())
}

fn score(seed: MarketSeed, model: &str, tier: &str) -> Result<()> {
    let service = seed_service(&seed)?;
    let oracle = StaticQualityOracle::default();
    let multiplier = oracle.multiplier(tier);

    let mut providers = service.registry().list_idle_capable(model);
    providers.sort_by(|a, b| {
        score_provider(b, multiplier).total_cmp(&score_provider(a, multiplier))
    });
    for p in &providers {
        println!(
            "{:10}  vram={:3}GB  cores={:3}  price={:.6}  score={:.3}",
            p.hardware.name,
            p.hardware.vram_gb,
            p.hardware.core_count,
            p.price_per_token,
            score_provider(p, multiplier)
        );
    }

    let matcher = Matcher::new(service.registry(), &oracle);
    match matcher.find_provider(model, tier) {
        Ok(best) => println!("=> would admit {}", best.hardware.name),
        Err(err) => println!("=> {err}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match args.command {
        Commands::Simulate {
            seed,
            model,
            tier,
            rounds,
        } => {
            let seed = MarketSeed::load(seed.as_deref())?;
            simulate(seed, &model, &tier, rounds).await
        }
        Commands::Score { seed, model, tier } => {
            let seed = MarketSeed::load(seed.as_deref())?;
            score(seed, &model, &tier)
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
}
