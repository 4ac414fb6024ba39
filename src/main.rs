mod cache;
mod config;
mod generator;
mod ids;
mod levels;
mod models;
mod mutate;
mod normalize;
mod pipeline;
mod scraper;
mod upload;
mod validate;
mod variants;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::cache::Cache;
use crate::config::{ConfigError, PipelineConfig};
use crate::generator::OpenAiChat;
use crate::ids::RandomIds;
use crate::levels::{LevelAllocator, DEFAULT_LEVELS};
use crate::models::{InputFile, PageVariant};
use crate::pipeline::{BuildOptions, Services};
use crate::scraper::{ApifyActor, ScrapeSource, SpiderSource};
use crate::upload::{ConvexClient, Uploader};

#[derive(Parser)]
#[command(name = "dust_pipeline", about = "Build DUST levels from real web pages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape, mutate, level, cache and upload a URL list
    Build {
        /// JSON input file with projectId and urls
        #[arg(short, long)]
        input: PathBuf,
        /// Override the input's projectId
        #[arg(short, long)]
        project: Option<String>,
        /// Number of difficulty levels
        #[arg(short, long, default_value_t = DEFAULT_LEVELS)]
        levels: u32,
        /// Cache results locally but skip the upload
        #[arg(long)]
        no_upload: bool,
    },
    /// Run sanitize, truncate and extract on a local HTML file
    Normalize {
        #[arg(short, long)]
        file: PathBuf,
        /// Base URL for resolving relative links
        #[arg(short, long)]
        url: String,
        #[arg(long)]
        max_words: Option<usize>,
    },
    /// Show level capacities and mutation parameters
    Plan {
        #[arg(short, long, default_value_t = DEFAULT_LEVELS)]
        levels: u32,
    },
    /// Validate cached variant files
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build {
            input,
            project,
            levels,
            no_upload,
        } => build(input, project, levels, no_upload).await,
        Commands::Normalize {
            file,
            url,
            max_words,
        } => {
            let cfg = PipelineConfig::load()?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let page = normalize::normalize_page(&raw, &url, max_words.unwrap_or(cfg.max_words));
            println!("{}", serde_json::to_string_pretty(&page.elements)?);
            println!(
                "{} elements, {} assets, {} bytes of HTML",
                page.elements.len(),
                page.assets.len(),
                page.html.len()
            );
            Ok(())
        }
        Commands::Plan { levels } => {
            if levels == 0 {
                bail!("--levels must be at least 1");
            }
            println!(
                "{:>5} | {:>8} | {:>8} | {:>8} | {:>9}",
                "Level", "Capacity", "FakeRate", "Subtlety", "MaxSpans"
            );
            println!("{}", "-".repeat(50));
            for (i, cap) in levels::plan(levels).iter().enumerate() {
                let d = i as u32 + 1;
                let p = levels::mutation_params(d, levels);
                println!(
                    "{:>5} | {:>8} | {:>8} | {:>8} | {:>9}",
                    d, cap, p.fake_rate, p.subtlety, p.max_fake_spans
                );
            }
            println!(
                "\n{} pages fit; extras go to <project>_unassigned at difficulty {}",
                levels::plan(levels).iter().sum::<usize>(),
                levels::extra_difficulty(levels)
            );
            Ok(())
        }
        Commands::Validate { files } => {
            let mut rejected = 0usize;
            for file in &files {
                let raw = std::fs::read_to_string(file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let variant: PageVariant = serde_json::from_str(&raw)
                    .with_context(|| format!("{} is not a page variant", file.display()))?;
                let counts = validate::count_sections(&variant.altered_content);
                match validate::validate(&variant) {
                    Ok(()) => println!(
                        "OK      {} ({} fake / {} true sections)",
                        variant.variant_id, counts.fake, counts.truthful
                    ),
                    Err(reason) => {
                        rejected += 1;
                        println!("REJECT  {}: {}", variant.variant_id, reason);
                    }
                }
            }
            println!("\n{}/{} variants valid", files.len() - rejected, files.len());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn build(
    input: PathBuf,
    project: Option<String>,
    levels: u32,
    no_upload: bool,
) -> anyhow::Result<()> {
    if levels == 0 {
        bail!("--levels must be at least 1");
    }
    let raw = std::fs::read_to_string(&input)
        .with_context(|| format!("Failed to read input file {}", input.display()))?;
    let file: InputFile = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid input file {}", input.display()))?;
    let urls = file.resolved_urls();
    if urls.is_empty() {
        bail!("Input file {} lists no URLs", input.display());
    }
    let project_id = project.unwrap_or(file.project_id);

    let cfg = PipelineConfig::load()?;
    let services = services(&cfg, no_upload)?;
    let opts = BuildOptions {
        project_id,
        allocator: LevelAllocator::new(levels, cfg.allocation),
        workers: cfg.workers,
        retries: cfg.retries,
        max_words: cfg.max_words,
        cache: Some(Cache::new(&cfg.cache_dir)),
    };

    println!(
        "Building project {} from {} URLs ({} levels, {} workers)...",
        opts.project_id,
        urls.len(),
        levels,
        opts.workers
    );
    let summary = pipeline::run_build(&urls, &opts, &services).await?;

    println!(
        "Scraped {}/{} URLs, {} eligible pages.",
        summary.scraped, summary.requested, summary.eligible
    );
    println!(
        "Generated {}/{} valid variants ({} rejected) across {} levels.",
        summary.valid, summary.attempted, summary.rejected, summary.levels
    );
    match summary.upload {
        Some(r) => println!(
            "Uploaded {}/{} pages, {}/{} levels, {}/{} variants ({} skipped as invalid).",
            r.pages.ok,
            r.pages.total,
            r.levels.ok,
            r.levels.total,
            r.variants.ok,
            r.variants.total,
            r.skipped_variants
        ),
        None => println!("Upload skipped; results cached in {}.", cfg.cache_dir),
    }
    Ok(())
}

fn services(cfg: &PipelineConfig, no_upload: bool) -> anyhow::Result<Services> {
    let mut sources: Vec<Arc<dyn ScrapeSource>> = Vec::new();
    if let Some(token) = cfg.apify_token.as_deref() {
        sources.push(Arc::new(ApifyActor::new(
            token,
            &cfg.apify_actor_id,
            cfg.apify_timeout_secs,
        )));
        if let Some(fallback) = cfg.apify_fallback_actor_id.as_deref() {
            sources.push(Arc::new(ApifyActor::new(token, fallback, cfg.apify_timeout_secs)));
        }
    }
    if let Some(key) = cfg.spider_api_key.as_deref() {
        sources.push(Arc::new(SpiderSource::new(key)?));
    }
    if sources.is_empty() {
        return Err(ConfigError::Missing("apify_token").into());
    }

    let generator = OpenAiChat::new(&cfg.llm_base_url, cfg.llm_api_key()?, &cfg.llm_model, cfg.workers)?;

    let uploader: Option<Arc<dyn Uploader>> = match (&cfg.convex_url, no_upload) {
        (Some(url), false) => Some(Arc::new(ConvexClient::new(url)?)),
        _ => None,
    };

    Ok(Services {
        sources,
        generator: Arc::new(generator),
        uploader,
        ids: Arc::new(RandomIds),
    })
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
