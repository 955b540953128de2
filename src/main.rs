mod cli;

use reelscrape::{
    config::{self, Config},
    scrape::{
        providers::{StaticCatalogue, TmdbProvider, TMDB},
        BatchCoordinator, BatchEvent, BatchSummary, ErrorKind, ItemOutcome, JsonDirSink, MediaItem,
        MergeConfig, ProviderRegistry, SearchQuery, SearchTerm,
    },
};
use reelscrape_common::{Locale, MediaKind};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelscrape=debug,reelscrape_common=debug".to_string()
        } else {
            "reelscrape=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Providers => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let registry = build_registry(&config, cli.fixtures.as_deref())?;
            list_providers(&registry);
            Ok(())
        }
        Commands::Search {
            provider,
            kind,
            year,
            locale,
            query,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let registry = build_registry(&config, cli.fixtures.as_deref())?;
            let locale = match locale {
                Some(tag) => tag
                    .parse::<Locale>()
                    .with_context(|| format!("Invalid locale: {tag}"))?,
                None => config.default_locale(),
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(search(&registry, &provider, kind, year, locale, &query.join(" ")))
        }
        Commands::Scrape {
            items,
            out,
            provider,
            json,
        } => {
            let config = config::load_config_or_default(cli.config.as_deref())?;
            let registry = build_registry(&config, cli.fixtures.as_deref())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(scrape(
                &config,
                registry,
                &items,
                out.as_deref(),
                provider.as_deref(),
                json,
            ))
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelscrape {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Register TMDB (when configured) and any fixture providers.
fn build_registry(config: &Config, fixtures: Option<&Path>) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    if let Some(settings) = config.provider(TMDB) {
        let mut tmdb = TmdbProvider::new(settings.api_key.clone().unwrap_or_default())
            .with_default_locale(config.default_locale());
        if let Some(base_url) = &settings.base_url {
            tmdb = tmdb.with_base_url(base_url);
        }
        registry.register(Arc::new(tmdb));
    }

    if let Some(path) = fixtures {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixtures file: {:?}", path))?;
        let providers = StaticCatalogue::from_json(&content)
            .and_then(|catalogue| catalogue.into_providers())
            .with_context(|| format!("Invalid fixtures file: {:?}", path))?;
        for provider in providers {
            if let Some(replaced) = registry.register(Arc::new(provider)) {
                tracing::warn!("Fixture provider replaces '{}'", replaced.name());
            }
        }
    }

    Ok(registry)
}

fn list_providers(registry: &ProviderRegistry) {
    if registry.is_empty() {
        println!("No providers registered. Configure [providers.tmdb] or pass --fixtures.");
        return;
    }

    for provider in registry.iter() {
        let d = provider.descriptor();
        let status = if provider.is_available() { "✓" } else { "✗" };
        print!("{} {} ({})", status, d.name, d.display_name);
        if let Some(required) = &d.requires_id_from {
            print!(" [needs {} id]", required);
        }
        println!();
        println!(
            "  rate limit: {}/s, burst {}",
            d.rate_limit.requests_per_second, d.rate_limit.burst
        );
        for (kind, fields) in &d.capabilities {
            let names: Vec<&str> = fields.iter().map(|f| f.as_str()).collect();
            println!("  {}: {}", kind, names.join(", "));
        }
    }
}

async fn search(
    registry: &ProviderRegistry,
    provider: &str,
    kind: MediaKind,
    year: Option<u16>,
    locale: Locale,
    text: &str,
) -> Result<()> {
    let descriptor = registry
        .descriptor(provider)
        .with_context(|| format!("Unknown provider: {provider}"))?;
    let term = match descriptor.recognize_id(text) {
        Some(id) => SearchTerm::Id(id),
        None => SearchTerm::Text(text.to_string()),
    };
    let query = SearchQuery {
        kind,
        term,
        year,
        locale: descriptor.resolve_locale(&locale),
    };

    let results = match registry.search(provider, &query).await {
        Ok(results) => results,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            println!("No results.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    for result in results {
        print!("{:>2}. {} {}", result.rank + 1, result.id, result.title);
        if let Some(y) = result.year {
            print!(" ({})", y);
        }
        println!("  [confidence {:.2}]", result.confidence);
    }
    Ok(())
}

/// Build the merge configuration for a run: every supported field of one
/// provider, or the configured custom scraper.
fn merge_config_for(
    config: &Config,
    registry: &ProviderRegistry,
    items: &[MediaItem],
    provider: Option<&str>,
) -> Result<MergeConfig> {
    let configured = config.merge_config();
    let Some(provider) = provider else {
        if !config.has_custom_scraper() {
            anyhow::bail!("No [custom_scraper] configured; pass --provider to use a single provider");
        }
        return Ok(configured);
    };

    let descriptor = registry
        .descriptor(provider)
        .with_context(|| format!("Unknown provider: {provider}"))?;
    let kinds: BTreeSet<MediaKind> = items.iter().map(|item| item.kind).collect();
    let mut merge = MergeConfig::new();
    for kind in kinds {
        merge.extend(MergeConfig::single(
            provider,
            kind,
            descriptor.supported_fields(kind),
        ));
    }
    for (name, locale) in configured.locales {
        merge = merge.with_locale(name, locale);
    }
    Ok(merge)
}

async fn scrape(
    config: &Config,
    registry: ProviderRegistry,
    manifest: &Path,
    out: Option<&Path>,
    provider: Option<&str>,
    json: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read manifest: {:?}", manifest))?;
    let items: Vec<MediaItem> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse manifest: {:?}", manifest))?;

    let merge = merge_config_for(config, &registry, &items, provider)?;

    let mut coordinator = BatchCoordinator::new(Arc::new(registry), config.engine_config());
    if let Some(dir) = out {
        coordinator = coordinator.with_sink(Arc::new(JsonDirSink::new(dir)));
    }

    let mut handle = coordinator.submit_batch(items, &merge)?;

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling batch...");
            canceller.cancel();
        }
    });

    let mut summary = None;
    while let Some(event) = handle.next_event().await {
        match event {
            BatchEvent::Started { batch_id, total } => {
                tracing::info!("Batch {} started with {} item(s)", batch_id, total);
            }
            BatchEvent::Progress(progress) => {
                if let Some(label) = &progress.current_label {
                    eprintln!("[{}/{}] {}", progress.completed, progress.total, label);
                }
            }
            BatchEvent::ItemFinished(result) => {
                if json {
                    println!("{}", serde_json::to_string(&result)?);
                    continue;
                }
                match &result.outcome {
                    ItemOutcome::Succeeded { record } => {
                        println!("✓ {} ({} fields)", result.label, record.fields.len());
                    }
                    ItemOutcome::Partial {
                        record,
                        field_errors,
                    } => {
                        println!(
                            "~ {} ({} fields, {} missing)",
                            result.label,
                            record.fields.len(),
                            field_errors.len()
                        );
                        for fe in field_errors {
                            println!("    {}: {}", fe.field, fe.error);
                        }
                    }
                    ItemOutcome::Failed { error, .. } => {
                        println!("✗ {}: {}", result.label, error);
                    }
                }
            }
            BatchEvent::JobStateChanged { .. } => {}
            BatchEvent::Finished(s) => {
                summary = Some(s);
                break;
            }
        }
    }

    let summary = match summary {
        Some(summary) => summary,
        None => handle.join().await,
    };
    print_summary(&summary);

    if summary.cancelled {
        anyhow::bail!("Batch cancelled");
    }
    if summary.failed > 0 {
        anyhow::bail!("{} item(s) failed", summary.failed);
    }
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!();
    println!(
        "Done: {} succeeded, {} partial, {} failed, {} not attempted (of {})",
        summary.succeeded, summary.partial, summary.failed, summary.not_attempted, summary.total
    );
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!(
                "  Engine: {} concurrent jobs, {}s timeout, locale {}",
                config.engine.max_concurrent_jobs,
                config.engine.request_timeout_secs,
                config.default_locale()
            );
            println!(
                "  Providers: {}",
                config
                    .providers
                    .iter()
                    .filter(|(_, p)| p.enabled)
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let merge = config.merge_config();
            for (kind, fields) in &merge.assignments {
                println!("  Custom scraper {}: {} field(s)", kind, fields.len());
            }
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            println!(
                "  Engine: {} concurrent jobs, {}s timeout",
                config.engine.max_concurrent_jobs, config.engine.request_timeout_secs
            );
        }
    }

    Ok(())
}
