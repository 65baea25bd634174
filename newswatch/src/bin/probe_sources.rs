use clap::Parser;
use common::Config;
use std::path::PathBuf;

use newswatch::app::build_fetchers;
use newswatch::model::{parse_sources, MonitoringRequest};
use newswatch::sources::{suggest_sources, SourceFetcher};

/// Runs the source fetchers for one company and prints the raw items.
#[derive(Parser, Debug)]
#[command(name = "probe_sources")]
struct Args {
    company: String,

    #[arg(long, value_name = "FILE", default_value = "config.default.toml")]
    config: PathBuf,

    /// web, channel, forum (repeatable)
    #[arg(long = "source")]
    sources: Vec<String>,

    #[arg(long = "url")]
    urls: Vec<String>,

    #[arg(long = "channel")]
    channels: Vec<String>,

    #[arg(long = "community")]
    communities: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config).await?;

    let (mut urls, mut channels) = (args.urls, args.channels);
    if urls.is_empty() && channels.is_empty() {
        let suggestion = suggest_sources(&args.company);
        urls = suggestion.urls;
        channels = suggestion.channels;
    }

    let sources = parse_sources(Some(args.sources.as_slice()), &args.communities)?;
    let request = MonitoringRequest::new(args.company)
        .with_sources(sources)
        .with_urls(urls)
        .with_channels(channels)
        .with_communities(args.communities)
        .validate()?;

    for fetcher in build_fetchers(&config)? {
        let source = fetcher.source();
        if !request.sources.contains(&source) {
            continue;
        }
        let targets = request.targets_for(source);

        println!("\n{}", "=".repeat(60));
        println!("Source: {} ({} targets)", source, targets.len());
        println!("{}", "=".repeat(60));

        match fetcher.fetch(&request.company, &targets, request.since).await {
            Ok(items) => {
                println!("✓ {} items", items.len());
                for (i, item) in items.iter().enumerate() {
                    println!("  {}. {}", i + 1, if item.title.is_empty() { "(untitled)" } else { &item.title });
                    println!("     URL: {}", item.url);
                    println!(
                        "     Published: {}",
                        item.published_at.map(|d| d.to_rfc3339()).unwrap_or_else(|| "unknown".to_string())
                    );
                    println!("     Text: {} chars", item.text.chars().count());
                }
            }
            Err(e) => println!("✗ Failed: {}", e),
        }
    }

    Ok(())
}
