use common::Config;
use std::sync::Arc;

use newswatch::llm::create_provider;
use newswatch::model::{ItemExtras, RawItem, Source};
use newswatch::processing::{Normalizer, NormalizerSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "config.default.toml".to_string());
    let config = Config::from_file(&path).await?;

    let provider = create_provider(&config.llm.clone().unwrap_or_default())?;
    let settings = NormalizerSettings::from_config(&config.normalize())?;

    println!("\n{}", "=".repeat(60));
    println!("Testing LLM normalization");
    println!("Model: {}", provider.model());
    println!("Target language: {}", settings.target_language);
    println!("{}", "=".repeat(60));

    println!("\n[Health]");
    match provider.health().await {
        Ok(models) => println!("✓ Reachable, models: {:?}", models),
        Err(e) => eprintln!("✗ Unreachable: {:#}", e),
    }

    let normalizer = Normalizer::new(Arc::clone(&provider), settings);
    let item = RawItem {
        source: Source::Web,
        company: "Apple".to_string(),
        title: "Apple unveils new iPhone".to_string(),
        text: "Apple today announced the new iPhone with a redesigned camera system, a faster chip \
               and longer battery life. Pre-orders begin Friday and the phone ships next week."
            .to_string(),
        url: "https://www.apple.com/newsroom/2026/09/apple-unveils-new-iphone/".to_string(),
        published_at: None,
        extras: ItemExtras::default(),
    };

    println!("\n[Normalize]");
    let normalized = normalizer.normalize(item).await;
    if normalized.processed {
        println!("✓ Success!");
    } else {
        println!("✗ Degraded: {:?}", normalized.failure);
    }
    println!("  Summary: {}", normalized.summary);
    println!("  Event type: {}", normalized.event_type.as_str());
    println!("  Sentiment: {}", normalized.sentiment.as_str());

    Ok(())
}
