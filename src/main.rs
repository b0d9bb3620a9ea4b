use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tariff_core::util::country;
use tariff_core::{
    CalculationFlags, DutyCalculationResult, DutyCalculator, HtsClient, ShardCache,
    DEFAULT_SEARCH_LIMIT,
};

#[derive(Parser)]
#[command(
    name = "tariff",
    version,
    about = "Import duty lookup over the segmented classification store"
)]
struct Cli {
    /// Override the remote store base URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Autocomplete classification codes by prefix.
    Search {
        prefix: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Show the record behind an exact 8-digit code.
    Lookup { code: String },
    /// Calculate total duty and fees for a shipment.
    Duty {
        code: String,
        /// Declared customs value in USD.
        value: f64,
        /// 2-letter origin country code.
        country: String,
        /// Shipment carries a USMCA certificate of origin.
        #[arg(long)]
        usmca: bool,
        /// Exclude reciprocal-tariff layers from the breakdown.
        #[arg(long)]
        no_reciprocal: bool,
    },
    /// Download high-volume chapter shards into the local cache.
    Prewarm,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let cache = ShardCache::open_default().context("opening shard cache")?;
    let client = match cli.base_url.as_deref() {
        Some(base) => HtsClient::with_base_url(base, cache)?,
        None => HtsClient::new(cache)?,
    };
    client.initialize().await.context("loading segment index")?;

    match cli.command {
        Command::Search { prefix, limit } => {
            let hits = client.search_by_prefix(&prefix, limit).await?;
            if hits.is_empty() {
                println!("no matches for {prefix}");
            }
            for hit in hits {
                println!("{}  {}", hit.code, hit.description);
            }
        }
        Command::Lookup { code } => {
            let code = country::clean_code(&code);
            match client.lookup(&code).await? {
                Some(record) => {
                    println!("{}  {}", record.code, record.description);
                    println!("  MFN rate:      {:.2}%", record.base_rate);
                    println!("  Column 2 rate: {:.2}%", record.column2_rate);
                    for rule in &record.additive_duties {
                        println!("  layer: {} ({:.2}%)", rule.label, rule.rate);
                    }
                }
                None => println!("no entry for {code}"),
            }
        }
        Command::Duty {
            code,
            value,
            country: origin,
            usmca,
            no_reciprocal,
        } => {
            let code = country::clean_code(&code);
            if !country::is_valid_code(&code) {
                bail!("classification code must be exactly 8 digits, got {code:?}");
            }
            if !value.is_finite() || value <= 0.0 {
                bail!("declared value must be a positive amount");
            }
            let origin = origin.to_ascii_uppercase();
            if origin.len() != 2 || !origin.bytes().all(|b| b.is_ascii_alphabetic()) {
                bail!("country must be a 2-letter code, got {origin:?}");
            }

            let flags = CalculationFlags {
                exclude_reciprocal: no_reciprocal,
                usmca_origin: usmca,
                ..Default::default()
            };
            let calculator = DutyCalculator::new(Arc::new(client));
            match calculator.calculate(&code, value, &origin, flags).await? {
                Some(result) => print_result(&result, value),
                None => println!("no entry for {code}"),
            }
        }
        Command::Prewarm => {
            client.prewarm().await;
        }
    }

    Ok(())
}

fn print_result(result: &DutyCalculationResult, declared_value: f64) {
    println!("{}  {}", result.code, result.description);
    println!("declared value: ${declared_value:.2}");
    println!();
    for component in &result.components {
        println!(
            "  {:<40} {:>7.2}%  ${:>12.2}",
            component.label, component.rate, component.amount
        );
    }
    println!(
        "  {:<40} {:>7.2}%  ${:>12.2}",
        "duty subtotal", result.total_rate, result.duty_only
    );
    println!(
        "  {:<40} {:>7.4}%  ${:>12.2}",
        "merchandise processing fee", result.fees.mpf.rate, result.fees.mpf.amount
    );
    println!(
        "  {:<40} {:>7.4}%  ${:>12.2}",
        "harbor maintenance fee", result.fees.hmf.rate, result.fees.hmf.amount
    );
    println!();
    println!("  total duty & fees: ${:.2}", result.amount);
}
