use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use supportbundles::bundle::{Bundle, Principal};

#[derive(Parser)]
#[command(
    name = "supportbundles",
    about = "Diagnostic support bundle lifecycle service",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + cleanup loop)
    Serve {
        /// Bind address, overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Create a bundle and wait for it to finish
    Create {
        /// Collectors to run (comma separated); all when omitted
        #[arg(long, value_delimiter = ',')]
        collectors: Vec<String>,

        /// Recorded as the bundle creator
        #[arg(long, default_value = "cli")]
        creator: String,
    },

    /// List all bundles
    List,

    /// Show one bundle
    Get {
        uid: String,
    },

    /// Remove a finished bundle
    Remove {
        uid: String,
    },

    /// Write the archive of a complete bundle to a file
    Export {
        uid: String,

        /// Output file path (defaults to support-bundle-<uid>.tar.zst)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run one cleanup sweep now
    Cleanup,

    /// Print usage stats as JSON
    Stats,

    /// List registered collectors
    Collectors,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = supportbundles::load_config(cli.config.as_deref())?;
    supportbundles::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            config.validate()?;
            tracing::info!(bind = %config.server.bind, "Starting supportbundles daemon");
            supportbundles::serve(config).await?;
        }
        Commands::Create { collectors, creator } => {
            let service = supportbundles::build_service(&config)?;
            let bundle = service.create(collectors, &Principal::new(creator)).await?;
            println!("Created bundle {} (pending), collecting...", bundle.uid);

            let bundle = loop {
                let current = service.get(&bundle.uid).await?;
                if current.state.is_terminal() {
                    break current;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            };
            print_bundle(&bundle);
        }
        Commands::List => {
            let service = supportbundles::build_service(&config)?;
            let list = service.list().await?;
            if list.is_empty() {
                println!("No support bundles found.");
            } else {
                println!(
                    "{:<36} | {:<8} | {:<12} | {:<25} | Expires",
                    "UID", "State", "Creator", "Created"
                );
                println!("{:-<36}-|-{:-<8}-|-{:-<12}-|-{:-<25}-|-{:-<25}", "", "", "", "", "");
                for b in list {
                    println!(
                        "{:<36} | {:<8} | {:<12} | {:<25} | {}",
                        b.uid,
                        b.state,
                        b.creator,
                        b.created_at.to_rfc3339(),
                        b.expires_at.to_rfc3339()
                    );
                }
            }
        }
        Commands::Get { uid } => {
            let service = supportbundles::build_service(&config)?;
            print_bundle(&service.get(&uid).await?);
        }
        Commands::Remove { uid } => {
            let service = supportbundles::build_service(&config)?;
            service.remove(&uid).await?;
            println!("Bundle '{}' removed.", uid);
        }
        Commands::Export { uid, output } => {
            let service = supportbundles::build_service(&config)?;
            let bundle = service.get(&uid).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(bundle.download_filename()));
            let archive = bundle
                .archive
                .with_context(|| format!("bundle {} has no archive (state: {})", uid, bundle.state))?;
            std::fs::write(&output, &archive)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Wrote {} bytes to {}", archive.len(), output.display());
        }
        Commands::Cleanup => {
            let service = supportbundles::build_service(&config)?;
            let report = service.cleanup().await;
            println!(
                "Removed {}, failed {} abandoned, skipped {} pending, {} failed.",
                report.removed, report.abandoned, report.skipped_pending, report.failed
            );
        }
        Commands::Stats => {
            let service = supportbundles::build_service(&config)?;
            let stats = service.usage_stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Collectors => {
            let service = supportbundles::build_service(&config)?;
            println!("{:<12} | {:<9} | Description", "Collector", "Mandatory");
            println!("{:-<12}-|-{:-<9}-|-{:-<40}", "", "", "");
            for meta in service.registry().list() {
                println!("{:<12} | {:<9} | {}", meta.uid, meta.mandatory, meta.description);
            }
        }
    }

    Ok(())
}

fn print_bundle(bundle: &Bundle) {
    println!("\n=== Support Bundle {} ===", bundle.uid);
    println!("State:    {}", bundle.state);
    println!("Creator:  {}", bundle.creator);
    println!("Created:  {}", bundle.created_at.to_rfc3339());
    println!("Expires:  {}", bundle.expires_at.to_rfc3339());
    if let Some(size) = bundle.archive_size.or(bundle.archive.as_ref().map(|a| a.len() as u64)) {
        println!("Archive:  {} bytes", size);
    }
    if let Some(error) = &bundle.error {
        println!("Error:    {}", error);
    }
    for failure in &bundle.collector_errors {
        println!(" - collector {} failed: {}", failure.collector, failure.error);
    }
    println!();
}
