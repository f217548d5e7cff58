//! PadangLens - Padang dish recognition from photos
//!
//! Command-line front end over the `padang_lens` library.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use padang_lens::acquisition::UploadedFile;
use padang_lens::catalog::DishCatalog;
use padang_lens::config::{self, AppConfig};
use padang_lens::storage;
use padang_lens::vision::{Classification, FoodClassifier, ModelArtifact, ModelManager};

/// PadangLens - recognise Padang dishes from a photo
#[derive(Parser, Debug)]
#[command(name = "padang-lens")]
#[command(about = "Recognise Padang dishes from photos")]
struct Args {
    /// Configuration file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify an image file
    Classify {
        /// Image to classify
        image: PathBuf,

        /// Seed for the ranking randomness
        #[arg(long)]
        seed: Option<u64>,

        /// Score jitter amplitude (0 disables)
        #[arg(long)]
        jitter: Option<f32>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Dish catalog JSON to use instead of the bundled one
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Never download models
        #[arg(long)]
        offline: bool,
    },
    /// List the dishes in the catalog
    Catalog {
        #[arg(long)]
        json: bool,

        /// Dish catalog JSON to use instead of the bundled one
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Show cached model artifacts
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_or_create_config(args.config.as_deref());

    match args.command {
        Command::Classify {
            image,
            seed,
            jitter,
            json,
            catalog,
            offline,
        } => {
            let mut config = config;
            if let Some(seed) = seed {
                config.matcher.seed = Some(seed);
            }
            if let Some(jitter) = jitter {
                config.matcher.jitter = jitter;
            }
            config.model.offline |= offline;

            let catalog = load_catalog(catalog.as_deref())?;
            run_classify(&image, catalog, config, json).await
        }
        Command::Catalog { json, catalog } => {
            let catalog = load_catalog(catalog.as_deref())?;
            print_catalog(&catalog, json)
        }
        Command::Models => show_models(&config).await,
    }
}

/// Load configuration from file or create default
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => storage::get_config_dir().ok().map(|dir| dir.join("config.toml")),
    };

    if let Some(config_path) = path {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => warn!("Ignoring unreadable configuration {:?}: {:#}", config_path, e),
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn load_catalog(path: Option<&Path>) -> Result<DishCatalog> {
    match path {
        Some(path) => DishCatalog::load(path),
        None => DishCatalog::builtin(),
    }
}

async fn run_classify(image: &Path, catalog: DishCatalog, config: AppConfig, json: bool) -> Result<()> {
    let file = UploadedFile::from_path(image)?;
    let classifier = FoodClassifier::from_config(catalog, config);

    let mode = classifier.warm_up().await;
    info!("Recognition mode: {}", mode);

    let classification = classifier
        .classify_upload(&file)
        .await
        .with_context(|| format!("Could not classify {:?}", image))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
    } else {
        print_classification(&classification);
    }
    Ok(())
}

fn print_classification(classification: &Classification) {
    println!(
        "Mode: {}  ({} ms)",
        classification.mode, classification.elapsed_ms
    );
    for (rank, prediction) in classification.results.iter().enumerate() {
        println!(
            "  {}. {} ({}) - {:.0}% confidence, match {:.0}%",
            rank + 1,
            prediction.dish.localized_name,
            prediction.dish.english_name,
            prediction.confidence * 100.0,
            prediction.match_score * 100.0
        );
    }
    if let Some(accuracy) = classification.model_accuracy {
        println!("Classifier accuracy: {:.1}%", accuracy * 100.0);
    }
    if classification.is_confident_match {
        println!("Confident match.");
    } else {
        println!("Not a confident match - try a closer, well-lit photo.");
    }
}

fn print_catalog(catalog: &DishCatalog, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(catalog.dishes())?);
        return Ok(());
    }

    println!("{} dishes:", catalog.len());
    for dish in catalog.dishes() {
        println!(
            "  {:<16} {} / {} [{:?}, {}]",
            dish.id, dish.localized_name, dish.english_name, dish.spice_level, dish.region
        );
    }
    Ok(())
}

async fn show_models(config: &AppConfig) -> Result<()> {
    let manager = ModelManager::new(&config.model)?;

    println!("Models directory: {}", manager.models_dir().display());
    if manager.is_offline() {
        println!("Offline mode: downloads disabled");
    }
    for (artifact, available, size) in manager.get_model_status() {
        let status = match (available, size) {
            (true, Some(bytes)) => format!("cached ({:.1} MB)", bytes as f64 / 1_048_576.0),
            (true, None) => "cached".to_string(),
            (false, _) => "missing".to_string(),
        };
        println!("  {:<28} {}", artifact.display_name(), status);
    }

    if manager.is_model_available(ModelArtifact::CustomMetadata) {
        match manager.load_metadata().await {
            Ok(metadata) => println!(
                "Classifier: {} classes, accuracy {}",
                metadata.class_names.len(),
                metadata
                    .accuracy
                    .map(|a| format!("{:.1}%", a * 100.0))
                    .unwrap_or_else(|| "unknown".to_string())
            ),
            Err(e) => warn!("Could not read classifier metadata: {:#}", e),
        }
    }
    Ok(())
}
