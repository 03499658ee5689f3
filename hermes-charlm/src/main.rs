use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hermes_charlm::config::{ModelConfig, TrainingConfig};
use hermes_charlm::data::Dataset;
use hermes_charlm::generate::SamplingConfig;
use hermes_charlm::io::{read_corpus, read_corpus_stdin};
use hermes_charlm::{Backend, Trainer};

#[derive(Parser)]
#[command(name = "hermes-charlm")]
#[command(about = "Train a character-level GPT from scratch in Rust")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on a text corpus and print a generated sample
    Train {
        /// Path to the training corpus, plain or .gz/.zst (reads from stdin if not provided)
        #[arg(short, long)]
        data: Option<String>,

        /// Model configuration preset (nano, tiny, reference)
        #[arg(short, long, default_value = "tiny")]
        preset: String,

        /// JSON model config, overrides the preset
        #[arg(long)]
        config: Option<String>,

        /// Maximum context length
        #[arg(long)]
        block_size: Option<usize>,

        /// Dropout probability
        #[arg(long)]
        dropout: Option<f32>,

        /// Learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// Batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Number of optimizer steps
        #[arg(long)]
        max_iters: Option<usize>,

        /// Estimate train/val loss every N steps
        #[arg(long)]
        eval_interval: Option<usize>,

        /// Batches averaged per loss estimate
        #[arg(long)]
        eval_iters: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Compute backend
        #[arg(long, value_enum, default_value_t = Backend::Cpu)]
        backend: Backend,

        /// GPU device index (for multi-GPU systems)
        #[arg(long, default_value = "0")]
        gpu_id: usize,

        /// Text to seed generation with (defaults to the first vocabulary symbol)
        #[arg(long)]
        prompt: Option<String>,

        /// Number of characters to generate after training
        #[arg(short, long, default_value = "100")]
        max_new_tokens: usize,

        /// Sampling temperature
        #[arg(long, default_value = "1.0")]
        temperature: f64,

        /// Top-k sampling
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        top_k: Option<u64>,
    },

    /// Show model configuration and parameter count
    Info {
        /// Model configuration preset
        #[arg(short, long, default_value = "reference")]
        preset: String,

        /// Vocabulary size to size the embedding tables for
        #[arg(long, default_value = "65")]
        vocab_size: usize,
    },
}

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            data,
            preset,
            config,
            block_size,
            dropout,
            lr,
            batch_size,
            max_iters,
            eval_interval,
            eval_iters,
            seed,
            backend,
            gpu_id,
            prompt,
            max_new_tokens,
            temperature,
            top_k,
        } => {
            let sampling = SamplingConfig {
                temperature,
                top_k: top_k.map(|k| k as usize),
            };
            sampling.validate()?;

            let device = backend.device(gpu_id)?;
            info!("Using device: {:?}", device);

            let text = match &data {
                Some(path) => {
                    info!("Loading corpus from {}", path);
                    read_corpus(path)?
                }
                None => {
                    info!("Loading corpus from stdin...");
                    read_corpus_stdin()?
                }
            };
            let dataset = Dataset::from_text(&text)?;
            info!(
                "Corpus: {} characters, vocabulary of {} symbols",
                text.chars().count(),
                dataset.vocab().len()
            );
            let prompt_tokens = match &prompt {
                Some(p) => dataset.vocab().encode(p)?,
                None => vec![0],
            };

            let mut model_config = match &config {
                Some(path) => ModelConfig::from_json(path)?,
                None => ModelConfig::preset(&preset)?,
            };
            model_config.vocab_size = dataset.vocab().len();
            if let Some(block_size) = block_size {
                model_config.block_size = block_size;
            }
            if let Some(dropout) = dropout {
                model_config.dropout = dropout;
            }
            model_config.validate()?;
            info!("Model config: {:?}", model_config);

            let mut training_config = if preset == "reference" {
                TrainingConfig::reference()
            } else {
                TrainingConfig::default()
            };
            if let Some(lr) = lr {
                training_config.learning_rate = lr;
            }
            if let Some(batch_size) = batch_size {
                training_config.batch_size = batch_size;
            }
            if let Some(max_iters) = max_iters {
                training_config.max_iters = max_iters;
            }
            if let Some(eval_interval) = eval_interval {
                training_config.eval_interval = eval_interval;
            }
            if let Some(eval_iters) = eval_iters {
                training_config.eval_iters = eval_iters;
            }
            if let Some(seed) = seed {
                training_config.seed = seed;
            }
            info!("Training config: {:?}", training_config);

            let mut trainer = Trainer::new(&model_config, training_config, device)?;
            trainer.train(&dataset)?;
            info!(
                "Training complete after {} steps ({} parameters)",
                trainer.global_step(),
                trainer.num_parameters()
            );

            let output_tokens = trainer.sample(&prompt_tokens, max_new_tokens, sampling)?;
            let output_text = dataset.vocab().decode(&output_tokens)?;
            println!("\n{}", output_text);
        }

        Commands::Info { preset, vocab_size } => {
            let mut config = ModelConfig::preset(&preset)?;
            config.vocab_size = vocab_size;
            config.validate()?;
            let training = if preset == "reference" {
                TrainingConfig::reference()
            } else {
                TrainingConfig::default()
            };

            println!("Model: {}", preset);
            println!("  Vocab size: {}", config.vocab_size);
            println!("  Block size: {}", config.block_size);
            println!("  Embedding width: {}", config.n_embd);
            println!("  Num layers: {}", config.n_layer);
            println!("  Num heads: {}", config.n_heads);
            println!("  Head size: {}", config.head_size());
            println!("  Dropout: {}", config.dropout);
            println!("  Batch size: {}", training.batch_size);
            println!("  Learning rate: {}", training.learning_rate);
            println!("  Iterations: {}", training.max_iters);

            let total = config.num_parameters();
            println!(
                "  Parameters: {} ({:.2}M)",
                total,
                total as f64 / 1_000_000.0
            );
        }
    }

    Ok(())
}
