//! Word-level surprisal and perplexity evaluation
//!
//! Scores an evaluation text file with a GGUF language model and writes either
//! a per-word surprisal TSV or the corpus perplexity.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use surprisal_engine::model::{pretrained_tokenizer, resolve_checkpoint};
use surprisal_engine::{
    BpeTokenizer, DisabledTokenizer, EvalMode, Evaluator, Interrupt, LlamaCppModel,
    PerplexityUnits, RunStatus, Settings, SurprisalWriter, Tokenizer, load_eval_dataset,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Per-word surprisal / perplexity evaluation
#[derive(Parser)]
#[command(name = "get-surprisals")]
struct Cli {
    /// Evaluation text file, one sentence per line
    #[arg(long)]
    eval_dataset: Option<PathBuf>,

    /// Output TSV path for surprisals
    #[arg(long)]
    fpath: Option<PathBuf>,

    /// Rows per scoring call (the sentence is repeated in each row)
    #[arg(long)]
    val_batch_size: Option<usize>,

    /// Only compute the corpus perplexity
    #[arg(long)]
    just_ppl: bool,

    /// Text encoding of the evaluation file
    #[arg(long)]
    encoding: Option<String>,

    /// Units summed for perplexity (nats or bits)
    #[arg(long)]
    ppl_units: Option<PerplexityUnits>,

    /// Write the perplexity result to this JSON file
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Registry model variant id (e.g. gpt2-117m-q8)
    #[arg(long)]
    model_name: Option<String>,

    /// Checkpoint to restore: latest, fresh, or a path
    #[arg(long)]
    restore_from: Option<String>,

    /// Run name under the checkpoint directory
    #[arg(long)]
    run_name: Option<String>,

    /// Checkpoint directory
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Direct GGUF file path (overrides checkpoint resolution)
    #[arg(long)]
    gguf: Option<PathBuf>,

    /// Path to tokenizer.json (overrides the registry tokenizer)
    #[arg(long)]
    tokenizer_json: Option<PathBuf>,

    /// Disable BPE; tokens are whitespace-delimited words from --vocabulary
    #[arg(long)]
    no_bpe: bool,

    /// JSON vocabulary (word → id) used with --no-bpe
    #[arg(long)]
    vocabulary: Option<PathBuf>,

    /// Context window size
    #[arg(long)]
    n_ctx: Option<u32>,

    /// Inference threads (0 = llama.cpp default)
    #[arg(long)]
    threads: Option<u32>,

    /// NFKC-normalize every line before tokenization
    #[arg(long)]
    nfkc: bool,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of file settings.
    fn apply(self, settings: &mut Settings) {
        let eval = &mut settings.eval;
        let model = &mut settings.model;

        if self.eval_dataset.is_some() {
            eval.eval_dataset = self.eval_dataset;
        }
        if self.fpath.is_some() {
            eval.fpath = self.fpath;
        }
        if let Some(n) = self.val_batch_size {
            eval.val_batch_size = n;
        }
        eval.just_ppl |= self.just_ppl;
        if let Some(encoding) = self.encoding {
            eval.encoding = encoding;
        }
        if let Some(units) = self.ppl_units {
            eval.perplexity_units = units;
        }
        if self.summary_json.is_some() {
            eval.summary_json = self.summary_json;
        }
        eval.normalize_nfkc |= self.nfkc;

        if self.model_name.is_some() {
            model.model_name = self.model_name;
        }
        if let Some(restore) = self.restore_from {
            model.restore_from = restore;
        }
        if let Some(run_name) = self.run_name {
            model.run_name = run_name;
        }
        if let Some(dir) = self.checkpoint_dir {
            model.checkpoint_dir = dir;
        }
        if self.gguf.is_some() {
            model.gguf = self.gguf;
        }
        if self.tokenizer_json.is_some() {
            model.tokenizer_json = self.tokenizer_json;
        }
        if self.no_bpe {
            model.bpe = false;
        }
        if self.vocabulary.is_some() {
            model.vocabulary = self.vocabulary;
        }
        if let Some(n_ctx) = self.n_ctx {
            model.n_ctx = n_ctx;
        }
        if let Some(threads) = self.threads {
            model.n_threads = threads;
        }
    }
}

fn load_tokenizer(settings: &Settings) -> Result<Box<dyn Tokenizer>> {
    let model = &settings.model;
    if !model.bpe {
        let path = model
            .vocabulary
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("--vocabulary is required with --no-bpe"))?;
        info!("Loading vocabulary from {}", path.display());
        let tokenizer = DisabledTokenizer::from_file(path)
            .with_context(|| format!("Failed to load vocabulary from {}", path.display()))?;
        return Ok(Box::new(tokenizer));
    }

    let path = match &model.tokenizer_json {
        Some(path) => path.clone(),
        None => {
            let variant = settings.model_variant();
            info!("Downloading/loading tokenizer for {}", variant);
            pretrained_tokenizer(variant)?
        }
    };
    info!("Tokenizer: {}", path.display());
    let tokenizer = BpeTokenizer::from_file(&path)
        .with_context(|| format!("Failed to load tokenizer from {}", path.display()))?;
    Ok(Box::new(tokenizer))
}

fn load_model(settings: &Settings) -> Result<LlamaCppModel> {
    let path = match &settings.model.gguf {
        Some(path) => path.clone(),
        None => {
            let restore = settings.restore_from();
            info!(
                "Restoring checkpoint ({}) for run {}",
                restore, settings.model.run_name
            );
            resolve_checkpoint(
                &restore,
                &settings.model.checkpoint_dir,
                &settings.model.run_name,
                settings.model_variant(),
            )?
        }
    };
    info!("Loading GGUF from {}", path.display());
    let mut model = LlamaCppModel::from_file(&path, settings.model.n_ctx)
        .with_context(|| format!("Failed to load GGUF from {}", path.display()))?;
    model.set_n_threads(settings.model.n_threads);
    Ok(model)
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "get_surprisals=debug,surprisal_engine=debug"
    } else {
        "get_surprisals=info,surprisal_engine=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Settings::load().context("Failed to load config")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;

    // Ctrl-C during evaluation stops after the current sentence; anywhere else
    // (download, model load) it aborts the process
    let interrupt = Interrupt::new();
    {
        let interrupt = interrupt.clone();
        let handler = move || {
            if !interrupt.request() {
                eprintln!("aborted");
                std::process::exit(130);
            }
        };
        if let Err(e) = ctrlc::set_handler(handler) {
            warn!("Failed to install Ctrl-C handler: {}", e);
        }
    }

    let tokenizer = load_tokenizer(&settings)?;
    let model = load_model(&settings)?;
    let mut scorer = model.scorer().context("Failed to create llama.cpp context")?;

    let dataset = settings
        .eval
        .eval_dataset
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--eval-dataset is required"))?;
    info!("Loading evaluation dataset from {}", dataset.display());
    let sentences = load_eval_dataset(&tokenizer, &dataset, &settings.load_options()?)
        .with_context(|| format!("Failed to load {}", dataset.display()))?;
    info!("Loaded {} sentences", sentences.len());

    let pb = progress_bar(sentences.len());
    let mut evaluator = Evaluator::new(&mut scorer, &tokenizer, settings.eval_options())
        .with_interrupt(interrupt)
        .on_sentence(|_| pb.inc(1));
    evaluator.check_model()?;

    match settings.mode() {
        EvalMode::Surprisal => {
            let fpath = settings
                .eval
                .fpath
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("--fpath is required"))?;
            let mut writer = SurprisalWriter::create(fpath)
                .with_context(|| format!("Failed to create {}", fpath.display()))?;
            let run = evaluator.write_surprisals(&sentences, &mut writer)?;
            pb.finish_and_clear();
            if run.status == RunStatus::Interrupted {
                eprintln!(
                    "interrupted: {} sentences ({} words) written to {}",
                    run.sentences,
                    run.words,
                    fpath.display()
                );
            }
        }
        EvalMode::Perplexity => {
            let run = evaluator.perplexity(&sentences)?;
            pb.finish_and_clear();
            if run.status == RunStatus::Interrupted {
                eprintln!("interrupted");
            }
            if let Some(result) = run.result {
                println!("Perplexity: {}", result.perplexity);
                if let Some(path) = &settings.eval.summary_json {
                    let json = serde_json::to_string_pretty(&result)?;
                    std::fs::write(path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Wrote perplexity summary to {}", path.display());
                }
            }
        }
    }

    Ok(())
}
