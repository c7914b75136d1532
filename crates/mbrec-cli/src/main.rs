//! mbrec CLI - Train and evaluate the multi-behavior recommender.
//!
//! # Usage
//!
//! ```bash
//! # Train on a dataset directory (trn_<behavior>.txt + tst_int.txt)
//! mbrec train --data data/tmall --behaviors pv,fav,cart,buy --save-path tmall
//!
//! # Resume from a checkpoint and keep training
//! mbrec train --data data/tmall --load-model tmall --epoch 200
//!
//! # Evaluate a checkpoint without training
//! mbrec eval --data data/tmall --load-model tmall
//!
//! # Show the metrics history of a checkpoint
//! mbrec history tmall --checkpoint-dir .
//! ```
//!
//! Logging goes to stderr and follows `RUST_LOG`; `-v` raises the default
//! level to `info`, `-vv` to `debug`.

use anyhow::{bail, Context, Result};
use candle_core::Device;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use mbrec_core::{Dataset, RecConfig};
use mbrec_nn::training::{Phase, StepProgress};
use mbrec_nn::{Checkpoint, EmbeddingStore, MetricsHistory, Trainer};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mbrec")]
#[command(about = "Multi-behavior graph recommender", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model, testing and checkpointing along the way
    Train {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Evaluate a saved checkpoint on the test users
    Eval {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the metrics history of a checkpoint
    History {
        /// Checkpoint name
        name: String,

        /// Directory holding Models/ and History/
        #[arg(long, default_value = ".")]
        checkpoint_dir: PathBuf,

        /// Print every recorded value instead of the last one
        #[arg(long)]
        all: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Dataset directory
    #[arg(short, long)]
    data: PathBuf,

    /// Behavior names in order; the last one is the target behavior
    #[arg(short, long, value_delimiter = ',', default_value = "pv,fav,cart,buy")]
    behaviors: Vec<String>,

    /// Pretrained layer-0 embeddings (safetensors with `user` and `item`)
    #[arg(long)]
    embeddings: Option<PathBuf>,

    /// JSON configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Latent width
    #[arg(long)]
    latdim: Option<usize>,

    /// Number of propagation layers
    #[arg(long)]
    gnn_layer: Option<usize>,

    /// Attention heads
    #[arg(long)]
    att_head: Option<usize>,

    /// Memory units of the message transform
    #[arg(long)]
    memosize: Option<usize>,

    /// Positive/negative pairs per user and step
    #[arg(long)]
    samp_num: Option<usize>,

    /// Users per step
    #[arg(long)]
    batch: Option<usize>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// L2 regularization weight
    #[arg(long)]
    reg: Option<f64>,

    /// Learning-rate decay factor
    #[arg(long)]
    decay: Option<f64>,

    /// Optimizer steps between two decays
    #[arg(long)]
    decay_step: Option<usize>,

    /// Fixed multiplier on the cross-attention output
    #[arg(long)]
    mult: Option<f64>,

    /// Number of epochs
    #[arg(long)]
    epoch: Option<usize>,

    /// Test every N epochs
    #[arg(long)]
    test_epoch: Option<usize>,

    /// Ranking cutoff K for HR@K and NDCG@K
    #[arg(long)]
    shoot: Option<usize>,

    /// Users per training epoch
    #[arg(long)]
    trn_num: Option<usize>,

    /// Nodes drawn per sampling round
    #[arg(long)]
    graph_sample_n: Option<usize>,

    /// Expansion hops of the subgraph sampler
    #[arg(long)]
    samp_depth: Option<usize>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Checkpoint name to save under
    #[arg(long)]
    save_path: Option<String>,

    /// Checkpoint name to restore before running
    #[arg(long)]
    load_model: Option<String>,

    /// Directory holding Models/ and History/
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Train { run } => cmd_train(&run),
        Commands::Eval { run } => cmd_eval(&run),
        Commands::History {
            name,
            checkpoint_dir,
            all,
        } => cmd_history(&checkpoint_dir, &name, all),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn build_config(args: &RunArgs) -> Result<RecConfig> {
    let mut config = match &args.config {
        Some(path) => RecConfig::from_json_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => RecConfig::default(),
    };

    if let Some(v) = args.latdim {
        config.latdim = v;
    }
    if let Some(v) = args.gnn_layer {
        config.gnn_layer = v;
    }
    if let Some(v) = args.att_head {
        config.att_head = v;
    }
    if let Some(v) = args.memosize {
        config.memosize = v;
    }
    if let Some(v) = args.samp_num {
        config.samp_num = v;
    }
    if let Some(v) = args.batch {
        config.batch = v;
    }
    if let Some(v) = args.lr {
        config.lr = v;
    }
    if let Some(v) = args.reg {
        config.reg = v;
    }
    if let Some(v) = args.decay {
        config.decay = v;
    }
    if let Some(v) = args.decay_step {
        config.decay_step = v;
    }
    if let Some(v) = args.mult {
        config.mult = v;
    }
    if let Some(v) = args.epoch {
        config.epoch = v;
    }
    if let Some(v) = args.test_epoch {
        config.test_epoch = v;
    }
    if let Some(v) = args.shoot {
        config.shoot = v;
    }
    if let Some(v) = args.trn_num {
        config.trn_num = v;
    }
    if let Some(v) = args.graph_sample_n {
        config.graph_sample_n = v;
    }
    if let Some(v) = args.samp_depth {
        config.samp_depth = v;
    }
    if let Some(v) = args.seed {
        config.seed = v;
    }
    if let Some(v) = &args.save_path {
        config.save_path = v.clone();
    }
    if args.load_model.is_some() {
        config.load_model = args.load_model.clone();
    }
    if let Some(v) = &args.checkpoint_dir {
        config.checkpoint_dir = v.clone();
    }
    tracing::info!(
        latdim = config.latdim,
        layers = config.gnn_layer,
        heads = config.att_head,
        batch = config.batch,
        lr = config.lr,
        decay = config.decay,
        decay_step = config.decay_step,
        epochs = config.epoch,
        seed = config.seed,
        "configuration"
    );
    Ok(config)
}

fn load_inputs(args: &RunArgs, config: &RecConfig) -> Result<(Dataset, EmbeddingStore)> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Loading {}...", args.data.display()));

    let dataset = Dataset::load(&args.data, &args.behaviors)
        .with_context(|| format!("Failed to load dataset {}", args.data.display()))?;

    let device = Device::Cpu;
    let embeddings = match &args.embeddings {
        Some(path) => EmbeddingStore::load(path, &device)
            .with_context(|| format!("Failed to load embeddings {}", path.display()))?,
        None => EmbeddingStore::random(
            dataset.user_count(),
            dataset.item_count(),
            config.latdim,
            config.seed,
            &device,
        )?,
    };

    pb.finish_with_message(format!("Loaded in {:.2?}", start.elapsed()));
    tracing::info!(
        users = dataset.user_count(),
        items = dataset.item_count(),
        behaviors = %args.behaviors.join(","),
        test_users = dataset.tst_users().len(),
        pretrained = args.embeddings.is_some(),
        "inputs loaded"
    );
    Ok((dataset, embeddings))
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::with_template(
        "{msg:<28} [{bar:40}] {pos}/{len} ({elapsed})",
    )?);
    Ok(pb)
}

fn report_step(pb: &ProgressBar, p: &StepProgress) {
    if p.step == 0 {
        pb.reset();
        pb.set_length(p.steps as u64);
    }
    pb.inc(1);
    match (p.phase, p.loss) {
        (Phase::Train, Some(loss)) => {
            pb.set_message(format!("train {} loss {:.4}", p.epoch, loss))
        }
        (Phase::Train, None) => pb.set_message(format!("train {}", p.epoch)),
        (Phase::Test, _) => pb.set_message(format!("test {}", p.epoch)),
    }
}

fn cmd_train(args: &RunArgs) -> Result<()> {
    let config = build_config(args)?;
    let (dataset, embeddings) = load_inputs(args, &config)?;

    let pb = progress_bar()?;
    let bar = pb.clone();
    let mut trainer = Trainer::new(&config, &dataset, embeddings)
        .context("Failed to prepare model")?
        .with_progress(Box::new(move |p| report_step(&bar, p)));

    println!(
        "Training {} parameters on {} users x {} items ({} behaviors)",
        trainer.model().num_parameters(),
        dataset.user_count(),
        dataset.item_count(),
        dataset.beh_num()
    );
    let start = Instant::now();
    let metrics = trainer.run()?;
    pb.finish_and_clear();

    println!("Trained {} epochs in {:.2?}", trainer.epochs_completed(), start.elapsed());
    println!("Final test: {}", metrics.summary());
    if config.epoch > 0 {
        let checkpoint = Checkpoint::new(&config.checkpoint_dir, &config.save_path);
        println!("Checkpoint: {}", checkpoint.model_path().display());
    }
    Ok(())
}

fn cmd_eval(args: &RunArgs) -> Result<()> {
    let config = build_config(args)?;
    if config.load_model.is_none() {
        bail!("eval needs a checkpoint: pass --load-model <name>");
    }
    let (dataset, embeddings) = load_inputs(args, &config)?;

    let pb = progress_bar()?;
    let bar = pb.clone();
    let mut trainer = Trainer::new(&config, &dataset, embeddings)
        .context("Failed to prepare model")?
        .with_progress(Box::new(move |p| report_step(&bar, p)));
    let metrics = trainer.evaluate()?;
    pb.finish_and_clear();

    println!("Test users: {}", metrics.num_users);
    println!("HR@{}:  {:.4}", config.shoot, metrics.hr);
    println!("NDCG@{}: {:.4}", config.shoot, metrics.ndcg);
    Ok(())
}

fn cmd_history(dir: &Path, name: &str, all: bool) -> Result<()> {
    let path = Checkpoint::new(dir, name).history_path();
    let history = MetricsHistory::load(&path)
        .with_context(|| format!("Failed to read history {}", path.display()))?;

    println!("History of {name}");
    println!("{}", "=".repeat(11 + name.len()));
    for metric in history.names() {
        let values = history.get(metric);
        if all {
            let joined: Vec<String> = values.iter().map(|v| format!("{v:.4}")).collect();
            println!("{metric:<12} {}", joined.join(" "));
        } else {
            match values.last() {
                Some(last) => println!("{metric:<12} {last:.4} ({} values)", values.len()),
                None => println!("{metric:<12} -"),
            }
        }
    }
    Ok(())
}
