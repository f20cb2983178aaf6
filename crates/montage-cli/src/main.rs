use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use montage_contracts::events::EventWriter;
use montage_contracts::{GenerateError, GenerationParameters, NormalizedImage, Settings};
use montage_engine::{dedupe, ImageNormalizer, Pipeline, PipelineState};
use serde_json::{json, Value};

#[derive(Debug, Parser)]
#[command(name = "montage-rs", version, about = "Compose images with a remote generation model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Normalize(NormalizeArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    settings: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    poll_interval: Option<f64>,
    #[arg(long)]
    max_attempts: Option<u32>,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    cfg_scale: Option<f64>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    sampler: Option<String>,
}

impl GenerateArgs {
    fn parameters(&self) -> Option<GenerationParameters> {
        let parameters = GenerationParameters {
            negative_prompt: self.negative_prompt.clone(),
            cfg_scale: self.cfg_scale,
            steps: self.steps,
            width: self.width,
            height: self.height,
            sampler: self.sampler.clone(),
        };
        (!parameters.is_empty()).then_some(parameters)
    }

    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(model) = self.model.as_ref() {
            settings.model = model.clone();
        }
        if let Some(interval) = self.poll_interval {
            settings.poll_interval_s = interval;
        }
        if let Some(attempts) = self.max_attempts {
            settings.max_poll_attempts = attempts;
        }
    }
}

#[derive(Debug, Parser)]
struct NormalizeArgs {
    #[arg(long = "image", required = true)]
    images: Vec<PathBuf>,
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("montage-rs error: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Normalize(args) => run_normalize(args),
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<GenerateError>() {
        Some(generate) if generate.is_retryable() => 2,
        _ => 1,
    }
}

fn read_images(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    paths
        .iter()
        .map(|path| {
            fs::read(path).with_context(|| format!("failed reading image {}", path.display()))
        })
        .collect()
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut settings = Settings::load(args.settings.as_deref())?;
    args.apply_overrides(&mut settings);
    let images = read_images(&args.images)?;

    let mut pipeline = Pipeline::over_http(settings)?;
    if let Some(path) = args.events.as_ref() {
        let writer = EventWriter::for_new_run(path);
        log::info!("writing events for run {} to {}", writer.run_id(), path.display());
        pipeline = pipeline.with_events(writer);
    }

    let mut state = PipelineState::new();
    let reference = pipeline.generate_with(&mut state, &args.prompt, &images, args.parameters())?;
    println!("{reference}");
    Ok(0)
}

fn run_normalize(args: NormalizeArgs) -> Result<i32> {
    let settings = Settings::load(args.settings.as_deref())?;
    let normalizer = ImageNormalizer::new(&settings);
    let mut normalized = Vec::with_capacity(args.images.len());
    for (index, raw) in read_images(&args.images)?.iter().enumerate() {
        let image = normalizer
            .normalize(raw)
            .map_err(|source| GenerateError::Normalization { index, source })?;
        normalized.push(image);
    }
    for line in summary_lines(&args.images, &dedupe(normalized.clone()), &normalized) {
        println!("{line}");
    }
    Ok(0)
}

/// One line per retained image, tagged with the first path that produced it.
fn summary_lines(
    paths: &[PathBuf],
    kept: &[NormalizedImage],
    all: &[NormalizedImage],
) -> Vec<Value> {
    kept.iter()
        .map(|image| {
            let source = all
                .iter()
                .position(|candidate| candidate.content_hash == image.content_hash)
                .and_then(|index| paths.get(index))
                .map(|path| path.display().to_string());
            let mut row = image.summary();
            row.insert("path".to_string(), json!(source));
            Value::Object(row)
        })
        .collect()
}
