mod pool;

use std::env;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::builder::PossibleValuesParser;
use clap::{Args, Parser, Subcommand};
use mediagen_contracts::config::{ClientConfig, ConfigSources};
use mediagen_contracts::history::HistoryRecorder;
use mediagen_contracts::media::{load_attachments, MediaAttachment};
use mediagen_contracts::models::{Capability, ModelSelector};
use mediagen_contracts::GenerationError;
use mediagen_engine::generators::gemini::GEMINI_ASPECT_RATIOS;
use mediagen_engine::generators::gemini3::{GEMINI3_ASPECT_RATIOS, GEMINI3_RESOLUTIONS};
use mediagen_engine::generators::imagen::{IMAGEN_ASPECT_RATIOS, IMAGEN_PERSON_GENERATION};
use mediagen_engine::generators::veo::{MAX_REFERENCE_ASSETS, VEO_ASPECT_RATIOS, VEO_RESOLUTIONS};
use mediagen_engine::generators::{
    Gemini3Generator, Gemini3Options, GeminiGenerator, GeminiOptions, Generator, ImagenGenerator,
    ImagenOptions, VeoGenerator, VeoMedia, VeoOptions,
};
use mediagen_engine::runner::DEFAULT_RETRIES;
use mediagen_engine::{EnhanceOptions, GenAiApi, HttpGenAi, JobRunner, PromptEnhancer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::pool::{run_pool, Deadline, PoolReport};

const EXIT_PRECONDITION: i32 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "mediagen",
    version,
    about = "Generate images and videos with the Gemini API"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Image generation and editing with Gemini 2.5 Flash Image.
    Gemini(GeminiArgs),
    /// Image generation with Gemini 3 Pro Image (search grounding, thoughts).
    Gemini3(Gemini3Args),
    /// Batch text-to-image with Imagen.
    Imagen(ImagenArgs),
    /// Video generation with Veo.
    Veo(VeoArgs),
}

#[derive(Debug, Args)]
struct SharedArgs {
    /// Output path prefix; a timestamp and token are appended per file.
    #[arg(short, long, default_value = "generated")]
    output: PathBuf,
    /// Attempts per output before giving up.
    #[arg(short, long, default_value_t = DEFAULT_RETRIES)]
    retries: u32,
    /// Number of independent generations to run.
    #[arg(short, long, default_value_t = 1)]
    number: usize,
    /// Rewrite the prompt with a text model before each attempt.
    #[arg(short, long)]
    enhance: bool,
    /// Send the prompt to the enhancer through the system instruction.
    #[arg(long)]
    use_system_prompt: bool,
    /// Do not show attached images to the enhancer.
    #[arg(long)]
    ignore_images: bool,
    /// API key; falls back to GEMINI_API_KEY.
    #[arg(long)]
    api_key: Option<String>,
    /// Extra request header, repeatable; overrides GEMINI_HEADERS.
    #[arg(long = "header", value_name = "KEY:VALUE")]
    headers: Vec<String>,
    /// Model override; unknown models fall back to the command default.
    #[arg(long)]
    model: Option<String>,
    prompt: String,
}

#[derive(Debug, Args)]
struct GeminiArgs {
    /// Image to attach, repeatable.
    #[arg(short, long = "image")]
    images: Vec<PathBuf>,
    #[arg(long, default_value = "3:4", value_parser = choices(GEMINI_ASPECT_RATIOS))]
    aspect_ratio: String,
    /// Present attached images as an earlier model turn.
    #[arg(long)]
    bypass: bool,
    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Debug, Args)]
struct Gemini3Args {
    #[arg(short, long = "image")]
    images: Vec<PathBuf>,
    #[arg(long, default_value = "3:4", value_parser = choices(GEMINI3_ASPECT_RATIOS))]
    aspect_ratio: String,
    #[arg(long, default_value = "1K", value_parser = choices(GEMINI3_RESOLUTIONS))]
    resolution: String,
    /// Ground generation with Google Search.
    #[arg(long)]
    search: bool,
    /// Log thoughts and save thought images.
    #[arg(long)]
    thoughts: bool,
    /// Replay model-echoed copies of the attachments instead of the raw images.
    #[arg(long)]
    bypass: bool,
    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Debug, Args)]
struct ImagenArgs {
    /// Images per request (1-4).
    #[arg(short, long, default_value_t = 4)]
    batch: u32,
    #[arg(long, default_value = "1:1", value_parser = choices(IMAGEN_ASPECT_RATIOS))]
    aspect_ratio: String,
    #[arg(long, value_parser = choices(IMAGEN_PERSON_GENERATION))]
    person_generation: Option<String>,
    #[command(flatten)]
    shared: SharedArgs,
}

#[derive(Debug, Args)]
struct VeoArgs {
    /// First frame image.
    #[arg(short, long)]
    source: Option<PathBuf>,
    /// Last frame image.
    #[arg(short, long)]
    last: Option<PathBuf>,
    /// Reference asset image, up to three.
    #[arg(short, long = "asset")]
    assets: Vec<PathBuf>,
    #[arg(long, default_value = "16:9", value_parser = choices(VEO_ASPECT_RATIOS))]
    aspect_ratio: String,
    #[arg(long, value_parser = choices(VEO_RESOLUTIONS))]
    resolution: Option<String>,
    /// Stop polling after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    max_wait: Option<u64>,
    #[command(flatten)]
    shared: SharedArgs,
}

/// Everything needed to build a fresh generator for one job.
enum Plan {
    Gemini {
        model: String,
        images: Vec<MediaAttachment>,
        options: GeminiOptions,
    },
    Gemini3 {
        model: String,
        images: Vec<MediaAttachment>,
        options: Gemini3Options,
    },
    Imagen {
        model: String,
        options: ImagenOptions,
    },
    Veo {
        model: String,
        media: VeoMedia,
        options: VeoOptions,
        cancel: Arc<AtomicBool>,
    },
}

impl Plan {
    fn build(&self, api: &Arc<dyn GenAiApi>) -> Result<Box<dyn Generator>, GenerationError> {
        let generator: Box<dyn Generator> = match self {
            Self::Gemini {
                model,
                images,
                options,
            } => Box::new(GeminiGenerator::new(
                api.clone(),
                model.clone(),
                images.clone(),
                options.clone(),
            )),
            Self::Gemini3 {
                model,
                images,
                options,
            } => Box::new(Gemini3Generator::new(
                api.clone(),
                model.clone(),
                images.clone(),
                options.clone(),
            )?),
            Self::Imagen { model, options } => Box::new(ImagenGenerator::new(
                api.clone(),
                model.clone(),
                options.clone(),
            )),
            Self::Veo {
                model,
                media,
                options,
                cancel,
            } => Box::new(
                VeoGenerator::new(api.clone(), model.clone(), media.clone(), options.clone())?
                    .with_cancel(cancel.clone()),
            ),
        };
        Ok(generator)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediagen=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let outcome =
        prepare(cli.command).and_then(|(shared, plan, deadline)| execute(shared, plan, deadline));
    match outcome {
        Ok(code) => Ok(code),
        Err(err) => match precondition_exit(&err) {
            Some(code) => {
                eprintln!("error: {err:#}");
                Ok(code)
            }
            None => Err(err),
        },
    }
}

/// Precondition failures exit with a dedicated status instead of 1.
fn precondition_exit(err: &anyhow::Error) -> Option<i32> {
    err.downcast_ref::<GenerationError>()
        .filter(|err| err.is_precondition())
        .map(|_| EXIT_PRECONDITION)
}

fn exit_code(report: &PoolReport) -> i32 {
    if report.precondition.is_some() {
        EXIT_PRECONDITION
    } else if report.failed_jobs > 0 {
        1
    } else {
        0
    }
}

fn choices(values: &'static [&'static str]) -> PossibleValuesParser {
    PossibleValuesParser::new(values.iter().copied())
}

/// Validates flags and loads attachments. Nothing here touches the network.
fn prepare(command: Command) -> Result<(SharedArgs, Plan, Option<Deadline>)> {
    let selector = ModelSelector::default();
    let prepared = match command {
        Command::Gemini(args) => {
            let model = select_model(&selector, &args.shared, Capability::ImageEdit)?;
            let plan = Plan::Gemini {
                model,
                images: load_attachments(&args.images)?,
                options: GeminiOptions {
                    aspect_ratio: args.aspect_ratio,
                    bypass: args.bypass,
                },
            };
            (args.shared, plan, None)
        }
        Command::Gemini3(args) => {
            let model = select_model(&selector, &args.shared, Capability::ImageExperimental)?;
            let plan = Plan::Gemini3 {
                model,
                images: load_attachments(&args.images)?,
                options: Gemini3Options {
                    aspect_ratio: args.aspect_ratio,
                    resolution: args.resolution,
                    search: args.search,
                    thoughts: args.thoughts,
                    bypass: args.bypass,
                },
            };
            (args.shared, plan, None)
        }
        Command::Imagen(args) => {
            let model = select_model(&selector, &args.shared, Capability::ImageBatch)?;
            let plan = Plan::Imagen {
                model,
                options: ImagenOptions {
                    batch: args.batch,
                    aspect_ratio: args.aspect_ratio,
                    person_generation: args.person_generation,
                },
            };
            (args.shared, plan, None)
        }
        Command::Veo(args) => {
            let model = select_model(&selector, &args.shared, Capability::Video)?;
            if args.assets.len() > MAX_REFERENCE_ASSETS {
                return Err(GenerationError::precondition(format!(
                    "at most {MAX_REFERENCE_ASSETS} reference assets are allowed, got {}",
                    args.assets.len()
                ))
                .into());
            }
            let cancel = Arc::new(AtomicBool::new(false));
            let deadline = args.max_wait.map(|seconds| Deadline {
                after: Duration::from_secs(seconds),
                flag: cancel.clone(),
            });
            let media = VeoMedia {
                source: args.source.as_ref().map(MediaAttachment::load).transpose()?,
                last_frame: args.last.as_ref().map(MediaAttachment::load).transpose()?,
                assets: load_attachments(&args.assets)?,
            };
            let plan = Plan::Veo {
                model,
                media,
                options: VeoOptions {
                    aspect_ratio: args.aspect_ratio,
                    resolution: args.resolution,
                    ..VeoOptions::default()
                },
                cancel,
            };
            (args.shared, plan, deadline)
        }
    };
    Ok(prepared)
}

fn select_model(
    selector: &ModelSelector,
    shared: &SharedArgs,
    capability: Capability,
) -> Result<String> {
    let selection = selector
        .select(shared.model.as_deref(), capability)
        .map_err(GenerationError::precondition)?;
    if let Some(reason) = &selection.fallback_reason {
        tracing::warn!(
            requested = selection.requested.as_deref().unwrap_or_default(),
            model = %selection.model.name,
            family = %selection.model.family,
            "{reason}"
        );
    }
    Ok(selection.model.name)
}

fn config_sources(shared: &SharedArgs, env: impl Fn(&str) -> Option<String>) -> ConfigSources {
    ConfigSources {
        api_key_flag: shared.api_key.clone(),
        api_key_env: env("GEMINI_API_KEY"),
        api_base_env: env("GEMINI_API_BASE"),
        headers_env: env("GEMINI_HEADERS"),
        header_flags: shared.headers.clone(),
        workers_env: env("THREAD_COUNT"),
    }
}

fn execute(shared: SharedArgs, plan: Plan, deadline: Option<Deadline>) -> Result<i32> {
    let config = ClientConfig::resolve(config_sources(&shared, |name| env::var(name).ok()))?;
    let api: Arc<dyn GenAiApi> = Arc::new(HttpGenAi::new(&config)?);

    let history = HistoryRecorder::for_output_prefix(&shared.output)
        .context("failed to resolve prompt history location")?;
    let mut runner = JobRunner::new(&shared.output, shared.retries)
        .with_history(history, env::args().collect());
    if shared.enhance {
        let text_model = ModelSelector::default()
            .select(None, Capability::Text)
            .map_err(GenerationError::precondition)?;
        let enhancer = PromptEnhancer::new(
            api.clone(),
            EnhanceOptions {
                route_via_system: shared.use_system_prompt,
                include_media: !shared.ignore_images,
            },
        )
        .with_model(text_model.model.name);
        runner = runner.with_enhancer(enhancer);
    }

    tracing::info!(
        jobs = shared.number,
        workers = config.workers.min(shared.number.max(1)),
        output = %shared.output.display(),
        "starting generation"
    );
    let report = run_pool(shared.number, config.workers, deadline, |_| {
        let generator = plan.build(&api)?;
        runner.run(generator.as_ref(), &shared.prompt)
    });

    tracing::info!(
        saved = report.saved.len(),
        empty = report.empty_jobs,
        failed = report.failed_jobs,
        "generation finished"
    );
    if let Some(err) = &report.precondition {
        eprintln!("error: {err}");
    }
    Ok(exit_code(&report))
}
