use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use model_router::llm::{
    ImageAttachment, ModelCatalog, PolicyMode, TaskAnalyzer, TaskInput, TierTables,
};
use model_router::{
    GenerationRequest, GenerationResult, LlmError, ModelRouter, RouterConfig, StreamHandler, Tier,
};

#[derive(Parser)]
#[command(name = "model-router", version, about = "Tiered LLM model routing")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a prompt and print its task profile.
    Classify {
        prompt: String,

        /// Number of images that would be attached.
        #[arg(long, default_value_t = 0)]
        image_count: usize,

        /// File holding existing code sent along with the prompt.
        #[arg(long)]
        context_file: Option<PathBuf>,
    },

    /// Estimate the cost of a prompt without calling any model.
    Estimate {
        prompt: String,

        #[arg(long)]
        tier: Option<Tier>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Use the quality-first preference lists.
        #[arg(long)]
        premium: bool,
    },

    /// Generate a completion.
    Generate {
        prompt: String,

        #[arg(long)]
        system: Option<String>,

        /// Image files to attach.
        #[arg(long = "image")]
        images: Vec<PathBuf>,

        #[arg(long)]
        context_file: Option<PathBuf>,

        #[arg(long)]
        tier: Option<Tier>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        temperature: Option<f32>,

        /// Print tokens as they arrive.
        #[arg(long)]
        stream: bool,

        /// Use the quality-first preference lists.
        #[arg(long)]
        premium: bool,
    },

    /// List catalog models, or one tier's preference list.
    Models {
        #[arg(long)]
        tier: Option<Tier>,

        #[arg(long)]
        premium: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("model_router=info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Classify {
            prompt,
            image_count,
            context_file,
        } => {
            let context = read_context(context_file.as_deref())?;
            let profile = TaskAnalyzer::default().analyze(&TaskInput {
                prompt: &prompt,
                image_count,
                context_len: context.as_deref().map_or(0, |c| c.chars().count()),
            });
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }

        Commands::Estimate {
            prompt,
            tier,
            model,
            max_tokens,
            premium,
        } => {
            let router = load_router(premium)?;
            let mut request = GenerationRequest::new(prompt);
            request.tier = tier;
            request.model = model;
            request.max_tokens = max_tokens;
            let estimate = router.estimate_cost(&request)?;
            println!("{}", serde_json::to_string_pretty(&estimate)?);
        }

        Commands::Generate {
            prompt,
            system,
            images,
            context_file,
            tier,
            model,
            max_tokens,
            temperature,
            stream,
            premium,
        } => {
            let router = load_router(premium)?;
            let mut request = GenerationRequest::new(prompt);
            request.system = system;
            request.context = read_context(context_file.as_deref())?;
            request.tier = tier;
            request.model = model;
            request.max_tokens = max_tokens;
            request.temperature = temperature;
            request.stream = stream;
            for path in &images {
                request.images.push(read_image(path)?);
            }

            if request.stream {
                let mut printer = StdoutPrinter::default();
                router.generate_stream(&request, &mut printer).await;
                println!();
                match printer.outcome {
                    Some(Ok(result)) => print_summary(&result),
                    Some(Err(err)) => return Err(err.into()),
                    None => anyhow::bail!("stream ended without a result"),
                }
            } else {
                let result = router.generate(&request).await?;
                println!("{}", result.content);
                print_summary(&result);
            }
        }

        Commands::Models { tier, premium } => {
            let catalog = ModelCatalog::builtin(&[]);
            let tables = TierTables::builtin();
            match tier {
                Some(tier) => {
                    let table = tables.for_mode(PolicyMode::from_premium(premium));
                    for (i, id) in table.candidates(tier).iter().enumerate() {
                        println!("{}. {}", i + 1, id);
                    }
                }
                None => {
                    for m in catalog.models() {
                        println!(
                            "{:<32} {:<9} ${:>6}/M in  ${:>6}/M out  ctx {:>8}{}",
                            m.id,
                            m.tier,
                            m.input_price_per_million,
                            m.output_price_per_million,
                            m.context_window,
                            if m.supports_vision { "  vision" } else { "" },
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_router(premium: bool) -> anyhow::Result<ModelRouter> {
    let config = RouterConfig::from_env().map_err(|e| {
        anyhow::anyhow!(
            "Failed to load router config: {}. Make sure .env is configured.",
            e
        )
    })?;
    let router = ModelRouter::new(config)?;
    if premium {
        router.set_premium_mode(true);
    }
    Ok(router)
}

fn read_context(path: Option<&Path>) -> anyhow::Result<Option<String>> {
    path.map(|p| {
        std::fs::read_to_string(p).with_context(|| format!("reading context file {}", p.display()))
    })
    .transpose()
}

fn read_image(path: &Path) -> anyhow::Result<ImageAttachment> {
    let media_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => anyhow::bail!("unsupported image type: {}", path.display()),
    };
    let bytes = std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(ImageAttachment::from_bytes(media_type, &bytes))
}

fn print_summary(result: &GenerationResult) {
    eprintln!(
        "[{} | tier {} | {} in / {} out | ${} | {} ms | {} attempt(s)]",
        result.model.id,
        result.profile.tier,
        result.usage.input_tokens,
        result.usage.output_tokens,
        result.usage.cost_usd,
        result.latency.as_millis(),
        result.attempts,
    );
}

#[derive(Default)]
struct StdoutPrinter {
    outcome: Option<Result<GenerationResult, LlmError>>,
}

impl StreamHandler for StdoutPrinter {
    fn on_token(&mut self, token: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(token.as_bytes());
        let _ = out.flush();
    }

    fn on_complete(&mut self, result: GenerationResult) {
        self.outcome = Some(Ok(result));
    }

    fn on_error(&mut self, error: LlmError) {
        self.outcome = Some(Err(error));
    }
}
