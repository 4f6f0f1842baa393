#![forbid(unsafe_code)]

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use viral_predictor::engine::{
    run_simulation, BatchCommitted, BatchObserver, ObserverError, RunParams, RunSnapshot,
    SimulationOptions,
};
use viral_predictor::gateway::{
    Attribution, ChatGateway, ChatModel, NoopUsageSink, ProviderGateway, StderrUsageSink,
};
use viral_predictor::oracle::GatewayOracle;
use viral_predictor::prompts::Platform;
use viral_predictor::providers::{
    select_model, supports_structured_output, DEFAULT_PROVIDER, PROVIDERS,
};
use viral_predictor::report::{render_progress_lines, render_summary_markdown};
use viral_predictor::resilient::RetryPolicy;
use viral_predictor::trace::{JsonlTraceSink, TraceSink};

#[derive(Parser)]
#[command(name = "viral", version, about = "Predict which of two posts goes viral")]
struct Cli {
    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate users reacting to variants A and B
    Predict {
        /// Variant A text
        #[arg(long, conflicts_with = "a_file")]
        a: Option<String>,
        /// Read variant A from a file
        #[arg(long)]
        a_file: Option<PathBuf>,
        /// Variant B text
        #[arg(long, conflicts_with = "b_file")]
        b: Option<String>,
        /// Read variant B from a file
        #[arg(long)]
        b_file: Option<PathBuf>,
        /// Platform preset (default: twitter)
        #[arg(long, value_enum)]
        platform: Option<Platform>,
        /// Free-form platform label; overrides --platform
        #[arg(long)]
        platform_label: Option<String>,
        /// Total simulated users per variant (default: 10)
        #[arg(long)]
        max_users: Option<u64>,
        /// Users per variant per batch (default: 5)
        #[arg(long)]
        batch_size: Option<u64>,
        /// Run parameters as JSON; flags override its fields
        #[arg(long)]
        request: Option<PathBuf>,
        /// Prompt template file with {platform} and {content} placeholders
        #[arg(long)]
        template: Option<PathBuf>,
        #[arg(long, default_value = DEFAULT_PROVIDER)]
        provider: String,
        /// Model id (default: the provider's first recommended model)
        #[arg(long)]
        model: Option<String>,
        /// Never ask the model for constrained JSON output
        #[arg(long)]
        no_structured: bool,
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,
        /// Delay after the first failed attempt; doubles on each further failure
        #[arg(long, default_value_t = 1000)]
        retry_delay_ms: u64,
        /// Write the final snapshot as JSON
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write one JSON line per batch
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Print per-call usage records to stderr
        #[arg(long)]
        usage: bool,
    },
    /// List supported providers and models
    Providers {
        #[arg(long)]
        json: bool,
    },
    /// Render a saved snapshot as markdown
    Report {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Prints a progress block to stderr after every batch.
struct ProgressPrinter;

#[async_trait]
impl BatchObserver for ProgressPrinter {
    async fn on_batch(
        &self,
        batch: BatchCommitted,
        snapshot: &RunSnapshot,
    ) -> Result<(), ObserverError> {
        eprintln!(
            "[predict] batch {}/{}: {}/{} users simulated",
            batch.batch_index,
            batch.batch_count,
            snapshot.trials_completed(),
            snapshot.max_users()
        );
        for line in render_progress_lines(snapshot) {
            eprintln!("[predict]   {line}");
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Predict {
            a,
            a_file,
            b,
            b_file,
            platform,
            platform_label,
            max_users,
            batch_size,
            request,
            template,
            provider,
            model,
            no_structured,
            max_attempts,
            retry_delay_ms,
            out,
            trace,
            usage,
        } => {
            let a = read_content(a, a_file.as_ref())?;
            let b = read_content(b, b_file.as_ref())?;
            let label = platform_label
                .or_else(|| platform.map(|p| p.label().to_string()));

            let mut params = match request {
                Some(path) => read_json::<RunParams>(&path)?,
                None => RunParams::new(
                    a.clone().ok_or("missing --a or --a-file")?,
                    b.clone().ok_or("missing --b or --b-file")?,
                    label.clone().unwrap_or_else(|| Platform::Twitter.label().to_string()),
                ),
            };
            if let Some(a) = a {
                params.variant_a_content = a;
            }
            if let Some(b) = b {
                params.variant_b_content = b;
            }
            if let Some(label) = label {
                params.platform_label = label;
            }
            if let Some(n) = max_users {
                params.max_users = n;
            }
            if let Some(n) = batch_size {
                params.standard_batch_size = n;
            }
            if let Some(path) = template {
                params.prompt_template = Some(std::fs::read_to_string(&path)?);
            }
            params.validate()?;

            let selection = select_model(&provider, model.as_deref())?;
            let structured_output = selection.structured_output && !no_structured;
            let gateway: Arc<dyn ChatGateway> = if usage {
                Arc::new(ProviderGateway::from_env(
                    selection.provider,
                    Arc::new(StderrUsageSink),
                )?)
            } else {
                Arc::new(ProviderGateway::from_env(
                    selection.provider,
                    Arc::new(NoopUsageSink),
                )?)
            };

            let mut snapshot = RunSnapshot::new(&params);
            let oracle = GatewayOracle::new(
                gateway,
                ChatModel::new(selection.provider.name, selection.model.clone()),
            )
            .with_attribution(Attribution::new("viral::predict").with_job(snapshot.run_id()));

            let options = SimulationOptions {
                retry: RetryPolicy::new(max_attempts, Duration::from_millis(retry_delay_ms)),
                structured_output,
            };

            eprintln!(
                "[predict] {} users per variant on {} via {}/{}{}",
                params.max_users,
                params.platform_label,
                selection.provider.name,
                selection.model,
                if structured_output { "" } else { " (schema in prompt)" }
            );

            let trace_parts = match trace.as_ref() {
                Some(path) => Some(JsonlTraceSink::new(path)?),
                None => None,
            };
            let trace_sink = trace_parts.as_ref().map(|(sink, _)| sink as &dyn TraceSink);

            run_simulation(
                &oracle,
                &params,
                &options,
                &mut snapshot,
                Some(&ProgressPrinter),
                trace_sink,
            )
            .await?;

            if let Some((sink, worker)) = trace_parts {
                drop(sink);
                let rows = worker.join()?;
                if let Some(path) = trace.as_ref() {
                    eprintln!("[predict] {rows} trace rows appended to {}", path.display());
                }
            }

            if let Some(path) = out.as_ref() {
                write_json(path, &snapshot)?;
                eprintln!("[predict] snapshot written to {}", path.display());
            }
            println!("{}", render_summary_markdown(&snapshot));
        }
        Commands::Providers { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(PROVIDERS)?);
            } else {
                for spec in PROVIDERS {
                    println!(
                        "{} (key: {}, base url: {})",
                        spec.name, spec.api_key_env, spec.default_base_url
                    );
                    for model in spec.models {
                        let note = if supports_structured_output(model) {
                            ""
                        } else {
                            "  [no structured output]"
                        };
                        println!("  {model}{note}");
                    }
                }
            }
        }
        Commands::Report { snapshot, out } => {
            let snapshot: RunSnapshot = read_json(&snapshot)?;
            let markdown = render_summary_markdown(&snapshot);
            match out {
                Some(path) => {
                    std::fs::write(&path, markdown)?;
                    eprintln!("[report] written to {}", path.display());
                }
                None => println!("{markdown}"),
            }
        }
    }

    Ok(())
}

fn read_content(
    text: Option<String>,
    file: Option<&PathBuf>,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    match (text, file) {
        (Some(text), _) => Ok(Some(text)),
        (None, Some(path)) => Ok(Some(std::fs::read_to_string(path)?)),
        (None, None) => Ok(None),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(
    path: &PathBuf,
) -> Result<T, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    std::fs::write(path, json)
}
