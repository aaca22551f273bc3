mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use relay_core::backend::{Backend, BackendRegistry, LocalInvoker, RegistryError};
use relay_core::consumer::{BatchDisposition, Consumer, QueueBinding};
use relay_core::ports::{LogExpirySink, MessageQueue};
use relay_core::{InMemoryQueue, PipelineConfig, Publisher};

#[derive(Parser)]
#[command(name = "relay", about = "Queue-mediated event delivery pipeline")]
struct Cli {
    /// TOML configuration file (environment variables take precedence)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish events, then process the queue until nothing is visible
    Publish {
        /// Event bodies; an empty list publishes a single placeholder event
        bodies: Vec<String>,
    },

    /// Run consumers and publish one event per stdin line until EOF or Ctrl-C
    Serve,

    /// Print the effective configuration as JSON
    Config,
}

/// queue, backend, consumer, publisher を 1 つにまとめたもの
struct Pipeline {
    queue: Arc<InMemoryQueue>,
    publisher: Publisher,
    binding: Arc<QueueBinding>,
}

impl Pipeline {
    fn build(config: &PipelineConfig) -> Result<Self, RegistryError> {
        let queue = Arc::new(
            InMemoryQueue::new(config.queue.url.clone(), config.queue_settings())
                .with_expiry_sink(Arc::new(LogExpirySink)),
        );

        let mut registry = BackendRegistry::new();
        registry.register(
            config.backend.function_name.clone(),
            Arc::new(Backend::new(Arc::new(config.backend_delay()))),
        )?;
        let invoker = Arc::new(LocalInvoker::new(Arc::new(registry), config.invoke_timeout()));

        let consumer = Consumer::new()
            .with_backend(invoker, config.backend.function_name.clone())
            .with_policy(config.consumer.logical_failure_policy)
            .with_work_delay(config.work_delay());
        let binding = Arc::new(QueueBinding::new(
            queue.clone(),
            Arc::new(consumer),
            config.binding_settings(),
        ));
        let publisher = Publisher::new(queue.clone());

        Ok(Self {
            queue,
            publisher,
            binding,
        })
    }

    async fn drain(&self) -> Result<(), Box<dyn std::error::Error>> {
        for disposition in self.binding.drain().await? {
            print_json(&describe(&disposition))?;
        }
        Ok(())
    }

    async fn print_counts(&self) -> Result<(), Box<dyn std::error::Error>> {
        let counts = self.queue.counts().await?;
        print_json(&json!({ "queue": self.queue.name(), "counts": counts }))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init_tracing();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Publish { bodies } => cmd_publish(&config, bodies).await,
        Commands::Serve => cmd_serve(&config).await,
        Commands::Config => print_json(&config),
    }
}

async fn cmd_publish(
    config: &PipelineConfig,
    bodies: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::build(config)?;

    if bodies.is_empty() {
        print_json(&pipeline.publisher.handle(None).await)?;
    }
    for body in &bodies {
        print_json(&pipeline.publisher.handle(Some(body)).await)?;
    }

    pipeline.drain().await?;
    pipeline.print_counts().await
}

async fn cmd_serve(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::build(config)?;
    let group = Arc::clone(&pipeline.binding).spawn(config.consumer.concurrency);
    info!(
        queue = %config.queue.url,
        backend = %config.backend.function_name,
        pollers = group.len(),
        "consumers started"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => print_json(&pipeline.publisher.handle(Some(&line)).await)?,
                None => break false,
            },
            _ = tokio::signal::ctrl_c() => break true,
        }
    };

    group.shutdown_and_join().await;
    if interrupted {
        info!("interrupted, consumers stopped");
    } else {
        // stdin closed: finish whatever is still visible
        pipeline.drain().await?;
    }
    pipeline.print_counts().await
}

fn describe(disposition: &BatchDisposition) -> serde_json::Value {
    match disposition {
        BatchDisposition::Empty => json!({ "outcome": "empty" }),
        BatchDisposition::Acknowledged { report, stale } => json!({
            "outcome": "acknowledged",
            "stale": stale,
            "messages": report
                .processed
                .iter()
                .map(|m| json!({
                    "queueMessageId": m.queue_message_id.to_string(),
                    "messageId": m.message_id.to_string(),
                    "response": m.response,
                }))
                .collect::<Vec<_>>(),
        }),
        BatchDisposition::Aborted { size, abort } => json!({
            "outcome": "aborted",
            "size": size,
            "failedAt": abort.index,
            "error": abort.to_string(),
        }),
        BatchDisposition::TimedOut { size, after } => json!({
            "outcome": "timed_out",
            "size": size,
            "afterMs": u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
