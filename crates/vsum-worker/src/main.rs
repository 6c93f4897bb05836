//! Video summarization worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vsum_llm_client::{ChatCompletionClient, DisabledSummarizer, LlmError, Summarizer};
use vsum_media::{FfmpegAudioExtractor, WhisperTranscriber, YtDlpFetcher};
use vsum_queue::{JobQueue, QueueConfig, RedisNotifier};
use vsum_store::RedisRecordStore;
use vsum_worker::{metrics, JobExecutor, PipelineDeps, VideoPipeline, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vsum=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vsum-worker");

    let config = WorkerConfig::from_env().context("loading worker config")?;
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        metrics::install_exporter(port)?;
        info!("Prometheus exporter listening on port {}", port);
    }

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;

    let queue_config = QueueConfig::from_env();
    let queue = Arc::new(JobQueue::new(queue_config.clone()).context("creating job queue")?);
    let notifier =
        Arc::new(RedisNotifier::new(&queue_config.redis_url).context("creating notifier")?);
    let store = Arc::new(RedisRecordStore::from_env().context("creating record store")?);

    let summarizer: Arc<dyn Summarizer> = match ChatCompletionClient::from_env() {
        Ok(client) => {
            info!("Summaries via model {}", client.model());
            Arc::new(client)
        }
        Err(LlmError::MissingApiKey) => {
            warn!("OPENAI_API_KEY not set, summaries will be unavailable");
            Arc::new(DisabledSummarizer)
        }
        Err(e) => return Err(e).context("creating summarizer"),
    };

    let mut fetcher = YtDlpFetcher::new().with_format(config.ytdlp_format.clone());
    if let Some(cookies) = &config.ytdlp_cookies {
        fetcher = fetcher.with_cookies(cookies.clone());
    }

    let deps = PipelineDeps {
        fetcher: Arc::new(fetcher),
        extractor: Arc::new(FfmpegAudioExtractor::new()),
        transcriber: Arc::new(WhisperTranscriber::new().with_model(config.whisper_model.clone())),
        summarizer,
        store,
        notifier,
    };
    let pipeline = Arc::new(VideoPipeline::new(deps, config.pipeline_config()));

    let executor = JobExecutor::new(config, queue, pipeline);

    // Setup signal handlers
    let shutdown = executor.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown.send(true);
    });

    executor.run().await.context("executor failed")?;

    info!("Worker shutdown complete");
    Ok(())
}
