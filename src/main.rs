mod airquality;
mod config;
mod error;
mod formatter;
mod panel;
mod pipeline;
mod poller;
mod render;
mod selector;
mod storage;
mod telegram;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use airquality::client::AirQualityClient;
use config::Config;
use error::AlertError;
use formatter::AlertFormatter;
use pipeline::{AlertPipeline, InvocationResponse};
use poller::{MinuteSchedule, PanelPoller};
use render::ChromeRenderer;
use storage::ledger::Ledger;
use storage::S3Publisher;
use telegram::TelegramDispatcher;

/// Everything one alert run needs, built once from config.
struct AlertServices {
    source: AirQualityClient,
    renderer: ChromeRenderer,
    publisher: S3Publisher,
    dispatcher: TelegramDispatcher,
    formatter: AlertFormatter,
    ledger: Ledger,
}

impl AlertServices {
    fn build(config: &Config) -> Result<Self, AlertError> {
        let credentials = config::aws_credentials().map_err(AlertError::Config)?;
        Ok(Self {
            source: AirQualityClient::new(&config.api).map_err(AlertError::Config)?,
            renderer: ChromeRenderer::new(&config.panel),
            publisher: S3Publisher::new(&config.storage, credentials).map_err(AlertError::Config)?,
            dispatcher: TelegramDispatcher::new(&config.telegram).map_err(AlertError::Config)?,
            formatter: AlertFormatter::new(&config.alert),
            ledger: Ledger::new(config.storage.ledger_path.clone()),
        })
    }

    fn pipeline<'a>(&'a self, panel_url: &'a str) -> AlertPipeline<'a> {
        AlertPipeline {
            source: &self.source,
            renderer: &self.renderer,
            publisher: &self.publisher,
            dispatcher: &self.dispatcher,
            formatter: &self.formatter,
            panel_url,
            ledger: Some(&self.ledger),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aire_alert=info".parse().unwrap()),
        )
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "alert".to_string());
    match command.as_str() {
        "alert" => {
            let response = match Config::load() {
                Ok(config) => run_alert(&config).await,
                Err(e) => InvocationResponse::failure(&AlertError::Config(e)),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&response).context("Failed to serialize response")?
            );
            // Returned rather than exiting so every guard is dropped first.
            Ok(if response.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        "panel" => {
            let config = Config::load().context("Failed to load config")?;
            refresh_panel_once(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        "watch" => {
            let config = Config::load().context("Failed to load config")?;
            watch(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        other => bail!("Unknown command '{}' (expected alert, panel or watch)", other),
    }
}

async fn run_alert(config: &Config) -> InvocationResponse {
    match AlertServices::build(config) {
        Ok(services) => services.pipeline(&config.panel.url).run().await,
        Err(e) => {
            error!(kind = e.kind(), "Alert run not started: {}", e);
            InvocationResponse::failure(&e)
        }
    }
}

async fn refresh_panel_once(config: &Config) -> Result<()> {
    let offset = poller::utc_offset(config.poller.utc_offset_hours)?;
    let client = AirQualityClient::new(&config.api)?;
    let panel = PanelPoller::new(&client, &config.api, &config.poller, offset);
    panel.refresh().await?;
    Ok(())
}

async fn watch(config: &Config) -> Result<()> {
    let offset = poller::utc_offset(config.poller.utc_offset_hours)?;
    let client = AirQualityClient::new(&config.api)?;
    let services = if config.poller.run_alerts {
        Some(AlertServices::build(config)?)
    } else {
        None
    };
    let panel = PanelPoller::new(&client, &config.api, &config.poller, offset);
    let mut schedule = MinuteSchedule::new(config.poller.minute, offset);

    // Graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        r.store(false, Ordering::SeqCst);
    });

    info!(
        minute = config.poller.minute,
        utc_offset = %schedule.offset(),
        check_interval_secs = config.poller.check_interval_secs,
        snapshot = %config.poller.snapshot_path.display(),
        run_alerts = config.poller.run_alerts,
        "Starting panel poller"
    );

    // Initial load so the snapshot exists before the first mark.
    if let Err(e) = panel.refresh().await {
        error!(kind = e.kind(), "Initial panel load failed: {}", e);
    }

    while running.load(Ordering::SeqCst) {
        // Sleep with early exit on shutdown
        for _ in 0..config.poller.check_interval_secs.max(1) {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
        if !running.load(Ordering::SeqCst) || !schedule.is_due(Utc::now()) {
            continue;
        }

        info!("Refresh mark reached");
        if let Err(e) = panel.refresh().await {
            error!(kind = e.kind(), "Panel refresh failed: {}", e);
        }
        if let Some(services) = &services {
            let response = services.pipeline(&config.panel.url).run().await;
            info!(status = response.status_code, "Scheduled alert run finished");
        }
    }

    info!("Shut down cleanly");
    Ok(())
}
