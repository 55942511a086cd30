use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::airquality::types::StationReading;
use crate::airquality::StationSource;
use crate::error::AlertError;
use crate::formatter::AlertFormatter;
use crate::render::{PanelRenderer, RenderTarget};
use crate::selector::select_worst;
use crate::storage::ledger::Ledger;
use crate::storage::{ArtifactPublisher, PublishedImage};
use crate::telegram::{DispatchOutcome, Dispatcher};

#[derive(Debug, Clone, Serialize)]
pub struct StationSummary {
    pub id: String,
    pub name: String,
    pub ias: f64,
    pub category: String,
    pub city: String,
}

impl From<&StationReading> for StationSummary {
    fn from(s: &StationReading) -> Self {
        Self {
            id: s.station_id.clone(),
            name: s.station_name.clone(),
            ias: s.score(),
            category: s.ias.category.label().to_string(),
            city: s.city.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AlertSuccess {
    pub success: bool,
    pub station: StationSummary,
    pub image: PublishedImage,
    pub message: String,
    pub caption_chars: usize,
    pub caption_oversized: bool,
    pub dispatch: DispatchOutcome,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct AlertFailure {
    pub success: bool,
    pub error: String,
    pub stack: String,
}

impl AlertFailure {
    pub fn from_error(err: &AlertError) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            stack: err.chain().join("\n  caused by: "),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RunBody {
    Success(AlertSuccess),
    Failure(AlertFailure),
}

/// What one scheduled invocation answers with.
#[derive(Debug, Serialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: RunBody,
}

impl InvocationResponse {
    pub fn failure(err: &AlertError) -> Self {
        Self {
            status_code: 500,
            body: RunBody::Failure(AlertFailure::from_error(err)),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.body, RunBody::Success(_))
    }
}

/// fetch → select → render → publish → format → dispatch, strictly in sequence.
pub struct AlertPipeline<'a> {
    pub source: &'a dyn StationSource,
    pub renderer: &'a dyn PanelRenderer,
    pub publisher: &'a dyn ArtifactPublisher,
    pub dispatcher: &'a dyn Dispatcher,
    pub formatter: &'a AlertFormatter,
    pub panel_url: &'a str,
    pub ledger: Option<&'a Ledger>,
}

impl AlertPipeline<'_> {
    pub async fn run(&self) -> InvocationResponse {
        info!("Starting alert run");
        let started = Utc::now();

        match self.execute(started).await {
            Ok(success) => {
                info!(
                    station = %success.station.id,
                    ias = success.station.ias,
                    image = %success.image.url,
                    dispatch = success.dispatch.status(),
                    "Alert run complete"
                );
                InvocationResponse {
                    status_code: 200,
                    body: RunBody::Success(success),
                }
            }
            Err(e) => {
                error!(kind = e.kind(), "Alert run failed: {}", e);
                if let Some(ledger) = self.ledger {
                    ledger
                        .log_failure(started, &e)
                        .unwrap_or_else(|le| warn!("Failed to log run: {}", le));
                }
                InvocationResponse::failure(&e)
            }
        }
    }

    async fn execute(&self, at: DateTime<Utc>) -> Result<AlertSuccess, AlertError> {
        let stations = self.source.current_readings().await?;
        let worst = select_worst(&stations)?;
        info!(
            station = %worst.station_id,
            name = %worst.station_name,
            ias = worst.score(),
            candidates = stations.len(),
            "Worst station selected"
        );

        let target = RenderTarget {
            url: self.panel_url.to_string(),
            station_id: worst.station_id.clone(),
        };
        let image = self.renderer.render(&target).await?;
        info!(bytes = image.bytes.len(), "Screenshot captured");

        let published = self.publisher.publish(&image, worst, at).await?;
        info!(key = %published.key, url = %published.url, "Image published");

        let message = self.formatter.format(worst);
        let dispatch = self.dispatcher.dispatch(&published.url, &message.caption).await;

        if let Some(ledger) = self.ledger {
            ledger
                .log_alert(at, worst, &published.url, dispatch.status())
                .unwrap_or_else(|e| warn!("Failed to log run: {}", e));
        }

        Ok(AlertSuccess {
            success: true,
            station: StationSummary::from(worst),
            image: published,
            message: message.caption,
            caption_chars: message.char_count,
            caption_oversized: message.oversized,
            dispatch,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}
