pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::AlertError;
use types::{HistoricalPoint, StationReading};

/// Where station readings come from.
#[async_trait]
pub trait StationSource: Send + Sync {
    async fn current_readings(&self) -> Result<Vec<StationReading>, AlertError>;

    async fn historical(
        &self,
        station_id: &str,
        variable: &str,
        hours: u32,
    ) -> Result<Vec<HistoricalPoint>, AlertError>;
}
