use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::airquality::StationSource;
use crate::config::{ApiConfig, PollerConfig};
use crate::error::AlertError;
use crate::panel::{load_panel, PanelView};

/// Fires once per hour, at a fixed minute of local wall-clock time.
///
/// Checked on a coarse timer: a check that does not land inside the minute
/// (suspended process, long cycle) skips that hour with no catch-up.
#[derive(Debug)]
pub struct MinuteSchedule {
    minute: u32,
    offset: FixedOffset,
    last_fired: Option<DateTime<FixedOffset>>,
}

impl MinuteSchedule {
    pub fn new(minute: u32, offset: FixedOffset) -> Self {
        Self {
            minute: minute % 60,
            offset,
            last_fired: None,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// True when `now` is inside the target minute and this mark has not fired yet.
    pub fn is_due(&mut self, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        if local.minute() != self.minute {
            return false;
        }
        let mark = local
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0));
        if mark.is_some() && mark == self.last_fired {
            debug!("Refresh mark already handled");
            return false;
        }
        self.last_fired = mark;
        true
    }
}

pub fn utc_offset(hours: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(hours * 3600)
        .with_context(|| format!("UTC offset out of range: {} hours", hours))
}

pub struct PanelPoller<'a> {
    source: &'a dyn StationSource,
    api: &'a ApiConfig,
    snapshot_path: PathBuf,
    offset: FixedOffset,
}

impl<'a> PanelPoller<'a> {
    pub fn new(
        source: &'a dyn StationSource,
        api: &'a ApiConfig,
        poller: &PollerConfig,
        offset: FixedOffset,
    ) -> Self {
        Self {
            source,
            api,
            snapshot_path: poller.snapshot_path.clone(),
            offset,
        }
    }

    /// Load the worst station's panel and write it to the snapshot file.
    pub async fn refresh(&self) -> Result<PanelView, AlertError> {
        let now = Utc::now().with_timezone(&self.offset);
        let view = load_panel(self.source, self.api, now).await?;
        write_snapshot(&self.snapshot_path, &view).map_err(AlertError::Storage)?;
        info!(
            station = %view.station_id,
            ias = view.ias_value,
            path = %self.snapshot_path.display(),
            "Panel snapshot updated"
        );
        Ok(view)
    }
}

/// Write via a temp file and rename so readers never see a half-written snapshot.
pub fn write_snapshot(path: &Path, view: &PanelView) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(view).context("Failed to serialize panel")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move snapshot into {}", path.display()))?;
    Ok(())
}
