//! Live dashboard panel model.
//!
//! Builds everything the dashboard page shows for the worst station: header text,
//! the coloured index indicator and its position on the index bar, dominant pollutant,
//! health advice, and the historical bar-chart series.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, TimeZone, Timelike};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::airquality::types::{HistoricalPoint, IndexCategory, StationReading};
use crate::airquality::StationSource;
use crate::config::ApiConfig;
use crate::error::AlertError;
use crate::formatter::{format_fixed, format_index};
use crate::selector::select_worst;

const MONTHS_ES: [&str; 12] = [
    "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sep", "oct", "nov", "dic",
];

pub const NO_HISTORY: &str = "No hay datos históricos disponibles";
pub const HISTORY_ERROR: &str = "Error al cargar gráfica";

#[derive(Debug, Clone, Serialize)]
pub struct PanelView {
    pub station_id: String,
    pub station_name: String,
    pub subtitle: String,
    pub ias_value: f64,
    pub ias_display: String,
    pub category: String,
    pub risk: String,
    pub emoji: String,
    pub indicator_color: String,
    /// `"r, g, b"` for CSS custom properties, when the color parses.
    pub indicator_rgb: Option<String>,
    pub bar_position: f64,
    pub pollutant_name: String,
    pub pollutant_value: String,
    pub health_a: String,
    pub health_b: String,
    pub health_c: String,
    pub last_update: String,
    pub chart: Chart,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Chart {
    Bars { bars: Vec<ChartBar> },
    Placeholder { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBar {
    pub label: String,
    pub value: f64,
    pub color: String,
}

impl PanelView {
    pub fn build(station: &StationReading, chart: Chart, now: DateTime<FixedOffset>) -> Self {
        let ias = &station.ias;
        let value = station.score();
        let indicator_color = ias
            .color_code
            .clone()
            .filter(|c| hex_to_rgb(c).is_some())
            .unwrap_or_else(|| ias.category.color().to_string());
        let indicator_rgb =
            hex_to_rgb(&indicator_color).map(|(r, g, b)| format!("{}, {}, {}", r, g, b));

        let pollutant_value = match &ias.dominant_value {
            Some(m) => format!("{} {}", format_fixed(m.value.unwrap_or(0.0), 2), m.unit),
            None => "--".to_string(),
        };
        let health = &station.health_recommendations;

        Self {
            station_id: station.station_id.clone(),
            station_name: station.station_name.clone(),
            subtitle: device_type_label(&station.device_type).to_string(),
            ias_value: value,
            ias_display: format_index(value),
            category: ias.category.label().to_string(),
            risk: if ias.risk_level.is_empty() {
                ias.category.risk_phrase().to_string()
            } else {
                ias.risk_level.clone()
            },
            emoji: IndexCategory::from_value(value).emoji().to_string(),
            indicator_color,
            indicator_rgb,
            bar_position: bar_position(value),
            pollutant_name: pollutant_label(&ias.dominant_pollutant),
            pollutant_value,
            health_a: health.a.recommendation.clone(),
            health_b: health.b.recommendation.clone(),
            health_c: health.c.recommendation.clone(),
            last_update: format!("Última lectura: {}", format_reading_time(now)),
            chart,
        }
    }
}

pub fn device_type_label(device_type: &str) -> &'static str {
    match device_type {
        "reference" => "Monitor de Referencia",
        "smability-SMAA" => "Monitor Smability",
        "smability-SMAAso2" => "Monitor Smability SO₂",
        "smability-SMAAmicro" => "Monitor Smability Micro",
        _ => "Monitor",
    }
}

pub fn pollutant_label(code: &str) -> String {
    match code.to_lowercase().as_str() {
        "o3" => "Ozono (O₃)".to_string(),
        "pm25" => "PM2.5".to_string(),
        "pm10" => "PM10".to_string(),
        "co" => "Monóxido de Carbono (CO)".to_string(),
        "no2" => "Dióxido de Nitrógeno (NO₂)".to_string(),
        "so2" => "Dióxido de Azufre (SO₂)".to_string(),
        _ => code.to_uppercase(),
    }
}

/// Position of a value on the five-band index bar, in percent.
pub fn bar_position(value: f64) -> f64 {
    let position = if value <= 50.0 {
        (value / 50.0) * 20.0
    } else if value <= 100.0 {
        20.0 + ((value - 50.0) / 50.0) * 20.0
    } else if value <= 150.0 {
        40.0 + ((value - 100.0) / 50.0) * 20.0
    } else if value <= 200.0 {
        60.0 + ((value - 150.0) / 50.0) * 20.0
    } else {
        80.0 + (((value - 200.0) / 100.0) * 20.0).min(20.0)
    };
    position.clamp(0.0, 100.0)
}

pub fn hex_to_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

fn format_reading_time(now: DateTime<FixedOffset>) -> String {
    format!(
        "{:02} {} {:02}:{:02}",
        now.day(),
        MONTHS_ES[now.month0() as usize],
        now.hour(),
        now.minute()
    )
}

/// RFC 3339, or a naive timestamp read in the panel's local offset.
pub fn parse_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&offset));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| offset.from_local_datetime(&naive).single())
}

/// Chart series: nulls dropped, oldest first, labelled `dd/HH:00`.
pub fn build_chart(points: &[HistoricalPoint], offset: FixedOffset) -> Chart {
    let mut bars: Vec<(DateTime<FixedOffset>, f64)> = points
        .iter()
        .filter_map(|p| {
            let value = p.value?;
            match parse_timestamp(&p.timestamp, offset) {
                Some(ts) => Some((ts, value)),
                None => {
                    debug!(timestamp = %p.timestamp, "Skipping unparseable historical timestamp");
                    None
                }
            }
        })
        .collect();
    if bars.is_empty() {
        return Chart::Placeholder {
            message: NO_HISTORY.to_string(),
        };
    }
    bars.sort_by_key(|(ts, _)| *ts);

    Chart::Bars {
        bars: bars
            .into_iter()
            .map(|(ts, value)| ChartBar {
                label: format!("{:02}/{:02}:00", ts.day(), ts.hour()),
                value,
                color: IndexCategory::from_value(value).color().to_string(),
            })
            .collect(),
    }
}

/// Fetch, select and assemble the panel. A failed history fetch only degrades the chart.
pub async fn load_panel(
    source: &dyn StationSource,
    api: &ApiConfig,
    now: DateTime<FixedOffset>,
) -> Result<PanelView, AlertError> {
    let stations = source.current_readings().await?;
    let worst = select_worst(&stations)?;
    info!(
        station = %worst.station_id,
        name = %worst.station_name,
        ias = worst.score(),
        "Worst station for panel"
    );

    let chart = match source
        .historical(&worst.station_id, &api.historical_variable, api.historical_hours)
        .await
    {
        Ok(points) => build_chart(&points, *now.offset()),
        Err(e) => {
            warn!(station = %worst.station_id, error = %e, "Historical fetch failed");
            Chart::Placeholder {
                message: HISTORY_ERROR.to_string(),
            }
        }
    };

    Ok(PanelView::build(worst, chart, now))
}
