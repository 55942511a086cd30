use serde::Serialize;
use tracing::warn;

use crate::airquality::types::{IndexCategory, StationReading};
use crate::config::AlertConfig;

/// Telegram caption derived from one station reading.
#[derive(Debug, Clone, Serialize)]
pub struct AlertMessage {
    pub caption: String,
    pub char_count: usize,
    /// Set when `char_count` exceeds the configured maximum. The caption is never cut.
    pub oversized: bool,
}

/// Recommendation text for each category, emitted verbatim.
pub fn recommendation_block(category: &IndexCategory) -> &'static str {
    match category {
        IndexCategory::Good => {
            "✅ La calidad del aire es satisfactoria. Disfruta las actividades al aire libre."
        }
        IndexCategory::Acceptable => {
            "🙂 Personas sensibles: considera reducir las actividades intensas al aire libre."
        }
        IndexCategory::Bad => {
            "😷 Grupos sensibles: reduce las actividades físicas al aire libre.\n\
             👥 Población general: limita los esfuerzos prolongados en exteriores."
        }
        IndexCategory::VeryBad => {
            "🚫 Todos: evita actividades al aire libre.\n\
             🏠 Grupos sensibles: permanece en interiores con ventanas cerradas."
        }
        IndexCategory::ExtremelyBad => {
            "☠️ Emergencia: permanece en interiores y evita actividades al aire libre.\n\
             📢 Sigue las indicaciones de protección civil."
        }
        IndexCategory::Unknown(_) => {
            "ℹ️ Consulta las recomendaciones oficiales de salud para tu zona."
        }
    }
}

pub struct AlertFormatter {
    max_chars: usize,
    map_url: Option<String>,
    cta_url: Option<String>,
}

impl AlertFormatter {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            max_chars: config.max_caption_chars,
            map_url: config.map_url.clone(),
            cta_url: config.cta_url.clone(),
        }
    }

    pub fn format(&self, station: &StationReading) -> AlertMessage {
        let ias = &station.ias;
        let category = &ias.category;

        let pollutant = match &ias.dominant_value {
            Some(m) if !ias.dominant_pollutant.is_empty() => format!(
                "{} - {} {}",
                ias.dominant_pollutant.to_uppercase(),
                format_fixed(m.value.unwrap_or(0.0), 1),
                m.unit
            ),
            _ if !ias.dominant_pollutant.is_empty() => ias.dominant_pollutant.to_uppercase(),
            _ => "N/D".to_string(),
        };
        let risk = if ias.risk_level.trim().is_empty() {
            category.risk_phrase()
        } else {
            ias.risk_level.trim()
        };

        let mut caption = format!(
            "{emoji} *Alerta de Calidad del Aire*\n\
             \n\
             📍 *{name}* - {city}\n\
             📊 IAS: *{value}* ({label})\n\
             🧪 Contaminante: {pollutant}\n\
             ⚠️ Riesgo: {risk}\n\
             \n\
             *Recomendaciones:*\n\
             {block}",
            emoji = category.emoji(),
            name = markdown_escape(&station.station_name),
            city = markdown_escape(&station.city),
            value = format_index(station.score()),
            label = markdown_escape(category.label()),
            pollutant = markdown_escape(&pollutant),
            risk = markdown_escape(risk),
            block = recommendation_block(category),
        );

        let health = &station.health_recommendations;
        let groups = [
            ("👥", "Grupo Sensible", &health.a.recommendation),
            ("⚠️", "Grupo Vulnerable", &health.b.recommendation),
            ("🌍", "Población General", &health.c.recommendation),
        ];
        for (icon, group, advice) in groups {
            let advice = advice.trim();
            if !advice.is_empty() {
                let block = format!("\n\n{} *{}:*\n{}", icon, group, markdown_escape(advice));
                caption.push_str(&block);
            }
        }

        if let Some(url) = &self.map_url {
            caption.push_str(&format!("\n\n🗺️ *Mapa en tiempo real:* {}", url));
        }
        if let Some(url) = &self.cta_url {
            caption.push_str(&format!(
                "\n\n💬 *¿Quieres alertas personalizadas de TU zona?*\nChatea con AIreGPT: {}",
                url
            ));
        }

        let char_count = caption.chars().count();
        let oversized = char_count > self.max_chars;
        if oversized {
            warn!(
                station = %station.station_id,
                chars = char_count,
                max = self.max_chars,
                "Caption exceeds maximum length"
            );
        }

        AlertMessage {
            caption,
            char_count,
            oversized,
        }
    }
}

/// Backslash-escape the characters Telegram's legacy Markdown treats as entity markers.
pub fn markdown_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Fixed decimals with ties rounded away from zero (87.25 -> "87.3").
pub fn format_fixed(value: f64, decimals: u32) -> String {
    let scale = 10f64.powi(decimals as i32);
    format!("{:.*}", decimals as usize, (value * scale).round() / scale)
}

/// Whole numbers print bare, anything else with one decimal.
pub fn format_index(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format_fixed(value, 1)
    }
}
