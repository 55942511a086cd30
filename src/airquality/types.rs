use serde::{Deserialize, Deserializer, Serialize};

// --- Current readings ---

/// The current-readings endpoint answers with either a bare array or `{"stations": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CurrentResponse {
    Bare(Vec<StationReading>),
    Wrapped {
        #[serde(default, deserialize_with = "null_as_empty_vec")]
        stations: Vec<StationReading>,
    },
}

impl CurrentResponse {
    pub fn into_stations(self) -> Vec<StationReading> {
        match self {
            CurrentResponse::Bare(stations) => stations,
            CurrentResponse::Wrapped { stations } => stations,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationReading {
    #[serde(alias = "stationId")]
    pub station_id: String,
    #[serde(alias = "stationName")]
    pub station_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub city: String,
    #[serde(default, alias = "deviceType", deserialize_with = "null_as_default")]
    pub device_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ias: IndexRecord,
    #[serde(default, alias = "healthRecommendations", deserialize_with = "null_as_default")]
    pub health_recommendations: HealthRecommendations,
}

impl StationReading {
    /// Index value used for ranking. Missing or null counts as 0.
    pub fn score(&self) -> f64 {
        self.ias.value.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IndexRecord {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub category: IndexCategory,
    #[serde(default, alias = "riskLevel", deserialize_with = "null_as_default")]
    pub risk_level: String,
    #[serde(default, alias = "dominantPollutant", deserialize_with = "null_as_default")]
    pub dominant_pollutant: String,
    #[serde(default, alias = "dominantValue")]
    pub dominant_value: Option<Measure>,
    #[serde(default, alias = "colorCode")]
    pub color_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Measure {
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unit: String,
}

/// Health advice keyed by population group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthRecommendations {
    #[serde(default, deserialize_with = "null_as_default")]
    pub a: Recommendation,
    #[serde(default, deserialize_with = "null_as_default")]
    pub b: Recommendation,
    #[serde(default, deserialize_with = "null_as_default")]
    pub c: Recommendation,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Recommendation {
    #[serde(default, deserialize_with = "null_as_default")]
    pub recommendation: String,
}

// --- Index categories ---

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum IndexCategory {
    Good,
    Acceptable,
    Bad,
    VeryBad,
    ExtremelyBad,
    /// Any label the API sends that is not one of the five official ones.
    Unknown(String),
}

impl Default for IndexCategory {
    fn default() -> Self {
        IndexCategory::Unknown(String::new())
    }
}

impl IndexCategory {
    pub fn parse(label: &str) -> Self {
        let trimmed = label.trim();
        match trimmed.to_lowercase().as_str() {
            "buena" => IndexCategory::Good,
            "aceptable" => IndexCategory::Acceptable,
            "mala" => IndexCategory::Bad,
            "muy mala" => IndexCategory::VeryBad,
            "extremadamente mala" => IndexCategory::ExtremelyBad,
            _ => IndexCategory::Unknown(trimmed.to_string()),
        }
    }

    /// Category band for a raw index value.
    pub fn from_value(value: f64) -> Self {
        if value <= 50.0 {
            IndexCategory::Good
        } else if value <= 100.0 {
            IndexCategory::Acceptable
        } else if value <= 150.0 {
            IndexCategory::Bad
        } else if value <= 200.0 {
            IndexCategory::VeryBad
        } else {
            IndexCategory::ExtremelyBad
        }
    }

    pub fn label(&self) -> &str {
        match self {
            IndexCategory::Good => "Buena",
            IndexCategory::Acceptable => "Aceptable",
            IndexCategory::Bad => "Mala",
            IndexCategory::VeryBad => "Muy Mala",
            IndexCategory::ExtremelyBad => "Extremadamente Mala",
            IndexCategory::Unknown(label) => label,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            IndexCategory::Good => "#00E400",
            IndexCategory::Acceptable => "#FFFF00",
            IndexCategory::Bad => "#FF7E00",
            IndexCategory::VeryBad => "#FF0000",
            IndexCategory::ExtremelyBad => "#8F3F97",
            IndexCategory::Unknown(_) => "#999999",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            IndexCategory::Good => "😊",
            IndexCategory::Acceptable => "😐",
            IndexCategory::Bad => "😷",
            IndexCategory::VeryBad => "🤢",
            IndexCategory::ExtremelyBad => "☠️",
            IndexCategory::Unknown(_) => "❔",
        }
    }

    pub fn risk_phrase(&self) -> &'static str {
        match self {
            IndexCategory::Good => "Bajo",
            IndexCategory::Acceptable => "Moderado",
            IndexCategory::Bad => "Alto",
            IndexCategory::VeryBad => "Muy alto",
            IndexCategory::ExtremelyBad => "Extremadamente alto",
            IndexCategory::Unknown(_) => "Desconocido",
        }
    }
}

impl From<String> for IndexCategory {
    fn from(label: String) -> Self {
        IndexCategory::parse(&label)
    }
}

impl From<IndexCategory> for String {
    fn from(category: IndexCategory) -> Self {
        category.label().to_string()
    }
}

impl std::fmt::Display for IndexCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

// --- Historical readings ---

#[derive(Debug, Deserialize)]
pub struct HistoricalResponse {
    #[serde(default, deserialize_with = "null_as_empty_vec")]
    pub data: Vec<HistoricalPoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalPoint {
    pub timestamp: String,
    #[serde(default)]
    pub value: Option<f64>,
}

/// Deserialize `null` as an empty Vec.
fn null_as_empty_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(|opt| opt.unwrap_or_default())
}

/// Deserialize `null` as the type's default (the API sends null for unset text fields).
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Option::<T>::deserialize(deserializer).map(|opt| opt.unwrap_or_default())
}
