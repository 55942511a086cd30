use crate::airquality::types::StationReading;
use crate::error::AlertError;
use tracing::debug;

/// Pick the station with the highest index value.
/// Ties keep the first maximum in input order; a missing value ranks as 0.
pub fn select_worst(stations: &[StationReading]) -> Result<&StationReading, AlertError> {
    let mut iter = stations.iter();
    let first = iter.next().ok_or(AlertError::EmptyDataset)?;
    let worst = iter.fold(first, |worst, current| {
        if current.score() > worst.score() {
            current
        } else {
            worst
        }
    });
    debug!(
        station = %worst.station_id,
        ias = worst.score(),
        candidates = stations.len(),
        "Selected worst station"
    );
    Ok(worst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airquality::types::{IndexCategory, IndexRecord};
    use proptest::prelude::*;

    fn station(id: &str, value: Option<f64>) -> StationReading {
        StationReading {
            station_id: id.to_string(),
            station_name: format!("{} name", id),
            city: "CDMX".to_string(),
            device_type: "reference".to_string(),
            ias: IndexRecord {
                value,
                category: value.map(IndexCategory::from_value).unwrap_or_default(),
                ..Default::default()
            },
            health_recommendations: Default::default(),
        }
    }

    #[test]
    fn test_picks_maximum() {
        let stations = vec![
            station("A", Some(40.0)),
            station("B", Some(185.0)),
            station("C", Some(62.0)),
        ];
        let worst = select_worst(&stations).unwrap();
        assert_eq!(worst.station_id, "B");
    }

    #[test]
    fn test_tie_keeps_first() {
        let stations = vec![
            station("A", Some(10.0)),
            station("B", Some(99.0)),
            station("C", Some(99.0)),
        ];
        assert_eq!(select_worst(&stations).unwrap().station_id, "B");
    }

    #[test]
    fn test_empty_is_error() {
        assert!(matches!(select_worst(&[]), Err(AlertError::EmptyDataset)));
        // An absent list arrives as `{"stations": null}`.
        let absent = serde_json::from_str::<crate::airquality::types::CurrentResponse>(
            r#"{"stations": null}"#,
        )
        .unwrap()
        .into_stations();
        assert!(matches!(select_worst(&absent), Err(AlertError::EmptyDataset)));
    }

    #[test]
    fn test_null_value_counts_as_zero() {
        // A single null-valued station is still a valid answer.
        let only = vec![station("N", None)];
        assert_eq!(select_worst(&only).unwrap().station_id, "N");

        // Null ties with an explicit zero; first one wins.
        let tie = vec![station("N", None), station("Z", Some(0.0))];
        assert_eq!(select_worst(&tie).unwrap().station_id, "N");

        // Any positive value beats a null.
        let beaten = vec![station("N", None), station("P", Some(0.5))];
        assert_eq!(select_worst(&beaten).unwrap().station_id, "P");
    }

    #[test]
    fn test_fixture_worst_is_tultitlan() {
        let json = include_str!("../tests/fixtures/current_wrapped.json");
        let stations = serde_json::from_str::<crate::airquality::types::CurrentResponse>(json)
            .unwrap()
            .into_stations();
        let worst = select_worst(&stations).unwrap();
        assert_eq!(worst.station_id, "TUL");
        assert_eq!(worst.score(), 185.0);
    }

    proptest! {
        #[test]
        fn proptest_result_dominates_all(
            values in prop::collection::vec(prop::option::of(0.0f64..500.0), 1..=40usize)
        ) {
            let stations: Vec<_> = values
                .iter()
                .enumerate()
                .map(|(i, v)| station(&i.to_string(), *v))
                .collect();
            let worst = select_worst(&stations).unwrap();
            for s in &stations {
                prop_assert!(worst.score() >= s.score());
            }
            // First maximum in input order.
            let first_max = stations
                .iter()
                .position(|s| s.score() == worst.score())
                .unwrap();
            prop_assert_eq!(&stations[first_max].station_id, &worst.station_id);
        }

        #[test]
        fn proptest_max_value_is_order_independent(
            values in prop::collection::vec(0.0f64..500.0, 1..=40usize)
        ) {
            use rand::seq::SliceRandom;
            use rand::thread_rng;

            let stations: Vec<_> = values
                .iter()
                .enumerate()
                .map(|(i, v)| station(&i.to_string(), Some(*v)))
                .collect();
            let mut shuffled = stations.clone();
            shuffled.shuffle(&mut thread_rng());

            let a = select_worst(&stations).unwrap().score();
            let b = select_worst(&shuffled).unwrap().score();
            prop_assert_eq!(a, b);
        }
    }
}
