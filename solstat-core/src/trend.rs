//! Demand trend classification and next-period projection.
//!
//! Series are short (a handful of academic periods), so the projection is a
//! simple period-over-period growth ratio rather than a fitted model.

use tracing::debug;

use crate::error::AnalysisError;
use crate::types::{EntitySeries, PeakPeriod, TimeSeriesPoint, TrendClassification, TrendDirection};

/// Default percent variation beyond which a series counts as moving.
pub const DEFAULT_THRESHOLD_PCT: f64 = 5.0;

/// Classifies demand series into growing, declining or stable.
#[derive(Debug, Clone)]
pub struct TrendClassifier {
    threshold_pct: f64,
}

impl Default for TrendClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD_PCT)
    }
}

impl TrendClassifier {
    pub fn new(threshold_pct: f64) -> Self {
        Self {
            threshold_pct: threshold_pct.abs(),
        }
    }

    pub fn threshold_pct(&self) -> f64 {
        self.threshold_pct
    }

    /// Classify one entity's series.
    pub fn classify(
        &self,
        entity: &str,
        series: &[TimeSeriesPoint],
    ) -> Result<TrendClassification, AnalysisError> {
        let Some(last) = series.last() else {
            return Err(AnalysisError::EmptySeries {
                entity: entity.to_string(),
            });
        };
        let current = last.count;

        let estimated = match series.len().checked_sub(2).map(|i| series[i].count) {
            Some(previous) if previous > 0 => {
                (current as f64 * (current as f64 / previous as f64)).round() as u64
            }
            _ => current,
        };

        let percent_variation = if current == 0 {
            0.0
        } else {
            (estimated as f64 - current as f64) / current as f64 * 100.0
        };

        let direction = if percent_variation > self.threshold_pct {
            TrendDirection::Growing
        } else if percent_variation < -self.threshold_pct {
            TrendDirection::Declining
        } else {
            TrendDirection::Stable
        };

        Ok(TrendClassification {
            entity_name: entity.to_string(),
            current_demand: current,
            estimated_next_demand: estimated,
            direction,
            percent_variation,
            peak: find_peak(series),
        })
    }

    /// Classify many series, skipping empty ones. Output keeps input order.
    pub fn classify_all(&self, series: &[EntitySeries]) -> Vec<TrendClassification> {
        series
            .iter()
            .filter_map(|s| match self.classify(&s.entity, &s.points) {
                Ok(trend) => Some(trend),
                Err(e) => {
                    debug!(error = %e, "skipping series");
                    None
                }
            })
            .collect()
    }
}

/// The period with the highest count. Ties go to the earliest period.
pub fn find_peak(series: &[TimeSeriesPoint]) -> Option<PeakPeriod> {
    let mut best: Option<&TimeSeriesPoint> = None;
    for point in series {
        if best.is_none_or(|b| point.count > b.count) {
            best = Some(point);
        }
    }
    best.map(|p| PeakPeriod {
        period_label: p.period_label.clone(),
        count: p.count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(points: &[(&str, u64)]) -> Vec<TimeSeriesPoint> {
        points
            .iter()
            .map(|(label, count)| TimeSeriesPoint::new(*label, *count))
            .collect()
    }

    #[test]
    fn test_growing_example() {
        let trend = TrendClassifier::default()
            .classify("Calculus I", &series(&[("Jan", 4), ("Feb", 6)]))
            .unwrap();
        assert_eq!(trend.current_demand, 6);
        assert_eq!(trend.estimated_next_demand, 9);
        assert_eq!(trend.percent_variation, 50.0);
        assert_eq!(trend.direction, TrendDirection::Growing);
    }

    #[test]
    fn test_declining() {
        let trend = TrendClassifier::default()
            .classify("Physics", &series(&[("2023-1", 10), ("2023-2", 8)]))
            .unwrap();
        // round(8 * 0.8) = 6
        assert_eq!(trend.estimated_next_demand, 6);
        assert_eq!(trend.percent_variation, -25.0);
        assert_eq!(trend.direction, TrendDirection::Declining);
    }

    #[test]
    fn test_small_change_is_stable() {
        let trend = TrendClassifier::default()
            .classify("Law", &series(&[("a", 100), ("b", 102)]))
            .unwrap();
        assert_eq!(trend.estimated_next_demand, 104);
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_single_point_is_stable() {
        let trend = TrendClassifier::default()
            .classify("Art", &series(&[("Jan", 7)]))
            .unwrap();
        assert_eq!(trend.current_demand, 7);
        assert_eq!(trend.estimated_next_demand, 7);
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.percent_variation, 0.0);
    }

    #[test]
    fn test_zero_current_demand_guard() {
        let trend = TrendClassifier::default()
            .classify("Music", &series(&[("Jan", 5), ("Feb", 0)]))
            .unwrap();
        assert_eq!(trend.current_demand, 0);
        assert_eq!(trend.percent_variation, 0.0);
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_zero_previous_keeps_current() {
        let trend = TrendClassifier::default()
            .classify("Chemistry", &series(&[("Jan", 0), ("Feb", 12)]))
            .unwrap();
        assert_eq!(trend.estimated_next_demand, 12);
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_empty_series_is_an_error() {
        let err = TrendClassifier::default().classify("Void", &[]).unwrap_err();
        assert!(matches!(err, AnalysisError::EmptySeries { .. }));
    }

    #[test]
    fn test_custom_threshold() {
        let strict = TrendClassifier::new(60.0);
        let trend = strict
            .classify("Calculus I", &series(&[("Jan", 4), ("Feb", 6)]))
            .unwrap();
        assert_eq!(trend.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_find_peak_ties_go_to_earliest() {
        let peak = find_peak(&series(&[("Jan", 3), ("Feb", 9), ("Mar", 9), ("Apr", 1)])).unwrap();
        assert_eq!(peak.period_label, "Feb");
        assert_eq!(peak.count, 9);
        assert!(find_peak(&[]).is_none());
    }

    #[test]
    fn test_classify_all_skips_empty_series() {
        let all = TrendClassifier::default().classify_all(&[
            EntitySeries {
                entity: "A".into(),
                points: series(&[("Jan", 1), ("Feb", 2)]),
            },
            EntitySeries {
                entity: "B".into(),
                points: Vec::new(),
            },
            EntitySeries {
                entity: "C".into(),
                points: series(&[("Jan", 2)]),
            },
        ]);
        let names: Vec<_> = all.iter().map(|t| t.entity_name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(all[0].peak.as_ref().unwrap().period_label, "Feb");
    }
}
