//! Fundamental data types for Solstat.
//!
//! Everything here is transient: built during one refresh, handed to the
//! presentation layer, and rebuilt on the next refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::warn;

use crate::error::SourceError;

/// A raw response from the primary "global statistics" endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStatisticsResponse {
    /// HTTP status code as reported by the transport.
    pub http_status: u16,
    /// Decoded JSON body; `Value::Null` when the body was not JSON.
    #[serde(default)]
    pub body: serde_json::Value,
}

impl RawStatisticsResponse {
    pub fn new(http_status: u16, body: serde_json::Value) -> Self {
        Self { http_status, body }
    }
}

/// Typed view of the primary endpoint body.
///
/// Field names follow the backend's wire format. Every field is optional at
/// the type level; [`StatisticsBody::from_value`] enforces the one key that
/// is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsBody {
    #[serde(rename = "totalSolicitudes", default)]
    pub total_requests: Option<u64>,
    #[serde(rename = "totalAprobadas", default)]
    pub total_approved: Option<u64>,
    #[serde(rename = "totalRechazadas", default)]
    pub total_rejected: Option<u64>,
    #[serde(rename = "totalEnviadas", default)]
    pub total_submitted: Option<u64>,
    #[serde(rename = "totalEnProceso", default)]
    pub total_in_progress: Option<u64>,
    #[serde(rename = "porcentajeAprobacion", default)]
    pub approval_percentage: Option<f64>,
    #[serde(rename = "porTipoProceso", default)]
    pub by_process_type: Option<BTreeMap<String, u64>>,
    #[serde(rename = "porPrograma", default)]
    pub by_program: Option<BTreeMap<String, u64>>,
    #[serde(rename = "porEstado", default)]
    pub by_status: Option<BTreeMap<String, u64>>,
    #[serde(rename = "usarEndpointsAlternativos", default)]
    pub use_alternative_endpoints: Option<bool>,
    #[serde(default)]
    pub error: Option<bool>,
}

impl StatisticsBody {
    /// Decode a body, rejecting anything that is not an object carrying a
    /// non-negative integer `totalSolicitudes`.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, SourceError> {
        if !value.is_object() {
            return Err(SourceError::Malformed {
                message: "body is not a JSON object".to_string(),
            });
        }
        let body: StatisticsBody =
            serde_json::from_value(value.clone()).map_err(|e| SourceError::Malformed {
                message: e.to_string(),
            })?;
        if body.total_requests.is_none() {
            return Err(SourceError::Malformed {
                message: "missing required key 'totalSolicitudes'".to_string(),
            });
        }
        Ok(body)
    }

    /// Whether the body carries any non-zero signal at all.
    pub fn has_signal(&self) -> bool {
        let non_empty =
            |map: &Option<BTreeMap<String, u64>>| map.as_ref().is_some_and(|m| !m.is_empty());
        self.total_requests.unwrap_or(0) > 0
            || non_empty(&self.by_process_type)
            || non_empty(&self.by_program)
            || non_empty(&self.by_status)
    }

    /// Whether the server explicitly told us to stop trusting this payload.
    pub fn flags_error(&self) -> bool {
        self.use_alternative_endpoints.unwrap_or(false) || self.error.unwrap_or(false)
    }
}

/// Usability verdict for a primary endpoint response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationVerdict {
    Trustworthy,
    DegradedUsable,
    Unusable,
}

impl ClassificationVerdict {
    pub fn is_usable(self) -> bool {
        !matches!(self, ClassificationVerdict::Unusable)
    }
}

impl fmt::Display for ClassificationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassificationVerdict::Trustworthy => write!(f, "trustworthy"),
            ClassificationVerdict::DegradedUsable => write!(f, "degraded-usable"),
            ClassificationVerdict::Unusable => write!(f, "unusable"),
        }
    }
}

/// Identifier of an independent per-metric fallback endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubSourceId {
    TotalStudents,
    StudentsByProgram,
    ProcessDetail,
    StatusDistribution,
}

impl SubSourceId {
    pub const ALL: [SubSourceId; 4] = [
        SubSourceId::TotalStudents,
        SubSourceId::StudentsByProgram,
        SubSourceId::ProcessDetail,
        SubSourceId::StatusDistribution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubSourceId::TotalStudents => "total-students",
            SubSourceId::StudentsByProgram => "students-by-program",
            SubSourceId::ProcessDetail => "process-detail",
            SubSourceId::StatusDistribution => "status-distribution",
        }
    }
}

impl fmt::Display for SubSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a breakdown was reported by the backend or derived by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountProvenance {
    #[default]
    Exact,
    Estimated,
}

impl CountProvenance {
    /// Estimated is sticky: merging anything estimated yields estimated.
    pub fn combine(self, other: CountProvenance) -> CountProvenance {
        if self == CountProvenance::Estimated || other == CountProvenance::Estimated {
            CountProvenance::Estimated
        } else {
            CountProvenance::Exact
        }
    }
}

/// Counts for one canonical category (process type or program).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalCategoryCount {
    pub canonical_key: String,
    /// Human-readable name for the key.
    pub display_name: String,
    /// Every upstream label that contributed to this entry.
    pub raw_labels_seen: BTreeSet<String>,
    pub total: u64,
    pub approved: u64,
    pub rejected: u64,
    pub in_progress: u64,
    pub provenance: CountProvenance,
}

/// Add `count` into `acc`, clamping at `u64::MAX`. Returns whether it clamped.
pub fn add_saturating(acc: &mut u64, count: u64) -> bool {
    match acc.checked_add(count) {
        Some(sum) => {
            *acc = sum;
            false
        }
        None => {
            *acc = u64::MAX;
            true
        }
    }
}

impl CanonicalCategoryCount {
    /// An all-zero entry for the given key.
    pub fn zero(canonical_key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            canonical_key: canonical_key.into(),
            display_name: display_name.into(),
            raw_labels_seen: BTreeSet::new(),
            total: 0,
            approved: 0,
            rejected: 0,
            in_progress: 0,
            provenance: CountProvenance::Exact,
        }
    }

    /// `approved + rejected + in_progress == total`.
    pub fn is_consistent(&self) -> bool {
        self.approved
            .checked_add(self.rejected)
            .and_then(|s| s.checked_add(self.in_progress))
            == Some(self.total)
    }

    /// Fold another entry with the same key into this one.
    ///
    /// Counts clamp at `u64::MAX`. A clamped entry is re-split so its parts
    /// still sum to the total, and is marked estimated.
    pub fn absorb(&mut self, other: &CanonicalCategoryCount) {
        self.raw_labels_seen
            .extend(other.raw_labels_seen.iter().cloned());
        self.provenance = self.provenance.combine(other.provenance);
        let clamped = add_saturating(&mut self.total, other.total)
            | add_saturating(&mut self.approved, other.approved)
            | add_saturating(&mut self.rejected, other.rejected)
            | add_saturating(&mut self.in_progress, other.in_progress);
        if clamped {
            warn!(key = %self.canonical_key, "category count overflowed, clamping");
            self.approved = self.approved.min(self.total);
            self.rejected = self.rejected.min(self.total - self.approved);
            self.in_progress = self.total - self.approved - self.rejected;
            self.provenance = CountProvenance::Estimated;
        }
    }

    /// Share of `total` that was approved, if there is anything to divide.
    pub fn approval_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.approved as f64 / self.total as f64)
        }
    }
}

/// How a consolidated result was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    /// Primary endpoint answered 200.
    Primary,
    /// Primary endpoint answered 500 but carried usable data.
    Degraded,
    /// Primary endpoint was unusable; per-metric endpoints were merged.
    Fallback,
}

impl fmt::Display for ResolutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionPath::Primary => write!(f, "primary"),
            ResolutionPath::Degraded => write!(f, "degraded"),
            ResolutionPath::Fallback => write!(f, "fallback"),
        }
    }
}

/// The consolidated view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedStatistics {
    pub global_totals: CanonicalCategoryCount,
    pub by_process: Vec<CanonicalCategoryCount>,
    pub by_program: Vec<CanonicalCategoryCount>,
    /// Sub-sources that failed during fallback resolution.
    pub partial_failures: BTreeSet<SubSourceId>,
    /// Number of sub-sources the fallback attempted (0 on the primary path).
    pub sources_attempted: usize,
    pub resolution: ResolutionPath,
    pub as_of: DateTime<Utc>,
}

/// Canonical key used for the global totals entry.
pub const GLOBAL_KEY: &str = "global";

impl ConsolidatedStatistics {
    /// An all-zero result.
    pub fn empty(resolution: ResolutionPath) -> Self {
        Self {
            global_totals: CanonicalCategoryCount::zero(GLOBAL_KEY, "All requests"),
            by_process: Vec::new(),
            by_program: Vec::new(),
            partial_failures: BTreeSet::new(),
            sources_attempted: 0,
            resolution,
            as_of: Utc::now(),
        }
    }

    /// Some, but not all, fallback sources failed.
    pub fn is_partial(&self) -> bool {
        !self.partial_failures.is_empty() && self.partial_failures.len() < self.sources_attempted
    }

    /// Every fallback source failed; zeros here mean "unavailable", not "none".
    pub fn is_total_failure(&self) -> bool {
        self.sources_attempted > 0 && self.partial_failures.len() >= self.sources_attempted
    }

    pub fn approval_rate(&self) -> Option<f64> {
        self.global_totals.approval_rate()
    }

    /// Every entry satisfies the breakdown invariant.
    pub fn is_consistent(&self) -> bool {
        self.global_totals.is_consistent()
            && self.by_process.iter().all(|c| c.is_consistent())
            && self.by_program.iter().all(|c| c.is_consistent())
    }
}

/// One period of a demand series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    pub period_label: String,
    pub count: u64,
}

impl TimeSeriesPoint {
    pub fn new(period_label: impl Into<String>, count: u64) -> Self {
        Self {
            period_label: period_label.into(),
            count,
        }
    }
}

/// The ordered history of one entity (subject or program).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySeries {
    pub entity: String,
    pub points: Vec<TimeSeriesPoint>,
}

impl EntitySeries {
    pub fn new(entity: impl Into<String>, points: Vec<TimeSeriesPoint>) -> Self {
        Self {
            entity: entity.into(),
            points,
        }
    }

    /// Convert an entity-keyed map into series ordered by entity name.
    pub fn from_map(map: BTreeMap<String, Vec<TimeSeriesPoint>>) -> Vec<EntitySeries> {
        map.into_iter()
            .map(|(entity, points)| EntitySeries { entity, points })
            .collect()
    }
}

/// Trend direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Growing,
    Declining,
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Growing => write!(f, "Growing"),
            TrendDirection::Declining => write!(f, "Declining"),
            TrendDirection::Stable => write!(f, "Stable"),
        }
    }
}

/// Highest-demand period of a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakPeriod {
    pub period_label: String,
    pub count: u64,
}

/// Trend classification and next-period projection for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendClassification {
    pub entity_name: String,
    pub current_demand: u64,
    pub estimated_next_demand: u64,
    pub direction: TrendDirection,
    pub percent_variation: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peak: Option<PeakPeriod>,
}

/// Recommendation priority. Declaration order is the display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "CRITICAL"),
            Priority::High => write!(f, "HIGH"),
            Priority::Medium => write!(f, "MEDIUM"),
            Priority::Low => write!(f, "LOW"),
        }
    }
}

/// An actionable recommendation for the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_from_value_requires_total() {
        let err = StatisticsBody::from_value(&json!({ "porTipoProceso": {} })).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));
    }

    #[test]
    fn test_body_from_value_rejects_non_object() {
        assert!(StatisticsBody::from_value(&json!([1, 2, 3])).is_err());
        assert!(StatisticsBody::from_value(&serde_json::Value::Null).is_err());
    }

    #[test]
    fn test_body_from_value_rejects_wrong_types() {
        assert!(StatisticsBody::from_value(&json!({ "totalSolicitudes": "ten" })).is_err());
        assert!(StatisticsBody::from_value(&json!({ "totalSolicitudes": -3 })).is_err());
        assert!(
            StatisticsBody::from_value(&json!({
                "totalSolicitudes": 3,
                "porPrograma": ["Sistemas"]
            }))
            .is_err()
        );
    }

    #[test]
    fn test_body_null_flags_are_absent() {
        let body = StatisticsBody::from_value(&json!({
            "totalSolicitudes": 0,
            "error": null,
            "porEstado": null
        }))
        .unwrap();
        assert!(!body.flags_error());
        assert!(!body.has_signal());
    }

    #[test]
    fn test_raw_response_wire_format() {
        let raw: RawStatisticsResponse = serde_json::from_value(json!({
            "httpStatus": 500,
            "body": { "totalSolicitudes": 12 }
        }))
        .unwrap();
        assert_eq!(raw.http_status, 500);
        assert_eq!(raw.body["totalSolicitudes"], 12);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
        assert_eq!(Priority::High.to_string(), "HIGH");
    }

    #[test]
    fn test_absorb_keeps_invariant_and_labels() {
        let mut a = CanonicalCategoryCount::zero("re_entry", "Re-entry");
        a.raw_labels_seen.insert("Reingreso".into());
        a.total = 10;
        a.approved = 7;
        a.rejected = 1;
        a.in_progress = 2;

        let mut b = CanonicalCategoryCount::zero("re_entry", "Re-entry");
        b.raw_labels_seen.insert("REINGRESO".into());
        b.total = 5;
        b.in_progress = 5;
        b.provenance = CountProvenance::Estimated;

        a.absorb(&b);
        assert_eq!(a.total, 15);
        assert!(a.is_consistent());
        assert_eq!(a.raw_labels_seen.len(), 2);
        assert_eq!(a.provenance, CountProvenance::Estimated);
    }

    #[test]
    fn test_absorb_clamps_on_overflow() {
        let mut a = CanonicalCategoryCount::zero("re_entry", "Re-entry");
        a.total = u64::MAX;
        a.approved = u64::MAX;
        let mut b = CanonicalCategoryCount::zero("re_entry", "Re-entry");
        b.total = 1;
        b.rejected = 1;

        a.absorb(&b);
        assert_eq!(a.total, u64::MAX);
        assert!(a.is_consistent());
        assert_eq!(a.provenance, CountProvenance::Estimated);
    }

    #[test]
    fn test_total_failure_and_partial() {
        let mut stats = ConsolidatedStatistics::empty(ResolutionPath::Fallback);
        stats.sources_attempted = 4;
        stats.partial_failures.insert(SubSourceId::TotalStudents);
        assert!(stats.is_partial());
        assert!(!stats.is_total_failure());

        stats.partial_failures.extend(SubSourceId::ALL);
        assert!(!stats.is_partial());
        assert!(stats.is_total_failure());
    }

    #[test]
    fn test_primary_result_is_never_a_failure() {
        let stats = ConsolidatedStatistics::empty(ResolutionPath::Primary);
        assert!(!stats.is_partial());
        assert!(!stats.is_total_failure());
        assert_eq!(stats.approval_rate(), None);
    }
}
