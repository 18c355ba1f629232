//! Category normalization: upstream labels to canonical aggregation keys.
//!
//! The backend reports process types, programs and statuses with free-form,
//! inconsistently spelled labels ("Homologación", "HOMOLOGACION",
//! "homologacion_materias"). Labels are folded and matched against fixed
//! keyword tables; labels that land on the same key are summed.

use std::collections::BTreeMap;

use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::types::{CanonicalCategoryCount, add_saturating};

/// A known process category and the keywords that identify it.
#[derive(Debug, Clone, Copy)]
pub struct ProcessCategory {
    pub key: &'static str,
    pub display_name: &'static str,
    pub keywords: &'static [&'static str],
}

/// The five process categories the dashboards aggregate by.
pub const PROCESS_CATEGORIES: [ProcessCategory; 5] = [
    ProcessCategory {
        key: "clearance",
        display_name: "Clearance",
        keywords: &["paz y salvo", "pazysalvo", "clearance"],
    },
    ProcessCategory {
        key: "course_equivalency",
        display_name: "Course equivalency",
        keywords: &["homolog", "equivalen", "convalid"],
    },
    ProcessCategory {
        key: "exit_exam",
        display_name: "Exit exam",
        keywords: &["preparatorio", "examen", "exit exam", "saber pro"],
    },
    ProcessCategory {
        key: "re_entry",
        display_name: "Re-entry",
        keywords: &["reingreso", "reintegro", "readmision", "re entry", "reentry"],
    },
    ProcessCategory {
        key: "summer_courses",
        display_name: "Summer courses",
        keywords: &["vacacional", "verano", "intersemestral", "summer"],
    },
];

/// Bucket a request status falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBucket {
    Approved,
    Rejected,
    InProgress,
}

// Checked in order: rejected, in progress, approved. "aprob" also appears in
// "desaprobada" and "pendiente de aprobacion".
const REJECTED_KEYWORDS: &[&str] = &[
    "rechaz",
    "no aprob",
    "desaprob",
    "reprob",
    "negad",
    "rejected",
    "not approved",
    "denied",
];
const APPROVED_KEYWORDS: &[&str] = &["aprob", "aceptad", "approved", "accepted"];
const IN_PROGRESS_KEYWORDS: &[&str] = &[
    "proceso",
    "enviad",
    "pendiente",
    "revision",
    "radicad",
    "pending",
    "submitted",
    "in progress",
];

/// Status counts summed per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusTotals {
    pub approved: u64,
    pub rejected: u64,
    pub in_progress: u64,
}

impl StatusTotals {
    /// Sum of all buckets, clamped at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.approved
            .saturating_add(self.rejected)
            .saturating_add(self.in_progress)
    }

    /// Fold another distribution into this one, clamping at `u64::MAX`.
    pub fn accumulate(&mut self, other: &StatusTotals) {
        let clamped = add_saturating(&mut self.approved, other.approved)
            | add_saturating(&mut self.rejected, other.rejected)
            | add_saturating(&mut self.in_progress, other.in_progress);
        if clamped {
            warn!("status count overflowed, clamping");
        }
    }
}

/// Fold a label for matching: strip accents, lowercase, treat `_`/`-` as
/// spaces and collapse whitespace.
pub fn fold_label(label: &str) -> String {
    let stripped: String = label
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c == '_' || c == '-' { ' ' } else { c })
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn contains_any(folded: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| folded.contains(kw))
}

/// Maps raw labels to canonical categories.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryNormalizer;

impl CategoryNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Match a raw process label against the category table.
    pub fn canonical_process(&self, label: &str) -> Option<&'static ProcessCategory> {
        let folded = fold_label(label);
        PROCESS_CATEGORIES
            .iter()
            .find(|cat| contains_any(&folded, cat.keywords))
    }

    /// Normalize process-type counts. Unmatched labels are dropped.
    ///
    /// Output is sorted by canonical key and carries totals only; the
    /// breakdown is left for the estimator.
    pub fn normalize<I, K>(&self, raw: I) -> Vec<CanonicalCategoryCount>
    where
        I: IntoIterator<Item = (K, u64)>,
        K: AsRef<str>,
    {
        let mut merged: BTreeMap<&'static str, CanonicalCategoryCount> = BTreeMap::new();
        for (label, count) in raw {
            let label = label.as_ref();
            let Some(category) = self.canonical_process(label) else {
                warn!(label, count, "unmapped process label, dropping");
                continue;
            };
            let entry = merged.entry(category.key).or_insert_with(|| {
                CanonicalCategoryCount::zero(category.key, category.display_name)
            });
            if add_saturating(&mut entry.total, count) {
                warn!(label, count, "process count overflowed, clamping");
            }
            entry.raw_labels_seen.insert(label.to_string());
        }
        merged.into_values().collect()
    }

    /// Normalize program counts. Programs have no fixed table: the folded
    /// label is the key, so spelling variants of one program merge.
    pub fn normalize_programs<I, K>(&self, raw: I) -> Vec<CanonicalCategoryCount>
    where
        I: IntoIterator<Item = (K, u64)>,
        K: AsRef<str>,
    {
        let mut merged: BTreeMap<String, CanonicalCategoryCount> = BTreeMap::new();
        for (label, count) in raw {
            let label = label.as_ref();
            let key = fold_label(label);
            if key.is_empty() {
                warn!(label, count, "blank program label, dropping");
                continue;
            }
            let entry = merged
                .entry(key.clone())
                .or_insert_with(|| CanonicalCategoryCount::zero(key, String::new()));
            if add_saturating(&mut entry.total, count) {
                warn!(label, count, "program count overflowed, clamping");
            }
            entry.raw_labels_seen.insert(label.trim().to_string());
        }
        merged
            .into_values()
            .map(|mut c| {
                // Smallest raw label, so the name does not depend on input order.
                c.display_name = c.raw_labels_seen.iter().next().cloned().unwrap_or_default();
                c
            })
            .collect()
    }

    /// Classify a request status label.
    pub fn status_bucket(&self, label: &str) -> Option<StatusBucket> {
        let folded = fold_label(label);
        if contains_any(&folded, REJECTED_KEYWORDS) {
            Some(StatusBucket::Rejected)
        } else if contains_any(&folded, IN_PROGRESS_KEYWORDS) {
            Some(StatusBucket::InProgress)
        } else if contains_any(&folded, APPROVED_KEYWORDS) {
            Some(StatusBucket::Approved)
        } else {
            None
        }
    }

    /// Sum a status distribution into buckets. Unknown statuses are ignored.
    pub fn status_totals<I, K>(&self, raw: I) -> StatusTotals
    where
        I: IntoIterator<Item = (K, u64)>,
        K: AsRef<str>,
    {
        let mut totals = StatusTotals::default();
        for (label, count) in raw {
            let label = label.as_ref();
            let bucket = match self.status_bucket(label) {
                Some(StatusBucket::Approved) => &mut totals.approved,
                Some(StatusBucket::Rejected) => &mut totals.rejected,
                Some(StatusBucket::InProgress) => &mut totals.in_progress,
                None => {
                    debug!(label, count, "unknown status label, ignoring");
                    continue;
                }
            };
            if add_saturating(bucket, count) {
                warn!(label, count, "status count overflowed, clamping");
            }
        }
        totals
    }
}

/// Merge canonical sequences from several sources by key, summing counts.
/// Output is sorted by canonical key.
pub fn merge_counts<I>(sources: I) -> Vec<CanonicalCategoryCount>
where
    I: IntoIterator<Item = Vec<CanonicalCategoryCount>>,
{
    let mut merged: BTreeMap<String, CanonicalCategoryCount> = BTreeMap::new();
    for source in sources {
        for count in source {
            match merged.get_mut(&count.canonical_key) {
                Some(existing) => existing.absorb(&count),
                None => {
                    merged.insert(count.canonical_key.clone(), count);
                }
            }
        }
    }
    merged.into_values().collect()
}
