//! Plain-text rendering of dashboard snapshots.

use solstat_core::engine::DashboardSnapshot;
use solstat_core::types::{CanonicalCategoryCount, CountProvenance};
use std::fmt::Write;

/// Render a snapshot as a terminal report.
pub fn render_snapshot(snapshot: &DashboardSnapshot) -> String {
    let mut out = String::new();
    let stats = &snapshot.statistics;

    let _ = writeln!(
        out,
        "Solstat refresh #{} ({} dashboard)",
        snapshot.sequence, snapshot.role
    );
    let _ = writeln!(
        out,
        "Verdict: {}   Resolution: {}   As of: {}",
        snapshot.verdict,
        stats.resolution,
        stats.as_of.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if stats.is_total_failure() {
        let _ = writeln!(out, "\nNo statistics available: every source failed.");
    } else {
        let _ = writeln!(out);
        out.push_str(&count_line(&stats.global_totals));
    }
    if !stats.partial_failures.is_empty() {
        let failed: Vec<&str> = stats.partial_failures.iter().map(|id| id.as_str()).collect();
        let _ = writeln!(
            out,
            "Failed sources ({} of {}): {}",
            failed.len(),
            stats.sources_attempted,
            failed.join(", ")
        );
    }

    section(&mut out, "By process", &stats.by_process);
    section(&mut out, "By program", &stats.by_program);

    if !snapshot.trends.is_empty() {
        let _ = writeln!(out, "\nTrends:");
        for trend in &snapshot.trends {
            let _ = write!(
                out,
                "  {:<28} now {:>6}  next {:>6}  {:>+7.1}%  {}",
                trend.entity_name,
                trend.current_demand,
                trend.estimated_next_demand,
                trend.percent_variation,
                trend.direction
            );
            if let Some(peak) = &trend.peak {
                let _ = write!(out, "  (peak {} = {})", peak.period_label, peak.count);
            }
            let _ = writeln!(out);
        }
    }

    if !snapshot.recommendations.is_empty() {
        let _ = writeln!(out, "\nRecommendations:");
        for rec in &snapshot.recommendations {
            let _ = writeln!(out, "  [{}] {}", rec.priority, rec.title);
            let _ = writeln!(out, "      {}", rec.description);
            for action in &rec.suggested_actions {
                let _ = writeln!(out, "      - {}", action);
            }
        }
    }
    out
}

fn section(out: &mut String, title: &str, counts: &[CanonicalCategoryCount]) {
    if counts.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n{}:", title);
    for count in counts {
        out.push_str("  ");
        out.push_str(&count_line(count));
    }
}

fn count_line(count: &CanonicalCategoryCount) -> String {
    let marker = match count.provenance {
        CountProvenance::Exact => "",
        CountProvenance::Estimated => "  (estimated)",
    };
    format!(
        "{:<28} {:>6}  approved {:>6}  rejected {:>6}  in progress {:>6}{}\n",
        count.display_name, count.total, count.approved, count.rejected, count.in_progress, marker
    )
}
