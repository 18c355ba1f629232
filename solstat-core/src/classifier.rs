//! Usability classification for primary endpoint responses.

use tracing::{debug, warn};

use crate::types::{ClassificationVerdict, RawStatisticsResponse, StatisticsBody};

/// Classify a primary "global statistics" response.
///
/// Pure and total: malformed input degrades to `Unusable`, never a panic.
///
/// The backend has been observed answering HTTP 500 while still carrying
/// real statistics. Such a body is treated as usable unless it explicitly
/// asks for the alternative endpoints or sets `error`. Whether that is a
/// deliberate upstream contract or a workaround for a server bug is still
/// open; the behavior is kept as observed.
pub fn classify(response: &RawStatisticsResponse) -> ClassificationVerdict {
    match response.http_status {
        200 => match StatisticsBody::from_value(&response.body) {
            // Zero counts at 200 are a legitimate empty state.
            Ok(_) => ClassificationVerdict::Trustworthy,
            Err(e) => {
                warn!(status = 200, error = %e, "malformed statistics body");
                ClassificationVerdict::Unusable
            }
        },
        500 => match StatisticsBody::from_value(&response.body) {
            Ok(body) if body.flags_error() => {
                debug!("server requested alternative endpoints");
                ClassificationVerdict::Unusable
            }
            Ok(body) if body.has_signal() => {
                warn!(
                    total = body.total_requests.unwrap_or(0),
                    "HTTP 500 with usable statistics, trusting payload"
                );
                ClassificationVerdict::DegradedUsable
            }
            Ok(_) => ClassificationVerdict::Unusable,
            Err(e) => {
                warn!(status = 500, error = %e, "malformed statistics body");
                ClassificationVerdict::Unusable
            }
        },
        status => {
            debug!(status, "unexpected status from statistics endpoint");
            ClassificationVerdict::Unusable
        }
    }
}
