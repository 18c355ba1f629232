//! In-memory sources for tests and offline analysis.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::engine::{PrimarySource, TimeSeriesSource};
use crate::error::SourceError;
use crate::fallback::{SubSource, SubSourcePayload};
use crate::types::{EntitySeries, RawStatisticsResponse, SubSourceId};

/// A primary source that replays queued responses, then repeats the last one.
pub struct StaticPrimarySource {
    queue: Mutex<Vec<(RawStatisticsResponse, Duration)>>,
}

impl StaticPrimarySource {
    pub fn new(response: RawStatisticsResponse) -> Self {
        Self {
            queue: Mutex::new(vec![(response, Duration::ZERO)]),
        }
    }

    /// Queue a response, and how long to wait before returning it, ahead of
    /// the current ones.
    pub fn queue_response(&self, response: RawStatisticsResponse, delay: Duration) {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(0, (response, delay));
    }
}

#[async_trait]
impl PrimarySource for StaticPrimarySource {
    async fn fetch_global(&self) -> Result<RawStatisticsResponse, SourceError> {
        let (response, delay) = {
            let mut queue = self
                .queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue.first().cloned().ok_or_else(|| SourceError::Transport {
                    message: "no queued response".to_string(),
                })?
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }
}

/// A primary source whose transport always fails.
pub struct UnreachablePrimarySource;

#[async_trait]
impl PrimarySource for UnreachablePrimarySource {
    async fn fetch_global(&self) -> Result<RawStatisticsResponse, SourceError> {
        Err(SourceError::Transport {
            message: "connection refused".to_string(),
        })
    }
}

/// A sub-source that always returns the same payload.
pub struct StaticSubSource {
    id: SubSourceId,
    payload: SubSourcePayload,
    delay: Duration,
}

impl StaticSubSource {
    pub fn new(payload: SubSourcePayload) -> Self {
        Self {
            id: payload.source_id(),
            payload,
            delay: Duration::ZERO,
        }
    }

    /// Report a different id than the payload implies.
    pub fn with_id(id: SubSourceId, payload: SubSourcePayload) -> Self {
        Self {
            id,
            payload,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SubSource for StaticSubSource {
    fn id(&self) -> SubSourceId {
        self.id
    }

    async fn fetch(&self) -> Result<SubSourcePayload, SourceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.payload.clone())
    }
}

/// A sub-source that always fails.
pub struct FailingSubSource {
    id: SubSourceId,
}

impl FailingSubSource {
    pub fn new(id: SubSourceId) -> Self {
        Self { id }
    }
}

#[async_trait]
impl SubSource for FailingSubSource {
    fn id(&self) -> SubSourceId {
        self.id
    }

    async fn fetch(&self) -> Result<SubSourcePayload, SourceError> {
        Err(SourceError::Status { status: 503 })
    }
}

/// A time-series source backed by a fixed list.
#[derive(Default)]
pub struct StaticTimeSeriesSource {
    series: Vec<EntitySeries>,
}

impl StaticTimeSeriesSource {
    pub fn new(series: Vec<EntitySeries>) -> Self {
        Self { series }
    }
}

#[async_trait]
impl TimeSeriesSource for StaticTimeSeriesSource {
    async fn fetch_series(&self) -> Result<Vec<EntitySeries>, SourceError> {
        Ok(self.series.clone())
    }
}
