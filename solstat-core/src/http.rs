//! `reqwest` adapter exposing the statistics backend as engine sources.
//!
//! Endpoints live under `{base_url}/{role prefix}/estadisticas/`. The
//! primary endpoint's status and body are passed through untouched so the
//! classifier can judge them; per-metric endpoints must answer 2xx.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{DashboardRole, EndpointConfig};
use crate::engine::{PrimarySource, TimeSeriesSource};
use crate::error::SourceError;
use crate::fallback::{ProcessDetailEntry, SubSource, SubSourcePayload};
use crate::types::{EntitySeries, RawStatisticsResponse, SubSourceId, TimeSeriesPoint};

/// HTTP client for one backend and dashboard role.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    role: DashboardRole,
}

#[derive(Deserialize)]
struct TotalStudentsBody {
    #[serde(alias = "totalEstudiantes", alias = "totalSolicitudes")]
    total: u64,
}

impl HttpBackend {
    pub fn new(config: &EndpointConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            role: config.role,
        })
    }

    /// Full URL of a statistics endpoint.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/estadisticas/{}",
            self.base_url,
            self.role.path_prefix(),
            path
        )
    }

    /// Endpoint path of a per-metric source.
    pub fn sub_source_path(id: SubSourceId) -> &'static str {
        match id {
            SubSourceId::TotalStudents => "total-estudiantes",
            SubSourceId::StudentsByProgram => "estudiantes-por-programa",
            SubSourceId::ProcessDetail => "procesos",
            SubSourceId::StatusDistribution => "estados",
        }
    }

    /// One sub-source per per-metric endpoint, sharing this client.
    pub fn sub_sources(self: &Arc<Self>) -> Vec<Arc<dyn SubSource>> {
        SubSourceId::ALL
            .iter()
            .map(|id| {
                Arc::new(HttpSubSource {
                    backend: Arc::clone(self),
                    id: *id,
                }) as Arc<dyn SubSource>
            })
            .collect()
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = self.url(path);
        debug!(url = url.as_str(), "GET");
        let response = self.client.get(&url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PrimarySource for HttpBackend {
    async fn fetch_global(&self) -> Result<RawStatisticsResponse, SourceError> {
        let url = self.url("globales");
        debug!(url = url.as_str(), "GET");
        let response = self.client.get(&url).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        // A non-JSON body is left for the classifier to reject.
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        Ok(RawStatisticsResponse::new(status, body))
    }
}

#[async_trait]
impl TimeSeriesSource for HttpBackend {
    async fn fetch_series(&self) -> Result<Vec<EntitySeries>, SourceError> {
        let raw: BTreeMap<String, Vec<TimeSeriesPoint>> = self.get_json("series").await?;
        Ok(EntitySeries::from_map(raw))
    }
}

/// A per-metric endpoint of an [`HttpBackend`].
pub struct HttpSubSource {
    backend: Arc<HttpBackend>,
    id: SubSourceId,
}

#[async_trait]
impl SubSource for HttpSubSource {
    fn id(&self) -> SubSourceId {
        self.id
    }

    async fn fetch(&self) -> Result<SubSourcePayload, SourceError> {
        let path = HttpBackend::sub_source_path(self.id);
        let payload = match self.id {
            SubSourceId::TotalStudents => {
                let body: TotalStudentsBody = self.backend.get_json(path).await?;
                SubSourcePayload::TotalStudents { total: body.total }
            }
            SubSourceId::StudentsByProgram => {
                SubSourcePayload::StudentsByProgram(self.backend.get_json(path).await?)
            }
            SubSourceId::ProcessDetail => SubSourcePayload::ProcessDetail(
                self.backend.get_json::<Vec<ProcessDetailEntry>>(path).await?,
            ),
            SubSourceId::StatusDistribution => {
                SubSourcePayload::StatusDistribution(self.backend.get_json(path).await?)
            }
        };
        Ok(payload)
    }
}
