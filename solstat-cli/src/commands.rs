//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::render;
use serde::Deserialize;
use solstat_core::config::{self, SolstatConfig};
use solstat_core::engine::{DashboardSnapshot, RefreshOutcome};
use solstat_core::fallback::{ProcessDetailEntry, SubSource, SubSourcePayload};
use solstat_core::mock::{FailingSubSource, StaticPrimarySource, StaticSubSource, StaticTimeSeriesSource};
use solstat_core::types::{EntitySeries, RawStatisticsResponse, SubSourceId, TimeSeriesPoint};
use solstat_core::{HttpBackend, StatisticsEngine};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Global options shared by every subcommand.
pub struct Context {
    pub workspace: PathBuf,
    pub config_file: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    fn load(&self) -> anyhow::Result<SolstatConfig> {
        match &self.config_file {
            Some(file) => Ok(config::load_config_file(file, Some(&self.workspace))?),
            None => config::load_config(Some(&self.workspace), None)
                .map_err(|e| anyhow::anyhow!("Configuration error: {}", e)),
        }
    }
}

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Commands::Analyze {
            response,
            status,
            series,
            fallback,
        } => {
            handle_analyze(
                ctx,
                &response,
                status,
                series.as_deref(),
                fallback.as_deref(),
            )
            .await
        }
        Commands::Refresh {
            base_url,
            role,
            program,
        } => {
            let mut config = ctx.load()?;
            if let Some(base_url) = base_url {
                config.endpoint.base_url = base_url;
            }
            if let Some(role) = role {
                config.endpoint.role = role;
            }
            if program.is_some() {
                config.endpoint.program_scope = program;
            }
            handle_refresh(config.validated()?, ctx.json).await
        }
        Commands::Config { action } => handle_config(action, ctx),
    }
}

async fn handle_analyze(
    ctx: &Context,
    response: &Path,
    status: Option<u16>,
    series: Option<&Path>,
    fallback: Option<&Path>,
) -> anyhow::Result<()> {
    let config = ctx.load()?.validated()?;
    let primary = read_primary(response, status)?;

    let mut engine = StatisticsEngine::new(&config, Arc::new(StaticPrimarySource::new(primary)));
    if let Some(path) = series {
        engine = engine.with_series_source(Arc::new(StaticTimeSeriesSource::new(read_series(
            path,
        )?)));
    }
    if let Some(path) = fallback {
        engine = engine.with_fallback_sources(read_fallback(path)?);
    }

    print_outcome(engine.refresh().await, ctx.json)
}

async fn handle_refresh(config: SolstatConfig, json: bool) -> anyhow::Result<()> {
    info!(
        base_url = config.endpoint.base_url.as_str(),
        role = %config.endpoint.role,
        "refreshing against live backend"
    );
    let backend = Arc::new(HttpBackend::new(&config.endpoint)?);
    let engine = StatisticsEngine::new(&config, backend.clone())
        .with_fallback_sources(backend.sub_sources())
        .with_series_source(backend);

    print_outcome(engine.refresh().await, json)
}

fn print_outcome(outcome: RefreshOutcome, json: bool) -> anyhow::Result<()> {
    let snapshot: &DashboardSnapshot = match &outcome {
        RefreshOutcome::Published(snapshot) => snapshot.as_ref(),
        RefreshOutcome::Stale { sequence, latest } => {
            anyhow::bail!("refresh #{} was superseded by #{}", sequence, latest)
        }
    };
    if json {
        println!("{}", snapshot.to_json_pretty()?);
    } else {
        print!("{}", render::render_snapshot(snapshot));
    }
    Ok(())
}

fn handle_config(action: ConfigAction, ctx: &Context) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = config::workspace_config_path(&ctx.workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let path = config::write_default_config(&ctx.workspace)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = ctx.load()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Validate => {
            let problems = ctx.load()?.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
                return Ok(());
            }
            for problem in &problems {
                println!("  - {}", problem);
            }
            anyhow::bail!("{} configuration problem(s) found", problems.len())
        }
    }
}

/// Read a saved primary response.
///
/// Accepts either the wrapped form `{"httpStatus": .., "body": ..}` or a bare
/// body. An explicit `status` always wins; a bare body defaults to 200.
fn read_primary(path: &Path, status: Option<u16>) -> anyhow::Result<RawStatisticsResponse> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    let value: serde_json::Value = serde_json::from_str(&text)?;

    let wrapped = value
        .as_object()
        .is_some_and(|o| o.contains_key("httpStatus") && o.contains_key("body"));
    let mut response = if wrapped {
        serde_json::from_value::<RawStatisticsResponse>(value)?
    } else {
        RawStatisticsResponse::new(200, value)
    };
    if let Some(status) = status {
        response.http_status = status;
    }
    Ok(response)
}

fn read_series(path: &Path) -> anyhow::Result<Vec<EntitySeries>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    let map: BTreeMap<String, Vec<TimeSeriesPoint>> = serde_json::from_str(&text)?;
    Ok(EntitySeries::from_map(map))
}

/// Saved per-metric payloads. A missing key behaves as a failed endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FallbackFile {
    total_students: Option<u64>,
    students_by_program: Option<BTreeMap<String, u64>>,
    process_detail: Option<Vec<ProcessDetailEntry>>,
    status_distribution: Option<BTreeMap<String, u64>>,
}

impl FallbackFile {
    fn into_sources(self) -> Vec<Arc<dyn SubSource>> {
        let payloads = [
            (
                SubSourceId::TotalStudents,
                self.total_students
                    .map(|total| SubSourcePayload::TotalStudents { total }),
            ),
            (
                SubSourceId::StudentsByProgram,
                self.students_by_program
                    .map(SubSourcePayload::StudentsByProgram),
            ),
            (
                SubSourceId::ProcessDetail,
                self.process_detail.map(SubSourcePayload::ProcessDetail),
            ),
            (
                SubSourceId::StatusDistribution,
                self.status_distribution
                    .map(SubSourcePayload::StatusDistribution),
            ),
        ];
        payloads
            .into_iter()
            .map(|(id, payload)| match payload {
                Some(payload) => Arc::new(StaticSubSource::new(payload)) as Arc<dyn SubSource>,
                None => Arc::new(FailingSubSource::new(id)) as Arc<dyn SubSource>,
            })
            .collect()
    }
}

fn read_fallback(path: &Path) -> anyhow::Result<Vec<Arc<dyn SubSource>>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    let file: FallbackFile = serde_json::from_str(&text)?;
    Ok(file.into_sources())
}
