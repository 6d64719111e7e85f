// Snapshot renderer - Writes each visual product as a JSON document under the output path
use crate::application::renderer::{RenderError, Renderer};
use crate::domain::beam::{BeamRecord, FitParam};
use crate::domain::scan::Scan;
use crate::domain::time_series::{MIN_RENDERABLE_POINTS, TimeSeries};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

const GEO_PRODUCT: &str = "geo";
const TIME_PRODUCT: &str = "time";

#[derive(Serialize)]
struct BeamSummary {
    beam: u32,
    time: DateTime<Utc>,
    tfreq: Option<i64>,
    nrang: Option<i64>,
    frang: Option<i64>,
    rsep: Option<i64>,
    integration_secs: Option<f64>,
    points: usize,
}

#[derive(Serialize)]
struct GeoProduct<'a> {
    station_id: Option<i64>,
    time: DateTime<Utc>,
    beam: u32,
    new_scan: bool,
    tfreq: i64,
    noise_search: Option<f64>,
    beams: &'a [BeamSummary],
}

#[derive(Serialize)]
struct FanProduct {
    param: FitParam,
    time: DateTime<Utc>,
    /// `grid[beam][gate]`, empty cells have no scatter
    grid: Vec<Vec<Option<f64>>>,
    ground_scatter: Vec<Vec<bool>>,
}

#[derive(Serialize)]
struct TimeProduct {
    beam: u32,
    times: Vec<DateTime<Utc>>,
    tfreq: Vec<Option<i64>>,
    noise_sky: Vec<Option<f64>>,
    /// `velocity[record][gate]`, likewise for power and width
    velocity: Vec<Vec<Option<f64>>>,
    power: Vec<Vec<Option<f64>>>,
    width: Vec<Vec<Option<f64>>>,
}

#[derive(Serialize)]
struct Placeholder<'a> {
    status: &'a str,
    time: DateTime<Utc>,
}

pub struct SnapshotRenderer {
    output: PathBuf,
    max_gates: u32,
}

impl SnapshotRenderer {
    pub fn new(output: PathBuf, max_gates: u32) -> Self {
        Self { output, max_gates }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn product_names() -> impl Iterator<Item = String> {
        std::iter::once(GEO_PRODUCT.to_string())
            .chain(FitParam::ALL.into_iter().map(fan_product))
            .chain(std::iter::once(TIME_PRODUCT.to_string()))
    }

    fn gate_row(&self, record: &BeamRecord, param: FitParam) -> Vec<Option<f64>> {
        (0..self.max_gates)
            .map(|gate| record.fit.value_at(param, gate))
            .collect()
    }

    /// Replace `<name>.json` atomically so readers never see a partial file
    async fn write<T: Serialize + ?Sized>(&self, name: &str, product: &T) -> Result<(), RenderError> {
        tokio::fs::create_dir_all(&self.output).await?;
        let body = serde_json::to_vec_pretty(product)?;
        let target = self.output.join(format!("{name}.json"));
        let staging = self.output.join(format!(".{name}.json.tmp"));
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, &target).await?;
        tracing::debug!(path = %target.display(), "Wrote product");
        Ok(())
    }
}

fn log_failure(product: &str, outcome: &Result<(), RenderError>) {
    if let Err(e) = outcome {
        tracing::error!(product, error = %e, "Failed to write product");
    }
}

fn fan_product(param: FitParam) -> String {
    format!("fan_{}", param.name())
}

#[async_trait]
impl Renderer for SnapshotRenderer {
    async fn render_scan(&self, scan: &Scan) -> Result<(), RenderError> {
        let latest = scan.latest().ok_or(RenderError::EmptyScan)?;
        let tfreq = latest.params.tfreq.ok_or(RenderError::MissingField {
            beam: latest.beam,
            field: "tfreq",
        })?;

        let beams: Vec<BeamSummary> = scan
            .iter()
            .map(|record| BeamSummary {
                beam: record.beam,
                time: record.time,
                tfreq: record.params.tfreq,
                nrang: record.params.nrang,
                frang: record.params.frang,
                rsep: record.params.rsep,
                integration_secs: record.params.integration_secs(),
                points: record.fit.gate_count(),
            })
            .collect();
        let geo = GeoProduct {
            station_id: latest.station_id,
            time: latest.time,
            beam: latest.beam,
            new_scan: latest.params.is_scan_boundary(),
            tfreq,
            noise_search: latest.params.noise_search,
            beams: &beams,
        };
        let mut outcome = self.write(GEO_PRODUCT, &geo).await;
        log_failure(GEO_PRODUCT, &outcome);

        for param in FitParam::ALL {
            let mut grid = vec![vec![None; self.max_gates as usize]; scan.capacity()];
            let mut ground_scatter = vec![vec![false; self.max_gates as usize]; scan.capacity()];
            for record in scan.iter() {
                let beam = record.beam as usize;
                grid[beam] = self.gate_row(record, param);
                ground_scatter[beam] = (0..self.max_gates)
                    .map(|gate| record.fit.is_ground_scatter(gate))
                    .collect();
            }
            let fan = FanProduct {
                param,
                time: latest.time,
                grid,
                ground_scatter,
            };
            let name = fan_product(param);
            let written = self.write(&name, &fan).await;
            log_failure(&name, &written);
            if outcome.is_ok() {
                outcome = written;
            }
        }

        outcome
    }

    async fn render_time_series(&self, series: &TimeSeries) -> Result<(), RenderError> {
        if !series.is_renderable() {
            return Err(RenderError::InsufficientPoints {
                needed: MIN_RENDERABLE_POINTS,
                have: series.point_count(),
            });
        }

        let rows = |param: FitParam| -> Vec<Vec<Option<f64>>> {
            series.iter().map(|r| self.gate_row(r, param)).collect()
        };
        let product = TimeProduct {
            beam: series.beam(),
            times: series.iter().map(|r| r.time).collect(),
            tfreq: series.iter().map(|r| r.params.tfreq).collect(),
            noise_sky: series.iter().map(|r| r.params.noise_sky).collect(),
            velocity: rows(FitParam::Velocity),
            power: rows(FitParam::Power),
            width: rows(FitParam::Width),
        };
        self.write(TIME_PRODUCT, &product).await
    }

    async fn render_placeholder(&self, message: &str) -> Result<(), RenderError> {
        let placeholder = Placeholder {
            status: message,
            time: Utc::now(),
        };
        for name in Self::product_names() {
            self.write(&name, &placeholder).await?;
        }
        Ok(())
    }
}
