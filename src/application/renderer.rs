// Renderer port - Produces visual products from accumulated radar state
use crate::domain::scan::Scan;
use crate::domain::time_series::TimeSeries;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("scan holds no beams")]
    EmptyScan,

    #[error("time series needs at least {needed} points, has {have}")]
    InsufficientPoints { needed: usize, have: usize },

    #[error("record for beam {beam} is missing `{field}`")]
    MissingField { beam: u32, field: &'static str },

    #[error("failed to write product: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize product: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render the geographic and per-parameter fan products for a scan
    async fn render_scan(&self, scan: &Scan) -> Result<(), RenderError>;

    /// Render the time-series product for the tracked beam
    async fn render_time_series(&self, series: &TimeSeries) -> Result<(), RenderError>;

    /// Overwrite every product with a placeholder carrying `message`
    async fn render_placeholder(&self, message: &str) -> Result<(), RenderError>;
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::Mutex;

    /// In-memory renderer that records what it was asked to draw
    #[derive(Default)]
    pub struct RecordingRenderer {
        pub scans: Mutex<Vec<Vec<u32>>>,
        pub series: Mutex<Vec<usize>>,
        pub placeholders: Mutex<Vec<String>>,
        pub fail_scans: bool,
    }

    impl RecordingRenderer {
        pub fn failing() -> Self {
            Self {
                fail_scans: true,
                ..Self::default()
            }
        }

        pub fn scan_count(&self) -> usize {
            self.scans.lock().unwrap().len()
        }

        pub fn series_lengths(&self) -> Vec<usize> {
            self.series.lock().unwrap().clone()
        }

        pub fn placeholder_count(&self) -> usize {
            self.placeholders.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Renderer for RecordingRenderer {
        async fn render_scan(&self, scan: &Scan) -> Result<(), RenderError> {
            let beams = scan.iter().map(|r| r.beam).collect();
            self.scans.lock().unwrap().push(beams);
            if self.fail_scans {
                return Err(RenderError::MissingField { beam: 0, field: "tfreq" });
            }
            Ok(())
        }

        async fn render_time_series(&self, series: &TimeSeries) -> Result<(), RenderError> {
            self.series.lock().unwrap().push(series.point_count());
            Ok(())
        }

        async fn render_placeholder(&self, message: &str) -> Result<(), RenderError> {
            self.placeholders.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }
}
