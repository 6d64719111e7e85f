// Beam sounding domain models
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Radar operating mode for a single sounding. Every field is optional:
/// absence means "unknown", never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperatingParams {
    pub nave: Option<i64>,
    pub nrang: Option<i64>,
    pub frang: Option<i64>,
    pub rsep: Option<i64>,
    pub tfreq: Option<i64>,
    pub noise_sky: Option<f64>,
    pub noise_search: Option<f64>,
    pub noise_mean: Option<f64>,
    pub scan: Option<i64>,
    pub intt_sc: Option<i64>,
    pub intt_us: Option<i64>,
    pub stat_agc: Option<i64>,
    pub stat_lopwr: Option<i64>,
    pub mplgs: Option<i64>,
    pub mppul: Option<i64>,
    pub ptab: Option<Vec<i64>>,
    pub ltab: Option<Vec<Vec<i64>>>,
}

impl OperatingParams {
    /// True when this sounding opens a new scan
    pub fn is_scan_boundary(&self) -> bool {
        self.scan.is_some_and(|flag| flag != 0)
    }

    /// Integration time in seconds, if both halves are known
    pub fn integration_secs(&self) -> Option<f64> {
        match (self.intt_sc, self.intt_us) {
            (Some(sc), Some(us)) => Some(sc as f64 + us as f64 / 1e6),
            (Some(sc), None) => Some(sc as f64),
            _ => None,
        }
    }
}

/// Per-gate science output. `slist` holds the populated range gates and every
/// other present sequence is parallel to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FitResult {
    pub slist: Vec<u32>,
    pub velocity: Option<Vec<f64>>,
    pub power: Option<Vec<f64>>,
    pub width: Option<Vec<f64>>,
    pub ground_scatter: Option<Vec<i64>>,
    pub quality: Option<Vec<i64>>,
    pub elevation: Option<Vec<f64>>,
    pub phi0: Option<Vec<f64>>,
}

impl FitResult {
    /// Number of range gates with scatter
    pub fn gate_count(&self) -> usize {
        self.slist.len()
    }

    /// Lengths of all present sequences, `slist` first.
    fn present_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.slist.len())
            .chain(self.velocity.as_ref().map(Vec::len))
            .chain(self.power.as_ref().map(Vec::len))
            .chain(self.width.as_ref().map(Vec::len))
            .chain(self.ground_scatter.as_ref().map(Vec::len))
            .chain(self.quality.as_ref().map(Vec::len))
            .chain(self.elevation.as_ref().map(Vec::len))
            .chain(self.phi0.as_ref().map(Vec::len))
    }

    pub fn is_consistent(&self) -> bool {
        let n = self.slist.len();
        self.present_lengths().all(|len| len == n)
    }

    /// Truncate every present sequence to the shortest one.
    /// Returns the number of gates that were dropped from `slist`.
    pub fn truncate_to_shortest(&mut self) -> usize {
        let n = self.present_lengths().min().unwrap_or(0);
        let dropped = self.slist.len() - n;

        self.slist.truncate(n);
        for seq in [
            &mut self.velocity,
            &mut self.power,
            &mut self.width,
            &mut self.elevation,
            &mut self.phi0,
        ]
        .into_iter()
        .flatten()
        {
            seq.truncate(n);
        }
        for seq in [&mut self.ground_scatter, &mut self.quality]
            .into_iter()
            .flatten()
        {
            seq.truncate(n);
        }

        dropped
    }

    /// Value of a parameter at a given range gate, if that gate has scatter
    pub fn value_at(&self, param: FitParam, gate: u32) -> Option<f64> {
        let idx = self.slist.binary_search(&gate).ok()?;
        let seq = match param {
            FitParam::Velocity => self.velocity.as_ref(),
            FitParam::Power => self.power.as_ref(),
            FitParam::Width => self.width.as_ref(),
        }?;
        seq.get(idx).copied()
    }

    pub fn is_ground_scatter(&self, gate: u32) -> bool {
        let Ok(idx) = self.slist.binary_search(&gate) else {
            return false;
        };
        self.ground_scatter
            .as_ref()
            .and_then(|flags| flags.get(idx))
            .is_some_and(|flag| *flag != 0)
    }
}

/// Fit parameters drawn by the fan and time-series products
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FitParam {
    Velocity,
    Power,
    Width,
}

impl FitParam {
    pub const ALL: [FitParam; 3] = [FitParam::Velocity, FitParam::Power, FitParam::Width];

    pub fn name(&self) -> &'static str {
        match self {
            FitParam::Velocity => "velocity",
            FitParam::Power => "power",
            FitParam::Width => "width",
        }
    }
}

/// One beam sounding. Never mutated after it leaves the decoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeamRecord {
    pub station_id: Option<i64>,
    pub beam: u32,
    pub control_program: Option<i64>,
    pub channel: Option<i64>,
    pub time: DateTime<Utc>,
    pub params: OperatingParams,
    pub fit: FitResult,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn record(beam: u32, second: u32) -> BeamRecord {
        BeamRecord {
            station_id: Some(65),
            beam,
            control_program: Some(153),
            channel: Some(0),
            time: Utc.with_ymd_and_hms(2014, 3, 1, 0, 0, second).unwrap(),
            params: OperatingParams {
                nrang: Some(75),
                tfreq: Some(10_500),
                ..OperatingParams::default()
            },
            fit: FitResult {
                slist: vec![3, 7],
                velocity: Some(vec![120.0, -45.5]),
                power: Some(vec![12.0, 8.5]),
                width: Some(vec![80.0, 150.0]),
                ground_scatter: Some(vec![0, 1]),
                ..FitResult::default()
            },
        }
    }
}
