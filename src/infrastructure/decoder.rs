// Record decoder - Maps a framed JSON payload onto a typed BeamRecord
use crate::domain::beam::{BeamRecord, FitResult, OperatingParams};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::ops::RangeInclusive;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not a JSON object: {0}")]
    Malformed(String),

    #[error("required field `{0}` is missing")]
    MissingField(&'static str),

    #[error("field `{0}` has an invalid value")]
    InvalidField(&'static str),
}

/// Operating-parameter fields that can be filled from the wire
#[derive(Debug, Clone, Copy)]
enum ParamField {
    Nave,
    Nrang,
    Frang,
    Rsep,
    Tfreq,
    NoiseSky,
    NoiseSearch,
    NoiseMean,
    Scan,
    InttSc,
    InttUs,
    StatAgc,
    StatLopwr,
    Mplgs,
    Mppul,
}

/// Where a field lives on the wire: a top-level key, and optionally the
/// nested `{"outer":{"inner":..}}` form of the same dotted key.
struct Alias {
    key: &'static str,
    nested: Option<(&'static str, &'static str)>,
    field: ParamField,
}

const fn plain(key: &'static str, field: ParamField) -> Alias {
    Alias { key, nested: None, field }
}

const fn dotted(key: &'static str, outer: &'static str, inner: &'static str, field: ParamField) -> Alias {
    Alias {
        key,
        nested: Some((outer, inner)),
        field,
    }
}

const PARAM_ALIASES: &[Alias] = &[
    plain("nave", ParamField::Nave),
    plain("nrang", ParamField::Nrang),
    plain("frang", ParamField::Frang),
    plain("rsep", ParamField::Rsep),
    plain("tfreq", ParamField::Tfreq),
    plain("scan", ParamField::Scan),
    plain("mplgs", ParamField::Mplgs),
    plain("mppul", ParamField::Mppul),
    dotted("noise.sky", "noise", "sky", ParamField::NoiseSky),
    dotted("noise.search", "noise", "search", ParamField::NoiseSearch),
    dotted("noise.mean", "noise", "mean", ParamField::NoiseMean),
    dotted("intt.sc", "intt", "sc", ParamField::InttSc),
    dotted("intt.us", "intt", "us", ParamField::InttUs),
    dotted("stat.agc", "stat", "agc", ParamField::StatAgc),
    dotted("stat.lopwr", "stat", "lopwr", ParamField::StatLopwr),
];

const TIME_KEYS: [&str; 6] = ["time.yr", "time.mo", "time.dy", "time.hr", "time.mt", "time.sc"];

#[derive(Debug, Clone)]
pub struct RecordDecoder {
    max_gates: u32,
}

impl RecordDecoder {
    pub fn new(max_gates: u32) -> Self {
        Self { max_gates }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<BeamRecord, DecodeError> {
        let dict = parse_object(payload)?;

        let beam = int_field(&dict, "bmnum")?.ok_or(DecodeError::MissingField("bmnum"))?;
        let beam = u32::try_from(beam).map_err(|_| DecodeError::InvalidField("bmnum"))?;

        let params = decode_params(&dict)?;
        let time = decode_time(&dict)?;
        // Gates past the configured maximum have no place in any product
        let max_gate = params
            .nrang
            .and_then(|n| u32::try_from(n).ok())
            .map_or(self.max_gates, |n| n.min(self.max_gates));
        let fit = decode_fit(&dict, max_gate)?;

        Ok(BeamRecord {
            station_id: int_field(&dict, "stid")?,
            beam,
            control_program: int_field(&dict, "cp")?,
            channel: int_field(&dict, "channel")?,
            time,
            params,
            fit,
        })
    }
}

/// Parse the first JSON value of the payload. Trailing bytes (such as the `]`
/// of a `}]` terminator) are ignored.
fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    let mut values = serde_json::Deserializer::from_slice(payload).into_iter::<Value>();
    match values.next() {
        Some(Ok(Value::Object(dict))) => Ok(dict),
        Some(Ok(other)) => Err(DecodeError::Malformed(format!("expected object, got {other}"))),
        Some(Err(e)) => Err(DecodeError::Malformed(e.to_string())),
        None => Err(DecodeError::Malformed("empty payload".to_string())),
    }
}

fn lookup<'a>(dict: &'a Map<String, Value>, alias: &Alias) -> Option<&'a Value> {
    dict.get(alias.key).or_else(|| {
        let (outer, inner) = alias.nested?;
        dict.get(outer)?.as_object()?.get(inner)
    })
}

fn as_int(value: &Value, key: &'static str) -> Result<Option<i64>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or(DecodeError::InvalidField(key)),
        _ => Err(DecodeError::InvalidField(key)),
    }
}

fn as_float(value: &Value, key: &'static str) -> Result<Option<f64>, DecodeError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or(DecodeError::InvalidField(key)),
        _ => Err(DecodeError::InvalidField(key)),
    }
}

fn int_field(dict: &Map<String, Value>, key: &'static str) -> Result<Option<i64>, DecodeError> {
    dict.get(key).map_or(Ok(None), |v| as_int(v, key))
}

fn decode_params(dict: &Map<String, Value>) -> Result<OperatingParams, DecodeError> {
    let mut params = OperatingParams::default();

    for alias in PARAM_ALIASES {
        let Some(value) = lookup(dict, alias) else {
            continue;
        };
        let key = alias.key;
        match alias.field {
            ParamField::Nave => params.nave = as_int(value, key)?,
            ParamField::Nrang => params.nrang = as_int(value, key)?,
            ParamField::Frang => params.frang = as_int(value, key)?,
            ParamField::Rsep => params.rsep = as_int(value, key)?,
            ParamField::Tfreq => params.tfreq = as_int(value, key)?,
            ParamField::NoiseSky => params.noise_sky = as_float(value, key)?,
            ParamField::NoiseSearch => params.noise_search = as_float(value, key)?,
            ParamField::NoiseMean => params.noise_mean = as_float(value, key)?,
            ParamField::Scan => params.scan = as_int(value, key)?,
            ParamField::InttSc => params.intt_sc = as_int(value, key)?,
            ParamField::InttUs => params.intt_us = as_int(value, key)?,
            ParamField::StatAgc => params.stat_agc = as_int(value, key)?,
            ParamField::StatLopwr => params.stat_lopwr = as_int(value, key)?,
            ParamField::Mplgs => params.mplgs = as_int(value, key)?,
            ParamField::Mppul => params.mppul = as_int(value, key)?,
        }
    }

    params.ptab = int_list(dict, "ptab")?;
    params.ltab = match dict.get("ltab") {
        None | Some(Value::Null) => None,
        Some(Value::Array(rows)) => Some(
            rows.iter()
                .map(|row| int_seq(row, "ltab"))
                .collect::<Result<_, _>>()?,
        ),
        Some(_) => return Err(DecodeError::InvalidField("ltab")),
    };

    Ok(params)
}

fn decode_time(dict: &Map<String, Value>) -> Result<chrono::DateTime<Utc>, DecodeError> {
    let mut parts = [0i64; 6];
    for (slot, key) in parts.iter_mut().zip(TIME_KEYS) {
        *slot = int_field(dict, key)?.ok_or(DecodeError::MissingField(key))?;
    }
    let [yr, mo, dy, hr, mt, sc] = parts;

    let year = i32::try_from(yr).map_err(|_| DecodeError::InvalidField("time.yr"))?;
    let month = bounded(mo, 1..=12, "time.mo")?;
    let date = NaiveDate::from_ymd_opt(year, month, bounded(dy, 1..=31, "time.dy")?)
        .ok_or(DecodeError::InvalidField("time.dy"))?;
    let time = NaiveTime::from_hms_opt(
        bounded(hr, 0..=23, "time.hr")?,
        bounded(mt, 0..=59, "time.mt")?,
        bounded(sc, 0..=59, "time.sc")?,
    )
    .ok_or(DecodeError::InvalidField("time.sc"))?;

    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

fn bounded(value: i64, range: RangeInclusive<u32>, key: &'static str) -> Result<u32, DecodeError> {
    u32::try_from(value)
        .ok()
        .filter(|v| range.contains(v))
        .ok_or(DecodeError::InvalidField(key))
}

fn decode_fit(dict: &Map<String, Value>, max_gate: u32) -> Result<FitResult, DecodeError> {
    let slist = match int_list(dict, "slist")? {
        Some(gates) => gates
            .into_iter()
            .map(|gate| u32::try_from(gate).map_err(|_| DecodeError::InvalidField("slist")))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    let ordered = slist.windows(2).all(|pair| pair[0] < pair[1]);
    if !ordered || slist.iter().any(|gate| *gate >= max_gate) {
        return Err(DecodeError::InvalidField("slist"));
    }

    let mut fit = FitResult {
        slist,
        velocity: float_list(dict, "v")?,
        power: float_list(dict, "p_l")?,
        width: float_list(dict, "w_l")?,
        ground_scatter: int_list(dict, "gflg")?,
        quality: int_list(dict, "qflg")?,
        elevation: float_list(dict, "elv")?,
        phi0: float_list(dict, "phi0")?,
    };

    if !fit.is_consistent() {
        let dropped = fit.truncate_to_shortest();
        tracing::warn!(dropped, kept = fit.gate_count(), "Fit sequences differ in length, truncated");
    }

    Ok(fit)
}

fn int_seq(value: &Value, key: &'static str) -> Result<Vec<i64>, DecodeError> {
    let Value::Array(items) = value else {
        return Err(DecodeError::InvalidField(key));
    };
    items
        .iter()
        .map(|item| as_int(item, key)?.ok_or(DecodeError::InvalidField(key)))
        .collect()
}

fn int_list(dict: &Map<String, Value>, key: &'static str) -> Result<Option<Vec<i64>>, DecodeError> {
    match dict.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => int_seq(value, key).map(Some),
    }
}

fn float_list(dict: &Map<String, Value>, key: &'static str) -> Result<Option<Vec<f64>>, DecodeError> {
    let Some(value) = dict.get(key) else {
        return Ok(None);
    };
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => items
            .iter()
            .map(|item| as_float(item, key).map(|v| v.unwrap_or(f64::NAN)))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        _ => Err(DecodeError::InvalidField(key)),
    }
}
