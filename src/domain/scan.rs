// Scan domain model - one sweep across all beams of a station
use super::beam::BeamRecord;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("beam {beam} outside scan capacity of {max_beams} beams")]
pub struct BeamOutOfRange {
    pub beam: u32,
    pub max_beams: usize,
}

/// Beam records keyed by beam number. Each beam owns a fixed slot, so
/// replacing a beam never changes the position of any other.
#[derive(Debug, Clone)]
pub struct Scan {
    slots: Vec<Option<BeamRecord>>,
    latest: Option<u32>,
}

impl Scan {
    pub fn new(max_beams: usize) -> Self {
        Self {
            slots: vec![None; max_beams],
            latest: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub fn beam_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_none()
    }

    /// Insert a record, replacing any record already held for the same beam.
    /// Returns the replaced record.
    pub fn insert(&mut self, record: BeamRecord) -> Result<Option<BeamRecord>, BeamOutOfRange> {
        let beam = record.beam;
        let max_beams = self.slots.len();
        let slot = self
            .slots
            .get_mut(beam as usize)
            .ok_or(BeamOutOfRange { beam, max_beams })?;
        let previous = slot.replace(record);
        self.latest = Some(beam);
        Ok(previous)
    }

    pub fn get(&self, beam: u32) -> Option<&BeamRecord> {
        self.slots.get(beam as usize).and_then(Option::as_ref)
    }

    /// The record inserted most recently
    pub fn latest(&self) -> Option<&BeamRecord> {
        self.latest.and_then(|beam| self.get(beam))
    }

    /// Records in beam order
    pub fn iter(&self) -> impl Iterator<Item = &BeamRecord> {
        self.slots.iter().flatten()
    }
}
