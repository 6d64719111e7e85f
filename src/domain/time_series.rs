// Time series domain model - rolling history of a single beam
use super::beam::BeamRecord;
use std::collections::VecDeque;

/// Minimum number of soundings needed to draw a time axis
pub const MIN_RENDERABLE_POINTS: usize = 2;

#[derive(Debug, Clone)]
pub struct TimeSeries {
    beam: u32,
    capacity: usize,
    records: VecDeque<BeamRecord>,
}

impl TimeSeries {
    pub fn new(beam: u32, capacity: usize) -> Self {
        Self {
            beam,
            capacity: capacity.max(MIN_RENDERABLE_POINTS),
            records: VecDeque::new(),
        }
    }

    pub fn beam(&self) -> u32 {
        self.beam
    }

    /// Append a record for the tracked beam, discarding the oldest entry once
    /// the capacity is exceeded. Records for other beams are refused.
    pub fn push(&mut self, record: BeamRecord) -> bool {
        if record.beam != self.beam {
            return false;
        }
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
        true
    }

    pub fn point_count(&self) -> usize {
        self.records.len()
    }

    pub fn is_renderable(&self) -> bool {
        self.records.len() >= MIN_RENDERABLE_POINTS
    }

    pub fn iter(&self) -> impl Iterator<Item = &BeamRecord> {
        self.records.iter()
    }
}
