// Dispatcher - Routes decoded records to the scan and time-series queues
use crate::domain::beam::BeamRecord;
use tokio::sync::mpsc;

pub struct Dispatcher {
    scan_tx: mpsc::UnboundedSender<BeamRecord>,
    series_tx: mpsc::UnboundedSender<BeamRecord>,
    target_beam: u32,
}

impl Dispatcher {
    pub fn new(
        scan_tx: mpsc::UnboundedSender<BeamRecord>,
        series_tx: mpsc::UnboundedSender<BeamRecord>,
        target_beam: u32,
    ) -> Self {
        Self {
            scan_tx,
            series_tx,
            target_beam,
        }
    }

    /// Every record goes to the scan queue; records for the target beam also
    /// go to the time-series queue as an independent copy.
    pub fn dispatch(&self, record: BeamRecord) {
        if record.beam == self.target_beam && self.series_tx.send(record.clone()).is_err() {
            tracing::debug!(beam = record.beam, "Time-series consumer gone, record dropped");
        }
        if let Err(mpsc::error::SendError(record)) = self.scan_tx.send(record) {
            tracing::debug!(beam = record.beam, "Scan consumer gone, record dropped");
        }
    }
}
