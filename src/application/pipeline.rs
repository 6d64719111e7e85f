// Ingest pipeline - Reassembles, decodes and dispatches inbound bytes synchronously
use crate::application::dispatcher::Dispatcher;
use crate::application::session::SessionError;
use crate::infrastructure::decoder::RecordDecoder;
use crate::infrastructure::reassembler::FrameReassembler;

pub struct Pipeline {
    reassembler: FrameReassembler,
    decoder: RecordDecoder,
    dispatcher: Dispatcher,
    max_consecutive_failures: usize,
    consecutive_failures: usize,
    processed: u64,
}

impl Pipeline {
    pub fn new(
        reassembler: FrameReassembler,
        decoder: RecordDecoder,
        dispatcher: Dispatcher,
        max_consecutive_failures: usize,
    ) -> Self {
        Self {
            reassembler,
            decoder,
            dispatcher,
            max_consecutive_failures,
            consecutive_failures: 0,
            processed: 0,
        }
    }

    /// Push one transport chunk through the pipeline. Returns how many records
    /// were dispatched. Fails only when undecodable payloads keep arriving.
    pub fn ingest(&mut self, chunk: &[u8]) -> Result<usize, SessionError> {
        let mut dispatched = 0;

        for payload in self.reassembler.feed(chunk) {
            match self.decoder.decode(&payload) {
                Ok(record) => {
                    self.processed += 1;
                    tracing::info!(
                        beam = record.beam,
                        time = %record.time,
                        packet = self.processed,
                        "Processing beam"
                    );
                    self.dispatcher.dispatch(record);
                    self.consecutive_failures = 0;
                    dispatched += 1;
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    tracing::warn!(
                        error = %e,
                        consecutive = self.consecutive_failures,
                        "Dropping undecodable payload"
                    );
                    if self.consecutive_failures > self.max_consecutive_failures {
                        return Err(SessionError::DecodeStorm(self.consecutive_failures));
                    }
                }
            }
        }

        Ok(dispatched)
    }
}
