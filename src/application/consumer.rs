// Consumers - Independently scheduled workers that accumulate records and render them
use crate::application::renderer::{RenderError, Renderer};
use crate::domain::beam::BeamRecord;
use crate::domain::scan::Scan;
use crate::domain::time_series::TimeSeries;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    WaitingForFirstRecord,
    Accumulating,
    Rendering,
    Stale,
    Terminated,
}

/// Why a consumer loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// No record for longer than the staleness timeout
    Stale { idle: Duration },
    /// Stop requested by the session
    Stopped,
    /// The dispatcher side of the queue was dropped
    QueueClosed,
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub stale_after: Duration,
    pub poll_interval: Duration,
}

/// Accumulating state owned by one consumer
#[async_trait]
pub trait Accumulator: Send {
    fn name(&self) -> &'static str;

    fn absorb(&mut self, record: BeamRecord);

    fn is_renderable(&self) -> bool;

    async fn render(&self, renderer: &dyn Renderer) -> Result<(), RenderError>;
}

pub struct ScanAccumulator {
    scan: Scan,
}

impl ScanAccumulator {
    pub fn new(max_beams: usize) -> Self {
        Self {
            scan: Scan::new(max_beams),
        }
    }
}

#[async_trait]
impl Accumulator for ScanAccumulator {
    fn name(&self) -> &'static str {
        "scan"
    }

    fn absorb(&mut self, record: BeamRecord) {
        if let Err(e) = self.scan.insert(record) {
            tracing::warn!(error = %e, "Dropping record outside scan");
        }
    }

    fn is_renderable(&self) -> bool {
        !self.scan.is_empty()
    }

    async fn render(&self, renderer: &dyn Renderer) -> Result<(), RenderError> {
        renderer.render_scan(&self.scan).await
    }
}

pub struct TimeSeriesAccumulator {
    series: TimeSeries,
}

impl TimeSeriesAccumulator {
    pub fn new(beam: u32, capacity: usize) -> Self {
        Self {
            series: TimeSeries::new(beam, capacity),
        }
    }
}

#[async_trait]
impl Accumulator for TimeSeriesAccumulator {
    fn name(&self) -> &'static str {
        "time-series"
    }

    fn absorb(&mut self, record: BeamRecord) {
        let beam = record.beam;
        if !self.series.push(record) {
            tracing::warn!(beam, tracked = self.series.beam(), "Record for untracked beam ignored");
        }
    }

    fn is_renderable(&self) -> bool {
        self.series.is_renderable()
    }

    async fn render(&self, renderer: &dyn Renderer) -> Result<(), RenderError> {
        renderer.render_time_series(&self.series).await
    }
}

pub struct Consumer<A> {
    accumulator: A,
    queue: mpsc::UnboundedReceiver<BeamRecord>,
    renderer: Arc<dyn Renderer>,
    settings: ConsumerSettings,
    stop: watch::Receiver<bool>,
    state: ConsumerState,
}

impl<A: Accumulator> Consumer<A> {
    pub fn new(
        accumulator: A,
        queue: mpsc::UnboundedReceiver<BeamRecord>,
        renderer: Arc<dyn Renderer>,
        settings: ConsumerSettings,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            accumulator,
            queue,
            renderer,
            settings,
            stop,
            state: ConsumerState::WaitingForFirstRecord,
        }
    }

    /// Drain the queue until stopped, closed or stale. The queue is released
    /// when this returns.
    pub async fn run(mut self) -> ConsumerExit {
        let name = self.accumulator.name();
        let mut last_record = Instant::now();

        loop {
            let next = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop) => None,
                next = tokio::time::timeout(self.settings.poll_interval, self.queue.recv()) => Some(next),
            };
            let Some(next) = next else {
                self.transition(ConsumerState::Terminated);
                return ConsumerExit::Stopped;
            };

            match next {
                Ok(Some(record)) => {
                    self.absorb(record);
                    while let Ok(record) = self.queue.try_recv() {
                        self.absorb(record);
                    }
                    last_record = Instant::now();
                    self.render().await;
                }
                Ok(None) => {
                    self.transition(ConsumerState::Terminated);
                    return ConsumerExit::QueueClosed;
                }
                Err(_) => {
                    let idle = last_record.elapsed();
                    if idle >= self.settings.stale_after {
                        tracing::warn!(consumer = name, idle_secs = idle.as_secs_f64(), "No fresh records, session is stale");
                        self.transition(ConsumerState::Stale);
                        return ConsumerExit::Stale { idle };
                    }
                }
            }
        }
    }

    fn absorb(&mut self, record: BeamRecord) {
        self.accumulator.absorb(record);
        if self.state == ConsumerState::WaitingForFirstRecord {
            self.transition(ConsumerState::Accumulating);
        }
    }

    async fn render(&mut self) {
        if !self.accumulator.is_renderable() {
            return;
        }
        self.transition(ConsumerState::Rendering);
        match self.accumulator.render(self.renderer.as_ref()).await {
            Ok(()) => tracing::info!(consumer = self.accumulator.name(), "Updated plot"),
            Err(e) => tracing::error!(consumer = self.accumulator.name(), error = %e, "Render failed"),
        }
        self.transition(ConsumerState::Accumulating);
    }

    fn transition(&mut self, next: ConsumerState) {
        tracing::debug!(consumer = self.accumulator.name(), from = ?self.state, to = ?next, "Consumer state change");
        self.state = next;
    }
}

/// Resolves once a stop is requested or the session side is gone
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::renderer::recording::RecordingRenderer;
    use crate::domain::beam::fixtures::record;

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            stale_after: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_scan_consumer_renders_after_each_batch() {
        let renderer = Arc::new(RecordingRenderer::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let consumer = Consumer::new(ScanAccumulator::new(16), rx, renderer.clone(), settings(), stop_rx);

        tx.send(record(0, 0)).unwrap();
        tx.send(record(1, 1)).unwrap();
        tx.send(record(0, 2)).unwrap();
        drop(tx);

        assert_eq!(consumer.run().await, ConsumerExit::QueueClosed);
        let scans = renderer.scans.lock().unwrap().clone();
        assert_eq!(scans.last(), Some(&vec![0, 1]));
    }

    #[tokio::test]
    async fn test_render_failure_does_not_stop_consumer() {
        let renderer = Arc::new(RecordingRenderer::failing());
        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let consumer = Consumer::new(ScanAccumulator::new(16), rx, renderer.clone(), settings(), stop_rx);
        let handle = tokio::spawn(consumer.run());

        tx.send(record(3, 0)).unwrap();
        tokio::task::yield_now().await;
        tx.send(record(4, 1)).unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), ConsumerExit::QueueClosed);
        assert!(renderer.scan_count() >= 1);
        assert_eq!(renderer.scans.lock().unwrap().last(), Some(&vec![3, 4]));
    }

    #[tokio::test]
    async fn test_time_series_waits_for_two_points() {
        let renderer = Arc::new(RecordingRenderer::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let consumer = Consumer::new(TimeSeriesAccumulator::new(7, 100), rx, renderer.clone(), settings(), stop_rx);
        let handle = tokio::spawn(consumer.run());

        tx.send(record(7, 0)).unwrap();
        tokio::task::yield_now().await;
        tx.send(record(7, 10)).unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), ConsumerExit::QueueClosed);
        let lengths = renderer.series_lengths();
        assert!(!lengths.contains(&1));
        assert_eq!(lengths.last(), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_without_records() {
        let renderer = Arc::new(RecordingRenderer::default());
        let (_tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let consumer = Consumer::new(ScanAccumulator::new(16), rx, renderer, settings(), stop_rx);
        let started = Instant::now();

        let exit = consumer.run().await;

        assert!(matches!(exit, ConsumerExit::Stale { idle } if idle >= Duration::from_secs(5)));
        assert!(started.elapsed() <= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_after_last_record() {
        let renderer = Arc::new(RecordingRenderer::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let consumer = Consumer::new(ScanAccumulator::new(16), rx, renderer.clone(), settings(), stop_rx);
        let handle = tokio::spawn(consumer.run());

        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(record(1, 0)).unwrap();
        let sent_at = Instant::now();

        let exit = handle.await.unwrap();
        assert!(matches!(exit, ConsumerExit::Stale { .. }));
        assert!(sent_at.elapsed() >= Duration::from_secs(5));
        assert!(sent_at.elapsed() <= Duration::from_secs(10));
        assert_eq!(renderer.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_request_terminates() {
        let renderer = Arc::new(RecordingRenderer::default());
        let (_tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let consumer = Consumer::new(TimeSeriesAccumulator::new(0, 10), rx, renderer, settings(), stop_rx);
        let handle = tokio::spawn(consumer.run());

        stop_tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), ConsumerExit::Stopped);
    }
}
