// Session manager - Owns the connection lifecycle, consumers and failure recovery
use crate::application::consumer::{
    Consumer, ConsumerExit, ConsumerSettings, ScanAccumulator, TimeSeriesAccumulator,
};
use crate::application::dispatcher::Dispatcher;
use crate::application::pipeline::Pipeline;
use crate::application::renderer::Renderer;
use crate::infrastructure::decoder::RecordDecoder;
use crate::infrastructure::reassembler::FrameReassembler;
use crate::infrastructure::transport::chunk_stream;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};

pub const LOST_CONNECTION: &str = "Lost Connection";

pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("{consumer} consumer saw no records for {idle:?}")]
    Stale { consumer: &'static str, idle: Duration },

    #[error("{0} consecutive payloads failed to decode")]
    DecodeStorm(usize),

    #[error("a session is already live")]
    AlreadyLive,
}

/// Opens the inbound byte stream
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> std::io::Result<ByteReader>;

    /// Human readable target, for logs
    fn describe(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Backoff before the next attempt, doubling per consecutive failure
    pub fn delay_for(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(16);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub target_beam: u32,
    pub max_beams: usize,
    pub max_gates: u32,
    pub time_series_capacity: usize,
    pub max_frame_bytes: usize,
    pub max_consecutive_decode_failures: usize,
    pub consumer: ConsumerSettings,
    pub reconnect: ReconnectPolicy,
}

/// Marks the single live session; released on drop
struct LiveGuard<'a>(&'a AtomicBool);

impl<'a> LiveGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SessionError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SessionError::AlreadyLive)?;
        Ok(Self(flag))
    }
}

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SessionManager {
    connector: Arc<dyn Connector>,
    renderer: Arc<dyn Renderer>,
    settings: SessionSettings,
    live: AtomicBool,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        renderer: Arc<dyn Renderer>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            connector,
            renderer,
            settings,
            live: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Connect and run sessions until the reconnect policy gives up.
    pub async fn run(&self) -> Result<(), SessionError> {
        let server = self.connector.describe();
        let mut failures: u32 = 0;

        loop {
            let connect_error = match self.connector.connect().await {
                Ok(reader) => {
                    failures = 0;
                    tracing::info!(%server, "Connection open");
                    match self.run_session(reader).await {
                        Ok(()) => tracing::info!(%server, "Connection closed by server"),
                        Err(e) => tracing::warn!(%server, error = %e, "Session torn down"),
                    }
                    None
                }
                Err(e) => {
                    failures += 1;
                    tracing::error!(%server, attempt = failures, error = %e, "Connection failed");
                    Some(e)
                }
            };

            self.show_lost_connection().await;

            let policy = &self.settings.reconnect;
            let exhausted = policy.max_attempts.is_some_and(|max| failures >= max);
            if !policy.enabled || exhausted {
                return match connect_error {
                    Some(e) => Err(SessionError::Transport(e)),
                    None => Ok(()),
                };
            }

            let delay = policy.delay_for(failures);
            tracing::info!(%server, delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    /// Run one session over an open connection until the transport closes,
    /// decoding keeps failing or a consumer goes stale.
    pub async fn run_session(&self, reader: ByteReader) -> Result<(), SessionError> {
        let _live = LiveGuard::acquire(&self.live)?;
        let settings = &self.settings;

        let (scan_tx, scan_rx) = mpsc::unbounded_channel();
        let (series_tx, series_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut scan_task = tokio::spawn(
            Consumer::new(
                ScanAccumulator::new(settings.max_beams),
                scan_rx,
                self.renderer.clone(),
                settings.consumer,
                stop_rx.clone(),
            )
            .run(),
        );
        let mut series_task = tokio::spawn(
            Consumer::new(
                TimeSeriesAccumulator::new(settings.target_beam, settings.time_series_capacity),
                series_rx,
                self.renderer.clone(),
                settings.consumer,
                stop_rx,
            )
            .run(),
        );

        let mut pipeline = Pipeline::new(
            FrameReassembler::new(settings.max_frame_bytes),
            RecordDecoder::new(settings.max_gates),
            Dispatcher::new(scan_tx, series_tx, settings.target_beam),
            settings.max_consecutive_decode_failures,
        );

        let chunks = chunk_stream(reader);
        tokio::pin!(chunks);

        let mut scan_done = false;
        let mut series_done = false;
        let outcome = loop {
            tokio::select! {
                chunk = chunks.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if let Err(e) = pipeline.ingest(&bytes) {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(SessionError::Transport(e)),
                    None => break Ok(()),
                },
                exit = &mut scan_task => {
                    scan_done = true;
                    break consumer_outcome("scan", exit);
                }
                exit = &mut series_task => {
                    series_done = true;
                    break consumer_outcome("time-series", exit);
                }
            }
        };

        // Teardown: stop both workers and release their queues
        let _ = stop_tx.send(true);
        drop(pipeline);
        if !scan_done {
            let _ = scan_task.await;
        }
        if !series_done {
            let _ = series_task.await;
        }
        tracing::info!("Closed consumers");

        outcome
    }

    async fn show_lost_connection(&self) {
        if let Err(e) = self.renderer.render_placeholder(LOST_CONNECTION).await {
            tracing::error!(error = %e, "Failed to replace products with placeholder");
        }
    }
}

fn consumer_outcome(
    consumer: &'static str,
    exit: Result<ConsumerExit, tokio::task::JoinError>,
) -> Result<(), SessionError> {
    match exit {
        Ok(ConsumerExit::Stale { idle }) => Err(SessionError::Stale { consumer, idle }),
        Ok(exit) => {
            tracing::warn!(consumer, ?exit, "Consumer ended before session");
            Ok(())
        }
        Err(e) => {
            tracing::error!(consumer, error = %e, "Consumer task failed");
            Ok(())
        }
    }
}
