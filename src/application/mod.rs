// Application layer - Streaming pipeline, consumers and session lifecycle
pub mod consumer;
pub mod dispatcher;
pub mod pipeline;
pub mod renderer;
pub mod session;
