// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod decoder;
pub mod reassembler;
pub mod snapshot_renderer;
pub mod transport;
