// Domain layer - Radar record types with no I/O
pub mod beam;
pub mod scan;
pub mod time_series;
