pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod holiday;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
pub mod wire;
