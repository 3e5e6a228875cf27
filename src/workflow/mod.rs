pub mod cascade;
pub mod record_ctx;
pub mod record_flow;

pub use cascade::{CascadeCoordinator, CascadeLevel, CascadeLink, CascadeRun, CascadeState, SettledLevel};
pub use record_ctx::RecordCtx;
pub use record_flow::RecordFlow;
