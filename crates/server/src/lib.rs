//! netpulse HTTP server: dispatch control and observability over the
//! scheduler and alert crates.

pub mod api;
pub mod maintenance;
pub mod router;
pub mod seed;
pub mod startup;
pub mod state;

pub use router::build_router;
pub use startup::{build_app_state, serve, spawn_background};
pub use state::AppState;
