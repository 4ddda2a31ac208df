pub mod correlator;
pub mod fingerprint;
pub mod lifecycle;
pub mod store;

pub use correlator::AlertCorrelator;
pub use fingerprint::fingerprint;
pub use lifecycle::AlertAction;
pub use store::{AlertAggregate, AlertPage, AlertQuery, AlertStore};
