//! Timer Service (§4.5): two tiers, a short in-process sleep for
//! near-term timers and a persisted sweep for everything else, both
//! delivering into the Execution Queue on fire.

mod request;
mod service;

pub use request::TimerRequest;
pub use service::{TimerService, TimerServiceConfig};
