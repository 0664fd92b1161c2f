//! Signal / Event Router (§4.6): signal delivery to a target
//! execution's queue, and event fan-out to filter-matched
//! subscriptions with retry and dead-lettering.

mod router;
mod subscription;

pub use router::SignalRouter;
pub use subscription::{EventSubscriber, Subscription};
