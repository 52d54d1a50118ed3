//! Presence tracking, topic pub/sub and request/response correlation for a
//! rapace RPC mesh, expressed as one `Router/Connect` service built on top
//! of `rapace-core`'s endpoint and call primitives.

mod caller;
mod distributor;
mod presence;
mod router;

pub use caller::{Delivery, InboxItem, InboxStream, RouterCaller, TopicEvent};
pub use distributor::{DistributorMetrics, DistributorMetricsSnapshot, EventDistributor, Subscriber};
pub use presence::{PresenceEntry, PresenceRegistry, PresenceStatus};
pub use router::{RouterConfig, RouterCore, RouterEvent, RouterMessage};
