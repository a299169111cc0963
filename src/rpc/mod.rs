//! The frontend-facing RPC layer: envelopes, dispatch, correlation with
//! the node, local handlers, and notification fan-out.

pub mod correlation;
pub mod dispatcher;
mod handlers;
pub mod id;
pub mod message;
pub mod notify;
mod send;

pub use correlation::{Correlation, CorrelationMap, ReplyHandler};
pub use id::{parse_route_id, route_id, IdAllocator, DAEMON_TAG};
pub use message::{FrontendChannel, Reply, Request, RpcError};
pub use notify::{Notifier, Target};
