//! Request/reply correlation for messages deferred or injected to the node.
//!
//! Every correlation number allocated by [`IdAllocator`](super::id::IdAllocator)
//! is installed in at most one record here. A record is either a route back
//! to the frontend that originated the request, or a one-shot handler the
//! daemon runs against the node's reply before (or instead of) forwarding it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use super::message::{FrontendChannel, RpcError};

/// Future returned by a reply handler; resolves to `true` when the record
/// is consumed.
pub type HandlerFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// One-shot callback run against a node reply. Returning `false` keeps the
/// record installed for a further reply under the same number.
pub type ReplyHandler = Box<dyn FnMut(Result<Value, RpcError>) -> HandlerFuture + Send>;

/// A single correlation record.
pub enum Correlation {
    /// Forward the reply verbatim to `frontend`, with the identifier
    /// restored to the frontend's original value.
    RouteTo {
        frontend: FrontendChannel,
        original_id: Value,
    },

    /// Run local post-processing against the reply.
    Handler(ReplyHandler),
}

impl std::fmt::Debug for Correlation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Correlation::RouteTo {
                original_id, ..
            } => f.debug_struct("RouteTo").field("original_id", original_id).finish(),
            Correlation::Handler(_) => f.write_str("Handler"),
        }
    }
}

/// Table mapping correlation number to its record.
#[derive(Debug, Default)]
pub struct CorrelationMap {
    entries: HashMap<u64, Correlation>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Record a route back to `frontend` under `n`.
    ///
    /// A correlation number is allocated once and installed at most once,
    /// so an occupied slot indicates a daemon bug; the stale record is
    /// replaced and logged rather than left to misroute a reply.
    pub fn insert_route(&mut self, n: u64, frontend: FrontendChannel, original_id: Value) {
        if self
            .entries
            .insert(
                n,
                Correlation::RouteTo {
                    frontend,
                    original_id,
                },
            )
            .is_some()
        {
            tracing::error!(n, "correlation number installed twice");
        }
    }

    /// Record a reply handler under `n`.
    pub fn insert_handler(&mut self, n: u64, handler: ReplyHandler) {
        if self.entries.insert(n, Correlation::Handler(handler)).is_some() {
            tracing::error!(n, "correlation number installed twice");
        }
    }

    /// Remove and return the record for `n`. The caller re-installs it via
    /// [`reinstall`](Self::reinstall) if the handler is not yet done.
    pub fn take(&mut self, n: u64) -> Option<Correlation> {
        self.entries.remove(&n)
    }

    /// Put a not-yet-done record back.
    pub fn reinstall(&mut self, n: u64, record: Correlation) {
        self.entries.insert(n, record);
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_pending(&self, n: u64) -> bool {
        self.entries.contains_key(&n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_handler(done: bool) -> ReplyHandler {
        Box::new(move |_outcome| Box::pin(async move { done }))
    }

    #[test]
    fn route_records_are_consumed_on_take() {
        let mut map = CorrelationMap::new();
        let (frontend, _rx) = FrontendChannel::new();
        map.insert_route(3, frontend, json!(7));

        assert!(map.is_pending(3));
        let record = map.take(3).expect("record installed");
        assert!(matches!(record, Correlation::RouteTo { .. }));
        assert!(map.take(3).is_none());
    }

    #[tokio::test]
    async fn handler_runs_and_reports_done() {
        let mut map = CorrelationMap::new();
        map.insert_handler(5, noop_handler(true));

        let Some(Correlation::Handler(mut handler)) = map.take(5) else {
            panic!("expected handler record");
        };
        assert!(handler(Ok(json!("txid"))).await);
        assert_eq!(map.pending_count(), 0);
    }

    #[tokio::test]
    async fn not_done_handler_can_be_reinstalled() {
        let mut map = CorrelationMap::new();
        map.insert_handler(8, noop_handler(false));

        let Some(Correlation::Handler(mut handler)) = map.take(8) else {
            panic!("expected handler record");
        };
        let done = handler(Ok(Value::Null)).await;
        assert!(!done);
        map.reinstall(8, Correlation::Handler(handler));
        assert!(map.is_pending(8));
    }
}
