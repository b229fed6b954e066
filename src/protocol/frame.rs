//! Complete wire messages.

use crate::ops::OpCode;
use crate::wire::WireValue;

/// Registry name used when a request carries no target-registry selector.
pub const DEFAULT_REGISTRY: &str = "default";

/// A request frame: one operation invocation.
///
/// Immutable once built; the sequence id is assigned by the correlation
/// engine and never reused while the request is outstanding.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Operation code from the catalog.
    pub op: OpCode,
    /// Connection-scoped sequence id.
    pub seq: u32,
    /// Ordered arguments; `None` is the explicit null placeholder.
    pub args: Vec<Option<WireValue>>,
    /// Optional target-registry selector, carried as a trailing nullable
    /// argument slot on the wire.
    pub registry: Option<String>,
}

impl Request {
    /// Create a request without a registry selector.
    pub fn new(op: OpCode, seq: u32, args: Vec<Option<WireValue>>) -> Self {
        Self {
            op,
            seq,
            args,
            registry: None,
        }
    }

    /// The target registry, defaulting to [`DEFAULT_REGISTRY`].
    pub fn registry_name(&self) -> &str {
        self.registry.as_deref().unwrap_or(DEFAULT_REGISTRY)
    }

    /// Argument at `idx`, with the null placeholder mapped to `WireValue::Null`.
    pub fn arg(&self, idx: usize) -> WireValue {
        self.args
            .get(idx)
            .and_then(|a| a.clone())
            .unwrap_or(WireValue::Null)
    }
}

/// A response frame answering one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Operation code of the original request.
    pub op: OpCode,
    /// Sequence id this answers.
    pub seq: u32,
    /// Result: a concrete value, `Void`, `Null`, or a carried `Failure`.
    pub result: WireValue,
}

/// An unsolicited notification envelope. No request counterpart; ordered
/// per registration, unordered across registrations.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Target listener-registration id.
    pub registration: u32,
    /// Opaque event payload.
    pub event: WireValue,
}

/// Cache directives, advisory instructions about connection-scoped tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCommand {
    /// Flush the bean-name reference tables on both sides.
    FlushNames,
}

/// Any client-bound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Correlated response.
    Response(Response),
    /// Server-push notification.
    Notification(Notification),
    /// Cache directive.
    CacheDirective(CacheCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_name_defaults() {
        let req = Request::new(OpCode::GetBeanCount, 1, vec![]);
        assert_eq!(req.registry_name(), DEFAULT_REGISTRY);

        let req = Request {
            registry: Some("secondary".into()),
            ..Request::new(OpCode::GetBeanCount, 1, vec![])
        };
        assert_eq!(req.registry_name(), "secondary");
    }

    #[test]
    fn test_arg_maps_null_placeholder() {
        let req = Request::new(
            OpCode::QueryNames,
            2,
            vec![None, Some(WireValue::Str("q".into()))],
        );
        assert_eq!(req.arg(0), WireValue::Null);
        assert_eq!(req.arg(1), WireValue::Str("q".into()));
        assert_eq!(req.arg(9), WireValue::Null);
    }
}
