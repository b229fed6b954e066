//! The management-bean registry trait.
//!
//! The engine never owns beans; it forwards decoded operations to an
//! implementation of [`BeanRegistry`] supplied by the embedding application.
//! Every method is synchronous and returns `RemoteFailure` on the error path,
//! which the server carries back to the caller as a failure value rather than
//! tearing down the connection.

use std::sync::Arc;

use crate::wire::{Attribute, BeanInfo, BeanName, RemoteFailure, WireValue};

/// Callback through which a registry pushes notification events.
///
/// The engine hands one sink per listener attachment; the registry invokes it
/// for every matching event, in emission order.
pub type EventSink = Arc<dyn Fn(WireValue) + Send + Sync>;

/// Handle for one attached listener, detached on drop of interest.
///
/// Subscriptions live in connection-scoped tables shared across tasks, so
/// implementations must be `Sync` as well as `Send`.
pub trait Subscription: Send + Sync {
    /// Detach the listener from its bean. Idempotent.
    fn detach(&mut self) -> Result<(), RemoteFailure>;
}

/// The local bean registry the engine serves remotely.
///
/// Implementations must be thread-safe; the server invokes operations from
/// its connection task.
pub trait BeanRegistry: Send + Sync {
    /// Instantiate and register a bean. Returns a handle value describing the
    /// registered instance.
    fn create_bean(
        &self,
        class_name: &str,
        name: &BeanName,
        args: Vec<WireValue>,
        signature: Vec<String>,
    ) -> Result<WireValue, RemoteFailure>;

    /// Remove a bean from the registry.
    fn unregister_bean(&self, name: &BeanName) -> Result<(), RemoteFailure>;

    /// Read one attribute.
    fn get_attribute(&self, name: &BeanName, attribute: &str) -> Result<WireValue, RemoteFailure>;

    /// Read several attributes; absent ones are simply omitted from the
    /// returned list.
    fn get_attribute_list(
        &self,
        name: &BeanName,
        attributes: &[String],
    ) -> Result<Vec<Attribute>, RemoteFailure>;

    /// Write one attribute.
    fn set_attribute(&self, name: &BeanName, attribute: Attribute) -> Result<(), RemoteFailure>;

    /// Write several attributes; returns the ones actually applied.
    fn set_attribute_list(
        &self,
        name: &BeanName,
        attributes: Vec<Attribute>,
    ) -> Result<Vec<Attribute>, RemoteFailure>;

    /// Invoke a named operation with positional parameters. The signature
    /// disambiguates overloads by parameter type name.
    fn invoke(
        &self,
        name: &BeanName,
        operation: &str,
        params: Vec<WireValue>,
        signature: Vec<String>,
    ) -> Result<WireValue, RemoteFailure>;

    /// Introspection metadata for a bean.
    fn get_bean_info(&self, name: &BeanName) -> Result<BeanInfo, RemoteFailure>;

    /// Names matching a pattern (and optional query expression); a null
    /// pattern matches everything.
    fn query_names(
        &self,
        pattern: Option<&BeanName>,
        query: Option<&WireValue>,
    ) -> Result<Vec<BeanName>, RemoteFailure>;

    /// Whether a bean is currently registered under `name`.
    fn is_registered(&self, name: &BeanName) -> Result<bool, RemoteFailure>;

    /// Number of registered beans.
    fn bean_count(&self) -> Result<i32, RemoteFailure>;

    /// The default domain name.
    fn default_domain(&self) -> Result<String, RemoteFailure>;

    /// All domain names currently in use.
    fn domains(&self) -> Result<Vec<String>, RemoteFailure>;

    /// Whether the bean is an instance of `class_name`.
    fn is_instance_of(&self, name: &BeanName, class_name: &str) -> Result<bool, RemoteFailure>;

    /// Attach a listener to a bean. Events matching `filter` are pushed
    /// through `sink`; the returned subscription detaches the listener.
    fn add_listener(
        &self,
        name: &BeanName,
        filter: Option<WireValue>,
        sink: EventSink,
    ) -> Result<Box<dyn Subscription>, RemoteFailure>;
}
