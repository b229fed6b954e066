//! Server connection loop: op dispatch against local bean registries.
//!
//! One [`BeanServer`] holds the registries and a codec registry; each
//! accepted connection gets its own decoder, writer task, serialization
//! stage and relay table. Requests are dispatched synchronously in arrival
//! order, so a connection observes its own operations in the order it sent
//! them. Responses and notifications funnel through the serialization stage
//! so the outbound name table is interned in wire order.
//!
//! Registry errors never touch the connection: they come back to the caller
//! as a carried failure value. Only framing corruption tears the connection
//! down, and that teardown detaches every relay the connection attached.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;

use crate::codec::CodecRegistry;
use crate::error::{BeanwireError, Result};
use crate::notify::RelayTable;
use crate::ops::OpCode;
use crate::outbound::{spawn_outbound_task, Outbound, OutboundHandle};
use crate::protocol::{Notification, Request, RequestDecoder, Response};
use crate::registry::{BeanRegistry, EventSink};
use crate::wire::{Attribute, BeanName, RemoteFailure, WireValue};
use crate::writer::spawn_writer_task;

/// Serves bean registries to remote clients.
pub struct BeanServer {
    registries: HashMap<String, Arc<dyn BeanRegistry>>,
    codecs: Arc<CodecRegistry>,
}

impl BeanServer {
    pub fn new() -> Self {
        Self {
            registries: HashMap::new(),
            codecs: Arc::new(CodecRegistry::new()),
        }
    }

    /// Install the registry served under the default name.
    pub fn with_default(self, registry: Arc<dyn BeanRegistry>) -> Self {
        self.with_registry(crate::protocol::DEFAULT_REGISTRY, registry)
    }

    /// Install a registry under an explicit selector name.
    pub fn with_registry(mut self, name: impl Into<String>, registry: Arc<dyn BeanRegistry>) -> Self {
        self.registries.insert(name.into(), registry);
        self
    }

    /// Replace the codec registry (extension codecs).
    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Arc::new(codecs);
        self
    }

    /// Accept loop over a bound TCP listener. Each connection is served on
    /// its own task; a connection failure never stops the loop.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "connection accepted");
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_connection(stream).await {
                    tracing::error!(%peer, error = %e, "connection failed");
                }
            });
        }
    }

    /// Serve one connection to completion (EOF or fatal framing error).
    pub async fn serve_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, write_half) = tokio::io::split(stream);
        let (writer, _writer_task) = spawn_writer_task(write_half);
        let (outbound, _outbound_task) = spawn_outbound_task(self.codecs.clone(), writer);

        let conn = ConnState {
            outbound,
            relays: RelayTable::new(),
        };

        let outcome = self.read_loop(reader, &conn).await;
        // Whatever ended the connection, the registry must not keep pushing
        // events at it.
        conn.relays.teardown_all();
        outcome
    }

    async fn read_loop<R>(&self, mut reader: R, conn: &ConnState) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut decoder = RequestDecoder::new(self.codecs.clone());
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(e) => return Err(BeanwireError::Io(e)),
            };

            for req in decoder.push(&buf[..n])? {
                tracing::debug!(op = req.op.name(), seq = req.seq, "request");
                let response = Response {
                    op: req.op,
                    seq: req.seq,
                    result: self.dispatch(&req, conn),
                };
                conn.outbound.send(Outbound::Response(response)).await?;
            }
        }
    }

    /// Execute one request; every registry-level error becomes a carried
    /// failure value.
    fn dispatch(&self, req: &Request, conn: &ConnState) -> WireValue {
        let Some(registry) = self.registries.get(req.registry_name()) else {
            return WireValue::Failure(RemoteFailure::new(
                "RegistryNotFound",
                format!("no registry named {:?}", req.registry_name()),
            ));
        };

        match self.execute(registry.as_ref(), req, conn) {
            Ok(value) => value,
            Err(failure) => WireValue::Failure(failure),
        }
    }

    fn execute(
        &self,
        registry: &dyn BeanRegistry,
        req: &Request,
        conn: &ConnState,
    ) -> std::result::Result<WireValue, RemoteFailure> {
        match req.op {
            OpCode::CreateBean => {
                let class = str_arg(req, 0)?;
                let name = bean_name_arg(req, 1)?;
                let args = value_list_arg(req, 2)?;
                let signature = str_list_arg(req, 3)?;
                registry.create_bean(&class, &name, args, signature)
            }
            OpCode::UnregisterBean => {
                registry.unregister_bean(&bean_name_arg(req, 0)?)?;
                Ok(WireValue::Void)
            }
            OpCode::GetAttribute => {
                registry.get_attribute(&bean_name_arg(req, 0)?, &str_arg(req, 1)?)
            }
            OpCode::GetAttributeList => {
                let list = registry
                    .get_attribute_list(&bean_name_arg(req, 0)?, &str_list_arg(req, 1)?)?;
                Ok(WireValue::AttributeList(list))
            }
            OpCode::SetAttribute => {
                registry.set_attribute(&bean_name_arg(req, 0)?, attribute_arg(req, 1)?)?;
                Ok(WireValue::Void)
            }
            OpCode::SetAttributeList => {
                let applied = registry
                    .set_attribute_list(&bean_name_arg(req, 0)?, attribute_list_arg(req, 1)?)?;
                Ok(WireValue::AttributeList(applied))
            }
            OpCode::Invoke => {
                let name = bean_name_arg(req, 0)?;
                let operation = str_arg(req, 1)?;
                let params = value_list_arg(req, 2)?;
                let signature = str_list_arg(req, 3)?;
                registry.invoke(&name, &operation, params, signature)
            }
            OpCode::GetBeanInfo => {
                let info = registry.get_bean_info(&bean_name_arg(req, 0)?)?;
                Ok(WireValue::BeanInfo(Box::new(info)))
            }
            OpCode::QueryNames => {
                let pattern = match req.arg(0) {
                    WireValue::Null => None,
                    WireValue::BeanName(n) => Some(n),
                    other => return Err(bad_param(req.op, 0, &other)),
                };
                let query = match req.arg(1) {
                    WireValue::Null => None,
                    other => Some(other),
                };
                let names = registry.query_names(pattern.as_ref(), query.as_ref())?;
                Ok(WireValue::List(
                    names.into_iter().map(WireValue::BeanName).collect(),
                ))
            }
            OpCode::IsRegistered => {
                Ok(WireValue::Bool(registry.is_registered(&bean_name_arg(req, 0)?)?))
            }
            OpCode::GetBeanCount => Ok(WireValue::I32(registry.bean_count()?)),
            OpCode::GetDefaultDomain => Ok(WireValue::Str(registry.default_domain()?)),
            OpCode::GetDomains => Ok(WireValue::StrList(registry.domains()?)),
            OpCode::IsInstanceOf => Ok(WireValue::Bool(
                registry.is_instance_of(&bean_name_arg(req, 0)?, &str_arg(req, 1)?)?,
            )),
            OpCode::AddListener => {
                let name = bean_name_arg(req, 0)?;
                let registration = i32_arg(req, 1)? as u32;
                let filter = match req.arg(2) {
                    WireValue::Null => None,
                    other => Some(other),
                };
                // Handback (slot 3) never leaves the client; it is not
                // forwarded to the registry.
                let sink = conn.notification_sink(registration);
                let subscription = registry.add_listener(&name, filter, sink)?;
                conn.relays.insert(registration, subscription);
                Ok(WireValue::I32(registration as i32))
            }
            OpCode::RemoveListener => {
                let _name = bean_name_arg(req, 0)?;
                let registration = i32_arg(req, 1)? as u32;
                if conn.relays.detach(registration) {
                    Ok(WireValue::Void)
                } else {
                    Err(RemoteFailure::new(
                        "ListenerNotFound",
                        format!("no listener registration {registration}"),
                    ))
                }
            }
        }
    }
}

impl Default for BeanServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection outbound state shared with relay sinks.
struct ConnState {
    outbound: OutboundHandle,
    relays: RelayTable,
}

impl ConnState {
    /// Build the sink a registry pushes events through for one registration.
    /// The event is queued on the emitter's thread; a full outbound queue
    /// drops it with a warning rather than blocking the registry.
    fn notification_sink(&self, registration: u32) -> EventSink {
        let outbound = self.outbound.clone();
        Arc::new(move |event: WireValue| {
            let envelope = Outbound::Notification(Notification { registration, event });
            if let Err(e) = outbound.try_send(envelope) {
                tracing::warn!(registration, error = %e, "notification dropped");
            }
        })
    }
}

fn bad_param(op: OpCode, idx: usize, got: &WireValue) -> RemoteFailure {
    RemoteFailure::new(
        "BadParameter",
        format!("{} argument {idx} has unexpected kind {got:?}", op.name()),
    )
}

fn str_arg(req: &Request, idx: usize) -> std::result::Result<String, RemoteFailure> {
    match req.arg(idx) {
        WireValue::Str(s) => Ok(s),
        other => Err(bad_param(req.op, idx, &other)),
    }
}

fn bean_name_arg(req: &Request, idx: usize) -> std::result::Result<BeanName, RemoteFailure> {
    match req.arg(idx) {
        WireValue::BeanName(n) => Ok(n),
        other => Err(bad_param(req.op, idx, &other)),
    }
}

fn i32_arg(req: &Request, idx: usize) -> std::result::Result<i32, RemoteFailure> {
    match req.arg(idx) {
        WireValue::I32(v) => Ok(v),
        other => Err(bad_param(req.op, idx, &other)),
    }
}

fn str_list_arg(req: &Request, idx: usize) -> std::result::Result<Vec<String>, RemoteFailure> {
    match req.arg(idx) {
        WireValue::StrList(list) => Ok(list),
        // An absent list reads as empty.
        WireValue::Null => Ok(Vec::new()),
        other => Err(bad_param(req.op, idx, &other)),
    }
}

fn value_list_arg(req: &Request, idx: usize) -> std::result::Result<Vec<WireValue>, RemoteFailure> {
    match req.arg(idx) {
        WireValue::List(list) => Ok(list),
        WireValue::Null => Ok(Vec::new()),
        other => Err(bad_param(req.op, idx, &other)),
    }
}

fn attribute_arg(req: &Request, idx: usize) -> std::result::Result<Attribute, RemoteFailure> {
    match req.arg(idx) {
        WireValue::Attribute(attr) => Ok(*attr),
        other => Err(bad_param(req.op, idx, &other)),
    }
}

fn attribute_list_arg(req: &Request, idx: usize) -> std::result::Result<Vec<Attribute>, RemoteFailure> {
    match req.arg(idx) {
        WireValue::AttributeList(list) => Ok(list),
        other => Err(bad_param(req.op, idx, &other)),
    }
}
