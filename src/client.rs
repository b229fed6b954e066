//! Client connection: typed operations over the correlation engine.
//!
//! A [`BeanClient`] owns one connection. Construction spawns three tasks:
//! the writer task (see [`crate::writer`]), the serialization stage in front
//! of it (see [`crate::outbound`], which keeps name-table interning in wire
//! order), and a read loop feeding the [`ReplyDecoder`], which routes
//! responses to the correlator and notification envelopes to the listener
//! table. Application calls register a waiter and queue the request;
//! nothing blocks the read loop.
//!
//! The URL scheme picks the invocation mode: `beanwire://` clients await
//! each call, `beanwire+async://` clients pass callbacks. A call made in the
//! wrong mode is a `Config` error, not a protocol one.
//!
//! # Example
//!
//! ```ignore
//! use beanwire::{BeanClient, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = BeanClient::connect("beanwire://127.0.0.1:9875", ClientConfig::default()).await?;
//!     let domain = client.get_default_domain().await?;
//!     println!("default domain: {domain}");
//!     client.close();
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::CodecRegistry;
use crate::connector::{CallMode, ClientConfig, ConnectorAddr};
use crate::correlate::{Callbacks, Correlator};
use crate::error::{BeanwireError, Result};
use crate::notify::{Listener, ListenerTable};
use crate::ops::OpCode;
use crate::outbound::{spawn_outbound_task, Outbound, OutboundHandle};
use crate::protocol::{CacheCommand, Reply, ReplyDecoder, Request};
use crate::wire::{Attribute, BeanInfo, BeanName, WireValue};
use crate::writer::spawn_writer_task;

/// A connected management client.
pub struct BeanClient {
    mode: CallMode,
    config: ClientConfig,
    correlator: Arc<Correlator>,
    listeners: Arc<ListenerTable>,
    outbound: OutboundHandle,
    target_registry: Option<String>,
    read_task: JoinHandle<()>,
    shutdown_rx: Mutex<Option<oneshot::Receiver<()>>>,
    _outbound_task: JoinHandle<Result<()>>,
    _writer_task: JoinHandle<Result<()>>,
}

impl BeanClient {
    /// Connect to a connector URL.
    pub async fn connect(url: &str, config: ClientConfig) -> Result<Self> {
        let addr = ConnectorAddr::parse(url)?;
        let stream = TcpStream::connect(addr.socket_addr()).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_split(reader, writer, addr.mode, config, CodecRegistry::new()))
    }

    /// Wrap an already-established stream (tests use `tokio::io::duplex`).
    pub fn from_stream<S>(stream: S, mode: CallMode, config: ClientConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer, mode, config, CodecRegistry::new())
    }

    /// Wrap a stream with a custom codec registry (extension codecs).
    pub fn from_stream_with_codecs<S>(
        stream: S,
        mode: CallMode,
        config: ClientConfig,
        codecs: CodecRegistry,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer, mode, config, codecs)
    }

    fn from_split<R, W>(reader: R, writer: W, mode: CallMode, config: ClientConfig, codecs: CodecRegistry) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let codecs = Arc::new(codecs);
        let correlator = Arc::new(Correlator::new());
        let listeners = Arc::new(ListenerTable::new());
        let (writer, writer_task) = spawn_writer_task(writer);
        let (outbound, outbound_task) = spawn_outbound_task(codecs.clone(), writer);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let read_task = {
            let codecs = codecs.clone();
            let correlator = correlator.clone();
            let listeners = listeners.clone();
            tokio::spawn(async move {
                if let Err(e) = read_loop(reader, codecs, &correlator, &listeners).await {
                    tracing::error!(error = %e, "client read loop failed");
                }
                correlator.fail_all();
                listeners.teardown_all();
                let _ = shutdown_tx.send(());
            })
        };

        Self {
            mode,
            config,
            correlator,
            listeners,
            outbound,
            target_registry: None,
            read_task,
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
            _outbound_task: outbound_task,
            _writer_task: writer_task,
        }
    }

    /// Route subsequent requests to a named registry instead of the default.
    pub fn with_target_registry(mut self, registry: impl Into<String>) -> Self {
        self.target_registry = Some(registry.into());
        self
    }

    /// The invocation mode this client was connected with.
    pub fn mode(&self) -> CallMode {
        self.mode
    }

    fn build_request(&self, op: OpCode, args: Vec<Option<WireValue>>) -> Result<Request> {
        // The frame's argument count is one byte; the optional registry
        // selector occupies one slot. Caught here so an oversized call fails
        // the caller, not the connection.
        if args.len() + usize::from(self.target_registry.is_some()) > usize::from(u8::MAX) {
            return Err(BeanwireError::Config(format!(
                "call carries {} arguments, the frame holds at most 255",
                args.len()
            )));
        }
        let mut req = Request::new(op, self.correlator.next_seq(), args);
        req.registry = self.target_registry.clone();
        Ok(req)
    }

    /// Issue one synchronous call: await the correlated response.
    ///
    /// # Errors
    ///
    /// `Config` when the client is in callback mode, `Timeout` when the
    /// response misses the configured deadline (the waiter slot is freed and
    /// a late response is dropped), `Remote` for a failure carried back by
    /// the registry.
    pub async fn call(&self, op: OpCode, args: Vec<Option<WireValue>>) -> Result<WireValue> {
        if self.mode != CallMode::Sync {
            return Err(BeanwireError::Config(
                "synchronous call on an async-mode connection".into(),
            ));
        }
        self.roundtrip(op, args).await
    }

    /// Issue one asynchronous call: returns once the frame is queued, the
    /// response fires exactly one of the callbacks.
    pub async fn call_with_callbacks(
        &self,
        op: OpCode,
        args: Vec<Option<WireValue>>,
        on_success: impl FnOnce(WireValue) + Send + Sync + 'static,
        on_failure: impl FnOnce(BeanwireError) + Send + Sync + 'static,
    ) -> Result<()> {
        if self.mode != CallMode::Async {
            return Err(BeanwireError::Config(
                "callback call on a sync-mode connection".into(),
            ));
        }
        let req = self.build_request(op, args)?;
        let seq = req.seq;
        // Waiter goes in before the frame leaves, so the response can never
        // arrive unclaimed.
        self.correlator.register_callbacks(
            seq,
            Callbacks {
                on_success: Box::new(on_success),
                on_failure: Box::new(on_failure),
            },
        );
        if let Err(e) = self.outbound.send(Outbound::Request(req)).await {
            self.correlator.forget(seq);
            return Err(e);
        }
        Ok(())
    }

    /// The awaiting round trip, used by the sync surface and by listener
    /// registration in either mode.
    async fn roundtrip(&self, op: OpCode, args: Vec<Option<WireValue>>) -> Result<WireValue> {
        let req = self.build_request(op, args)?;
        let seq = req.seq;
        let rx = self.correlator.register_sync(seq);
        if let Err(e) = self.outbound.send(Outbound::Request(req)).await {
            self.correlator.forget(seq);
            return Err(e);
        }

        match tokio::time::timeout(self.config.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BeanwireError::ConnectionClosed),
            Err(_) => {
                self.correlator.forget(seq);
                Err(BeanwireError::Timeout)
            }
        }
    }

    // ---- typed operations -------------------------------------------------

    /// Instantiate and register a bean remotely.
    pub async fn create_bean(
        &self,
        class_name: &str,
        name: &BeanName,
        args: Vec<WireValue>,
        signature: Vec<String>,
    ) -> Result<WireValue> {
        self.call(
            OpCode::CreateBean,
            vec![
                Some(WireValue::Str(class_name.to_string())),
                Some(WireValue::BeanName(name.clone())),
                Some(WireValue::List(args)),
                Some(WireValue::StrList(signature)),
            ],
        )
        .await
    }

    /// Unregister a bean.
    pub async fn unregister_bean(&self, name: &BeanName) -> Result<()> {
        self.call(OpCode::UnregisterBean, vec![Some(WireValue::BeanName(name.clone()))])
            .await?;
        Ok(())
    }

    /// Read one attribute value.
    pub async fn get_attribute(&self, name: &BeanName, attribute: &str) -> Result<WireValue> {
        self.call(
            OpCode::GetAttribute,
            vec![
                Some(WireValue::BeanName(name.clone())),
                Some(WireValue::Str(attribute.to_string())),
            ],
        )
        .await
    }

    /// Read several attributes at once.
    pub async fn get_attribute_list(
        &self,
        name: &BeanName,
        attributes: Vec<String>,
    ) -> Result<Vec<Attribute>> {
        let result = self
            .call(
                OpCode::GetAttributeList,
                vec![
                    Some(WireValue::BeanName(name.clone())),
                    Some(WireValue::StrList(attributes)),
                ],
            )
            .await?;
        expect_attribute_list(result)
    }

    /// Write one attribute.
    pub async fn set_attribute(&self, name: &BeanName, attribute: Attribute) -> Result<()> {
        self.call(
            OpCode::SetAttribute,
            vec![
                Some(WireValue::BeanName(name.clone())),
                Some(WireValue::Attribute(Box::new(attribute))),
            ],
        )
        .await?;
        Ok(())
    }

    /// Write several attributes; returns the ones the registry applied.
    pub async fn set_attribute_list(
        &self,
        name: &BeanName,
        attributes: Vec<Attribute>,
    ) -> Result<Vec<Attribute>> {
        let result = self
            .call(
                OpCode::SetAttributeList,
                vec![
                    Some(WireValue::BeanName(name.clone())),
                    Some(WireValue::AttributeList(attributes)),
                ],
            )
            .await?;
        expect_attribute_list(result)
    }

    /// Invoke an operation on a bean.
    pub async fn invoke(
        &self,
        name: &BeanName,
        operation: &str,
        params: Vec<WireValue>,
        signature: Vec<String>,
    ) -> Result<WireValue> {
        self.call(
            OpCode::Invoke,
            vec![
                Some(WireValue::BeanName(name.clone())),
                Some(WireValue::Str(operation.to_string())),
                Some(WireValue::List(params)),
                Some(WireValue::StrList(signature)),
            ],
        )
        .await
    }

    /// Introspection metadata for a bean.
    pub async fn get_bean_info(&self, name: &BeanName) -> Result<BeanInfo> {
        let result = self
            .call(OpCode::GetBeanInfo, vec![Some(WireValue::BeanName(name.clone()))])
            .await?;
        match result {
            WireValue::BeanInfo(info) => Ok(*info),
            other => Err(unexpected("BeanInfo", &other)),
        }
    }

    /// Names matching a pattern; `None` matches everything.
    pub async fn query_names(
        &self,
        pattern: Option<&BeanName>,
        query: Option<WireValue>,
    ) -> Result<Vec<BeanName>> {
        let result = self
            .call(
                OpCode::QueryNames,
                vec![pattern.map(|p| WireValue::BeanName(p.clone())), query],
            )
            .await?;
        let WireValue::List(items) = result else {
            return Err(unexpected("List", &result));
        };
        items
            .into_iter()
            .map(|v| match v {
                WireValue::BeanName(n) => Ok(n),
                other => Err(unexpected("BeanName", &other)),
            })
            .collect()
    }

    /// Whether a bean is registered under `name`.
    pub async fn is_registered(&self, name: &BeanName) -> Result<bool> {
        let result = self
            .call(OpCode::IsRegistered, vec![Some(WireValue::BeanName(name.clone()))])
            .await?;
        result.as_bool().ok_or_else(|| unexpected("Bool", &result))
    }

    /// Number of beans in the registry.
    pub async fn get_bean_count(&self) -> Result<i32> {
        let result = self.call(OpCode::GetBeanCount, vec![]).await?;
        result.as_i32().ok_or_else(|| unexpected("I32", &result))
    }

    /// The registry's default domain.
    pub async fn get_default_domain(&self) -> Result<String> {
        let result = self.call(OpCode::GetDefaultDomain, vec![]).await?;
        match result {
            WireValue::Str(s) => Ok(s),
            other => Err(unexpected("Str", &other)),
        }
    }

    /// All domains in use.
    pub async fn get_domains(&self) -> Result<Vec<String>> {
        let result = self.call(OpCode::GetDomains, vec![]).await?;
        match result {
            WireValue::StrList(list) => Ok(list),
            other => Err(unexpected("StrList", &other)),
        }
    }

    /// Whether the bean is an instance of `class_name`.
    pub async fn is_instance_of(&self, name: &BeanName, class_name: &str) -> Result<bool> {
        let result = self
            .call(
                OpCode::IsInstanceOf,
                vec![
                    Some(WireValue::BeanName(name.clone())),
                    Some(WireValue::Str(class_name.to_string())),
                ],
            )
            .await?;
        result.as_bool().ok_or_else(|| unexpected("Bool", &result))
    }

    /// Attach a notification listener to a bean.
    ///
    /// Re-registering an identical (listener, filter, handback) triple
    /// returns the existing registration id without another wire exchange.
    /// Registration is acknowledged by the server before the id is returned,
    /// so this awaits in either invocation mode.
    pub async fn add_listener(
        &self,
        name: &BeanName,
        listener: Listener,
        filter: Option<WireValue>,
        handback: Option<WireValue>,
    ) -> Result<u32> {
        let (id, fresh) = self
            .listeners
            .register(name, listener, filter.clone(), handback);
        if !fresh {
            return Ok(id);
        }

        let outcome = self
            .roundtrip(
                OpCode::AddListener,
                vec![
                    Some(WireValue::BeanName(name.clone())),
                    Some(WireValue::I32(id as i32)),
                    filter,
                    None,
                ],
            )
            .await;
        match outcome {
            Ok(_) => {
                self.listeners.activate(id);
                Ok(id)
            }
            Err(e) => {
                self.listeners.remove(id);
                Err(e)
            }
        }
    }

    /// Detach a previously registered listener.
    pub async fn remove_listener(&self, registration: u32) -> Result<()> {
        let name = self.listeners.remove(registration).ok_or_else(|| {
            BeanwireError::Config(format!("unknown listener registration {registration}"))
        })?;
        self.roundtrip(
            OpCode::RemoveListener,
            vec![
                Some(WireValue::BeanName(name)),
                Some(WireValue::I32(registration as i32)),
            ],
        )
        .await?;
        Ok(())
    }

    /// Number of calls currently awaiting a response.
    pub fn outstanding_calls(&self) -> usize {
        self.correlator.outstanding()
    }

    /// Wait until the connection closes (EOF or fatal framing error).
    pub async fn closed(&self) {
        let rx = self.shutdown_rx.lock().ok().and_then(|mut g| g.take());
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }

    /// Close the connection: every outstanding waiter resolves with
    /// `ConnectionClosed` and all listener registrations are torn down.
    pub fn close(&self) {
        self.read_task.abort();
        self.correlator.fail_all();
        self.listeners.teardown_all();
    }
}

impl Drop for BeanClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_loop<R>(
    mut reader: R,
    codecs: Arc<CodecRegistry>,
    correlator: &Correlator,
    listeners: &ListenerTable,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = ReplyDecoder::new(codecs);
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => return Err(BeanwireError::Io(e)),
        };

        for reply in decoder.push(&buf[..n])? {
            match reply {
                Reply::Response(resp) => correlator.deliver(resp.seq, resp.result),
                Reply::Notification(notif) => listeners.dispatch(notif.registration, notif.event),
                Reply::CacheDirective(CacheCommand::FlushNames) => {
                    // Inbound table is flushed inside the decoder; nothing to
                    // do for the outbound table here, the server flushes its
                    // own decode side.
                    tracing::debug!("bean-name cache flushed");
                }
            }
        }
    }
}

fn unexpected(wanted: &str, got: &WireValue) -> BeanwireError {
    BeanwireError::Decode(format!("expected {wanted} result, got {got:?}"))
}

fn expect_attribute_list(result: WireValue) -> Result<Vec<Attribute>> {
    match result {
        WireValue::AttributeList(list) => Ok(list),
        other => Err(unexpected("AttributeList", &other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncodeCtx;
    use crate::protocol::{encode_response, RequestDecoder, Response};
    use tokio::io::{duplex, AsyncWriteExt};

    async fn read_one_request(
        server: &mut (impl AsyncRead + Unpin),
        decoder: &mut RequestDecoder,
    ) -> Request {
        let mut buf = vec![0u8; 4096];
        loop {
            let n = AsyncReadExt::read(server, &mut buf).await.unwrap();
            assert_ne!(n, 0, "peer closed before a full request arrived");
            let mut reqs = decoder.push(&buf[..n]).unwrap();
            if let Some(req) = reqs.pop() {
                return req;
            }
        }
    }

    #[tokio::test]
    async fn test_sync_call_round_trip() {
        let (client_io, mut server_io) = duplex(4096);
        let client = BeanClient::from_stream(client_io, CallMode::Sync, ClientConfig::default());

        let peer = tokio::spawn(async move {
            let codecs = Arc::new(CodecRegistry::new());
            let mut decoder = RequestDecoder::new(codecs.clone());
            let req = read_one_request(&mut server_io, &mut decoder).await;
            assert_eq!(req.op, OpCode::GetDefaultDomain);

            let mut ctx = EncodeCtx::new();
            let frame = encode_response(
                &codecs,
                &mut ctx,
                &Response {
                    op: req.op,
                    seq: req.seq,
                    result: WireValue::Str("DefaultDomain".into()),
                },
            )
            .unwrap();
            server_io.write_all(&frame).await.unwrap();
            server_io
        });

        let domain = client.get_default_domain().await.unwrap();
        assert_eq!(domain, "DefaultDomain");
        assert_eq!(client.outstanding_calls(), 0);
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn test_mode_mismatch_is_config_error() {
        let (client_io, _server_io) = duplex(64);
        let client = BeanClient::from_stream(client_io, CallMode::Async, ClientConfig::default());
        let err = client.call(OpCode::GetBeanCount, vec![]).await.unwrap_err();
        assert!(matches!(err, BeanwireError::Config(_)));
    }

    #[tokio::test]
    async fn test_timeout_frees_waiter_slot() {
        let (client_io, _server_io) = duplex(4096);
        let config = ClientConfig {
            call_timeout: std::time::Duration::from_millis(20),
        };
        let client = BeanClient::from_stream(client_io, CallMode::Sync, config);

        let err = client.get_bean_count().await.unwrap_err();
        assert!(matches!(err, BeanwireError::Timeout));
        assert_eq!(client.outstanding_calls(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_fails_outstanding_calls() {
        let (client_io, server_io) = duplex(4096);
        let client = BeanClient::from_stream(client_io, CallMode::Sync, ClientConfig::default());

        let closer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            drop(server_io);
        });

        let err = client.get_bean_count().await.unwrap_err();
        assert!(matches!(err, BeanwireError::ConnectionClosed));
        closer.await.unwrap();
    }

    #[tokio::test]
    async fn test_callback_call_fires_on_success() {
        let (client_io, mut server_io) = duplex(4096);
        let client = BeanClient::from_stream(client_io, CallMode::Async, ClientConfig::default());

        let (done_tx, done_rx) = oneshot::channel();
        client
            .call_with_callbacks(
                OpCode::GetBeanCount,
                vec![],
                move |value| {
                    let _ = done_tx.send(value);
                },
                |e| panic!("unexpected failure: {e}"),
            )
            .await
            .unwrap();

        let codecs = Arc::new(CodecRegistry::new());
        let mut decoder = RequestDecoder::new(codecs.clone());
        let req = read_one_request(&mut server_io, &mut decoder).await;

        let mut ctx = EncodeCtx::new();
        let frame = encode_response(
            &codecs,
            &mut ctx,
            &Response {
                op: req.op,
                seq: req.seq,
                result: WireValue::I32(7),
            },
        )
        .unwrap();
        server_io.write_all(&frame).await.unwrap();

        assert_eq!(done_rx.await.unwrap(), WireValue::I32(7));
    }
}
