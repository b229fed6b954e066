//! Outbound message stage: serialization in transmission order.
//!
//! The bean-name table assigns an index the first time a name is encoded,
//! and later frames refer back to it. That only holds up if frames reach the
//! wire in the order they were encoded, so encoding cannot happen on the
//! producers' tasks: two callers naming the same bean could queue the
//! back-reference ahead of the frame that defines it.
//!
//! Instead, one task per connection owns the [`EncodeCtx`]. Producers queue
//! domain messages through an [`OutboundHandle`]; the task serializes each
//! in channel order and forwards the finished frame to the writer task.
//! Channel order, interning order and wire order are therefore the same
//! order by construction.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::{CodecRegistry, EncodeCtx};
use crate::error::{BeanwireError, Result};
use crate::protocol::{
    encode_cache_directive, encode_notification, encode_request, encode_response, CacheCommand,
    Notification, Request, Response,
};
use crate::writer::WriterHandle;

/// Default channel capacity for queued messages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A message awaiting serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Client-bound-for-server request.
    Request(Request),
    /// Correlated response.
    Response(Response),
    /// Server-push notification envelope.
    Notification(Notification),
    /// Cache directive; also flushes this side's name table at exactly this
    /// point in the message order.
    CacheDirective(CacheCommand),
}

/// Handle for queueing outbound messages.
///
/// Cheaply cloneable; a closed channel (the task exited) surfaces as
/// `ConnectionClosed`.
#[derive(Clone)]
pub struct OutboundHandle {
    tx: mpsc::Sender<Outbound>,
}

impl OutboundHandle {
    /// Queue a message, waiting if the channel is full.
    pub async fn send(&self, msg: Outbound) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| BeanwireError::ConnectionClosed)
    }

    /// Queue a message without waiting (synchronous producers).
    pub fn try_send(&self, msg: Outbound) -> Result<()> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BeanwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WouldBlock,
                "outbound queue full",
            )),
            mpsc::error::TrySendError::Closed(_) => BeanwireError::ConnectionClosed,
        })
    }
}

/// Spawn the serialization task in front of a writer handle.
pub fn spawn_outbound_task(
    codecs: Arc<CodecRegistry>,
    writer: WriterHandle,
) -> (OutboundHandle, JoinHandle<Result<()>>) {
    spawn_outbound_task_with_capacity(codecs, writer, DEFAULT_CHANNEL_CAPACITY)
}

/// Spawn the serialization task with a custom channel capacity.
pub fn spawn_outbound_task_with_capacity(
    codecs: Arc<CodecRegistry>,
    writer: WriterHandle,
    capacity: usize,
) -> (OutboundHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::spawn(outbound_loop(rx, codecs, writer));
    (OutboundHandle { tx }, task)
}

async fn outbound_loop(
    mut rx: mpsc::Receiver<Outbound>,
    codecs: Arc<CodecRegistry>,
    writer: WriterHandle,
) -> Result<()> {
    let mut ctx = EncodeCtx::new();
    loop {
        let msg = match rx.recv().await {
            Some(msg) => msg,
            // All handles dropped: clean shutdown.
            None => return Ok(()),
        };

        let frame = match msg {
            Outbound::Request(req) => encode_request(&codecs, &mut ctx, &req)?,
            Outbound::Response(resp) => encode_response(&codecs, &mut ctx, &resp)?,
            Outbound::Notification(notif) => encode_notification(&codecs, &mut ctx, &notif)?,
            Outbound::CacheDirective(cmd) => {
                ctx.flush();
                encode_cache_directive(cmd)
            }
        };
        writer.send(frame).await?;
    }
}
