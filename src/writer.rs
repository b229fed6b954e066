//! Dedicated writer task for outbound frames.
//!
//! Frames are fully encoded before they reach this module; the task's job is
//! ordering and batching. Handlers and relays share a cloneable
//! [`WriterHandle`] feeding an mpsc channel, so no lock is ever held around
//! the socket write. Multiple ready frames are coalesced into a single
//! vectored write.

use std::io::IoSlice;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{BeanwireError, Result};

/// Default channel capacity for queued frames.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames coalesced into one vectored write.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for queueing frames to the writer task.
///
/// Cheaply cloneable; a closed channel (the task exited) surfaces as
/// `ConnectionClosed`.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
}

impl WriterHandle {
    /// Queue a frame, waiting if the channel is full.
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| BeanwireError::ConnectionClosed)
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Bytes) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                BeanwireError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, "writer queue full"))
            }
            mpsc::error::TrySendError::Closed(_) => BeanwireError::ConnectionClosed,
        })
    }
}

/// Spawn the writer task over a write half.
pub fn spawn_writer_task<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task_with_capacity(writer, DEFAULT_CHANNEL_CAPACITY)
}

/// Spawn the writer task with a custom channel capacity.
pub fn spawn_writer_task_with_capacity<W>(writer: W, capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            // All handles dropped: clean shutdown.
            None => return Ok(()),
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        write_batch(&mut writer, &batch).await?;
    }
}

async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(Bytes::len).sum();
    let mut written = 0;

    while written < total {
        let slices = remaining_slices(batch, written);
        let n = writer.write_vectored(&slices).await?;
        if n == 0 {
            return Err(BeanwireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        written += n;
    }

    writer.flush().await?;
    Ok(())
}

fn remaining_slices(batch: &[Bytes], skip: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut offset = 0;
    for frame in batch {
        let end = offset + frame.len();
        if skip < end && !frame.is_empty() {
            let start = skip.saturating_sub(offset);
            slices.push(IoSlice::new(&frame[start..]));
        }
        offset = end;
    }
    slices
}
