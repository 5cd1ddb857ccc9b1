//! Per-connection receive loop and asynchronous response channel.
//!
//! Each accepted connection owns exactly one pool [`Segment`] and one
//! [`FrameAssembler`]. The receive loop reads into the segment, feeds the
//! assembler and drains every complete frame through the registry
//! synchronously, in arrival order, before issuing the next read. Responses
//! go to a dedicated writer task over a channel so a slow peer's send path
//! never blocks the receive loop; queuing order on the channel preserves the
//! per-connection request/response FIFO.
//!
//! A zero-byte read is an orderly peer shutdown; it and any I/O error tear
//! the connection down the same way: the task exits, the segment is released
//! back to the pool exactly once and the socket is closed. The segment is
//! held by a drop guard, so even a panicking connection task returns it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::frame::{FrameAssembler, LengthFormat};
use crate::pool::{Segment, SegmentPool};
use crate::registry::ServiceRegistry;
use crate::serializer::Serializer;

/// Owns a connection's segment and returns it to the pool when dropped.
///
/// Teardown runs on every exit path, including an unwinding task, so a
/// connection can never leak its segment.
struct SegmentGuard {
    pool: Arc<SegmentPool>,
    segment: Option<Segment>,
}

impl SegmentGuard {
    fn new(pool: Arc<SegmentPool>, segment: Segment) -> Self {
        Self {
            pool,
            segment: Some(segment),
        }
    }
}

impl Drop for SegmentGuard {
    fn drop(&mut self) {
        if let Some(segment) = self.segment.take() {
            self.pool.release(segment);
        }
    }
}

/// Serve one accepted connection to completion.
pub(crate) async fn run<S>(
    stream: TcpStream,
    peer: SocketAddr,
    segment: Segment,
    registry: Arc<ServiceRegistry<S>>,
    pool: Arc<SegmentPool>,
) where
    S: Serializer + Send + Sync + 'static,
{
    let mut guard = SegmentGuard::new(pool, segment);
    let (reader, writer) = stream.into_split();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(writer, response_rx));

    match read_loop(reader, &mut guard, &registry, &response_tx).await {
        Ok(()) => tracing::debug!(%peer, "peer closed connection"),
        Err(error) => tracing::debug!(%peer, %error, "connection failed"),
    }

    // Dropping the sender lets the writer drain queued responses and exit;
    // the guard returns the segment when `run` unwinds or returns.
    drop(response_tx);
    let _ = writer_task.await;
}

async fn read_loop<S>(
    mut reader: OwnedReadHalf,
    guard: &mut SegmentGuard,
    registry: &ServiceRegistry<S>,
    responses: &mpsc::UnboundedSender<Bytes>,
) -> io::Result<()>
where
    S: Serializer + Send + Sync + 'static,
{
    let Some(segment) = guard.segment.as_mut() else {
        return Ok(());
    };
    let format = LengthFormat::default();
    let mut assembler = FrameAssembler::with_format(format);
    loop {
        let received = reader.read(segment.as_mut_slice()).await?;
        if received == 0 {
            return Ok(());
        }
        assembler.push(&segment.as_slice()[..received]);

        // One read may complete several frames; dispatch them all, in
        // arrival order, before the next read reuses the segment.
        while let Some(frame) = assembler.next_frame()? {
            let response = registry.dispatch(frame);
            let framed = format.encode_frame(&response.encode())?;
            if responses.send(framed).is_err() {
                // Writer already gone; the peer will never see a response.
                return Ok(());
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut responses: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(bytes) = responses.recv().await {
        if let Err(error) = writer.write_all(&bytes).await {
            tracing::debug!(%error, "response write failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
