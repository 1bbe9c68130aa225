//! Readable/Writable adapters over `AsyncRead`/`AsyncWrite`.
//!
//! Each hook takes the I/O object out of its slot, runs one operation on a
//! local task and puts it back before completing through an
//! [`ExternalOp`](crate::scheduler::ExternalOp). The stream engine never has
//! more than one operation in flight per object: a Readable latches `doRead`
//! until the next push, a Writable dispatches one write at a time.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use tokio::io::AsyncWriteExt;
//! use wirestream::transport::readable_from_async_read;
//! use wirestream::{EventKind, ReadableOptions, Scheduler};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let (mut client, server) = tokio::io::duplex(64);
//!     client.write_all(b"ping").await.unwrap();
//!     drop(client);
//!
//!     let scheduler = Scheduler::new();
//!     let readable = readable_from_async_read(&scheduler, server, ReadableOptions::new());
//!     let received = Rc::new(RefCell::new(String::new()));
//!     let r = received.clone();
//!     readable.on(EventKind::Data, move |event| {
//!         if let Some(chunk) = event.data() {
//!             r.borrow_mut().push_str(&chunk.to_text_lossy());
//!         }
//!     });
//!
//!     scheduler.run().await.unwrap();
//!     assert_eq!(*received.borrow(), "ping");
//! }).await;
//! # });
//! ```

use std::cell::RefCell;
use std::io::{self, IoSlice};
use std::rc::Rc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::Chunk;
use crate::error::StreamError;
use crate::readable::{Readable, ReadableOptions};
use crate::scheduler::Scheduler;
use crate::writable::{Writable, WritableOptions, WriteCallback};

/// Shared slot holding an I/O object while no operation uses it.
type Slot<T> = Rc<RefCell<Option<T>>>;

fn take<T>(slot: &Slot<T>) -> Option<T> {
    slot.borrow_mut().take()
}

/// Create a Readable that reads from `reader`.
///
/// Each `doRead(size)` reads up to `size` bytes. End of file pushes end of
/// production; an I/O error destroys the stream with [`StreamError::Io`].
/// The hook in `options` is replaced.
pub fn readable_from_async_read<R>(
    scheduler: &Scheduler,
    reader: R,
    options: ReadableOptions,
) -> Readable
where
    R: AsyncRead + Unpin + 'static,
{
    let slot: Slot<R> = Rc::new(RefCell::new(Some(reader)));
    let sched = scheduler.clone();

    let options = options.with_do_read(move |stream: &Readable, size: usize| {
        let Some(mut reader) = take(&slot) else {
            tracing::trace!(stream = ?stream.id(), "read already in progress");
            return Ok(());
        };

        let slot = slot.clone();
        let stream = stream.clone();
        let op = sched.external();
        tokio::task::spawn_local(async move {
            let mut buf = BytesMut::with_capacity(size);
            let result = reader.read_buf(&mut buf).await;
            *slot.borrow_mut() = Some(reader);

            op.complete(move || match result {
                Ok(0) => {
                    tracing::debug!(stream = ?stream.id(), "reader reached end of file");
                    stream.push(None);
                }
                Ok(_) => {
                    stream.push(Some(Chunk::Bytes(buf.freeze())));
                }
                Err(err) => {
                    tracing::warn!(stream = ?stream.id(), error = %err, "read failed");
                    stream.destroy(Some(err.into()));
                }
            });
        });
        Ok(())
    });

    Readable::new(scheduler, options)
}

/// Create a Writable that writes to `writer`.
///
/// `doWrite` performs `write_all` and flush, `doWritev` writes a batch with
/// vectored I/O, and `doFinal` flushes and shuts the writer down. Hooks in
/// `options` are replaced.
pub fn writable_from_async_write<W>(
    scheduler: &Scheduler,
    writer: W,
    options: WritableOptions,
) -> Writable
where
    W: AsyncWrite + Unpin + 'static,
{
    let slot: Slot<W> = Rc::new(RefCell::new(Some(writer)));

    let (write_slot, write_sched) = (slot.clone(), scheduler.clone());
    let (writev_slot, writev_sched) = (slot.clone(), scheduler.clone());
    let final_sched = scheduler.clone();

    let options = options
        .with_do_write(move |chunk, _encoding, callback: WriteCallback| {
            let mut writer = take(&write_slot).ok_or_else(writer_gone)?;
            let slot = write_slot.clone();
            let op = write_sched.external();
            tokio::task::spawn_local(async move {
                let result = write_one(&mut writer, &chunk).await;
                *slot.borrow_mut() = Some(writer);
                op.complete(move || callback.complete(result.map_err(StreamError::from)));
            });
            Ok(())
        })
        .with_do_writev(move |chunks, callback: WriteCallback| {
            let mut writer = take(&writev_slot).ok_or_else(writer_gone)?;
            let slot = writev_slot.clone();
            let op = writev_sched.external();
            tokio::task::spawn_local(async move {
                let result = write_batch(&mut writer, &chunks).await;
                *slot.borrow_mut() = Some(writer);
                op.complete(move || callback.complete(result.map_err(StreamError::from)));
            });
            Ok(())
        })
        .with_do_final(move |callback: WriteCallback| {
            let mut writer = take(&slot).ok_or_else(writer_gone)?;
            let op = final_sched.external();
            tokio::task::spawn_local(async move {
                let result = match writer.flush().await {
                    Ok(()) => writer.shutdown().await,
                    Err(err) => Err(err),
                };
                op.complete(move || callback.complete(result.map_err(StreamError::from)));
            });
            Ok(())
        });

    Writable::new(scheduler, options)
}

fn writer_gone() -> StreamError {
    StreamError::other("async writer is not available")
}

async fn write_one<W>(writer: &mut W, chunk: &Chunk) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(chunk.as_bytes()).await?;
    writer.flush().await
}

/// Write a batch of chunks using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, chunks: &[Chunk]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = chunks.iter().map(Chunk::byte_len).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(chunks, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            ));
        }
        total_written += written;
    }

    writer.flush().await
}

/// Build IoSlice array for the data left after `skip_bytes` were written.
fn remaining_slices(chunks: &[Chunk], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(chunks.len());
    let mut offset = 0;

    for chunk in chunks {
        let bytes = chunk.as_bytes();
        let end = offset + bytes.len();
        if skip_bytes < end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&bytes[start..]));
        }
        offset = end;
    }

    slices
}
