//! Transport I/O shared by the handshake and the connection loop.

use bytes::BytesMut;
use embedded_io_async::{Read, Write};

use crate::error::TransportError;

const READ_CHUNK: usize = 4096;

/// Reads once and appends to `read_buf`. Returns the number of bytes read, `0` on eof.
///
/// Nothing is lost if the returned future is dropped before it completes.
pub async fn read_some<T>(transport: &mut T, read_buf: &mut BytesMut) -> Result<usize, TransportError>
where
    T: Read,
{
    let mut chunk = [0u8; READ_CHUNK];

    let read = transport
        .read(&mut chunk)
        .await
        .map_err(TransportError::io)?;

    read_buf.extend_from_slice(&chunk[..read]);

    Ok(read)
}

/// Writes and flushes `bytes`.
pub async fn write_all<T>(transport: &mut T, bytes: &[u8]) -> Result<(), TransportError>
where
    T: Write,
{
    transport
        .write_all(bytes)
        .await
        .map_err(TransportError::io)?;

    transport.flush().await.map_err(TransportError::io)
}
