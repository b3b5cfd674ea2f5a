use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{NetworkError, NetworkResult};

/// Largest accepted response frame. Sized for a full download batch of
/// maximum-size blocks after base64 and JSON overhead.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Largest accepted request frame. Requests carry a sender and at most a
/// block range or index, never blocks.
pub const MAX_REQUEST_FRAME_BYTES: usize = 64 * 1024;

/// Write one frame: a big-endian `u32` length followed by the payload.
/// An empty payload is the "no response" frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> NetworkResult<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(NetworkError::FrameTooLarge {
            size: payload.len(),
            limit: MAX_FRAME_BYTES,
        });
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame of at most `limit` bytes. Oversized lengths are rejected
/// before allocating.
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> NetworkResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let size = reader.read_u32().await? as usize;
    if size > limit {
        return Err(NetworkError::FrameTooLarge { size, limit });
    }
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}
