//! Frame Codec
//!
//! TCP is a byte stream, so each serialized `Envelope` is prefixed with its
//! length as a big-endian `u32`. Bodies are bincode, same as the rest of the
//! engine's serialization. A frame that exceeds the size cap or fails to
//! decode means the stream is corrupted; callers treat that as a connection
//! failure rather than trying to resynchronize.

use super::types::Envelope;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one frame. Environment snapshots are the largest messages;
/// anything beyond this indicates a corrupted length prefix.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// Writes one envelope as a length-prefixed frame and flushes.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = bincode::serialize(envelope).context("failed to serialize envelope")?;
    let len = u32::try_from(body.len()).context("envelope exceeds u32 frame length")?;
    anyhow::ensure!(
        len <= MAX_FRAME_BYTES,
        "envelope of {} bytes exceeds frame cap",
        len
    );

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

/// Reads one envelope from the stream.
///
/// An error (EOF included) means the connection is unusable; there is no
/// recovery short of reconnecting.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .context("connection closed while reading frame length")?;

    let len = u32::from_be_bytes(len_bytes);
    anyhow::ensure!(
        len <= MAX_FRAME_BYTES,
        "frame of {} bytes exceeds cap, stream corrupted",
        len
    );

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .context("connection closed mid-frame")?;

    bincode::deserialize(&body).context("failed to deserialize envelope")
}
