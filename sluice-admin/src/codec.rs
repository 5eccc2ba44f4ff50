//! Length-prefixed protobuf framing.

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::AdminError;

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Read one frame body. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, AdminError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(AdminError::Protocol(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), AdminError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| AdminError::Protocol(format!("frame of {} bytes is too large", body.len())))?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode and send a message.
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<(), AdminError>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    write_frame(writer, &message.encode_to_vec()).await
}

/// Receive and decode a message. `Ok(None)` on clean end of stream.
pub async fn read_message<R, M>(reader: &mut R) -> Result<Option<M>, AdminError>
where
    R: AsyncRead + Unpin,
    M: Message + Default,
{
    match read_frame(reader).await? {
        Some(body) => Ok(Some(M::decode(body.as_slice())?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::AdminResponse;

    #[tokio::test]
    async fn test_frames_are_big_endian_length_prefixed() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abc").await.unwrap();
        assert_eq!(buf, [0, 0, 0, 3, b'a', b'b', b'c']);

        let mut reader = buf.as_slice();
        assert_eq!(read_frame(&mut reader).await.unwrap(), Some(b"abc".to_vec()));
        assert_eq!(read_frame(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let header = ((MAX_FRAME_LEN as u32) + 1).to_be_bytes();
        let mut reader = &header[..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(AdminError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_io_error() {
        let bytes = [0, 0, 0, 9, 1, 2];
        let mut reader = &bytes[..];
        assert!(matches!(read_frame(&mut reader).await, Err(AdminError::Io(_))));
    }

    #[tokio::test]
    async fn test_message_helpers() {
        let mut buf = Vec::new();
        write_message(&mut buf, &AdminResponse::ok("done")).await.unwrap();

        let mut reader = buf.as_slice();
        let decoded: AdminResponse = read_message(&mut reader).await.unwrap().unwrap();
        assert!(decoded.ok);
        assert_eq!(decoded.message, "done");
    }
}
