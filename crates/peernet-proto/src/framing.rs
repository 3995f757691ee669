//! Message framing shared by all three wire protocols
//!
//! Every message travels as a 5-byte header (one format tag byte plus a
//! 4-byte little-endian body length) followed by the protobuf-encoded body.
//! A short read inside a frame means the counterpart closed mid-exchange; a
//! clean EOF at a frame boundary means the connection ended normally.

use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use peernet_core::{SimError, SimResult};

/// Frame format tag; the only format this protocol family defines.
pub const FRAME_TAG: u8 = 0x0D;

/// Header length: tag byte plus little-endian u32 body length.
pub const HEADER_LEN: usize = 5;

/// Maximum body size on the LOC protocol.
pub const MAX_LOC_BODY: usize = 1 << 20;

/// Maximum body size on the client protocols, sized for image payloads.
pub const MAX_CLIENT_BODY: usize = 20 << 20;

/// Write one framed message and flush.
pub async fn write_frame<W, M>(writer: &mut W, message: &M, max_body: usize) -> SimResult<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    let body = message.encode_to_vec();
    if body.len() > max_body {
        return Err(SimError::protocol(format!(
            "outgoing frame of {} bytes exceeds limit {max_body}",
            body.len()
        )));
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.push(FRAME_TAG);
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message body.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary. A bad tag, an
/// oversized length, or an EOF inside a frame is a protocol error.
pub async fn read_frame<R>(reader: &mut R, max_body: usize) -> SimResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if tag[0] != FRAME_TAG {
        return Err(SimError::protocol(format!(
            "unknown frame tag 0x{:02X}",
            tag[0]
        )));
    }

    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(truncated_frame)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > max_body {
        return Err(SimError::protocol(format!(
            "incoming frame of {len} bytes exceeds limit {max_body}"
        )));
    }

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(truncated_frame)?;
    Ok(Some(body))
}

/// Decode a frame body into a message.
pub fn decode<M: Message + Default>(body: &[u8]) -> SimResult<M> {
    M::decode(body).map_err(|e| SimError::protocol(format!("malformed message: {e}")))
}

fn truncated_frame(e: std::io::Error) -> SimError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SimError::protocol("counterpart closed mid-frame")
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::{loc_message, LocMessage, LocRequest};

    fn sample() -> LocMessage {
        LocMessage {
            id: 42,
            body: Some(loc_message::Body::Request(LocRequest { payload: None })),
        }
    }

    #[tokio::test]
    async fn frame_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_frame(&mut client, &sample(), MAX_LOC_BODY).await.unwrap();
        let body = read_frame(&mut server, MAX_LOC_BODY).await.unwrap().unwrap();
        let decoded: LocMessage = decode(&body).unwrap();
        assert_eq!(decoded, sample());
    }

    #[tokio::test]
    async fn clean_eof_returns_none() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_frame(&mut server, MAX_LOC_BODY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_frame_is_a_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[FRAME_TAG, 10, 0, 0]).await.unwrap();
        drop(client);
        let err = read_frame(&mut server, MAX_LOC_BODY).await.unwrap_err();
        assert!(matches!(err, SimError::Protocol { .. }));
    }

    #[tokio::test]
    async fn bad_tag_is_a_protocol_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0xFF, 0, 0, 0, 0]).await.unwrap();
        let err = read_frame(&mut server, MAX_LOC_BODY).await.unwrap_err();
        assert!(matches!(err, SimError::Protocol { .. }));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let mut header = vec![FRAME_TAG];
        header.extend_from_slice(&u32::MAX.to_le_bytes());
        client.write_all(&header).await.unwrap();
        let err = read_frame(&mut server, MAX_LOC_BODY).await.unwrap_err();
        assert!(matches!(err, SimError::Protocol { .. }));
    }
}
