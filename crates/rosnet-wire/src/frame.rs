//! Length-prefixed frames for topic messages and service calls.
//!
//! Topic messages and service requests: `[u32 LE len][payload]`.
//! Service responses: `[u8 status][u32 LE len][payload]`, status 1 for
//! success and 0 for an application error whose payload is UTF-8 text.

use crate::error::WireError;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum single frame size (256 MB).
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

const STATUS_OK: u8 = 1;
const STATUS_ERROR: u8 = 0;

/// Encode a payload as one frame.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    check_size(payload.len())?;
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. EOF before the first length byte is a clean close.
pub async fn read_frame<R>(reader: &mut R) -> Result<Bytes, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }
    read_body(reader, u32::from_le_bytes(len_buf)).await
}

async fn read_body<R>(reader: &mut R, len: u32) -> Result<Bytes, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if len > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::MalformedFrame(format!("stream ended inside a {len} byte frame"))
        } else {
            WireError::Io(e)
        }
    })?;
    Ok(Bytes::from(body))
}

fn check_size(len: usize) -> Result<(), WireError> {
    if len > MAX_FRAME_SIZE as usize {
        return Err(WireError::FrameTooLarge {
            size: u32::try_from(len).unwrap_or(u32::MAX),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(())
}

/// One service response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponseFrame {
    pub ok: bool,
    pub payload: Bytes,
}

impl ServiceResponseFrame {
    pub fn success(payload: impl Into<Bytes>) -> Self {
        Self {
            ok: true,
            payload: payload.into(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            ok: false,
            payload: Bytes::copy_from_slice(message.as_bytes()),
        }
    }

    /// The payload of an error frame as text.
    pub fn error_message(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.payload.len());
        buf.put_u8(if self.ok { STATUS_OK } else { STATUS_ERROR });
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

pub async fn write_service_response<W>(
    writer: &mut W,
    response: &ServiceResponseFrame,
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    check_size(response.payload.len())?;
    writer.write_all(&response.encode()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_service_response<R>(reader: &mut R) -> Result<ServiceResponseFrame, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let status = match reader.read_u8().await {
        Ok(status) => status,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    };
    let ok = match status {
        STATUS_OK => true,
        STATUS_ERROR => false,
        other => {
            return Err(WireError::MalformedFrame(format!(
                "unknown response status byte {other}"
            )))
        }
    };
    let len = reader.read_u32_le().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::MalformedFrame("stream ended inside a response header".to_string())
        } else {
            WireError::Io(e)
        }
    })?;
    let payload = read_body(reader, len).await?;
    Ok(ServiceResponseFrame { ok, payload })
}
