use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::protocol::message::Request;

/// Upper bound on a single frame. Video frames are a few MB at most.
pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Write one frame: 4-byte big-endian length followed by the payload.
///
/// Header and payload go out in a single buffer so a partial write can never
/// leave the peer holding a header without its body.
pub async fn send_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_SIZE || payload.len() > u32::MAX as usize {
        return Err(Error::FrameTooLarge { len: payload.len(), max: MAX_FRAME_SIZE });
    }
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    writer.write_all(&buf).await.map_err(|e| Error::Io(e.to_string()))?;
    writer.flush().await.map_err(|e| Error::Io(e.to_string()))?;
    Ok(())
}

/// Read one frame. Returns `None` when the peer closes the stream, whether
/// that happens before the header or part way through the payload.
pub async fn recv_frame<R>(reader: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    if !read_exact_or_eof(reader, &mut header).await? {
        return Ok(None);
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge { len, max: MAX_FRAME_SIZE });
    }

    let mut payload = BytesMut::zeroed(len);
    if !read_exact_or_eof(reader, &mut payload).await? {
        return Ok(None);
    }
    tracing::trace!(len, "frame received");
    Ok(Some(payload.freeze()))
}

async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(Error::Io(e.to_string())),
    }
}

/// Framed TCP connection to a MalmoEnv command port.
///
/// Exactly one logical request is in flight at a time; callers must consume
/// reply frames in the order the peer produces them.
pub struct Transport<S = TcpStream> {
    stream: S,
    peer: String,
}

impl Transport<TcpStream> {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let peer = format!("{}:{}", host, port);
        let stream = TcpStream::connect((host, port)).await
            .map_err(|e| Error::Io(format!("connect {}: {}", peer, e)))?;
        stream.set_nodelay(true)
            .map_err(|e| Error::Io(e.to_string()))?;
        tracing::debug!(%peer, "connected");
        Ok(Self { stream, peer })
    }

    /// Connect and send the protocol greeting.
    pub async fn open(host: &str, port: u16) -> Result<Self> {
        let mut transport = Self::connect(host, port).await?;
        transport.request(&Request::Hello).await?;
        Ok(transport)
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S, peer: impl Into<String>) -> Self {
        Self { stream, peer: peer.into() }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send a raw frame.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        tracing::trace!(peer = %self.peer, len = payload.len(), "frame sent");
        send_frame(&mut self.stream, payload).await
    }

    /// Send a request tag as a single frame.
    pub async fn request(&mut self, request: &Request<'_>) -> Result<()> {
        self.send(request.encode().as_bytes()).await
    }

    /// Receive a frame, `None` on EOF.
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        recv_frame(&mut self.stream).await
    }

    /// Receive a frame that the exchange requires; EOF is an error here.
    pub async fn recv_required(&mut self, operation: &'static str) -> Result<Bytes> {
        self.recv().await?.ok_or(Error::Disconnected { operation })
    }

    /// Receive a frame and decode it as UTF-8 text.
    pub async fn recv_string(&mut self, operation: &'static str) -> Result<String> {
        let bytes = self.recv_required(operation).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Io(format!("invalid UTF-8 in {} reply", operation)))
    }

    pub async fn shutdown(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_send_frame_prefixes_big_endian_length() {
        let mut mock = Builder::new()
            .write(&[0x00, 0x00, 0x00, 0x07, b'<', b'P', b'e', b'e', b'k', b'/', b'>'])
            .build();
        send_frame(&mut mock, b"<Peek/>").await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_frame_reassembles_split_reads() {
        let mut mock = Builder::new()
            .read(&[0x00, 0x00])
            .read(&[0x00, 0x05, b'h', b'e'])
            .read(b"llo")
            .build();
        let frame = recv_frame(&mut mock).await.unwrap().unwrap();
        assert_eq!(&frame[..], b"hello");
    }

    #[tokio::test]
    async fn test_recv_frame_empty_payload() {
        let mut mock = Builder::new().read(&[0, 0, 0, 0]).build();
        let frame = recv_frame(&mut mock).await.unwrap().unwrap();
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn test_recv_frame_eof_is_none() {
        let mut mock = Builder::new().build();
        assert!(recv_frame(&mut mock).await.unwrap().is_none());

        let mut truncated = Builder::new().read(&[0, 0, 0, 9, 1, 2]).build();
        assert!(recv_frame(&mut truncated).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recv_frame_rejects_oversized_header() {
        let mut mock = Builder::new().read(&[0xFF, 0xFF, 0xFF, 0xFF]).build();
        let err = recv_frame(&mut mock).await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_transport_recv_required_reports_disconnect() {
        let mock = Builder::new().build();
        let mut transport = Transport::from_stream(mock, "mock");
        let err = transport.recv_required("peek").await.unwrap_err();
        assert!(matches!(err, Error::Disconnected { operation: "peek" }));
        assert!(err.is_connection());
    }
}
