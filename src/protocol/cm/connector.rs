//! Connection manager TCP connection and codec.

use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use rand::seq::SliceRandom;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{info, warn};

use crate::common::error::{ConnectionError, ProtocolError};
use crate::protocol::packets::{Packet, PacketDecode, PacketEncode};

/// "VT01" read as a little-endian u32.
pub const FRAME_MAGIC: u32 = 0x3130_5456;

/// Frames above this size are treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Codec for CM frames: `u32 LE length`, `"VT01"`, packet bytes.
#[derive(Debug, Default)]
pub struct CmPacketCodec;

impl CmPacketCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for CmPacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 8 {
            return Ok(None);
        }

        let frame_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        let magic = u32::from_le_bytes([src[4], src[5], src[6], src[7]]);

        if magic != FRAME_MAGIC {
            return Err(ProtocolError::BadMagic { magic });
        }
        if frame_len > MAX_FRAME_LEN {
            return Err(ProtocolError::InvalidPacket {
                message: format!("frame of {} bytes exceeds limit", frame_len),
            });
        }

        if src.len() < 8 + frame_len {
            src.reserve(8 + frame_len - src.len());
            return Ok(None);
        }

        src.advance(8);
        let mut frame = src.split_to(frame_len).freeze();
        Packet::decode(&mut frame).map(Some)
    }
}

impl Encoder<Packet> for CmPacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        item.encode(&mut body);

        dst.reserve(8 + body.len());
        dst.put_u32_le(body.len() as u32);
        dst.put_u32_le(FRAME_MAGIC);
        dst.put_slice(&body);
        Ok(())
    }
}

/// A framed CM connection.
pub type CmConnection<S> = Framed<S, CmPacketCodec>;

/// Create a new CM connection from a stream.
pub fn new_cm_connection<S: AsyncRead + AsyncWrite>(stream: S) -> CmConnection<S> {
    Framed::new(stream, CmPacketCodec::new())
}

/// Connect to one of the configured CM endpoints.
///
/// Endpoints are tried in shuffled order; the first that accepts a TCP
/// connection within `timeout` wins.
pub async fn connect_to_cm(
    servers: &[String],
    timeout: Duration,
) -> Result<(TcpStream, String), ConnectionError> {
    if servers.is_empty() {
        return Err(ConnectionError::NoEndpoints);
    }

    let mut order = servers.to_vec();
    order.shuffle(&mut rand::thread_rng());

    let mut last_error = ConnectionError::NoEndpoints;
    for addr in order {
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                info!(cm = %addr, "Connected to connection manager");
                return Ok((stream, addr));
            }
            Ok(Err(e)) => {
                warn!(cm = %addr, error = %e, "Connection manager refused connection");
                last_error = ConnectionError::ConnectFailed { addr, source: e };
            }
            Err(_) => {
                warn!(cm = %addr, "Connection manager connect timed out");
                last_error = ConnectionError::Timeout;
            }
        }
    }

    Err(last_error)
}
