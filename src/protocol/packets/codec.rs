//! Packet encoding and decoding traits.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;

use crate::common::error::{ProtocolError, ProtocolResult};
use crate::common::types::EResult;

/// High bit of the message type marks a protobuf-framed message.
pub const PROTO_MASK: u32 = 0x8000_0000;

/// "No job" sentinel used by Steam for job id fields.
pub const JOB_ID_NONE: u64 = u64::MAX;

/// Protobuf message header shared by CM and GC messages.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoHeader {
    #[prost(fixed64, optional, tag = "1")]
    pub steamid: Option<u64>,
    #[prost(int32, optional, tag = "2")]
    pub client_sessionid: Option<i32>,
    #[prost(uint32, optional, tag = "3")]
    pub routing_appid: Option<u32>,
    #[prost(fixed64, optional, tag = "10")]
    pub jobid_source: Option<u64>,
    #[prost(fixed64, optional, tag = "11")]
    pub jobid_target: Option<u64>,
    #[prost(string, optional, tag = "12")]
    pub target_job_name: Option<String>,
    #[prost(int32, optional, tag = "13")]
    pub eresult: Option<i32>,
    #[prost(string, optional, tag = "14")]
    pub error_message: Option<String>,
}

impl ProtoHeader {
    /// Target job id, if the message answers a request.
    pub fn target_job(&self) -> Option<u64> {
        self.jobid_target.filter(|&id| id != JOB_ID_NONE)
    }

    /// Result code of the message. Absent means success.
    pub fn result(&self) -> EResult {
        self.eresult.map(EResult).unwrap_or(EResult::OK)
    }
}

/// A Steam CM packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub emsg: u32,
    /// False for legacy struct-framed messages (header left empty).
    pub protobuf: bool,
    pub header: ProtoHeader,
    pub body: Bytes,
}

impl Packet {
    /// Create a new protobuf packet with an empty header.
    pub fn new(emsg: u32, body: impl Into<Bytes>) -> Self {
        Self {
            emsg,
            protobuf: true,
            header: ProtoHeader::default(),
            body: body.into(),
        }
    }

    /// Create a packet from a protobuf message body.
    pub fn from_message<M: Message>(emsg: u32, message: &M) -> Self {
        Self::new(emsg, message.encode_to_vec())
    }

    pub fn with_job_source(mut self, job_id: u64) -> Self {
        self.header.jobid_source = Some(job_id);
        self
    }

    pub fn with_routing_app(mut self, app_id: u32) -> Self {
        self.header.routing_appid = Some(app_id);
        self
    }

    pub fn with_target_job_name(mut self, name: &str) -> Self {
        self.header.target_job_name = Some(name.to_string());
        self
    }

    pub fn with_session(mut self, steam_id: u64, session_id: i32) -> Self {
        self.header.steamid = Some(steam_id);
        self.header.client_sessionid = Some(session_id);
        self
    }

    /// Decode the body as the given protobuf message.
    pub fn decode_body<M: Message + Default>(&self, message_name: &'static str) -> ProtocolResult<M> {
        M::decode(self.body.clone()).map_err(|source| ProtocolError::Decode {
            message_name,
            source,
        })
    }
}

/// Trait for types that can be encoded into packet payload.
pub trait PacketEncode {
    fn encode(&self, buf: &mut BytesMut);
}

/// Trait for types that can be decoded from packet payload.
pub trait PacketDecode: Sized {
    type Error;
    fn decode(buf: &mut Bytes) -> Result<Self, Self::Error>;
}

impl PacketEncode for Packet {
    fn encode(&self, buf: &mut BytesMut) {
        let header = self.header.encode_to_vec();
        buf.reserve(8 + header.len() + self.body.len());
        buf.put_u32_le(self.emsg | PROTO_MASK);
        buf.put_u32_le(header.len() as u32);
        buf.put_slice(&header);
        buf.put_slice(&self.body);
    }
}

impl PacketDecode for Packet {
    type Error = ProtocolError;

    fn decode(buf: &mut Bytes) -> Result<Self, Self::Error> {
        if buf.remaining() < 4 {
            return Err(ProtocolError::PacketTooShort {
                needed: 4,
                got: buf.remaining(),
            });
        }

        let raw = buf.get_u32_le();
        let emsg = raw & !PROTO_MASK;

        if raw & PROTO_MASK == 0 {
            // Struct-framed messages are not used by the bridge; keep the raw bytes.
            return Ok(Packet {
                emsg,
                protobuf: false,
                header: ProtoHeader::default(),
                body: buf.split_to(buf.remaining()),
            });
        }

        if buf.remaining() < 4 {
            return Err(ProtocolError::PacketTooShort {
                needed: 4,
                got: buf.remaining(),
            });
        }
        let header_len = buf.get_u32_le() as usize;
        if buf.remaining() < header_len {
            return Err(ProtocolError::PacketTooShort {
                needed: header_len,
                got: buf.remaining(),
            });
        }

        let header = ProtoHeader::decode(buf.split_to(header_len)).map_err(|source| {
            ProtocolError::Decode {
                message_name: "CMsgProtoBufHeader",
                source,
            }
        })?;

        Ok(Packet {
            emsg,
            protobuf: true,
            header,
            body: buf.split_to(buf.remaining()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_layout() {
        let packet = Packet::new(5514, vec![0xAA, 0xBB]).with_job_source(7);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf);

        assert_eq!(&buf[..4], &(5514u32 | PROTO_MASK).to_le_bytes());
        let header_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        assert_eq!(buf.len(), 8 + header_len + 2);
        assert_eq!(&buf[buf.len() - 2..], &[0xAA, 0xBB]);

        let mut bytes = buf.freeze();
        let decoded = Packet::decode(&mut bytes).unwrap();
        assert_eq!(decoded.emsg, 5514);
        assert!(decoded.protobuf);
        assert_eq!(decoded.header.jobid_source, Some(7));
        assert_eq!(decoded.body.as_ref(), &[0xAA, 0xBB]);
    }

    #[test]
    fn test_struct_framed_packet_keeps_raw_body() {
        let mut bytes = Bytes::from_static(&[0x17, 0x05, 0x00, 0x00, 0x01, 0x02]);
        let decoded = Packet::decode(&mut bytes).unwrap();
        assert_eq!(decoded.emsg, 0x0517);
        assert!(!decoded.protobuf);
        assert_eq!(decoded.body.as_ref(), &[0x01, 0x02]);
    }

    #[test]
    fn test_truncated_header_fails() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(751 | PROTO_MASK);
        buf.put_u32_le(32);
        buf.put_slice(&[0u8; 4]);
        let mut bytes = buf.freeze();
        assert!(matches!(
            Packet::decode(&mut bytes),
            Err(ProtocolError::PacketTooShort { needed: 32, got: 4 })
        ));
    }

    #[test]
    fn test_header_helpers() {
        let mut header = ProtoHeader::default();
        assert_eq!(header.target_job(), None);
        assert!(header.result().is_ok());

        header.jobid_target = Some(JOB_ID_NONE);
        assert_eq!(header.target_job(), None);

        header.jobid_target = Some(42);
        header.eresult = Some(15);
        assert_eq!(header.target_job(), Some(42));
        assert_eq!(header.result(), EResult::ACCESS_DENIED);
    }
}
