//! Game Coordinator message envelope.
//!
//! GC messages travel as the payload of `ClientToGC`/`ClientFromGC`. A
//! protobuf GC message is `u32 LE msg|0x80000000`, `u32 LE header length`,
//! a `CMsgProtoBufHeader` and the body. Legacy messages carry an 18 byte
//! struct header (`u16` version, `u64` target job, `u64` source job).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;

use crate::common::error::{ProtocolError, ProtocolResult};
use crate::protocol::packets::{PacketDecode, PacketEncode, ProtoHeader, JOB_ID_NONE, PROTO_MASK};

const STRUCT_HEADER_LEN: usize = 18;

/// A decoded GC message.
#[derive(Debug, Clone)]
pub struct GcMessage {
    pub msg_type: u32,
    pub protobuf: bool,
    pub header: ProtoHeader,
    pub body: Bytes,
}

impl GcMessage {
    pub fn new(msg_type: u32, body: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            protobuf: true,
            header: ProtoHeader::default(),
            body: body.into(),
        }
    }

    pub fn from_message<M: Message>(msg_type: u32, message: &M) -> Self {
        Self::new(msg_type, message.encode_to_vec())
    }

    pub fn with_job_source(mut self, job_id: u64) -> Self {
        self.header.jobid_source = Some(job_id);
        self
    }

    #[cfg(test)]
    pub fn with_job_target(mut self, job_id: u64) -> Self {
        self.header.jobid_target = Some(job_id);
        self
    }

    /// Job this message answers, if any.
    pub fn target_job(&self) -> Option<u64> {
        self.header.target_job()
    }

    pub fn decode_body<M: Message + Default>(&self, message_name: &'static str) -> ProtocolResult<M> {
        M::decode(self.body.clone()).map_err(|source| ProtocolError::Decode {
            message_name,
            source,
        })
    }

    /// Serialize into the bytes carried by `ClientToGC`.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Parse the payload of a `ClientFromGC` message.
    pub fn from_payload(msg_type: u32, payload: &[u8]) -> ProtocolResult<Self> {
        let mut bytes = Bytes::copy_from_slice(payload);
        let message = Self::decode(&mut bytes)?;
        if message.msg_type != msg_type & !PROTO_MASK {
            return Err(ProtocolError::InvalidPacket {
                message: format!(
                    "GC envelope type {} does not match payload type {}",
                    msg_type & !PROTO_MASK,
                    message.msg_type
                ),
            });
        }
        Ok(message)
    }
}

impl PacketEncode for GcMessage {
    fn encode(&self, buf: &mut BytesMut) {
        let header = self.header.encode_to_vec();
        buf.reserve(8 + header.len() + self.body.len());
        buf.put_u32_le(self.msg_type | PROTO_MASK);
        buf.put_u32_le(header.len() as u32);
        buf.put_slice(&header);
        buf.put_slice(&self.body);
    }
}

impl PacketDecode for GcMessage {
    type Error = ProtocolError;

    fn decode(buf: &mut Bytes) -> Result<Self, Self::Error> {
        if buf.remaining() < 4 {
            return Err(ProtocolError::PacketTooShort {
                needed: 4,
                got: buf.remaining(),
            });
        }
        let raw = buf.get_u32_le();
        let msg_type = raw & !PROTO_MASK;

        if raw & PROTO_MASK == 0 {
            if buf.remaining() < STRUCT_HEADER_LEN {
                return Err(ProtocolError::PacketTooShort {
                    needed: STRUCT_HEADER_LEN,
                    got: buf.remaining(),
                });
            }
            let _version = buf.get_u16_le();
            let target = buf.get_u64_le();
            let source = buf.get_u64_le();
            let header = ProtoHeader {
                jobid_target: Some(target).filter(|&id| id != JOB_ID_NONE),
                jobid_source: Some(source).filter(|&id| id != JOB_ID_NONE),
                ..Default::default()
            };
            return Ok(GcMessage {
                msg_type,
                protobuf: false,
                header,
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

        Ok(GcMessage {
            msg_type,
            protobuf: true,
            header,
            body: buf.split_to(buf.remaining()),
        })
    }
}
