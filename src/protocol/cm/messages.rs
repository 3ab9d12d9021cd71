//! CM message bodies.

use prost::Message;

use crate::common::error::{ProtocolError, ProtocolResult};
use crate::protocol::cm::connector::MAX_FRAME_LEN;
use crate::protocol::packets::{emsg, Packet, PacketDecode};

/// Protocol version announced in the logon message.
pub const PROTOCOL_VERSION: u32 = 65580;

#[derive(Clone, PartialEq, Message)]
pub struct ClientLogon {
    #[prost(uint32, optional, tag = "1")]
    pub protocol_version: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub client_os_type: Option<u32>,
    #[prost(string, optional, tag = "6")]
    pub client_language: Option<String>,
    #[prost(string, optional, tag = "50")]
    pub account_name: Option<String>,
    #[prost(string, optional, tag = "51")]
    pub password: Option<String>,
    #[prost(bool, optional, tag = "52")]
    pub should_remember_password: Option<bool>,
    #[prost(string, optional, tag = "60")]
    pub login_key: Option<String>,
    #[prost(string, optional, tag = "62")]
    pub machine_name: Option<String>,
    #[prost(string, optional, tag = "84")]
    pub auth_code: Option<String>,
    #[prost(string, optional, tag = "85")]
    pub two_factor_code: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientLogonResponse {
    #[prost(int32, optional, tag = "1")]
    pub eresult: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub out_of_game_heartbeat_seconds: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub in_game_heartbeat_seconds: Option<i32>,
    #[prost(uint32, optional, tag = "7")]
    pub cell_id: Option<u32>,
    #[prost(fixed64, optional, tag = "20")]
    pub client_supplied_steamid: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientLoggedOff {
    #[prost(int32, optional, tag = "1")]
    pub eresult: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientLogOff {}

#[derive(Clone, PartialEq, Message)]
pub struct ClientHeartBeat {}

#[derive(Clone, PartialEq, Message)]
pub struct ClientNewLoginKey {
    #[prost(uint32, optional, tag = "1")]
    pub unique_id: Option<u32>,
    #[prost(string, optional, tag = "2")]
    pub login_key: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientNewLoginKeyAccepted {
    #[prost(uint32, optional, tag = "1")]
    pub unique_id: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GamePlayed {
    #[prost(fixed64, optional, tag = "2")]
    pub game_id: Option<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientGamesPlayed {
    #[prost(message, repeated, tag = "1")]
    pub games_played: Vec<GamePlayed>,
}

/// Envelope for ClientToGC / ClientFromGC.
#[derive(Clone, PartialEq, Message)]
pub struct GcClientMessage {
    #[prost(uint32, optional, tag = "1")]
    pub appid: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub msgtype: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub payload: Option<Vec<u8>>,
    #[prost(fixed64, optional, tag = "4")]
    pub steamid: Option<u64>,
    #[prost(string, optional, tag = "5")]
    pub gcname: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientRichPresenceRequest {
    #[prost(fixed64, repeated, packed = "false", tag = "1")]
    pub steamid_request: Vec<u64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct RichPresenceEntry {
    #[prost(fixed64, optional, tag = "1")]
    pub steamid_user: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub rich_presence_kv: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientRichPresenceInfo {
    #[prost(message, repeated, tag = "1")]
    pub rich_presence: Vec<RichPresenceEntry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientAddFriend {
    #[prost(fixed64, optional, tag = "1")]
    pub steamid_to_add: Option<u64>,
    #[prost(string, optional, tag = "2")]
    pub accountname_or_email_to_add: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientAddFriendResponse {
    #[prost(int32, optional, tag = "1")]
    pub eresult: Option<i32>,
    #[prost(fixed64, optional, tag = "2")]
    pub steam_id_added: Option<u64>,
    #[prost(string, optional, tag = "3")]
    pub persona_name_added: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FriendEntry {
    #[prost(fixed64, optional, tag = "1")]
    pub ulfriendid: Option<u64>,
    #[prost(uint32, optional, tag = "2")]
    pub efriendrelationship: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientFriendsList {
    #[prost(bool, optional, tag = "1")]
    pub bincremental: Option<bool>,
    #[prost(message, repeated, tag = "2")]
    pub friends: Vec<FriendEntry>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CreateFriendInviteTokenRequest {
    #[prost(uint32, optional, tag = "1")]
    pub invite_limit: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub invite_duration: Option<u32>,
    #[prost(string, optional, tag = "3")]
    pub invite_note: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CreateFriendInviteTokenResponse {
    #[prost(string, optional, tag = "1")]
    pub invite_token: Option<String>,
    #[prost(uint64, optional, tag = "2")]
    pub invite_limit: Option<u64>,
    #[prost(uint64, optional, tag = "3")]
    pub invite_duration: Option<u64>,
    #[prost(fixed32, optional, tag = "4")]
    pub time_created: Option<u32>,
    #[prost(bool, optional, tag = "5")]
    pub valid: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Multi {
    #[prost(uint32, optional, tag = "1")]
    pub size_unzipped: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub message_body: Option<Vec<u8>>,
}

/// Split a `Multi` packet into the packets it carries.
///
/// The body is gzip-compressed when `size_unzipped` is non-zero. Inner
/// packets are each prefixed with a `u32 LE` length.
pub fn unpack_multi(packet: &Packet) -> ProtocolResult<Vec<Packet>> {
    use bytes::{Buf, Bytes};
    use std::io::Read;

    debug_assert_eq!(packet.emsg, emsg::MULTI);
    let multi: Multi = packet.decode_body("CMsgMulti")?;
    let body = multi.message_body.unwrap_or_default();

    let payload = match multi.size_unzipped.unwrap_or(0) {
        0 => body,
        size if size as usize > MAX_FRAME_LEN => {
            return Err(ProtocolError::InvalidPacket {
                message: format!("Multi claims {} unzipped bytes", size),
            });
        }
        size => {
            let mut out = Vec::with_capacity(size as usize);
            // One byte past the claim is enough to detect an oversized body
            flate2::read::GzDecoder::new(body.as_slice())
                .take(size as u64 + 1)
                .read_to_end(&mut out)?;
            if out.len() != size as usize {
                return Err(ProtocolError::InvalidPacket {
                    message: format!("Multi unzipped to {} bytes, expected {}", out.len(), size),
                });
            }
            out
        }
    };

    let mut buf = Bytes::from(payload);
    let mut packets = Vec::new();
    while buf.has_remaining() {
        if buf.remaining() < 4 {
            return Err(ProtocolError::PacketTooShort {
                needed: 4,
                got: buf.remaining(),
            });
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(ProtocolError::PacketTooShort {
                needed: len,
                got: buf.remaining(),
            });
        }
        let mut inner = buf.split_to(len);
        packets.push(Packet::decode(&mut inner)?);
    }

    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::PacketEncode;
    use bytes::{BufMut, BytesMut};
    use std::io::Write;

    fn inner_payload(packets: &[Packet]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for packet in packets {
            let mut one = BytesMut::new();
            packet.encode(&mut one);
            out.put_u32_le(one.len() as u32);
            out.put_slice(&one);
        }
        out.to_vec()
    }

    #[test]
    fn test_unpack_plain_multi() {
        let body = inner_payload(&[Packet::new(767, vec![1]), Packet::new(8104, vec![2, 3])]);
        let multi = Multi {
            size_unzipped: Some(0),
            message_body: Some(body),
        };
        let packets = unpack_multi(&Packet::from_message(emsg::MULTI, &multi)).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].emsg, 767);
        assert_eq!(packets[1].body.as_ref(), &[2, 3]);
    }

    #[test]
    fn test_unpack_gzip_multi() {
        let body = inner_payload(&[Packet::new(757, Vec::new())]);
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&body).unwrap();
        let compressed = encoder.finish().unwrap();

        let multi = Multi {
            size_unzipped: Some(body.len() as u32),
            message_body: Some(compressed),
        };
        let packets = unpack_multi(&Packet::from_message(emsg::MULTI, &multi)).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].emsg, 757);
    }

    #[test]
    fn test_unpack_gzip_multi_size_is_bounded() {
        let body = vec![0u8; 4096];
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&body).unwrap();
        let compressed = encoder.finish().unwrap();

        let understated = Multi {
            size_unzipped: Some(16),
            message_body: Some(compressed.clone()),
        };
        assert!(matches!(
            unpack_multi(&Packet::from_message(emsg::MULTI, &understated)),
            Err(ProtocolError::InvalidPacket { .. })
        ));

        let oversized = Multi {
            size_unzipped: Some(MAX_FRAME_LEN as u32 + 1),
            message_body: Some(compressed),
        };
        assert!(matches!(
            unpack_multi(&Packet::from_message(emsg::MULTI, &oversized)),
            Err(ProtocolError::InvalidPacket { .. })
        ));
    }

    #[test]
    fn test_unpack_truncated_multi_fails() {
        let mut body = inner_payload(&[Packet::new(767, vec![1, 2, 3])]);
        body.truncate(body.len() - 1);
        let multi = Multi {
            size_unzipped: None,
            message_body: Some(body),
        };
        assert!(unpack_multi(&Packet::from_message(emsg::MULTI, &multi)).is_err());
    }
}
