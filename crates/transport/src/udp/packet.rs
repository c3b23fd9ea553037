//! Datagram framing of the UDP backend
//!
//! ```text
//! ┌────────────┬──────┐
//! │ magic      │ u16  │  0x5457
//! ├────────────┼──────┤
//! │ type       │ u8   │
//! ├────────────┼──────┤
//! │ body       │ ...  │  per type, see Packet
//! └────────────┴──────┘
//! ```
//!
//! Integers are big-endian. Every side numbers its own connections; the
//! `receiver` field carries the number the receiving side assigned, so it
//! can address its connection table directly.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tickwire_protocol::transport::ChannelHandle;

/// Leading bytes of every datagram
pub const PACKET_MAGIC: u16 = 0x5457;

/// Magic plus type byte
pub const PACKET_HEADER_SIZE: usize = 3;

/// Largest datagram the backend sends or accepts
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Largest payload a Data packet can carry
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM_SIZE - PACKET_HEADER_SIZE - 3;

const TYPE_CONNECT: u8 = 1;
const TYPE_ACCEPT: u8 = 2;
const TYPE_DATA: u8 = 3;
const TYPE_DISCONNECT: u8 = 4;
const TYPE_PING: u8 = 5;
const TYPE_PONG: u8 = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Datagram too short: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Bad magic: 0x{0:04x}")]
    BadMagic(u16),

    #[error("Unknown packet type: {0}")]
    UnknownType(u8),
}

/// One datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Opens a connection; `sender` is the initiator's connection id
    Connect { sender: u16, timestamp: u32 },

    /// Accepts a Connect; `sender` is the acceptor's connection id
    Accept {
        sender: u16,
        receiver: u16,
        timestamp: u32,
    },

    Data {
        receiver: u16,
        channel: ChannelHandle,
        payload: Bytes,
    },

    Disconnect { receiver: u16 },

    Ping { receiver: u16, timestamp: u32 },

    /// Answers a Ping; `echo` is the Ping's timestamp
    Pong {
        receiver: u16,
        echo: u32,
        timestamp: u32,
    },
}

impl Packet {
    /// Serializes the packet into a datagram
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_SIZE + self.body_len());
        buf.put_u16(PACKET_MAGIC);

        match self {
            Packet::Connect { sender, timestamp } => {
                buf.put_u8(TYPE_CONNECT);
                buf.put_u16(*sender);
                buf.put_u32(*timestamp);
            }
            Packet::Accept {
                sender,
                receiver,
                timestamp,
            } => {
                buf.put_u8(TYPE_ACCEPT);
                buf.put_u16(*sender);
                buf.put_u16(*receiver);
                buf.put_u32(*timestamp);
            }
            Packet::Data {
                receiver,
                channel,
                payload,
            } => {
                buf.put_u8(TYPE_DATA);
                buf.put_u16(*receiver);
                buf.put_u8(channel.0);
                buf.put_slice(payload);
            }
            Packet::Disconnect { receiver } => {
                buf.put_u8(TYPE_DISCONNECT);
                buf.put_u16(*receiver);
            }
            Packet::Ping {
                receiver,
                timestamp,
            } => {
                buf.put_u8(TYPE_PING);
                buf.put_u16(*receiver);
                buf.put_u32(*timestamp);
            }
            Packet::Pong {
                receiver,
                echo,
                timestamp,
            } => {
                buf.put_u8(TYPE_PONG);
                buf.put_u16(*receiver);
                buf.put_u32(*echo);
                buf.put_u32(*timestamp);
            }
        }

        buf.freeze()
    }

    fn body_len(&self) -> usize {
        match self {
            Packet::Connect { .. } => 6,
            Packet::Accept { .. } => 8,
            Packet::Data { payload, .. } => 3 + payload.len(),
            Packet::Disconnect { .. } => 2,
            Packet::Ping { .. } => 6,
            Packet::Pong { .. } => 10,
        }
    }

    /// Parses a datagram
    pub fn from_bytes(mut bytes: Bytes) -> Result<Self, PacketError> {
        ensure(&bytes, PACKET_HEADER_SIZE)?;
        let magic = bytes.get_u16();
        if magic != PACKET_MAGIC {
            return Err(PacketError::BadMagic(magic));
        }

        let packet = match bytes.get_u8() {
            TYPE_CONNECT => {
                ensure(&bytes, 6)?;
                Packet::Connect {
                    sender: bytes.get_u16(),
                    timestamp: bytes.get_u32(),
                }
            }
            TYPE_ACCEPT => {
                ensure(&bytes, 8)?;
                Packet::Accept {
                    sender: bytes.get_u16(),
                    receiver: bytes.get_u16(),
                    timestamp: bytes.get_u32(),
                }
            }
            TYPE_DATA => {
                ensure(&bytes, 3)?;
                let receiver = bytes.get_u16();
                let channel = ChannelHandle(bytes.get_u8());
                Packet::Data {
                    receiver,
                    channel,
                    payload: bytes,
                }
            }
            TYPE_DISCONNECT => {
                ensure(&bytes, 2)?;
                Packet::Disconnect {
                    receiver: bytes.get_u16(),
                }
            }
            TYPE_PING => {
                ensure(&bytes, 6)?;
                Packet::Ping {
                    receiver: bytes.get_u16(),
                    timestamp: bytes.get_u32(),
                }
            }
            TYPE_PONG => {
                ensure(&bytes, 10)?;
                Packet::Pong {
                    receiver: bytes.get_u16(),
                    echo: bytes.get_u32(),
                    timestamp: bytes.get_u32(),
                }
            }
            other => return Err(PacketError::UnknownType(other)),
        };

        Ok(packet)
    }
}

fn ensure(bytes: &Bytes, expected: usize) -> Result<(), PacketError> {
    if bytes.len() < expected {
        return Err(PacketError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_layout() {
        let packet = Packet::Data {
            receiver: 0x0102,
            channel: ChannelHandle(7),
            payload: Bytes::from_static(b"hi"),
        };
        let bytes = packet.to_bytes();
        assert_eq!(bytes.as_ref(), &[0x54, 0x57, 3, 0x01, 0x02, 7, b'h', b'i']);
        assert_eq!(Packet::from_bytes(bytes).unwrap(), packet);
    }

    #[test]
    fn test_control_packets() {
        let packets = [
            Packet::Connect {
                sender: 1,
                timestamp: 1000,
            },
            Packet::Accept {
                sender: 9,
                receiver: 1,
                timestamp: 2000,
            },
            Packet::Disconnect { receiver: 9 },
            Packet::Ping {
                receiver: 9,
                timestamp: 3000,
            },
            Packet::Pong {
                receiver: 1,
                echo: 3000,
                timestamp: 3100,
            },
        ];
        for packet in packets {
            let bytes = packet.to_bytes();
            assert_eq!(bytes.len(), PACKET_HEADER_SIZE + packet.body_len());
            assert_eq!(Packet::from_bytes(bytes).unwrap(), packet);
        }
    }

    #[test]
    fn test_empty_data_payload() {
        let packet = Packet::Data {
            receiver: 1,
            channel: ChannelHandle(0),
            payload: Bytes::new(),
        };
        assert_eq!(Packet::from_bytes(packet.to_bytes()).unwrap(), packet);
    }

    #[test]
    fn test_bad_magic() {
        let bytes = Bytes::from_static(&[0xDE, 0xAD, 1, 0, 1, 0, 0, 0, 0]);
        assert_eq!(Packet::from_bytes(bytes), Err(PacketError::BadMagic(0xDEAD)));
    }

    #[test]
    fn test_unknown_type() {
        let bytes = Bytes::from_static(&[0x54, 0x57, 42]);
        assert_eq!(Packet::from_bytes(bytes), Err(PacketError::UnknownType(42)));
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            Packet::from_bytes(Bytes::from_static(&[0x54])),
            Err(PacketError::Truncated {
                expected: 3,
                actual: 1
            })
        );
        assert_eq!(
            Packet::from_bytes(Bytes::from_static(&[0x54, 0x57, 1, 0, 1])),
            Err(PacketError::Truncated {
                expected: 6,
                actual: 2
            })
        );
    }
}
