use super::buffer::ProtocolBuffer;
use crate::piece::Piece;

/// Wire message ids of the peer protocol subset the engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl MessageId {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageId::Choke),
            1 => Some(MessageId::Unchoke),
            2 => Some(MessageId::Interested),
            3 => Some(MessageId::NotInterested),
            4 => Some(MessageId::Have),
            5 => Some(MessageId::Bitfield),
            6 => Some(MessageId::Request),
            7 => Some(MessageId::Piece),
            8 => Some(MessageId::Cancel),
            _ => None,
        }
    }
}

/// A typed outbound message awaiting framing.
///
/// `Bitfield` and `Piece` frame only their headers; the bodies are streamed
/// from the content bitfield and the chunk store respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    /// Carries the bitfield byte count for the length prefix.
    Bitfield(u32),
    Request(Piece),
    Cancel(Piece),
    /// Carries the block descriptor for the header.
    Piece(Piece),
}

impl Message {
    /// Bytes this message places into the framing buffer.
    pub fn framed_len(&self) -> usize {
        match self {
            Message::KeepAlive => 4,
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => 5,
            Message::Have(_) => 9,
            Message::Bitfield(_) => 5,
            Message::Request(_) | Message::Cancel(_) => 17,
            Message::Piece(_) => 13,
        }
    }

    /// Frames the message into `buf`. The caller guarantees space for
    /// [`Message::framed_len`] bytes.
    pub fn encode(&self, buf: &mut ProtocolBuffer) {
        match *self {
            Message::KeepAlive => buf.write_u32(0),
            Message::Choke => Self::control(buf, MessageId::Choke),
            Message::Unchoke => Self::control(buf, MessageId::Unchoke),
            Message::Interested => Self::control(buf, MessageId::Interested),
            Message::NotInterested => Self::control(buf, MessageId::NotInterested),
            Message::Have(index) => {
                buf.write_u32(5);
                buf.write_u8(MessageId::Have as u8);
                buf.write_u32(index);
            }
            Message::Bitfield(size_bytes) => {
                buf.write_u32(1 + size_bytes);
                buf.write_u8(MessageId::Bitfield as u8);
            }
            Message::Request(p) => Self::block(buf, MessageId::Request, p),
            Message::Cancel(p) => Self::block(buf, MessageId::Cancel, p),
            Message::Piece(p) => {
                buf.write_u32(9 + p.length);
                buf.write_u8(MessageId::Piece as u8);
                buf.write_u32(p.index);
                buf.write_u32(p.offset);
            }
        }
    }

    fn control(buf: &mut ProtocolBuffer, id: MessageId) {
        buf.write_u32(1);
        buf.write_u8(id as u8);
    }

    fn block(buf: &mut ProtocolBuffer, id: MessageId, p: Piece) {
        buf.write_u32(13);
        buf.write_u8(id as u8);
        buf.write_u32(p.index);
        buf.write_u32(p.offset);
        buf.write_u32(p.length);
    }
}
