use super::*;
use crate::piece::Piece;

#[test]
fn buffer_cursor_arithmetic() {
    let mut buf = ProtocolBuffer::new();
    assert_eq!(buf.remaining(), 0);
    assert_eq!(buf.reserved_left(), BUFFER_CAPACITY);

    buf.write_u32(0x01020304);
    buf.write_u8(9);
    assert_eq!(buf.end(), 5);
    assert_eq!(buf.remaining(), 5);

    assert_eq!(buf.peek_u32(), 0x01020304);
    assert_eq!(buf.read_u32(), 0x01020304);
    assert_eq!(buf.read_u8(), 9);
    assert_eq!(buf.remaining(), 0);
    assert_eq!(buf.position(), 5);

    buf.reset();
    assert_eq!(buf.position(), 0);
    assert_eq!(buf.end(), 0);
}

#[test]
fn buffer_move_unused_relocates_tail() {
    let mut buf = ProtocolBuffer::new();
    buf.write_slice(&[1, 2, 3, 4, 5, 6]);
    buf.move_position(4);

    buf.move_unused();
    assert_eq!(buf.position(), 0);
    assert_eq!(buf.end(), 2);
    assert_eq!(buf.unread(), &[5, 6]);
}

#[test]
fn buffer_append_window() {
    let mut buf = ProtocolBuffer::new();
    buf.space_mut()[..3].copy_from_slice(&[7, 8, 9]);
    buf.advance_end(3);
    assert_eq!(buf.unread(), &[7, 8, 9]);
}

#[test]
fn message_framing_bytes() {
    let mut buf = ProtocolBuffer::new();
    Message::KeepAlive.encode(&mut buf);
    assert_eq!(buf.unread(), &[0, 0, 0, 0]);

    let mut buf = ProtocolBuffer::new();
    Message::Unchoke.encode(&mut buf);
    assert_eq!(buf.unread(), &[0, 0, 0, 1, 1]);

    let mut buf = ProtocolBuffer::new();
    Message::Have(2).encode(&mut buf);
    assert_eq!(buf.unread(), &[0, 0, 0, 5, 4, 0, 0, 0, 2]);

    let mut buf = ProtocolBuffer::new();
    let p = Piece::new(1, 0x4000, 0x4000);
    Message::Request(p).encode(&mut buf);
    assert_eq!(
        buf.unread(),
        &[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x40, 0]
    );
    assert_eq!(buf.remaining(), Message::Request(p).framed_len());

    // Piece header: length prefix covers the streamed body.
    let mut buf = ProtocolBuffer::new();
    Message::Piece(Piece::new(3, 0, 100)).encode(&mut buf);
    assert_eq!(buf.unread()[..4], 109u32.to_be_bytes());
    assert_eq!(buf.unread()[4], 7);

    // Bitfield header likewise.
    let mut buf = ProtocolBuffer::new();
    Message::Bitfield(13).encode(&mut buf);
    assert_eq!(buf.unread(), &[0, 0, 0, 14, 5]);
}

#[test]
fn message_id_round_trip() {
    for id in 0u8..=8 {
        assert_eq!(MessageId::from_u8(id).map(|m| m as u8), Some(id));
    }
    assert!(MessageId::from_u8(9).is_none());
    assert!(MessageId::from_u8(20).is_none());
}

#[test]
fn internal_error_is_one_way() {
    let mut read = ProtocolRead::new();
    read.set_state(ReadState::InternalError);
    read.set_state(ReadState::Idle);
    assert_eq!(read.state(), ReadState::InternalError);

    let mut write = ProtocolWrite::new();
    write.set_state(WriteState::InternalError);
    write.set_state(WriteState::Idle);
    assert_eq!(write.state(), WriteState::InternalError);
}

#[test]
fn directions_start_choked_and_uninterested() {
    let read = ProtocolRead::new();
    assert!(read.choked());
    assert!(!read.interested());

    let write = ProtocolWrite::new();
    assert!(write.choked());
    assert!(!write.interested());
}

#[test]
fn can_write_request_needs_space_and_idle() {
    let mut write = ProtocolWrite::new();
    assert!(write.can_write_request());

    // Fill the buffer to just below a request's worth of space.
    let free = write.buffer().reserved_left();
    let filler = vec![0u8; free - 16];
    write.buffer_mut().write_slice(&filler);
    assert!(!write.can_write_request());

    let mut write = ProtocolWrite::new();
    write.write_piece(Piece::new(0, 0, 64));
    assert_eq!(write.state(), WriteState::WritingPiece);
    assert!(!write.can_write_request());
}

#[test]
fn frame_queued_stops_at_body_message() {
    let mut write = ProtocolWrite::new();
    write.queue_message(Message::Unchoke);
    write.queue_message(Message::Bitfield(4));
    write.queue_message(Message::Have(1));

    write.frame_queued();

    assert_eq!(write.state(), WriteState::WritingBitfield);
    assert_eq!(write.queued().len(), 1, "have stays queued behind the body");
    // Unchoke plus the bitfield header are framed.
    assert_eq!(write.buffer().remaining(), 5 + 5);
    assert!(write.pending());
}
