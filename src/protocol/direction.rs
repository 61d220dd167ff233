use std::collections::VecDeque;

use super::buffer::ProtocolBuffer;
use super::message::Message;
use crate::piece::Piece;

/// Phases of the read-direction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Idle,
    /// A length-prefixed message is partially buffered.
    ReadingMessage,
    /// Streaming a bitfield body into the peer's bitfield.
    ReadingBitfield,
    /// Streaming a block body into the download chunk.
    ReadingPiece,
    /// Draining and discarding a block body we no longer want.
    SkippingPiece,
    /// Terminal; the connection must be torn down.
    InternalError,
}

/// Phases of the write-direction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Idle,
    /// Streaming our bitfield body.
    WritingBitfield,
    /// Streaming a block body from the upload chunk.
    WritingPiece,
    /// Terminal; the connection must be torn down.
    InternalError,
}

/// Read-direction state: framing buffer, transfer position, and the peer's
/// choke/interest toward us.
///
/// `choked` means the peer has choked us; `interested` means the peer is
/// interested in our data.
pub struct ProtocolRead {
    state: ReadState,
    choked: bool,
    interested: bool,
    position: u32,
    buffer: ProtocolBuffer,
}

impl ProtocolRead {
    pub fn new() -> Self {
        Self {
            state: ReadState::Idle,
            choked: true,
            interested: false,
            position: 0,
            buffer: ProtocolBuffer::new(),
        }
    }

    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Transitions the phase. `InternalError` is one-way: once entered, no
    /// later transition leaves it.
    pub fn set_state(&mut self, state: ReadState) {
        if self.state != ReadState::InternalError {
            self.state = state;
        }
    }

    pub fn choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    pub fn interested(&self) -> bool {
        self.interested
    }

    pub fn set_interested(&mut self, interested: bool) {
        self.interested = interested;
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn adjust_position(&mut self, n: u32) {
        self.position += n;
    }

    pub fn set_position(&mut self, position: u32) {
        self.position = position;
    }

    pub fn buffer(&self) -> &ProtocolBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ProtocolBuffer {
        &mut self.buffer
    }
}

impl Default for ProtocolRead {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-direction state: framing buffer, transfer position, our
/// choke/interest toward the peer, and the outbound message queue.
///
/// `choked` means we choke the peer; `interested` means we want the peer's
/// data.
pub struct ProtocolWrite {
    state: WriteState,
    choked: bool,
    interested: bool,
    position: u32,
    buffer: ProtocolBuffer,
    queue: VecDeque<Message>,
}

impl ProtocolWrite {
    pub fn new() -> Self {
        Self {
            state: WriteState::Idle,
            choked: true,
            interested: false,
            position: 0,
            buffer: ProtocolBuffer::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    /// Transitions the phase. `InternalError` is one-way.
    pub fn set_state(&mut self, state: WriteState) {
        if self.state != WriteState::InternalError {
            self.state = state;
        }
    }

    pub fn choked(&self) -> bool {
        self.choked
    }

    pub fn set_choked(&mut self, choked: bool) {
        self.choked = choked;
    }

    pub fn interested(&self) -> bool {
        self.interested
    }

    pub fn set_interested(&mut self, interested: bool) {
        self.interested = interested;
    }

    pub fn position(&self) -> u32 {
        self.position
    }

    pub fn adjust_position(&mut self, n: u32) {
        self.position += n;
    }

    pub fn set_position(&mut self, position: u32) {
        self.position = position;
    }

    pub fn buffer(&self) -> &ProtocolBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut ProtocolBuffer {
        &mut self.buffer
    }

    /// Whether another request message can be framed right now.
    pub fn can_write_request(&self) -> bool {
        self.state == WriteState::Idle
            && self.buffer.reserved_left() >= Message::Request(Piece::default()).framed_len()
    }

    /// Frames a block request directly into the buffer.
    pub fn write_request(&mut self, p: Piece) {
        debug_assert!(self.can_write_request());
        Message::Request(p).encode(&mut self.buffer);
    }

    /// Frames a block header and enters the piece-body phase.
    pub fn write_piece(&mut self, p: Piece) {
        Message::Piece(p).encode(&mut self.buffer);
        self.position = 0;
        self.set_state(WriteState::WritingPiece);
    }

    /// Frames a bitfield header and enters the bitfield-body phase.
    pub fn write_bitfield(&mut self, size_bytes: u32) {
        Message::Bitfield(size_bytes).encode(&mut self.buffer);
        self.position = 0;
        self.set_state(WriteState::WritingBitfield);
    }

    /// Queues a typed message for framing on the next write event.
    pub fn queue_message(&mut self, message: Message) {
        self.queue.push_back(message);
    }

    pub fn queued(&self) -> &VecDeque<Message> {
        &self.queue
    }

    /// Frames queued messages into the buffer while space allows and the
    /// phase stays `Idle`. A `Piece` or `Bitfield` entry changes phase and
    /// stops the drain.
    pub fn frame_queued(&mut self) {
        while self.state == WriteState::Idle {
            let Some(front) = self.queue.front().copied() else {
                break;
            };
            if self.buffer.reserved_left() < front.framed_len() {
                break;
            }

            self.queue.pop_front();
            match front {
                Message::Piece(p) => self.write_piece(p),
                Message::Bitfield(n) => self.write_bitfield(n),
                other => other.encode(&mut self.buffer),
            }
        }
    }

    /// Whether anything remains to flush or frame.
    pub fn pending(&self) -> bool {
        self.buffer.remaining() > 0
            || !self.queue.is_empty()
            || matches!(
                self.state,
                WriteState::WritingBitfield | WriteState::WritingPiece
            )
    }
}

impl Default for ProtocolWrite {
    fn default() -> Self {
        Self::new()
    }
}
