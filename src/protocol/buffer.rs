/// Capacity of one direction's framing buffer.
///
/// Holds at most one pending wire message; bitfield and block bodies are
/// streamed past the buffer, so control-message framing is all that has to
/// fit.
pub const BUFFER_CAPACITY: usize = 512;

/// Fixed-capacity scratch region with `{begin, position, end}` cursors.
///
/// Incoming bytes are appended at `end`; decoded bytes advance `position`.
/// The write path appends framed messages at `end` and flushes from
/// `position`.
pub struct ProtocolBuffer {
    data: [u8; BUFFER_CAPACITY],
    position: usize,
    end: usize,
}

impl ProtocolBuffer {
    pub fn new() -> Self {
        Self {
            data: [0; BUFFER_CAPACITY],
            position: 0,
            end: 0,
        }
    }

    /// Resets both cursors to the beginning.
    pub fn reset(&mut self) {
        self.position = 0;
        self.end = 0;
    }

    pub fn reset_position(&mut self) {
        self.position = 0;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn set_end(&mut self, end: usize) {
        debug_assert!(end <= BUFFER_CAPACITY);
        self.end = end;
    }

    /// Undecoded bytes between `position` and `end`.
    pub fn remaining(&self) -> usize {
        self.end - self.position
    }

    /// Free space past `end`.
    pub fn reserved_left(&self) -> usize {
        BUFFER_CAPACITY - self.end
    }

    pub fn move_position(&mut self, n: usize) {
        debug_assert!(self.position + n <= self.end);
        self.position += n;
    }

    /// The undecoded tail, for copying out or flushing to a socket.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.position..self.end]
    }

    /// Free region past `end`, for appending socket reads; follow with
    /// [`ProtocolBuffer::advance_end`].
    pub fn space_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    pub fn advance_end(&mut self, n: usize) {
        debug_assert!(self.end + n <= BUFFER_CAPACITY);
        self.end += n;
    }

    /// Relocates the undecoded tail to the front: `position` returns to 0
    /// and `end` becomes the tail length.
    pub fn move_unused(&mut self) {
        let remaining = self.remaining();
        self.data.copy_within(self.position..self.end, 0);
        self.position = 0;
        self.end = remaining;
    }

    pub fn read_u8(&mut self) -> u8 {
        debug_assert!(self.remaining() >= 1);
        let v = self.data[self.position];
        self.position += 1;
        v
    }

    pub fn read_u32(&mut self) -> u32 {
        debug_assert!(self.remaining() >= 4);
        let v = u32::from_be_bytes(
            self.data[self.position..self.position + 4]
                .try_into()
                .unwrap(),
        );
        self.position += 4;
        v
    }

    /// Reads the big-endian u32 at `position` without consuming it.
    pub fn peek_u32(&self) -> u32 {
        debug_assert!(self.remaining() >= 4);
        u32::from_be_bytes(
            self.data[self.position..self.position + 4]
                .try_into()
                .unwrap(),
        )
    }

    pub fn write_u8(&mut self, v: u8) {
        debug_assert!(self.reserved_left() >= 1);
        self.data[self.end] = v;
        self.end += 1;
    }

    pub fn write_u32(&mut self, v: u32) {
        debug_assert!(self.reserved_left() >= 4);
        self.data[self.end..self.end + 4].copy_from_slice(&v.to_be_bytes());
        self.end += 4;
    }

    pub fn write_slice(&mut self, bytes: &[u8]) {
        debug_assert!(self.reserved_left() >= bytes.len());
        self.data[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
    }
}

impl Default for ProtocolBuffer {
    fn default() -> Self {
        Self::new()
    }
}
