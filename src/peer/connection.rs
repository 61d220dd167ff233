use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::debug;

use super::chunks::PeerChunks;
use super::requests::RequestList;
use crate::chunk::ChunkHandle;
use crate::download::Download;
use crate::error::EngineError;
use crate::piece::{Piece, MAX_BLOCK_LEN};
use crate::poll::{PollSurface, Stream, Token};
use crate::protocol::{Message, MessageId, ProtocolRead, ProtocolWrite, ReadState, WriteState};
use crate::throttle::ThrottleNode;

/// Below this aggregate download rate, endgame requests go to stalled
/// peers as well.
const ENDGAME_RATE_FLOOR: u32 = 10 << 10;

/// Identity of the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub id: Option<[u8; 20]>,
}

impl PeerInfo {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, id: None }
    }

    pub fn is_valid(&self) -> bool {
        self.addr.port() != 0
    }
}

/// One peer connection: framing, choke/interest protocol, request
/// pipelining, and throttled chunk transfer in both directions.
///
/// Constructed detached; [`PeerConnection::initialize`] attaches it to a
/// download and the poll surface. Only an attached connection services
/// readiness events. Any fatal error escaping an event handler means the
/// owner must run [`PeerConnection::destroy`], which is idempotent.
pub struct PeerConnection {
    token: Token,
    sock: Option<Box<dyn Stream>>,
    peer: Option<PeerInfo>,

    down: ProtocolRead,
    up: ProtocolWrite,

    down_throttle: Option<ThrottleNode>,
    up_throttle: Option<ThrottleNode>,

    peer_chunks: PeerChunks,
    request_list: RequestList,
    send_list: VecDeque<Piece>,

    down_piece: Piece,
    up_piece: Piece,
    down_chunk: Option<ChunkHandle>,
    up_chunk: Option<ChunkHandle>,

    snubbed: bool,
    send_choked: bool,
    send_interested: bool,

    time_last_read: Instant,
    down_stall: u32,
}

impl PeerConnection {
    /// Creates a detached connection.
    pub fn new() -> Self {
        Self {
            token: Token(usize::MAX),
            sock: None,
            peer: None,
            down: ProtocolRead::new(),
            up: ProtocolWrite::new(),
            down_throttle: None,
            up_throttle: None,
            peer_chunks: PeerChunks::new(),
            request_list: RequestList::new(),
            send_list: VecDeque::new(),
            down_piece: Piece::default(),
            up_piece: Piece::default(),
            down_chunk: None,
            up_chunk: None,
            snubbed: false,
            send_choked: false,
            send_interested: false,
            time_last_read: Instant::now(),
            down_stall: 0,
        }
    }

    /// Attaches the connection: registers poll interest, sizes the peer
    /// bitfield, seeds both throttle nodes, and queues our bitfield as the
    /// first outbound message.
    pub fn initialize(
        &mut self,
        dl: &mut Download,
        peer: PeerInfo,
        token: Token,
        sock: Box<dyn Stream>,
        poll: &mut dyn PollSurface,
    ) -> Result<(), EngineError> {
        if self.sock.is_some() {
            return Err(EngineError::Internal("tried to re-initialize connection"));
        }
        if !peer.is_valid() {
            return Err(EngineError::Internal("connection initialized with bad peer info"));
        }

        self.token = token;
        self.sock = Some(sock);
        self.peer = Some(peer);

        self.peer_chunks.resize(dl.content.chunk_total());

        let up_token = token;
        self.up_throttle = Some(
            dl.up_throttle
                .insert(Box::new(move |poll| poll.insert_write(up_token))),
        );
        let down_token = token;
        self.down_throttle = Some(
            dl.down_throttle
                .insert(Box::new(move |poll| poll.insert_read(down_token))),
        );

        poll.open(token);
        poll.insert_read(token);
        poll.insert_write(token);
        poll.insert_error(token);

        self.up.buffer_mut().reset();
        self.down.buffer_mut().reset();
        self.down.set_state(ReadState::Idle);
        self.up.set_state(WriteState::Idle);

        self.up
            .queue_message(Message::Bitfield(dl.content.bitfield().size_bytes()));

        self.time_last_read = Instant::now();
        Ok(())
    }

    /// The teardown sequence. Idempotent; every path out of an attached
    /// connection ends here.
    pub fn destroy(&mut self, dl: &mut Download, poll: &mut dyn PollSurface) {
        if self.sock.is_none() {
            return;
        }

        dl.choke.disconnected(self.token);

        poll.remove_read(self.token);
        poll.remove_write(self.token);
        poll.remove_error(self.token);
        poll.close(self.token);

        self.sock = None;

        if self.request_list.is_downloading() {
            self.request_list.skip(dl.selector.as_mut());
        }

        self.up_chunk_release(dl);
        self.down_chunk_release(dl);

        self.request_list.cancel(dl.selector.as_mut());
        dl.selector.erase_peer_chunks(&self.peer_chunks);

        if let Some(node) = self.up_throttle.take() {
            dl.up_throttle.erase(&node);
        }
        if let Some(node) = self.down_throttle.take() {
            dl.down_throttle.erase(&node);
        }

        self.up.set_state(WriteState::InternalError);
        self.down.set_state(ReadState::InternalError);

        debug!(token = self.token.0, "peer connection torn down");
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_attached(&self) -> bool {
        self.sock.is_some()
    }

    pub fn peer(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    pub fn peer_chunks(&self) -> &PeerChunks {
        &self.peer_chunks
    }

    pub fn peer_chunks_mut(&mut self) -> &mut PeerChunks {
        &mut self.peer_chunks
    }

    pub fn request_list(&self) -> &RequestList {
        &self.request_list
    }

    pub fn send_queue(&self) -> &VecDeque<Piece> {
        &self.send_list
    }

    pub fn down(&self) -> &ProtocolRead {
        &self.down
    }

    pub fn down_mut(&mut self) -> &mut ProtocolRead {
        &mut self.down
    }

    pub fn up(&self) -> &ProtocolWrite {
        &self.up
    }

    pub fn up_mut(&mut self) -> &mut ProtocolWrite {
        &mut self.up
    }

    pub fn is_snubbed(&self) -> bool {
        self.snubbed
    }

    pub fn down_stall(&self) -> u32 {
        self.down_stall
    }

    /// Bumped by the owner's stall sweep when a request sits unanswered.
    pub fn set_down_stall(&mut self, stall: u32) {
        self.down_stall = stall;
    }

    pub fn time_last_read(&self) -> Instant {
        self.time_last_read
    }

    /// Whether the peer wants our data and deserves an unchoke slot.
    pub fn is_upload_wanted(&self) -> bool {
        self.down.interested() && !self.snubbed
    }

    /// Flags the peer as snubbed (or clears it), notifying the choke
    /// manager exactly once if upload wantedness changed.
    pub fn set_snubbed(&mut self, v: bool, dl: &mut Download) {
        if v == self.snubbed {
            return;
        }

        let was_wanted = self.is_upload_wanted();
        self.snubbed = v;

        if v {
            if was_wanted {
                dl.choke.set_not_interested(self.token);
            }
        } else if self.is_upload_wanted() {
            dl.choke.set_interested(self.token);
        }
    }

    /// Externally commanded choke flip. The new value must differ from the
    /// current write-side choke state.
    pub fn receive_choke(
        &mut self,
        v: bool,
        poll: &mut dyn PollSurface,
    ) -> Result<(), EngineError> {
        if v == self.up.choked() {
            return Err(EngineError::Internal("choke state already set to that value"));
        }

        self.write_insert_poll_safe(poll);
        self.send_choked = true;
        self.up.set_choked(v);
        Ok(())
    }

    /// The peer asked us for a block. Ignored while we choke it, when the
    /// block is already queued, or when it exceeds the block ceiling.
    pub fn read_request_piece(&mut self, p: Piece, poll: &mut dyn PollSurface) {
        if self.up.choked() || self.send_list.contains(&p) || p.length > MAX_BLOCK_LEN {
            return;
        }

        self.send_list.push_back(p);
        self.write_insert_poll_safe(poll);
    }

    /// The peer withdrew a block request.
    pub fn read_cancel_piece(&mut self, p: &Piece) {
        if let Some(at) = self.send_list.iter().position(|q| q == p) {
            self.send_list.remove(at);
        }
    }

    /// The peer declared interest in our data. A no-op when its bitfield is
    /// already fully set; such a peer cannot download from us.
    pub fn set_remote_interested(&mut self, dl: &mut Download) {
        if self.down.interested() || self.peer_chunks.bitfield().all_set() {
            return;
        }

        self.down.set_interested(true);

        if self.is_upload_wanted() {
            dl.choke.set_interested(self.token);
        }
    }

    /// The peer withdrew interest in our data.
    pub fn set_remote_not_interested(&mut self, dl: &mut Download) {
        if !self.down.interested() {
            return;
        }

        let was_wanted = self.is_upload_wanted();
        self.down.set_interested(false);

        if was_wanted {
            dl.choke.set_not_interested(self.token);
        }
    }

    /// Acquires the writable lease covering `p`, releasing any current one
    /// first. Keeps the lease when it already covers `p`'s chunk.
    pub fn load_down_chunk(&mut self, dl: &mut Download, p: Piece) -> Result<(), EngineError> {
        self.down_piece = p;

        if !dl.content.is_valid_piece(&p) {
            return Err(EngineError::Internal("incoming block fails piece geometry"));
        }

        if self
            .down_chunk
            .as_ref()
            .is_some_and(|h| h.is_valid() && h.index() == p.index)
        {
            return Ok(());
        }

        self.down_chunk_release(dl);

        let handle = dl.store.get(p.index, true);
        if !handle.is_valid() {
            let reason = handle
                .error()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(EngineError::Storage(format!(
                "chunk write lease failed: {reason}"
            )));
        }

        self.down_chunk = Some(handle);
        Ok(())
    }

    /// Acquires the readable lease for the current upload piece.
    pub fn load_up_chunk(&mut self, dl: &mut Download) -> Result<(), EngineError> {
        if self
            .up_chunk
            .as_ref()
            .is_some_and(|h| h.is_valid() && h.index() == self.up_piece.index)
        {
            return Ok(());
        }

        self.up_chunk_release(dl);

        let handle = dl.store.get(self.up_piece.index, false);
        if !handle.is_valid() {
            let reason = handle
                .error()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(EngineError::Storage(format!(
                "chunk read lease failed: {reason}"
            )));
        }

        self.up_chunk = Some(handle);
        Ok(())
    }

    pub fn down_chunk_release(&mut self, dl: &mut Download) {
        if let Some(mut handle) = self.down_chunk.take() {
            dl.store.release(&mut handle);
        }
    }

    pub fn up_chunk_release(&mut self, dl: &mut Download) {
        if let Some(mut handle) = self.up_chunk.take() {
            dl.store.release(&mut handle);
        }
    }

    /// Moves block bytes from the socket into the download chunk, bounded
    /// by the throttle quota. Returns whether the block completed.
    ///
    /// Quota exhaustion drops read interest and deactivates the throttle
    /// node; its activation callback restores read interest when quota
    /// returns.
    pub fn down_chunk(
        &mut self,
        dl: &mut Download,
        poll: &mut dyn PollSurface,
    ) -> Result<bool, EngineError> {
        {
            let node = self
                .down_throttle
                .as_ref()
                .ok_or(EngineError::Internal("download throttle node missing"))?;
            if !dl.down_throttle.is_throttled(node) {
                return Err(EngineError::Internal(
                    "tried to read a block outside the throttle list",
                ));
            }
        }

        let chunk = self
            .down_chunk
            .as_ref()
            .ok_or(EngineError::Internal("no download lease held"))?;
        if !chunk.is_writable() {
            return Err(EngineError::Internal("download lease is not writable"));
        }
        let view = chunk
            .chunk()
            .ok_or(EngineError::Internal("download lease has no memory view"))?
            .clone();

        let mut quota = dl
            .down_throttle
            .node_quota(self.down_throttle.as_ref().unwrap());
        if quota == 0 {
            poll.remove_read(self.token);
            dl.down_throttle
                .node_deactivate(self.down_throttle.as_ref().unwrap());
            return Ok(false);
        }

        quota = quota.min(self.down_piece.length - self.down.position());
        let mut left = quota;

        let sock = self
            .sock
            .as_mut()
            .ok_or(EngineError::Internal("read on detached connection"))?;

        let mut cursor = view.at_position(self.down_piece.offset + self.down.position());
        while left != 0 {
            let at = self.down_piece.offset + self.down.position();
            let avail = view.part_remaining(cursor, at);
            if avail == 0 {
                break;
            }

            let want = left.min(avail) as usize;
            let count = view
                .with_part(cursor, at, |mem| sock.read_stream(&mut mem[..want]))
                .ok_or(EngineError::Internal("chunk cursor out of range"))??;

            self.down.adjust_position(count as u32);
            left -= count as u32;
            cursor = cursor.next();

            if count as u32 != avail {
                break;
            }
        }

        let bytes = quota - left;
        dl.down_throttle
            .node_used(self.down_throttle.as_mut().unwrap(), bytes);
        dl.down_rate.insert(bytes);
        self.peer_chunks.record_down(bytes);

        Ok(self.down.position() == self.down_piece.length)
    }

    /// Like [`PeerConnection::down_chunk`] but copies from the framing
    /// buffer; copying proceeds until the buffer or the block is exhausted.
    pub fn down_chunk_from_buffer(&mut self, dl: &mut Download) -> Result<bool, EngineError> {
        let chunk = self
            .down_chunk
            .as_ref()
            .ok_or(EngineError::Internal("no download lease held"))?;
        if !chunk.is_writable() {
            return Err(EngineError::Internal("download lease is not writable"));
        }
        let view = chunk
            .chunk()
            .ok_or(EngineError::Internal("download lease has no memory view"))?
            .clone();

        let quota = (self.down.buffer().remaining() as u32)
            .min(self.down_piece.length - self.down.position());
        let mut left = quota;

        let mut cursor = view.at_position(self.down_piece.offset + self.down.position());
        while left != 0 {
            let at = self.down_piece.offset + self.down.position();
            let avail = view.part_remaining(cursor, at);
            if avail == 0 {
                break;
            }

            let count = left.min(avail) as usize;
            view.with_part(cursor, at, |mem| {
                mem[..count].copy_from_slice(&self.down.buffer().unread()[..count]);
            })
            .ok_or(EngineError::Internal("chunk cursor out of range"))?;

            self.down.adjust_position(count as u32);
            self.down.buffer_mut().move_position(count);
            left -= count as u32;
            cursor = cursor.next();
        }

        let bytes = quota - left;
        dl.down_throttle
            .node_used(self.down_throttle.as_mut().unwrap(), bytes);
        dl.down_rate.insert(bytes);
        self.peer_chunks.record_down(bytes);

        Ok(self.down.position() == self.down_piece.length)
    }

    /// Moves block bytes from the upload chunk to the socket, bounded by
    /// the upload throttle quota. Returns whether the block completed.
    pub fn up_chunk(
        &mut self,
        dl: &mut Download,
        poll: &mut dyn PollSurface,
    ) -> Result<bool, EngineError> {
        {
            let node = self
                .up_throttle
                .as_ref()
                .ok_or(EngineError::Internal("upload throttle node missing"))?;
            if !dl.up_throttle.is_throttled(node) {
                return Err(EngineError::Internal(
                    "tried to write a block outside the throttle list",
                ));
            }
        }

        let chunk = self
            .up_chunk
            .as_ref()
            .ok_or(EngineError::Internal("no upload lease held"))?;
        if !chunk.is_readable() {
            return Err(EngineError::Internal("upload lease is not readable"));
        }
        let view = chunk
            .chunk()
            .ok_or(EngineError::Internal("upload lease has no memory view"))?
            .clone();

        let mut quota = dl.up_throttle.node_quota(self.up_throttle.as_ref().unwrap());
        if quota == 0 {
            poll.remove_write(self.token);
            dl.up_throttle
                .node_deactivate(self.up_throttle.as_ref().unwrap());
            return Ok(false);
        }

        quota = quota.min(self.up_piece.length - self.up.position());
        let mut left = quota;

        let sock = self
            .sock
            .as_mut()
            .ok_or(EngineError::Internal("write on detached connection"))?;

        let mut cursor = view.at_position(self.up_piece.offset + self.up.position());
        while left != 0 {
            let at = self.up_piece.offset + self.up.position();
            let avail = view.part_remaining(cursor, at);
            if avail == 0 {
                break;
            }

            let want = left.min(avail) as usize;
            let count = view
                .with_part(cursor, at, |mem| sock.write_stream(&mem[..want]))
                .ok_or(EngineError::Internal("chunk cursor out of range"))??;

            self.up.adjust_position(count as u32);
            left -= count as u32;
            cursor = cursor.next();

            if count as u32 != avail {
                break;
            }
        }

        let bytes = quota - left;
        dl.up_throttle
            .node_used(self.up_throttle.as_mut().unwrap(), bytes);
        dl.up_rate.insert(bytes);
        self.peer_chunks.record_up(bytes);

        Ok(self.up.position() == self.up_piece.length)
    }

    /// Streams remaining bitfield bytes from the socket into the peer's
    /// bitfield backing store. Returns completion.
    pub fn read_bitfield_body(&mut self) -> Result<bool, EngineError> {
        let pos = self.down.position() as usize;
        let sock = self
            .sock
            .as_mut()
            .ok_or(EngineError::Internal("read on detached connection"))?;

        let bytes = self.peer_chunks.bitfield_mut().as_bytes_mut();
        let count = sock.read_stream(&mut bytes[pos..])?;
        self.down.adjust_position(count as u32);

        Ok(self.down.position() == self.peer_chunks.bitfield().size_bytes())
    }

    /// Copies buffered bitfield bytes into the peer bitfield. `msg_length`
    /// is the advertised body length, which must match the expected
    /// bitfield byte count. Entry read position must be 0.
    pub fn read_bitfield_from_buffer(&mut self, msg_length: u32) -> Result<bool, EngineError> {
        if msg_length != self.peer_chunks.bitfield().size_bytes() {
            return Err(EngineError::Network("received invalid bitfield size".into()));
        }

        debug_assert_eq!(self.down.position(), 0, "bitfield receive must start at 0");

        let copy = (self.down.buffer().remaining() as u32).min(msg_length) as usize;
        {
            let src_dst = self.peer_chunks.bitfield_mut().as_bytes_mut();
            src_dst[..copy].copy_from_slice(&self.down.buffer().unread()[..copy]);
        }

        self.down.buffer_mut().move_position(copy);
        self.down.set_position(copy as u32);

        Ok(copy as u32 == msg_length)
    }

    /// Streams remaining bytes of our own bitfield to the socket. Returns
    /// completion.
    pub fn write_bitfield_body(&mut self, dl: &Download) -> Result<bool, EngineError> {
        let pos = self.up.position() as usize;
        let sock = self
            .sock
            .as_mut()
            .ok_or(EngineError::Internal("write on detached connection"))?;

        let count = sock.write_stream(&dl.content.bitfield().as_bytes()[pos..])?;
        self.up.adjust_position(count as u32);

        Ok(self.up.position() == dl.content.bitfield().size_bytes())
    }

    /// Whether this peer is eligible for new block requests.
    ///
    /// Outside endgame any unchoked, interesting peer qualifies. In endgame
    /// stalled peers are skipped unless the whole download is crawling.
    pub fn should_request(&self, dl: &mut Download) -> bool {
        if self.down.choked() || !self.up.interested() {
            return false;
        }

        if !dl.endgame() {
            return true;
        }

        self.down_stall <= 1 || dl.down_rate.rate() < ENDGAME_RATE_FLOOR
    }

    /// Fills the request pipe up to the rate-derived depth. Returns whether
    /// any request was framed.
    pub fn try_request_pieces(&mut self, dl: &mut Download) -> Result<bool, EngineError> {
        if self.request_list.is_empty() {
            self.down_stall = 0;
        }

        let rate = self
            .down_throttle
            .as_mut()
            .ok_or(EngineError::Internal("download throttle node missing"))?
            .rate();
        let pipe = RequestList::calculate_pipe_size(rate);

        let mut success = false;
        while (self.request_list.len() as u32) < pipe && self.up.can_write_request() {
            let Some(p) = self
                .request_list
                .delegate(dl.selector.as_mut(), &self.peer_chunks)
            else {
                break;
            };

            if !dl.content.is_valid_piece(&p) || !self.peer_chunks.bitfield().get(p.index) {
                return Err(EngineError::Internal("selector delegated an invalid block"));
            }

            self.up.write_request(p);
            success = true;
        }

        Ok(success)
    }

    /// Dequeues the next requested block, validates it, and frames its
    /// header. The peer asking for something we cannot serve is fatal.
    pub fn write_prepare_piece(&mut self, dl: &Download) -> Result<(), EngineError> {
        let p = self
            .send_list
            .pop_front()
            .ok_or(EngineError::Internal("send list is empty"))?;
        self.up_piece = p;

        if !dl.content.is_valid_piece(&p) || !dl.content.has_chunk(p.index) {
            return Err(EngineError::Communication(
                "peer requested a block with invalid index or length/offset",
            ));
        }

        self.up.write_piece(p);
        Ok(())
    }

    fn write_insert_poll_safe(&self, poll: &mut dyn PollSurface) {
        if self.sock.is_some() && self.up.state() != WriteState::InternalError {
            poll.insert_write(self.token);
        }
    }

    /// Services read readiness: advances framing, dispatches parsed
    /// messages, and streams bitfield or block bodies.
    pub fn event_read(
        &mut self,
        dl: &mut Download,
        poll: &mut dyn PollSurface,
    ) -> Result<(), EngineError> {
        if self.sock.is_none() {
            return Err(EngineError::Internal("read event on detached connection"));
        }

        self.time_last_read = Instant::now();

        loop {
            match self.down.state() {
                ReadState::Idle | ReadState::ReadingMessage => {
                    self.down.buffer_mut().move_unused();

                    let got = {
                        let sock = self.sock.as_mut().unwrap();
                        let space = self.down.buffer_mut().space_mut();
                        if space.is_empty() {
                            0
                        } else {
                            sock.read_stream(space)?
                        }
                    };
                    self.down.buffer_mut().advance_end(got);

                    let progressed = self.parse_read_buffer(dl, poll)?;

                    if matches!(
                        self.down.state(),
                        ReadState::Idle | ReadState::ReadingMessage
                    ) && got == 0
                        && !progressed
                    {
                        return Ok(());
                    }
                }

                ReadState::ReadingBitfield => {
                    if !self.read_bitfield_body()? {
                        return Ok(());
                    }
                    self.finish_bitfield(dl, poll);
                }

                ReadState::ReadingPiece => {
                    if !self.down_chunk(dl, poll)? {
                        return Ok(());
                    }
                    self.finish_piece(dl, poll);
                }

                ReadState::SkippingPiece => {
                    if !self.skip_piece_body()? {
                        return Ok(());
                    }
                    self.down.set_state(ReadState::Idle);
                    self.down.set_position(0);
                }

                ReadState::InternalError => {
                    return Err(EngineError::Internal("read event on errored connection"));
                }
            }
        }
    }

    /// Parses complete messages out of the framing buffer. Returns whether
    /// anything was consumed; may leave the read FSM in a body phase.
    fn parse_read_buffer(
        &mut self,
        dl: &mut Download,
        poll: &mut dyn PollSurface,
    ) -> Result<bool, EngineError> {
        let mut progressed = false;

        loop {
            let remaining = self.down.buffer().remaining();
            if remaining < 4 {
                self.mark_partial(remaining);
                return Ok(progressed);
            }

            let length = self.down.buffer().peek_u32() as usize;
            if length == 0 {
                // Keep-alive.
                self.down.buffer_mut().move_position(4);
                progressed = true;
                continue;
            }

            if remaining < 5 {
                self.mark_partial(remaining);
                return Ok(progressed);
            }

            let id_byte = self.down.buffer().unread()[4];
            let Some(id) = MessageId::from_u8(id_byte) else {
                return Err(EngineError::Network(format!(
                    "unknown message id {id_byte}"
                )));
            };

            match id {
                MessageId::Bitfield => {
                    self.down.buffer_mut().move_position(5);
                    self.down.set_position(0);
                    self.down.set_state(ReadState::ReadingBitfield);

                    if self.read_bitfield_from_buffer((length - 1) as u32)? {
                        self.finish_bitfield(dl, poll);
                        progressed = true;
                        continue;
                    }
                    return Ok(true);
                }

                MessageId::Piece => {
                    if length < 9 {
                        return Err(EngineError::Network("piece message too short".into()));
                    }
                    if remaining < 13 {
                        self.mark_partial(remaining);
                        return Ok(progressed);
                    }

                    self.down.buffer_mut().move_position(5);
                    let index = self.down.buffer_mut().read_u32();
                    let offset = self.down.buffer_mut().read_u32();
                    let body = (length - 9) as u32;

                    if body > MAX_BLOCK_LEN {
                        return Err(EngineError::Network("oversized block body".into()));
                    }

                    let p = Piece::new(index, offset, body);

                    if self.request_list.start(&p) {
                        self.load_down_chunk(dl, p)?;
                        self.down.set_position(0);
                        self.down.set_state(ReadState::ReadingPiece);

                        if self.down_chunk_from_buffer(dl)? {
                            self.finish_piece(dl, poll);
                            progressed = true;
                            continue;
                        }
                    } else {
                        // A block we no longer want; drain and discard it.
                        self.down_piece = p;
                        self.down.set_position(0);
                        self.down.set_state(ReadState::SkippingPiece);

                        if self.skip_piece_from_buffer() {
                            self.down.set_state(ReadState::Idle);
                            self.down.set_position(0);
                            progressed = true;
                            continue;
                        }
                    }
                    return Ok(true);
                }

                MessageId::Choke => {
                    self.require_payload(length, 1)?;
                    self.down.buffer_mut().move_position(5);
                    self.down.set_choked(true);
                    self.request_list.cancel(dl.selector.as_mut());
                }

                MessageId::Unchoke => {
                    self.require_payload(length, 1)?;
                    self.down.buffer_mut().move_position(5);
                    self.down.set_choked(false);
                    if self.should_request(dl) {
                        self.write_insert_poll_safe(poll);
                    }
                }

                MessageId::Interested => {
                    self.require_payload(length, 1)?;
                    self.down.buffer_mut().move_position(5);
                    self.set_remote_interested(dl);
                }

                MessageId::NotInterested => {
                    self.require_payload(length, 1)?;
                    self.down.buffer_mut().move_position(5);
                    self.set_remote_not_interested(dl);
                }

                MessageId::Have => {
                    self.require_payload(length, 5)?;
                    if remaining < 9 {
                        self.mark_partial(remaining);
                        return Ok(progressed);
                    }
                    self.down.buffer_mut().move_position(5);
                    let index = self.down.buffer_mut().read_u32();
                    if index >= dl.content.chunk_total() {
                        return Err(EngineError::Network("have index out of range".into()));
                    }
                    self.peer_chunks.bitfield_mut().set(index);
                    if !dl.content.has_chunk(index) && !self.up.interested() {
                        self.up.set_interested(true);
                        self.send_interested = true;
                        self.write_insert_poll_safe(poll);
                    }
                }

                MessageId::Request => {
                    self.require_payload(length, 13)?;
                    if remaining < 17 {
                        self.mark_partial(remaining);
                        return Ok(progressed);
                    }
                    self.down.buffer_mut().move_position(5);
                    let index = self.down.buffer_mut().read_u32();
                    let offset = self.down.buffer_mut().read_u32();
                    let len = self.down.buffer_mut().read_u32();
                    self.read_request_piece(Piece::new(index, offset, len), poll);
                }

                MessageId::Cancel => {
                    self.require_payload(length, 13)?;
                    if remaining < 17 {
                        self.mark_partial(remaining);
                        return Ok(progressed);
                    }
                    self.down.buffer_mut().move_position(5);
                    let index = self.down.buffer_mut().read_u32();
                    let offset = self.down.buffer_mut().read_u32();
                    let len = self.down.buffer_mut().read_u32();
                    self.read_cancel_piece(&Piece::new(index, offset, len));
                }
            }

            progressed = true;
        }
    }

    fn require_payload(&self, length: usize, expected: usize) -> Result<(), EngineError> {
        if length != expected {
            return Err(EngineError::Network(format!(
                "message length {length} does not match its type"
            )));
        }
        Ok(())
    }

    fn mark_partial(&mut self, remaining: usize) {
        self.down.set_state(if remaining == 0 {
            ReadState::Idle
        } else {
            ReadState::ReadingMessage
        });
    }

    fn finish_bitfield(&mut self, dl: &mut Download, poll: &mut dyn PollSurface) {
        self.peer_chunks.bitfield_mut().mask_spare_bits();
        self.down.set_state(ReadState::Idle);
        self.down.set_position(0);

        let interesting = (0..dl.content.chunk_total())
            .any(|i| self.peer_chunks.bitfield().get(i) && !dl.content.has_chunk(i));

        if interesting && !self.up.interested() {
            self.up.set_interested(true);
            self.send_interested = true;
            self.write_insert_poll_safe(poll);
        }
    }

    fn finish_piece(&mut self, dl: &mut Download, poll: &mut dyn PollSurface) {
        self.down.set_state(ReadState::Idle);
        self.down.set_position(0);

        self.request_list.finished(dl.selector.as_mut());

        if self.should_request(dl) {
            self.write_insert_poll_safe(poll);
        }
    }

    fn skip_piece_from_buffer(&mut self) -> bool {
        let copy = (self.down.buffer().remaining() as u32)
            .min(self.down_piece.length - self.down.position()) as usize;
        self.down.buffer_mut().move_position(copy);
        self.down.adjust_position(copy as u32);
        self.down.position() == self.down_piece.length
    }

    fn skip_piece_body(&mut self) -> Result<bool, EngineError> {
        let mut scratch = [0u8; 1024];
        let sock = self
            .sock
            .as_mut()
            .ok_or(EngineError::Internal("read on detached connection"))?;

        loop {
            let left = (self.down_piece.length - self.down.position()) as usize;
            if left == 0 {
                return Ok(true);
            }

            let want = left.min(scratch.len());
            let count = sock.read_stream(&mut scratch[..want])?;
            self.down.adjust_position(count as u32);

            if count < want {
                return Ok(false);
            }
        }
    }

    /// Services write readiness: flushes pending choke/interest changes,
    /// issues requests, and streams queued blocks and the bitfield.
    pub fn event_write(
        &mut self,
        dl: &mut Download,
        poll: &mut dyn PollSurface,
    ) -> Result<(), EngineError> {
        if self.sock.is_none() {
            return Err(EngineError::Internal("write event on detached connection"));
        }

        loop {
            match self.up.state() {
                WriteState::Idle => {
                    if self.send_choked {
                        self.send_choked = false;
                        if self.up.choked() {
                            self.up.queue_message(Message::Choke);
                            // Requests queued before the choke are void.
                            self.send_list.clear();
                        } else {
                            self.up.queue_message(Message::Unchoke);
                        }
                    }

                    if self.send_interested {
                        self.send_interested = false;
                        self.up.queue_message(if self.up.interested() {
                            Message::Interested
                        } else {
                            Message::NotInterested
                        });
                    }

                    if self.should_request(dl) {
                        self.try_request_pieces(dl)?;
                    }

                    if !self.up.choked()
                        && !self.send_list.is_empty()
                        && self.up.queued().is_empty()
                        && self.up.state() == WriteState::Idle
                    {
                        self.write_prepare_piece(dl)?;
                        self.load_up_chunk(dl)?;
                    }

                    self.up.frame_queued();

                    if !self.flush_write_buffer()? {
                        return Ok(());
                    }

                    let blocks_drained = self.send_list.is_empty() || self.up.choked();
                    if self.up.state() == WriteState::Idle && !self.up.pending() && blocks_drained
                    {
                        poll.remove_write(self.token);
                        return Ok(());
                    }
                }

                WriteState::WritingBitfield => {
                    if !self.flush_write_buffer()? {
                        return Ok(());
                    }
                    if !self.write_bitfield_body(dl)? {
                        return Ok(());
                    }
                    self.up.set_state(WriteState::Idle);
                    self.up.set_position(0);
                }

                WriteState::WritingPiece => {
                    if !self.flush_write_buffer()? {
                        return Ok(());
                    }
                    if !self.up_chunk(dl, poll)? {
                        return Ok(());
                    }
                    self.up.set_state(WriteState::Idle);
                    self.up.set_position(0);
                }

                WriteState::InternalError => {
                    return Err(EngineError::Internal("write event on errored connection"));
                }
            }
        }
    }

    fn flush_write_buffer(&mut self) -> Result<bool, EngineError> {
        let sock = self
            .sock
            .as_mut()
            .ok_or(EngineError::Internal("write on detached connection"))?;

        while self.up.buffer().remaining() > 0 {
            let count = sock.write_stream(self.up.buffer().unread())?;
            if count == 0 {
                return Ok(false);
            }
            self.up.buffer_mut().move_position(count);
        }

        self.up.buffer_mut().reset();
        Ok(true)
    }
}

impl Default for PeerConnection {
    fn default() -> Self {
        Self::new()
    }
}
