use tracing::debug;

use super::connection::{PeerConnection, PeerInfo};
use crate::download::Download;
use crate::error::EngineError;
use crate::poll::{PollSurface, Stream, Token};

/// Owner of every peer connection in one download.
///
/// Connections are owned exclusively by this list; teardown is always
/// initiated by erasing from it. The event entry points double as the
/// error sink: any fatal error out of a handler erases the connection,
/// which runs the full teardown sequence.
pub struct ConnectionList {
    slots: Vec<Option<PeerConnection>>,
}

impl ConnectionList {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, token: Token) -> Option<&PeerConnection> {
        self.slots.get(token.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut PeerConnection> {
        self.slots.get_mut(token.0).and_then(Option::as_mut)
    }

    /// Builds and attaches a connection for `peer`, returning its token.
    pub fn insert(
        &mut self,
        dl: &mut Download,
        peer: PeerInfo,
        sock: Box<dyn Stream>,
        poll: &mut dyn PollSurface,
    ) -> Result<Token, EngineError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .unwrap_or_else(|| {
                self.slots.push(None);
                self.slots.len() - 1
            });
        let token = Token(slot);

        let mut conn = PeerConnection::new();
        conn.initialize(dl, peer, token, sock, poll)?;
        self.slots[slot] = Some(conn);

        Ok(token)
    }

    /// Removes the connection, running its teardown. A no-op for unknown
    /// tokens.
    pub fn erase(&mut self, token: Token, dl: &mut Download, poll: &mut dyn PollSurface) {
        if let Some(Some(mut conn)) = self.slots.get_mut(token.0).map(Option::take) {
            conn.destroy(dl, poll);
        }
    }

    /// Dispatches read readiness; a fatal error tears the connection down.
    pub fn event_read(&mut self, token: Token, dl: &mut Download, poll: &mut dyn PollSurface) {
        let Some(conn) = self.get_mut(token) else {
            return;
        };
        if let Err(e) = conn.event_read(dl, poll) {
            debug!(token = token.0, error = %e, "read handler failed");
            self.erase(token, dl, poll);
        }
    }

    /// Dispatches write readiness; a fatal error tears the connection down.
    pub fn event_write(&mut self, token: Token, dl: &mut Download, poll: &mut dyn PollSurface) {
        let Some(conn) = self.get_mut(token) else {
            return;
        };
        if let Err(e) = conn.event_write(dl, poll) {
            debug!(token = token.0, error = %e, "write handler failed");
            self.erase(token, dl, poll);
        }
    }

    /// Socket error readiness: the connection is simply erased.
    pub fn event_error(&mut self, token: Token, dl: &mut Download, poll: &mut dyn PollSurface) {
        self.erase(token, dl, poll);
    }
}

impl Default for ConnectionList {
    fn default() -> Self {
        Self::new()
    }
}
