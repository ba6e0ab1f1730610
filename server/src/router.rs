//! Per-connection request router and session state machine.
//!
//! Each decoded frame is dispatched by action code to a handler; every
//! handler answers the one question the worker loop cares about: must this
//! connection be torn down? A connection starts unauthenticated, becomes
//! authenticated through login (which registers a session in the
//! [`ClientRegistry`]), and never transitions back — re-authentication
//! requires a fresh connection.
//!
//! The router also owns both halves of the chunking protocol: inbound
//! frames are accumulated per correlation id until the final chunk arrives,
//! and outbound payloads larger than one frame are split before sending.

use crate::auth::CredentialVerifier;
use crate::conn::{ConnError, FrameConn};
use crate::registry::{ClientRegistry, ConnId, Session};
use crate::server::ShutdownHandle;
use crate::storage::Storage;
use log::{debug, info, warn};
use shared::{
    current_millis, decode_board, decode_credentials, encode_board, encode_element, split_message,
    ActionCode, Element, ElementType, Frame,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Reply body signalling success; failures reply with an empty body.
const SUCCESS_BODY: u8 = 1;

/// Routes frames to handlers and maintains per-connection session state.
pub struct Router {
    registry: Arc<ClientRegistry>,
    storage: Arc<dyn Storage>,
    verifier: Box<dyn CredentialVerifier>,
    shutdown: ShutdownHandle,
}

impl Router {
    pub fn new(
        registry: Arc<ClientRegistry>,
        storage: Arc<dyn Storage>,
        verifier: Box<dyn CredentialVerifier>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            registry,
            storage,
            verifier,
            shutdown,
        }
    }

    /// Dispatches one frame. Returns `Ok(true)` when the connection must be
    /// torn down; write failures propagate and end the connection too.
    pub async fn route<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
        frame: Frame,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(action) = frame.action() else {
            debug!("connection {}: ignoring unrecognized action {}", conn_id, frame.flag);
            return Ok(false);
        };

        match action {
            // Inbound error frames carry nothing actionable.
            ActionCode::Error => Ok(false),
            ActionCode::LogIn => self.handle_login(conn_id, conn, &frame).await,
            ActionCode::Register => self.handle_register(conn_id, conn, &frame).await,
            ActionCode::Shutdown => self.handle_shutdown(conn_id, conn).await,
            _ => {
                // Everything else requires an authenticated session.
                if !self.registry.contains(conn_id) {
                    warn!(
                        "connection {}: {:?} before authentication",
                        conn_id, action
                    );
                    self.reply_error(conn).await?;
                    return Ok(true);
                }
                match action {
                    ActionCode::CreateBoard => self.handle_create_board(conn_id, conn, &frame).await,
                    ActionCode::GetBoard => self.handle_get_board(conn_id, conn, &frame).await,
                    ActionCode::GetBoards => self.handle_get_boards(conn_id, conn).await,
                    ActionCode::DeleteBoard => self.handle_delete_board(conn_id, conn, &frame).await,
                    ActionCode::PointsSet
                    | ActionCode::Line
                    | ActionCode::Text
                    | ActionCode::Image => self.handle_draw(conn_id, conn, action, frame).await,
                    ActionCode::Undo => self.handle_undo(conn_id, conn).await,
                    ActionCode::Clear => self.handle_clear(conn_id, conn).await,
                    ActionCode::SelectBoard => self.handle_select_board(conn_id, conn, &frame).await,
                    ActionCode::GetBoardElements => {
                        self.handle_get_board_elements(conn_id, conn).await
                    }
                    ActionCode::Error
                    | ActionCode::LogIn
                    | ActionCode::Register
                    | ActionCode::Shutdown => unreachable!("handled above"),
                }
            }
        }
    }

    /// Registry cleanup once a worker's loop has ended, whatever the cause.
    /// Safe to call for connections that never authenticated.
    pub fn client_disconnected(&self, conn_id: ConnId) {
        if self.registry.remove(conn_id) {
            info!("connection {} disconnected", conn_id);
        }
    }

    async fn handle_login<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
        frame: &Frame,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.registry.contains(conn_id) {
            warn!("connection {}: login while already authenticated", conn_id);
            self.reply_error(conn).await?;
            return Ok(true);
        }

        let Some((username, password)) = decode_credentials(&frame.body) else {
            self.reply(conn, ActionCode::LogIn, Vec::new()).await?;
            return Ok(true);
        };

        let authenticated = self
            .storage
            .find_user(&username)
            .filter(|user| self.verifier.verify(user, &password));

        match authenticated {
            Some(user) => {
                self.registry.add(conn_id, Session::new(user));
                self.reply(conn, ActionCode::LogIn, vec![SUCCESS_BODY]).await?;
                Ok(false)
            }
            None => {
                info!("connection {}: login rejected", conn_id);
                self.reply(conn, ActionCode::LogIn, Vec::new()).await?;
                Ok(true)
            }
        }
    }

    /// Registration always ends the connection, forcing a fresh login.
    async fn handle_register<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
        frame: &Frame,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some((username, password)) = decode_credentials(&frame.body) else {
            self.reply(conn, ActionCode::Register, Vec::new()).await?;
            return Ok(true);
        };

        let created = self.storage.add_user(username, password);
        if created {
            info!("connection {}: user registered", conn_id);
            self.reply(conn, ActionCode::Register, vec![SUCCESS_BODY]).await?;
        } else {
            info!("connection {}: registration rejected (user exists)", conn_id);
            self.reply(conn, ActionCode::Register, Vec::new()).await?;
        }
        Ok(true)
    }

    async fn handle_shutdown<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let is_admin = self
            .registry
            .user(conn_id)
            .is_some_and(|user| user.is_admin);

        if is_admin {
            info!("connection {}: shutdown requested by admin", conn_id);
            self.shutdown.shutdown();
        } else {
            warn!("connection {}: shutdown denied", conn_id);
            self.reply_error(conn).await?;
        }
        Ok(true)
    }

    async fn handle_create_board<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
        frame: &Frame,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let owner = self.owner(conn_id);
        match decode_board(&frame.body) {
            Some(board) => {
                let id = self.storage.add_board(&owner, board);
                debug!("connection {}: board {} created", conn_id, id);
                self.reply(conn, ActionCode::CreateBoard, vec![SUCCESS_BODY]).await?;
            }
            None => {
                self.reply(conn, ActionCode::CreateBoard, Vec::new()).await?;
            }
        }
        Ok(false)
    }

    async fn handle_get_board<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
        frame: &Frame,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let owner = self.owner(conn_id);
        let board = parse_board_id(&frame.body)
            .and_then(|id| self.storage.get_board(&owner, id));

        match board {
            Some(board) => {
                self.send_bytes(conn, ActionCode::GetBoard, &encode_board(&board)).await?;
            }
            None => {
                // Not found: one empty frame so the caller is not left waiting.
                self.reply(conn, ActionCode::GetBoard, Vec::new()).await?;
            }
        }
        Ok(false)
    }

    /// Streams one frame per board, all sharing a correlation id with
    /// `chunk_count` equal to the board count. An empty list is answered
    /// with a single empty frame so the caller always gets a reply.
    async fn handle_get_boards<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let owner = self.owner(conn_id);
        let boards = self.storage.get_boards(&owner);

        if boards.is_empty() {
            self.reply(conn, ActionCode::GetBoards, Vec::new()).await?;
            return Ok(false);
        }

        let correlation_id = current_millis();
        let count = boards.len() as i32;
        for (index, board) in boards.iter().enumerate() {
            let frame = Frame::new(
                ActionCode::GetBoards,
                index as i32,
                count,
                correlation_id,
                encode_board(board),
            );
            conn.write_frame(&frame).await?;
        }
        Ok(false)
    }

    async fn handle_delete_board<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
        frame: &Frame,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let owner = self.owner(conn_id);
        let removed = parse_board_id(&frame.body)
            .map(|id| self.storage.remove_board(&owner, id))
            .unwrap_or(false);

        let body = if removed { vec![SUCCESS_BODY] } else { Vec::new() };
        self.reply(conn, ActionCode::DeleteBoard, body).await?;
        Ok(false)
    }

    /// Inbound chunk reassembly for the drawing actions. Intermediate
    /// chunks produce no reply; once the final chunk arrives the
    /// concatenated payload is persisted as one element of the selected
    /// board.
    async fn handle_draw<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
        action: ActionCode,
        frame: Frame,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let last_chunk = frame.is_last_chunk();
        self.registry
            .enqueue_pending(conn_id, frame.correlation_id, frame.body);

        if !last_chunk {
            return Ok(false);
        }

        let payload = self.registry.drain_pending(conn_id, frame.correlation_id);

        let Some(board_id) = self.registry.selected_board(conn_id) else {
            warn!("connection {}: drawing with no board selected", conn_id);
            self.reply_error(conn).await?;
            return Ok(false);
        };

        let kind = ElementType::from_action(action)
            .expect("drawing actions map to element types");
        self.storage.add_element(
            Element {
                kind,
                bytes: payload,
            },
            board_id,
        );
        debug!("connection {}: {:?} element appended to board {}", conn_id, kind, board_id);
        Ok(false)
    }

    async fn handle_undo<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.registry.selected_board(conn_id) {
            Some(board_id) => self.storage.remove_last_element(board_id),
            None => self.reply_error(conn).await?,
        }
        Ok(false)
    }

    async fn handle_clear<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.registry.selected_board(conn_id) {
            Some(board_id) => self.storage.remove_all_elements(board_id),
            None => self.reply_error(conn).await?,
        }
        Ok(false)
    }

    /// Sets the session's board context. Selecting a board the caller does
    /// not own is refused with an error frame.
    async fn handle_select_board<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
        frame: &Frame,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let owner = self.owner(conn_id);
        let owned = parse_board_id(&frame.body)
            .filter(|&id| self.storage.get_board(&owner, id).is_some());

        match owned {
            Some(board_id) => {
                self.registry.select_board(conn_id, board_id);
                self.reply(conn, ActionCode::SelectBoard, vec![SUCCESS_BODY]).await?;
            }
            None => {
                warn!("connection {}: selectBoard refused", conn_id);
                self.reply_error(conn).await?;
            }
        }
        Ok(false)
    }

    /// Replays every stored element of the selected board, each as its own
    /// chunked logical message, terminated by one empty marker frame.
    async fn handle_get_board_elements<S>(
        &self,
        conn_id: ConnId,
        conn: &mut FrameConn<S>,
    ) -> Result<bool, ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(board_id) = self.registry.selected_board(conn_id) else {
            warn!("connection {}: replay with no board selected", conn_id);
            self.reply_error(conn).await?;
            return Ok(false);
        };

        // Consecutive elements can land within the same millisecond, so
        // offset the correlation ids to keep logical messages distinct.
        let base = current_millis();
        for (index, element) in self.storage.get_elements(board_id).iter().enumerate() {
            let payload = encode_element(element);
            for frame in split_message(
                ActionCode::GetBoardElements,
                base + index as i64,
                &payload,
            ) {
                conn.write_frame(&frame).await?;
            }
        }

        // End-of-replay marker.
        conn.write_frame(&Frame::single(
            ActionCode::GetBoardElements,
            current_millis(),
            Vec::new(),
        ))
        .await?;
        Ok(false)
    }

    /// Splits an outbound payload into chunked frames and sends them in
    /// order. A zero-length payload sends nothing.
    async fn send_bytes<S>(
        &self,
        conn: &mut FrameConn<S>,
        action: ActionCode,
        payload: &[u8],
    ) -> Result<(), ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        for frame in split_message(action, current_millis(), payload) {
            conn.write_frame(&frame).await?;
        }
        Ok(())
    }

    async fn reply<S>(
        &self,
        conn: &mut FrameConn<S>,
        action: ActionCode,
        body: Vec<u8>,
    ) -> Result<(), ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conn.write_frame(&Frame::single(action, current_millis(), body)).await
    }

    async fn reply_error<S>(&self, conn: &mut FrameConn<S>) -> Result<(), ConnError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.reply(conn, ActionCode::Error, Vec::new()).await
    }

    /// Credential of the authenticated caller. Only valid behind the
    /// authentication check in [`Router::route`].
    fn owner(&self, conn_id: ConnId) -> crate::storage::Credential {
        self.registry
            .user(conn_id)
            .expect("caller is authenticated")
            .username
    }
}

/// Parses the fixed 4-byte board id bodies used by several commands.
fn parse_board_id(body: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = body.try_into().ok()?;
    Some(i32::from_le_bytes(bytes))
}
