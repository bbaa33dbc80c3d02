//! The swarm event loop and its handle.
//!
//! A single task owns [`SwarmState`], the transfer engine and the retry
//! bookkeeping. It selects over user commands, inbound signaling messages,
//! transport events, send-task progress, due retries and the stats tick,
//! and publishes an immutable snapshot after every handled event.
//!
//! ```text
//!  SwarmHandle ──commands──▶ ┌─────────────┐ ──SignalMessage──▶ rendezvous link
//!  rendezvous ──signaling──▶ │  swarm loop │ ◀──events── ConnectionManager
//!  send tasks ──progress───▶ │             │ ──watch──▶ Arc<SwarmState>
//!                            └─────────────┘
//! ```

use super::config::{SwarmConfig, fallback_name};
use super::connection::{ConnectionEvent, ConnectionManager};
use super::engine::{EngineEvent, TransferEngine};
use super::error::{Result, SwarmError};
use super::mesh;
use super::state::{ChatMessage, PeerRole, PeerStatus, SwarmState};
use super::stats::SpeedMeter;
use crate::frame::{self, Frame};
use crate::message::ControlMessage;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swarmdrop_files::{FileId, FileMetadata, SharedFile, sink, unix_millis};
use swarmdrop_rendezvous::{DEFAULT_MAX_ROOM_SIZE, SignalMessage};
use swarmdrop_transport::{TransportError, TransportEvent, TransportFactory};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Error notice set when the rendezvous link drops or cannot be used
pub const SIGNALING_LOST_NOTICE: &str = "Failed to connect to signaling server";

enum Command {
    JoinRoom {
        room_code: String,
        reply: oneshot::Sender<Result<()>>,
    },
    LeaveRoom {
        reply: oneshot::Sender<()>,
    },
    AddFiles {
        files: Vec<SharedFile>,
        reply: oneshot::Sender<Vec<FileMetadata>>,
    },
    RemoveFile {
        file_id: FileId,
        reply: oneshot::Sender<bool>,
    },
    StartTransfer,
    SendText {
        text: String,
        reply: oneshot::Sender<ChatMessage>,
    },
    Download {
        file_id: FileId,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    Signaling(SignalMessage),
    SignalingLost,
    Shutdown,
}

/// Cloneable handle to a running swarm
#[derive(Debug, Clone)]
pub struct SwarmHandle {
    peer_id: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Arc<SwarmState>>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::JoinRoom { .. } => "JoinRoom",
            Self::LeaveRoom { .. } => "LeaveRoom",
            Self::AddFiles { .. } => "AddFiles",
            Self::RemoveFile { .. } => "RemoveFile",
            Self::StartTransfer => "StartTransfer",
            Self::SendText { .. } => "SendText",
            Self::Download { .. } => "Download",
            Self::Signaling(_) => "Signaling",
            Self::SignalingLost => "SignalingLost",
            Self::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

impl SwarmHandle {
    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| SwarmError::Stopped)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.command(make(tx))?;
        rx.await.map_err(|_| SwarmError::Stopped)
    }

    /// Local peer id
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Join a room, leaving the current one first.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::InvalidState`] if the rendezvous link is closed,
    /// or [`SwarmError::Stopped`] if the loop is gone.
    pub async fn join_room(&self, room_code: impl Into<String>) -> Result<()> {
        let room_code = room_code.into();
        self.request(|reply| Command::JoinRoom { room_code, reply }).await?
    }

    /// Leave the room: close every transport, cancel sends, forget all files.
    ///
    /// The rendezvous service notices the departure when the owner of the
    /// signaling link closes it.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Stopped`] if the loop is gone.
    pub async fn leave_room(&self) -> Result<()> {
        self.request(|reply| Command::LeaveRoom { reply }).await
    }

    /// Share files.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Stopped`] if the loop is gone.
    pub async fn add_files(&self, files: Vec<SharedFile>) -> Result<Vec<FileMetadata>> {
        self.request(|reply| Command::AddFiles { files, reply }).await
    }

    /// Withdraw a shared file that has not started sending.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Stopped`] if the loop is gone.
    pub async fn remove_file(&self, file_id: impl Into<FileId>) -> Result<bool> {
        let file_id = file_id.into();
        self.request(|reply| Command::RemoveFile { file_id, reply }).await
    }

    /// Queue every still-pending shared file.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Stopped`] if the loop is gone.
    pub fn start_transfer(&self) -> Result<()> {
        self.command(Command::StartTransfer)
    }

    /// Send a chat message to every connected peer.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Stopped`] if the loop is gone.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<ChatMessage> {
        let text = text.into();
        self.request(|reply| Command::SendText { text, reply }).await
    }

    /// Contents of a shared or fully received file.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::UnknownFile`] or a [`SwarmError::Files`]
    /// error if the file is incomplete or a chunk went missing.
    pub async fn download(&self, file_id: impl Into<FileId>) -> Result<Vec<u8>> {
        let file_id = file_id.into();
        self.request(|reply| Command::Download { file_id, reply }).await?
    }

    /// Download a file and write it into `dir` under its sanitised name.
    ///
    /// # Errors
    ///
    /// Same as [`download`](Self::download), plus I/O errors from writing.
    pub async fn save_to_dir(&self, file_id: &str, dir: &Path) -> Result<PathBuf> {
        let name = self
            .snapshot()
            .file(file_id)
            .map(|f| f.name.clone())
            .ok_or_else(|| SwarmError::UnknownFile(file_id.to_string()))?;
        let data = self.download(file_id).await?;
        Ok(sink::save_to_dir(dir, &name, &data).await?)
    }

    /// Save every fully received file into `dir`.
    ///
    /// # Errors
    ///
    /// Stops at the first file that cannot be downloaded or written.
    pub async fn download_all(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut saved = Vec::new();
        for file_id in self.snapshot().completed_downloads() {
            saved.push(self.save_to_dir(&file_id, dir).await?);
        }
        Ok(saved)
    }

    /// Latest published state
    #[must_use]
    pub fn snapshot(&self) -> Arc<SwarmState> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Receiver of state snapshots
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<SwarmState>> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Stopped`] if the loop ends first.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&SwarmState) -> bool) -> Result<Arc<SwarmState>> {
        let mut rx = self.subscribe();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| SwarmError::Stopped)?;
        Ok(Arc::clone(&state))
    }

    /// Feed a message received from the rendezvous service.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Stopped`] if the loop is gone.
    pub fn signaling_message(&self, msg: SignalMessage) -> Result<()> {
        self.command(Command::Signaling(msg))
    }

    /// Report that the rendezvous link is gone.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Stopped`] if the loop is gone.
    pub fn signaling_lost(&self) -> Result<()> {
        self.command(Command::SignalingLost)
    }

    /// Forward everything from a rendezvous client's inbound channel, then
    /// report the link lost when it closes.
    pub fn attach_signaling(&self, mut inbound: mpsc::UnboundedReceiver<SignalMessage>) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                if handle.signaling_message(msg).is_err() {
                    return;
                }
            }
            let _ = handle.signaling_lost();
        })
    }

    /// Stop the event loop
    pub fn shutdown(&self) {
        let _ = self.command(Command::Shutdown);
    }
}

/// The swarm event loop
pub struct Swarm {
    config: SwarmConfig,
    peer_id: String,
    state: SwarmState,
    connections: Arc<ConnectionManager>,
    engine: TransferEngine,
    signaling: mpsc::UnboundedSender<SignalMessage>,
    meter: SpeedMeter,
    retries: HashMap<String, u32>,
    retry_tasks: Vec<JoinHandle<()>>,
    retry_tx: mpsc::UnboundedSender<String>,
    snapshots: watch::Sender<Arc<SwarmState>>,
}

struct Inbox {
    commands: mpsc::UnboundedReceiver<Command>,
    transport: mpsc::UnboundedReceiver<TransportEvent>,
    engine: mpsc::UnboundedReceiver<EngineEvent>,
    retries: mpsc::UnboundedReceiver<String>,
}

impl Swarm {
    /// Start a swarm node on the current tokio runtime.
    ///
    /// Outbound signaling messages go to `signaling`; inbound ones must be
    /// fed through [`SwarmHandle::signaling_message`] (or
    /// [`SwarmHandle::attach_signaling`]).
    #[must_use]
    pub fn spawn(
        config: SwarmConfig,
        factory: Arc<dyn TransportFactory>,
        signaling: mpsc::UnboundedSender<SignalMessage>,
    ) -> SwarmHandle {
        let peer_id = config.peer_id.clone().unwrap_or_else(mesh::generate_peer_id);
        let state = SwarmState::new(peer_id.clone(), config.is_host);

        let (manager, transport) = ConnectionManager::new(factory);
        let connections = Arc::new(manager);
        let (engine, engine_events) = TransferEngine::new(Arc::clone(&connections), config.transfer.clone());
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (retry_tx, retries) = mpsc::unbounded_channel();
        let (snapshots, snapshots_rx) = watch::channel(Arc::new(state.clone()));

        tracing::info!(peer = %peer_id, host = config.is_host, "swarm node started");

        let swarm = Self {
            config,
            peer_id: peer_id.clone(),
            state,
            connections,
            engine,
            signaling,
            meter: SpeedMeter::new(),
            retries: HashMap::new(),
            retry_tasks: Vec::new(),
            retry_tx,
            snapshots,
        };
        let inbox = Inbox {
            commands,
            transport,
            engine: engine_events,
            retries,
        };
        tokio::spawn(swarm.run(inbox));

        SwarmHandle {
            peer_id: peer_id.into(),
            commands: commands_tx,
            snapshots: snapshots_rx,
        }
    }

    async fn run(mut self, mut inbox: Inbox) {
        let mut tick = tokio::time::interval(self.config.stats_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = inbox.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = inbox.transport.recv() => self.handle_transport_event(event).await,
                Some(event) = inbox.engine.recv() => {
                    self.engine.handle_event(&mut self.state, &mut self.meter, event);
                }
                Some(peer_id) = inbox.retries.recv() => self.retry(peer_id).await,
                _ = tick.tick() => {
                    let speed = self.meter.tick(Instant::now());
                    self.state.stats.apply_speed(speed);
                }
            }
            self.publish();
        }

        self.teardown();
        self.publish();
        tracing::info!(peer = %self.peer_id, "swarm node stopped");
    }

    fn publish(&self) {
        self.snapshots.send_replace(Arc::new(self.state.clone()));
    }

    /// Publish first so a caller woken by the reply sees its own change
    fn reply<T>(&self, tx: oneshot::Sender<T>, value: T) {
        self.publish();
        let _ = tx.send(value);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::JoinRoom { room_code, reply } => {
                let result = self.join_room(room_code);
                self.reply(reply, result);
            }
            Command::LeaveRoom { reply } => {
                self.teardown();
                self.reply(reply, ());
            }
            Command::AddFiles { files, reply } => {
                let metas = self.engine.add_files(&mut self.state, files);
                self.reply(reply, metas);
            }
            Command::RemoveFile { file_id, reply } => {
                let removed = self.engine.remove_file(&mut self.state, &file_id);
                self.reply(reply, removed);
            }
            Command::StartTransfer => self.engine.start_transfer(&mut self.state),
            Command::SendText { text, reply } => {
                let message = self.send_text(text);
                self.reply(reply, message);
            }
            Command::Download { file_id, reply } => {
                let _ = reply.send(self.engine.download(&self.state, &file_id));
            }
            Command::Signaling(msg) => self.handle_signaling(msg).await,
            Command::SignalingLost => {
                tracing::warn!(peer = %self.peer_id, "signaling link lost");
                self.state.set_error(SIGNALING_LOST_NOTICE);
            }
            Command::Shutdown => {}
        }
    }

    fn join_room(&mut self, room_code: String) -> Result<()> {
        if self.state.room_code.is_some() {
            self.teardown();
        }

        let msg = SignalMessage::JoinRoom {
            room_code: room_code.clone(),
            peer_id: self.peer_id.clone(),
        };
        if self.signaling.send(msg).is_err() {
            self.state.set_error(SIGNALING_LOST_NOTICE);
            return Err(SwarmError::invalid_state("signaling link closed"));
        }

        tracing::info!(room = %room_code, peer = %self.peer_id, "joining room");
        self.state.clear_error();
        self.state.room_code = Some(room_code);
        Ok(())
    }

    /// Total cancellation: transports, send tasks, retries, files, state
    fn teardown(&mut self) {
        if let Some(room) = &self.state.room_code {
            tracing::info!(room = %room, "leaving room");
        }
        self.connections.disconnect_all();
        self.engine.reset();
        for task in self.retry_tasks.drain(..) {
            task.abort();
        }
        self.retries.clear();
        self.meter.reset();
        self.state.reset();
    }

    fn send_text(&mut self, text: String) -> ChatMessage {
        let message = ChatMessage {
            id: generate_message_id(),
            text,
            sender_name: self.config.handshake_name(&self.peer_id),
            sender_id: self.peer_id.clone(),
            timestamp: unix_millis(),
            is_own: true,
        };

        let sent = self.connections.broadcast(&frame::encode_control(&ControlMessage::TextMessage {
            id: message.id.clone(),
            text: message.text.clone(),
            sender_name: message.sender_name.clone(),
            timestamp: message.timestamp,
        }));
        tracing::debug!(peers = sent, "chat message sent");

        self.state.push_message(message.clone());
        message
    }

    // ---- signaling ----

    async fn handle_signaling(&mut self, msg: SignalMessage) {
        if self.state.room_code.as_deref() != Some(msg.room_code()) {
            tracing::debug!(kind = msg.message_type(), room = %msg.room_code(), "signaling message for another room");
            return;
        }

        match msg {
            SignalMessage::RoomJoined { room_code, data, .. } => {
                tracing::info!(room = %room_code, peers = data.peers.len(), "joined room");
                for peer_id in &data.peers {
                    self.state.add_peer(peer_id, PeerRole::Seeder, PeerStatus::Connecting);
                }

                let limit = self
                    .config
                    .max_connections
                    .saturating_sub(self.connections.connected_count());
                for peer_id in mesh::select_peers(&data.peers, &self.peer_id, limit, self.config.peer_selection) {
                    if !self.connections.has_connection(&peer_id) {
                        self.dial(peer_id).await;
                    }
                }
            }
            SignalMessage::PeerJoined { peer_id, .. } => {
                if self.state.add_peer(&peer_id, PeerRole::Leecher, PeerStatus::Connecting) {
                    tracing::info!(peer = %peer_id, "peer joined");
                }
            }
            SignalMessage::PeerLeft { peer_id, .. } => {
                tracing::info!(peer = %peer_id, "peer left");
                self.state.remove_peer(&peer_id);
                self.connections.disconnect(&peer_id);
                self.retries.remove(&peer_id);
            }
            SignalMessage::RoomFull { room_code, .. } => {
                tracing::warn!(room = %room_code, "room is full");
                self.state.room_code = None;
                self.state
                    .set_error(format!("Room is full (max {DEFAULT_MAX_ROOM_SIZE} peers)"));
            }
            SignalMessage::Signal {
                peer_id: from,
                target_peer_id,
                data,
                ..
            } => {
                if target_peer_id != self.peer_id {
                    return;
                }
                if !self.connections.has_connection(&from) && !self.accept(&from).await {
                    return;
                }
                match self.connections.signal(&from, data.clone()) {
                    Ok(()) => {}
                    // The remote restarted negotiation as initiator after a failure
                    Err(TransportError::InvalidSignal(cause)) if !self.connections.is_connected(&from) => {
                        tracing::debug!(peer = %from, cause = %cause, "remote renegotiating, answering as responder");
                        if self.accept(&from).await {
                            if let Err(e) = self.connections.signal(&from, data) {
                                tracing::debug!(peer = %from, error = %e, "signal rejected by transport");
                            }
                        }
                    }
                    Err(e) => tracing::debug!(peer = %from, error = %e, "signal rejected by transport"),
                }
            }
            SignalMessage::JoinRoom { .. } => {}
        }
    }

    /// Create a responder transport for an inbound negotiation, mesh permitting
    async fn accept(&mut self, peer_id: &str) -> bool {
        if self.connections.connected_count() >= self.config.max_connections {
            tracing::debug!(peer = %peer_id, "mesh full, ignoring inbound connection");
            return false;
        }

        self.state.add_peer(peer_id, PeerRole::Peer, PeerStatus::Connecting);
        match self.connections.create_connection(peer_id, false).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(peer = %peer_id, error = %e, "failed to create transport");
                self.state.set_peer_status(peer_id, PeerStatus::Disconnected);
                false
            }
        }
    }

    async fn dial(&mut self, peer_id: String) {
        tracing::debug!(peer = %peer_id, "dialing peer");
        self.state.set_peer_status(&peer_id, PeerStatus::Connecting);

        if let Err(e) = self.connections.create_connection(&peer_id, true).await {
            tracing::warn!(peer = %peer_id, error = %e, "failed to create transport");
            self.state.set_peer_status(&peer_id, PeerStatus::Disconnected);
            self.schedule_retry(peer_id);
        }
    }

    // ---- retries ----

    /// Retries always redial as initiator, whichever side the failed
    /// transport was on
    fn schedule_retry(&mut self, peer_id: String) {
        if self.state.peer(&peer_id).is_none() {
            return;
        }

        let attempts = self.retries.entry(peer_id.clone()).or_insert(0);
        if *attempts >= self.config.retry.max_retries {
            tracing::info!(peer = %peer_id, attempts = *attempts, "giving up on peer");
            return;
        }
        let delay = self.config.retry.backoff_duration(*attempts);
        *attempts += 1;
        tracing::debug!(peer = %peer_id, attempt = *attempts, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        self.retry_tasks.retain(|task| !task.is_finished());
        let tx = self.retry_tx.clone();
        self.retry_tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(peer_id);
        }));
    }

    async fn retry(&mut self, peer_id: String) {
        if self.state.room_code.is_none()
            || self.state.peer(&peer_id).is_none()
            || self.connections.is_connected(&peer_id)
            || self.connections.connected_count() >= self.config.max_connections
        {
            return;
        }
        self.dial(peer_id).await;
    }

    // ---- transport ----

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        let Some(event) = self.connections.handle_event(event) else {
            return;
        };

        match event {
            ConnectionEvent::Connected { peer_id } => {
                tracing::info!(peer = %peer_id, "peer connected");
                self.retries.remove(&peer_id);
                if !self.state.set_peer_status(&peer_id, PeerStatus::Active) {
                    self.state.add_peer(&peer_id, PeerRole::Peer, PeerStatus::Active);
                }

                let handshake = ControlMessage::Handshake {
                    peer_id: self.peer_id.clone(),
                    display_name: self.config.handshake_name(&self.peer_id),
                    is_host: self.config.is_host,
                };
                self.connections.send(&peer_id, frame::encode_control(&handshake));
            }
            ConnectionEvent::Closed { peer_id } => {
                tracing::info!(peer = %peer_id, "peer disconnected");
                self.state.set_peer_status(&peer_id, PeerStatus::Disconnected);
            }
            ConnectionEvent::Error { peer_id, cause } => {
                tracing::warn!(peer = %peer_id, error = %cause, "transport error");
                self.state.set_peer_status(&peer_id, PeerStatus::Disconnected);
                self.schedule_retry(peer_id);
            }
            ConnectionEvent::LocalSignal { peer_id, payload } => {
                let Some(room_code) = self.state.room_code.clone() else {
                    return;
                };
                let msg = SignalMessage::Signal {
                    room_code,
                    peer_id: self.peer_id.clone(),
                    target_peer_id: peer_id,
                    data: payload,
                };
                if self.signaling.send(msg).is_err() {
                    self.state.set_error(SIGNALING_LOST_NOTICE);
                }
            }
            ConnectionEvent::Frame { peer_id, frame } => self.handle_frame(peer_id, frame),
        }
    }

    fn handle_frame(&mut self, peer_id: String, frame: Frame) {
        let msg = match frame {
            Frame::Chunk(chunk) => {
                self.engine.on_chunk(&mut self.state, &mut self.meter, &peer_id, chunk);
                return;
            }
            Frame::Control(msg) => msg,
        };
        tracing::debug!(peer = %peer_id, kind = msg.message_type(), "control message");

        match msg {
            ControlMessage::Handshake {
                display_name,
                is_host,
                ..
            } => {
                let display_name = if display_name.is_empty() {
                    fallback_name(&peer_id)
                } else {
                    display_name
                };
                let role = if is_host { PeerRole::Seeder } else { PeerRole::Leecher };
                self.state.apply_handshake(&peer_id, display_name, role);
                self.engine.replay_to(&peer_id);
            }
            ControlMessage::FileOffer { files } => {
                self.engine.on_file_offer(&mut self.state, &peer_id, files);
            }
            ControlMessage::FileComplete { file_id } => {
                self.engine.on_file_complete(&mut self.state, &peer_id, &file_id);
            }
            ControlMessage::TransferComplete => self.engine.on_transfer_complete(&mut self.state),
            ControlMessage::TextMessage {
                id,
                text,
                sender_name,
                timestamp,
            } => {
                self.state.push_message(ChatMessage {
                    id: if id.is_empty() { generate_message_id() } else { id },
                    text,
                    sender_name: if sender_name.is_empty() {
                        fallback_name(&peer_id)
                    } else {
                        sender_name
                    },
                    sender_id: peer_id,
                    timestamp: if timestamp == 0 { unix_millis() } else { timestamp },
                    is_own: false,
                });
            }
        }
    }
}

fn generate_message_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..u32::MAX);
    format!("{}-{suffix:08x}", unix_millis())
}
