//! Transfer engine.
//!
//! Sending side: a queue that pushes one file at a time to every connected
//! peer, plus per-peer replay of the whole catalogue for late joiners. The
//! pushing happens in spawned tasks that report progress back as
//! [`EngineEvent`]s; the swarm loop feeds those into
//! [`TransferEngine::handle_event`] so all state changes stay on one task.
//!
//! Receiving side: announced files and chunks are verified against the
//! catalogue. A file is complete once its chunk map holds every index,
//! whatever the sender claims.

use super::config::TransferConfig;
use super::connection::ConnectionManager;
use super::error::{Result, SwarmError};
use super::state::SwarmState;
use super::stats::SpeedMeter;
use crate::frame::{self, ChunkFrame};
use crate::message::ControlMessage;
use std::collections::VecDeque;
use std::sync::Arc;
use swarmdrop_files::{ChunkStore, FileChunker, FileId, FileMetadata, FilesError, SharedFile};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Progress reported by send tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// One chunk went out
    ChunkSent {
        /// File identifier
        file_id: FileId,
        /// Peers that accepted the chunk
        peers: Vec<String>,
        /// Chunk size
        bytes: u64,
        /// Sent by a late-joiner replay rather than the queue
        replay: bool,
    },
    /// The queue task finished a file and announced `file-complete`
    FileSent {
        /// File identifier
        file_id: FileId,
    },
}

/// Send queue, replay tasks and receive-side chunk storage
pub struct TransferEngine {
    connections: Arc<ConnectionManager>,
    config: TransferConfig,
    shared: Vec<SharedFile>,
    store: ChunkStore,
    queue: VecDeque<FileId>,
    active: Option<(FileId, JoinHandle<()>)>,
    replays: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("shared", &self.shared.len())
            .field("queued", &self.queue.len())
            .field("active", &self.active.as_ref().map(|(id, _)| id))
            .field("replays", &self.replays.len())
            .finish()
    }
}

impl TransferEngine {
    /// Create an engine; send-task progress arrives on the returned receiver
    #[must_use]
    pub fn new(
        connections: Arc<ConnectionManager>,
        config: TransferConfig,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let engine = Self {
            connections,
            config,
            shared: Vec::new(),
            store: ChunkStore::new(),
            queue: VecDeque::new(),
            active: None,
            replays: Vec::new(),
            events,
        };
        (engine, rx)
    }

    /// Whether anything is shared locally
    #[must_use]
    pub fn has_catalogue(&self) -> bool {
        !self.shared.is_empty()
    }

    /// Whether a queue task is running
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.active.is_some()
    }

    fn is_local(&self, file_id: &str) -> bool {
        self.shared.iter().any(|f| f.meta.id == file_id)
    }

    fn catalogue(&self) -> Vec<FileMetadata> {
        self.shared.iter().map(|f| f.meta.clone()).collect()
    }

    // ---- sending ----

    /// Share files. They are queued right away if any peer is connected.
    pub fn add_files(&mut self, state: &mut SwarmState, files: Vec<SharedFile>) -> Vec<FileMetadata> {
        let metas: Vec<FileMetadata> = files.iter().map(|f| f.meta.clone()).collect();

        for file in files {
            tracing::info!(file = %file.meta.id, name = %file.meta.name, bytes = file.meta.size, "sharing file");
            state.add_local_file(file.meta.clone());
            self.shared.push(file);
        }

        if self.connections.connected_count() > 0 {
            for meta in &metas {
                self.enqueue(&meta.id);
            }
            self.pump(state);
        }

        metas
    }

    /// Withdraw a file that has not started sending
    pub fn remove_file(&mut self, state: &mut SwarmState, file_id: &str) -> bool {
        if !state.remove_pending_file(file_id) {
            return false;
        }
        self.shared.retain(|f| f.meta.id != file_id);
        self.queue.retain(|id| id != file_id);
        tracing::debug!(file = %file_id, "file withdrawn");
        true
    }

    /// Queue every file still `pending`
    pub fn start_transfer(&mut self, state: &mut SwarmState) {
        let pending: Vec<FileId> = self
            .shared
            .iter()
            .filter(|f| state.status(&f.meta.id).is_some_and(|s| s.is_pending()))
            .map(|f| f.meta.id.clone())
            .collect();

        for file_id in &pending {
            self.enqueue(file_id);
        }
        self.pump(state);
    }

    fn enqueue(&mut self, file_id: &str) {
        let active = self.active.as_ref().is_some_and(|(id, _)| id == file_id);
        if !active && !self.queue.iter().any(|id| id == file_id) {
            self.queue.push_back(file_id.to_string());
        }
    }

    /// Start the next queued file unless one is in flight
    fn pump(&mut self, state: &mut SwarmState) {
        if self.active.is_some() {
            return;
        }

        while let Some(file_id) = self.queue.pop_front() {
            let Some(file) = self.shared.iter().find(|f| f.meta.id == file_id).cloned() else {
                continue;
            };
            if !state.status_mut(&file_id).is_some_and(|s| s.begin_sending()) {
                continue;
            }
            state.activate();

            tracing::info!(file = %file_id, chunks = file.meta.total_chunks, "sending file");
            let task = tokio::spawn(send_file(
                Arc::clone(&self.connections),
                file,
                self.catalogue(),
                self.config.clone(),
                self.events.clone(),
            ));
            self.active = Some((file_id, task));
            return;
        }
    }

    /// Replay the whole catalogue to one peer. Returns `false` if there is
    /// nothing to replay.
    pub fn replay_to(&mut self, peer_id: &str) -> bool {
        if self.shared.is_empty() {
            return false;
        }
        self.replays.retain(|task| !task.is_finished());

        tracing::debug!(peer = %peer_id, files = self.shared.len(), "replaying catalogue");
        self.replays.push(tokio::spawn(replay(
            Arc::clone(&self.connections),
            peer_id.to_string(),
            self.shared.clone(),
            self.config.clone(),
            self.events.clone(),
        )));
        true
    }

    /// Apply progress from a send task
    pub fn handle_event(&mut self, state: &mut SwarmState, meter: &mut SpeedMeter, event: EngineEvent) {
        match event {
            EngineEvent::ChunkSent {
                file_id,
                peers,
                bytes,
                replay,
            } => {
                for peer_id in &peers {
                    state.record_sent(peer_id, bytes);
                }
                meter.record(bytes * peers.len() as u64);

                if !replay && state.file(&file_id).is_some() {
                    if let Some(status) = state.status_mut(&file_id) {
                        status.record_chunk(bytes);
                    }
                    state.stats.record_chunk(bytes);
                }
            }
            EngineEvent::FileSent { file_id } => {
                if self.active.as_ref().map(|(id, _)| id) != Some(&file_id) {
                    return;
                }
                self.active = None;
                state.complete_file(&file_id);
                tracing::info!(file = %file_id, "file sent");

                self.pump(state);
                if self.active.is_none() {
                    let sent = self
                        .connections
                        .broadcast(&frame::encode_control(&ControlMessage::TransferComplete));
                    tracing::debug!(peers = sent, "send queue drained");
                    finish_if_complete(state);
                }
            }
        }
    }

    // ---- receiving ----

    /// Merge an announced catalogue. Returns `true` if it held new files.
    pub fn on_file_offer(&mut self, state: &mut SwarmState, from: &str, files: Vec<FileMetadata>) -> bool {
        let added = state.merge_files(files);
        if added.is_empty() {
            return false;
        }

        for meta in &added {
            tracing::debug!(peer = %from, file = %meta.id, name = %meta.name, "file announced");
            self.store.ensure(&meta.id);

            // Chunks that outran the offer were range-checked against their
            // own frame's total
            let dropped = self.store.truncate(&meta.id, meta.total_chunks);
            if dropped > 0 {
                tracing::debug!(peer = %from, file = %meta.id, dropped, "dropped early chunks past the announced total");
            }

            let early = self.store.count(&meta.id);
            if early > 0 {
                let bytes = self.store.stored_bytes(&meta.id);
                if let Some(status) = state.status_mut(&meta.id) {
                    status.chunks_done = early as u32;
                    status.bytes_done = bytes;
                }
                state.stats.chunks_completed += early as u64;
                state.stats.bytes_transferred += bytes;
                if self.store.is_complete(&meta.id, meta.total_chunks) && state.complete_file(&meta.id) {
                    tracing::info!(file = %meta.id, "file received");
                }
            }
        }

        state.activate();
        finish_if_complete(state);
        true
    }

    /// Store a chunk and update progress
    pub fn on_chunk(&mut self, state: &mut SwarmState, meter: &mut SpeedMeter, from: &str, chunk: ChunkFrame) {
        let ChunkFrame {
            file_id,
            index,
            total,
            data,
        } = chunk;

        if self.is_local(&file_id) {
            return;
        }

        let total = state.file(&file_id).map_or(total, |meta| meta.total_chunks);
        if index >= total {
            tracing::debug!(peer = %from, file = %file_id, index, total, "chunk index out of range");
            return;
        }

        let bytes = data.len() as u64;
        if !self.store.insert(&file_id, index, data) {
            tracing::trace!(peer = %from, file = %file_id, index, "duplicate chunk");
            return;
        }
        state.record_received(from, bytes);
        meter.record(bytes);

        let Some(status) = state.status_mut(&file_id) else {
            // Counted once the offer arrives
            return;
        };
        let finished = status.record_chunk(bytes);
        state.stats.record_chunk(bytes);

        let finished = finished || (self.store.is_complete(&file_id, total) && state.complete_file(&file_id));
        if finished {
            tracing::info!(peer = %from, file = %file_id, "file received");
            finish_if_complete(state);
        }
    }

    /// Honour a `file-complete` announcement only if every chunk is here
    pub fn on_file_complete(&mut self, state: &mut SwarmState, from: &str, file_id: &str) {
        if let Some(total) = state.file(file_id).map(|m| m.total_chunks) {
            if !self.is_local(file_id) && self.store.is_complete(file_id, total) && state.complete_file(file_id) {
                tracing::info!(peer = %from, file = %file_id, "file received");
            }
        }
        finish_if_complete(state);
    }

    /// Sender's queue drained
    pub fn on_transfer_complete(&mut self, state: &mut SwarmState) {
        finish_if_complete(state);
    }

    /// Reassemble a file.
    ///
    /// # Errors
    ///
    /// - [`SwarmError::UnknownFile`] if the file is not in the catalogue
    /// - [`FilesError::Incomplete`] if chunks are still missing
    /// - [`FilesError::MissingChunk`] if the store lost a chunk
    pub fn download(&self, state: &SwarmState, file_id: &str) -> Result<Vec<u8>> {
        if let Some(file) = self.shared.iter().find(|f| f.meta.id == file_id) {
            return Ok(file.data().to_vec());
        }

        let meta = state
            .file(file_id)
            .ok_or_else(|| SwarmError::UnknownFile(file_id.to_string()))?;

        if !state.status(file_id).is_some_and(|s| s.is_complete()) {
            return Err(FilesError::Incomplete {
                file_id: file_id.to_string(),
                have: self.store.count(file_id),
                total: meta.total_chunks,
            }
            .into());
        }

        Ok(self.store.reassemble(file_id, meta.total_chunks)?)
    }

    /// Cancel every task and forget all files
    pub fn reset(&mut self) {
        if let Some((_, task)) = self.active.take() {
            task.abort();
        }
        for task in self.replays.drain(..) {
            task.abort();
        }
        self.queue.clear();
        self.store.clear();
        self.shared.clear();
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        self.reset();
    }
}

fn finish_if_complete(state: &mut SwarmState) {
    if state.check_all_complete() {
        tracing::info!(files = state.files.len(), "all files complete");
    }
}

/// Push one file to every peer connected when it started
async fn send_file(
    connections: Arc<ConnectionManager>,
    file: SharedFile,
    catalogue: Vec<FileMetadata>,
    config: TransferConfig,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let file_id = file.meta.id.clone();
    let total = file.meta.total_chunks;
    let peers = connections.connected_peer_ids();

    connections.broadcast(&frame::encode_control(&ControlMessage::FileOffer { files: catalogue }));
    tokio::time::sleep(config.settle_delay).await;

    for (index, chunk) in FileChunker::new().chunks(file.data()) {
        let encoded = frame::encode_chunk(&file_id, index, total, chunk);
        let delivered: Vec<String> = peers
            .iter()
            .filter(|peer_id| connections.send(peer_id, encoded.clone()))
            .cloned()
            .collect();

        if delivered.len() < peers.len() {
            tracing::debug!(file = %file_id, index, missed = peers.len() - delivered.len(), "chunk not delivered to every peer");
        }

        let _ = events.send(EngineEvent::ChunkSent {
            file_id: file_id.clone(),
            peers: delivered,
            bytes: chunk.len() as u64,
            replay: false,
        });

        if config.pauses_after(index) {
            tokio::time::sleep(config.pause).await;
        }
    }

    connections.broadcast(&frame::encode_control(&ControlMessage::FileComplete {
        file_id: file_id.clone(),
    }));
    let _ = events.send(EngineEvent::FileSent { file_id });
}

/// Push the whole catalogue to one late joiner
async fn replay(
    connections: Arc<ConnectionManager>,
    peer_id: String,
    files: Vec<SharedFile>,
    config: TransferConfig,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let catalogue = files.iter().map(|f| f.meta.clone()).collect();
    if !connections.send(&peer_id, frame::encode_control(&ControlMessage::FileOffer { files: catalogue })) {
        return;
    }
    tokio::time::sleep(config.replay_delay).await;

    for file in &files {
        let file_id = &file.meta.id;
        for (index, chunk) in FileChunker::new().chunks(file.data()) {
            let encoded = frame::encode_chunk(file_id, index, file.meta.total_chunks, chunk);
            if !connections.send(&peer_id, encoded) {
                tracing::debug!(peer = %peer_id, file = %file_id, index, "replay aborted, peer gone");
                return;
            }
            let _ = events.send(EngineEvent::ChunkSent {
                file_id: file_id.clone(),
                peers: vec![peer_id.clone()],
                bytes: chunk.len() as u64,
                replay: true,
            });

            if config.pauses_after(index) {
                tokio::time::sleep(config.pause).await;
            }
        }

        connections.send(
            &peer_id,
            frame::encode_control(&ControlMessage::FileComplete {
                file_id: file_id.clone(),
            }),
        );
    }

    tracing::debug!(peer = %peer_id, files = files.len(), "replay finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::node::connection::ConnectionEvent;
    use crate::node::state::{PeerRole, PeerStatus, TransferState};
    use swarmdrop_files::FileTransferStatus;
    use swarmdrop_transport::{MemoryNetwork, TransportEvent};

    fn receiver() -> (TransferEngine, SwarmState, SpeedMeter) {
        let network = MemoryNetwork::new();
        let (manager, _rx) = ConnectionManager::new(Arc::new(network.factory("b")));
        let (engine, _events) = TransferEngine::new(Arc::new(manager), TransferConfig::default());
        (engine, SwarmState::new("b", false), SpeedMeter::new())
    }

    fn chunk(meta: &FileMetadata, data: &[u8], index: u32) -> ChunkFrame {
        ChunkFrame {
            file_id: meta.id.clone(),
            index,
            total: meta.total_chunks,
            data: FileChunker::new().chunk(data, index).unwrap().to_vec(),
        }
    }

    fn sample(size: usize) -> (FileMetadata, Vec<u8>) {
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        (FileMetadata::new("sample.bin", size as u64, None), data)
    }

    #[test]
    fn test_receive_in_any_order() {
        let (mut engine, mut state, mut meter) = receiver();
        let (meta, data) = sample(200_000);
        assert_eq!(meta.total_chunks, 4);

        assert!(engine.on_file_offer(&mut state, "a", vec![meta.clone()]));
        assert_eq!(state.transfer_state, TransferState::Active);
        assert_eq!(state.stats.total_bytes, 200_000);

        for index in [3, 1, 0, 2] {
            engine.on_chunk(&mut state, &mut meter, "a", chunk(&meta, &data, index));
        }

        let status = state.status(&meta.id).unwrap();
        assert_eq!(status.status, FileTransferStatus::Complete);
        assert_eq!(status.chunks_done, 4);
        assert_eq!(state.stats.bytes_transferred, 200_000);
        assert_eq!(state.transfer_state, TransferState::Complete);
        assert_eq!(engine.download(&state, &meta.id).unwrap(), data);
    }

    #[test]
    fn test_duplicates_not_double_counted() {
        let (mut engine, mut state, mut meter) = receiver();
        let (meta, data) = sample(150_000);
        engine.on_file_offer(&mut state, "a", vec![meta.clone()]);

        engine.on_chunk(&mut state, &mut meter, "a", chunk(&meta, &data, 0));
        let mut corrupt = chunk(&meta, &data, 0);
        corrupt.data.fill(0xEE);
        engine.on_chunk(&mut state, &mut meter, "c", corrupt);

        assert_eq!(state.status(&meta.id).unwrap().chunks_done, 1);
        assert_eq!(state.stats.chunks_completed, 1);

        engine.on_chunk(&mut state, &mut meter, "a", chunk(&meta, &data, 1));
        engine.on_chunk(&mut state, &mut meter, "a", chunk(&meta, &data, 2));
        assert_eq!(engine.download(&state, &meta.id).unwrap(), data);
    }

    #[test]
    fn test_out_of_range_chunk_ignored() {
        let (mut engine, mut state, mut meter) = receiver();
        let (meta, data) = sample(10);
        engine.on_file_offer(&mut state, "a", vec![meta.clone()]);

        let mut bad = chunk(&meta, &data, 0);
        bad.index = 5;
        bad.total = 9;
        engine.on_chunk(&mut state, &mut meter, "a", bad);
        assert_eq!(state.status(&meta.id).unwrap().chunks_done, 0);
    }

    #[test]
    fn test_announcement_needs_all_chunks() {
        let (mut engine, mut state, mut meter) = receiver();
        let (meta, data) = sample(200_000);
        engine.on_file_offer(&mut state, "a", vec![meta.clone()]);
        engine.on_chunk(&mut state, &mut meter, "a", chunk(&meta, &data, 0));

        engine.on_file_complete(&mut state, "a", &meta.id);
        assert_eq!(state.status(&meta.id).unwrap().status, FileTransferStatus::Receiving);
        assert!(matches!(
            engine.download(&state, &meta.id),
            Err(SwarmError::Files(FilesError::Incomplete { have: 1, total: 4, .. }))
        ));

        engine.on_transfer_complete(&mut state);
        assert_eq!(state.transfer_state, TransferState::Active);
    }

    #[test]
    fn test_chunks_before_offer() {
        let (mut engine, mut state, mut meter) = receiver();
        let (meta, data) = sample(100_000);

        engine.on_chunk(&mut state, &mut meter, "a", chunk(&meta, &data, 0));
        engine.on_chunk(&mut state, &mut meter, "a", chunk(&meta, &data, 1));
        assert!(state.status(&meta.id).is_none());

        engine.on_file_offer(&mut state, "a", vec![meta.clone()]);
        let status = state.status(&meta.id).unwrap();
        assert!(status.is_complete());
        assert_eq!(status.bytes_done, 100_000);
        assert_eq!(state.transfer_state, TransferState::Complete);
    }

    #[test]
    fn test_early_chunk_past_announced_total_is_dropped() {
        let (mut engine, mut state, mut meter) = receiver();
        let (meta, data) = sample(70_000);
        assert_eq!(meta.total_chunks, 2);

        let mut stray = chunk(&meta, &data, 0);
        stray.index = 5;
        stray.total = 10;
        engine.on_chunk(&mut state, &mut meter, "a", stray);
        engine.on_chunk(&mut state, &mut meter, "a", chunk(&meta, &data, 0));

        engine.on_file_offer(&mut state, "a", vec![meta.clone()]);
        let status = state.status(&meta.id).unwrap();
        assert_eq!(status.status, FileTransferStatus::Receiving);
        assert_eq!(status.chunks_done, 1);
        assert_eq!(state.stats.chunks_completed, 1);
        assert_eq!(state.transfer_state, TransferState::Active);
        assert!(matches!(
            engine.download(&state, &meta.id),
            Err(SwarmError::Files(FilesError::Incomplete { have: 1, total: 2, .. }))
        ));

        engine.on_chunk(&mut state, &mut meter, "a", chunk(&meta, &data, 1));
        assert!(state.status(&meta.id).unwrap().is_complete());
        assert_eq!(state.transfer_state, TransferState::Complete);
        assert_eq!(engine.download(&state, &meta.id).unwrap(), data);
    }

    #[test]
    fn test_repeated_offer_is_merged_once() {
        let (mut engine, mut state, _) = receiver();
        let (meta, _) = sample(10);
        assert!(engine.on_file_offer(&mut state, "a", vec![meta.clone()]));
        assert!(!engine.on_file_offer(&mut state, "c", vec![meta]));
        assert_eq!(state.files.len(), 1);
    }

    #[test]
    fn test_download_unknown_file() {
        let (engine, state, _) = receiver();
        assert!(matches!(engine.download(&state, "nope"), Err(SwarmError::UnknownFile(_))));
    }

    #[tokio::test]
    async fn test_pending_files_wait_for_peers() {
        let network = MemoryNetwork::new();
        let (manager, _rx) = ConnectionManager::new(Arc::new(network.factory("a")));
        let (mut engine, _events) = TransferEngine::new(Arc::new(manager), TransferConfig::default());
        let mut state = SwarmState::new("a", true);

        let first = SharedFile::new("one.txt", Some("text/plain"), b"one".to_vec());
        let second = SharedFile::new("two.txt", None, b"two".to_vec());
        let metas = engine.add_files(&mut state, vec![first, second]);

        assert!(!engine.is_sending());
        assert!(state.status(&metas[0].id).unwrap().is_pending());
        assert!(engine.remove_file(&mut state, &metas[0].id));
        assert_eq!(state.files.len(), 1);
        assert_eq!(engine.download(&state, &metas[1].id).unwrap(), b"two");

        // start_transfer with no peers still runs the queue locally
        engine.start_transfer(&mut state);
        assert!(engine.is_sending());
        assert!(!engine.remove_file(&mut state, &metas[1].id));
    }

    async fn linked_pair(network: &MemoryNetwork) -> (Arc<ConnectionManager>, ConnectionManager, mpsc::UnboundedReceiver<TransportEvent>) {
        let (a, mut a_rx) = ConnectionManager::new(Arc::new(network.factory("a")));
        let (b, mut b_rx) = ConnectionManager::new(Arc::new(network.factory("b")));

        a.create_connection("b", true).await.unwrap();
        let offer = match a.handle_event(a_rx.recv().await.unwrap()) {
            Some(ConnectionEvent::LocalSignal { payload, .. }) => payload,
            other => panic!("unexpected {other:?}"),
        };
        b.create_connection("a", false).await.unwrap();
        b.signal("a", offer).unwrap();

        assert!(a.handle_event(a_rx.recv().await.unwrap()).is_some());
        assert!(b.handle_event(b_rx.recv().await.unwrap()).is_some());
        (Arc::new(a), b, b_rx)
    }

    fn received_frames(b: &ConnectionManager, rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            if let Some(ConnectionEvent::Frame { frame, .. }) = b.handle_event(raw) {
                frames.push(frame);
            }
        }
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_sends_offer_chunks_and_completion() {
        let network = MemoryNetwork::new();
        let (a, b, mut b_rx) = linked_pair(&network).await;
        let (mut engine, mut events) = TransferEngine::new(a, TransferConfig::default());
        let mut state = SwarmState::new("a", true);
        state.add_peer("b", PeerRole::Leecher, PeerStatus::Active);
        let mut meter = SpeedMeter::new();

        let (_, data) = sample(200_000);
        let metas = engine.add_files(&mut state, vec![SharedFile::new("big.bin", None, data.clone())]);
        let file_id = metas[0].id.clone();
        assert!(engine.is_sending());
        assert_eq!(state.status(&file_id).unwrap().status, FileTransferStatus::Sending);

        while engine.is_sending() {
            let event = events.recv().await.unwrap();
            engine.handle_event(&mut state, &mut meter, event);
        }

        assert!(state.status(&file_id).unwrap().is_complete());
        assert_eq!(state.transfer_state, TransferState::Complete);
        assert_eq!(state.peer("b").unwrap().chunks_sent, 4);

        let frames = received_frames(&b, &mut b_rx);
        assert!(matches!(&frames[0], Frame::Control(ControlMessage::FileOffer { files }) if files.len() == 1));
        let sizes: Vec<usize> = frames[1..5]
            .iter()
            .map(|f| match f {
                Frame::Chunk(c) => c.data.len(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![65_536, 65_536, 65_536, 3_392]);
        assert_eq!(frames[5], Frame::Control(ControlMessage::FileComplete { file_id }));
        assert_eq!(frames[6], Frame::Control(ControlMessage::TransferComplete));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_to_one_peer() {
        let network = MemoryNetwork::new();
        let (a, b, mut b_rx) = linked_pair(&network).await;
        let (mut engine, mut events) = TransferEngine::new(a, TransferConfig::default());
        let mut state = SwarmState::new("a", true);
        state.add_peer("b", PeerRole::Leecher, PeerStatus::Active);
        let mut meter = SpeedMeter::new();

        // Shared before b connected, so it was never queued
        let file = SharedFile::new("late.txt", None, b"late".to_vec());
        let file_id = file.meta.id.clone();
        state.add_local_file(file.meta.clone());
        engine.shared.push(file);

        assert!(engine.replay_to("b"));
        tokio::time::sleep(TransferConfig::default().replay_delay * 2).await;

        let frames = received_frames(&b, &mut b_rx);
        assert_eq!(frames.len(), 3);
        assert!(matches!(&frames[0], Frame::Control(ControlMessage::FileOffer { files }) if files[0].id == file_id));
        assert!(matches!(&frames[1], Frame::Chunk(c) if c.data == b"late"));
        assert_eq!(frames[2], Frame::Control(ControlMessage::FileComplete { file_id: file_id.clone() }));

        while let Ok(event) = events.try_recv() {
            engine.handle_event(&mut state, &mut meter, event);
        }
        assert!(state.status(&file_id).unwrap().is_pending());
        assert_eq!(state.peer("b").unwrap().chunks_sent, 1);
    }

    #[test]
    fn test_replay_needs_catalogue() {
        let (mut engine, _, _) = receiver();
        assert!(!engine.replay_to("c"));
    }
}
