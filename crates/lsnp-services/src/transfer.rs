//! File transfer — offers, chunking, reassembly, and completion.
//!
//! Sender side: FILE_OFFER, wait for the receiver's decision, then stream
//! base64 FILE_CHUNKs with a small inter-chunk delay. Receiver side: hold
//! the offer until the user decides, collect chunks by index, reassemble,
//! and answer with FILE_RECEIVED. Each chunk rides the normal reliability
//! layer, so loss is handled per chunk and ordering is reconstructed here.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;

use lsnp_core::message::{new_message_id, FileChunk, FileOffer, FileReceived, FileResponse};
use lsnp_core::{now_unix, token, PeerId, Scope};

use crate::outbound::{Outbound, OutboundSender};

/// Bytes of file data per chunk, before base64 expansion.
pub const MAX_CHUNK_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no transfer with id {0}")]
    UnknownTransfer(String),
    #[error("transfer {0} is not awaiting a decision")]
    NotPending(String),
    #[error("offer was rejected by the receiver")]
    Rejected,
    #[error("no response to the offer within the window")]
    OfferTimeout,
    #[error("reassembled size {actual} does not match advertised {expected}")]
    FilesizeMismatch { expected: u64, actual: u64 },
    #[error("chunk {0} missing at reassembly")]
    MissingChunk(u32),
    #[error("outbound channel closed")]
    ChannelClosed,
}

/// Knobs the daemon passes down from config.
#[derive(Debug, Clone)]
pub struct TransferTiming {
    pub token_ttl_secs: u64,
    pub offer_timeout: Duration,
    pub stall_timeout: Duration,
    pub chunk_delay: Duration,
}

impl Default for TransferTiming {
    fn default() -> Self {
        Self {
            token_ttl_secs: 600,
            offer_timeout: Duration::from_secs(60),
            stall_timeout: Duration::from_secs(60),
            chunk_delay: Duration::from_millis(100),
        }
    }
}

enum IncomingState {
    /// Offer received, waiting for the local user's decision.
    Offered,
    /// Accepted; chunks accumulate keyed by index.
    Receiving {
        chunks: HashMap<u32, Bytes>,
        total_chunks: Option<u32>,
    },
}

struct IncomingTransfer {
    offer: FileOffer,
    reply_addr: SocketAddr,
    state: IncomingState,
    last_progress: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutgoingState {
    AwaitingResponse,
    Streaming,
    AwaitingReceipt,
}

struct OutgoingTransfer {
    offer: FileOffer,
    dest: SocketAddr,
    data: Bytes,
    state: OutgoingState,
    started: Instant,
}

/// One line of `transfers` output.
#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub file_id: String,
    pub peer: PeerId,
    pub filename: String,
    pub direction: &'static str,
    pub state: String,
}

/// The engine owns its transfer tables and borrows the transport through
/// the outbound channel.
pub struct FileTransferEngine {
    me: PeerId,
    download_root: PathBuf,
    outbound: OutboundSender,
    timing: TransferTiming,
    incoming: DashMap<String, IncomingTransfer>,
    outgoing: DashMap<String, OutgoingTransfer>,
    /// Sender-side accept/reject waiters, resolved by FILE_ACCEPT/FILE_REJECT.
    offer_waiters: DashMap<String, oneshot::Sender<bool>>,
}

impl FileTransferEngine {
    pub fn new(
        me: PeerId,
        download_root: PathBuf,
        outbound: OutboundSender,
        timing: TransferTiming,
    ) -> Arc<Self> {
        Arc::new(Self {
            me,
            download_root,
            outbound,
            timing,
            incoming: DashMap::new(),
            outgoing: DashMap::new(),
            offer_waiters: DashMap::new(),
        })
    }

    // ── Sender side ──────────────────────────────────────────────────────────

    /// Offer `path` to a peer and, once accepted, stream its chunks.
    ///
    /// Returns the FILEID after the receiver accepts; chunk streaming
    /// continues in a background task. Rejection and the 60 s silence
    /// window both abort the transfer.
    pub async fn offer_file(
        self: &Arc<Self>,
        to: PeerId,
        dest: SocketAddr,
        path: &Path,
        description: &str,
    ) -> Result<String, TransferError> {
        let data = Bytes::from(std::fs::read(path)?);
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download")
            .to_string();

        let file_id = uuid::Uuid::new_v4().to_string();
        let offer = FileOffer {
            from: self.me.clone(),
            to,
            file_id: file_id.clone(),
            filename,
            filesize: data.len() as u64,
            filetype: filetype_for(path).to_string(),
            description: description.to_string(),
            message_id: new_message_id(),
            timestamp: now_unix(),
            token: token::mint(&self.me, Scope::File, self.timing.token_ttl_secs),
        };

        let (tx, rx) = oneshot::channel();
        self.offer_waiters.insert(file_id.clone(), tx);
        self.outgoing.insert(
            file_id.clone(),
            OutgoingTransfer {
                offer: offer.clone(),
                dest,
                data,
                state: OutgoingState::AwaitingResponse,
                started: Instant::now(),
            },
        );

        self.send(dest, offer.to_record(), true).await?;
        tracing::info!(
            file_id = %file_id,
            filename = %offer.filename,
            bytes = offer.filesize,
            to = %offer.to,
            "file offered"
        );

        let accepted = match tokio::time::timeout(self.timing.offer_timeout, rx).await {
            Ok(Ok(accepted)) => accepted,
            // Waiter dropped or window elapsed: nobody answered.
            _ => {
                self.outgoing.remove(&file_id);
                self.offer_waiters.remove(&file_id);
                return Err(TransferError::OfferTimeout);
            }
        };

        if !accepted {
            self.outgoing.remove(&file_id);
            tracing::info!(file_id = %file_id, "offer rejected by receiver");
            return Err(TransferError::Rejected);
        }

        if let Some(mut entry) = self.outgoing.get_mut(&file_id) {
            entry.state = OutgoingState::Streaming;
        }

        let engine = self.clone();
        let stream_id = file_id.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.stream_chunks(&stream_id).await {
                tracing::warn!(file_id = %stream_id, error = %e, "chunk streaming aborted");
                engine.outgoing.remove(&stream_id);
            }
        });

        Ok(file_id)
    }

    /// Emit every chunk of an accepted outgoing transfer, pacing sends so
    /// the receiver's buffers keep up.
    async fn stream_chunks(&self, file_id: &str) -> Result<(), TransferError> {
        let (offer, dest, data) = {
            let entry = self
                .outgoing
                .get(file_id)
                .ok_or_else(|| TransferError::UnknownTransfer(file_id.to_string()))?;
            (entry.offer.clone(), entry.dest, entry.data.clone())
        };

        let total_chunks = total_chunks_for(data.len());
        // An empty file still ships one zero-length chunk so the receiver
        // observes completion.
        let slices: Vec<&[u8]> = if data.is_empty() {
            vec![&[][..]]
        } else {
            data.chunks(MAX_CHUNK_SIZE).collect()
        };
        for (index, slice) in slices.into_iter().enumerate() {
            // The transfer may be aborted underneath us (stall sweep,
            // receipt); stop streaming the moment the entry is gone.
            if !self.outgoing.contains_key(file_id) {
                tracing::debug!(file_id, "transfer gone, streaming stopped");
                return Ok(());
            }
            let chunk = FileChunk {
                from: self.me.clone(),
                to: offer.to.clone(),
                file_id: file_id.to_string(),
                chunk_index: index as u32,
                total_chunks,
                chunk_size: slice.len() as u32,
                data: BASE64.encode(slice),
                message_id: new_message_id(),
                timestamp: now_unix(),
                token: token::mint(&self.me, Scope::File, self.timing.token_ttl_secs),
            };
            self.send(dest, chunk.to_record(), true).await?;
            tokio::time::sleep(self.timing.chunk_delay).await;
        }

        if let Some(mut entry) = self.outgoing.get_mut(file_id) {
            entry.state = OutgoingState::AwaitingReceipt;
        }
        tracing::info!(file_id, total_chunks, "all chunks queued");
        Ok(())
    }

    /// FILE_ACCEPT / FILE_REJECT from the receiver.
    pub fn handle_response(&self, response: &FileResponse) {
        match self.offer_waiters.remove(&response.file_id) {
            Some((_, waiter)) => {
                let _ = waiter.send(response.accepted);
            }
            None => {
                tracing::debug!(file_id = %response.file_id, "response for unknown offer, dropping");
            }
        }
    }

    /// FILE_RECEIVED from the receiver — the transfer is done on their end.
    pub fn handle_received(&self, received: &FileReceived) {
        match self.outgoing.remove(&received.file_id) {
            Some((_, transfer)) => {
                tracing::info!(
                    file_id = %received.file_id,
                    filename = %transfer.offer.filename,
                    status = %received.status,
                    "transfer acknowledged by receiver"
                );
            }
            None => {
                tracing::debug!(file_id = %received.file_id, "receipt for unknown transfer");
            }
        }
    }

    // ── Receiver side ────────────────────────────────────────────────────────

    /// An inbound FILE_OFFER. Re-offers for a known FILEID are dropped.
    pub fn handle_offer(&self, offer: FileOffer, reply_addr: SocketAddr) {
        if self.incoming.contains_key(&offer.file_id) {
            tracing::debug!(file_id = %offer.file_id, "duplicate offer, dropping");
            return;
        }
        tracing::info!(
            file_id = %offer.file_id,
            from = %offer.from,
            filename = %offer.filename,
            bytes = offer.filesize,
            "file offer received"
        );
        self.incoming.insert(
            offer.file_id.clone(),
            IncomingTransfer {
                offer,
                reply_addr,
                state: IncomingState::Offered,
                last_progress: Instant::now(),
            },
        );
    }

    /// Accept a pending offer and tell the sender to start streaming.
    pub async fn accept(&self, file_id: &str) -> Result<(), TransferError> {
        let (offer, reply_addr) = {
            let mut entry = self
                .incoming
                .get_mut(file_id)
                .ok_or_else(|| TransferError::UnknownTransfer(file_id.to_string()))?;
            if !matches!(entry.state, IncomingState::Offered) {
                return Err(TransferError::NotPending(file_id.to_string()));
            }
            entry.state = IncomingState::Receiving {
                chunks: HashMap::new(),
                total_chunks: None,
            };
            entry.last_progress = Instant::now();
            (entry.offer.clone(), entry.reply_addr)
        };

        let response = FileResponse {
            accepted: true,
            from: self.me.clone(),
            to: offer.from.clone(),
            file_id: file_id.to_string(),
            message_id: new_message_id(),
            timestamp: now_unix(),
            token: token::mint(&self.me, Scope::File, self.timing.token_ttl_secs),
        };
        self.send(reply_addr, response.to_record(), true).await?;
        tracing::info!(file_id, from = %offer.from, "offer accepted");
        Ok(())
    }

    /// Reject a pending offer and forget it.
    pub async fn reject(&self, file_id: &str) -> Result<(), TransferError> {
        let (offer, reply_addr) = {
            let entry = self
                .incoming
                .get(file_id)
                .ok_or_else(|| TransferError::UnknownTransfer(file_id.to_string()))?;
            if !matches!(entry.state, IncomingState::Offered) {
                return Err(TransferError::NotPending(file_id.to_string()));
            }
            (entry.offer.clone(), entry.reply_addr)
        };
        self.incoming.remove(file_id);

        let response = FileResponse {
            accepted: false,
            from: self.me.clone(),
            to: offer.from.clone(),
            file_id: file_id.to_string(),
            message_id: new_message_id(),
            timestamp: now_unix(),
            token: token::mint(&self.me, Scope::File, self.timing.token_ttl_secs),
        };
        self.send(reply_addr, response.to_record(), true).await?;
        tracing::info!(file_id, from = %offer.from, "offer rejected");
        Ok(())
    }

    /// An inbound FILE_CHUNK. Returns the written path once the final chunk
    /// lands; chunks for unknown, unaccepted, or completed transfers drop.
    pub async fn handle_chunk(&self, chunk: &FileChunk) -> Result<Option<PathBuf>, TransferError> {
        // Decode at the chunk boundary: a corrupt chunk is rejected here and
        // a retry can still repair the transfer.
        let payload = match BASE64.decode(&chunk.data) {
            Ok(p) => Bytes::from(p),
            Err(e) => {
                tracing::warn!(
                    file_id = %chunk.file_id,
                    index = chunk.chunk_index,
                    error = %e,
                    "undecodable chunk, dropping"
                );
                return Ok(None);
            }
        };
        if payload.len() != chunk.chunk_size as usize {
            tracing::warn!(
                file_id = %chunk.file_id,
                index = chunk.chunk_index,
                advertised = chunk.chunk_size,
                actual = payload.len(),
                "chunk size mismatch, dropping"
            );
            return Ok(None);
        }

        let complete = {
            let Some(mut entry) = self.incoming.get_mut(&chunk.file_id) else {
                tracing::debug!(file_id = %chunk.file_id, "chunk for unknown transfer, dropping");
                return Ok(None);
            };
            let IncomingState::Receiving {
                chunks,
                total_chunks,
            } = &mut entry.state
            else {
                tracing::debug!(file_id = %chunk.file_id, "chunk before acceptance, dropping");
                return Ok(None);
            };

            if chunk.chunk_index >= chunk.total_chunks {
                tracing::warn!(
                    file_id = %chunk.file_id,
                    index = chunk.chunk_index,
                    total = chunk.total_chunks,
                    "chunk index out of range, dropping"
                );
                return Ok(None);
            }
            let total = *total_chunks.get_or_insert(chunk.total_chunks);
            if chunk.total_chunks != total {
                tracing::warn!(file_id = %chunk.file_id, "inconsistent TOTAL_CHUNKS, dropping");
                return Ok(None);
            }
            if chunks.contains_key(&chunk.chunk_index) {
                tracing::debug!(
                    file_id = %chunk.file_id,
                    index = chunk.chunk_index,
                    "duplicate chunk, dropping"
                );
                return Ok(None);
            }

            chunks.insert(chunk.chunk_index, payload);
            let complete = chunks.len() as u32 == total;
            entry.last_progress = Instant::now();
            complete
        };

        if !complete {
            return Ok(None);
        }

        // Take the whole entry out before touching the filesystem.
        let (_, transfer) = self
            .incoming
            .remove(&chunk.file_id)
            .ok_or_else(|| TransferError::UnknownTransfer(chunk.file_id.clone()))?;
        let path = self.finish_transfer(transfer).await?;
        Ok(Some(path))
    }

    /// Reassemble, verify, write to disk, and acknowledge with FILE_RECEIVED.
    async fn finish_transfer(&self, transfer: IncomingTransfer) -> Result<PathBuf, TransferError> {
        let IncomingState::Receiving {
            chunks,
            total_chunks,
        } = transfer.state
        else {
            return Err(TransferError::UnknownTransfer(transfer.offer.file_id));
        };
        let total = total_chunks.unwrap_or(0);

        let mut data = Vec::with_capacity(transfer.offer.filesize as usize);
        for index in 0..total {
            let chunk = chunks
                .get(&index)
                .ok_or(TransferError::MissingChunk(index))?;
            data.extend_from_slice(chunk);
        }

        if data.len() as u64 != transfer.offer.filesize {
            tracing::warn!(
                file_id = %transfer.offer.file_id,
                expected = transfer.offer.filesize,
                actual = data.len(),
                "filesize mismatch, aborting without writing"
            );
            return Err(TransferError::FilesizeMismatch {
                expected: transfer.offer.filesize,
                actual: data.len() as u64,
            });
        }

        let dir = self
            .download_root
            .join(transfer.offer.from.to_string())
            .join("downloads");
        std::fs::create_dir_all(&dir)?;
        let path = collision_free_path(&dir, &transfer.offer.filename);
        std::fs::write(&path, &data)?;

        tracing::info!(
            file_id = %transfer.offer.file_id,
            path = %path.display(),
            bytes = data.len(),
            "file received and reassembled"
        );

        let receipt = FileReceived {
            from: self.me.clone(),
            to: transfer.offer.from.clone(),
            file_id: transfer.offer.file_id.clone(),
            status: "COMPLETE".to_string(),
            message_id: new_message_id(),
            timestamp: now_unix(),
            token: token::mint(&self.me, Scope::File, self.timing.token_ttl_secs),
        };
        // FILE_RECEIVED is itself the terminal acknowledgment — never ACKed,
        // so it goes out fire-and-forget.
        self.send(transfer.reply_addr, receipt.to_record(), false)
            .await?;
        Ok(path)
    }

    // ── Housekeeping and introspection ───────────────────────────────────────

    /// Drop transfers that have made no progress within the stall window.
    /// Called periodically by the daemon.
    pub fn abort_stalled(&self) {
        let stall = self.timing.stall_timeout;
        self.incoming.retain(|file_id, transfer| {
            let alive = transfer.last_progress.elapsed() < stall;
            if !alive {
                tracing::warn!(file_id, "incoming transfer stalled, aborting");
            }
            alive
        });
        self.outgoing.retain(|file_id, transfer| {
            // Offer/streaming phases have their own timeouts; receipts may
            // never come if the peer died mid-transfer.
            let alive = transfer.state != OutgoingState::AwaitingReceipt
                || transfer.started.elapsed() < stall * 4;
            if !alive {
                tracing::warn!(file_id, "no receipt from receiver, dropping transfer");
            }
            alive
        });
    }

    /// Offers waiting for a local accept/reject decision.
    pub fn pending_offers(&self) -> Vec<FileOffer> {
        self.incoming
            .iter()
            .filter(|e| matches!(e.state, IncomingState::Offered))
            .map(|e| e.offer.clone())
            .collect()
    }

    /// All live transfers, both directions.
    pub fn transfers(&self) -> Vec<TransferSummary> {
        let mut all: Vec<TransferSummary> = self
            .incoming
            .iter()
            .map(|e| TransferSummary {
                file_id: e.offer.file_id.clone(),
                peer: e.offer.from.clone(),
                filename: e.offer.filename.clone(),
                direction: "incoming",
                state: match &e.state {
                    IncomingState::Offered => "offered".to_string(),
                    IncomingState::Receiving {
                        chunks,
                        total_chunks,
                    } => match total_chunks {
                        Some(total) => format!("receiving {}/{}", chunks.len(), total),
                        None => "receiving".to_string(),
                    },
                },
            })
            .collect();
        all.extend(self.outgoing.iter().map(|e| TransferSummary {
            file_id: e.offer.file_id.clone(),
            peer: e.offer.to.clone(),
            filename: e.offer.filename.clone(),
            direction: "outgoing",
            state: match e.state {
                OutgoingState::AwaitingResponse => "awaiting response".to_string(),
                OutgoingState::Streaming => "sending".to_string(),
                OutgoingState::AwaitingReceipt => "awaiting receipt".to_string(),
            },
        }));
        all
    }

    async fn send(
        &self,
        dest: SocketAddr,
        record: lsnp_core::Record,
        reliable: bool,
    ) -> Result<(), TransferError> {
        self.outbound
            .send(Outbound {
                dest,
                record,
                reliable,
            })
            .await
            .map_err(|_| TransferError::ChannelClosed)
    }
}

/// Chunk count for a file of `len` bytes. Empty files still send one chunk
/// so the receiver observes a completion.
fn total_chunks_for(len: usize) -> u32 {
    (len.max(1)).div_ceil(MAX_CHUNK_SIZE) as u32
}

/// MIME type from the file extension. Unknown extensions fall back to the
/// generic byte-stream type.
fn filetype_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("txt") | Some("md") | Some("log") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// First non-existing path for `filename` in `dir`, suffixing `(n)` before
/// the extension on collision.
fn collision_free_path(dir: &Path, filename: &str) -> PathBuf {
    // Strip any directory components a hostile sender put in FILENAME.
    let filename = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download");

    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }

    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    let ext = Path::new(filename).extension().and_then(|e| e.to_str());

    for n in 1.. {
        let name = match ext {
            Some(ext) => format!("{stem} ({n}).{ext}"),
            None => format!("{stem} ({n})"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}
