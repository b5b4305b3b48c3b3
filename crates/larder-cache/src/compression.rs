//! Compression offload worker
//!
//! Compression runs on a dedicated task fed by an `mpsc` channel. Each request
//! carries a correlation id and a `oneshot` reply; the caller waits at most
//! [`CompressionConfig::timeout`]. Without a running worker the codec runs on
//! the caller's path, but only for payloads up to the configured fallback
//! limit.

use std::{
    io::{Read, Write},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{
    read::{DeflateDecoder, GzDecoder},
    write::{DeflateEncoder, GzEncoder},
    Compression,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::{
    config::{CompressionAlgorithm, CompressionConfig},
    error::{CacheError, Result},
};

/// Direction of a codec job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionOp {
    Compress,
    Decompress,
}

struct CompressionRequest {
    id: u64,
    op: CompressionOp,
    payload: String,
    reply: oneshot::Sender<CompressionResponse>,
}

struct CompressionResponse {
    id: u64,
    result: Result<String>,
}

/// Stateless codec: JSON text in, base64 of the compressed bytes out
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    algorithm: CompressionAlgorithm,
    level: u32,
}

impl Codec {
    pub fn new(algorithm: CompressionAlgorithm, level: u32) -> Self {
        Self { algorithm, level }
    }

    pub fn compress(&self, text: &str) -> Result<String> {
        let level = Compression::new(self.level);
        let bytes = match self.algorithm {
            CompressionAlgorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder.write_all(text.as_bytes())?;
                encoder.finish()?
            }
            CompressionAlgorithm::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), level);
                encoder.write_all(text.as_bytes())?;
                encoder.finish()?
            }
        };
        Ok(STANDARD.encode(bytes))
    }

    pub fn decompress(&self, encoded: &str) -> Result<String> {
        let bytes = STANDARD.decode(encoded).map_err(|e| CacheError::Compression {
            message: format!("invalid base64 payload: {e}"),
        })?;

        let mut text = String::new();
        let outcome = match self.algorithm {
            CompressionAlgorithm::Gzip => GzDecoder::new(bytes.as_slice()).read_to_string(&mut text),
            CompressionAlgorithm::Deflate => {
                DeflateDecoder::new(bytes.as_slice()).read_to_string(&mut text)
            }
        };
        outcome.map_err(|e| CacheError::Compression {
            message: e.to_string(),
        })?;
        Ok(text)
    }

    fn run(&self, op: CompressionOp, payload: &str) -> Result<String> {
        match op {
            CompressionOp::Compress => self.compress(payload),
            CompressionOp::Decompress => self.decompress(payload),
        }
    }
}

/// Handle to the compression worker task
pub struct CompressionWorker {
    codec: Codec,
    sender: Option<mpsc::Sender<CompressionRequest>>,
    timeout: Duration,
    sync_fallback_limit: usize,
    next_id: AtomicU64,
}

impl CompressionWorker {
    /// Spawn the worker task on the current tokio runtime.
    ///
    /// Falls back to inline mode when called outside a runtime.
    pub fn spawn(config: &CompressionConfig) -> Self {
        let mut worker = Self::inline(config);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, compression runs inline");
            return worker;
        };

        let (sender, mut receiver) = mpsc::channel::<CompressionRequest>(64);
        let codec = worker.codec;
        handle.spawn(async move {
            while let Some(request) = receiver.recv().await {
                let CompressionRequest {
                    id,
                    op,
                    payload,
                    reply,
                } = request;
                let result = tokio::task::spawn_blocking(move || codec.run(op, &payload))
                    .await
                    .unwrap_or_else(|e| {
                        Err(CacheError::Compression {
                            message: format!("codec task failed: {e}"),
                        })
                    });
                // Receiver gone means the caller timed out
                let _ = reply.send(CompressionResponse { id, result });
            }
            debug!("Compression worker stopped");
        });

        worker.sender = Some(sender);
        worker
    }

    /// Worker without a background task; the codec runs on the caller's path
    pub fn inline(config: &CompressionConfig) -> Self {
        Self {
            codec: Codec::new(config.algorithm, config.level),
            sender: None,
            timeout: config.timeout(),
            sync_fallback_limit: config.sync_fallback_limit_bytes,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_offloaded(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub async fn compress(&self, payload: &str) -> Result<String> {
        self.submit(CompressionOp::Compress, payload).await
    }

    pub async fn decompress(&self, payload: &str) -> Result<String> {
        self.submit(CompressionOp::Decompress, payload).await
    }

    async fn submit(&self, op: CompressionOp, payload: &str) -> Result<String> {
        let Some(sender) = self.sender.as_ref().filter(|s| !s.is_closed()) else {
            return self.run_inline(op, payload);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        let request = CompressionRequest {
            id,
            op,
            payload: payload.to_string(),
            reply,
        };

        let exchange = async {
            sender.send(request).await.map_err(|_| {
                CacheError::CompressionUnavailable("worker is gone".to_string())
            })?;
            response.await.map_err(|_| {
                CacheError::CompressionUnavailable("worker dropped the request".to_string())
            })
        };

        let response = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| CacheError::CompressionTimeout(self.timeout))??;

        if response.id != id {
            return Err(CacheError::Compression {
                message: format!("correlation mismatch: sent {id}, got {}", response.id),
            });
        }
        response.result
    }

    fn run_inline(&self, op: CompressionOp, payload: &str) -> Result<String> {
        // Decompression must always be possible, or stored entries become unreadable
        if op == CompressionOp::Compress && payload.len() > self.sync_fallback_limit {
            return Err(CacheError::Compression {
                message: format!(
                    "payload of {} bytes exceeds inline limit of {}",
                    payload.len(),
                    self.sync_fallback_limit
                ),
            });
        }
        self.codec.run(op, payload)
    }
}
