//! Frame processor
//!
//! Receives captured frames, crops/resizes them and paginates them into a
//! PDF. The processor runs as its own task and is reached only through
//! [`ProcessorRequest`] messages, so large frame sets travel in bounded
//! batches rather than one oversized message.

pub mod batch;
pub mod document;
pub mod transform;

pub use batch::{split_into_chunks, ChunkedTransfer, Sequenced, TransferState};
pub use document::{DocumentBuilder, Orientation, PageLayout, REFERENCE_DPI};
pub use transform::{crop_rect, fit_within, process_frame, Rect};

use crate::capture::{CapturedFrame, Dimensions};
use crate::error::AssemblyError;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Frames per batch message
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Payload ceiling of one processor message
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Crop and resize settings for one assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    /// Crop width (0 = unset)
    #[serde(default)]
    pub crop_width: u32,
    /// Crop height (0 = unset)
    #[serde(default)]
    pub crop_height: u32,
    /// Resize width (0 = unset)
    #[serde(default)]
    pub output_width: u32,
    /// Resize height (0 = unset)
    #[serde(default)]
    pub output_height: u32,
}

impl ProcessingOptions {
    /// Build from crop and resize specs
    pub fn new(crop: Dimensions, resize: Dimensions) -> Self {
        Self {
            crop_width: crop.width,
            crop_height: crop.height,
            output_width: resize.width,
            output_height: resize.height,
        }
    }

    /// Crop spec
    pub fn crop(&self) -> Dimensions {
        Dimensions::new(self.crop_width, self.crop_height)
    }

    /// Resize spec
    pub fn resize(&self) -> Dimensions {
        Dimensions::new(self.output_width, self.output_height)
    }
}

/// Messages accepted by the processor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProcessorRequest {
    /// Whole frame set in one message
    GeneratePdf {
        /// Frames in capture order
        images: Vec<CapturedFrame>,
        /// Crop/resize settings
        #[serde(flatten)]
        options: ProcessingOptions,
    },
    /// Start a chunked transfer
    GeneratePdfBatchInit {
        /// Batches that will follow
        total_batches: usize,
        /// Crop/resize settings
        #[serde(flatten)]
        options: ProcessingOptions,
    },
    /// One chunk of frames
    GeneratePdfBatch {
        /// Frames, each tagged with its capture index
        images: Vec<CapturedFrame>,
        /// Sender's last-chunk marker
        is_last: bool,
    },
}

/// Messages emitted by the processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProcessorReply {
    /// Artifact stored and ready for pickup
    PdfReady {
        /// Pickup handle
        artifact_ref: ArtifactRef,
    },
    /// Assembly failed; nothing was stored
    CaptureError {
        /// Human-readable reason
        error: String,
    },
}

/// Transient handle to a stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(Uuid);

impl ArtifactRef {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact:{}", self.0)
    }
}

/// Finished output document
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Serialized PDF
    pub bytes: Vec<u8>,
    /// Page count (== frame count)
    pub page_count: usize,
    /// Suggested filename, including the capture timestamp
    pub filename: String,
    /// Per-page layout
    pub layouts: Vec<PageLayout>,
}

/// Filename for an artifact captured at `at`
pub fn artifact_filename(at: DateTime<Local>) -> String {
    format!("capture_{}.pdf", at.format("%Y%m%d_%H%M%S"))
}

/// Holds finished artifacts until the orchestrator picks them up
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    inner: Arc<Mutex<HashMap<ArtifactRef, Artifact>>>,
}

impl ArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, artifact: Artifact) -> ArtifactRef {
        let reference = ArtifactRef::generate();
        self.inner.lock().insert(reference, artifact);
        reference
    }

    /// Remove and return an artifact
    pub fn take(&self, reference: &ArtifactRef) -> Result<Artifact, AssemblyError> {
        self.inner
            .lock()
            .remove(reference)
            .ok_or_else(|| AssemblyError::UnknownArtifact(reference.to_string()))
    }

    /// Drop an artifact nobody will pick up; returns whether it was stored
    pub fn discard(&self, reference: &ArtifactRef) -> bool {
        let removed = self.inner.lock().remove(reference).is_some();
        if removed {
            warn!(artifact = %reference, "Discarding unclaimed artifact");
        }
        removed
    }

    /// Artifacts waiting for pickup
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Decode, transform and paginate `frames` (already in capture order)
pub fn build_artifact(
    frames: Vec<CapturedFrame>,
    options: &ProcessingOptions,
) -> Result<Artifact, AssemblyError> {
    if frames.is_empty() {
        return Err(AssemblyError::NoFrames);
    }

    let mut builder = DocumentBuilder::new();
    for frame in frames {
        let decoded = image::load_from_memory(&frame.data).map_err(|e| AssemblyError::Decode {
            index: frame.index,
            reason: e.to_string(),
        })?;
        let processed = process_frame(decoded, options.crop(), options.resize());
        builder.add_page(&processed, frame.index)?;
    }

    let page_count = builder.page_count();
    let (bytes, layouts) = builder.finish()?;
    Ok(Artifact {
        bytes,
        page_count,
        filename: artifact_filename(Local::now()),
        layouts,
    })
}

/// A chunked assembly in progress
#[derive(Debug)]
struct ProcessingJob {
    transfer: ChunkedTransfer<CapturedFrame>,
    options: ProcessingOptions,
}

/// Synchronous processor core
pub struct FrameProcessor {
    store: ArtifactStore,
    job: Option<ProcessingJob>,
}

impl FrameProcessor {
    /// Create a processor storing artifacts in `store`
    pub fn new(store: ArtifactStore) -> Self {
        Self { store, job: None }
    }

    /// `assemble(frames, options)`: single-batch assembly
    #[instrument(skip(self, frames), fields(frames = frames.len()))]
    pub fn assemble(
        &self,
        mut frames: Vec<CapturedFrame>,
        options: &ProcessingOptions,
    ) -> Result<ArtifactRef, AssemblyError> {
        frames.sort_by_key(|f| f.index);
        let artifact = build_artifact(frames, options)?;
        info!(
            pages = artifact.page_count,
            bytes = artifact.bytes.len(),
            "PDF assembled"
        );
        Ok(self.store.insert(artifact))
    }

    /// `beginBatch(totalBatches, options)`; replaces any unfinished job
    pub fn begin_batch(&mut self, total_batches: usize, options: ProcessingOptions) {
        if self.job.is_some() {
            warn!("Discarding unfinished batch job");
        }
        debug!(total_batches, "Batch transfer started");
        self.job = Some(ProcessingJob {
            transfer: ChunkedTransfer::begin(total_batches),
            options,
        });
    }

    /// `appendBatch(frames, isLast)`; returns the artifact once complete
    pub fn append_batch(
        &mut self,
        frames: Vec<CapturedFrame>,
        is_last: bool,
    ) -> Result<Option<ArtifactRef>, AssemblyError> {
        let job = self.job.as_mut().ok_or(AssemblyError::BatchNotStarted)?;
        match job.transfer.append(frames, is_last) {
            TransferState::Pending { received, total } => {
                debug!(received, total, "Batch received");
                Ok(None)
            }
            TransferState::Complete => {
                let Some(job) = self.job.take() else {
                    return Err(AssemblyError::BatchNotStarted);
                };
                let frames = job.transfer.into_ordered();
                self.assemble(frames, &job.options).map(Some)
            }
        }
    }

    /// Dispatch one request; `None` means "batch accepted, keep sending"
    pub fn handle(&mut self, request: ProcessorRequest) -> Option<ProcessorReply> {
        let result = match request {
            ProcessorRequest::GeneratePdf { images, options } => {
                self.assemble(images, &options).map(Some)
            }
            ProcessorRequest::GeneratePdfBatchInit {
                total_batches,
                options,
            } => {
                self.begin_batch(total_batches, options);
                Ok(None)
            }
            ProcessorRequest::GeneratePdfBatch { images, is_last } => {
                self.append_batch(images, is_last)
            }
        };

        match result {
            Ok(Some(artifact_ref)) => Some(ProcessorReply::PdfReady { artifact_ref }),
            Ok(None) => None,
            Err(e) => {
                error!("Frame processing failed: {}", e);
                self.job = None;
                Some(ProcessorReply::CaptureError {
                    error: e.to_string(),
                })
            }
        }
    }

    /// Run the processor on its own task
    ///
    /// CPU-heavy work is moved to the blocking pool. The task ends when the
    /// request sender is dropped. Once the channel is gone, pending work is
    /// skipped and an artifact finished too late is discarded.
    pub fn spawn(store: ArtifactStore) -> ProcessorChannel {
        let (request_tx, mut request_rx) = mpsc::channel::<ProcessorRequest>(8);
        let (reply_tx, reply_rx) = mpsc::channel::<ProcessorReply>(8);
        let channel_store = store.clone();

        tokio::spawn(async move {
            let mut processor = FrameProcessor::new(store);
            while let Some(request) = request_rx.recv().await {
                if reply_tx.is_closed() {
                    debug!("Processor channel closed, skipping pending work");
                    break;
                }
                let joined = tokio::task::spawn_blocking(move || {
                    let reply = processor.handle(request);
                    (processor, reply)
                })
                .await;

                match joined {
                    Ok((back, reply)) => {
                        processor = back;
                        if let Some(reply) = reply {
                            if let Err(mpsc::error::SendError(unclaimed)) =
                                reply_tx.send(reply).await
                            {
                                discard_reply(&processor.store, unclaimed);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Frame processor task panicked: {}", e);
                        let _ = reply_tx
                            .send(ProcessorReply::CaptureError {
                                error: format!("frame processor crashed: {}", e),
                            })
                            .await;
                        break;
                    }
                }
            }
            debug!("Frame processor finished");
        });

        ProcessorChannel {
            requests: request_tx,
            replies: reply_rx,
            store: channel_store,
        }
    }
}

fn discard_reply(store: &ArtifactStore, reply: ProcessorReply) {
    if let ProcessorReply::PdfReady { artifact_ref } = reply {
        store.discard(&artifact_ref);
    }
}

/// Client side of a spawned [`FrameProcessor`]
///
/// Dropping the channel abandons the job: replies still queued are drained
/// and their artifacts removed from the store.
pub struct ProcessorChannel {
    requests: mpsc::Sender<ProcessorRequest>,
    replies: mpsc::Receiver<ProcessorReply>,
    store: ArtifactStore,
}

impl Drop for ProcessorChannel {
    fn drop(&mut self) {
        self.replies.close();
        while let Ok(reply) = self.replies.try_recv() {
            discard_reply(&self.store, reply);
        }
    }
}

impl ProcessorChannel {
    /// Send one request
    pub async fn send(&self, request: ProcessorRequest) -> Result<(), AssemblyError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| AssemblyError::ProcessorUnavailable)
    }

    /// Wait for the next reply
    pub async fn recv(&mut self, timeout: Duration) -> Result<ProcessorReply, AssemblyError> {
        match tokio::time::timeout(timeout, self.replies.recv()).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(AssemblyError::ProcessorUnavailable),
            Err(_) => Err(AssemblyError::Timeout(timeout.as_millis() as u64)),
        }
    }

    /// Send `frames` as one message or as batches of `batch_size`, then wait
    /// for the artifact
    #[instrument(skip(self, frames), fields(frames = frames.len()))]
    pub async fn submit(
        &mut self,
        frames: Vec<CapturedFrame>,
        options: ProcessingOptions,
        batch_size: usize,
        timeout: Duration,
    ) -> Result<ArtifactRef, AssemblyError> {
        if frames.len() <= batch_size {
            self.send(ProcessorRequest::GeneratePdf {
                images: frames,
                options,
            })
            .await?;
        } else {
            let batches = split_into_chunks(frames, batch_size);
            let total_batches = batches.len();
            info!(total_batches, "Sending frames in batches");

            self.send(ProcessorRequest::GeneratePdfBatchInit {
                total_batches,
                options,
            })
            .await?;
            for (i, images) in batches.into_iter().enumerate() {
                let payload: usize = images.iter().map(|f| f.encoded_len()).sum();
                if payload > MAX_MESSAGE_BYTES {
                    warn!(batch = i, payload, "Batch exceeds message ceiling");
                }
                self.send(ProcessorRequest::GeneratePdfBatch {
                    images,
                    is_last: i + 1 == total_batches,
                })
                .await?;
            }
        }

        match self.recv(timeout).await? {
            ProcessorReply::PdfReady { artifact_ref } => Ok(artifact_ref),
            ProcessorReply::CaptureError { error } => Err(AssemblyError::Pdf(error)),
        }
    }
}
