use crate::config::Config;
use rollcall_core::{
    probe_detector, DetectedFace, DetectorError, EmbedderError, Frame, FrameMatcher,
    FramePipeline, FrameResult, OnnxEmbedder, PipelineError, Session,
};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const ENGINE_QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Recognize {
        frame: Frame,
        session: Arc<Session>,
        reply: oneshot::Sender<Result<FrameResult, PipelineError>>,
    },
    Analyze {
        frame: Frame,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, PipelineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    detector: &'static str,
    embedder: &'static str,
}

impl EngineHandle {
    pub fn detector_backend(&self) -> &'static str {
        self.detector
    }

    pub fn embedder_backend(&self) -> &'static str {
        self.embedder
    }

    /// Match one frame against the roster snapshot taken by the caller.
    pub async fn recognize(
        &self,
        frame: Frame,
        session: Arc<Session>,
    ) -> Result<FrameResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recognize {
                frame,
                session,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Detect and embed every face in one frame, without matching.
    pub async fn analyze(&self, frame: Frame) -> Result<Vec<DetectedFace>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Analyze { frame, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Load both models and spawn the engine. Fails fast if no backend is usable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let detector = probe_detector(&config.detector_config())?;

    let embedder_path = config.embedder_model_path();
    let embedder = OnnxEmbedder::load(
        &embedder_path,
        config.embedder_input_size,
        config.intra_threads,
    )?;
    tracing::info!(path = %embedder_path.display(), "embedder loaded");

    let pipeline = FramePipeline::new(detector, Box::new(embedder), config.pipeline_options());
    spawn_with_matcher(FrameMatcher::new(pipeline, config.similarity_threshold))
}

/// Run `matcher` on a dedicated OS thread; inference calls are blocking and need `&mut`.
pub fn spawn_with_matcher(mut matcher: FrameMatcher) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);
    let detector = matcher.detector_backend();
    let embedder = matcher.embedder_backend();

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!(threshold = matcher.threshold(), "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recognize { frame, session, reply } => {
                        let result = isolate(|| matcher.process_frame(&frame, &session));
                        let _ = reply.send(result);
                    }
                    EngineRequest::Analyze { frame, reply } => {
                        let result = isolate(|| matcher.pipeline_mut().analyze(&frame));
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx, detector, embedder })
}

/// Run one request, turning a backend panic into an error for that request only.
fn isolate<T>(work: impl FnOnce() -> Result<T, PipelineError>) -> Result<T, PipelineError> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(panic = %message, "backend panicked during inference");
        Err(PipelineError::Embedder(EmbedderError::InferenceFailed(format!(
            "backend panicked: {message}"
        ))))
    })
}
