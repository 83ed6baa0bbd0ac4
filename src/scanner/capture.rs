//! Face capture window.
//!
//! The camera collaborator hands over frames with the face boxes its
//! detector found. During the window the largest box seen so far is kept;
//! a later box replaces it only when strictly larger.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("camera unavailable: {0}")]
    Camera(String),
    #[error("face detection failed: {0}")]
    Detection(String),
}

/// Face bounding box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// One camera frame as seen by the core: an opaque reference the camera
/// side can resolve to an image, plus detected faces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_ref: String,
    pub faces: Vec<FaceBox>,
}

impl Frame {
    pub fn new(frame_ref: impl Into<String>, faces: Vec<FaceBox>) -> Self {
        Self {
            frame_ref: frame_ref.into(),
            faces,
        }
    }
}

/// Frame and face-detector collaborator.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next analysed frame. `Ok(None)` means the source has
    /// nothing more to give for this capture.
    async fn next_frame(&mut self) -> Result<Option<Frame>, DetectorError>;
}

/// Best face seen during a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub face: FaceBox,
    pub frame_ref: String,
}

/// Keeps the largest face offered; ties keep the earlier one.
#[derive(Debug, Default)]
pub struct CaptureSelection {
    best: Option<Capture>,
    frames_seen: u32,
}

impl CaptureSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, frame: &Frame) {
        self.frames_seen += 1;
        for face in &frame.faces {
            let larger = self
                .best
                .as_ref()
                .map_or(true, |best| face.area() > best.face.area());
            if larger {
                self.best = Some(Capture {
                    face: *face,
                    frame_ref: frame.frame_ref.clone(),
                });
            }
        }
    }

    #[must_use]
    pub fn best(&self) -> Option<&Capture> {
        self.best.as_ref()
    }

    #[must_use]
    pub fn frames_seen(&self) -> u32 {
        self.frames_seen
    }

    pub fn into_best(self) -> Option<Capture> {
        self.best
    }
}

/// Pull frames until `window` elapses or the source runs dry.
///
/// A detector error ends the capture with whatever was selected so far
/// discarded, so the caller sees no face.
pub async fn run_capture(
    source: &mut dyn FrameSource,
    window: Duration,
) -> Result<Option<Capture>, DetectorError> {
    let deadline = Instant::now() + window;
    let mut selection = CaptureSelection::new();

    loop {
        match timeout_at(deadline, source.next_frame()).await {
            Err(_) => break,
            Ok(Ok(Some(frame))) => selection.offer(&frame),
            Ok(Ok(None)) => {
                debug!(frames = selection.frames_seen(), "Frame source ended before capture window");
                break;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Detector failed during capture");
                return Err(e);
            }
        }
    }

    debug!(
        frames = selection.frames_seen(),
        found = selection.best().is_some(),
        "Capture window closed"
    );
    Ok(selection.into_best())
}
