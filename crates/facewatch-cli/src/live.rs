//! Live recognition loop over a frame source.
//!
//! The loop is synchronous: capture, inference and the stdin prompt all
//! block, so it must run on a dedicated thread (`spawn_blocking`). Only the
//! alert send is driven on the tokio runtime, through the handle passed to
//! [`LiveLoop::run`].

use crate::alert::AlertDispatcher;
use crate::display::FrameSink;
use facewatch_core::{
    AlertGate, EmbeddingProvider, Encodings, FaceDecision, MajorityVoteMatcher, Matcher,
    ProviderError,
};
use facewatch_hw::{Annotator, Frame, FrameSource};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::runtime::Handle;

#[derive(Error, Debug)]
pub enum LiveError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Wall-clock minutes used by the alert gate.
pub trait Clock {
    fn minute(&self) -> i64;
}

/// Absolute UTC minutes since the Unix epoch.
pub struct SystemClock;

impl Clock for SystemClock {
    fn minute(&self) -> i64 {
        chrono::Utc::now().timestamp() / 60
    }
}

#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub unknown_timeout_minutes: i64,
    pub annotator: Annotator,
    /// Named snapshots are written here on quit.
    pub capture_dir: PathBuf,
    /// Scratch directory for alert photos; each one is removed after sending.
    pub alert_dir: PathBuf,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LiveSummary {
    pub frames: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub snapshot: Option<PathBuf>,
}

pub struct LiveLoop<S, P, K, D, C> {
    source: S,
    provider: P,
    sink: K,
    dispatcher: D,
    clock: C,
    options: LiveOptions,
}

impl<S, P, K, D, C> LiveLoop<S, P, K, D, C>
where
    S: FrameSource,
    P: EmbeddingProvider,
    K: FrameSink,
    D: AlertDispatcher,
    C: Clock,
{
    pub fn new(source: S, provider: P, sink: K, dispatcher: D, clock: C, options: LiveOptions) -> Self {
        Self {
            source,
            provider,
            sink,
            dispatcher,
            clock,
            options,
        }
    }

    /// Run until the sink asks to quit or the source stops producing frames.
    ///
    /// A single alert gate spans the whole run: after an alert, further
    /// unknown faces stay silent until a face is seen more than the timeout
    /// later. Must not be called from inside an async task; `runtime` only
    /// drives the alert sends.
    pub fn run(mut self, encodings: &Encodings, runtime: &Handle) -> Result<LiveSummary, LiveError> {
        let matcher = MajorityVoteMatcher::new(self.provider.comparator());
        let mut gate = AlertGate::new(self.options.unknown_timeout_minutes);
        let mut summary = LiveSummary::default();

        tracing::info!(
            identities = encodings.len(),
            timeout_minutes = self.options.unknown_timeout_minutes,
            "live recognition started"
        );

        loop {
            let frame = match self.source.next_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::info!(reason = %e, "frame source stopped");
                    break;
                }
            };
            summary.frames += 1;

            let detections = self
                .provider
                .detect_faces(&frame.data, frame.width, frame.height)?;
            let now = self.clock.minute();

            let mut decisions = Vec::with_capacity(detections.len());
            for face in detections {
                let decision = matcher.identify(&face.embedding, encodings);
                if gate.evaluate(&decision, now) {
                    if self.dispatch_alert(&frame, runtime) {
                        summary.alerts_sent += 1;
                    } else {
                        summary.alerts_failed += 1;
                    }
                }
                decisions.push(FaceDecision {
                    bbox: face.bbox,
                    decision,
                });
            }

            let mut annotated = frame;
            if let Err(e) = self.options.annotator.annotate(&mut annotated, &decisions) {
                tracing::warn!(error = %e, "failed to annotate frame");
            }
            if let Err(e) = self.sink.show(&annotated, &decisions) {
                tracing::warn!(error = %e, "failed to present frame");
            }

            if self.sink.poll_quit() {
                summary.snapshot = self.save_snapshot(&annotated);
                break;
            }
        }

        tracing::info!(
            frames = summary.frames,
            alerts_sent = summary.alerts_sent,
            alerts_failed = summary.alerts_failed,
            "live recognition stopped"
        );
        Ok(summary)
    }

    /// Write the frame to a scratch file, send it, then remove the file.
    /// Returns whether the alert went out.
    fn dispatch_alert(&self, frame: &Frame, runtime: &Handle) -> bool {
        let path = self
            .options
            .alert_dir
            .join(format!("facewatch-unknown-{}.jpg", uuid::Uuid::new_v4()));
        if let Err(e) = frame.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write alert photo");
            return false;
        }

        let sent = match runtime.block_on(self.dispatcher.send_photo(&path)) {
            Ok(()) => {
                tracing::info!("unknown face alert sent");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "unknown face alert failed");
                false
            }
        };

        if let Err(e) = std::fs::remove_file(&path) {
            tracing::debug!(path = %path.display(), error = %e, "failed to remove alert photo");
        }
        sent
    }

    fn save_snapshot(&mut self, annotated: &Frame) -> Option<PathBuf> {
        let name = self.sink.snapshot_name()?;
        let Some(path) = snapshot_path(&self.options.capture_dir, &name) else {
            tracing::warn!(name = %name, "snapshot name must be a plain file name, not saved");
            return None;
        };
        let saved = std::fs::create_dir_all(&self.options.capture_dir)
            .map_err(|e| e.to_string())
            .and_then(|()| annotated.save(&path).map_err(|e| e.to_string()));
        match saved {
            Ok(()) => {
                tracing::info!(path = %path.display(), "snapshot saved");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to save snapshot");
                None
            }
        }
    }
}

/// `<dir>/<name>.jpg`, or `None` when `name` is not a single path component.
fn snapshot_path(dir: &Path, name: &str) -> Option<PathBuf> {
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return None;
    }
    Some(dir.join(format!("{name}.jpg")))
}
