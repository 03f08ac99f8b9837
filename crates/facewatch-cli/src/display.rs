//! Where annotated live frames go, and where the stop request comes from.

use facewatch_core::FaceDecision;
use facewatch_hw::{Frame, FrameError};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc;

pub trait FrameSink {
    /// Present one annotated frame with the decisions drawn on it.
    fn show(&mut self, annotated: &Frame, faces: &[FaceDecision]) -> Result<(), FrameError>;

    /// Non-blocking check for a termination request.
    fn poll_quit(&mut self) -> bool;

    /// Ask for a name to keep the last annotated frame under. `None` skips it.
    fn snapshot_name(&mut self) -> Option<String>;
}

impl<K: FrameSink + ?Sized> FrameSink for &mut K {
    fn show(&mut self, annotated: &Frame, faces: &[FaceDecision]) -> Result<(), FrameError> {
        (**self).show(annotated, faces)
    }

    fn poll_quit(&mut self) -> bool {
        (**self).poll_quit()
    }

    fn snapshot_name(&mut self) -> Option<String> {
        (**self).snapshot_name()
    }
}

/// Rewrites a preview image every frame and takes commands from stdin.
///
/// Typing `q` + Enter stops the loop; the next line is the snapshot name
/// (blank to skip).
pub struct PreviewSink {
    preview_path: PathBuf,
    lines: mpsc::Receiver<String>,
    last_labels: Vec<String>,
}

impl PreviewSink {
    pub fn new(preview_path: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("facewatch-stdin".into())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "stdin reader unavailable; stop with Ctrl-C");
        }

        println!("Live recognition running. Type 'q' and press Enter to stop.");
        Self::from_channel(preview_path, rx)
    }

    fn from_channel(preview_path: PathBuf, lines: mpsc::Receiver<String>) -> Self {
        Self {
            preview_path,
            lines,
            last_labels: Vec::new(),
        }
    }
}

impl FrameSink for PreviewSink {
    fn show(&mut self, annotated: &Frame, faces: &[FaceDecision]) -> Result<(), FrameError> {
        annotated.save(&self.preview_path)?;

        let labels: Vec<String> = faces
            .iter()
            .map(|f| {
                format!(
                    "{} @ ({}, {}, {}, {})",
                    f.decision,
                    f.bbox.top(),
                    f.bbox.right(),
                    f.bbox.bottom(),
                    f.bbox.left()
                )
            })
            .collect();
        if labels != self.last_labels && !labels.is_empty() {
            println!("{}", labels.join("  |  "));
        }
        self.last_labels = labels;
        Ok(())
    }

    fn poll_quit(&mut self) -> bool {
        loop {
            match self.lines.try_recv() {
                Ok(line) if line.trim().eq_ignore_ascii_case("q") => return true,
                Ok(_) => continue,
                Err(mpsc::TryRecvError::Empty) => return false,
                // stdin closed: nothing can ask us to stop any more.
                Err(mpsc::TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn snapshot_name(&mut self) -> Option<String> {
        println!("Enter image name (leave blank to skip): ");
        let name = self.lines.recv().ok()?;
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quit_then_snapshot_name() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut sink = PreviewSink::from_channel(dir.path().join("preview.jpg"), rx);

        assert!(!sink.poll_quit());
        tx.send("hello".into()).unwrap();
        tx.send("q".into()).unwrap();
        tx.send("  lobby  ".into()).unwrap();
        assert!(sink.poll_quit());
        assert_eq!(sink.snapshot_name().as_deref(), Some("lobby"));
    }

    #[test]
    fn test_blank_snapshot_name_skips() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let mut sink = PreviewSink::from_channel(dir.path().join("preview.jpg"), rx);
        tx.send("".into()).unwrap();
        assert_eq!(sink.snapshot_name(), None);
        drop(tx);
        assert_eq!(sink.snapshot_name(), None);
    }

    #[test]
    fn test_show_writes_preview() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let (_tx, rx) = mpsc::channel::<String>();
        let mut sink = PreviewSink::from_channel(path.clone(), rx);
        sink.show(&Frame::from_gray(vec![50; 16 * 16], 16, 16), &[]).unwrap();
        assert!(path.exists());
    }
}
