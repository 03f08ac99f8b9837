//! Embedding provider seam: image in, boxes + embeddings out.

use crate::detector::{DetectorError, DetectorModel, FaceDetector};
use crate::matcher::{CosineComparator, FaceComparator};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_MODEL_FILE};
use crate::types::FaceDetection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Finds faces in a grayscale image and embeds each one.
///
/// Detections are returned in detection order (highest confidence first).
/// The provider also supplies the fixed-threshold comparison that is valid
/// for the embeddings it produces.
pub trait EmbeddingProvider {
    type Comparator: FaceComparator + Clone;

    fn detect_faces(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceDetection>, ProviderError>;

    fn comparator(&self) -> Self::Comparator;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for &mut P {
    type Comparator = P::Comparator;

    fn detect_faces(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceDetection>, ProviderError> {
        (**self).detect_faces(gray, width, height)
    }

    fn comparator(&self) -> Self::Comparator {
        (**self).comparator()
    }
}

/// SCRFD detection + ArcFace embeddings.
pub struct OnnxProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    comparator: CosineComparator,
}

impl OnnxProvider {
    pub fn load(
        model_dir: &Path,
        detector_model: DetectorModel,
        similarity_threshold: f32,
    ) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(&model_dir.join(detector_model.file_name()))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        tracing::info!(
            model_dir = %model_dir.display(),
            ?detector_model,
            similarity_threshold,
            "embedding provider ready"
        );
        Ok(Self {
            detector,
            recognizer,
            comparator: CosineComparator {
                threshold: similarity_threshold,
            },
        })
    }
}

impl EmbeddingProvider for OnnxProvider {
    type Comparator = CosineComparator;

    fn detect_faces(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<FaceDetection>, ProviderError> {
        let boxes = self.detector.detect(gray, width, height)?;
        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            if bbox.landmarks.is_none() {
                tracing::debug!(confidence = bbox.confidence, "skipping face without landmarks");
                continue;
            }
            let embedding = self.recognizer.extract(gray, width, height, &bbox)?;
            faces.push(FaceDetection { bbox, embedding });
        }
        Ok(faces)
    }

    fn comparator(&self) -> CosineComparator {
        self.comparator
    }
}
