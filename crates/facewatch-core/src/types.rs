use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used for faces that match no enrolled identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Top edge in whole pixels (clamped at 0).
    pub fn top(&self) -> u32 {
        self.y.max(0.0).round() as u32
    }

    /// Right edge in whole pixels (clamped at 0).
    pub fn right(&self) -> u32 {
        (self.x + self.width).max(0.0).round() as u32
    }

    pub fn bottom(&self) -> u32 {
        (self.y + self.height).max(0.0).round() as u32
    }

    pub fn left(&self) -> u32 {
        self.x.max(0.0).round() as u32
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }
}

/// One detected face: where it is and what it looks like.
#[derive(Debug, Clone)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

/// Identity decision for one face.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Decision {
    Known(String),
    Unknown,
}

impl Decision {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Decision::Unknown)
    }

    pub fn label(&self) -> &str {
        match self {
            Decision::Known(name) => name,
            Decision::Unknown => UNKNOWN_LABEL,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A face's box paired with the identity decided for it.
#[derive(Debug, Clone)]
pub struct FaceDecision {
    pub bbox: BoundingBox,
    pub decision: Decision,
}
