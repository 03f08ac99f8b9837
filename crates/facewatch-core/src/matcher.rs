//! Majority-vote identity matching.
//!
//! Each enrolled vector casts a boolean "same person" verdict against the
//! candidate. An identity matches when its verdicts are majority `true`. The first
//! matching identity in store order wins.

use crate::store::Encodings;
use crate::types::{Decision, Embedding};
use rayon::prelude::*;

/// Default cosine similarity threshold for ArcFace embeddings.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.40;

/// Fixed-threshold "same person" comparison between two embeddings.
pub trait FaceComparator: Sync {
    fn is_match(&self, known: &Embedding, candidate: &Embedding) -> bool;
}

/// Match when cosine similarity is at or above `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct CosineComparator {
    pub threshold: f32,
}

impl Default for CosineComparator {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl FaceComparator for CosineComparator {
    fn is_match(&self, known: &Embedding, candidate: &Embedding) -> bool {
        known.similarity(candidate) >= self.threshold
    }
}

/// Majority vote over per-vector verdicts.
///
/// A tie resolves to `false`, and no verdicts at all is `false`.
pub fn aggregate_verdict<I: IntoIterator<Item = bool>>(verdicts: I) -> bool {
    let (yes, no) = verdicts
        .into_iter()
        .fold((0usize, 0usize), |(yes, no), v| if v { (yes + 1, no) } else { (yes, no + 1) });
    yes > no
}

/// Strategy for deciding which enrolled identity (if any) a candidate belongs to.
pub trait Matcher {
    fn identify(&self, candidate: &Embedding, gallery: &Encodings) -> Decision;
}

/// Per-identity majority vote, first match in store order wins.
///
/// Per-identity votes are computed on the rayon pool; the winner is picked by
/// a sequential scan over the results in store order, so the outcome never
/// depends on completion order.
pub struct MajorityVoteMatcher<C> {
    comparator: C,
}

impl<C: FaceComparator> MajorityVoteMatcher<C> {
    pub fn new(comparator: C) -> Self {
        Self { comparator }
    }

    /// Aggregate verdict of every identity, in store order.
    pub fn verdicts<'g>(&self, candidate: &Embedding, gallery: &'g Encodings) -> Vec<(&'g str, bool)> {
        let identities: Vec<(&str, &[Embedding])> = gallery.iter().collect();
        identities
            .par_iter()
            .map(|(name, vectors)| {
                let verdict = aggregate_verdict(
                    vectors.iter().map(|known| self.comparator.is_match(known, candidate)),
                );
                (*name, verdict)
            })
            .collect()
    }
}

impl<C: FaceComparator> Matcher for MajorityVoteMatcher<C> {
    fn identify(&self, candidate: &Embedding, gallery: &Encodings) -> Decision {
        if gallery.is_empty() {
            return Decision::Unknown;
        }

        let verdicts = self.verdicts(candidate, gallery);
        match verdicts.into_iter().find(|(_, matched)| *matched) {
            Some((name, _)) => {
                tracing::trace!(identity = name, "face matched");
                Decision::Known(name.to_string())
            }
            None => Decision::Unknown,
        }
    }
}

impl<M: Matcher + ?Sized> Matcher for &M {
    fn identify(&self, candidate: &Embedding, gallery: &Encodings) -> Decision {
        (**self).identify(candidate, gallery)
    }
}
