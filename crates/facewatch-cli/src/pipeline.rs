//! Offline work over image files: enrollment, dataset training and batch
//! recognition.
//!
//! Image decoding fans out on the rayon pool one chunk at a time, so a large
//! folder never has more than a pool's worth of decoded images in memory.
//! Embedding stays sequential because the provider holds mutable inference
//! sessions.

use facewatch_core::store::StoreError;
use facewatch_core::{
    Embedding, EmbeddingProvider, EncodingStore, Encodings, FaceDecision, MajorityVoteMatcher,
    Matcher, ProviderError,
};
use image::imageops::FilterType;
use image::GrayImage;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no face detected in {0}")]
    NoFaceDetected(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A single image or every image directly inside a folder.
#[derive(Debug, Clone)]
pub enum Source {
    Image(PathBuf),
    Folder(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollReport {
    pub identity: String,
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ImageDecisions {
    pub path: PathBuf,
    pub faces: Vec<FaceDecision>,
}

/// Image files in `source`, sorted by path.
pub fn collect_images(source: &Source) -> Result<Vec<PathBuf>, PipelineError> {
    match source {
        Source::Image(path) => Ok(vec![path.clone()]),
        Source::Folder(dir) => {
            let entries = std::fs::read_dir(dir).map_err(|source| PipelineError::Io {
                path: dir.clone(),
                source,
            })?;
            let mut paths = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|source| PipelineError::Io {
                    path: dir.clone(),
                    source,
                })?;
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if image::ImageFormat::from_path(&path).is_ok() {
                    paths.push(path);
                } else {
                    tracing::debug!(path = %path.display(), "not an image format, skipping");
                }
            }
            paths.sort();
            Ok(paths)
        }
    }
}

fn load_gray(path: &Path, resize: Option<(u32, u32)>) -> Result<GrayImage, PipelineError> {
    let gray = image::open(path)
        .map_err(|source| PipelineError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_luma8();
    Ok(match resize {
        Some((w, h)) if (w, h) != gray.dimensions() => {
            image::imageops::resize(&gray, w, h, FilterType::Triangle)
        }
        _ => gray,
    })
}

/// Decode `paths` in pool-sized parallel chunks and hand each image to
/// `visit` in path order.
fn for_each_image<F>(
    paths: &[PathBuf],
    resize: Option<(u32, u32)>,
    mut visit: F,
) -> Result<(), PipelineError>
where
    F: FnMut(&Path, GrayImage) -> Result<(), PipelineError>,
{
    let chunk = rayon::current_num_threads().max(1);
    for batch in paths.chunks(chunk) {
        let images = batch
            .par_iter()
            .map(|p| load_gray(p, resize))
            .collect::<Result<Vec<_>, _>>()?;
        for (path, image) in batch.iter().zip(images) {
            visit(path, image)?;
        }
    }
    Ok(())
}

fn first_face<P: EmbeddingProvider>(
    provider: &mut P,
    path: &Path,
    image: &GrayImage,
) -> Result<Embedding, PipelineError> {
    let (width, height) = image.dimensions();
    provider
        .detect_faces(image.as_raw(), width, height)?
        .into_iter()
        .next()
        .map(|face| face.embedding)
        .ok_or_else(|| PipelineError::NoFaceDetected(path.to_path_buf()))
}

/// Embed the first face of every image. Images without a face are skipped.
fn embed_images<P: EmbeddingProvider>(
    provider: &mut P,
    paths: &[PathBuf],
    resize: Option<(u32, u32)>,
) -> Result<(Vec<Embedding>, usize), PipelineError> {
    let total = paths.len();
    let mut vectors = Vec::with_capacity(total);
    let mut skipped = 0;
    let mut done = 0;

    for_each_image(paths, resize, |path, image| {
        match first_face(provider, path, &image) {
            Ok(embedding) => vectors.push(embedding),
            Err(PipelineError::NoFaceDetected(path)) => {
                tracing::warn!(path = %path.display(), "no face detected, skipping image");
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
        done += 1;
        tracing::info!(image = done, total, path = %path.display(), "processed image");
        Ok(())
    })?;
    Ok((vectors, skipped))
}

/// Add the faces in `source` to `identity` and persist the store once.
///
/// Existing vectors of every identity are kept; new ones are appended in
/// file order.
pub fn enroll<P: EmbeddingProvider>(
    provider: &mut P,
    store: &EncodingStore,
    identity: &str,
    source: &Source,
    resize: Option<(u32, u32)>,
) -> Result<EnrollReport, PipelineError> {
    let encodings = store.load()?;
    let paths = collect_images(source)?;
    let (vectors, skipped) = embed_images(provider, &paths, resize)?;
    let added = vectors.len();

    store.save(&encodings.append(identity, vectors))?;
    tracing::info!(identity, added, skipped, "enrollment saved");
    Ok(EnrollReport {
        identity: identity.to_string(),
        added,
        skipped,
    })
}

/// Rebuild the whole store from `dataset_dir/<identity>/*`.
///
/// Every identity directory gets a key, even when none of its images
/// yields a face. The previous store contents are replaced.
pub fn train<P: EmbeddingProvider>(
    provider: &mut P,
    store: &EncodingStore,
    dataset_dir: &Path,
    resize: Option<(u32, u32)>,
) -> Result<Vec<EnrollReport>, PipelineError> {
    let entries = std::fs::read_dir(dataset_dir).map_err(|source| PipelineError::Io {
        path: dataset_dir.to_path_buf(),
        source,
    })?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PipelineError::Io {
            path: dataset_dir.to_path_buf(),
            source,
        })?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();

    let mut encodings = Encodings::new();
    let mut reports = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let identity = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let paths = collect_images(&Source::Folder(dir))?;
        let (vectors, skipped) = embed_images(provider, &paths, resize)?;
        tracing::info!(identity = %identity, added = vectors.len(), skipped, "identity trained");
        reports.push(EnrollReport {
            identity: identity.clone(),
            added: vectors.len(),
            skipped,
        });
        encodings = encodings.append(&identity, vectors);
    }

    store.save(&encodings)?;
    Ok(reports)
}

/// Label every face in every image of `source` against the stored encodings.
pub fn recognize_batch<P: EmbeddingProvider>(
    provider: &mut P,
    store: &EncodingStore,
    source: &Source,
) -> Result<Vec<ImageDecisions>, PipelineError> {
    let encodings = store.load()?;
    let matcher = MajorityVoteMatcher::new(provider.comparator());
    let paths = collect_images(source)?;

    let mut results = Vec::with_capacity(paths.len());
    for_each_image(&paths, None, |path, image| {
        let (width, height) = image.dimensions();
        let faces = provider
            .detect_faces(image.as_raw(), width, height)?
            .into_iter()
            .map(|face| FaceDecision {
                decision: matcher.identify(&face.embedding, &encodings),
                bbox: face.bbox,
            })
            .collect::<Vec<_>>();
        tracing::debug!(path = %path.display(), faces = faces.len(), "image recognized");
        results.push(ImageDecisions {
            path: path.to_path_buf(),
            faces,
        });
        Ok(())
    })?;
    Ok(results)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use facewatch_core::{BoundingBox, CosineComparator, Decision, FaceDetection};
    use image::Luma;
    use std::collections::HashMap;

    /// Provider whose detections are chosen by the first pixel of the image.
    pub(crate) struct FakeProvider {
        pub faces: HashMap<u8, Vec<Embedding>>,
        pub calls: usize,
    }

    impl FakeProvider {
        pub(crate) fn new(faces: impl IntoIterator<Item = (u8, Vec<Embedding>)>) -> Self {
            Self {
                faces: faces.into_iter().collect(),
                calls: 0,
            }
        }
    }

    pub(crate) fn face_box(i: usize) -> BoundingBox {
        BoundingBox {
            x: 10.0 * i as f32,
            y: 5.0,
            width: 8.0,
            height: 8.0,
            confidence: 0.9,
            landmarks: None,
        }
    }

    impl EmbeddingProvider for FakeProvider {
        type Comparator = CosineComparator;

        fn detect_faces(
            &mut self,
            gray: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<FaceDetection>, ProviderError> {
            self.calls += 1;
            let key = gray.first().copied().unwrap_or(0);
            Ok(self
                .faces
                .get(&key)
                .map(|embeddings| {
                    embeddings
                        .iter()
                        .enumerate()
                        .map(|(i, e)| FaceDetection {
                            bbox: face_box(i),
                            embedding: e.clone(),
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        fn comparator(&self) -> CosineComparator {
            CosineComparator { threshold: 0.9 }
        }
    }

    pub(crate) fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn write_image(path: &Path, value: u8) {
        GrayImage::from_pixel(8, 8, Luma([value])).save(path).unwrap();
    }

    #[test]
    fn test_collect_images_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("b.png"), 1);
        write_image(&dir.path().join("a.PNG"), 1);
        // Collection goes by format name only; contents are checked at decode.
        std::fs::write(dir.path().join("c.webp"), "x").unwrap();
        std::fs::write(dir.path().join("d.tif"), "x").unwrap();
        std::fs::write(dir.path().join("e.gif"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join("README"), "x").unwrap();
        std::fs::create_dir(dir.path().join("nested.png")).unwrap();

        let paths = collect_images(&Source::Folder(dir.path().to_path_buf())).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.png", "c.webp", "d.tif", "e.gif"]);
    }

    #[test]
    fn test_missing_folder_is_io_error() {
        let err = collect_images(&Source::Folder("/nonexistent/facewatch".into())).unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }

    #[test]
    fn test_enroll_skips_faceless_images_and_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("alice");
        std::fs::create_dir(&folder).unwrap();
        for (name, value) in [("1.png", 1), ("2.png", 1), ("3.png", 1), ("4.png", 0)] {
            write_image(&folder.join(name), value);
        }

        let store = EncodingStore::new(dir.path().join("encodings.json"));
        store
            .save(
                &Encodings::new()
                    .append("alice", vec![emb(&[0.0, 1.0])])
                    .append("bob", vec![emb(&[1.0, 1.0])]),
            )
            .unwrap();

        let mut provider = FakeProvider::new([(1, vec![emb(&[1.0, 0.0])])]);
        let report = enroll(&mut provider, &store, "alice", &Source::Folder(folder), None).unwrap();
        assert_eq!(report.added, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(provider.calls, 4);

        let loaded = store.load().unwrap();
        assert_eq!(loaded.get("alice").unwrap().len(), 4);
        assert_eq!(loaded.get("alice").unwrap()[0], emb(&[0.0, 1.0]));
        assert_eq!(loaded.get("bob").unwrap(), &[emb(&[1.0, 1.0])][..]);
    }

    #[test]
    fn test_enroll_single_image_with_resize() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("face.png");
        write_image(&image, 1);
        let store = EncodingStore::new(dir.path().join("encodings.json"));

        let mut provider = FakeProvider::new([(1, vec![emb(&[1.0, 0.0]), emb(&[0.0, 1.0])])]);
        let report =
            enroll(&mut provider, &store, "carol", &Source::Image(image), Some((16, 12))).unwrap();
        assert_eq!(report.added, 1);

        // Only the first detected face is enrolled.
        let loaded = store.load().unwrap();
        assert_eq!(loaded.get("carol").unwrap(), &[emb(&[1.0, 0.0])][..]);
    }

    #[test]
    fn test_undecodable_image_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.jpg");
        std::fs::write(&bad, b"not an image").unwrap();
        let store = EncodingStore::new(dir.path().join("encodings.json"));

        let mut provider = FakeProvider::new([]);
        let err = enroll(&mut provider, &store, "x", &Source::Image(bad), None).unwrap_err();
        assert!(matches!(err, PipelineError::Decode { .. }));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_train_replaces_store_and_keeps_empty_identities() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("dataset");
        std::fs::create_dir_all(dataset.join("alice")).unwrap();
        std::fs::create_dir_all(dataset.join("nobody")).unwrap();
        write_image(&dataset.join("alice/a.png"), 1);
        write_image(&dataset.join("alice/b.png"), 1);
        write_image(&dataset.join("nobody/a.png"), 0);

        let store = EncodingStore::new(dir.path().join("encodings.json"));
        store
            .save(&Encodings::new().append("stale", vec![emb(&[1.0])]))
            .unwrap();

        let mut provider = FakeProvider::new([(1, vec![emb(&[1.0, 0.0])])]);
        let reports = train(&mut provider, &store, &dataset, None).unwrap();
        assert_eq!(reports.len(), 2);

        let loaded = store.load().unwrap();
        assert!(loaded.get("stale").is_none());
        assert_eq!(loaded.get("alice").unwrap().len(), 2);
        assert!(loaded.get("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_recognize_batch_labels_every_face() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("group.png");
        write_image(&image, 7);

        let store = EncodingStore::new(dir.path().join("encodings.json"));
        store
            .save(
                &Encodings::new()
                    .append("alice", vec![emb(&[1.0, 0.0, 0.0])])
                    .append("bob", vec![emb(&[0.0, 1.0, 0.0])]),
            )
            .unwrap();

        let mut provider = FakeProvider::new([(
            7,
            vec![emb(&[1.0, 0.0, 0.0]), emb(&[0.0, 0.0, 1.0]), emb(&[0.0, 1.0, 0.0])],
        )]);
        let results = recognize_batch(&mut provider, &store, &Source::Image(image)).unwrap();
        assert_eq!(results.len(), 1);

        let decisions: Vec<_> = results[0].faces.iter().map(|f| f.decision.clone()).collect();
        assert_eq!(
            decisions,
            vec![
                Decision::Known("alice".into()),
                Decision::Unknown,
                Decision::Known("bob".into()),
            ]
        );
        assert_eq!(results[0].faces[1].bbox, face_box(1));
    }

    #[test]
    fn test_recognize_folder_larger_than_decode_chunk_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let count = rayon::current_num_threads() * 2 + 1;
        for i in 0..count {
            write_image(&dir.path().join(format!("img{i:03}.png")), (i % 2) as u8);
        }
        let store = EncodingStore::new(dir.path().join("encodings.json"));
        store
            .save(&Encodings::new().append("alice", vec![emb(&[1.0, 0.0])]))
            .unwrap();

        let mut provider = FakeProvider::new([(1, vec![emb(&[1.0, 0.0])])]);
        let results =
            recognize_batch(&mut provider, &store, &Source::Folder(dir.path().to_path_buf()))
                .unwrap();
        assert_eq!(results.len(), count);
        assert_eq!(provider.calls, count);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.path, dir.path().join(format!("img{i:03}.png")));
            let expected = if i % 2 == 1 { vec![Decision::Known("alice".into())] } else { vec![] };
            let got: Vec<_> = result.faces.iter().map(|f| f.decision.clone()).collect();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn test_enroll_across_decode_chunks_counts_every_image() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("bob");
        std::fs::create_dir(&folder).unwrap();
        let count = rayon::current_num_threads() + 3;
        for i in 0..count {
            write_image(&folder.join(format!("{i:03}.png")), 1);
        }
        let store = EncodingStore::new(dir.path().join("encodings.json"));

        let mut provider = FakeProvider::new([(1, vec![emb(&[0.0, 1.0])])]);
        let report = enroll(&mut provider, &store, "bob", &Source::Folder(folder), None).unwrap();
        assert_eq!(report.added, count);
        assert_eq!(store.load().unwrap().get("bob").unwrap().len(), count);
    }

    #[test]
    fn test_recognize_against_empty_store_is_all_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("one.png");
        write_image(&image, 1);
        let store = EncodingStore::new(dir.path().join("missing.json"));

        let mut provider = FakeProvider::new([(1, vec![emb(&[1.0, 0.0])])]);
        let results = recognize_batch(&mut provider, &store, &Source::Image(image)).unwrap();
        assert_eq!(results[0].faces.len(), 1);
        assert!(results[0].faces[0].decision.is_unknown());
    }
}
