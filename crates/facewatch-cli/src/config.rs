use facewatch_core::DetectorModel;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration, built once at startup and passed by reference.
///
/// Sources, lowest to highest precedence: built-in defaults, an optional TOML
/// file, then `FACEWATCH_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root that relative folders and the default paths resolve against.
    pub project_root: PathBuf,
    /// Encoding store snapshot.
    pub encodings_path: PathBuf,
    /// Reference dataset for `train`: one subdirectory per identity.
    pub dataset_dir: PathBuf,
    /// Where named snapshots from the live loop are written.
    pub capture_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: DetectorModel,
    /// Cosine similarity threshold for a per-vector "same person" verdict.
    pub similarity_threshold: f32,
    /// V4L2 device path.
    pub camera_device: String,
    /// Minutes that must elapse after an alert before another one may fire.
    pub unknown_timeout_minutes: i64,
    /// Enrollment images are resized to this (width, height) before embedding.
    pub enroll_resize: Option<(u32, u32)>,
    pub box_thickness: u32,
    pub box_intensity: u8,
    /// Identity label glyph height in pixels.
    pub label_scale: f32,
    pub label_intensity: u8,
    /// Annotated live frames are written here.
    pub preview_path: PathBuf,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

/// TOML file layout. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    project_root: Option<PathBuf>,
    encodings_path: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    capture_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    detector_model: Option<DetectorModel>,
    similarity_threshold: Option<f32>,
    camera_device: Option<String>,
    unknown_timeout_minutes: Option<i64>,
    enroll_resize: Option<[u32; 2]>,
    box_thickness: Option<u32>,
    box_intensity: Option<u8>,
    label_scale: Option<f32>,
    label_intensity: Option<u8>,
    preview_path: Option<PathBuf>,
    telegram: Option<TelegramSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TelegramSection {
    token: Option<String>,
    chat_id: Option<String>,
}

impl Config {
    /// Defaults rooted at `project_root`.
    pub fn with_root(project_root: PathBuf) -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facewatch");

        Self {
            encodings_path: project_root.join("encodings.json"),
            dataset_dir: project_root.join("dataset"),
            capture_dir: project_root.join("tmp"),
            preview_path: project_root.join("preview.jpg"),
            model_dir: data_dir.join("models"),
            project_root,
            detector_model: DetectorModel::default(),
            similarity_threshold: facewatch_core::matcher::DEFAULT_SIMILARITY_THRESHOLD,
            camera_device: "/dev/video0".to_string(),
            unknown_timeout_minutes: 1,
            enroll_resize: Some((640, 480)),
            box_thickness: 2,
            box_intensity: 255,
            label_scale: 18.0,
            label_intensity: 255,
            telegram_token: None,
            telegram_chat_id: None,
        }
    }

    /// Load configuration for this process.
    ///
    /// `explicit` (from `--config`) or `FACEWATCH_CONFIG` must exist when given;
    /// `<project_root>/facewatch.toml` is read only if present.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let root = std::env::var("FACEWATCH_PROJECT_ROOT")
            .map(PathBuf::from)
            .or_else(|_| std::env::current_dir())?;

        let file = match explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("FACEWATCH_CONFIG").ok().map(PathBuf::from))
        {
            Some(path) => Some(read_file(&path)?),
            None => {
                let default = root.join("facewatch.toml");
                if default.exists() {
                    Some(read_file(&default)?)
                } else {
                    None
                }
            }
        };

        let mut config = Self::with_root(root);
        if let Some(file) = file {
            config.apply_file(file);
        }
        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        // A new root moves every default that hangs off it; explicit paths below win.
        if let Some(root) = file.project_root {
            let model_dir = std::mem::take(&mut self.model_dir);
            *self = Self { model_dir, ..Self::with_root(root) };
        }
        let root = self.project_root.clone();
        let resolve = |p: PathBuf| if p.is_absolute() { p } else { root.join(p) };

        if let Some(p) = file.encodings_path {
            self.encodings_path = resolve(p);
        }
        if let Some(p) = file.dataset_dir {
            self.dataset_dir = resolve(p);
        }
        if let Some(p) = file.capture_dir {
            self.capture_dir = resolve(p);
        }
        if let Some(p) = file.model_dir {
            self.model_dir = resolve(p);
        }
        if let Some(p) = file.preview_path {
            self.preview_path = resolve(p);
        }
        if let Some(m) = file.detector_model {
            self.detector_model = m;
        }
        if let Some(t) = file.similarity_threshold {
            self.similarity_threshold = t;
        }
        if let Some(d) = file.camera_device {
            self.camera_device = d;
        }
        if let Some(t) = file.unknown_timeout_minutes {
            self.unknown_timeout_minutes = t;
        }
        if let Some([w, h]) = file.enroll_resize {
            self.enroll_resize = (w > 0 && h > 0).then_some((w, h));
        }
        if let Some(t) = file.box_thickness {
            self.box_thickness = t;
        }
        if let Some(i) = file.box_intensity {
            self.box_intensity = i;
        }
        if let Some(s) = file.label_scale {
            self.label_scale = s;
        }
        if let Some(i) = file.label_intensity {
            self.label_intensity = i;
        }
        if let Some(telegram) = file.telegram {
            self.telegram_token = telegram.token.or(self.telegram_token.take());
            self.telegram_chat_id = telegram.chat_id.or(self.telegram_chat_id.take());
        }
    }

    fn apply_env(&mut self) {
        if let Ok(p) = std::env::var("FACEWATCH_ENCODINGS_PATH") {
            self.encodings_path = PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("FACEWATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(p);
        }
        if let Ok(d) = std::env::var("FACEWATCH_CAMERA_DEVICE") {
            self.camera_device = d;
        }
        if let Some(m) = std::env::var("FACEWATCH_DETECTOR_MODEL").ok().and_then(|v| v.parse().ok()) {
            self.detector_model = m;
        }
        self.similarity_threshold = env_f32("FACEWATCH_SIMILARITY_THRESHOLD", self.similarity_threshold);
        self.unknown_timeout_minutes = env_i64("FACEWATCH_UNKNOWN_TIMEOUT_MINUTES", self.unknown_timeout_minutes);
        if let Ok(token) = std::env::var("FACEWATCH_TELEGRAM_TOKEN") {
            self.telegram_token = Some(token);
        }
        if let Ok(chat) = std::env::var("FACEWATCH_TELEGRAM_CHAT_ID") {
            self.telegram_chat_id = Some(chat);
        }
    }

    /// Resolve a `--folder` argument: verbatim with `fullpath`, otherwise the
    /// folder's final component under the project root.
    pub fn resolve_folder(&self, folder: &Path, fullpath: bool) -> PathBuf {
        if fullpath {
            return folder.to_path_buf();
        }
        match folder.file_name() {
            Some(name) => self.project_root.join(name),
            None => self.project_root.clone(),
        }
    }

    pub fn box_style(&self) -> facewatch_hw::BoxStyle {
        facewatch_hw::BoxStyle {
            thickness: self.box_thickness,
            intensity: self.box_intensity,
            text_scale: self.label_scale,
            text_intensity: self.label_intensity,
        }
    }
}

fn read_file(path: &Path) -> anyhow::Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    let file = toml::from_str(&text)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(file)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> FileConfig {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_defaults_hang_off_root() {
        let config = Config::with_root(PathBuf::from("/srv/fw"));
        assert_eq!(config.encodings_path, PathBuf::from("/srv/fw/encodings.json"));
        assert_eq!(config.dataset_dir, PathBuf::from("/srv/fw/dataset"));
        assert_eq!(config.unknown_timeout_minutes, 1);
        assert_eq!(config.enroll_resize, Some((640, 480)));
    }

    #[test]
    fn test_file_overrides() {
        let mut config = Config::with_root(PathBuf::from("/srv/fw"));
        config.apply_file(parse(
            r#"
            encodings_path = "store/enc.json"
            detector_model = "scrfd_500m"
            unknown_timeout_minutes = 5
            enroll_resize = [0, 0]
            label_scale = 24.0
            label_intensity = 180

            [telegram]
            token = "123:abc"
            chat_id = "-42"
            "#,
        ));
        assert_eq!(config.encodings_path, PathBuf::from("/srv/fw/store/enc.json"));
        assert_eq!(config.detector_model, DetectorModel::Scrfd500m);
        assert_eq!(config.unknown_timeout_minutes, 5);
        assert_eq!(config.enroll_resize, None);
        assert_eq!(config.box_style().text_scale, 24.0);
        assert_eq!(config.box_style().text_intensity, 180);
        assert_eq!(config.telegram_token.as_deref(), Some("123:abc"));
        assert_eq!(config.telegram_chat_id.as_deref(), Some("-42"));
    }

    #[test]
    fn test_file_project_root_moves_defaults() {
        let mut config = Config::with_root(PathBuf::from("/srv/fw"));
        config.apply_file(parse(r#"project_root = "/data/other""#));
        assert_eq!(config.dataset_dir, PathBuf::from("/data/other/dataset"));
        assert_eq!(config.capture_dir, PathBuf::from("/data/other/tmp"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(toml::from_str::<FileConfig>("bogus = 1").is_err());
    }

    #[test]
    fn test_resolve_folder() {
        let config = Config::with_root(PathBuf::from("/srv/fw"));
        assert_eq!(
            config.resolve_folder(Path::new("/home/me/pics/alice"), false),
            PathBuf::from("/srv/fw/alice")
        );
        assert_eq!(
            config.resolve_folder(Path::new("/home/me/pics/alice"), true),
            PathBuf::from("/home/me/pics/alice")
        );
    }
}
