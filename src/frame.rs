//! Frames and frame sources.
//!
//! A `Frame` is an opaque encoded image (typically JPEG) as handed to the landmark
//! extractor. Frame bytes are never logged or retained past extraction.
//!
//! Sources for the capture side:
//! - `stub://<name>`: synthetic frames (testing, demos)
//! - a local directory: replays image files in name order, looping

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::now_millis;

const SYNTHETIC_WIDTH: usize = 64;
const SYNTHETIC_HEIGHT: usize = 48;
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

pub struct Frame {
    data: Vec<u8>,
    /// Capture time in milliseconds since epoch.
    pub captured_at_ms: u64,
    /// Source-local sequence number, starting at 1.
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self {
            data,
            captured_at_ms: now_millis(),
            sequence,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("captured_at_ms", &self.captured_at_ms)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Live frame source sampled by the capture scheduler.
pub trait FrameSource: Send {
    /// Source identifier.
    fn name(&self) -> &str;

    /// The current frame, or `None` when the source has nothing ready.
    fn current_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Open a frame source from a source string.
pub fn open_source(source: &str) -> Result<Box<dyn FrameSource>> {
    if source.trim().is_empty() {
        return Err(anyhow!("frame source must not be empty"));
    }
    if let Some(name) = source.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticSource::new(name)));
    }
    if source.contains("://") {
        return Err(anyhow!(
            "frame source only supports stub:// or local directories, got '{}'",
            source
        ));
    }
    Ok(Box::new(DirectorySource::open(Path::new(source))?))
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

pub struct SyntheticSource {
    name: String,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: format!("stub://{}", name),
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = SYNTHETIC_WIDTH * SYNTHETIC_HEIGHT * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn current_frame(&mut self) -> Result<Option<Frame>> {
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Ok(Some(Frame::new(pixels, self.frame_count)))
    }
}

// ----------------------------------------------------------------------------
// Directory replay source
// ----------------------------------------------------------------------------

pub struct DirectorySource {
    name: String,
    files: Vec<PathBuf>,
    position: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl DirectorySource {
    pub fn open(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("read frame directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("no image files found in {}", dir.display()));
        }
        files.sort();
        log::info!(
            "DirectorySource: replaying {} frames from {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            name: dir.display().to_string(),
            files,
            position: 0,
            frame_count: 0,
            last_error: None,
        })
    }
}

impl FrameSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn current_frame(&mut self) -> Result<Option<Frame>> {
        let path = &self.files[self.position];
        self.position = (self.position + 1) % self.files.len();
        match std::fs::read(path) {
            Ok(bytes) => {
                self.frame_count += 1;
                self.last_error = None;
                Ok(Some(Frame::new(bytes, self.frame_count)))
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Err(anyhow!("read frame {}: {}", path.display(), e))
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }
}
