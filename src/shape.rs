use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use anyhow::Context;
use serde::Deserialize;

use crate::{
    error::ShapeError,
    evidence::ExpectedEvidence,
    mask::BinaryMask,
    types::{EvidenceKind, Point},
};

const MIN_ANCHORS: usize = 3;
const ASPECT_TOLERANCE: f32 = 0.01;

/// Target joint position with its acceptance radius, in evidence coordinates.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Anchor {
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

impl Anchor {
    pub fn new(name: impl Into<String>, x: f32, y: f32, radius: f32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            radius,
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeypointShape {
    anchors: Vec<Anchor>,
}

impl KeypointShape {
    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaskShape {
    mask: BinaryMask,
    area: usize,
}

impl MaskShape {
    pub fn mask(&self) -> &BinaryMask {
        &self.mask
    }

    /// Number of pixels the player has to cover. Always non-zero.
    pub fn area(&self) -> usize {
        self.area
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ShapeTarget {
    Keypoints(KeypointShape),
    Mask(MaskShape),
}

/// A validated, immutable target.
#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    id: String,
    target: ShapeTarget,
}

impl Shape {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &ShapeTarget {
        &self.target
    }

    pub fn kind(&self) -> EvidenceKind {
        match &self.target {
            ShapeTarget::Keypoints(_) => EvidenceKind::Keypoints,
            ShapeTarget::Mask(_) => EvidenceKind::Mask,
        }
    }

    pub fn expected_evidence(&self) -> ExpectedEvidence {
        match &self.target {
            ShapeTarget::Keypoints(_) => ExpectedEvidence::Keypoints,
            ShapeTarget::Mask(shape) => {
                let (width, height) = shape.mask.dimensions();
                ExpectedEvidence::Mask { width, height }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeypointAsset {
    anchors: Vec<Anchor>,
}

#[derive(Clone, Debug)]
enum ShapeAsset {
    Anchors(Vec<Anchor>),
    Mask(BinaryMask),
    KeypointFile(PathBuf),
    MaskFile(PathBuf),
}

#[derive(Debug)]
struct Entry {
    id: String,
    asset: ShapeAsset,
    loaded: OnceLock<Result<Arc<Shape>, ShapeError>>,
}

/// Read-only catalogue of target shapes, shareable across sessions.
///
/// Assets are validated on first `load` and cached, so every later load of the
/// same id returns the same shape (or the same error).
#[derive(Debug, Default)]
pub struct ShapeRegistry {
    entries: Vec<Entry>,
    frame_size: Option<(u32, u32)>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask shapes must match the aspect ratio of frames this size.
    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_size = Some((width, height));
        self
    }

    /// Registers every `<id>.png` (mask) and `<id>.json` (keypoints) in `dir`,
    /// in file-name order. Files are not decoded until loaded.
    pub fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut paths = fs::read_dir(dir)
            .with_context(|| format!("failed to read shape directory {}", dir.display()))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("failed to list shape directory {}", dir.display()))?;
        paths.sort();

        let mut registry = Self::new();
        for path in paths {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
                continue;
            };
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            match extension.as_deref() {
                Some("png") => registry.insert(id, ShapeAsset::MaskFile(path)),
                Some("json") => registry.insert(id, ShapeAsset::KeypointFile(path)),
                _ => log::debug!("ignoring non-shape file {}", path.display()),
            }
        }

        log::info!(
            "registered {} shapes from {}",
            registry.entries.len(),
            dir.display()
        );
        Ok(registry)
    }

    pub fn register_keypoints(&mut self, id: impl Into<String>, anchors: Vec<Anchor>) {
        self.insert(id.into(), ShapeAsset::Anchors(anchors));
    }

    pub fn register_mask(&mut self, id: impl Into<String>, mask: BinaryMask) {
        self.insert(id.into(), ShapeAsset::Mask(mask));
    }

    fn insert(&mut self, id: String, asset: ShapeAsset) {
        let entry = Entry {
            id,
            asset,
            loaded: OnceLock::new(),
        };
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == entry.id) {
            log::warn!("shape `{}` registered twice; keeping the later asset", entry.id);
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn load(&self, id: &str) -> Result<Arc<Shape>, ShapeError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ShapeError::NotFound(id.to_owned()))?;

        entry
            .loaded
            .get_or_init(|| self.build(entry).map(Arc::new))
            .clone()
    }

    /// Ids in registration order. Call again to restart.
    pub fn shape_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.id.as_str())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn build(&self, entry: &Entry) -> Result<Shape, ShapeError> {
        let corrupt = |reason: String| ShapeError::Corrupt {
            id: entry.id.clone(),
            reason,
        };

        let target = match &entry.asset {
            ShapeAsset::Anchors(anchors) => {
                ShapeTarget::Keypoints(validate_anchors(anchors.clone()).map_err(corrupt)?)
            }
            ShapeAsset::Mask(mask) => {
                ShapeTarget::Mask(self.validate_mask(mask.clone()).map_err(corrupt)?)
            }
            ShapeAsset::KeypointFile(path) => {
                let anchors = read_anchor_file(path).map_err(|err| corrupt(format!("{err:#}")))?;
                ShapeTarget::Keypoints(validate_anchors(anchors).map_err(corrupt)?)
            }
            ShapeAsset::MaskFile(path) => {
                let image = image::open(path)
                    .map_err(|err| corrupt(format!("failed to decode {}: {err}", path.display())))?;
                let mask = BinaryMask::from_rgba(&image.to_rgba8());
                ShapeTarget::Mask(self.validate_mask(mask).map_err(corrupt)?)
            }
        };

        log::debug!("loaded shape `{}`", entry.id);
        Ok(Shape {
            id: entry.id.clone(),
            target,
        })
    }

    fn validate_mask(&self, mask: BinaryMask) -> Result<MaskShape, String> {
        let (width, height) = mask.dimensions();
        if width == 0 || height == 0 {
            return Err(format!("mask has empty dimensions {width}x{height}"));
        }
        if let Some((frame_w, frame_h)) = self.frame_size {
            let frame_aspect = frame_w as f32 / frame_h.max(1) as f32;
            let mask_aspect = width as f32 / height as f32;
            if ((mask_aspect - frame_aspect) / frame_aspect).abs() > ASPECT_TOLERANCE {
                return Err(format!(
                    "mask is {width}x{height} but capture frames are {frame_w}x{frame_h}"
                ));
            }
        }
        let area = mask.count();
        if area == 0 {
            return Err("mask has no target pixels".to_string());
        }
        Ok(MaskShape { mask, area })
    }
}

fn read_anchor_file(path: &Path) -> anyhow::Result<Vec<Anchor>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let asset: KeypointAsset = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(asset.anchors)
}

fn validate_anchors(anchors: Vec<Anchor>) -> Result<KeypointShape, String> {
    if anchors.len() < MIN_ANCHORS {
        return Err(format!(
            "{} anchors given, need at least {MIN_ANCHORS}",
            anchors.len()
        ));
    }

    let mut seen = HashSet::new();
    for anchor in &anchors {
        if anchor.name.is_empty() {
            return Err("anchor with empty name".to_string());
        }
        if !seen.insert(anchor.name.as_str()) {
            return Err(format!("duplicate anchor `{}`", anchor.name));
        }
        if !anchor.x.is_finite() || !anchor.y.is_finite() {
            return Err(format!("anchor `{}` has a non-finite position", anchor.name));
        }
        if !anchor.radius.is_finite() || anchor.radius <= 0.0 {
            return Err(format!(
                "anchor `{}` has invalid radius {}",
                anchor.name, anchor.radius
            ));
        }
    }

    Ok(KeypointShape { anchors })
}
