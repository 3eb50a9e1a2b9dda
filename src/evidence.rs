use std::collections::HashMap;

use image::GrayImage;

use crate::{
    config::GameConfig,
    error::EvidenceError,
    mask::BinaryMask,
    types::{DetectedJoint, EvidenceKind, Point, VisionOutput},
};

const DEFAULT_MIN_CONFIDENCE: f32 = 0.2;
const DEFAULT_INVERSION_RATIO: f32 = 0.7;

/// What the active shape needs from each frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectedEvidence {
    Keypoints,
    Mask { width: u32, height: u32 },
}

impl ExpectedEvidence {
    pub fn kind(&self) -> EvidenceKind {
        match self {
            ExpectedEvidence::Keypoints => EvidenceKind::Keypoints,
            ExpectedEvidence::Mask { .. } => EvidenceKind::Mask,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeypointEvidence {
    joints: HashMap<String, Point>,
}

impl KeypointEvidence {
    pub fn get(&self, name: &str) -> Option<Point> {
        self.joints.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, Point)> for KeypointEvidence {
    fn from_iter<I: IntoIterator<Item = (S, Point)>>(iter: I) -> Self {
        Self {
            joints: iter.into_iter().map(|(name, p)| (name.into(), p)).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MaskEvidence {
    mask: BinaryMask,
}

impl MaskEvidence {
    pub fn new(mask: BinaryMask) -> Self {
        Self { mask }
    }

    pub fn mask(&self) -> &BinaryMask {
        &self.mask
    }
}

/// One frame of observed body data, consumed by a single scoring call.
#[derive(Clone, Debug, PartialEq)]
pub enum Evidence {
    Keypoints(KeypointEvidence),
    Mask(MaskEvidence),
}

impl Evidence {
    pub fn kind(&self) -> EvidenceKind {
        match self {
            Evidence::Keypoints(_) => EvidenceKind::Keypoints,
            Evidence::Mask(_) => EvidenceKind::Mask,
        }
    }
}

/// Normalizes raw vision output into the evidence the active shape expects.
#[derive(Clone, Debug)]
pub struct EvidenceAdapter {
    min_confidence: f32,
    inversion_ratio: f32,
}

impl Default for EvidenceAdapter {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            inversion_ratio: DEFAULT_INVERSION_RATIO,
        }
    }
}

impl EvidenceAdapter {
    /// `inversion_ratio` of 1.0 disables the inverted-segmentation guard.
    pub fn new(min_confidence: f32, inversion_ratio: f32) -> Self {
        Self {
            min_confidence,
            inversion_ratio,
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.min_keypoint_confidence, config.mask_inversion_ratio)
    }

    pub fn adapt(
        &self,
        raw: &VisionOutput,
        expected: ExpectedEvidence,
    ) -> Result<Evidence, EvidenceError> {
        match (raw, expected) {
            (VisionOutput::Nothing, _) => Err(EvidenceError::Empty),
            (VisionOutput::Keypoints(joints), ExpectedEvidence::Keypoints) => {
                self.adapt_keypoints(joints).map(Evidence::Keypoints)
            }
            (VisionOutput::Mask(image), ExpectedEvidence::Mask { width, height }) => self
                .adapt_mask(image, width, height)
                .map(Evidence::Mask),
            (VisionOutput::Keypoints(_), _) => Err(EvidenceError::KindMismatch {
                expected: expected.kind(),
                found: EvidenceKind::Keypoints,
            }),
            (VisionOutput::Mask(_), _) => Err(EvidenceError::KindMismatch {
                expected: expected.kind(),
                found: EvidenceKind::Mask,
            }),
        }
    }

    fn adapt_keypoints(&self, joints: &[DetectedJoint]) -> Result<KeypointEvidence, EvidenceError> {
        let mut observed = HashMap::with_capacity(joints.len());
        for joint in joints {
            let confident = joint
                .confidence
                .map_or(true, |c| c >= self.min_confidence);
            if !confident || !joint.x.is_finite() || !joint.y.is_finite() {
                continue;
            }
            observed
                .entry(joint.name.clone())
                .or_insert_with(|| joint.position());
        }

        if observed.is_empty() {
            return Err(EvidenceError::Empty);
        }
        Ok(KeypointEvidence { joints: observed })
    }

    fn adapt_mask(
        &self,
        image: &GrayImage,
        width: u32,
        height: u32,
    ) -> Result<MaskEvidence, EvidenceError> {
        let mut mask = BinaryMask::from_luma(image);
        if mask.is_empty() {
            return Err(EvidenceError::Empty);
        }

        // Only raw capture frames can come back with the background labelled;
        // a mask already on the shape raster is taken as-is.
        let coverage = mask.coverage_ratio();
        if mask.dimensions() != (width, height) && coverage > self.inversion_ratio {
            log::debug!(
                "body mask covers {:.0}% of the frame, treating it as inverted",
                coverage * 100.0
            );
            mask = mask.inverted();
        }
        if mask.count() == 0 {
            return Err(EvidenceError::Empty);
        }

        let mask = mask.resize_nearest(width, height).map_err(|err| {
            log::warn!("failed to resample body mask to {width}x{height}: {err:?}");
            EvidenceError::Empty
        })?;
        Ok(MaskEvidence { mask })
    }
}
