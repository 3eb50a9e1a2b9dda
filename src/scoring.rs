use crate::{
    error::ScoreError,
    evidence::{Evidence, KeypointEvidence, MaskEvidence},
    shape::{KeypointShape, MaskShape, Shape, ShapeTarget},
    types::{EvidenceKind, FitResult, MaskCoverage},
};

/// Computes one frame's fit against a shape. Implementations are pure.
pub trait ScoringStrategy: Send + Sync {
    fn kind(&self) -> EvidenceKind;

    fn score(
        &self,
        shape: &Shape,
        evidence: &Evidence,
        threshold: f32,
    ) -> Result<FitResult, ScoreError>;
}

/// Picks the strategy for a shape's representation.
pub fn strategy_for(kind: EvidenceKind) -> &'static dyn ScoringStrategy {
    match kind {
        EvidenceKind::Keypoints => &KeypointStrategy,
        EvidenceKind::Mask => &MaskOverlapStrategy,
    }
}

/// Mean per-joint score, where a joint within its radius scores 1 and decays
/// linearly to 0 at twice the radius.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeypointStrategy;

impl ScoringStrategy for KeypointStrategy {
    fn kind(&self) -> EvidenceKind {
        EvidenceKind::Keypoints
    }

    fn score(
        &self,
        shape: &Shape,
        evidence: &Evidence,
        threshold: f32,
    ) -> Result<FitResult, ScoreError> {
        match (shape.target(), evidence) {
            (ShapeTarget::Keypoints(target), Evidence::Keypoints(observed)) => {
                Ok(FitResult::new(keypoint_fit(target, observed), threshold))
            }
            _ => Err(kind_mismatch(shape, evidence)),
        }
    }
}

/// Share of the target silhouette covered by the body.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaskOverlapStrategy;

impl ScoringStrategy for MaskOverlapStrategy {
    fn kind(&self) -> EvidenceKind {
        EvidenceKind::Mask
    }

    fn score(
        &self,
        shape: &Shape,
        evidence: &Evidence,
        threshold: f32,
    ) -> Result<FitResult, ScoreError> {
        match (shape.target(), evidence) {
            (ShapeTarget::Mask(target), Evidence::Mask(observed)) => {
                let coverage = mask_coverage(target, observed)?;
                let fit = (coverage.overlap as f64 * 100.0) / coverage.shape_area as f64;
                Ok(FitResult::new(fit as f32, threshold).with_coverage(coverage))
            }
            _ => Err(kind_mismatch(shape, evidence)),
        }
    }
}

fn kind_mismatch(shape: &Shape, evidence: &Evidence) -> ScoreError {
    ScoreError::KindMismatch {
        shape: shape.kind(),
        evidence: evidence.kind(),
    }
}

pub fn joint_score(distance: f32, radius: f32) -> f32 {
    if distance <= radius {
        1.0
    } else if distance >= 2.0 * radius {
        0.0
    } else {
        ((2.0 * radius - distance) / radius).clamp(0.0, 1.0)
    }
}

fn keypoint_fit(target: &KeypointShape, observed: &KeypointEvidence) -> f32 {
    let anchors = target.anchors();
    if anchors.is_empty() {
        return 0.0;
    }

    let total: f32 = anchors
        .iter()
        .map(|anchor| {
            observed
                .get(&anchor.name)
                .map(|p| joint_score(p.distance(&anchor.position()), anchor.radius))
                .unwrap_or(0.0)
        })
        .sum();

    (total / anchors.len() as f32 * 100.0).round()
}

fn mask_coverage(target: &MaskShape, observed: &MaskEvidence) -> Result<MaskCoverage, ScoreError> {
    let shape_mask = target.mask();
    let body_mask = observed.mask();
    if shape_mask.dimensions() != body_mask.dimensions() {
        return Err(ScoreError::DimensionMismatch {
            shape: shape_mask.dimensions(),
            evidence: body_mask.dimensions(),
        });
    }

    let overlap = shape_mask.overlap(body_mask);
    let shape_area = target.area();
    let body_area = body_mask.count();
    let excess = body_area.saturating_sub(overlap);
    let excess_percent = ((excess as f64 * 100.0) / shape_area as f64)
        .round()
        .min(100.0) as u8;

    Ok(MaskCoverage {
        overlap,
        shape_area,
        body_area,
        excess_percent,
    })
}
