//! Cross-validation of the primary estimate against alternative estimators.
//!
//! Candidates are first octave-folded toward a trusted reference (the
//! manual target, else the primary's own result), then vote: agreement
//! within `tolerance` raises a candidate's score, and a gross disagreement
//! with the zero-crossing rate halves it.

use crate::config::EstimatorKind;
use crate::types::PitchCandidate;
use log::trace;

/// Ratio beyond which a candidate disagrees sharply with the zero-crossing rate.
const ZCR_DISAGREEMENT: f32 = 1.5;

/// The winner of a vote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciled {
    pub frequency_hz: f32,
    /// 0..1, scaled down when the estimators disagree
    pub confidence: f32,
    pub source: EstimatorKind,
}

#[derive(Debug, Clone, Copy)]
struct Vote {
    frequency_hz: f32,
    strength: f32,
    source: EstimatorKind,
    score: f32,
    agreeing: u32,
}

/// Pick whichever of `{f, f/2, 2f}` lies closest (in log frequency) to `reference`.
pub fn octave_guard(f: f32, reference: f32) -> f32 {
    if !(f > 0.0 && reference > 0.0) {
        return f;
    }
    let dist = |x: f32| (x / reference).log2().abs();
    let mut best = f;
    for candidate in [f * 0.5, f * 2.0] {
        if dist(candidate) < dist(best) {
            best = candidate;
        }
    }
    best
}

pub struct CrossValidator {
    tolerance: f32,
    votes: Vec<Vote>,
}

impl CrossValidator {
    pub fn new(tolerance: f32) -> Self {
        Self {
            tolerance,
            votes: Vec::with_capacity(8),
        }
    }

    fn agree(&self, a: f32, b: f32) -> bool {
        (a / b - 1.0).abs() <= self.tolerance
    }

    /// Reconcile one frame's estimates.
    ///
    /// `target` is the manual tuning target, if any. The zero-crossing
    /// estimate only bounds the others and never wins on its own. With an
    /// unvoiced primary, at least two alternatives have to agree before
    /// anything is reported.
    pub fn reconcile(
        &mut self,
        primary: &PitchCandidate,
        alternatives: &[PitchCandidate],
        target: Option<f32>,
    ) -> Option<Reconciled> {
        let reference = target.or(primary.frequency_hz);
        let zcr = alternatives
            .iter()
            .find(|c| c.source == EstimatorKind::ZeroCrossing)
            .and_then(|c| c.frequency_hz);

        self.votes.clear();
        for c in std::iter::once(primary).chain(alternatives) {
            if c.source == EstimatorKind::ZeroCrossing {
                continue;
            }
            let Some(f) = c.frequency_hz else { continue };
            let folded = match reference {
                Some(r) => octave_guard(f, r),
                None => f,
            };
            let mut strength = c.strength;
            if let Some(z) = zcr {
                if (folded / z).max(z / folded) > ZCR_DISAGREEMENT {
                    strength *= 0.5;
                }
            }
            self.votes.push(Vote {
                frequency_hz: folded,
                strength,
                source: c.source,
                score: strength,
                agreeing: 0,
            });
        }
        if self.votes.is_empty() {
            return None;
        }

        for i in 0..self.votes.len() {
            for j in 0..self.votes.len() {
                if i != j && self.agree(self.votes[i].frequency_hz, self.votes[j].frequency_hz) {
                    self.votes[i].score += 0.5 * self.votes[j].strength;
                    self.votes[i].agreeing += 1;
                }
            }
        }

        let winner = *self
            .votes
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))?;

        let primary_vote = self
            .votes
            .iter()
            .find(|v| v.source == primary.source && primary.is_voiced())
            .copied();
        if primary_vote.is_none() && winner.agreeing == 0 {
            trace!("cross-validator: lone {} without primary, rejected", winner.source.label());
            return None;
        }

        let others = (self.votes.len() - 1) as f32;
        let agree_ratio = if others > 0.0 {
            winner.agreeing as f32 / others
        } else {
            1.0
        };
        let confidence = (winner.strength * (0.5 + 0.5 * agree_ratio)).clamp(0.0, 1.0);

        // Keep the primary's value whenever it sides with the winner.
        let (frequency_hz, source) = match primary_vote {
            Some(p) if self.agree(p.frequency_hz, winner.frequency_hz) => (p.frequency_hz, p.source),
            _ => (winner.frequency_hz, winner.source),
        };
        if source != primary.source {
            trace!(
                "cross-validator: {} overrides {} ({:.2} Hz)",
                source.label(),
                primary.source.label(),
                frequency_hz
            );
        }
        Some(Reconciled {
            frequency_hz,
            confidence,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(source: EstimatorKind, f: f32, strength: f32) -> PitchCandidate {
        PitchCandidate::found(source, f, strength)
    }

    fn cv() -> CrossValidator {
        CrossValidator::new(0.05)
    }

    #[test]
    fn test_octave_guard_folds_toward_reference() {
        assert_eq!(octave_guard(164.82, 82.41), 82.41);
        assert_eq!(octave_guard(41.205, 82.41), 82.41);
        // A fifth away is left alone
        assert_eq!(octave_guard(110.0, 82.41), 110.0);
    }

    #[test]
    fn test_octave_guard_with_manual_target() {
        let mut v = cv();
        for f in [164.82f32, 41.205] {
            let primary = cand(EstimatorKind::Yin, f, 0.95);
            let r = v.reconcile(&primary, &[], Some(82.41)).unwrap();
            assert!((r.frequency_hz - 82.41).abs() < 1e-3, "{} folded to {}", f, r.frequency_hz);
        }
    }

    #[test]
    fn test_agreeing_alternatives_keep_primary_value() {
        let mut v = cv();
        let primary = cand(EstimatorKind::Yin, 110.0, 0.9);
        let alts = [
            cand(EstimatorKind::McLeod, 110.3, 0.95),
            cand(EstimatorKind::Bitstream, 109.5, 0.9),
            cand(EstimatorKind::ZeroCrossing, 111.0, 0.5),
        ];
        let r = v.reconcile(&primary, &alts, None).unwrap();
        assert_eq!(r.frequency_hz, 110.0);
        assert_eq!(r.source, EstimatorKind::Yin);
        assert!(r.confidence > 0.85);
    }

    #[test]
    fn test_subharmonic_alternative_is_folded() {
        let mut v = cv();
        let primary = cand(EstimatorKind::Yin, 196.0, 0.9);
        let alts = [cand(EstimatorKind::Bitstream, 98.0, 0.95)];
        let r = v.reconcile(&primary, &alts, None).unwrap();
        assert_eq!(r.frequency_hz, 196.0);
        assert!((r.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_majority_overrides_weak_primary() {
        let mut v = cv();
        let primary = cand(EstimatorKind::Yin, 150.0, 0.3);
        let alts = [
            cand(EstimatorKind::McLeod, 110.0, 0.9),
            cand(EstimatorKind::Bitstream, 110.4, 0.9),
        ];
        let r = v.reconcile(&primary, &alts, None).unwrap();
        assert!((r.frequency_hz - 110.0).abs() < 0.5);
        assert_ne!(r.source, EstimatorKind::Yin);
        assert!(r.confidence < 0.9, "disagreement lowers confidence");
    }

    #[test]
    fn test_zero_crossing_disagreement_halves_strength() {
        let mut v = cv();
        let primary = cand(EstimatorKind::Yin, 300.0, 0.8);
        let alts = [cand(EstimatorKind::ZeroCrossing, 100.0, 0.5)];
        let r = v.reconcile(&primary, &alts, None).unwrap();
        assert!((r.confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_lone_alternative_without_primary_rejected() {
        let mut v = cv();
        let primary = PitchCandidate::none(EstimatorKind::Yin);
        let alts = [cand(EstimatorKind::Bitstream, 110.0, 0.6)];
        assert!(v.reconcile(&primary, &alts, None).is_none());

        let alts = [
            cand(EstimatorKind::Bitstream, 110.0, 0.8),
            cand(EstimatorKind::McLeod, 110.2, 0.9),
        ];
        let r = v.reconcile(&primary, &alts, None).unwrap();
        assert!((r.frequency_hz - 110.1).abs() < 0.2);
    }

    #[test]
    fn test_all_unvoiced_is_none() {
        let mut v = cv();
        let primary = PitchCandidate::none(EstimatorKind::Yin);
        let alts = [
            PitchCandidate::none(EstimatorKind::McLeod),
            cand(EstimatorKind::ZeroCrossing, 120.0, 0.4),
        ];
        assert!(v.reconcile(&primary, &alts, None).is_none());
    }
}
