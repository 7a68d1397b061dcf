//! Discrimination and calibration metrics over `(prediction, outcome)` pairs.
//!
//! Every function returns `None` when the metric is undefined for its input
//! instead of a fabricated value.

use serde::{Deserialize, Serialize};

/// Slack for comparing two mastery values produced by the same update.
const TRAJECTORY_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub p: f64,
    pub outcome: bool,
}

impl Prediction {
    pub fn new(p: f64, outcome: bool) -> Self {
        Self { p, outcome }
    }

    fn label(&self) -> f64 {
        if self.outcome {
            1.0
        } else {
            0.0
        }
    }
}

/// One observed update, for trajectory checks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MasteryStep {
    pub previous: f64,
    pub next: f64,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_predicted: Option<f64>,
    pub observed_rate: Option<f64>,
}

/// Mann-Whitney AUC with averaged ranks for tied predictions.
pub fn auc(preds: &[Prediction]) -> Option<f64> {
    let positives = preds.iter().filter(|p| p.outcome).count();
    let negatives = preds.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut sorted: Vec<&Prediction> = preds.iter().collect();
    sorted.sort_by(|a, b| a.p.total_cmp(&b.p));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].p == sorted[i].p {
            j += 1;
        }
        // ranks are 1-based
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let tied_positives = sorted[i..=j].iter().filter(|p| p.outcome).count();
        rank_sum += avg_rank * tied_positives as f64;
        i = j + 1;
    }

    let pos = positives as f64;
    let neg = negatives as f64;
    Some((rank_sum - pos * (pos + 1.0) / 2.0) / (pos * neg))
}

/// Share of predictions whose rounded value matches the outcome; 0.5 rounds up.
pub fn accuracy(preds: &[Prediction]) -> Option<f64> {
    if preds.is_empty() {
        return None;
    }
    let hits = preds.iter().filter(|p| (p.p >= 0.5) == p.outcome).count();
    Some(hits as f64 / preds.len() as f64)
}

pub fn brier_score(preds: &[Prediction]) -> Option<f64> {
    if preds.is_empty() {
        return None;
    }
    let sum: f64 = preds.iter().map(|p| (p.p - p.label()).powi(2)).sum();
    Some(sum / preds.len() as f64)
}

/// Equal-width bin for `p`; `p = 1.0` lands in the last bin.
pub fn bin_index(p: f64, bins: usize) -> usize {
    let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
    ((p * bins as f64).floor() as usize).min(bins.saturating_sub(1))
}

pub fn reliability_bins(preds: &[Prediction], bins: usize) -> Vec<ReliabilityBin> {
    if bins == 0 {
        return Vec::new();
    }
    let mut sums = vec![(0usize, 0.0f64, 0.0f64); bins];
    for pred in preds {
        let slot = &mut sums[bin_index(pred.p, bins)];
        slot.0 += 1;
        slot.1 += pred.p;
        slot.2 += pred.label();
    }
    let width = 1.0 / bins as f64;
    sums.into_iter()
        .enumerate()
        .map(|(k, (count, p_sum, y_sum))| {
            let n = count as f64;
            ReliabilityBin {
                lower: k as f64 * width,
                upper: if k + 1 == bins { 1.0 } else { (k + 1) as f64 * width },
                count,
                mean_predicted: (count > 0).then(|| p_sum / n),
                observed_rate: (count > 0).then(|| y_sum / n),
            }
        })
        .collect()
}

/// Size-weighted mean gap between bin confidence and bin accuracy.
pub fn expected_calibration_error(preds: &[Prediction], bins: usize) -> Option<f64> {
    if preds.is_empty() || bins == 0 {
        return None;
    }
    let total = preds.len() as f64;
    let ece = reliability_bins(preds, bins)
        .iter()
        .filter_map(|bin| {
            let conf = bin.mean_predicted?;
            let acc = bin.observed_rate?;
            Some(bin.count as f64 / total * (acc - conf).abs())
        })
        .sum();
    Some(ece)
}

pub fn trajectory_validity(steps: &[MasteryStep]) -> Option<f64> {
    if steps.is_empty() {
        return None;
    }
    let valid = steps
        .iter()
        .filter(|s| {
            if s.is_correct {
                s.next >= s.previous - TRAJECTORY_TOLERANCE
            } else {
                s.next <= s.previous + TRAJECTORY_TOLERANCE
            }
        })
        .count();
    Some(valid as f64 / steps.len() as f64)
}
