//! Rank quality: Spearman correlation and top/bottom-k overlap.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Windows larger than the ranking fall back to this size when possible.
pub const FALLBACK_K: usize = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QualityError {
    #[error(
        "produced and reference orders are not permutations of the same set \
         ({produced} vs {reference} elements)"
    )]
    ReferenceMismatch { produced: usize, reference: usize },
}

/// Record of a window size that had to be clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KAdjustment {
    pub requested: usize,
    pub effective: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Spearman rho, 3 decimals. Absent below 2 elements.
    pub rank_correlation: Option<f64>,
    /// |overlap_set| / effective_k, 3 decimals.
    pub overlap_ratio: f64,
    /// Shared window elements, in produced order.
    pub overlap_set: Vec<usize>,
    pub requested_k: usize,
    pub effective_k: usize,
    pub from_top: bool,
    pub k_adjustment: Option<KAdjustment>,
}

pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Window size for a ranking of `len` elements.
///
/// A request larger than the ranking becomes 10 when at least 10 are
/// ranked, otherwise the whole ranking.
pub fn clamp_k(requested: usize, len: usize) -> usize {
    if requested <= len {
        requested
    } else if len >= FALLBACK_K {
        FALLBACK_K
    } else {
        len
    }
}

fn positions(order: &[usize]) -> HashMap<usize, usize> {
    order.iter().enumerate().map(|(pos, &x)| (x, pos)).collect()
}

fn check_same_set(produced: &[usize], reference: &[usize]) -> Result<(), QualityError> {
    let mismatch = QualityError::ReferenceMismatch {
        produced: produced.len(),
        reference: reference.len(),
    };
    if produced.len() != reference.len() {
        return Err(mismatch);
    }
    let a: HashSet<usize> = produced.iter().copied().collect();
    let b: HashSet<usize> = reference.iter().copied().collect();
    if a.len() != produced.len() || b.len() != reference.len() || a != b {
        return Err(mismatch);
    }
    Ok(())
}

/// Spearman correlation of the positions each element holds in the two orders.
pub fn spearman(produced: &[usize], reference: &[usize]) -> Result<Option<f64>, QualityError> {
    check_same_set(produced, reference)?;
    let n = produced.len();
    if n < 2 {
        return Ok(None);
    }

    let ref_pos = positions(reference);
    let d2: f64 = produced
        .iter()
        .enumerate()
        .map(|(pos, x)| {
            let r = ref_pos.get(x).copied().unwrap_or(pos);
            let d = pos as f64 - r as f64;
            d * d
        })
        .sum();
    let n = n as f64;
    let rho = 1.0 - 6.0 * d2 / (n * (n * n - 1.0));
    Ok(Some(round3(rho)))
}

/// Elements shared by the first (or last) `k` of both orders.
///
/// Returns the shared elements in produced order and their share of `k`.
pub fn top_k_overlap(
    produced: &[usize],
    reference: &[usize],
    k: usize,
    from_top: bool,
) -> (Vec<usize>, f64) {
    if k == 0 {
        return (Vec::new(), 0.0);
    }
    let window = |order: &[usize]| -> Vec<usize> {
        let k = k.min(order.len());
        if from_top {
            order[..k].to_vec()
        } else {
            order[order.len() - k..].to_vec()
        }
    };
    let produced_window = window(produced);
    let reference_window: HashSet<usize> = window(reference).into_iter().collect();
    let shared: Vec<usize> = produced_window
        .into_iter()
        .filter(|x| reference_window.contains(x))
        .collect();
    let ratio = round3(shared.len() as f64 / k as f64);
    (shared, ratio)
}

/// Score a produced order against a reference order.
pub fn score(
    produced: &[usize],
    reference: &[usize],
    k: usize,
    from_top: bool,
) -> Result<QualityReport, QualityError> {
    let rank_correlation = spearman(produced, reference)?;

    let effective_k = clamp_k(k, produced.len());
    let k_adjustment = (effective_k != k).then(|| {
        warn!(
            requested = k,
            effective = effective_k,
            available = produced.len(),
            "k exceeds ranked documents; clamping"
        );
        KAdjustment {
            requested: k,
            effective: effective_k,
            available: produced.len(),
        }
    });

    let (overlap_set, overlap_ratio) = top_k_overlap(produced, reference, effective_k, from_top);

    Ok(QualityReport {
        rank_correlation,
        overlap_ratio,
        overlap_set,
        requested_k: k,
        effective_k,
        from_top,
        k_adjustment,
    })
}
