//! Expression-weighted functional diversity ("movement") and the RMSD-based
//! statistics used to compare samples.

use serde::{Deserialize, Serialize};

use crate::model::{FasMatrix, Gene};

/// Movement of every transcript of a gene with zero total expression.
pub const UNEXPRESSED_MOVEMENT: f64 = 1.0;

/// Movement values per gene, aligned to `transcripts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementVector {
    pub transcripts: Vec<String>,
    pub values: Vec<f64>,
}

/// Per-transcript summary across replicate movement vectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ring {
    /// Positions (in the input alignment) that survived the expression filter.
    pub kept: Vec<usize>,
    pub mean: Vec<f64>,
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub mean_plus_std: Vec<f64>,
    pub mean_minus_std: Vec<f64>,
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// `movement[s] = 1 - sum_q rel[q] * fas[order[s]][order[q]]`, rounded to four
/// decimals. `relative_expression[k]` belongs to slot `order[k]`; unscored FAS
/// entries count as similarity 0.
pub fn compute_movement(fas: &FasMatrix, relative_expression: &[f64], order: &[usize]) -> Vec<f64> {
    let total: f64 = relative_expression.iter().sum();
    if total <= 0.0 {
        return vec![UNEXPRESSED_MOVEMENT; order.len()];
    }
    order
        .iter()
        .map(|&seed| {
            let covered: f64 = order
                .iter()
                .zip(relative_expression)
                .map(|(&query, rel)| rel * fas.similarity(seed, query))
                .sum();
            round4(1.0 - covered)
        })
        .collect()
}

/// Movement over the gene's protein transcripts, in gene order.
pub fn gene_movement<F>(gene: &Gene, relative_expression: F) -> MovementVector
where
    F: Fn(&str) -> f64,
{
    let (order, transcripts): (Vec<usize>, Vec<String>) = gene
        .transcripts()
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_protein())
        .map(|(slot, t)| (slot, t.id.clone()))
        .unzip();
    let expression = transcripts
        .iter()
        .map(|id| relative_expression(id))
        .collect::<Vec<_>>();
    MovementVector {
        values: compute_movement(gene.fas(), &expression, &order),
        transcripts,
    }
}

/// Root-mean-square deviation; 0 for empty input. Lengths must match.
pub fn rmsd(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    if a.is_empty() {
        return 0.0;
    }
    let sum: f64 = a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum();
    (sum / a.len() as f64).sqrt()
}

/// Mean of every pairwise RMSD between the given vectors; 0 below two vectors.
pub fn mean_pairwise_rmsd(vectors: &[Vec<f64>]) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in vectors.iter().enumerate() {
        for b in &vectors[i + 1..] {
            total += rmsd(a, b);
            pairs += 1;
        }
    }
    if pairs == 0 { 0.0 } else { total / pairs as f64 }
}

/// Positions where at least one sample carries expression.
pub fn expressed_positions(relative_expressions: &[&[f64]]) -> Vec<usize> {
    let width = relative_expressions.first().map(|v| v.len()).unwrap_or(0);
    (0..width)
        .filter(|&i| relative_expressions.iter().any(|rel| rel[i] != 0.0))
        .collect()
}

pub fn select(values: &[f64], positions: &[usize]) -> Vec<f64> {
    positions.iter().map(|&i| values[i]).collect()
}

/// Summarizes aligned replicate movement vectors per transcript. Transcripts
/// not expressed in any replicate are dropped first.
pub fn aggregate_ring(movements: &[Vec<f64>], relative_expressions: &[Vec<f64>]) -> Ring {
    let rels = relative_expressions.iter().map(Vec::as_slice).collect::<Vec<_>>();
    let kept = expressed_positions(&rels);
    if movements.is_empty() {
        return Ring {
            kept,
            ..Ring::default()
        };
    }

    let mut ring = Ring {
        kept: kept.clone(),
        ..Ring::default()
    };
    let n = movements.len() as f64;
    for &i in &kept {
        let column = movements.iter().map(|m| m[i]).collect::<Vec<_>>();
        let mean = column.iter().sum::<f64>() / n;
        let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();
        ring.mean.push(round4(mean));
        ring.min.push(column.iter().copied().fold(f64::INFINITY, f64::min));
        ring.max.push(column.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        ring.mean_plus_std.push(round4(mean + std));
        ring.mean_minus_std.push(round4(mean - std));
    }
    ring
}

/// Factors that scale two samples by their total expression relative to the
/// larger total. Both factors are 0 when neither sample is expressed.
pub fn scale_factors(total_a: f64, total_b: f64) -> (f64, f64) {
    let largest = total_a.max(total_b);
    if largest <= 0.0 {
        (0.0, 0.0)
    } else {
        (total_a / largest, total_b / largest)
    }
}

pub fn scale(values: &[f64], factor: f64) -> Vec<f64> {
    values.iter().map(|v| v * factor).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub kept: Vec<usize>,
    pub unscaled: (Vec<f64>, Vec<f64>),
    pub scaled: (Vec<f64>, Vec<f64>),
    pub unscaled_rmsd: f64,
    pub scaled_rmsd: f64,
}

/// Unscaled and scaled RMSD between two samples of one gene.
pub fn compare_samples(
    movement_a: &[f64],
    expression_a: &[f64],
    total_a: f64,
    movement_b: &[f64],
    expression_b: &[f64],
    total_b: f64,
) -> Comparison {
    let kept = expressed_positions(&[expression_a, expression_b]);
    let a = select(movement_a, &kept);
    let b = select(movement_b, &kept);
    let (factor_a, factor_b) = scale_factors(total_a, total_b);
    let scaled_a = scale(&a, factor_a);
    let scaled_b = scale(&b, factor_b);
    Comparison {
        unscaled_rmsd: rmsd(&a, &b),
        scaled_rmsd: rmsd(&scaled_a, &scaled_b),
        kept,
        unscaled: (a, b),
        scaled: (scaled_a, scaled_b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[&[f64]]) -> FasMatrix {
        let mut fas = FasMatrix::new(rows.len());
        for (i, row) in rows.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                fas.set(i, j, *value);
            }
        }
        fas
    }

    #[test]
    fn movement_of_single_expressed_isoform() {
        let fas = matrix(&[&[1.0, 0.2, 0.1], &[0.2, 1.0, 0.3], &[0.1, 0.3, 1.0]]);
        let movement = compute_movement(&fas, &[1.0, 0.0, 0.0], &[0, 1, 2]);
        assert_eq!(movement, vec![0.0, 0.8, 0.9]);
    }

    #[test]
    fn unexpressed_gene_moves_fully() {
        let fas = matrix(&[&[1.0, 0.5], &[0.5, 1.0]]);
        let movement = compute_movement(&fas, &[0.0, 0.0], &[0, 1]);
        assert_eq!(movement, vec![UNEXPRESSED_MOVEMENT; 2]);
    }

    #[test]
    fn unscored_entries_count_as_dissimilar() {
        let mut fas = FasMatrix::new(2);
        fas.set(0, 0, 1.0);
        fas.set(1, 1, 1.0);
        let movement = compute_movement(&fas, &[0.5, 0.5], &[0, 1]);
        assert_eq!(movement, vec![0.5, 0.5]);
    }

    #[test]
    fn rmsd_examples() {
        assert_eq!(rmsd(&[0.2, 0.4], &[0.2, 0.4]), 0.0);
        assert_eq!(rmsd(&[0.0, 1.0], &[1.0, 0.0]), 1.0);
        assert_eq!(rmsd(&[], &[]), 0.0);
    }

    #[test]
    fn ring_over_three_replicates() {
        let movements = vec![vec![0.1, 0.9], vec![0.3, 0.7], vec![0.2, 0.8]];
        let expressions = vec![vec![0.5, 0.5]; 3];
        let ring = aggregate_ring(&movements, &expressions);
        assert_eq!(ring.mean, vec![0.2, 0.8]);
        assert_eq!(ring.min, vec![0.1, 0.7]);
        assert_eq!(ring.max, vec![0.3, 0.9]);
        assert!(ring.mean_plus_std[0] > ring.mean[0]);
        assert!(ring.mean_minus_std[1] < ring.mean[1]);
    }

    #[test]
    fn ring_drops_silent_transcripts() {
        let movements = vec![vec![0.1, 1.0, 0.4], vec![0.3, 1.0, 0.6]];
        let expressions = vec![vec![0.6, 0.0, 0.4], vec![0.2, 0.0, 0.8]];
        let ring = aggregate_ring(&movements, &expressions);
        assert_eq!(ring.kept, vec![0, 2]);
        assert_eq!(ring.mean, vec![0.2, 0.5]);
    }

    #[test]
    fn scaling_uses_larger_total() {
        assert_eq!(scale_factors(10.0, 40.0), (0.25, 1.0));
        assert_eq!(scale_factors(0.0, 0.0), (0.0, 0.0));

        let cmp = compare_samples(&[0.0, 1.0], &[1.0, 0.0], 10.0, &[1.0, 0.0], &[0.0, 1.0], 40.0);
        assert_eq!(cmp.unscaled_rmsd, 1.0);
        assert_eq!(cmp.scaled.0, vec![0.0, 0.25]);
        assert!(cmp.scaled_rmsd < cmp.unscaled_rmsd);
    }
}
