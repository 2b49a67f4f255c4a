use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::annotation::{AnnotationDecoder, AnnotationSource};
use crate::assembler::GeneAssembler;
use crate::domain::{Normalization, strip_version};
use crate::error::SpiceError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneExpression {
    pub total: f64,
    pub absolute: BTreeMap<String, f64>,
    /// Fractions summing to 1, or all 0 when `total` is 0.
    pub relative: BTreeMap<String, f64>,
}

impl GeneExpression {
    pub fn from_absolute(absolute: BTreeMap<String, f64>) -> Self {
        let total: f64 = absolute.values().sum();
        let relative = absolute
            .iter()
            .map(|(id, value)| {
                let share = if total > 0.0 { value / total } else { 0.0 };
                (id.clone(), share)
            })
            .collect();
        Self {
            total,
            absolute,
            relative,
        }
    }

    pub fn relative_of(&self, transcript_id: &str) -> f64 {
        self.relative.get(transcript_id).copied().unwrap_or(0.0)
    }
}

/// Expression of one sample: a single replicate or a condition built from replicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionAssembly {
    pub name: String,
    pub normalization: Normalization,
    #[serde(default)]
    pub replicates: Vec<String>,
    pub genes: BTreeMap<String, GeneExpression>,
}

impl ExpressionAssembly {
    /// Reads a StringTie-style expression GTF. Transcript records carrying
    /// `reference_id` and `ref_gene_id` contribute their `TPM`/`FPKM` value;
    /// values below `threshold` count as 0.
    pub fn from_gtf<D: AnnotationDecoder>(
        name: &str,
        source: AnnotationSource,
        decoder: &D,
        library: &GeneAssembler,
        normalization: Normalization,
        threshold: f64,
    ) -> Result<Self, SpiceError> {
        let mut measured: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        let mut ignored = 0usize;
        for line in source.lines() {
            let line = line?;
            let Some(fields) = decoder.decode(&line)? else {
                continue;
            };
            if fields.get("feature").map(String::as_str) != Some("transcript") {
                continue;
            }
            let (Some(reference), Some(gene)) = (fields.get("reference_id"), fields.get("ref_gene_id"))
            else {
                continue;
            };
            let transcript_id = strip_version(reference);
            let gene_id = strip_version(gene);
            let known = library
                .gene(gene_id)
                .and_then(|g| g.transcript(transcript_id))
                .map(|t| t.is_protein())
                .unwrap_or(false);
            if !known {
                ignored += 1;
                continue;
            }
            let raw = fields
                .get(normalization.attribute())
                .ok_or_else(|| {
                    SpiceError::Format(format!(
                        "transcript {transcript_id} has no {normalization} attribute"
                    ))
                })?
                .parse::<f64>()
                .map_err(|err| SpiceError::Format(format!("{normalization} value: {err}")))?;
            let value = if raw < threshold { 0.0 } else { raw };
            *measured
                .entry(gene_id.to_string())
                .or_default()
                .entry(transcript_id.to_string())
                .or_insert(0.0) += value;
        }
        debug!(ignored, "expression records outside the library skipped");

        let genes = library
            .get_genes(false, false)
            .into_iter()
            .map(|gene| {
                let values = measured.get(&gene.id);
                let absolute = gene
                    .proteins()
                    .map(|t| {
                        let value = values.and_then(|v| v.get(&t.id)).copied().unwrap_or(0.0);
                        (t.id.clone(), value)
                    })
                    .collect();
                (gene.id.clone(), GeneExpression::from_absolute(absolute))
            })
            .collect::<BTreeMap<_, _>>();

        info!(sample = name, genes = genes.len(), "expression imported");
        Ok(Self {
            name: name.to_string(),
            normalization,
            replicates: Vec::new(),
            genes,
        })
    }

    /// Averages absolute expression of at least two replicates, then renormalizes.
    pub fn condition(name: &str, replicates: &[ExpressionAssembly]) -> Result<Self, SpiceError> {
        if replicates.len() < 2 {
            return Err(SpiceError::InvalidArgument(format!(
                "condition {name} needs at least two replicates, got {}",
                replicates.len()
            )));
        }
        let normalization = replicates[0].normalization;
        if let Some(other) = replicates.iter().find(|r| r.normalization != normalization) {
            return Err(SpiceError::InvalidArgument(format!(
                "replicate {} uses {} while {} uses {normalization}",
                other.name, other.normalization, replicates[0].name
            )));
        }

        let count = replicates.len() as f64;
        let mut sums: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        for replicate in replicates {
            for (gene_id, gene) in &replicate.genes {
                let entry = sums.entry(gene_id.clone()).or_default();
                for (transcript_id, value) in &gene.absolute {
                    *entry.entry(transcript_id.clone()).or_insert(0.0) += value;
                }
            }
        }
        let genes = sums
            .into_iter()
            .map(|(gene_id, values)| {
                let mean = values
                    .into_iter()
                    .map(|(id, sum)| (id, sum / count))
                    .collect();
                (gene_id, GeneExpression::from_absolute(mean))
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            normalization,
            replicates: replicates.iter().map(|r| r.name.clone()).collect(),
            genes,
        })
    }

    pub fn is_condition(&self) -> bool {
        !self.replicates.is_empty()
    }

    pub fn gene(&self, gene_id: &str) -> Option<&GeneExpression> {
        self.genes.get(gene_id)
    }
}
