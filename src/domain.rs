use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::SpiceError;

pub const HUMAN_TAXON_ID: u32 = 9606;

/// Ordered construction stages of a library. Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "01_id_collection")]
    IdCollection,
    #[serde(rename = "02_sequence_collection")]
    SequenceCollection,
    #[serde(rename = "03_small_protein_removing")]
    SmallProteinRemoval,
    #[serde(rename = "04_incorrect_entry_removing")]
    IncorrectEntryRemoval,
    #[serde(rename = "05_implicit_fas_scoring")]
    ImplicitFasScoring,
    #[serde(rename = "06_fasta_generation")]
    FastaGeneration,
    #[serde(rename = "07_pairing_generation")]
    PairingGeneration,
    #[serde(rename = "08_id_tsv_generation")]
    IdTsvGeneration,
    #[serde(rename = "09_sequence_annotation")]
    SequenceAnnotation,
    #[serde(rename = "10_fas_scoring")]
    FasScoring,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::IdCollection,
        Stage::SequenceCollection,
        Stage::SmallProteinRemoval,
        Stage::IncorrectEntryRemoval,
        Stage::ImplicitFasScoring,
        Stage::FastaGeneration,
        Stage::PairingGeneration,
        Stage::IdTsvGeneration,
        Stage::SequenceAnnotation,
        Stage::FasScoring,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::IdCollection => "id_collection",
            Stage::SequenceCollection => "sequence_collection",
            Stage::SmallProteinRemoval => "small_protein_removal",
            Stage::IncorrectEntryRemoval => "incorrect_entry_removal",
            Stage::ImplicitFasScoring => "implicit_fas_scoring",
            Stage::FastaGeneration => "fasta_generation",
            Stage::PairingGeneration => "pairing_generation",
            Stage::IdTsvGeneration => "id_tsv_generation",
            Stage::SequenceAnnotation => "sequence_annotation",
            Stage::FasScoring => "fas_scoring",
        }
    }

    /// Stages 9 and 10 are carried out by external tools.
    pub fn is_external(self) -> bool {
        matches!(self, Stage::SequenceAnnotation | Stage::FasScoring)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02} {}", self.index() + 1, self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Strand {
    #[serde(rename = "+")]
    Forward,
    #[serde(rename = "-")]
    Reverse,
    #[default]
    #[serde(rename = ".")]
    Unknown,
}

impl FromStr for Strand {
    type Err = SpiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            "." | "?" => Ok(Strand::Unknown),
            other => Err(SpiceError::Format(format!("invalid strand: {other}"))),
        }
    }
}

/// Expression unit read from an expression GTF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Normalization {
    #[serde(rename = "TPM")]
    #[value(name = "TPM", alias = "tpm")]
    Tpm,
    #[serde(rename = "FPKM")]
    #[value(name = "FPKM", alias = "fpkm")]
    Fpkm,
}

impl Normalization {
    pub fn attribute(self) -> &'static str {
        match self {
            Normalization::Tpm => "TPM",
            Normalization::Fpkm => "FPKM",
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.attribute())
    }
}

/// Drops an Ensembl version suffix: `ENST00000380152.8` -> `ENST00000380152`.
pub fn strip_version(id: &str) -> &str {
    match id.split_once('.') {
        Some((stem, _)) => stem,
        None => id,
    }
}

/// Offset of the feature-type character in an Ensembl stable id.
/// Human ids carry no species infix (`ENST...`), others do (`ENSMUST...`).
pub fn feature_char_offset(taxon_id: u32) -> usize {
    if taxon_id == HUMAN_TAXON_ID { 3 } else { 6 }
}

/// True when `id` is shaped like a transcript id (`T` at the species offset).
/// Protein-coding entries are expected to carry a protein id instead.
pub fn is_transcript_shaped(id: &str, taxon_id: u32) -> bool {
    id.as_bytes().get(feature_char_offset(taxon_id)) == Some(&b'T')
}

/// A sample name used for result files; must be usable as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleName(String);

impl SampleName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleName {
    type Err = SpiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
        if !is_valid || trimmed.starts_with('.') {
            return Err(SpiceError::InvalidArgument(format!(
                "invalid sample name: {value}"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn strips_version_suffix() {
        assert_eq!(strip_version("ENSG00000139618.17"), "ENSG00000139618");
        assert_eq!(strip_version("ENSP00000369497"), "ENSP00000369497");
    }

    #[test]
    fn transcript_shape_depends_on_taxon() {
        assert!(is_transcript_shaped("ENST00000380152", HUMAN_TAXON_ID));
        assert!(!is_transcript_shaped("ENSP00000369497", HUMAN_TAXON_ID));
        assert!(is_transcript_shaped("ENSMUST00000000001", 10090));
        assert!(!is_transcript_shaped("ENSMUSP00000000001", 10090));
        assert!(!is_transcript_shaped("ENS", 10090));
    }

    #[test]
    fn stage_order_and_names() {
        assert_eq!(Stage::ALL.len(), 10);
        assert!(Stage::IdCollection < Stage::FasScoring);
        assert_eq!(Stage::FastaGeneration.index(), 5);
        assert_eq!(Stage::PairingGeneration.to_string(), "#07 pairing_generation");
        let json = serde_json::to_string(&Stage::SequenceCollection).unwrap();
        assert_eq!(json, "\"02_sequence_collection\"");
    }

    #[test]
    fn sample_name_rejects_paths() {
        assert!("liver_rep1".parse::<SampleName>().is_ok());
        let err = "../etc".parse::<SampleName>().unwrap_err();
        assert_matches!(err, SpiceError::InvalidArgument(_));
    }
}
