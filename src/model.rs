//! In-memory entity model of one species' annotated transcriptome.
//!
//! A [`Gene`] owns its transcripts as a dense array; its [`FasMatrix`] is
//! addressed by the same slot indices, so removing a transcript removes the
//! matching row and column in one place.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::Strand;

/// Sentinel for a FAS entry that has not been scored yet.
pub const UNSCORED: f64 = -1.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exon {
    pub id: String,
    pub start: u64,
    pub end: u64,
    pub frame: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptKind {
    Protein { protein_id: String, sequence: String },
    NonCoding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    pub gene_id: String,
    pub taxon_id: u32,
    pub biotype: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub support_level: Option<u8>,
    pub chromosome: String,
    pub strand: Strand,
    pub start: u64,
    pub end: u64,
    #[serde(default)]
    pub exons: Vec<Exon>,
    pub kind: TranscriptKind,
}

impl Transcript {
    pub fn new(id: impl Into<String>, gene_id: impl Into<String>, taxon_id: u32) -> Self {
        Self {
            id: id.into(),
            gene_id: gene_id.into(),
            taxon_id,
            biotype: String::new(),
            tags: BTreeSet::new(),
            support_level: None,
            chromosome: String::new(),
            strand: Strand::Unknown,
            start: 0,
            end: 0,
            exons: Vec::new(),
            kind: TranscriptKind::NonCoding,
        }
    }

    pub fn protein_id(&self) -> Option<&str> {
        match &self.kind {
            TranscriptKind::Protein { protein_id, .. } => Some(protein_id),
            TranscriptKind::NonCoding => None,
        }
    }

    pub fn sequence(&self) -> Option<&str> {
        match &self.kind {
            TranscriptKind::Protein { sequence, .. } => Some(sequence),
            TranscriptKind::NonCoding => None,
        }
    }

    pub fn is_protein(&self) -> bool {
        matches!(self.kind, TranscriptKind::Protein { .. })
    }

    /// Residue count; zero for non-coding transcripts and uncollected sequences.
    pub fn protein_len(&self) -> usize {
        self.sequence().map(str::len).unwrap_or(0)
    }

    pub fn has_sequence(&self) -> bool {
        self.protein_len() > 0
    }

    pub fn is_missing_sequence(&self) -> bool {
        self.is_protein() && !self.has_sequence()
    }

    /// Identifier the entry is tracked under downstream: the protein id when
    /// one was annotated, the transcript id otherwise.
    pub fn library_id(&self) -> &str {
        self.protein_id().unwrap_or(&self.id)
    }

    /// Promotes the transcript to a protein once a CDS with a protein id is seen.
    pub fn attach_protein(&mut self, protein_id: impl Into<String>) {
        if let TranscriptKind::NonCoding = self.kind {
            self.kind = TranscriptKind::Protein {
                protein_id: protein_id.into(),
                sequence: String::new(),
            };
        }
    }

    pub fn set_sequence(&mut self, value: impl Into<String>) -> bool {
        match &mut self.kind {
            TranscriptKind::Protein { sequence, .. } => {
                *sequence = value.into();
                true
            }
            TranscriptKind::NonCoding => false,
        }
    }
}

/// Dense symmetric similarity matrix over a gene's transcript slots.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FasMatrix {
    size: usize,
    values: Vec<f64>,
}

impl FasMatrix {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            values: vec![UNSCORED; size * size],
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.size + col]
    }

    /// Writes both `(row, col)` and `(col, row)`.
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.values[row * self.size + col] = value;
        self.values[col * self.size + row] = value;
    }

    pub fn is_scored(&self, row: usize, col: usize) -> bool {
        self.get(row, col) != UNSCORED
    }

    /// Score as a similarity in [0, 1]; unscored entries read as 0.
    pub fn similarity(&self, row: usize, col: usize) -> f64 {
        let value = self.get(row, col);
        if value == UNSCORED { 0.0 } else { value }
    }

    pub fn push_slot(&mut self) -> usize {
        let new_size = self.size + 1;
        let mut values = vec![UNSCORED; new_size * new_size];
        for row in 0..self.size {
            let src = &self.values[row * self.size..(row + 1) * self.size];
            values[row * new_size..row * new_size + self.size].copy_from_slice(src);
        }
        self.size = new_size;
        self.values = values;
        new_size - 1
    }

    pub fn remove_slot(&mut self, slot: usize) {
        let new_size = self.size - 1;
        let mut values = Vec::with_capacity(new_size * new_size);
        for row in (0..self.size).filter(|row| *row != slot) {
            for col in (0..self.size).filter(|col| *col != slot) {
                values.push(self.get(row, col));
            }
        }
        self.size = new_size;
        self.values = values;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gene {
    pub id: String,
    pub taxon_id: u32,
    pub species: String,
    transcripts: Vec<Transcript>,
    fas: FasMatrix,
}

impl Gene {
    pub fn new(id: impl Into<String>, taxon_id: u32, species: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            taxon_id,
            species: species.into(),
            transcripts: Vec::new(),
            fas: FasMatrix::default(),
        }
    }

    pub fn transcripts(&self) -> &[Transcript] {
        &self.transcripts
    }

    pub fn fas(&self) -> &FasMatrix {
        &self.fas
    }

    pub fn is_empty(&self) -> bool {
        self.transcripts.is_empty()
    }

    pub fn position(&self, transcript_id: &str) -> Option<usize> {
        self.transcripts.iter().position(|t| t.id == transcript_id)
    }

    /// Finds a slot by transcript id or protein id.
    pub fn position_by_any_id(&self, id: &str) -> Option<usize> {
        self.transcripts
            .iter()
            .position(|t| t.id == id || t.protein_id() == Some(id))
    }

    pub fn transcript(&self, transcript_id: &str) -> Option<&Transcript> {
        self.position(transcript_id).map(|slot| &self.transcripts[slot])
    }

    pub fn transcript_mut(&mut self, transcript_id: &str) -> Option<&mut Transcript> {
        let slot = self.position(transcript_id)?;
        Some(&mut self.transcripts[slot])
    }

    /// Adds a transcript, or returns the existing slot for a repeated id.
    pub fn add_transcript(&mut self, transcript: Transcript) -> usize {
        if let Some(slot) = self.position(&transcript.id) {
            return slot;
        }
        self.transcripts.push(transcript);
        self.fas.push_slot()
    }

    /// Removes the transcript together with its FAS row and column.
    pub fn delete_transcript(&mut self, id: &str) -> Option<Transcript> {
        let slot = self.position_by_any_id(id)?;
        self.fas.remove_slot(slot);
        Some(self.transcripts.remove(slot))
    }

    pub fn set_sequence(&mut self, id: &str, sequence: &str) -> bool {
        match self.position_by_any_id(id) {
            Some(slot) => self.transcripts[slot].set_sequence(sequence),
            None => false,
        }
    }

    pub fn proteins(&self) -> impl Iterator<Item = &Transcript> {
        self.transcripts.iter().filter(|t| t.is_protein())
    }

    pub fn incomplete_proteins(&self) -> impl Iterator<Item = &Transcript> {
        self.transcripts.iter().filter(|t| t.is_missing_sequence())
    }

    pub fn has_incomplete_sequence(&self) -> bool {
        self.transcripts.iter().any(Transcript::is_missing_sequence)
    }

    /// True if a sequenced transcript still has an unscored diagonal entry.
    pub fn has_unscored_diagonal(&self) -> bool {
        self.transcripts
            .iter()
            .enumerate()
            .any(|(slot, t)| t.has_sequence() && !self.fas.is_scored(slot, slot))
    }

    /// Self-similarity is 1.0 by definition; no external scorer is needed.
    pub fn calculate_implicit_fas_scores(&mut self) {
        for slot in 0..self.transcripts.len() {
            if self.transcripts[slot].has_sequence() {
                self.fas.set(slot, slot, 1.0);
            }
        }
    }

    pub fn fas_score(&self, a: &str, b: &str) -> Option<f64> {
        let row = self.position(a)?;
        let col = self.position(b)?;
        Some(self.fas.get(row, col))
    }

    pub fn set_fas_score(&mut self, a: &str, b: &str, value: f64) -> bool {
        match (self.position(a), self.position(b)) {
            (Some(row), Some(col)) => {
                self.fas.set(row, col, value);
                true
            }
            _ => false,
        }
    }

    /// Unordered pairs of sequenced proteins that still lack a FAS score.
    pub fn pairings(&self) -> Vec<(String, String)> {
        let sequenced = self.sequenced_slots();
        let mut pairs = Vec::new();
        for (i, &row) in sequenced.iter().enumerate() {
            for &col in &sequenced[i + 1..] {
                if !self.fas.is_scored(row, col) {
                    pairs.push((
                        self.transcripts[row].id.clone(),
                        self.transcripts[col].id.clone(),
                    ));
                }
            }
        }
        pairs
    }

    /// Proteins whose row is scored against every sequenced protein, itself included.
    pub fn fas_scored_count(&self) -> usize {
        let sequenced = self.sequenced_slots();
        sequenced
            .iter()
            .filter(|&&row| sequenced.iter().all(|&col| self.fas.is_scored(row, col)))
            .count()
    }

    /// FASTA records for every protein of the gene, one line per sequence.
    pub fn fasta(&self) -> Vec<String> {
        self.proteins()
            .filter_map(|t| {
                let protein_id = t.protein_id()?;
                Some(format!(
                    ">{}|{}|{}\n{}",
                    self.id,
                    t.id,
                    protein_id,
                    t.sequence().unwrap_or("")
                ))
            })
            .collect()
    }

    /// Nested `transcript -> transcript -> score` view used by the FAS store.
    pub fn fas_map(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        let mut map = BTreeMap::new();
        for (row, a) in self.transcripts.iter().enumerate() {
            let inner: BTreeMap<String, f64> = self
                .transcripts
                .iter()
                .enumerate()
                .map(|(col, b)| (b.id.clone(), self.fas.get(row, col)))
                .collect();
            map.insert(a.id.clone(), inner);
        }
        map
    }

    /// Applies stored scores; pairs naming unknown transcripts are ignored.
    pub fn apply_fas_map(&mut self, map: &BTreeMap<String, BTreeMap<String, f64>>) {
        for (a, inner) in map {
            for (b, value) in inner {
                self.set_fas_score(a, b, *value);
            }
        }
    }

    fn sequenced_slots(&self) -> Vec<usize> {
        self.transcripts
            .iter()
            .enumerate()
            .filter(|(_, t)| t.has_sequence())
            .map(|(slot, _)| slot)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protein(id: &str, protein_id: &str, sequence: &str) -> Transcript {
        let mut t = Transcript::new(id, "G1", 9606);
        t.biotype = "protein_coding".to_string();
        t.attach_protein(protein_id);
        t.set_sequence(sequence);
        t
    }

    #[test]
    fn matrix_grows_and_shrinks_by_slot() {
        let mut m = FasMatrix::new(2);
        m.set(0, 1, 0.4);
        let slot = m.push_slot();
        assert_eq!(slot, 2);
        assert_eq!(m.get(1, 0), 0.4);
        assert_eq!(m.get(2, 2), UNSCORED);
        m.set(2, 1, 0.7);
        m.remove_slot(0);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(0, 1), 0.7);
        assert_eq!(m.get(1, 0), 0.7);
    }

    #[test]
    fn deleting_transcript_drops_row_and_column() {
        let mut gene = Gene::new("G1", 9606, "homo_sapiens");
        gene.add_transcript(protein("T1", "P1", "MAAAAAAAAAAA"));
        gene.add_transcript(protein("T2", "P2", "MCCCCCCCCCCC"));
        gene.add_transcript(protein("T3", "P3", "MDDDDDDDDDDD"));
        gene.set_fas_score("T1", "T3", 0.25);
        gene.set_fas_score("T2", "T3", 0.5);

        let removed = gene.delete_transcript("P2").unwrap();
        assert_eq!(removed.id, "T2");
        assert_eq!(gene.fas().len(), 2);
        assert_eq!(gene.fas_score("T1", "T3"), Some(0.25));
        assert_eq!(gene.fas_score("T3", "T1"), Some(0.25));
        assert!(gene.fas_score("T2", "T3").is_none());
    }

    #[test]
    fn implicit_scoring_skips_unsequenced() {
        let mut gene = Gene::new("G1", 9606, "homo_sapiens");
        gene.add_transcript(protein("T1", "P1", "MAAAAAAAAAAA"));
        gene.add_transcript(protein("T2", "P2", ""));
        assert!(gene.has_unscored_diagonal());
        gene.calculate_implicit_fas_scores();
        assert!(!gene.has_unscored_diagonal());
        assert_eq!(gene.fas_score("T1", "T1"), Some(1.0));
        assert_eq!(gene.fas_score("T2", "T2"), Some(UNSCORED));
    }

    #[test]
    fn pairings_and_scored_count() {
        let mut gene = Gene::new("G1", 9606, "homo_sapiens");
        gene.add_transcript(protein("T1", "P1", "MAAAAAAAAAAA"));
        gene.add_transcript(protein("T2", "P2", "MCCCCCCCCCCC"));
        gene.add_transcript(protein("T3", "P3", "MDDDDDDDDDDD"));
        gene.calculate_implicit_fas_scores();
        gene.set_fas_score("T1", "T2", 0.9);
        assert_eq!(
            gene.pairings(),
            vec![
                ("T1".to_string(), "T3".to_string()),
                ("T2".to_string(), "T3".to_string())
            ]
        );
        assert_eq!(gene.fas_scored_count(), 0);
        gene.set_fas_score("T1", "T3", 0.1);
        gene.set_fas_score("T2", "T3", 0.2);
        assert_eq!(gene.fas_scored_count(), 3);
        assert!(gene.pairings().is_empty());
    }

    #[test]
    fn fasta_lists_proteins_only() {
        let mut gene = Gene::new("G1", 9606, "homo_sapiens");
        gene.add_transcript(protein("T1", "P1", "MAAA"));
        gene.add_transcript(Transcript::new("T9", "G1", 9606));
        assert_eq!(gene.fasta(), vec![">G1|T1|P1\nMAAA".to_string()]);
    }
}
