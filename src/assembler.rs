use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::annotation::{AnnotationDecoder, AnnotationSource, FieldMap, InclusionFilter};
use crate::domain::{Strand, is_transcript_shaped, strip_version};
use crate::error::SpiceError;
use crate::model::{Exon, Gene, Transcript, TranscriptKind};
use crate::status::LibraryCounters;
use crate::store::{LibraryPaths, read_json, write_json_atomic};

type InfoShard = BTreeMap<String, GeneRecord>;
type SequenceShard = BTreeMap<String, BTreeMap<String, String>>;
type FasShard = BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeneRecord {
    taxon_id: u32,
    species: String,
    transcripts: Vec<Transcript>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub records: usize,
    pub skipped: usize,
}

/// Owns every gene of one species' library.
#[derive(Debug, Clone)]
pub struct GeneAssembler {
    species: String,
    taxon_id: u32,
    genes: BTreeMap<String, Gene>,
    filter: InclusionFilter,
}

impl GeneAssembler {
    pub fn new(species: impl Into<String>, taxon_id: u32) -> Self {
        Self {
            species: species.into(),
            taxon_id,
            genes: BTreeMap::new(),
            filter: InclusionFilter::new(),
        }
    }

    pub fn set_inclusion_filter(&mut self, filter: InclusionFilter) {
        self.filter = filter;
    }

    pub fn insert_gene(&mut self, gene: Gene) {
        self.genes.insert(gene.id.clone(), gene);
    }

    /// Streams annotation records into the gene/transcript/exon graph.
    pub fn extract<D: AnnotationDecoder>(
        &mut self,
        source: AnnotationSource,
        decoder: &D,
    ) -> Result<ExtractSummary, SpiceError> {
        let mut summary = ExtractSummary::default();
        for line in source.lines() {
            let line = line?;
            let Some(fields) = decoder.decode(&line)? else {
                continue;
            };
            if !self.filter.accepts(&fields) {
                summary.skipped += 1;
                continue;
            }
            self.apply_record(&fields)?;
            summary.records += 1;
        }
        info!(
            genes = self.genes.len(),
            records = summary.records,
            skipped = summary.skipped,
            "annotation extracted"
        );
        Ok(summary)
    }

    fn apply_record(&mut self, fields: &FieldMap) -> Result<(), SpiceError> {
        let feature = required(fields, "feature")?;
        if !matches!(feature, "gene" | "transcript" | "exon" | "CDS") {
            return Ok(());
        }
        let gene_id = strip_version(required(fields, "gene_id")?).to_string();
        let (taxon_id, species) = (self.taxon_id, self.species.clone());
        let gene = self
            .genes
            .entry(gene_id.clone())
            .or_insert_with(|| Gene::new(gene_id.clone(), taxon_id, species));
        if feature == "gene" {
            return Ok(());
        }

        let transcript_id = strip_version(required(fields, "transcript_id")?).to_string();
        if gene.position(&transcript_id).is_none() {
            gene.add_transcript(Transcript::new(&transcript_id, &gene_id, taxon_id));
        }
        let Some(transcript) = gene.transcript_mut(&transcript_id) else {
            return Ok(());
        };
        let start = coordinate(fields, "start")?;
        let end = coordinate(fields, "end")?;

        match feature {
            "transcript" => {
                transcript.biotype = fields
                    .get("transcript_biotype")
                    .or_else(|| fields.get("transcript_type"))
                    .cloned()
                    .unwrap_or_default();
                transcript.chromosome = required(fields, "seqname")?.to_string();
                transcript.strand = required(fields, "strand")?.parse::<Strand>()?;
                transcript.start = start;
                transcript.end = end;
                if let Some(tags) = fields.get("tag") {
                    transcript.tags = tags.split(',').map(str::to_string).collect();
                }
                transcript.support_level = fields
                    .get("transcript_support_level")
                    .and_then(|value| value.split_whitespace().next())
                    .and_then(|value| value.parse().ok());
            }
            "exon" => {
                let id = fields
                    .get("exon_id")
                    .map(|value| strip_version(value).to_string())
                    .unwrap_or_else(|| format!("{transcript_id}:{start}-{end}"));
                if !transcript.exons.iter().any(|exon| exon.id == id) {
                    transcript.exons.push(Exon {
                        id,
                        start,
                        end,
                        frame: None,
                    });
                }
            }
            _ => {
                if let Some(protein_id) = fields.get("protein_id") {
                    transcript.attach_protein(strip_version(protein_id));
                }
                let frame = fields.get("frame").and_then(|value| value.parse::<u8>().ok());
                if let Some(exon) = transcript
                    .exons
                    .iter_mut()
                    .find(|exon| exon.start <= start && end <= exon.end)
                {
                    exon.frame = frame;
                }
            }
        }
        Ok(())
    }

    pub fn load(&mut self, paths: &LibraryPaths) -> Result<(), SpiceError> {
        let info: InfoShard = read_json(&paths.transcript_info()?)?;
        let sequences: SequenceShard = read_optional(&paths.transcript_seq()?)?;
        let scores: FasShard = read_optional(&paths.fas_scores()?)?;

        self.genes.clear();
        for (gene_id, record) in info {
            let mut gene = Gene::new(gene_id.clone(), record.taxon_id, record.species);
            for transcript in record.transcripts {
                gene.add_transcript(transcript);
            }
            if let Some(seqs) = sequences.get(&gene_id) {
                for (transcript_id, sequence) in seqs {
                    gene.set_sequence(transcript_id, sequence);
                }
            }
            if let Some(matrix) = scores.get(&gene_id) {
                gene.apply_fas_map(matrix);
            }
            self.genes.insert(gene_id, gene);
        }
        debug!(genes = self.genes.len(), "library store loaded");
        Ok(())
    }

    pub fn save_info(&self, paths: &LibraryPaths) -> Result<(), SpiceError> {
        let shard: InfoShard = self
            .genes
            .iter()
            .map(|(id, gene)| {
                let transcripts = gene
                    .transcripts()
                    .iter()
                    .cloned()
                    .map(|mut t| {
                        // Sequences live in their own shard.
                        t.set_sequence("");
                        t
                    })
                    .collect();
                let record = GeneRecord {
                    taxon_id: gene.taxon_id,
                    species: gene.species.clone(),
                    transcripts,
                };
                (id.clone(), record)
            })
            .collect();
        write_json_atomic(&paths.transcript_info()?, &shard)
    }

    pub fn save_seq(&self, paths: &LibraryPaths) -> Result<(), SpiceError> {
        let shard: SequenceShard = self
            .genes
            .iter()
            .map(|(id, gene)| {
                let seqs = gene
                    .proteins()
                    .filter_map(|t| match &t.kind {
                        TranscriptKind::Protein { sequence, .. } => {
                            Some((t.id.clone(), sequence.clone()))
                        }
                        TranscriptKind::NonCoding => None,
                    })
                    .collect();
                (id.clone(), seqs)
            })
            .collect();
        write_json_atomic(&paths.transcript_seq()?, &shard)
    }

    pub fn save_fas(&self, paths: &LibraryPaths) -> Result<(), SpiceError> {
        let shard: FasShard = self
            .genes
            .iter()
            .map(|(id, gene)| (id.clone(), gene.fas_map()))
            .collect();
        write_json_atomic(&paths.fas_scores()?, &shard)
    }

    pub fn save_all(&self, paths: &LibraryPaths) -> Result<(), SpiceError> {
        self.save_info(paths)?;
        self.save_seq(paths)?;
        self.save_fas(paths)
    }

    /// Genes filtered by "has a protein without sequence" and/or
    /// "has a sequenced transcript with an unscored diagonal".
    pub fn get_genes(&self, incomplete_sequence_only: bool, fas_incomplete_only: bool) -> Vec<&Gene> {
        self.genes
            .values()
            .filter(|gene| !incomplete_sequence_only || gene.has_incomplete_sequence())
            .filter(|gene| !fas_incomplete_only || gene.has_unscored_diagonal())
            .collect()
    }

    pub fn gene_ids(&self, incomplete_sequence_only: bool, fas_incomplete_only: bool) -> Vec<String> {
        self.get_genes(incomplete_sequence_only, fas_incomplete_only)
            .into_iter()
            .map(|gene| gene.id.clone())
            .collect()
    }

    pub fn gene(&self, gene_id: &str) -> Option<&Gene> {
        self.genes.get(gene_id)
    }

    pub fn gene_mut(&mut self, gene_id: &str) -> Option<&mut Gene> {
        self.genes.get_mut(gene_id)
    }

    pub fn transcripts(&self) -> impl Iterator<Item = &Transcript> {
        self.genes.values().flat_map(|gene| gene.transcripts().iter())
    }

    pub fn delete_transcript(&mut self, gene_id: &str, id: &str) -> Option<Transcript> {
        self.genes.get_mut(gene_id)?.delete_transcript(id)
    }

    /// Removes genes left without transcripts; returns how many went.
    pub fn clear_empty_genes(&mut self) -> usize {
        let before = self.genes.len();
        self.genes.retain(|_, gene| !gene.is_empty());
        before - self.genes.len()
    }

    /// Removes every transcript matching `predicate`; returns the removal count.
    pub fn remove_transcripts_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&Transcript) -> bool,
    {
        let mut removed = 0;
        for gene in self.genes.values_mut() {
            let doomed = gene
                .transcripts()
                .iter()
                .filter(|&t| predicate(t))
                .map(|t| t.id.clone())
                .collect::<Vec<_>>();
            for id in doomed {
                if gene.delete_transcript(&id).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn is_small_protein(transcript: &Transcript, min_length: usize) -> bool {
        transcript.has_sequence() && transcript.protein_len() < min_length
    }

    /// A protein-coding entry tracked under a transcript-shaped id never got a protein id.
    pub fn is_incorrect_entry(transcript: &Transcript) -> bool {
        transcript.biotype == "protein_coding"
            && is_transcript_shaped(transcript.library_id(), transcript.taxon_id)
    }

    pub fn calculate_implicit_fas_scores(&mut self) {
        for gene in self.genes.values_mut() {
            gene.calculate_implicit_fas_scores();
        }
    }

    pub fn fasta(&self) -> String {
        self.genes
            .values()
            .flat_map(|gene| gene.fasta())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn pairings(&self) -> BTreeMap<String, Vec<(String, String)>> {
        self.genes
            .values()
            .map(|gene| (gene.id.clone(), gene.pairings()))
            .filter(|(_, pairs)| !pairs.is_empty())
            .collect()
    }

    /// Flat identifier table consumed by downstream annotation tooling.
    pub fn id_table(&self) -> String {
        self.genes
            .values()
            .flat_map(|gene| {
                gene.proteins().filter_map(move |t| {
                    let protein_id = t.protein_id()?;
                    Some(format!(
                        "{}|{}|{}\tncbi{}",
                        gene.id, protein_id, t.taxon_id, t.taxon_id
                    ))
                })
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn get_gene_count(&self) -> usize {
        self.genes.len()
    }

    pub fn get_transcript_count(&self) -> usize {
        self.transcripts().count()
    }

    pub fn get_protein_count(&self) -> usize {
        self.transcripts().filter(|t| t.is_protein()).count()
    }

    pub fn get_incomplete_protein_count(&self) -> usize {
        self.transcripts().filter(|t| t.is_missing_sequence()).count()
    }

    pub fn get_collected_sequences_count(&self) -> usize {
        self.transcripts().filter(|t| t.has_sequence()).count()
    }

    pub fn get_fas_scored_count(&self) -> usize {
        self.genes.values().map(Gene::fas_scored_count).sum()
    }

    pub fn counters(&self) -> LibraryCounters {
        LibraryCounters {
            gene_count: self.get_gene_count(),
            transcript_count: self.get_transcript_count(),
            protein_count: self.get_protein_count(),
            collected_sequences_count: self.get_collected_sequences_count(),
            fas_scored_sequences_count: self.get_fas_scored_count(),
        }
    }
}

fn required<'a>(fields: &'a FieldMap, key: &str) -> Result<&'a str, SpiceError> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| SpiceError::Format(format!("record without {key}")))
}

fn coordinate(fields: &FieldMap, key: &str) -> Result<u64, SpiceError> {
    required(fields, key)?
        .parse()
        .map_err(|_| SpiceError::Format(format!("bad coordinate {key}")))
}

fn read_optional<T>(path: &Utf8Path) -> Result<T, SpiceError>
where
    T: Default + serde::de::DeserializeOwned,
{
    if path.as_std_path().exists() {
        read_json(path)
    } else {
        Ok(T::default())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;
    use crate::annotation::GtfDecoder;

    const GTF: &str = "\
#!genome-build GRCh38.p14
1\tensembl\tgene\t100\t900\t.\t+\t.\tgene_id \"ENSG01.3\"; gene_biotype \"protein_coding\";
1\tensembl\ttranscript\t100\t900\t.\t+\t.\tgene_id \"ENSG01.3\"; transcript_id \"ENST01.2\"; gene_biotype \"protein_coding\"; transcript_biotype \"protein_coding\"; tag \"basic\"; transcript_support_level \"1 (assigned to previous version 1)\";
1\tensembl\texon\t100\t300\t.\t+\t.\tgene_id \"ENSG01.3\"; transcript_id \"ENST01.2\"; exon_id \"ENSE01.1\"; gene_biotype \"protein_coding\"; transcript_biotype \"protein_coding\";
1\tensembl\tCDS\t150\t300\t.\t+\t0\tgene_id \"ENSG01.3\"; transcript_id \"ENST01.2\"; protein_id \"ENSP01.2\"; gene_biotype \"protein_coding\"; transcript_biotype \"protein_coding\";
1\tensembl\ttranscript\t100\t900\t.\t+\t.\tgene_id \"ENSG01.3\"; transcript_id \"ENST02.1\"; gene_biotype \"protein_coding\"; transcript_biotype \"retained_intron\";
2\tensembl\tgene\t10\t90\t.\t-\t.\tgene_id \"ENSG02.1\"; gene_biotype \"lncRNA\";
";

    fn extracted() -> GeneAssembler {
        let mut assembler = GeneAssembler::new("homo_sapiens", 9606);
        assembler.set_inclusion_filter(
            InclusionFilter::new()
                .with("gene_biotype", &["protein_coding"])
                .with("transcript_biotype", &["protein_coding", "nonsense_mediated_decay"]),
        );
        let source = AnnotationSource::from_reader(Cursor::new(GTF.as_bytes().to_vec()));
        assembler.extract(source, &GtfDecoder).unwrap();
        assembler
    }

    #[test]
    fn extract_groups_and_filters() {
        let assembler = extracted();
        assert_eq!(assembler.get_gene_count(), 1);
        let gene = assembler.gene("ENSG01").unwrap();
        assert_eq!(gene.transcripts().len(), 1);
        let transcript = &gene.transcripts()[0];
        assert_eq!(transcript.id, "ENST01");
        assert_eq!(transcript.protein_id(), Some("ENSP01"));
        assert_eq!(transcript.support_level, Some(1));
        assert!(transcript.tags.contains("basic"));
        assert_eq!(transcript.exons.len(), 1);
        assert_eq!(transcript.exons[0].frame, Some(0));
        assert_eq!(assembler.get_incomplete_protein_count(), 1);
    }

    #[test]
    fn extract_rejects_records_without_gene_id() {
        let mut assembler = GeneAssembler::new("homo_sapiens", 9606);
        let source = AnnotationSource::from_reader(Cursor::new(
            b"1\tensembl\texon\t1\t2\t.\t+\t.\ttranscript_id \"T\";".to_vec(),
        ));
        let err = assembler.extract(source, &GtfDecoder).unwrap_err();
        assert_matches!(err, SpiceError::Format(_));
    }

    #[test]
    fn shards_roundtrip_through_disk() {
        let temp = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(temp.path().join("lib")).unwrap();
        let paths = LibraryPaths::create(root).unwrap();

        let mut assembler = extracted();
        assembler
            .gene_mut("ENSG01")
            .unwrap()
            .set_sequence("ENSP01", "MKTAYIAKQRQISFVK");
        assembler.calculate_implicit_fas_scores();
        assembler.save_all(&paths).unwrap();

        let mut loaded = GeneAssembler::new("homo_sapiens", 9606);
        loaded.load(&paths).unwrap();
        assert_eq!(loaded.counters(), assembler.counters());
        let gene = loaded.gene("ENSG01").unwrap();
        assert_eq!(gene.fas_score("ENST01", "ENST01"), Some(1.0));
        assert_eq!(gene.transcripts()[0].sequence(), Some("MKTAYIAKQRQISFVK"));
    }

    #[test]
    fn incorrect_entries_are_transcript_shaped() {
        let mut t = Transcript::new("ENST00000380152", "ENSG1", 9606);
        t.biotype = "protein_coding".to_string();
        assert!(GeneAssembler::is_incorrect_entry(&t));
        t.attach_protein("ENSP00000369497");
        assert!(!GeneAssembler::is_incorrect_entry(&t));
    }
}
