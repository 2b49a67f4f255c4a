//! Result directory layered on top of a finished library.
//!
//! ```text
//! <outdir>/info.json        species, library reference, registered samples
//! <outdir>/paths.json
//! <outdir>/expression/<sample>.json
//! <outdir>/movement/<sample>.json       EWFD per gene
//! <outdir>/movement/<condition>_ring.json
//! <outdir>/comparison/<a>x<b>.tsv
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::annotation::{AnnotationSource, GtfDecoder};
use crate::assembler::GeneAssembler;
use crate::domain::{Normalization, SampleName};
use crate::error::SpiceError;
use crate::expression::ExpressionAssembly;
use crate::guard::recover_stale_backups;
use crate::movement::{
    MovementVector, Ring, aggregate_ring, compare_samples, gene_movement, mean_pairwise_rmsd,
    rmsd, select,
};
use crate::status::LibraryStatus;
use crate::store::{LibraryPaths, MANIFEST_FILE, read_json, write_bytes_atomic, write_json_atomic};

const INFO_FILE: &str = "info.json";
const SUBDIRS: [&str; 3] = ["expression", "movement", "comparison"];

pub const COMPARISON_HEADER: &str =
    "gene_id\tsample_names\ttranscript_ids\tunscaled_movement\tscaled_movement\tunscaled_rmsd\tscaled_rmsd";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub source: String,
    pub normalization: Normalization,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultInfo {
    pub species: String,
    pub taxon_id: u32,
    pub release: String,
    pub library: String,
    pub library_integrity_flag: bool,
    #[serde(default)]
    pub replicates: BTreeMap<String, ImportRecord>,
    #[serde(default)]
    pub conditions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub comparisons: Vec<String>,
}

/// EWFD entry of one gene in one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneEwfd {
    pub transcripts: Vec<String>,
    pub movement: Vec<f64>,
    pub relative_expression: Vec<f64>,
    pub total_expression: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionRing {
    pub transcripts: Vec<String>,
    pub ring: Ring,
    pub inter_replicate_rmsd: f64,
}

pub type EwfdFile = BTreeMap<String, GeneEwfd>;
pub type RingFile = BTreeMap<String, ConditionRing>;

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub gene_id: String,
    pub samples: (String, String),
    pub transcripts: Vec<String>,
    pub unscaled: (Vec<f64>, Vec<f64>),
    pub scaled: (Vec<f64>, Vec<f64>),
    pub unscaled_rmsd: f64,
    pub scaled_rmsd: f64,
    pub ring_flags: Option<(bool, bool)>,
}

impl ComparisonRow {
    fn to_tsv(&self) -> String {
        let join = |pair: &(Vec<f64>, Vec<f64>)| {
            [&pair.0, &pair.1]
                .iter()
                .map(|values| {
                    values
                        .iter()
                        .map(f64::to_string)
                        .collect::<Vec<_>>()
                        .join(":")
                })
                .collect::<Vec<_>>()
                .join(";")
        };
        let mut columns = vec![
            self.gene_id.clone(),
            format!("{};{}", self.samples.0, self.samples.1),
            self.transcripts.join(";"),
            join(&self.unscaled),
            join(&self.scaled),
            self.unscaled_rmsd.to_string(),
            self.scaled_rmsd.to_string(),
        ];
        if let Some((max_flag, std_flag)) = self.ring_flags {
            columns.push(max_flag.to_string());
            columns.push(std_flag.to_string());
        }
        columns.join("\t")
    }

    /// Rows worth inspecting: partial divergence that scaling changes.
    fn is_notable(&self) -> bool {
        self.unscaled_rmsd > 0.0 && self.unscaled_rmsd < 1.0 && self.unscaled_rmsd != self.scaled_rmsd
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub table: String,
    pub sorted_table: String,
    pub genes: usize,
    pub notable: usize,
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    root: Utf8PathBuf,
    library: LibraryPaths,
    info: ResultInfo,
}

impl ResultStore {
    /// Creates (or refreshes) a result directory bound to `library_root`.
    pub fn setup(library_root: &Utf8Path, outdir: &Utf8Path) -> Result<Self, SpiceError> {
        let library = LibraryPaths::open(library_root)?;
        let status = LibraryStatus::load(&library.info()?)?;
        if !status.all_complete() {
            warn!(library = %library_root, "library is incomplete; results may lack FAS scores");
        }

        for dir in SUBDIRS {
            fs::create_dir_all(outdir.join(dir).as_std_path())
                .map_err(|err| SpiceError::Filesystem(err.to_string()))?;
        }
        let info_path = outdir.join(INFO_FILE);
        let info = if info_path.as_std_path().exists() {
            let mut info: ResultInfo = read_json(&info_path)?;
            info.library = library_root.to_string();
            info.library_integrity_flag = status.all_complete();
            info
        } else {
            ResultInfo {
                species: status.info.species.clone(),
                taxon_id: status.info.taxon_id,
                release: status.info.release.clone(),
                library: library_root.to_string(),
                library_integrity_flag: status.all_complete(),
                replicates: BTreeMap::new(),
                conditions: BTreeMap::new(),
                comparisons: Vec::new(),
            }
        };

        let mut manifest = BTreeMap::new();
        manifest.insert("root".to_string(), outdir.to_string());
        manifest.insert("info".to_string(), INFO_FILE.to_string());
        for dir in SUBDIRS {
            manifest.insert(dir.to_string(), dir.to_string());
        }
        write_json_atomic(&outdir.join(MANIFEST_FILE), &manifest)?;

        let store = Self {
            root: outdir.to_path_buf(),
            library,
            info,
        };
        store.save_info()?;
        info!(results = %outdir, "result directory ready");
        Ok(store)
    }

    pub fn open(outdir: &Utf8Path) -> Result<Self, SpiceError> {
        let info_path = outdir.join(INFO_FILE);
        if !info_path.as_std_path().exists() {
            return Err(SpiceError::InvalidArgument(format!(
                "no result directory at {outdir}; run `spice result setup` first"
            )));
        }
        let info: ResultInfo = read_json(&info_path)?;
        let library = LibraryPaths::open(Utf8Path::new(&info.library))?;
        Ok(Self {
            root: outdir.to_path_buf(),
            library,
            info,
        })
    }

    pub fn info(&self) -> &ResultInfo {
        &self.info
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn save_info(&self) -> Result<(), SpiceError> {
        write_json_atomic(&self.root.join(INFO_FILE), &self.info)
    }

    fn load_library(&self) -> Result<GeneAssembler, SpiceError> {
        recover_stale_backups(&self.library)?;
        let mut assembler = GeneAssembler::new(self.info.species.clone(), self.info.taxon_id);
        assembler.load(&self.library)?;
        Ok(assembler)
    }

    fn expression_path(&self, sample: &str) -> Utf8PathBuf {
        self.root.join("expression").join(format!("{sample}.json"))
    }

    fn movement_path(&self, sample: &str) -> Utf8PathBuf {
        self.root.join("movement").join(format!("{sample}.json"))
    }

    fn ring_path(&self, condition: &str) -> Utf8PathBuf {
        self.root.join("movement").join(format!("{condition}_ring.json"))
    }

    pub fn is_registered(&self, sample: &str) -> bool {
        self.info.replicates.contains_key(sample) || self.info.conditions.contains_key(sample)
    }

    pub fn load_expression(&self, sample: &SampleName) -> Result<ExpressionAssembly, SpiceError> {
        let path = self.expression_path(sample.as_str());
        if !self.is_registered(sample.as_str()) || !path.as_std_path().exists() {
            return Err(SpiceError::SampleNotFound(sample.to_string()));
        }
        read_json(&path)
    }

    pub fn load_ewfd(&self, sample: &SampleName) -> Result<EwfdFile, SpiceError> {
        let path = self.movement_path(sample.as_str());
        if !path.as_std_path().exists() {
            return Err(SpiceError::SampleNotFound(sample.to_string()));
        }
        read_json(&path)
    }

    /// Imports one replicate from an expression GTF and writes its EWFD file.
    pub fn import_expression(
        &mut self,
        name: &SampleName,
        gtf: &Utf8Path,
        normalization: Normalization,
        threshold: f64,
    ) -> Result<ExpressionAssembly, SpiceError> {
        if self.info.conditions.contains_key(name.as_str()) {
            return Err(SpiceError::InvalidArgument(format!(
                "{name} is already registered as a condition"
            )));
        }
        let assembler = self.load_library()?;
        let sample = ExpressionAssembly::from_gtf(
            name.as_str(),
            AnnotationSource::open(gtf)?,
            &GtfDecoder,
            &assembler,
            normalization,
            threshold,
        )?;
        write_json_atomic(&self.expression_path(name.as_str()), &sample)?;
        write_json_atomic(&self.movement_path(name.as_str()), &ewfd(&assembler, &sample))?;

        self.info.replicates.insert(
            name.to_string(),
            ImportRecord {
                source: gtf.to_string(),
                normalization,
                threshold,
            },
        );
        self.save_info()?;
        Ok(sample)
    }

    /// Builds a condition from registered replicates, with its EWFD and ring files.
    pub fn build_condition(
        &mut self,
        name: &SampleName,
        replicates: &[SampleName],
    ) -> Result<ExpressionAssembly, SpiceError> {
        if self.info.replicates.contains_key(name.as_str()) {
            return Err(SpiceError::InvalidArgument(format!(
                "{name} is already registered as a replicate"
            )));
        }
        let samples = replicates
            .iter()
            .map(|replicate| {
                if !self.info.replicates.contains_key(replicate.as_str()) {
                    return Err(SpiceError::SampleNotFound(replicate.to_string()));
                }
                self.load_expression(replicate)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let condition = ExpressionAssembly::condition(name.as_str(), &samples)?;
        let assembler = self.load_library()?;

        let mut rings = RingFile::new();
        for gene in assembler.get_genes(false, false) {
            let mut movements = Vec::with_capacity(samples.len());
            let mut expressions = Vec::with_capacity(samples.len());
            let mut transcripts = Vec::new();
            for sample in &samples {
                let expression = sample.gene(&gene.id).cloned().unwrap_or_default();
                let vector = gene_movement(gene, |id| expression.relative_of(id));
                expressions.push(
                    vector
                        .transcripts
                        .iter()
                        .map(|id| expression.relative_of(id))
                        .collect::<Vec<_>>(),
                );
                transcripts = vector.transcripts;
                movements.push(vector.values);
            }
            let ring = aggregate_ring(&movements, &expressions);
            let kept = movements
                .iter()
                .map(|m| select(m, &ring.kept))
                .collect::<Vec<_>>();
            rings.insert(
                gene.id.clone(),
                ConditionRing {
                    transcripts: ring.kept.iter().map(|&i| transcripts[i].clone()).collect(),
                    inter_replicate_rmsd: mean_pairwise_rmsd(&kept),
                    ring,
                },
            );
        }

        write_json_atomic(&self.expression_path(name.as_str()), &condition)?;
        write_json_atomic(&self.movement_path(name.as_str()), &ewfd(&assembler, &condition))?;
        write_json_atomic(&self.ring_path(name.as_str()), &rings)?;
        self.info
            .conditions
            .insert(name.to_string(), condition.replicates.clone());
        self.save_info()?;
        info!(condition = %name, replicates = samples.len(), "condition built");
        Ok(condition)
    }

    /// Compares two registered samples gene by gene.
    pub fn compare(&mut self, a: &SampleName, b: &SampleName) -> Result<ComparisonReport, SpiceError> {
        for sample in [a, b] {
            if !self.is_registered(sample.as_str()) {
                return Err(SpiceError::SampleNotFound(sample.to_string()));
            }
        }
        let ewfd_a = self.load_ewfd(a)?;
        let ewfd_b = self.load_ewfd(b)?;
        let rings = if self.info.conditions.contains_key(a.as_str())
            && self.info.conditions.contains_key(b.as_str())
        {
            let ring_a: RingFile = read_json(&self.ring_path(a.as_str()))?;
            let ring_b: RingFile = read_json(&self.ring_path(b.as_str()))?;
            Some((ring_a, ring_b))
        } else {
            None
        };

        let mut rows = Vec::new();
        for (gene_id, left) in &ewfd_a {
            let Some(right) = ewfd_b.get(gene_id) else {
                continue;
            };
            if left.transcripts != right.transcripts {
                warn!(gene = %gene_id, "transcript order differs between samples; skipped");
                continue;
            }
            let cmp = compare_samples(
                &left.movement,
                &left.relative_expression,
                left.total_expression,
                &right.movement,
                &right.relative_expression,
                right.total_expression,
            );
            let ring_flags = rings.as_ref().and_then(|(ring_a, ring_b)| {
                Some(ring_flags(ring_a.get(gene_id)?, ring_b.get(gene_id)?))
            });
            rows.push(ComparisonRow {
                gene_id: gene_id.clone(),
                samples: (a.to_string(), b.to_string()),
                transcripts: cmp.kept.iter().map(|&i| left.transcripts[i].clone()).collect(),
                unscaled: cmp.unscaled,
                scaled: cmp.scaled,
                unscaled_rmsd: cmp.unscaled_rmsd,
                scaled_rmsd: cmp.scaled_rmsd,
                ring_flags,
            });
        }

        let header = if rings.is_some() {
            format!("{COMPARISON_HEADER}\tmax_ring_flag\tstd_ring_flag")
        } else {
            COMPARISON_HEADER.to_string()
        };
        let stem = format!("{a}x{b}");
        let table = self.root.join("comparison").join(format!("{stem}.tsv"));
        let sorted_table = self.root.join("comparison").join(format!("{stem}_sorted.tsv"));

        write_bytes_atomic(&table, render(&header, rows.iter()).as_bytes())?;
        let mut notable = rows.iter().filter(|row| row.is_notable()).collect::<Vec<_>>();
        notable.sort_by(|x, y| descending(x, y));
        write_bytes_atomic(&sorted_table, render(&header, notable.iter().copied()).as_bytes())?;

        if !self.info.comparisons.contains(&stem) {
            self.info.comparisons.push(stem);
            self.save_info()?;
        }
        info!(genes = rows.len(), notable = notable.len(), "comparison written");
        Ok(ComparisonReport {
            table: table.to_string(),
            sorted_table: sorted_table.to_string(),
            genes: rows.len(),
            notable: notable.len(),
        })
    }
}

/// EWFD entries for every gene of the library under `sample`'s expression.
pub fn ewfd(assembler: &GeneAssembler, sample: &ExpressionAssembly) -> EwfdFile {
    assembler
        .get_genes(false, false)
        .into_iter()
        .map(|gene| {
            let expression = sample.gene(&gene.id).cloned().unwrap_or_default();
            let MovementVector {
                transcripts,
                values,
            } = gene_movement(gene, |id| expression.relative_of(id));
            let relative_expression = transcripts
                .iter()
                .map(|id| expression.relative_of(id))
                .collect();
            let entry = GeneEwfd {
                transcripts,
                movement: values,
                relative_expression,
                total_expression: expression.total,
            };
            (gene.id.clone(), entry)
        })
        .collect()
}

/// Whether the max ring and the mean+std ring diverge more between the two
/// conditions than either condition's replicates diverge among themselves.
fn ring_flags(a: &ConditionRing, b: &ConditionRing) -> (bool, bool) {
    let shared = a
        .transcripts
        .iter()
        .enumerate()
        .filter_map(|(i, id)| b.transcripts.iter().position(|other| other == id).map(|j| (i, j)))
        .collect::<Vec<_>>();
    let pick = |values: &[f64], side: usize| {
        shared
            .iter()
            .map(|pair| values[if side == 0 { pair.0 } else { pair.1 }])
            .collect::<Vec<_>>()
    };
    let noise = a.inter_replicate_rmsd.max(b.inter_replicate_rmsd);
    let max_rmsd = rmsd(&pick(&a.ring.max, 0), &pick(&b.ring.max, 1));
    let std_rmsd = rmsd(&pick(&a.ring.mean_plus_std, 0), &pick(&b.ring.mean_plus_std, 1));
    (max_rmsd > noise, std_rmsd > noise)
}

fn descending(x: &ComparisonRow, y: &ComparisonRow) -> Ordering {
    y.unscaled_rmsd
        .total_cmp(&x.unscaled_rmsd)
        .then_with(|| y.scaled_rmsd.total_cmp(&x.scaled_rmsd))
}

fn render<'a>(header: &str, rows: impl Iterator<Item = &'a ComparisonRow>) -> String {
    let mut out = String::from(header);
    out.push('\n');
    for row in rows {
        out.push_str(&row.to_tsv());
        out.push('\n');
    }
    out
}
