//! Staged, resumable library construction.
//!
//! Every stage is recorded in [`LibraryStatus`] only after the files it
//! touched are durable. Reopening a library recomputes each stage flag from
//! live data first, so interrupted or externally edited libraries resume at
//! the earliest stage whose result no longer holds.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::AddAssign;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::annotation::{AnnotationSource, GtfDecoder};
use crate::assembler::GeneAssembler;
use crate::config::ResolvedConfig;
use crate::domain::Stage;
use crate::error::SpiceError;
use crate::guard::{AdvisoryLock, GuardSet, WriteGuard, recover_stale_backups};
use crate::provider::{SequenceLookup, SequenceProvider};
use crate::status::{LibraryCounters, LibraryStatus};
use crate::store::{LibraryPaths, read_json, write_bytes_atomic, write_json_atomic};

type Pairings = BTreeMap<String, Vec<(String, String)>>;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub species: String,
    pub taxon_id: u32,
    pub release: String,
    pub outdir: Utf8PathBuf,
    /// Annotation GTF; only read when id collection has to run.
    pub annotation: Option<Utf8PathBuf>,
    pub force: bool,
    pub commandline_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub library: String,
    pub species: String,
    pub taxon_id: u32,
    pub release: String,
    pub executed: Vec<Stage>,
    pub healed: Vec<Stage>,
    pub pending: Option<Stage>,
    pub counters: LibraryCounters,
    pub flags: BTreeMap<Stage, bool>,
}

impl BuildReport {
    fn new(paths: &LibraryPaths, status: &LibraryStatus) -> Self {
        Self {
            library: paths.root().to_string(),
            species: status.info.species.clone(),
            taxon_id: status.info.taxon_id,
            release: status.info.release.clone(),
            executed: Vec::new(),
            healed: Vec::new(),
            pending: status.first_pending(),
            counters: status.counters(),
            flags: status.flags().into_iter().collect(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.flags.values().all(|done| *done)
    }
}

struct Session {
    paths: LibraryPaths,
    status: LibraryStatus,
    assembler: GeneAssembler,
}

impl Session {
    fn save_status(&mut self) -> Result<(), SpiceError> {
        self.status.set_counters(self.assembler.counters());
        self.status.touch();
        self.status.save(&self.paths.info()?)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CollectionProgress {
    resolved: usize,
    removed: usize,
}

impl AddAssign for CollectionProgress {
    fn add_assign(&mut self, other: Self) {
        self.resolved += other.resolved;
        self.removed += other.removed;
    }
}

pub struct LibraryBuilder<P: SequenceProvider> {
    provider: P,
    config: ResolvedConfig,
}

impl<P: SequenceProvider> LibraryBuilder<P> {
    pub fn new(provider: P, config: ResolvedConfig) -> Self {
        Self { provider, config }
    }

    /// Creates or resumes the library described by `request` and runs every
    /// pending stage in order.
    pub fn build(
        &self,
        request: &BuildRequest,
        sink: &dyn ProgressSink,
    ) -> Result<BuildReport, SpiceError> {
        let name = LibraryPaths::library_name(&request.species, &request.release);
        let root = request.outdir.join(&name);
        // The lock lives beside the root so `--force` can delete the root under it.
        let _lock = AdvisoryLock::acquire(&request.outdir.join(format!(".{name}.lock")))?;

        if request.force && root.as_std_path().exists() {
            info!(library = %root, "removing existing library (--force)");
            LibraryPaths::clear(&root)?;
        }

        let (mut session, healed) = self.open_session(request, root)?;
        let mut report_stages = Vec::new();
        let mut pending = None;

        for stage in Stage::ALL {
            if session.status.is_complete(stage) {
                continue;
            }
            if stage.is_external() {
                if let Some(detail) =
                    check_stage(stage, &session.assembler, &session.paths, &self.config)?
                {
                    info!(stage = %stage, detail = %detail, "waiting for external tool");
                    sink.event(ProgressEvent {
                        message: format!("stage={stage}; waiting: {detail}"),
                        elapsed: None,
                    });
                    pending = Some(stage);
                    break;
                }
                session.status.set(stage, true);
                session.save_status()?;
                continue;
            }

            // A re-run stage invalidates everything derived from it.
            for later in &Stage::ALL[stage.index() + 1..] {
                session.status.set(*later, false);
            }

            let started = Instant::now();
            sink.event(ProgressEvent {
                message: format!("stage={stage}; running"),
                elapsed: None,
            });
            let complete = self
                .run_stage(stage, &mut session, request, sink)
                .map_err(|source| SpiceError::StageAborted {
                    stage,
                    resume_from: stage,
                    source: Box::new(source),
                })?;
            session.status.set(stage, complete);
            session.save_status()?;
            report_stages.push(stage);
            sink.event(ProgressEvent {
                message: format!("stage={stage}; done"),
                elapsed: Some(started.elapsed()),
            });

            if !complete {
                warn!(stage = %stage, "stage left work behind; rerun to continue");
                pending = Some(stage);
                break;
            }
        }

        let mut report = BuildReport::new(&session.paths, &session.status);
        report.executed = report_stages;
        report.healed = healed;
        report.pending = pending;
        Ok(report)
    }

    fn open_session(
        &self,
        request: &BuildRequest,
        root: Utf8PathBuf,
    ) -> Result<(Session, Vec<Stage>), SpiceError> {
        if LibraryPaths::exists(&root) {
            let paths = LibraryPaths::open(&root)?;
            let restored = recover_stale_backups(&paths)?;
            if !restored.is_empty() {
                warn!(library = %root, files = restored.len(), "rolled back interrupted writes");
            }
            let info_path = paths.info()?;
            let mut status = if info_path.as_std_path().exists() {
                LibraryStatus::load(&info_path)?
            } else {
                LibraryStatus::new(&request.species, request.taxon_id, &request.release)
            };
            let mut assembler =
                GeneAssembler::new(status.info.species.clone(), status.info.taxon_id);
            let healed = verify(&mut assembler, &paths, &mut status, &self.config)?;
            status.touch();
            status.save(&info_path)?;
            info!(library = %root, healed = healed.len(), "library reopened");
            let session = Session {
                paths,
                status,
                assembler,
            };
            return Ok((session, healed));
        }

        let paths = LibraryPaths::create(root)?;
        let mut status =
            LibraryStatus::new(&request.species, request.taxon_id, &request.release);
        status.commandline_args = request.commandline_args.clone();
        status.save(&paths.info()?)?;
        info!(library = %paths.root(), "library created");
        let assembler = GeneAssembler::new(request.species.clone(), request.taxon_id);
        let session = Session {
            paths,
            status,
            assembler,
        };
        Ok((session, Vec::new()))
    }

    fn run_stage(
        &self,
        stage: Stage,
        session: &mut Session,
        request: &BuildRequest,
        sink: &dyn ProgressSink,
    ) -> Result<bool, SpiceError> {
        match stage {
            Stage::IdCollection => self.collect_ids(session, request),
            Stage::SequenceCollection => self.collect_sequences(session, sink),
            Stage::SmallProteinRemoval => {
                let min_length = self.config.min_protein_length;
                remove_where(session, stage, |t| {
                    GeneAssembler::is_small_protein(t, min_length)
                })
            }
            Stage::IncorrectEntryRemoval => {
                remove_where(session, stage, GeneAssembler::is_incorrect_entry)
            }
            Stage::ImplicitFasScoring => {
                let guards = GuardSet::acquire(&[session.paths.fas_scores()?])?;
                session.assembler.calculate_implicit_fas_scores();
                session.assembler.save_fas(&session.paths)?;
                guards.commit()?;
                Ok(true)
            }
            Stage::FastaGeneration => {
                let fasta = session.assembler.fasta();
                write_guarded(&session.paths.get("transcript_fasta")?, fasta.as_bytes())?;
                Ok(true)
            }
            Stage::PairingGeneration => {
                let pairings = session.assembler.pairings();
                let target = session.paths.get("transcript_pairings")?;
                let dir = parent_of(&target)?;
                WriteGuard::run(&target, &dir, |guard| {
                    write_json_atomic(guard.target(), &pairings)
                })?;
                Ok(true)
            }
            Stage::IdTsvGeneration => {
                let table = session.assembler.id_table();
                write_guarded(&session.paths.get("transcript_ids")?, table.as_bytes())?;
                Ok(true)
            }
            Stage::SequenceAnnotation | Stage::FasScoring => Ok(check_stage(
                stage,
                &session.assembler,
                &session.paths,
                &self.config,
            )?
            .is_none()),
        }
    }

    fn collect_ids(&self, session: &mut Session, request: &BuildRequest) -> Result<bool, SpiceError> {
        let annotation = request.annotation.as_ref().ok_or_else(|| {
            SpiceError::InvalidArgument("an annotation GTF is required to collect ids".to_string())
        })?;
        let guards = GuardSet::acquire(&shard_targets(&session.paths)?)?;
        let mut assembler = GeneAssembler::new(
            session.status.info.species.clone(),
            session.status.info.taxon_id,
        );
        assembler.set_inclusion_filter(self.config.inclusion_filter());
        assembler.extract(AnnotationSource::open(annotation)?, &GtfDecoder)?;
        assembler.clear_empty_genes();
        assembler.save_all(&session.paths)?;
        guards.commit()?;
        session.assembler = assembler;
        Ok(true)
    }

    /// Fills in missing protein sequences. Sweeps repeat until a pass makes no
    /// progress or the pass limit is reached.
    fn collect_sequences(
        &self,
        session: &mut Session,
        sink: &dyn ProgressSink,
    ) -> Result<bool, SpiceError> {
        let mut guards = GuardSet::acquire(&shard_targets(&session.paths)?)?;
        let batch_size = self.config.batch_size;
        let mut processed = 0usize;

        for pass in 1..=self.config.max_collection_passes {
            let genes = session.assembler.gene_ids(true, false);
            if genes.is_empty() {
                break;
            }
            let mut progress = CollectionProgress::default();
            let mut pending: Vec<(String, String)> = Vec::new();

            for gene_id in &genes {
                if let Some(gene) = session.assembler.gene(gene_id) {
                    pending.extend(gene.incomplete_proteins().filter_map(|t| {
                        t.protein_id().map(|p| (gene_id.clone(), p.to_string()))
                    }));
                }
                while pending.len() >= batch_size {
                    let batch = pending.drain(..batch_size).collect::<Vec<_>>();
                    progress += self.apply_batch(&mut session.assembler, &batch)?;
                }
                processed += 1;
                if processed % self.config.checkpoint_interval == 0 {
                    let batch = std::mem::take(&mut pending);
                    progress += self.apply_batch(&mut session.assembler, &batch)?;
                    session.assembler.save_all(&session.paths)?;
                    guards.checkpoint()?;
                    session.save_status()?;
                    sink.event(ProgressEvent {
                        message: format!(
                            "stage={}; checkpoint after {processed} genes",
                            Stage::SequenceCollection
                        ),
                        elapsed: None,
                    });
                }
            }
            let batch = std::mem::take(&mut pending);
            progress += self.apply_batch(&mut session.assembler, &batch)?;

            info!(
                pass,
                resolved = progress.resolved,
                removed = progress.removed,
                remaining = session.assembler.get_incomplete_protein_count(),
                "sequence collection pass finished"
            );
            if progress.resolved + progress.removed == 0 {
                break;
            }
        }

        session.assembler.clear_empty_genes();
        session.assembler.save_all(&session.paths)?;
        guards.commit()?;
        Ok(session.assembler.get_incomplete_protein_count() == 0)
    }

    fn apply_batch(
        &self,
        assembler: &mut GeneAssembler,
        batch: &[(String, String)],
    ) -> Result<CollectionProgress, SpiceError> {
        let mut progress = CollectionProgress::default();
        if batch.is_empty() {
            return Ok(progress);
        }
        let ids = batch.iter().map(|(_, id)| id.clone()).collect::<Vec<_>>();
        let owners = batch
            .iter()
            .map(|(gene, id)| (id.as_str(), gene.as_str()))
            .collect::<HashMap<_, _>>();

        for (id, lookup) in self.provider.fetch_sequences(&ids)? {
            let Some(gene_id) = owners.get(id.as_str()).copied() else {
                debug!(id = %id, "provider answered an id that was not requested");
                continue;
            };
            match lookup {
                SequenceLookup::Found(sequence) => {
                    let stored = assembler
                        .gene_mut(gene_id)
                        .map(|gene| gene.set_sequence(&id, &sequence))
                        .unwrap_or(false);
                    if stored && !sequence.is_empty() {
                        progress.resolved += 1;
                    }
                }
                SequenceLookup::Deprecated => {
                    let err = SpiceError::PermanentIdentifier(id.clone());
                    warn!(gene = %gene_id, kind = err.kind(), "{err}; removing from library");
                    if assembler.delete_transcript(gene_id, &id).is_some() {
                        progress.removed += 1;
                    }
                }
            }
        }
        Ok(progress)
    }
}

/// Reads a library without modifying its status: flags are recomputed in
/// memory. Interrupted writes are rolled back first.
pub fn inspect_library(root: &Utf8Path, config: &ResolvedConfig) -> Result<BuildReport, SpiceError> {
    let paths = LibraryPaths::open(root)?;
    recover_stale_backups(&paths)?;
    let mut status = LibraryStatus::load(&paths.info()?)?;
    let mut assembler = GeneAssembler::new(status.info.species.clone(), status.info.taxon_id);
    let healed = verify(&mut assembler, &paths, &mut status, config)?;
    let mut report = BuildReport::new(&paths, &status);
    report.healed = healed;
    Ok(report)
}

/// Recomputes every stage flag from live data. Recorded flags that no longer
/// hold are reset; returns the stages that were reset.
fn verify(
    assembler: &mut GeneAssembler,
    paths: &LibraryPaths,
    status: &mut LibraryStatus,
    config: &ResolvedConfig,
) -> Result<Vec<Stage>, SpiceError> {
    let loaded = paths.transcript_info()?.as_std_path().exists();
    if loaded {
        assembler.load(paths)?;
    }

    let mut healed = Vec::new();
    for stage in Stage::ALL {
        let finding = if loaded {
            check_stage(stage, assembler, paths, config)?
        } else {
            Some("transcript store is missing".to_string())
        };
        match finding {
            Some(detail) if status.is_complete(stage) => {
                let err = drift_error(stage, detail);
                warn!(
                    stage = %stage,
                    kind = err.kind(),
                    genes = assembler.get_gene_count(),
                    proteins = assembler.get_protein_count(),
                    "{err}; stage will run again"
                );
                status.set(stage, false);
                healed.push(stage);
            }
            None if stage.is_external() && status.can_run(stage) => status.set(stage, true),
            _ => {}
        }
    }
    status.set_counters(assembler.counters());
    Ok(healed)
}

fn drift_error(stage: Stage, detail: String) -> SpiceError {
    match stage {
        Stage::FastaGeneration | Stage::PairingGeneration | Stage::IdTsvGeneration => {
            SpiceError::IntegrityViolation { stage, detail }
        }
        _ => SpiceError::SchemaDrift { stage, detail },
    }
}

/// `None` when the live data satisfies `stage`, otherwise what is missing.
fn check_stage(
    stage: Stage,
    assembler: &GeneAssembler,
    paths: &LibraryPaths,
    config: &ResolvedConfig,
) -> Result<Option<String>, SpiceError> {
    let finding = match stage {
        Stage::IdCollection => None,
        Stage::SequenceCollection => {
            let missing = assembler.get_incomplete_protein_count();
            (missing > 0).then(|| format!("{missing} proteins without sequence"))
        }
        Stage::SmallProteinRemoval => {
            let small = assembler
                .transcripts()
                .filter(|t| GeneAssembler::is_small_protein(t, config.min_protein_length))
                .count();
            (small > 0).then(|| format!("{small} proteins shorter than {}", config.min_protein_length))
        }
        Stage::IncorrectEntryRemoval => {
            let incorrect = assembler
                .transcripts()
                .filter(|t| GeneAssembler::is_incorrect_entry(t))
                .count();
            (incorrect > 0).then(|| format!("{incorrect} entries fail the id format check"))
        }
        Stage::ImplicitFasScoring => {
            let genes = assembler.get_genes(false, true).len();
            (genes > 0).then(|| format!("{genes} genes with unscored diagonal entries"))
        }
        Stage::FastaGeneration => {
            let expected = assembler.fasta().lines().count();
            match read_optional_text(&paths.get("transcript_fasta")?)? {
                None => Some("FASTA file is missing".to_string()),
                Some(text) => {
                    let found = text.lines().count();
                    (found != expected)
                        .then(|| format!("FASTA has {found} lines, expected {expected}"))
                }
            }
        }
        Stage::PairingGeneration => {
            let path = paths.get("transcript_pairings")?;
            if path.as_std_path().exists() {
                let stored: Pairings = read_json(&path)?;
                (stored != assembler.pairings())
                    .then(|| "pairings differ from the current FAS store".to_string())
            } else {
                Some("pairings file is missing".to_string())
            }
        }
        Stage::IdTsvGeneration => {
            let expected = assembler.get_protein_count();
            match read_optional_text(&paths.get("transcript_ids")?)? {
                None => Some("id table is missing".to_string()),
                Some(text) => {
                    let found = text.lines().count();
                    (found != expected)
                        .then(|| format!("id table has {found} rows, expected {expected}"))
                }
            }
        }
        Stage::SequenceAnnotation => {
            let dir = paths.get("fas_annotation")?;
            let populated = fs::read_dir(dir.as_std_path())
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false);
            (!populated).then(|| "annotation store is empty".to_string())
        }
        Stage::FasScoring => {
            let scored = assembler.get_fas_scored_count();
            let proteins = assembler.get_protein_count();
            (scored < proteins).then(|| format!("{scored} of {proteins} proteins fully scored"))
        }
    };
    Ok(finding)
}

fn shard_targets(paths: &LibraryPaths) -> Result<Vec<Utf8PathBuf>, SpiceError> {
    Ok(vec![
        paths.transcript_info()?,
        paths.transcript_seq()?,
        paths.fas_scores()?,
    ])
}

fn remove_where<F>(session: &mut Session, stage: Stage, predicate: F) -> Result<bool, SpiceError>
where
    F: Fn(&crate::model::Transcript) -> bool,
{
    let guards = GuardSet::acquire(&shard_targets(&session.paths)?)?;
    let removed = session.assembler.remove_transcripts_where(predicate);
    let emptied = session.assembler.clear_empty_genes();
    info!(stage = %stage, removed, emptied_genes = emptied, "transcripts removed");
    session.assembler.save_all(&session.paths)?;
    guards.commit()?;
    Ok(true)
}

fn write_guarded(target: &Utf8Path, content: &[u8]) -> Result<(), SpiceError> {
    let dir = parent_of(target)?;
    WriteGuard::run(target, &dir, |guard| write_bytes_atomic(guard.target(), content))
}

fn parent_of(path: &Utf8Path) -> Result<Utf8PathBuf, SpiceError> {
    path.parent()
        .map(Utf8Path::to_path_buf)
        .ok_or_else(|| SpiceError::Filesystem(format!("invalid path {path}")))
}

fn read_optional_text(path: &Utf8Path) -> Result<Option<String>, SpiceError> {
    if !path.as_std_path().exists() {
        return Ok(None);
    }
    fs::read_to_string(path.as_std_path())
        .map(Some)
        .map_err(|err| SpiceError::Filesystem(format!("read {path}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Gene, Transcript};

    fn library() -> (tempfile::TempDir, LibraryPaths, GeneAssembler) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("lib")).unwrap();
        let paths = LibraryPaths::create(root).unwrap();
        let mut gene = Gene::new("ENSG1", 9606, "homo_sapiens");
        for (t, p) in [("ENST1", "ENSP1"), ("ENST2", "ENSP2")] {
            let mut transcript = Transcript::new(t, "ENSG1", 9606);
            transcript.biotype = "protein_coding".to_string();
            transcript.attach_protein(p);
            transcript.set_sequence("MKTAYIAKQRQISFVK");
            gene.add_transcript(transcript);
        }
        let mut assembler = GeneAssembler::new("homo_sapiens", 9606);
        assembler.insert_gene(gene);
        assembler.calculate_implicit_fas_scores();
        assembler.save_all(&paths).unwrap();
        (temp, paths, assembler)
    }

    #[test]
    fn fasta_check_compares_line_counts() {
        let (_temp, paths, assembler) = library();
        let config = ResolvedConfig::default();
        let finding = check_stage(Stage::FastaGeneration, &assembler, &paths, &config).unwrap();
        assert_eq!(finding.as_deref(), Some("FASTA file is missing"));

        let fasta = paths.get("transcript_fasta").unwrap();
        write_bytes_atomic(&fasta, assembler.fasta().as_bytes()).unwrap();
        assert!(check_stage(Stage::FastaGeneration, &assembler, &paths, &config)
            .unwrap()
            .is_none());

        write_bytes_atomic(&fasta, b">ENSG1|ENST1|ENSP1\nMKTAYIAKQRQISFVK").unwrap();
        let finding = check_stage(Stage::FastaGeneration, &assembler, &paths, &config).unwrap();
        assert!(finding.unwrap().contains("expected 4"));
    }

    #[test]
    fn pairing_check_tracks_pending_scores() {
        let (_temp, paths, mut assembler) = library();
        let config = ResolvedConfig::default();
        let target = paths.get("transcript_pairings").unwrap();
        write_json_atomic(&target, &assembler.pairings()).unwrap();
        assert!(check_stage(Stage::PairingGeneration, &assembler, &paths, &config)
            .unwrap()
            .is_none());

        assembler
            .gene_mut("ENSG1")
            .unwrap()
            .set_fas_score("ENST1", "ENST2", 0.7);
        assert!(check_stage(Stage::PairingGeneration, &assembler, &paths, &config)
            .unwrap()
            .is_some());
        assert!(check_stage(Stage::FasScoring, &assembler, &paths, &config)
            .unwrap()
            .is_none());
    }

    #[test]
    fn verify_resets_drifted_flags() {
        let (_temp, paths, _assembler) = library();
        let mut status = LibraryStatus::new("homo_sapiens", 9606, "110");
        for stage in Stage::ALL {
            status.set(stage, true);
        }
        let mut assembler = GeneAssembler::new("homo_sapiens", 9606);
        let healed = verify(&mut assembler, &paths, &mut status, &ResolvedConfig::default())
            .unwrap();

        assert!(healed.contains(&Stage::FastaGeneration));
        assert!(healed.contains(&Stage::SequenceAnnotation));
        assert!(!healed.contains(&Stage::SequenceCollection));
        assert_eq!(status.first_pending(), Some(Stage::FastaGeneration));
        assert_eq!(status.counters().protein_count, 2);
    }

    #[test]
    fn external_stages_wait_for_earlier_flags() {
        let (_temp, paths, mut assembler) = library();
        assembler
            .gene_mut("ENSG1")
            .unwrap()
            .set_fas_score("ENST1", "ENST2", 0.5);
        assembler.save_fas(&paths).unwrap();
        let annotation = paths.get("fas_annotation").unwrap().join("ENSG1.json");
        write_bytes_atomic(&annotation, b"{}").unwrap();
        let config = ResolvedConfig::default();

        let mut status = LibraryStatus::new("homo_sapiens", 9606, "110");
        status.set(Stage::IdCollection, true);
        status.set(Stage::SequenceCollection, true);
        let mut loaded = GeneAssembler::new("homo_sapiens", 9606);
        verify(&mut loaded, &paths, &mut status, &config).unwrap();
        assert!(!status.is_complete(Stage::SequenceAnnotation));
        assert!(!status.is_complete(Stage::FasScoring));

        for stage in &Stage::ALL[..8] {
            status.set(*stage, true);
        }
        write_bytes_atomic(&paths.get("transcript_fasta").unwrap(), assembler.fasta().as_bytes())
            .unwrap();
        write_json_atomic(&paths.get("transcript_pairings").unwrap(), &assembler.pairings())
            .unwrap();
        write_bytes_atomic(&paths.get("transcript_ids").unwrap(), assembler.id_table().as_bytes())
            .unwrap();
        let mut loaded = GeneAssembler::new("homo_sapiens", 9606);
        let healed = verify(&mut loaded, &paths, &mut status, &config).unwrap();
        assert!(healed.is_empty());
        assert!(status.all_complete());
    }
}
