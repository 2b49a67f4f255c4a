//! GTF decoding collaborator.
//!
//! The assembler only sees field maps produced by an [`AnnotationDecoder`];
//! the raw text format stays behind this module.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::LazyLock;

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;
use regex::Regex;

use crate::error::SpiceError;

pub type FieldMap = BTreeMap<String, String>;

/// Column names of the eight fixed GTF columns, in file order.
pub const COLUMNS: [&str; 8] = [
    "seqname", "source", "feature", "start", "end", "score", "strand", "frame",
];

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][A-Za-z0-9_]*)\s+(?:"([^"]*)"|([^;\s]+))"#)
        .expect("attribute pattern is valid")
});

pub trait AnnotationDecoder {
    /// Decodes one raw line; comments and blank lines yield `None`.
    fn decode(&self, line: &str) -> Result<Option<FieldMap>, SpiceError>;

    /// Encodes a field map back into one raw line.
    fn encode(&self, fields: &FieldMap) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GtfDecoder;

impl AnnotationDecoder for GtfDecoder {
    fn decode(&self, line: &str) -> Result<Option<FieldMap>, SpiceError> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let columns = line.split('\t').collect::<Vec<_>>();
        if columns.len() != 9 {
            return Err(SpiceError::Format(format!(
                "expected 9 tab-separated columns, found {}: {line}",
                columns.len()
            )));
        }
        let mut fields = FieldMap::new();
        for (name, value) in COLUMNS.iter().zip(&columns) {
            fields.insert((*name).to_string(), (*value).to_string());
        }
        for key in ["start", "end"] {
            let valid = fields
                .get(key)
                .map(|value| value.parse::<u64>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(SpiceError::Format(format!("bad coordinate {key}: {line}")));
            }
        }
        for caps in ATTRIBUTE.captures_iter(columns[8]) {
            let key = caps[1].to_string();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            // Repeated keys such as `tag` are folded into one comma list.
            fields
                .entry(key)
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(&value);
                })
                .or_insert(value);
        }
        Ok(Some(fields))
    }

    fn encode(&self, fields: &FieldMap) -> String {
        let mut columns = COLUMNS
            .iter()
            .map(|name| fields.get(*name).map(String::as_str).unwrap_or("."))
            .map(str::to_string)
            .collect::<Vec<_>>();
        let attributes = fields
            .iter()
            .filter(|(key, _)| !COLUMNS.contains(&key.as_str()))
            .flat_map(|(key, value)| {
                value
                    .split(',')
                    .map(move |part| format!("{key} \"{part}\";"))
            })
            .collect::<Vec<_>>();
        columns.push(attributes.join(" "));
        columns.join("\t")
    }
}

/// Line source over a plain or gzip-compressed annotation file.
pub struct AnnotationSource {
    reader: Box<dyn BufRead>,
}

impl AnnotationSource {
    pub fn open(path: &Utf8Path) -> Result<Self, SpiceError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| SpiceError::Filesystem(format!("open {path}: {err}")))?;
        let reader: Box<dyn BufRead> = if path.extension() == Some("gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self { reader })
    }

    pub fn from_reader<R: BufRead + 'static>(reader: R) -> Self {
        Self {
            reader: Box::new(reader),
        }
    }

    pub fn lines(self) -> impl Iterator<Item = Result<String, SpiceError>> {
        self.reader
            .lines()
            .map(|line| line.map_err(|err| SpiceError::Filesystem(err.to_string())))
    }
}

/// Field-value allow lists; a record passes when every constrained field it
/// carries holds one of the allowed values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InclusionFilter {
    rules: BTreeMap<String, Vec<String>>,
}

impl InclusionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, field: &str, allowed: &[String]) {
        self.rules.insert(field.to_string(), allowed.to_vec());
    }

    pub fn with(mut self, field: &str, allowed: &[&str]) -> Self {
        let allowed = allowed.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        self.update(field, &allowed);
        self
    }

    pub fn accepts(&self, fields: &FieldMap) -> bool {
        self.rules.iter().all(|(field, allowed)| match fields.get(field) {
            Some(value) => allowed.iter().any(|a| a == value),
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const LINE: &str = "1\tensembl\ttranscript\t11869\t14409\t.\t+\t.\tgene_id \"ENSG00000223972.5\"; transcript_id \"ENST00000456328.2\"; transcript_biotype \"protein_coding\"; tag \"basic\"; tag \"Ensembl_canonical\"; transcript_support_level \"1\";";

    #[test]
    fn decodes_columns_and_attributes() {
        let fields = GtfDecoder.decode(LINE).unwrap().unwrap();
        assert_eq!(fields["feature"], "transcript");
        assert_eq!(fields["start"], "11869");
        assert_eq!(fields["gene_id"], "ENSG00000223972.5");
        assert_eq!(fields["tag"], "basic,Ensembl_canonical");
        assert_eq!(fields["transcript_support_level"], "1");
    }

    #[test]
    fn skips_comments() {
        assert!(GtfDecoder.decode("#!genome-build GRCh38").unwrap().is_none());
        assert!(GtfDecoder.decode("   ").unwrap().is_none());
    }

    #[test]
    fn rejects_short_records() {
        let err = GtfDecoder.decode("1\tensembl\tgene").unwrap_err();
        assert_matches!(err, SpiceError::Format(_));
        let err = GtfDecoder
            .decode("1\tensembl\tgene\tx\t10\t.\t+\t.\tgene_id \"G\";")
            .unwrap_err();
        assert_matches!(err, SpiceError::Format(_));
    }

    #[test]
    fn encode_roundtrips_fields() {
        let fields = GtfDecoder.decode(LINE).unwrap().unwrap();
        let encoded = GtfDecoder.encode(&fields);
        assert_eq!(GtfDecoder.decode(&encoded).unwrap().unwrap(), fields);
    }

    #[test]
    fn filter_only_checks_present_fields() {
        let filter = InclusionFilter::new()
            .with("gene_biotype", &["protein_coding"])
            .with("transcript_biotype", &["protein_coding", "nonsense_mediated_decay"]);
        let mut fields = FieldMap::new();
        fields.insert("gene_biotype".into(), "protein_coding".into());
        assert!(filter.accepts(&fields));
        fields.insert("transcript_biotype".into(), "retained_intron".into());
        assert!(!filter.accepts(&fields));
    }
}
