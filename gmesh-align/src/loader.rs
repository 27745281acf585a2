//! Mapping Loader
//!
//! Parses SSSOM-like tab-delimited correspondence tables written by matchers
//! and writes the same format back out (plain and fused exports).
//!
//! Required columns (aliases accepted):
//! - `subject_id` (`subject`)
//! - `predicate_id` (`predicate`)
//! - `object_id` (`object`)
//! - `confidence` (`similarity`, `similarity_score`)
//! - `mapping_provider` (`provider`, `mapping_tool`)
//!
//! Lines starting with `#` are metadata and skipped. Extra columns are ignored.

use crate::types::{AlignResult, Correspondence, FusedMapping, ParseError, Predicate, UnknownPredicate};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, Trim, WriterBuilder};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Provider recorded on rows of a fused export
pub const FUSION_PROVIDER: &str = "graph-mesh-fusion";

const SUBJECT_ALIASES: &[&str] = &["subject_id", "subject"];
const PREDICATE_ALIASES: &[&str] = &["predicate_id", "predicate"];
const OBJECT_ALIASES: &[&str] = &["object_id", "object"];
const CONFIDENCE_ALIASES: &[&str] = &["confidence", "similarity", "similarity_score"];
const PROVIDER_ALIASES: &[&str] = &["mapping_provider", "provider", "mapping_tool"];
const JUSTIFICATION_ALIASES: &[&str] = &["mapping_justification", "justification"];

const CORRESPONDENCE_COLUMNS: [&str; 6] = [
    "subject_id",
    "predicate_id",
    "object_id",
    "confidence",
    "mapping_provider",
    "mapping_justification",
];

const FUSED_EXTRA_COLUMNS: [&str; 3] = ["consensus_confidence", "support_count", "supporting_matchers"];

/// Separator inside the `supporting_matchers` column
const MATCHER_SEPARATOR: char = '|';

/// Column positions resolved from the header row
struct ColumnLayout {
    subject: usize,
    predicate: usize,
    object: usize,
    confidence: usize,
    provider: Option<usize>,
    justification: Option<usize>,
    consensus: Option<usize>,
    supporting: Option<usize>,
}

impl ColumnLayout {
    fn resolve(headers: &StringRecord, path: &Path, provider_required: bool) -> Result<Self, ParseError> {
        let required = |aliases: &[&str]| {
            find_column(headers, aliases).ok_or_else(|| {
                ParseError::new(path, Some(1), format!("missing required column '{}'", aliases[0]))
            })
        };

        let layout = Self {
            subject: required(SUBJECT_ALIASES)?,
            predicate: required(PREDICATE_ALIASES)?,
            object: required(OBJECT_ALIASES)?,
            confidence: required(CONFIDENCE_ALIASES)?,
            provider: find_column(headers, PROVIDER_ALIASES),
            justification: find_column(headers, JUSTIFICATION_ALIASES),
            consensus: find_column(headers, &["consensus_confidence"]),
            supporting: find_column(headers, &["supporting_matchers"]),
        };

        if provider_required && layout.provider.is_none() {
            return Err(ParseError::new(
                path,
                Some(1),
                format!("missing required column '{}'", PROVIDER_ALIASES[0]),
            ));
        }

        Ok(layout)
    }
}

fn find_column(headers: &StringRecord, aliases: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| aliases.iter().any(|alias| h.trim().eq_ignore_ascii_case(alias)))
}

fn open_table(path: &Path) -> Result<csv::Reader<File>, ParseError> {
    ReaderBuilder::new()
        .delimiter(b'\t')
        .comment(Some(b'#'))
        .quoting(false)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)
        .map_err(|e| ParseError::new(path, None, format!("cannot open table: {}", e)))
}

fn record_line(record: &StringRecord) -> Option<u64> {
    record.position().map(|p| p.line())
}

fn required_field<'r>(
    record: &'r StringRecord,
    index: usize,
    column: &str,
    path: &Path,
) -> Result<&'r str, ParseError> {
    record
        .get(index)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ParseError::new(path, record_line(record), format!("empty {} value", column)))
}

fn optional_field(record: &StringRecord, index: Option<usize>) -> Option<&str> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Parse a confidence cell; NaN and non-numeric values are errors, values
/// outside [0, 1] are clamped with a warning.
fn parse_confidence(raw: &str, record: &StringRecord, path: &Path) -> Result<f64, ParseError> {
    let value: f64 = raw.parse().map_err(|_| {
        ParseError::new(path, record_line(record), format!("unparseable confidence '{}'", raw))
    })?;

    if value.is_nan() {
        return Err(ParseError::new(path, record_line(record), "confidence is NaN"));
    }

    if !(0.0..=1.0).contains(&value) {
        warn!(
            file = %path.display(),
            line = ?record_line(record),
            confidence = value,
            "Confidence outside [0, 1], clamping"
        );
    }

    Ok(value.clamp(0.0, 1.0))
}

fn parse_row(
    record: &StringRecord,
    layout: &ColumnLayout,
    provider_override: Option<&str>,
    path: &Path,
) -> Result<Correspondence, ParseError> {
    let subject = required_field(record, layout.subject, "subject_id", path)?;
    let predicate_raw = required_field(record, layout.predicate, "predicate_id", path)?;
    let object = required_field(record, layout.object, "object_id", path)?;
    let confidence_raw = required_field(record, layout.confidence, "confidence", path)?;

    let predicate: Predicate = predicate_raw
        .parse()
        .map_err(|e: UnknownPredicate| ParseError::new(path, record_line(record), e.to_string()))?;
    let confidence = parse_confidence(confidence_raw, record, path)?;

    let provider = match provider_override {
        Some(name) => name,
        None => match layout.provider {
            Some(index) => required_field(record, index, "mapping_provider", path)?,
            None => {
                return Err(ParseError::new(path, record_line(record), "missing mapping_provider"));
            }
        },
    };

    let mut correspondence = Correspondence::new(subject, predicate, object, confidence, provider);
    if let Some(justification) = optional_field(record, layout.justification) {
        correspondence = correspondence.with_justification(justification);
    }
    Ok(correspondence)
}

/// Collapse same-matcher duplicates of a `(subject_id, object_id, provider)`
/// key, keeping the highest confidence (more specific predicate on ties).
/// Output is sorted by that key.
pub fn deduplicate(records: Vec<Correspondence>) -> Vec<Correspondence> {
    let mut best: HashMap<(String, String, String), Correspondence> = HashMap::new();

    for record in records {
        let key = (
            record.subject_id().to_string(),
            record.object_id().to_string(),
            record.provider().to_string(),
        );

        match best.get(&key) {
            Some(existing) if !supersedes(&record, existing) => {
                debug!(
                    subject = record.subject_id(),
                    object = record.object_id(),
                    provider = record.provider(),
                    "Dropping duplicate correspondence"
                );
            }
            _ => {
                best.insert(key, record);
            }
        }
    }

    let mut deduplicated: Vec<Correspondence> = best.into_values().collect();
    deduplicated.sort_by(|a, b| {
        (a.subject_id(), a.object_id(), a.provider()).cmp(&(b.subject_id(), b.object_id(), b.provider()))
    });
    deduplicated
}

fn supersedes(candidate: &Correspondence, existing: &Correspondence) -> bool {
    match candidate.confidence().total_cmp(&existing.confidence()) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            candidate.predicate().cmp_specificity(existing.predicate()) == std::cmp::Ordering::Greater
        }
    }
}

fn load_table(path: &Path, provider_override: Option<&str>) -> Result<Vec<Correspondence>, ParseError> {
    let mut reader = open_table(path)?;
    let headers = reader
        .headers()
        .map_err(|e| ParseError::new(path, Some(1), format!("unreadable header: {}", e)))?
        .clone();
    let layout = ColumnLayout::resolve(&headers, path, provider_override.is_none())?;

    let mut records = Vec::new();
    for row in reader.records() {
        let record = row.map_err(|e| {
            ParseError::new(path, e.position().map(|p| p.line()), format!("malformed row: {}", e))
        })?;
        records.push(parse_row(&record, &layout, provider_override, path)?);
    }

    let raw_count = records.len();
    let records = deduplicate(records);
    info!(
        file = %path.display(),
        rows = raw_count,
        correspondences = records.len(),
        "Loaded correspondence table"
    );
    Ok(records)
}

/// Load a correspondence table, taking each row's provider from its
/// `mapping_provider` column
pub fn load_mappings(path: &Path) -> Result<Vec<Correspondence>, ParseError> {
    load_table(path, None)
}

/// Load a matcher's table, attributing every row to `provider`
///
/// The provider column becomes optional; when present it is ignored so that
/// support is always counted per configured matcher.
pub fn load_as(path: &Path, provider: &str) -> Result<Vec<Correspondence>, ParseError> {
    load_table(path, Some(provider))
}

/// Load a fused export back into `FusedMapping` records
///
/// Per-matcher confidences are not part of the export; each supporting
/// matcher is assigned the consensus confidence so the mean is preserved.
/// Tables without fused columns load as single-supporter mappings.
pub fn load_fused_table(path: &Path) -> Result<Vec<FusedMapping>, ParseError> {
    let mut reader = open_table(path)?;
    let headers = reader
        .headers()
        .map_err(|e| ParseError::new(path, Some(1), format!("unreadable header: {}", e)))?
        .clone();
    let layout = ColumnLayout::resolve(&headers, path, false)?;

    let mut by_pair: BTreeMap<(String, String), FusedMapping> = BTreeMap::new();
    for row in reader.records() {
        let record = row.map_err(|e| {
            ParseError::new(path, e.position().map(|p| p.line()), format!("malformed row: {}", e))
        })?;
        let correspondence = parse_row(&record, &layout, Some(FUSION_PROVIDER), path)?;

        let consensus = match optional_field(&record, layout.consensus) {
            Some(raw) => parse_confidence(raw, &record, path)?,
            None => correspondence.confidence(),
        };
        let supporters: Vec<String> = match optional_field(&record, layout.supporting) {
            Some(raw) => raw
                .split(MATCHER_SEPARATOR)
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec![optional_field(&record, layout.provider)
                .unwrap_or(FUSION_PROVIDER)
                .to_string()],
        };

        let confidences = supporters.into_iter().map(|m| (m, consensus)).collect();
        let mut fused = FusedMapping::new(
            correspondence.subject_id(),
            correspondence.object_id(),
            correspondence.predicate(),
            confidences,
        );
        if let Some(justification) = correspondence.justification() {
            fused = fused.with_justifications(justification.split(MATCHER_SEPARATOR).map(str::trim));
        }

        let key = (correspondence.subject_id().to_string(), correspondence.object_id().to_string());
        by_pair.insert(key, fused);
    }

    info!(file = %path.display(), mappings = by_pair.len(), "Loaded fused table");
    Ok(by_pair.into_values().collect())
}

// ============================================================================
// Writers
// ============================================================================

fn table_writer(path: &Path, header_lines: &[String]) -> AlignResult<csv::Writer<BufWriter<File>>> {
    let mut out = BufWriter::new(File::create(path)?);
    for line in header_lines {
        writeln!(out, "# {}", line)?;
    }
    Ok(WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .from_writer(out))
}

/// Write correspondences in the matcher output format
pub fn write_correspondence_table(path: &Path, records: &[Correspondence]) -> AlignResult<()> {
    let header = vec![format!("total_mappings: {}", records.len())];
    let mut writer = table_writer(path, &header)?;
    writer.write_record(CORRESPONDENCE_COLUMNS)?;

    for record in records {
        writer.write_record([
            record.subject_id(),
            record.predicate().curie().as_str(),
            record.object_id(),
            record.confidence().to_string().as_str(),
            record.provider(),
            record.justification().unwrap_or(""),
        ])?;
    }

    writer.flush()?;
    debug!(file = %path.display(), rows = records.len(), "Wrote correspondence table");
    Ok(())
}

/// Write fused mappings: the correspondence columns plus
/// `consensus_confidence`, `support_count` and `supporting_matchers`
pub fn write_fused_table(path: &Path, mappings: &[FusedMapping]) -> AlignResult<()> {
    let header = vec![
        "Graph-Mesh fused mappings".to_string(),
        format!("mapping_tool: {}", FUSION_PROVIDER),
        "fusion_method: mean consensus over distinct matchers".to_string(),
        format!("total_mappings: {}", mappings.len()),
    ];
    let mut writer = table_writer(path, &header)?;
    writer.write_record(CORRESPONDENCE_COLUMNS.iter().chain(FUSED_EXTRA_COLUMNS.iter()))?;

    let separator = MATCHER_SEPARATOR.to_string();
    for mapping in mappings {
        let consensus = mapping.consensus_confidence().to_string();
        let justifications: Vec<&str> = mapping.justifications().iter().map(String::as_str).collect();
        let matchers: Vec<&str> = mapping.supporting_matchers().iter().map(String::as_str).collect();

        writer.write_record([
            mapping.subject_id(),
            mapping.predicate().curie().as_str(),
            mapping.object_id(),
            consensus.as_str(),
            FUSION_PROVIDER,
            justifications.join(&separator).as_str(),
            consensus.as_str(),
            mapping.support_count().to_string().as_str(),
            matchers.join(&separator).as_str(),
        ])?;
    }

    writer.flush()?;
    info!(file = %path.display(), mappings = mappings.len(), "Wrote fused mapping table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_table(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_basic_table() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "logmap.sssom.tsv",
            "# curie_map: skos\n\
             subject_id\tpredicate_id\tobject_id\tconfidence\tmapping_provider\textra\n\
             ex:S1\tskos:exactMatch\tex:O1\t0.9\tLogMap\tignored\n\
             ex:S2\tcloseMatch\tex:O2\t0.4\tLogMap\tignored\n",
        );

        let records = load_mappings(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].subject_id(), "ex:S1");
        assert_eq!(records[0].predicate(), Predicate::ExactMatch);
        assert_eq!(records[0].provider(), "LogMap");
        assert_eq!(records[1].predicate(), Predicate::CloseMatch);
    }

    #[test]
    fn test_column_aliases() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "aml.tsv",
            "subject\tpredicate\tobject\tsimilarity_score\tmapping_tool\n\
             ex:S1\texactMatch\tex:O1\t0.75\tAML\n",
        );

        let records = load_mappings(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].confidence(), 0.75);
        assert_eq!(records[0].provider(), "AML");
    }

    #[test]
    fn test_missing_column_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "broken.tsv",
            "subject_id\tpredicate_id\tobject_id\tmapping_provider\n\
             ex:S1\texactMatch\tex:O1\tA\n",
        );

        let err = load_mappings(&path).unwrap_err();
        assert!(err.message.contains("confidence"), "unexpected message: {}", err);
    }

    #[test]
    fn test_unparseable_confidence_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "broken.tsv",
            "subject_id\tpredicate_id\tobject_id\tconfidence\tmapping_provider\n\
             ex:S1\texactMatch\tex:O1\thigh\tA\n",
        );

        let err = load_mappings(&path).unwrap_err();
        assert_eq!(err.line, Some(2));
        assert!(err.message.contains("high"));
    }

    #[test]
    fn test_out_of_range_confidence_clamped() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "rounding.tsv",
            "subject_id\tpredicate_id\tobject_id\tconfidence\tmapping_provider\n\
             ex:S1\texactMatch\tex:O1\t1.0000001\tA\n\
             ex:S2\texactMatch\tex:O2\t-0.01\tA\n",
        );

        let records = load_mappings(&path).unwrap();
        assert_eq!(records.len(), 2, "Out-of-range rows must not be dropped");
        assert_eq!(records[0].confidence(), 1.0);
        assert_eq!(records[1].confidence(), 0.0);
    }

    #[test]
    fn test_same_matcher_duplicates_keep_highest() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "dupes.tsv",
            "subject_id\tpredicate_id\tobject_id\tconfidence\tmapping_provider\n\
             S1\texactMatch\tO1\t0.7\tA\n\
             S1\texactMatch\tO1\t0.9\tA\n\
             S1\texactMatch\tO1\t0.8\tB\n",
        );

        let records = load_mappings(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].provider(), "A");
        assert_eq!(records[0].confidence(), 0.9);
        assert_eq!(records[1].provider(), "B");
    }

    #[test]
    fn test_load_as_overrides_provider() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "bertmap.sssom.tsv",
            "subject_id\tpredicate_id\tobject_id\tconfidence\n\
             S1\texactMatch\tO1\t0.6\n",
        );

        assert!(load_mappings(&path).is_err(), "Provider column is required without override");

        let records = load_as(&path, "BERTMap").unwrap();
        assert_eq!(records[0].provider(), "BERTMap");
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let err = load_as(Path::new("/nonexistent/out.sssom.tsv"), "A").unwrap_err();
        assert!(err.message.contains("cannot open"));
    }

    #[test]
    fn test_fused_export_reloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fused.sssom.tsv");

        let mapping = FusedMapping::new(
            "S1",
            "O1",
            Predicate::NarrowMatch,
            BTreeMap::from([("A".to_string(), 0.9), ("B".to_string(), 0.7)]),
        );
        write_fused_table(&path, std::slice::from_ref(&mapping)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Graph-Mesh fused mappings"));
        assert!(content.contains("A|B"));

        let reloaded = load_mappings(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].pair(), ("S1", "O1"));
        assert_eq!(reloaded[0].predicate(), Predicate::NarrowMatch);
        assert_eq!(reloaded[0].provider(), FUSION_PROVIDER);

        let fused = load_fused_table(&path).unwrap();
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].support_count(), 2);
        assert!((fused[0].consensus_confidence() - mapping.consensus_confidence()).abs() < 1e-12);
    }
}
