use crate::error::EvalError;
use crate::models::EvalItem;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub type Record = Map<String, Value>;

/// Why a buffered record was dropped
#[derive(Debug, Error)]
pub enum RecordParseError {
    #[error("invalid JSON in record ending at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("record ending at line {line} is not a JSON object")]
    NotAnObject { line: usize },
}

/// Lazy, non-restartable iterator over the records of a dataset stream.
///
/// Objects may span several lines and carry a trailing comma before the
/// closing brace. Lines are grouped by brace depth and every object that
/// parses after comma repair is yielded; the rest are dropped.
pub struct RecordReader<R> {
    reader: R,
    buffer: Vec<String>,
    depth: i64,
    line_no: usize,
    /// The buffered record contains bytes that are not valid UTF-8
    poisoned: bool,
    finished: bool,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            depth: 0,
            line_no: 0,
            poisoned: false,
            finished: false,
        }
    }

    /// Next raw line without its terminator. `Ok(None)` at end of stream.
    fn read_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut raw = Vec::new();
        if self.reader.read_until(b'\n', &mut raw)? == 0 {
            return Ok(None);
        }
        if raw.last() == Some(&b'\n') {
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
        }
        Ok(Some(raw))
    }

    fn decode_line(&mut self, raw: Vec<u8>) -> String {
        match String::from_utf8(raw) {
            Ok(line) => line,
            Err(err) => {
                debug!(line = self.line_no, "invalid UTF-8, dropping the enclosing record");
                self.poisoned = true;
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
        }
    }

    fn discard_buffer(&mut self) {
        self.buffer.clear();
        self.depth = 0;
        self.poisoned = false;
    }

    /// Parse and clear the buffered lines
    fn take_record(&mut self) -> Option<Record> {
        let lines = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.poisoned) {
            return None;
        }
        if lines.iter().all(|line| line.trim().is_empty()) {
            return None;
        }

        match parse_record(&lines, self.line_no) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!(error = %err, "dropping unparseable record");
                None
            }
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        while !self.finished {
            match self.read_line() {
                Ok(Some(raw)) => {
                    self.line_no += 1;
                    let line = self.decode_line(raw);
                    self.depth += brace_delta(&line);
                    self.buffer.push(line);

                    if self.depth < 0 {
                        debug!(line = self.line_no, "unbalanced closing brace, discarding buffer");
                        self.discard_buffer();
                        continue;
                    }

                    if self.depth == 0 {
                        if let Some(record) = self.take_record() {
                            return Some(record);
                        }
                    }
                }
                Ok(None) => self.finished = true,
                Err(err) => {
                    warn!(line = self.line_no + 1, error = %err, "stopping dataset read");
                    self.finished = true;
                }
            }
        }

        if self.buffer.is_empty() {
            None
        } else {
            self.take_record()
        }
    }
}

fn brace_delta(line: &str) -> i64 {
    line.chars().fold(0, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

/// Remove a comma that directly precedes a `}` ending the line
fn strip_comma_before_closing_brace(line: &str) -> String {
    let trimmed = line.trim_end();
    let Some(body) = trimmed.strip_suffix('}') else {
        return line.to_string();
    };

    match body.trim_end().strip_suffix(',') {
        Some(head) => format!("{}}}", head),
        None => line.to_string(),
    }
}

/// Apply the trailing-comma repairs to a buffered record
pub fn repair_record(lines: &[String]) -> String {
    let mut repaired: Vec<String> = lines
        .iter()
        .map(|line| strip_comma_before_closing_brace(line))
        .collect();

    // comma at the end of one line, closing brace opening the next non-blank one
    for i in 0..repaired.len() {
        if !repaired[i].trim_end().ends_with(',') {
            continue;
        }
        let closes = repaired[i + 1..]
            .iter()
            .find(|line| !line.trim().is_empty())
            .is_some_and(|line| line.trim_start().starts_with('}'));
        if closes {
            let trimmed = repaired[i].trim_end();
            let kept = trimmed[..trimmed.len() - 1].to_string();
            repaired[i] = kept;
        }
    }

    repaired.join("\n")
}

fn parse_record(lines: &[String], line: usize) -> Result<Record, RecordParseError> {
    let text = repair_record(lines);
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(_) => Err(RecordParseError::NotAnObject { line }),
        Err(source) => Err(RecordParseError::Json { line, source }),
    }
}

fn field_string(record: &Record, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl EvalItem {
    /// Normalize a raw record; missing fields become empty strings
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: field_string(record, "id"),
            company: field_string(record, "company"),
            question: field_string(record, "question"),
            expected_answer: field_string(record, "expected_answer"),
        }
    }
}

/// Stream evaluation items out of a dataset reader
pub fn read_items<R: BufRead>(reader: R) -> impl Iterator<Item = EvalItem> {
    RecordReader::new(reader).map(|record| EvalItem::from_record(&record))
}

fn open_dataset(path: &Path) -> Result<BufReader<File>, EvalError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| EvalError::DatasetRead {
            path: path.to_path_buf(),
            source,
        })
}

fn ensure_datasets_exist(paths: &[PathBuf]) -> Result<(), EvalError> {
    if paths.is_empty() {
        return Err(EvalError::NoDatasets);
    }
    for path in paths {
        if !path.exists() {
            warn!(path = %path.display(), "dataset not found");
            return Err(EvalError::DatasetNotFound { path: path.clone() });
        }
    }
    Ok(())
}

/// Load the items of every named dataset, in order
pub fn load_eval_items(paths: &[PathBuf]) -> Result<Vec<EvalItem>, EvalError> {
    ensure_datasets_exist(paths)?;

    let mut items = Vec::new();
    for path in paths {
        let before = items.len();
        items.extend(read_items(open_dataset(path)?));
        info!(path = %path.display(), items = items.len() - before, "loaded dataset");
    }

    info!(total = items.len(), "evaluation items loaded");
    Ok(items)
}

/// Identifier reported for a set of datasets: file stems joined by `+`
pub fn dataset_identifier(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string())
        })
        .collect::<Vec<_>>()
        .join("+")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetStatus {
    Ok,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub path: String,
    pub status: DatasetStatus,
    pub item_count: usize,
    pub companies: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub datasets: Vec<DatasetSummary>,
    pub total_items: usize,
    pub total_companies: usize,
}

/// Count items and distinct companies per dataset and across all of them.
/// A missing dataset is reported as not found without affecting the others.
pub fn dataset_stats(paths: &[PathBuf]) -> Result<DatasetStats, EvalError> {
    if paths.is_empty() {
        return Err(EvalError::NoDatasets);
    }

    let mut datasets = Vec::with_capacity(paths.len());
    let mut all_companies = BTreeSet::new();
    let mut total_items = 0;

    for path in paths {
        if !path.exists() {
            warn!(path = %path.display(), "dataset not found");
            datasets.push(DatasetSummary {
                path: path.display().to_string(),
                status: DatasetStatus::NotFound,
                item_count: 0,
                companies: Vec::new(),
            });
            continue;
        }

        let mut companies = BTreeSet::new();
        let mut item_count = 0;
        for item in read_items(open_dataset(path)?) {
            item_count += 1;
            if !item.company.is_empty() {
                companies.insert(item.company);
            }
        }
        total_items += item_count;
        all_companies.extend(companies.iter().cloned());
        datasets.push(DatasetSummary {
            path: path.display().to_string(),
            status: DatasetStatus::Ok,
            item_count,
            companies: companies.into_iter().collect(),
        });
    }

    Ok(DatasetStats {
        datasets,
        total_items,
        total_companies: all_companies.len(),
    })
}
