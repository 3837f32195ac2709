use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::OutputMode;
use crate::error::{Result, ScrapeError};
use crate::record::{KeyRule, Record};

/// Collects records for one target, drops repeats by natural key and
/// writes the survivors to a CSV file on `flush`.
pub struct DedupSink {
    path: PathBuf,
    columns: Vec<&'static str>,
    mode: OutputMode,
    seen: HashSet<String>,
    records: Vec<Record>,
    /// How many of `records` are already on disk.
    flushed: usize,
    /// Rows already on disk before this run, append mode only.
    existing_rows: usize,
    admitted: usize,
    duplicates: usize,
}

impl DedupSink {
    /// In append mode, keys of rows already in `path` count as seen.
    pub fn open(
        path: impl Into<PathBuf>,
        columns: &[&'static str],
        key_rule: KeyRule,
        mode: OutputMode,
    ) -> Result<Self> {
        let path = path.into();
        let mut sink = DedupSink {
            path,
            columns: columns.to_vec(),
            mode,
            seen: HashSet::new(),
            records: Vec::new(),
            flushed: 0,
            existing_rows: 0,
            admitted: 0,
            duplicates: 0,
        };
        let has_rows = fs::metadata(&sink.path).map(|m| m.len() > 0).unwrap_or(false);
        if mode == OutputMode::Append && has_rows {
            sink.load_existing(key_rule)?;
        }
        Ok(sink)
    }

    fn load_existing(&mut self, key_rule: KeyRule) -> Result<()> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let headers = reader.headers()?.clone();
        if headers.iter().ne(self.columns.iter().copied()) {
            return Err(ScrapeError::Config(format!(
                "{} has columns {:?}, expected {:?}",
                self.path.display(),
                headers.iter().collect::<Vec<_>>(),
                self.columns
            )));
        }
        for row in reader.records() {
            let row = row?;
            let fields: BTreeMap<String, String> = headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect();
            if let Some(key) = key_rule.derive(&fields) {
                self.seen.insert(key);
            }
            self.existing_rows += 1;
        }
        info!(
            path = %self.path.display(),
            rows = self.existing_rows,
            keys = self.seen.len(),
            "Loaded existing output"
        );
        Ok(())
    }

    /// True if the record is new for this run (and, in append mode, the file).
    pub fn offer(&mut self, record: Record) -> bool {
        if self.seen.insert(record.key().to_string()) {
            self.records.push(record);
            self.admitted += 1;
            true
        } else {
            debug!(key = record.key(), "duplicate dropped");
            self.duplicates += 1;
            false
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn admitted(&self) -> usize {
        self.admitted
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write admitted rows and fsync. Returns the number of rows written.
    pub fn flush(&mut self) -> Result<usize> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let written = match self.mode {
            OutputMode::Overwrite => self.write_replacing()?,
            OutputMode::Append => self.write_appending()?,
        };
        self.flushed = self.records.len();
        info!(path = %self.path.display(), rows = written, mode = %self.mode, "Output flushed");
        Ok(written)
    }

    /// Whole file via a temp file and rename, so readers never see half a run.
    fn write_replacing(&self) -> Result<usize> {
        let tmp = self.path.with_extension("csv.tmp");
        let file = self.write_rows(File::create(&tmp)?, true, &self.records)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        sync_parent(&self.path)?;
        Ok(self.records.len())
    }

    fn write_appending(&self) -> Result<usize> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;
        let fresh = &self.records[self.flushed..];
        let file = self.write_rows(file, needs_header, fresh)?;
        file.sync_all()?;
        Ok(fresh.len())
    }

    fn write_rows(&self, file: File, header: bool, records: &[Record]) -> Result<File> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if header {
            writer.write_record(&self.columns)?;
        }
        for record in records {
            writer.write_record(record.row(&self.columns))?;
        }
        writer.flush()?;
        let mut file = writer
            .into_inner()
            .map_err(|e| ScrapeError::Io(e.into_error()))?;
        file.flush()?;
        Ok(file)
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<()> {
    Ok(())
}
