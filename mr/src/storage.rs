//! Naming and encoding of the files shared between coordinator and workers.
//!
//! Every map task appends to `mr-inter-<partition>`; reduce task `N` reads
//! `mr-inter-N` and writes `mr-out-N`. Intermediate files are JSON Lines and
//! every record is framed by newlines on both sides, so a run that crashed
//! mid-write leaves one undecodable line and later appends start clean.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::task::Attempt;

pub const DEFAULT_WORK_DIR: &str = "mr-tmp";

const INTERMEDIATE_PREFIX: &str = "mr-inter-";
const OUTPUT_PREFIX: &str = "mr-out-";

/// A key/value pair emitted by a map function or produced by a reduce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        KeyValue {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One line of an intermediate file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateRecord {
    pub attempt: Attempt,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Storage { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn intermediate_path(&self, partition: usize) -> PathBuf {
        self.dir.join(format!("{}{}", INTERMEDIATE_PREFIX, partition))
    }

    pub fn output_path_for(&self, partition: usize) -> PathBuf {
        self.dir.join(format!("{}{}", OUTPUT_PREFIX, partition))
    }

    /// Output file for the partition whose intermediate file is `intermediate`.
    /// Paths outside the naming scheme have no output.
    pub fn output_path(&self, intermediate: &Path) -> Option<PathBuf> {
        partition_of(intermediate).map(|p| self.output_path_for(p))
    }

    /// Creates the work directory and deletes intermediate and output files
    /// left behind by an earlier run.
    pub fn purge(&self) -> io::Result<usize> {
        fs::create_dir_all(&self.dir)?;
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(INTERMEDIATE_PREFIX) || name.starts_with(OUTPUT_PREFIX) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        debug!(dir = %self.dir.display(), removed, "purged stale job files");
        Ok(removed)
    }
}

/// Partition index encoded in an intermediate file name.
pub fn partition_of(path: &Path) -> Option<usize> {
    path.file_name()?
        .to_str()?
        .strip_prefix(INTERMEDIATE_PREFIX)?
        .parse()
        .ok()
}

/// Appends `records` to `path`, one `write` per record. The leading newline
/// terminates whatever torn record a crashed writer left at the end.
pub fn append_records(path: &Path, records: &[IntermediateRecord]) -> io::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for record in records {
        let mut line = vec![b'\n'];
        serde_json::to_writer(&mut line, record)?;
        line.push(b'\n');
        file.write_all(&line)?;
    }
    file.sync_data()
}

/// Reads every decodable record in `path`. A missing file is an empty
/// partition.
pub fn read_records(path: &Path) -> io::Result<Vec<IntermediateRecord>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e),
    };

    let mut records = vec![];
    for (line_no, line) in contents.split(|b| *b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        match serde_json::from_slice::<IntermediateRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "skipping undecodable intermediate record"
            ),
        }
    }
    Ok(records)
}

/// Writes `key value` lines to `path`, replacing it atomically.
pub fn write_output(path: &Path, records: &[KeyValue]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut out = io::BufWriter::new(tmp.as_file_mut());
        for kv in records {
            writeln!(out, "{} {}", kv.key, kv.value)?;
        }
        out.flush()?;
    }
    tmp.as_file().sync_data()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Final result of a finished job: the `key value` lines of every
/// partition's output file, merged.
pub fn read_outputs(storage: &Storage, n_reduce: usize) -> io::Result<HashMap<String, String>> {
    let mut result = HashMap::new();
    for partition in 0..n_reduce {
        for line in fs::read_to_string(storage.output_path_for(partition))?.lines() {
            if let Some((key, value)) = line.split_once(' ') {
                result.insert(key.to_string(), value.to_string());
            }
        }
    }
    Ok(result)
}
