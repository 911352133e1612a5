//! Archive sinks for messages evicted from channel stores.
//!
//! Cleanup hands every evicted message to an [`ArchiveSink`] as a textual
//! record plus the eviction round. Three sinks are provided:
//! - [`MemoryArchive`]: buffered records, drained by the caller
//! - [`LogArchive`]: `trace!` lines of the form `[host] <record> deleted at: <round>`
//! - [`FileArchive`]: one `node_<id>` file per host in an output directory
//!
//! Archived text can be turned back into records with [`parse_record`],
//! [`parse_log_line`] and [`read_archive_dir`].

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Local};
use log::{error, trace, warn};

use super::types::{HostId, Message, MessageParseError, Round};

const DELETED_AT: &str = " deleted at: ";
const FILE_PREFIX: &str = "node_";

/// Receives messages that cleanup evicted.
pub trait ArchiveSink {
    /// Store one record. Sinks must not fail the simulation; I/O problems
    /// are kept and reported by [`ArchiveSink::flush`].
    fn archive(&mut self, host: HostId, round: Round, record: &str);

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One evicted message as seen by a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedRecord {
    /// Host whose store held the message.
    pub host: HostId,
    /// Round of the eviction.
    pub round: Round,
    pub record: String,
}

impl ArchivedRecord {
    /// Rebuild the archived message.
    pub fn message(&self) -> Result<Message, MessageParseError> {
        self.record.parse()
    }
}

/// Text line written by the log and file sinks.
pub fn format_line(record: &str, round: Round) -> String {
    format!("{}{}{}", record, DELETED_AT, round)
}

/// Parse `<record> deleted at: <round>` for the given host.
pub fn parse_record(host: HostId, line: &str) -> Option<ArchivedRecord> {
    let (record, round) = line.trim_end().rsplit_once(DELETED_AT)?;
    Some(ArchivedRecord {
        host,
        round: round.trim().parse().ok()?,
        record: record.to_string(),
    })
}

/// Extract the host ID from a line with format `[N] ...`.
/// Returns (host_id, remaining_line) if successful.
fn extract_host_id(line: &str) -> Option<(HostId, &str)> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('[') {
        return None;
    }

    let end_bracket = trimmed.find(']')?;
    let host_id: HostId = trimmed[1..end_bracket].parse().ok()?;
    Some((host_id, trimmed[end_bracket + 1..].trim_start()))
}

/// Parse a line emitted by [`LogArchive`].
pub fn parse_log_line(line: &str) -> Option<ArchivedRecord> {
    let (host, rest) = extract_host_id(line)?;
    parse_record(host, rest)
}

/// In-memory sink. With a capacity, the oldest records are dropped first.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    records: VecDeque<ArchivedRecord>,
    capacity: Option<usize>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ArchivedRecord> {
        self.records.iter()
    }

    /// Drain all buffered records.
    pub fn drain(&mut self) -> Vec<ArchivedRecord> {
        self.records.drain(..).collect()
    }
}

impl ArchiveSink for MemoryArchive {
    fn archive(&mut self, host: HostId, round: Round, record: &str) {
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return;
            }
            if self.records.len() >= capacity {
                self.records.pop_front();
            }
        }
        self.records.push_back(ArchivedRecord {
            host,
            round,
            record: record.to_string(),
        });
    }
}

/// Sink writing through the `log` facade at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogArchive;

impl ArchiveSink for LogArchive {
    fn archive(&mut self, host: HostId, round: Round, record: &str) {
        trace!("[{}] {}", host, format_line(record, round));
    }
}

/// Per-host archive files in one output directory.
pub struct FileArchive {
    dir: PathBuf,
    started: DateTime<Local>,
    writers: HashMap<HostId, BufWriter<File>>,
    failed_hosts: Vec<HostId>,
    last_error: Option<anyhow::Error>,
}

impl FileArchive {
    /// Create the output directory. Existing archive files of the same
    /// hosts are replaced when they are first written.
    pub fn create(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create archive directory: {}", dir.display()))?;
        Ok(Self {
            dir,
            started: Local::now(),
            writers: HashMap::new(),
            failed_hosts: Vec::new(),
            last_error: None,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, host: HostId) -> PathBuf {
        self.dir.join(format!("{}{}", FILE_PREFIX, host))
    }

    fn writer(&mut self, host: HostId) -> anyhow::Result<&mut BufWriter<File>> {
        if !self.writers.contains_key(&host) {
            let path = self.file_path(host);
            let file = File::create(&path).with_context(|| format!("Failed to create archive file: {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            writeln!(writer, "# host {} archive, run started {}", host, self.started.to_rfc3339())
                .with_context(|| format!("Failed to write archive header: {}", path.display()))?;
            self.writers.insert(host, writer);
        }
        self.writers
            .get_mut(&host)
            .ok_or_else(|| anyhow!("archive writer for host {} missing", host))
    }

    fn record_error(&mut self, host: HostId, err: anyhow::Error) {
        // Report each broken host once; later records for it are dropped silently.
        if !self.failed_hosts.contains(&host) {
            error!("[{}] archive write failed: {:#}", host, err);
            self.failed_hosts.push(host);
        }
        self.last_error = Some(err);
    }
}

impl ArchiveSink for FileArchive {
    fn archive(&mut self, host: HostId, round: Round, record: &str) {
        if self.failed_hosts.contains(&host) {
            return;
        }
        let result = self
            .writer(host)
            .and_then(|writer| writeln!(writer, "{}", format_line(record, round)).context("Failed to append archive record"));
        if let Err(err) = result {
            self.record_error(host, err);
        }
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        for (host, writer) in self.writers.iter_mut() {
            writer.flush().with_context(|| format!("Failed to flush archive of host {}", host))?;
        }
        match self.last_error.take() {
            Some(err) => Err(err.context("archive sink had write failures")),
            None => Ok(()),
        }
    }
}

impl Drop for FileArchive {
    fn drop(&mut self) {
        for (host, writer) in self.writers.iter_mut() {
            if let Err(err) = writer.flush() {
                warn!("[{}] archive flush on drop failed: {}", host, err);
            }
        }
    }
}

/// Host id from an archive file name (`node_<id>`).
pub fn host_id_from_file_name(name: &str) -> Option<HostId> {
    name.strip_prefix(FILE_PREFIX)?.parse().ok()
}

/// Read every archive file written by [`FileArchive`] in `dir`.
///
/// Records come back ordered by host, then in file order. Header lines
/// are skipped. Malformed lines are logged and skipped.
pub fn read_archive_dir(dir: impl AsRef<Path>) -> anyhow::Result<Vec<ArchivedRecord>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read archive directory: {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(host) = name.to_str().and_then(host_id_from_file_name) {
            files.push((host, entry.path()));
        }
    }
    files.sort_by_key(|(host, _)| *host);

    let mut records = Vec::new();
    for (host, path) in files {
        let data = fs::read_to_string(&path).with_context(|| format!("Failed to read file: {}", path.display()))?;
        for (line_no, line) in data.lines().enumerate() {
            // Records start with `#<id>`, the header with `# `
            if line.is_empty() || line.starts_with("# ") {
                continue;
            }
            match parse_record(host, line) {
                Some(record) => records.push(record),
                None => warn!("{}:{}: skipping malformed archive line", path.display(), line_no + 1),
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::Payload;
    use crate::simulation::types::Destination;

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("wireless-mac-archive-{}-{}-{}", name, std::process::id(), nanos))
    }

    fn sample(id: u64) -> Message {
        let mut m = Message::new(1, Destination::Host(0), 10, 15, Payload::Text("hello world".to_string()));
        m.id = id;
        m
    }

    #[test]
    fn test_extract_host_id() {
        assert_eq!(extract_host_id("[49] #1 0..5"), Some((49, "#1 0..5")));
        assert_eq!(extract_host_id("[123] "), Some((123, "")));
        assert_eq!(extract_host_id("No bracket"), None);
        assert_eq!(extract_host_id("[abc] Not a number"), None);
    }

    #[test]
    fn log_lines_round_trip_through_the_parser() {
        let line = format!("[3] {}", format_line(&sample(7).to_string(), 42));
        let record = parse_log_line(&line).unwrap();
        assert_eq!(record.host, 3);
        assert_eq!(record.round, 42);
        assert_eq!(record.message().unwrap(), sample(7));
        assert!(parse_record(0, "garbage").is_none());
    }

    #[test]
    fn memory_archive_drains_and_bounds() {
        let mut archive = MemoryArchive::with_capacity(2);
        for round in 0..3 {
            archive.archive(1, round, "x");
        }
        let drained = archive.drain();
        assert_eq!(drained.iter().map(|r| r.round).collect::<Vec<_>>(), vec![1, 2]);
        assert!(archive.is_empty());

        let mut unbounded = MemoryArchive::new();
        unbounded.archive(4, 9, "y");
        assert_eq!(unbounded.len(), 1);
        assert!(unbounded.flush().is_ok());
    }

    #[test]
    fn file_archive_writes_one_file_per_host() {
        let dir = scratch_dir("files");
        {
            let mut archive = FileArchive::create(&dir).unwrap();
            archive.archive(2, 30, &sample(1).to_string());
            archive.archive(0, 31, &sample(2).to_string());
            archive.archive(2, 35, &sample(3).to_string());
            archive.flush().unwrap();

            let header = fs::read_to_string(archive.file_path(2)).unwrap();
            assert!(header.starts_with("# host 2 archive, run started "));
        }

        let records = read_archive_dir(&dir).unwrap();
        let summary: Vec<(HostId, Round, u64)> = records
            .iter()
            .map(|r| (r.host, r.round, r.message().unwrap().id))
            .collect();
        assert_eq!(summary, vec![(0, 31, 2), (2, 30, 1), (2, 35, 3)]);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_archive_dir_is_an_error() {
        assert!(read_archive_dir(scratch_dir("missing")).is_err());
        assert_eq!(host_id_from_file_name("node_12"), Some(12));
        assert_eq!(host_id_from_file_name("notes.txt"), None);
    }
}
