// SPDX-License-Identifier: Apache-2.0

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Bytes read from the file per syscall.
const CHUNK_SIZE: usize = 8 * 1024;

/// Soft per-file rate limit: after every 100 lines the scan pauses so that
/// at least 100 microseconds have elapsed per line.
const PACE_EVERY_LINES: usize = 100;
const PACE_PER_LINE: Duration = Duration::from_micros(100);

/// One log file under active observation.
///
/// Two positions are tracked. `offset` is the durable one: it always points
/// just past the last fully consumed line and is what the position store
/// persists. `read_pos` runs ahead of it by the raw bytes of the current
/// partial line, which is held in memory until its newline arrives.
pub struct TailedFile {
    path: PathBuf,
    file: File,
    offset: u64,
    read_pos: u64,
    partial: Vec<u8>,
    spec_idx: usize,
    consecutive_failures: u32,
}

/// Result of one scan pass over a file.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub lines: Vec<String>,
    /// True when the scan stopped at the per-scan line cap rather than EOF.
    pub hit_line_cap: bool,
}

impl TailedFile {
    pub fn open(path: &Path, offset: u64, spec_idx: usize) -> io::Result<Self> {
        let file = File::open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset,
            read_pos: offset,
            partial: Vec::new(),
            spec_idx,
            consecutive_failures: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The durable offset: just past the last fully consumed line.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn spec_idx(&self) -> usize {
        self.spec_idx
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    pub fn clear_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn file_size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Read newly appended complete lines, up to `max_lines`.
    ///
    /// Lines are split on `\n`; `\r` bytes are dropped. Bytes after the last
    /// newline stay in the partial buffer. A held partial line is emitted as
    /// a final line only when a later scan finds the file still ended exactly
    /// where the partial left off (a file written without a trailing
    /// newline); if new bytes arrived first, they complete it instead.
    pub fn read_lines(&mut self, max_lines: usize) -> io::Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();

        let size = self.file_size()?;
        if size < self.read_pos {
            // Shrunk underneath us, rotation handling will re-register it.
            return Ok(outcome);
        }

        if size == self.read_pos {
            if !self.partial.is_empty() {
                // Still at EOF since the partial was buffered: the file ends
                // without a trailing newline, flush it as the final line.
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                self.offset = self.read_pos;
                if !line.is_empty() {
                    outcome.lines.push(line);
                }
            }
            return Ok(outcome);
        }

        self.file.seek(SeekFrom::Start(self.read_pos))?;

        let started = Instant::now();
        let mut chunk = [0u8; CHUNK_SIZE];

        'read: while outcome.lines.len() < max_lines {
            let n = self.file.read(&mut chunk)?;
            if n == 0 {
                break;
            }

            for &b in &chunk[..n] {
                self.read_pos += 1;

                if b == b'\n' {
                    let line = String::from_utf8_lossy(&self.partial).into_owned();
                    self.partial.clear();
                    self.offset = self.read_pos;

                    if !line.is_empty() {
                        outcome.lines.push(line);
                    }

                    if outcome.lines.len() >= max_lines {
                        outcome.hit_line_cap = true;
                        break 'read;
                    }
                } else if b != b'\r' {
                    self.partial.push(b);
                }
            }

            if !outcome.lines.is_empty() && outcome.lines.len() % PACE_EVERY_LINES == 0 {
                let expected = PACE_PER_LINE * outcome.lines.len() as u32;
                let elapsed = started.elapsed();
                if elapsed < expected {
                    std::thread::sleep(expected - elapsed);
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, data: &str) {
        let mut f = fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(data.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    #[test]
    fn cold_start_small_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "A\nB\nC\n").unwrap();

        let mut tf = TailedFile::open(&path, 0, 0).unwrap();
        let out = tf.read_lines(1000).unwrap();

        assert_eq!(out.lines, vec!["A", "B", "C"]);
        assert_eq!(tf.offset(), 6);
    }

    #[test]
    fn resume_from_stored_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "A\nB\nC\n").unwrap();

        // Prior run persisted offset 6; two new lines appended.
        append(&path, "D\nE\n");

        let mut tf = TailedFile::open(&path, 6, 0).unwrap();
        let out = tf.read_lines(1000).unwrap();

        assert_eq!(out.lines, vec!["D", "E"]);
        assert_eq!(tf.offset(), 10);
    }

    #[test]
    fn partial_line_completed_by_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "X\nY").unwrap();

        let mut tf = TailedFile::open(&path, 0, 0).unwrap();

        let out = tf.read_lines(1000).unwrap();
        assert_eq!(out.lines, vec!["X"]);
        assert_eq!(tf.offset(), 2); // partial Y not reflected in the offset

        append(&path, "Z\n");

        let out = tf.read_lines(1000).unwrap();
        assert_eq!(out.lines, vec!["YZ"]);
        assert_eq!(tf.offset(), 5);
    }

    #[test]
    fn partial_line_flushed_when_eof_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "X\nY").unwrap();

        let mut tf = TailedFile::open(&path, 0, 0).unwrap();

        let out = tf.read_lines(1000).unwrap();
        assert_eq!(out.lines, vec!["X"]);

        // No growth between scans: the partial is the file's last line.
        let out = tf.read_lines(1000).unwrap();
        assert_eq!(out.lines, vec!["Y"]);
        assert_eq!(tf.offset(), 3);
    }

    #[test]
    fn carriage_returns_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "one\r\ntwo\r\n").unwrap();

        let mut tf = TailedFile::open(&path, 0, 0).unwrap();
        let out = tf.read_lines(1000).unwrap();

        assert_eq!(out.lines, vec!["one", "two"]);
        assert_eq!(tf.offset(), 10);
    }

    #[test]
    fn line_cap_resumes_next_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        let mut content = String::new();
        for i in 0..10 {
            content.push_str(&format!("line-{}\n", i));
        }
        fs::write(&path, &content).unwrap();

        let mut tf = TailedFile::open(&path, 0, 0).unwrap();

        let out = tf.read_lines(4).unwrap();
        assert_eq!(out.lines.len(), 4);
        assert!(out.hit_line_cap);

        let out = tf.read_lines(1000).unwrap();
        assert_eq!(out.lines.len(), 6);
        assert_eq!(out.lines[0], "line-4");
        assert!(!out.hit_line_cap);
        assert_eq!(tf.offset(), content.len() as u64);
    }

    #[test]
    fn no_growth_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "A\n").unwrap();

        let mut tf = TailedFile::open(&path, 0, 0).unwrap();
        assert_eq!(tf.read_lines(1000).unwrap().lines, vec!["A"]);
        assert!(tf.read_lines(1000).unwrap().lines.is_empty());
        assert_eq!(tf.offset(), 2);
    }

    #[test]
    fn empty_lines_advance_offset_without_emitting() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "A\n\n\nB\n").unwrap();

        let mut tf = TailedFile::open(&path, 0, 0).unwrap();
        let out = tf.read_lines(1000).unwrap();

        assert_eq!(out.lines, vec!["A", "B"]);
        assert_eq!(tf.offset(), 6);
    }

    #[test]
    fn failure_counter() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        fs::write(&path, "A\n").unwrap();

        let mut tf = TailedFile::open(&path, 0, 0).unwrap();
        assert_eq!(tf.record_failure(), 1);
        assert_eq!(tf.record_failure(), 2);
        tf.clear_failures();
        assert_eq!(tf.record_failure(), 1);
    }
}
