//! Reading and writing the append-only JSONL record stream.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::errors::{DahError, Result};
use crate::download::record::MetadataRecord;

/// Line-numbered reader over a record stream. Blank lines are skipped.
pub struct RecordReader<R> {
    lines: io::Lines<R>,
    line: usize,
    origin: PathBuf,
}

impl RecordReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| DahError::io(path, source))?;
        Ok(Self::with_origin(BufReader::new(file), path))
    }
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_origin(reader, Path::new("<stream>"))
    }

    fn with_origin(reader: R, origin: &Path) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
            origin: origin.to_path_buf(),
        }
    }

    /// One-based number of the line most recently read.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<(usize, MetadataRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(source) => return Some(Err(DahError::io(&self.origin, source))),
            };
            self.line += 1;
            if raw.trim().is_empty() {
                continue;
            }
            let line = self.line;
            let parsed = serde_json::from_str::<MetadataRecord>(&raw)
                .map_err(|e| DahError::InvalidRecord {
                    line,
                    details: e.to_string(),
                })
                .and_then(|record| record.validate(line).map(|()| (line, record)));
            return Some(parsed);
        }
    }
}

/// Read a whole stream into memory.
pub fn read_all(path: &Path) -> Result<Vec<MetadataRecord>> {
    RecordReader::open(path)?
        .map(|entry| entry.map(|(_, record)| record))
        .collect()
}

/// Buffered JSONL writer. Each record is serialized to one line.
pub struct RecordWriter<W: Write> {
    out: BufWriter<W>,
    written: usize,
}

impl RecordWriter<File> {
    /// Create (truncating) the stream at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|source| DahError::io(path, source))?;
        Ok(Self::new(file))
    }

    /// Open the stream at `path` for appending.
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| DahError::io(path, source))?;
        Ok(Self::new(file))
    }

    /// Flush and fsync so a crash after this point cannot lose written records.
    pub fn sync(&mut self) -> Result<()> {
        self.flush()?;
        self.out
            .get_ref()
            .sync_data()
            .map_err(|source| DahError::io("<record stream>", source))
    }
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            out: BufWriter::new(inner),
            written: 0,
        }
    }

    pub fn write(&mut self, record: &MetadataRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.out
            .write_all(&line)
            .map_err(|source| DahError::io("<record stream>", source))?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.out
            .flush()
            .map_err(|source| DahError::io("<record stream>", source))
    }

    pub fn records_written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> Result<W> {
        self.out
            .into_inner()
            .map_err(|e| DahError::io("<record stream>", e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::pager::PagePosition;

    fn record(id: &str) -> MetadataRecord {
        MetadataRecord {
            id: id.to_string(),
            name: Some(format!("{id}.bin")),
            parents: vec!["root".to_string()],
            size: Some(3),
            md5_checksum: None,
            trashed: false,
            mime_type: None,
            permissions: vec![],
            error: None,
            batch_info: PagePosition {
                next_page_token: None,
                item_index: 0,
                num_items: 1,
            },
        }
    }

    #[test]
    fn written_stream_reads_back_with_line_numbers() {
        let mut writer = RecordWriter::new(Vec::new());
        writer.write(&record("a")).unwrap();
        writer.write(&record("b")).unwrap();
        assert_eq!(writer.records_written(), 2);
        let bytes = writer.into_inner().unwrap();

        let entries: Vec<_> = RecordReader::new(bytes.as_slice())
            .map(Result::unwrap)
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].0, 2);
        assert_eq!(entries[1].1.id, "b");
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let input = "{\"id\":\"a\"}\n\nnot json\n";
        let results: Vec<_> = RecordReader::new(input.as_bytes()).collect();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(DahError::InvalidRecord { line, .. }) => assert_eq!(*line, 3),
            other => panic!("expected InvalidRecord, got {other:?}"),
        }
    }

    #[test]
    fn invalid_record_fails_validation_on_read() {
        let input = "{\"id\":\"a\",\"parents\":[\"a\"]}\n";
        let err = RecordReader::new(input.as_bytes())
            .next()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.code(), "DAH-2001");
    }

    #[test]
    fn file_round_trip_with_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drive.jsonl");
        let mut w = RecordWriter::create(&path).unwrap();
        w.write(&record("a")).unwrap();
        w.sync().unwrap();
        drop(w);
        let mut w = RecordWriter::append(&path).unwrap();
        w.write(&record("b")).unwrap();
        w.sync().unwrap();

        let ids: Vec<String> = read_all(&path).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
