//! Forward-only, batched reading of gzip-compressed CSV readings.

use crate::error::{Error, Result};
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::iter::FusedIterator;
use std::path::Path;

/// Rows per batch unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Upper bound for the up-front allocation of a batch.
const PREALLOC_ROWS: usize = 64 * 1024;

const REQUIRED_COLUMNS: [&str; 5] = ["asset", "date", "time", "variable", "value"];

/// A single row of the long-format input.
#[derive(Debug, Clone, Deserialize)]
pub struct RawReading {
    pub asset: String,
    pub date: String,
    pub time: String,
    pub variable: String,
    pub value: Option<String>,

    /// Line in the source file, for error reporting.
    #[serde(skip)]
    pub line: u64,
}

/// A bounded slice of the input, in source order.
#[derive(Debug)]
pub struct Batch {
    pub index: usize,
    pub rows: Vec<RawReading>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Yields [`Batch`]es of at most `chunk_size` rows.
///
/// The reader cannot be rewound. It stops for good after the last row or
/// after the first error.
pub struct ChunkedReader<R: Read> {
    reader: csv::Reader<R>,
    headers: csv::StringRecord,
    chunk_size: usize,
    next_index: usize,
    done: bool,
}

impl ChunkedReader<MultiGzDecoder<BufReader<File>>> {
    /// Opens a gzip-compressed CSV file.
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(MultiGzDecoder::new(BufReader::new(file)), chunk_size)
    }
}

impl<R: Read> ChunkedReader<R> {
    /// Wraps an uncompressed CSV source and validates its header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Row`] if `chunk_size` is zero or a required column is
    /// missing from the header.
    pub fn new(source: R, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Row("chunk size must be at least one row".into()));
        }

        let mut reader = csv::Reader::from_reader(source);
        let headers = reader.headers()?.clone();

        if let Some(missing) = REQUIRED_COLUMNS
            .into_iter()
            .find(|column| !headers.iter().any(|h| h == *column))
        {
            return Err(Error::Row(format!("missing required column `{missing}`")));
        }

        Ok(Self {
            reader,
            headers,
            chunk_size,
            next_index: 0,
            done: false,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn read_rows(&mut self) -> Result<Vec<RawReading>> {
        let mut rows = Vec::with_capacity(self.chunk_size.min(PREALLOC_ROWS));
        let mut record = csv::StringRecord::new();

        while rows.len() < self.chunk_size {
            if !self.reader.read_record(&mut record)? {
                self.done = true;
                break;
            }

            let mut row: RawReading = record.deserialize(Some(&self.headers))?;
            row.line = record.position().map_or(0, csv::Position::line);
            rows.push(row);
        }

        Ok(rows)
    }
}

impl<R: Read> Iterator for ChunkedReader<R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rows = match self.read_rows() {
            Ok(rows) => rows,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };

        if rows.is_empty() {
            return None;
        }

        let batch = Batch {
            index: self.next_index,
            rows,
        };
        self.next_index += 1;

        Some(Ok(batch))
    }
}

impl<R: Read> FusedIterator for ChunkedReader<R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn csv_with_rows(n: usize) -> String {
        let mut s = String::from("asset,date,time,variable,value\n");
        for i in 0..n {
            s.push_str(&format!("T01,2015-05-01,00:{:02},v1,{i}\n", i % 60));
        }
        s
    }

    #[test]
    fn test_batches_cover_every_row_once() {
        let data = csv_with_rows(10);
        let reader = ChunkedReader::new(data.as_bytes(), 4).unwrap();

        let batches: Vec<Batch> = reader.map(|b| b.unwrap()).collect();

        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(Batch::len).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert_eq!(
            batches.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let values: Vec<String> = batches
            .iter()
            .flat_map(|b| b.rows.iter())
            .map(|r| r.value.clone().unwrap())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_tail() {
        let data = csv_with_rows(8);
        let reader = ChunkedReader::new(data.as_bytes(), 4).unwrap();
        assert_eq!(reader.count(), 2);
    }

    #[test]
    fn test_header_only_yields_nothing() {
        let data = csv_with_rows(0);
        let mut reader = ChunkedReader::new(data.as_bytes(), 4).unwrap();
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_line_numbers_and_extra_columns() {
        let data = "id,asset,date,time,variable,value,quality\n\
                    1,T01,2015-05-01,00:00:30,v1,1.5,good\n\
                    2,T01,2015-05-01,00:01:00,v2,,bad\n";
        let mut reader = ChunkedReader::new(data.as_bytes(), 10).unwrap();
        let batch = reader.next().unwrap().unwrap();

        assert_eq!(batch.rows[0].line, 2);
        assert_eq!(batch.rows[0].time, "00:00:30");
        assert_eq!(batch.rows[0].value.as_deref(), Some("1.5"));
        assert_eq!(batch.rows[1].line, 3);
        assert_eq!(batch.rows[1].value, None);
    }

    #[test]
    fn test_missing_column_rejected() {
        let data = "asset,date,time,value\nT01,2015-05-01,00:00,1\n";
        let err = ChunkedReader::new(data.as_bytes(), 10).err().unwrap();
        assert!(matches!(err, Error::Row(ref m) if m.contains("variable")));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let data = csv_with_rows(1);
        assert!(ChunkedReader::new(data.as_bytes(), 0).is_err());
    }

    #[test]
    fn test_malformed_row_stops_reader() {
        let data = "asset,date,time,variable,value\n\
                    T01,2015-05-01,00:00,v1,1\n\
                    T01,2015-05-01\n\
                    T01,2015-05-01,00:02,v1,3\n";
        let mut reader = ChunkedReader::new(data.as_bytes(), 10).unwrap();

        assert!(matches!(reader.next(), Some(Err(Error::Row(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_open_gzipped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.csv.gz");

        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(csv_with_rows(5).as_bytes()).unwrap();
        encoder.finish().unwrap();

        let reader = ChunkedReader::open(&path, 2).unwrap();
        let rows: usize = reader.map(|b| b.unwrap().len()).sum();
        assert_eq!(rows, 5);
    }

    #[test]
    fn test_corrupt_gzip_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.csv.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let err = ChunkedReader::open(&path, 2).err().unwrap();
        assert!(matches!(err, Error::Io(_)));
    }
}
