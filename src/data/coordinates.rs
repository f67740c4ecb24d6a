//! CSV coordinate source.
//!
//! Reads `place, latitude, longitude` records (no header). Records whose
//! latitude or longitude does not parse, or that have fewer than three
//! fields, are skipped so one bad line never aborts a batch.

use futures::Stream;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::{Coordinate, SourceError};

/// Capacity of the channel between the blocking reader and the pipeline.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Lazy iterator over the coordinates in a CSV input.
///
/// Finite and not restartable; open the source again to re-read it.
pub struct CoordinateReader<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    skipped: usize,
}

impl CoordinateReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| SourceError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> CoordinateReader<R> {
    pub fn from_reader(reader: R) -> Self {
        let records = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader)
            .into_records();
        Self { records, skipped: 0 }
    }

    /// Number of malformed records skipped so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: Read> Iterator for CoordinateReader<R> {
    type Item = Result<Coordinate, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(SourceError::Read(e))),
            };

            match parse_record(&record) {
                Some(coord) => return Some(Ok(coord)),
                None => {
                    self.skipped += 1;
                    debug!(
                        line = record.position().map(|p| p.line()),
                        record = ?record,
                        "Skipping malformed coordinate record"
                    );
                }
            }
        }
    }
}

fn parse_record(record: &csv::StringRecord) -> Option<Coordinate> {
    if record.len() < 3 {
        return None;
    }
    let place = record.get(0)?;
    let lat = parse_degrees(record.get(1)?)?;
    let lon = parse_degrees(record.get(2)?)?;
    Some(Coordinate::new(place, lat, lon))
}

fn parse_degrees(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Open `path` and stream its coordinates from a blocking reader thread.
///
/// The file is opened before returning, so an unreadable source fails here
/// rather than mid-batch. Must be called from within a tokio runtime.
pub fn stream(
    path: impl AsRef<Path>,
    buffer: usize,
) -> Result<impl Stream<Item = Result<Coordinate, SourceError>> + Send + Unpin, SourceError> {
    let mut reader = CoordinateReader::open(path)?;
    let (tx, mut rx) = mpsc::channel(buffer.max(1));

    tokio::task::spawn_blocking(move || {
        for item in reader.by_ref() {
            let fatal = item.is_err();
            // A closed channel means the batch was abandoned.
            if tx.blocking_send(item).is_err() || fatal {
                break;
            }
        }
        debug!(skipped = reader.skipped(), "Coordinate producer finished");
    });

    Ok(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
