//! Pull-based record sources.
//!
//! A source yields records one at a time until it reports the end. Both
//! [`Deployer::install_all`](crate::Deployer::install_all) and
//! synchronization drain sources; an error from a source aborts the run.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;
pub use csv::StringRecord;

use metadeploy_core::config::DeployConfig;
use metadeploy_core::types::Record;

use crate::error::{io_err, DeployError};

/// Bounded, ordered sequence of incoming records.
pub trait RecordSource {
    /// Next record, or `None` once exhausted.
    fn next_record(&mut self) -> Result<Option<Record>, DeployError>;
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn next_record(&mut self) -> Result<Option<Record>, DeployError> {
        (**self).next_record()
    }
}

/// Source over records already in memory.
#[derive(Debug)]
pub struct IterSource<I> {
    records: I,
}

impl<I: Iterator<Item = Record>> IterSource<I> {
    pub fn new(records: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

impl<I: Iterator<Item = Record>> RecordSource for IterSource<I> {
    fn next_record(&mut self) -> Result<Option<Record>, DeployError> {
        Ok(self.records.next())
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Reads delimited rows and turns each into a record with `parse`.
///
/// The underlying reader is dropped as soon as the input is exhausted or a
/// row fails, so the file handle never outlives the drain.
pub struct CsvSource<R, F> {
    name: String,
    reader: Option<csv::Reader<R>>,
    parse: F,
    rows: u64,
}

impl<R, F> CsvSource<R, F>
where
    R: Read,
    F: FnMut(&StringRecord) -> Result<Record, DeployError>,
{
    /// Wraps `reader`; `has_header` discards the first line.
    pub fn from_reader(name: impl Into<String>, reader: R, has_header: bool, parse: F) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(has_header)
            .flexible(true)
            .from_reader(reader);
        Self {
            name: name.into(),
            reader: Some(reader),
            parse,
            rows: 0,
        }
    }

    /// True until the source has been exhausted or has failed.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Rows turned into records so far.
    pub fn rows_read(&self) -> u64 {
        self.rows
    }

    fn fail(&mut self, message: String) -> DeployError {
        self.reader = None;
        DeployError::SourceIteration {
            source_name: self.name.clone(),
            message,
        }
    }
}

impl<F> CsvSource<File, F>
where
    F: FnMut(&StringRecord) -> Result<Record, DeployError>,
{
    pub fn open(path: &Path, has_header: bool, parse: F) -> Result<Self, DeployError> {
        let file = File::open(path).map_err(|e| io_err(path, e))?;
        Ok(Self::from_reader(
            path.display().to_string(),
            file,
            has_header,
            parse,
        ))
    }

    /// Opens the named resource under the configured resource directory.
    pub fn resource(
        config: &DeployConfig,
        name: &str,
        has_header: bool,
        parse: F,
    ) -> Result<Self, DeployError> {
        Self::open(&config.resource_path(name), has_header, parse)
    }
}

impl<R, F> RecordSource for CsvSource<R, F>
where
    R: Read,
    F: FnMut(&StringRecord) -> Result<Record, DeployError>,
{
    fn next_record(&mut self) -> Result<Option<Record>, DeployError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut row = StringRecord::new();
        match reader.read_record(&mut row) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("{}: exhausted after {} row(s)", self.name, self.rows);
                self.reader = None;
                return Ok(None);
            }
            Err(e) => return Err(self.fail(e.to_string())),
        }
        match (self.parse)(&row) {
            Ok(record) => {
                self.rows += 1;
                Ok(Some(record))
            }
            Err(e) => {
                self.reader = None;
                Err(e)
            }
        }
    }
}
