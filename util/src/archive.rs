//! Struct archiving functionality
//!
//! Archives are CSV files inside the session's archive directory, one row
//! per cycle, written with `csv`'s serde support. Archived structs must
//! therefore be flat (no nested structs, maps or sequences).

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use csv::WriterBuilder;
pub use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write CSV archive files.
pub struct Archiver {
    writer: Writer<File>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while archiving.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot create the archive file: {0}")]
    CreateError(std::io::Error),

    #[error("Cannot write the record: {0}")]
    WriteError(csv::Error),

    #[error("Cannot flush the archive: {0}")]
    FlushError(std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Create a new archiver from a paricular path relative to the session's
    /// archive root.
    ///
    /// Any parent directories of the path are created.
    pub fn from_path<P: AsRef<Path>>(session: &Session, path: P) -> Result<Self, ArchiveError> {
        let full_path = session.arch_root.join(path);

        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).map_err(ArchiveError::CreateError)?;
        }

        let file = File::create(full_path).map_err(ArchiveError::CreateError)?;

        Ok(Self::from_writer(file))
    }

    /// Create a new archiver writing into an already opened file.
    pub fn from_writer(file: File) -> Self {
        Self {
            writer: WriterBuilder::new().has_headers(true).from_writer(file),
        }
    }

    /// Serialise a record into the archive.
    pub fn serialise<T: Serialize>(&mut self, record: &T) -> Result<(), ArchiveError> {
        self.writer
            .serialize(record)
            .map_err(ArchiveError::WriteError)?;

        self.writer.flush().map_err(ArchiveError::FlushError)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        tick: u64,
        mode: Mode,
        dist_m: Option<f64>,
    }

    #[derive(Serialize)]
    enum Mode {
        Planning,
    }

    #[test]
    fn test_archiver_writes_header_and_rows() {
        let path = std::env::temp_dir().join(format!("archive_test_{}.csv", std::process::id()));
        let file = File::create(&path).unwrap();

        let mut arch = Archiver::from_writer(file);
        arch.serialise(&Row {
            tick: 0,
            mode: Mode::Planning,
            dist_m: Some(1.5),
        })
        .unwrap();
        arch.serialise(&Row {
            tick: 1,
            mode: Mode::Planning,
            dist_m: None,
        })
        .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["tick,mode,dist_m", "0,Planning,1.5", "1,Planning,"]);
    }
}
