use super::{ImportEngine, SliceReport};
use crate::error::Result;
use std::path::{Path, PathBuf};

/// Pull-based iteration over an import job.
///
/// Each `next()` runs one slice from the current offset and advances to the
/// reported `next_offset`. Iteration ends after the completing slice, or
/// after the first error; a fresh cursor from [`ImportEngine::cursor`]
/// picks up from the last committed position.
pub struct ImportCursor<'a> {
    engine: &'a ImportEngine,
    file: PathBuf,
    offset: u64,
    finished: bool,
}

impl<'a> ImportCursor<'a> {
    pub(crate) fn new(engine: &'a ImportEngine, file: PathBuf, offset: u64) -> Self {
        Self {
            engine,
            file,
            offset,
            finished: false,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Iterator for ImportCursor<'_> {
    type Item = Result<SliceReport>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.engine.process_slice(&self.file, self.offset) {
            Ok(report) => {
                self.offset = report.next_offset;
                self.finished = report.is_complete;
                Some(Ok(report))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
