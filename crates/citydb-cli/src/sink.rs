//! JSON lines output.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use citydb_core::{Error, ExportOutput, FeatureSink};

fn sink_error(e: impl std::fmt::Display) -> Error {
    Error::Sink(e.to_string())
}

/// Writes one JSON document per line.
///
/// In flat mode the siblings of a feature follow it, each on its own line.
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
    flat: bool,
    written: AtomicUsize,
}

impl JsonLinesSink {
    pub fn new(writer: Box<dyn Write + Send>, flat: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            flat,
            written: AtomicUsize::new(0),
        }
    }

    pub fn stdout(flat: bool) -> Self {
        Self::new(Box::new(BufWriter::new(io::stdout())), flat)
    }

    /// Create (or truncate) `path`.
    pub fn create(path: &Path, flat: bool) -> Result<Self, Error> {
        let file = File::create(path).map_err(|e| Error::Sink(format!("{}: {e}", path.display())))?;
        Ok(Self::new(Box::new(BufWriter::new(file)), flat))
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.writer.lock().flush().map_err(sink_error)
    }

    /// Documents written so far.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }
}

impl FeatureSink for JsonLinesSink {
    fn supports_flat_output(&self) -> bool {
        self.flat
    }

    fn write(&self, output: ExportOutput) -> Result<(), Error> {
        let mut lines = Vec::with_capacity(1 + output.siblings.len());
        for feature in std::iter::once(&output.feature).chain(&output.siblings) {
            lines.push(feature.to_json()?);
        }

        let mut writer = self.writer.lock();
        for line in &lines {
            writer.write_all(line.as_bytes()).map_err(sink_error)?;
            writer.write_all(b"\n").map_err(sink_error)?;
        }
        self.written.fetch_add(lines.len(), Ordering::Relaxed);
        Ok(())
    }
}
