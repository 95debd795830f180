//! Recorded sensor streams, for replaying a session through the engine offline.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::SensorEvent;

/// One engine input with the wall-clock time it was processed at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub t_ms: i64,
    pub event: SensorEvent,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    #[serde(default)]
    pub self_id: Option<String>,
    pub events: Vec<LoggedEvent>,
}

fn is_gz(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

impl SessionLog {
    pub fn new(self_id: Option<String>) -> Self {
        Self {
            self_id,
            events: Vec::new(),
        }
    }

    pub fn record(&mut self, t_ms: i64, event: SensorEvent) {
        self.events.push(LoggedEvent { t_ms, event });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Load a `.json` or `.json.gz` log.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if is_gz(path) {
            let reader = BufReader::new(GzDecoder::new(file));
            Ok(serde_json::from_reader(reader)?)
        } else {
            let reader = BufReader::new(file);
            Ok(serde_json::from_reader(reader)?)
        }
    }

    /// Write the log, gzip-compressed when the path ends in `.gz`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        if is_gz(path) {
            let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());
            serde_json::to_writer(&mut gz, self)?;
            gz.finish()?.flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        Ok(())
    }
}
