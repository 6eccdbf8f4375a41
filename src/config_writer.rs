//! Publishes the discovery document for file-based service discovery.

use std::io::{self, Write};
use std::path::PathBuf;

use slog::{info, Logger};

use crate::fs::{get_tmp_for_path, write_atomically_using_tmp_file};
use crate::prometheus_config::TargetGroup;

/// Writes the discovery document to a fixed path with write-then-rename
/// discipline, so the Prometheus reader never observes a partial file.
pub struct ConfigWriter {
    log: Logger,
    output_path: PathBuf,
}

impl ConfigWriter {
    pub fn new(output_path: PathBuf, log: Logger) -> Self {
        Self { log, output_path }
    }

    /// Removes a temporary file left behind by a run that was killed between
    /// the write and the rename. Called once at startup; a leftover temp file
    /// is harmless but would otherwise linger forever.
    pub fn remove_orphaned_tmp_file(&self) -> io::Result<()> {
        let tmp_path = get_tmp_for_path(&self.output_path);
        match std::fs::remove_file(&tmp_path) {
            Ok(()) => {
                info!(
                    self.log,
                    "Removed orphaned temporary file";
                    "path" => %tmp_path.display()
                );
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Serializes the target groups and atomically replaces the published
    /// document. On any failure the previously published document is left
    /// untouched.
    pub fn write(&self, target_groups: &[TargetGroup]) -> io::Result<()> {
        write_atomically_using_tmp_file(
            &self.output_path,
            get_tmp_for_path(&self.output_path),
            |w| {
                serde_json::to_writer_pretty(&mut *w, target_groups).map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::Other,
                        format!("serialization error: {:?}", e),
                    )
                })?;
                w.write_all(b"\n")
            },
        )
    }
}
