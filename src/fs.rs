//! Crash-safe file writing.
//!
//! The discovery document is read concurrently by Prometheus, so the visible
//! path must only ever change through a rename. Everything here assumes the
//! temporary file lives on the same file system as the destination.

use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::{fs, io};

/// Runs an action when dropped, unless explicitly deactivated. Used to remove
/// the temporary file if the write fails partway through.
struct OnScopeExit<F>
where
    F: FnOnce(),
{
    action: Option<F>,
}

impl<F> OnScopeExit<F>
where
    F: FnOnce(),
{
    fn new(action: F) -> Self {
        Self {
            action: Some(action),
        }
    }

    fn deactivate(&mut self) {
        self.action = None
    }
}

impl<F> Drop for OnScopeExit<F>
where
    F: FnOnce(),
{
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action()
        }
    }
}

/// Atomically writes to the `dst` file, using `tmp` as a buffer.
///
/// Creates `tmp` if necessary and removes it if the write fails with an
/// error. At every observable instant `dst` contains either its previous
/// content or the new fully written content.
///
/// # Pre-conditions
///   * `dst` and `tmp` are not directories.
///   * `dst` and `tmp` are on the same file system.
pub fn write_atomically_using_tmp_file<PDst, PTmp, F>(
    dst: PDst,
    tmp: PTmp,
    action: F,
) -> io::Result<()>
where
    F: FnOnce(&mut io::BufWriter<&fs::File>) -> io::Result<()>,
    PDst: AsRef<Path>,
    PTmp: AsRef<Path>,
{
    let mut cleanup = OnScopeExit::new(|| {
        let _ = fs::remove_file(tmp.as_ref());
    });

    let f = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true) // Otherwise we'd overwrite existing content
        .open(tmp.as_ref())?;
    {
        let mut w = io::BufWriter::new(&f);
        action(&mut w)?;
        w.flush()?;
    }
    f.sync_all()?;
    fs::rename(tmp.as_ref(), dst.as_ref())?;
    // A bare relative filename has `Some("")` as its parent, which cannot be
    // opened for syncing; it lives in the current directory.
    let dir = dst
        .as_ref()
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    sync_path(dir)?;

    cleanup.deactivate();
    Ok(())
}

/// Invokes sync_all on the file or directory located at the given path.
pub fn sync_path<P>(path: P) -> io::Result<()>
where
    P: AsRef<Path>,
{
    // There is no special API for syncing directories, so we do the same thing
    // for both files and directories. This works because directories are just
    // files treated in a special way by the kernel.
    let f = fs::File::open(path.as_ref())?;
    f.sync_all().map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("failed to sync path {}: {}", path.as_ref().display(), e),
        )
    })
}

/// Append .tmp to the given file path.
///
/// Examples:
/// bla.txt -> bla.txt.tmp
/// /tmp/bla.txt -> /tmp/bla.txt.tmp
/// /tmp/bla -> /tmp/bla.tmp
pub fn get_tmp_for_path<P>(path: P) -> PathBuf
where
    P: AsRef<Path>,
{
    let extension = match path.as_ref().extension() {
        None => OsString::from("tmp"),
        Some(extension) => {
            let mut extension = OsString::from(extension);
            extension.push(OsStr::new(".tmp"));
            extension
        }
    };
    path.as_ref().with_extension(extension)
}
