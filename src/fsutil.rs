//! Small filesystem helpers shared by the disk-backed caches (§4.4, §4.10).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

/// Write `bytes` to `path` atomically: a temp file in the same directory,
/// fsync, then rename into place. If the rename loses a race against
/// another writer producing byte-identical content (both keyed by the same
/// deterministic name), treat the pre-existing destination as success
/// rather than propagating the error.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let directory = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path {:?} has no parent directory", path))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("path {:?} has no file name", path))?
        .to_string_lossy()
        .to_string();

    let mut template = PathBuf::from(directory);
    template.push(format!(".{file_name}.tmp_XXXXXX"));

    match nix::unistd::mkstemp(&template) {
        Ok((fd, tmp_path)) => {
            use std::io::Write;
            use std::os::unix::io::FromRawFd;
            let mut file = unsafe { std::fs::File::from_raw_fd(fd) };
            let result = file.write_all(bytes).and_then(|_| file.sync_all());
            drop(file);
            if let Err(err) = result {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(err).context("writing temp file");
            }
            if let Err(err) = std::fs::rename(&tmp_path, path) {
                let _ = std::fs::remove_file(&tmp_path);
                if path.exists() {
                    debug!("{:?} already present after rename race", path);
                } else {
                    return Err(err).context("renaming temp file into place");
                }
            }
            Ok(())
        }
        Err(err) => Err(err).context("mkstemp"),
    }
}

