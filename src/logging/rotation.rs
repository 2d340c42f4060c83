// file: src/logging/rotation.rs
// version: 1.0.0
// guid: 3f0c9a4e-7d21-4b8e-9a55-c2e81f6d0b47

//! Size-based log rotation and tail extraction

use crate::error::Result;
use std::collections::VecDeque;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

fn archive_path(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Archive the log file when it is larger than `max_bytes`
///
/// Archives are numbered `<log>.1` (newest) to `<log>.<keep>` (oldest); the
/// oldest is discarded. The live file is then absent and the next open
/// starts it empty. Returns true when a rotation happened.
pub fn rotate_if_needed(path: &Path, max_bytes: u64, keep: usize) -> Result<bool> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    if size <= max_bytes {
        return Ok(false);
    }

    let keep = keep.max(1);
    let oldest = archive_path(path, keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for index in (1..keep).rev() {
        let from = archive_path(path, index);
        if from.exists() {
            fs::rename(&from, archive_path(path, index + 1))?;
        }
    }

    fs::rename(path, archive_path(path, 1))?;
    debug!("Rotated log file {} ({} bytes)", path.display(), size);
    Ok(true)
}

/// Last `n` lines of a file, oldest first
pub fn tail(path: &Path, n: usize) -> Result<Vec<String>> {
    if n == 0 {
        return Ok(Vec::new());
    }

    let file = fs::File::open(path)?;
    let mut lines = VecDeque::with_capacity(n);

    for line in BufReader::new(file).lines() {
        let line = line?;
        if lines.len() == n {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    Ok(lines.into_iter().collect())
}
