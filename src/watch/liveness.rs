use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Create `path` if missing and bump its modification time, like `touch(1)`
///
/// # Errors
///
/// Returns the I/O error if the file cannot be opened or its mtime set
pub fn touch(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.set_modified(SystemTime::now())
}
