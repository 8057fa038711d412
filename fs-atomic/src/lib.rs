use std::fs;
use std::path::Path;

use deck_error::{DeckError, Result};

/// Replace the file at `path` with `data` as a single visible step.
///
/// The bytes go to a randomly named temp file in the destination directory
/// and are renamed over the destination, so the temp file and the target
/// stay on one filesystem and a concurrent reader never observes a
/// half-written record.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = path.parent().ok_or_else(|| {
        DeckError::Persistence(
            path.display().to_string(),
            "destination has no parent directory".to_owned(),
        )
    })?;
    fs::create_dir_all(dir)?;

    let suffix: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(10)
        .collect();
    let tmp = dir.join(format!(".{}.tmp", suffix));

    fs::write(&tmp, data)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn writes_and_reads_back() {
        let dir = TempDir::new("fs-atomic").unwrap();
        let path = dir.path().join("record.json");

        write_atomic(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");
    }

    #[test]
    fn replaces_existing_content() {
        let dir = TempDir::new("fs-atomic").unwrap();
        let path = dir.path().join("record.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn creates_missing_directories() {
        let dir = TempDir::new("fs-atomic").unwrap();
        let path = dir.path().join("nested").join("record.json");

        write_atomic(&path, b"payload").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"payload");
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = TempDir::new("fs-atomic").unwrap();
        let path = dir.path().join("record.json");

        write_atomic(&path, b"payload").unwrap();
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
