use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::ArtifactError;

type ArtifactResult<T> = std::result::Result<T, ArtifactError>;

pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Content hash of `path`, or `None` when the file does not exist.
pub fn sha256_file(path: &Path) -> ArtifactResult<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(sha256_bytes(&bytes))),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(io_error("failed to read", path, source)),
    }
}

/// Replace `path` with `contents` through a sibling temp file, so readers see
/// either the old or the new file and never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> ArtifactResult<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| io_error("failed to create", parent, source))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|source| io_error("failed to create temp file in", parent, source))?;
    temp.write_all(contents)
        .map_err(|source| io_error("failed to write", temp.path(), source))?;
    temp.persist(path)
        .map_err(|error| io_error("failed to replace", path, error.error))?;
    Ok(())
}

/// Remove `path`; returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> ArtifactResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(io_error("failed to remove", path, source)),
    }
}

/// Move a staged file over its committed counterpart; returns whether a
/// staged file was present.
pub fn promote(staged: &Path, committed: &Path) -> ArtifactResult<bool> {
    match fs::rename(staged, committed) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(ArtifactError::Io {
            context: format!(
                "failed to promote {} to {}",
                staged.display(),
                committed.display()
            ),
            source,
        }),
    }
}

pub fn copy_file(source_path: &Path, dest: &Path) -> ArtifactResult<()> {
    let contents =
        fs::read(source_path).map_err(|source| io_error("failed to read", source_path, source))?;
    write_atomic(dest, &contents)
}

fn io_error(action: &str, path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        context: format!("{action} {}", path.display()),
        source,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;

    use super::{promote, remove_if_exists, sha256_bytes, sha256_file, write_atomic};

    #[test]
    fn sha256_of_missing_file_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            sha256_file(&temp.path().join("missing")).expect("hash"),
            None
        );
    }

    #[test]
    fn sha256_file_matches_bytes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("file");
        fs::write(&path, "hello").expect("write");
        assert_eq!(
            sha256_file(&path).expect("hash"),
            Some(sha256_bytes(b"hello"))
        );
    }

    #[test]
    fn write_atomic_creates_parent_and_replaces_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("file.json");
        write_atomic(&path, b"one").expect("first write");
        write_atomic(&path, b"two").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
        let entries = fs::read_dir(temp.path().join("nested"))
            .expect("read dir")
            .count();
        assert_eq!(entries, 1, "temp files must not be left behind");
    }

    #[test]
    fn promote_moves_staged_over_committed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let staged = temp.path().join("a.tmp");
        let committed = temp.path().join("a");
        fs::write(&staged, "new").expect("write staged");
        fs::write(&committed, "old").expect("write committed");

        assert!(promote(&staged, &committed).expect("promote"));
        assert_eq!(fs::read_to_string(&committed).expect("read"), "new");
        assert!(!staged.exists());
        assert!(!promote(&staged, &committed).expect("second promote"));
    }

    #[test]
    fn remove_if_exists_tolerates_missing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("gone");
        fs::write(&path, "x").expect("write");
        assert!(remove_if_exists(&path).expect("remove"));
        assert!(!remove_if_exists(&path).expect("remove again"));
    }
}
