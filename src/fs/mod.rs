//! Staging directory helpers: file ids, naming, discovery and cleanup.

use std::{
    fmt::{Display, Formatter},
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use ulid::Ulid;

/// Identifier of a staged or adopted file; also its file name stem.
pub type FileId = Ulid;

pub fn generate_file_id() -> FileId {
    Ulid::new()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Parquet,
    Tmp,
}

impl Display for FileType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::Parquet => write!(f, "parquet"),
            FileType::Tmp => write!(f, "tmp"),
        }
    }
}

/// `<id>.<file_type>`
pub(crate) fn file_name(id: FileId, file_type: FileType) -> String {
    format!("{}.{}", id, file_type)
}

/// File id encoded in `path`, if its name is `<ulid>.<suffix>`.
pub(crate) fn parse_file_id(path: &Path, suffix: FileType) -> Option<FileId> {
    let file_name = path.file_name()?.to_str()?;
    let stem = file_name.strip_suffix(&format!(".{}", suffix))?;
    FileId::from_str(stem).ok()
}

/// Every `<ulid>.<file_type>` file under `dir`, sub-directories included,
/// sorted by path.
pub async fn list_files(dir: &Path, file_type: FileType) -> io::Result<Vec<PathBuf>> {
    let mut pending = vec![dir.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if parse_file_id(&path, file_type).is_some() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Apply `mode` to `dir` and everything below it so another process can read
/// the staged files.
#[cfg(unix)]
pub async fn normalize_permissions(dir: &Path, mode: u32) -> io::Result<()> {
    use std::{fs::Permissions, os::unix::fs::PermissionsExt};

    let mut pending = vec![dir.to_path_buf()];
    while let Some(path) = pending.pop() {
        tokio::fs::set_permissions(&path, Permissions::from_mode(mode)).await?;
        if tokio::fs::metadata(&path).await?.is_dir() {
            let mut entries = tokio::fs::read_dir(&path).await?;
            while let Some(entry) = entries.next_entry().await? {
                pending.push(entry.path());
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn normalize_permissions(_dir: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

pub(crate) async fn file_exist(path: impl AsRef<Path>) -> io::Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Remove a file, treating "already gone" as success.
pub(crate) async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{generate_file_id, list_files, parse_file_id, FileType};

    #[test]
    fn parse_only_matching_names() {
        let id = generate_file_id();
        let dir = std::path::Path::new("/staging");
        assert_eq!(
            parse_file_id(&dir.join(format!("{id}.parquet")), FileType::Parquet),
            Some(id)
        );
        assert_eq!(
            parse_file_id(&dir.join(format!("{id}.tmp")), FileType::Parquet),
            None
        );
        assert_eq!(
            parse_file_id(&dir.join("_SUCCESS"), FileType::Parquet),
            None
        );
    }

    #[tokio::test]
    async fn list_files_recurses() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("c");
        tokio::fs::create_dir_all(&nested).await.unwrap();

        let a = temp_dir.path().join(format!("{}.parquet", generate_file_id()));
        let b = nested.join(format!("{}.parquet", generate_file_id()));
        tokio::fs::write(&a, b"a").await.unwrap();
        tokio::fs::write(&b, b"b").await.unwrap();
        tokio::fs::write(temp_dir.path().join("_SUCCESS"), b"").await.unwrap();

        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(
            list_files(temp_dir.path(), FileType::Parquet).await.unwrap(),
            expected
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn normalize_permissions_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("f");
        tokio::fs::write(&file, b"x").await.unwrap();

        super::normalize_permissions(temp_dir.path(), 0o755)
            .await
            .unwrap();
        let mode = tokio::fs::metadata(&file).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
