//! Writing received files to disk.

use crate::error::Result;
use crate::transfer::CompletedFile;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Reduce a peer-supplied name to a single safe path component.
///
/// Directories, `..` and absolute prefixes are stripped; an empty result
/// becomes `received.bin`.
pub fn safe_file_name(name: &str) -> String {
    // Peers may send Windows-style separators regardless of our platform
    let normalized = name.replace('\\', "/");
    let last = Path::new(&normalized)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .last();

    match last {
        Some(part) if !part.trim().is_empty() => part,
        _ => "received.bin".to_string(),
    }
}

/// Write `file` into `dir`, replacing any existing file of the same name.
///
/// Data goes to a temp file in `dir` first and is renamed into place, so a
/// crash never leaves a truncated file under the final name.
pub async fn save_to_dir(file: &CompletedFile, dir: &Path) -> Result<PathBuf> {
    let dir = dir.to_path_buf();
    let dest = dir.join(safe_file_name(&file.name));
    let data = file.data.clone();

    let target = dest.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;

    tracing::debug!("Saved {} to {}", file.name, dest.display());
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn completed(name: &str, data: &'static [u8]) -> CompletedFile {
        CompletedFile {
            name: name.to_string(),
            byte_length: data.len() as u64,
            content_type: "application/octet-stream".to_string(),
            data: Bytes::from_static(data),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("report.pdf"), "report.pdf");
        assert_eq!(safe_file_name("../../etc/passwd"), "passwd");
        assert_eq!(safe_file_name("/abs/path/x.txt"), "x.txt");
        assert_eq!(safe_file_name("C:\\Users\\me\\doc.txt"), "doc.txt");
        assert_eq!(safe_file_name(".."), "received.bin");
        assert_eq!(safe_file_name(""), "received.bin");
    }

    #[tokio::test]
    async fn test_save_to_dir() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("downloads");

        let path = save_to_dir(&completed("../escape.txt", b"payload"), &out)
            .await
            .unwrap();

        assert_eq!(path, out.join("escape.txt"));
        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_save_overwrites_existing() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "old").unwrap();

        save_to_dir(&completed("a.txt", b"new"), tmp.path())
            .await
            .unwrap();

        assert_eq!(fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "new");
    }
}
