//! Reassemble finished segment files into the destination.
//!
//! Parts are concatenated in index order into `<dest>.part`, which is then
//! renamed into place. Temp files are deleted only after the rename.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("creating save directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("writing {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("reading segment file {}: {source}", path.display())]
    ReadPart { path: PathBuf, source: io::Error },
    #[error("renaming {} into place: {source}", path.display())]
    Rename { path: PathBuf, source: io::Error },
}

/// `file.zip` → `file.zip.part`
pub fn staging_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(".part");
    PathBuf::from(o)
}

/// `name(n)` with the counter placed before the extension.
fn numbered_name(name: &str, n: u32) -> String {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) if name.len() > ext.len() + 1 => {
            let stem = &name[..name.len() - ext.len() - 1];
            format!("{}({}).{}", stem, n, ext)
        }
        _ => format!("{}({})", name, n),
    }
}

/// First free path among `dir/name`, `dir/stem(1).ext`, `dir/stem(2).ext`, …
pub fn resolve_collision(dir: &Path, name: &str) -> PathBuf {
    let mut candidate = dir.join(name);
    let mut n = 1u32;
    while candidate.exists() || staging_path(&candidate).exists() {
        candidate = dir.join(numbered_name(name, n));
        n += 1;
    }
    candidate
}

/// Concatenate `parts` into a fresh file named after `output_file` in
/// `save_dir`. Returns the path written.
pub fn merge_segments(save_dir: &Path, output_file: &str, parts: &[PathBuf]) -> Result<PathBuf, MergeError> {
    fs::create_dir_all(save_dir).map_err(|source| MergeError::CreateDir {
        path: save_dir.to_path_buf(),
        source,
    })?;

    let dest = resolve_collision(save_dir, output_file);
    let staging = staging_path(&dest);

    if let Err(e) = write_concatenated(&staging, parts) {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }

    fs::rename(&staging, &dest).map_err(|source| MergeError::Rename {
        path: staging.clone(),
        source,
    })?;

    for part in parts {
        if let Err(e) = fs::remove_file(part) {
            tracing::warn!(path = %part.display(), error = %e, "failed to delete segment file");
        }
    }

    Ok(dest)
}

fn write_concatenated(staging: &Path, parts: &[PathBuf]) -> Result<(), MergeError> {
    let write_err = |source| MergeError::Write {
        path: staging.to_path_buf(),
        source,
    };
    let file = File::create(staging).map_err(write_err)?;
    let mut out = BufWriter::new(file);

    for part in parts {
        let mut input = File::open(part).map_err(|source| MergeError::ReadPart {
            path: part.clone(),
            source,
        })?;
        io::copy(&mut input, &mut out).map_err(write_err)?;
    }

    let file = out.into_inner().map_err(|e| write_err(e.into_error()))?;
    file.sync_all().map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_parts(dir: &Path, chunks: &[&[u8]]) -> Vec<PathBuf> {
        chunks
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let p = dir.join(format!("out-d1-part-{}.tmp", i));
                fs::write(&p, c).unwrap();
                p
            })
            .collect()
    }

    #[test]
    fn numbered_names() {
        assert_eq!(numbered_name("file.zip", 1), "file(1).zip");
        assert_eq!(numbered_name("archive.tar.gz", 2), "archive.tar(2).gz");
        assert_eq!(numbered_name("README", 3), "README(3)");
        assert_eq!(numbered_name(".bashrc", 1), ".bashrc(1)");
    }

    #[test]
    fn concatenates_in_order_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let save = tempfile::tempdir().unwrap();
        let parts = write_parts(scratch.path(), &[b"hello ", b"segmented ", b"world"]);

        let dest = merge_segments(save.path(), "out.txt", &parts).unwrap();
        assert_eq!(dest, save.path().join("out.txt"));
        assert_eq!(fs::read(&dest).unwrap(), b"hello segmented world");
        assert!(parts.iter().all(|p| !p.exists()));
        assert!(!staging_path(&dest).exists());
    }

    #[test]
    fn collisions_get_numbered() {
        let scratch = tempfile::tempdir().unwrap();
        let save = tempfile::tempdir().unwrap();
        fs::write(save.path().join("file.zip"), b"old").unwrap();

        let p1 = write_parts(scratch.path(), &[b"one"]);
        let d1 = merge_segments(save.path(), "file.zip", &p1).unwrap();
        assert_eq!(d1.file_name().unwrap(), "file(1).zip");

        let p2 = write_parts(scratch.path(), &[b"two"]);
        let d2 = merge_segments(save.path(), "file.zip", &p2).unwrap();
        assert_eq!(d2.file_name().unwrap(), "file(2).zip");
        assert_eq!(fs::read(save.path().join("file.zip")).unwrap(), b"old");
    }

    #[test]
    fn creates_missing_save_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let save = root.path().join("nested").join("dir");
        let parts = write_parts(scratch.path(), &[b"x"]);
        let dest = merge_segments(&save, "x.bin", &parts).unwrap();
        assert!(dest.starts_with(&save));
    }

    #[test]
    fn missing_part_keeps_the_others() {
        let scratch = tempfile::tempdir().unwrap();
        let save = tempfile::tempdir().unwrap();
        let mut parts = write_parts(scratch.path(), &[b"a", b"b"]);
        parts.insert(1, scratch.path().join("gone.tmp"));

        let err = merge_segments(save.path(), "y.bin", &parts).unwrap_err();
        assert!(matches!(err, MergeError::ReadPart { .. }));
        assert!(parts[0].exists());
        assert!(parts[2].exists());
        assert!(!save.path().join("y.bin").exists());
        assert!(!save.path().join("y.bin.part").exists());
    }
}
