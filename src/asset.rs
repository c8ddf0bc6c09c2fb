//! Packages the handler directory into the zip archive every function is
//! deployed from.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::{Error, Result};

pub struct Asset {
    pub bytes: Vec<u8>,
    /// adler32 of `bytes`.
    pub hash: u32,
    /// archive entry names, in archive order.
    pub files: Vec<String>,
}

impl Asset {
    /// content addressed object key, so a changed archive is a new object.
    pub fn key(&self) -> String {
        format!("assets/{:08x}.zip", self.hash)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        let relative = path.strip_prefix(root)
            .map_err(|_| Error::Asset(format!("{} is outside of {}", path.display(), root.display())))?;
        let name = relative.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        out.push((name, path));
    }
    Ok(())
}

/// zips every file under `dir`. Entries are sorted and carry a fixed
/// timestamp, so the same directory contents always give the same bytes.
pub fn package_dir(dir: &Path) -> Result<Asset> {
    if !dir.is_dir() {
        return Err(Error::Asset(format!("Asset directory {} does not exist", dir.display())));
    }
    let mut files = vec![];
    collect_files(dir, dir, &mut files)?;
    if files.is_empty() {
        return Err(Error::Asset(format!("Asset directory {} is empty", dir.display())));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, path) in files.iter() {
        let contents = std::fs::read(path)?;
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&contents)?;
    }
    let bytes = zip.finish()?.into_inner();
    let hash = adler::adler32_slice(&bytes);
    debug!(dir = %dir.display(), files = files.len(), size = bytes.len(), hash = %format!("{hash:08x}"), "packaged asset");

    Ok(Asset {
        bytes,
        hash,
        files: files.into_iter().map(|(name, _)| name).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for module in ["world", "default", "hello"] {
            std::fs::write(
                dir.path().join(format!("{module}.py")),
                format!("def handler(event, context):\n    return {{'statusCode': 200, 'body': '{module}'}}\n"),
            ).unwrap();
        }
        dir
    }

    #[test]
    fn same_contents_give_the_same_archive() {
        let dir = handler_dir();
        let first = package_dir(dir.path()).unwrap();
        let second = package_dir(dir.path()).unwrap();
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.key(), second.key());
        assert_eq!(first.files, vec!["default.py", "hello.py", "world.py"]);
        assert!(first.key().starts_with("assets/") && first.key().ends_with(".zip"));
    }

    #[test]
    fn changed_contents_change_the_key() {
        let dir = handler_dir();
        let before = package_dir(dir.path()).unwrap();
        std::fs::write(dir.path().join("hello.py"), "def handler(e, c):\n    return None\n").unwrap();
        let after = package_dir(dir.path()).unwrap();
        assert_ne!(before.key(), after.key());
    }

    #[test]
    fn nested_files_use_forward_slashes() {
        let dir = handler_dir();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib").join("util.py"), "X = 1\n").unwrap();
        let asset = package_dir(dir.path()).unwrap();
        assert!(asset.files.contains(&"lib/util.py".to_string()));

        let mut archive = zip::ZipArchive::new(Cursor::new(asset.bytes)).unwrap();
        assert_eq!(archive.len(), 4);
        assert!(archive.by_name("lib/util.py").is_ok());
    }

    #[test]
    fn missing_or_empty_dir_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(package_dir(dir.path()), Err(Error::Asset(_))));
        assert!(matches!(package_dir(&dir.path().join("nope")), Err(Error::Asset(_))));
    }
}
