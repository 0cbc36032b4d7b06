use crate::error::{DeployError, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use tar::Archive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    TarXz,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

fn archive_error(path: &Path, message: impl std::fmt::Display) -> DeployError {
    DeployError::Archive {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Sniff a deployed file. Zip files are recognised by content alone, tar
/// streams also need a matching file name so plain compressed binaries are
/// left untouched.
pub fn detect(path: &Path) -> Option<ArchiveKind> {
    let mut header = [0u8; 6];
    let read = fs::File::open(path)
        .and_then(|mut f| f.read(&mut header))
        .ok()?;
    let header = &header[..read];

    if header.starts_with(ZIP_MAGIC) || header.starts_with(ZIP_EMPTY_MAGIC) {
        let file = fs::File::open(path).ok()?;
        return zip::ZipArchive::new(file).ok().map(|_| ArchiveKind::Zip);
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if header.starts_with(GZIP_MAGIC) && (name.ends_with(".tar.gz") || name.ends_with(".tgz")) {
        return Some(ArchiveKind::TarGz);
    }
    if header.starts_with(XZ_MAGIC) && (name.ends_with(".tar.xz") || name.ends_with(".txz")) {
        return Some(ArchiveKind::TarXz);
    }

    None
}

/// Expand `archive_path` into `extract_dir` if it is an archive. Returns
/// `false` when the file is not one.
pub fn expand_if_archive(archive_path: &Path, extract_dir: &Path) -> Result<bool> {
    let Some(kind) = detect(archive_path) else {
        return Ok(false);
    };

    tracing::info!(
        "Extracting {} into {}",
        archive_path.display(),
        extract_dir.display()
    );

    fs::create_dir_all(extract_dir).map_err(|e| archive_error(extract_dir, e))?;

    match kind {
        ArchiveKind::Zip => extract_zip(archive_path, extract_dir),
        ArchiveKind::TarGz => {
            let file = fs::File::open(archive_path).map_err(|e| archive_error(archive_path, e))?;
            unpack_tar(Archive::new(GzDecoder::new(file)), archive_path, extract_dir)
        }
        ArchiveKind::TarXz => {
            let file = fs::File::open(archive_path).map_err(|e| archive_error(archive_path, e))?;
            unpack_tar(
                Archive::new(xz2::read::XzDecoder::new(file)),
                archive_path,
                extract_dir,
            )
        }
    }?;

    Ok(true)
}

fn extract_zip(archive_path: &Path, extract_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path).map_err(|e| archive_error(archive_path, e))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| archive_error(archive_path, e))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| archive_error(archive_path, e))?;

        // Path traversal
        let Some(relative) = entry.enclosed_name().map(|p| p.to_path_buf()) else {
            tracing::warn!("Skipping unsafe path in zip: {}", entry.name());
            continue;
        };
        let outpath = extract_dir.join(relative);
        if same_file_path(&outpath, archive_path) {
            tracing::warn!("Skipping zip entry that would overwrite the archive: {}", entry.name());
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| archive_error(&outpath, e))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| archive_error(parent, e))?;
        }
        let mut outfile = fs::File::create(&outpath).map_err(|e| archive_error(&outpath, e))?;
        io::copy(&mut entry, &mut outfile).map_err(|e| archive_error(&outpath, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(|e| archive_error(&outpath, e))?;
            }
        }
    }

    Ok(())
}

fn same_file_path(a: &Path, b: &Path) -> bool {
    match (std::path::absolute(a), std::path::absolute(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn unpack_tar<R: Read>(mut archive: Archive<R>, archive_path: &Path, extract_dir: &Path) -> Result<()> {
    let entries = archive
        .entries()
        .map_err(|e| archive_error(archive_path, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| archive_error(archive_path, e))?;
        let relative = entry
            .path()
            .map_err(|e| archive_error(archive_path, e))?
            .into_owned();
        if same_file_path(&extract_dir.join(&relative), archive_path) {
            tracing::warn!(
                "Skipping tar entry that would overwrite the archive: {}",
                relative.display()
            );
            continue;
        }
        // unpack_in refuses entries that escape extract_dir
        entry
            .unpack_in(extract_dir)
            .map_err(|e| archive_error(archive_path, e))?;
    }

    Ok(())
}
