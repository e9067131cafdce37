//! Bundle content packaging.
//!
//! A bundle directory is packaged as a gzip-compressed tar with entries in
//! sorted path order and all ownership and timestamp fields zeroed, so the
//! same tree always produces the same bytes.

use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use olm_oci_core::error::{OciError, Result};
use olm_oci_core::media_type;

/// One regular file inside packaged content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub path: String,
    pub mode: u32,
    pub size: u64,
}

/// Package `dir` as a deterministic `tar+gzip` archive.
pub fn pack_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut files = Vec::new();
    collect(dir, Path::new(""), &mut files)?;

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (relative, absolute, is_dir) in files {
        let metadata = std::fs::metadata(&absolute)?;
        let mut header = tar::Header::new_ustar();
        header.set_mode(permissions(&metadata));
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        let name = relative.to_string_lossy().replace('\\', "/");

        if is_dir {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, format!("{}/", name), std::io::empty())?;
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(metadata.len());
            let file = std::fs::File::open(&absolute)?;
            builder.append_data(&mut header, &name, file)?;
        }
    }

    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Walk `root/relative` depth-first in name order. Symlinks are rejected.
fn collect(root: &Path, relative: &Path, out: &mut Vec<(PathBuf, PathBuf, bool)>) -> Result<()> {
    let dir = root.join(relative);
    let mut entries = std::fs::read_dir(&dir)
        .map_err(|e| OciError::BlobData {
            media_type: media_type::BUNDLE_CONTENT.to_string(),
            message: format!("failed to read {}: {}", dir.display(), e),
        })?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_type = entry.file_type()?;
        let rel = relative.join(entry.file_name());
        if file_type.is_symlink() {
            return Err(OciError::BlobData {
                media_type: media_type::BUNDLE_CONTENT.to_string(),
                message: format!("symlinks are not supported: {}", rel.display()),
            });
        }
        if file_type.is_dir() {
            out.push((rel.clone(), entry.path(), true));
            collect(root, &rel, out)?;
        } else if file_type.is_file() {
            out.push((rel, entry.path(), false));
        }
    }
    Ok(())
}

#[cfg(unix)]
fn permissions(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions(metadata: &std::fs::Metadata) -> u32 {
    match (metadata.is_dir(), metadata.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

/// Plain tar readers pass through; gzip is detected by its magic bytes.
fn archive_reader(data: &[u8]) -> Box<dyn Read + '_> {
    if data.starts_with(&[0x1f, 0x8b]) {
        Box::new(GzDecoder::new(data))
    } else {
        Box::new(data)
    }
}

/// List the regular files of a tar archive, gzip-compressed or not.
pub fn list_entries(data: &[u8]) -> Result<Vec<ContentEntry>> {
    let mut archive = tar::Archive::new(archive_reader(data));
    let mut out = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        let header = entry.header();
        if !header.entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().trim_start_matches("./").to_string();
        out.push(ContentEntry {
            path,
            mode: header.mode()?,
            size: header.size()?,
        });
    }
    Ok(out)
}

/// Read one file out of a tar archive, gzip-compressed or not.
pub fn read_entry(data: &[u8], wanted: &str) -> Result<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(archive_reader(data));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().trim_start_matches("./").to_string();
        if path == wanted {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(Some(buf));
        }
    }
    Ok(None)
}

/// Render permission bits the way `ls -l` does (e.g. `-rw-r--r--`).
pub fn mode_string(mode: u32) -> String {
    let mut s = String::with_capacity(10);
    s.push('-');
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}
