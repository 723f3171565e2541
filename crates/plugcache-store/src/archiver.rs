//! Package archive unpacking and hashing.

use base64::{Engine, engine::general_purpose::STANDARD};
use plugcache_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::Path;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

pub fn is_zip(data: &[u8]) -> bool {
    data.starts_with(ZIP_MAGIC)
}

/// SHA-256 of `data`, lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Lock-file `zh:` hash: the archive's own SHA-256.
pub fn hash_zh(data: &[u8]) -> String {
    format!("zh:{}", sha256_hex(data))
}

/// Lock-file `h1:` hash over the archive's file contents.
///
/// One `<sha256 hex>  <name>\n` line per zip entry, sorted by name, hashed
/// again and base64 encoded. Directory entries count too, with empty content.
pub fn hash_h1(data: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| Error::Internal(format!("Failed to open zip: {}", e)))?;

    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| Error::Internal(format!("Failed to read zip entry: {}", e)))?;
        let name = file.name().to_string();
        if name.contains('\n') {
            return Err(Error::Internal(format!("Invalid file name in archive: {:?}", name)));
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        files.push((name, sha256_hex(&content)));
    }
    files.sort();

    let mut summary = Sha256::new();
    for (name, digest) in &files {
        summary.update(format!("{}  {}\n", digest, name).as_bytes());
    }
    Ok(format!("h1:{}", STANDARD.encode(summary.finalize())))
}

/// Unpack a package into `dest`, which must not exist yet.
///
/// Zip archives are extracted with their file modes; anything else is an
/// opaque blob and is written verbatim as `fallback_name`.
pub fn unpack_package(data: &[u8], dest: &Path, fallback_name: &str) -> Result<()> {
    std::fs::create_dir_all(dest)?;

    if !is_zip(data) {
        std::fs::write(dest.join(fallback_name), data)?;
        return Ok(());
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| Error::Internal(format!("Failed to open zip: {}", e)))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| Error::Internal(format!("Failed to read zip entry: {}", e)))?;

        // Entries escaping the destination are rejected rather than skipped.
        let relative = file.enclosed_name().ok_or_else(|| {
            Error::Internal(format!("Unsafe path in archive: {}", file.name()))
        })?;
        let out_path = dest.join(relative);

        if file.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        std::fs::write(&out_path, &content)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o777))?;
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn make_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in files {
            writer
                .start_file(*name, SimpleFileOptions::default().unix_permissions(0o755))
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(hash_zh(b"hello"), format!("zh:{}", sha256_hex(b"hello")));
    }

    #[test]
    fn test_h1_ignores_entry_order() {
        let a = make_zip(&[("terraform-provider-aws", b"bin"), ("LICENSE", b"mit")]);
        let b = make_zip(&[("LICENSE", b"mit"), ("terraform-provider-aws", b"bin")]);
        let ha = hash_h1(&a).unwrap();
        assert!(ha.starts_with("h1:"));
        assert_eq!(ha, hash_h1(&b).unwrap());
        // Archive bytes differ, content hash does not.
        assert_ne!(hash_zh(&a), hash_zh(&b));
    }

    #[test]
    fn test_h1_tracks_content() {
        let a = make_zip(&[("terraform-provider-aws", b"bin-1")]);
        let b = make_zip(&[("terraform-provider-aws", b"bin-2")]);
        assert_ne!(hash_h1(&a).unwrap(), hash_h1(&b).unwrap());
    }

    #[test]
    fn test_h1_covers_directory_entries() {
        let flat = make_zip(&[("docs/README", b"x")]);

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.add_directory("docs/", SimpleFileOptions::default()).unwrap();
        writer.start_file("docs/README", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"x").unwrap();
        let nested = writer.finish().unwrap().into_inner();

        let mut summary = Sha256::new();
        summary.update(format!("{}  docs/\n", sha256_hex(b"")).as_bytes());
        summary.update(format!("{}  docs/README\n", sha256_hex(b"x")).as_bytes());
        let expected = format!("h1:{}", STANDARD.encode(summary.finalize()));

        assert_eq!(hash_h1(&nested).unwrap(), expected);
        assert_ne!(hash_h1(&flat).unwrap(), expected);
    }

    #[test]
    fn test_h1_rejects_non_zip() {
        assert!(hash_h1(b"not a zip").is_err());
    }

    #[test]
    fn test_unpack_zip() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("linux_amd64");
        let data = make_zip(&[("terraform-provider-aws", b"#!/bin/sh\n"), ("docs/README", b"x")]);

        unpack_package(&data, &dest, "unused.zip").unwrap();

        assert_eq!(
            std::fs::read(dest.join("terraform-provider-aws")).unwrap(),
            b"#!/bin/sh\n"
        );
        assert!(dest.join("docs/README").exists());
        assert!(!dest.join("unused.zip").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dest.join("terraform-provider-aws"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn test_unpack_opaque_blob() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("linux_amd64");

        unpack_package(b"opaque", &dest, "pkg.zip").unwrap();

        assert_eq!(std::fs::read(dest.join("pkg.zip")).unwrap(), b"opaque");
    }
}
