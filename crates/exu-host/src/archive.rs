//! ---
//! exu_section: "06-host-integration"
//! exu_subsection: "module"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Filesystem-backed component host."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
//! Artifact archives. The repository serves zip files; gzip tarballs are
//! accepted as well for locally built artifacts.

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Container formats recognised by [`unpack_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Zip,
    TarGz,
}

impl ArtifactFormat {
    /// Identify a payload by its leading magic bytes.
    pub fn detect(payload: &[u8]) -> Option<Self> {
        if payload.starts_with(b"PK\x03\x04") || payload.starts_with(b"PK\x05\x06") {
            Some(Self::Zip)
        } else if payload.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// Unpack an artifact into `dir`, creating it first. Entries that would
/// escape `dir` are skipped by both decoders.
pub fn unpack_into(payload: &[u8], dir: &Path) -> io::Result<()> {
    let format = ArtifactFormat::detect(payload).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "unrecognised artifact format")
    })?;
    fs::create_dir_all(dir)?;
    match format {
        ArtifactFormat::Zip => {
            let mut archive = ZipArchive::new(Cursor::new(payload)).map_err(zip_error)?;
            archive.extract(dir).map_err(zip_error)
        }
        ArtifactFormat::TarGz => {
            let decoder = GzDecoder::new(Cursor::new(payload));
            tar::Archive::new(decoder).unpack(dir)
        }
    }
}

/// Build a zip archive whose root is the content of `dir`, in the layout the
/// repository serves.
pub fn zip_directory(dir: &Path) -> io::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let name = relative.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_dir() {
            writer.add_directory(name, options).map_err(zip_error)?;
        } else {
            writer.start_file(name, options).map_err(zip_error)?;
            writer.write_all(&fs::read(entry.path())?)?;
        }
    }
    Ok(writer.finish().map_err(zip_error)?.into_inner())
}

/// Build a gzip tarball whose root is the content of `dir`.
pub fn pack_directory(dir: &Path) -> io::Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", dir)?;
    builder.into_inner()?.finish()
}

fn zip_error(err: ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> tempfile::TempDir {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("metadata.json"), b"{}").unwrap();
        fs::create_dir(src.path().join("schemas")).unwrap();
        fs::write(src.path().join("schemas/a.xml"), b"<a/>").unwrap();
        src
    }

    #[test]
    fn packed_directory_unpacks_identically() {
        let src = sample_tree();
        let payload = pack_directory(src.path()).unwrap();
        assert_eq!(ArtifactFormat::detect(&payload), Some(ArtifactFormat::TarGz));

        let dst = tempfile::tempdir().unwrap();
        unpack_into(&payload, &dst.path().join("out")).unwrap();
        assert_eq!(
            fs::read(dst.path().join("out/schemas/a.xml")).unwrap(),
            b"<a/>"
        );
        assert!(dst.path().join("out/metadata.json").is_file());
    }

    #[test]
    fn zipped_directory_unpacks_identically() {
        let src = sample_tree();
        let payload = zip_directory(src.path()).unwrap();
        assert!(payload.starts_with(b"PK\x03\x04"));

        let dst = tempfile::tempdir().unwrap();
        unpack_into(&payload, &dst.path().join("out")).unwrap();
        assert_eq!(
            fs::read(dst.path().join("out/schemas/a.xml")).unwrap(),
            b"<a/>"
        );
        assert!(dst.path().join("out/metadata.json").is_file());
    }

    #[test]
    fn truncated_zip_is_rejected() {
        let dst = tempfile::tempdir().unwrap();
        let err = unpack_into(b"PK\x03\x04truncated", dst.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn garbage_is_rejected() {
        let dst = tempfile::tempdir().unwrap();
        let err = unpack_into(b"not an archive", dst.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
