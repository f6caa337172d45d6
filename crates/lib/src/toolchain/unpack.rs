use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

/// Whether `file_name` is an archive format [`unpack_tar_gz`] understands.
pub(super) fn is_tar_gz(file_name: &str) -> bool {
  file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz")
}

/// Unpacks a gzip tarball into `dest`, dropping the top-level directory
/// release tarballs wrap their contents in.
///
/// Entries that would escape `dest` are rejected.
pub(super) fn unpack_tar_gz(archive_path: &Path, dest: &Path) -> io::Result<u64> {
  let file = File::open(archive_path)?;
  let decoder = GzDecoder::new(BufReader::new(file));
  let mut archive = Archive::new(decoder);
  archive.set_preserve_permissions(true);
  fs::create_dir_all(dest)?;

  let mut unpacked = 0;
  for entry in archive.entries()? {
    let mut entry = entry?;
    let path = entry.path()?.into_owned();

    let stripped: PathBuf = path.components().skip(1).collect();
    if stripped.as_os_str().is_empty() {
      continue;
    }
    if stripped.components().any(|c| !matches!(c, Component::Normal(_))) {
      return Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("archive entry escapes destination: {}", path.display()),
      ));
    }

    let dest_path = dest.join(&stripped);
    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent)?;
    }

    entry.unpack(&dest_path)?;
    unpacked += 1;
  }

  Ok(unpacked)
}
