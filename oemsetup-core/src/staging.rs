//! Assembles the installer payload in the staging directory.
use crate::error::{ProvisionError, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The only placeholder recognised in the answer-file template.
pub const TARGET_DISK_TOKEN: &str = "%TARGET_DISK%";

const BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB

/// Makes sure `path` is a directory, creating it and its parents if needed.
///
/// An existing directory is fine. An existing non-directory, or any failure
/// to create the directory, is an error.
pub fn ensure_dir(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            return Err(ProvisionError::NotADirectory {
                path: path.to_path_buf(),
            });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(ProvisionError::io(
                format!("failed to inspect {}", path.display()),
                e,
            ));
        }
    }
    fs::create_dir_all(path)
        .map_err(|e| ProvisionError::io(format!("failed to create {}", path.display()), e))
}

/// Fails with [`ProvisionError::MissingSourceFile`] unless `path` is a file.
pub fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ProvisionError::MissingSourceFile {
            path: path.to_path_buf(),
        })
    }
}

/// Copies `source` into the directory `dest_dir`, keeping its file name.
///
/// With `verify` set, both files are hashed afterwards and a mismatch is an
/// error. Returns the path of the copy.
pub fn copy_into(source: &Path, dest_dir: &Path, verify: bool) -> Result<PathBuf> {
    require_file(source)?;
    let file_name = source
        .file_name()
        .ok_or_else(|| ProvisionError::MissingSourceFile {
            path: source.to_path_buf(),
        })?;
    let dest = dest_dir.join(file_name);

    debug!("copying {} to {}", source.display(), dest.display());
    fs::copy(source, &dest).map_err(|e| {
        ProvisionError::io(
            format!("failed to copy {} to {}", source.display(), dest.display()),
            e,
        )
    })?;

    if verify && sha256_file(source)? != sha256_file(&dest)? {
        return Err(ProvisionError::VerificationFailed { path: dest });
    }
    Ok(dest)
}

fn sha256_file(path: &Path) -> Result<Vec<u8>> {
    let read_err = |e: io::Error| ProvisionError::io(format!("failed to read {}", path.display()), e);
    let mut file = File::open(path).map_err(read_err)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

/// Replaces every occurrence of [`TARGET_DISK_TOKEN`] with `target_disk`.
/// Anything else that looks like a placeholder is left as it is.
pub fn render_answer_file(template: &str, target_disk: &str) -> String {
    template.replace(TARGET_DISK_TOKEN, target_disk)
}

/// Renders the answer-file template at `template` into `dest`.
pub fn configure_answer_file(template: &Path, dest: &Path, target_disk: &Path) -> Result<()> {
    require_file(template)?;
    let contents = fs::read_to_string(template)
        .map_err(|e| ProvisionError::io(format!("failed to read {}", template.display()), e))?;
    let rendered = render_answer_file(&contents, &target_disk.to_string_lossy());
    fs::write(dest, rendered)
        .map_err(|e| ProvisionError::io(format!("failed to write {}", dest.display()), e))
}
