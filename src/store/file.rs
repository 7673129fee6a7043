//! Owner-only file helpers backing the token and key files.

// std
use std::{
	fs::{self, File, OpenOptions},
	io::{ErrorKind, Write},
};
// self
use crate::{_prelude::*, store::StoreError};

/// Reads `path`, mapping a missing file to `None`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
	match fs::read(path) {
		Ok(bytes) => Ok(Some(bytes)),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
		Err(e) => Err(StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		}),
	}
}

/// Replaces `path` wholesale: writes a `0600` sibling, syncs it, then renames it into place.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
	ensure_parent_exists(path)?;

	let tmp_path = tmp_sibling(path);

	{
		let mut file = create_private(&tmp_path)?;

		file.write_all(contents).map_err(|e| StoreError::Backend {
			message: format!("Failed to write {}: {e}", tmp_path.display()),
		})?;
		file.sync_all().map_err(|e| StoreError::Backend {
			message: format!("Failed to sync {}: {e}", tmp_path.display()),
		})?;
	}

	fs::rename(&tmp_path, path).map_err(|e| {
		let _ = fs::remove_file(&tmp_path);

		StoreError::Backend { message: format!("Failed to replace {}: {e}", path.display()) }
	})
}

/// Deletes `path`, ignoring a file that is already gone.
pub(crate) fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
	match fs::remove_file(path) {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
		Err(e) => Err(StoreError::Backend {
			message: format!("Failed to remove {}: {e}", path.display()),
		}),
	}
}

fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", parent.display()),
		})?;
	}

	Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
	let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();

	name.push(".tmp");

	path.with_file_name(name)
}

fn create_private(path: &Path) -> Result<File, StoreError> {
	let mut options = OpenOptions::new();

	options.write(true).create(true).truncate(true);

	#[cfg(unix)]
	{
		use std::os::unix::fs::OpenOptionsExt;

		options.mode(0o600);
	}

	let file = options.open(path).map_err(|e| StoreError::Backend {
		message: format!("Failed to create {}: {e}", path.display()),
	})?;

	// A pre-existing tmp file keeps its old mode under `mode()`, so tighten explicitly.
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;

		file.set_permissions(fs::Permissions::from_mode(0o600)).map_err(|e| {
			StoreError::Backend {
				message: format!("Failed to restrict {}: {e}", path.display()),
			}
		})?;
	}

	Ok(file)
}
