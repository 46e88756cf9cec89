use std::{
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use rand::{distributions::Alphanumeric, Rng};

use crate::action::ActionErrorKind;

/// Remove the file at `path`, a file which is already gone is not an error
#[tracing::instrument(level = "trace", skip_all, fields(path = %path.display()))]
pub(crate) async fn remove_file(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::trace!("Already removed");
            Ok(())
        },
        Err(e) => Err(e),
    }
}

/// A scratch path next to `destination`, so the final rename never crosses filesystems
fn scratch_path(destination: &Path) -> PathBuf {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{name}.{suffix}.tmp"))
}

/// Write `body` to `destination` with `mode`, replacing it in one rename
///
/// On failure the scratch file is removed and `destination` is left as it was.
#[tracing::instrument(level = "trace", skip_all, fields(destination = %destination.display(), mode = %format!("{mode:#o}")))]
pub(crate) async fn write_atomic(
    destination: &Path,
    body: &str,
    mode: u32,
) -> Result<(), ActionErrorKind> {
    let scratch = scratch_path(destination);

    let res = async {
        tokio::fs::write(&scratch, body)
            .await
            .map_err(|e| ActionErrorKind::Write(scratch.clone(), e))?;
        tokio::fs::set_permissions(&scratch, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| ActionErrorKind::SetPermissions(scratch.clone(), e))?;
        tokio::fs::rename(&scratch, destination)
            .await
            .map_err(|e| ActionErrorKind::Rename(scratch.clone(), destination.to_path_buf(), e))
    }
    .await;

    if res.is_err() {
        if let Err(err) = remove_file(&scratch).await {
            tracing::debug!(path = %scratch.display(), error = %err, "Could not remove scratch file");
        }
    }
    res
}
