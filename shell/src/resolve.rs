use nix::unistd::{AccessFlags, access};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Search path used when `PATH` is not set.
pub const DEFAULT_PATH: &str = "/usr/bin:/bin";

/// Resolve a command name to an executable file the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returned if it is an executable file.
/// - Relative with multiple components (e.g., `bin/tool` or `./tool`): checked relative to the
///   current directory.
/// - Single component: each directory in `search_paths` is tried in order.
/// - Empty name: `None`.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(x), None) if !path.starts_with(".") => {
            find_in_path(search_paths, x.as_os_str()).map(Cow::Owned)
        }
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(cmd))
        .find(|candidate| find_by_path(candidate).is_some())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.is_file() && access(path, AccessFlags::X_OK).is_ok() {
        Some(path)
    } else {
        None
    }
}
