//! Lexical path helpers for the validator.
//!
//! Resolution here is deliberately lexical: the validator reasons about a
//! mount plan that has not been applied yet, so nothing may consult symlinks
//! or the state of the live filesystem beyond an access probe.

use std::path::{Component, Path, PathBuf};

use nix::unistd::{access, AccessFlags};

/// Collapse `.`, `..` and repeated separators without touching the
/// filesystem. Relative paths come back unchanged in meaning (they are
/// rejected later by the validator anyway).
pub fn expand(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::RootDir => out.push("/"),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
            Component::Prefix(_) => {}
        }
    }
    if out.as_os_str().is_empty() {
        out.push("/");
    }
    out
}

/// Join `path` under `root`, treating an absolute `path` as rooted at
/// `root`. Used to compose a chdir target beneath a chroot.
pub fn join_under(root: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix("/") {
        Ok(rel) => root.join(rel),
        Err(_) => root.join(path),
    }
}

/// True when the invoker can reach `path` with the given access mode.
pub fn accessible(path: &Path, mode: AccessFlags) -> bool {
    access(path, mode).is_ok()
}

/// Render an access mode the way it appears in diagnostics ("r", "rx", ...).
pub fn mode_str(mode: AccessFlags) -> String {
    let mut out = String::new();
    if mode.contains(AccessFlags::R_OK) {
        out.push('r');
    }
    if mode.contains(AccessFlags::W_OK) {
        out.push('w');
    }
    if mode.contains(AccessFlags::X_OK) {
        out.push('x');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_collapses_dots() {
        assert_eq!(expand(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(expand(Path::new("/a//b/")), PathBuf::from("/a/b"));
        assert_eq!(expand(Path::new("/../..")), PathBuf::from("/"));
        assert_eq!(expand(Path::new("/")), PathBuf::from("/"));
    }

    #[test]
    fn join_under_reroots_absolute_paths() {
        assert_eq!(
            join_under(Path::new("/jail"), Path::new("/work")),
            PathBuf::from("/jail/work")
        );
        assert_eq!(
            join_under(Path::new("/jail"), Path::new("work")),
            PathBuf::from("/jail/work")
        );
    }

    #[test]
    fn mode_rendering() {
        assert_eq!(mode_str(AccessFlags::R_OK), "r");
        assert_eq!(mode_str(AccessFlags::R_OK | AccessFlags::X_OK), "rx");
    }

    #[test]
    fn accessible_probes_real_fs() {
        assert!(accessible(Path::new("/"), AccessFlags::R_OK | AccessFlags::X_OK));
        assert!(!accessible(
            Path::new("/nonexistent-corral-probe"),
            AccessFlags::R_OK
        ));
    }
}
