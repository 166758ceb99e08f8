use std::path::{Component, Path, PathBuf};

use crate::foundation::error::RenderFailure;

/// Validate an externally-supplied asset path against the trusted root.
///
/// Syntax is checked before any filesystem access: parent-traversal segments,
/// absolute paths and foreign-syntax separators (backslash on POSIX) are all
/// rejected as `frame_fatal`, in both native and foreign path syntax. A
/// syntactically clean path that does not exist yet is `transient` (the asset
/// may still be on its way); one that escapes the root through a symlink is
/// caught by canonical containment and is `frame_fatal`.
pub fn resolve_asset_path(raw: &str, trusted_root: &Path) -> Result<PathBuf, RenderFailure> {
    if raw.trim().is_empty() {
        return Err(RenderFailure::frame_fatal("asset path is empty"));
    }
    if raw.contains('\0') {
        return Err(RenderFailure::frame_fatal("asset path contains NUL"));
    }
    // Foreign separators are rejected outright rather than normalized; on
    // POSIX a backslash is a legal file-name byte and would otherwise smuggle
    // `..\` segments past component checks.
    if raw.contains('\\') {
        return Err(RenderFailure::frame_fatal(format!(
            "asset path '{raw}' contains a foreign path separator"
        )));
    }

    let candidate = Path::new(raw);
    if candidate.is_absolute() || has_windows_drive_prefix(raw) {
        return Err(RenderFailure::frame_fatal(format!(
            "absolute asset path '{raw}' rejected"
        )));
    }
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                return Err(RenderFailure::frame_fatal(format!(
                    "asset path '{raw}' contains a parent-traversal segment"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(RenderFailure::frame_fatal(format!(
                    "absolute asset path '{raw}' rejected"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    let joined = trusted_root.join(candidate);
    if !joined.exists() {
        return Err(RenderFailure::transient(format!(
            "asset '{raw}' not yet present under trusted root"
        )));
    }

    let root = trusted_root.canonicalize().map_err(|e| {
        RenderFailure::transient(format!(
            "cannot canonicalize trusted root '{}': {e}",
            trusted_root.display()
        ))
    })?;
    let resolved = joined.canonicalize().map_err(|e| {
        RenderFailure::transient(format!("cannot canonicalize asset '{raw}': {e}"))
    })?;
    if !resolved.starts_with(&root) {
        return Err(RenderFailure::frame_fatal(format!(
            "asset path '{raw}' escapes the trusted root"
        )));
    }

    Ok(resolved)
}

fn has_windows_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::error::FailureClass;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("frameforge_paths_{}_{tag}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn accepts_existing_relative_path() {
        let root = temp_root("ok");
        std::fs::create_dir_all(root.join("art")).unwrap();
        std::fs::write(root.join("art/cover.png"), b"png").unwrap();
        let resolved = resolve_asset_path("art/cover.png", &root).unwrap();
        assert!(resolved.ends_with("art/cover.png"));
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_asset_is_transient() {
        let root = temp_root("missing");
        let err = resolve_asset_path("not_here.png", &root).unwrap_err();
        assert_eq!(err.class, FailureClass::Transient);
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn traversal_and_absolute_paths_are_frame_fatal() {
        let root = temp_root("bad");
        for raw in [
            "../escape.png",
            "a/../../escape.png",
            "/etc/passwd",
            "..\\windows\\escape.png",
            "C:\\windows\\escape.png",
            "C:/windows/escape.png",
            "art\\cover.png",
            "",
        ] {
            let err = resolve_asset_path(raw, &root).unwrap_err();
            assert_eq!(err.class, FailureClass::FrameFatal, "path: {raw:?}");
        }
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_caught_by_canonical_containment() {
        let root = temp_root("symlink");
        let outside = temp_root("symlink_outside");
        std::fs::write(outside.join("secret.png"), b"png").unwrap();
        std::os::unix::fs::symlink(outside.join("secret.png"), root.join("link.png")).unwrap();

        let err = resolve_asset_path("link.png", &root).unwrap_err();
        assert_eq!(err.class, FailureClass::FrameFatal);

        std::fs::remove_dir_all(&root).unwrap();
        std::fs::remove_dir_all(&outside).unwrap();
    }
}
