use std::path::{Component, Path, PathBuf};

/// Absolute, symlink-resolved form of `path`. Paths that do not exist yet
/// resolve through their nearest existing ancestor.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut pending = Vec::new();
    let mut base = absolute.as_path();
    loop {
        if let Ok(resolved) = base.canonicalize() {
            let mut result = resolved;
            for part in pending.iter().rev() {
                result.push(part);
            }
            return lexical(&result);
        }
        match (base.parent(), base.components().next_back()) {
            (Some(parent), Some(last)) => {
                pending.push(last.as_os_str().to_os_string());
                base = parent;
            }
            _ => return lexical(&absolute),
        }
    }
}

fn lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn same_file(left: &Path, right: &Path) -> bool {
    normalize_path(left) == normalize_path(right)
}
