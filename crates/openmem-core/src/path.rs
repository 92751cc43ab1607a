use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, LayoutError>;

/// No usable location could be resolved for a store
#[derive(Debug)]
pub struct LayoutError(String);

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Layout error: {}", self.0)
    }
}

impl std::error::Error for LayoutError {}

/// Name of the per-project state directory
pub const MEMORY_DIR_NAME: &str = ".open-mem";

/// Per-project state directory: `<projectRoot>/.open-mem`
pub fn memory_dir(project_root: &Path) -> PathBuf {
    project_root.join(MEMORY_DIR_NAME)
}

/// Per-project database file: `<projectRoot>/.open-mem/memory.db`
pub fn database_path(project_root: &Path) -> PathBuf {
    memory_dir(project_root).join("memory.db")
}

/// Per-project user config overrides: `<projectRoot>/.open-mem/config.json`
pub fn config_path(project_root: &Path) -> PathBuf {
    memory_dir(project_root).join("config.json")
}

/// Root directory of the optional user-scope store, shared across projects.
///
/// An explicit override or the `OPENMEM_PATH` environment variable names the
/// directory outright (tilde-expanded). Without either, the store lives under
/// the platform data directory, or as a dot-directory in `$HOME` on systems
/// that have no notion of one. The same `.open-mem`/`memory.db` layout as a
/// project root then applies underneath.
pub fn user_data_dir(override_path: Option<&str>) -> Result<PathBuf> {
    if let Some(named) = override_path
        .map(str::to_owned)
        .or_else(|| std::env::var("OPENMEM_PATH").ok())
    {
        return Ok(expand_tilde(&named));
    }

    dirs::data_dir()
        .map(|data| data.join("open-mem"))
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(MEMORY_DIR_NAME)))
        .ok_or_else(|| {
            LayoutError(
                "no data directory or HOME available for the user-scope store".to_string(),
            )
        })
}

fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

/// Canonicalize a project directory across git worktrees.
///
/// If the directory is inside a linked worktree (git-dir and git-common-dir
/// differ), all worktrees of the repository map to the main checkout: the
/// parent of the common git directory. Non-repositories and any git failure
/// resolve to the input unchanged.
pub fn canonicalize_project_root(dir: &Path) -> PathBuf {
    match detect_git_common_dir(dir) {
        Some(common_dir) => common_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dir.to_path_buf()),
        None => dir.to_path_buf(),
    }
}

/// Detect the shared git directory of a linked worktree.
///
/// Returns Some only when git-dir and git-common-dir disagree, which is what
/// distinguishes a worktree from a regular checkout. Non-repositories and
/// git failures return None.
fn detect_git_common_dir(path: &Path) -> Option<PathBuf> {
    let git_dir = git_path_query(path, "--git-dir")?;
    let common_dir = git_path_query(path, "--git-common-dir")?;
    (git_dir != common_dir).then_some(common_dir)
}

/// Run `git rev-parse <flag>` in a directory, normalized for comparison
fn git_path_query(dir: &Path, flag: &str) -> Option<PathBuf> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", flag])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let raw = String::from_utf8_lossy(&output.stdout);
    Some(normalize_path(Path::new(raw.trim())))
}

/// Absolute, symlink-resolved form of a path where the filesystem allows it
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
