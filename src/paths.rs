//! Host-aware path resolution.
//!
//! Resolves the well-known directories the engine reads and writes, looks up
//! executables on `PATH`, and resolves the CMake binary itself, including the
//! copies bundled inside Visual Studio installations.

use std::path::{Path, PathBuf};

use directories::BaseDirs;

use crate::kit::VendorInstallation;

/// Read a directory path from an environment variable. Only Windows hosts
/// warn on a miss; on POSIX the variables involved are routinely unset.
fn env_dir(var: &str, warn: bool) -> Option<PathBuf> {
    match std::env::var(var) {
        Ok(v) => Some(PathBuf::from(v)),
        Err(_) => {
            if warn {
                tracing::warn!("{} is not set", var);
            }
            None
        }
    }
}

/// The user's home directory.
///
/// The named variables take precedence so callers see the documented
/// fallback chain; missing variables degrade with a warning, never a
/// failure.
pub fn user_home() -> PathBuf {
    if cfg!(windows) {
        let drive = std::env::var("HOMEDRIVE").unwrap_or_else(|_| {
            tracing::warn!("HOMEDRIVE is not set, assuming C:");
            "C:".to_string()
        });
        let path = std::env::var("HOMEPATH").unwrap_or_else(|_| {
            tracing::warn!("HOMEPATH is not set, assuming Users\\Public");
            "Users\\Public".to_string()
        });
        PathBuf::from(format!(
            "{}\\{}",
            drive.trim_end_matches('\\'),
            path.trim_start_matches('\\')
        ))
    } else {
        env_dir("HOME", false)
            .or_else(|| env_dir("PROFILE", false))
            .or_else(|| BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()))
            .unwrap_or_else(|| {
                tracing::warn!("neither HOME nor PROFILE is set");
                PathBuf::new()
            })
    }
}

/// Per-user local (non-roaming) data directory.
pub fn user_local_dir() -> PathBuf {
    if cfg!(windows) {
        env_dir("LOCALAPPDATA", true)
            .or_else(|| BaseDirs::new().map(|dirs| dirs.data_local_dir().to_path_buf()))
            .unwrap_or_else(|| user_home().join("AppData").join("Local"))
    } else {
        env_dir("XDG_DATA_HOME", false)
            .or_else(|| BaseDirs::new().map(|dirs| dirs.data_dir().to_path_buf()))
            .unwrap_or_else(|| user_home().join(".local").join("share"))
    }
}

/// Per-user roaming data directory.
pub fn user_roaming_dir() -> PathBuf {
    if cfg!(windows) {
        env_dir("APPDATA", true)
            .or_else(|| BaseDirs::new().map(|dirs| dirs.data_dir().to_path_buf()))
            .unwrap_or_else(|| user_home().join("AppData").join("Roaming"))
    } else {
        env_dir("XDG_CONFIG_HOME", false)
            .or_else(|| BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf()))
            .unwrap_or_else(|| user_home().join(".config"))
    }
}

/// Local data directory owned by this tool.
pub fn data_dir() -> PathBuf {
    user_local_dir().join("CMakeTools")
}

/// Roaming data directory owned by this tool.
pub fn roaming_data_dir() -> PathBuf {
    user_roaming_dir().join("CMakeTools")
}

/// Directory for throwaway files.
pub fn tmp_dir() -> PathBuf {
    if cfg!(windows) {
        env_dir("TEMP", true).unwrap_or_else(std::env::temp_dir)
    } else {
        PathBuf::from("/tmp")
    }
}

/// The user-level kits file.
pub fn user_kits_path() -> PathBuf {
    data_dir().join("cmake-tools-kits.json")
}

/// The kits file location used by earlier releases.
pub fn legacy_kits_path() -> PathBuf {
    let base = if cfg!(windows) {
        roaming_data_dir()
    } else {
        data_dir()
    };
    base.join("cmake-tools.json")
}

/// The workspace-local kits file.
pub fn workspace_kits_path(workspace: &Path) -> PathBuf {
    workspace.join(".vscode").join("cmake-kits.json")
}

/// First match for `name` on `PATH`, honoring `PATHEXT` on Windows.
pub fn which(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Outcome of resolving a CMake path.
///
/// When resolution lands on a copy bundled inside a Visual Studio
/// installation, the sibling bundled Ninja directory rides along so the
/// activation environment can put it on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmakeResolution {
    pub cmake: PathBuf,
    pub bundled_ninja: Option<PathBuf>,
}

impl CmakeResolution {
    fn plain(cmake: PathBuf) -> Self {
        CmakeResolution {
            cmake,
            bundled_ninja: None,
        }
    }
}

/// Resolve a user-provided CMake path template.
///
/// `"auto"` and `"cmake"` trigger a search: `PATH` first, then on Windows
/// the conventional install locations and finally the copies bundled with
/// each Visual Studio installation.
pub fn resolve_cmake(
    raw_path: &str,
    expand: Option<&dyn Fn(&str) -> String>,
    installations: &[VendorInstallation],
) -> Option<CmakeResolution> {
    let expanded = match expand {
        Some(f) => f(raw_path),
        None => raw_path.to_string(),
    };

    if expanded != "auto" && expanded != "cmake" {
        return Some(CmakeResolution::plain(PathBuf::from(expanded)));
    }

    if let Some(found) = which("cmake") {
        return Some(CmakeResolution::plain(found));
    }

    if cfg!(windows) {
        for var in ["ProgramFiles", "ProgramFiles(x86)"] {
            let Ok(base) = std::env::var(var) else {
                tracing::warn!("{} is not set", var);
                continue;
            };
            let candidate = PathBuf::from(base)
                .join("CMake")
                .join("bin")
                .join("cmake.exe");
            if candidate.exists() {
                return Some(CmakeResolution::plain(candidate));
            }
        }

        for inst in installations {
            if let Some(resolution) = bundled_cmake(&inst.installation_path) {
                return Some(resolution);
            }
        }
    }

    tracing::debug!("no cmake binary found for `{}`", raw_path);
    None
}

/// The CMake copy bundled under a Visual Studio tree, with its Ninja sibling.
fn bundled_cmake(install_path: &Path) -> Option<CmakeResolution> {
    let extensions = install_path
        .join("Common7")
        .join("IDE")
        .join("CommonExtensions")
        .join("Microsoft")
        .join("CMake");
    let cmake = extensions.join("CMake").join("bin").join("cmake.exe");
    if !cmake.exists() {
        return None;
    }
    let ninja = extensions.join("Ninja").join("ninja.exe");
    let bundled_ninja = ninja.exists().then(|| extensions.join("Ninja"));
    Some(CmakeResolution {
        cmake,
        bundled_ninja,
    })
}

/// Resolve the ctest binary that pairs with a CMake binary: an executable
/// sibling if present, the bare name otherwise.
pub fn resolve_ctest(cmake_path: &Path) -> PathBuf {
    let name = if cfg!(windows) { "ctest.exe" } else { "ctest" };
    if let Some(dir) = cmake_path.parent() {
        let sibling = dir.join(name);
        if is_executable(&sibling) {
            return sibling;
        }
    }
    PathBuf::from("ctest")
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
