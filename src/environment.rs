//! Effective kit environments.
//!
//! The environment a kit's tools run under is composed from three layers
//! with fixed precedence: the host process environment, the kit's declared
//! overrides, and the vendor activation environment for Visual Studio kits.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::discovery::probe::MINGW_PATH_VAR;
use crate::discovery::vs;
use crate::envmap::VariableMap;
use crate::kit::{Kit, VendorInstallation};

/// Collaborators needed while composing an environment.
pub struct EnvOptions<'a> {
    /// Visual Studio installations, for resolving vendor kits.
    pub installations: &'a [VendorInstallation],
    /// Placeholder expansion applied to kit-declared values.
    pub expand: Option<&'a dyn Fn(&str) -> String>,
    /// Bundled Ninja directory recorded while resolving CMake.
    pub bundled_ninja: Option<&'a Path>,
}

impl Default for EnvOptions<'_> {
    fn default() -> Self {
        EnvOptions {
            installations: &[],
            expand: None,
            bundled_ninja: None,
        }
    }
}

/// Compose the environment for invoking a kit's tools.
pub fn effective_env(kit: &Kit, opts: &EnvOptions<'_>) -> Result<VariableMap> {
    let mut env: VariableMap = std::env::vars().collect();

    if let Some(overrides) = &kit.environment_variables {
        for (key, value) in overrides.iter() {
            let value = match opts.expand {
                Some(expand) => expand(value),
                None => value.to_string(),
            };
            env.insert(key, value);
        }
    }

    if let Some((instance, arch)) = kit.visual_studio() {
        match vs::find_installation(instance, opts.installations) {
            Some(inst) => match vs::extract_vs_env(inst, arch, opts.bundled_ninja)? {
                Some(vendor) => merge_vendor_env(&mut env, &vendor, cfg!(windows)),
                None => tracing::warn!(
                    "activation for kit `{}` produced no environment",
                    kit.name
                ),
            },
            None => tracing::warn!(
                "kit `{}` references unknown installation `{}`",
                kit.name,
                instance
            ),
        }
    }

    patch_mingw_path(&mut env);
    Ok(env)
}

/// Merge a vendor activation map over the composed environment. On Windows
/// the incoming keys are uppercased so `PATH`/`Path`/`path` collapse into a
/// single entry.
fn merge_vendor_env(env: &mut VariableMap, vendor: &VariableMap, uppercase: bool) {
    for (key, value) in vendor.iter() {
        let key = if uppercase {
            key.to_uppercase()
        } else {
            key.to_string()
        };
        env.insert_ci(key, value);
    }
}

/// Append the MinGW tool directory to the path variable, if the merged
/// environment carries one.
fn patch_mingw_path(env: &mut VariableMap) {
    let Some(mingw_dir) = env.get(MINGW_PATH_VAR).map(str::to_string) else {
        return;
    };
    let key = if env.get("PATH").is_some() {
        "PATH"
    } else if env.get("Path").is_some() {
        "Path"
    } else {
        return;
    };
    let patched = format!("{};{}", env.get(key).unwrap_or_default(), mingw_dir);
    env.insert(key, patched);
}

/// Locate `cl` through a Windows-origin environment: every `PATH` directory
/// crossed with every `PATHEXT` extension, case-insensitive on the
/// variable names.
pub fn find_cl(env: &VariableMap) -> Option<PathBuf> {
    let path = env.get_ci("PATH")?;
    let extensions: Vec<String> = match env.get_ci("PATHEXT") {
        Some(exts) => exts.split(';').map(String::from).collect(),
        None => vec![String::new()],
    };

    for dir in path.split(';').filter(|d| !d.is_empty()) {
        for ext in &extensions {
            let candidate = Path::new(dir).join(format!("cl{}", ext));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
