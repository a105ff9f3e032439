//! Toolchain kit discovery.
//!
//! [`scan`] composes the individual probes into one entry point: compiler
//! kits from `PATH`-derived directories first, then Visual Studio vendor
//! kits, then clang-cl kits. Independent probes run with full overlap; the
//! output order is deterministic for a given filesystem state.

pub mod probe;
pub mod scan;
pub mod vs;

pub use probe::probe_compiler;
pub use scan::scan_directory;

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::PathBuf;

use rayon::prelude::*;

use crate::kit::{Kit, VendorInstallation};

/// Inputs for a discovery run.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Extra MinGW roots to scan (`<dir>/bin` each), Windows only.
    pub mingw_search_dirs: Vec<PathBuf>,
    /// Visual Studio installations, from the platform enumerator.
    pub installations: Vec<VendorInstallation>,
    /// Bundled Ninja directory recorded while resolving CMake, threaded
    /// into vendor activation for PATH patching.
    pub bundled_ninja: Option<PathBuf>,
}

/// Scan the machine for usable toolchain kits.
pub fn scan(opts: &ScanOptions) -> Vec<Kit> {
    let dirs = scan_paths(opts);
    tracing::debug!("scanning {} directories for compilers", dirs.len());

    let mut kits: Vec<Kit> = dirs
        .par_iter()
        .map(|dir| scan_directory(dir, probe_compiler))
        .collect::<Vec<Vec<Kit>>>()
        .into_iter()
        .flatten()
        .collect();

    if cfg!(windows) {
        kits.extend(vs::scan_vs_kits(
            &opts.installations,
            opts.bundled_ninja.as_deref(),
        ));
        kits.extend(vs::scan_clang_cl_kits(&opts.installations));
    }

    tracing::debug!("discovery produced {} kits", kits.len());
    kits
}

/// The ordered, de-duplicated set of directories to scan for compilers.
fn scan_paths(opts: &ScanOptions) -> Vec<PathBuf> {
    let mingw = if cfg!(windows) {
        opts.mingw_search_dirs.as_slice()
    } else {
        &[]
    };
    dedup_scan_paths(std::env::var_os("PATH"), mingw)
}

fn dedup_scan_paths(path: Option<OsString>, mingw_search_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut dirs = Vec::new();

    if let Some(path) = path {
        for dir in std::env::split_paths(&path) {
            if !dir.as_os_str().is_empty() && seen.insert(dir.clone()) {
                dirs.push(dir);
            }
        }
    }
    for dir in mingw_search_dirs {
        let bin = dir.join("bin");
        if seen.insert(bin.clone()) {
            dirs.push(bin);
        }
    }
    dirs
}
