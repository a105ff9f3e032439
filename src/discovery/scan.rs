//! Tolerant directory scanning.

use std::path::{Path, PathBuf};

use anyhow::Result;
use rayon::prelude::*;

use crate::kit::Kit;

/// Apply `probe` to every entry of `dir` and collect the kits it yields.
///
/// A missing directory, a non-directory, or an unreadable directory all
/// produce an empty result. Probes run in parallel; entries are taken in
/// sorted name order so repeated scans of an unchanged directory produce
/// identical output. A failing probe is logged and dropped without
/// aborting the rest of the scan.
pub fn scan_directory<F>(dir: &Path, probe: F) -> Vec<Kit>
where
    F: Fn(&Path) -> Result<Option<Kit>> + Sync,
{
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!("cannot enumerate {}: {}", dir.display(), err);
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(e) => Some(e.path()),
            Err(err) => {
                tracing::debug!("skipping entry in {}: {}", dir.display(), err);
                None
            }
        })
        .collect();
    paths.sort();

    paths
        .par_iter()
        .filter_map(|path| match probe(path) {
            Ok(kit) => kit,
            Err(err) => {
                tracing::warn!("probe of {} failed: {:#}", path.display(), err);
                None
            }
        })
        .collect()
}
