//! Kits document persistence and change detection.
//!
//! The kits file is a JSON array of kit objects, written by discovery and
//! freely edited by users between sessions. Loading accepts a relaxed
//! dialect (comments, trailing commas) and validates the document shape
//! before any kit is materialized; a document that fails validation loads
//! as empty with one diagnostic per violation.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use thiserror::Error;

use crate::diagnostics::Diagnostic;
use crate::kit::{Kit, VsArchitecture};

/// One schema violation, addressed by a JSON-path-like string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub data_path: String,
    pub message: String,
}

impl SchemaViolation {
    fn new(data_path: impl Into<String>, message: impl Into<String>) -> Self {
        SchemaViolation {
            data_path: data_path.into(),
            message: message.into(),
        }
    }
}

/// Why a kits document could not be loaded.
#[derive(Debug, Error)]
pub enum KitsDocError {
    #[error("failed to read kits file")]
    Io(#[source] std::io::Error),
    #[error("kits file is not valid JSON: {0}")]
    Syntax(String),
    #[error("kits file failed validation with {} violation(s)", .0.len())]
    Schema(Vec<SchemaViolation>),
}

/// Strictly read and validate a kits document.
///
/// A missing file is an empty document. Null array entries are dropped.
pub fn read_kits_document(path: &Path) -> Result<Vec<Kit>, KitsDocError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path).map_err(KitsDocError::Io)?;

    // json5 is a superset of JSON that allows comments and trailing commas.
    let doc: Value = json5::from_str(&text).map_err(|e| KitsDocError::Syntax(e.to_string()))?;

    let violations = validate_kits_document(&doc);
    if !violations.is_empty() {
        return Err(KitsDocError::Schema(violations));
    }

    let items = doc.as_array().cloned().unwrap_or_default();
    let mut kits = Vec::new();
    for item in items {
        if item.is_null() {
            continue;
        }
        match serde_json::from_value::<Kit>(item) {
            Ok(kit) => kits.push(kit),
            Err(err) => tracing::warn!("dropping unreadable kit entry: {}", err),
        }
    }
    Ok(kits)
}

/// Load a kits document, degrading every failure to an empty list with a
/// user-visible diagnostic.
pub fn load_kits(path: &Path) -> Vec<Kit> {
    match read_kits_document(path) {
        Ok(kits) => kits,
        Err(KitsDocError::Schema(violations)) => {
            let mut diag = Diagnostic::error(format!(
                "kits file {} does not describe valid kits",
                path.display()
            ))
            .with_location(path)
            .with_suggestion("fix the listed entries or delete the file to rescan");
            for violation in &violations {
                diag = diag.with_context(format!("{}: {}", violation.data_path, violation.message));
            }
            tracing::error!("{}", diag);
            Vec::new()
        }
        Err(err) => {
            tracing::error!("failed to load kits from {}: {:#}", path.display(), anyhow::Error::new(err));
            Vec::new()
        }
    }
}

/// Serialize kits to the canonical document text.
pub fn serialize_kits(kits: &[Kit]) -> Result<String> {
    let mut text = serde_json::to_string_pretty(kits).context("failed to serialize kits")?;
    text.push('\n');
    Ok(text)
}

/// Write kits to disk, creating parent directories as needed.
pub fn save_kits(path: &Path, kits: &[Kit]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, serialize_kits(kits)?)
        .with_context(|| format!("failed to write kits file: {}", path.display()))
}

/// Collapse name collisions, last writer wins, keeping first position.
pub fn dedupe_kits(kits: Vec<Kit>) -> Vec<Kit> {
    let mut out: Vec<Kit> = Vec::with_capacity(kits.len());
    for kit in kits {
        match out.iter_mut().find(|existing| existing.name == kit.name) {
            Some(existing) => {
                tracing::warn!("duplicate kit name `{}`, keeping the newer entry", kit.name);
                *existing = kit;
            }
            None => out.push(kit),
        }
    }
    out
}

/// The attributes whose change invalidates configured build state.
type MaterialTuple<'a> = (
    Option<&'a crate::kit::CompilerMap>,
    Option<&'a str>,
    Option<VsArchitecture>,
    Option<&'a std::path::PathBuf>,
    Option<&'a str>,
);

fn material_tuple(kit: &Kit) -> MaterialTuple<'_> {
    (
        kit.compilers(),
        kit.visual_studio().map(|(instance, _)| instance),
        kit.visual_studio().map(|(_, arch)| arch),
        kit.toolchain_file(),
        kit.preferred_generator.as_ref().map(|g| g.name.as_str()),
    )
}

/// Whether switching from `old` to `new` requires wiping cached build
/// state. A first selection never does; otherwise any change to the
/// material attributes does, while settings and environment tweaks do not.
pub fn change_needs_clean(new: &Kit, old: Option<&Kit>) -> bool {
    match old {
        None => false,
        Some(old) => material_tuple(new) != material_tuple(old),
    }
}

/// Validate the document shape, reporting every violation.
pub fn validate_kits_document(doc: &Value) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();

    let Some(items) = doc.as_array() else {
        violations.push(SchemaViolation::new("$", "expected an array of kits"));
        return violations;
    };

    for (index, item) in items.iter().enumerate() {
        if item.is_null() {
            continue;
        }
        let path = format!("[{}]", index);
        let Some(obj) = item.as_object() else {
            violations.push(SchemaViolation::new(path, "expected a kit object"));
            continue;
        };

        let name_path = format!("{}.name", path);
        match obj.get("name") {
            Some(Value::String(s)) if !s.is_empty() => {}
            Some(Value::String(_)) => violations.push(SchemaViolation::new(name_path, "must not be empty")),
            Some(_) => violations.push(SchemaViolation::new(name_path, "must be a string")),
            None => violations.push(SchemaViolation::new(name_path, "is required")),
        }

        let has_compilers = obj.contains_key("compilers");
        let has_vs = obj.contains_key("visualStudio");
        let has_toolchain = obj.contains_key("toolchainFile");
        if !has_compilers && !has_vs && !has_toolchain {
            violations.push(SchemaViolation::new(
                path.as_str(),
                "must have at least one of `compilers`, `visualStudio`, `toolchainFile`",
            ));
        }
        if has_toolchain && (has_compilers || has_vs) {
            violations.push(SchemaViolation::new(
                format!("{}.toolchainFile", path),
                "cannot be combined with `compilers` or `visualStudio`",
            ));
        }

        if has_compilers {
            check_string_map(obj, &path, "compilers", &mut violations);
        }
        if let Some(value) = obj.get("toolchainFile") {
            if !value.is_string() {
                violations.push(SchemaViolation::new(
                    format!("{}.toolchainFile", path),
                    "must be a string",
                ));
            }
        }

        let arch_path = format!("{}.visualStudioArchitecture", path);
        match obj.get("visualStudio") {
            Some(Value::String(_)) => match obj.get("visualStudioArchitecture") {
                Some(Value::String(arch)) if VsArchitecture::parse(arch).is_some() => {}
                Some(Value::String(arch)) => violations.push(SchemaViolation::new(
                    arch_path,
                    format!("`{}` is not a known architecture", arch),
                )),
                Some(_) => violations.push(SchemaViolation::new(arch_path, "must be a string")),
                None => violations.push(SchemaViolation::new(
                    arch_path,
                    "is required when `visualStudio` is set",
                )),
            },
            Some(_) => violations.push(SchemaViolation::new(
                format!("{}.visualStudio", path),
                "must be a string",
            )),
            None if obj.contains_key("visualStudioArchitecture") => {
                violations.push(SchemaViolation::new(arch_path, "requires `visualStudio`"));
            }
            None => {}
        }

        if let Some(value) = obj.get("preferredGenerator") {
            let gen_path = format!("{}.preferredGenerator", path);
            match value.as_object() {
                Some(generator) => {
                    if !matches!(generator.get("name"), Some(Value::String(_))) {
                        violations.push(SchemaViolation::new(
                            format!("{}.name", gen_path),
                            "is required and must be a string",
                        ));
                    }
                    for field in ["toolset", "platform"] {
                        if let Some(v) = generator.get(field) {
                            if !v.is_string() {
                                violations.push(SchemaViolation::new(
                                    format!("{}.{}", gen_path, field),
                                    "must be a string",
                                ));
                            }
                        }
                    }
                }
                None => violations.push(SchemaViolation::new(gen_path, "must be an object")),
            }
        }

        for field in ["cmakeSettings", "environmentVariables"] {
            if obj.contains_key(field) {
                check_string_map(obj, &path, field, &mut violations);
            }
        }

        if let Some(value) = obj.get("keep") {
            if !value.is_boolean() {
                violations.push(SchemaViolation::new(format!("{}.keep", path), "must be a boolean"));
            }
        }
    }

    violations
}

fn check_string_map(
    obj: &serde_json::Map<String, Value>,
    path: &str,
    field: &str,
    violations: &mut Vec<SchemaViolation>,
) {
    match obj.get(field).and_then(Value::as_object) {
        Some(map) => {
            for (key, value) in map {
                if !value.is_string() {
                    violations.push(SchemaViolation::new(
                        format!("{}.{}.{}", path, field, key),
                        "must be a string",
                    ));
                }
            }
        }
        None => violations.push(SchemaViolation::new(
            format!("{}.{}", path, field),
            "must be an object of strings",
        )),
    }
}
