//! Visual Studio environment capture and vendor kits.
//!
//! The only reliable way to obtain an MSVC build environment is to run the
//! `vcvarsall.bat` that ships with each installation and read back what it
//! set. A throwaway batch script calls the activation entry point for one
//! architecture, then appends a whitelisted set of variables to a transcript
//! file this module parses into a [`VariableMap`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use regex::Regex;

use crate::envmap::VariableMap;
use crate::kit::{CompilerFamily, CompilerMap, Kit, PreferredGenerator, VendorInstallation, VsArchitecture};
use crate::paths;
use crate::util::ProcessBuilder;

/// Architectures tried for every installation when building vendor kits.
pub const VS_KIT_ARCHITECTURES: [VsArchitecture; 6] = [
    VsArchitecture::X86,
    VsArchitecture::Amd64,
    VsArchitecture::X86Amd64,
    VsArchitecture::X86Arm,
    VsArchitecture::Amd64Arm,
    VsArchitecture::Amd64X86,
];

/// Variables read back from an activation, in transcript order.
const CAPTURE_VARIABLES: &[&str] = &[
    "CL", "_CL_", "INCLUDE", "LIBPATH", "LINK", "_LINK_", "LIB", "PATH", "TMP",
    "FRAMEWORKDIR", "FRAMEWORKDIR64", "FRAMEWORKVERSION", "FRAMEWORKVERSION64",
    "UCRTCONTEXTROOT", "UCRTVERSION", "UNIVERSALCRTSDKDIR", "VCINSTALLDIR",
    "VCTARGETSPATH", "WINDOWSLIBPATH", "WINDOWSSDKDIR", "WINDOWSSDKLIBVERSION",
    "WINDOWSSDKVERSION", "VISUALSTUDIOVERSION",
];

/// Generator name for a major version or a legacy `VS*COMNTOOLS` alias.
pub fn generator_name(key: &str) -> Option<&'static str> {
    let major = match key {
        "VS120COMNTOOLS" => "12",
        "VS140COMNTOOLS" => "14",
        other => other,
    };
    Some(match major {
        "10" => "Visual Studio 10 2010",
        "11" => "Visual Studio 11 2012",
        "12" => "Visual Studio 12 2013",
        "14" => "Visual Studio 14 2015",
        "15" => "Visual Studio 15 2017",
        "16" => "Visual Studio 16 2019",
        _ => return None,
    })
}

/// Human-readable name for an installation. Parallel release/preview
/// installations are disambiguated by the channel suffix.
pub fn vs_display_name(inst: &VendorInstallation) -> String {
    if let Some(display) = &inst.display_name {
        if let Some(channel) = &inst.channel_id {
            if let Some(idx) = channel.rfind('.') {
                if idx > 0 {
                    return format!("{} {}", display, &channel[idx + 1..]);
                }
            }
        }
        return display.clone();
    }
    inst.instance_id.clone()
}

fn common_tools_dir(inst: &VendorInstallation) -> PathBuf {
    inst.installation_path.join("Common7").join("Tools")
}

/// Activation entry point: pre-2017 installations keep `vcvarsall.bat`
/// directly under `VC`.
fn vcvars_path(inst: &VendorInstallation) -> PathBuf {
    let vc = inst.installation_path.join("VC");
    match inst.major_version() {
        Some(major) if major < 15 => vc.join("vcvarsall.bat"),
        _ => vc.join("Auxiliary").join("Build").join("vcvarsall.bat"),
    }
}

/// The batch script that activates one `(installation, architecture)` pair
/// and appends the captured variables to `env_file`.
fn activation_script(
    inst: &VendorInstallation,
    arch: VsArchitecture,
    env_file: &Path,
    return_dir: &Path,
) -> String {
    let mut lines = vec![
        "@echo off".to_string(),
        "cd /d \"%~dp0\"".to_string(),
        format!(
            "set \"VS{}0COMNTOOLS={}\"",
            inst.major_version().unwrap_or(0),
            common_tools_dir(inst).display()
        ),
        format!("call \"{}\" {} || exit", vcvars_path(inst).display(), arch),
        format!("cd /d \"{}\"", return_dir.display()),
    ];
    for var in CAPTURE_VARIABLES {
        lines.push(format!("echo {} := %{}% >> \"{}\"", var, var, env_file.display()));
    }
    lines.push(String::new());
    lines.join("\r\n")
}

/// Parse the `NAME := VALUE` transcript. Malformed non-empty lines are
/// skipped and logged.
fn parse_activation_transcript(text: &str) -> VariableMap {
    let line_re = Regex::new(r"^\s*(\w+) := ?(.*)$").unwrap();
    let mut env = VariableMap::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match line_re.captures(line) {
            Some(caps) => env.insert(caps[1].to_string(), caps[2].trim_end().to_string()),
            None => tracing::warn!("malformed activation line: {:?}", line),
        }
    }
    env
}

/// Adjustments applied to every successful activation capture.
fn postprocess_activation(
    env: &mut VariableMap,
    inst: &VendorInstallation,
    bundled_ninja: Option<&Path>,
) {
    // Pin the common-tools variable for the exact reported version so
    // side-by-side release and preview installations stay distinguishable.
    if let Some(version) = env.get_ci("VISUALSTUDIOVERSION").map(str::to_string) {
        let name = format!("VS{}COMNTOOLS", version.replace('.', ""));
        env.insert(name, common_tools_dir(inst).display().to_string());
    }

    // The generator must pick cl.exe rather than whatever its own compiler
    // search would find first.
    env.insert("CC", "cl.exe");
    env.insert("CXX", "cl.exe");

    if let Some(ninja_dir) = bundled_ninja {
        let ninja_dir = ninja_dir.display().to_string();
        match env.get_ci("PATH").map(str::to_string) {
            Some(path) if path.split(';').any(|entry| entry == ninja_dir) => {}
            Some(path) => env.insert_ci("PATH", format!("{};{}", path, ninja_dir)),
            None => env.insert("PATH", ninja_dir),
        }
    }
}

/// Capture the environment produced by activating `inst` for `arch`.
///
/// Returns `Ok(None)` when activation fails or produces no usable
/// environment; both temp files are removed on every exit path.
pub fn extract_vs_env(
    inst: &VendorInstallation,
    arch: VsArchitecture,
    bundled_ninja: Option<&Path>,
) -> Result<Option<VariableMap>> {
    if !cfg!(windows) {
        tracing::debug!("vendor activation is only available on Windows");
        return Ok(None);
    }

    let workdir = tempfile::Builder::new()
        .prefix("vs-kit-env-")
        .tempdir_in(paths::tmp_dir())
        .context("failed to create activation temp directory")?;
    let script_path = workdir.path().join("activate.bat");
    let env_path = workdir.path().join("activate.env");

    let return_dir = std::env::current_dir().unwrap_or_else(|_| paths::tmp_dir());
    std::fs::write(&script_path, activation_script(inst, arch, &env_path, &return_dir))
        .with_context(|| format!("failed to write {}", script_path.display()))?;

    let output = ProcessBuilder::new("cmd").arg("/c").arg(&script_path).exec()?;
    if !output.success() {
        tracing::debug!("activation of {} ({}) exited non-zero", vs_display_name(inst), arch);
    }

    let transcript = match std::fs::read_to_string(&env_path) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => {
            tracing::warn!("activation of {} ({}) produced no environment", vs_display_name(inst), arch);
            return Ok(None);
        }
    };

    let mut env = parse_activation_transcript(&transcript);
    if env.get_ci("INCLUDE").map_or(true, str::is_empty) {
        tracing::warn!("activation of {} ({}) did not set INCLUDE, discarding", vs_display_name(inst), arch);
        return Ok(None);
    }

    postprocess_activation(&mut env, inst, bundled_ninja);
    Ok(Some(env))
}

fn vendor_kit(inst: &VendorInstallation, arch: VsArchitecture) -> Kit {
    let name = format!("{} - {}", vs_display_name(inst), arch);
    let mut kit = Kit::for_vendor(name, inst.instance_id.as_str(), arch, None);
    kit.preferred_generator = inst
        .major_version()
        .and_then(|major| generator_name(&major.to_string()))
        .map(|name| PreferredGenerator {
            name: name.to_string(),
            toolset: None,
            platform: arch.generator_platform().map(String::from),
        });
    kit
}

/// Build vendor kits for every `(installation, architecture)` pair whose
/// activation yields a usable environment.
pub fn scan_vs_kits(installs: &[VendorInstallation], bundled_ninja: Option<&Path>) -> Vec<Kit> {
    let pairs: Vec<(&VendorInstallation, VsArchitecture)> = installs
        .iter()
        .flat_map(|inst| VS_KIT_ARCHITECTURES.iter().map(move |arch| (inst, *arch)))
        .collect();

    pairs
        .par_iter()
        .filter_map(|(inst, arch)| match extract_vs_env(inst, *arch, bundled_ninja) {
            Ok(Some(_)) => Some(vendor_kit(inst, *arch)),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!("activation of {} ({}) failed: {:#}", vs_display_name(inst), arch, err);
                None
            }
        })
        .collect()
}

/// Directories searched for clang-cl drivers.
pub fn clang_cl_search_dirs(installs: &[VendorInstallation]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut dirs = Vec::new();
    let mut add = |dir: PathBuf| {
        if seen.insert(dir.clone()) {
            dirs.push(dir);
        }
    };

    if let Ok(root) = std::env::var("LLVM_ROOT") {
        add(PathBuf::from(root).join("bin"));
    }
    for var in ["ProgramFiles", "ProgramFiles(x86)"] {
        if let Ok(base) = std::env::var(var) {
            add(PathBuf::from(base).join("LLVM").join("bin"));
        }
    }
    if let Some(path) = std::env::var_os("PATH") {
        std::env::split_paths(&path).for_each(&mut add);
    }
    for inst in installs {
        add(inst.installation_path.join("VC").join("Tools").join("Llvm").join("bin"));
    }
    dirs
}

/// The architecture a clang-cl driver builds for, from its target triple.
/// Only the 32-bit `i686-pc` prefix is recognized; everything else is
/// treated as 64-bit.
fn clang_cl_architecture(target: &str) -> VsArchitecture {
    if target.contains("i686-pc") {
        VsArchitecture::X86
    } else {
        VsArchitecture::Amd64
    }
}

/// Scan the clang-cl search set and pair each driver with every
/// installation.
pub fn scan_clang_cl_kits(installs: &[VendorInstallation]) -> Vec<Kit> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for dir in clang_cl_search_dirs(installs) {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("clang-cl"))
            })
            .collect();
        found.sort();
        candidates.extend(found);
    }

    candidates
        .par_iter()
        .filter_map(|bin| {
            let output = match ProcessBuilder::new(bin).arg("-v").exec() {
                Ok(out) if out.success() => out,
                Ok(_) => return None,
                Err(err) => {
                    tracing::debug!("clang-cl probe of {} failed: {:#}", bin.display(), err);
                    return None;
                }
            };
            let identity = super::probe::parse_verbose(CompilerFamily::Clang, &output.combined())?;
            let arch = clang_cl_architecture(identity.target.as_deref().unwrap_or_default());
            let compilers: CompilerMap = ["C", "CXX"]
                .iter()
                .map(|lang| (lang.to_string(), bin.to_path_buf()))
                .collect();
            let kits: Vec<Kit> = installs
                .iter()
                .map(|inst| {
                    let name = format!(
                        "Clang {} for MSVC with {} ({})",
                        identity.version,
                        vs_display_name(inst),
                        arch
                    );
                    Kit::for_vendor(name, inst.instance_id.as_str(), arch, Some(compilers.clone()))
                })
                .collect();
            Some(kits)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect()
}

/// Find the installation a kit's instance identifier refers to, accepting
/// both modern instance ids and the legacy `VisualStudio.<major>.0` form.
pub(crate) fn find_installation<'a>(
    id: &str,
    installs: &'a [VendorInstallation],
) -> Option<&'a VendorInstallation> {
    if let Some(found) = installs.iter().find(|inst| inst.instance_id == id) {
        return Some(found);
    }
    let legacy_major = id
        .strip_prefix("VisualStudio.")?
        .strip_suffix(".0")?
        .parse::<u32>()
        .ok()?;
    installs
        .iter()
        .find(|inst| inst.major_version() == Some(legacy_major))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installation(version: &str) -> VendorInstallation {
        VendorInstallation {
            installation_path: PathBuf::from(r"C:\VS"),
            installation_version: version.to_string(),
            instance_id: "1a2b3c4d".to_string(),
            display_name: Some("Visual Studio Community 2019".to_string()),
            channel_id: Some("VisualStudio.16.Release".to_string()),
            product_display_version: None,
        }
    }

    #[test]
    fn test_generator_table() {
        assert_eq!(generator_name("16"), Some("Visual Studio 16 2019"));
        assert_eq!(generator_name("14"), Some("Visual Studio 14 2015"));
        assert_eq!(generator_name("VS120COMNTOOLS"), Some("Visual Studio 12 2013"));
        assert_eq!(generator_name("VS140COMNTOOLS"), Some("Visual Studio 14 2015"));
        assert_eq!(generator_name("9"), None);
    }

    #[test]
    fn test_display_name_uses_channel_suffix() {
        let inst = installation("16.11.2");
        assert_eq!(vs_display_name(&inst), "Visual Studio Community 2019 Release");
    }

    #[test]
    fn test_display_name_without_channel() {
        let mut inst = installation("16.11.2");
        inst.channel_id = None;
        assert_eq!(vs_display_name(&inst), "Visual Studio Community 2019");
        inst.display_name = None;
        assert_eq!(vs_display_name(&inst), "1a2b3c4d");
    }

    #[test]
    fn test_vcvars_entry_point_by_version() {
        let modern = vcvars_path(&installation("16.11.2"));
        assert!(modern.to_string_lossy().contains("Auxiliary"));
        assert!(modern.ends_with("vcvarsall.bat"));

        let legacy = vcvars_path(&installation("14.0.25431"));
        assert!(!legacy.to_string_lossy().contains("Auxiliary"));
        assert!(legacy.ends_with("vcvarsall.bat"));
    }

    #[test]
    fn test_activation_script_contents() {
        let inst = installation("16.11.2");
        let script = activation_script(
            &inst,
            VsArchitecture::X86Amd64,
            Path::new(r"C:\tmp\activate.env"),
            Path::new(r"C:\work"),
        );
        assert!(script.starts_with("@echo off\r\n"));
        assert!(script.contains(r#"cd /d "%~dp0""#));
        assert!(script.contains(&format!(
            "set \"VS160COMNTOOLS={}\"",
            common_tools_dir(&inst).display()
        )));
        assert!(script.contains("vcvarsall.bat\" x86_amd64 || exit"));
        assert!(script.contains(r#"cd /d "C:\work""#));
        assert!(script.contains(r#"echo INCLUDE := %INCLUDE% >> "C:\tmp\activate.env""#));
        // Every whitelisted variable is captured.
        for var in CAPTURE_VARIABLES {
            assert!(script.contains(&format!("%{}%", var)));
        }
    }

    #[test]
    fn test_transcript_parsing_skips_malformed_lines() {
        let env = parse_activation_transcript(
            "INCLUDE := C:\\inc\r\nthis is not a variable\r\nLIB := \r\nPATH := C:\\bin\r\n",
        );
        assert_eq!(env.get("INCLUDE"), Some("C:\\inc"));
        assert_eq!(env.get("LIB"), Some(""));
        assert_eq!(env.get("PATH"), Some("C:\\bin"));
        assert_eq!(env.len(), 3);
    }

    #[test]
    fn test_postprocess_pins_version_and_compilers() {
        let inst = installation("16.11.2");
        let mut env = VariableMap::new();
        env.insert("INCLUDE", "C:\\inc");
        env.insert("VISUALSTUDIOVERSION", "16.0");
        postprocess_activation(&mut env, &inst, None);
        let tools = common_tools_dir(&inst).display().to_string();
        assert_eq!(env.get("VS160COMNTOOLS"), Some(tools.as_str()));
        assert_eq!(env.get("CC"), Some("cl.exe"));
        assert_eq!(env.get("CXX"), Some("cl.exe"));
    }

    #[test]
    fn test_postprocess_appends_bundled_ninja_once() {
        let inst = installation("16.11.2");
        let ninja = Path::new(r"C:\VS\Ninja");

        let mut env = VariableMap::new();
        env.insert("PATH", r"C:\bin");
        postprocess_activation(&mut env, &inst, Some(ninja));
        assert_eq!(env.get("PATH"), Some(r"C:\bin;C:\VS\Ninja"));

        // Already present: left untouched.
        let mut env = VariableMap::new();
        env.insert("PATH", r"C:\bin;C:\VS\Ninja");
        postprocess_activation(&mut env, &inst, Some(ninja));
        assert_eq!(env.get("PATH"), Some(r"C:\bin;C:\VS\Ninja"));
    }

    #[test]
    fn test_vendor_kit_shape() {
        let inst = installation("16.11.2");
        let kit = vendor_kit(&inst, VsArchitecture::Amd64);
        assert_eq!(kit.name, "Visual Studio Community 2019 Release - amd64");
        assert_eq!(kit.visual_studio(), Some(("1a2b3c4d", VsArchitecture::Amd64)));
        let generator = kit.preferred_generator.unwrap();
        assert_eq!(generator.name, "Visual Studio 16 2019");
        assert_eq!(generator.platform.as_deref(), Some("x64"));
    }

    #[test]
    fn test_vendor_kit_without_known_generator() {
        let inst = installation("17.0.1");
        let kit = vendor_kit(&inst, VsArchitecture::X86);
        assert!(kit.preferred_generator.is_none());
    }

    #[test]
    fn test_clang_cl_architecture_heuristic() {
        assert_eq!(clang_cl_architecture("i686-pc-windows-msvc"), VsArchitecture::X86);
        assert_eq!(clang_cl_architecture("x86_64-pc-windows-msvc"), VsArchitecture::Amd64);
        // Known quirk: other 32-bit triples read as 64-bit.
        assert_eq!(clang_cl_architecture("armv7-pc-windows-msvc"), VsArchitecture::Amd64);
    }

    #[test]
    fn test_find_installation_by_instance_and_legacy_form() {
        let installs = vec![installation("16.11.2"), {
            let mut old = installation("14.0.25431");
            old.instance_id = "legacy".to_string();
            old
        }];
        assert_eq!(
            find_installation("1a2b3c4d", &installs).map(|i| i.instance_id.as_str()),
            Some("1a2b3c4d")
        );
        assert_eq!(
            find_installation("VisualStudio.14.0", &installs).map(|i| i.instance_id.as_str()),
            Some("legacy")
        );
        assert!(find_installation("VisualStudio.9.0", &installs).is_none());
        assert!(find_installation("missing", &installs).is_none());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_extraction_is_disabled_off_windows() {
        let inst = installation("16.11.2");
        let env = extract_vs_env(&inst, VsArchitecture::Amd64, None).unwrap();
        assert!(env.is_none());
    }
}
