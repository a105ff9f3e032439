//! Compiler probing.
//!
//! Given a candidate binary, decide whether it looks like a supported
//! compiler driver, run it with `-v`, parse the vendor's free-form version
//! banner into a [`CompilerIdentity`], and shape the result into a [`Kit`].

use std::path::Path;

use anyhow::Result;
use regex::Regex;

use crate::kit::{CompilerFamily, CompilerIdentity, CompilerMap, Kit};
use crate::util::ProcessBuilder;

/// Environment variable carrying the MinGW tool directory for PATH patching.
pub const MINGW_PATH_VAR: &str = "CMT_MINGW_PATH";

/// Basename classification: the family plus any cross-target triple prefix.
fn classify(file_name: &str) -> Option<(CompilerFamily, Option<String>)> {
    let gcc = Regex::new(r"^((?:[\w.]+-)*)gcc(?:-\d+(?:\.\d+)*)?(?:\.exe)?$").unwrap();
    let clang = Regex::new(r"^clang(?:-\d+(?:\.\d+)*)?(?:\.exe)?$").unwrap();

    if let Some(caps) = gcc.captures(file_name) {
        let triple = caps
            .get(1)
            .map(|m| m.as_str().trim_end_matches('-').to_string())
            .filter(|t| !t.is_empty());
        return Some((CompilerFamily::Gcc, triple));
    }
    if clang.is_match(file_name) {
        return Some((CompilerFamily::Clang, None));
    }
    None
}

/// Parse `-v` output into an identity. The two families share everything
/// but the version banner; clang-cl prints the same banner as clang.
pub(crate) fn parse_verbose(family: CompilerFamily, text: &str) -> Option<CompilerIdentity> {
    let version_re = match family {
        CompilerFamily::Gcc => Regex::new(r"^gcc version (\d+(?:\.\d+)*)"),
        CompilerFamily::Clang => {
            Regex::new(r"^(?:Apple LLVM|Apple clang|clang) version (\d+(?:\.\d+)*)")
        }
    }
    .unwrap();
    let field_re = Regex::new(r"^(Target|Thread model|InstalledDir):\s+(.*)$").unwrap();

    let mut identity = None;
    let mut target = None;
    let mut thread_model = None;
    let mut installed_dir = None;
    for line in text.lines() {
        if let Some(caps) = version_re.captures(line) {
            identity = Some((caps[1].to_string(), line.trim().to_string()));
        } else if let Some(caps) = field_re.captures(line) {
            let value = caps[2].trim();
            match &caps[1] {
                "Target" => target = Some(value.to_string()),
                "Thread model" => thread_model = Some(value.to_string()),
                _ => installed_dir = Some(value.into()),
            }
        }
    }

    let (version, full_version) = identity?;
    Some(CompilerIdentity {
        family,
        version,
        full_version,
        target,
        thread_model,
        installed_dir,
    })
}

/// The C++ driver name that pairs with a C driver basename, version suffix
/// and triple prefix preserved (`x86_64-linux-gnu-gcc-9` -> `...-g++-9`).
fn sibling_cxx_name(file_name: &str, family: CompilerFamily) -> String {
    match family {
        CompilerFamily::Gcc => file_name.replacen("gcc", "g++", 1),
        CompilerFamily::Clang => file_name.replacen("clang", "clang++", 1),
    }
}

/// Whether `mingw32-make -v` output identifies a usable MinGW make.
fn looks_like_mingw_make(text: &str) -> bool {
    let mut lines = text.lines();
    let first_ok = lines.next().is_some_and(|l| l.contains("Make"));
    let second_ok = lines.next().is_some_and(|l| l.contains("mingw32"));
    first_ok && second_ok
}

/// Run a candidate with `-v` and absorb expected spawn failures as `None`.
fn run_version_probe(bin: &Path) -> Result<Option<crate::util::ProcessOutput>> {
    match ProcessBuilder::new(bin).arg("-v").exec() {
        Ok(out) => Ok(Some(out)),
        Err(err) => {
            if let Some(io) = err.root_cause().downcast_ref::<std::io::Error>() {
                match io.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                        return Ok(None)
                    }
                    // ERROR_BAD_EXE_FORMAT: a non-executable on Windows.
                    _ if cfg!(windows) && io.raw_os_error() == Some(193) => return Ok(None),
                    _ => {}
                }
            }
            Err(err)
        }
    }
}

/// Probe a single binary and emit a kit if it is a supported compiler.
///
/// Non-compilers, failing probes, and unrecognizable output all yield
/// `Ok(None)`; only unexpected I/O surfaces as an error, which the scan
/// layer logs and drops.
pub fn probe_compiler(bin: &Path) -> Result<Option<Kit>> {
    let Some(file_name) = bin.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let Some((family, triple)) = classify(file_name) else {
        return Ok(None);
    };

    let Some(output) = run_version_probe(bin)? else {
        return Ok(None);
    };
    if !output.success() {
        tracing::debug!("`{} -v` exited non-zero, skipping", bin.display());
        return Ok(None);
    }

    let text = output.combined();
    let Some(identity) = parse_verbose(family, &text) else {
        tracing::debug!("unrecognized version output from {}", bin.display());
        return Ok(None);
    };

    // The MSVC-compatible clang driver is discovered separately as clang-cl.
    if family == CompilerFamily::Clang
        && identity.target.as_deref().is_some_and(|t| t.contains("msvc"))
    {
        tracing::debug!("{} targets MSVC, skipping", bin.display());
        return Ok(None);
    }

    let mut compilers = CompilerMap::new();
    compilers.insert("C".to_string(), bin.to_path_buf());
    if let Some(dir) = bin.parent() {
        let cxx = dir.join(sibling_cxx_name(file_name, family));
        if cxx.exists() {
            compilers.insert("CXX".to_string(), cxx);
        }
    }

    let name = match (family, &triple) {
        (CompilerFamily::Gcc, Some(triple)) => {
            format!("GCC for {} {}", triple, identity.version)
        }
        (CompilerFamily::Gcc, None) => format!("GCC {}", identity.version),
        (CompilerFamily::Clang, _) => format!("Clang {}", identity.version),
    };

    tracing::debug!("found {} at {}", name, bin.display());
    let mut kit = Kit::for_compilers(name, compilers);
    if family == CompilerFamily::Gcc {
        augment_mingw(&mut kit, bin);
    }
    Ok(Some(kit))
}

/// On Windows, pair a MinGW GCC with its `mingw32-make` and advertise the
/// matching generator.
#[cfg(windows)]
fn augment_mingw(kit: &mut Kit, bin: &Path) {
    use crate::envmap::VariableMap;
    use crate::kit::PreferredGenerator;

    if !bin.to_string_lossy().to_lowercase().contains("mingw") {
        return;
    }
    let Some(dir) = bin.parent() else {
        return;
    };
    let make = dir.join("mingw32-make.exe");
    if !make.exists() {
        return;
    }

    // Probe make with PATH restricted to its own directory so an unrelated
    // make on the user's PATH cannot answer for it.
    let probed = ProcessBuilder::new(&make)
        .arg("-v")
        .env("PATH", dir.to_string_lossy())
        .exec();
    match probed {
        Ok(out) if looks_like_mingw_make(&out.combined()) => {
            kit.preferred_generator = Some(PreferredGenerator::new("MinGW Makefiles"));
            let mut env = VariableMap::new();
            env.insert(MINGW_PATH_VAR, dir.to_string_lossy());
            kit.environment_variables = Some(env);
        }
        Ok(_) => {
            tracing::debug!("{} does not look like MinGW make", make.display());
        }
        Err(err) => {
            tracing::warn!("failed to probe {}: {}", make.display(), err);
        }
    }
}

#[cfg(not(windows))]
fn augment_mingw(_kit: &mut Kit, _bin: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    const GCC_OUTPUT: &str = "Using built-in specs.\n\
        COLLECT_GCC=gcc-9\n\
        Target: x86_64-linux-gnu\n\
        Thread model: posix\n\
        gcc version 9.4.0 (Ubuntu 9.4.0-1ubuntu1~20.04.1) \n";

    const CLANG_OUTPUT: &str = "clang version 14.0.0-1ubuntu1.1\n\
        Target: x86_64-pc-linux-gnu\n\
        Thread model: posix\n\
        InstalledDir: /usr/bin\n";

    const APPLE_CLANG_OUTPUT: &str = "Apple clang version 13.1.6 (clang-1316.0.21.2.5)\n\
        Target: arm64-apple-darwin21.5.0\n\
        Thread model: posix\n";

    #[test]
    fn test_classify_gcc_names() {
        assert_eq!(classify("gcc"), Some((CompilerFamily::Gcc, None)));
        assert_eq!(classify("gcc-9"), Some((CompilerFamily::Gcc, None)));
        assert_eq!(classify("gcc-10.3"), Some((CompilerFamily::Gcc, None)));
        assert_eq!(classify("gcc.exe"), Some((CompilerFamily::Gcc, None)));
        assert_eq!(
            classify("x86_64-linux-gnu-gcc-9"),
            Some((CompilerFamily::Gcc, Some("x86_64-linux-gnu".to_string())))
        );
        assert_eq!(
            classify("arm-none-eabi-gcc.exe"),
            Some((CompilerFamily::Gcc, Some("arm-none-eabi".to_string())))
        );
        assert_eq!(classify("g++"), None);
        assert_eq!(classify("gcc-ar"), None);
        assert_eq!(classify("gccgo"), None);
    }

    #[test]
    fn test_classify_clang_names() {
        assert_eq!(classify("clang"), Some((CompilerFamily::Clang, None)));
        assert_eq!(classify("clang-15"), Some((CompilerFamily::Clang, None)));
        assert_eq!(classify("clang.exe"), Some((CompilerFamily::Clang, None)));
        assert_eq!(classify("clang++"), None);
        assert_eq!(classify("clang-cl"), None);
        assert_eq!(classify("clang-format"), None);
    }

    #[test]
    fn test_parse_gcc_verbose() {
        let id = parse_verbose(CompilerFamily::Gcc, GCC_OUTPUT).unwrap();
        assert_eq!(id.version, "9.4.0");
        assert!(id.full_version.starts_with("gcc version 9.4.0"));
        assert_eq!(id.target.as_deref(), Some("x86_64-linux-gnu"));
        assert_eq!(id.thread_model.as_deref(), Some("posix"));
    }

    #[test]
    fn test_parse_verbose_rejects_garbage() {
        assert!(parse_verbose(CompilerFamily::Gcc, "not a compiler\n").is_none());
        assert!(parse_verbose(CompilerFamily::Clang, GCC_OUTPUT).is_none());
    }

    #[test]
    fn test_parse_clang_verbose() {
        let id = parse_verbose(CompilerFamily::Clang, CLANG_OUTPUT).unwrap();
        assert_eq!(id.version, "14.0.0");
        assert_eq!(id.target.as_deref(), Some("x86_64-pc-linux-gnu"));
        assert_eq!(id.installed_dir.as_deref(), Some(Path::new("/usr/bin")));
    }

    #[test]
    fn test_parse_apple_clang_verbose() {
        let id = parse_verbose(CompilerFamily::Clang, APPLE_CLANG_OUTPUT).unwrap();
        assert_eq!(id.version, "13.1.6");
        assert_eq!(id.target.as_deref(), Some("arm64-apple-darwin21.5.0"));
    }

    #[test]
    fn test_sibling_names() {
        assert_eq!(sibling_cxx_name("gcc-9", CompilerFamily::Gcc), "g++-9");
        assert_eq!(
            sibling_cxx_name("x86_64-linux-gnu-gcc-9", CompilerFamily::Gcc),
            "x86_64-linux-gnu-g++-9"
        );
        assert_eq!(
            sibling_cxx_name("clang-15", CompilerFamily::Clang),
            "clang++-15"
        );
        assert_eq!(
            sibling_cxx_name("gcc.exe", CompilerFamily::Gcc),
            "g++.exe"
        );
    }

    #[test]
    fn test_mingw_make_recognition() {
        assert!(looks_like_mingw_make(
            "GNU Make 4.3\nBuilt for x86_64-w64-mingw32\n"
        ));
        assert!(!looks_like_mingw_make("GNU Make 4.3\nBuilt for x86_64-pc-linux-gnu\n"));
        assert!(!looks_like_mingw_make(""));
    }

    #[test]
    fn test_probe_ignores_unclassified_binaries() {
        assert!(probe_compiler(Path::new("/usr/bin/ls")).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_parses_fake_gcc() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let gcc = tmp.path().join("gcc-9");
        fs::write(
            &gcc,
            "#!/bin/sh\nprintf 'Target: x86_64-linux-gnu\\nThread model: posix\\ngcc version 9.4.0 (Ubuntu)\\n' >&2\n",
        )
        .unwrap();
        fs::set_permissions(&gcc, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(tmp.path().join("g++-9"), "").unwrap();

        let kit = probe_compiler(&gcc).unwrap().unwrap();
        assert_eq!(kit.name, "GCC 9.4.0");
        let compilers = kit.compilers().unwrap();
        assert_eq!(compilers.get("C"), Some(&gcc));
        assert_eq!(compilers.get("CXX"), Some(&tmp.path().join("g++-9")));
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_rejects_msvc_targeting_clang() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let clang = tmp.path().join("clang");
        fs::write(
            &clang,
            "#!/bin/sh\nprintf 'clang version 15.0.0\\nTarget: x86_64-pc-windows-msvc\\n' >&2\n",
        )
        .unwrap();
        fs::set_permissions(&clang, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(probe_compiler(&clang).unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_rejects_failing_binary() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let gcc = tmp.path().join("gcc");
        fs::write(&gcc, "#!/bin/sh\nexit 1\n").unwrap();
        fs::set_permissions(&gcc, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(probe_compiler(&gcc).unwrap().is_none());
    }
}
