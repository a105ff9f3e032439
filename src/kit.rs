//! Kit records and the types that back them.
//!
//! A kit is a serializable description of a complete toolchain selection:
//! plain compilers found on disk, a Visual Studio installation paired with a
//! target architecture, or a toolchain file handed to the generator. On disk
//! a kit is a flat JSON object; in memory the backing is a tagged variant so
//! impossible combinations are unrepresentable.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::envmap::VariableMap;

/// Mapping from language tag (`"C"`, `"CXX"`, ...) to compiler executable.
pub type CompilerMap = BTreeMap<String, PathBuf>;

/// Architecture tokens accepted by the Visual Studio activation scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VsArchitecture {
    X86,
    Amd64,
    X86Amd64,
    X86Arm,
    Amd64Arm,
    Amd64X86,
    Arm,
}

impl VsArchitecture {
    /// All tokens a kits document may carry.
    pub const ALL: [VsArchitecture; 7] = [
        VsArchitecture::X86,
        VsArchitecture::Amd64,
        VsArchitecture::X86Amd64,
        VsArchitecture::X86Arm,
        VsArchitecture::Amd64Arm,
        VsArchitecture::Amd64X86,
        VsArchitecture::Arm,
    ];

    /// Get the activation token as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            VsArchitecture::X86 => "x86",
            VsArchitecture::Amd64 => "amd64",
            VsArchitecture::X86Amd64 => "x86_amd64",
            VsArchitecture::X86Arm => "x86_arm",
            VsArchitecture::Amd64Arm => "amd64_arm",
            VsArchitecture::Amd64X86 => "amd64_x86",
            VsArchitecture::Arm => "arm",
        }
    }

    /// Parse an activation token.
    pub fn parse(s: &str) -> Option<VsArchitecture> {
        VsArchitecture::ALL.iter().copied().find(|a| a.as_str() == s)
    }

    /// The generator `platform` advertised for this architecture, if any.
    pub fn generator_platform(&self) -> Option<&'static str> {
        match self {
            VsArchitecture::Amd64 => Some("x64"),
            VsArchitecture::Arm | VsArchitecture::Amd64Arm => Some("ARM"),
            _ => None,
        }
    }
}

impl fmt::Display for VsArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advice for the build-generator driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredGenerator {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub toolset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl PreferredGenerator {
    pub fn new(name: impl Into<String>) -> Self {
        PreferredGenerator {
            name: name.into(),
            toolset: None,
            platform: None,
        }
    }
}

/// One installed Visual Studio instance, as reported by the platform
/// installation enumerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorInstallation {
    pub installation_path: PathBuf,
    /// Dotted version string, e.g. `"16.11.2"`.
    pub installation_version: String,
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_display_version: Option<String>,
}

impl VendorInstallation {
    /// Major component of `installation_version`, if it parses.
    pub fn major_version(&self) -> Option<u32> {
        self.installation_version
            .split('.')
            .next()
            .and_then(|s| s.parse().ok())
    }
}

/// Compiler family recognized by the prober.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerFamily {
    Gcc,
    Clang,
}

impl CompilerFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompilerFamily::Gcc => "GCC",
            CompilerFamily::Clang => "Clang",
        }
    }
}

/// Structured identity extracted from a compiler's version output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerIdentity {
    pub family: CompilerFamily,
    pub version: String,
    /// The full version line as printed by the compiler.
    pub full_version: String,
    pub target: Option<String>,
    pub thread_model: Option<String>,
    pub installed_dir: Option<PathBuf>,
}

/// What backs a kit: plain compilers, a Visual Studio instance, or a
/// toolchain file. A Visual Studio kit may additionally carry explicit
/// compilers (the clang-cl pairing).
#[derive(Debug, Clone, PartialEq)]
pub enum KitVariant {
    Compiler {
        compilers: CompilerMap,
    },
    Vendor {
        instance: String,
        architecture: VsArchitecture,
        compilers: Option<CompilerMap>,
    },
    Toolchain {
        file: PathBuf,
    },
}

/// A complete toolchain selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Kit {
    /// Human-readable identifier, unique within a kits document.
    pub name: String,
    pub variant: KitVariant,
    pub preferred_generator: Option<PreferredGenerator>,
    /// Opaque settings passed verbatim to the generator.
    pub cmake_settings: Option<BTreeMap<String, String>>,
    /// Overrides applied when composing the effective environment. Values
    /// may contain unexpanded placeholders.
    pub environment_variables: Option<VariableMap>,
    /// Preserve this kit across discovery re-runs.
    pub keep: bool,
}

impl Kit {
    fn new(name: impl Into<String>, variant: KitVariant) -> Self {
        Kit {
            name: name.into(),
            variant,
            preferred_generator: None,
            cmake_settings: None,
            environment_variables: None,
            keep: false,
        }
    }

    /// Create a compiler-backed kit.
    pub fn for_compilers(name: impl Into<String>, compilers: CompilerMap) -> Self {
        Kit::new(name, KitVariant::Compiler { compilers })
    }

    /// Create a Visual-Studio-backed kit, optionally carrying explicit
    /// compilers (the clang-cl pairing).
    pub fn for_vendor(
        name: impl Into<String>,
        instance: impl Into<String>,
        architecture: VsArchitecture,
        compilers: Option<CompilerMap>,
    ) -> Self {
        Kit::new(
            name,
            KitVariant::Vendor {
                instance: instance.into(),
                architecture,
                compilers,
            },
        )
    }

    /// The compiler map, regardless of backing.
    pub fn compilers(&self) -> Option<&CompilerMap> {
        match &self.variant {
            KitVariant::Compiler { compilers } => Some(compilers),
            KitVariant::Vendor { compilers, .. } => compilers.as_ref(),
            KitVariant::Toolchain { .. } => None,
        }
    }

    /// The Visual Studio instance identifier and architecture, if vendor-backed.
    pub fn visual_studio(&self) -> Option<(&str, VsArchitecture)> {
        match &self.variant {
            KitVariant::Vendor {
                instance,
                architecture,
                ..
            } => Some((instance.as_str(), *architecture)),
            _ => None,
        }
    }

    /// The toolchain file, if file-backed.
    pub fn toolchain_file(&self) -> Option<&PathBuf> {
        match &self.variant {
            KitVariant::Toolchain { file } => Some(file),
            _ => None,
        }
    }
}

/// Why a flat kit object could not be classified.
#[derive(Debug, Error)]
pub enum KitShapeError {
    #[error("kit `{0}` has `visualStudio` but no `visualStudioArchitecture`")]
    MissingArchitecture(String),
    #[error("kit `{0}` combines `toolchainFile` with compilers or a Visual Studio instance")]
    AmbiguousBacking(String),
    #[error("kit `{0}` has none of `compilers`, `visualStudio`, `toolchainFile`")]
    MissingBacking(String),
}

/// The flat on-disk shape. All backing fields are optional here; conversion
/// to [`Kit`] enforces the valid combinations.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKit {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    compilers: Option<CompilerMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    toolchain_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    visual_studio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    visual_studio_architecture: Option<VsArchitecture>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preferred_generator: Option<PreferredGenerator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cmake_settings: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment_variables: Option<VariableMap>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    keep: bool,
}

impl TryFrom<RawKit> for Kit {
    type Error = KitShapeError;

    fn try_from(raw: RawKit) -> Result<Kit, KitShapeError> {
        let variant = match (raw.visual_studio, raw.compilers, raw.toolchain_file) {
            (Some(instance), compilers, toolchain_file) => {
                if toolchain_file.is_some() {
                    return Err(KitShapeError::AmbiguousBacking(raw.name));
                }
                let architecture = raw
                    .visual_studio_architecture
                    .ok_or_else(|| KitShapeError::MissingArchitecture(raw.name.clone()))?;
                KitVariant::Vendor {
                    instance,
                    architecture,
                    compilers,
                }
            }
            (None, Some(compilers), toolchain_file) => {
                if toolchain_file.is_some() {
                    return Err(KitShapeError::AmbiguousBacking(raw.name));
                }
                KitVariant::Compiler { compilers }
            }
            (None, None, Some(file)) => KitVariant::Toolchain { file },
            (None, None, None) => return Err(KitShapeError::MissingBacking(raw.name)),
        };

        Ok(Kit {
            name: raw.name,
            variant,
            preferred_generator: raw.preferred_generator,
            cmake_settings: raw.cmake_settings,
            environment_variables: raw.environment_variables,
            keep: raw.keep,
        })
    }
}

impl From<&Kit> for RawKit {
    fn from(kit: &Kit) -> RawKit {
        let mut raw = RawKit {
            name: kit.name.clone(),
            compilers: kit.compilers().cloned(),
            toolchain_file: kit.toolchain_file().cloned(),
            visual_studio: None,
            visual_studio_architecture: None,
            preferred_generator: kit.preferred_generator.clone(),
            cmake_settings: kit.cmake_settings.clone(),
            environment_variables: kit.environment_variables.clone(),
            keep: kit.keep,
        };
        if let KitVariant::Vendor {
            instance,
            architecture,
            ..
        } = &kit.variant
        {
            raw.visual_studio = Some(instance.clone());
            raw.visual_studio_architecture = Some(*architecture);
        }
        raw
    }
}

impl Serialize for Kit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawKit::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Kit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Kit, D::Error> {
        let raw = RawKit::deserialize(deserializer)?;
        Kit::try_from(raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler_kit() -> Kit {
        let mut compilers = CompilerMap::new();
        compilers.insert("C".to_string(), PathBuf::from("/usr/bin/gcc-9"));
        compilers.insert("CXX".to_string(), PathBuf::from("/usr/bin/g++-9"));
        Kit::for_compilers("GCC 9.4.0", compilers)
    }

    #[test]
    fn test_compiler_kit_round_trip() {
        let kit = compiler_kit();
        let json = serde_json::to_string(&kit).unwrap();
        let back: Kit = serde_json::from_str(&json).unwrap();
        assert_eq!(kit, back);
    }

    #[test]
    fn test_vendor_kit_round_trip() {
        let mut kit = Kit::for_vendor("VS 2019 - amd64", "8bb92d36", VsArchitecture::Amd64, None);
        kit.preferred_generator = Some(PreferredGenerator {
            name: "Visual Studio 16 2019".to_string(),
            toolset: None,
            platform: Some("x64".to_string()),
        });
        kit.keep = true;
        let json = serde_json::to_string(&kit).unwrap();
        assert!(json.contains("\"visualStudio\":\"8bb92d36\""));
        assert!(json.contains("\"visualStudioArchitecture\":\"amd64\""));
        assert!(json.contains("\"keep\":true"));
        let back: Kit = serde_json::from_str(&json).unwrap();
        assert_eq!(kit, back);
    }

    #[test]
    fn test_toolchain_kit_round_trip() {
        let kit = Kit {
            name: "Cross".to_string(),
            variant: KitVariant::Toolchain {
                file: PathBuf::from("/opt/toolchains/arm.cmake"),
            },
            preferred_generator: None,
            cmake_settings: None,
            environment_variables: None,
            keep: false,
        };
        let json = serde_json::to_string(&kit).unwrap();
        assert!(json.contains("toolchainFile"));
        assert!(!json.contains("keep"));
        let back: Kit = serde_json::from_str(&json).unwrap();
        assert_eq!(kit, back);
    }

    #[test]
    fn test_vendor_without_architecture_is_rejected() {
        let err = serde_json::from_str::<Kit>(r#"{"name": "vs", "visualStudio": "inst"}"#)
            .unwrap_err()
            .to_string();
        assert!(err.contains("visualStudioArchitecture"));
    }

    #[test]
    fn test_empty_kit_is_rejected() {
        assert!(serde_json::from_str::<Kit>(r#"{"name": "nothing"}"#).is_err());
    }

    #[test]
    fn test_architecture_tokens() {
        assert_eq!(VsArchitecture::parse("x86_amd64"), Some(VsArchitecture::X86Amd64));
        assert_eq!(VsArchitecture::parse("x64"), None);
        assert_eq!(VsArchitecture::Amd64.generator_platform(), Some("x64"));
        assert_eq!(VsArchitecture::Amd64Arm.generator_platform(), Some("ARM"));
        assert_eq!(VsArchitecture::X86Amd64.generator_platform(), None);
    }

    #[test]
    fn test_installation_major_version() {
        let inst = VendorInstallation {
            installation_path: PathBuf::from(r"C:\VS"),
            installation_version: "16.11.2".to_string(),
            instance_id: "deadbeef".to_string(),
            display_name: None,
            channel_id: None,
            product_display_version: None,
        };
        assert_eq!(inst.major_version(), Some(16));
    }
}
