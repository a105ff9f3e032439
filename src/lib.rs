//! Slipway - toolchain discovery and environment synthesis for CMake builds
//!
//! Given a host and a set of search hints, slipway scans the machine for
//! usable compiler and SDK installations, probes each candidate for its
//! identity, and produces serializable kit records that a build driver
//! consumes to invoke the generator with the correct compilers and
//! environment.

pub mod diagnostics;
pub mod discovery;
pub mod envmap;
pub mod environment;
pub mod kit;
pub mod paths;
pub mod persist;
pub mod util;

pub use discovery::{scan, ScanOptions};
pub use envmap::VariableMap;
pub use environment::{effective_env, find_cl, EnvOptions};
pub use kit::{
    CompilerFamily, CompilerIdentity, Kit, KitVariant, PreferredGenerator, VendorInstallation,
    VsArchitecture,
};
pub use paths::CmakeResolution;
pub use persist::{change_needs_clean, dedupe_kits, load_kits, save_kits, SchemaViolation};
