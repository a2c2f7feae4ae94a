//! Dependency management for pytoolbox environments.
//!
//! - [`manifest`]: `requirements.txt` / `pyproject.toml` parsing into [`PackageSpec`]s
//!   (PEP 508 via `pep508_rs`, PEP 440 via `pep440_rs`)
//! - [`metadata`]: installed-distribution metadata behind [`MetadataSource`]
//! - [`resolver`]: pip-driven installs, freeze, and the conflict check

pub mod manifest;
pub mod metadata;
pub mod resolver;

pub use manifest::{load_manifest, normalize_name, PackageSpec, RequirementError};
pub use metadata::{ImportlibMetadata, InstalledPackage, MetadataSource, PackageMetadata};
pub use pep440_rs::{Version, VersionSpecifiers};
pub use resolver::{find_conflicts, Conflict, ConflictReport, DependencyResolver, InstallReport};
