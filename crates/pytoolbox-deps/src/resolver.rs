//! Dependency management for one environment: installs driven through pip,
//! installed-set queries, and the single-pass conflict check.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use pytoolbox_core::config::ToolboxConfig;
use pytoolbox_core::observability;
use pytoolbox_core::{PathGuard, ResolvedPath, Result, ToolboxError};
use pytoolbox_sandbox::{CommandRunner, CommandSpec, Environment, SystemRunner};

use crate::manifest::{load_manifest, normalize_name, PackageSpec, DEFAULT_MANIFESTS};
use crate::metadata::{
    dedupe_first, ImportlibMetadata, InstalledPackage, MetadataSource, PackageMetadata,
};
use pep440_rs::Version;

const PIP_INSTALL_ARGS: &[&str] = &["install", "--disable-pip-version-check", "--no-input"];

/// pip's wording when the index has no release at all for a name
const INDEX_MISS_MARKER: &str = "from versions: none";

/// An installed package whose declared requirement is not met by what is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    /// Package declaring the requirement
    pub package: String,
    /// Requirement text, e.g. `B>=2.0`
    pub requirement: String,
    /// Version of the required package actually installed
    pub installed_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    /// Manifest path relative to the workspace root
    pub manifest: PathBuf,
    /// Specs installed, in manifest order
    pub installed: Vec<String>,
}

/// Compare every declared requirement against the installed set.
///
/// Non-transitive: only direct requirements whose target is installed are
/// checked. Requirements gated on an `extra` are skipped, and so are direct-URL
/// requirements (no version constraint to test).
pub fn find_conflicts<P: PackageMetadata>(packages: &[P]) -> ConflictReport {
    let unique = dedupe_first(packages.iter().map(Ref));
    let by_name: HashMap<String, &P> = unique
        .iter()
        .map(|p| (normalize_name(p.name()), p.0))
        .collect();

    let mut conflicts = Vec::new();
    for pkg in &unique {
        for req in pkg.declared_requirements() {
            if req.has_extra_marker() || req.specifiers().is_none() {
                continue;
            }
            let Some(dep) = by_name.get(&req.normalized_name()) else {
                continue;
            };
            let installed = match Version::from_str(dep.version()) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        package = dep.name(),
                        error = %e,
                        "Skipping package with unparsable version"
                    );
                    continue;
                }
            };
            if !req.allows(&installed) {
                conflicts.push(Conflict {
                    package: pkg.name().to_string(),
                    requirement: req.requirement(),
                    installed_version: dep.version().to_string(),
                });
            }
        }
    }
    conflicts.sort_by(|a, b| {
        normalize_name(&a.package)
            .cmp(&normalize_name(&b.package))
            .then_with(|| a.requirement.cmp(&b.requirement))
    });
    ConflictReport { conflicts }
}

/// Borrowing adapter so `dedupe_first` can work over `&P`.
struct Ref<'a, P>(&'a P);

impl<P: PackageMetadata> PackageMetadata for Ref<'_, P> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn version(&self) -> &str {
        self.0.version()
    }

    fn declared_requirements(&self) -> Vec<PackageSpec> {
        self.0.declared_requirements()
    }
}

pub struct DependencyResolver<R: CommandRunner = SystemRunner> {
    guard: PathGuard,
    runner: R,
    metadata: Box<dyn MetadataSource>,
    install_timeout: Duration,
}

impl DependencyResolver<SystemRunner> {
    pub fn new(guard: PathGuard, config: &ToolboxConfig) -> Self {
        Self::with_runner(guard, config, SystemRunner)
    }
}

impl<R: CommandRunner + Clone + 'static> DependencyResolver<R> {
    /// Resolver whose installs and metadata queries both go through `runner`.
    pub fn with_runner(guard: PathGuard, config: &ToolboxConfig, runner: R) -> Self {
        Self {
            guard,
            metadata: Box::new(ImportlibMetadata::new(runner.clone())),
            runner,
            install_timeout: Duration::from_secs(config.install_timeout_secs),
        }
    }
}

impl<R: CommandRunner> DependencyResolver<R> {
    pub fn with_metadata_source(mut self, source: impl MetadataSource + 'static) -> Self {
        self.metadata = Box::new(source);
        self
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    /// Install every spec of a manifest, one by one in manifest order. Stops at
    /// the first failure; earlier installs stay in place.
    ///
    /// With no path, `requirements.txt` then `pyproject.toml` in the workspace
    /// root are tried.
    pub fn install_from(&self, env: &Environment, manifest: Option<&str>) -> Result<InstallReport> {
        let path = self.manifest_path(manifest)?;
        let specs = load_manifest(&path)?;
        tracing::info!(manifest = %path, count = specs.len(), "Installing manifest");

        let mut installed = Vec::with_capacity(specs.len());
        for spec in &specs {
            self.install_package(env, spec)?;
            installed.push(spec.to_string());
        }
        Ok(InstallReport {
            manifest: self.guard.relative(&path),
            installed,
        })
    }

    pub fn install_package(&self, env: &Environment, spec: &PackageSpec) -> Result<()> {
        let text = spec.to_string();
        let cmd = self.pip_install(env, [text.as_str()])?.label("pip_install");
        self.run_install(env, spec.name(), &text, &cmd)
    }

    /// Every installed distribution, as the environment's interpreter sees it.
    pub fn list_installed(&self, env: &Environment) -> Result<Vec<InstalledPackage>> {
        self.metadata.installed_packages(env)
    }

    pub fn check_conflicts(&self, env: &Environment) -> Result<ConflictReport> {
        let packages = self.list_installed(env)?;
        let report = find_conflicts(&packages);
        if report.is_empty() {
            tracing::debug!(
                env = %env.root().display(),
                packages = packages.len(),
                "No dependency conflicts"
            );
        } else {
            tracing::warn!(
                env = %env.root().display(),
                conflicts = report.len(),
                "Dependency conflicts found"
            );
        }
        Ok(report)
    }

    /// `pip install --upgrade name[==version]`, then report what is installed.
    pub fn update(
        &self,
        env: &Environment,
        name: &str,
        version: Option<&str>,
    ) -> Result<InstalledPackage> {
        let spec =
            PackageSpec::named(name).map_err(|e| ToolboxError::invalid_input(e.to_string()))?;
        let requirement = match version {
            Some(v) => {
                let v = Version::from_str(v)
                    .map_err(|e| ToolboxError::invalid_input(e.to_string()))?;
                format!("{}=={}", spec.name(), v)
            }
            None => spec.name().to_string(),
        };
        let cmd = self
            .pip_install(env, ["--upgrade", requirement.as_str()])?
            .label("pip_upgrade");
        self.run_install(env, spec.name(), &requirement, &cmd)?;

        let wanted = spec.normalized_name();
        self.list_installed(env)?
            .into_iter()
            .find(|p| normalize_name(&p.name) == wanted)
            .ok_or_else(|| ToolboxError::PackageNotFound {
                package: spec.name().to_string(),
                message: "upgrade finished but the package is not installed".to_string(),
            })
    }

    /// `name==version` per line, sorted by normalized name, newline-terminated.
    pub fn freeze(&self, env: &Environment) -> Result<String> {
        let mut packages = dedupe_first(self.list_installed(env)?);
        packages.sort_by_cached_key(|p| normalize_name(&p.name));
        Ok(packages
            .iter()
            .map(|p| format!("{}=={}\n", p.name, p.version))
            .collect())
    }

    /// Write `freeze` output to `path` (default `requirements.txt`) and return
    /// the path relative to the workspace root.
    pub fn write_requirements(&self, env: &Environment, path: Option<&str>) -> Result<PathBuf> {
        let target = self.guard.resolve(path.unwrap_or(DEFAULT_MANIFESTS[0]))?;
        let content = self.freeze(env)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolboxError::io(format!("creating {}", parent.display()), e))?;
        }
        std::fs::write(&target, &content)
            .map_err(|e| ToolboxError::io(format!("writing {}", target), e))?;
        tracing::info!(path = %target, lines = content.lines().count(), "Wrote requirements");
        Ok(self.guard.relative(&target))
    }

    fn manifest_path(&self, manifest: Option<&str>) -> Result<ResolvedPath> {
        if let Some(p) = manifest {
            return self.guard.resolve(p);
        }
        for name in DEFAULT_MANIFESTS {
            let candidate = self.guard.resolve(name)?;
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(ToolboxError::NotFound {
            path: self.guard.root().join(DEFAULT_MANIFESTS[0]),
        })
    }

    fn pip_install<'a>(
        &self,
        env: &Environment,
        extra: impl IntoIterator<Item = &'a str>,
    ) -> Result<CommandSpec> {
        Ok(env
            .pip_command(self.install_timeout)?
            .args(PIP_INSTALL_ARGS)
            .args(extra)
            .current_dir(self.guard.root()))
    }

    fn run_install(
        &self,
        env: &Environment,
        package: &str,
        requirement: &str,
        cmd: &CommandSpec,
    ) -> Result<()> {
        let env_dir = env.root().display().to_string();
        tracing::info!(env = %env_dir, requirement, "Installing package");

        let outcome = self.runner.run(cmd).and_then(|result| {
            if result.timed_out {
                return Err(ToolboxError::TimedOut {
                    command: cmd.display(),
                    timeout_secs: cmd.timeout_secs(),
                });
            }
            if result.success() {
                return Ok(());
            }
            let message = result.failure_message();
            if message.contains(INDEX_MISS_MARKER) {
                Err(ToolboxError::PackageNotFound {
                    package: package.to_string(),
                    message,
                })
            } else {
                Err(ToolboxError::DependencyInstall {
                    package: package.to_string(),
                    message,
                })
            }
        });

        observability::audit_package_install(&env_dir, requirement, outcome.is_ok());
        match outcome {
            Ok(()) => Ok(()),
            Err(
                e @ (ToolboxError::TimedOut { .. }
                | ToolboxError::PackageNotFound { .. }
                | ToolboxError::DependencyInstall { .. }),
            ) => {
                tracing::warn!(env = %env_dir, requirement, error = %e, "Install failed");
                Err(e)
            }
            Err(e) => Err(ToolboxError::DependencyInstall {
                package: package.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
