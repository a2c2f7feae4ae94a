//! Installed-distribution metadata.
//!
//! The conflict check only sees [`PackageMetadata`]; where the data comes from
//! is a [`MetadataSource`]. The default source asks the environment's own
//! interpreter for its `importlib.metadata` view, so whatever pip installed is
//! what gets reported.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pytoolbox_core::config::DEFAULT_QUERY_TIMEOUT_SECS;
use pytoolbox_core::{Result, ToolboxError};
use pytoolbox_sandbox::{CommandRunner, Environment, SystemRunner};

use crate::manifest::{normalize_name, PackageSpec};

/// Prints every distribution on the interpreter's path as one JSON array.
const DUMP_DISTRIBUTIONS: &str = r#"
import json
import importlib.metadata as md
out = []
for dist in md.distributions():
    name = dist.metadata["Name"]
    if not name:
        continue
    out.append({"name": name, "version": dist.version, "requires": list(dist.requires or [])})
print(json.dumps(out))
"#;

/// Read-only view of one installed distribution.
pub trait PackageMetadata {
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    /// `Requires-Dist` entries; lines that do not parse are dropped.
    fn declared_requirements(&self) -> Vec<PackageSpec>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub requires: Vec<String>,
}

impl InstalledPackage {
    pub fn new(name: &str, version: &str, requires: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            requires: requires.iter().map(|r| r.to_string()).collect(),
        }
    }
}

impl PackageMetadata for InstalledPackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn declared_requirements(&self) -> Vec<PackageSpec> {
        self.requires
            .iter()
            .filter_map(|raw| match PackageSpec::parse(raw) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    tracing::debug!(
                        package = %self.name,
                        error = %e,
                        "Ignoring unparsable Requires-Dist"
                    );
                    None
                }
            })
            .collect()
    }
}

/// Source of the installed set for an environment.
pub trait MetadataSource: Send + Sync {
    fn installed_packages(&self, env: &Environment) -> Result<Vec<InstalledPackage>>;
}

/// Runs a short script in the environment's interpreter and parses its JSON.
#[derive(Debug, Clone)]
pub struct ImportlibMetadata<R: CommandRunner = SystemRunner> {
    runner: R,
    timeout: Duration,
}

impl Default for ImportlibMetadata<SystemRunner> {
    fn default() -> Self {
        Self::new(SystemRunner)
    }
}

impl<R: CommandRunner> ImportlibMetadata<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }
}

impl<R: CommandRunner> MetadataSource for ImportlibMetadata<R> {
    fn installed_packages(&self, env: &Environment) -> Result<Vec<InstalledPackage>> {
        let spec = env
            .python_command(self.timeout)?
            .args(["-c", DUMP_DISTRIBUTIONS])
            .current_dir(env.root())
            .label("list_packages");
        let command = format!("{} -c <importlib.metadata dump>", spec.program.display());
        let result = self.runner.run(&spec)?;
        if result.timed_out {
            return Err(ToolboxError::TimedOut {
                command,
                timeout_secs: spec.timeout_secs(),
            });
        }
        if !result.success() {
            return Err(ToolboxError::Subprocess {
                command,
                message: result.failure_message(),
            });
        }
        let packages: Vec<InstalledPackage> =
            serde_json::from_str(result.stdout.trim()).map_err(|e| ToolboxError::Subprocess {
                command,
                message: format!("unreadable metadata output: {}", e),
            })?;
        tracing::debug!(
            env = %env.root().display(),
            count = packages.len(),
            "Read installed packages"
        );
        Ok(dedupe_first(packages))
    }
}

/// Drop repeated distributions (same normalized name), keeping the first.
/// The interpreter imports the first one found on its path.
pub fn dedupe_first<P: PackageMetadata>(packages: impl IntoIterator<Item = P>) -> Vec<P> {
    let mut seen = HashSet::new();
    packages
        .into_iter()
        .filter(|p| seen.insert(normalize_name(p.name())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pytoolbox_sandbox::{CommandSpec, ExecutionResult};
    use std::path::Path;

    struct CannedRunner(ExecutionResult);

    impl CommandRunner for CannedRunner {
        fn run(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
            assert_eq!(spec.args_lossy()[0], "-c");
            Ok(self.0.clone())
        }
    }

    fn env_in(dir: &Path) -> Environment {
        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join("python"), "").unwrap();
        Environment::open(dir).unwrap()
    }

    #[test]
    fn test_declared_requirements_skip_garbage() {
        let pkg = InstalledPackage::new(
            "alpha",
            "1.0",
            &["beta>=2.0", "not valid ((", "gamma; extra == 'x'"],
        );
        let reqs = pkg.declared_requirements();
        assert_eq!(reqs.len(), 2);
        assert_eq!(reqs[0].requirement(), "beta>=2.0");
        assert!(reqs[1].has_extra_marker());
    }

    #[test]
    fn test_importlib_source_parses_and_dedupes() {
        let tmp = tempfile::tempdir().unwrap();
        let env = env_in(tmp.path());
        let stdout = r#"[{"name":"Six","version":"1.16.0","requires":[]},
            {"name":"six","version":"1.10.0"},
            {"name":"requests","version":"2.31.0","requires":["idna<4,>=2.5"]}]"#;
        let source = ImportlibMetadata::new(CannedRunner(ExecutionResult {
            stdout: stdout.into(),
            ..Default::default()
        }));
        let pkgs = source.installed_packages(&env).unwrap();
        assert_eq!(pkgs.len(), 2);
        assert_eq!(pkgs[0].version, "1.16.0");
        assert_eq!(pkgs[1].requires, vec!["idna<4,>=2.5"]);
    }

    #[test]
    fn test_importlib_source_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let env = env_in(tmp.path());

        let source = ImportlibMetadata::new(CannedRunner(ExecutionResult {
            stdout: "Traceback".into(),
            ..Default::default()
        }));
        assert_eq!(source.installed_packages(&env).unwrap_err().kind(), "subprocess_error");

        let source = ImportlibMetadata::new(CannedRunner(ExecutionResult {
            exit_code: -1,
            timed_out: true,
            ..Default::default()
        }));
        assert_eq!(source.installed_packages(&env).unwrap_err().kind(), "timed_out");

        let source = ImportlibMetadata::new(CannedRunner(ExecutionResult {
            stderr: "ModuleNotFoundError: No module named 'importlib.metadata'".into(),
            exit_code: 1,
            ..Default::default()
        }));
        let err = source.installed_packages(&env).unwrap_err();
        assert!(err.to_string().contains("importlib.metadata"));
    }
}
