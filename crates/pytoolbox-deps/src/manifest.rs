//! Dependency manifests: `requirements.txt` lines and `pyproject.toml`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use pep440_rs::{Version, VersionSpecifiers};
use pep508_rs::{PackageName, Requirement, VersionOrUrl};
use serde::Deserialize;
use thiserror::Error;

use pytoolbox_core::{Result, ToolboxError};

/// Manifests looked up in the workspace root when no path is given, in order.
pub const DEFAULT_MANIFESTS: &[&str] = &["requirements.txt", "pyproject.toml"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid requirement '{input}': {reason}")]
pub struct RequirementError {
    pub input: String,
    pub reason: String,
}

/// One PEP 508 requirement: `name[extras] specifiers ; marker` or `name @ url`.
///
/// Parsing is [`pep508_rs`]; the name keeps the caller's spelling so pip sees
/// what was written.
#[derive(Debug, Clone)]
pub struct PackageSpec {
    name: String,
    inner: Requirement,
}

impl PackageSpec {
    pub fn parse(input: &str) -> std::result::Result<Self, RequirementError> {
        input.parse()
    }

    /// Bare name with no constraint.
    pub fn named(name: &str) -> std::result::Result<Self, RequirementError> {
        let spec: Self = name.parse()?;
        if spec.inner.version_or_url.is_some() || spec.marker().is_some() {
            return Err(RequirementError {
                input: name.to_string(),
                reason: "expected a bare package name".to_string(),
            });
        }
        Ok(spec)
    }

    /// Name as written.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn normalized_name(&self) -> String {
        self.inner.name.to_string()
    }

    pub fn extras(&self) -> Vec<String> {
        self.inner.extras.iter().map(ToString::to_string).collect()
    }

    /// Version specifiers; `None` for bare names and URL requirements.
    pub fn specifiers(&self) -> Option<&VersionSpecifiers> {
        match self.inner.version_or_url {
            Some(VersionOrUrl::VersionSpecifier(ref specifiers)) if !specifiers.is_empty() => {
                Some(specifiers)
            }
            _ => None,
        }
    }

    pub fn url(&self) -> Option<String> {
        match self.inner.version_or_url {
            Some(VersionOrUrl::Url(ref url)) => Some(url.to_string()),
            _ => None,
        }
    }

    pub fn marker(&self) -> Option<String> {
        self.inner.marker.contents().map(|m| m.to_string())
    }

    /// Whether `version` meets the specifiers. URL and unconstrained
    /// requirements accept anything.
    pub fn allows(&self, version: &Version) -> bool {
        self.specifiers().map_or(true, |s| s.contains(version))
    }

    /// Requirement text without the environment marker, e.g. `B>=2.0`.
    pub fn requirement(&self) -> String {
        let mut out = self.name.clone();
        let extras = self.extras();
        if !extras.is_empty() {
            out.push('[');
            out.push_str(&extras.join(","));
            out.push(']');
        }
        if let Some(url) = self.url() {
            out.push_str(" @ ");
            out.push_str(&url);
        } else if let Some(specifiers) = self.specifiers() {
            let clauses: Vec<String> = specifiers.iter().map(ToString::to_string).collect();
            out.push_str(&clauses.join(","));
        }
        out
    }

    /// Whether the marker gates this requirement on an `extra`.
    pub fn has_extra_marker(&self) -> bool {
        self.marker().is_some_and(|m| {
            m.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .any(|word| word == "extra")
        })
    }
}

impl FromStr for PackageSpec {
    type Err = RequirementError;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let inner = Requirement::from_str(input.trim()).map_err(|e| RequirementError {
            input: input.to_string(),
            reason: e.message.to_string(),
        })?;
        // A valid requirement starts with its name; keep that spelling.
        let text = input.trim_start();
        let name_len = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(text.len());
        Ok(Self {
            name: text[..name_len].to_string(),
            inner,
        })
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.requirement())?;
        if let Some(marker) = self.marker() {
            write!(f, "; {}", marker)?;
        }
        Ok(())
    }
}

/// PEP 503 name normalization: lowercase, runs of `-`, `_`, `.` collapse to `-`.
pub fn normalize_name(name: &str) -> String {
    match PackageName::from_str(name.trim()) {
        Ok(normalized) => normalized.to_string(),
        Err(_) => name.trim().to_ascii_lowercase(),
    }
}

/// Parse `requirements.txt` content. Option lines (`-r`, `-e`, `--index-url`)
/// are skipped with a warning.
pub fn parse_requirements(content: &str, path: &Path) -> Result<Vec<PackageSpec>> {
    let mut specs = Vec::new();
    let mut pending = String::new();
    let mut start_line = 0;

    for (idx, raw) in content.lines().enumerate() {
        if pending.is_empty() {
            start_line = idx + 1;
        }
        if let Some(joined) = raw.strip_suffix('\\') {
            pending.push_str(joined);
            pending.push(' ');
            continue;
        }
        pending.push_str(raw);
        let logical = std::mem::take(&mut pending);
        if let Some(spec) = parse_requirement_line(&logical, start_line, path)? {
            specs.push(spec);
        }
    }
    if !pending.is_empty() {
        if let Some(spec) = parse_requirement_line(&pending, start_line, path)? {
            specs.push(spec);
        }
    }
    Ok(specs)
}

fn parse_requirement_line(
    line: &str,
    line_no: usize,
    path: &Path,
) -> Result<Option<PackageSpec>> {
    let line = strip_comment(line).trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.starts_with('-') {
        tracing::warn!(
            path = %path.display(),
            line = line_no,
            option = line,
            "Skipping requirements option line"
        );
        return Ok(None);
    }
    line.parse().map(Some).map_err(|e: RequirementError| ToolboxError::ManifestParse {
        path: path.to_path_buf(),
        message: format!("line {}: {}", line_no, e),
    })
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(pos) => &line[..pos],
        None => line,
    }
}

#[derive(Deserialize)]
struct PyProject {
    project: Option<ProjectTable>,
}

#[derive(Deserialize)]
struct ProjectTable {
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Parse the `[project].dependencies` array of a `pyproject.toml`. A missing
/// table or array means no dependencies.
pub fn parse_pyproject(content: &str, path: &Path) -> Result<Vec<PackageSpec>> {
    let manifest_err = |message: String| ToolboxError::ManifestParse {
        path: path.to_path_buf(),
        message,
    };
    let doc: PyProject = toml::from_str(content).map_err(|e| manifest_err(e.to_string()))?;
    let Some(project) = doc.project else {
        return Ok(Vec::new());
    };
    project
        .dependencies
        .iter()
        .enumerate()
        .map(|(i, dep)| {
            dep.parse()
                .map_err(|e: RequirementError| manifest_err(format!("dependencies[{}]: {}", i, e)))
        })
        .collect()
}

/// Read and parse a manifest; `pyproject.toml` (or any `.toml`) is read as a
/// project file, anything else as a requirements file.
pub fn load_manifest(path: &Path) -> Result<Vec<PackageSpec>> {
    if !path.is_file() {
        return Err(ToolboxError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ToolboxError::io(format!("reading {}", path.display()), e))?;
    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    let specs = if is_toml {
        parse_pyproject(&content, path)?
    } else {
        parse_requirements(&content, path)?
    };
    tracing::debug!(path = %path.display(), count = specs.len(), "Loaded manifest");
    Ok(specs)
}
