//! Lock file verification
//!
//! Before an image build installs dependencies from a lock file, the lock
//! must agree with the manifest: every declared dependency is locked, and the
//! locked version satisfies the declared constraint. Any disagreement fails
//! the check, the same way `cargo --locked` and `poetry check --lock` refuse
//! to proceed.

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::contract::PackageManager;
use super::BuildError;

/// Outcome of checking a source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// Lock present and consistent; `checked` dependencies were verified
    Locked { checked: usize },
    /// No lock file; the build resolves dependencies fresh
    Unlocked,
}

#[derive(Debug, Deserialize)]
struct LockFile {
    #[serde(default)]
    package: Vec<LockedPackage>,
}

#[derive(Debug, Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
}

fn finish(checked: usize, mismatches: Vec<String>) -> Result<usize, BuildError> {
    if mismatches.is_empty() {
        Ok(checked)
    } else {
        Err(BuildError::Lock(mismatches))
    }
}

// ---------------------------------------------------------------------------
// Cargo
// ---------------------------------------------------------------------------

/// A dependency declared in `Cargo.toml`
#[derive(Debug)]
struct CargoDependency {
    package: String,
    requirement: Option<String>,
}

fn cargo_dependencies(table: &toml::Table) -> Vec<CargoDependency> {
    let mut deps = Vec::new();
    for (key, value) in table {
        match value {
            toml::Value::String(req) => deps.push(CargoDependency {
                package: key.clone(),
                requirement: Some(req.clone()),
            }),
            toml::Value::Table(detail) => {
                // Workspace-inherited versions live in another manifest
                if detail.get("workspace").and_then(|v| v.as_bool()) == Some(true) {
                    continue;
                }
                let package = detail
                    .get("package")
                    .and_then(|v| v.as_str())
                    .unwrap_or(key)
                    .to_string();
                let local = detail.contains_key("path") || detail.contains_key("git");
                let requirement = if local {
                    None
                } else {
                    detail
                        .get("version")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                deps.push(CargoDependency {
                    package,
                    requirement,
                });
            }
            _ => {}
        }
    }
    deps
}

const CARGO_DEPENDENCY_TABLES: &[&str] = &["dependencies", "dev-dependencies", "build-dependencies"];

fn collect_cargo_dependencies(manifest: &toml::Table) -> Vec<CargoDependency> {
    let mut deps = Vec::new();
    let mut collect_from = |table: &toml::Table| {
        for section in CARGO_DEPENDENCY_TABLES {
            if let Some(section) = table.get(*section).and_then(|v| v.as_table()) {
                deps.extend(cargo_dependencies(section));
            }
        }
    };

    collect_from(manifest);
    if let Some(targets) = manifest.get("target").and_then(|v| v.as_table()) {
        for target in targets.values().filter_map(|v| v.as_table()) {
            collect_from(target);
        }
    }
    deps
}

/// Check `Cargo.lock` against `Cargo.toml`. Returns the number of
/// dependencies checked.
pub fn verify_cargo(manifest: &str, lock: &str) -> Result<usize, BuildError> {
    let manifest: toml::Table =
        toml::from_str(manifest).map_err(|e| BuildError::parse("Cargo.toml", e))?;
    let lock: LockFile = toml::from_str(lock).map_err(|e| BuildError::parse("Cargo.lock", e))?;

    let mut locked: HashMap<&str, Vec<&str>> = HashMap::new();
    for package in &lock.package {
        locked
            .entry(package.name.as_str())
            .or_default()
            .push(package.version.as_str());
    }

    let deps = collect_cargo_dependencies(&manifest);
    let mut mismatches = Vec::new();

    for dep in &deps {
        let Some(versions) = locked.get(dep.package.as_str()) else {
            mismatches.push(format!("{} is declared but not locked", dep.package));
            continue;
        };

        let Some(requirement) = &dep.requirement else {
            continue;
        };
        let req = semver::VersionReq::parse(requirement).map_err(|e| {
            BuildError::parse("Cargo.toml", format!("{} = \"{}\": {}", dep.package, requirement, e))
        })?;

        let satisfied = versions.iter().any(|v| match semver::Version::parse(v) {
            Ok(version) => req.matches(&version),
            Err(e) => {
                warn!("Unparseable locked version {} {}: {}", dep.package, v, e);
                false
            }
        });
        if !satisfied {
            mismatches.push(format!(
                "{} locked at {} does not satisfy {}",
                dep.package,
                versions.join(", "),
                requirement
            ));
        }
    }

    debug!("Checked {} cargo dependencies", deps.len());
    finish(deps.len(), mismatches)
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

/// Normalized distribution name: lowercase, runs of `-_.` collapsed to `-`
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            separator = true;
        } else {
            if separator && !out.is_empty() {
                out.push('-');
            }
            separator = false;
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

/// Release segments of a version; pre/post/dev suffixes are ignored
#[derive(Debug, Clone, PartialEq, Eq)]
struct Release(Vec<u64>);

impl Release {
    fn parse(version: &str) -> Option<Self> {
        let version = version.trim().trim_start_matches('v');
        let version = version.split_once('!').map_or(version, |(_, v)| v);
        let mut segments = Vec::new();
        for part in version.split('.') {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                break;
            }
            segments.push(digits.parse().ok()?);
            if digits.len() != part.len() {
                break;
            }
        }
        if segments.is_empty() {
            None
        } else {
            Some(Self(segments))
        }
    }

    fn segment(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }

    fn compare(&self, other: &Self) -> std::cmp::Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.segment(i).cmp(&other.segment(i)))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    }

    fn starts_with(&self, prefix: &Self) -> bool {
        (0..prefix.0.len()).all(|i| self.segment(i) == prefix.0[i])
    }

    /// Exclusive upper bound for a caret constraint
    fn caret_bound(&self) -> Self {
        let index = self.0.iter().position(|&s| s != 0).unwrap_or(self.0.len() - 1);
        let mut bound: Vec<u64> = self.0[..=index].to_vec();
        bound[index] += 1;
        Self(bound)
    }

    /// Exclusive upper bound for a tilde constraint
    fn tilde_bound(&self) -> Self {
        let index = if self.0.len() >= 2 { 1 } else { 0 };
        let mut bound: Vec<u64> = self.0[..=index].to_vec();
        bound[index] += 1;
        Self(bound)
    }
}

const OPERATORS: &[&str] = &["===", "~=", "==", "!=", ">=", "<=", ">", "<", "^", "~", "="];

/// Whether `locked` satisfies one specifier such as `>=2.0` or `~=1.4.2`
fn satisfies(locked: &str, specifier: &str) -> Result<bool, String> {
    let specifier = specifier.trim();
    if specifier.is_empty() || specifier == "*" {
        return Ok(true);
    }

    let (op, version) = OPERATORS
        .iter()
        .find_map(|op| specifier.strip_prefix(op).map(|rest| (*op, rest.trim())))
        .unwrap_or(("==", specifier));

    if op == "===" {
        return Ok(locked == version);
    }

    let have = Release::parse(locked).ok_or_else(|| format!("invalid version {}", locked))?;
    let wildcard = version.ends_with(".*");
    let want = Release::parse(version.trim_end_matches(".*"))
        .ok_or_else(|| format!("invalid specifier {}", specifier))?;

    use std::cmp::Ordering::*;
    let ordering = have.compare(&want);
    let ok = match op {
        "==" | "=" if wildcard => have.starts_with(&want),
        "==" | "=" => ordering == Equal,
        "!=" if wildcard => !have.starts_with(&want),
        "!=" => ordering != Equal,
        ">=" => ordering != Less,
        "<=" => ordering != Greater,
        ">" => ordering == Greater,
        "<" => ordering == Less,
        "~=" => {
            if want.0.len() < 2 {
                return Err(format!("~= needs at least two segments: {}", specifier));
            }
            let prefix = Release(want.0[..want.0.len() - 1].to_vec());
            ordering != Less && have.starts_with(&prefix)
        }
        "^" => ordering != Less && have.compare(&want.caret_bound()) == Less,
        "~" => ordering != Less && have.compare(&want.tilde_bound()) == Less,
        _ => return Err(format!("unsupported operator in {}", specifier)),
    };
    Ok(ok)
}

fn satisfies_all(locked: &str, constraint: &str) -> Result<bool, String> {
    for specifier in constraint.split(',') {
        if !satisfies(locked, specifier)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// One parsed requirement line
#[derive(Debug, Clone, PartialEq, Eq)]
struct Requirement {
    name: String,
    /// Comma-separated specifiers; `None` for direct URL references
    constraint: Option<String>,
}

fn parse_requirement(line: &str) -> Option<Requirement> {
    // Environment markers and per-line options do not affect the pin
    let line = line.split(';').next()?.trim();
    let line: String = line
        .split_whitespace()
        .take_while(|token| !token.starts_with("--"))
        .collect::<Vec<_>>()
        .join(" ");

    let name_end = line
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(line.len());
    let name = &line[..name_end];
    if name.is_empty() {
        return None;
    }

    let mut rest = line[name_end..].trim_start();
    if rest.starts_with('[') {
        rest = rest.split_once(']').map_or("", |(_, r)| r).trim_start();
    }
    if rest.starts_with('@') {
        return Some(Requirement {
            name: normalize_name(name),
            constraint: None,
        });
    }

    let constraint: String = rest
        .trim_start_matches('(')
        .trim_end_matches(')')
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    Some(Requirement {
        name: normalize_name(name),
        constraint: Some(constraint),
    })
}

fn parse_requirements_file(content: &str) -> Vec<Requirement> {
    content
        .replace("\\\r\n", " ")
        .replace("\\\n", " ")
        .lines()
        .map(|line| match line.find(" #") {
            Some(index) => &line[..index],
            None => line,
        })
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(parse_requirement)
        .collect()
}

fn check_python_requirements(
    requirements: &[Requirement],
    locked: &HashMap<String, String>,
    mismatches: &mut Vec<String>,
) {
    for requirement in requirements {
        let Some(version) = locked.get(&requirement.name) else {
            mismatches.push(format!("{} is declared but not locked", requirement.name));
            continue;
        };
        let Some(constraint) = &requirement.constraint else {
            continue;
        };
        match satisfies_all(version, constraint) {
            Ok(true) => {}
            Ok(false) => mismatches.push(format!(
                "{} locked at {} does not satisfy {}",
                requirement.name, version, constraint
            )),
            Err(e) => mismatches.push(format!("{}: {}", requirement.name, e)),
        }
    }
}

/// Check a fully pinned `requirements.lock` against `requirements.txt`.
/// Every lock entry must be an exact `==` pin. Returns the number of
/// requirements checked.
pub fn verify_requirements(manifest: &str, lock: &str) -> Result<usize, BuildError> {
    let requirements = parse_requirements_file(manifest);
    let mut mismatches = Vec::new();
    let mut locked = HashMap::new();

    for entry in parse_requirements_file(lock) {
        match entry.constraint.as_deref().and_then(|c| c.strip_prefix("==")) {
            Some(version) if !version.contains(',') && !version.ends_with(".*") => {
                locked.insert(entry.name, version.to_string());
            }
            _ => mismatches.push(format!("lock entry {} is not an exact pin", entry.name)),
        }
    }

    check_python_requirements(&requirements, &locked, &mut mismatches);
    finish(requirements.len(), mismatches)
}

/// Check `poetry.lock` against `pyproject.toml`, covering both
/// `[tool.poetry.dependencies]` and PEP 621 `[project].dependencies`.
pub fn verify_poetry(manifest: &str, lock: &str) -> Result<usize, BuildError> {
    let manifest: toml::Table =
        toml::from_str(manifest).map_err(|e| BuildError::parse("pyproject.toml", e))?;
    let lock: LockFile = toml::from_str(lock).map_err(|e| BuildError::parse("poetry.lock", e))?;

    let locked: HashMap<String, String> = lock
        .package
        .into_iter()
        .map(|p| (normalize_name(&p.name), p.version))
        .collect();

    let mut requirements = Vec::new();
    let poetry_deps = manifest
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_table());
    if let Some(deps) = poetry_deps {
        for (name, value) in deps {
            if name == "python" {
                continue;
            }
            let constraint = match value {
                toml::Value::String(c) => Some(c.clone()),
                toml::Value::Table(detail) if detail.contains_key("path") || detail.contains_key("git") => None,
                toml::Value::Table(detail) => detail
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .or_else(|| Some("*".to_string())),
                _ => Some("*".to_string()),
            };
            requirements.push(Requirement {
                name: normalize_name(name),
                constraint: constraint.map(|c| c.chars().filter(|c| !c.is_whitespace()).collect()),
            });
        }
    }

    let pep621 = manifest
        .get("project")
        .and_then(|p| p.get("dependencies"))
        .and_then(|d| d.as_array());
    if let Some(deps) = pep621 {
        requirements.extend(
            deps.iter()
                .filter_map(|d| d.as_str())
                .filter_map(parse_requirement),
        );
    }

    let mut mismatches = Vec::new();
    check_python_requirements(&requirements, &locked, &mut mismatches);
    finish(requirements.len(), mismatches)
}

/// Check the manifest and lock file in `dir` for the given package manager.
/// A missing lock file is not an error; the build resolves fresh.
pub fn verify_tree(dir: &Path, manager: PackageManager) -> Result<LockStatus, BuildError> {
    let manifest_path = dir.join(manager.manifest_file());
    let lock_path = dir.join(manager.lock_file());

    let manifest = fs::read_to_string(&manifest_path)?;
    if !lock_path.exists() {
        warn!(
            "No {} in {:?}; dependencies will resolve at build time",
            manager.lock_file(),
            dir
        );
        return Ok(LockStatus::Unlocked);
    }
    let lock = fs::read_to_string(&lock_path)?;

    let checked = match manager {
        PackageManager::Cargo => verify_cargo(&manifest, &lock)?,
        PackageManager::Pip => verify_requirements(&manifest, &lock)?,
        PackageManager::Poetry => verify_poetry(&manifest, &lock)?,
    };
    Ok(LockStatus::Locked { checked })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Yt_Dlp"), "yt-dlp");
        assert_eq!(normalize_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_name("a__-b"), "a-b");
    }

    #[test]
    fn test_release_parse() {
        assert_eq!(Release::parse("2024.08.06"), Some(Release(vec![2024, 8, 6])));
        assert_eq!(Release::parse("2.0.0rc1"), Some(Release(vec![2, 0, 0])));
        assert_eq!(Release::parse("1!3.2"), Some(Release(vec![3, 2])));
        assert_eq!(Release::parse("dev"), None);
    }

    #[test]
    fn test_specifiers() {
        assert!(satisfies("2.31.0", "==2.31").unwrap());
        assert!(satisfies("2.31.0", ">=2.0").unwrap());
        assert!(!satisfies("1.9", ">=2.0").unwrap());
        assert!(satisfies("1.4.5", "~=1.4.2").unwrap());
        assert!(!satisfies("1.5.0", "~=1.4.2").unwrap());
        assert!(satisfies("1.4.9", "==1.4.*").unwrap());
        assert!(!satisfies("1.4.9", "!=1.4.*").unwrap());
        assert!(satisfies("1.9.0", "^1.2").unwrap());
        assert!(!satisfies("2.0.0", "^1.2").unwrap());
        assert!(!satisfies("0.3.0", "^0.2.1").unwrap());
        assert!(satisfies("1.2.9", "~1.2.3").unwrap());
        assert!(!satisfies("1.3.0", "~1.2.3").unwrap());
        assert!(satisfies("0.110.0", "*").unwrap());
        assert!(satisfies_all("1.5", ">=1.0,<2.0").unwrap());
        assert!(!satisfies_all("2.5", ">=1.0,<2.0").unwrap());
        assert!(satisfies("3.0", "~=3").is_err());
    }

    #[test]
    fn test_parse_requirement_forms() {
        assert_eq!(
            parse_requirement("uvicorn[standard] >= 0.20 ; python_version >= '3.8'"),
            Some(Requirement {
                name: "uvicorn".to_string(),
                constraint: Some(">=0.20".to_string()),
            })
        );
        assert_eq!(
            parse_requirement("pkg @ https://example.com/pkg.whl"),
            Some(Requirement {
                name: "pkg".to_string(),
                constraint: None,
            })
        );
        assert_eq!(
            parse_requirement("Django"),
            Some(Requirement {
                name: "django".to_string(),
                constraint: Some(String::new()),
            })
        );
    }

    #[test]
    fn test_requirements_file_with_hashes() {
        let lock = "fastapi==0.110.0 \\\n    --hash=sha256:abc \\\n    --hash=sha256:def\n";
        let parsed = parse_requirements_file(lock);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].constraint.as_deref(), Some("==0.110.0"));
    }
}
