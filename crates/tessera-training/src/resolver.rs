//! Discovery of the backend interpreter and scripts directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable overriding the interpreter path.
pub const PYTHON_ENV: &str = "TESSERA_PYTHON";
/// Environment variable overriding the backend scripts directory.
pub const SCRIPTS_ENV: &str = "TESSERA_SCRIPTS_DIR";

/// Entry points whose presence identifies a backend install.
pub const MARKER_SCRIPTS: [&str; 3] = ["train_network.py", "sdxl_train_network.py", "flux_train_network.py"];

/// Candidate files holding the backend version, checked in order.
pub const VERSION_FILES: [&str; 3] = ["VERSION", "version.txt", "library/version.txt"];

/// Support package directory shipped next to the entry points.
pub const LIBRARY_DIR: &str = "library";

/// Python packages the backend imports; checked by `check_runtime_requirements`.
pub const REQUIRED_PACKAGES: [&str; 10] = [
    "torch",
    "torchvision",
    "accelerate",
    "transformers",
    "diffusers",
    "safetensors",
    "bitsandbytes",
    "PIL",
    "numpy",
    "tqdm",
];

/// Oldest interpreter the backend scripts run on.
pub const MIN_PYTHON_VERSION: (u32, u32) = (3, 8);

const INTROSPECT_SNIPPET: &str = r#"
import importlib, json, sys
packages = {}
for name in json.loads(sys.argv[1]):
    try:
        module = importlib.import_module(name)
        packages[name] = str(getattr(module, "__version__", "unknown"))
    except Exception:
        packages[name] = None
print(json.dumps({"python": "%d.%d.%d" % sys.version_info[:3], "packages": packages}))
"#;

const GPU_SNIPPET: &str = r#"
import json
out = {"devices": []}
try:
    import torch
    if torch.cuda.is_available():
        for i in range(torch.cuda.device_count()):
            props = torch.cuda.get_device_properties(i)
            out["devices"].append({"name": props.name, "memory_total_mb": props.total_memory // (1024 ** 2)})
except Exception as e:
    out["error"] = str(e)
print(json.dumps(out))
"#;

#[derive(Deserialize)]
struct IntrospectOutput {
    python: String,
    packages: BTreeMap<String, Option<String>>,
}

#[derive(Deserialize)]
struct GpuDetectOutput {
    #[serde(default)]
    devices: Vec<GpuDevice>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathSource {
    EnvOverride,
    Packaged,
    Development,
    Fallback,
}

/// A resolved path and whether it passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    pub path: PathBuf,
    pub source: PathSource,
    pub validated: bool,
}

/// Interpreter and scripts directory for one launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedBackend {
    pub python: ResolvedPath,
    pub scripts_dir: ResolvedPath,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Inputs to path resolution. `from_env` fills them from the process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverSettings {
    pub python_override: Option<PathBuf>,
    pub scripts_override: Option<PathBuf>,
    /// Root of a packaged install (the directory holding the application binary).
    pub install_root: Option<PathBuf>,
    /// Root of a development checkout.
    pub dev_root: Option<PathBuf>,
}

impl ResolverSettings {
    #[must_use]
    pub fn from_env() -> Self {
        let non_empty = |key: &str| {
            std::env::var_os(key).filter(|v| !v.is_empty()).map(PathBuf::from)
        };
        Self {
            python_override: non_empty(PYTHON_ENV),
            scripts_override: non_empty(SCRIPTS_ENV),
            install_root: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            dev_root: std::env::current_dir().ok(),
        }
    }
}

/// Result of `validate_installation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationReport {
    pub is_valid: bool,
    pub scripts_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_scripts: Vec<String>,
    pub has_library: bool,
}

/// Result of `check_runtime_requirements`.
///
/// Valid only when every package imports and the interpreter is at least
/// `MIN_PYTHON_VERSION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeRequirements {
    pub is_valid: bool,
    pub python: PathBuf,
    /// `major.minor.micro` as reported by the interpreter; `None` if it could not be asked.
    #[serde(default)]
    pub python_version: Option<String>,
    pub python_supported: bool,
    pub missing_packages: Vec<String>,
    /// Installed versions of the packages that were found.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub versions: BTreeMap<String, String>,
}

/// One CUDA device seen by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub name: String,
    pub memory_total_mb: u64,
}

impl GpuDevice {
    /// Total memory in whole gigabytes, rounded to nearest.
    #[must_use]
    pub fn vram_gb(&self) -> u32 {
        u32::try_from((self.memory_total_mb + 512) / 1024).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuStatus {
    Detected,
    NoGpu,
    /// Detection could not run or its output did not parse.
    Unknown,
}

/// Result of `detect_gpu`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuReport {
    pub status: GpuStatus,
    pub python: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<GpuDevice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl GpuReport {
    /// The device training runs on.
    #[must_use]
    pub fn primary(&self) -> Option<&GpuDevice> {
        self.devices.first()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    settings: ResolverSettings,
}

impl ConfigResolver {
    #[must_use]
    pub fn new(settings: ResolverSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    fn venv_python(root: &Path) -> PathBuf {
        if cfg!(windows) {
            root.join("venv").join("Scripts").join("python.exe")
        } else {
            root.join("venv").join("bin").join("python")
        }
    }

    fn fallback_python() -> &'static str {
        if cfg!(windows) { "python" } else { "python3" }
    }

    /// Interpreter path: env override, packaged venv, development venv, then the bare
    /// system name. The fallback is returned even when nothing validated.
    #[must_use]
    pub fn resolve_executable(&self) -> ResolvedPath {
        let mut candidates = Vec::new();
        if let Some(path) = &self.settings.python_override {
            candidates.push((path.clone(), PathSource::EnvOverride));
        }
        if let Some(root) = &self.settings.install_root {
            candidates.push((Self::venv_python(root), PathSource::Packaged));
        }
        if let Some(root) = &self.settings.dev_root {
            candidates.push((Self::venv_python(root), PathSource::Development));
        }

        for (path, source) in candidates {
            if path.is_file() {
                debug!(path = %path.display(), source = ?source, "Resolved backend interpreter");
                return ResolvedPath { path, source, validated: true };
            }
            if source == PathSource::EnvOverride {
                warn!(path = %path.display(), "{PYTHON_ENV} points to a missing file, ignoring");
            } else {
                debug!(path = %path.display(), "Interpreter candidate not found");
            }
        }

        let fallback = Self::fallback_python();
        warn!(fallback, "No bundled interpreter found, falling back to system Python");
        ResolvedPath { path: PathBuf::from(fallback), source: PathSource::Fallback, validated: false }
    }

    fn scripts_candidates(&self) -> Vec<(PathBuf, PathSource)> {
        let mut candidates = Vec::new();
        if let Some(path) = &self.settings.scripts_override {
            candidates.push((path.clone(), PathSource::EnvOverride));
        }
        if let Some(root) = &self.settings.install_root {
            candidates.push((root.join("resources").join("sd-scripts"), PathSource::Packaged));
        }
        if let Some(root) = &self.settings.dev_root {
            candidates.push((root.join("sd-scripts"), PathSource::Development));
            candidates.push((root.join("..").join("sd-scripts"), PathSource::Development));
            candidates.push((root.join("backend").join("sd-scripts"), PathSource::Development));
        }
        candidates
    }

    /// Scripts directory: the first candidate containing at least one marker script.
    #[must_use]
    pub fn resolve_scripts_dir(&self) -> ResolvedPath {
        let candidates = self.scripts_candidates();
        for (path, source) in &candidates {
            if has_any_marker(path) {
                debug!(path = %path.display(), source = ?source, "Resolved backend scripts directory");
                return ResolvedPath { path: path.clone(), source: *source, validated: true };
            }
            if *source == PathSource::EnvOverride {
                warn!(path = %path.display(), "{SCRIPTS_ENV} does not contain backend scripts, ignoring");
            }
        }

        let path = candidates
            .iter()
            .find(|(_, source)| *source == PathSource::Development)
            .or_else(|| candidates.first())
            .map_or_else(|| PathBuf::from("sd-scripts"), |(p, _)| p.clone());
        warn!(path = %path.display(), "No backend scripts directory found");
        ResolvedPath { path, source: PathSource::Fallback, validated: false }
    }

    /// Resolve both paths, collecting a warning for each one that did not validate.
    #[must_use]
    pub fn resolve(&self) -> ResolvedBackend {
        let python = self.resolve_executable();
        let scripts_dir = self.resolve_scripts_dir();
        let mut warnings = Vec::new();
        if !python.validated {
            warnings.push(format!(
                "No bundled Python interpreter found, using '{}' from PATH",
                python.path.display()
            ));
        }
        if !scripts_dir.validated {
            warnings.push(format!(
                "Backend scripts not found, using '{}'; set {SCRIPTS_ENV} to override",
                scripts_dir.path.display()
            ));
        }
        ResolvedBackend { python, scripts_dir, warnings }
    }

    /// Full path to the entry point for `script_name`.
    #[must_use]
    pub fn script_path(&self, script_name: &str) -> PathBuf {
        self.resolve_scripts_dir().path.join(script_name)
    }

    /// Check that every marker script exists, read the version, look for the library folder.
    #[must_use]
    pub fn validate_installation(&self) -> InstallationReport {
        let scripts_dir = self.resolve_scripts_dir().path;
        let missing_scripts: Vec<String> = MARKER_SCRIPTS
            .iter()
            .filter(|name| !scripts_dir.join(name).is_file())
            .map(|name| (*name).to_string())
            .collect();
        let version = read_version(&scripts_dir);
        let has_library = scripts_dir.join(LIBRARY_DIR).is_dir();

        InstallationReport {
            is_valid: missing_scripts.is_empty(),
            scripts_dir,
            version,
            missing_scripts,
            has_library,
        }
    }

    /// Ask the resolved interpreter which required packages it can import.
    pub async fn check_runtime_requirements(&self) -> RuntimeRequirements {
        let python = self.resolve_executable().path;
        check_packages(&python, &REQUIRED_PACKAGES).await
    }

    /// Ask the resolved interpreter which CUDA devices it sees.
    pub async fn detect_gpu(&self) -> GpuReport {
        let python = self.resolve_executable().path;
        detect_gpu(&python).await
    }
}

fn has_any_marker(dir: &Path) -> bool {
    dir.is_dir() && MARKER_SCRIPTS.iter().any(|name| dir.join(name).is_file())
}

fn read_version(dir: &Path) -> Option<String> {
    VERSION_FILES.iter().find_map(|name| {
        let contents = std::fs::read_to_string(dir.join(name)).ok()?;
        let version = contents.lines().next()?.trim().to_string();
        (!version.is_empty()).then_some(version)
    })
}

/// Last non-blank stdout line of `python -c snippet args..`, or `None` if it could not run.
async fn run_snippet(python: &Path, snippet: &str, args: &[&str]) -> Option<(String, std::process::ExitStatus)> {
    match Command::new(python).arg("-c").arg(snippet).args(args).output().await {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let line = stdout.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim().to_string();
            Some((line, output.status))
        }
        Err(e) => {
            warn!(python = %python.display(), error = %e, "Failed to run interpreter");
            None
        }
    }
}

/// Parse `major.minor[.micro]` into `(major, minor)`.
fn parse_python_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

/// Run the introspection snippet under `python` for `packages`.
///
/// Any spawn, exit or parse failure reports every package as missing.
pub async fn check_packages(python: &Path, packages: &[&str]) -> RuntimeRequirements {
    let all_missing = || RuntimeRequirements {
        is_valid: false,
        python: python.to_path_buf(),
        python_version: None,
        python_supported: false,
        missing_packages: packages.iter().map(|p| (*p).to_string()).collect(),
        versions: BTreeMap::new(),
    };

    let list = match serde_json::to_string(packages) {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "Failed to encode package list");
            return all_missing();
        }
    };

    let Some((line, status)) = run_snippet(python, INTROSPECT_SNIPPET, &[&list]).await else {
        return all_missing();
    };
    let Ok(found) = serde_json::from_str::<IntrospectOutput>(&line) else {
        warn!(python = %python.display(), status = %status, "Could not parse requirement check output");
        return all_missing();
    };

    let mut missing = Vec::new();
    let mut versions = BTreeMap::new();
    for package in packages {
        match found.packages.get(*package).cloned().flatten() {
            Some(version) => {
                versions.insert((*package).to_string(), version);
            }
            None => missing.push((*package).to_string()),
        }
    }

    let python_supported = parse_python_version(&found.python).is_some_and(|v| v >= MIN_PYTHON_VERSION);
    if !python_supported {
        let (major, minor) = MIN_PYTHON_VERSION;
        warn!(python = %python.display(), version = %found.python, "Python {major}.{minor}+ is required");
    }

    RuntimeRequirements {
        is_valid: missing.is_empty() && python_supported,
        python: python.to_path_buf(),
        python_version: Some(found.python),
        python_supported,
        missing_packages: missing,
        versions,
    }
}

/// Ask `python` which CUDA devices torch can see.
///
/// Never fails: anything that prevents a clean answer yields `GpuStatus::Unknown`.
pub async fn detect_gpu(python: &Path) -> GpuReport {
    let unknown = |detail: String| GpuReport {
        status: GpuStatus::Unknown,
        python: python.to_path_buf(),
        devices: Vec::new(),
        detail: Some(detail),
    };

    let Some((line, status)) = run_snippet(python, GPU_SNIPPET, &[]).await else {
        return unknown("interpreter could not be started".to_string());
    };
    let found = match serde_json::from_str::<GpuDetectOutput>(&line) {
        Ok(found) => found,
        Err(e) => {
            debug!(python = %python.display(), status = %status, error = %e, "Could not parse GPU detection output");
            return unknown(format!("unreadable detection output ({status})"));
        }
    };
    if let Some(error) = found.error {
        return unknown(error);
    }

    let status = if found.devices.is_empty() { GpuStatus::NoGpu } else { GpuStatus::Detected };
    GpuReport { status, python: python.to_path_buf(), devices: found.devices, detail: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_executable_falls_back_without_candidates() {
        let resolver = ConfigResolver::new(ResolverSettings::default());
        let resolved = resolver.resolve_executable();
        assert_eq!(resolved.source, PathSource::Fallback);
        assert!(!resolved.validated);
    }

    #[test]
    fn test_resolve_collects_warnings() {
        let resolver = ConfigResolver::new(ResolverSettings::default());
        let backend = resolver.resolve();
        assert_eq!(backend.warnings.len(), 2);

        let scripts = TempDir::new().unwrap();
        touch(&scripts.path().join("flux_train_network.py"));
        let resolver = ConfigResolver::new(ResolverSettings {
            scripts_override: Some(scripts.path().to_path_buf()),
            ..Default::default()
        });
        let backend = resolver.resolve();
        assert_eq!(backend.warnings.len(), 1);
        assert!(backend.scripts_dir.validated);
    }

    #[test]
    fn test_executable_env_override_must_exist() {
        let temp = TempDir::new().unwrap();
        let dev_python = ConfigResolver::venv_python(temp.path());
        touch(&dev_python);

        let resolver = ConfigResolver::new(ResolverSettings {
            python_override: Some(temp.path().join("missing-python")),
            dev_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        });
        let resolved = resolver.resolve_executable();
        assert_eq!(resolved.source, PathSource::Development);
        assert_eq!(resolved.path, dev_python);
    }

    #[test]
    fn test_executable_prefers_packaged_over_dev() {
        let packaged = TempDir::new().unwrap();
        let dev = TempDir::new().unwrap();
        touch(&ConfigResolver::venv_python(packaged.path()));
        touch(&ConfigResolver::venv_python(dev.path()));

        let resolver = ConfigResolver::new(ResolverSettings {
            install_root: Some(packaged.path().to_path_buf()),
            dev_root: Some(dev.path().to_path_buf()),
            ..Default::default()
        });
        assert_eq!(resolver.resolve_executable().source, PathSource::Packaged);
    }

    #[test]
    fn test_scripts_dir_requires_marker_not_just_existence() {
        let dev = TempDir::new().unwrap();
        std::fs::create_dir_all(dev.path().join("sd-scripts")).unwrap();
        touch(&dev.path().join("backend/sd-scripts/flux_train_network.py"));

        let resolver = ConfigResolver::new(ResolverSettings {
            dev_root: Some(dev.path().to_path_buf()),
            ..Default::default()
        });
        let resolved = resolver.resolve_scripts_dir();
        assert!(resolved.validated);
        assert_eq!(resolved.path, dev.path().join("backend").join("sd-scripts"));
    }

    #[test]
    fn test_scripts_env_override_wins() {
        let scripts = TempDir::new().unwrap();
        touch(&scripts.path().join("train_network.py"));
        let resolver = ConfigResolver::new(ResolverSettings {
            scripts_override: Some(scripts.path().to_path_buf()),
            ..Default::default()
        });
        let resolved = resolver.resolve_scripts_dir();
        assert_eq!(resolved.source, PathSource::EnvOverride);
        assert_eq!(resolver.script_path("train_network.py"), scripts.path().join("train_network.py"));
    }

    #[test]
    fn test_validate_installation_reports_missing_and_version() {
        let scripts = TempDir::new().unwrap();
        touch(&scripts.path().join("train_network.py"));
        touch(&scripts.path().join("sdxl_train_network.py"));
        std::fs::write(scripts.path().join("version.txt"), "0.9.1\n").unwrap();

        let resolver = ConfigResolver::new(ResolverSettings {
            scripts_override: Some(scripts.path().to_path_buf()),
            ..Default::default()
        });
        let report = resolver.validate_installation();
        assert!(!report.is_valid);
        assert_eq!(report.missing_scripts, vec!["flux_train_network.py".to_string()]);
        assert_eq!(report.version.as_deref(), Some("0.9.1"));
        assert!(!report.has_library);

        touch(&scripts.path().join("flux_train_network.py"));
        std::fs::create_dir_all(scripts.path().join(LIBRARY_DIR)).unwrap();
        let report = resolver.validate_installation();
        assert!(report.is_valid);
        assert!(report.has_library);
    }

    #[tokio::test]
    async fn test_check_packages_missing_interpreter_assumes_missing() {
        let result = check_packages(Path::new("/no/such/python"), &["torch", "numpy"]).await;
        assert!(!result.is_valid);
        assert_eq!(result.missing_packages, vec!["torch".to_string(), "numpy".to_string()]);
    }

    #[cfg(unix)]
    fn fake_python(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("python");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_packages_parses_versions() {
        let temp = TempDir::new().unwrap();
        let python = fake_python(
            temp.path(),
            r#"echo '{"python": "3.10.12", "packages": {"torch": "2.3.1", "numpy": null}}'"#,
        );
        let result = check_packages(&python, &["torch", "numpy", "tqdm"]).await;
        assert!(!result.is_valid);
        assert_eq!(result.missing_packages, vec!["numpy".to_string(), "tqdm".to_string()]);
        assert_eq!(result.versions.get("torch").map(String::as_str), Some("2.3.1"));
        assert_eq!(result.python_version.as_deref(), Some("3.10.12"));
        assert!(result.python_supported);

        let result = check_packages(&python, &["torch"]).await;
        assert!(result.is_valid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_packages_rejects_old_interpreter() {
        let temp = TempDir::new().unwrap();
        let python = fake_python(temp.path(), r#"echo '{"python": "3.7.17", "packages": {"torch": "1.13.1"}}'"#);
        let result = check_packages(&python, &["torch"]).await;
        assert!(result.missing_packages.is_empty());
        assert_eq!(result.python_version.as_deref(), Some("3.7.17"));
        assert!(!result.python_supported);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_parse_python_version() {
        assert_eq!(parse_python_version("3.11.4"), Some((3, 11)));
        assert_eq!(parse_python_version("3.8"), Some((3, 8)));
        assert_eq!(parse_python_version("3"), None);
        assert_eq!(parse_python_version("three.eight"), None);
        assert!(parse_python_version("3.10.0").unwrap() >= MIN_PYTHON_VERSION);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detect_gpu_reads_devices() {
        let temp = TempDir::new().unwrap();
        let python = fake_python(
            temp.path(),
            r#"echo 'loading torch'
echo '{"devices": [{"name": "NVIDIA GeForce RTX 4090", "memory_total_mb": 24564}]}'"#,
        );
        let report = detect_gpu(&python).await;
        assert_eq!(report.status, GpuStatus::Detected);
        let gpu = report.primary().unwrap();
        assert_eq!(gpu.name, "NVIDIA GeForce RTX 4090");
        assert_eq!(gpu.vram_gb(), 24);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detect_gpu_without_cuda_or_torch() {
        let temp = TempDir::new().unwrap();
        let python = fake_python(temp.path(), r#"echo '{"devices": []}'"#);
        assert_eq!(detect_gpu(&python).await.status, GpuStatus::NoGpu);

        let other = TempDir::new().unwrap();
        let python = fake_python(other.path(), r#"echo '{"devices": [], "error": "No module named torch"}'"#);
        let report = detect_gpu(&python).await;
        assert_eq!(report.status, GpuStatus::Unknown);
        assert_eq!(report.detail.as_deref(), Some("No module named torch"));
    }

    #[tokio::test]
    async fn test_detect_gpu_failures_are_unknown() {
        let report = detect_gpu(Path::new("/no/such/python")).await;
        assert_eq!(report.status, GpuStatus::Unknown);
        assert!(report.devices.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_packages_garbage_output_assumes_missing() {
        let temp = TempDir::new().unwrap();
        let python = fake_python(temp.path(), "echo 'Traceback (most recent call last):'");
        let result = check_packages(&python, &["torch"]).await;
        assert_eq!(result.missing_packages, vec!["torch".to_string()]);
        assert!(result.python_version.is_none());

        assert_eq!(detect_gpu(&python).await.status, GpuStatus::Unknown);
    }
}
