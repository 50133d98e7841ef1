//! Build contract for the service container image
//!
//! A [`BuildContract`] describes everything the image build needs: base
//! images, OS packages, how dependencies are installed, what is copied, the
//! runtime identity, and the entry point. [`BuildContract::validate`] checks
//! the contract's invariants and [`BuildContract::stages`] lays it out as
//! Dockerfile instructions in cache-friendly order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use super::BuildError;

/// Media transcoder that must be present at runtime
pub const TRANSCODER_PACKAGE: &str = "ffmpeg";

/// Lowest uid/gid accepted for the runtime identity; below this are system
/// accounts on common distributions.
pub const MIN_UNPRIVILEGED_ID: u32 = 1000;

/// Address the entry command must bind to
pub const BIND_ALL_INTERFACES: &str = "0.0.0.0";

/// Environment toggles for any image that runs pip
pub const PYTHON_ENV_TOGGLES: &[(&str, &str)] = &[
    ("PYTHONDONTWRITEBYTECODE", "1"),
    ("PYTHONUNBUFFERED", "1"),
    ("PIP_NO_CACHE_DIR", "1"),
    ("PIP_DISABLE_PIP_VERSION_CHECK", "1"),
];

/// Image reference pinned by tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseImage {
    pub name: String,
    pub tag: String,
}

impl BaseImage {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// A tag is pinned when it names a concrete version, i.e. it is not
    /// empty, not `latest`, and carries a version number.
    pub fn is_pinned(&self) -> bool {
        !self.tag.is_empty()
            && !self.tag.eq_ignore_ascii_case("latest")
            && self.tag.chars().any(|c| c.is_ascii_digit())
    }
}

impl fmt::Display for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Dependency installer used by the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Pip,
    Poetry,
    Cargo,
}

impl PackageManager {
    pub fn manifest_file(&self) -> &'static str {
        match self {
            Self::Pip => "requirements.txt",
            Self::Poetry => "pyproject.toml",
            Self::Cargo => "Cargo.toml",
        }
    }

    pub fn lock_file(&self) -> &'static str {
        match self {
            Self::Pip => "requirements.lock",
            Self::Poetry => "poetry.lock",
            Self::Cargo => "Cargo.lock",
        }
    }

    /// Install command. With a lock file every variant fails closed when the
    /// lock cannot be honoured; without one, dependencies resolve fresh.
    pub fn install_command(&self, locked: bool) -> String {
        match (self, locked) {
            (Self::Pip, true) => "pip install --no-cache-dir --require-hashes -r requirements.lock \
                 && pip install --no-cache-dir --no-index --no-deps -r requirements.txt"
                .to_string(),
            (Self::Pip, false) => "pip install --no-cache-dir -r requirements.txt".to_string(),
            (Self::Poetry, true) => "pip install --no-cache-dir poetry==1.8.3 \
                 && poetry check --lock \
                 && poetry install --no-root --only main --no-interaction"
                .to_string(),
            (Self::Poetry, false) => "pip install --no-cache-dir poetry==1.8.3 \
                 && poetry install --no-root --only main --no-interaction"
                .to_string(),
            (Self::Cargo, true) => "cargo fetch --locked".to_string(),
            (Self::Cargo, false) => "cargo fetch".to_string(),
        }
    }

    /// Paths that must never reach the build context
    pub fn required_ignores(&self) -> &'static [&'static str] {
        match self {
            Self::Pip | Self::Poetry => &[".venv", "__pycache__", "*.pyc"],
            Self::Cargo => &["target"],
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "pip" => Some(Self::Pip),
            "poetry" => Some(Self::Poetry),
            "cargo" | "rust" => Some(Self::Cargo),
            _ => None,
        }
    }
}

/// Unprivileged account the service runs as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeIdentity {
    pub user: String,
    pub group: String,
    pub uid: u32,
    pub gid: u32,
}

impl Default for RuntimeIdentity {
    fn default() -> Self {
        Self {
            user: "app".to_string(),
            group: "app".to_string(),
            uid: 1001,
            gid: 1001,
        }
    }
}

impl RuntimeIdentity {
    /// Debian/Ubuntu account creation plus ownership transfer of `workdir`
    pub fn setup_command(&self, workdir: &str) -> String {
        format!(
            "groupadd --system --gid {gid} {group} \
             && useradd --system --uid {uid} --gid {group} --home-dir {workdir} --shell /usr/sbin/nologin {user} \
             && chown -R {user}:{group} {workdir}",
            gid = self.gid,
            uid = self.uid,
            group = self.group,
            user = self.user,
            workdir = workdir,
        )
    }

    /// Numeric `USER` value, so the runtime id is visible in image metadata
    pub fn user_spec(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

/// Separate compile stage; only its artifact reaches the runtime image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileStage {
    pub image: BaseImage,
    /// Path of the built artifact inside the compile stage
    pub artifact: String,
    /// Where the artifact lands in the runtime image
    pub install_path: String,
}

/// Complete description of one image build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildContract {
    pub base_image: BaseImage,
    pub compile_stage: Option<CompileStage>,
    pub workdir: String,
    /// OS packages installed in the runtime image
    pub os_packages: Vec<String>,
    /// Compiler toolchain, installed only when `needs_native_build` is set
    pub native_toolchain: Vec<String>,
    pub needs_native_build: bool,
    pub package_manager: PackageManager,
    pub has_lock_file: bool,
    /// Pinned pip packages installed into the runtime image
    pub runtime_tools: Vec<String>,
    /// Application paths copied after dependency installation
    pub copy_paths: Vec<String>,
    /// Build-context exclusions (`.dockerignore`)
    pub ignore: Vec<String>,
    pub identity: RuntimeIdentity,
    pub port: u16,
    pub entry: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// One Dockerfile instruction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    From {
        image: BaseImage,
        alias: Option<String>,
    },
    Env(Vec<(String, String)>),
    Workdir(String),
    Run(String),
    Copy {
        from_stage: Option<String>,
        sources: Vec<String>,
        destination: String,
    },
    User(String),
    Expose(u16),
    Cmd(Vec<String>),
}

/// A build stage: its instructions, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub instructions: Vec<Instruction>,
}

const BUILDER_ALIAS: &str = "builder";

fn env_pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl BuildContract {
    /// Contract for this service: a Rust compile stage and a slim Debian
    /// runtime with ffmpeg and a pinned yt-dlp.
    pub fn service_default() -> Self {
        let mut env = env_pairs(PYTHON_ENV_TOGGLES);
        env.push(("RUST_LOG".to_string(), "media_fetch_api=info,tower_http=info".to_string()));

        Self {
            base_image: BaseImage::new("debian", "bookworm-20240701-slim"),
            compile_stage: Some(CompileStage {
                image: BaseImage::new("rust", "1.82-slim-bookworm"),
                artifact: "/app/target/release/media-fetch-api".to_string(),
                install_path: "/usr/local/bin/media-fetch-api".to_string(),
            }),
            workdir: "/app".to_string(),
            os_packages: strings(&[TRANSCODER_PACKAGE, "python3", "python3-pip", "ca-certificates"]),
            native_toolchain: Vec::new(),
            needs_native_build: false,
            package_manager: PackageManager::Cargo,
            has_lock_file: true,
            runtime_tools: strings(&["yt-dlp==2024.8.6"]),
            copy_paths: strings(&["src"]),
            ignore: strings(&["target", ".git", "*.log", "Dockerfile", ".dockerignore"]),
            identity: RuntimeIdentity::default(),
            port: 8080,
            entry: strings(&[
                "media-fetch-api",
                "serve",
                "--host",
                BIND_ALL_INTERFACES,
                "--port",
                "8080",
            ]),
            env,
        }
    }

    /// Contract for the Python/uvicorn variants of the service
    pub fn python_service(manager: PackageManager, needs_native_build: bool) -> Self {
        let mut env = env_pairs(PYTHON_ENV_TOGGLES);
        if manager == PackageManager::Poetry {
            env.push(("POETRY_NO_INTERACTION".to_string(), "1".to_string()));
            env.push(("POETRY_VIRTUALENVS_CREATE".to_string(), "false".to_string()));
        }

        Self {
            base_image: BaseImage::new("python", "3.11.9-slim"),
            compile_stage: None,
            workdir: "/app".to_string(),
            os_packages: strings(&[TRANSCODER_PACKAGE]),
            native_toolchain: strings(&["gcc", "build-essential"]),
            needs_native_build,
            package_manager: manager,
            has_lock_file: true,
            runtime_tools: Vec::new(),
            copy_paths: strings(&["main.py"]),
            ignore: strings(&[
                ".venv",
                "venv",
                "__pycache__",
                "*.pyc",
                ".pytest_cache",
                ".git",
                ".env",
            ]),
            identity: RuntimeIdentity::default(),
            port: 8080,
            entry: strings(&[
                "uvicorn",
                "main:app",
                "--host",
                BIND_ALL_INTERFACES,
                "--port",
                "8080",
            ]),
            env,
        }
    }

    /// Contract preset by name: `rust`, `pip`, or `poetry`
    pub fn preset(name: &str) -> Option<Self> {
        match PackageManager::parse(name)? {
            PackageManager::Cargo => Some(Self::service_default()),
            manager => Some(Self::python_service(manager, false)),
        }
    }

    /// Same contract without a lock file; dependencies resolve on every build
    pub fn without_lock(mut self) -> Self {
        self.has_lock_file = false;
        self
    }

    /// Installs from the lock file only when `source` has one
    pub fn with_lock_from(mut self, source: &Path) -> Self {
        self.has_lock_file = source.join(self.package_manager.lock_file()).is_file();
        self
    }

    /// Host the entry command binds to (`--host X`, `--host=X`, `--bind X:P`)
    pub fn entry_host(&self) -> Option<String> {
        flag_value(&self.entry, &["--host", "-H"])
            .or_else(|| bind_value(&self.entry).map(|(host, _)| host))
    }

    /// Port the entry command binds to (`--port N`, `--port=N`, `--bind X:N`)
    pub fn entry_port(&self) -> Option<u16> {
        flag_value(&self.entry, &["--port", "-p"])
            .and_then(|p| p.parse().ok())
            .or_else(|| bind_value(&self.entry).and_then(|(_, port)| port.parse().ok()))
    }

    /// OS packages for the runtime image, toolchain included when needed
    pub fn resolved_os_packages(&self) -> Vec<String> {
        let mut packages = self.os_packages.clone();
        if self.needs_native_build && self.compile_stage.is_none() {
            for tool in &self.native_toolchain {
                if !packages.contains(tool) {
                    packages.push(tool.clone());
                }
            }
        }
        packages
    }

    fn is_ignored(&self, path: &str) -> bool {
        let path = path.trim_start_matches("./").trim_end_matches('/');
        self.ignore.iter().any(|pattern| {
            let pattern = pattern.trim_start_matches("./").trim_end_matches('/');
            if let Some(suffix) = pattern.strip_prefix('*') {
                path.ends_with(suffix)
            } else {
                path == pattern || path.starts_with(&format!("{pattern}/"))
            }
        })
    }

    /// Check every invariant; all violations are reported together.
    pub fn validate(&self) -> Result<(), BuildError> {
        let mut violations = Vec::new();

        if !self.base_image.is_pinned() {
            violations.push(format!(
                "base image {} is not pinned to an exact version tag",
                self.base_image
            ));
        }
        if let Some(stage) = &self.compile_stage {
            if !stage.image.is_pinned() {
                violations.push(format!(
                    "compile image {} is not pinned to an exact version tag",
                    stage.image
                ));
            }
        }

        if !self.workdir.starts_with('/') {
            violations.push(format!("workdir {} must be absolute", self.workdir));
        }

        if !self.os_packages.iter().any(|p| p == TRANSCODER_PACKAGE) {
            violations.push(format!(
                "required OS package {} is missing",
                TRANSCODER_PACKAGE
            ));
        }
        if self.needs_native_build && self.compile_stage.is_none() && self.native_toolchain.is_empty()
        {
            violations.push("native build requested but no compiler toolchain listed".to_string());
        }

        let identity = &self.identity;
        if identity.uid < MIN_UNPRIVILEGED_ID || identity.gid < MIN_UNPRIVILEGED_ID {
            violations.push(format!(
                "runtime uid/gid {}:{} must be at least {}",
                identity.uid, identity.gid, MIN_UNPRIVILEGED_ID
            ));
        }
        if identity.user == "root" || identity.group == "root" {
            violations.push("runtime identity must not be root".to_string());
        }

        if self.port == 0 {
            violations.push("exposed port must be non-zero".to_string());
        }
        match self.entry_port() {
            Some(port) if port == self.port => {}
            Some(port) => violations.push(format!(
                "entry command binds port {} but image exposes {}",
                port, self.port
            )),
            None => violations.push("entry command does not declare a port".to_string()),
        }
        match self.entry_host() {
            Some(host) if host == BIND_ALL_INTERFACES => {}
            Some(host) => violations.push(format!(
                "entry command binds {} instead of {}",
                host, BIND_ALL_INTERFACES
            )),
            None => violations.push("entry command does not declare a bind host".to_string()),
        }

        for required in self.package_manager.required_ignores() {
            if !self.ignore.iter().any(|p| p == required) {
                violations.push(format!("ignore list must exclude {}", required));
            }
        }

        if self.copy_paths.is_empty() {
            violations.push("no application paths to copy".to_string());
        }
        for path in &self.copy_paths {
            if self.is_ignored(path) {
                violations.push(format!("copied path {} is excluded by the ignore list", path));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(BuildError::Contract(violations))
        }
    }

    fn manifest_sources(&self) -> Vec<String> {
        let mut sources = vec![self.package_manager.manifest_file().to_string()];
        if self.has_lock_file {
            sources.push(self.package_manager.lock_file().to_string());
        }
        sources
    }

    /// One COPY per path so directories keep their name under the workdir
    fn source_copies(&self) -> Vec<Instruction> {
        self.copy_paths
            .iter()
            .map(|path| {
                let path = path.trim_start_matches("./").trim_end_matches('/');
                Instruction::Copy {
                    from_stage: None,
                    sources: vec![path.to_string()],
                    destination: format!("./{}", path),
                }
            })
            .collect()
    }

    fn os_install_command(&self) -> String {
        format!(
            "apt-get update \
             && apt-get install -y --no-install-recommends {} \
             && rm -rf /var/lib/apt/lists/*",
            self.resolved_os_packages().join(" ")
        )
    }

    fn runtime_tools_command(&self) -> Option<String> {
        if self.runtime_tools.is_empty() {
            return None;
        }
        // Debian's system Python is externally managed; the image is the only consumer.
        let pip = if self.compile_stage.is_some() {
            "pip3 install --no-cache-dir --break-system-packages"
        } else {
            "pip install --no-cache-dir"
        };
        Some(format!("{} {}", pip, self.runtime_tools.join(" ")))
    }

    /// Ordered build stages. Rarely changing layers come first: OS packages,
    /// then manifests and dependency installation, then application sources.
    pub fn stages(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        let mut runtime = Vec::new();

        runtime.push(Instruction::From {
            image: self.base_image.clone(),
            alias: None,
        });
        if !self.env.is_empty() {
            runtime.push(Instruction::Env(self.env.clone()));
        }
        runtime.push(Instruction::Workdir(self.workdir.clone()));
        runtime.push(Instruction::Run(self.os_install_command()));
        if let Some(tools) = self.runtime_tools_command() {
            runtime.push(Instruction::Run(tools));
        }

        match &self.compile_stage {
            Some(compile) => {
                let mut builder = vec![
                    Instruction::From {
                        image: compile.image.clone(),
                        alias: Some(BUILDER_ALIAS.to_string()),
                    },
                    Instruction::Workdir(self.workdir.clone()),
                    Instruction::Copy {
                        from_stage: None,
                        sources: self.manifest_sources(),
                        destination: "./".to_string(),
                    },
                    Instruction::Run(self.package_manager.install_command(self.has_lock_file)),
                ];
                builder.extend(self.source_copies());
                builder.push(Instruction::Run(compile_command(self.has_lock_file)));
                stages.push(Stage {
                    instructions: builder,
                });

                runtime.push(Instruction::Copy {
                    from_stage: Some(BUILDER_ALIAS.to_string()),
                    sources: vec![compile.artifact.clone()],
                    destination: compile.install_path.clone(),
                });
            }
            None => {
                runtime.push(Instruction::Copy {
                    from_stage: None,
                    sources: self.manifest_sources(),
                    destination: "./".to_string(),
                });
                runtime.push(Instruction::Run(
                    self.package_manager.install_command(self.has_lock_file),
                ));
                runtime.extend(self.source_copies());
            }
        }

        runtime.push(Instruction::Run(self.identity.setup_command(&self.workdir)));
        runtime.push(Instruction::User(self.identity.user_spec()));
        runtime.push(Instruction::Expose(self.port));
        runtime.push(Instruction::Cmd(self.entry.clone()));

        stages.push(Stage {
            instructions: runtime,
        });
        stages
    }

    /// All instructions of all stages, in build order
    pub fn layers(&self) -> Vec<Instruction> {
        self.stages()
            .into_iter()
            .flat_map(|stage| stage.instructions)
            .collect()
    }
}

/// Release build in the compile stage, after `cargo fetch` populated the registry
fn compile_command(locked: bool) -> String {
    if locked {
        "cargo build --release --locked --offline".to_string()
    } else {
        "cargo build --release --offline".to_string()
    }
}

fn flag_value(args: &[String], flags: &[&str]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        for flag in flags {
            if arg == flag {
                return iter.next().cloned();
            }
            if let Some(value) = arg.strip_prefix(&format!("{flag}=")) {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn bind_value(args: &[String]) -> Option<(String, String)> {
    let bind = flag_value(args, &["--bind", "-b"])?;
    let (host, port) = bind.rsplit_once(':')?;
    Some((host.to_string(), port.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_tags() {
        assert!(BaseImage::new("python", "3.11.9-slim").is_pinned());
        assert!(BaseImage::new("debian", "bookworm-20240701-slim").is_pinned());
        assert!(!BaseImage::new("python", "latest").is_pinned());
        assert!(!BaseImage::new("python", "").is_pinned());
        assert!(!BaseImage::new("debian", "bookworm-slim").is_pinned());
    }

    #[test]
    fn test_entry_parsing() {
        let mut contract = BuildContract::python_service(PackageManager::Pip, false);
        assert_eq!(contract.entry_port(), Some(8080));
        assert_eq!(contract.entry_host().as_deref(), Some("0.0.0.0"));

        contract.entry = vec![
            "gunicorn".to_string(),
            "--bind".to_string(),
            "0.0.0.0:9000".to_string(),
        ];
        assert_eq!(contract.entry_port(), Some(9000));
        assert_eq!(contract.entry_host().as_deref(), Some("0.0.0.0"));

        contract.entry = vec!["server".to_string(), "--port=7000".to_string()];
        assert_eq!(contract.entry_port(), Some(7000));
        assert_eq!(contract.entry_host(), None);
    }

    #[test]
    fn test_toolchain_only_when_needed() {
        let plain = BuildContract::python_service(PackageManager::Pip, false);
        assert_eq!(plain.resolved_os_packages(), vec!["ffmpeg".to_string()]);

        let native = BuildContract::python_service(PackageManager::Pip, true);
        let packages = native.resolved_os_packages();
        assert!(packages.contains(&"gcc".to_string()));
        assert!(packages.contains(&"ffmpeg".to_string()));
    }

    #[test]
    fn test_ignore_matching() {
        let contract = BuildContract::python_service(PackageManager::Pip, false);
        assert!(contract.is_ignored(".venv"));
        assert!(contract.is_ignored("./.venv/lib"));
        assert!(contract.is_ignored("pkg/module.pyc"));
        assert!(!contract.is_ignored("main.py"));
    }

    #[test]
    fn test_layers_span_both_stages() {
        let layers = BuildContract::service_default().layers();
        assert!(matches!(
            &layers[0],
            Instruction::From { alias: Some(alias), .. } if alias == "builder"
        ));
        assert!(matches!(layers.last(), Some(Instruction::Cmd(_))));
        assert_eq!(
            layers
                .iter()
                .filter(|l| matches!(l, Instruction::From { .. }))
                .count(),
            2
        );
        assert!(layers.contains(&Instruction::User("1001:1001".to_string())));
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(
            BuildContract::preset("rust").unwrap().package_manager,
            PackageManager::Cargo
        );
        assert_eq!(
            BuildContract::preset("poetry").unwrap().package_manager,
            PackageManager::Poetry
        );
        assert!(BuildContract::preset("npm").is_none());
    }
}
