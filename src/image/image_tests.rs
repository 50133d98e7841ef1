//! Tests for the image contract, renderer, and lock verifier

#[cfg(test)]
mod tests {
    use super::super::*;
    use std::fs;
    use tempfile::tempdir;

    fn violations(contract: &BuildContract) -> Vec<String> {
        match contract.validate() {
            Err(BuildError::Contract(v)) => v,
            Err(other) => panic!("unexpected error: {}", other),
            Ok(()) => Vec::new(),
        }
    }

    fn runtime_lines(dockerfile: &str) -> Vec<&str> {
        let runtime = dockerfile.rsplit("\n\n").next().unwrap();
        runtime.lines().collect()
    }

    fn position(lines: &[&str], prefix: &str) -> usize {
        lines
            .iter()
            .position(|l| l.starts_with(prefix))
            .unwrap_or_else(|| panic!("no {} line", prefix))
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(BuildContract::service_default().validate().is_ok());
        assert!(BuildContract::python_service(PackageManager::Pip, false)
            .validate()
            .is_ok());
        assert!(BuildContract::python_service(PackageManager::Poetry, true)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let contract = BuildContract::service_default();
        let first = render_dockerfile(&contract).unwrap();
        let second = render_dockerfile(&contract.clone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(render_dockerignore(&contract), render_dockerignore(&contract));
    }

    #[test]
    fn test_runs_as_fixed_unprivileged_user() {
        let dockerfile = render_dockerfile(&BuildContract::service_default()).unwrap();
        let lines = runtime_lines(&dockerfile);

        assert!(lines.contains(&"USER 1001:1001"));
        assert!(position(&lines, "USER") < position(&lines, "CMD"));
        assert!(position(&lines, "RUN groupadd") < position(&lines, "USER"));
        assert!(dockerfile.contains("chown -R app:app /app"));
    }

    #[test]
    fn test_root_identity_rejected() {
        let mut contract = BuildContract::service_default();
        contract.identity.uid = 0;
        contract.identity.user = "root".to_string();
        let v = violations(&contract);
        assert!(v.iter().any(|m| m.contains("uid/gid")));
        assert!(v.iter().any(|m| m.contains("root")));
        assert!(render_dockerfile(&contract).is_err());
    }

    #[test]
    fn test_exposed_port_matches_entry() {
        let contract = BuildContract::service_default();
        let dockerfile = render_dockerfile(&contract).unwrap();
        assert!(dockerfile.contains("EXPOSE 8080\n"));
        assert!(dockerfile.contains("\"--port\",\"8080\""));
        assert!(dockerfile.contains("\"--host\",\"0.0.0.0\""));

        let mut mismatched = contract.clone();
        mismatched.port = 9090;
        let v = violations(&mismatched);
        assert_eq!(v.len(), 1);
        assert!(v[0].contains("binds port 8080 but image exposes 9090"));

        let mut loopback = contract;
        loopback.entry[3] = "127.0.0.1".to_string();
        assert!(violations(&loopback)[0].contains("127.0.0.1"));
    }

    #[test]
    fn test_missing_transcoder_rejected() {
        let mut contract = BuildContract::python_service(PackageManager::Pip, false);
        contract.os_packages.retain(|p| p != "ffmpeg");
        let v = violations(&contract);
        assert!(v.iter().any(|m| m.contains("ffmpeg")));
    }

    #[test]
    fn test_all_violations_reported() {
        let mut contract = BuildContract::python_service(PackageManager::Pip, false);
        contract.base_image.tag = "latest".to_string();
        contract.port = 0;
        contract.ignore.clear();
        contract.copy_paths = vec![".venv".to_string()];
        contract.ignore.push(".venv".to_string());

        let v = violations(&contract);
        assert!(v.iter().any(|m| m.contains("not pinned")));
        assert!(v.iter().any(|m| m.contains("non-zero")));
        assert!(v.iter().any(|m| m.contains("__pycache__")));
        assert!(v.iter().any(|m| m.contains("copied path .venv")));
    }

    #[test]
    fn test_layer_order_python() {
        let dockerfile =
            render_dockerfile(&BuildContract::python_service(PackageManager::Pip, false)).unwrap();
        let lines: Vec<&str> = dockerfile.lines().collect();

        let order = [
            position(&lines, "FROM python:3.11.9-slim"),
            position(&lines, "ENV PYTHONDONTWRITEBYTECODE=1"),
            position(&lines, "WORKDIR /app"),
            position(&lines, "RUN apt-get update"),
            position(&lines, "COPY requirements.txt requirements.lock ./"),
            position(&lines, "RUN pip install"),
            position(&lines, "COPY main.py ./main.py"),
            position(&lines, "RUN groupadd"),
            position(&lines, "USER"),
            position(&lines, "EXPOSE"),
            position(&lines, "CMD"),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{:?}", order);
        assert!(dockerfile.contains("&& rm -rf /var/lib/apt/lists/*"));
        assert!(!dockerfile.contains("gcc"));
    }

    #[test]
    fn test_env_toggles_rendered() {
        let dockerfile = render_dockerfile(&BuildContract::service_default()).unwrap();
        for (key, value) in contract::PYTHON_ENV_TOGGLES {
            assert!(dockerfile.contains(&format!("{}={}", key, value)));
        }
    }

    #[test]
    fn test_locked_installs_fail_closed() {
        let pip =
            render_dockerfile(&BuildContract::python_service(PackageManager::Pip, false)).unwrap();
        let hashed = pip.find("--require-hashes -r requirements.lock").unwrap();
        let cross_check = pip
            .find("&& pip install --no-cache-dir --no-index --no-deps -r requirements.txt")
            .unwrap();
        assert!(hashed < cross_check);

        let poetry =
            render_dockerfile(&BuildContract::python_service(PackageManager::Poetry, false))
                .unwrap();
        let check = poetry.find("poetry check --lock").unwrap();
        let install = poetry.find("poetry install").unwrap();
        assert!(check < install);

        let cargo = render_dockerfile(&BuildContract::service_default()).unwrap();
        assert!(cargo.contains("RUN cargo fetch --locked"));
        assert!(cargo.contains("RUN cargo build --release --locked --offline"));
        assert!(cargo.contains("FROM rust:1.82-slim-bookworm AS builder"));
        assert!(cargo.contains("COPY --from=builder /app/target/release/media-fetch-api"));
    }

    #[test]
    fn test_unlocked_install_resolves_fresh() {
        let contract = BuildContract::python_service(PackageManager::Pip, false).without_lock();
        let dockerfile = render_dockerfile(&contract).unwrap();
        assert!(dockerfile.contains("COPY requirements.txt ./\n"));
        assert!(dockerfile.contains("pip install --no-cache-dir -r requirements.txt"));
        assert!(!dockerfile.contains("requirements.lock"));

        let cargo = BuildContract::service_default().without_lock();
        let dockerfile = render_dockerfile(&cargo).unwrap();
        assert!(dockerfile.contains("RUN cargo fetch\n"));
        assert!(!dockerfile.contains("--locked"));
    }

    #[test]
    fn test_native_toolchain_only_when_needed() {
        let dockerfile =
            render_dockerfile(&BuildContract::python_service(PackageManager::Pip, true)).unwrap();
        assert!(dockerfile.contains("ffmpeg gcc build-essential"));

        let rust = render_dockerfile(&BuildContract::service_default()).unwrap();
        let runtime = runtime_lines(&rust).join("\n");
        assert!(!runtime.contains("cargo"));
        assert!(runtime.contains("yt-dlp=="));
    }

    #[test]
    fn test_write_build_files() {
        let dir = tempdir().unwrap();
        let written = write_build_files(&BuildContract::service_default(), dir.path()).unwrap();
        assert_eq!(written.len(), 2);
        let ignore = fs::read_to_string(dir.path().join(".dockerignore")).unwrap();
        assert!(ignore.lines().any(|l| l == "target"));

        let mut invalid = BuildContract::service_default();
        invalid.os_packages.clear();
        let empty = tempdir().unwrap();
        assert!(write_build_files(&invalid, empty.path()).is_err());
        assert!(!empty.path().join("Dockerfile").exists());
    }

    #[test]
    fn test_lock_detected_from_source_tree() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Cargo.toml"), MANIFEST).unwrap();

        let unlocked = BuildContract::service_default().with_lock_from(dir.path());
        assert!(!unlocked.has_lock_file);
        let dockerfile = render_dockerfile(&unlocked).unwrap();
        assert!(dockerfile.contains("COPY Cargo.toml ./\n"));
        assert!(!dockerfile.contains("Cargo.lock"));

        fs::write(dir.path().join("Cargo.lock"), LOCK).unwrap();
        let locked = BuildContract::service_default().with_lock_from(dir.path());
        assert!(locked.has_lock_file);
        assert!(render_dockerfile(&locked)
            .unwrap()
            .contains("COPY Cargo.toml Cargo.lock ./\n"));
    }

    #[test]
    fn test_checked_in_dockerfile_honours_contract() {
        let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
        let dockerfile = include_str!("../../Dockerfile");
        let runtime = runtime_lines(dockerfile);
        assert!(runtime.contains(&"USER 1001:1001"));
        assert!(runtime.contains(&"EXPOSE 8080"));
        assert!(position(&runtime, "USER") < position(&runtime, "CMD"));
        assert!(dockerfile.contains("ffmpeg"));
        assert!(!dockerfile.contains(":latest"));

        // A Dockerfile that copies Cargo.lock cannot build from a tree without one
        if dockerfile.contains("Cargo.lock") {
            assert!(root.join("Cargo.lock").is_file());
        }

        let contract = BuildContract::service_default();
        let unlocked = render_dockerfile(&contract.clone().without_lock()).unwrap();
        let locked = render_dockerfile(&contract).unwrap();
        assert!(dockerfile == unlocked || dockerfile == locked);
    }

    const MANIFEST: &str = r#"
[package]
name = "demo"
version = "0.1.0"

[dependencies]
serde = { version = "1.0", features = ["derive"] }
tokio = "1.35"
local = { path = "../local" }
http02 = { package = "http", version = "0.2" }

[target.'cfg(unix)'.dependencies]
libc = "0.2"
"#;

    const LOCK: &str = r#"
version = 3

[[package]]
name = "demo"
version = "0.1.0"

[[package]]
name = "serde"
version = "1.0.195"

[[package]]
name = "tokio"
version = "1.35.1"

[[package]]
name = "local"
version = "0.0.1"

[[package]]
name = "http"
version = "0.2.11"

[[package]]
name = "http"
version = "1.0.0"

[[package]]
name = "libc"
version = "0.2.152"
"#;

    #[test]
    fn test_cargo_lock_consistent() {
        assert_eq!(verify_cargo(MANIFEST, LOCK).unwrap(), 5);
    }

    #[test]
    fn test_cargo_lock_out_of_range() {
        let lock = LOCK.replace("1.35.1", "1.20.0");
        match verify_cargo(MANIFEST, &lock) {
            Err(BuildError::Lock(mismatches)) => {
                assert_eq!(mismatches.len(), 1);
                assert!(mismatches[0].contains("tokio locked at 1.20.0 does not satisfy 1.35"));
            }
            other => panic!("expected lock mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_cargo_lock_missing_package() {
        let lock = LOCK.replace("name = \"libc\"", "name = \"libc-other\"");
        let err = verify_cargo(MANIFEST, &lock).unwrap_err();
        assert!(err.to_string().contains("libc is declared but not locked"));
    }

    #[test]
    fn test_cargo_bad_manifest() {
        assert!(matches!(
            verify_cargo("[dependencies\n", LOCK),
            Err(BuildError::Parse { .. })
        ));
    }

    #[test]
    fn test_requirements_lock() {
        let manifest = "# service deps\nfastapi>=0.100,<1\nuvicorn[standard]~=0.27.0\nYT_DLP\n";
        let lock = "fastapi==0.110.0\nuvicorn==0.27.1\nyt-dlp==2024.8.6\n";
        assert_eq!(verify_requirements(manifest, lock).unwrap(), 3);

        let stale = "fastapi==1.2.0\nuvicorn==0.27.1\nyt-dlp==2024.8.6\n";
        let err = verify_requirements(manifest, stale).unwrap_err();
        assert!(err.to_string().contains("fastapi locked at 1.2.0"));

        let loose = "fastapi>=0.110\nuvicorn==0.27.1\nyt-dlp==2024.8.6\n";
        let err = verify_requirements(manifest, loose).unwrap_err();
        assert!(err.to_string().contains("not an exact pin"));
    }

    #[test]
    fn test_poetry_lock() {
        let manifest = r#"
[tool.poetry.dependencies]
python = "^3.11"
fastapi = "^0.110"
yt-dlp = { version = ">=2024.3" }
"#;
        let lock = r#"
[[package]]
name = "fastapi"
version = "0.110.3"

[[package]]
name = "yt-dlp"
version = "2024.8.6"
"#;
        assert_eq!(verify_poetry(manifest, lock).unwrap(), 2);

        let old = lock.replace("0.110.3", "0.109.0");
        assert!(matches!(
            verify_poetry(manifest, &old),
            Err(BuildError::Lock(_))
        ));
    }

    #[test]
    fn test_verify_tree() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("requirements.txt"), "yt-dlp>=2024\n").unwrap();
        assert_eq!(
            verify_tree(dir.path(), PackageManager::Pip).unwrap(),
            LockStatus::Unlocked
        );

        fs::write(dir.path().join("requirements.lock"), "yt-dlp==2024.8.6\n").unwrap();
        assert_eq!(
            verify_tree(dir.path(), PackageManager::Pip).unwrap(),
            LockStatus::Locked { checked: 1 }
        );

        fs::write(dir.path().join("requirements.lock"), "yt-dlp==2023.1.1\n").unwrap();
        assert!(verify_tree(dir.path(), PackageManager::Pip).is_err());

        let empty = tempdir().unwrap();
        assert!(matches!(
            verify_tree(empty.path(), PackageManager::Cargo),
            Err(BuildError::Io(_))
        ));
    }

    #[test]
    fn test_repository_lock_matches_manifest() {
        let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"));
        let status = verify_tree(root, PackageManager::Cargo).unwrap();
        if root.join("Cargo.lock").is_file() {
            assert!(matches!(status, LockStatus::Locked { checked } if checked > 0));
        } else {
            assert_eq!(status, LockStatus::Unlocked);
        }
    }
}
