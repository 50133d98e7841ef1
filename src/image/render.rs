//! Dockerfile and `.dockerignore` rendering

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::contract::{BuildContract, Instruction};
use super::BuildError;

const CONTINUATION: &str = " \\\n    ";

fn json_array(items: &[String]) -> String {
    // serde_json escapes quotes and backslashes the way Docker's exec form expects
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn render_run(command: &str) -> String {
    command
        .split(" && ")
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(&format!("{}&& ", CONTINUATION))
}

fn render_instruction(instruction: &Instruction) -> String {
    match instruction {
        Instruction::From { image, alias } => match alias {
            Some(alias) => format!("FROM {} AS {}", image, alias),
            None => format!("FROM {}", image),
        },
        Instruction::Env(pairs) => {
            let pairs: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            format!("ENV {}", pairs.join(CONTINUATION))
        }
        Instruction::Workdir(dir) => format!("WORKDIR {}", dir),
        Instruction::Run(command) => format!("RUN {}", render_run(command)),
        Instruction::Copy {
            from_stage,
            sources,
            destination,
        } => {
            let mut line = String::from("COPY ");
            if let Some(stage) = from_stage {
                let _ = write!(line, "--from={} ", stage);
            }
            let _ = write!(line, "{} {}", sources.join(" "), destination);
            line
        }
        Instruction::User(user) => format!("USER {}", user),
        Instruction::Expose(port) => format!("EXPOSE {}", port),
        Instruction::Cmd(argv) => format!("CMD {}", json_array(argv)),
    }
}

/// Render the Dockerfile for a contract. The contract is validated first, so
/// an invalid contract never produces a Dockerfile. Output is deterministic.
pub fn render_dockerfile(contract: &BuildContract) -> Result<String, BuildError> {
    contract.validate()?;

    let stages: Vec<String> = contract
        .stages()
        .iter()
        .map(|stage| {
            stage
                .instructions
                .iter()
                .map(render_instruction)
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect();

    let mut output = String::from("# syntax=docker/dockerfile:1\n");
    output.push_str(&stages.join("\n\n"));
    output.push('\n');
    Ok(output)
}

/// Render the build-context exclusion list
pub fn render_dockerignore(contract: &BuildContract) -> String {
    let mut output = String::new();
    for pattern in &contract.ignore {
        output.push_str(pattern);
        output.push('\n');
    }
    output
}

/// Validate, render, and write `Dockerfile` and `.dockerignore` into an
/// existing `dir`. Nothing is written when the contract is invalid.
pub fn write_build_files(contract: &BuildContract, dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let dockerfile = render_dockerfile(contract)?;
    let dockerignore = render_dockerignore(contract);

    let dockerfile_path = dir.join("Dockerfile");
    let ignore_path = dir.join(".dockerignore");
    fs::write(&dockerfile_path, dockerfile)?;
    fs::write(&ignore_path, dockerignore)?;

    info!("Wrote build files to {:?}", dir);
    Ok(vec![dockerfile_path, ignore_path])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_run_splits_chains() {
        assert_eq!(render_run("a && b"), "a \\\n    && b");
        assert_eq!(render_run("single"), "single");
    }

    #[test]
    fn test_render_instruction_forms() {
        let copy = Instruction::Copy {
            from_stage: Some("builder".to_string()),
            sources: vec!["/app/bin".to_string()],
            destination: "/usr/local/bin/bin".to_string(),
        };
        assert_eq!(
            render_instruction(&copy),
            "COPY --from=builder /app/bin /usr/local/bin/bin"
        );

        let cmd = Instruction::Cmd(vec!["uvicorn".to_string(), "main:app".to_string()]);
        assert_eq!(render_instruction(&cmd), "CMD [\"uvicorn\",\"main:app\"]");

        let env = Instruction::Env(vec![
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string()),
        ]);
        assert_eq!(render_instruction(&env), "ENV A=1 \\\n    B=2");
    }
}
