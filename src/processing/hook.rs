//! Hooks run after an output document is persisted.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// Follow-up action run for each persisted output.
#[async_trait]
pub trait ArtifactHook: Send + Sync {
    /// Called once per written file; failures are logged, never propagated.
    async fn on_persisted(&self, path: &Path);
}

/// Runs an external program with the output path as its last argument.
#[derive(Debug, Clone)]
pub struct CommandHook {
    program: String,
    args: Vec<String>,
}

impl CommandHook {
    /// Parse a whitespace-separated command line; `None` when it is blank.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl ArtifactHook for CommandHook {
    async fn on_persisted(&self, path: &Path) {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .await;
        match output {
            Ok(output) if output.status.success() => {
                tracing::info!(program = %self.program, path = %path.display(), "Graph rendered");
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!(
                    program = %self.program,
                    path = %path.display(),
                    status = %output.status,
                    stderr = %stderr.trim(),
                    "Graph render command failed"
                );
            }
            Err(error) => {
                tracing::warn!(
                    program = %self.program,
                    path = %path.display(),
                    error = %error,
                    "Graph render command could not be started"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_program_and_arguments() {
        let hook = CommandHook::parse("  render-graph --format svg ").unwrap();
        assert_eq!(hook.program, "render-graph");
        assert_eq!(hook.args, vec!["--format", "svg"]);
        assert!(CommandHook::parse("   ").is_none());
    }

    #[tokio::test]
    async fn missing_program_is_not_fatal() {
        let hook = CommandHook::parse("definitely-not-a-real-program-xyz").unwrap();
        hook.on_persisted(Path::new("out.json")).await;
    }
}
