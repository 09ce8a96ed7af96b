//! Helm CLI driver.
//!
//! Each call spawns the helm binary with `kill_on_drop`, so a caller that
//! abandons the future (deadline expiry) also terminates the child process.

use std::process::Stdio;

use tokio::process::Command;

use super::{ChartRelease, ClusterError, UninstallOutcome};

/// Thin async wrapper around the `helm` executable.
#[derive(Debug, Clone)]
pub struct HelmCli {
    bin: String,
}

struct HelmOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl HelmCli {
    pub fn new<S: Into<String>>(bin: S) -> Self {
        Self { bin: bin.into() }
    }

    pub async fn upgrade_install(&self, release: &ChartRelease) -> Result<(), ClusterError> {
        let output = self.run(upgrade_install_args(release)).await?;
        if output.success {
            tracing::debug!(
                release = %release.release_name,
                namespace = %release.namespace,
                "helm upgrade --install completed"
            );
            return Ok(());
        }
        Err(classify_failure(&output))
    }

    pub async fn uninstall(
        &self,
        release_name: &str,
        namespace: &str,
    ) -> Result<UninstallOutcome, ClusterError> {
        let output = self
            .run(vec![
                "uninstall".to_string(),
                release_name.to_string(),
                "--namespace".to_string(),
                namespace.to_string(),
            ])
            .await?;

        if output.success {
            return Ok(UninstallOutcome::Removed);
        }

        match classify_failure(&output) {
            ClusterError::NotFound(_) => Ok(UninstallOutcome::AlreadyAbsent),
            other => Err(other),
        }
    }

    pub async fn status(&self, release_name: &str, namespace: &str) -> Result<bool, ClusterError> {
        let output = self
            .run(vec![
                "status".to_string(),
                release_name.to_string(),
                "--namespace".to_string(),
                namespace.to_string(),
            ])
            .await?;

        if output.success {
            return Ok(true);
        }

        match classify_failure(&output) {
            ClusterError::NotFound(_) => Ok(false),
            other => Err(other),
        }
    }

    async fn run(&self, args: Vec<String>) -> Result<HelmOutput, ClusterError> {
        let output = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ClusterError::unknown(format!("failed to run {}: {e}", self.bin)))?;

        Ok(HelmOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Arguments for `helm upgrade --install`.
pub fn upgrade_install_args(release: &ChartRelease) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.release_name.clone(),
        release.chart.to_string_lossy().into_owned(),
        "--namespace".to_string(),
        release.namespace.clone(),
    ];

    for (key, value) in &release.values {
        args.push("--set".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push("--wait".to_string());
    args.push("--timeout".to_string());
    args.push(format!("{}s", release.timeout.as_secs()));
    args
}

fn classify_failure(output: &HelmOutput) -> ClusterError {
    let stderr = output.stderr.trim();
    let detail = if stderr.is_empty() {
        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            match output.code {
                Some(code) => format!("helm exited with status {code}"),
                None => "helm terminated by signal".to_string(),
            }
        } else {
            stdout.to_string()
        }
    } else {
        stderr.to_string()
    };

    classify_message(detail)
}

fn classify_message(detail: String) -> ClusterError {
    let lowered = detail.to_ascii_lowercase();

    if lowered.contains("timed out waiting for the condition")
        || lowered.contains("context deadline exceeded")
    {
        ClusterError::Timeout(detail)
    } else if lowered.contains("release: not found") {
        ClusterError::NotFound(detail)
    } else {
        ClusterError::Unknown(detail)
    }
}
