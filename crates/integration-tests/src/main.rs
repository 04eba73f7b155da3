//! Integration tests for nodeadmin
//!
//! Each test drives the `nodeadmin` binary against a libvirt connection,
//! `test:///default` unless `NODEADMIN_TEST_URI` says otherwise. The test
//! driver keeps its state per virsh process, so every test relies only on
//! the fixtures the driver ships with (the running domain `test`, the
//! `default` network and the `default-pool` pool).

use camino::Utf8Path;
use std::process::Output;

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use libtest_mimic::{Arguments, Trial};
use serde_json::Value;
use xshell::{cmd, Shell};

pub(crate) use integration_tests::{
    integration_test, test_uri, unique_domain_name, IntegrationTest, INTEGRATION_TESTS,
};

mod tests {
    pub mod domains;
    pub mod resources;
}

/// Get the path to the nodeadmin binary, checking NODEADMIN_PATH first
pub(crate) fn get_nodeadmin_command() -> Result<String> {
    if let Ok(path) = std::env::var("NODEADMIN_PATH") {
        return Ok(path);
    }
    // Force the user to set this if we're running from the project dir
    if let Some(path) = ["target/debug/nodeadmin", "target/release/nodeadmin"]
        .into_iter()
        .find(|p| Utf8Path::new(p).exists())
    {
        return Err(eyre!(
            "Detected {path} - set NODEADMIN_PATH={path} to run using this binary"
        ));
    }
    Ok("nodeadmin".to_owned())
}

/// Captured output from a command with decoded stdout/stderr strings
pub(crate) struct CapturedOutput {
    pub output: Output,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    /// Create from a raw Output
    pub fn new(output: Output) -> Self {
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Self {
            output,
            stdout,
            stderr,
        }
    }

    /// Fail with the captured stderr unless the command succeeded
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success() {
            Ok(())
        } else {
            Err(eyre!("{} failed: {}", context, self.stderr))
        }
    }

    /// Check if the command succeeded
    pub fn success(&self) -> bool {
        self.output.status.success()
    }

    /// Parse stdout as JSON
    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.stdout)
            .with_context(|| format!("Failed to parse JSON output: {}", self.stdout))
    }
}

/// Run nodeadmin against the test connection, capturing output
pub(crate) fn run_nodeadmin(args: &[&str]) -> Result<CapturedOutput> {
    let sh = Shell::new()?;
    let bin = get_nodeadmin_command()?;
    let uri = test_uri();
    // Keep a developer's settings file out of the way
    let config = "/dev/null/nodeadmin.toml";
    let output = cmd!(sh, "{bin} --connect {uri} --config {config} {args...}")
        .ignore_status()
        .output()?;
    Ok(CapturedOutput::new(output))
}

/// Whether virsh can reach the test connection at all
fn virsh_available() -> bool {
    std::process::Command::new("virsh")
        .args(["-c", &test_uri(), "uri"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn main() {
    let args = Arguments::from_args();
    let skip = !virsh_available();
    if skip {
        eprintln!("virsh cannot reach {}; ignoring integration tests", test_uri());
    }

    let tests: Vec<Trial> = INTEGRATION_TESTS
        .iter()
        .map(|test| {
            let name = test.name;
            let f = test.f;
            Trial::test(name, move || f().map_err(|e| format!("{:?}", e).into()))
                .with_ignored_flag(skip)
        })
        .collect();

    libtest_mimic::run(&args, tests).exit();
}
