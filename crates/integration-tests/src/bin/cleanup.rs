//! Cleanup utility for integration test resources
//!
//! Destroys and undefines every domain whose name carries the integration
//! test prefix on the test connection.

use std::process::Command;

use integration_tests::{test_uri, TEST_DOMAIN_PREFIX};

fn virsh(uri: &str, args: &[&str]) -> std::io::Result<std::process::Output> {
    Command::new("virsh").arg("-c").arg(uri).args(args).output()
}

fn cleanup_test_domains() -> Result<(), Box<dyn std::error::Error>> {
    let uri = test_uri();
    println!("Cleaning up integration test domains on {uri}...");

    let output = virsh(&uri, &["list", "--all", "--name"])?;
    if !output.status.success() {
        eprintln!("Warning: Failed to list domains");
        return Ok(());
    }

    let names = String::from_utf8_lossy(&output.stdout);
    let domains: Vec<&str> = names
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with(TEST_DOMAIN_PREFIX))
        .collect();

    if domains.is_empty() {
        println!("No integration test domains found to clean up");
        return Ok(());
    }

    for domain in domains {
        // Fails harmlessly for domains that are not running
        let _ = virsh(&uri, &["destroy", domain])?;
        let undefine = virsh(&uri, &["undefine", domain])?;
        if undefine.status.success() {
            println!("Removed {domain}");
        } else {
            eprintln!(
                "Warning: Failed to undefine {domain}: {}",
                String::from_utf8_lossy(&undefine.stderr).trim()
            );
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = cleanup_test_domains() {
        eprintln!("Error during cleanup: {e}");
        std::process::exit(1);
    }
}
