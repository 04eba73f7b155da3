//! Domain lifecycle and provisioning through the CLI

use color_eyre::eyre::eyre;
use color_eyre::Result;
use linkme::distributed_slice;

use crate::{integration_test, run_nodeadmin, unique_domain_name};

/// Domain every test driver connection starts with, already running
const FIXTURE_DOMAIN: &str = "test";

fn test_list_shows_fixture_domain() -> Result<()> {
    let output = run_nodeadmin(&["list", "--all", "--format", "json"])?;
    output.ensure_success("list --all")?;
    let domains = output.json()?;
    let domains = domains
        .as_array()
        .ok_or_else(|| eyre!("Expected JSON array, got: {}", output.stdout))?;
    let fixture = domains
        .iter()
        .find(|d| d["name"] == FIXTURE_DOMAIN)
        .ok_or_else(|| eyre!("'{FIXTURE_DOMAIN}' missing from {}", output.stdout))?;
    assert_eq!(fixture["state"], "running");
    Ok(())
}
integration_test!(test_list_shows_fixture_domain);

fn test_list_table_output() -> Result<()> {
    let output = run_nodeadmin(&["list"])?;
    output.ensure_success("list")?;
    assert!(output.stdout.contains("NAME"), "{}", output.stdout);
    assert!(output.stdout.contains(FIXTURE_DOMAIN), "{}", output.stdout);
    Ok(())
}
integration_test!(test_list_table_output);

fn test_start_running_domain_refused() -> Result<()> {
    let output = run_nodeadmin(&["start", FIXTURE_DOMAIN])?;
    assert!(!output.success(), "starting a running domain should fail");
    assert!(
        output.stderr.contains("already running"),
        "unexpected error: {}",
        output.stderr
    );
    Ok(())
}
integration_test!(test_start_running_domain_refused);

fn test_destroy_running_domain() -> Result<()> {
    let output = run_nodeadmin(&["destroy", FIXTURE_DOMAIN])?;
    output.ensure_success("destroy")?;
    Ok(())
}
integration_test!(test_destroy_running_domain);

fn test_undefine_running_domain_needs_force() -> Result<()> {
    let output = run_nodeadmin(&["undefine", FIXTURE_DOMAIN])?;
    assert!(!output.success(), "undefine without --force should fail");
    assert!(output.stderr.contains("--force"), "{}", output.stderr);

    let output = run_nodeadmin(&["undefine", "--force", FIXTURE_DOMAIN])?;
    output.ensure_success("undefine --force")?;
    Ok(())
}
integration_test!(test_undefine_running_domain_needs_force);

fn test_unknown_domain() -> Result<()> {
    let name = unique_domain_name("missing");
    let output = run_nodeadmin(&["start", &name])?;
    assert!(!output.success());
    assert!(output.stderr.contains(&name), "{}", output.stderr);
    Ok(())
}
integration_test!(test_unknown_domain);

fn test_create_dry_run_descriptor() -> Result<()> {
    let name = unique_domain_name("dry");
    let output = run_nodeadmin(&[
        "create",
        &name,
        "--install",
        "pxe",
        "--memory",
        "2G",
        "--cpus",
        "2",
        "--no-disk",
        "--virt-type",
        "test (hvm)",
        "--dry-run",
    ])?;
    output.ensure_success("create --dry-run")?;
    let guest = output.json()?;
    assert_eq!(guest["name"], name.as_str());
    assert_eq!(guest["vcpus"], 2);
    assert_eq!(guest["memory_mb"], 2048);
    assert_eq!(guest["hypervisor"], "test");
    Ok(())
}
integration_test!(test_create_dry_run_descriptor);

fn test_create_unsupported_virt_type() -> Result<()> {
    let name = unique_domain_name("badvirt");
    let output = run_nodeadmin(&[
        "create",
        &name,
        "--install",
        "pxe",
        "--no-disk",
        "--virt-type",
        "no-such-hypervisor",
    ])?;
    assert!(!output.success());
    assert!(
        output.stderr.contains("no-such-hypervisor"),
        "{}",
        output.stderr
    );
    Ok(())
}
integration_test!(test_create_unsupported_virt_type);

fn test_create_pxe_domain() -> Result<()> {
    let name = unique_domain_name("pxe");
    let output = run_nodeadmin(&[
        "create",
        &name,
        "--install",
        "pxe",
        "--no-disk",
        "--network",
        "default",
        "--virt-type",
        "test (hvm)",
    ])?;
    output.ensure_success("create --install pxe")?;
    assert!(output.stdout.contains(&name), "{}", output.stdout);
    Ok(())
}
integration_test!(test_create_pxe_domain);

fn test_create_requires_install_locator() -> Result<()> {
    let name = unique_domain_name("nourl");
    let output = run_nodeadmin(&["create", &name, "--install", "network"])?;
    assert!(!output.success(), "network install without --url should fail");
    assert!(output.stderr.contains("--url"), "{}", output.stderr);
    Ok(())
}
integration_test!(test_create_requires_install_locator);
