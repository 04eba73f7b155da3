//! Shared library code for integration tests
//!
//! Constants and helpers used by both the test binary and the cleanup
//! helper.

// Unfortunately needed here to work with linkme
#![allow(unsafe_code)]

use linkme::distributed_slice;

/// Prefix of every domain name created by integration tests
pub const TEST_DOMAIN_PREFIX: &str = "nodeadmin-it-";

/// Connection URI used when `NODEADMIN_TEST_URI` is unset
pub const DEFAULT_TEST_URI: &str = "test:///default";

/// A test function that returns a Result
pub type TestFn = fn() -> color_eyre::Result<()>;

/// Metadata for a registered integration test
#[derive(Debug)]
pub struct IntegrationTest {
    /// Name of the integration test
    pub name: &'static str,
    /// Test function to execute
    pub f: TestFn,
}

impl IntegrationTest {
    /// Create a new integration test with the given name and function
    pub const fn new(name: &'static str, f: TestFn) -> Self {
        Self { name, f }
    }
}

/// Distributed slice holding all registered integration tests
#[distributed_slice]
pub static INTEGRATION_TESTS: [IntegrationTest];

/// Register an integration test with less boilerplate.
///
/// # Examples
///
/// ```ignore
/// fn test_list_domains() -> Result<()> {
///     let output = run_nodeadmin(&["list"])?;
///     output.assert_success("list");
///     Ok(())
/// }
/// integration_test!(test_list_domains);
/// ```
#[macro_export]
macro_rules! integration_test {
    ($fn_name:ident) => {
        ::paste::paste! {
            #[distributed_slice($crate::INTEGRATION_TESTS)]
            static [<$fn_name:upper>]: $crate::IntegrationTest =
                $crate::IntegrationTest::new(stringify!($fn_name), $fn_name);
        }
    };
}

/// The hypervisor URI tests run against
pub fn test_uri() -> String {
    std::env::var("NODEADMIN_TEST_URI").unwrap_or_else(|_| DEFAULT_TEST_URI.to_string())
}

/// A fresh domain name carrying [`TEST_DOMAIN_PREFIX`]
pub fn unique_domain_name(label: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{TEST_DOMAIN_PREFIX}{label}-{}", &id[..8])
}
