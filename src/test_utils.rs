//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and other test helpers.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Sets up a test-friendly logger once per test run. Respects `RUST_LOG`
    /// and writes through the test writer so output stays attached to the
    /// test that produced it.
    ///
    /// # Usage
    ///
    /// ```rust,ignore
    /// #[cfg(test)]
    /// mod tests {
    ///     #[cfg(feature = "test-logging")]
    ///     crate::setup_test_logging!();
    /// }
    /// ```
    ///
    /// ```bash
    /// RUST_LOG=testhost_session::session=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info,mio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // Ignore errors if already initialized by another test
        });
    }
}

/// Install test logging for every test in the enclosing module
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

#[cfg(all(test, feature = "test-logging"))]
crate::setup_test_logging!();

/// Build tool path for integration tests
///
/// Checks the DOTNET_PATH environment variable and falls back to "dotnet".
#[cfg(all(test, feature = "dotnet-integration-tests"))]
pub fn get_test_dotnet_path() -> String {
    std::env::var("DOTNET_PATH").unwrap_or_else(|_| "dotnet".to_string())
}

/// A restored xunit project with one passing test, `Calc.Tests.CalcTests.Adds`
#[cfg(all(test, feature = "dotnet-integration-tests"))]
pub async fn dotnet_test_project() -> tempfile::TempDir {
    const PROJECT: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFramework>net8.0</TargetFramework>
    <IsPackable>false</IsPackable>
  </PropertyGroup>
  <ItemGroup>
    <PackageReference Include="Microsoft.NET.Test.Sdk" Version="17.8.0" />
    <PackageReference Include="xunit" Version="2.6.2" />
    <PackageReference Include="xunit.runner.visualstudio" Version="2.5.4" />
  </ItemGroup>
</Project>
"#;
    const TESTS: &str = r#"namespace Calc.Tests;

public class CalcTests
{
    [Xunit.Fact]
    public void Adds() => Xunit.Assert.Equal(4, 2 + 2);
}
"#;

    let project = tempfile::TempDir::new().unwrap();
    std::fs::write(project.path().join("Calc.Tests.csproj"), PROJECT).unwrap();
    std::fs::write(project.path().join("CalcTests.cs"), TESTS).unwrap();

    // Builds run with --no-restore on modern SDKs
    let status = tokio::process::Command::new(get_test_dotnet_path())
        .arg("restore")
        .current_dir(project.path())
        .status()
        .await
        .unwrap();
    assert!(status.success(), "dotnet restore failed");

    project
}
