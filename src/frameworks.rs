//! Registry of test frameworks the host can run

use serde::Serialize;

/// A test framework the host knows how to drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestFramework {
    /// Registry key, e.g. `"xunit"`
    pub name: &'static str,
    /// Feature name editors use for code lenses of this framework
    pub feature_name: &'static str,
    /// Attribute types marking a test method
    pub test_method_attributes: &'static [&'static str],
}

static FRAMEWORKS: [TestFramework; 3] = [
    TestFramework {
        name: "xunit",
        feature_name: "XunitTestMethod",
        test_method_attributes: &["Xunit.FactAttribute", "Xunit.TheoryAttribute"],
    },
    TestFramework {
        name: "nunit",
        feature_name: "NUnitTestMethod",
        test_method_attributes: &[
            "NUnit.Framework.TestAttribute",
            "NUnit.Framework.TestCaseAttribute",
        ],
    },
    TestFramework {
        name: "mstest",
        feature_name: "MSTestMethod",
        test_method_attributes: &["Microsoft.VisualStudio.TestTools.UnitTesting.TestMethodAttribute"],
    },
];

impl TestFramework {
    /// Look a framework up by its exact registry name
    pub fn lookup(name: &str) -> Option<&'static TestFramework> {
        FRAMEWORKS.iter().find(|framework| framework.name == name)
    }

    pub fn all() -> &'static [TestFramework] {
        &FRAMEWORKS
    }
}
