//! Parsers that turn the raw output of a test or lint tool into a
//! [`NormalizedTestResult`].

use std::{fmt, str::FromStr, time::Duration};

use crate::core::{
    domain::{CapturedOutput, NormalizedTestResult},
    errors::SetupError,
};

pub mod bounded;
pub mod cargo_test;
pub mod junit;
pub mod py_lint;
pub mod py_unit;

/// Closed set of supported frameworks, selected by configuration key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TestingFramework {
    JUnit,
    PyUnit,
    PyLint,
    CargoTest,
}

impl TestingFramework {
    pub fn all() -> &'static [TestingFramework] {
        &[
            TestingFramework::JUnit,
            TestingFramework::PyUnit,
            TestingFramework::PyLint,
            TestingFramework::CargoTest,
        ]
    }

    pub fn framework_name(&self) -> &'static str {
        match self {
            TestingFramework::JUnit => "JUnit 4",
            TestingFramework::PyUnit => "PyUnit",
            TestingFramework::PyLint => "PyLint",
            TestingFramework::CargoTest => "CargoTest",
        }
    }

    pub fn adapter_key(&self) -> &'static str {
        match self {
            TestingFramework::JUnit => "JunitAdapter",
            TestingFramework::PyUnit => "PyUnitAdapter",
            TestingFramework::PyLint => "PyLintAdapter",
            TestingFramework::CargoTest => "CargoTestAdapter",
        }
    }

    /// Accepts either the display name or the adapter key.
    pub fn from_name(name: &str) -> Result<Self, SetupError> {
        let name = name.trim();
        Self::all()
            .iter()
            .copied()
            .find(|f| f.framework_name() == name || f.adapter_key() == name)
            .ok_or_else(|| SetupError::UnsupportedFramework {
                name: name.to_string(),
            })
    }

    /// Linter results carry a rating and itemized diagnostics.
    pub fn is_linter(&self) -> bool {
        matches!(self, TestingFramework::PyLint)
    }

    pub fn parse_output(&self, output: &CapturedOutput, budget: Duration) -> NormalizedTestResult {
        let result = match self {
            TestingFramework::JUnit => junit::parse_output(output, budget),
            TestingFramework::PyUnit => py_unit::parse_output(output, budget),
            TestingFramework::PyLint => py_lint::parse_output(output, budget),
            TestingFramework::CargoTest => cargo_test::parse_output(output),
        };
        tracing::debug!("{} result: {:?}", self, result);
        result
    }
}

impl fmt::Display for TestingFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.framework_name())
    }
}

impl FromStr for TestingFramework {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}
