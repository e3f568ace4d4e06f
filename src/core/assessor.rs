use std::{collections::HashMap, sync::Arc, sync::LazyLock, time::Duration};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{MAX_SCORE, MONITORING_TARGET, REGEX_BUDGET},
    core::{
        adapters::{TestingFramework, bounded::run_bounded, py_lint},
        domain::{CapturedOutput, LinterDiagnostic, NormalizedTestResult},
        errors::TranslationDegraded,
    },
};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"%\{(\w+)\}").unwrap());

/// Score in `[0, MAX_SCORE]`. A rating, when present, wins over counts.
pub fn calculate_score(result: &NormalizedTestResult) -> f64 {
    if result.count == 0 {
        return 0.0;
    }

    let fraction = match result.rating {
        Some(rating) => rating.fraction(),
        None => {
            let count = f64::from(result.count);
            ((count - f64::from(result.failed)) / count).clamp(0.0, 1.0)
        }
    };
    fraction * MAX_SCORE
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Assessment {
    #[serde(flatten)]
    pub result: NormalizedTestResult,
    pub score: f64,
}

impl Assessment {
    pub fn passed(&self) -> bool {
        self.result.passed == self.result.count && self.score > 0.0
    }
}

/// Human-readable replacements for linter diagnostics, keyed like
/// `convention.severity_name`, `convention.invalid-name.name`,
/// `convention.invalid-name.regex`, `convention.invalid-name.replacement`
/// and `convention.invalid-name.<capture>.<value>`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinterCatalog {
    translations: HashMap<String, String>,
}

impl LinterCatalog {
    pub fn new(translations: HashMap<String, String>) -> Self {
        Self { translations }
    }

    pub fn is_empty(&self) -> bool {
        self.translations.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<&str> {
        let value = self.translations.get(key).map(String::as_str);
        if value.is_none() {
            tracing::warn!(target: MONITORING_TARGET, key, "Missing linter translation");
        }
        value
    }

    fn lookup_or(&self, key: &str, default: &str) -> String {
        self.lookup(key).unwrap_or(default).to_string()
    }

    /// Translates one diagnostic. Missing entries keep their original text;
    /// a rewrite that cannot be applied is reported as degraded.
    pub fn translate(&self, diagnostic: &LinterDiagnostic) -> Result<LinterDiagnostic, TranslationDegraded> {
        let prefix = format!("{}.{}", diagnostic.severity, diagnostic.name);

        let mut translated = diagnostic.clone();
        translated.severity = self.lookup_or(&format!("{}.severity_name", diagnostic.severity), &diagnostic.severity);
        translated.name = self.lookup_or(&format!("{}.name", prefix), &diagnostic.name);

        let Some(replacement) = self.translations.get(&format!("{}.replacement", prefix)) else {
            return Ok(translated);
        };

        let mut values = HashMap::new();
        if let Some(pattern) = self.translations.get(&format!("{}.regex", prefix)) {
            let key = format!("{}.regex", prefix);
            let regex = Regex::new(pattern.trim()).map_err(|e| TranslationDegraded::InvalidPattern {
                key: key.clone(),
                msg: e.to_string(),
            })?;
            let caps = regex
                .captures(&diagnostic.result)
                .ok_or(TranslationDegraded::NoMatch { key })?;

            for name in regex.capture_names().flatten() {
                let value = caps.name(name).map_or("", |m| m.as_str());
                let value = self.lookup_or(&format!("{}.{}.{}", prefix, name, value), value);
                values.insert(name.to_string(), value);
            }
        }

        translated.result = interpolate(replacement, &values).map_err(|capture| TranslationDegraded::MissingCapture {
            key: format!("{}.replacement", prefix),
            capture,
        })?;
        Ok(translated)
    }
}

/// Substitutes `%{name}` placeholders. Returns the first unknown name.
fn interpolate(template: &str, values: &HashMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = values.get(name.as_str()).ok_or_else(|| name.as_str().to_string())?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Turns a test result into a score for one framework.
#[derive(Clone, Debug)]
pub struct Assessor {
    framework: TestingFramework,
    catalog: Arc<LinterCatalog>,
    budget: Duration,
}

impl Assessor {
    pub fn new(framework: TestingFramework, catalog: Arc<LinterCatalog>) -> Self {
        Self {
            framework,
            catalog,
            budget: REGEX_BUDGET,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn framework(&self) -> TestingFramework {
        self.framework
    }

    #[tracing::instrument(skip_all, fields(framework = %self.framework))]
    pub fn assess(&self, output: &CapturedOutput) -> Assessment {
        let result = self.framework.parse_output(output, self.budget);
        let score = calculate_score(&result);

        let result = if self.framework.is_linter() {
            self.translate_linter(result)
        } else {
            result
        };

        let assessment = Assessment { result, score };
        tracing::debug!("Assessment: {:?}", assessment);
        assessment
    }

    /// Best effort: diagnostics that cannot be translated stay as they are,
    /// and the whole pass is skipped if it exceeds the time budget.
    pub fn translate_linter(&self, mut result: NormalizedTestResult) -> NormalizedTestResult {
        let Some(diagnostics) = result.detailed_diagnostics.clone().filter(|d| !d.is_empty()) else {
            return result;
        };

        let catalog = self.catalog.clone();
        let translated = run_bounded("linter_translation", self.budget, move || {
            diagnostics
                .into_iter()
                .map(|diagnostic| match catalog.translate(&diagnostic) {
                    Ok(translated) => translated,
                    Err(e) => {
                        tracing::warn!(target: MONITORING_TARGET, code = %diagnostic.code, "Translation degraded: {}", e);
                        diagnostic
                    }
                })
                .collect::<Vec<_>>()
        });

        if let Some(translated) = translated {
            result.error_messages = py_lint::error_messages(&translated);
            result.detailed_diagnostics = Some(translated);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::Rating;

    fn diagnostic(severity: &str, name: &str, result: &str) -> LinterDiagnostic {
        LinterDiagnostic {
            file_name: "exercise.py".to_string(),
            line: 3,
            severity: severity.to_string(),
            code: "C0103".to_string(),
            name: name.to_string(),
            scope: None,
            result: result.to_string(),
        }
    }

    fn catalog() -> LinterCatalog {
        LinterCatalog::new(
            [
                ("convention.severity_name", "Konvention"),
                ("convention.invalid-name.name", "Ungültiger Name"),
                (
                    "convention.invalid-name.regex",
                    r#" (?P<kind>\w+) name "(?P<value>[^"]+)" doesn't conform to (?P<style>[\w ]+) "#,
                ),
                ("convention.invalid-name.kind.Variable", "Variablenname"),
                (
                    "convention.invalid-name.replacement",
                    "%{kind} \"%{value}\" entspricht nicht dem Stil %{style}",
                ),
                ("warning.severity_name", "Warnung"),
                ("warning.unused-import.replacement", "Unbenutzter Import %{module}"),
                ("error.syntax-error.regex", "(unclosed"),
                ("error.syntax-error.replacement", "Syntaxfehler"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        )
    }

    #[test]
    fn test_score_of_empty_result_is_zero() {
        let result = NormalizedTestResult::from_counts(0, 3, vec![]);

        assert_eq!(calculate_score(&result), 0.0);
    }

    #[test]
    fn test_score_from_counts() {
        assert_eq!(calculate_score(&NormalizedTestResult::from_counts(4, 1, vec![])), 0.75);
        assert_eq!(calculate_score(&NormalizedTestResult::from_counts(2, 5, vec![])), 0.0);
        assert_eq!(calculate_score(&NormalizedTestResult::all_passed(3)), MAX_SCORE);
    }

    #[test]
    fn test_score_uses_exact_rating() {
        let result = NormalizedTestResult {
            count: 10,
            passed: 7,
            failed: 2,
            rating: Some(Rating { achieved: 7.5, maximum: 10.0 }),
            ..Default::default()
        };

        assert_eq!(calculate_score(&result), 0.75);
    }

    #[test]
    fn test_passed_requires_full_count_and_positive_score() {
        let passed = Assessment {
            result: NormalizedTestResult::all_passed(2),
            score: 1.0,
        };
        let empty = Assessment {
            result: NormalizedTestResult::all_passed(0),
            score: 0.0,
        };
        let partial = Assessment {
            result: NormalizedTestResult::from_counts(2, 1, vec![]),
            score: 0.5,
        };

        assert!(passed.passed());
        assert!(!empty.passed());
        assert!(!partial.passed());
    }

    #[test]
    fn test_translate_with_rewrite() {
        let original = diagnostic(
            "convention",
            "invalid-name",
            "Variable name \"myVar\" doesn't conform to snake_case naming style",
        );

        let translated = catalog().translate(&original).unwrap();

        assert_eq!(translated.severity, "Konvention");
        assert_eq!(translated.name, "Ungültiger Name");
        assert_eq!(
            translated.result,
            "Variablenname \"myVar\" entspricht nicht dem Stil snake_case naming style"
        );
    }

    #[test]
    fn test_translate_without_entries_keeps_original() {
        let original = diagnostic("refactor", "too-many-branches", "Too many branches (13/12)");

        assert_eq!(catalog().translate(&original).unwrap(), original);
    }

    #[test]
    fn test_translate_degrades_on_bad_rewrite() {
        let missing_capture = diagnostic("warning", "unused-import", "Unused import os");
        let bad_pattern = diagnostic("error", "syntax-error", "invalid syntax");

        assert!(matches!(
            catalog().translate(&missing_capture),
            Err(TranslationDegraded::MissingCapture { ref capture, .. }) if capture == "module"
        ));
        assert!(matches!(
            catalog().translate(&bad_pattern),
            Err(TranslationDegraded::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_assess_linter_translates_and_keeps_failures() {
        let stdout = "exercise.py:1:convention(C0103, invalid-name,) Variable name \"myVar\" doesn't conform to snake_case naming style\n\
            exercise.py:2:warning(W0611, unused-import,) Unused import os\n\
            Your code has been rated at 5.00/10\n";
        let assessor = Assessor::new(TestingFramework::PyLint, Arc::new(catalog()));

        let assessment = assessor.assess(&CapturedOutput::new(stdout, ""));

        assert_eq!(assessment.score, 0.5);
        assert_eq!(
            assessment.result.error_messages,
            vec![
                "Ungültiger Name: Variablenname \"myVar\" entspricht nicht dem Stil snake_case naming style".to_string(),
                "unused-import: Unused import os".to_string(),
            ]
        );
        let diagnostics = assessment.result.detailed_diagnostics.unwrap();
        assert_eq!(diagnostics[1].severity, "warning");
    }

    #[test]
    fn test_assess_test_framework_skips_translation() {
        let assessor = Assessor::new(TestingFramework::JUnit, Arc::new(catalog()));

        let assessment = assessor.assess(&CapturedOutput::new("Tests run: 4,  Failures: 1\n", ""));

        assert_eq!(assessment.score, 0.75);
        assert!(!assessment.passed());
    }
}
