//! Build results returned to clients.

use rkyv::Archive;
use serde::{Deserialize, Serialize};

use crate::engine::{Diagnostic, Severity};

/// Outcome of one build request.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct BuildResult {
    pub succeeded: bool,
    /// `path(line,col): warning CODE: message`
    pub warnings: Vec<String>,
    /// `path(line,col): error CODE: message`
    pub errors: Vec<String>,
}

impl BuildResult {
    /// A successful result without diagnostics (output reuse).
    pub fn success() -> Self {
        Self {
            succeeded: true,
            ..Default::default()
        }
    }

    /// A failed result carrying a single error line.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            warnings: Vec::new(),
            errors: vec![message.into()],
        }
    }

    /// Classify engine diagnostics.
    ///
    /// Warnings go to `warnings` unless escalated; errors and escalated
    /// warnings go to `errors`; everything else is dropped. The result only
    /// succeeds if the engine did and nothing was escalated to an error.
    pub fn from_diagnostics(engine_success: bool, diagnostics: &[Diagnostic]) -> Self {
        let mut result = Self {
            succeeded: engine_success,
            ..Default::default()
        };

        for diagnostic in diagnostics {
            match diagnostic.severity {
                Severity::Warning if !diagnostic.warning_as_error => {
                    result.warnings.push(diagnostic.format("warning"));
                }
                Severity::Error | Severity::Warning => {
                    result.errors.push(diagnostic.format("error"));
                    result.succeeded = false;
                }
                Severity::Info | Severity::Hidden => {}
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SourceLocation;

    fn diag(severity: Severity, code: &str, escalated: bool) -> Diagnostic {
        Diagnostic {
            severity,
            code: code.to_string(),
            message: format!("{code} message"),
            location: Some(SourceLocation::new("Assets/A.cs", 3, 7)),
            warning_as_error: escalated,
        }
    }

    #[test]
    fn test_classification() {
        let diagnostics = vec![
            diag(Severity::Warning, "CS0168", false),
            diag(Severity::Info, "CS8019", false),
            diag(Severity::Hidden, "CS8020", false),
        ];
        let result = BuildResult::from_diagnostics(true, &diagnostics);
        assert!(result.succeeded);
        assert_eq!(
            result.warnings,
            vec!["Assets/A.cs(3,7): warning CS0168: CS0168 message"]
        );
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_escalated_warning_is_error() {
        let diagnostics = vec![diag(Severity::Warning, "CS0618", true)];
        let result = BuildResult::from_diagnostics(true, &diagnostics);
        assert!(!result.succeeded);
        assert!(result.warnings.is_empty());
        assert_eq!(
            result.errors,
            vec!["Assets/A.cs(3,7): error CS0618: CS0618 message"]
        );
    }

    #[test]
    fn test_engine_failure_without_diagnostics() {
        let result = BuildResult::from_diagnostics(false, &[]);
        assert!(!result.succeeded);
    }

    #[test]
    fn test_error_keeps_order() {
        let diagnostics = vec![
            diag(Severity::Error, "CS0001", false),
            diag(Severity::Warning, "CS0002", true),
        ];
        let result = BuildResult::from_diagnostics(false, &diagnostics);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("CS0001"));
        assert!(result.errors[1].contains("CS0002"));
    }
}
