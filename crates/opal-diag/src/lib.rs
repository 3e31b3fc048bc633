//! Error reporting and diagnostics for Opal.
//!
//! This crate provides structured diagnostics with source location tracking.
//! Diagnostics are created by other crates (primarily `opal-infer`) and
//! rendered here for display. The key invariant: no inference variables in
//! user-facing output — by the time a diagnostic is built, types have either
//! been fully solved or the message does not mention them.

use std::fmt;

// ---------------------------------------------------------------------------
// Diagnostic severity and categories
// ---------------------------------------------------------------------------

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Broad category for diagnostics. Used for filtering and grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// A referenced name has no declaration in scope.
    UnresolvedName,
    /// The constraint solver found no assignment satisfying every constraint.
    NoSolution,
    /// A node kind that must not appear during constraint generation.
    InvalidNodeDuringGeneration,
    /// A node kind that must not appear during solution application.
    InvalidNodeDuringApply,
    /// The apply phase found no conversion path despite a successful solve.
    UnconsideredCoercion,
    /// Closure bodies with more than one statement are not yet typed.
    UnsupportedClosureBody,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::UnresolvedName,
        Category::NoSolution,
        Category::InvalidNodeDuringGeneration,
        Category::InvalidNodeDuringApply,
        Category::UnconsideredCoercion,
        Category::UnsupportedClosureBody,
    ];

    pub fn all() -> &'static [Category] {
        &Self::ALL
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::UnresolvedName => "unresolved_name",
            Category::NoSolution => "no_solution",
            Category::InvalidNodeDuringGeneration => "invalid_node_during_generation",
            Category::InvalidNodeDuringApply => "invalid_node_during_apply",
            Category::UnconsideredCoercion => "unconsidered_coercion",
            Category::UnsupportedClosureBody => "unsupported_closure_body",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::UnresolvedName => "E0001",
            Category::NoSolution => "E0002",
            Category::InvalidNodeDuringGeneration => "E0003",
            Category::InvalidNodeDuringApply => "E0004",
            Category::UnconsideredCoercion => "E0005",
            Category::UnsupportedClosureBody => "E0006",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Category::UnresolvedName => "A referenced variable or function is not declared.",
            Category::NoSolution => {
                "No assignment of concrete types satisfies every type constraint."
            }
            Category::InvalidNodeDuringGeneration => {
                "An AST node of this kind must not survive into constraint generation."
            }
            Category::InvalidNodeDuringApply => {
                "An AST node of this kind must not be visited while applying a solution."
            }
            Category::UnconsideredCoercion => {
                "The solver accepted a conversion the apply phase cannot rewrite."
            }
            Category::UnsupportedClosureBody => {
                "Closure bodies must consist of a single trailing expression."
            }
        }
    }

    pub fn example_fix(self) -> &'static str {
        match self {
            Category::UnresolvedName => "Declare the name before use or fix the spelling.",
            Category::NoSolution => {
                "Adjust annotations or arguments so the types line up, \
                 or remove a conflicting overload."
            }
            Category::InvalidNodeDuringGeneration => {
                "Run pre-check before generating constraints."
            }
            Category::InvalidNodeDuringApply => {
                "Apply solutions only to expression statements and variable declarations."
            }
            Category::UnconsideredCoercion => {
                "This is a checker bug; report it with the offending program."
            }
            Category::UnsupportedClosureBody => {
                "Rewrite the closure so its body is one expression."
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Source locations (independent of opal-ast's Span)
// ---------------------------------------------------------------------------

/// A source location for diagnostics.
///
/// Uses byte offsets. Callers convert from `opal-ast` spans to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Stable diagnostic code (e.g. E0002).
    pub code: Option<String>,
    pub severity: Severity,
    pub category: Category,
    /// Primary message: what went wrong.
    pub message: String,
    /// Where it went wrong.
    pub location: Option<SourceLocation>,
    /// Suggested fix, if any.
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(category: Category, message: impl Into<String>) -> Self {
        Self {
            code: Some(category.code().to_string()),
            severity: Severity::Error,
            category,
            message: message.into(),
            location: None,
            help: None,
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        if let Some(code) = &self.code {
            write!(f, "{prefix}[{code}]: {}", self.message)?;
        } else {
            write!(f, "{prefix}: {}", self.message)?;
        }
        if let Some(help) = &self.help {
            write!(f, "\n  help: {help}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error type for crates that produce diagnostics
// ---------------------------------------------------------------------------

/// Error type wrapping one or more diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", .0.first().map(|d| d.to_string()).unwrap_or_default())]
pub struct DiagnosticError(pub Vec<Diagnostic>);

impl DiagnosticError {
    pub fn single(diag: Diagnostic) -> Self {
        Self(vec![diag])
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_builder() {
        let loc = SourceLocation {
            file_id: 0,
            start: 4,
            end: 7,
        };
        let diag = Diagnostic::error(Category::UnresolvedName, "failed to resolve: foo")
            .at(loc)
            .with_help("Declare `foo` before use");

        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.code.as_deref(), Some("E0001"));
        assert_eq!(diag.category, Category::UnresolvedName);
        assert!(diag.message.contains("foo"));
    }

    #[test]
    fn diagnostic_display() {
        let diag = Diagnostic::error(Category::NoSolution, "no solution");
        assert_eq!(format!("{diag}"), "error[E0002]: no solution");
    }

    #[test]
    fn category_metadata_is_stable_and_unique() {
        let mut codes = std::collections::BTreeSet::new();
        for cat in Category::all() {
            assert!(!cat.as_str().is_empty());
            assert!(!cat.description().is_empty());
            assert!(!cat.example_fix().is_empty());
            assert!(
                codes.insert(cat.code()),
                "duplicate diagnostic code detected: {}",
                cat.code()
            );
        }
    }
}
