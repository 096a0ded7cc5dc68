//! Static validation of generated tool source
//!
//! Runs before a generated tool can be proposed for approval. Rejects
//! sources that:
//! - use shell execution, dynamic evaluation or dynamic module loading (any tier)
//! - touch the network or the filesystem while declaring SAFE
//! - lack the `@tool` decorator or a function definition
//! - fail to parse, or call functions outside the builtin whitelist
//!
//! A missing `return` statement is only a warning.

use once_cell::sync::Lazy;
use regex::Regex;

use super::script::{ScriptProgram, BUILTINS, DECORATOR};
use super::types::ToolProposal;
use crate::audit::{log_audit_event, AuditCategory, AuditSeverity};
use crate::tools::RiskTier;

struct Rule {
    label: &'static str,
    pattern: Regex,
}

fn rules(specs: &[(&'static str, &str)]) -> Vec<Rule> {
    specs
        .iter()
        .filter_map(|(label, pattern)| {
            Regex::new(pattern).ok().map(|pattern| Rule {
                label: *label,
                pattern,
            })
        })
        .collect()
}

/// Constructs rejected at every risk tier.
static FORBIDDEN: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (
            "shell command execution",
            r"\b(shell|exec|system|spawn|popen|subprocess)\s*\(",
        ),
        ("shell command execution", r"Command::new"),
        ("dynamic code evaluation", r"\b(eval|compile)\s*\("),
        (
            "dynamic module loading",
            r"\b(import|require|load_module|__import__)\s*\(",
        ),
    ])
});

/// Network access; requires CRITICAL.
static NETWORK: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (
            "network access",
            r"\b(http_get|http_post|fetch|connect|socket|request)\s*\(",
        ),
        ("network access", r"https?://"),
    ])
});

/// Filesystem access; requires CRITICAL.
static FILESYSTEM: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (
            "file system access",
            r"\b(open|read_file|write_file|remove_file|delete_file)\s*\(",
        ),
        ("file system access", r"\bfs(::|\.)"),
    ])
});

static FN_DEFINITION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?m)^\s*fn\s+[A-Za-z_][A-Za-z0-9_]*\s*\(").ok());

/// Outcome of validating one source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Blocking problems; any issue rejects the tool
    pub issues: Vec<String>,
    /// Non-blocking observations
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// `true` when no issues were found.
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues as a bulleted list, for feedback to the model.
    pub fn issue_list(&self) -> String {
        self.issues
            .iter()
            .map(|i| format!("- {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn first_match<'a>(rules: &'a [Rule], source: &str) -> Option<(&'a Rule, String)> {
    rules.iter().find_map(|rule| {
        rule.pattern
            .find(source)
            .map(|m| (rule, m.as_str().trim().to_string()))
    })
}

/// Validate tool source against its declared risk tier.
pub fn validate_source(source: &str, tier: RiskTier) -> ValidationReport {
    let mut report = ValidationReport::default();

    for rule in FORBIDDEN.iter() {
        if let Some(m) = rule.pattern.find(source) {
            report.issues.push(format!(
                "Forbidden construct: {} (`{}`)",
                rule.label,
                m.as_str().trim()
            ));
        }
    }

    if tier == RiskTier::Safe {
        for rules in [&*NETWORK, &*FILESYSTEM] {
            if let Some((rule, found)) = first_match(rules, source) {
                report.issues.push(format!(
                    "Declared SAFE but performs {} (`{}`); such tools must be CRITICAL",
                    rule.label, found
                ));
            }
        }
    }

    if !source.contains(DECORATOR) {
        report
            .issues
            .push(format!("Missing `{}` decorator", DECORATOR));
    }
    let has_fn = FN_DEFINITION
        .as_ref()
        .map(|re| re.is_match(source))
        .unwrap_or(false);
    if !has_fn {
        report.issues.push("Missing function definition".to_string());
    }

    match ScriptProgram::parse(source) {
        Ok(program) => {
            let unknown = program.unknown_functions();
            if !unknown.is_empty() {
                report.issues.push(format!(
                    "Calls unavailable function(s): {}. Available: {}",
                    unknown.join(", "),
                    BUILTINS.join(", ")
                ));
            }
            if !program.has_return() {
                report
                    .warnings
                    .push("Function has no return statement".to_string());
            }
        }
        Err(e) => report.issues.push(format!("Syntax error: {}", e)),
    }

    report
}

/// Validate a full proposal: source rules plus signature consistency.
pub fn validate_proposal(proposal: &ToolProposal) -> ValidationReport {
    let mut report = validate_source(&proposal.source, proposal.risk_tier);

    if let Ok(program) = ScriptProgram::parse(&proposal.source) {
        if program.name != proposal.name {
            report.issues.push(format!(
                "Function name `{}` does not match tool name `{}`",
                program.name, proposal.name
            ));
        }
        let declared: Vec<(&str, _)> = proposal
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.ty))
            .collect();
        let actual: Vec<(&str, _)> = program
            .params
            .iter()
            .map(|p| (p.name.as_str(), p.ty))
            .collect();
        if declared != actual {
            report
                .issues
                .push("Function signature does not match declared parameters".to_string());
        }
    }

    if report.is_valid() {
        log_audit_event(
            AuditCategory::ToolValidation,
            AuditSeverity::Info,
            "validation_passed",
            &format!("{} ({})", proposal.name, proposal.risk_tier),
            false,
        );
    } else {
        log_audit_event(
            AuditCategory::ToolValidation,
            AuditSeverity::Warning,
            "validation_failed",
            &format!("{}: {}", proposal.name, report.issues.join("; ")),
            true,
        );
    }
    report
}
