//! Login identifier classification and normalization
//!
//! The auth layer hands us whatever the user typed into the login field.
//! `resolve` turns that into a canonical lookup key: phones are rewritten
//! to the national `+`-prefixed form, emails are lowercased, anything else
//! passes through verbatim. Classification is total — every input yields
//! exactly one kind, and resolution never fails.

use serde::{Deserialize, Serialize};

/// Kind of a classified login identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierKind {
    Email,
    Phone,
    /// Neither phone-shaped nor email-shaped; canonical form is the raw input
    Unknown,
}

impl IdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::Email => "email",
            IdentifierKind::Phone => "phone",
            IdentifierKind::Unknown => "unknown",
        }
    }
}

/// Caller-supplied channel hint ("this came from the phone field")
///
/// When present, the hint overrides shape-based classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelHint {
    Email,
    Phone,
}

/// A resolved identifier: classified kind plus the canonical lookup key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedIdentifier {
    pub kind: IdentifierKind,
    pub canonical: String,
}

/// National dialing parameters for phone normalization
///
/// `country_code` carries no `+` ("228"); `local_len` is the digit count of
/// a bare national number ("71234567" → 8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialingPlan {
    country_code: String,
    local_len: usize,
}

impl DialingPlan {
    pub fn new(country_code: &str, local_len: usize) -> Self {
        Self { country_code: country_code.to_string(), local_len }
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn local_len(&self) -> usize {
        self.local_len
    }
}

impl Default for DialingPlan {
    fn default() -> Self {
        Self::new("228", 8)
    }
}

/// Resolve a raw login identifier into its canonical form
///
/// A channel hint from the caller wins outright. Otherwise the input is
/// phone-shaped if it is 8–15 characters drawn from digits, `+`, `-`,
/// spaces, and parentheses; email-shaped if it contains `@`; anything else
/// is `Unknown` and passed through verbatim (downstream auth failure is the
/// error signal).
pub fn resolve(raw: &str, hint: Option<ChannelHint>, plan: &DialingPlan) -> ResolvedIdentifier {
    let kind = match hint {
        Some(ChannelHint::Phone) => IdentifierKind::Phone,
        Some(ChannelHint::Email) => IdentifierKind::Email,
        None => classify(raw),
    };

    let canonical = match kind {
        IdentifierKind::Phone => normalize_phone(raw, plan),
        IdentifierKind::Email => canonical_email(raw),
        IdentifierKind::Unknown => raw.to_string(),
    };

    ResolvedIdentifier { kind, canonical }
}

/// Classify an identifier by shape alone
pub fn classify(raw: &str) -> IdentifierKind {
    let trimmed = raw.trim();
    if is_phone_shaped(trimmed) {
        IdentifierKind::Phone
    } else if trimmed.contains('@') {
        IdentifierKind::Email
    } else {
        IdentifierKind::Unknown
    }
}

fn is_phone_shaped(s: &str) -> bool {
    let len = s.chars().count();
    (8..=15).contains(&len)
        && s.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'))
}

/// Lowercased, trimmed email form used as the account lookup key
pub fn canonical_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

/// Normalize a phone number to the national `+`-prefixed dialing form
///
/// Rules are applied top-to-bottom; the first match wins:
/// 1. strip everything except digits and `+`
/// 2. a leading international `00` escape becomes `+`
/// 3. already `+<cc>`-prefixed numbers pass through unchanged
/// 4. bare `<cc>`-prefixed numbers gain a `+`
/// 5. numbers of exactly the bare local length gain the full `+<cc>` prefix
/// 6. anything else is returned stripped but otherwise untouched
///
/// Rule 6 can yield a malformed number; that is deliberate best-effort
/// behavior — the credential lookup downstream rejects it.
pub fn normalize_phone(raw: &str, plan: &DialingPlan) -> String {
    let stripped: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect();

    if let Some(rest) = stripped.strip_prefix("00") {
        return format!("+{rest}");
    }

    let prefixed = format!("+{}", plan.country_code());
    if stripped.starts_with(&prefixed) {
        return stripped;
    }

    if stripped.starts_with(plan.country_code()) {
        return format!("+{stripped}");
    }

    if stripped.chars().count() == plan.local_len() {
        return format!("{prefixed}{stripped}");
    }

    stripped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> DialingPlan {
        DialingPlan::default()
    }

    #[test]
    fn test_classify_phone_shapes() {
        assert_eq!(classify("71234567"), IdentifierKind::Phone);
        assert_eq!(classify("+228 71 23 45 67"), IdentifierKind::Phone);
        assert_eq!(classify("(228) 712-3456"), IdentifierKind::Phone);
    }

    #[test]
    fn test_classify_email_shapes() {
        assert_eq!(classify("rider@example.com"), IdentifierKind::Email);
        // An @ disqualifies phone classification even with digits around it
        assert_eq!(classify("12345@67"), IdentifierKind::Email);
    }

    #[test]
    fn test_classify_fallback_is_unknown() {
        assert_eq!(classify("not a login"), IdentifierKind::Unknown);
        assert_eq!(classify("1234"), IdentifierKind::Unknown); // too short for phone
        assert_eq!(classify(""), IdentifierKind::Unknown);
    }

    #[test]
    fn test_hint_overrides_classification() {
        // Shape says Unknown (too short), hint says phone
        let resolved = resolve("1234", Some(ChannelHint::Phone), &plan());
        assert_eq!(resolved.kind, IdentifierKind::Phone);

        let resolved = resolve("71234567", Some(ChannelHint::Email), &plan());
        assert_eq!(resolved.kind, IdentifierKind::Email);
        assert_eq!(resolved.canonical, "71234567");
    }

    #[test]
    fn test_normalize_all_national_forms_agree() {
        // The three spellings of the same subscriber number
        assert_eq!(normalize_phone("+22871234567", &plan()), "+22871234567");
        assert_eq!(normalize_phone("22871234567", &plan()), "+22871234567");
        assert_eq!(normalize_phone("71234567", &plan()), "+22871234567");
    }

    #[test]
    fn test_normalize_international_escape() {
        assert_eq!(normalize_phone("0022871234567", &plan()), "+22871234567");
    }

    #[test]
    fn test_normalize_strips_formatting() {
        assert_eq!(normalize_phone("+228 71-23-45-67", &plan()), "+22871234567");
        assert_eq!(normalize_phone("(71) 23 45 67", &plan()), "+22871234567");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = ["+22871234567", "22871234567", "71234567", "0022871234567", "91 23 45 67"];
        for input in inputs {
            let once = normalize_phone(input, &plan());
            let twice = normalize_phone(&once, &plan());
            assert_eq!(once, twice, "normalization not idempotent for {input}");
        }
    }

    #[test]
    fn test_normalize_passthrough_when_no_rule_matches() {
        // Wrong length, no country code: best-effort stripped output
        assert_eq!(normalize_phone("12 34 56", &plan()), "123456");
        assert_eq!(normalize_phone("987654321012", &plan()), "987654321012");
    }

    #[test]
    fn test_canonical_email() {
        assert_eq!(canonical_email("  Rider@Example.COM  "), "rider@example.com");
    }

    #[test]
    fn test_resolve_phone_end_to_end() {
        let resolved = resolve("228 71 23 45 67", None, &plan());
        assert_eq!(resolved.kind, IdentifierKind::Phone);
        assert_eq!(resolved.canonical, "+22871234567");
    }

    #[test]
    fn test_resolve_unknown_is_verbatim() {
        let resolved = resolve("scanner badge 42", None, &plan());
        assert_eq!(resolved.kind, IdentifierKind::Unknown);
        assert_eq!(resolved.canonical, "scanner badge 42");
    }
}
