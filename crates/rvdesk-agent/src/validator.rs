use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde::{Serialize, Serializer};

use crate::error::{PatternError, ValidationError};

/// A compiled output pattern.
///
/// Accepts either a bare regular expression (`riscv64`) or a slash-delimited literal with trailing
/// flags (`/riscv64/i`). Supported flags: `i` (case-insensitive), `m` (multi-line), `s` (dot
/// matches newline), `x` (ignore whitespace). `g` and `u` are accepted and have no effect.
#[derive(Clone)]
pub struct Pattern {
    text: String,
    regex: Regex,
}

impl Pattern {
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let (source, flags) = match split_literal(text) {
            Some(parts) => parts,
            None => (text, ""),
        };

        let mut builder = RegexBuilder::new(source);
        for flag in flags.chars() {
            match flag {
                'i' => builder.case_insensitive(true),
                'm' => builder.multi_line(true),
                's' => builder.dot_matches_new_line(true),
                'x' => builder.ignore_whitespace(true),
                'g' | 'u' => &mut builder,
                _ => {
                    return Err(PatternError::UnsupportedFlag {
                        pattern: text.to_string(),
                        flag,
                    })
                }
            };
        }
        let regex = builder.build().map_err(|source| PatternError::Invalid {
            pattern: text.to_string(),
            source,
        })?;

        Ok(Self {
            text: text.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }

    /// Byte offset just past the first match.
    pub fn find_end(&self, haystack: &str) -> Option<usize> {
        self.regex.find(haystack).map(|m| m.end())
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

fn split_literal(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix('/')?;
    let end = rest.rfind('/')?;
    Some((&rest[..end], &rest[end + 1..]))
}

impl FromStr for Pattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.text).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Pattern {}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// A named group of patterns that must all match, e.g. the field layout of `uname -a`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompoundCheck {
    pub name: String,
    pub patterns: Vec<Pattern>,
}

impl CompoundCheck {
    pub fn new(name: impl Into<String>, patterns: Vec<Pattern>) -> Self {
        Self {
            name: name.into(),
            patterns,
        }
    }

    /// `uname -a` on a RISC-V Linux guest: kernel name, dotted release, machine and OS fields.
    pub fn uname() -> Result<Self, PatternError> {
        Ok(Self::new(
            "uname",
            vec![
                Pattern::parse(r"/^Linux\s+\S+\s/m")?,
                Pattern::parse(r"\d+\.\d+(\.\d+)?")?,
                Pattern::parse(r"/\briscv(32|64)\b/i")?,
                Pattern::parse(r"GNU/Linux")?,
            ],
        ))
    }

    pub fn passes(&self, output: &str) -> bool {
        self.patterns.iter().all(|p| p.is_match(output))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub required: Pattern,
    pub primary_pass: bool,
    pub matched_auxiliary: Vec<Pattern>,
    /// `None` when no compound check is configured. Informational only.
    pub compound_pass: Option<bool>,
}

/// Checks `output` against `required`; auxiliary matches are reported but never affect the
/// verdict.
pub fn validate(
    output: &str,
    required: &Pattern,
    auxiliary: &[Pattern],
) -> Result<ValidationReport, ValidationError> {
    if output.trim().is_empty() {
        return Err(ValidationError::NoOutputCaptured);
    }
    Ok(ValidationReport {
        required: required.clone(),
        primary_pass: required.is_match(output),
        matched_auxiliary: auxiliary
            .iter()
            .filter(|p| p.is_match(output))
            .cloned()
            .collect(),
        compound_pass: None,
    })
}

#[derive(Debug, Clone)]
pub struct OutputValidator {
    required: Pattern,
    auxiliary: Vec<Pattern>,
    compound: Option<CompoundCheck>,
}

impl OutputValidator {
    pub fn new(required: Pattern) -> Self {
        Self {
            required,
            auxiliary: Vec::new(),
            compound: None,
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: Vec<Pattern>) -> Self {
        self.auxiliary = auxiliary;
        self
    }

    pub fn with_compound(mut self, compound: CompoundCheck) -> Self {
        self.compound = Some(compound);
        self
    }

    pub fn required(&self) -> &Pattern {
        &self.required
    }

    pub fn validate(&self, output: &str) -> Result<ValidationReport, ValidationError> {
        let mut report = validate(output, &self.required, &self.auxiliary)?;
        report.compound_pass = self.compound.as_ref().map(|c| c.passes(output));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(text: &str) -> Pattern {
        Pattern::parse(text).unwrap()
    }

    #[test]
    fn uname_output_passes_with_auxiliary_matches() {
        let report = validate(
            "Linux alpine 6.6.0-rc1 riscv64 GNU/Linux",
            &p("/riscv64/i"),
            &[p("/linux/i"), p("/alpine/i")],
        )
        .unwrap();
        assert!(report.primary_pass);
        assert_eq!(report.matched_auxiliary, vec![p("/linux/i"), p("/alpine/i")]);
        assert_eq!(report.compound_pass, None);
    }

    #[test]
    fn auxiliary_matches_do_not_rescue_primary_failure() {
        let report = validate("Linux alpine 6.6.0 x86_64", &p("/riscv64/i"), &[p("/linux/i")])
            .unwrap();
        assert!(!report.primary_pass);
        assert_eq!(report.matched_auxiliary, vec![p("/linux/i")]);
    }

    #[test]
    fn empty_output_is_an_error() {
        assert_eq!(
            validate("", &p("x"), &[]),
            Err(ValidationError::NoOutputCaptured)
        );
        assert_eq!(
            validate(" \r\n", &p("x"), &[]),
            Err(ValidationError::NoOutputCaptured)
        );
    }

    #[test]
    fn pattern_literal_flags() {
        assert!(p("/RISCV64/i").is_match("riscv64"));
        assert!(!p("RISCV64").is_match("riscv64"));
        assert!(p("/^b$/m").is_match("a\nb\nc"));
        assert!(p("/a.b/s").is_match("a\nb"));
        assert!(p("/a/g").is_match("cat"));
        // Slashes inside the body are kept.
        assert!(p("/GNU/Linux/").is_match("GNU/Linux"));
        assert_eq!(p("/x/i").to_string(), "/x/i");
        assert_eq!(p("/riscv/i").find_end("x RISCV64"), Some(7));
        assert_eq!(p("riscv").find_end("x86_64"), None);

        assert!(matches!(
            Pattern::parse("/x/q"),
            Err(PatternError::UnsupportedFlag { flag: 'q', .. })
        ));
        assert!(matches!(
            Pattern::parse("(unclosed"),
            Err(PatternError::Invalid { .. })
        ));
    }

    #[test]
    fn compound_check_is_reported_but_never_overrides() {
        let validator = OutputValidator::new(p("/riscv64/i"))
            .with_compound(CompoundCheck::uname().unwrap());

        let good = validator
            .validate("uname -a\r\nLinux alpine 6.6.0-rc1 #1 SMP riscv64 GNU/Linux\r\n~ # ")
            .unwrap();
        assert!(good.primary_pass);
        assert_eq!(good.compound_pass, Some(true));

        let odd = validator.validate("arch: riscv64").unwrap();
        assert!(odd.primary_pass);
        assert_eq!(odd.compound_pass, Some(false));
    }

    #[test]
    fn report_serializes_patterns_as_strings() {
        let report = validate("riscv64", &p("/riscv64/i"), &[]).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["required"], "/riscv64/i");
        assert_eq!(json["primary_pass"], true);
    }
}
