//! Declarative path templates.
//!
//! A template is a path relative to the dataset root in which `{name}`
//! placeholders stand for replacement values, e.g.
//! `{subject}/anat/{subject}_T1w.nii.gz`. Templates may also carry shell
//! wildcards (`*`, `?`, `[...]`) for parts of the file name that do not
//! identify the element.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{Element, WILDCARDS};
use crate::error::GrabError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PatternSpec {
    Template(String),
    Detailed(PatternDetail),
}

/// Template with optional space annotation and nested assets (e.g. `mask`,
/// `confounds`) reported under the parent type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PatternDetail {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<String>,
    #[serde(flatten)]
    pub nested: BTreeMap<String, PatternSpec>,
}

impl PatternSpec {
    pub fn template(&self) -> &str {
        match self {
            PatternSpec::Template(pattern) => pattern,
            PatternSpec::Detailed(detail) => &detail.pattern,
        }
    }

    pub fn space(&self) -> Option<&str> {
        match self {
            PatternSpec::Template(_) => None,
            PatternSpec::Detailed(detail) => detail.space.as_deref(),
        }
    }

    pub fn nested(&self) -> Option<&BTreeMap<String, PatternSpec>> {
        match self {
            PatternSpec::Template(_) => None,
            PatternSpec::Detailed(detail) => Some(&detail.nested),
        }
    }
}

impl From<&str> for PatternSpec {
    fn from(value: &str) -> Self {
        PatternSpec::Template(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placeholder<'a> {
    name: &'a str,
    span: Range<usize>,
}

static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}/]*)\}").unwrap());

fn placeholders(pattern: &str) -> Vec<Placeholder<'_>> {
    PLACEHOLDER_REGEX
        .captures_iter(pattern)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            Some(Placeholder {
                name: name.as_str(),
                span: whole.range(),
            })
        })
        .collect()
}

/// Replacement names used by `pattern`, without duplicates.
pub fn used_replacements(pattern: &str) -> BTreeSet<&str> {
    placeholders(pattern).into_iter().map(|p| p.name).collect()
}

/// Checks one template on its own: every placeholder is declared and none is
/// directly followed by a wildcard.
pub fn validate_pattern(
    data_type: &str,
    pattern: &str,
    replacements: &[String],
) -> Result<(), GrabError> {
    if pattern.trim().is_empty() {
        return Err(GrabError::Configuration(format!(
            "pattern for {data_type} is empty"
        )));
    }
    if pattern.starts_with('/') {
        return Err(GrabError::Configuration(format!(
            "pattern for {data_type} must be relative to the dataset root: {pattern}"
        )));
    }
    for placeholder in placeholders(pattern) {
        if !replacements.iter().any(|r| r == placeholder.name) {
            return Err(GrabError::Configuration(format!(
                "pattern for {data_type} uses undeclared replacement {{{}}}",
                placeholder.name
            )));
        }
        let next = pattern[placeholder.span.end..].chars().next();
        if next.is_some_and(|ch| WILDCARDS.contains(&ch)) {
            return Err(GrabError::Configuration(format!(
                "pattern for {data_type} has {{{}}} directly followed by a wildcard, which makes matches ambiguous",
                placeholder.name
            )));
        }
    }
    Ok(())
}

/// Checks a whole pattern map against the declared types and replacements.
pub fn validate_patterns(
    types: &[String],
    replacements: &[String],
    patterns: &BTreeMap<String, PatternSpec>,
) -> Result<(), GrabError> {
    if types.is_empty() {
        return Err(GrabError::Configuration(
            "at least one data type is required".to_string(),
        ));
    }
    if replacements.is_empty() {
        return Err(GrabError::Configuration(
            "at least one replacement is required".to_string(),
        ));
    }
    let mut seen = BTreeSet::new();
    for replacement in replacements {
        let is_valid = !replacement.is_empty()
            && replacement
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !is_valid {
            return Err(GrabError::Configuration(format!(
                "invalid replacement name {replacement:?}"
            )));
        }
        if !seen.insert(replacement.as_str()) {
            return Err(GrabError::Configuration(format!(
                "replacement {replacement} is declared twice"
            )));
        }
    }

    for data_type in types {
        let spec = patterns.get(data_type).ok_or_else(|| {
            GrabError::Configuration(format!("data type {data_type} has no pattern"))
        })?;
        validate_spec(data_type, spec, replacements)?;
    }

    for replacement in replacements {
        let is_used = types
            .iter()
            .filter_map(|t| patterns.get(t))
            .any(|spec| used_replacements(spec.template()).contains(replacement.as_str()));
        if !is_used {
            return Err(GrabError::Configuration(format!(
                "replacement {replacement} is not used in any pattern"
            )));
        }
    }

    let has_complete = types.iter().filter_map(|t| patterns.get(t)).any(|spec| {
        let used = used_replacements(spec.template());
        replacements.iter().all(|r| used.contains(r.as_str()))
    });
    if !has_complete {
        return Err(GrabError::Configuration(format!(
            "no pattern contains all replacements ({}); elements would not be unique",
            replacements.join(", ")
        )));
    }
    Ok(())
}

fn validate_spec(
    data_type: &str,
    spec: &PatternSpec,
    replacements: &[String],
) -> Result<(), GrabError> {
    validate_pattern(data_type, spec.template(), replacements)?;
    if let Some(nested) = spec.nested() {
        for (key, child) in nested {
            if key == "path" || key == "meta" {
                return Err(GrabError::Configuration(format!(
                    "nested asset of {data_type} uses reserved key {key}"
                )));
            }
            validate_spec(&format!("{data_type}.{key}"), child, replacements)?;
        }
    }
    Ok(())
}

/// A template compiled into a filesystem glob and an anchored regex.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    regex: Regex,
    glob: String,
    groups: Vec<usize>,
    used: Vec<usize>,
    replacement_count: usize,
}

impl CompiledPattern {
    pub fn compile(pattern: &str, replacements: &[String]) -> Result<Self, GrabError> {
        let mut expr = String::from("^");
        let mut glob = String::new();
        let mut groups = Vec::new();
        let mut cursor = 0;
        for placeholder in placeholders(pattern) {
            let literal = &pattern[cursor..placeholder.span.start];
            translate_glob(literal, &mut expr);
            glob.push_str(literal);

            let index = replacements
                .iter()
                .position(|r| r == placeholder.name)
                .ok_or_else(|| {
                    GrabError::Configuration(format!(
                        "undeclared replacement {{{}}} in {pattern}",
                        placeholder.name
                    ))
                })?;
            expr.push_str("([^/]+)");
            glob.push('*');
            groups.push(index);
            cursor = placeholder.span.end;
        }
        let tail = &pattern[cursor..];
        translate_glob(tail, &mut expr);
        glob.push_str(tail);
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|err| GrabError::Configuration(format!("pattern {pattern}: {err}")))?;
        let used = groups
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok(Self {
            regex,
            glob,
            groups,
            used,
            replacement_count: replacements.len(),
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }

    /// Indices of the replacements this pattern binds, ascending.
    pub fn used(&self) -> &[usize] {
        &self.used
    }

    pub fn uses_all(&self) -> bool {
        self.used.len() == self.replacement_count
    }

    /// Matches a root-relative, `/`-separated path. Returns the bound values
    /// in the order of [`CompiledPattern::used`]. A replacement that occurs
    /// more than once must take the same value everywhere, otherwise the
    /// path does not match.
    pub fn captures(&self, candidate: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(candidate)?;
        let mut bound: Vec<Option<&str>> = vec![None; self.replacement_count];
        for (group, &index) in self.groups.iter().enumerate() {
            let value = caps.get(group + 1)?.as_str();
            match bound[index] {
                Some(previous) if previous != value => return None,
                Some(_) => {}
                None => bound[index] = Some(value),
            }
        }
        self.used
            .iter()
            .map(|&index| bound[index].map(str::to_string))
            .collect()
    }
}

/// Substitutes element values into `pattern` by position: the i-th value
/// replaces every `{replacements[i]}`.
pub fn substitute(pattern: &str, element: &Element, replacements: &[String]) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut cursor = 0;
    for placeholder in placeholders(pattern) {
        out.push_str(&pattern[cursor..placeholder.span.start]);
        match replacements
            .iter()
            .position(|r| r == placeholder.name)
            .and_then(|index| element.values().get(index))
        {
            Some(value) => out.push_str(value),
            None => out.push_str(&pattern[placeholder.span.clone()]),
        }
        cursor = placeholder.span.end;
    }
    out.push_str(&pattern[cursor..]);
    out
}

/// Appends the regex equivalent of a shell glob fragment. Wildcards never
/// cross a `/`.
pub(crate) fn translate_glob(glob: &str, out: &mut String) {
    let chars = glob.chars().collect::<Vec<_>>();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => match chars[i + 1..].iter().position(|&ch| ch == ']') {
                Some(offset) if offset > 0 => {
                    let class = &chars[i + 1..i + 1 + offset];
                    out.push('[');
                    let mut body = class;
                    if matches!(body.first(), Some(&('!' | '^'))) {
                        out.push('^');
                        body = &body[1..];
                    }
                    for &ch in body {
                        if matches!(ch, '\\' | '[' | ']' | '^' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(ch);
                    }
                    out.push(']');
                    i += offset + 1;
                }
                _ => out.push_str(r"\["),
            },
            ch => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(ch.encode_utf8(&mut buf)));
            }
        }
        i += 1;
    }
}

/// Anchored regex for a complete glob.
pub(crate) fn glob_regex(glob: &str) -> Result<Regex, GrabError> {
    let mut expr = String::from("^");
    translate_glob(glob, &mut expr);
    expr.push('$');
    Regex::new(&expr).map_err(|err| GrabError::Configuration(format!("glob {glob}: {err}")))
}
