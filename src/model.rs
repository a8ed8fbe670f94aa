use std::sync::LazyLock;

use regex::Regex;

use crate::error::Error;

static NESTED_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("Invalid regex pattern"));

/// One parsed line of an env file.
///
/// A variable is either *valid* (it has a name and a value) or an invalid
/// placeholder standing for a blank line, a comment, or a line without `=`.
/// Placeholders keep the parsed sequence aligned with the source lines and are
/// skipped by loaders.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Variable {
    name: Option<String>,
    value: Option<String>,
    nested: Vec<String>,
}

impl Variable {
    /// Build a valid variable, detecting `${NAME}` references in `value`.
    ///
    /// The name is trimmed and must not be empty.
    pub fn new(name: &str, value: impl Into<String>) -> Result<Self, Error> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidName);
        }

        let value = value.into();
        let nested = nested_references(&value);

        Ok(Self {
            name: Some(name.to_owned()),
            value: Some(value),
            nested,
        })
    }

    /// The placeholder record for lines that define no variable.
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Referenced variable names, de-duplicated, in first-occurrence order.
    pub fn nested(&self) -> &[String] {
        &self.nested
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_some()
            && self
                .name
                .as_deref()
                .is_some_and(|name| !name.trim().is_empty())
    }

    pub fn is_nested(&self) -> bool {
        self.is_valid() && !self.nested.is_empty()
    }

    /// Split a valid variable into its name and value.
    pub(crate) fn into_parts(self) -> Option<(String, String, Vec<String>)> {
        if !self.is_valid() {
            return None;
        }
        match (self.name, self.value) {
            (Some(name), Some(value)) => Some((name, value, self.nested)),
            _ => None,
        }
    }
}

fn nested_references(value: &str) -> Vec<String> {
    if !value.contains("${") {
        return Vec::new();
    }

    let mut names: Vec<String> = Vec::new();
    for captures in NESTED_PATTERN.captures_iter(value) {
        let name = &captures[1];
        if !names.iter().any(|seen| seen == name) {
            names.push(name.to_owned());
        }
    }
    names
}
