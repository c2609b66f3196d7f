//! Environment variable references in configuration files.
//!
//! `$NAME` and `${NAME}` expand to the variable, `${NAME:-fallback}` falls back when it is unset
//! or empty, `${NAME:?reason}` rejects the file when it is unset or empty. `$$` is a literal `$`.

use std::{collections::HashMap, sync::LazyLock};

use regex::{Captures, Regex};

// `.` shows up in variables exported from Java properties files.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<escaped>\$\$)
        | \$(?P<bare>[[:word:].]+)
        | \$\{(?P<braced>[[:word:].]+)(?:(?P<op>:-|:\?)(?P<arg>[^}]*))?\}",
    )
    .expect("reference pattern is valid")
});

/// Expands every reference in `input` against `vars`.
///
/// Returns the expanded text and a warning per unset variable, or every required variable that
/// was missing.
pub fn interpolate(
    input: &str,
    vars: &HashMap<String, String>,
) -> Result<(String, Vec<String>), Vec<String>> {
    let mut missing = Vec::new();
    let mut warnings = Vec::new();

    let expanded = REFERENCE.replace_all(input, |caps: &Captures<'_>| {
        if caps.name("escaped").is_some() {
            return "$".to_owned();
        }
        let Some(name) = caps.name("bare").or_else(|| caps.name("braced")) else {
            return String::new();
        };
        let name = name.as_str();
        let value = vars.get(name).filter(|value| !value.is_empty());
        let arg = caps.name("arg").map_or("", |arg| arg.as_str());

        match (caps.name("op").map(|op| op.as_str()), value) {
            (_, Some(value)) => value.clone(),
            (Some(":-"), None) => arg.to_owned(),
            (Some(_), None) => {
                missing.push(format!("environment variable {name} is required: {arg}"));
                String::new()
            }
            (None, None) => {
                if !vars.contains_key(name) {
                    warnings.push(format!("environment variable {name} is not set"));
                }
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok((expanded.into_owned(), warnings))
    } else {
        Err(missing)
    }
}
