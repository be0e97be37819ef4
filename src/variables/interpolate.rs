//! `${name}` template interpolation
//!
//! Tokens resolve through the full tier chain. Unresolved tokens stay in
//! the output as literal text rather than aborting: a missing variable
//! should be visible in the generated command, not hide the command.

use crate::variables::{VariableContext, VariableValue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.-]*)\}").expect("valid token regex"));

impl VariableContext {
    /// Replace every `${name}` token using `resolve`.
    pub fn interpolate(&self, template: &str) -> String {
        self.interpolate_with(template, &HashMap::new())
    }

    /// Replace every `${name}` token, consulting `overrides` before the
    /// tier chain. Used for step parameters, which shadow session
    /// variables inside their own step.
    pub fn interpolate_with(
        &self,
        template: &str,
        overrides: &HashMap<String, VariableValue>,
    ) -> String {
        TOKEN
            .replace_all(template, |caps: &regex::Captures| {
                let name = &caps[1];
                match overrides.get(name).or_else(|| self.resolve(name)) {
                    Some(value) => value.to_display_string(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Escape a value for safe use inside a single-quoted shell word.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '='))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::VariableTier;

    #[test]
    fn replaces_resolved_tokens() {
        let mut ctx = VariableContext::new();
        ctx.set("package", "docker-ce".into(), VariableTier::Configuration);
        ctx.set("version", 24.into(), VariableTier::RuntimeProduced);

        assert_eq!(
            ctx.interpolate("apt-get install ${package}=${version}"),
            "apt-get install docker-ce=24"
        );
    }

    #[test]
    fn unresolved_tokens_stay_literal() {
        let ctx = VariableContext::new();
        assert_eq!(
            ctx.interpolate("echo ${missing} done"),
            "echo ${missing} done"
        );
    }

    #[test]
    fn overrides_shadow_the_tier_chain() {
        let mut ctx = VariableContext::new();
        ctx.set("name", "session".into(), VariableTier::InteractiveInput);

        let mut overrides = HashMap::new();
        overrides.insert("name".to_string(), VariableValue::String("step".into()));

        assert_eq!(ctx.interpolate_with("${name}", &overrides), "step");
        assert_eq!(ctx.interpolate("${name}"), "session");
    }

    #[test]
    fn shell_escape_quotes_when_needed() {
        assert_eq!(shell_escape("simple"), "simple");
        assert_eq!(shell_escape("with space"), "'with space'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(shell_escape(""), "''");
    }
}
