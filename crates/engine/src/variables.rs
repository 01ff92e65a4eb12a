//! Variable substitution
//!
//! Selectors and values may carry `{{ name }}` placeholders. A
//! [`VariableResolver`] supplies the variables of an environment and expands
//! templates against them.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

use crate::error::VariableError;

/// Variable name to value
pub type Variables = HashMap<String, String>;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_.-]+)\s*\}\}").expect("placeholder pattern is valid")
});

/// Expand `{{ name }}` placeholders; unknown names are left as written
pub fn substitute(template: &str, variables: &Variables) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match variables.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Source of environment variables used to expand step templates
#[async_trait]
pub trait VariableResolver: Send + Sync {
    /// Variables of `environment_id`, or the defaults when none is given
    async fn variables(&self, environment_id: Option<&str>) -> Result<Variables, VariableError>;

    fn substitute(&self, template: &str, variables: &Variables) -> String {
        substitute(template, variables)
    }
}

/// Static per-environment variables layered over global defaults
#[derive(Debug, Clone, Default)]
pub struct TemplateVariables {
    defaults: Variables,
    environments: HashMap<String, Variables>,
}

impl TemplateVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    pub fn with_environment(mut self, id: impl Into<String>, variables: Variables) -> Self {
        self.environments.insert(id.into(), variables);
        self
    }

    /// Add or replace one variable of an environment, creating it if needed
    pub fn set(&mut self, environment_id: &str, name: impl Into<String>, value: impl Into<String>) {
        self.environments
            .entry(environment_id.to_string())
            .or_default()
            .insert(name.into(), value.into());
    }
}

#[async_trait]
impl VariableResolver for TemplateVariables {
    async fn variables(&self, environment_id: Option<&str>) -> Result<Variables, VariableError> {
        let mut resolved = self.defaults.clone();
        if let Some(id) = environment_id {
            let env = self
                .environments
                .get(id)
                .ok_or_else(|| VariableError::UnknownEnvironment(id.to_string()))?;
            resolved.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(resolved)
    }
}
