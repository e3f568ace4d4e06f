use std::{sync::Arc, time::Duration};

use regex::Regex;

use crate::{
    constants::REGEX_BUDGET,
    core::{
        adapters::bounded::run_bounded,
        domain::{ErrorTemplate, StructuredError, StructuredErrorAttribute},
        errors::SetupError,
    },
};

#[derive(Debug)]
struct CompiledAttribute {
    key: String,
    regex: Regex,
}

#[derive(Debug)]
struct CompiledTemplate {
    id: u64,
    name: String,
    signature: Regex,
    attributes: Vec<CompiledAttribute>,
}

/// Matches failure text against the error templates of an execution
/// environment. Cheap to clone; templates are compiled once.
#[derive(Clone, Debug)]
pub struct ErrorClassifier {
    templates: Arc<[CompiledTemplate]>,
    budget: Duration,
}

impl ErrorClassifier {
    pub fn new(templates: &[ErrorTemplate]) -> Result<Self, SetupError> {
        let compiled = templates
            .iter()
            .map(compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            templates: compiled.into(),
            budget: REGEX_BUDGET,
        })
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Every template whose signature matches yields one error, in template
    /// order. Deterministic for equal input.
    #[tracing::instrument(skip_all, fields(templates = self.templates.len()))]
    pub fn classify(&self, text: &str) -> Vec<StructuredError> {
        if self.templates.is_empty() || text.is_empty() {
            return Vec::new();
        }

        let templates = self.templates.clone();
        let text = text.to_string();
        let errors = run_bounded("error_templates", self.budget, move || {
            templates
                .iter()
                .filter_map(|template| template.classify(&text))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

        tracing::debug!("Structured errors: {:?}", errors);
        errors
    }
}

impl CompiledTemplate {
    fn classify(&self, text: &str) -> Option<StructuredError> {
        let matched = self.signature.find(text)?;

        let attributes = self
            .attributes
            .iter()
            .map(|attribute| {
                // First capture group if the rule has one, else the whole match.
                let value = attribute.regex.captures(text).and_then(|caps| {
                    let group = if caps.len() > 1 { caps.get(1) } else { caps.get(0) };
                    group.map(|m| m.as_str().to_string())
                });
                StructuredErrorAttribute {
                    key: attribute.key.clone(),
                    matched: value.is_some(),
                    value,
                }
            })
            .collect();

        Some(StructuredError {
            template_id: self.id,
            template_name: self.name.clone(),
            matched_text: matched.as_str().to_string(),
            attributes,
        })
    }
}

fn compile(template: &ErrorTemplate) -> Result<CompiledTemplate, SetupError> {
    let invalid = |e: regex::Error| SetupError::InvalidTemplate {
        template: template.name.clone(),
        msg: e.to_string(),
    };

    let attributes = template
        .attributes
        .iter()
        .map(|attribute| {
            Ok(CompiledAttribute {
                key: attribute.key.clone(),
                regex: Regex::new(&attribute.regex).map_err(invalid)?,
            })
        })
        .collect::<Result<Vec<_>, SetupError>>()?;

    Ok(CompiledTemplate {
        id: template.id,
        name: template.name.clone(),
        signature: Regex::new(&template.signature).map_err(invalid)?,
        attributes,
    })
}
