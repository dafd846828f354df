//! Validation System - Template Schema Rules
//!
//! Each rule checks one field-level invariant. The validator runs them in a
//! fixed order and stops at the first violation.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::templates::{Arch, ChecksumAlgo, Template};

pub const MAX_DESCRIPTION_LEN: usize = 200;
pub const MAX_TAGS: usize = 5;

static PKG_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("package name pattern is valid"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("description exceeds maximum length of {max} characters (got {len})")]
    DescriptionTooLong { len: usize, max: usize },

    #[error("tags exceeds maximum length of {max} items (got {count})")]
    TooManyTags { count: usize, max: usize },

    #[error("Package name '{0}' can only contain English alphabets, numbers, '-' and '_' characters")]
    InvalidName(String),

    #[error("Unsupported architecture: '{0}'")]
    UnsupportedArch(String),

    #[error("Unsupported checksum algorithm: '{0}'")]
    UnsupportedChecksumAlgo(String),

    #[error("Invalid URL in {field}: '{value}' ({reason})")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Template rule trait - one invariant per rule
pub trait TemplateRule {
    fn name(&self) -> &'static str;
    fn check(&self, template: &Template) -> Result<(), SchemaError>;
}

// --- Concrete Rules ---

pub struct FieldLengthRule;

impl TemplateRule for FieldLengthRule {
    fn name(&self) -> &'static str { "field_lengths" }

    fn check(&self, template: &Template) -> Result<(), SchemaError> {
        let len = template.description.chars().count();
        if len > MAX_DESCRIPTION_LEN {
            return Err(SchemaError::DescriptionTooLong { len, max: MAX_DESCRIPTION_LEN });
        }

        if template.tags.len() > MAX_TAGS {
            return Err(SchemaError::TooManyTags { count: template.tags.len(), max: MAX_TAGS });
        }

        Ok(())
    }
}

pub struct PackageNameRule;

impl TemplateRule for PackageNameRule {
    fn name(&self) -> &'static str { "package_name" }

    fn check(&self, template: &Template) -> Result<(), SchemaError> {
        if PKG_NAME_REGEX.is_match(&template.name) {
            Ok(())
        } else {
            Err(SchemaError::InvalidName(template.name.clone()))
        }
    }
}

pub struct ArchitectureRule;

impl TemplateRule for ArchitectureRule {
    fn name(&self) -> &'static str { "architecture" }

    fn check(&self, template: &Template) -> Result<(), SchemaError> {
        template.arch.parse::<Arch>().map(|_| ())
    }
}

pub struct ChecksumAlgoRule;

impl TemplateRule for ChecksumAlgoRule {
    fn name(&self) -> &'static str { "file_checksum_algo" }

    fn check(&self, template: &Template) -> Result<(), SchemaError> {
        template.file_checksum_algo.parse::<ChecksumAlgo>().map(|_| ())
    }
}

pub struct UrlRule;

impl UrlRule {
    fn check_url(field: &'static str, value: &str) -> Result<(), SchemaError> {
        Url::parse(value).map(|_| ()).map_err(|e| SchemaError::InvalidUrl {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
    }
}

impl TemplateRule for UrlRule {
    fn name(&self) -> &'static str { "urls" }

    fn check(&self, template: &Template) -> Result<(), SchemaError> {
        if !template.source_repository.is_empty() {
            Self::check_url("source_repository", &template.source_repository)?;
        }

        if !template.pkg_repository.is_empty() {
            Self::check_url("pkg_repository", &template.pkg_repository)?;
        }

        Self::check_url("homepage", &template.homepage)
    }
}

/// Validator runs rules in order and reports the first violation
pub struct Validator {
    rules: Vec<Box<dyn TemplateRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(FieldLengthRule),
                Box::new(PackageNameRule),
                Box::new(ArchitectureRule),
                Box::new(ChecksumAlgoRule),
                Box::new(UrlRule),
            ],
        }
    }

    pub fn validate(&self, template: &Template) -> Result<(), SchemaError> {
        for rule in &self.rules {
            tracing::debug!(rule = rule.name(), template = %template.name, "checking template rule");
            rule.check(template)?;
        }
        Ok(())
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
