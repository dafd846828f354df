//! Template System - Package Build Contracts
//!
//! A template is read once per build, validated, and normalized in place.
//! After `load_template` returns it is never mutated again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::log::BuildLog;
use crate::validation::{SchemaError, Validator};

/// Leaf name of the template file inside a template directory.
pub const TEMPLATE_FILE_NAME: &str = "template";

/// Condition applied to dependencies whose template omitted one.
pub const DEFAULT_CONDITION: &str = ">=";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed reading template file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed parsing template file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid template: {0}")]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub maintainer: String,
    #[serde(default)]
    pub source_repository: String,
    #[serde(default)]
    pub pkg_repository: String,
    pub homepage: String,
    pub arch: String,
    pub kind: String,
    pub file_checksum_algo: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub version: Version,
    pub license: String,
    #[serde(default)]
    pub mandatory_dependencies: Dependencies,
    #[serde(default)]
    pub suggested_dependencies: Dependencies,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub build: Vec<Dependency>,
    #[serde(default)]
    pub runtime: Vec<Dependency>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub version: Version,
}

/// Structured version as stored in templates.
///
/// `readable` is kept verbatim; the numeric parts are what downstream
/// packaging compares against `condition`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(default)]
    pub readable: String,
    #[serde(default)]
    pub major: u64,
    #[serde(default)]
    pub minor: u64,
    #[serde(default)]
    pub patch: u64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub condition: String,
}

impl Version {
    /// Build the structured form from a semver string such as `1.4.2-beta.1`.
    ///
    /// The condition is left empty so normalization can default it.
    pub fn from_readable(readable: &str) -> Result<Self, semver::Error> {
        let parsed = semver::Version::parse(readable.trim())?;
        Ok(Self {
            readable: readable.trim().to_string(),
            major: parsed.major,
            minor: parsed.minor,
            patch: parsed.patch,
            tag: parsed.pre.as_str().to_string(),
            condition: String::new(),
        })
    }
}

/// Architectures a template may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Amd64,
    Aarch64,
    I686,
    Arm,
    Armv7,
    Mips,
    Mips64,
    Mips64el,
    Mipsel,
    Powerpc,
    Powerpc64,
    Powerpc64le,
    Riscv64gc,
    S390x,
}

impl Arch {
    pub const ALL: [Arch; 14] = [
        Arch::Amd64,
        Arch::Aarch64,
        Arch::I686,
        Arch::Arm,
        Arch::Armv7,
        Arch::Mips,
        Arch::Mips64,
        Arch::Mips64el,
        Arch::Mipsel,
        Arch::Powerpc,
        Arch::Powerpc64,
        Arch::Powerpc64le,
        Arch::Riscv64gc,
        Arch::S390x,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Aarch64 => "aarch64",
            Arch::I686 => "i686",
            Arch::Arm => "arm",
            Arch::Armv7 => "armv7",
            Arch::Mips => "mips",
            Arch::Mips64 => "mips64",
            Arch::Mips64el => "mips64el",
            Arch::Mipsel => "mipsel",
            Arch::Powerpc => "powerpc",
            Arch::Powerpc64 => "powerpc64",
            Arch::Powerpc64le => "powerpc64le",
            Arch::Riscv64gc => "riscv64gc",
            Arch::S390x => "s390x",
        }
    }
}

impl FromStr for Arch {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Arch::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| SchemaError::UnsupportedArch(s.to_string()))
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithms accepted for `file_checksum_algo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgo {
    Md5,
    Sha256,
    Sha512,
}

impl ChecksumAlgo {
    pub const ALL: [ChecksumAlgo; 3] = [ChecksumAlgo::Md5, ChecksumAlgo::Sha256, ChecksumAlgo::Sha512];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgo::Md5 => "md5",
            ChecksumAlgo::Sha256 => "sha256",
            ChecksumAlgo::Sha512 => "sha512",
        }
    }
}

impl FromStr for ChecksumAlgo {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChecksumAlgo::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| SchemaError::UnsupportedChecksumAlgo(s.to_string()))
    }
}

impl fmt::Display for ChecksumAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set `>=` on every dependency that has no condition. Idempotent.
pub fn normalize_dependencies(deps: &mut [Dependency]) {
    for dep in deps.iter_mut() {
        if dep.version.condition.is_empty() {
            dep.version.condition = DEFAULT_CONDITION.to_string();
        }
    }
}

impl Template {
    /// Parse a template from JSON without validating it.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn arch(&self) -> Result<Arch, SchemaError> {
        self.arch.parse()
    }

    pub fn checksum_algo(&self) -> Result<ChecksumAlgo, SchemaError> {
        self.file_checksum_algo.parse()
    }

    /// Normalize conditions in all four dependency groups.
    pub fn normalize(&mut self) {
        normalize_dependencies(&mut self.mandatory_dependencies.build);
        normalize_dependencies(&mut self.mandatory_dependencies.runtime);
        normalize_dependencies(&mut self.suggested_dependencies.build);
        normalize_dependencies(&mut self.suggested_dependencies.runtime);
    }
}

/// Read `<template_dir>/template`, validate it and normalize its dependencies.
pub fn load_template(template_dir: &Path, log: &dyn BuildLog) -> Result<Template, TemplateError> {
    let path = template_dir.join(TEMPLATE_FILE_NAME);
    log.info(&format!("Deserializing template fields from {}", path.display()));

    let content = fs::read_to_string(&path).map_err(|source| TemplateError::Io {
        path: path.clone(),
        source,
    })?;

    let mut template = Template::from_json(&content).map_err(|source| TemplateError::Parse {
        path: path.clone(),
        source,
    })?;

    log.info("Validating template fields");
    Validator::new().validate(&template)?;

    template.normalize();

    Ok(template)
}
