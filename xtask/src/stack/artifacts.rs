//! Reading and writing synthesized artifacts.
//!
//! `synth` writes the template next to a small manifest describing the
//! synthesis. Only the manifest carries a timestamp, so re-synthesizing an
//! unchanged configuration leaves the template byte-identical.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tinylinker_core::template::render_template_string;
use tinylinker_core::Stack;

use super::error::{Result, StackCommandError};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: &str = "1";

/// Describes one synthesis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub stack_name: String,
    pub account: String,
    pub region: String,
    pub template_file: String,
    pub resource_count: usize,
    pub apply_order: Vec<String>,
    pub outputs: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl Manifest {
    pub fn for_stack(stack: &Stack, generated_at: DateTime<Utc>) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            stack_name: stack.name().to_string(),
            account: stack.account().to_string(),
            region: stack.region().to_string(),
            template_file: template_file_name(stack.name()),
            resource_count: stack.resources().len(),
            apply_order: stack
                .graph()
                .apply_order()
                .iter()
                .map(ToString::to_string)
                .collect(),
            outputs: stack.outputs().iter().map(|o| o.name.clone()).collect(),
            generated_at,
        }
    }
}

pub fn template_file_name(stack_name: &str) -> String {
    format!("{stack_name}.template.json")
}

/// Paths written by [`write_synth_output`].
#[derive(Debug, Clone)]
pub struct SynthOutput {
    pub template: PathBuf,
    pub manifest: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StackCommandError + '_ {
    move |source| StackCommandError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes the template and manifest into `dir`, creating it if needed.
pub fn write_synth_output(dir: &Path, stack: &Stack) -> Result<SynthOutput> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;

    let template = dir.join(template_file_name(stack.name()));
    fs::write(&template, render_template_string(stack)?).map_err(io_error(&template))?;

    let manifest = dir.join(MANIFEST_FILE);
    let mut rendered = serde_json::to_string_pretty(&Manifest::for_stack(stack, Utc::now()))?;
    rendered.push('\n');
    fs::write(&manifest, rendered).map_err(io_error(&manifest))?;

    tracing::debug!(template = %template.display(), manifest = %manifest.display(), "wrote synth output");

    Ok(SynthOutput { template, manifest })
}

/// Reads a previously synthesized template.
pub fn read_template(path: &Path) -> Result<serde_json::Value> {
    let contents = fs::read_to_string(path).map_err(io_error(path))?;
    serde_json::from_str(&contents).map_err(|source| StackCommandError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a JSON stack configuration file.
pub fn read_config(path: &Path) -> Result<tinylinker_core::StackConfig> {
    let contents = fs::read_to_string(path).map_err(io_error(path))?;
    tinylinker_core::StackConfig::from_json(&contents).map_err(|source| StackCommandError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinylinker_core::{compose, RemovalPolicy, StackConfig, TableRemovalPolicies};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tinylinker-xtask-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn stack() -> Stack {
        compose(&StackConfig {
            account: Some("123456789012".to_string()),
            region: Some("us-west-2".to_string()),
            removal_policies: Some(TableRemovalPolicies::uniform(RemovalPolicy::Retain)),
            domain_name: Some("links.example.com".to_string()),
            ..StackConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = scratch_dir("synth");
        let stack = stack();
        let output = write_synth_output(&dir, &stack).unwrap();

        assert_eq!(
            output.template.file_name().unwrap(),
            "TinyLinkerStack.template.json"
        );
        let template = read_template(&output.template).unwrap();
        assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");

        let manifest: Manifest =
            serde_json::from_str(&fs::read_to_string(&output.manifest).unwrap()).unwrap();
        assert_eq!(manifest.stack_name, "TinyLinkerStack");
        assert_eq!(manifest.resource_count, stack.resources().len());
        assert_eq!(manifest.outputs, vec!["ApiUrl", "CustomDomainUrl", "NameServers"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_template_is_stable_across_writes() {
        let dir = scratch_dir("stable");
        let stack = stack();
        let first = write_synth_output(&dir, &stack).unwrap();
        let before = fs::read_to_string(&first.template).unwrap();
        let second = write_synth_output(&dir, &stack).unwrap();
        assert_eq!(before, fs::read_to_string(&second.template).unwrap());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_template_reports_path() {
        let path = scratch_dir("missing").join("nope.json");
        let err = read_template(&path).unwrap_err();
        assert!(matches!(err, StackCommandError::Io { .. }));
        assert!(err.to_string().contains("nope.json"));
    }

    #[test]
    fn test_invalid_config_file() {
        let dir = scratch_dir("config");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tinylinker.json");
        fs::write(&path, r#"{ "unknownField": true }"#).unwrap();
        assert!(matches!(
            read_config(&path),
            Err(StackCommandError::Json { .. })
        ));
        fs::remove_dir_all(&dir).unwrap();
    }
}
