// Toolchain recipe management for the gavel judge
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Build/run recipe for one language. Command templates substitute
/// `{source}` (the prepared source file name) and `{binary}` (the compile
/// artifact name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchain {
    pub name: String,
    pub extension: String,
    /// None for interpreted languages.
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

impl Toolchain {
    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    /// File name the submission source is written under.
    pub fn source_name(&self, submission_id: i64) -> String {
        format!("submission_{}.{}", submission_id, self.extension)
    }

    /// File name of the compile artifact for compiled languages.
    pub fn binary_name(&self, submission_id: i64) -> String {
        format!("submission_{}", submission_id)
    }

    pub fn compile_command(&self, submission_id: i64) -> Option<Vec<String>> {
        let template = self.compile.as_ref()?;
        Some(expand_command(
            template,
            &self.source_name(submission_id),
            &self.binary_name(submission_id),
        ))
    }

    pub fn run_command(&self, submission_id: i64) -> Vec<String> {
        expand_command(
            &self.run,
            &self.source_name(submission_id),
            &self.binary_name(submission_id),
        )
    }
}

fn expand_command(template: &[String], source: &str, binary: &str) -> Vec<String> {
    template
        .iter()
        .map(|part| part.replace("{source}", source).replace("{binary}", binary))
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct ToolchainsJson {
    toolchains: Vec<Toolchain>,
}

/// Registry of configured toolchains, keyed by language identifier.
/// Pure lookup; no state beyond the loaded configuration.
#[derive(Debug, Clone)]
pub struct ToolchainRegistry {
    toolchains: HashMap<String, Toolchain>,
}

impl ToolchainRegistry {
    pub fn new(toolchains: Vec<Toolchain>) -> Self {
        let toolchains = toolchains
            .into_iter()
            .map(|tc| (tc.name.clone(), tc))
            .collect();
        Self { toolchains }
    }

    /// Load toolchain recipes from a JSON file.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Toolchain config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .context("Failed to read toolchain config")?;

        let parsed: ToolchainsJson =
            serde_json::from_str(&content).context("Failed to parse toolchain config")?;

        Ok(Self::new(parsed.toolchains))
    }

    /// The two languages the coursework judge has always supported.
    pub fn builtin() -> Self {
        Self::new(vec![
            Toolchain {
                name: "python".to_string(),
                extension: "py".to_string(),
                compile: None,
                run: vec!["python3".to_string(), "{source}".to_string()],
            },
            Toolchain {
                name: "cpp".to_string(),
                extension: "cpp".to_string(),
                compile: Some(vec![
                    "g++".to_string(),
                    "{source}".to_string(),
                    "-o".to_string(),
                    "{binary}".to_string(),
                ]),
                run: vec!["./{binary}".to_string()],
            },
        ])
    }

    pub fn get(&self, language: &str) -> Option<&Toolchain> {
        self.toolchains.get(language)
    }

    /// List all supported language identifiers
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.toolchains.keys().cloned().collect();
        names.sort();
        names
    }
}
