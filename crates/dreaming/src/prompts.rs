//! Prompt modules.
//!
//! Detection behavior is steered by Markdown prompt modules under
//! `<runtime>/prompts/`. Each file carries a `# Title` plus optional
//! `## Description`, `## Category`, `## System Prompt`, and
//! `## Examples` sections; enabled modules are appended to the base
//! detection prompt by title.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

#[derive(Debug, Clone, Default)]
pub struct PromptDefinition {
    pub name: String,
    pub description: String,
    pub category: String,
    pub system_prompt: String,
    pub examples: String,
}

pub struct PromptHandler {
    prompts_dir: PathBuf,
    cache: Mutex<Option<BTreeMap<String, PromptDefinition>>>,
}

impl PromptHandler {
    pub fn new(prompts_dir: &Path) -> Self {
        Self {
            prompts_dir: prompts_dir.to_path_buf(),
            cache: Mutex::new(None),
        }
    }

    /// Load (and cache) every prompt definition in the directory.
    /// Unparseable files are skipped.
    pub fn load_all(&self) -> BTreeMap<String, PromptDefinition> {
        let mut cache = self.cache.lock();
        if let Some(ref prompts) = *cache {
            return prompts.clone();
        }

        let mut prompts = BTreeMap::new();
        if self.prompts_dir.exists() {
            if let Ok(entries) = std::fs::read_dir(&self.prompts_dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("md") {
                        continue;
                    }
                    if let Ok(content) = std::fs::read_to_string(&path) {
                        let fallback = path
                            .file_stem()
                            .map(|s| s.to_string_lossy().to_string())
                            .unwrap_or_default();
                        let prompt = parse_prompt(&content, &fallback);
                        prompts.insert(prompt.name.clone(), prompt);
                    }
                }
            }
        }
        *cache = Some(prompts.clone());
        prompts
    }

    pub fn prompt_names(&self) -> Vec<String> {
        self.load_all().keys().cloned().collect()
    }

    /// Concatenate the base prompt with every enabled module.
    ///
    /// `enabled = None` includes all loaded modules. Module text is
    /// appended verbatim under a title header.
    pub fn build_unified_system_prompt(
        &self,
        base_prompt: &str,
        enabled: Option<&[String]>,
    ) -> String {
        let mut result = base_prompt.trim().to_string();

        for (name, prompt) in self.load_all() {
            if let Some(enabled) = enabled {
                if !enabled.contains(&name) {
                    continue;
                }
            }
            let section_title = title_from_slug(&name);
            result.push_str(&format!("\n\n## {section_title}\n"));
            if !prompt.system_prompt.is_empty() {
                result.push_str(&format!("{}\n", prompt.system_prompt));
            }
            if !prompt.examples.is_empty() {
                result.push_str(&format!("\n### Examples\n{}\n", prompt.examples));
            }
        }
        result
    }
}

fn parse_prompt(content: &str, fallback_name: &str) -> PromptDefinition {
    let sections = rv_artifacts::definition::split_sections(content);

    let name = content
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_lowercase().replace(' ', "-"))
        .unwrap_or_else(|| fallback_name.to_string());

    let section = |key: &str| sections.get(key).map(|s| s.trim().to_string()).unwrap_or_default();

    PromptDefinition {
        name,
        description: section("Description"),
        category: {
            let c = section("Category");
            if c.is_empty() { "analysis".into() } else { c }
        },
        system_prompt: section("System Prompt"),
        examples: section("Examples"),
    }
}

fn title_from_slug(slug: &str) -> String {
    slug.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
