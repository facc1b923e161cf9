//! Connector definition files.
//!
//! A connector's settings live at `<runtime>/connectors/<id>.md` as a
//! Markdown document with a `## Settings` bullet list (`enabled`,
//! `path`, `format`). A missing file means defaults.

use std::path::Path;

use rv_domain::error::Result;

use crate::types::ConnectorSettings;

pub fn load_settings(md_path: &Path) -> Result<ConnectorSettings> {
    let content = std::fs::read_to_string(md_path)?;
    Ok(parse_settings(&content))
}

pub fn parse_settings(content: &str) -> ConnectorSettings {
    let mut settings = ConnectorSettings::default();
    let mut in_settings = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("## Settings") {
            in_settings = true;
            continue;
        }
        if in_settings && trimmed.starts_with("## ") {
            break;
        }
        if !in_settings {
            continue;
        }
        let Some(rest) = trimmed.strip_prefix("- ") else {
            continue;
        };
        let Some((key, value)) = rest.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "enabled" => settings.enabled = value.eq_ignore_ascii_case("true"),
            "path" => settings.path = value.to_string(),
            "format" => settings.format = value.to_string(),
            _ => {}
        }
    }
    settings
}
