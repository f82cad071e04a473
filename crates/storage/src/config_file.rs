//! The repository config file dialect.
//!
//! A deliberately small TOML subset: `[section]` headers, `key = "v"`
//! entries with double-quoted string values only, `#` comments, and
//! insignificant whitespace. Sections and keys are written sorted so
//! the rendered file is deterministic.

use crate::StorageError;
use std::collections::BTreeMap;

/// Parsed config contents: section → key → value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ConfigFile {
    /// An empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key` in `section`.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section).and_then(|s| s.get(key)).map(String::as_str)
    }

    /// Look up a key that must exist.
    pub fn require(&self, section: &str, key: &str) -> Result<&str, StorageError> {
        self.get(section, key)
            .ok_or_else(|| StorageError::Config(format!("missing key {section}.{key}")))
    }

    /// Set `key` in `section`, creating the section if needed.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Section names, sorted.
    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Parse the dialect. Unknown syntax is an error, never skipped.
    pub fn parse(text: &str) -> Result<Self, StorageError> {
        let mut config = Self::new();
        let mut section: Option<String> = None;
        for (idx, raw_line) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[') {
                let name = name
                    .strip_suffix(']')
                    .ok_or_else(|| StorageError::Config(format!("line {lineno}: unterminated section header")))?
                    .trim();
                if name.is_empty() {
                    return Err(StorageError::Config(format!("line {lineno}: empty section name")));
                }
                section = Some(name.to_string());
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| StorageError::Config(format!("line {lineno}: expected key = \"value\"")))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(StorageError::Config(format!("line {lineno}: empty key")));
            }
            let section = section
                .as_deref()
                .ok_or_else(|| StorageError::Config(format!("line {lineno}: key before any section")))?;
            let value = unquote(value.trim())
                .ok_or_else(|| StorageError::Config(format!("line {lineno}: value must be a double-quoted string")))?;
            if config.get(section, key).is_some() {
                return Err(StorageError::Config(format!("line {lineno}: duplicate key {section}.{key}")));
            }
            config.set(section, key, &value);
        }
        Ok(config)
    }

    /// Render the dialect with sections and keys sorted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (section, entries) in &self.sections {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push('[');
            out.push_str(section);
            out.push_str("]\n");
            for (key, value) in entries {
                out.push_str(key);
                out.push_str(" = \"");
                out.push_str(&escape(value));
                out.push_str("\"\n");
            }
        }
        out
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn unquote(raw: &str) -> Option<String> {
    let inner = raw.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '"' {
            // An unescaped quote inside the value means the suffix we
            // stripped was not the real terminator.
            return None;
        }
        if c == '\\' {
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}
