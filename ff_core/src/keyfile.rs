//! Non-strict INI/keyfile parsing.
//!
//! Ref manifests, `.flatpakrepo` files, store configuration and the image
//! configuration all share this format: `[section]` headers, `key=value`
//! lines, `#`/`;` comments, and indented continuation lines that extend the
//! previous value. Parsing is deliberately non-strict: duplicate sections are
//! merged and a duplicate key takes the later value, since some publishing
//! tools emit duplicates.

use std::collections::BTreeMap;
use std::fmt;

/// Parse failure with the offending line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFileError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for KeyFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for KeyFileError {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFile {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl KeyFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Result<Self, KeyFileError> {
        let mut keyfile = KeyFile::new();
        let mut current_section: Option<String> = None;
        let mut current_key: Option<String> = None;

        for (idx, raw_line) in input.lines().enumerate() {
            let lineno = idx + 1;
            let trimmed = raw_line.trim_end();

            if trimmed.trim().is_empty() {
                current_key = None;
                continue;
            }
            let stripped = trimmed.trim_start();
            if stripped.starts_with('#') || stripped.starts_with(';') {
                continue;
            }

            // Continuation line: leading whitespace extends the previous value.
            if raw_line.starts_with(char::is_whitespace) {
                match (&current_section, &current_key) {
                    (Some(section), Some(key)) => {
                        let value = keyfile
                            .sections
                            .get_mut(section)
                            .and_then(|s| s.get_mut(key))
                            .expect("continuation for known key");
                        value.push('\n');
                        value.push_str(stripped);
                        continue;
                    }
                    _ => {
                        return Err(KeyFileError {
                            line: lineno,
                            message: format!("unexpected continuation line '{}'", stripped),
                        });
                    }
                }
            }

            if let Some(header) = stripped.strip_prefix('[') {
                let Some(name) = header.strip_suffix(']') else {
                    return Err(KeyFileError {
                        line: lineno,
                        message: format!("unterminated section header '{}'", stripped),
                    });
                };
                let name = name.trim();
                if name.is_empty() {
                    return Err(KeyFileError {
                        line: lineno,
                        message: "empty section name".to_string(),
                    });
                }
                keyfile.sections.entry(name.to_string()).or_default();
                current_section = Some(name.to_string());
                current_key = None;
                continue;
            }

            let Some((key, value)) = stripped.split_once('=') else {
                return Err(KeyFileError {
                    line: lineno,
                    message: format!("expected 'key=value', got '{}'", stripped),
                });
            };
            let Some(section) = &current_section else {
                return Err(KeyFileError {
                    line: lineno,
                    message: format!("key '{}' before any section header", key.trim()),
                });
            };

            let key = key.trim().to_string();
            let value = value.trim().to_string();
            keyfile
                .sections
                .get_mut(section)
                .expect("current section exists")
                .insert(key.clone(), value);
            current_key = Some(key);
        }

        Ok(keyfile)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(|s| s.as_str())
    }

    pub fn section(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.sections.get(name)
    }

    /// Look up a key within a section. The key comparison is
    /// case-insensitive, matching how manifests are written with mixed
    /// conventions (`runtime=` vs `NoRuntime=`).
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        let sect = self.sections.get(section)?;
        if let Some(value) = sect.get(key) {
            return Some(value.as_str());
        }
        sect.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Boolean interpretation of a key; `None` when missing or unparseable.
    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        parse_bool(self.get(section, key)?)
    }

    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, section: &str, key: &str) -> Option<String> {
        let sect = self.sections.get_mut(section)?;
        if let Some(v) = sect.remove(key) {
            return Some(v);
        }
        let found = sect.keys().find(|k| k.eq_ignore_ascii_case(key)).cloned()?;
        sect.remove(&found)
    }

    /// Serialize back to keyfile text. Continuation lines are re-emitted with
    /// a leading tab so the output parses back to the same values.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (section, keys) in &self.sections {
            out.push('[');
            out.push_str(section);
            out.push_str("]\n");
            for (key, value) in keys {
                out.push_str(key);
                out.push('=');
                let mut lines = value.split('\n');
                if let Some(first) = lines.next() {
                    out.push_str(first);
                }
                out.push('\n');
                for cont in lines {
                    out.push('\t');
                    out.push_str(cont);
                    out.push('\n');
                }
            }
            out.push('\n');
        }
        out
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
