//! Image build configuration.
//!
//! The build configuration is a keyfile whose list-valued options can be
//! assembled from multiple layers: any option named `<opt>_add<suffix>`
//! contributes values and `<opt>_del<suffix>` retracts them, with the
//! suffixes keeping layered fragments apart. `merge()` collapses those into
//! the base option. A base option written directly always wins over the
//! unmerged variants.

use std::collections::BTreeMap;

use regex::Regex;

use crate::Error;
use crate::keyfile::{KeyFile, parse_bool};

/// (section pattern, option) pairs whose `_add`/`_del` variants are merged.
/// The section pattern may end in `*` to cover similarly named sections.
const MERGED_OPTIONS: &[(&str, &str)] = &[
    ("flatpak", "locales"),
    ("flatpak-remote-*", "apps"),
    ("flatpak-remote-*", "runtimes"),
    ("flatpak-remote-*", "exclude"),
    ("flatpak-remote-*", "allow_extra_data"),
    ("flatpak-remote-*", "nosplit"),
];

#[derive(Debug, Clone, Default)]
pub struct ImageConfig {
    keyfile: KeyFile,
}

impl ImageConfig {
    /// Parse configuration text and merge the layered list options.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let keyfile = KeyFile::parse(input).map_err(|e| Error::Config {
            message: format!("could not parse configuration: {}", e),
        })?;
        let mut config = Self { keyfile };
        config.merge();
        Ok(config)
    }

    pub fn get(&self, section: &str, option: &str) -> Option<&str> {
        self.keyfile.get(section, option)
    }

    pub fn get_or<'a>(&'a self, section: &str, option: &str, fallback: &'a str) -> &'a str {
        self.get(section, option).unwrap_or(fallback)
    }

    /// Boolean option with a fallback for missing values. A present but
    /// unparseable value is a configuration error.
    pub fn get_bool_or(&self, section: &str, option: &str, fallback: bool) -> Result<bool, Error> {
        match self.get(section, option) {
            None => Ok(fallback),
            Some(value) => parse_bool(value).ok_or_else(|| Error::Config {
                message: format!(
                    "option '{}' in section '{}' is not a boolean: '{}'",
                    option, section, value
                ),
            }),
        }
    }

    /// Whitespace-separated list option; missing means empty.
    pub fn get_list(&self, section: &str, option: &str) -> Vec<String> {
        self.get(section, option)
            .map(|v| v.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn sections(&self) -> impl Iterator<Item = &str> {
        self.keyfile.sections()
    }

    pub fn section_items(&self, section: &str) -> Option<&BTreeMap<String, String>> {
        self.keyfile.section(section)
    }

    pub fn set(&mut self, section: &str, option: &str, value: &str) {
        self.keyfile.set(section, option, value);
    }

    /// Collapse `<opt>_add*` / `<opt>_del*` variants into the base options.
    fn merge(&mut self) {
        for (pattern, option) in MERGED_OPTIONS {
            let regex = section_pattern(pattern);
            let sections: Vec<String> = self
                .keyfile
                .sections()
                .filter(|s| regex.is_match(s))
                .map(|s| s.to_string())
                .collect();

            for section in sections {
                self.merge_option(&section, option);
            }
        }
    }

    fn merge_option(&mut self, section: &str, option: &str) {
        let Some(items) = self.keyfile.section(section) else {
            return;
        };

        let add_prefix = format!("{}_add", option);
        let del_prefix = format!("{}_del", option);
        let add_opts: Vec<String> = items
            .keys()
            .filter(|k| k.starts_with(&add_prefix))
            .cloned()
            .collect();
        let del_opts: Vec<String> = items
            .keys()
            .filter(|k| k.starts_with(&del_prefix))
            .cloned()
            .collect();

        if items.contains_key(option) {
            // An explicitly written option overrides the unmerged variants.
            for opt in add_opts.iter().chain(del_opts.iter()) {
                self.keyfile.remove(section, opt);
            }
            return;
        }

        // Count additions and retractions; values with a positive count
        // survive, in first-appearance order.
        let mut counts: Vec<(String, i32)> = Vec::new();
        let mut bump = |counts: &mut Vec<(String, i32)>, value: &str, delta: i32| {
            if let Some(entry) = counts.iter_mut().find(|(v, _)| v == value) {
                entry.1 += delta;
            } else {
                counts.push((value.to_string(), delta));
            }
        };

        for opt in &add_opts {
            let values = self.keyfile.get(section, opt).unwrap_or("").to_string();
            for value in values.split_whitespace() {
                bump(&mut counts, value, 1);
            }
        }
        for opt in &del_opts {
            let values = self.keyfile.get(section, opt).unwrap_or("").to_string();
            for value in values.split_whitespace() {
                bump(&mut counts, value, -1);
            }
        }

        let merged: Vec<&str> = counts
            .iter()
            .filter(|(_, count)| *count > 0)
            .map(|(value, _)| value.as_str())
            .collect();
        self.keyfile.set(section, option, &merged.join("\n"));

        for opt in add_opts.iter().chain(del_opts.iter()) {
            self.keyfile.remove(section, opt);
        }
    }
}

fn section_pattern(pattern: &str) -> Regex {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    Regex::new(&format!("^{}$", escaped)).expect("valid section pattern")
}
