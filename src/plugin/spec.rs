use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Credential placeholder that makes git fail fast instead of prompting for
/// a username on private or missing GitHub repositories.
const GITHUB_FALLBACK_PREFIX: &str = "https://git::@github.com/";

static TMUX_PLUGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*set(?:-option)?\s+(?:-[a-zA-Z]+\s+)*@plugin\s+(?:'([^']*)'|"([^"]*)"|(\S+))"#)
        .expect("valid @plugin regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("empty plugin spec")]
    Empty,
    #[error("plugin spec {0:?} has no usable name")]
    NoName(String),
    #[error("plugin name {0:?} is not a single directory name")]
    InvalidName(String),
    #[error("plugin spec {spec:?}: unknown option {option:?}")]
    UnknownOption { spec: String, option: String },
}

/// Declared identity of a plugin: `locator[#branch][ alias=name]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    pub name: String,
    pub clone_spec: String,
    pub branch: Option<String>,
}

impl PluginSpec {
    pub fn parse(raw: &str) -> Result<Self, SpecError> {
        let mut parts = raw.split_whitespace();
        let head = parts.next().ok_or(SpecError::Empty)?;

        let mut alias = None;
        for option in parts {
            match option.split_once('=') {
                Some(("alias", value)) if !value.is_empty() => alias = Some(value.to_string()),
                _ => {
                    return Err(SpecError::UnknownOption {
                        spec: raw.to_string(),
                        option: option.to_string(),
                    });
                }
            }
        }

        let (clone_spec, branch) = match head.split_once('#') {
            Some((locator, branch)) if !branch.is_empty() => (locator, Some(branch.to_string())),
            Some((locator, _)) => (locator, None),
            None => (head, None),
        };
        if clone_spec.is_empty() {
            return Err(SpecError::Empty);
        }

        let name = match alias {
            Some(alias) => alias,
            None => name_from_locator(clone_spec).ok_or_else(|| SpecError::NoName(raw.to_string()))?,
        };
        if !is_valid_name(&name) {
            return Err(SpecError::InvalidName(name));
        }

        Ok(Self {
            name,
            clone_spec: clone_spec.to_string(),
            branch,
        })
    }
}

impl fmt::Display for PluginSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clone_spec)?;
        if let Some(branch) = &self.branch {
            write!(f, "#{branch}")?;
        }
        if name_from_locator(&self.clone_spec).as_deref() != Some(self.name.as_str()) {
            write!(f, " alias={}", self.name)?;
        }
        Ok(())
    }
}

/// Last path segment of a locator with any `.git` suffix removed.
pub fn name_from_locator(locator: &str) -> Option<String> {
    let trimmed = locator.trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed
        .rsplit(['/', ':'])
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Whether `name` joins onto the plugin root as exactly one child directory.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Expand bare `owner/repo` shorthand into a fully-qualified GitHub URL.
/// Anything that already looks like a URL or a path is returned unchanged.
pub fn normalize_locator(locator: &str) -> String {
    if is_shorthand(locator) {
        format!("{GITHUB_FALLBACK_PREFIX}{locator}")
    } else {
        locator.to_string()
    }
}

fn is_shorthand(locator: &str) -> bool {
    if locator.contains("://") || locator.contains(':') || locator.starts_with(['/', '.', '~']) {
        return false;
    }
    let mut segments = locator.split('/');
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty()
    )
}

/// Raw plugin specs declared in tmux.conf text, in file order.
pub fn scan_tmux_conf(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| TMUX_PLUGIN_RE.captures(line))
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|spec| !spec.is_empty())
        .collect()
}

/// Parse raw specs, skipping malformed entries and later duplicates by name.
pub fn parse_all(raw: &[String]) -> Vec<PluginSpec> {
    let mut seen = HashSet::new();
    let mut specs = Vec::new();

    for entry in raw {
        match PluginSpec::parse(entry) {
            Ok(spec) => {
                if seen.insert(spec.name.clone()) {
                    specs.push(spec);
                } else {
                    tracing::debug!("duplicate plugin declaration ignored: {entry}");
                }
            }
            Err(err) => tracing::warn!("skipping plugin spec: {err}"),
        }
    }

    specs
}
