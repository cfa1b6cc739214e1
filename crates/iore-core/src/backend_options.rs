use std::collections::BTreeMap;

use crate::error::{IoreError, Result};

/// Value of a backend-specific option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Boolean flag with no value (e.g., `--posix.direct_io`).
    Flag,
    /// String value (e.g., `--cstream.buffer_size=65536`).
    Str(String),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            OptionValue::Flag => None,
        }
    }

    /// Parse as a byte count. Flag is rejected.
    pub fn as_u64(&self, key: &str) -> Result<u64> {
        match self {
            OptionValue::Flag => Err(IoreError::config(key, "expects a value")),
            OptionValue::Str(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| IoreError::config(key, format!("invalid integer '{s}'"))),
        }
    }

    /// Parse as bool. Flag → true, "0"/"false"/"no" → false, otherwise true.
    pub fn as_bool(&self) -> bool {
        match self {
            OptionValue::Flag => true,
            OptionValue::Str(s) => !matches!(s.to_ascii_lowercase().as_str(), "0" | "false" | "no"),
        }
    }
}

/// Backend options keyed as `"prefix.key"`, from the command line and from
/// a test's `afio` parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOptions {
    opts: BTreeMap<String, OptionValue>,
}

impl BackendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: OptionValue) {
        self.opts.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.opts.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.opts.is_empty()
    }

    /// Options of one backend with the prefix stripped.
    ///
    /// `for_prefix("posix")` yields `("direct_io", &Flag)` for the option
    /// stored as `"posix.direct_io"`.
    pub fn for_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a OptionValue)> {
        let prefix_dot = format!("{}.", prefix);
        self.opts.iter().filter_map(move |(k, v)| {
            k.strip_prefix(&prefix_dot).map(|suffix| (suffix, v))
        })
    }

    /// Copy of `self` overlaid with a test's parameters for `prefix`.
    pub fn merged_with(&self, prefix: &str, params: &BTreeMap<String, String>) -> Self {
        let mut merged = self.clone();
        for (k, v) in params {
            merged.insert(format!("{prefix}.{k}"), OptionValue::Str(v.clone()));
        }
        merged
    }
}

/// Check if an argument looks like a backend option (`--word.word[.word...]`).
fn is_backend_option(arg: &str) -> bool {
    let Some(body) = arg.strip_prefix("--") else {
        return false;
    };
    let name = body.split('=').next().unwrap_or(body);
    let segments: Vec<&str> = name.split('.').collect();
    if segments.len() < 2 {
        return false;
    }
    segments
        .iter()
        .all(|s| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-'))
}

/// Split backend options out of raw command-line arguments.
///
/// Returns the arguments left for clap and the extracted options:
/// - `--prefix.key=value`  → `Str(value)`
/// - `--prefix.key value`  → `Str(value)` (if next arg doesn't start with `-`)
/// - `--prefix.key`        → `Flag`
pub fn extract_backend_options(args: Vec<String>) -> (Vec<String>, BackendOptions) {
    let mut filtered = Vec::new();
    let mut opts = BackendOptions::new();
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        let Some(body) = arg.strip_prefix("--").filter(|_| is_backend_option(&arg)) else {
            filtered.push(arg);
            continue;
        };

        if let Some((name, value)) = body.split_once('=') {
            opts.insert(name.to_string(), OptionValue::Str(value.to_string()));
        } else if let Some(value) = args.next_if(|next| !next.starts_with('-')) {
            opts.insert(body.to_string(), OptionValue::Str(value));
        } else {
            opts.insert(body.to_string(), OptionValue::Flag);
        }
    }

    (filtered, opts)
}
