use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use client_core::{ControllerConfig, EndpointRoutes, ProgressConfig};
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "review.toml";

/// Environment prefixes, lowest precedence first.
const ENV_PREFIXES: [&str; 2] = ["REVIEW_", "APP__"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub legacy_routes: bool,
    pub poll_interval_ms: u64,
    pub max_consecutive_failures: u32,
    pub max_poll_duration_secs: u64,
    pub request_timeout_secs: u64,
    pub max_document_bytes: u64,
    pub progress_initial_offset: u8,
    pub progress_base_step: u8,
    pub progress_jitter_span: u8,
    pub progress_cap: u8,
}

impl Default for Settings {
    fn default() -> Self {
        let progress = ProgressConfig::default();
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            legacy_routes: false,
            poll_interval_ms: 2000,
            max_consecutive_failures: 3,
            max_poll_duration_secs: 600,
            request_timeout_secs: 30,
            max_document_bytes: 10 * 1024 * 1024,
            progress_initial_offset: progress.initial_offset,
            progress_base_step: progress.base_step,
            progress_jitter_span: progress.jitter_span,
            progress_cap: progress.cap_before_completion,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    legacy_routes: Option<bool>,
    poll_interval_ms: Option<u64>,
    max_consecutive_failures: Option<u32>,
    max_poll_duration_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    max_document_bytes: Option<u64>,
    progress_initial_offset: Option<u8>,
    progress_base_step: Option<u8>,
    progress_jitter_span: Option<u8>,
    progress_cap: Option<u8>,
}

impl Settings {
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_consecutive_failures: self.max_consecutive_failures,
            max_poll_duration: Duration::from_secs(self.max_poll_duration_secs),
            progress: ProgressConfig {
                initial_offset: self.progress_initial_offset,
                base_step: self.progress_base_step,
                jitter_span: self.progress_jitter_span,
                cap_before_completion: self.progress_cap,
            },
        }
    }

    pub fn routes(&self) -> EndpointRoutes {
        if self.legacy_routes {
            EndpointRoutes::legacy_review_api()
        } else {
            EndpointRoutes::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.legacy_routes {
            self.legacy_routes = v;
        }
        if let Some(v) = file.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = file.max_consecutive_failures {
            self.max_consecutive_failures = v;
        }
        if let Some(v) = file.max_poll_duration_secs {
            self.max_poll_duration_secs = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = file.max_document_bytes {
            self.max_document_bytes = v;
        }
        if let Some(v) = file.progress_initial_offset {
            self.progress_initial_offset = v;
        }
        if let Some(v) = file.progress_base_step {
            self.progress_base_step = v;
        }
        if let Some(v) = file.progress_jitter_span {
            self.progress_jitter_span = v;
        }
        if let Some(v) = file.progress_cap {
            self.progress_cap = v;
        }
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for prefix in ENV_PREFIXES {
            let var = |key: &str| lookup(&format!("{prefix}{key}"));

            if let Some(v) = var("SERVER_URL") {
                self.server_url = v;
            }
            if let Some(v) = var("LEGACY_ROUTES") {
                match parse_flag(&v) {
                    Some(flag) => self.legacy_routes = flag,
                    None => warn!(key = %format!("{prefix}LEGACY_ROUTES"), value = %v, "ignoring non-boolean setting"),
                }
            }
            override_parsed(&mut self.poll_interval_ms, prefix, "POLL_INTERVAL_MS", &var);
            override_parsed(
                &mut self.max_consecutive_failures,
                prefix,
                "MAX_CONSECUTIVE_FAILURES",
                &var,
            );
            override_parsed(
                &mut self.max_poll_duration_secs,
                prefix,
                "MAX_POLL_DURATION_SECS",
                &var,
            );
            override_parsed(&mut self.request_timeout_secs, prefix, "REQUEST_TIMEOUT_SECS", &var);
            override_parsed(&mut self.max_document_bytes, prefix, "MAX_DOCUMENT_BYTES", &var);
        }
    }
}

fn override_parsed<T: FromStr>(
    target: &mut T,
    prefix: &str,
    key: &str,
    var: &impl Fn(&str) -> Option<String>,
) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key = %format!("{prefix}{key}"), value = %raw, "ignoring unparsable setting"),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Defaults, then the TOML file, then environment variables.
///
/// A missing `review.toml` in the working directory is fine; an explicitly
/// requested file must exist and parse.
pub fn load_settings(explicit_path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    let path = explicit_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    match fs::read_to_string(&path) {
        Ok(raw) => {
            let file: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            settings.apply_file(file);
        }
        Err(err) if explicit_path.is_none() && err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    Ok(settings)
}
