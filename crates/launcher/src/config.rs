//! Typed parse of the `<PREFIX>_*` environment variables this binary
//! recognizes. Two prefixes are recognized; this implementation picks
//! `HART` as canonical and `AB64` as the alias (see DESIGN.md). An
//! unknown `<prefix>_*` name or a malformed value is a [`ConfigError`],
//! which `main` turns into a one-line diagnostic and a non-zero exit
//! before translation begins.

use std::path::PathBuf;

use thiserror::Error;

const PREFIXES: [&str; 2] = ["HART", "AB64"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown environment variable {name}")]
    UnknownVariable { name: String },
    #[error("{name}={value:?} is not a valid value for this variable")]
    InvalidValue { name: String, value: String },
}

/// One knob per recognized environment variable, already parsed into
/// its natural type. Field names drop the shared `<prefix>_` part.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub print_ir: bool,
    pub disable_aot: bool,
    pub advertise_avx: bool,
    pub print_segments: bool,
    pub debugserver_port: Option<u32>,
    pub allow_guard_pages: bool,
    pub disable_sigaction: bool,
    pub disable_exceptions: bool,
    pub aot_errors_are_fatal: bool,
    pub hardware_tracing_path: Option<PathBuf>,
    pub scribble_translations: bool,
    pub memory_access_instrumentation: bool,
}

impl EnvConfig {
    /// Parses every `<prefix>_*` variable present in `vars` under
    /// either recognized prefix. An unrecognized suffix for a
    /// recognized prefix is fatal; variables outside both prefixes are
    /// ignored, since they belong to something else entirely.
    pub fn parse(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (name, value) in vars {
            let Some(suffix) = PREFIXES.iter().find_map(|p| name.strip_prefix(p).and_then(|s| s.strip_prefix('_'))) else {
                continue;
            };

            match suffix {
                "PRINT_IR" => config.print_ir = true,
                "DISABLE_AOT" => config.disable_aot = true,
                "ADVERTISE_AVX" => config.advertise_avx = parse_bool_digit(&name, &value)?,
                "PRINT_SEGMENTS" => config.print_segments = true,
                "DEBUGSERVER_PORT" => config.debugserver_port = Some(parse_port(&name, &value)?),
                "ALLOW_GUARD_PAGES" => config.allow_guard_pages = true,
                "DISABLE_SIGACTION" => config.disable_sigaction = true,
                "DISABLE_EXCEPTIONS" => config.disable_exceptions = true,
                "AOT_ERRORS_ARE_FATAL" => config.aot_errors_are_fatal = true,
                "HARDWARE_TRACING_PATH" => config.hardware_tracing_path = Some(PathBuf::from(value)),
                "SCRIBBLE_TRANSLATIONS" => config.scribble_translations = true,
                "MEMORY_ACCESS_INSTRUMENTATION" => config.memory_access_instrumentation = true,
                _ => return Err(ConfigError::UnknownVariable { name }),
            }
        }

        Ok(config)
    }

    /// Reads straight from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse(std::env::vars())
    }

    /// Effective filename for `_HARDWARE_TRACING_PATH`: `<value>.<pid>`.
    pub fn hardware_tracing_file(&self, pid: u32) -> Option<PathBuf> {
        self.hardware_tracing_path.as_ref().map(|base| {
            let mut name = base.clone().into_os_string();
            name.push(format!(".{pid}"));
            PathBuf::from(name)
        })
    }
}

fn parse_bool_digit(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(ConfigError::InvalidValue { name: name.to_string(), value: value.to_string() }),
    }
}

fn parse_port(name: &str, value: &str) -> Result<u32, ConfigError> {
    let port: u32 = value.parse().map_err(|_| ConfigError::InvalidValue { name: name.to_string(), value: value.to_string() })?;
    if port == 0 || port > 999_999 {
        return Err(ConfigError::InvalidValue { name: name.to_string(), value: value.to_string() });
    }
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn both_prefixes_parse_the_same_variable() {
        let canonical = EnvConfig::parse(vars(&[("HART_PRINT_IR", "1")])).unwrap();
        let alias = EnvConfig::parse(vars(&[("AB64_PRINT_IR", "1")])).unwrap();
        assert!(canonical.print_ir);
        assert!(alias.print_ir);
    }

    #[test]
    fn unrelated_variables_are_ignored() {
        let config = EnvConfig::parse(vars(&[("PATH", "/usr/bin"), ("HARTBEAT", "1")])).unwrap();
        assert!(!config.print_ir);
    }

    #[test]
    fn unknown_prefixed_name_is_an_error() {
        let err = EnvConfig::parse(vars(&[("HART_NONSENSE", "1")]));
        assert!(matches!(err, Err(ConfigError::UnknownVariable { .. })));
    }

    #[test]
    fn debugserver_port_rejects_zero_and_out_of_range() {
        assert!(EnvConfig::parse(vars(&[("HART_DEBUGSERVER_PORT", "0")])).is_err());
        assert!(EnvConfig::parse(vars(&[("HART_DEBUGSERVER_PORT", "1000000")])).is_err());
        assert!(EnvConfig::parse(vars(&[("HART_DEBUGSERVER_PORT", "4242")])).is_ok());
    }

    #[test]
    fn advertise_avx_requires_a_literal_digit() {
        assert!(EnvConfig::parse(vars(&[("HART_ADVERTISE_AVX", "yes")])).is_err());
        assert!(EnvConfig::parse(vars(&[("HART_ADVERTISE_AVX", "1")])).is_ok());
    }

    #[test]
    fn hardware_tracing_file_appends_the_pid() {
        let config = EnvConfig::parse(vars(&[("HART_HARDWARE_TRACING_PATH", "/tmp/trace")])).unwrap();
        assert_eq!(config.hardware_tracing_file(42), Some(PathBuf::from("/tmp/trace.42")));
    }
}
