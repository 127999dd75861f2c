//! MW-006: Stack file parsing and validation.
//!
//! Parses stack.yaml and validates what can be checked without a provider:
//! - Version must be "1.0"
//! - Stack name and region are well formed
//! - Network, storage, function and build sections are consistent
//!
//! Memory increments and concurrency quotas are left to the provider.

use super::error::{StackError, StackResult};
use super::types::*;
use crate::resources::build::is_valid_identifier;
use crate::resources::storage::{is_octal_mode, ThroughputMode};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn err(message: String) -> ValidationError {
    ValidationError { message }
}

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").expect("static regex"))
}

fn region_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-[0-9]+$").expect("static regex"))
}

/// Parse a stack.yaml file from disk.
pub fn parse_config_file(path: &Path) -> StackResult<StackConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| StackError::config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_config(&content)
}

/// Parse a stack.yaml from a string.
pub fn parse_config(yaml: &str) -> StackResult<StackConfig> {
    serde_yaml_ng::from_str(yaml).map_err(|e| StackError::config(format!("YAML parse error: {}", e)))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(err(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }

    if config.name.is_empty() {
        errors.push(err("name must not be empty".to_string()));
    } else if !name_re().is_match(&config.name) {
        errors.push(err(format!(
            "name '{}' must be lowercase letters, digits and dashes",
            config.name
        )));
    }

    if !region_re().is_match(&config.region) {
        errors.push(err(format!("region '{}' is not a valid region", config.region)));
    }

    if let Some(ref pkgs) = config.params.install_packages {
        if pkgs.trim().is_empty() {
            errors.push(err("params.install_packages must not be empty".to_string()));
        }
    }

    validate_network(&config.network, &mut errors);
    validate_storage(&config.storage, &mut errors);
    validate_function(&config.function, &mut errors);
    validate_build(&config.build, &mut errors);

    if config.policy.build_failure == BuildFailurePolicy::Fatal
        && config.policy.build_poll_attempts == 0
    {
        errors.push(err(
            "policy.build_poll_attempts must be positive with build_failure: fatal".to_string(),
        ));
    }

    errors
}

fn validate_network(network: &NetworkConfig, errors: &mut Vec<ValidationError>) {
    if network.max_azs == 0 {
        errors.push(err("network.max_azs must be at least 1".to_string()));
    }
    if network.nat_gateways > network.max_azs {
        errors.push(err(format!(
            "network.nat_gateways ({}) exceeds network.max_azs ({})",
            network.nat_gateways, network.max_azs
        )));
    }
}

fn validate_storage(storage: &StorageConfig, errors: &mut Vec<ValidationError>) {
    match (storage.throughput_mode, storage.provisioned_mibps) {
        (ThroughputMode::Provisioned, Some(0)) => {
            errors.push(err(
                "storage.provisioned_mibps must be positive in provisioned mode".to_string(),
            ));
        }
        (ThroughputMode::Bursting, Some(_)) => {
            errors.push(err(
                "storage.provisioned_mibps is only valid in provisioned mode".to_string(),
            ));
        }
        _ => {}
    }
    if !storage.access_point_path.starts_with('/') {
        errors.push(err(format!(
            "storage.access_point_path '{}' must be absolute",
            storage.access_point_path
        )));
    }
    if !is_octal_mode(&storage.permissions) {
        errors.push(err(format!(
            "storage.permissions '{}' must be 3 or 4 octal digits",
            storage.permissions
        )));
    }
}

fn validate_function(function: &FunctionConfig, errors: &mut Vec<ValidationError>) {
    if function.runtime.is_empty() {
        errors.push(err("function.runtime must not be empty".to_string()));
    }
    if function.handler.is_empty() {
        errors.push(err("function.handler must not be empty".to_string()));
    }
    if function.timeout_seconds == 0 {
        errors.push(err("function.timeout_seconds must be positive".to_string()));
    }
    if !(128..=10_240).contains(&function.memory_mb) {
        errors.push(err(format!(
            "function.memory_mb {} is outside 128..=10240",
            function.memory_mb
        )));
    }
    if function.reserved_concurrency == 0 {
        errors.push(err(
            "function.reserved_concurrency must be positive".to_string(),
        ));
    }
    if !function.mount_path.starts_with("/mnt/") {
        errors.push(err(format!(
            "function.mount_path '{}' must be under /mnt/",
            function.mount_path
        )));
    }
}

fn validate_build(build: &BuildConfig, errors: &mut Vec<ValidationError>) {
    if build.name.trim().is_empty() {
        errors.push(err("build.name must not be empty".to_string()));
    }
    if build.image.is_empty() {
        errors.push(err("build.image must not be empty".to_string()));
    }
    if build.timeout_minutes == 0 {
        errors.push(err("build.timeout_minutes must be positive".to_string()));
    }
    if !build.mount_path.starts_with('/') {
        errors.push(err(format!(
            "build.mount_path '{}' must be absolute",
            build.mount_path
        )));
    }
    if !is_valid_identifier(&build.identifier) {
        errors.push(err(format!(
            "build.identifier '{}' must start with a letter and be alphanumeric",
            build.identifier
        )));
    }
    if build.model_url.is_empty() {
        errors.push(err("build.model_url must not be empty".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> StackConfig {
        parse_config(yaml).unwrap()
    }

    #[test]
    fn test_mw006_parse_valid() {
        let config = parse("version: \"1.0\"\nname: lambda-efs-ml\n");
        let errors = validate_config(&config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_mw006_bad_version() {
        let config = parse("version: \"2.0\"\nname: ml\n");
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("version")));
    }

    #[test]
    fn test_mw006_bad_name_and_region() {
        let config = parse("version: \"1.0\"\nname: My_Stack\nregion: mars\n");
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("name 'My_Stack'"));
        assert!(errors[1].message.contains("region 'mars'"));
    }

    #[test]
    fn test_mw006_yaml_error_is_configuration() {
        let e = parse_config("version: [").unwrap_err();
        assert!(e.is_configuration());
        assert!(e.to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_mw006_missing_file() {
        let e = parse_config_file(Path::new("/nonexistent/stack.yaml")).unwrap_err();
        assert!(e.to_string().contains("failed to read"));
    }

    #[test]
    fn test_mw006_network_nat_exceeds_azs() {
        let config = parse(
            r#"
version: "1.0"
name: ml
network:
  max_azs: 1
  nat_gateways: 2
"#,
        );
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("nat_gateways (2)")));
    }

    #[test]
    fn test_mw006_bursting_alone_is_valid() {
        let config = parse(
            r#"
version: "1.0"
name: ml
storage:
  throughput_mode: bursting
"#,
        );
        let errors = validate_config(&config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
    }

    #[test]
    fn test_mw006_throughput_rate_mismatch() {
        let config = parse(
            r#"
version: "1.0"
name: ml
storage:
  throughput_mode: bursting
  provisioned_mibps: 512
"#,
        );
        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("only valid in provisioned mode")));
    }

    #[test]
    fn test_mw006_zero_rate_rejected() {
        let config = parse("version: \"1.0\"\nname: ml\nstorage:\n  provisioned_mibps: 0\n");
        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("must be positive in provisioned mode")));
    }

    #[test]
    fn test_mw006_function_limits() {
        let config = parse(
            r#"
version: "1.0"
name: ml
function:
  memory_mb: 64
  reserved_concurrency: 0
  mount_path: /opt/python
"#,
        );
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_mw006_build_identifier_and_permissions() {
        let config = parse(
            r#"
version: "1.0"
name: ml
storage:
  permissions: "rwx"
build:
  identifier: "1efs"
"#,
        );
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("octal")));
        assert!(errors.iter().any(|e| e.message.contains("build.identifier")));
    }

    #[test]
    fn test_mw006_empty_install_packages() {
        let config = parse(
            r#"
version: "1.0"
name: ml
params:
  install_packages: "  "
"#,
        );
        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("install_packages")));
    }

    #[test]
    fn test_mw006_fatal_policy_needs_polls() {
        let config = parse(
            r#"
version: "1.0"
name: ml
policy:
  build_failure: fatal
  build_poll_attempts: 0
"#,
        );
        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("build_poll_attempts")));
    }
}
