//! Stack configuration
//!
//! Every field has a default matching the reference demo environment, so an
//! empty JSON object (or no file at all) yields a complete configuration.
//! Validation is done via `garde::Validate`.

use crate::defaults::{
    default_gradio_image, default_max_azs, default_model_id, default_notebook_instance_type,
    default_notebook_models, default_phoenix_image, default_region, default_stack_name,
    default_task_cpu, default_task_memory, default_vpc_cidr,
};
use crate::error::ConfigError;
use garde::Validate;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters of the demo stack
#[derive(Debug, Clone, Serialize, Deserialize, garde::Validate)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// Prefix for provider-side resource names
    #[serde(default = "default_stack_name")]
    #[garde(length(min = 1, max = 32), pattern(r"^[a-z][a-z0-9-]*$"))]
    pub stack_name: String,

    /// Region the stack is deployed to
    #[serde(default = "default_region")]
    #[garde(length(min = 1))]
    pub region: String,

    /// Network address space (IPv4 CIDR)
    #[serde(default = "default_vpc_cidr")]
    #[garde(custom(validate_cidr))]
    pub vpc_cidr: String,

    /// Availability zones the network spans
    #[serde(default = "default_max_azs")]
    #[garde(range(min = 1, max = 6))]
    pub max_azs: u8,

    /// Task CPU units
    #[serde(default = "default_task_cpu")]
    #[garde(range(min = 256))]
    pub task_cpu: u32,

    /// Task memory in MiB
    #[serde(default = "default_task_memory")]
    #[garde(range(min = 512))]
    pub task_memory: u32,

    /// Image of the chat front-end container
    #[serde(default = "default_gradio_image")]
    #[garde(length(min = 1))]
    pub gradio_image: String,

    /// Image of the tracing collector container
    #[serde(default = "default_phoenix_image")]
    #[garde(length(min = 1))]
    pub phoenix_image: String,

    /// Model id passed to the chat front-end
    #[serde(default = "default_model_id")]
    #[garde(length(min = 1))]
    pub model_id: String,

    /// Models the notebook role may invoke
    #[serde(default = "default_notebook_models")]
    #[garde(length(min = 1), inner(length(min = 1)))]
    pub notebook_models: Vec<String>,

    /// Notebook instance size
    #[serde(default = "default_notebook_instance_type")]
    #[garde(length(min = 1))]
    pub notebook_instance_type: String,
}

fn validate_cidr(value: &str, _ctx: &()) -> garde::Result {
    // A bare address would parse as a /32
    if !value.contains('/') {
        return Err(garde::Error::new(format!("'{value}' has no prefix length")));
    }
    value
        .parse::<Ipv4Network>()
        .map(|_| ())
        .map_err(|_| garde::Error::new(format!("'{value}' is not an IPv4 CIDR block")))
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: default_stack_name(),
            region: default_region(),
            vpc_cidr: default_vpc_cidr(),
            max_azs: default_max_azs(),
            task_cpu: default_task_cpu(),
            task_memory: default_task_memory(),
            gradio_image: default_gradio_image(),
            phoenix_image: default_phoenix_image(),
            model_id: default_model_id(),
            notebook_models: default_notebook_models(),
            notebook_instance_type: default_notebook_instance_type(),
        }
    }
}

impl StackConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::io(path.display().to_string(), e))?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Run field validation
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|report| ConfigError::Invalid(report.to_string()))
    }

    /// Provider-side name for a resource of this stack
    pub fn resource_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.stack_name, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = StackConfig::default();
        config.check().unwrap();
        assert_eq!(config.stack_name, "phoenix-demo");
        assert_eq!(config.max_azs, 2);
        assert_eq!(config.vpc_cidr, "10.0.0.0/16");
    }

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = StackConfig::from_json("{}").unwrap();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.notebook_models.len(), 3);
    }

    #[test]
    fn test_load_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "stack_name": "phoenix-test",
                "region": "us-west-2",
                "max_azs": 3
            }}"#
        )
        .unwrap();

        let config = StackConfig::load(file.path()).unwrap();
        assert_eq!(config.stack_name, "phoenix-test");
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.max_azs, 3);
        assert_eq!(config.resource_name("db"), "phoenix-test-db");
    }

    #[test]
    fn test_rejects_unknown_fields() {
        let err = StackConfig::from_json(r#"{"stack": "x"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_rejects_bad_cidr() {
        let err = StackConfig::from_json(r#"{"vpc_cidr": "10.0.0.0"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_azs() {
        let err = StackConfig::from_json(r#"{"max_azs": 0}"#).unwrap_err();
        assert!(err.to_string().contains("max_azs"));
    }

    #[test]
    fn test_rejects_empty_model_list() {
        let err = StackConfig::from_json(r#"{"notebook_models": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = StackConfig::load(Path::new("/nonexistent/stack.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
