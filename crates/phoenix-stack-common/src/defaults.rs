//! Default configuration values for the demo stack
//!
//! These constants keep the CLI, the topology and the tests in agreement.

/// Default stack name, used as a prefix for provider-side names
pub const DEFAULT_STACK_NAME: &str = "phoenix-demo";

/// Default region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default network address space
pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";

/// Default number of availability zones the network spans
pub const DEFAULT_MAX_AZS: u8 = 2;

/// Postgres listener port on the database cluster
pub const DATABASE_PORT: u16 = 5432;

/// Default database name and user
pub const DEFAULT_DATABASE_NAME: &str = "postgres";
pub const DEFAULT_DATABASE_USER: &str = "postgres";

/// Serverless database capacity bounds (capacity units)
pub const DEFAULT_DB_MIN_CAPACITY: f64 = 2.0;
pub const DEFAULT_DB_MAX_CAPACITY: f64 = 16.0;

/// Reserved port for encrypted management traffic to the notebook
pub const MANAGEMENT_PORT: u16 = 443;

/// Task size (CPU units / MiB)
pub const DEFAULT_TASK_CPU: u32 = 2048;
pub const DEFAULT_TASK_MEMORY: u32 = 4096;

/// Chat front-end container
pub const DEFAULT_GRADIO_IMAGE: &str = "PLACEHOLDER_PLEASE_REPLACE_WITH_YOUR_IMAGE";
pub const GRADIO_PORT: u16 = 7860;
pub const GRADIO_LISTENER_PORT: u16 = 80;

/// Tracing collector container
pub const DEFAULT_PHOENIX_IMAGE: &str = "arizephoenix/phoenix:version-4.26.0";
pub const PHOENIX_PORT: u16 = 6006;
pub const PHOENIX_HEALTH_CHECK_PATH: &str = "/healthz";

/// Model the chat front-end invokes
pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-5-sonnet-20240620-v1:0";

/// Models the notebook role may invoke
pub const DEFAULT_NOTEBOOK_MODELS: &[&str] = &[
    "amazon.titan-embed-text-v2:0",
    "anthropic.claude-3-sonnet-20240229-v1:0",
    "anthropic.claude-3-5-sonnet-20240620-v1:0",
];

/// Notebook instance size
pub const DEFAULT_NOTEBOOK_INSTANCE_TYPE: &str = "ml.t3.medium";

/// Container log retention in days
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 7;

/// Length of platform-generated secret strings
pub const DEFAULT_SECRET_LENGTH: usize = 32;

// Serde default functions for struct field defaults

/// Returns the default stack name
pub fn default_stack_name() -> String {
    DEFAULT_STACK_NAME.to_string()
}

/// Returns the default region
pub fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

/// Returns the default network address space
pub fn default_vpc_cidr() -> String {
    DEFAULT_VPC_CIDR.to_string()
}

/// Returns the default availability zone count
pub fn default_max_azs() -> u8 {
    DEFAULT_MAX_AZS
}

/// Returns the default chat front-end image
pub fn default_gradio_image() -> String {
    DEFAULT_GRADIO_IMAGE.to_string()
}

/// Returns the default tracing collector image
pub fn default_phoenix_image() -> String {
    DEFAULT_PHOENIX_IMAGE.to_string()
}

/// Returns the default model id
pub fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

/// Returns the default notebook model allow-list
pub fn default_notebook_models() -> Vec<String> {
    DEFAULT_NOTEBOOK_MODELS.iter().map(|m| m.to_string()).collect()
}

/// Returns the default notebook instance type
pub fn default_notebook_instance_type() -> String {
    DEFAULT_NOTEBOOK_INSTANCE_TYPE.to_string()
}

/// Returns the default task CPU units
pub fn default_task_cpu() -> u32 {
    DEFAULT_TASK_CPU
}

/// Returns the default task memory
pub fn default_task_memory() -> u32 {
    DEFAULT_TASK_MEMORY
}
