use hyper::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Placeholder substituted with the proxy password in the workload command
pub const PASSWORD_PLACEHOLDER: &str = "{password}";
/// Placeholder substituted with the proxy port in the workload command
pub const PORT_PLACEHOLDER: &str = "{port}";

/// Global configuration for the shim
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Command authentication
    #[serde(default)]
    pub auth: AuthConfig,

    /// Hosting platform conventions (probe and fault headers)
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Cloud provider credentials and endpoints
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Public address allocation parameters
    #[serde(default)]
    pub address: AddressConfig,

    /// Workload (container group) parameters
    #[serde(default)]
    pub workload: WorkloadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen port (default: 9000, overridden by FC_SERVER_PORT)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Serialize start/stop commands through a single in-process gate.
    /// Off by default: concurrent commands race at the provider level.
    #[serde(default)]
    pub serialize_commands: bool,
}

impl ServerConfig {
    /// Listen address; IPv6 binds such as "::" need no brackets
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address '{}': {}", self.bind, e))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            serialize_commands: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Shared secret used to derive command tokens (overridden by PROXYSHIM_SECRET)
    #[serde(default)]
    pub secret: String,

    /// Accepted clock difference between command timestamp and now, in seconds
    #[serde(default = "default_replay_window")]
    pub replay_window_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            replay_window_secs: default_replay_window(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PlatformConfig {
    /// Request header that marks platform lifecycle probes
    #[serde(default = "default_control_header")]
    pub control_header: String,

    /// Value of the control header answered as an initialize probe
    #[serde(default = "default_initialize_value")]
    pub initialize_value: String,

    /// Response header set when a request hit an unexpected fault
    #[serde(default = "default_fault_status_header")]
    pub fault_status_header: String,

    /// Value of the fault status header
    #[serde(default = "default_fault_status_value")]
    pub fault_status_value: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            control_header: default_control_header(),
            initialize_value: default_initialize_value(),
            fault_status_header: default_fault_status_header(),
            fault_status_value: default_fault_status_value(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Region all resources are created in
    #[serde(default)]
    pub region_id: String,

    /// Access key id (overridden by ALIBABA_CLOUD_ACCESS_KEY_ID)
    #[serde(default)]
    pub access_key_id: String,

    /// Access key secret (overridden by ALIBABA_CLOUD_ACCESS_KEY_SECRET)
    #[serde(default)]
    pub access_key_secret: String,

    /// VPC API endpoint (default: https://vpc.{region}.aliyuncs.com)
    pub vpc_endpoint: Option<String>,

    /// ECI API endpoint (default: https://eci.{region}.aliyuncs.com)
    pub eci_endpoint: Option<String>,

    /// Per-call timeout for provider requests in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            region_id: String::new(),
            access_key_id: String::new(),
            access_key_secret: String::new(),
            vpc_endpoint: None,
            eci_endpoint: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn vpc_endpoint(&self) -> String {
        self.vpc_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://vpc.{}.aliyuncs.com", self.region_id))
    }

    pub fn eci_endpoint(&self) -> String {
        self.eci_endpoint
            .clone()
            .unwrap_or_else(|| format!("https://eci.{}.aliyuncs.com", self.region_id))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AddressConfig {
    /// Peak bandwidth in Mbps
    #[serde(default = "default_bandwidth")]
    pub bandwidth: String,

    #[serde(default = "default_instance_charge_type")]
    pub instance_charge_type: String,

    #[serde(default = "default_internet_charge_type")]
    pub internet_charge_type: String,
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            bandwidth: default_bandwidth(),
            instance_charge_type: default_instance_charge_type(),
            internet_charge_type: default_internet_charge_type(),
        }
    }
}

/// Configuration for the proxy workload
///
/// # Security Warning
///
/// `command_template` is run by `/bin/sh -c` inside the container. The
/// password and port from each start command are substituted into it.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkloadConfig {
    /// Zone to place the container group in (provider picks one if unset)
    pub zone_id: Option<String>,

    #[serde(default)]
    pub security_group_id: String,

    #[serde(default)]
    pub vswitch_id: String,

    #[serde(default = "default_group_name")]
    pub group_name: String,

    #[serde(default = "default_restart_policy")]
    pub restart_policy: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// vCPU count
    #[serde(default = "default_cpu")]
    pub cpu: f64,

    /// Memory in GiB
    #[serde(default = "default_memory")]
    pub memory: f64,

    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,

    #[serde(default = "default_working_dir")]
    pub working_dir: String,

    /// Shell command started in the container; `{password}` and `{port}` are substituted
    #[serde(default = "default_command_template")]
    pub command_template: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            zone_id: None,
            security_group_id: String::new(),
            vswitch_id: String::new(),
            group_name: default_group_name(),
            restart_policy: default_restart_policy(),
            image: default_image(),
            container_name: default_container_name(),
            cpu: default_cpu(),
            memory: default_memory(),
            image_pull_policy: default_image_pull_policy(),
            working_dir: default_working_dir(),
            command_template: default_command_template(),
        }
    }
}

impl WorkloadConfig {
    /// Render the container start command for one deployment
    pub fn render_command(&self, password: &str, port: u16) -> String {
        self.command_template
            .replace(PORT_PLACEHOLDER, &port.to_string())
            .replace(PASSWORD_PLACEHOLDER, password)
    }
}

// Default value functions
fn default_listen_port() -> u16 {
    9000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_replay_window() -> u64 {
    120
}

fn default_control_header() -> String {
    "x-fc-control-path".to_string()
}

fn default_initialize_value() -> String {
    "/initialize".to_string()
}

fn default_fault_status_header() -> String {
    "x-fc-status".to_string()
}

fn default_fault_status_value() -> String {
    "404".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_bandwidth() -> String {
    "200".to_string()
}

fn default_instance_charge_type() -> String {
    "PostPaid".to_string()
}

fn default_internet_charge_type() -> String {
    "PayByTraffic".to_string()
}

fn default_group_name() -> String {
    "proxyshim".to_string()
}

fn default_restart_policy() -> String {
    "Always".to_string()
}

fn default_image() -> String {
    "registry-vpc.ap-southeast-1.aliyuncs.com/eci_open/centos:7".to_string()
}

fn default_container_name() -> String {
    "proxy".to_string()
}

fn default_cpu() -> f64 {
    0.25
}

fn default_memory() -> f64 {
    0.5
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_working_dir() -> String {
    "/home".to_string()
}

fn default_command_template() -> String {
    "curl -L -O https://github.com/shadowsocks/go-shadowsocks2/releases/download/v0.1.0/shadowsocks2-linux.gz; \
     gunzip shadowsocks2-linux.gz; chmod 755 shadowsocks2-linux; \
     ./shadowsocks2-linux -s 'ss://AEAD_CHACHA20_POLY1305:{password}@:{port}' -verbose"
        .to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("FC_SERVER_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(secret) = lookup("PROXYSHIM_SECRET") {
            self.auth.secret = secret;
        }
        if let Some(id) = lookup("ALIBABA_CLOUD_ACCESS_KEY_ID") {
            self.provider.access_key_id = id;
        }
        if let Some(secret) = lookup("ALIBABA_CLOUD_ACCESS_KEY_SECRET") {
            self.provider.access_key_secret = secret;
        }
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.server.socket_addr() {
            errors.push(e.to_string());
        }
        if self.auth.secret.is_empty() {
            errors.push("auth.secret must be set".to_string());
        }
        if self.provider.region_id.is_empty() {
            errors.push("provider.region_id must be set".to_string());
        }
        if self.provider.access_key_id.is_empty() || self.provider.access_key_secret.is_empty() {
            errors.push("provider access key id and secret must be set".to_string());
        }
        if self.workload.security_group_id.is_empty() {
            errors.push("workload.security_group_id must be set".to_string());
        }
        if self.workload.vswitch_id.is_empty() {
            errors.push("workload.vswitch_id must be set".to_string());
        }
        for (field, name) in [
            ("platform.control_header", &self.platform.control_header),
            ("platform.fault_status_header", &self.platform.fault_status_header),
        ] {
            if HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(format!("{} '{}' is not a valid header name", field, name));
            }
        }
        if HeaderValue::from_str(&self.platform.fault_status_value).is_err() {
            errors.push("platform.fault_status_value is not a valid header value".to_string());
        }
        for placeholder in [PASSWORD_PLACEHOLDER, PORT_PLACEHOLDER] {
            if !self.workload.command_template.contains(placeholder) {
                errors.push(format!(
                    "workload.command_template must contain '{}'",
                    placeholder
                ));
            }
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}
