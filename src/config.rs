use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Global configuration for the gateway
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// The application process being fronted
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Port the gateway listens on (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Maximum idle upstream connections kept open (default: 10)
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Idle upstream connection timeout in seconds (default: 90)
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_listen_port(),
            bind: default_bind_address(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

/// A command to run, either as `command` + `args` or as a single
/// shell-quoted `command` string.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CommandConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Resolve to program + arguments
    pub fn argv(&self) -> Result<(String, Vec<String>), String> {
        if !self.args.is_empty() {
            return Ok((self.command.clone(), self.args.clone()));
        }

        let mut words = shell_words::split(&self.command).map_err(|e| e.to_string())?;
        if words.is_empty() {
            return Err("empty command".to_string());
        }
        let program = words.remove(0);
        Ok((program, words))
    }

    /// Human-readable form for logging
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

/// Configuration for the upstream application process
#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Loopback port the application listens on, exported to it as PORT
    #[serde(default = "default_upstream_port")]
    pub port: u16,

    /// Working directory for both install and start commands
    pub working_dir: Option<String>,

    /// Dependency installation step run to completion before launch
    #[serde(default = "default_install_command")]
    pub install: CommandConfig,

    /// Skip the install step entirely
    #[serde(default)]
    pub skip_install: bool,

    /// Long-running application command
    #[serde(default = "default_start_command")]
    pub start: CommandConfig,

    /// Extra environment variables for the application
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Substrings on the application's stdout that mean it is ready
    #[serde(default = "default_ready_markers")]
    pub ready_markers: Vec<String>,

    /// Seconds to wait for a readiness marker before serving traffic anyway
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Grace period in seconds between SIGTERM and SIGKILL on shutdown
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            port: default_upstream_port(),
            working_dir: None,
            install: default_install_command(),
            skip_install: false,
            start: default_start_command(),
            env: HashMap::new(),
            ready_markers: default_ready_markers(),
            startup_timeout_secs: default_startup_timeout(),
            shutdown_grace_period_secs: default_shutdown_grace_period(),
        }
    }
}

impl UpstreamConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// The install step, if enabled
    pub fn install_step(&self) -> Option<&CommandConfig> {
        if self.skip_install {
            None
        } else {
            Some(&self.install)
        }
    }

    /// Whether a line of application output signals readiness
    pub fn is_ready_line(&self, line: &str) -> bool {
        self.ready_markers.iter().any(|marker| line.contains(marker.as_str()))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("upstream.port must be non-zero".to_string());
        }
        if self.start.command.trim().is_empty() {
            return Err("upstream.start.command must not be empty".to_string());
        }
        if !self.skip_install && self.install.command.trim().is_empty() {
            return Err("upstream.install.command must not be empty (set skip_install = true to disable)".to_string());
        }
        if self.ready_markers.is_empty() {
            return Err("upstream.ready_markers must contain at least one marker".to_string());
        }
        if self.ready_markers.iter().any(|m| m.is_empty()) {
            return Err("upstream.ready_markers must not contain an empty marker".to_string());
        }
        Ok(())
    }
}

fn default_listen_port() -> u16 {
    8080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_pool_max_idle_per_host() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

fn default_upstream_port() -> u16 {
    3000
}

fn default_install_command() -> CommandConfig {
    CommandConfig::new("npm", &["install", "--omit=dev"])
}

fn default_start_command() -> CommandConfig {
    CommandConfig::new("npm", &["run", "start"])
}

fn default_ready_markers() -> Vec<String> {
    vec!["ready".to_string(), "started server".to_string()]
}

fn default_startup_timeout() -> u64 {
    60
}

fn default_shutdown_grace_period() -> u64 {
    5
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to built-in defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        info!(path = %path.display(), "No configuration file found, using defaults");
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.upstream
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))
    }
}
