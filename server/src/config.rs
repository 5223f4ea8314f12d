use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Huddle room coordinator
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "huddle-server", version, about = "Huddle room session coordinator")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "HUDDLE_PORT", default_value = "4000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HUDDLE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./huddle.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "HUDDLE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "HUDDLE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Lifetime of locally issued tokens, in seconds
    #[arg(long, env = "HUDDLE_LOCAL_TOKEN_TTL_SECS", default_value = "86400")]
    pub local_token_ttl_secs: i64,

    /// Print a locally signed token for this user id and exit (development)
    #[arg(long, value_name = "USER_ID")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_token: Option<String>,

    /// Email claim for --issue-token
    #[arg(long, requires = "issue_token")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Federated identity provider (loaded from [federated] section in TOML)
    #[arg(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federated: Option<FederatedConfig>,
}

/// Tokens minted by an external identity provider, verified offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederatedConfig {
    /// Accept federated tokens when local verification fails (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Required `iss` claim
    #[serde(default)]
    pub issuer: String,

    /// Required `aud` claim
    #[serde(default)]
    pub audience: String,

    /// Signing algorithm, e.g. "RS256", "ES256", "EdDSA" (default: RS256)
    #[serde(default = "default_federated_algorithm")]
    pub algorithm: String,

    /// PEM files holding the provider's public keys
    #[serde(default)]
    pub public_key_paths: Vec<String>,
}

impl Default for FederatedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer: String::new(),
            audience: String::new(),
            algorithm: default_federated_algorithm(),
            public_key_paths: Vec::new(),
        }
    }
}

fn default_federated_algorithm() -> String {
    "RS256".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            bind_address: "0.0.0.0".to_string(),
            config: "./huddle.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            local_token_ttl_secs: 86400,
            issue_token: None,
            email: None,
            federated: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (HUDDLE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        Self::figment(cli).extract()
    }

    fn figment(cli: Config) -> Figment {
        let config_path = cli.config.clone();
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("HUDDLE_").split("__"))
            .merge(Serialized::defaults(cli))
    }

    /// The `[federated]` section, if present and enabled.
    pub fn federated(&self) -> Option<&FederatedConfig> {
        self.federated.as_ref().filter(|f| f.enabled)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Huddle Room Coordinator Configuration
# Place this file at ./huddle.toml or specify with --config <path>
# All settings can be overridden via environment variables (HUDDLE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4000)
# port = 4000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and token signing key
# data_dir = "./data"

# Lifetime of locally issued tokens in seconds (default: 86400 = 24 hours)
# local_token_ttl_secs = 86400

# ---- Federated Identity ----
# Tokens that fail local verification are checked against these keys.
# [federated]
# enabled = false
# issuer = "https://idp.example.com"
# audience = "huddle"
# algorithm = "RS256"           # RS256, ES256, EdDSA, ...
# public_key_paths = ["./data/idp_public.pem"]
"#
    .to_string()
}
