use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hard cap on rows sampled per table during schema analysis.
pub const MAX_SAMPLE_ROWS: usize = 5;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
    /// Open file databases in read-only access mode.
    pub read_only: bool,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    /// Safety limit on rows captured by the query executor.
    pub max_rows: usize,
    /// Rows sampled per table for the schema description (capped at 5).
    pub sample_rows: usize,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }

    pub fn sample_rows(&self) -> usize {
        self.sample_rows.min(MAX_SAMPLE_ROWS)
    }

    pub fn is_in_memory(&self) -> bool {
        let conn = self.connection_string.trim();
        conn.is_empty() || conn == ":memory:"
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "remote", "ollama", "gemini" or "none"
    pub model: String,   // Model name
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Upper bound on the prompt size sent to the model, in characters.
    pub max_prompt_chars: usize,
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn is_disabled(&self) -> bool {
        self.backend.eq_ignore_ascii_case("none")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReportConfig {
    /// LIMIT used by fallback listings.
    pub fallback_row_limit: usize,
    /// Estimated row count above which AI queries get a LIMIT appended.
    pub large_table_threshold: u64,
    /// LIMIT appended to AI queries that touch large tables.
    pub ai_row_limit: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub report: ReportConfig,
    pub debug: bool,
    pub log_json: bool,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Database connection string (DuckDB file path or :memory:)
    #[arg(long)]
    pub database: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Start with the built-in defaults
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-jrxml/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NL_JRXML__LLM__API_KEY, NL_JRXML__DATABASE__CONNECTION_STRING, ...
        config_builder = config_builder.add_source(
            Environment::with_prefix("NL_JRXML")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;
        config.apply_cli(args);

        if config.database.pool_size == 0 {
            return Err(ConfigError::Message(
                "database.pool_size must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    // Override with command line args if provided
    fn apply_cli(&mut self, args: &CliArgs) {
        if let Some(host) = &args.host {
            self.web.host = host.clone();
        }
        if let Some(port) = args.port {
            self.web.port = port;
        }
        if let Some(database) = &args.database {
            self.database.connection_string = database.clone();
        }
        if args.debug {
            self.debug = true;
        }
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                connection_string: "reports.duckdb".to_string(),
                pool_size: 5,
                read_only: true,
                connect_timeout_secs: 5,
                query_timeout_secs: 30,
                max_rows: 10_000,
                sample_rows: 3,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            llm: LlmConfig {
                backend: "remote".to_string(),
                model: "gpt-3.5-turbo".to_string(),
                api_key: None,
                api_url: Some("https://api.openai.com/v1/chat/completions".to_string()),
                timeout_secs: 60,
                temperature: 0.2,
                max_tokens: 800,
                max_prompt_chars: 12_000,
            },
            report: ReportConfig {
                fallback_row_limit: 100,
                large_table_threshold: 10_000,
                ai_row_limit: 1_000,
            },
            debug: false,
            log_json: false,
        }
    }
}
