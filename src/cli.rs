//! Command-line interface for trapmetrics
//!
//! Provides argument parsing and subcommand handling for the trapmetrics binary.

use clap::{Parser, Subcommand};

/// Buffer metrics locally and ship them to an HTTP trap check
#[derive(Parser)]
#[command(name = "trapmetrics")]
#[command(version)]
#[command(about = "Buffer metrics locally and ship them to an HTTP trap check")]
#[command(
    long_about = "trapmetrics resolves (or creates) an HTTP trap check through the resource \
    API, then periodically flushes counters, gauges, histograms, and text metrics to it."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Resolve the check and print the submission target
    Resolve,
    /// Run the client, flushing a heartbeat counter until interrupted
    Run {
        /// Name of the heartbeat counter
        #[arg(long, default_value = "trapmetrics.heartbeat")]
        heartbeat: String,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# trapmetrics Configuration
# ==========================
#
# Every section is optional. Either [api].token or [check].submission_url must
# be set: with a token the check is looked up (or created) through the
# resource API; without one, metrics go straight to the submission URL.

# ─────────────────────────────────────────────────────────────────────────────
# RESOURCE API
# ─────────────────────────────────────────────────────────────────────────────

[api]
# API token. Leave unset to disable check management.
# token = "00000000-0000-0000-0000-000000000000"

# Application name sent with every API request
app = "trapmetrics"

# API base URL
url = "https://api.circonus.com/v2"

# Extra PEM bundle trusted when connecting to the trap (optional)
# ca_file = "/etc/ssl/certs/broker-ca.pem"

# Per-request timeout in seconds (1-300)
request_timeout_seconds = 10

# ─────────────────────────────────────────────────────────────────────────────
# CHECK
# ─────────────────────────────────────────────────────────────────────────────
#
# Lookup order: submission_url, then id, then a search by target host, check
# type, and search tag. A new check is created when the search finds nothing.

[check]
# submission_url = "https://trap.example.com:43191/module/httptrap/<uuid>/<secret>"
# id = 1234

# Identity of this client, defaults to "<hostname>:<app>"
# instance_id = "web-1:trapmetrics"

# Host recorded on the check, defaults to instance_id
# target_host = "web-1"

# display_name = "web-1 /metrics"

# Tag identifying checks owned by this client, defaults to "service:<app>"
# search_tag = "service:trapmetrics"

# Trap secret for new checks; generated when unset
# secret = "..."

# Tags added to new checks
tags = []

# Re-enable metrics the check declares but has disabled
force_metric_activation = false

check_type = "httptrap"

# ─────────────────────────────────────────────────────────────────────────────
# BROKER SELECTION (only used when creating a check)
# ─────────────────────────────────────────────────────────────────────────────

[broker]
# Pin a broker by id; fails instead of falling back if it is not usable
# id = 1

# Only consider brokers carrying this tag
# select_tag = "dc:east"

# TCP connect budget when probing brokers, in milliseconds (1-60000)
max_response_time_ms = 500

# ─────────────────────────────────────────────────────────────────────────────
# FLUSHING
# ─────────────────────────────────────────────────────────────────────────────

[flush]
# Seconds between periodic flushes (1-3600)
interval_seconds = 10

# Clear each category after it is flushed
reset_counters = true
reset_gauges = true
reset_histograms = true
reset_text = true

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        // Clap's built-in verification for the CLI structure
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["trapmetrics"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["trapmetrics", "--config", "custom.toml"]);
        assert_eq!(cli.config, "custom.toml");
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["trapmetrics", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn resolve_subcommand_accepts_global_config() {
        let cli = Cli::parse_from(["trapmetrics", "resolve", "-c", "prod.toml"]);
        assert!(matches!(cli.command, Some(Command::Resolve)));
        assert_eq!(cli.config, "prod.toml");
    }

    #[test]
    fn run_subcommand_default_heartbeat() {
        let cli = Cli::parse_from(["trapmetrics", "run"]);
        assert!(matches!(
            cli.command,
            Some(Command::Run { ref heartbeat }) if heartbeat == "trapmetrics.heartbeat"
        ));
    }

    #[test]
    fn template_is_valid_toml() {
        let template = generate_config_template();
        let result: Result<toml::Value, _> = toml::from_str(template);
        assert!(
            result.is_ok(),
            "Template should be valid TOML: {:?}",
            result.err()
        );
    }

    #[test]
    fn template_parses_as_config() {
        let config: crate::config::Config = toml::from_str(generate_config_template()).unwrap();
        assert_eq!(config.flush.interval_seconds, 10);
        assert_eq!(config.broker.max_response_time_ms, 500);
        assert!(config.api.token.is_none());
    }

    #[test]
    fn template_has_all_sections() {
        let template = generate_config_template();
        assert!(template.contains("[api]"));
        assert!(template.contains("[check]"));
        assert!(template.contains("[broker]"));
        assert!(template.contains("[flush]"));
        assert!(template.contains("[observability]"));
    }
}
