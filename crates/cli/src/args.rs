//! Command-line arguments.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use domain::Capability;

#[derive(Debug, Parser)]
#[command(name = "faqworks", version, about = "Calls the FAQ workers and administers their limits")]
pub struct Cli {
    /// Settings file.
    #[arg(long, global = true, default_value = "faqworks.toml")]
    pub config: PathBuf,

    /// Directory holding the persisted orchestrator state.
    #[arg(long, global = true, default_value = ".faqworks")]
    pub state_dir: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one capability call.
    Invoke {
        #[arg(value_parser = parse_capability)]
        capability: Capability,
        /// Request payload as a JSON object.
        #[arg(long)]
        input: String,
        /// Address of the calling client.
        #[arg(long)]
        client_ip: Option<IpAddr>,
        /// Request header as NAME=VALUE. Repeatable.
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
    /// Configuration and current usage of every worker.
    Status,
    /// Resolved configuration of one worker.
    Config { worker: String },
    ResetRateLimit { worker: String },
    BlockIp {
        ip: String,
        #[arg(long, default_value = "blocked by administrator")]
        reason: String,
        /// Block duration. 0 blocks permanently.
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    UnblockIp { ip: String },
    ListBlocked,
    AllowIp {
        ip: String,
        #[arg(long, default_value = "allowed by administrator")]
        reason: String,
    },
    DisallowIp { ip: String },
    ListAllowed,
    /// Aggregate usage, or one worker's usage with --worker.
    Analytics {
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[arg(long)]
        worker: Option<String>,
    },
    /// Busiest workers and days.
    UsagePatterns {
        #[arg(long, default_value_t = 30)]
        days: u32,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    Violations {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    Activity {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Call a worker's health endpoint.
    TestWorker { worker: String },
    /// Re-read worker configuration from the settings file.
    Reload,
    /// Evict expired windows, blocks, violations and usage events.
    Maintenance,
    ResetAnalytics {
        #[arg(long)]
        confirm: bool,
    },
}

fn parse_capability(value: &str) -> Result<Capability, String> {
    value.parse()
}

fn parse_header(value: &str) -> Result<(String, String), String> {
    let (name, value) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{value}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name is empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_collects_headers() {
        let cli = Cli::try_parse_from([
            "faqworks",
            "invoke",
            "seo-analyzer",
            "--input",
            "{}",
            "--header",
            "X-Forwarded-For=203.0.113.7, 10.0.0.1",
            "--header",
            "X-Real-IP=203.0.113.8",
        ])
        .unwrap();
        match cli.command {
            Command::Invoke {
                capability,
                headers,
                client_ip,
                ..
            } => {
                assert_eq!(capability, Capability::SeoAnalyzer);
                assert_eq!(headers.len(), 2);
                assert_eq!(headers[0].0, "X-Forwarded-For");
                assert_eq!(headers[0].1, "203.0.113.7, 10.0.0.1");
                assert!(client_ip.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["faqworks", "status", "--log-format", "pretty", "--config", "x.toml"])
            .unwrap();
        assert_eq!(cli.log_format, LogFormat::Pretty);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert_eq!(cli.state_dir, PathBuf::from(".faqworks"));
    }

    #[test]
    fn unknown_capabilities_and_bad_headers_are_rejected() {
        assert!(Cli::try_parse_from(["faqworks", "invoke", "translator", "--input", "{}"]).is_err());
        assert!(parse_header("no-equals-sign").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[test]
    fn block_defaults_to_a_day() {
        let cli = Cli::try_parse_from(["faqworks", "block-ip", "192.0.2.1"]).unwrap();
        assert!(matches!(cli.command, Command::BlockIp { hours: 24, .. }));
    }
}
