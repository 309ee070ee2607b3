use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use url::{Host, Url};

use crate::{bus::mqtt::MqttSettings, influx::InfluxSettings};

const DEFAULT_MQTT_PORT: u16 = 1883;

// ---------------------------------------------------------------------------
// LogFormat
// ---------------------------------------------------------------------------

/// Output format of the `fmt` tracing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Console,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "console" => Ok(Self::Console),
            "json" => Ok(Self::Json),
            other => Err(anyhow::anyhow!("unknown output format {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address, `host:port`.
    pub listen: String,
    /// Deadline handed to each time-series query by the HTTP layer.
    pub query_timeout: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
    /// File holding the startup-time marker.
    pub startup_time_file: PathBuf,

    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_credentials: Option<(String, String)>,
    pub mqtt_client_id: String,
    /// How long a published command may wait for the broker's PUBACK.
    pub mqtt_ack_timeout: Duration,
    /// Device error topics watched by error surveillance.
    pub mqtt_error_topics: Vec<String>,

    pub influx_url: String,
    pub influx_token: String,
    pub influx_org: String,
    pub influx_bucket: String,
    pub influx_measurement: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let broker = parse_broker_url(&optional("MQTT_BROKER", "mqtt://localhost:1883"))?;

        Ok(Self {
            listen: optional("LISTEN", "localhost:9000"),
            query_timeout: Duration::from_millis(
                optional("QUERY_TIMEOUT_MS", "10000")
                    .parse()
                    .context("QUERY_TIMEOUT_MS must be a positive integer")?,
            ),
            log_level: optional("LOG_LEVEL", "info").to_lowercase(),
            log_format: optional("LOG_FMT", "console").parse()?,
            startup_time_file: PathBuf::from(optional("ST_FILE", "./tmp/time")),
            mqtt_host: broker.host,
            mqtt_port: broker.port,
            mqtt_credentials: broker.credentials,
            mqtt_client_id: optional("MQTT_CLIENT_ID", "hydro_mqtt_client"),
            mqtt_ack_timeout: Duration::from_millis(
                optional("MQTT_ACK_TIMEOUT_MS", "30000")
                    .parse()
                    .context("MQTT_ACK_TIMEOUT_MS must be a positive integer")?,
            ),
            mqtt_error_topics: parse_topics(&optional("MQTT_ERROR_TOPICS", "hydroponic/error"))?,
            influx_url: optional("INFLUX_URL", "http://localhost:8086"),
            influx_token: required("INFLUX_TOKEN")?,
            influx_org: optional("INFLUX_ORG", "kara"),
            influx_bucket: optional("INFLUX_BUCKET", "hydroponic"),
            influx_measurement: optional("INFLUX_MEASUREMENT", "sensors"),
        })
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            keep_alive: Duration::from_secs(30),
            credentials: self.mqtt_credentials.clone(),
        }
    }

    pub fn influx_settings(&self) -> InfluxSettings {
        InfluxSettings {
            url: self.influx_url.clone(),
            token: self.influx_token.clone(),
            org: self.influx_org.clone(),
            bucket: self.influx_bucket.clone(),
            measurement: self.influx_measurement.clone(),
        }
    }
}

/// Broker location taken from `MQTT_BROKER`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BrokerAddress {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
}

/// Parse `mqtt://[user:password@]host[:port]` (or `tcp://`, or a bare
/// `host[:port]`). IPv6 hosts come back without brackets.
fn parse_broker_url(raw: &str) -> Result<BrokerAddress> {
    let with_scheme = if raw.contains("://") {
        raw.to_owned()
    } else {
        format!("mqtt://{raw}")
    };
    let url = Url::parse(&with_scheme)
        .with_context(|| format!("MQTT_BROKER is not a valid broker URL: {raw:?}"))?;

    if !matches!(url.scheme(), "mqtt" | "tcp") {
        anyhow::bail!("MQTT_BROKER scheme must be mqtt:// or tcp://, got: {raw:?}");
    }
    if !matches!(url.path(), "" | "/") {
        anyhow::bail!("MQTT_BROKER must not carry a path: {raw:?}");
    }

    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_owned(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => anyhow::bail!("MQTT_BROKER has no host: {raw:?}"),
    };

    let credentials = match (url.username(), url.password()) {
        ("", None) => None,
        ("", Some(_)) => anyhow::bail!("MQTT_BROKER has a password but no username: {raw:?}"),
        (username, password) => Some((username.to_owned(), password.unwrap_or_default().to_owned())),
    };

    Ok(BrokerAddress {
        host,
        port: url.port().unwrap_or(DEFAULT_MQTT_PORT),
        credentials,
    })
}

/// Parse `"a/b,c/d"` into a topic list; at least one topic is required.
fn parse_topics(raw: &str) -> Result<Vec<String>> {
    let topics: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    if topics.is_empty() {
        anyhow::bail!("MQTT_ERROR_TOPICS must name at least one topic");
    }
    Ok(topics)
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(host: &str, port: u16) -> BrokerAddress {
        BrokerAddress {
            host: host.to_owned(),
            port,
            credentials: None,
        }
    }

    #[test]
    fn broker_url_with_scheme_and_port() {
        assert_eq!(
            parse_broker_url("mqtt://localhost:1883").unwrap(),
            address("localhost", 1883)
        );
        assert_eq!(
            parse_broker_url("tcp://10.0.0.7:11883/").unwrap(),
            address("10.0.0.7", 11883)
        );
    }

    #[test]
    fn broker_url_defaults_port() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local").unwrap(),
            address("broker.local", DEFAULT_MQTT_PORT)
        );
        assert_eq!(
            parse_broker_url("broker.local").unwrap(),
            address("broker.local", DEFAULT_MQTT_PORT)
        );
    }

    #[test]
    fn broker_url_ipv6_host_loses_brackets() {
        assert_eq!(
            parse_broker_url("mqtt://[::1]").unwrap(),
            address("::1", DEFAULT_MQTT_PORT)
        );
        assert_eq!(
            parse_broker_url("[fd00::7]:11883").unwrap(),
            address("fd00::7", 11883)
        );
    }

    #[test]
    fn broker_url_credentials_are_split_from_host() {
        let parsed = parse_broker_url("mqtt://user:pw@broker:1883").unwrap();
        assert_eq!(parsed.host, "broker");
        assert_eq!(parsed.port, 1883);
        assert_eq!(
            parsed.credentials,
            Some(("user".to_owned(), "pw".to_owned()))
        );

        let parsed = parse_broker_url("mqtt://gateway@broker").unwrap();
        assert_eq!(parsed.credentials, Some(("gateway".to_owned(), String::new())));
    }

    #[test]
    fn broker_url_password_without_user_errors() {
        let err = parse_broker_url("mqtt://:pw@broker").unwrap_err();
        assert!(err.to_string().contains("no username"));
    }

    #[test]
    fn broker_url_bad_port_errors() {
        let err = parse_broker_url("mqtt://localhost:abc").unwrap_err();
        assert!(err.to_string().contains("not a valid broker URL"));
    }

    #[test]
    fn broker_url_unknown_scheme_errors() {
        let err = parse_broker_url("ws://localhost:1883").unwrap_err();
        assert!(err.to_string().contains("scheme"));
    }

    #[test]
    fn broker_url_missing_host_errors() {
        assert!(parse_broker_url("mqtt://:1883").is_err());
    }

    #[test]
    fn broker_url_with_path_errors() {
        let err = parse_broker_url("mqtt://broker/hydroponic").unwrap_err();
        assert!(err.to_string().contains("path"));
    }

    #[test]
    fn topics_are_trimmed_and_empty_entries_dropped() {
        assert_eq!(
            parse_topics(" hydroponic/error , ,hydroponic/pump/error").unwrap(),
            vec!["hydroponic/error".to_owned(), "hydroponic/pump/error".to_owned()]
        );
    }

    #[test]
    fn empty_topic_list_errors() {
        assert!(parse_topics(" , ").is_err());
    }

    #[test]
    fn log_format_from_str() {
        assert_eq!("console".parse::<LogFormat>().unwrap(), LogFormat::Console);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert!(err.to_string().contains("unknown output format"));
    }
}
