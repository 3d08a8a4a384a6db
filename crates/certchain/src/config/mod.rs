use std::{borrow::Cow, path::PathBuf};

use clap::{Args, ValueEnum};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment, Provider,
};
use self::hcl::Hcl;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::level_filters::LevelFilter;

mod hcl;
mod validate;

pub const DEFAULT_CONFIG_DIR: &str = "/etc/certchain";

const LETS_ENCRYPT_CERTS: &str = "https://letsencrypt.org/certs";

fn default_service_name() -> Cow<'static, str> {
    Cow::Borrowed("certchain")
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Trace,
}

/// Transforms our custom `LogLevel` enum into a `tracing::level_filters::LevelFilter`
/// enum used by the `tracing` crate.
impl From<&LogLevel> for LevelFilter {
    fn from(val: &LogLevel) -> Self {
        match val {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, Eq, PartialEq)]
pub enum LogRotation {
    #[default]
    Never,
    Daily,
    Hourly,
    Minutely,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone, Args)]
#[group(id = "logging")]
pub struct Logging {
    /// If logging is enabled at all. Setting this to `false` will disable all logging output.
    #[arg(
        long = "log.enabled",
        required = false,
        value_parser,
        default_value = "true",
        id = "log.enabled"
    )]
    pub enabled: bool,

    /// The level of logging to be used.
    #[serde(deserialize_with = "log_level_deser")]
    #[arg(
        long = "log.level",
        required = false,
        value_enum,
        default_value = "info"
    )]
    pub level: LogLevel,

    /// Whether to keep ERROR events in the output.
    #[arg(
        long = "log.error_logs_enabled",
        required = false,
        value_parser,
        default_value = "true"
    )]
    pub error_logs_enabled: bool,

    /// The format of the log output
    #[serde(deserialize_with = "log_format_deser")]
    #[arg(
        long = "log.format",
        required = false,
        value_enum,
        default_value = "pretty"
    )]
    pub format: LogFormat,

    /// If set, logs are written to `certchain.log` in this directory instead of stderr
    #[arg(long = "log.path", required = false, value_parser)]
    pub path: Option<PathBuf>,

    #[clap(skip)]
    #[serde(deserialize_with = "log_rotation_deser", default)]
    pub rotation: LogRotation,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
            error_logs_enabled: true,
            format: LogFormat::Pretty,
            path: None,
            rotation: LogRotation::Never,
        }
    }
}

/// Timeouts and limits for outbound connections
#[derive(Debug, Serialize, Deserialize, Clone, Args)]
#[group(id = "network")]
pub struct Network {
    /// Seconds allowed for the TLS handshake when harvesting a live chain
    #[arg(
        long = "network.tls_timeout_secs",
        required = false,
        value_parser,
        default_value = "30"
    )]
    pub tls_timeout_secs: u64,

    /// Seconds allowed for each AIA / CA repository download
    #[arg(
        long = "network.aia_timeout_secs",
        required = false,
        value_parser,
        default_value = "10"
    )]
    pub aia_timeout_secs: u64,

    /// Redirects followed by AIA downloads
    #[arg(
        long = "network.aia_max_redirects",
        required = false,
        value_parser,
        default_value = "3"
    )]
    pub aia_max_redirects: usize,

    /// Port used for live fetches when the request has none
    #[arg(
        long = "network.default_port",
        required = false,
        value_parser,
        default_value = "443"
    )]
    pub default_port: u16,

    /// User agent sent with AIA downloads
    #[arg(
        long = "network.user_agent",
        required = false,
        value_parser,
        default_value = concat!("certchain/", env!("CARGO_PKG_VERSION"))
    )]
    pub user_agent: Cow<'static, str>,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            tls_timeout_secs: 30,
            aia_timeout_secs: 10,
            aia_max_redirects: 3,
            default_port: 443,
            user_agent: Cow::Borrowed(concat!("certchain/", env!("CARGO_PKG_VERSION"))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Args)]
#[group(id = "limits")]
pub struct Limits {
    /// Largest certificate or key upload accepted, in bytes
    #[arg(
        long = "limits.max_upload_bytes",
        required = false,
        value_parser,
        default_value = "10485760"
    )]
    pub max_upload_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

/// A named set of URLs serving well-known issuer certificates
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CaSource {
    pub name: Cow<'static, str>,
    pub urls: Vec<Cow<'static, str>>,
}

/// Issuer certificates consulted when AIA resolution comes up empty.
///
/// `version` is bumped whenever the published list changes so deployments
/// can tell which table they run with.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CaRepository {
    pub version: u32,
    pub sources: Vec<CaSource>,
}

impl Default for CaRepository {
    fn default() -> Self {
        let urls = [
            "lets-encrypt-r3.pem",
            "lets-encrypt-r4.pem",
            "isrgrootx1.pem",
            "isrg-root-x2.pem",
        ]
        .into_iter()
        .map(|file| Cow::Owned(format!("{LETS_ENCRYPT_CERTS}/{file}")))
        .collect();

        Self {
            version: 1,
            sources: vec![CaSource {
                name: Cow::Borrowed("letsencrypt"),
                urls,
            }],
        }
    }
}

impl CaRepository {
    /// Every repository URL in declaration order
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.sources
            .iter()
            .flat_map(|source| source.urls.iter().map(|url| &**url))
    }
}

/// The main configuration struct.
/// A configuration file (YAML, HCL or through ENV) will be parsed into this struct.
/// Example:
///
/// ```yaml
/// service_name: "certchain"
/// logging:
///   level: "INFO"
///   format: "json"
///   path: "/var/log/certchain"
///   rotation: "daily"
/// network:
///   tls_timeout_secs: 30
///   aia_timeout_secs: 10
/// limits:
///   max_upload_bytes: 10485760
/// ca_repository:
///   version: 2
///   sources:
///     - name: "letsencrypt"
///       urls:
///         - "https://letsencrypt.org/certs/isrgrootx1.pem"
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Args)]
pub struct Config {
    /// The name of the service (will appear as a log property)
    #[serde(default = "default_service_name")]
    #[arg(long, default_value = "certchain")]
    pub service_name: Cow<'static, str>,

    /// The PATH to the configuration file or directory to be used.
    ///
    /// A directory should contain `certchain.yaml`, `certchain.yml` or `certchain.hcl`.
    #[arg(short, long, required = false)]
    #[allow(clippy::struct_field_names)]
    pub config_path: Option<Cow<'static, str>>,

    #[command(flatten)]
    pub logging: Logging,

    #[command(flatten)]
    pub network: Network,

    #[command(flatten)]
    pub limits: Limits,

    #[arg(skip)]
    #[serde(default)]
    pub ca_repository: CaRepository,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_name: default_service_name(),
            config_path: None,
            logging: Logging::default(),
            network: Network::default(),
            limits: Limits::default(),
            ca_repository: CaRepository::default(),
        }
    }
}

/// Implement the `Provider` trait for the `Config` struct.
/// This allows the `Config` struct to be used as a configuration provider with *defaults*.
impl Provider for Config {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("certchain")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        Serialized::defaults(Config::default()).data()
    }
}

/// Load the configuration on top of the parsed command line arguments.
///
/// Nested keys can be separated by double underscores (__) in the environment variables.
/// E.g. `CERTCHAIN_LOGGING__LEVEL=debug` will set the `level` key in the `logging` section.
pub fn load(parsed_commands: &Config, fallback: &str) -> Result<Config, figment::Error> {
    let path = parsed_commands.config_path.as_deref().unwrap_or(fallback);
    load_from_path(path, parsed_commands)
}

/// Test-friendly version of load that doesn't parse command line arguments
#[cfg(test)]
pub(crate) fn load_for_test(fallback: &str) -> Result<Config, figment::Error> {
    load_from_path(fallback, &Config::default())
}

/// Load configuration from a file or a directory holding `certchain.*` files
pub(crate) fn load_from_path(
    config_path: &str,
    parsed_commands: &Config,
) -> Result<Config, figment::Error> {
    let mut figment = Figment::new()
        .merge(Config::default())
        .merge(Serialized::defaults(parsed_commands));

    let path = std::path::Path::new(config_path);
    if path.is_file() {
        figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml" | "yaml") => figment.merge(Yaml::file(config_path)),
            Some("hcl") => figment.merge(Hcl::file(config_path)),
            _ => figment
                .merge(Yaml::file(config_path))
                .merge(Hcl::file(config_path)),
        };
    } else {
        // figment skips files that do not exist
        figment = figment
            .merge(Yaml::file(format!("{config_path}/certchain.yml")))
            .merge(Yaml::file(format!("{config_path}/certchain.yaml")))
            .merge(Hcl::file(format!("{config_path}/certchain.hcl")));
    }

    let config: Config = figment
        .merge(Env::prefixed("CERTCHAIN_").split("__"))
        .extract()?;

    validate::check_config(&config).map_err(|err| figment::Error::from(err.to_string()))?;

    Ok(config)
}

/// Deserialize function to convert a string to a `LogLevel` Enum
fn log_level_deser<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.to_lowercase().as_str() {
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        "trace" => Ok(LogLevel::Trace),
        _ => Err(serde::de::Error::custom(
            "expected one of DEBUG, INFO, WARN, ERROR, TRACE",
        )),
    }
}

/// Deserialize function to convert a string to a `LogFormat` Enum
fn log_format_deser<'de, D>(deserializer: D) -> Result<LogFormat, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.to_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "pretty" => Ok(LogFormat::Pretty),
        _ => Err(serde::de::Error::custom("expected one of: json, pretty")),
    }
}

fn log_rotation_deser<'de, D>(deserializer: D) -> Result<LogRotation, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.to_lowercase().as_str() {
        "daily" => Ok(LogRotation::Daily),
        "hourly" => Ok(LogRotation::Hourly),
        "minutely" => Ok(LogRotation::Minutely),
        "never" => Ok(LogRotation::Never),
        _ => Err(serde::de::Error::custom(
            "expected one of: daily, hourly, minutely, never",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_files() {
        figment::Jail::expect_with(|jail| {
            let tmp_dir = jail.directory().to_string_lossy().into_owned();
            let config = load_for_test(&tmp_dir)?;

            assert_eq!(config.service_name, "certchain");
            assert_eq!(config.network.tls_timeout_secs, 30);
            assert_eq!(config.network.aia_timeout_secs, 10);
            assert_eq!(config.network.aia_max_redirects, 3);
            assert_eq!(config.network.default_port, 443);
            assert_eq!(config.limits.max_upload_bytes, 10 * 1024 * 1024);
            assert_eq!(config.logging.level, LogLevel::Info);
            assert_eq!(config.logging.rotation, LogRotation::Never);
            assert_eq!(config.ca_repository, CaRepository::default());
            assert_eq!(config.ca_repository.urls().count(), 4);

            Ok(())
        });
    }

    #[test]
    fn test_yaml_file_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            let tmp_dir = jail.directory().to_string_lossy().into_owned();

            jail.create_file(
                format!("{tmp_dir}/certchain.yaml"),
                r#"
                service_name: "chain-resolver"
                logging:
                  level: "DEBUG"
                  format: "JSON"
                  rotation: "hourly"
                network:
                  aia_timeout_secs: 5
                ca_repository:
                  version: 7
                  sources:
                    - name: "internal"
                      urls:
                        - "https://pki.internal.test/root.pem"
                "#,
            )?;

            let config = load_for_test(&tmp_dir)?;

            assert_eq!(config.service_name, "chain-resolver");
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.logging.rotation, LogRotation::Hourly);
            assert_eq!(config.network.aia_timeout_secs, 5);
            assert_eq!(config.network.tls_timeout_secs, 30);
            assert_eq!(config.ca_repository.version, 7);
            assert_eq!(
                config.ca_repository.urls().collect::<Vec<_>>(),
                vec!["https://pki.internal.test/root.pem"]
            );

            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            let tmp_dir = jail.directory().to_string_lossy().into_owned();

            jail.create_file(
                format!("{tmp_dir}/certchain.yml"),
                r#"
                network:
                  tls_timeout_secs: 12
                "#,
            )?;
            jail.set_env("CERTCHAIN_NETWORK__TLS_TIMEOUT_SECS", "20");
            jail.set_env("CERTCHAIN_LOGGING__LEVEL", "warn");

            let config = load_for_test(&tmp_dir)?;

            assert_eq!(config.network.tls_timeout_secs, 20);
            assert_eq!(config.logging.level, LogLevel::Warn);

            Ok(())
        });
    }

    #[test]
    fn test_hcl_file_with_env_function() {
        figment::Jail::expect_with(|jail| {
            let tmp_dir = jail.directory().to_string_lossy().into_owned();
            jail.set_env("CA_MIRROR", "https://mirror.internal.test/isrgrootx1.pem");

            jail.create_file(
                format!("{tmp_dir}/certchain.hcl"),
                r#"
                service_name = "certchain-hcl"

                limits {
                  max_upload_bytes = 2048
                }

                ca_repository {
                  version = 3
                  sources = [
                    {
                      name = "mirror"
                      urls = [env("CA_MIRROR")]
                    }
                  ]
                }
                "#,
            )?;

            let config = load_for_test(&tmp_dir)?;

            assert_eq!(config.service_name, "certchain-hcl");
            assert_eq!(config.limits.max_upload_bytes, 2048);
            assert_eq!(config.ca_repository.version, 3);
            assert_eq!(
                config.ca_repository.urls().collect::<Vec<_>>(),
                vec!["https://mirror.internal.test/isrgrootx1.pem"]
            );

            Ok(())
        });
    }

    #[test]
    fn test_direct_file_path() {
        figment::Jail::expect_with(|jail| {
            let tmp_dir = jail.directory().to_string_lossy().into_owned();
            let file = format!("{tmp_dir}/custom.yaml");

            jail.create_file(&file, "limits:\n  max_upload_bytes: 4096\n")?;

            let config = load_for_test(&file)?;
            assert_eq!(config.limits.max_upload_bytes, 4096);

            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        figment::Jail::expect_with(|jail| {
            let tmp_dir = jail.directory().to_string_lossy().into_owned();

            jail.create_file(
                format!("{tmp_dir}/certchain.yaml"),
                r#"
                network:
                  aia_timeout_secs: 0
                "#,
            )?;

            let err = load_for_test(&tmp_dir).unwrap_err();
            assert!(err.to_string().contains("network.aia_timeout_secs"));

            Ok(())
        });

        figment::Jail::expect_with(|jail| {
            let tmp_dir = jail.directory().to_string_lossy().into_owned();

            jail.create_file(
                format!("{tmp_dir}/certchain.yaml"),
                r#"
                logging:
                  rotation: "weekly"
                "#,
            )?;

            assert!(load_for_test(&tmp_dir).is_err());

            Ok(())
        });
    }
}
