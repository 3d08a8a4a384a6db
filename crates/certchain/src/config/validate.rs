use anyhow::anyhow;

use super::Config;
use crate::certificate::is_http_url;

/// Most redirects an AIA download may follow
const MAX_REDIRECTS: usize = 10;

/// given a Config struct, validate the values to ensure
/// every network call stays bounded and every repository URL is fetchable
pub fn check_config(config: &Config) -> Result<(), anyhow::Error> {
    if config.network.tls_timeout_secs == 0 {
        return Err(anyhow!("network.tls_timeout_secs must be greater than 0"));
    }

    if config.network.aia_timeout_secs == 0 {
        return Err(anyhow!("network.aia_timeout_secs must be greater than 0"));
    }

    if config.network.aia_max_redirects > MAX_REDIRECTS {
        return Err(anyhow!(
            "network.aia_max_redirects cannot be greater than {MAX_REDIRECTS}"
        ));
    }

    if config.limits.max_upload_bytes == 0 {
        return Err(anyhow!("limits.max_upload_bytes must be greater than 0"));
    }

    for (source_index, source) in config.ca_repository.sources.iter().enumerate() {
        if source.name.trim().is_empty() {
            return Err(anyhow!(
                "ca_repository.sources{source_index}.name cannot be empty"
            ));
        }

        for (url_index, url) in source.urls.iter().enumerate() {
            if !is_http_url(url) {
                return Err(anyhow!(
                    "ca_repository.sources{source_index}.urls{url_index} must be an http(s) URL: {url}"
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::config::CaSource;

    #[test]
    fn test_default_config_is_valid() {
        assert!(check_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_unbounded_network_settings() {
        let mut config = Config::default();
        config.network.tls_timeout_secs = 0;
        assert!(check_config(&config).is_err());

        let mut config = Config::default();
        config.network.aia_max_redirects = 11;
        assert!(check_config(&config).is_err());

        let mut config = Config::default();
        config.limits.max_upload_bytes = 0;
        assert!(check_config(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_repository_entries() {
        let mut config = Config::default();
        config.ca_repository.sources.push(CaSource {
            name: Cow::Borrowed("  "),
            urls: vec![],
        });
        assert!(check_config(&config).is_err());

        let mut config = Config::default();
        config.ca_repository.sources[0]
            .urls
            .push(Cow::Borrowed("ldap://ldap.example.test/cn=root"));
        let err = check_config(&config).unwrap_err();
        assert!(err.to_string().contains("ldap://"));
    }
}
