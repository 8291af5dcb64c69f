use crate::env::HostDescriptor;
use crate::error::{MasterError, Result};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use url::{Host, Url};

/// Query parameter carrying the serialised host descriptor.
pub const HANDSHAKE_QUERY_KEY: &str = "sysInfo";

const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Validated address of the coordination endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Accepts an `http`/`https` URL or a bare IP literal.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MasterError::configuration("endpoint is empty"));
        }

        if let Ok(ip) = raw.parse::<IpAddr>() {
            let literal = match ip {
                IpAddr::V4(v4) => format!("http://{}/", v4),
                IpAddr::V6(v6) => format!("http://[{}]/", v6),
            };
            let url = Url::parse(&literal)
                .map_err(|e| MasterError::configuration(format!("invalid endpoint '{}': {}", raw, e)))?;
            return Ok(Self { url });
        }

        let url = Url::parse(raw)
            .map_err(|e| MasterError::configuration(format!("invalid endpoint '{}': {}", raw, e)))?;

        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(MasterError::configuration(format!(
                "endpoint '{}' must use http or https",
                raw
            )));
        }

        match url.host() {
            Some(Host::Domain(domain)) => validate_domain(domain)
                .map_err(|reason| MasterError::configuration(format!("endpoint '{}': {}", raw, reason)))?,
            Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => {}
            None => {
                return Err(MasterError::configuration(format!(
                    "endpoint '{}' has no host",
                    raw
                )))
            }
        }

        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// WebSocket URL for the transport, with `host` encoded into the query.
    pub fn handshake_url(&self, host: &HostDescriptor) -> Result<Url> {
        let mut url = self.url.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| MasterError::configuration(format!("cannot derive {} URL from {}", scheme, self)))?;
        url.query_pairs_mut()
            .append_pair(HANDSHAKE_QUERY_KEY, &host.to_handshake()?);
        Ok(url)
    }
}

/// Host labels: alphanumerics, '-' and '_', optionally ending with a dot.
fn validate_domain(domain: &str) -> std::result::Result<(), String> {
    let trimmed = domain.strip_suffix('.').unwrap_or(domain);
    if trimmed.is_empty() {
        return Err("empty host".to_string());
    }
    for label in trimmed.split('.') {
        if label.is_empty() {
            return Err(format!("empty label in host '{}'", domain));
        }
        if label.len() > 63 {
            return Err(format!("label '{}' is longer than 63 characters", label));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{}' starts or ends with '-'", label));
        }
        if let Some(bad) = label
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(format!("invalid character '{}' in host '{}'", bad, domain));
        }
    }
    Ok(())
}

impl FromStr for Endpoint {
    type Err = MasterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_urls_and_ips() {
        for raw in [
            "https://example.org",
            "http://wwcl-server.example.io:8080/socket",
            "https://_sandbox.example.org",
            "https://example.org.",
            "http://192.168.1.102:3000",
        ] {
            assert!(Endpoint::parse(raw).is_ok(), "{} should be accepted", raw);
        }

        let ip = Endpoint::parse("192.168.1.102").unwrap();
        assert_eq!(ip.as_str(), "http://192.168.1.102/");
        let v6 = Endpoint::parse("::1").unwrap();
        assert_eq!(v6.as_str(), "http://[::1]/");
    }

    #[test]
    fn test_rejects_bad_endpoints() {
        for raw in [
            "",
            "   ",
            "example.org",
            "ftp://example.org",
            "ws://example.org",
            "https://-bad-.example.org",
            "https://exa mple.org",
        ] {
            let err = Endpoint::parse(raw).unwrap_err();
            assert!(
                matches!(err, MasterError::Configuration { .. }),
                "{} should be a configuration error",
                raw
            );
        }
    }

    #[test]
    fn test_handshake_url() {
        let endpoint = Endpoint::parse("https://example.org").unwrap();
        let url = endpoint.handshake_url(&HostDescriptor::new(false)).unwrap();

        assert_eq!(url.scheme(), "wss");
        let (key, value) = url.query_pairs().next().unwrap();
        assert_eq!(key, HANDSHAKE_QUERY_KEY);
        assert_eq!(value, r#"{"isClient":false}"#);

        let plain = Endpoint::parse("10.0.0.1").unwrap();
        let url = plain.handshake_url(&HostDescriptor::new(true)).unwrap();
        assert_eq!(url.scheme(), "ws");
    }
}
