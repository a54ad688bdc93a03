//! Per-request proxy resolution.
//!
//! Explicit proxy settings from the configuration win over the process
//! environment. In both cases the no-proxy list accepts hostnames, domain
//! suffixes, IP addresses (optionally with a port) and CIDR ranges.

use crate::config::HttpConfig;
use crate::error::UploadError;
use std::net::IpAddr;
use url::{Host, Url};

/// An IP network in `address/prefix` notation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, len) = s.split_once('/')?;
        let network: IpAddr = addr.parse().ok()?;
        let prefix: u8 = len.parse().ok()?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return None;
        }
        Some(Self { network, prefix })
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - self.prefix as u32).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - self.prefix as u32).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            (IpAddr::V6(_), IpAddr::V4(ip)) => self.contains(IpAddr::V6(ip.to_ipv6_mapped())),
            (IpAddr::V4(_), IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
                Some(v4) => self.contains(IpAddr::V4(v4)),
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NoProxyEntry {
    All,
    Cidr(Cidr),
    Ip {
        ip: IpAddr,
        port: Option<u16>,
    },
    Domain {
        // always starts with '.'
        suffix: String,
        port: Option<u16>,
        match_host: bool,
    },
}

/// Parsed no-proxy list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoProxy {
    entries: Vec<NoProxyEntry>,
}

impl NoProxy {
    pub fn parse(list: &str) -> Self {
        let mut entries = Vec::new();
        for raw in list.split(',') {
            let entry = raw.trim().to_ascii_lowercase();
            if entry.is_empty() {
                continue;
            }
            if entry == "*" {
                return Self {
                    entries: vec![NoProxyEntry::All],
                };
            }
            if let Some(cidr) = Cidr::parse(&entry) {
                entries.push(NoProxyEntry::Cidr(cidr));
                continue;
            }

            let (host, port) = split_host_port(&entry);
            if host.is_empty() {
                continue;
            }
            if let Ok(ip) = host.parse::<IpAddr>() {
                entries.push(NoProxyEntry::Ip { ip, port });
                continue;
            }

            let host = host.strip_prefix('*').unwrap_or(host);
            let (suffix, match_host) = if host.starts_with('.') {
                (host.to_string(), false)
            } else {
                (format!(".{}", host), true)
            };
            entries.push(NoProxyEntry::Domain {
                suffix,
                port,
                match_host,
            });
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when requests to `url` must bypass the proxy
    pub fn matches(&self, url: &Url) -> bool {
        let port = url.port_or_known_default();
        let (name, ip) = match url.host() {
            Some(Host::Domain(d)) => (d.trim_end_matches('.').to_ascii_lowercase(), None),
            Some(Host::Ipv4(v4)) => (v4.to_string(), Some(IpAddr::V4(v4))),
            Some(Host::Ipv6(v6)) => (v6.to_string(), Some(IpAddr::V6(v6))),
            None => return false,
        };

        if name == "localhost" || ip.is_some_and(|ip| ip.is_loopback()) {
            return true;
        }

        self.entries.iter().any(|entry| match entry {
            NoProxyEntry::All => true,
            NoProxyEntry::Cidr(cidr) => ip.is_some_and(|ip| cidr.contains(ip)),
            NoProxyEntry::Ip { ip: entry_ip, port: entry_port } => {
                ip == Some(*entry_ip) && port_matches(*entry_port, port)
            }
            NoProxyEntry::Domain {
                suffix,
                port: entry_port,
                match_host,
            } => {
                let host_matches =
                    name.ends_with(suffix.as_str()) || (*match_host && name == suffix[1..]);
                host_matches && port_matches(*entry_port, port)
            }
        })
    }
}

fn port_matches(entry: Option<u16>, actual: Option<u16>) -> bool {
    entry.is_none() || entry == actual
}

fn split_host_port(entry: &str) -> (&str, Option<u16>) {
    if let Some(rest) = entry.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
        return (entry, None);
    }
    if entry.matches(':').count() == 1 {
        if let Some((host, port)) = entry.rsplit_once(':') {
            if let Ok(port) = port.parse() {
                return (host, Some(port));
            }
        }
    }
    (entry, None)
}

/// Parse a proxy address; a bare `host:port` is treated as an http proxy
pub fn parse_proxy(value: &str) -> Result<Option<Url>, UploadError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(url) = Url::parse(value) {
        if matches!(url.scheme(), "http" | "https" | "socks5") && url.has_host() {
            return Ok(Some(url));
        }
    }
    Url::parse(&format!("http://{}", value))
        .ok()
        .filter(|url| url.has_host())
        .map(Some)
        .ok_or_else(|| UploadError::TransportConfig(format!("invalid proxy address {:?}", value)))
}

/// Proxy selection for one upload attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyResolver {
    http_proxy: Option<Url>,
    https_proxy: Option<Url>,
    no_proxy: NoProxy,
}

impl ProxyResolver {
    /// Explicit configuration when any of its fields is set, otherwise the environment
    pub fn new(http_config: &HttpConfig) -> Result<Self, UploadError> {
        if !http_config.is_empty() {
            return Self::from_http_config(http_config);
        }
        Self::from_env()
    }

    pub fn from_http_config(http_config: &HttpConfig) -> Result<Self, UploadError> {
        Ok(Self {
            http_proxy: parse_proxy(&http_config.http_proxy)?,
            https_proxy: parse_proxy(&http_config.https_proxy)?,
            no_proxy: NoProxy::parse(&http_config.no_proxy),
        })
    }

    pub fn from_env() -> Result<Self, UploadError> {
        Self::from_env_lookup(|key| std::env::var(key).ok())
    }

    /// Conventional proxy variables; the upper-case spelling wins
    pub fn from_env_lookup<F>(lookup: F) -> Result<Self, UploadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |upper: &str, lower: &str| {
            lookup(upper)
                .filter(|v| !v.is_empty())
                .or_else(|| lookup(lower))
                .unwrap_or_default()
        };
        Self::from_http_config(&HttpConfig {
            http_proxy: var("HTTP_PROXY", "http_proxy"),
            https_proxy: var("HTTPS_PROXY", "https_proxy"),
            no_proxy: var("NO_PROXY", "no_proxy"),
        })
    }

    /// Proxy to use for `url`, or `None` for a direct connection
    pub fn resolve(&self, url: &Url) -> Option<Url> {
        let proxy = match url.scheme() {
            "https" => self.https_proxy.as_ref(),
            "http" => self.http_proxy.as_ref(),
            _ => None,
        }?;
        if self.no_proxy.matches(url) {
            return None;
        }
        Some(proxy.clone())
    }

    pub fn into_reqwest_proxy(self) -> reqwest::Proxy {
        reqwest::Proxy::custom(move |url| self.resolve(url))
    }
}
