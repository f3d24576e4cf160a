//! Profile types deserialised from the JSON configuration text.
//!
//! Unknown fields are ignored so that full profiles written for the
//! upstream engine still load; only the sections below are acted upon.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use ipnet::IpNet;
use log::LevelFilter;
use serde::{Deserialize, Deserializer};

use crate::common::config::app_cfg;
use crate::common::log::parse_level;
use crate::common::time::parse_duration;

/// Validated configuration of one instance.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub log: LogOptions,
    #[serde(default)]
    pub inbounds: Vec<Inbound>,
    #[serde(default)]
    pub outbounds: Vec<Outbound>,
    #[serde(default)]
    pub route: RouteOptions,
}

impl Profile {
    /// Look up an outbound by tag.
    pub fn outbound(&self, tag: &str) -> Option<&Outbound> {
        self.outbounds.iter().find(|o| o.tag() == tag)
    }

    /// Tag used when no rule matches: `route.final`, else the first outbound.
    pub fn final_outbound(&self) -> &str {
        match self.route.final_outbound.as_deref() {
            Some(tag) => tag,
            None => self.outbounds.first().map(Outbound::tag).unwrap_or("direct"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LogOptions {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default = "default_true")]
    pub timestamp: bool,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            disabled: false,
            level: None,
            timestamp: true,
            output: None,
        }
    }
}

impl LogOptions {
    /// Effective level filter; `None` when `level` is not a known name.
    pub fn level_filter(&self) -> Option<LevelFilter> {
        if self.disabled {
            return Some(LevelFilter::Off);
        }
        match self.level.as_deref() {
            Some(name) => parse_level(name),
            None => Some(app_cfg().log_level),
        }
    }
}

/// Address and port an inbound binds to.
#[derive(Clone, Debug, Deserialize)]
pub struct ListenOptions {
    #[serde(default)]
    pub tag: String,
    #[serde(default = "default_listen")]
    pub listen: IpAddr,
    pub listen_port: u16,
}

impl ListenOptions {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen, self.listen_port)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SocksUser {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SocksInbound {
    #[serde(flatten)]
    pub listen: ListenOptions,
    #[serde(default)]
    pub users: Vec<SocksUser>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DirectInbound {
    #[serde(flatten)]
    pub listen: ListenOptions,
    #[serde(default)]
    pub override_address: Option<String>,
    #[serde(default)]
    pub override_port: Option<u16>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    Socks(SocksInbound),
    Direct(DirectInbound),
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Inbound::Socks(_) => "socks",
            Inbound::Direct(_) => "direct",
        }
    }

    pub fn listen(&self) -> &ListenOptions {
        match self {
            Inbound::Socks(inbound) => &inbound.listen,
            Inbound::Direct(inbound) => &inbound.listen,
        }
    }

    pub(crate) fn listen_mut(&mut self) -> &mut ListenOptions {
        match self {
            Inbound::Socks(inbound) => &mut inbound.listen,
            Inbound::Direct(inbound) => &mut inbound.listen,
        }
    }

    pub fn tag(&self) -> &str {
        &self.listen().tag
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct DirectOutbound {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub connect_timeout: Option<String>,
}

impl DirectOutbound {
    /// Dial timeout; the environment default when unset or unparsable.
    pub fn timeout(&self) -> Duration {
        self.connect_timeout
            .as_deref()
            .and_then(parse_duration)
            .filter(|d| !d.is_zero())
            .unwrap_or(app_cfg().connect_timeout)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BlockOutbound {
    #[serde(default)]
    pub tag: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Direct(DirectOutbound),
    Block(BlockOutbound),
}

impl Outbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Direct(_) => "direct",
            Outbound::Block(_) => "block",
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Outbound::Direct(outbound) => &outbound.tag,
            Outbound::Block(outbound) => &outbound.tag,
        }
    }

    pub(crate) fn tag_mut(&mut self) -> &mut String {
        match self {
            Outbound::Direct(outbound) => &mut outbound.tag,
            Outbound::Block(outbound) => &mut outbound.tag,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RouteOptions {
    #[serde(default)]
    pub rules: Vec<RouteRule>,
    #[serde(default, rename = "final")]
    pub final_outbound: Option<String>,
}

/// One routing rule. Different matcher kinds are ANDed; values inside a
/// kind are ORed. Each matcher accepts a single value or a list.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RouteRule {
    #[serde(default, deserialize_with = "one_or_many")]
    pub inbound: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub domain: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub domain_suffix: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub domain_keyword: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub ip_cidr: Vec<IpNet>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub port: Vec<u16>,
    pub outbound: String,
}

impl RouteRule {
    pub fn has_matchers(&self) -> bool {
        !(self.inbound.is_empty()
            && self.domain.is_empty()
            && self.domain_suffix.is_empty()
            && self.domain_keyword.is_empty()
            && self.ip_cidr.is_empty()
            && self.port.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(item) => vec![item],
        OneOrMany::Many(items) => items,
    })
}

fn default_true() -> bool {
    true
}

fn default_listen() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_matchers_accept_single_values_and_lists() {
        let rule: RouteRule = serde_json::from_str(
            r#"{"domain_suffix": "example.com", "port": [80, 443], "outbound": "block"}"#,
        )
        .unwrap();
        assert_eq!(rule.domain_suffix, vec!["example.com".to_string()]);
        assert_eq!(rule.port, vec![80, 443]);
        assert!(rule.inbound.is_empty());
        assert!(rule.has_matchers());
    }

    #[test]
    fn ip_cidr_values_parse() {
        let rule: RouteRule =
            serde_json::from_str(r#"{"ip_cidr": ["10.0.0.0/8", "fd00::/8"], "outbound": "x"}"#)
                .unwrap();
        assert_eq!(rule.ip_cidr.len(), 2);
        assert!(rule.ip_cidr[0].contains(&"10.1.2.3".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn inbound_type_selects_variant() {
        let inbound: Inbound = serde_json::from_str(
            r#"{"type": "direct", "tag": "fwd", "listen_port": 9000,
                "override_address": "10.0.0.1", "override_port": 22, "sniff": true}"#,
        )
        .unwrap();
        assert_eq!(inbound.kind(), "direct");
        assert_eq!(inbound.tag(), "fwd");
        assert_eq!(
            inbound.listen().bind_addr(),
            "127.0.0.1:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn log_options_resolve_levels() {
        let mut log = LogOptions::default();
        assert!(log.timestamp);
        log.level = Some("debug".into());
        assert_eq!(log.level_filter(), Some(LevelFilter::Debug));
        log.level = Some("chatty".into());
        assert_eq!(log.level_filter(), None);
        log.disabled = true;
        assert_eq!(log.level_filter(), Some(LevelFilter::Off));
    }

    #[test]
    fn direct_outbound_timeout_falls_back() {
        let outbound = DirectOutbound {
            tag: "direct".into(),
            connect_timeout: Some("750ms".into()),
        };
        assert_eq!(outbound.timeout(), Duration::from_millis(750));

        let outbound = DirectOutbound {
            tag: "direct".into(),
            connect_timeout: None,
        };
        assert_eq!(outbound.timeout(), app_cfg().connect_timeout);
    }
}
