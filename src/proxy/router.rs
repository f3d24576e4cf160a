//! Rule-based outbound selection.

use ipnet::IpNet;

use crate::profile::{Profile, RouteRule};

use super::address::Destination;

/// Inputs a routing decision is based on.
#[derive(Debug)]
pub struct RouteContext<'a> {
    pub inbound: &'a str,
    pub destination: &'a Destination,
}

/// Which rule matched, or the fallback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchedRule {
    Rule(usize),
    Final,
}

impl std::fmt::Display for MatchedRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchedRule::Rule(index) => write!(f, "rule[{index}]"),
            MatchedRule::Final => write!(f, "final"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteDecision {
    pub outbound: String,
    pub rule: MatchedRule,
}

/// Immutable routing table built from a validated profile.
#[derive(Debug)]
pub struct Router {
    rules: Vec<RouteRule>,
    final_outbound: String,
}

impl Router {
    pub fn new(profile: &Profile) -> Self {
        Self {
            rules: profile.route.rules.clone(),
            final_outbound: profile.final_outbound().to_string(),
        }
    }

    pub fn route(&self, ctx: &RouteContext<'_>) -> RouteDecision {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule_matches(rule, ctx) {
                return RouteDecision {
                    outbound: rule.outbound.clone(),
                    rule: MatchedRule::Rule(index),
                };
            }
        }
        RouteDecision {
            outbound: self.final_outbound.clone(),
            rule: MatchedRule::Final,
        }
    }
}

fn rule_matches(rule: &RouteRule, ctx: &RouteContext<'_>) -> bool {
    let host = &ctx.destination.host;

    if !rule.inbound.is_empty() && !rule.inbound.iter().any(|tag| tag == ctx.inbound) {
        return false;
    }

    if !rule.port.is_empty() && !rule.port.contains(&ctx.destination.port) {
        return false;
    }

    let has_domain_matchers = !(rule.domain.is_empty()
        && rule.domain_suffix.is_empty()
        && rule.domain_keyword.is_empty());
    if has_domain_matchers {
        let Some(domain) = host.domain() else {
            return false;
        };
        let hit = rule.domain.iter().any(|d| d.eq_ignore_ascii_case(domain))
            || rule.domain_suffix.iter().any(|s| suffix_matches(domain, s))
            || rule
                .domain_keyword
                .iter()
                .any(|k| domain.contains(&k.to_ascii_lowercase()));
        if !hit {
            return false;
        }
    }

    if !rule.ip_cidr.is_empty() {
        let Some(ip) = host.ip() else {
            return false;
        };
        if !rule.ip_cidr.iter().any(|net: &IpNet| net.contains(&ip)) {
            return false;
        }
    }

    true
}

/// `example.com` and `.example.com` both match `example.com` and any
/// subdomain of it, but not `badexample.com`.
fn suffix_matches(domain: &str, suffix: &str) -> bool {
    let suffix = suffix.trim_start_matches('.').to_ascii_lowercase();
    if suffix.is_empty() {
        return false;
    }
    domain == suffix
        || (domain.len() > suffix.len()
            && domain.ends_with(&suffix)
            && domain.as_bytes()[domain.len() - suffix.len() - 1] == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile;
    use crate::proxy::address::Host;

    fn router(rules: &str) -> Router {
        let text = format!(
            r#"{{"inbounds": [{{"type": "socks", "tag": "s", "listen_port": 0}},
                              {{"type": "socks", "tag": "t", "listen_port": 0}}],
                 "outbounds": [{{"type": "direct"}}, {{"type": "block"}}],
                 "route": {{"rules": {rules}}}}}"#
        );
        Router::new(&profile::parse(&text).unwrap())
    }

    fn decide(router: &Router, inbound: &str, host: &str, port: u16) -> RouteDecision {
        let destination = Destination::new(Host::from_name(host), port);
        router.route(&RouteContext {
            inbound,
            destination: &destination,
        })
    }

    #[test]
    fn unmatched_traffic_uses_final() {
        let router = router("[]");
        let decision = decide(&router, "s", "example.com", 80);
        assert_eq!(decision.outbound, "direct");
        assert_eq!(decision.rule, MatchedRule::Final);
    }

    #[test]
    fn domain_suffix_respects_label_boundaries() {
        let router = router(r#"[{"domain_suffix": "ads.example", "outbound": "block"}]"#);
        assert_eq!(decide(&router, "s", "ads.example", 443).outbound, "block");
        assert_eq!(decide(&router, "s", "cdn.ads.example", 443).outbound, "block");
        assert_eq!(decide(&router, "s", "badads.example", 443).outbound, "direct");
        assert_eq!(decide(&router, "s", "10.0.0.1", 443).outbound, "direct");
    }

    #[test]
    fn matcher_kinds_are_anded_and_values_ored() {
        let router = router(
            r#"[{"inbound": ["t"], "port": [25, 465], "outbound": "block"}]"#,
        );
        assert_eq!(decide(&router, "t", "mail.example", 465).outbound, "block");
        assert_eq!(decide(&router, "t", "mail.example", 25).rule, MatchedRule::Rule(0));
        assert_eq!(decide(&router, "s", "mail.example", 25).outbound, "direct");
        assert_eq!(decide(&router, "t", "mail.example", 587).outbound, "direct");
    }

    #[test]
    fn ip_cidr_only_matches_ip_destinations() {
        let router = router(r#"[{"ip_cidr": "192.168.0.0/16", "outbound": "block"}]"#);
        assert_eq!(decide(&router, "s", "192.168.1.20", 22).outbound, "block");
        assert_eq!(decide(&router, "s", "172.16.0.1", 22).outbound, "direct");
        assert_eq!(decide(&router, "s", "router.lan", 22).outbound, "direct");
    }

    #[test]
    fn first_matching_rule_wins() {
        let router = router(
            r#"[{"domain_keyword": "track", "outbound": "block"},
                {"domain": "tracker.example", "outbound": "direct"}]"#,
        );
        let decision = decide(&router, "s", "tracker.example", 80);
        assert_eq!(decision.outbound, "block");
        assert_eq!(decision.rule.to_string(), "rule[0]");
    }
}
