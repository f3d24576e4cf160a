//! Parsing, normalisation and validation of configuration text.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::common::error::{BoxError, BoxResult};
use crate::common::time::parse_duration;

use super::domain::{DirectOutbound, Inbound, Outbound, Profile};

/// Parse configuration text into a validated profile.
///
/// Omitted inbound tags become `<type>-in-<index>`, omitted outbound tags
/// become the outbound type, and an implicit `direct` outbound is added when
/// the profile declares none.
pub fn parse(text: &str) -> BoxResult<Profile> {
    let mut profile: Profile = serde_json::from_str(text)?;
    normalise(&mut profile);
    validate(&profile)?;
    Ok(profile)
}

fn normalise(profile: &mut Profile) {
    for (index, inbound) in profile.inbounds.iter_mut().enumerate() {
        let kind = inbound.kind();
        let listen = inbound.listen_mut();
        if listen.tag.is_empty() {
            listen.tag = format!("{kind}-in-{index}");
        }
    }

    for outbound in profile.outbounds.iter_mut() {
        let kind = outbound.kind();
        let tag = outbound.tag_mut();
        if tag.is_empty() {
            *tag = kind.to_string();
        }
    }

    if profile.outbounds.is_empty() {
        profile.outbounds.push(Outbound::Direct(DirectOutbound {
            tag: "direct".into(),
            connect_timeout: None,
        }));
    }
}

/// Check the cross references and value ranges of a profile.
pub fn validate(profile: &Profile) -> BoxResult<()> {
    if profile.log.level_filter().is_none() {
        return Err(BoxError::config(format!(
            "unknown log level `{}`",
            profile.log.level.as_deref().unwrap_or_default()
        )));
    }

    if profile.inbounds.is_empty() {
        return Err(BoxError::config("at least one inbound is required"));
    }

    let mut inbound_tags = HashSet::new();
    for (index, inbound) in profile.inbounds.iter().enumerate() {
        if !inbound_tags.insert(inbound.tag()) {
            return Err(BoxError::config(format!(
                "inbound tag `{}` is used twice",
                inbound.tag()
            )));
        }
        if let Some(other) = profile.inbounds[..index]
            .iter()
            .find(|other| listen_conflicts(other.listen().bind_addr(), inbound.listen().bind_addr()))
        {
            return Err(BoxError::config(format!(
                "inbound `{}` listens on the same address as `{}`",
                inbound.tag(),
                other.tag()
            )));
        }
        validate_inbound(inbound)?;
    }

    let mut outbound_tags = HashSet::new();
    for outbound in &profile.outbounds {
        if !outbound_tags.insert(outbound.tag()) {
            return Err(BoxError::config(format!(
                "outbound tag `{}` is used twice",
                outbound.tag()
            )));
        }
        if let Outbound::Direct(direct) = outbound {
            if let Some(timeout) = direct.connect_timeout.as_deref() {
                if parse_duration(timeout).is_none() {
                    return Err(BoxError::config(format!(
                        "outbound `{}`: invalid connect_timeout `{timeout}`",
                        direct.tag
                    )));
                }
            }
        }
    }

    for (index, rule) in profile.route.rules.iter().enumerate() {
        if !rule.has_matchers() {
            return Err(BoxError::config(format!("route rule {index} has no matchers")));
        }
        if !outbound_tags.contains(rule.outbound.as_str()) {
            return Err(BoxError::config(format!(
                "route rule {index}: unknown outbound `{}`",
                rule.outbound
            )));
        }
        if let Some(tag) = rule
            .inbound
            .iter()
            .find(|tag| !inbound_tags.contains(tag.as_str()))
        {
            return Err(BoxError::config(format!(
                "route rule {index}: unknown inbound `{tag}`"
            )));
        }
    }

    if let Some(tag) = profile.route.final_outbound.as_deref() {
        if !outbound_tags.contains(tag) {
            return Err(BoxError::config(format!("route final: unknown outbound `{tag}`")));
        }
    }

    Ok(())
}

/// Two fixed ports collide when the addresses are equal or either one is a
/// wildcard. Ephemeral ports never collide.
fn listen_conflicts(a: SocketAddr, b: SocketAddr) -> bool {
    a.port() != 0
        && a.port() == b.port()
        && (a.ip() == b.ip() || a.ip().is_unspecified() || b.ip().is_unspecified())
}

fn validate_inbound(inbound: &Inbound) -> BoxResult<()> {
    match inbound {
        Inbound::Socks(socks) => {
            for user in &socks.users {
                if user.username.is_empty() || user.username.len() > 255 {
                    return Err(BoxError::config(format!(
                        "inbound `{}`: username must be 1-255 bytes",
                        socks.listen.tag
                    )));
                }
                if user.password.is_empty() || user.password.len() > 255 {
                    return Err(BoxError::config(format!(
                        "inbound `{}`: password must be 1-255 bytes",
                        socks.listen.tag
                    )));
                }
            }
        }
        Inbound::Direct(direct) => {
            let has_address = direct
                .override_address
                .as_deref()
                .is_some_and(|address| !address.trim().is_empty());
            let has_port = direct.override_port.is_some_and(|port| port != 0);
            if !has_address || !has_port {
                return Err(BoxError::config(format!(
                    "inbound `{}`: direct inbound requires override_address and override_port",
                    direct.listen.tag
                )));
            }
        }
    }
    Ok(())
}
