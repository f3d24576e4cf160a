//! SOCKS5 server side handshake (RFC 1928, RFC 1929 authentication).

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::profile::domain::SocksUser;

use super::address::{Destination, Host};

pub const VER_SOCKS5: u8 = 0x05;
pub const VER_AUTH: u8 = 0x01;

pub const METHOD_NONE: u8 = 0x00;
pub const METHOD_USERNAME: u8 = 0x02;
pub const METHOD_INVALID: u8 = 0xff;

pub const ADDR_TYPE_IPV4: u8 = 0x01;
pub const ADDR_TYPE_DOMAIN_NAME: u8 = 0x03;
pub const ADDR_TYPE_IPV6: u8 = 0x04;

pub const CMD_CONNECT: u8 = 0x01;

const AUTH_SUCCESS: u8 = 0x00;
const AUTH_FAILURE: u8 = 0x01;

/// Reply codes sent after the request has been handled.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    NotAllowed = 0x02,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl Reply {
    /// Pick the reply that best describes a failed dial.
    pub fn for_dial_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Reply::ConnectionRefused,
            _ => Reply::HostUnreachable,
        }
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Run method negotiation, optional authentication and read the CONNECT
/// request. Unsupported commands and address types are answered before the
/// error is returned; the success reply is left to the caller.
pub async fn accept<S>(stream: &mut S, users: &[SocksUser]) -> io::Result<Destination>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = stream.read_u8().await?;
    if version != VER_SOCKS5 {
        return Err(invalid(format!("unsupported SOCKS version: {version}")));
    }

    let method_len = stream.read_u8().await? as usize;
    if method_len == 0 {
        return Err(invalid("empty SOCKS method list"));
    }
    let mut methods = vec![0u8; method_len];
    stream.read_exact(&mut methods).await?;

    let wanted = if users.is_empty() {
        METHOD_NONE
    } else {
        METHOD_USERNAME
    };
    if !methods.contains(&wanted) {
        stream.write_all(&[VER_SOCKS5, METHOD_INVALID]).await?;
        return Err(invalid("no acceptable SOCKS method offered"));
    }
    stream.write_all(&[VER_SOCKS5, wanted]).await?;

    if wanted == METHOD_USERNAME {
        authenticate(stream, users).await?;
    }

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [version, command, _reserved, addr_type] = header;
    if version != VER_SOCKS5 {
        return Err(invalid(format!("invalid SOCKS request version: {version}")));
    }
    if command != CMD_CONNECT {
        write_reply(stream, Reply::CommandNotSupported, None).await?;
        return Err(invalid(format!("unsupported SOCKS command: {command}")));
    }

    let host = match addr_type {
        ADDR_TYPE_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Host::Ip(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        ADDR_TYPE_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Host::Ip(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        ADDR_TYPE_DOMAIN_NAME => {
            let len = stream.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await?;
            let name = String::from_utf8(name)
                .map_err(|e| invalid(format!("failed to decode domain name: {e}")))?;
            Host::from_name(&name)
        }
        other => {
            write_reply(stream, Reply::AddressTypeNotSupported, None).await?;
            return Err(invalid(format!("unsupported SOCKS address type: {other}")));
        }
    };
    let port = stream.read_u16().await?;

    Ok(Destination::new(host, port))
}

async fn authenticate<S>(stream: &mut S, users: &[SocksUser]) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = stream.read_u8().await?;
    if version != VER_AUTH {
        return Err(invalid(format!("unsupported SOCKS auth version: {version}")));
    }

    let username_len = stream.read_u8().await? as usize;
    let mut username = vec![0u8; username_len];
    stream.read_exact(&mut username).await?;
    let password_len = stream.read_u8().await? as usize;
    let mut password = vec![0u8; password_len];
    stream.read_exact(&mut password).await?;

    let accepted = users
        .iter()
        .any(|u| u.username.as_bytes() == username && u.password.as_bytes() == password);
    if !accepted {
        stream.write_all(&[VER_AUTH, AUTH_FAILURE]).await?;
        return Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "SOCKS credentials rejected",
        ));
    }
    stream.write_all(&[VER_AUTH, AUTH_SUCCESS]).await
}

/// Write a reply carrying `bound` (or `0.0.0.0:0`) as the bound address.
pub async fn write_reply<S>(stream: &mut S, reply: Reply, bound: Option<SocketAddr>) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bound = bound.unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
    let mut response = vec![VER_SOCKS5, reply as u8, 0x00];
    match bound.ip() {
        IpAddr::V4(ip) => {
            response.push(ADDR_TYPE_IPV4);
            response.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            response.push(ADDR_TYPE_IPV6);
            response.extend_from_slice(&ip.octets());
        }
    }
    response.extend_from_slice(&bound.port().to_be_bytes());
    stream.write_all(&response).await?;
    stream.flush().await
}
