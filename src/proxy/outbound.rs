//! Outbound dialing: connect directly or refuse.

use std::io;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::profile::Outbound;

use super::address::{Destination, Host};

/// Result of handing a destination to an outbound.
#[derive(Debug)]
pub enum Dialed {
    Connected(TcpStream),
    Blocked,
}

/// Open the upstream side of a connection through `outbound`.
pub async fn dial(outbound: &Outbound, destination: &Destination) -> io::Result<Dialed> {
    let direct = match outbound {
        Outbound::Block(_) => return Ok(Dialed::Blocked),
        Outbound::Direct(direct) => direct,
    };

    let connect = async {
        match &destination.host {
            Host::Ip(ip) => TcpStream::connect((*ip, destination.port)).await,
            Host::Domain(domain) => TcpStream::connect((domain.as_str(), destination.port)).await,
        }
    };
    let stream = match timeout(direct.timeout(), connect).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {destination} timed out"),
            ))
        }
    };
    let _ = stream.set_nodelay(true);
    Ok(Dialed::Connected(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::domain::{BlockOutbound, DirectOutbound};

    #[tokio::test]
    async fn block_never_dials() {
        let outbound = Outbound::Block(BlockOutbound { tag: "block".into() });
        let destination = Destination::new(Host::from_name("example.com"), 80);
        assert!(matches!(dial(&outbound, &destination).await.unwrap(), Dialed::Blocked));
    }

    #[tokio::test]
    async fn direct_connects_to_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let outbound = Outbound::Direct(DirectOutbound {
            tag: "direct".into(),
            connect_timeout: Some("2s".into()),
        });

        let dialed = dial(&outbound, &Destination::from(addr)).await.unwrap();
        assert!(matches!(dialed, Dialed::Connected(_)));
        assert!(listener.accept().await.is_ok());
    }
}
