use std::fmt;
use std::net::IpAddr;

/// Rate-limit bucket key for one client, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Prefers the first hop of `X-Forwarded-For` when the server sits behind
    /// a trusted proxy, then the socket peer address.
    pub fn resolve(forwarded_for: Option<&str>, peer: Option<IpAddr>, trust_proxy: bool) -> Self {
        let forwarded = forwarded_for
            .filter(|_| trust_proxy)
            .and_then(|header| header.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());

        match (forwarded, peer) {
            (Some(hop), _) => Self(hop.to_string()),
            (None, Some(ip)) => Self(ip.to_string()),
            (None, None) => Self("unknown".to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
