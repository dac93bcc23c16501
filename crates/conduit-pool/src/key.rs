//! Connection keys.

use std::fmt;

/// Transport scheme of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain TCP.
    Http,
    /// TLS over TCP.
    Https,
}

impl Scheme {
    /// Parses `http` or `https`, ignoring case.
    #[must_use]
    pub fn parse(scheme: &str) -> Option<Self> {
        if scheme.eq_ignore_ascii_case("http") {
            Some(Self::Http)
        } else if scheme.eq_ignore_ascii_case("https") {
            Some(Self::Https)
        } else {
            None
        }
    }

    /// Returns the scheme as it appears in a URI.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// Returns the port used when a URI has none.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    /// Returns `true` for [`Scheme::Https`].
    #[must_use]
    pub const fn is_tls(self) -> bool {
        matches!(self, Self::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies interchangeable connections: scheme, host, port and the TLS
/// configuration used to establish them.
///
/// Connections opened with different TLS configurations are never shared,
/// even for the same endpoint.
///
/// # Example
///
/// ```
/// use conduit_pool::{ConnectionKey, Scheme};
///
/// let plain = ConnectionKey::new(Scheme::Http, "Example.COM", 80);
/// assert_eq!(plain.host(), "example.com");
/// assert_eq!(plain.to_string(), "http://example.com:80");
///
/// let tls = ConnectionKey::new(Scheme::Https, "example.com", 443).with_tls_identity(7);
/// assert_eq!(tls.tls_identity(), Some(7));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    scheme: Scheme,
    host: String,
    port: u16,
    tls_identity: Option<u64>,
}

impl ConnectionKey {
    /// Creates a key; the host is normalized to lower case.
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        let mut host = host.into();
        host.make_ascii_lowercase();
        Self {
            scheme,
            host,
            port,
            tls_identity: None,
        }
    }

    /// Sets the identity of the TLS configuration.
    #[must_use]
    pub fn with_tls_identity(mut self, identity: u64) -> Self {
        self.tls_identity = Some(identity);
        self
    }

    /// Returns the scheme.
    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns the lower-cased host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the TLS configuration identity, if any.
    #[must_use]
    pub const fn tls_identity(&self) -> Option<u64> {
        self.tls_identity
    }

    /// Returns `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())?;
        if let Some(identity) = self.tls_identity {
            write!(f, "#tls{identity}")?;
        }
        Ok(())
    }
}
