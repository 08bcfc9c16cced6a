//! Server identity.

use std::fmt;
use std::time::Duration;

/// Character encoding declared for a server.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub enum EncodingType {
    /// Try UTF-8, degrade on invalid sequences.
    #[default]
    Auto,
    /// The server is known to speak UTF-8; never degrade.
    Utf8,
    /// A fixed legacy charset by WHATWG label, e.g. `"windows-1251"`.
    Custom(String),
}

/// Formatting variants for [`ServerInfo::format`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerFormat {
    /// `host`, plus `:port` when the port is not the protocol default.
    WithOptionalPort,
    /// Always `host:port`.
    WithPort,
}

/// Identity of a remote server as seen by a control socket.
///
/// Two sockets talk to "the same server" for cache and lock purposes when
/// their `ServerInfo` values compare equal, so the type derives full
/// structural equality and hashing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ServerInfo {
    /// Hostname or address, as entered by the user (pre-IDN).
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Account name; empty for anonymous.
    pub user: String,
    /// Protocol default port, used by [`ServerFormat::WithOptionalPort`].
    pub default_port: u16,
    /// Declared control-connection encoding.
    pub encoding: EncodingType,
    /// Skip any configured proxy for this server.
    pub bypass_proxy: bool,
    /// Known timezone offset of the server clock, if the capability was
    /// probed.
    pub timezone_offset: Option<i64>,
}

impl ServerInfo {
    /// Creates a server identity with defaults for everything but the
    /// endpoint.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: String::new(),
            default_port: port,
            encoding: EncodingType::Auto,
            bypass_proxy: false,
            timezone_offset: None,
        }
    }

    /// Sets the account name.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the declared encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: EncodingType) -> Self {
        self.encoding = encoding;
        self
    }

    /// Marks the server as reachable without the configured proxy.
    #[must_use]
    pub fn with_bypass_proxy(mut self, bypass: bool) -> Self {
        self.bypass_proxy = bypass;
        self
    }

    /// Returns the server clock offset, if known.
    #[must_use]
    pub fn timezone_offset(&self) -> Option<Duration> {
        self.timezone_offset
            .map(|secs| Duration::from_secs(secs.unsigned_abs()))
    }

    /// Renders the endpoint for user-visible messages.
    #[must_use]
    pub fn format(&self, format: ServerFormat) -> String {
        match format {
            ServerFormat::WithOptionalPort if self.port == self.default_port => self.host.clone(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(ServerFormat::WithOptionalPort))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_port_is_elided_for_default() {
        let server = ServerInfo::new("ftp.example.com", 21);
        assert_eq!(server.format(ServerFormat::WithOptionalPort), "ftp.example.com");
        assert_eq!(server.format(ServerFormat::WithPort), "ftp.example.com:21");
    }

    #[test]
    fn non_default_port_is_shown() {
        let mut server = ServerInfo::new("ftp.example.com", 2121);
        server.default_port = 21;
        assert_eq!(
            server.format(ServerFormat::WithOptionalPort),
            "ftp.example.com:2121"
        );
    }

    #[test]
    fn identity_includes_user() {
        let a = ServerInfo::new("h", 21).with_user("alice");
        let b = ServerInfo::new("h", 21).with_user("bob");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
