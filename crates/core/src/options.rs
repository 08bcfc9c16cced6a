//! Engine configuration consumed by the control socket.

use std::time::Duration;

/// Default inactivity timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Proxy protocol selection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProxyKind {
    /// HTTP `CONNECT`.
    Http,
    /// SOCKS 4.
    Socks4,
    /// SOCKS 5, optionally with username/password authentication.
    Socks5,
}

impl ProxyKind {
    /// Human-readable protocol name, used in status messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Socks4 => "SOCKS4",
            Self::Socks5 => "SOCKS5",
        }
    }
}

/// Proxy endpoint and credentials.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyOptions {
    /// Proxy protocol.
    pub kind: ProxyKind,
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Username; empty disables authentication.
    pub user: String,
    /// Password.
    pub password: String,
}

impl ProxyOptions {
    /// Creates proxy options without credentials.
    #[must_use]
    pub fn new(kind: ProxyKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            user: String::new(),
            password: String::new(),
        }
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }
}

/// Options consumed by the engine core.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineOptions {
    /// Inactivity timeout; [`Duration::ZERO`] disables timeout handling.
    pub timeout: Duration,
    /// Proxy configuration; `None` connects directly.
    pub proxy: Option<ProxyOptions>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            proxy: None,
        }
    }
}

impl EngineOptions {
    /// Sets the inactivity timeout. Zero disables it.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the proxy configuration.
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyOptions) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_timeout_and_no_proxy() {
        let options = EngineOptions::default();
        assert_eq!(options.timeout, DEFAULT_TIMEOUT);
        assert!(options.proxy.is_none());
    }

    #[test]
    fn builder_chains() {
        let options = EngineOptions::default()
            .with_timeout(Duration::ZERO)
            .with_proxy(
                ProxyOptions::new(ProxyKind::Socks5, "proxy", 1080).with_credentials("u", "p"),
            );
        assert_eq!(options.timeout, Duration::ZERO);
        let proxy = options.proxy.unwrap();
        assert_eq!(proxy.kind.name(), "SOCKS5");
        assert_eq!(proxy.user, "u");
    }
}
