//! Session configuration.

/// TLS certificate verification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVerify {
    /// Verify the server certificate against the system roots.
    #[default]
    Peer,
    /// Accept any certificate. Encryption without authentication; only for
    /// servers with self-signed certificates under operator control.
    None,
}

/// Configuration for one watched mailbox session.
#[derive(Clone)]
pub struct SessionConfig {
    /// Server hostname.
    pub server: String,
    /// Server port (default 993).
    pub port: u16,
    /// Connect with implicit TLS (default). When false the session connects
    /// in plaintext and requires the server to advertise STARTTLS.
    pub tls: bool,
    /// Account name for LOGIN.
    pub username: String,
    /// Account password for LOGIN. Cleared from the session the moment the
    /// LOGIN command bytes are written.
    pub password: String,
    /// Session name used in diagnostics.
    pub name: String,
    /// Mailbox to watch (default "INBOX").
    pub mailbox: String,
    /// Certificate verification mode (default [`TlsVerify::Peer`]).
    pub ssl_verify: TlsVerify,
}

impl SessionConfig {
    /// Creates a configuration with defaults for the optional fields.
    #[must_use]
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            port: 993,
            tls: true,
            username: username.into(),
            password: password.into(),
            name: name.into(),
            mailbox: "INBOX".to_string(),
            ssl_verify: TlsVerify::default(),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables or disables implicit TLS.
    #[must_use]
    pub const fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Sets the mailbox to watch.
    #[must_use]
    pub fn mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailbox = mailbox.into();
        self
    }

    /// Sets the certificate verification mode.
    #[must_use]
    pub const fn ssl_verify(mut self, verify: TlsVerify) -> Self {
        self.ssl_verify = verify;
        self
    }

    /// Validates the configuration, naming the first problem found.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] for a missing required field.
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.is_empty() {
            return Err(crate::Error::Config("server must not be empty".to_string()));
        }
        if self.username.is_empty() {
            return Err(crate::Error::Config(
                "username must not be empty".to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(crate::Error::Config(
                "password must not be empty".to_string(),
            ));
        }
        if self.name.is_empty() {
            return Err(crate::Error::Config("name must not be empty".to_string()));
        }
        if self.mailbox.is_empty() {
            return Err(crate::Error::Config(
                "mailbox must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("mailbox", &self.mailbox)
            .field("ssl_verify", &self.ssl_verify)
            .finish()
    }
}
