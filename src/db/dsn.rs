//! MySQL connection descriptor.
//!
//! A [`Dsn`] renders as
//! `user:password@tcp(host:port)/database?charset=C&collation=L&parseTime=P&loc=Z`.
//! Field order and parameter names are fixed so the descriptor stays readable
//! by every tool that understands this format.

use crate::config::DbConf;
use crate::error::{DbError, DbResult};
use sqlx::mysql::MySqlConnectOptions;
use std::fmt;
use tracing::debug;

const PROTOCOL: &str = "tcp";

/// Normalized, validated connection descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct Dsn {
    pub user: String,
    /// Contains sensitive data - never log, use [`Dsn::masked`]
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub charset: String,
    pub collation: String,
    pub parse_time: bool,
    pub loc: String,
}

impl Dsn {
    /// Build a descriptor from a configuration, normalizing it first.
    pub fn from_conf(conf: &DbConf) -> DbResult<Self> {
        let conf = conf.normalized();

        check_chars("user", &conf.user, "@:/")?;
        if conf.host.is_empty() {
            return Err(DbError::configuration("host cannot be empty"));
        }
        check_chars("host", &conf.host, "/()?&=@")?;
        check_chars("database", &conf.database, "/()?&=@")?;
        check_identifier("charset", &conf.charset)?;
        check_identifier("collation", &conf.collation)?;
        if conf.loc.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(DbError::configuration(format!(
                "loc contains invalid characters: {:?}",
                conf.loc
            )));
        }

        Ok(Self {
            user: conf.user,
            password: conf.password,
            host: conf.host,
            port: conf.port,
            database: conf.database,
            charset: conf.charset,
            collation: conf.collation,
            parse_time: conf.parse_time,
            loc: conf.loc,
        })
    }

    /// Parse a descriptor in the rendered format.
    ///
    /// Missing parameters take the same defaults as [`DbConf::normalize`];
    /// unknown parameters are ignored.
    pub fn parse(s: &str) -> DbResult<Self> {
        let invalid = |reason: &str| DbError::configuration(format!("Invalid DSN: {reason}"));

        // The password may contain '@', every later field may not.
        let at = s.rfind('@').ok_or_else(|| invalid("missing '@'"))?;
        let (credentials, rest) = (&s[..at], &s[at + 1..]);
        let (user, password) = credentials.split_once(':').unwrap_or((credentials, ""));

        let open = rest.find('(').ok_or_else(|| invalid("missing '(' after protocol"))?;
        let protocol = &rest[..open];
        if protocol != PROTOCOL {
            return Err(invalid(&format!("unsupported protocol '{protocol}'")));
        }
        let close = rest.find(')').ok_or_else(|| invalid("missing ')'"))?;
        let address = &rest[open + 1..close];
        let after = rest[close + 1..]
            .strip_prefix('/')
            .ok_or_else(|| invalid("missing '/' before database"))?;

        let (database, query) = after.split_once('?').unwrap_or((after, ""));
        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .map_err(|_| invalid(&format!("invalid port '{port}'")))?,
            ),
            None => (address, 0),
        };

        let mut conf = DbConf {
            user: user.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            database: database.to_string(),
            ..DbConf::default()
        };

        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "charset" => conf.charset = value.into_owned(),
                "collation" => conf.collation = value.into_owned(),
                "loc" => conf.loc = value.into_owned(),
                "parseTime" => {
                    conf.parse_time = match value.as_ref() {
                        "true" | "1" => true,
                        "false" | "0" => false,
                        other => return Err(invalid(&format!("invalid parseTime '{other}'"))),
                    }
                }
                other => debug!(param = %other, "Ignoring unknown DSN parameter"),
            }
        }

        Self::from_conf(&conf)
    }

    /// Rendered descriptor with the password replaced by `****`.
    pub fn masked(&self) -> String {
        let password = if self.password.is_empty() { "" } else { "****" };
        self.render(password)
    }

    /// Configuration carrying the descriptor fields, pool fields left unset.
    pub fn to_conf(&self) -> DbConf {
        DbConf {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            charset: self.charset.clone(),
            collation: self.collation.clone(),
            parse_time: self.parse_time,
            loc: self.loc.clone(),
            ..DbConf::default()
        }
    }

    /// Translate into sqlx connect options.
    ///
    /// `Local` keeps the server session time zone, `UTC` selects `+00:00`,
    /// any other name is handed to the server as-is.
    pub fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .charset(&self.charset)
            .collation(&self.collation);

        if !self.password.is_empty() {
            options = options.password(&self.password);
        }
        if !self.database.is_empty() {
            options = options.database(&self.database);
        }

        let timezone: Option<String> = match self.loc.as_str() {
            "Local" => None,
            "UTC" => Some("+00:00".to_string()),
            other => Some(other.to_string()),
        };
        options.timezone(timezone)
    }

    fn render(&self, password: &str) -> String {
        let loc: String = url::form_urlencoded::byte_serialize(self.loc.as_bytes()).collect();
        format!(
            "{}:{}@{}({}:{})/{}?charset={}&collation={}&parseTime={}&loc={}",
            self.user,
            password,
            PROTOCOL,
            self.host,
            self.port,
            self.database,
            self.charset,
            self.collation,
            self.parse_time,
            loc
        )
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&self.password))
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dsn").field(&self.masked()).finish()
    }
}

fn check_chars(field: &str, value: &str, forbidden: &str) -> DbResult<()> {
    match value
        .chars()
        .find(|c| forbidden.contains(*c) || c.is_whitespace() || c.is_control())
    {
        Some(c) => Err(DbError::configuration(format!(
            "{field} contains invalid character {c:?}"
        ))),
        None => Ok(()),
    }
}

fn check_identifier(field: &str, value: &str) -> DbResult<()> {
    if value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(DbError::configuration(format!(
            "{field} must be an identifier, got {value:?}"
        )))
    }
}
