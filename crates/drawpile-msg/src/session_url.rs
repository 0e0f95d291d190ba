//! Session addressing
//!
//! Sessions are addressed as `drawpile://host[:port]/session`.

use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::UrlError;

/// URL scheme for drawing sessions
pub const SCHEME: &str = "drawpile";

/// Port used when a session URL does not name one
pub const DEFAULT_PORT: u16 = 27750;

/// A parsed session address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUrl {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Session id or alias, if the URL names one
    pub session: Option<String>,
}

impl SessionUrl {
    /// Parse a session URL
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let url = Url::parse(input)?;
        if url.scheme() != SCHEME {
            return Err(UrlError::WrongScheme(url.scheme().to_string()));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(UrlError::MissingHost)?
            .to_string();
        let session = url
            .path()
            .trim_matches('/')
            .split('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            session,
        })
    }

    /// `host:port` string suitable for connecting
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host.trim_matches(['[', ']']), self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for SessionUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SessionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}://{}", self.host)?;
        if self.port != DEFAULT_PORT {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "/")?;
        if let Some(session) = &self.session {
            write!(f, "{session}")?;
        }
        Ok(())
    }
}
