//! Server run-time parameter registry.
//!
//! The backend reports parameters it considers interesting
//! (`client_encoding`, `DateStyle`, `server_version`, ...) through
//! `ParameterStatus` messages, both during startup and asynchronously whenever
//! a `SET` changes one. The registry keeps the latest value of each.
use std::collections::HashMap;

use crate::common::{ByteStr, verbose};

#[derive(Debug, Default)]
pub struct ServerSettings {
    params: HashMap<ByteStr, ByteStr>,
}

/// Text encoding derived from `client_encoding`.
///
/// Decoded text flows into rust `str`, so only UTF-8 compatible encodings are
/// usable; anything else fails at decode time instead of corrupting data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    /// Server-side "no conversion" encoding; values must still be valid UTF-8
    /// to become rust strings.
    SqlAscii,
    Unsupported,
}

impl ServerSettings {
    /// Record a `ParameterStatus` report.
    ///
    /// A changed `client_encoding` applies to subsequent codec calls only.
    pub(crate) fn apply(&mut self, name: ByteStr, value: ByteStr) {
        verbose!("ParameterStatus {name}={value}");
        self.params.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(ByteStr::as_str)
    }

    pub fn server_version(&self) -> Option<&str> {
        self.get("server_version")
    }

    pub fn client_encoding(&self) -> &str {
        self.get("client_encoding").unwrap_or("UTF8")
    }

    pub fn encoding(&self) -> Encoding {
        let name = self.client_encoding();
        if name.eq_ignore_ascii_case("UTF8") || name.eq_ignore_ascii_case("UNICODE") {
            Encoding::Utf8
        } else if name.eq_ignore_ascii_case("SQL_ASCII") {
            Encoding::SqlAscii
        } else {
            Encoding::Unsupported
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tracks_latest_value() {
        let mut settings = ServerSettings::default();
        settings.apply("DateStyle".into(), "ISO, MDY".into());
        settings.apply("DateStyle".into(), "German".into());
        assert_eq!(settings.get("DateStyle"), Some("German"));
        assert_eq!(settings.get("TimeZone"), None);
    }

    #[test]
    fn encoding_derivation() {
        let mut settings = ServerSettings::default();
        assert_eq!(settings.encoding(), Encoding::Utf8);

        settings.apply("client_encoding".into(), "utf8".into());
        assert_eq!(settings.encoding(), Encoding::Utf8);

        settings.apply("client_encoding".into(), "SQL_ASCII".into());
        assert_eq!(settings.encoding(), Encoding::SqlAscii);

        settings.apply("client_encoding".into(), "LATIN1".into());
        assert_eq!(settings.encoding(), Encoding::Unsupported);
    }

    #[test]
    fn server_version_lookup() {
        let mut settings = ServerSettings::default();
        settings.apply("server_version".into(), "16.3".into());
        assert_eq!(settings.server_version(), Some("16.3"));
    }
}
