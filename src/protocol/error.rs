//! Protocol error.

/// An error translating the postgres wire format.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("{}", unexpected_display(.found, .expect, .phase))]
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    #[error("unknown authentication request {auth}")]
    UnknownAuth {
        auth: u32,
    },
    #[error("malformed {message} message")]
    Malformed {
        message: &'static str,
    },
    #[error("{message}")]
    Misuse {
        message: &'static str,
    },
}

fn unexpected_display(found: &u8, expect: &Option<u8>, phase: &Option<&'static str>) -> String {
    let mut out = String::from("unexpected message ");
    out.push_str(&tag_display(*found));
    if let Some(expect) = expect {
        out.push_str(", expected ");
        out.push_str(&tag_display(*expect));
    }
    if let Some(phase) = phase {
        out.push_str(" during ");
        out.push_str(phase);
    }
    out
}

fn tag_display(tag: u8) -> String {
    match tag.is_ascii_graphic() {
        true => format!("'{}'", tag as char),
        false => format!("0x{tag:02x}"),
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn malformed(message: &'static str) -> ProtocolError {
        Self::Malformed { message }
    }

    pub(crate) fn misuse(message: &'static str) -> ProtocolError {
        Self::Misuse { message }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_names_the_tags() {
        let err = ProtocolError::unexpected(b'Z', b'D');
        assert_eq!(err.to_string(), "unexpected message 'D', expected 'Z'");

        let err = ProtocolError::unexpected_phase(0x01, "startup phase");
        assert_eq!(err.to_string(), "unexpected message 0x01 during startup phase");
    }
}
