//! Startup and authentication phase.
use md5::{Digest, Md5};

use crate::{
    Result,
    common::{ByteStr, verbose},
    connection::Config,
    error::{DbError, UnsupportedAuth},
    protocol::{
        TransactionStatus,
        backend::{self, Authentication, BackendMessage},
        frontend,
    },
    scram::{self, ScramClient},
    stream::PgStream,
};

/// Startup phase successful response.
pub(crate) struct StartupOutcome {
    /// Secret-key data the frontend must save to be able to issue cancel
    /// requests later.
    pub key_data: Option<backend::BackendKeyData>,
    /// Initial settings of backend parameters, such as `client_encoding`.
    pub params: Vec<(ByteStr, ByteStr)>,
    /// Status reported by the final `ReadyForQuery`.
    pub txn: TransactionStatus,
}

/// Perform the startup message and authentication exchange.
///
/// <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-START-UP>
pub(crate) async fn startup(config: &Config, stream: &mut PgStream) -> Result<StartupOutcome> {
    // To begin a session, a frontend opens a connection to the server and sends a startup message.

    // (Optionally, the startup message can include additional settings for run-time parameters.)

    stream.send_startup(frontend::Startup {
        user: config.user(),
        database: Some(config.dbname()),
        application_name: config.application_name(),
        params: config.startup_params(),
    });
    stream.flush().await?;

    // The server then sends an appropriate authentication request message,
    // to which the frontend must reply with an appropriate authentication response message (such as a password).
    //
    // For all authentication methods except GSSAPI, SSPI and SASL, there is at most one request and one response.
    // For GSSAPI, SSPI and SASL, multiple exchanges of packets may be needed to complete the authentication.

    loop {
        match recv_auth(stream).await? {
            Authentication::Ok => break,
            // The frontend must now send a PasswordMessage containing the password in clear-text form.
            Authentication::CleartextPassword => {
                stream.send(frontend::PasswordMessage {
                    password: config.password(),
                });
                stream.flush().await?;
            },
            // The frontend must now send a PasswordMessage containing the password (with user name)
            // encrypted via MD5, then encrypted again using the 4-byte random salt.
            Authentication::MD5Password { salt } => {
                let password = md5_password(config.user(), config.password(), salt);
                stream.send(frontend::PasswordMessage { password: &password });
                stream.flush().await?;
            },
            Authentication::SASL { mechanisms } => {
                sasl_authenticate(config, stream, &mechanisms).await?;
            },
            Authentication::KerberosV5 => Err(UnsupportedAuth("KerberosV5"))?,
            Authentication::GSS | Authentication::GSSContinue { .. } => Err(UnsupportedAuth("GSSAPI"))?,
            Authentication::SSPI => Err(UnsupportedAuth("SSPI"))?,
            Authentication::SASLContinue { .. } | Authentication::SASLFinal { .. } => {
                Err(backend::Authentication::unexpected_leg())?
            },
        }
    }

    // After having received AuthenticationOk, the frontend must wait for further messages from the server.
    // In this phase a backend process is being started, and the frontend is just an interested bystander.
    // It is still possible for the startup attempt to fail (ErrorResponse) or the server to decline support
    // for the requested minor protocol version (NegotiateProtocolVersion), but in the normal case the backend
    // will send some ParameterStatus messages, BackendKeyData, and finally ReadyForQuery.

    let mut params = vec![];
    let mut key_data = None;

    loop {
        match stream.recv().await? {
            BackendMessage::ReadyForQuery(rfq) => {
                return Ok(StartupOutcome { key_data, params, txn: rfq.status });
            },
            BackendMessage::BackendKeyData(new_key_data) => key_data = Some(new_key_data),
            BackendMessage::ParameterStatus(param) => params.push((param.name, param.value)),
            BackendMessage::NoticeResponse(notice) => {
                tracing::warn!("{}", DbError::parse(notice.fields(), None));
            },
            BackendMessage::NegotiateProtocolVersion(nego) => {
                tracing::warn!("server negotiated protocol 3.{}", nego.minor);
            },
            BackendMessage::ErrorResponse(err) => {
                Err(DbError::parse(err.fields(), None))?;
            },
            f => Err(f.unexpected("startup phase"))?,
        }
    }
}

/// Receive the next authentication request, skipping notices.
async fn recv_auth(stream: &mut PgStream) -> Result<Authentication> {
    loop {
        match stream.recv().await? {
            BackendMessage::Authentication(auth) => return Ok(auth),
            BackendMessage::NoticeResponse(notice) => {
                tracing::warn!("{}", DbError::parse(notice.fields(), None));
            },
            BackendMessage::NegotiateProtocolVersion(nego) => {
                tracing::warn!("server negotiated protocol 3.{}", nego.minor);
            },
            BackendMessage::ErrorResponse(err) => {
                Err(DbError::parse(err.fields(), None))?;
            },
            f => Err(f.unexpected("authentication"))?,
        }
    }
}

impl Authentication {
    fn unexpected_leg() -> crate::protocol::ProtocolError {
        crate::protocol::ProtocolError::unexpected_phase(Authentication::MSGTYPE, "authentication")
    }
}

/// The four-leg SCRAM-SHA-256 exchange.
async fn sasl_authenticate(
    config: &Config,
    stream: &mut PgStream,
    mechanisms: &bytes::Bytes,
) -> Result<()> {
    if !Authentication::sasl_mechanisms(mechanisms).any(|m| m == scram::MECHANISM) {
        // SCRAM-SHA-256-PLUS requires channel binding over TLS
        return Err(UnsupportedAuth("SASL mechanisms other than SCRAM-SHA-256").into());
    }

    let mut scram = ScramClient::new(config.user());

    let client_first = scram.client_first();
    stream.send(frontend::SaslInitialResponse {
        mechanism: scram::MECHANISM,
        response: client_first.as_bytes(),
    });
    stream.flush().await?;

    let Authentication::SASLContinue { data } = recv_auth(stream).await? else {
        return Err(Authentication::unexpected_leg().into());
    };

    let client_final = scram.client_final(config.password(), &data)?;
    stream.send(frontend::SaslResponse { response: client_final.as_bytes() });
    stream.flush().await?;

    let Authentication::SASLFinal { data } = recv_auth(stream).await? else {
        return Err(Authentication::unexpected_leg().into());
    };
    scram.verify_server_final(&data)?;

    verbose!("SCRAM-SHA-256 authentication complete");
    Ok(())
}

/// `"md5" || hex(md5(hex(md5(password || user)) || salt))`
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let inner = hex(&hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);
    format!("md5{}", hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0xf) as usize] as char);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_password_shape() {
        let pw = md5_password("alice", "secret", [1, 2, 3, 4]);
        assert!(pw.starts_with("md5"));
        assert_eq!(pw.len(), 3 + 32);
        assert!(pw[3..].chars().all(|c| c.is_ascii_hexdigit()));

        // deterministic and salt-sensitive
        assert_eq!(pw, md5_password("alice", "secret", [1, 2, 3, 4]));
        assert_ne!(pw, md5_password("alice", "secret", [4, 3, 2, 1]));
    }

    #[test]
    fn hex_lowercase() {
        assert_eq!(hex(&[0x00, 0xde, 0xad, 0x0f]), "00dead0f");
    }
}
