//! SCRAM-SHA-256 client mechanics.
//!
//! Implements the client side of [RFC 5802]/[RFC 7677] as used by postgres
//! SASL authentication: client-first, server-first, client-final with proof,
//! and verification of the server signature.
//!
//! [RFC 5802]: https://datatracker.ietf.org/doc/html/rfc5802
//! [RFC 7677]: https://datatracker.ietf.org/doc/html/rfc7677
use base64::prelude::{BASE64_STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::{
    Result,
    error::{Error, UnsupportedAuth},
    protocol::ProtocolError,
};

/// The mechanism name postgres advertises.
pub(crate) const MECHANISM: &str = "SCRAM-SHA-256";

/// gs2-cbind-flag "n": no channel binding.
const GS2_HEADER: &str = "n,,";
/// base64 of [`GS2_HEADER`], the whole channel-binding attribute value.
const CHANNEL_BINDING: &str = "biws";

type HmacSha256 = Hmac<Sha256>;

pub(crate) struct ScramClient {
    nonce: String,
    first_bare: String,
    server_signature: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(user: &str) -> ScramClient {
        Self::with_nonce(user, gen_nonce())
    }

    /// Nonce injection point for deterministic tests.
    pub fn with_nonce(user: &str, nonce: String) -> ScramClient {
        let first_bare = format!("n={},r={nonce}", escape_username(user));
        ScramClient { nonce, first_bare, server_signature: None }
    }

    /// `client-first-message`, the SASL "Initial Client Response".
    pub fn client_first(&self) -> String {
        format!("{GS2_HEADER}{}", self.first_bare)
    }

    /// Consume the `server-first-message` and produce the
    /// `client-final-message` carrying the proof.
    pub fn client_final(&mut self, password: &str, server_first: &[u8]) -> Result<String> {
        let server_first = std::str::from_utf8(server_first)
            .map_err(|_| ProtocolError::malformed("SCRAM server-first-message"))?;

        let mut combined_nonce = None;
        let mut salt = None;
        let mut iterations = None;

        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => combined_nonce = Some(v),
                Some(("s", v)) => salt = BASE64_STANDARD.decode(v).ok(),
                Some(("i", v)) => iterations = v.parse::<u32>().ok(),
                _ => { },
            }
        }

        let (Some(combined_nonce), Some(salt), Some(iterations)) = (combined_nonce, salt, iterations) else {
            return Err(ProtocolError::malformed("SCRAM server-first-message").into());
        };

        // the server appends its nonce to ours; anything else is an attack
        if !combined_nonce.starts_with(&self.nonce) || iterations == 0 {
            return Err(ProtocolError::malformed("SCRAM server-first-message").into());
        }

        let password = stringprep::saslprep(password)
            .map_err(|_| UnsupportedAuth("password not normalizable for SCRAM-SHA-256"))?;

        // SaltedPassword := Hi(Normalize(password), salt, i)
        let salted_password = hi(password.as_bytes(), &salt, iterations)?;

        // ClientKey := HMAC(SaltedPassword, "Client Key")
        let mut mac = hmac(&salted_password)?;
        mac.update(b"Client Key");
        let client_key = mac.finalize().into_bytes();

        // StoredKey := H(ClientKey)
        let stored_key = Sha256::digest(client_key);

        let client_final_wo_proof = format!("c={CHANNEL_BINDING},r={combined_nonce}");

        // AuthMessage := client-first-message-bare + "," + server-first-message
        //             + "," + client-final-message-without-proof
        let auth_message = format!("{},{server_first},{client_final_wo_proof}", self.first_bare);

        // ClientSignature := HMAC(StoredKey, AuthMessage)
        let mut mac = hmac(&stored_key)?;
        mac.update(auth_message.as_bytes());
        let client_signature = mac.finalize().into_bytes();

        // ClientProof := ClientKey XOR ClientSignature
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(key, sig)| key ^ sig)
            .collect();

        // ServerKey := HMAC(SaltedPassword, "Server Key")
        let mut mac = hmac(&salted_password)?;
        mac.update(b"Server Key");
        let server_key = mac.finalize().into_bytes();

        // ServerSignature := HMAC(ServerKey, AuthMessage)
        let mut mac = hmac(&server_key)?;
        mac.update(auth_message.as_bytes());
        self.server_signature = Some(mac.finalize().into_bytes().into());

        let mut client_final = format!("{client_final_wo_proof},p=");
        BASE64_STANDARD.encode_string(proof, &mut client_final);
        Ok(client_final)
    }

    /// Check the `server-final-message`; authentication is only valid if this
    /// verification passes.
    pub fn verify_server_final(&self, server_final: &[u8]) -> Result<()> {
        let server_final = std::str::from_utf8(server_final)
            .map_err(|_| ProtocolError::malformed("SCRAM server-final-message"))?;

        let verifier = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .and_then(|v| BASE64_STANDARD.decode(v).ok())
            .ok_or(ProtocolError::malformed("SCRAM server-final-message"))?;

        match self.server_signature {
            Some(expected) if verifier == expected => Ok(()),
            _ => Err(ProtocolError::malformed("SCRAM server signature").into()),
        }
    }
}

/// Hi(str, salt, i): PBKDF2-HMAC-SHA-256 with a one-block output.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 32]> {
    let mut mac = hmac(password)?;
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());

    let mut u: [u8; 32] = mac.finalize().into_bytes().into();
    let mut out = u;

    for _ in 1..iterations {
        let mut mac = hmac(password)?;
        mac.update(&u);
        u = mac.finalize().into_bytes().into();
        for (o, u) in out.iter_mut().zip(u.iter()) {
            *o ^= u;
        }
    }

    Ok(out)
}

fn hmac(key: &[u8]) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|_| Error::internal("hmac rejected key"))
}

/// `,` and `=` are attribute syntax in SCRAM messages and must be escaped in
/// the username.
fn escape_username(user: &str) -> String {
    let mut out = String::with_capacity(user.len());
    for ch in user.chars() {
        match ch {
            ',' => out.push_str("=2C"),
            '=' => out.push_str("=3D"),
            ch => out.push(ch),
        }
    }
    out
}

/// c-nonce: a sequence of random printable ascii characters.
fn gen_nonce() -> String {
    rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    // the SCRAM-SHA-256 example exchange from RFC 7677 §3
    const USER: &str = "user";
    const PASSWORD: &str = "pencil";
    const NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const CLIENT_FINAL: &str =
        "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ=";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn rfc7677_exchange() {
        let mut scram = ScramClient::with_nonce(USER, NONCE.into());
        assert_eq!(scram.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");

        let client_final = scram.client_final(PASSWORD, SERVER_FIRST.as_bytes()).unwrap();
        assert_eq!(client_final, CLIENT_FINAL);

        scram.verify_server_final(SERVER_FINAL.as_bytes()).unwrap();
    }

    #[test]
    fn rejects_forged_server_signature() {
        let mut scram = ScramClient::with_nonce(USER, NONCE.into());
        scram.client_final(PASSWORD, SERVER_FIRST.as_bytes()).unwrap();
        assert!(scram.verify_server_final(b"v=AAAA").is_err());
    }

    #[test]
    fn rejects_nonce_mismatch() {
        let mut scram = ScramClient::with_nonce(USER, NONCE.into());
        let err = scram.client_final(PASSWORD, b"r=stranger,s=AAAA,i=4096").unwrap_err();
        assert!(matches!(err.kind(), crate::ErrorKind::Protocol(_)));
    }

    #[test]
    fn username_escaping() {
        assert_eq!(escape_username("a=b,c"), "a=3Db=2Cc");
    }

    #[test]
    fn nonce_is_printable() {
        let nonce = gen_nonce();
        assert_eq!(nonce.len(), 24);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
