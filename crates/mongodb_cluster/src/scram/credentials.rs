use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::Sha256;

use crate::util::errors::{Error, Result, StdError};

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

const CLIENT_KEY: &[u8] = b"Client Key";
const SERVER_KEY: &[u8] = b"Server Key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    ScramSha1,
    ScramSha256,
}

impl Mechanism {
    pub fn iterations(self) -> u32 {
        match self {
            Mechanism::ScramSha1 => 10000,
            Mechanism::ScramSha256 => 15000,
        }
    }

    pub fn salt_len(self) -> usize {
        match self {
            Mechanism::ScramSha1 => 16,
            Mechanism::ScramSha256 => 28,
        }
    }

    /// Prefix of the secret keys the credentials are stored under.
    pub fn secret_prefix(self) -> &'static str {
        match self {
            Mechanism::ScramSha1 => "sha1",
            Mechanism::ScramSha256 => "sha256",
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let invalid_key = |_| Error::StdError(StdError::InvalidArgument("invalid HMAC key length".to_string()));
        match self {
            Mechanism::ScramSha1 => {
                let mut mac = HmacSha1::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            Mechanism::ScramSha256 => {
                let mut mac = HmacSha256::new_from_slice(key).map_err(invalid_key)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Mechanism::ScramSha1 => Sha1::digest(data).to_vec(),
            Mechanism::ScramSha256 => Sha256::digest(data).to_vec(),
        }
    }

    /// SCRAM-SHA-1 hashes the password the way MONGODB-CR did before deriving keys from it.
    fn prepare_password(self, username: &str, password: &str) -> String {
        match self {
            Mechanism::ScramSha1 => {
                hex::encode(Md5::digest(format!("{username}:mongo:{password}").as_bytes()))
            }
            Mechanism::ScramSha256 => password.to_string(),
        }
    }

    /// `Hi(str, salt, i)` from RFC 5802: PBKDF2 with HMAC, a single block long.
    fn salted_password(self, password: &[u8], salt: &[u8], iterations: u32) -> Result<Vec<u8>> {
        let mut first = salt.to_vec();
        first.extend_from_slice(&1u32.to_be_bytes());

        let mut u = self.hmac(password, &first)?;
        let mut result = u.clone();
        for _ in 1..iterations {
            u = self.hmac(password, &u)?;
            result.iter_mut().zip(u.iter()).for_each(|(r, b)| *r ^= b);
        }
        Ok(result)
    }
}

/// One mechanism's derived credentials, shaped the way the automation agent reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScramCreds {
    pub iteration_count: u32,
    pub salt: String,
    pub server_key: String,
    pub stored_key: String,
}

pub fn generate_salt(mechanism: Mechanism) -> Vec<u8> {
    let mut salt = vec![0u8; mechanism.salt_len()];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

pub fn compute_credentials(
    mechanism: Mechanism,
    username: &str,
    password: &str,
    salt: &[u8],
) -> Result<ScramCreds> {
    let password = mechanism.prepare_password(username, password);
    let iterations = mechanism.iterations();
    let salted = mechanism.salted_password(password.as_bytes(), salt, iterations)?;

    let client_key = mechanism.hmac(&salted, CLIENT_KEY)?;
    let server_key = mechanism.hmac(&salted, SERVER_KEY)?;
    let stored_key = mechanism.hash(&client_key);

    Ok(ScramCreds {
        iteration_count: iterations,
        salt: STANDARD.encode(salt),
        server_key: STANDARD.encode(server_key),
        stored_key: STANDARD.encode(stored_key),
    })
}

/// Derives the credentials again from the salt of `existing`, so a password change shows
/// up as different keys without a new salt being drawn.
pub fn recompute_with_salt(
    mechanism: Mechanism,
    username: &str,
    password: &str,
    existing: &ScramCreds,
) -> Result<ScramCreds> {
    let salt = STANDARD
        .decode(&existing.salt)
        .map_err(|e| Error::StdError(StdError::DecodingError(format!("salt of {username}: {e}"))))?;
    compute_credentials(mechanism, username, password, &salt)
}
