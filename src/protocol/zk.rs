//! Zero-knowledge password authentication.
//!
//! A SHA-256 hash-chain variant of SRP. The password never crosses the wire and the host
//! stores only a salted key plus a random verifier. Both sides prove knowledge of the
//! same session key before any service traffic flows, and that key then drives the
//! session cipher.
//!
//! ```text
//! client                                   host
//!   a = rand, A = H(a)
//!   ZkInitiate { username, A }  ──────────▶ lookup {salt, key, verifier}
//!                                          b = rand, B = H(salt, verifier, b)
//!                              ◀────────── ZkInitiate { salt, B }
//!   U  = H(A, B)                           U  = H(A, B)
//!   Kc = H(salt, H(salt, user, pw), A, B, U)
//!                                          Ks = H(salt, key, A, B, U)
//!   Mc = H(user, salt, A, B, Kc)
//!   ZkProof { Mc }              ──────────▶ compare with H(user, salt, A, B, Ks)
//!                              ◀────────── ZkProof { Ms = H(A, Mc, Ks) }
//!   verify Ms
//! ```
//!
//! Handshake state is per connection: every step consumes the previous state and returns
//! the next one together with the message to send. All secrets are zeroized on drop.

use crate::error::{constants, Result, RpcError};
use crate::protocol::message::{Request, Response};
use crate::utils::crypto::{constant_time_eq, random_bytes, zk_hash, ZkCipher};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, instrument};
use zeroize::{Zeroize, ZeroizeOnDrop};

const HASH_LEN: usize = 32;

/// Server-side credential record for one user.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ZkPasswordHash {
    pub salt: [u8; 32],
    pub key: [u8; 32],
    pub verifier: [u8; 32],
}

impl ZkPasswordHash {
    /// Derive a fresh credential record for `username` / `password`.
    pub fn generate(username: &str, password: &str) -> Result<Self> {
        let seed: [u8; 32] = random_bytes()?;
        let salt = zk_hash(&[&seed]);
        let key = zk_hash(&[&salt, username.as_bytes(), password.as_bytes()]);
        let verifier = random_bytes()?;
        Ok(Self {
            salt,
            key,
            verifier,
        })
    }
}

impl fmt::Debug for ZkPasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ZkPasswordHash { .. }")
    }
}

/// Looks up credential records by username.
pub trait ZkRepository: Send + Sync {
    fn password_hash(&self, username: &str) -> Option<ZkPasswordHash>;
}

impl<F> ZkRepository for F
where
    F: Fn(&str) -> Option<ZkPasswordHash> + Send + Sync,
{
    fn password_hash(&self, username: &str) -> Option<ZkPasswordHash> {
        self(username)
    }
}

/// Repository backed by a map, filled at start-up.
#[derive(Debug, Default, Clone)]
pub struct InMemoryZkRepository {
    users: HashMap<String, ZkPasswordHash>,
}

impl InMemoryZkRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate and store a credential record for a user, replacing any previous one.
    pub fn add_user(&mut self, username: &str, password: &str) -> Result<()> {
        let hash = ZkPasswordHash::generate(username, password)?;
        self.users.insert(username.to_string(), hash);
        Ok(())
    }

    pub fn insert(&mut self, username: impl Into<String>, hash: ZkPasswordHash) {
        self.users.insert(username.into(), hash);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl ZkRepository for InMemoryZkRepository {
    fn password_hash(&self, username: &str) -> Option<ZkPasswordHash> {
        self.users.get(username).cloned()
    }
}

/// Username and password a client authenticates with.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZkCredentials {
    username: String,
    password: String,
}

impl ZkCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for ZkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZkCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated session: encrypts and decrypts protected payloads.
#[derive(Debug)]
pub struct ZkSession {
    username: String,
    cipher: ZkCipher,
}

impl ZkSession {
    fn new(username: String, key: [u8; 32]) -> Self {
        Self {
            username,
            cipher: ZkCipher::new(key),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher.encrypt(plaintext)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.cipher.decrypt(data)
    }
}

/// Client state after sending `ZkInitiate`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ClientZkState {
    credentials: ZkCredentials,
    big_a: [u8; 32],
}

/// Client state after sending `ZkProof`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ClientZkProofState {
    username: String,
    big_a: [u8; 32],
    proof: [u8; 32],
    session_key: [u8; 32],
}

/// Host state after answering `ZkInitiate`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ServerZkState {
    username: String,
    salt: [u8; 32],
    big_a: [u8; 32],
    big_b: [u8; 32],
    session_key: [u8; 32],
}

fn to_hash(bytes: &[u8], what: &str) -> Result<[u8; HASH_LEN]> {
    bytes.try_into().map_err(|_| {
        RpcError::AuthenticationFailed(format!(
            "{what} must be {HASH_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

fn client_proof(
    username: &str,
    salt: &[u8; 32],
    big_a: &[u8; 32],
    big_b: &[u8; 32],
    key: &[u8; 32],
) -> [u8; 32] {
    zk_hash(&[username.as_bytes(), salt, big_a, big_b, key])
}

/// Step 1 (client): pick `a`, send `A = H(a)`.
#[instrument(skip(credentials), fields(username = %credentials.username()))]
pub fn client_zk_initiate(credentials: &ZkCredentials) -> Result<(ClientZkState, Request)> {
    let mut a: [u8; 32] = random_bytes()?;
    let big_a = zk_hash(&[&a]);
    a.zeroize();

    debug!("Client initiating zero-knowledge handshake");

    Ok((
        ClientZkState {
            credentials: credentials.clone(),
            big_a,
        },
        Request::ZkInitiate {
            username: credentials.username().to_string(),
            a: big_a.to_vec(),
        },
    ))
}

/// Step 2 (host): look up the user, pick `b`, answer with `{salt, B}` and precompute `Ks`.
#[instrument(skip(repository, client_a))]
pub fn server_zk_respond(
    repository: &dyn ZkRepository,
    username: &str,
    client_a: &[u8],
) -> Result<(ServerZkState, Response)> {
    let big_a = to_hash(client_a, "A")?;
    let record = repository.password_hash(username).ok_or_else(|| {
        RpcError::AuthenticationFailed(format!("{}: {username}", constants::ERR_UNKNOWN_USER))
    })?;

    let mut b: [u8; 32] = random_bytes()?;
    let big_b = zk_hash(&[&record.salt, &record.verifier, &b]);
    b.zeroize();

    let u = zk_hash(&[&big_a, &big_b]);
    let session_key = zk_hash(&[&record.salt, &record.key, &big_a, &big_b, &u]);

    debug!("Server answered handshake initiation");

    Ok((
        ServerZkState {
            username: username.to_string(),
            salt: record.salt,
            big_a,
            big_b,
            session_key,
        },
        Response::ZkInitiate {
            salt: record.salt.to_vec(),
            b: big_b.to_vec(),
        },
    ))
}

/// Step 3 (client): derive `Kc` from the password and send the proof `Mc`.
#[instrument(skip_all)]
pub fn client_zk_prove(
    state: ClientZkState,
    salt: &[u8],
    server_b: &[u8],
) -> Result<(ClientZkProofState, Request)> {
    let salt = to_hash(salt, "salt")?;
    let big_b = to_hash(server_b, "B")?;
    let username = state.credentials.username();

    let u = zk_hash(&[&state.big_a, &big_b]);
    let mut key = zk_hash(&[
        &salt,
        username.as_bytes(),
        state.credentials.password.as_bytes(),
    ]);
    let session_key = zk_hash(&[&salt, &key, &state.big_a, &big_b, &u]);
    key.zeroize();

    let proof = client_proof(username, &salt, &state.big_a, &big_b, &session_key);

    Ok((
        ClientZkProofState {
            username: username.to_string(),
            big_a: state.big_a,
            proof,
            session_key,
        },
        Request::ZkProof {
            proof: proof.to_vec(),
        },
    ))
}

/// Step 4 (host): check `Mc`, answer with `Ms` and open the session.
#[instrument(skip_all, fields(username = %state.username))]
pub fn server_zk_verify(state: ServerZkState, client_mc: &[u8]) -> Result<(ZkSession, Response)> {
    let expected = client_proof(
        &state.username,
        &state.salt,
        &state.big_a,
        &state.big_b,
        &state.session_key,
    );
    if !constant_time_eq(&expected, client_mc) {
        return Err(RpcError::AuthenticationFailed(
            constants::ERR_PROOF_MISMATCH.to_string(),
        ));
    }

    let server_proof = zk_hash(&[&state.big_a, client_mc, &state.session_key]);

    debug!("Server verified client proof");

    Ok((
        ZkSession::new(state.username.clone(), state.session_key),
        Response::ZkProof {
            proof: server_proof.to_vec(),
        },
    ))
}

/// Step 5 (client): check `Ms` before trusting the session.
#[instrument(skip_all, fields(username = %state.username))]
pub fn client_zk_confirm(state: ClientZkProofState, server_ms: &[u8]) -> Result<ZkSession> {
    let expected = zk_hash(&[&state.big_a, &state.proof, &state.session_key]);
    if !constant_time_eq(&expected, server_ms) {
        return Err(RpcError::AuthenticationFailed(
            constants::ERR_SERVER_PROOF_MISMATCH.to_string(),
        ));
    }

    debug!("Client verified server proof");

    Ok(ZkSession::new(state.username.clone(), state.session_key))
}
