//! Session secrets: cookie and session-ID derivation.
//!
//! Two independent HMAC keys are drawn from OS entropy at startup. The
//! cookie key self-authenticates handshake cookies (the server keeps no
//! state between the two client hellos); the session key binds session IDs
//! to a peer address and player identity.

use std::net::IpAddr;
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use uuid::Uuid;

use crate::crypto::{MacScheme, MAC_SIZE};

/// Random suffix appended to the HMAC portion of a session ID.
pub const SESSION_RANDOM_SIZE: usize = 32;

/// Total length of a session identifier.
pub const SESSION_ID_SIZE: usize = MAC_SIZE + SESSION_RANDOM_SIZE;

const HMAC_KEY_SIZE: usize = 32;

/// Owns the two secret HMAC keys and derives cookies and session IDs.
pub struct SessionKeyManager {
    cookie_key: [u8; HMAC_KEY_SIZE],
    session_key: [u8; HMAC_KEY_SIZE],
    mac: Arc<dyn MacScheme>,
}

impl SessionKeyManager {
    /// Draw fresh cookie and session keys from OS entropy.
    pub fn new(mac: Arc<dyn MacScheme>) -> Self {
        let mut cookie_key = [0u8; HMAC_KEY_SIZE];
        let mut session_key = [0u8; HMAC_KEY_SIZE];
        OsRng.fill_bytes(&mut cookie_key);
        OsRng.fill_bytes(&mut session_key);
        Self {
            cookie_key,
            session_key,
            mac,
        }
    }

    /// Cookie binding a peer IP to the client-chosen random:
    /// `HMAC(cookieKey, ip || random)`.
    pub fn addr_cookie(&self, ip: IpAddr, random: &[u8]) -> Vec<u8> {
        self.mac.sum(&self.cookie_key, &[&ip_octets(ip), random])
    }

    /// Constant-time check of a client-supplied cookie.
    pub fn verify_cookie(&self, ip: IpAddr, random: &[u8], cookie: &[u8]) -> bool {
        self.mac.equal(&self.addr_cookie(ip, random), cookie)
    }

    /// Session identifier for a registered peer:
    /// `HMAC(sessionKey, ip || playerId) || 32 random bytes`.
    pub fn session_id(&self, ip: IpAddr, player: Uuid) -> Vec<u8> {
        let mut id = self.mac.sum(
            &self.session_key,
            &[&ip_octets(ip), player.to_string().as_bytes()],
        );
        let mut suffix = [0u8; SESSION_RANDOM_SIZE];
        OsRng.fill_bytes(&mut suffix);
        id.extend_from_slice(&suffix);
        id
    }
}

fn ip_octets(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(addr) => addr.octets().to_vec(),
        IpAddr::V6(addr) => addr.octets().to_vec(),
    }
}
