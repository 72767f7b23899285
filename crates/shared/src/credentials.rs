//! Time-limited, single-use credential registry: invite codes (24h) and
//! account-transfer codes (1h). Both are minted as random opaque strings,
//! consumed atomically (check-and-remove, never a separate check then
//! remove), and swept lazily on access rather than by a background timer —
//! an expired entry that is never looked up again costs nothing to reclaim.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;

use crate::ids::{RoomId, UserId};

const INVITE_CODE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const TRANSFER_CODE_TTL: Duration = Duration::from_secs(60 * 60);
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";
const CODE_LEN: usize = 12;

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            CODE_ALPHABET[idx] as char
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct InviteCodeClaim {
    pub room_id: RoomId,
    pub admin_only: bool,
}

#[derive(Debug, Clone)]
pub struct TransferCodeClaim {
    pub user_ids: Vec<UserId>,
}

struct Entry<T> {
    claim: T,
    expires_at: Instant,
}

/// In-process registry of outstanding invite and transfer codes. Shared
/// between the SQL and in-memory backends alike — neither credential kind
/// is persisted to durable storage, so both back ends hold one of these.
pub struct CredentialRegistry {
    invites: DashMap<String, Entry<InviteCodeClaim>>,
    transfers: DashMap<String, Entry<TransferCodeClaim>>,
}

impl Default for CredentialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialRegistry {
    pub fn new() -> Self {
        Self {
            invites: DashMap::new(),
            transfers: DashMap::new(),
        }
    }

    /// Mint a fresh invite code, retrying on the vanishingly unlikely
    /// collision with a still-live code.
    pub fn mint_invite_code(&self, room_id: RoomId, admin_only: bool) -> String {
        loop {
            let code = generate_code();
            if self.invites.contains_key(&code) {
                continue;
            }
            self.invites.insert(
                code.clone(),
                Entry {
                    claim: InviteCodeClaim { room_id, admin_only },
                    expires_at: Instant::now() + INVITE_CODE_TTL,
                },
            );
            return code;
        }
    }

    /// Atomically check and remove: a code can be consumed by exactly one
    /// caller, even under concurrent lookups, because `remove` on a
    /// `DashMap` locks the shard for the duration of the check.
    pub fn consume_invite_code(&self, code: &str) -> Option<InviteCodeClaim> {
        let (_, entry) = self.invites.remove(code)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.claim)
    }

    /// Inspect a code without consuming it. Callers that need to validate
    /// something else (e.g. display-name uniqueness) before committing to
    /// consumption should `peek` first and only `consume` once that check
    /// has passed — as long as both calls happen under the same
    /// serialization the caller already holds, the pair is equivalent to a
    /// single atomic check-validate-remove.
    pub fn peek_invite_code(&self, code: &str) -> Option<InviteCodeClaim> {
        let entry = self.invites.get(code)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.claim)
    }

    pub fn mint_transfer_code(&self, user_ids: Vec<UserId>) -> String {
        loop {
            let code = generate_code();
            if self.transfers.contains_key(&code) {
                continue;
            }
            self.transfers.insert(
                code.clone(),
                Entry {
                    claim: TransferCodeClaim {
                        user_ids: user_ids.clone(),
                    },
                    expires_at: Instant::now() + TRANSFER_CODE_TTL,
                },
            );
            return code;
        }
    }

    pub fn consume_transfer_code(&self, code: &str) -> Option<TransferCodeClaim> {
        let (_, entry) = self.transfers.remove(code)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.claim)
    }

    /// Drop every expired entry. Not required for correctness (lookups
    /// already check expiry) but keeps the maps from growing unboundedly
    /// under a backend that never restarts.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.invites.retain(|_, entry| entry.expires_at > now);
        self.transfers.retain(|_, entry| entry.expires_at > now);
    }
}
