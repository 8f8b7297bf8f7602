//! Ball authority assignment.
//!
//! Exactly one peer simulates ball physics for the whole match; the other
//! only mirrors interpolated state. Assignment is static — the peer seated
//! as `player1` is the authority — so there is never a runtime handoff to
//! race against. When the seat assignment itself is missing, both peers
//! must still independently derive the *same* seating without negotiating,
//! which is done by hashing the two connection ids.

use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::protocol::{PeerSlot, PlayerSide};

/// The outcome of authority assignment, immutable for the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityAssignment {
    /// The side this process plays.
    pub local_side: PlayerSide,
    /// Whether this process simulates ball physics.
    pub is_ball_authority: bool,
}

impl AuthorityAssignment {
    /// The side of the given slot under this assignment.
    pub fn side_of(&self, slot: PeerSlot) -> PlayerSide {
        match slot {
            PeerSlot::Local => self.local_side,
            PeerSlot::Remote => self.local_side.other(),
        }
    }

    /// The slot occupied by the given side, the inverse of
    /// [`side_of`](Self::side_of).
    pub fn slot_of(&self, side: PlayerSide) -> PeerSlot {
        if side == self.local_side {
            PeerSlot::Local
        } else {
            PeerSlot::Remote
        }
    }
}

/// Assigns and tracks ball authority for one match.
#[derive(Debug)]
pub struct AuthorityCoordinator;

impl AuthorityCoordinator {
    /// Compute the authority assignment for this process.
    ///
    /// When `assigned_side` is known (the room server seated us), the rule
    /// is static: `player1` holds ball authority. When it is `None`, the
    /// side is derived from FNV-1a hashes of the two connection ids so
    /// both peers compute identical seats with no extra round-trip: the
    /// lower hash takes `player1`, hash ties fall back to lexicographic id
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IdentityConflict`] when the connection ids are
    /// identical — the peers cannot be told apart, the derived seats would
    /// collide on both sides, and ball state would diverge. Callers must
    /// treat this as a fatal desync.
    pub fn assign(
        assigned_side: Option<PlayerSide>,
        local_conn_id: &str,
        remote_conn_id: &str,
    ) -> Result<AuthorityAssignment> {
        let local_side = match assigned_side {
            Some(side) => side,
            None => {
                warn!("no seat assignment received, deriving from connection ids");
                Self::derive_side(local_conn_id, remote_conn_id)?
            }
        };

        let assignment = AuthorityAssignment {
            local_side,
            is_ball_authority: local_side == PlayerSide::PlayerOne,
        };
        debug!(
            side = %assignment.local_side,
            authority = assignment.is_ball_authority,
            "authority assigned"
        );
        Ok(assignment)
    }

    /// Deterministic fallback seating from the two connection ids.
    fn derive_side(local_conn_id: &str, remote_conn_id: &str) -> Result<PlayerSide> {
        if local_conn_id == remote_conn_id {
            return Err(SyncError::IdentityConflict(local_conn_id.to_string()));
        }

        let local_hash = fnv1a(local_conn_id.as_bytes());
        let remote_hash = fnv1a(remote_conn_id.as_bytes());

        let takes_player_one = match local_hash.cmp(&remote_hash) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            // Hash collision: the ids still differ, so their byte order is
            // a valid shared tiebreak.
            std::cmp::Ordering::Equal => local_conn_id < remote_conn_id,
        };

        Ok(if takes_player_one {
            PlayerSide::PlayerOne
        } else {
            PlayerSide::PlayerTwo
        })
    }
}

/// FNV-1a over a byte slice.
///
/// Written out rather than using `DefaultHasher` because both peers must
/// compute bit-identical hashes across processes and std versions; SipHash
/// keys are not a stable contract.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn player_one_is_ball_authority() {
        let assignment =
            AuthorityCoordinator::assign(Some(PlayerSide::PlayerOne), "a", "b").unwrap();
        assert!(assignment.is_ball_authority);
        assert_eq!(assignment.local_side, PlayerSide::PlayerOne);
    }

    #[test]
    fn player_two_is_not_ball_authority() {
        let assignment =
            AuthorityCoordinator::assign(Some(PlayerSide::PlayerTwo), "a", "b").unwrap();
        assert!(!assignment.is_ball_authority);
    }

    #[test]
    fn fallback_is_symmetric() {
        // Peer A and peer B swap local/remote ids; exactly one of them
        // must land on player1.
        let a = AuthorityCoordinator::assign(None, "conn-alpha", "conn-beta").unwrap();
        let b = AuthorityCoordinator::assign(None, "conn-beta", "conn-alpha").unwrap();
        assert_eq!(a.local_side, b.local_side.other());
        assert_ne!(a.is_ball_authority, b.is_ball_authority);
    }

    #[test]
    fn fallback_is_deterministic() {
        let first = AuthorityCoordinator::assign(None, "x1", "x2").unwrap();
        let second = AuthorityCoordinator::assign(None, "x1", "x2").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn identical_ids_are_a_fatal_desync() {
        let err = AuthorityCoordinator::assign(None, "same", "same").unwrap_err();
        assert!(matches!(err, SyncError::IdentityConflict(_)));
    }

    #[test]
    fn side_of_and_slot_of_are_inverse() {
        let assignment =
            AuthorityCoordinator::assign(Some(PlayerSide::PlayerTwo), "a", "b").unwrap();
        assert_eq!(assignment.side_of(PeerSlot::Local), PlayerSide::PlayerTwo);
        assert_eq!(assignment.side_of(PeerSlot::Remote), PlayerSide::PlayerOne);
        assert_eq!(assignment.slot_of(PlayerSide::PlayerTwo), PeerSlot::Local);
        assert_eq!(assignment.slot_of(PlayerSide::PlayerOne), PeerSlot::Remote);
    }

    #[test]
    fn fnv1a_matches_reference_vector() {
        // Published FNV-1a 64-bit test vector.
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
