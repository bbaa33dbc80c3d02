//! Room codes, peer ids and partial-mesh peer selection.

use super::config::PeerSelection;
use rand::Rng;
use rand::seq::SliceRandom;

/// Room code alphabet (no `I`, `O`, `0`, `1`)
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Room code length
pub const ROOM_CODE_LEN: usize = 6;

/// Generate a fresh room code
#[must_use]
pub fn generate_room_code() -> String {
    let mut bytes = [0u8; ROOM_CODE_LEN];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes
        .iter()
        .map(|b| ROOM_CODE_ALPHABET[*b as usize % ROOM_CODE_ALPHABET.len()] as char)
        .collect()
}

/// Normalise user input to a room code, or `None` if it is not one
#[must_use]
pub fn parse_room_code(input: &str) -> Option<String> {
    let code = input.trim().to_ascii_uppercase();
    let valid = code.len() == ROOM_CODE_LEN && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b));
    valid.then_some(code)
}

/// Generate a peer id: 8 random bytes as 16 lowercase hex chars
#[must_use]
pub fn generate_peer_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}

/// Pick at most `limit` peers to dial from a room listing.
///
/// `self_id` is never selected.
#[must_use]
pub fn select_peers(listed: &[String], self_id: &str, limit: usize, policy: PeerSelection) -> Vec<String> {
    let candidates = listed.iter().filter(|p| p.as_str() != self_id);

    match policy {
        PeerSelection::FirstListed => candidates.take(limit).cloned().collect(),
        PeerSelection::Random => {
            let candidates: Vec<&String> = candidates.collect();
            candidates
                .choose_multiple(&mut rand::thread_rng(), limit)
                .map(|p| (*p).clone())
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_code_shape() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)));
            assert_eq!(parse_room_code(&code), Some(code));
        }
    }

    #[test]
    fn test_parse_room_code() {
        assert_eq!(parse_room_code(" abc234 "), Some("ABC234".to_string()));
        assert_eq!(parse_room_code("ABCDE"), None);
        assert_eq!(parse_room_code("ABCDE0"), None);
        assert_eq!(parse_room_code("ABCDEI"), None);
    }

    #[test]
    fn test_peer_id_shape() {
        let id = generate_peer_id();
        assert_eq!(id.len(), 16);
        assert!(id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
        assert_ne!(id, generate_peer_id());
    }

    #[test]
    fn test_select_first_listed() {
        let listed: Vec<String> = (0..8).map(|i| format!("p{i}")).collect();
        let picked = select_peers(&listed, "p1", 5, PeerSelection::FirstListed);
        assert_eq!(picked, vec!["p0", "p2", "p3", "p4", "p5"]);

        let picked = select_peers(&listed[..2], "me", 5, PeerSelection::FirstListed);
        assert_eq!(picked.len(), 2);
        assert!(select_peers(&listed, "me", 0, PeerSelection::FirstListed).is_empty());
    }

    #[test]
    fn test_select_random() {
        let listed: Vec<String> = (0..8).map(|i| format!("p{i}")).collect();
        let picked = select_peers(&listed, "p0", 5, PeerSelection::Random);
        assert_eq!(picked.len(), 5);
        assert!(!picked.contains(&"p0".to_string()));

        let mut unique = picked.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 5);
    }
}
