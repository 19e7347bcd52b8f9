//! Core domain types shared by every planpoker layer.
//!
//! These are the values that get serialized into the shared store (a
//! [`Snapshot`] is the payload of every snapshot-log entry) and sent to
//! clients on the wire.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A caller-supplied login name.
///
/// Login ids are opaque: there is no identity verification, the server
/// only uses them as keys. `#[serde(transparent)]` keeps them a plain
/// JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginId(pub String);

impl LoginId {
    /// Returns the login id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty login id, which requests reject.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for LoginId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LoginId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LoginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A short, human-shareable room code: [`RoomId::LEN`] decimal digits.
///
/// Codes are drawn uniformly from `0-9`, so leading zeros are significant
/// (`"00042"` and `"42"` are different strings, and only the first is a
/// valid room id). Uniqueness is not a property of the code itself; the
/// room lifecycle layer regenerates on collision.
///
/// Serialized as a plain string. Deserialization validates the format,
/// so a snapshot or request can never carry a malformed code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Number of digits in a room code.
    pub const LEN: usize = 5;

    const ALPHABET: &'static [u8] = b"0123456789";

    /// Generates a random room code using the thread-local RNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rng())
    }

    /// Generates a random room code from the given RNG.
    ///
    /// Exposed so tests can drive generation from a seeded RNG and force
    /// collisions deterministically.
    pub fn generate_with<R: Rng>(rng: &mut R) -> Self {
        let code = (0..Self::LEN)
            .map(|_| {
                let idx = rng.random_range(0..Self::ALPHABET.len());
                char::from(Self::ALPHABET[idx])
            })
            .collect();
        Self(code)
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == Self::LEN && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(ProtocolError::InvalidRoomId(s.to_string()))
        }
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of an entry in a snapshot log.
///
/// Modeled on stream ids: a millisecond timestamp plus a sequence number
/// that disambiguates entries appended within the same millisecond. The
/// derived `Ord` compares `millis` first, then `seq`, which is exactly
/// the log's append order. A listener keeps the last id it saw as its
/// cursor and asks only for entries after it.
///
/// Rendered (and serialized) as `"{millis}-{seq}"`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId {
    pub millis: u64,
    pub seq: u64,
}

impl EntryId {
    /// Precedes every id a store can generate. Reading "after ZERO"
    /// returns whatever entry the log currently holds.
    pub const ZERO: EntryId = EntryId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Returns the smallest id strictly greater than `self` that a
    /// store would generate at wall-clock time `now_millis`.
    pub fn next_after(self, now_millis: u64) -> Self {
        if now_millis > self.millis {
            Self::new(now_millis, 0)
        } else {
            Self::new(self.millis, self.seq + 1)
        }
    }
}

impl FromStr for EntryId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidEntryId(s.to_string());
        let (millis, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for EntryId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(value: EntryId) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A login session: one per login id.
///
/// The `session_id` is an opaque secret handed out on first login. A
/// client that later resumes presents it back; a mismatch means the
/// client holds the wrong credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub login_id: LoginId,
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Ballots and room state
// ---------------------------------------------------------------------------

/// A card a participant can hold.
///
/// `Unknown` means "has not voted yet this round" and is what every
/// ballot starts as. `NotVote` marks a participant who sits the round
/// out; it survives a reset. The remaining variants are the deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Point {
    #[default]
    Unknown,
    NotVote,
    Zero,
    One,
    Two,
    Three,
    Five,
    Eight,
    Thirteen,
    TwentyOne,
    /// "I can't estimate this."
    Question,
}

impl Point {
    /// Returns `true` if the participant has not voted yet.
    pub fn is_unknown(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// Whether a room's votes are hidden or revealed.
///
/// ```text
///   TurnDown ──(last vote / VoteCounting)──→ Open
///       ↑                                     │
///       └──────────────(Reset)────────────────┘
/// ```
///
/// There is no terminal state: a room is destroyed independently of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RoomState {
    /// Voting is open and values are hidden.
    #[default]
    TurnDown,
    /// Values are revealed.
    Open,
}

impl fmt::Display for RoomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TurnDown => write!(f, "TurnDown"),
            Self::Open => write!(f, "Open"),
        }
    }
}

/// One participant's current card in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub login_id: LoginId,
    pub point: Point,
}

impl Ballot {
    /// A fresh ballot for someone who just entered: `Point::Unknown`.
    pub fn new(login_id: LoginId) -> Self {
        Self {
            login_id,
            point: Point::Unknown,
        }
    }
}

/// The full state of a room at one point in time.
///
/// Every mutation republishes a whole snapshot; there are no partial
/// updates. Ballots keep the order in which participants first entered,
/// and there is at most one ballot per login id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub room_id: RoomId,
    /// The login id that created the room. Recorded only; it grants no
    /// extra privileges.
    pub master_login_id: LoginId,
    pub state: RoomState,
    pub ballots: Vec<Ballot>,
}

impl Snapshot {
    /// The initial snapshot of a freshly created room.
    pub fn new(room_id: RoomId, master_login_id: LoginId) -> Self {
        Self {
            room_id,
            master_login_id,
            state: RoomState::TurnDown,
            ballots: Vec::new(),
        }
    }

    /// Looks up the ballot held by `login_id`.
    pub fn ballot(&self, login_id: &LoginId) -> Option<&Ballot> {
        self.ballots.iter().find(|b| &b.login_id == login_id)
    }

    /// Returns `true` if every ballot holds something other than
    /// `Point::Unknown`. Vacuously true for a room with no ballots.
    pub fn all_voted(&self) -> bool {
        self.ballots.iter().all(|b| !b.point.is_unknown())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    // =====================================================================
    // RoomId
    // =====================================================================

    #[test]
    fn test_room_id_generate_has_five_digits() {
        for _ in 0..100 {
            let id = RoomId::generate();
            assert_eq!(id.as_str().len(), RoomId::LEN);
            assert!(id.as_str().bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_room_id_generate_with_seed_is_deterministic() {
        let a = RoomId::generate_with(&mut StdRng::seed_from_u64(7));
        let b = RoomId::generate_with(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_room_id_parse_keeps_leading_zeros() {
        let id: RoomId = "00042".parse().unwrap();
        assert_eq!(id.to_string(), "00042");
    }

    #[test]
    fn test_room_id_parse_rejects_wrong_length_and_letters() {
        assert!("1234".parse::<RoomId>().is_err());
        assert!("123456".parse::<RoomId>().is_err());
        assert!("12a45".parse::<RoomId>().is_err());
        assert!("".parse::<RoomId>().is_err());
    }

    #[test]
    fn test_room_id_serializes_as_plain_string() {
        let id: RoomId = "31415".parse().unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"31415\"");
        let back: RoomId = serde_json::from_str("\"31415\"").unwrap();
        assert_eq!(back, id);
    }

    // =====================================================================
    // EntryId
    // =====================================================================

    #[test]
    fn test_entry_id_orders_by_millis_then_seq() {
        assert!(EntryId::new(1, 5) < EntryId::new(2, 0));
        assert!(EntryId::new(2, 0) < EntryId::new(2, 1));
        assert!(EntryId::ZERO < EntryId::new(0, 1));
    }

    #[test]
    fn test_entry_id_default_is_zero() {
        assert_eq!(EntryId::default(), EntryId::ZERO);
        assert_eq!(EntryId::default().to_string(), "0-0");
    }

    #[test]
    fn test_entry_id_display_and_parse_agree() {
        let id = EntryId::new(1_700_000_000_123, 4);
        assert_eq!(id.to_string(), "1700000000123-4");
        assert_eq!("1700000000123-4".parse::<EntryId>().unwrap(), id);
    }

    #[test]
    fn test_entry_id_parse_rejects_malformed() {
        assert!("17".parse::<EntryId>().is_err());
        assert!("a-b".parse::<EntryId>().is_err());
        assert!("1-".parse::<EntryId>().is_err());
    }

    #[test]
    fn test_entry_id_next_after_is_strictly_greater() {
        let last = EntryId::new(100, 3);
        // Clock moved forward.
        assert_eq!(last.next_after(101), EntryId::new(101, 0));
        // Same millisecond, or the clock went backwards.
        assert_eq!(last.next_after(100), EntryId::new(100, 4));
        assert_eq!(last.next_after(50), EntryId::new(100, 4));
    }

    // =====================================================================
    // Point / RoomState
    // =====================================================================

    #[test]
    fn test_point_default_is_unknown() {
        assert_eq!(Point::default(), Point::Unknown);
        assert!(Point::default().is_unknown());
        assert!(!Point::NotVote.is_unknown());
    }

    #[test]
    fn test_point_serializes_as_pascal_case() {
        assert_eq!(serde_json::to_string(&Point::NotVote).unwrap(), "\"NotVote\"");
        assert_eq!(serde_json::to_string(&Point::TwentyOne).unwrap(), "\"TwentyOne\"");
    }

    #[test]
    fn test_room_state_default_and_display() {
        assert_eq!(RoomState::default(), RoomState::TurnDown);
        assert_eq!(RoomState::Open.to_string(), "Open");
    }

    // =====================================================================
    // Snapshot
    // =====================================================================

    #[test]
    fn test_snapshot_new_is_turned_down_and_empty() {
        let s = Snapshot::new("11111".parse().unwrap(), LoginId::from("m"));
        assert_eq!(s.state, RoomState::TurnDown);
        assert!(s.ballots.is_empty());
        assert_eq!(s.master_login_id.as_str(), "m");
    }

    #[test]
    fn test_snapshot_all_voted_counts_not_vote_as_voted() {
        let mut s = Snapshot::new("11111".parse().unwrap(), LoginId::from("m"));
        s.ballots.push(Ballot::new(LoginId::from("a")));
        assert!(!s.all_voted());

        s.ballots[0].point = Point::NotVote;
        assert!(s.all_voted());
    }

    #[test]
    fn test_snapshot_ballot_lookup() {
        let mut s = Snapshot::new("11111".parse().unwrap(), LoginId::from("m"));
        s.ballots.push(Ballot::new(LoginId::from("a")));
        assert!(s.ballot(&LoginId::from("a")).is_some());
        assert!(s.ballot(&LoginId::from("b")).is_none());
    }
}
