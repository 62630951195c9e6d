use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Byte length of an [`EntityId`].
pub const ENTITY_ID_LEN: usize = 12;

const COUNTER_MASK: u32 = 0x00ff_ffff;

/// Store-assigned identity of a persisted entity.
///
/// Layout: 4-byte big-endian seconds since the Unix epoch, 5 bytes that
/// identify the generating store, and a 3-byte big-endian counter. Byte-wise
/// ordering therefore follows generation time, and within one generator it
/// is strictly ascending. Range queries rely on this ordering.
///
/// In documents the id is carried as a 24-character lowercase hex string,
/// whose lexicographic order matches the byte order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId([u8; ENTITY_ID_LEN]);

impl EntityId {
    /// Assemble an id from its parts. The counter is truncated to 24 bits.
    pub fn from_parts(timestamp: u32, machine: [u8; 5], counter: u32) -> Self {
        let mut bytes = [0u8; ENTITY_ID_LEN];
        bytes[..4].copy_from_slice(&timestamp.to_be_bytes());
        bytes[4..9].copy_from_slice(&machine);
        bytes[9..].copy_from_slice(&(counter & COUNTER_MASK).to_be_bytes()[1..]);
        Self(bytes)
    }

    /// Create an id from raw bytes.
    pub const fn from_bytes(bytes: [u8; ENTITY_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// The raw 12 bytes.
    pub fn as_bytes(&self) -> &[u8; ENTITY_ID_LEN] {
        &self.0
    }

    /// Generation time, in seconds since the Unix epoch.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Hex-encoded string representation (24 lowercase characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (last 6 characters, the counter).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[9..])
    }

    /// Parse from a 24-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != ENTITY_ID_LEN {
            return Err(TypeError::InvalidLength {
                expected: ENTITY_ID_LEN,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; ENTITY_ID_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.to_hex())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for EntityId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; ENTITY_ID_LEN]> for EntityId {
    fn from(bytes: [u8; ENTITY_ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = EntityId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 24-character hex entity id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<EntityId, E> {
                EntityId::from_hex(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

// ---------------------------------------------------------------------------
// IdGenerator
// ---------------------------------------------------------------------------

/// Produces ascending [`EntityId`]s on behalf of one store.
///
/// Each generator draws its own random machine bytes, so ids from
/// independent stores do not collide. The counter restarts every second.
/// Ids never repeat and never go backwards: a clock that steps back keeps
/// the last timestamp, and once the 2^24 counter values of a second are
/// used up the generator moves on to the next second.
pub struct IdGenerator {
    machine: [u8; 5],
    state: Mutex<GeneratorState>,
}

#[derive(Debug, Default)]
struct GeneratorState {
    timestamp: u32,
    next: u32,
}

impl IdGenerator {
    /// Create a generator with random machine bytes.
    pub fn new() -> Self {
        let mut machine = [0u8; 5];
        rand::Rng::fill(&mut rand::thread_rng(), &mut machine);
        Self::with_machine(machine)
    }

    /// Create a generator with fixed machine bytes (deterministic tests).
    pub fn with_machine(machine: [u8; 5]) -> Self {
        Self {
            machine,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// Generate the next id, stamped with the current wall-clock second.
    pub fn next_id(&self) -> EntityId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        self.next_id_at(now)
    }

    /// Generate the next id with an explicit timestamp. The id is stamped
    /// later than `timestamp` when that is needed to stay ascending.
    pub fn next_id_at(&self, timestamp: u32) -> EntityId {
        let mut state = self.state.lock().expect("lock poisoned");
        if timestamp > state.timestamp {
            state.timestamp = timestamp;
            state.next = 0;
        }
        if state.next > COUNTER_MASK {
            state.timestamp = state.timestamp.saturating_add(1);
            state.next = 0;
        }
        let id = EntityId::from_parts(state.timestamp, self.machine, state.next);
        state.next += 1;
        id
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("machine", &hex::encode(self.machine))
            .field("state", &*self.state.lock().expect("lock poisoned"))
            .finish()
    }
}
