//! Time-sortable event identifiers.
//!
//! Layout follows UUIDv7: 48 bits of unix milliseconds, the version nibble,
//! a 12-bit per-millisecond counter, the variant bits and 62 random bits.
//! The counter starts at a small random offset each millisecond and, if it
//! overflows, borrows the next millisecond so identifiers from one
//! generator stay strictly increasing even when the wall clock stalls or
//! steps backwards.

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

const COUNTER_MAX: u16 = 0x0FFF;
const COUNTER_SEED_RANGE: u16 = 0x0200;

#[derive(Debug, Default)]
struct Clock {
    millis: u64,
    counter: u16,
}

/// Generates monotonic UUIDv7-style identifiers.
#[derive(Debug, Default)]
pub struct EventIdGenerator {
    clock: Mutex<Clock>,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> Uuid {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let (millis, counter) = {
            let mut clock = self.clock.lock();
            if now > clock.millis {
                clock.millis = now;
                clock.counter = fastrand::u16(..COUNTER_SEED_RANGE);
            } else if clock.counter >= COUNTER_MAX {
                clock.millis += 1;
                clock.counter = 0;
            } else {
                clock.counter += 1;
            }
            (clock.millis, clock.counter)
        };
        encode(millis, counter, fastrand::u64(..))
    }
}

fn encode(millis: u64, counter: u16, random: u64) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[..6].copy_from_slice(&millis.to_be_bytes()[2..]);
    bytes[6] = 0x70 | ((counter >> 8) as u8 & 0x0F);
    bytes[7] = counter as u8;
    let tail = random.to_be_bytes();
    bytes[8] = 0x80 | (tail[0] & 0x3F);
    bytes[9..].copy_from_slice(&tail[1..]);
    Uuid::from_bytes(bytes)
}
