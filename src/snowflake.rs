//! Snowflake-style id generation.
//!
//! Bit layout, high to low: 42 bits of milliseconds since the custom
//! epoch, 10 bits of machine id, 12 bits of sequence. Ids minted by one
//! generator are strictly increasing; a wall clock running behind the
//! last minted id is a hard error rather than a silent reorder.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::{Error, Result};

/// 2010-11-04T01:42:54.657Z in milliseconds since the Unix epoch.
const EPOCH_MS: u64 = 1_288_834_974_657;

const MACHINE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

pub const MAX_MACHINE_ID: u64 = (1 << MACHINE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

fn timestamp_ms() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the Unix epoch");
    now.as_millis() as u64 - EPOCH_MS
}

fn wait_next_ms(current: u64) -> u64 {
    let mut timestamp = timestamp_ms();
    while timestamp <= current {
        timestamp = timestamp_ms();
    }
    timestamp
}

struct GeneratorState {
    sequence: u64,
    last_timestamp: u64,
}

/// Mints cluster-unique 64-bit object keys.
pub struct KeyGenerator {
    machine_id: u64,
    state: Mutex<GeneratorState>,
}

impl KeyGenerator {
    pub fn new(machine_id: u64) -> Result<KeyGenerator> {
        if machine_id > MAX_MACHINE_ID {
            return Err(Error::MachineId(machine_id));
        }
        Ok(KeyGenerator {
            machine_id,
            state: Mutex::new(GeneratorState {
                sequence: 0,
                last_timestamp: 0,
            }),
        })
    }

    pub fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        self.mint(&mut state)
    }

    /// Mint `count` ids in one locked pass. Bounded by the sequence mask
    /// so one batch cannot monopolize the generator.
    pub fn next_ids(&self, count: usize) -> Result<Vec<u64>> {
        if count < 1 || count > SEQUENCE_MASK as usize {
            return Err(Error::BatchCount(count));
        }
        let mut state = self.state.lock();
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(self.mint(&mut state)?);
        }
        Ok(ids)
    }

    fn mint(&self, state: &mut GeneratorState) -> Result<u64> {
        let mut timestamp = timestamp_ms();
        if timestamp < state.last_timestamp {
            return Err(Error::ClockBackwards(state.last_timestamp - timestamp));
        }
        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                timestamp = wait_next_ms(timestamp);
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;
        Ok((timestamp << (MACHINE_BITS + SEQUENCE_BITS))
            | (self.machine_id << SEQUENCE_BITS)
            | state.sequence)
    }
}

/// Milliseconds-since-epoch component of a minted id.
pub fn id_timestamp(id: u64) -> u64 {
    id >> (MACHINE_BITS + SEQUENCE_BITS)
}
