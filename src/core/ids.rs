//! Identifier generation
//!
//! Entity ids are millisecond timestamps bumped past the last issued id, so
//! ids from one process are strictly increasing and practically unique.
//! A seeded generator replaces the clock with a counter and seeds the GUID
//! RNG, making whole id sequences reproducible in tests.
//!
//! One generator is shared per process ([`global`]). Collections can carry
//! their own via [`IdSource::Local`] for isolation.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, OnceLock};

/// Characters used by the GUID encoding
const BASE91_TABLE: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!#$%&()*+,-./:;<=>?@[]^_`{|}~";

/// Monotonic id and GUID generator
#[derive(Debug)]
pub struct IdGenerator {
    last: i64,
    seed: Option<i64>,
    counter: i64,
    rng: StdRng,
}

impl IdGenerator {
    /// Wall-clock generator
    pub fn new() -> Self {
        IdGenerator {
            last: 0,
            seed: None,
            counter: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic generator: ids are `seed, seed + 1, ...`
    pub fn seeded(seed: i64) -> Self {
        IdGenerator {
            last: 0,
            seed: Some(seed),
            counter: 0,
            rng: StdRng::seed_from_u64(seed as u64),
        }
    }

    /// Reset to a fresh state, optionally seeded
    pub fn reset(&mut self, seed: Option<i64>) {
        *self = match seed {
            Some(seed) => IdGenerator::seeded(seed),
            None => IdGenerator::new(),
        };
    }

    pub fn is_seeded(&self) -> bool {
        self.seed.is_some()
    }

    /// Next entity id
    pub fn next_id(&mut self) -> i64 {
        let candidate = match self.seed {
            Some(seed) => {
                let id = seed + self.counter;
                self.counter += 1;
                id
            }
            None => chrono::Utc::now().timestamp_millis(),
        };
        let id = candidate.max(self.last + 1);
        self.last = id;
        id
    }

    /// Next id not rejected by `taken`
    pub fn next_free_id(&mut self, taken: impl Fn(i64) -> bool) -> i64 {
        loop {
            let id = self.next_id();
            if !taken(id) {
                return id;
            }
        }
    }

    /// Random note GUID (base91 of a 64-bit value)
    pub fn next_guid(&mut self) -> String {
        base91(self.rng.gen::<u64>())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Base91 encoding used for note GUIDs
pub fn base91(mut value: u64) -> String {
    if value == 0 {
        return (BASE91_TABLE[0] as char).to_string();
    }
    let base = BASE91_TABLE.len() as u64;
    let mut out = Vec::new();
    while value > 0 {
        out.push(BASE91_TABLE[(value % base) as usize]);
        value /= base;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

static GLOBAL: OnceLock<Mutex<IdGenerator>> = OnceLock::new();

/// The process-wide generator
pub fn global() -> &'static Mutex<IdGenerator> {
    GLOBAL.get_or_init(|| Mutex::new(IdGenerator::new()))
}

/// Seed the process-wide generator
pub fn set_global_seed(seed: i64) {
    global().lock().reset(Some(seed));
}

/// Return the process-wide generator to wall-clock mode
pub fn reset_global() {
    global().lock().reset(None);
}

/// Where a collection draws new ids from
#[derive(Debug, Clone, Default)]
pub enum IdSource {
    /// The process-wide generator
    #[default]
    Global,
    /// A generator owned by this collection (and its clones)
    Local(Arc<Mutex<IdGenerator>>),
}

impl IdSource {
    pub fn seeded(seed: i64) -> Self {
        IdSource::Local(Arc::new(Mutex::new(IdGenerator::seeded(seed))))
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut IdGenerator) -> R) -> R {
        match self {
            IdSource::Global => f(&mut global().lock()),
            IdSource::Local(generator) => f(&mut generator.lock()),
        }
    }
}
