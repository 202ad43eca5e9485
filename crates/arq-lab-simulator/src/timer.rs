use std::collections::HashMap;
use std::hash::Hash;

/// A handle identifying one arming of a timer. Expiry notifications carry it
/// back so stale ones can be told apart from the live one.
pub type Generation = u64;

#[derive(Debug, Clone, Copy)]
struct Armed {
    generation: Generation,
    deadline: u64,
}

/// One cancellable countdown per key.
///
/// The manager does not schedule anything itself: the driver queues an
/// expiry carrying the generation returned by [`TimerManager::arm`] and asks
/// [`TimerManager::fire`] whether that expiry is still live when it comes due.
/// Re-arming or cancelling bumps the key's generation, which turns any expiry
/// already queued into a no-op.
#[derive(Debug)]
pub struct TimerManager<K> {
    generations: HashMap<K, Generation>,
    armed: HashMap<K, Armed>,
}

impl<K> Default for TimerManager<K> {
    fn default() -> Self {
        Self {
            generations: HashMap::new(),
            armed: HashMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> TimerManager<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a countdown for `key`, replacing any timer already armed for it.
    pub fn arm(&mut self, key: K, deadline: u64) -> Generation {
        let generation = self.generations.entry(key).or_insert(0);
        *generation += 1;
        let generation = *generation;
        self.armed.insert(
            key,
            Armed {
                generation,
                deadline,
            },
        );
        generation
    }

    /// Disarm `key`. Returns false when nothing was armed, including when the
    /// timer already fired.
    pub fn cancel(&mut self, key: K) -> bool {
        if self.armed.remove(&key).is_none() {
            return false;
        }
        if let Some(generation) = self.generations.get_mut(&key) {
            *generation += 1;
        }
        true
    }

    /// Consume an expiry. True exactly once per arming, and only if the
    /// timer was neither cancelled nor replaced in the meantime.
    pub fn fire(&mut self, key: K, generation: Generation) -> bool {
        match self.armed.get(&key) {
            Some(armed) if armed.generation == generation => {
                self.armed.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: K) -> bool {
        self.armed.contains_key(&key)
    }

    pub fn deadline(&self, key: K) -> Option<u64> {
        self.armed.get(&key).map(|armed| armed.deadline)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    /// Disarm everything. Returns how many timers were live.
    pub fn clear(&mut self) -> usize {
        let released = self.armed.len();
        for key in self.armed.keys() {
            if let Some(generation) = self.generations.get_mut(key) {
                *generation += 1;
            }
        }
        self.armed.clear();
        released
    }
}
