//! Sampling Eviction Policies
//!
//! Victim selection over a small random sample of the live population
//! instead of an exact usage ordering. The population is walked once to
//! materialize the sampled positions, so the cost is bounded by the position
//! of the last sample, never by a sort.

use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::element::{Element, ElementKey};
use crate::error::Error;

/// Number of elements examined per victim selection
pub const DEFAULT_SAMPLE_SIZE: usize = 30;

/// Anything the policies can rank
pub trait Evictable {
    /// Owning key
    fn key(&self) -> &ElementKey;
    /// Number of successful reads
    fn hit_count(&self) -> u64;
    /// Most recent of creation and last access (epoch millis)
    fn latest_touch(&self) -> u64;
    /// Creation time (epoch millis)
    fn creation_time(&self) -> u64;
}

impl Evictable for Element {
    fn key(&self) -> &ElementKey {
        Element::key(self)
    }

    fn hit_count(&self) -> u64 {
        Element::hit_count(self)
    }

    fn latest_touch(&self) -> u64 {
        Element::latest_touch(self)
    }

    fn creation_time(&self) -> u64 {
        Element::creation_time(self)
    }
}

impl<T: Evictable + ?Sized> Evictable for &T {
    fn key(&self) -> &ElementKey {
        (**self).key()
    }

    fn hit_count(&self) -> u64 {
        (**self).hit_count()
    }

    fn latest_touch(&self) -> u64 {
        (**self).latest_touch()
    }

    fn creation_time(&self) -> u64 {
        (**self).creation_time()
    }
}

/// Eviction policy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvictionPolicy {
    /// Least recently used
    #[default]
    Lru,
    /// Least frequently used
    Lfu,
    /// First in, first out
    Fifo,
}

impl EvictionPolicy {
    /// Policy name
    pub fn name(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "LRU",
            EvictionPolicy::Lfu => "LFU",
            EvictionPolicy::Fifo => "FIFO",
        }
    }

    /// Whether `candidate` is a better victim than `current`
    #[inline]
    pub fn prefers<T: Evictable>(&self, candidate: &T, current: &T) -> bool {
        match self {
            EvictionPolicy::Lru => candidate.latest_touch() < current.latest_touch(),
            EvictionPolicy::Lfu => candidate.hit_count() < current.hit_count(),
            EvictionPolicy::Fifo => candidate.creation_time() < current.creation_time(),
        }
    }

    /// Pick a victim from the sample, never `just_added` unless it is all there is
    ///
    /// A sample of exactly one element with `just_added` given returns the
    /// just-added key's element itself; this lets a zero/one capacity store
    /// evict the newest element instead of refusing admission. `None` means
    /// the store should simply grow by one.
    pub fn select_victim<'a, T: Evictable>(
        &self,
        sample: &'a [T],
        just_added: Option<&ElementKey>,
    ) -> Option<&'a T> {
        if sample.len() == 1 {
            if let Some(just_added) = just_added {
                if sample[0].key() == just_added {
                    return Some(&sample[0]);
                }
            }
        }

        let mut victim: Option<&'a T> = None;
        for candidate in sample {
            if Some(candidate.key()) == just_added {
                continue;
            }
            victim = match victim {
                Some(current) if !self.prefers(candidate, current) => Some(current),
                _ => Some(candidate),
            };
        }
        victim
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for EvictionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LRU" => Ok(EvictionPolicy::Lru),
            "LFU" => Ok(EvictionPolicy::Lfu),
            "FIFO" => Ok(EvictionPolicy::Fifo),
            other => Err(Error::Config(format!("unknown eviction policy: {}", other))),
        }
    }
}

/// Choose `min(population, DEFAULT_SAMPLE_SIZE)` distinct positions, ascending
pub fn sample_positions<R: Rng + ?Sized>(population: usize, rng: &mut R) -> Vec<usize> {
    let amount = population.min(DEFAULT_SAMPLE_SIZE);
    if amount == 0 {
        return Vec::new();
    }
    let mut positions = rand::seq::index::sample(rng, population, amount).into_vec();
    positions.sort_unstable();
    positions
}

/// Materialize the items at ascending `positions` with a single walk
pub fn collect_sample<T, I>(iter: I, positions: &[usize]) -> Vec<T>
where
    I: IntoIterator<Item = T>,
{
    let mut sample = Vec::with_capacity(positions.len());
    let mut wanted = positions.iter().peekable();

    for (idx, item) in iter.into_iter().enumerate() {
        match wanted.peek() {
            Some(&&pos) if pos == idx => {
                sample.push(item);
                wanted.next();
            }
            Some(_) => {}
            None => break,
        }
    }
    sample
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn element(key: &str, hits: u64, created: u64) -> Element {
        let e = Element::new(key, Bytes::from_static(b"v")).with_creation_time(created);
        for _ in 0..hits {
            e.record_access();
        }
        e
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(EvictionPolicy::Lru.name(), "LRU");
        assert_eq!(EvictionPolicy::Lfu.to_string(), "LFU");
        assert_eq!("fifo".parse::<EvictionPolicy>().unwrap(), EvictionPolicy::Fifo);
        assert!("ARC".parse::<EvictionPolicy>().is_err());
    }

    #[test]
    fn test_lfu_picks_least_hit() {
        let sample = vec![element("a", 5, 1), element("b", 0, 2), element("c", 3, 3)];
        let victim = EvictionPolicy::Lfu.select_victim(&sample, None).unwrap();
        assert_eq!(victim.key(), &ElementKey::from("b"));
    }

    #[test]
    fn test_fifo_picks_oldest() {
        let sample = vec![element("a", 0, 30), element("b", 0, 10), element("c", 0, 20)];
        let victim = EvictionPolicy::Fifo.select_victim(&sample, None).unwrap();
        assert_eq!(victim.key(), &ElementKey::from("b"));
    }

    #[test]
    fn test_lru_uses_latest_touch() {
        let old_but_read = element("a", 1, 10);
        let untouched = element("b", 0, 20);
        let sample = vec![old_but_read, untouched];
        let victim = EvictionPolicy::Lru.select_victim(&sample, None).unwrap();
        assert_eq!(victim.key(), &ElementKey::from("b"));
    }

    #[test]
    fn test_just_added_is_excluded() {
        let sample = vec![element("new", 0, 1), element("old", 9, 2)];
        let just_added = ElementKey::from("new");
        let victim = EvictionPolicy::Lfu
            .select_victim(&sample, Some(&just_added))
            .unwrap();
        assert_eq!(victim.key(), &ElementKey::from("old"));
    }

    #[test]
    fn test_sample_of_one_returns_just_added() {
        let sample = vec![element("new", 0, 1)];
        let just_added = ElementKey::from("new");
        let victim = EvictionPolicy::Lfu.select_victim(&sample, Some(&just_added));
        assert_eq!(victim.unwrap().key(), &just_added);
    }

    #[test]
    fn test_empty_sample_grows() {
        let sample: Vec<Element> = Vec::new();
        assert!(EvictionPolicy::Lru.select_victim(&sample, None).is_none());
    }

    #[test]
    fn test_sample_positions_bounds() {
        let mut rng = SmallRng::seed_from_u64(7);

        assert!(sample_positions(0, &mut rng).is_empty());
        assert_eq!(sample_positions(5, &mut rng), vec![0, 1, 2, 3, 4]);

        let positions = sample_positions(1000, &mut rng);
        assert_eq!(positions.len(), DEFAULT_SAMPLE_SIZE);
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(positions.iter().all(|&p| p < 1000));
    }

    #[test]
    fn test_collect_sample_single_walk() {
        let sample = collect_sample(10..20, &[0, 3, 9]);
        assert_eq!(sample, vec![10, 13, 19]);

        // Positions past the end are simply not materialized
        let sample = collect_sample(0..3, &[1, 7]);
        assert_eq!(sample, vec![1]);
    }
}
