//! Hierarchical random-number streams.
//!
//! Every random draw made by the filter comes from a [`RngStream`] identified by a path
//! of indices below a master seed, e.g. `seed / replicate 3 / step 17 / particle 254`.
//! A stream is only a pair of 64-bit key words; turning it into a generator with
//! [`RngStream::rng`] seeds a fresh `StdRng` (ChaCha, counter based) from the key.
//! Because no generator is ever shared, results do not depend on how work is
//! scheduled across threads, and replicate runs never overlap.

use std::fmt::{self, Display};

use rand::SeedableRng;
use rand::rngs::StdRng;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// SplitMix64 finalizer.
fn mix64(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// A node in the tree of random streams rooted at a master seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RngStream {
    key: [u64; 2],
}

impl Display for RngStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RngStream({:016x}:{:016x})", self.key[0], self.key[1])
    }
}

impl RngStream {
    /// Root stream for a master seed.
    pub fn new(seed: u64) -> Self {
        RngStream {
            key: [mix64(seed), mix64(seed.wrapping_add(GOLDEN_GAMMA))],
        }
    }

    /// The `index`-th child of this stream. Children of distinct indices, and
    /// children of distinct parents, are keyed independently.
    pub fn child(&self, index: u64) -> Self {
        let spread = mix64(index.wrapping_mul(GOLDEN_GAMMA).wrapping_add(GOLDEN_GAMMA));
        RngStream {
            key: [
                mix64(self.key[0] ^ spread),
                mix64(self.key[1].wrapping_add(spread) ^ self.key[0].rotate_left(17)),
            ],
        }
    }

    /// Follow a path of child indices.
    pub fn descend(&self, path: &[u64]) -> Self {
        path.iter().fold(*self, |stream, &index| stream.child(index))
    }

    /// A generator positioned at the start of this stream.
    pub fn rng(&self) -> StdRng {
        let mut seed = [0u8; 32];
        let words = [
            self.key[0],
            self.key[1],
            mix64(self.key[0] ^ GOLDEN_GAMMA),
            mix64(self.key[1] ^ GOLDEN_GAMMA.rotate_left(32)),
        ];
        for (chunk, word) in seed.chunks_exact_mut(8).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        StdRng::from_seed(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::collections::HashSet;

    fn first_draws(stream: &RngStream) -> Vec<u64> {
        let mut rng = stream.rng();
        (0..4).map(|_| rng.random::<u64>()).collect()
    }

    #[test]
    fn same_path_reproduces_draws() {
        let a = RngStream::new(42).child(3).child(7);
        let b = RngStream::new(42).descend(&[3, 7]);
        assert_eq!(a, b);
        assert_eq!(first_draws(&a), first_draws(&b));
    }

    #[test]
    fn different_seeds_and_children_differ() {
        let root = RngStream::new(42);
        assert_ne!(first_draws(&root), first_draws(&RngStream::new(43)));
        assert_ne!(first_draws(&root.child(0)), first_draws(&root.child(1)));
        // Path order matters.
        assert_ne!(root.descend(&[1, 2]), root.descend(&[2, 1]));
    }

    #[test]
    fn sibling_keys_do_not_collide() {
        let root = RngStream::new(7);
        let keys: HashSet<RngStream> = (0..10_000).map(|i| root.child(i)).collect();
        assert_eq!(keys.len(), 10_000);
    }

    #[test]
    fn child_is_not_parent() {
        let root = RngStream::new(0);
        assert_ne!(root, root.child(0));
        assert_ne!(first_draws(&root), first_draws(&root.child(0)));
    }
}
