//! Read/write target selection

use std::time::{Duration, Instant};

use rand::Rng;

/// Which pool a connection is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolTarget {
   Primary,
   /// Index into the configured replica list
   Replica(usize),
}

/// Writes always go to the primary. Reads pick a replica uniformly at random,
/// or the primary when no replica is configured.
pub fn choose_target<R: Rng + ?Sized>(write: bool, replica_count: usize, rng: &mut R) -> PoolTarget {
   if write || replica_count == 0 {
      PoolTarget::Primary
   } else {
      PoolTarget::Replica(rng.gen_range(0..replica_count))
   }
}

/// Indices of the replicas that never failed or whose last failure is at
/// least `cooldown` before `now`.
pub fn healthy_replicas(failures: &[Option<Instant>], now: Instant, cooldown: Duration) -> Vec<usize> {
   failures
      .iter()
      .enumerate()
      .filter(|(_, failed_at)| match failed_at {
         Some(at) => now.saturating_duration_since(*at) >= cooldown,
         None => true,
      })
      .map(|(index, _)| index)
      .collect()
}

#[cfg(test)]
mod tests {
   use std::collections::HashMap;

   use rand::SeedableRng;
   use rand::rngs::StdRng;

   use super::*;

   #[test]
   fn test_writes_always_use_primary() {
      let mut rng = StdRng::seed_from_u64(7);
      for _ in 0..50 {
         assert_eq!(choose_target(true, 3, &mut rng), PoolTarget::Primary);
      }
   }

   #[test]
   fn test_reads_without_replicas_use_primary() {
      let mut rng = StdRng::seed_from_u64(7);
      assert_eq!(choose_target(false, 0, &mut rng), PoolTarget::Primary);
   }

   #[test]
   fn test_reads_spread_across_two_replicas() {
      let mut rng = rand::thread_rng();
      let mut counts: HashMap<PoolTarget, usize> = HashMap::new();

      for _ in 0..100 {
         *counts.entry(choose_target(false, 2, &mut rng)).or_default() += 1;
      }

      assert!(!counts.contains_key(&PoolTarget::Primary));
      assert_eq!(counts.len(), 2, "both replicas should receive reads: {counts:?}");
      assert!(counts.values().all(|&n| n < 100));
   }

   #[test]
   fn test_replica_index_in_range() {
      let mut rng = StdRng::seed_from_u64(42);
      for _ in 0..200 {
         match choose_target(false, 3, &mut rng) {
            PoolTarget::Replica(i) => assert!(i < 3),
            PoolTarget::Primary => panic!("read routed to primary with replicas configured"),
         }
      }
   }

   #[test]
   fn test_failed_replica_skipped_during_cooldown() {
      let start = Instant::now();
      let now = start + Duration::from_secs(40);
      let cooldown = Duration::from_secs(30);
      let failures = [None, Some(start + Duration::from_secs(35)), Some(start)];

      assert_eq!(healthy_replicas(&failures, now, cooldown), vec![0, 2]);
      assert_eq!(
         healthy_replicas(&failures, now + Duration::from_secs(25), cooldown),
         vec![0, 1, 2]
      );
   }

   #[test]
   fn test_reads_avoid_cooling_replica() {
      let now = Instant::now();
      let failures = [Some(now), None];
      let healthy = healthy_replicas(&failures, now, Duration::from_secs(30));

      let mut rng = StdRng::seed_from_u64(7);
      for _ in 0..50 {
         match choose_target(false, healthy.len(), &mut rng) {
            PoolTarget::Replica(slot) => assert_eq!(healthy[slot], 1),
            PoolTarget::Primary => panic!("healthy replica available"),
         }
      }

      // Every replica cooling down sends reads to the primary
      let all_failed = [Some(now), Some(now)];
      let none = healthy_replicas(&all_failed, now, Duration::from_secs(30));
      assert_eq!(choose_target(false, none.len(), &mut rng), PoolTarget::Primary);
   }
}
