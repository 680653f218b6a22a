/// Seeds for consecutive untimed bursts: 0, 1, 2, ... and back to 0 instead
/// of going negative.
#[derive(Debug, Default, Clone)]
pub struct SeedCounter {
    next: i32,
}

impl SeedCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(next: i32) -> Self {
        Self { next: next.max(0) }
    }

    pub fn next_seed(&mut self) -> i32 {
        let seed = self.next;
        self.next = self.next.wrapping_add(1);
        if self.next < 0 {
            self.next = 0;
        }
        seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeds_increase() {
        let mut seeds = SeedCounter::new();
        assert_eq!(seeds.next_seed(), 0);
        assert_eq!(seeds.next_seed(), 1);
        assert_eq!(seeds.next_seed(), 2);
    }

    #[test]
    fn test_seed_wraps_to_zero() {
        let mut seeds = SeedCounter::starting_at(i32::MAX);
        assert_eq!(seeds.next_seed(), i32::MAX);
        assert_eq!(seeds.next_seed(), 0);
        assert_eq!(seeds.next_seed(), 1);
    }
}
