//! Magazine capacity for one weapon instance

use serde::{Deserialize, Serialize};

/// Result of consuming one round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmmoSignal {
    /// A round was consumed and this many remain
    Loaded(u32),
    /// The last round was consumed; further scheduled shots must stop
    Exhausted,
    /// Nothing was consumed because the weapon cannot fire
    Dry,
}

/// Remaining capacity of a weapon.
///
/// `can_fire` is false whenever `current == 0` and only an explicit
/// [`AmmoState::reload`] sets it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmmoState {
    max_capacity: u32,
    current: u32,
    can_fire: bool,
}

impl AmmoState {
    pub fn new(max_capacity: u32) -> Self {
        Self {
            max_capacity,
            current: max_capacity,
            can_fire: max_capacity > 0,
        }
    }

    pub fn max_capacity(&self) -> u32 {
        self.max_capacity
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn can_fire(&self) -> bool {
        self.can_fire
    }

    pub fn can_consume(&self) -> bool {
        self.current > 0 && self.can_fire
    }

    pub fn consume(&mut self) -> AmmoSignal {
        if !self.can_consume() {
            return AmmoSignal::Dry;
        }
        self.current -= 1;
        if self.current == 0 {
            self.can_fire = false;
            AmmoSignal::Exhausted
        } else {
            AmmoSignal::Loaded(self.current)
        }
    }

    /// Refill the magazine. Cooldown timing lives in the fire-rate
    /// controller and is untouched here.
    pub fn reload(&mut self) {
        self.current = self.max_capacity;
        self.can_fire = self.max_capacity > 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_thirty_rounds_then_dry() {
        let mut ammo = AmmoState::new(30);
        for i in 0..29 {
            assert_eq!(ammo.consume(), AmmoSignal::Loaded(29 - i));
        }
        assert_eq!(ammo.consume(), AmmoSignal::Exhausted);
        assert_eq!(ammo.current(), 0);
        assert!(!ammo.can_fire());
        assert_eq!(ammo.consume(), AmmoSignal::Dry);
        assert_eq!(ammo.current(), 0);
    }

    #[test]
    fn test_reload_restores_fire() {
        let mut ammo = AmmoState::new(2);
        ammo.consume();
        ammo.consume();
        assert!(!ammo.can_consume());
        ammo.reload();
        assert_eq!(ammo.current(), 2);
        assert!(ammo.can_consume());
    }

    #[test]
    fn test_empty_magazine_never_fires() {
        let mut ammo = AmmoState::new(0);
        assert!(!ammo.can_fire());
        assert_eq!(ammo.consume(), AmmoSignal::Dry);
        ammo.reload();
        assert!(!ammo.can_fire());
    }

    proptest! {
        #[test]
        fn prop_capacity_never_negative(max in 0u32..64, ops in proptest::collection::vec(any::<bool>(), 0..200)) {
            let mut ammo = AmmoState::new(max);
            for reload in ops {
                if reload {
                    ammo.reload();
                } else {
                    ammo.consume();
                }
                prop_assert!(ammo.current() <= ammo.max_capacity());
                prop_assert_eq!(ammo.can_fire(), ammo.current() > 0);
            }
        }
    }
}
