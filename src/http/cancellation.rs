//! Generation tokens for superseding in-flight operations.
//!
//! Every scheduled operation captures a [`Generation`] when it is submitted
//! and re-checks it before executing and before every retry. A coordinator
//! covers one kind of operation. Foreground operations advance it, so an
//! older retry loop of the same kind notices it has been superseded and
//! stops without reporting a result.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct CancellationCoordinator {
    current: AtomicU64,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation, invalidating every previously captured one.
    pub fn advance(&self) -> Generation {
        Generation(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Capture the current generation without invalidating anything.
    pub fn current(&self) -> Generation {
        Generation(self.current.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current.load(Ordering::SeqCst) == generation.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_invalidates_previous() {
        let coordinator = CancellationCoordinator::new();
        let background = coordinator.current();
        assert!(coordinator.is_current(background));

        let foreground = coordinator.advance();
        assert!(foreground > background);
        assert!(!coordinator.is_current(background));
        assert!(coordinator.is_current(foreground));
    }

    #[test]
    fn test_current_does_not_invalidate() {
        let coordinator = CancellationCoordinator::new();
        let first = coordinator.advance();
        let captured = coordinator.current();
        assert_eq!(first, captured);
        assert!(coordinator.is_current(first));
    }
}
