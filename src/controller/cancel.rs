use signal_hook::consts::{SIGINT, SIGTERM};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop request, checked before every iteration.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, for registration with signal handlers.
    pub fn as_atomic(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.0)
    }
}

/// Cancel `flag` on SIGINT or SIGTERM. The session stops before its next
/// iteration and still runs finalization.
pub fn install_signal_handlers(flag: &CancellationFlag) -> io::Result<()> {
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, flag.as_atomic())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());

        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_atomic_handle_cancels() {
        let flag = CancellationFlag::new();
        flag.as_atomic().store(true, Ordering::SeqCst);
        assert!(flag.is_cancelled());
    }
}
