use crate::error::{Result, StudioError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared stop flag with an optional deadline, polled between frames.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<(Instant, Duration)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A timeout too large to represent as an instant means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: deadline_after(timeout),
        }
    }

    /// Build from a seconds value where zero means no deadline.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::new()
        } else {
            Self::with_timeout(Duration::from_secs(secs))
        }
    }

    /// A token sharing this one's flag whose deadline also expires `secs`
    /// from now, whichever comes first. Zero adds no deadline.
    pub fn armed(&self, secs: u64) -> Self {
        let own = match secs {
            0 => None,
            secs => deadline_after(Duration::from_secs(secs)),
        };
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(StudioError::Cancelled);
        }
        if let Some((deadline, timeout)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StudioError::Timeout(timeout.as_secs()));
            }
        }
        Ok(())
    }
}

fn deadline_after(timeout: Duration) -> Option<(Instant, Duration)> {
    Instant::now().checked_add(timeout).map(|at| (at, timeout))
}
