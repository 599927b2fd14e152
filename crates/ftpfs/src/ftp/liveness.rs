//! Decides whether a pooled session can be reused without reconnecting.

use crate::ftp::clock::Clock;
use crate::ftp::session::SessionHandle;
use std::sync::Arc;
use std::time::Duration;

pub struct LivenessValidator {
    ttl: chrono::Duration,
    probe_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl LivenessValidator {
    pub fn new(ttl: chrono::Duration, probe_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            probe_timeout,
            clock,
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// A session validated within the TTL is trusted without any network
    /// traffic. Otherwise one NOOP is sent; a failure or a timeout means the
    /// session is dead. Never retried here.
    pub async fn is_valid(&self, handle: &mut SessionHandle) -> bool {
        if handle.is_closed() {
            return false;
        }
        let now = self.clock.now();
        if now - handle.last_validated() < self.ttl {
            log::trace!("Session {} validated recently, skipping NOOP", handle.id());
            return true;
        }

        match tokio::time::timeout(self.probe_timeout, handle.probe()).await {
            Ok(Ok(())) => {
                handle.mark_validated(self.clock.now());
                true
            }
            Ok(Err(e)) => {
                log::debug!("Liveness probe for {} failed: {}", handle.key(), e);
                handle.mark_stale();
                false
            }
            Err(_) => {
                log::debug!(
                    "Liveness probe for {} timed out after {:?}",
                    handle.key(),
                    self.probe_timeout
                );
                handle.mark_stale();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::clock::ManualClock;
    use crate::ftp::error::{FtpError, FtpResult};
    use crate::ftp::session::SessionParts;
    use crate::ftp::transport::RemoteSession;
    use crate::ftp::types::{DirEntry, EndpointKey, Scheme, SessionState};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;
    use tokio::sync::watch;

    /// Answers NOOP only when `answer` is set; otherwise never replies.
    struct Silent {
        answer: bool,
        noops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RemoteSession for Silent {
        async fn authenticate(&mut self, _user: &str, _password: &str) -> FtpResult<()> {
            Ok(())
        }
        async fn noop(&mut self) -> FtpResult<()> {
            self.noops.fetch_add(1, Ordering::SeqCst);
            if !self.answer {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
        async fn list_directory(&mut self, path: &str, _detailed: bool) -> FtpResult<Vec<DirEntry>> {
            Err(FtpError::from_reply(550, &format!("550 {}: No such file", path)))
        }
        async fn make_dir(&mut self, _path: &str) -> FtpResult<()> {
            Ok(())
        }
        async fn remove_file(&mut self, _path: &str) -> FtpResult<()> {
            Ok(())
        }
        async fn remove_dir(&mut self, _path: &str) -> FtpResult<()> {
            Ok(())
        }
        async fn rename(&mut self, _from: &str, _to: &str) -> FtpResult<()> {
            Ok(())
        }
        async fn close(&mut self) {}
    }

    fn handle(answer: bool, clock: &ManualClock) -> (SessionHandle, Arc<AtomicUsize>, watch::Sender<bool>) {
        let noops = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);
        let now = clock.now();
        let parts = SessionParts {
            id: 7,
            key: EndpointKey::new(Scheme::Ftp, "h", 21, "alice"),
            session: Box::new(Silent {
                answer,
                noops: noops.clone(),
            }),
            created_at: now,
            last_activity: now,
            last_validated: now,
        };
        (SessionHandle::checked_out(parts, rx, Weak::new()), noops, tx)
    }

    fn validator(clock: &Arc<ManualClock>) -> LivenessValidator {
        LivenessValidator::new(
            chrono::Duration::seconds(5),
            Duration::from_secs(2),
            clock.clone() as Arc<dyn Clock>,
        )
    }

    #[tokio::test]
    async fn recent_validation_skips_the_round_trip() {
        let clock = Arc::new(ManualClock::default());
        let (mut handle, noops, _tx) = handle(false, &clock);
        clock.advance_secs(4);
        assert!(validator(&clock).is_valid(&mut handle).await);
        assert_eq!(noops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn answered_noop_refreshes_validation_time() {
        let clock = Arc::new(ManualClock::default());
        let (mut handle, noops, _tx) = handle(true, &clock);
        clock.advance_secs(6);
        assert!(validator(&clock).is_valid(&mut handle).await);
        assert_eq!(noops.load(Ordering::SeqCst), 1);
        assert_eq!(handle.last_validated(), clock.now());
        assert_eq!(handle.state(), SessionState::InUse);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_noop_times_out_as_stale() {
        let clock = Arc::new(ManualClock::default());
        let (mut handle, noops, _tx) = handle(false, &clock);
        clock.advance_secs(6);

        let started = tokio::time::Instant::now();
        assert!(!validator(&clock).is_valid(&mut handle).await);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(noops.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), SessionState::Stale);
    }
}
