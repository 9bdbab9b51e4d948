/// Pipelining and transactions
///
/// `append` writes commands without reading; `exec` reads exactly as many
/// replies as were appended and packs them into one array. A transaction is
/// a pipeline that starts with `MULTI` and ends with `EXEC`.
///
/// The queued count lives in the shared client state; callers sharing a
/// handle hold a [`ClientGuard`](super::ClientGuard) for the whole batch.
use tracing::{debug, warn};

use super::{failover, ClientState};
use crate::error::{ResilisError, ResilisResult};
use crate::protocol::{Command, Reply};

impl ClientState {
    pub(crate) async fn append(&mut self, command: &Command) -> ResilisResult<()> {
        if let Err(e) = self.check_in_sync() {
            debug!("{}, reconnecting", e);
        }
        if self.session.is_none() {
            if self.pending != 0 {
                debug!("Connection lost while building a pipeline or transaction");
                self.pending = 0;
            }
            if let Err(e) = failover::reopen(self).await {
                e.trace("Re-connection failed");
                return Err(e);
            }
        }

        let session = self.session.as_mut().ok_or(ResilisError::NotConnected)?;
        session.queue(command)?;
        self.pending += 1;
        Ok(())
    }

    pub(crate) async fn exec(&mut self) -> ResilisResult<Option<Reply>> {
        if self.pending == 0 {
            return Ok(None);
        }

        if let Err(e) = self.check_in_sync() {
            self.recover("Failover after stale replies").await;
            return Err(e);
        }

        // A cancelled exec leaves unread replies that no longer match `pending`
        let expected = self.pending;
        self.pending = 0;

        let mut replies = Vec::with_capacity(expected);
        let mut failure = None;
        match self.session.as_mut() {
            Some(session) => {
                for _ in 0..expected {
                    match session.read_queued().await {
                        Ok(reply) => {
                            if let Reply::Error(message) = &reply {
                                debug!("Server error in pipeline: {}", message);
                            }
                            replies.push(reply);
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
            None => failure = Some(ResilisError::NotConnected),
        }

        if let Some(e) = failure {
            warn!(
                "Pipeline failed after {} of {} replies: {}",
                replies.len(),
                expected,
                e
            );
            self.recover("Failover after pipeline failure").await;
            return Err(e);
        }

        Ok(Some(Reply::Array(replies)))
    }
}
