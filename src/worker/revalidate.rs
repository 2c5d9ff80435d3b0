//! Tracking of detached background refreshes.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::net::Response;

/// Join handles of revalidations nobody is waiting on.
///
/// Dropping the tracker does not cancel the tasks; `settle` lets the host
/// wait for them before shutting down.
#[derive(Clone, Default)]
pub struct Revalidations {
  pending: Arc<Mutex<Vec<JoinHandle<Option<Response>>>>>,
}

impl Revalidations {
  pub fn track(&self, handle: JoinHandle<Option<Response>>) {
    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    pending.retain(|h| !h.is_finished());
    pending.push(handle);
  }

  /// Number of revalidations still running.
  #[cfg(test)]
  pub fn in_flight(&self) -> usize {
    let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    pending.iter().filter(|h| !h.is_finished()).count()
  }

  /// Wait for every tracked revalidation, including ones started meanwhile.
  ///
  /// Returns how many were awaited.
  pub async fn settle(&self) -> usize {
    let mut settled = 0;
    loop {
      let batch: Vec<_> = {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.drain(..).collect()
      };
      if batch.is_empty() {
        return settled;
      }
      for handle in batch {
        if let Err(e) = handle.await {
          warn!(error = %e, "revalidation task aborted");
        }
        settled += 1;
      }
    }
  }
}
