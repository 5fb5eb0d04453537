//! `BoundedClassifier`: runs a backend on its own thread with a per-call
//! deadline.
//!
//! A slow or hung model must not stall the pipeline. Each `score` call hands
//! the vector to the worker over a crossbeam channel and waits at most
//! `timeout` for the answer. A late answer is discarded when it eventually
//! arrives; while a timed-out call is still running, new calls fail fast
//! instead of queueing behind it.

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use tracing::{debug, error, warn};

use crate::error::{Result, WhistleError};
use crate::inference::Classifier;

type Request = (u64, Vec<f32>);
type Response = (u64, Result<(f32, f32)>);

pub struct BoundedClassifier {
    requests: Sender<Request>,
    responses: Receiver<Response>,
    timeout: Duration,
    next_id: u64,
    /// Id of a timed-out call the worker has not answered yet.
    stale: Option<u64>,
    name: String,
}

impl BoundedClassifier {
    /// Move `inner` onto a dedicated worker thread.
    ///
    /// The worker warms the backend up before serving requests and exits
    /// when this wrapper is dropped.
    ///
    /// # Errors
    /// Returns `WhistleError::Io` if the thread cannot be spawned.
    pub fn spawn<C: Classifier>(mut inner: C, timeout: Duration) -> Result<Self> {
        let (req_tx, req_rx) = unbounded::<Request>();
        let (resp_tx, resp_rx) = unbounded::<Response>();
        let name = format!("bounded({})", inner.name());

        thread::Builder::new()
            .name("whistle-classifier".into())
            .spawn(move || {
                if let Err(e) = inner.warm_up() {
                    error!("classifier warm-up failed: {e}");
                }
                while let Ok((id, input)) = req_rx.recv() {
                    let result = inner.score(&input);
                    if resp_tx.send((id, result)).is_err() {
                        break;
                    }
                }
                debug!("classifier worker exiting");
            })?;

        Ok(Self {
            requests: req_tx,
            responses: resp_rx,
            timeout,
            next_id: 0,
            stale: None,
            name,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Drain late answers; returns `true` once no timed-out call is pending.
    fn settle(&mut self) -> Result<bool> {
        let Some(stale) = self.stale else {
            return Ok(true);
        };
        loop {
            match self.responses.try_recv() {
                Ok((id, _)) if id == stale => {
                    debug!(id, "late classifier answer discarded");
                    self.stale = None;
                    return Ok(true);
                }
                Ok(_) => continue,
                Err(TryRecvError::Empty) => return Ok(false),
                Err(TryRecvError::Disconnected) => {
                    return Err(WhistleError::Classifier("classifier worker exited".into()))
                }
            }
        }
    }
}

impl Classifier for BoundedClassifier {
    fn score(&mut self, input: &[f32]) -> Result<(f32, f32)> {
        if !self.settle()? {
            return Err(WhistleError::ClassifierTimeout(self.timeout));
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.requests
            .send((id, input.to_vec()))
            .map_err(|_| WhistleError::Classifier("classifier worker exited".into()))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok((rid, result)) if rid == id => return result,
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "classifier call timed out"
                    );
                    self.stale = Some(id);
                    return Err(WhistleError::ClassifierTimeout(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(WhistleError::Classifier("classifier worker exited".into()))
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for BoundedClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedClassifier")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("stale", &self.stale)
            .finish_non_exhaustive()
    }
}
