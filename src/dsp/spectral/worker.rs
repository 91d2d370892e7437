//! Off-thread spectral inference.
//!
//! A single worker thread owns the spectral model and a [`HopProcessor`]. Requests arrive
//! on one bounded channel and are handled strictly in arrival order, so results leave in
//! submission order. Hop buffers travel to the worker and back; the render side recycles
//! them, so steady-state streaming allocates nothing.
//!
//! The result channel holds as many hops as the render side has buffers, so it only
//! fills when hops are submitted from elsewhere. Results that do not fit are held in
//! order and retried, never dropped, so no buffer leaves circulation.

use super::HopProcessor;
use crate::config::{ModelAssets, SuppressionConfig};
use crate::error::{Error, LoadStage, Result};
use crate::model::{SpectralModel, SpectralModelLoader};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

// How often held results are retried while no request arrives.
const BACKLOG_RETRY: Duration = Duration::from_millis(5);

pub enum WorkerRequest {
    /// Load (or confirm) the model for these assets. Answered with a [`WorkerEvent`].
    Load(ModelAssets),
    Hop(HopRequest),
    Shutdown,
}

pub struct HopRequest {
    /// Monotonically increasing per render-side stream.
    pub id: u64,
    /// Clear the analysis/overlap state before this hop (first hop after (re)enable).
    pub reset: bool,
    pub samples: Vec<f32>,
}

pub struct HopResult {
    pub id: u64,
    /// Echo of the request's `reset`.
    pub reset: bool,
    pub samples: Vec<f32>,
}

/// Lifecycle reports for the control plane.
#[derive(Debug)]
pub enum WorkerEvent {
    Ready,
    Failed(Error),
}

/// Render-side ends of the worker channels.
#[derive(Clone)]
pub struct WorkerLink {
    pub(crate) requests: Sender<WorkerRequest>,
    pub(crate) results: Receiver<HopResult>,
    /// Hop buffers the render side may have in flight.
    pub(crate) pool_size: usize,
}

pub struct SpectralWorker {
    requests: Sender<WorkerRequest>,
    results: Receiver<HopResult>,
    events: Receiver<WorkerEvent>,
    pool_size: usize,
    disconnect_reported: bool,
    thread: Option<JoinHandle<()>>,
}

impl SpectralWorker {
    pub fn spawn(cfg: &SuppressionConfig, loader: Arc<dyn SpectralModelLoader>) -> Result<Self> {
        let pool_size = cfg.worker_queue.max(cfg.prime_hops + 2);
        // Room for control requests on top of every pooled hop.
        let (req_tx, req_rx) = crossbeam_channel::bounded::<WorkerRequest>(pool_size + 4);
        let (res_tx, res_rx) = crossbeam_channel::bounded::<HopResult>(pool_size);
        let (evt_tx, evt_rx) = crossbeam_channel::bounded::<WorkerEvent>(16);

        let cfg = cfg.clone();
        let thread = std::thread::Builder::new()
            .name("speechboost-spectral".into())
            .spawn(move || worker_loop(cfg, loader, req_rx, res_tx, evt_tx))?;

        Ok(Self {
            requests: req_tx,
            results: res_rx,
            events: evt_rx,
            pool_size,
            disconnect_reported: false,
            thread: Some(thread),
        })
    }

    pub fn link(&self) -> WorkerLink {
        WorkerLink {
            requests: self.requests.clone(),
            results: self.results.clone(),
            pool_size: self.pool_size,
        }
    }

    /// Asks the worker to load the model. Completion arrives through [`poll_event`](Self::poll_event).
    pub fn load(&self, assets: ModelAssets) -> Result<()> {
        self.requests
            .send(WorkerRequest::Load(assets))
            .map_err(|_| Error::WorkerDisconnected)
    }

    /// Next lifecycle event, if any. A dead worker is reported once as a failure.
    pub fn poll_event(&mut self) -> Option<WorkerEvent> {
        match self.events.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if self.disconnect_reported {
                    None
                } else {
                    self.disconnect_reported = true;
                    Some(WorkerEvent::Failed(Error::WorkerDisconnected))
                }
            }
        }
    }

    pub fn shutdown(&mut self) {
        let _ = self.requests.send(WorkerRequest::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SpectralWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Loaded {
    assets: ModelAssets,
    model: Box<dyn SpectralModel>,
    proc: HopProcessor,
}

fn load_model(
    cfg: &SuppressionConfig,
    loader: &dyn SpectralModelLoader,
    assets: ModelAssets,
) -> Result<Loaded> {
    let mut proc = HopProcessor::new(cfg)?;
    let mut model = loader.load(&assets, proc.shape())?;

    // Warm-up on silence: a model that cannot run once is a load failure.
    let mut hop = vec![0.0; proc.hop()];
    proc.process(model.as_mut(), &mut hop)
        .map_err(|e| Error::load(LoadStage::FirstInference, e.to_string()))?;
    proc.reset();

    Ok(Loaded {
        assets,
        model,
        proc,
    })
}

fn worker_loop(
    cfg: SuppressionConfig,
    loader: Arc<dyn SpectralModelLoader>,
    requests: Receiver<WorkerRequest>,
    results: Sender<HopResult>,
    events: Sender<WorkerEvent>,
) {
    let mut loaded: Option<Loaded> = None;
    let mut failures = 0u32;
    let mut backlog: VecDeque<HopResult> = VecDeque::new();
    let report = |ev: WorkerEvent| {
        if events.try_send(ev).is_err() {
            warn!("Spectral worker event dropped");
        }
    };

    info!("Spectral worker started (hop {}, frame {})", cfg.hop_size, cfg.fft_size);

    loop {
        let request = if backlog.is_empty() {
            match requests.recv() {
                Ok(request) => request,
                Err(_) => break,
            }
        } else {
            match requests.recv_timeout(BACKLOG_RETRY) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => {
                    flush_results(&results, &mut backlog);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        };

        match request {
            WorkerRequest::Load(assets) => {
                if loaded.as_ref().map_or(false, |l| l.assets == assets) {
                    report(WorkerEvent::Ready);
                    continue;
                }
                loaded = None;
                match load_model(&cfg, loader.as_ref(), assets) {
                    Ok(l) => {
                        info!("Spectral model ready");
                        loaded = Some(l);
                        failures = 0;
                        report(WorkerEvent::Ready);
                    }
                    Err(e) => {
                        warn!("Spectral model load failed: {}", e);
                        report(WorkerEvent::Failed(e));
                    }
                }
            }
            WorkerRequest::Hop(mut req) => {
                let mut failed = None;
                if let Some(l) = loaded.as_mut() {
                    if req.reset {
                        l.proc.reset();
                    }
                    if req.samples.len() == l.proc.hop() {
                        match l.proc.process(l.model.as_mut(), &mut req.samples) {
                            Ok(()) => failures = 0,
                            Err(e) => {
                                failures += 1;
                                debug!("Spectral inference error #{}: {}", failures, e);
                                if failures >= cfg.inference_failure_limit.max(1) {
                                    failed = Some(e);
                                }
                            }
                        }
                    }
                }
                if let Some(e) = failed {
                    warn!("Spectral model failed {} hops in a row, unloading", failures);
                    loaded = None;
                    failures = 0;
                    report(WorkerEvent::Failed(e));
                }

                backlog.push_back(HopResult {
                    id: req.id,
                    reset: req.reset,
                    samples: req.samples,
                });
                flush_results(&results, &mut backlog);
                if !backlog.is_empty() {
                    debug!("Spectral result queue full, {} hop(s) held", backlog.len());
                }
            }
            WorkerRequest::Shutdown => break,
        }
    }

    info!("Spectral worker stopped");
}

/// Sends held results in order until the channel is full.
fn flush_results(results: &Sender<HopResult>, backlog: &mut VecDeque<HopResult>) {
    while let Some(result) = backlog.pop_front() {
        match results.try_send(result) {
            Ok(()) => {}
            Err(TrySendError::Full(result)) => {
                backlog.push_front(result);
                return;
            }
            Err(TrySendError::Disconnected(_)) => {
                backlog.clear();
                return;
            }
        }
    }
}
