//! Thread-driven periodic send
//!
//! Each [`CyclicTask`] owns one background thread that re-sends the current
//! frame on a fixed cadence. The frame lives behind a mutex shared with the
//! handle; `replace_payload` swaps it under the lock and the thread clones it
//! under the same lock, so a tick always sends either the old or the new
//! payload in full.

use super::{check_payload, FrameSink, TransmitHandle, TransmitStats, Transport};
use crate::types::{CanFrame, Result, SchedulerError, Timestamp};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Transport that runs one timer thread per periodic send on top of a sink
pub struct CyclicTransport<S: FrameSink> {
    sink: Arc<S>,
}

impl<S: FrameSink> CyclicTransport<S> {
    /// Create a transport sending through `sink`
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// The sink frames are sent through
    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }
}

impl<S: FrameSink> Transport for CyclicTransport<S> {
    fn start_periodic(&self, frame: CanFrame, interval: Duration) -> Result<Box<dyn TransmitHandle>> {
        let task = CyclicTask::start(Arc::clone(&self.sink), frame, interval)?;
        Ok(Box::new(task))
    }
}

/// State shared between a handle and its timer thread
struct Shared {
    frame: Mutex<CanFrame>,
    frames_sent: AtomicU64,
    send_failures: AtomicU64,
    last_sent: Mutex<Option<Timestamp>>,
}

/// Holds the timer thread and the stop channel sender.
///
/// Dropping the sender disconnects the channel, which wakes the thread out of
/// `recv_timeout` so it can be joined.
struct StopHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StopHandle {
    fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("cyclic send thread panicked");
            }
        }
    }
}

impl Drop for StopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A running periodic send
pub struct CyclicTask {
    can_id: u32,
    interval: Duration,
    shared: Arc<Shared>,
    running: AtomicBool,
    stop_handle: Mutex<Option<StopHandle>>,
}

impl CyclicTask {
    /// Spawn the timer thread. The first frame goes out immediately.
    pub fn start<S: FrameSink>(sink: Arc<S>, frame: CanFrame, interval: Duration) -> Result<Self> {
        check_payload(&frame, &frame.data)?;
        if interval.is_zero() {
            return Err(SchedulerError::Transport(format!(
                "zero interval for frame 0x{:X}",
                frame.can_id
            )));
        }

        let can_id = frame.can_id;
        let shared = Arc::new(Shared {
            frame: Mutex::new(frame),
            frames_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            last_sent: Mutex::new(None),
        });

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_shared = Arc::clone(&shared);

        let thread = std::thread::Builder::new()
            .name(format!("can-cyclic-{:X}", can_id))
            .spawn(move || run(sink, thread_shared, interval, stop_rx))
            .map_err(|e| SchedulerError::Transport(format!("failed to spawn thread: {}", e)))?;

        log::debug!("Started cyclic send of 0x{:X} every {:?}", can_id, interval);

        Ok(Self {
            can_id,
            interval,
            shared,
            running: AtomicBool::new(true),
            stop_handle: Mutex::new(Some(StopHandle {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            })),
        })
    }

    /// Interval between two sends
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Frame sent on the next tick
    pub fn current_frame(&self) -> Result<CanFrame> {
        let frame = self.shared.frame.lock().map_err(SchedulerError::poisoned)?;
        Ok(frame.clone())
    }
}

fn run<S: FrameSink>(sink: Arc<S>, shared: Arc<Shared>, interval: Duration, stop_rx: mpsc::Receiver<()>) {
    let mut next_deadline = Instant::now();

    loop {
        let frame = match shared.frame.lock() {
            Ok(frame) => frame.clone(),
            Err(_) => {
                log::error!("cyclic send stopped: frame lock poisoned");
                break;
            }
        };

        match sink.send(&frame) {
            Ok(()) => {
                log::trace!("TX {}", frame);
                shared.frames_sent.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut last) = shared.last_sent.lock() {
                    *last = Some(Utc::now());
                }
            }
            Err(e) => {
                log::warn!("Failed to send frame 0x{:X}: {}", frame.can_id, e);
                shared.send_failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Fixed cadence; ticks missed while the sink was slow are skipped
        next_deadline += interval;
        let now = Instant::now();
        if next_deadline < now {
            next_deadline = now;
        }

        match stop_rx.recv_timeout(next_deadline - now) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }
}

impl TransmitHandle for CyclicTask {
    fn replace_payload(&self, payload: &[u8]) -> Result<()> {
        if !self.is_active() {
            return Err(SchedulerError::Transport(format!(
                "cyclic send of 0x{:X} is stopped",
                self.can_id
            )));
        }

        let mut frame = self.shared.frame.lock().map_err(SchedulerError::poisoned)?;
        check_payload(&frame, payload)?;
        frame.data.clear();
        frame.data.extend_from_slice(payload);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);

        if let Ok(mut guard) = self.stop_handle.lock() {
            if let Some(ref mut handle) = *guard {
                handle.stop();
                log::debug!("Stopped cyclic send of 0x{:X}", self.can_id);
            }
            *guard = None;
        }
    }

    fn is_active(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stats(&self) -> TransmitStats {
        TransmitStats {
            frames_sent: self.shared.frames_sent.load(Ordering::Relaxed),
            send_failures: self.shared.send_failures.load(Ordering::Relaxed),
            last_sent: self.shared.last_sent.lock().ok().and_then(|last| *last),
        }
    }
}

impl Drop for CyclicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
