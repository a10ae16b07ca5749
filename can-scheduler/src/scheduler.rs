//! Message scheduler
//!
//! Keeps every referenced message transmitting at its cycle time and lets
//! callers change individual signal values while the periodic send runs.
//!
//! # Locking
//!
//! - The entry map sits behind an `RwLock` and maps each name to a slot
//!   (`Mutex<Option<EntryRef>>`). Looking up an existing slot takes the read
//!   lock only; a missing slot is inserted under the write lock, which is
//!   released before activation. The slot mutex is held while the message is
//!   activated, so two racing first updates of the same name start exactly
//!   one periodic send and activation never holds up other names.
//! - A slot whose activation fails is removed again.
//! - Each entry has its own `Mutex` around its values, its last payload and
//!   its transmit handle. The read-modify-encode-publish sequence of an update
//!   runs under that lock, so updates of one message serialize while updates
//!   of different messages never wait on each other.

use crate::codec::{SignalCodec, SignalValues};
use crate::config::SchedulerConfig;
use crate::signals::database::{MessageLayout, SignalDatabase};
use crate::transport::{TransmitHandle, TransmitStats, Transport};
use crate::types::{CanFrame, Result, SchedulerError};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

/// Mutable state of one scheduled message
struct Entry {
    values: SignalValues,
    payload: Vec<u8>,
    handle: Box<dyn TransmitHandle>,
}

/// Shared reference to a scheduled message
#[derive(Clone)]
pub struct EntryRef {
    name: String,
    layout: Arc<MessageLayout>,
    interval: Duration,
    state: Arc<Mutex<Entry>>,
}

impl EntryRef {
    /// Message name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Static layout of the message
    pub fn layout(&self) -> &Arc<MessageLayout> {
        &self.layout
    }

    /// Interval of the periodic send
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current signal values
    pub fn values(&self) -> Result<SignalValues> {
        let state = self.state.lock().map_err(SchedulerError::poisoned)?;
        Ok(state.values.clone())
    }

    /// Payload last handed to the transport
    pub fn payload(&self) -> Result<Vec<u8>> {
        let state = self.state.lock().map_err(SchedulerError::poisoned)?;
        Ok(state.payload.clone())
    }

    /// True while the periodic send is running
    pub fn is_active(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.handle.is_active())
            .unwrap_or(false)
    }

    /// Consistent view of values, payload and transmit counters
    pub fn snapshot(&self) -> Result<EntrySnapshot> {
        let state = self.state.lock().map_err(SchedulerError::poisoned)?;
        Ok(EntrySnapshot {
            name: self.name.clone(),
            can_id: self.layout.id,
            interval_ms: self.interval.as_millis() as u64,
            active: state.handle.is_active(),
            values: state.values.clone(),
            payload: state.payload.clone(),
            stats: state.handle.stats(),
        })
    }

    /// Set one signal and publish the re-encoded payload.
    ///
    /// On any failure the values are restored, so the entry is left exactly
    /// as it was.
    fn apply(&self, codec: &SignalCodec, signal: &str, value: f64) -> Result<()> {
        let mut state = self.state.lock().map_err(SchedulerError::poisoned)?;

        let previous = state
            .values
            .set(signal, value)
            .ok_or_else(|| SchedulerError::UnknownSignal {
                message: self.name.clone(),
                signal: signal.to_string(),
            })?;

        let payload = match codec.encode(&self.layout, &state.values) {
            Ok(payload) => payload,
            Err(e) => {
                state.values.set(signal, previous);
                return Err(e);
            }
        };

        if let Err(e) = state.handle.replace_payload(&payload) {
            state.values.set(signal, previous);
            return Err(e);
        }

        log::debug!("{}.{} = {} -> {:02X?}", self.name, signal, value, payload);
        state.payload = payload;
        Ok(())
    }

    fn stop(&self) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.handle.stop();
    }
}

impl std::fmt::Debug for EntryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryRef")
            .field("name", &self.name)
            .field("can_id", &self.layout.id)
            .field("interval", &self.interval)
            .finish()
    }
}

/// Point-in-time view of a scheduled message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySnapshot {
    /// Message name
    pub name: String,
    /// CAN message ID
    pub can_id: u32,
    /// Interval of the periodic send in milliseconds
    pub interval_ms: u64,
    /// True while the periodic send is running
    pub active: bool,
    /// Current signal values
    pub values: SignalValues,
    /// Payload currently being sent
    pub payload: Vec<u8>,
    /// Transmit counters
    pub stats: TransmitStats,
}

/// Per-name cell of the entry map; `None` until activation succeeds
type Slot = Arc<Mutex<Option<EntryRef>>>;

/// Keeps named messages transmitting periodically
pub struct CanScheduler {
    entries: RwLock<HashMap<String, Slot>>,
    shut_down: AtomicBool,
    db: Arc<SignalDatabase>,
    transport: Arc<dyn Transport>,
    config: SchedulerConfig,
    codec: SignalCodec,
}

impl CanScheduler {
    /// Create a scheduler with the default configuration
    pub fn new(db: Arc<SignalDatabase>, transport: Arc<dyn Transport>) -> Self {
        Self::with_config(db, transport, SchedulerConfig::default())
    }

    /// Create a scheduler with an explicit configuration
    pub fn with_config(
        db: Arc<SignalDatabase>,
        transport: Arc<dyn Transport>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
            db,
            transport,
            codec: SignalCodec::new(config.enforce_declared_ranges),
            config,
        }
    }

    /// Start transmitting `name` with its initial signal values.
    ///
    /// Fails with `AlreadyScheduled` if the message is already transmitting;
    /// `update` activates messages on its own and never hits that case.
    pub fn add_message(&self, name: &str) -> Result<EntryRef> {
        self.ensure_running()?;
        match self.entry_or_activate(name)? {
            (entry, true) => Ok(entry),
            (_, false) => Err(SchedulerError::AlreadyScheduled(name.to_string())),
        }
    }

    /// Set `signal` of message `name` to `value`.
    ///
    /// The first update of a message starts its periodic transmission, which
    /// then runs until the scheduler shuts down.
    pub fn update(&self, name: &str, signal: &str, value: f64) -> Result<()> {
        self.ensure_running()?;
        let (entry, _) = self.entry_or_activate(name)?;
        self.publish(&entry, signal, value)
    }

    /// Scheduled entry for `name`, if the message has been activated
    pub fn entry(&self, name: &str) -> Option<EntryRef> {
        let slot = self.entries.read().ok()?.get(name).cloned()?;
        let entry = slot.lock().ok()?.clone();
        entry
    }

    /// Names of all activated messages, sorted
    pub fn scheduled_messages(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
                    .collect()
            })
            .unwrap_or_default();

        let mut names: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().map(|entry| entry.is_some()).unwrap_or(false))
            .map(|(name, _)| name)
            .collect();
        names.sort_unstable();
        names
    }

    /// Snapshot of one activated message
    pub fn snapshot(&self, name: &str) -> Result<EntrySnapshot> {
        self.entry(name)
            .ok_or_else(|| SchedulerError::UnknownMessage(name.to_string()))?
            .snapshot()
    }

    /// Snapshots of all activated messages, sorted by name
    pub fn snapshots(&self) -> Result<Vec<EntrySnapshot>> {
        self.scheduled_messages()
            .iter()
            .filter_map(|name| self.entry(name))
            .map(|entry| entry.snapshot())
            .collect()
    }

    /// Message database the scheduler resolves layouts from
    pub fn database(&self) -> &Arc<SignalDatabase> {
        &self.db
    }

    /// Scheduler configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// True once `shutdown` has run
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop every periodic send. Later calls are no-ops.
    pub fn shutdown(&self) {
        let entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        // Waits for activations in progress; later ones see the flag
        let mut stopped = 0;
        for slot in entries.values() {
            let entry = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entry.as_ref() {
                entry.stop();
                stopped += 1;
            }
        }

        log::info!("Scheduler shut down, stopped {} messages", stopped);
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(SchedulerError::ShutDown);
        }
        Ok(())
    }

    /// Apply an update to an activated entry.
    ///
    /// A shutdown that slipped in after the caller's check stops the handle
    /// first; report that as `ShutDown` rather than a transport failure.
    fn publish(&self, entry: &EntryRef, signal: &str, value: f64) -> Result<()> {
        entry
            .apply(&self.codec, signal, value)
            .map_err(|e| match e {
                SchedulerError::Transport(_) if self.is_shut_down() => SchedulerError::ShutDown,
                e => e,
            })
    }

    /// Existing entry for `name`, or a freshly activated one.
    ///
    /// The flag is true when this call did the activation.
    fn entry_or_activate(&self, name: &str) -> Result<(EntryRef, bool)> {
        let slot = self.slot(name)?;
        let mut guard = slot.lock().map_err(SchedulerError::poisoned)?;
        if let Some(entry) = guard.as_ref() {
            return Ok((entry.clone(), false));
        }

        // Checked under the slot lock: shutdown stops every slot it can lock
        // after raising the flag
        let activated = self.ensure_running().and_then(|()| self.activate(name));
        match activated {
            Ok(entry) => {
                *guard = Some(entry.clone());
                Ok((entry, true))
            }
            Err(e) => {
                drop(guard);
                self.remove_empty_slot(name, &slot);
                Err(e)
            }
        }
    }

    /// Slot for `name`, inserted empty if missing
    fn slot(&self, name: &str) -> Result<Slot> {
        {
            let entries = self.entries.read().map_err(SchedulerError::poisoned)?;
            if let Some(slot) = entries.get(name) {
                return Ok(Arc::clone(slot));
            }
        }

        let mut entries = self.entries.write().map_err(SchedulerError::poisoned)?;
        self.ensure_running()?;
        Ok(Arc::clone(entries.entry(name.to_string()).or_default()))
    }

    /// Drop a slot left empty by a failed activation, unless another caller
    /// has filled it in the meantime
    fn remove_empty_slot(&self, name: &str, slot: &Slot) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let unused = match entries.get(name) {
            Some(current) if Arc::ptr_eq(current, slot) => current
                .lock()
                .map(|entry| entry.is_none())
                .unwrap_or(true),
            _ => false,
        };
        if unused {
            entries.remove(name);
        }
    }

    /// Build the entry for `name` and start its periodic send.
    ///
    /// Nothing is left running if any step fails.
    fn activate(&self, name: &str) -> Result<EntryRef> {
        let layout = self
            .db
            .lookup(name)
            .ok_or_else(|| SchedulerError::UnknownMessage(name.to_string()))?;

        let values = SignalValues::from_layout(&layout);
        let payload = self.codec.encode(&layout, &values)?;
        let interval = self.config.interval_for(layout.cycle_time_ms);

        let frame = CanFrame {
            can_id: layout.id,
            data: payload.clone(),
            is_extended: layout.is_extended,
            is_fd: layout.is_fd,
        };
        let handle = self.transport.start_periodic(frame, interval)?;

        log::info!(
            "Activated message {} (0x{:X}) every {:?}",
            name,
            layout.id,
            interval
        );

        Ok(EntryRef {
            name: name.to_string(),
            layout,
            interval,
            state: Arc::new(Mutex::new(Entry {
                values,
                payload,
                handle,
            })),
        })
    }
}

impl Drop for CanScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
