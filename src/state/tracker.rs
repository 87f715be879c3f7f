//! The per-machine state registry. Connections feed raw telemetry in,
//! normalized records and change notifications come out.

use crate::{
    error::MachineError,
    profile::{MachineCategory, MachineProfile},
    state::{
        record::{StateRecord, StatusFrame},
        MachineState,
    },
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::Serialize;

/// One observed state change, as handed to listeners.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct StateChange {
    /// The machine whose state changed.
    pub machine_id: String,

    /// State before the change.
    pub from: MachineState,

    /// State after the change.
    pub to: MachineState,

    /// The vendor status word that drove the change, when one did.
    pub raw_status: Option<String>,

    /// When the change was recorded.
    pub at: DateTime<Utc>,
}

type StateListener = Box<dyn Fn(&StateChange) -> anyhow::Result<()> + Send + Sync>;

/// Tracks a [`StateRecord`] per registered machine and notifies listeners
/// when a machine's normalized state moves. Telemetry that arrives out of
/// order with the transition model is logged and applied anyway; the
/// device is the authority on what it is doing.
#[derive(Default)]
pub struct StateTracker {
    records: DashMap<String, StateRecord>,
    listeners: std::sync::Mutex<Vec<StateListener>>,
}

impl StateTracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record for `id` and return a snapshot of it. Registering
    /// an id twice keeps the existing record untouched.
    pub fn register(&self, id: &str, category: MachineCategory) -> StateRecord {
        self.records
            .entry(id.to_owned())
            .or_insert_with(|| StateRecord::new(category))
            .clone()
    }

    /// Drop the record for `id`. Returns false when the id was never
    /// registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    /// Ids of every registered machine.
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|entry| entry.key().clone()).collect()
    }

    /// A snapshot of the record for `id`.
    pub fn get(&self, id: &str) -> Option<StateRecord> {
        self.records.get(id).map(|record| record.clone())
    }

    /// Fold one telemetry frame into the record for `id`, normalizing the
    /// frame's raw status through the machine's category profile.
    pub fn update(&self, id: &str, frame: &StatusFrame) -> Result<StateRecord, MachineError> {
        let (snapshot, change) = {
            let mut record = self
                .records
                .get_mut(id)
                .ok_or_else(|| MachineError::UnknownDevice(id.to_owned()))?;
            let profile = MachineProfile::for_category(record.category);
            let target = profile.normalize_status(&frame.raw_status);
            let change = Self::apply(id, &mut record, target, Some(frame.raw_status.as_str()), true);
            record.merge_frame(frame);
            (record.clone(), change)
        };
        if let Some(change) = change {
            self.notify(&change);
        }
        Ok(snapshot)
    }

    /// Move `id` straight to `state`, skipping normalization and the
    /// transition check. Used for lifecycle bookkeeping (connects,
    /// disconnects, kill switches) where the new state is decided rather
    /// than observed.
    pub fn force_state(
        &self,
        id: &str,
        state: MachineState,
        raw_status: Option<&str>,
    ) -> Result<StateRecord, MachineError> {
        let (snapshot, change) = {
            let mut record = self
                .records
                .get_mut(id)
                .ok_or_else(|| MachineError::UnknownDevice(id.to_owned()))?;
            let change = Self::apply(id, &mut record, state, raw_status, false);
            if let Some(raw_status) = raw_status {
                record.raw_status = Some(raw_status.to_owned());
            }
            if record.state.is_terminal() {
                record.job = None;
            }
            record.updated_at = Utc::now();
            (record.clone(), change)
        };
        if let Some(change) = change {
            self.notify(&change);
        }
        Ok(snapshot)
    }

    /// Register a listener for state changes. Listeners run on the caller
    /// of the update that moved the state; a listener that fails is logged
    /// and the rest still run.
    pub fn on_state_changed(
        &self,
        listener: impl Fn(&StateChange) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.lock_listeners().push(Box::new(listener));
    }

    fn apply(
        id: &str,
        record: &mut StateRecord,
        target: MachineState,
        raw_status: Option<&str>,
        validate: bool,
    ) -> Option<StateChange> {
        let current = record.state;
        if current == target {
            return None;
        }
        if validate && !current.can_transition_to(target) {
            tracing::warn!(
                machine_id = id,
                from = %current,
                to = %target,
                raw_status = raw_status.unwrap_or(""),
                "state transition outside the model, applying anyway"
            );
        }
        record.previous_state = current;
        record.state = target;
        Some(StateChange {
            machine_id: id.to_owned(),
            from: current,
            to: target,
            raw_status: raw_status.map(ToOwned::to_owned),
            at: Utc::now(),
        })
    }

    fn notify(&self, change: &StateChange) {
        // Held while listeners run; listeners must not register listeners.
        let listeners = self.lock_listeners();
        for listener in listeners.iter() {
            if let Err(err) = listener(change) {
                tracing::warn!(
                    machine_id = change.machine_id,
                    error = %err,
                    "state change listener failed"
                );
            }
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<StateListener>> {
        match self.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    #[test]
    fn register_is_idempotent() {
        let tracker = StateTracker::new();
        let fresh = tracker.register("front-printer", MachineCategory::FdmPrinter);
        assert_eq!(fresh.state, MachineState::Disconnected);
        tracker
            .update("front-printer", &StatusFrame::status_only("printing"))
            .unwrap();

        let kept = tracker.register("front-printer", MachineCategory::FdmPrinter);
        assert_eq!(kept.state, MachineState::Running);
        let record = tracker.get("front-printer").unwrap();
        assert_eq!(record.state, MachineState::Running);
    }

    #[test]
    fn unregister_reports_whether_the_id_existed() {
        let tracker = StateTracker::new();
        tracker.register("front-printer", MachineCategory::FdmPrinter);
        assert!(tracker.unregister("front-printer"));
        assert!(!tracker.unregister("front-printer"));
        assert!(tracker.get("front-printer").is_none());
    }

    #[test]
    fn updating_an_unknown_machine_is_an_error() {
        let tracker = StateTracker::new();
        let result = tracker.update("ghost", &StatusFrame::status_only("printing"));
        assert!(matches!(result, Err(MachineError::UnknownDevice(_))));
    }

    #[test]
    fn listeners_fire_on_changes_only() {
        let tracker = StateTracker::new();
        tracker.register("front-printer", MachineCategory::FdmPrinter);
        let fired = Arc::new(AtomicU32::new(0));
        let seen = fired.clone();
        tracker.on_state_changed(move |change| {
            assert_eq!(change.to, MachineState::Running);
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tracker
            .update("front-printer", &StatusFrame::status_only("printing"))
            .unwrap();
        tracker
            .update("front-printer", &StatusFrame::status_only("printing"))
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_failing_listener_does_not_starve_the_rest() {
        let tracker = StateTracker::new();
        tracker.register("router", MachineCategory::Cnc);
        tracker.on_state_changed(|_| anyhow::bail!("broken pipe"));
        let fired = Arc::new(AtomicU32::new(0));
        let seen = fired.clone();
        tracker.on_state_changed(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        tracker
            .update("router", &StatusFrame::status_only("run"))
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_model_transitions_are_still_applied() {
        let tracker = StateTracker::new();
        tracker.register("front-printer", MachineCategory::FdmPrinter);

        // Straight from disconnected to finished is not in the model, but
        // the device said it, so the record follows.
        let record = tracker
            .update("front-printer", &StatusFrame::status_only("finished"))
            .unwrap();
        assert_eq!(record.state, MachineState::Complete);
        assert_eq!(record.previous_state, MachineState::Disconnected);
    }

    #[test]
    fn unrecognized_status_words_map_to_unknown() {
        let tracker = StateTracker::new();
        tracker.register("front-printer", MachineCategory::FdmPrinter);
        let record = tracker
            .update("front-printer", &StatusFrame::status_only("warp drive engaged"))
            .unwrap();
        assert_eq!(record.state, MachineState::Unknown);
        assert_eq!(record.raw_status.as_deref(), Some("warp drive engaged"));
    }

    #[test]
    fn forced_states_notify_listeners() {
        let tracker = StateTracker::new();
        tracker.register("front-printer", MachineCategory::FdmPrinter);
        let fired = Arc::new(AtomicU32::new(0));
        let seen = fired.clone();
        tracker.on_state_changed(move |change| {
            assert_eq!(change.to, MachineState::Error);
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let record = tracker
            .force_state("front-printer", MachineState::Error, Some("emergency stop"))
            .unwrap();
        assert_eq!(record.state, MachineState::Error);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn progress_rides_along_with_the_state() {
        let tracker = StateTracker::new();
        tracker.register("front-printer", MachineCategory::FdmPrinter);
        let frame = StatusFrame {
            job: Some(crate::state::record::JobInfo {
                progress: Some(42.0),
                ..Default::default()
            }),
            ..StatusFrame::status_only("printing")
        };
        let record = tracker.update("front-printer", &frame).unwrap();
        assert_eq!(record.state, MachineState::Running);
        assert_eq!(record.job.unwrap().progress, Some(42.0));
    }
}
