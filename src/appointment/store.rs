//! Map from appointment-id to appointment, with a state-locator index.
//!
//! Writes are serialised behind a single `Mutex` (the event loop is
//! single-threaded per spec.md §5; the `Mutex` only guards against the
//! out-of-scope ingestion path running on its own task), reads observe a
//! point-in-time snapshot via `get_all`.

use std::collections::HashMap;
use std::sync::Mutex;

use super::types::Appointment;

#[derive(Default)]
struct Inner {
    by_id: HashMap<String, Appointment>,
    by_locator: HashMap<String, String>, // state_locator -> id
}

pub struct AppointmentStore {
    inner: Mutex<Inner>,
}

impl Default for AppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AppointmentStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    /// If no entry exists for `a.state_locator`, inserts and returns `true`.
    /// If one exists with `state_nonce < a.state_nonce`, replaces and
    /// returns `true`. Otherwise returns `false`.
    pub fn add_or_update_by_state_locator(&self, appointment: Appointment) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let should_replace = match inner.by_locator.get(&appointment.state_locator) {
            None => true,
            Some(existing_id) => {
                let existing = &inner.by_id[existing_id];
                existing.state_nonce < appointment.state_nonce
            }
        };

        if !should_replace {
            return false;
        }

        if let Some(existing_id) = inner.by_locator.get(&appointment.state_locator).cloned() {
            if existing_id != appointment.id {
                inner.by_id.remove(&existing_id);
            }
        }

        inner.by_locator.insert(appointment.state_locator.clone(), appointment.id.clone());
        inner.by_id.insert(appointment.id.clone(), appointment);
        true
    }

    pub fn get_all(&self) -> Vec<Appointment> {
        self.inner.lock().unwrap().by_id.values().cloned().collect()
    }

    pub fn get_all_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().by_id.keys().cloned().collect()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Appointment> {
        self.inner.lock().unwrap().by_id.get(id).cloned()
    }

    /// Idempotent: removing an id that isn't present is not an error.
    pub fn remove_by_id(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(appointment) = inner.by_id.remove(id) {
            if inner.by_locator.get(&appointment.state_locator) == Some(&appointment.id) {
                inner.by_locator.remove(&appointment.state_locator);
            }
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_utils {
    use super::*;
    use crate::appointment::types::ResponseData;
    use crate::chain::types::EventFilter;
    use ethers::types::H160;

    pub fn appointment(id: &str, locator: &str, nonce: u64) -> Appointment {
        Appointment {
            id: id.to_string(),
            state_locator: locator.to_string(),
            state_nonce: nonce,
            contract_address: H160::repeat_byte(1),
            event_filter: EventFilter { address: H160::repeat_byte(1), topics: vec![] },
            response_data: ResponseData {
                contract_address: H160::repeat_byte(1),
                contract_abi: ethers::abi::Abi::default(),
                function_name: "respond".to_string(),
                function_args: vec![],
            },
            start_block: 0,
            end_block: 1000,
            challenge_period: 10,
        }
    }
}
