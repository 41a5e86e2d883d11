//! The external store boundary (§4.2's Design Note: constructor-injected
//! trait objects, never a module-scope client handle). Production wiring
//! plugs a Redis-backed (or equivalent) implementation in here; the
//! concrete external store is out of scope, so this module only defines the
//! trait and an in-memory double for tests.

use std::collections::HashMap;
use std::sync::Mutex;

/// What the trip participant needs from the trip service's own state.
pub trait TripStore: Send + Sync {
    fn ride_exists(&self, ride_id: &str) -> bool;
    fn driver_for_ride(&self, ride_id: &str) -> Option<String>;
    fn mark_ride_completed(&self, ride_id: &str);
}

/// What the location participant needs from the location service's own
/// state.
pub trait LocationStore: Send + Sync {
    fn mark_driver_available(&self, driver_id: &str);
}

struct RideRecord {
    driver_id: Option<String>,
    completed: bool,
}

/// An in-memory `TripStore` for tests. Not for production use: it holds no
/// connection to any real ride-data service.
#[derive(Default)]
pub struct InMemoryTripStore {
    rides: Mutex<HashMap<String, RideRecord>>,
}

impl InMemoryTripStore {
    pub fn new() -> InMemoryTripStore {
        InMemoryTripStore::default()
    }

    /// Test setup: registers a ride, optionally with an assigned driver.
    pub fn insert_ride(&self, ride_id: impl Into<String>, driver_id: Option<String>) {
        self.rides
            .lock()
            .unwrap()
            .insert(ride_id.into(), RideRecord { driver_id, completed: false });
    }

    pub fn is_completed(&self, ride_id: &str) -> bool {
        self.rides.lock().unwrap().get(ride_id).map(|r| r.completed).unwrap_or(false)
    }
}

impl TripStore for InMemoryTripStore {
    fn ride_exists(&self, ride_id: &str) -> bool {
        self.rides.lock().unwrap().contains_key(ride_id)
    }

    fn driver_for_ride(&self, ride_id: &str) -> Option<String> {
        self.rides.lock().unwrap().get(ride_id).and_then(|r| r.driver_id.clone())
    }

    fn mark_ride_completed(&self, ride_id: &str) {
        if let Some(record) = self.rides.lock().unwrap().get_mut(ride_id) {
            record.completed = true;
        }
    }
}

/// An in-memory `LocationStore` for tests, tracking each driver's
/// availability.
#[derive(Default)]
pub struct InMemoryLocationStore {
    available: Mutex<HashMap<String, bool>>,
}

impl InMemoryLocationStore {
    pub fn new() -> InMemoryLocationStore {
        InMemoryLocationStore::default()
    }

    /// Test setup: a driver starts out held by a ride (unavailable).
    pub fn mark_driver_busy(&self, driver_id: impl Into<String>) {
        self.available.lock().unwrap().insert(driver_id.into(), false);
    }

    pub fn is_available(&self, driver_id: &str) -> bool {
        self.available.lock().unwrap().get(driver_id).copied().unwrap_or(false)
    }
}

impl LocationStore for InMemoryLocationStore {
    fn mark_driver_available(&self, driver_id: &str) {
        self.available.lock().unwrap().insert(driver_id.to_string(), true);
    }
}
