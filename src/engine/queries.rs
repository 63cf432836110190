use std::time::Instant;

use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::time::Date;

use super::{Engine, EngineError};

impl Engine {
    /// Every reservation, in insertion order. Ids are generated monotonically,
    /// so ordering by id is ordering by creation.
    pub fn list(&self) -> Vec<Reservation> {
        let started = Instant::now();
        let mut all: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.id);
        observability::record_op("list", &Ok::<_, EngineError>(()), started);
        all
    }

    pub fn get(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self
            .reservations
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id));
        observability::record_op("get", &result, started);
        result
    }

    /// Reservations on `date` ordered by start time.
    pub async fn list_by_date(&self, date: Date) -> Vec<Reservation> {
        let Some(day) = self.days.get(&date).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard
            .slots
            .iter()
            .filter_map(|(id, _)| self.reservations.get(id).map(|e| e.value().clone()))
            .collect()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    pub fn find_user(&self, username: &str) -> Option<User> {
        self.users.get(username).map(|e| e.value().clone())
    }

    pub fn get_user(&self, id: Ulid) -> Option<User> {
        self.users
            .iter()
            .find(|e| e.value().id == id)
            .map(|e| e.value().clone())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}
