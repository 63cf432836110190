use std::time::Instant;

use tokio::sync::OwnedRwLockWriteGuard;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::time::{format_date, Date};
use crate::validate::{validate_create, validate_update, ValidBooking, Violation, MSG_ORDERING};

use super::conflict::check_no_conflict;
use super::{ConflictMode, Engine, EngineError, WalCommand};

type DayGuard = OwnedRwLockWriteGuard<DayState>;

impl Engine {
    /// Validate, check for overlaps on the same date, then persist.
    pub async fn create(&self, fields: &BookingFields) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.create_inner(fields).await;
        observability::record_op("create", &result, started);
        match &result {
            Ok(r) => info!(id = %r.id, date = %format_date(&r.date), range = %r.range(), "reservation created"),
            Err(EngineError::Conflict { date, range, existing }) => {
                metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
                info!(date = %format_date(date), %range, %existing, "reservation rejected: overlap");
            }
            Err(e) => debug!(error = %e, "reservation rejected"),
        }
        result
    }

    async fn create_inner(&self, fields: &BookingFields) -> Result<Reservation, EngineError> {
        let valid = validate_create(fields).map_err(EngineError::Validation)?;
        if self.reservations.len() >= MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        let _gate = self.compaction_gate.read().await;
        let day = self.day(valid.date);

        match self.mode {
            ConflictMode::Optimistic => {
                {
                    let guard = day.read().await;
                    check_day_capacity(&guard)?;
                    check_no_conflict(&guard, &valid.range)?;
                }
                // Gap between query and insert: another create may pass the
                // same check here.
                let reservation = self.build_reservation(valid)?;
                let event = Event::ReservationCreated(reservation.clone());
                self.wal_append(&event).await?;
                let mut guard = day.write().await;
                self.insert_reservation(&mut guard, &reservation);
                Ok(reservation)
            }
            ConflictMode::Serialized => {
                let mut guard = day.write().await;
                check_day_capacity(&guard)?;
                check_no_conflict(&guard, &valid.range)?;
                let reservation = self.build_reservation(valid)?;
                let event = Event::ReservationCreated(reservation.clone());
                self.wal_append(&event).await?;
                self.insert_reservation(&mut guard, &reservation);
                Ok(reservation)
            }
        }
    }

    fn build_reservation(&self, valid: ValidBooking) -> Result<Reservation, EngineError> {
        Ok(Reservation {
            id: self.next_id()?,
            user: valid.user,
            date: valid.date,
            start_time: valid.range.start,
            end_time: valid.range.end,
        })
    }

    fn insert_reservation(&self, day: &mut DayState, reservation: &Reservation) {
        day.insert_slot(reservation.id, reservation.range());
        self.reservations.insert(reservation.id, reservation.clone());
        metrics::gauge!(observability::RESERVATIONS_ACTIVE).set(self.reservations.len() as f64);
    }

    /// Apply the fields present in `fields`. The overlap rule is not
    /// re-checked; only the merged `start < end` ordering is.
    pub async fn update(&self, id: Ulid, fields: &BookingFields) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.update_inner(id, fields).await;
        observability::record_op("update", &result, started);
        match &result {
            Ok(r) => info!(%id, date = %format_date(&r.date), range = %r.range(), "reservation updated"),
            Err(e) => debug!(%id, error = %e, "update rejected"),
        }
        result
    }

    async fn update_inner(&self, id: Ulid, fields: &BookingFields) -> Result<Reservation, EngineError> {
        let patch = validate_update(fields).map_err(EngineError::Validation)?;
        let _gate = self.compaction_gate.read().await;

        let target_date = |current: &Reservation| patch.date.unwrap_or(current.date);
        let mut locked = self.lock_record(id, target_date).await?;
        let current = locked.current.clone();
        if patch.is_empty() {
            return Ok(current);
        }

        let updated = Reservation {
            id,
            user: patch.user.clone().unwrap_or_else(|| current.user.clone()),
            date: target_date(&current),
            start_time: patch.start_time.unwrap_or(current.start_time),
            end_time: patch.end_time.unwrap_or(current.end_time),
        };
        if updated.start_time >= updated.end_time {
            return Err(EngineError::Validation(vec![Violation::new("timeSlot", MSG_ORDERING)]));
        }
        if let Some(target) = &locked.target {
            check_day_capacity(target)?;
        }

        self.wal_append(&Event::ReservationUpdated(updated.clone())).await?;

        locked.source.remove_slot(id);
        locked.target_mut().insert_slot(id, updated.range());
        self.reservations.insert(id, updated.clone());
        Ok(updated)
    }

    pub async fn delete(&self, id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.delete_inner(id).await;
        observability::record_op("delete", &result, started);
        match &result {
            Ok(()) => info!(%id, "reservation deleted"),
            Err(e) => debug!(%id, error = %e, "delete rejected"),
        }
        result
    }

    async fn delete_inner(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let mut locked = self.lock_record(id, |r| r.date).await?;

        self.wal_append(&Event::ReservationDeleted { id }).await?;

        locked.source.remove_slot(id);
        self.reservations.remove(&id);
        metrics::gauge!(observability::RESERVATIONS_ACTIVE).set(self.reservations.len() as f64);
        Ok(())
    }

    /// Lock the day holding `id` and, if different, the day `target` picks
    /// for it, in date order. Retries if a concurrent update moved the record
    /// between the lookup and the lock.
    async fn lock_record(
        &self,
        id: Ulid,
        target: impl Fn(&Reservation) -> Date,
    ) -> Result<LockedRecord, EngineError> {
        loop {
            let current = self
                .reservations
                .get(&id)
                .map(|e| e.value().clone())
                .ok_or(EngineError::NotFound(id))?;
            let source_date = current.date;
            let target_date = target(&current);

            let (source, target_guard) = if target_date == source_date {
                (self.day(source_date).write_owned().await, None)
            } else if target_date < source_date {
                let t = self.day(target_date).write_owned().await;
                (self.day(source_date).write_owned().await, Some(t))
            } else {
                let s = self.day(source_date).write_owned().await;
                (s, Some(self.day(target_date).write_owned().await))
            };

            match self.reservations.get(&id) {
                Some(now) if now.date == source_date => {
                    return Ok(LockedRecord {
                        current: now.value().clone(),
                        source,
                        target: target_guard,
                    });
                }
                Some(_) => continue,
                None => return Err(EngineError::NotFound(id)),
            }
        }
    }

    /// Persist a new account. The hash is produced by the caller.
    pub async fn register_user(&self, username: &str, password_hash: String) -> Result<User, EngineError> {
        let _registration = self.users_gate.lock().await;
        if self.users.contains_key(username) {
            return Err(EngineError::AlreadyExists(format!("user {username}")));
        }
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        let _gate = self.compaction_gate.read().await;

        let user = User {
            id: self.next_id()?,
            username: username.to_string(),
            password_hash,
        };
        self.wal_append(&Event::UserRegistered {
            id: user.id,
            username: user.username.clone(),
            password_hash: user.password_hash.clone(),
        })
        .await?;
        self.users.insert(user.username.clone(), user.clone());
        info!(id = %user.id, username, "user registered");
        Ok(user)
    }

    /// Rewrite the WAL with only the events needed to rebuild current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.compaction_gate.write().await;

        let mut events: Vec<Event> = self
            .users
            .iter()
            .map(|e| {
                let u = e.value();
                Event::UserRegistered {
                    id: u.id,
                    username: u.username.clone(),
                    password_hash: u.password_hash.clone(),
                }
            })
            .collect();
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        let kept = reservations.len();
        events.extend(reservations.into_iter().map(Event::ReservationCreated));

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()));
        match &result {
            Ok(()) => info!(reservations = kept, users = self.users.len(), "WAL compacted"),
            Err(e) => warn!(error = %e, "WAL compaction failed"),
        }
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn check_day_capacity(day: &DayState) -> Result<(), EngineError> {
    if day.slots.len() >= MAX_RESERVATIONS_PER_DAY {
        return Err(EngineError::LimitExceeded("too many reservations on date"));
    }
    Ok(())
}

struct LockedRecord {
    current: Reservation,
    /// Day the record is indexed under now.
    source: DayGuard,
    /// Day it moves to, when that differs from `source`.
    target: Option<DayGuard>,
}

impl LockedRecord {
    fn target_mut(&mut self) -> &mut DayState {
        match &mut self.target {
            Some(t) => t,
            None => &mut self.source,
        }
    }
}
