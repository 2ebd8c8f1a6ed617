//! Per-room session guard and session handles
//!
//! At most one session runs per room. The guard is taken synchronously in
//! `start_calibration`, before any device is touched, and released when
//! the session task drops it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::calibration::report::CalibrationReport;
use crate::error::{LuxcalError, Result};

#[derive(Debug)]
struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
}

/// Room id -> running session
#[derive(Debug, Default)]
pub struct RoomRegistry {
    active: Mutex<HashMap<String, ActiveSession>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a room for a new session
    pub fn try_acquire(
        self: &Arc<Self>,
        room: &str,
        id: Uuid,
        cancel: CancellationToken,
    ) -> Result<RoomGuard> {
        let mut active = self.active.lock();
        if let Some(existing) = active.get(room) {
            debug!(room = %room, running = %existing.id, "Room already has an active session");
            return Err(LuxcalError::SessionBusy { room: room.to_string() });
        }
        active.insert(room.to_string(), ActiveSession { id, cancel });
        Ok(RoomGuard {
            registry: Arc::clone(self),
            room: room.to_string(),
            id,
        })
    }

    /// Cancel a running session by id
    pub fn cancel(&self, id: Uuid) -> Result<()> {
        let active = self.active.lock();
        let session = active
            .values()
            .find(|s| s.id == id)
            .ok_or_else(|| LuxcalError::SessionNotFound(id.to_string()))?;
        session.cancel.cancel();
        info!(session = %id, "Calibration cancellation requested");
        Ok(())
    }

    pub fn active_session(&self, room: &str) -> Option<Uuid> {
        self.active.lock().get(room).map(|s| s.id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn release(&self, room: &str, id: Uuid) {
        let mut active = self.active.lock();
        if active.get(room).is_some_and(|s| s.id == id) {
            active.remove(room);
            debug!(room = %room, session = %id, "Room released");
        }
    }
}

/// Holds a room for the lifetime of a session
#[derive(Debug)]
pub struct RoomGuard {
    registry: Arc<RoomRegistry>,
    room: String,
    id: Uuid,
}

impl Drop for RoomGuard {
    fn drop(&mut self) {
        self.registry.release(&self.room, self.id);
    }
}

/// Handle to a running calibration session
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    room_id: String,
    cancel: CancellationToken,
    task: JoinHandle<CalibrationReport>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: Uuid,
        room_id: String,
        cancel: CancellationToken,
        task: JoinHandle<CalibrationReport>,
    ) -> Self {
        Self { id, room_id, cancel, task }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Request cancellation; the session still restores lights before ending
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the terminal report
    pub async fn wait(self) -> Result<CalibrationReport> {
        self.task
            .await
            .map_err(|e| LuxcalError::generic(format!("calibration task failed: {}", e)))
    }
}
