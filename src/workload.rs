//! Technician workload measurement and admission control.

use crate::db;

/// A technician's active-ticket load measured against their configured
/// concurrent-ticket limit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Workload {
    pub current: usize,
    pub max: usize,
}

impl Workload {
    /// Assignments the technician can still accept.
    pub fn available_slots(&self) -> usize {
        self.max.saturating_sub(self.current)
    }

    pub fn is_full(&self) -> bool {
        self.available_slots() == 0
    }
}

/// Counts the tickets the technician is actively carrying right now.
///
/// Recomputed from ticket state on every admission decision. A cached
/// value could admit an assignment that exceeds the limit.
pub async fn of_technician(
    db: &db::Scoped<'_>,
    technician: &db::User,
) -> Result<Workload, db::Error> {
    let current = db.count_active_tickets(technician.id).await?;
    Ok(Workload {
        current,
        max: technician.max_concurrent_tickets,
    })
}
