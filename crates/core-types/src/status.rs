use serde::Serialize;

/// A point-in-time snapshot of a connection pool's accounting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStatus {
    /// Connections currently lent out to callers.
    pub active: u32,
    /// Connections parked in the idle set.
    pub idle: u32,
    /// Physical connections owned by the pool (lent or idle).
    pub size: u32,
    /// Callers queued in `acquire`.
    pub waiting: u32,
    pub min_connections: u32,
    pub max_connections: u32,
    pub total_acquired: u64,
    pub total_released: u64,
    pub failed_acquires: u64,
    pub avg_acquire_time_ms: f64,
    pub peak_active: u32,
    /// Connections closed by the health monitor (failed ping or idle timeout).
    pub evicted: u64,
}

impl PoolStatus {
    /// Fraction of `max_connections` currently lent out.
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        f64::from(self.active) / f64::from(self.max_connections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_is_active_over_max() {
        let status = PoolStatus {
            active: 9,
            max_connections: 10,
            ..PoolStatus::default()
        };
        assert!((status.utilization() - 0.9).abs() < f64::EPSILON);
        assert_eq!(PoolStatus::default().utilization(), 0.0);
    }
}
