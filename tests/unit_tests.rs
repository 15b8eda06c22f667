//! Unit tests for core RTOS modules
//!
//! These tests run on the host (not embedded target) to verify
//! the core algorithms work correctly. `PrioTable`, `List`, `OsFlagGrp` and
//! `OsTmr` each carry their own focused `#[cfg(test)]` modules next to their
//! implementation; this file covers the pieces that don't have a natural
//! home there (error codes, type/option surfaces, configuration invariants).

#[cfg(test)]
mod error_tests {
    use ucosiii::error::OsError;

    #[test]
    fn test_error_variants() {
        assert!(OsError::None.is_ok());
        assert!(!OsError::None.is_err());
        
        assert!(!OsError::Timeout.is_ok());
        assert!(OsError::Timeout.is_err());
        
        assert_eq!(OsError::None, OsError::None);
        assert_ne!(OsError::None, OsError::Timeout);
    }

    #[test]
    fn test_error_debug() {
        // Ensure errors can be formatted for debugging
        let err = OsError::PendIsr;
        let _ = format!("{:?}", err);
    }
}

#[cfg(test)]
mod types_tests {
    use ucosiii::types::*;

    #[test]
    fn test_task_state_enum() {
        let state = OsTaskState::Ready;
        assert_eq!(state, OsTaskState::Ready);
        assert_ne!(state, OsTaskState::Blocked);
        assert_ne!(OsTaskState::Suspended, OsTaskState::Terminated);
    }

    #[test]
    fn test_pend_status_enum() {
        let status = OsPendStatus::Ok;
        assert_eq!(status, OsPendStatus::Ok);
        assert_ne!(status, OsPendStatus::Timeout);
        assert_ne!(OsPendStatus::Abort, OsPendStatus::Del);
    }

    #[test]
    fn test_option_flags() {
        use ucosiii::types::opt::*;

        assert_eq!(NONE, 0);

        // Event group wait options are independent bits.
        let combined = FLAG_WAIT_SET_ALL | FLAG_CONSUME;
        assert_eq!(combined & FLAG_CONSUME, FLAG_CONSUME);
        assert_eq!(combined & FLAG_WAIT_SET_ANY, 0);
    }
}

#[cfg(test)]
mod config_tests {
    use ucosiii::config::*;

    #[test]
    fn test_config_values() {
        assert!(CFG_PRIO_MAX >= 8, "Need at least 8 priority levels");
        assert!(CFG_PRIO_MAX <= 256, "Too many priority levels");
        
        assert!(CFG_STK_SIZE_MIN >= 32, "Stack too small");
        
        assert!(CFG_TICK_RATE_HZ >= 10, "Tick rate too slow");
        assert!(CFG_TICK_RATE_HZ <= 10000, "Tick rate too fast");

        // Idle priority sits at the bottom of the range (least urgent).
        assert_eq!(CFG_PRIO_IDLE, 0);
        assert!((CFG_TIMER_TASK_PRIO as usize) < CFG_PRIO_MAX);
        assert!(CFG_TIMER_QUEUE_LEN > 0);
    }
}
