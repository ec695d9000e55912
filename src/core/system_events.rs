//! Maps OS power and session notifications onto orchestrator commands.

use crate::collector::SystemEvent;
use crate::core::orchestrator::Orchestrator;
use crate::core::quantum::PauseReason;

/// What a system event did to tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventEffect {
    Paused(PauseReason),
    ResumePrompted,
    Ignored,
}

pub struct SystemEventAdapter;

impl SystemEventAdapter {
    /// The pause a notification asks for, honoring `auto_pause_on_sleep`
    /// for system sleep.
    pub fn pause_reason(event: SystemEvent, auto_pause_on_sleep: bool) -> Option<PauseReason> {
        match event {
            SystemEvent::WillSleep if auto_pause_on_sleep => Some(PauseReason::SystemSleep),
            SystemEvent::ScreensDidSleep => Some(PauseReason::ScreensSleep),
            SystemEvent::ScreenLocked => Some(PauseReason::ScreenLocked),
            _ => None,
        }
    }

    pub fn is_wake(event: SystemEvent) -> bool {
        matches!(
            event,
            SystemEvent::DidWake | SystemEvent::ScreensDidWake | SystemEvent::ScreenUnlocked
        )
    }

    pub fn apply(event: SystemEvent, orchestrator: &mut Orchestrator) -> SystemEventEffect {
        tracing::debug!(event = event.as_str(), "system event");

        let auto_pause_on_sleep = orchestrator.config().quantum.auto_pause_on_sleep;
        if let Some(reason) = Self::pause_reason(event, auto_pause_on_sleep) {
            return match orchestrator.pause_by_system(reason) {
                Ok(()) => SystemEventEffect::Paused(reason),
                Err(_) => SystemEventEffect::Ignored,
            };
        }

        if Self::is_wake(event) && orchestrator.handle_wake() {
            return SystemEventEffect::ResumePrompted;
        }

        SystemEventEffect::Ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_mapping() {
        assert_eq!(
            SystemEventAdapter::pause_reason(SystemEvent::WillSleep, true),
            Some(PauseReason::SystemSleep)
        );
        assert_eq!(SystemEventAdapter::pause_reason(SystemEvent::WillSleep, false), None);
        assert_eq!(
            SystemEventAdapter::pause_reason(SystemEvent::ScreensDidSleep, false),
            Some(PauseReason::ScreensSleep)
        );
        assert_eq!(
            SystemEventAdapter::pause_reason(SystemEvent::ScreenLocked, false),
            Some(PauseReason::ScreenLocked)
        );
        assert_eq!(SystemEventAdapter::pause_reason(SystemEvent::DidWake, true), None);
    }

    #[test]
    fn test_wake_events() {
        assert!(SystemEventAdapter::is_wake(SystemEvent::DidWake));
        assert!(SystemEventAdapter::is_wake(SystemEvent::ScreensDidWake));
        assert!(SystemEventAdapter::is_wake(SystemEvent::ScreenUnlocked));
        assert!(!SystemEventAdapter::is_wake(SystemEvent::ScreenLocked));
    }
}
