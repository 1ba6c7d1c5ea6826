//! Passive conversion notifications.
//!
//! The conversion services only publish events. This subscriber decides whether
//! the user needs a notification by looking at the active screen, which the host
//! keeps current through [`ScreenTracker`].

use std::sync::Arc;

use bridge_traits::media::{Notification, NotificationLevel, NotificationSurface};
use core_runtime::events::{ConversionEvent, CoreEvent, EventBus};
use tokio::sync::{broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::ConversionKind;

/// Screen the user is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// Capture screen for one media kind
    Capture(ConversionKind),
    /// Combined file listing
    Library,
    Other,
}

/// Host-updated record of the active screen.
#[derive(Debug, Clone)]
pub struct ScreenTracker {
    sender: Arc<watch::Sender<Screen>>,
}

impl ScreenTracker {
    pub fn new(initial: Screen) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn set_active(&self, screen: Screen) {
        self.sender.send_replace(screen);
    }

    pub fn active(&self) -> Screen {
        *self.sender.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Screen> {
        self.sender.subscribe()
    }
}

impl Default for ScreenTracker {
    fn default() -> Self {
        Self::new(Screen::Other)
    }
}

/// Builds the notification for a terminal conversion event, or `None` when the
/// user is already on that kind's capture screen.
pub fn notification_for(event: &ConversionEvent, active: Screen) -> Option<Notification> {
    if !event.is_terminal() {
        return None;
    }
    let kind = ConversionKind::parse(event.kind())?;
    if active == Screen::Capture(kind) {
        return None;
    }

    let notification = match event {
        ConversionEvent::Completed {
            original_size,
            converted_size,
            ..
        } => Notification::new(
            NotificationLevel::Success,
            format!("{} conversion complete", kind.label()),
            format!("Converted {} bytes into {} bytes", original_size, converted_size),
        ),
        ConversionEvent::Failed { message, .. } => Notification::new(
            NotificationLevel::Error,
            format!("{} conversion failed", kind.label()),
            message.clone(),
        ),
        ConversionEvent::WorkerCrashed {
            message,
            rejected_jobs,
            ..
        } => Notification::new(
            NotificationLevel::Error,
            format!("{} converter stopped", kind.label()),
            format!("{} ({} conversions cancelled)", message, rejected_jobs),
        ),
        _ => return None,
    };
    Some(notification)
}

/// Spawns the notifier subscriber. Runs until the bus closes.
pub fn spawn_notifier(
    events: &EventBus,
    screens: ScreenTracker,
    surface: Arc<dyn NotificationSurface>,
) -> JoinHandle<()> {
    let mut receiver = events.subscribe();

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(CoreEvent::Conversion(event)) => {
                    if let Some(notification) = notification_for(&event, screens.active()) {
                        debug!(title = %notification.title, "Posting conversion notification");
                        surface.notify(notification);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Conversion notifier lagged behind the event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSurface {
        received: Mutex<Vec<Notification>>,
    }

    impl NotificationSurface for RecordingSurface {
        fn notify(&self, notification: Notification) {
            self.received.lock().push(notification);
        }
    }

    fn completed(kind: &str) -> ConversionEvent {
        ConversionEvent::Completed {
            job_id: "j".to_string(),
            kind: kind.to_string(),
            original_size: 10,
            converted_size: 4,
        }
    }

    #[test]
    fn test_suppressed_on_own_capture_screen() {
        let event = completed("audio");
        assert!(notification_for(&event, Screen::Capture(ConversionKind::Audio)).is_none());

        let shown = notification_for(&event, Screen::Capture(ConversionKind::Video)).unwrap();
        assert_eq!(shown.level, NotificationLevel::Success);
        assert_eq!(shown.title, "Audio conversion complete");
    }

    #[test]
    fn test_progress_never_notifies() {
        let event = ConversionEvent::Progress {
            job_id: "j".to_string(),
            kind: "video".to_string(),
            percent: 50,
            phase: "encoding".to_string(),
        };
        assert!(notification_for(&event, Screen::Library).is_none());
    }

    #[test]
    fn test_crash_notification_counts_jobs() {
        let event = ConversionEvent::WorkerCrashed {
            kind: "video".to_string(),
            message: "engine panicked".to_string(),
            rejected_jobs: 2,
        };
        let shown = notification_for(&event, Screen::Other).unwrap();
        assert_eq!(shown.level, NotificationLevel::Error);
        assert!(shown.body.contains("2 conversions cancelled"));
    }

    #[tokio::test]
    async fn test_notifier_follows_active_screen() {
        let bus = EventBus::new(16);
        let screens = ScreenTracker::new(Screen::Capture(ConversionKind::Audio));
        let surface = Arc::new(RecordingSurface::default());
        let handle = spawn_notifier(&bus, screens.clone(), surface.clone());

        bus.emit(CoreEvent::Conversion(completed("audio"))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(surface.received.lock().is_empty());

        screens.set_active(Screen::Library);
        bus.emit(CoreEvent::Conversion(completed("audio"))).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(surface.received.lock().len(), 1);

        handle.abort();
    }
}
