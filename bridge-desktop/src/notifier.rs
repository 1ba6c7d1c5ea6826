//! Notification surface that writes to the tracing pipeline

use bridge_traits::media::{Notification, NotificationLevel, NotificationSurface};
use tracing::{error, info};

/// Desktop fallback: notifications become log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationSurface for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => {
                error!(title = %notification.title, "{}", notification.body)
            }
            NotificationLevel::Info | NotificationLevel::Success => {
                info!(title = %notification.title, "{}", notification.body)
            }
        }
    }
}
