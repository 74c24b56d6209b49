//! Alert evaluation, deduplication, lifecycle, and notification dispatch.

pub mod channel;
pub mod manager;
pub mod rule;

pub use channel::{EmailChannel, NotificationChannel, WebhookChannel};
pub use manager::{AlertCallback, AlertManager};
pub use rule::{AlertRule, KeywordAlertRule, ThresholdAlertRule};
