//! Email adapters for user notifications.

mod resend_sender;

pub use resend_sender::{ResendConfig, ResendNotificationSender};
