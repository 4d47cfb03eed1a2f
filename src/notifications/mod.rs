//! Outbound email for account verification and password recovery.

mod email;

pub use email::Mailer;
