//! Notices sent to enrolled people.

use custos_core::{Identity, RecognitionEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Enrolled { name: String, email: String },
    Recognized { name: String, email: String, confidence: f32 },
}

impl Notice {
    pub fn enrolled(identity: &Identity) -> Self {
        Notice::Enrolled {
            name: identity.name.clone(),
            email: identity.email.clone(),
        }
    }

    pub fn recognized(event: &RecognitionEvent) -> Self {
        Notice::Recognized {
            name: event.name.clone(),
            email: event.email.clone(),
            confidence: event.confidence,
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Notice::Enrolled { email, .. } | Notice::Recognized { email, .. } => email,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Notice::Enrolled { .. } => "Face recognition enrollment",
            Notice::Recognized { .. } => "Face recognition: you were identified",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notice::Enrolled { name, .. } => {
                format!("Hello {name}, your enrollment in the face recognition system is complete.")
            }
            Notice::Recognized { name, confidence, .. } => {
                format!("Hello {name}, you were recognized by the monitoring terminal ({confidence:.2}% confidence).")
            }
        }
    }
}

/// Delivery channel for [`Notice`]s. Failures are reported, never fatal.
pub trait Notifier {
    fn notify(&self, notice: &Notice) -> anyhow::Result<()>;
}

/// Records notices in the log instead of delivering them.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
        tracing::info!(
            to = notice.recipient(),
            subject = notice.subject(),
            body = %notice.body(),
            "notification"
        );
        Ok(())
    }
}

/// Send `notice`, logging instead of failing when delivery breaks.
pub fn send(notifier: &dyn Notifier, notice: &Notice) {
    if let Err(e) = notifier.notify(notice) {
        tracing::warn!(to = notice.recipient(), error = %e, "notification failed");
    }
}
