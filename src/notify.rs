use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::model::ReservationRecord;
use crate::observability::{NOTICES_DROPPED_TOTAL, NOTICES_FAILED_TOTAL};

/// Something a person should hear about after a reservation change commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Confirmed {
        reservation: ReservationRecord,
        spot_name: String,
    },
    Cancelled {
        reservation: ReservationRecord,
        spot_name: String,
        cancelled_by: String,
    },
    /// Weekend bookings need building access arranged by a coordinator.
    WeekendBooking {
        coordinator: String,
        reservation: ReservationRecord,
        spot_name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

fn describe(r: &ReservationRecord, spot_name: &str) -> String {
    format!("{spot_name} on {} from {} to {}", r.date, r.start_time, r.end_time)
}

fn holder(r: &ReservationRecord) -> &str {
    r.holder_name.as_deref().unwrap_or(&r.holder_identity)
}

impl Notice {
    /// Render as mail. Holders identified by something other than an
    /// e-mail address cannot be reached.
    pub fn to_message(&self) -> Option<Message> {
        match self {
            Notice::Confirmed { reservation, spot_name } => reservation.holder_identity.contains('@').then(|| Message {
                to: reservation.holder_identity.clone(),
                subject: "Parking reservation confirmed".to_string(),
                body: format!(
                    "Hello {}, your reservation of {} is confirmed (id {}).",
                    holder(reservation),
                    describe(reservation, spot_name),
                    reservation.id
                ),
            }),
            Notice::Cancelled {
                reservation,
                spot_name,
                cancelled_by,
            } => reservation.holder_identity.contains('@').then(|| Message {
                to: reservation.holder_identity.clone(),
                subject: "Parking reservation cancelled".to_string(),
                body: format!(
                    "Hello {}, your reservation of {} was cancelled by {cancelled_by}.",
                    holder(reservation),
                    describe(reservation, spot_name)
                ),
            }),
            Notice::WeekendBooking {
                coordinator,
                reservation,
                spot_name,
            } => Some(Message {
                to: coordinator.clone(),
                subject: format!("Weekend parking: {spot_name} on {}", reservation.date),
                body: format!(
                    "{} ({}) reserved {}. Please arrange weekend access.",
                    holder(reservation),
                    reservation.holder_identity,
                    describe(reservation, spot_name)
                ),
            }),
        }
    }
}

/// Fire-and-forget outbox. Publishing never waits and never fails the caller.
#[derive(Clone)]
pub struct NotifyHub {
    tx: Option<mpsc::Sender<Notice>>,
}

impl NotifyHub {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A hub that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, notice: Notice) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                metrics::counter!(NOTICES_DROPPED_TOTAL, "reason" => "full").increment(1);
                tracing::warn!(?notice, "notification queue full, dropping notice");
            }
            Err(TrySendError::Closed(notice)) => {
                metrics::counter!(NOTICES_DROPPED_TOTAL, "reason" => "closed").increment(1);
                tracing::warn!(?notice, "notifier stopped, dropping notice");
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &Message) -> Result<(), MailError>;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &Message) -> Result<(), MailError> {
        tracing::info!(to = %message.to, subject = %message.subject, body = %message.body, "mail");
        Ok(())
    }
}

/// Drain the outbox until every [`NotifyHub`] clone is gone.
pub async fn run_notifier(mut rx: mpsc::Receiver<Notice>, mailer: Arc<dyn Mailer>) {
    while let Some(notice) = rx.recv().await {
        let Some(message) = notice.to_message() else {
            tracing::debug!(?notice, "notice has no deliverable address");
            continue;
        };
        if let Err(e) = mailer.send(&message).await {
            metrics::counter!(NOTICES_FAILED_TOTAL).increment(1);
            tracing::warn!(to = %message.to, error = %e, "notice delivery failed");
        }
    }
    tracing::debug!("notifier stopped");
}
