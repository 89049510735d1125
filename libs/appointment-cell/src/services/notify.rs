// libs/appointment-cell/src/services/notify.rs
use futures::future::join;
use tracing::warn;
use uuid::Uuid;

use notification_cell::{Contact, ContactDirectory, MeetingDetails, NotificationData, NotificationError};

use crate::models::{Appointment, OperationWarning};

/// Customer and consultant contacts for an appointment. A failed or empty
/// lookup yields a blank contact and a warning.
pub async fn resolve_contacts(
    directory: &dyn ContactDirectory,
    appointment: &Appointment,
    warnings: &mut Vec<OperationWarning>,
) -> (Contact, Contact) {
    let (customer, consultant) = join(
        directory.lookup(appointment.customer_id),
        directory.lookup(appointment.consultant_id),
    )
    .await;

    (
        contact_or_blank(appointment.customer_id, customer, warnings),
        contact_or_blank(appointment.consultant_id, consultant, warnings),
    )
}

fn contact_or_blank(
    user_id: Uuid,
    lookup: Result<Option<Contact>, NotificationError>,
    warnings: &mut Vec<OperationWarning>,
) -> Contact {
    let message = match lookup {
        Ok(Some(contact)) => return contact,
        Ok(None) => "no profile found".to_string(),
        Err(e) => e.to_string(),
    };
    warn!("Contact lookup failed for user {}: {}", user_id, message);
    warnings.push(OperationWarning::ContactLookupFailed { user_id, message });
    Contact {
        user_id,
        name: String::new(),
        email: String::new(),
    }
}

pub fn notification_data(appointment: &Appointment, customer: &Contact, consultant: &Contact) -> NotificationData {
    NotificationData {
        appointment_id: appointment.id,
        customer_name: customer.name.clone(),
        customer_email: customer.email.clone(),
        consultant_name: consultant.name.clone(),
        appointment_date: appointment.appointment_date,
        start_time: appointment.start_time,
        end_time: appointment.end_time,
        meeting: appointment.meeting_info.as_ref().map(|m| MeetingDetails {
            meet_url: m.meet_url.clone(),
            meeting_id: m.meeting_id.clone(),
            meeting_password: m.meeting_password.clone(),
        }),
        customer_notes: appointment.customer_notes.clone(),
    }
}
