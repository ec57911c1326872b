pub mod appointment;
pub mod calendar_integration;

pub use appointment::{
    Appointment, AppointmentStatus, Attendee, CreateAppointmentRequest, UpdateStatusRequest,
};
pub use calendar_integration::{CalendarIntegration, CalendarIntegrationResponse};
