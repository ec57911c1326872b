pub mod calendar;
pub mod google;

pub use calendar::{CalendarService, OAuthStateData};
pub use google::{GoogleCalendarClient, GoogleConfig};
