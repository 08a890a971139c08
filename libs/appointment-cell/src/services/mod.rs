pub mod access;
pub mod audit;
pub mod calendar;
pub mod formatting;
pub mod lifecycle;
pub mod listing;
pub mod notification;
pub mod reminders;
pub mod scheduling;
pub mod slots;
