pub mod request;
pub mod store;
pub mod types;

pub use store::AppointmentStore;
pub use types::{Appointment, ResponseData, TxId};
