use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Invalid coordinates: ({latitude}, {longitude})")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("Anonymous reports need a contact")]
    MissingContact,

    #[error("Only lost pets can have their case closed")]
    NotLost,
}
