use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoleError {
    #[error("Role is missing")]
    Empty,

    #[error("Unknown role: {0}")]
    Unknown(String),
}
