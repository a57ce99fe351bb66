use alloc::string::String;

/// Category of hard failures raised by the core
///
/// Logical outcomes ("not dynamically controllable", "timed out")
/// are not errors; they are carried in
/// [`CheckStatus`](crate::status::CheckStatus). Every function returning
/// a `NetError` leaves the caller's graph untouched.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum NetError {
    /// The input network violates a well-definition property that cannot
    /// be repaired
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// Integer arithmetic left the representable range
    #[error("arithmetic overflow while computing {0}")]
    Overflow(&'static str),
    /// A component was invoked outside its precondition
    #[error("contract violation: {0}")]
    ContractViolation(String),
}
