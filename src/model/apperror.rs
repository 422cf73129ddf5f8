use std::fmt;

/**
 * Represents the type of error that can occur within the application.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorType {
    /**
     * Client input failed validation.
     */
    InvalidArgument,
    /**
     * A reading already exists for the customer and billing period.
     */
    AlreadyExists,
    /**
     * No matching record, or no records at all for collection reads.
     */
    NotFound,
    DatabaseError,
    /**
     * Startup failures. Never returned from a request.
     */
    Initialization,
}

/**
 * Represents an error that occurs within the application.
 */
#[derive(Debug, Clone)]
pub struct ApplicationError {
    /**
     * Error type.
     */
    pub error_type: ErrorType,
    /**
     * Error message describing problem.
     */
    pub message: String,
}

impl ApplicationError {
    /**
     * Creates a new ApplicationError.
     *
     * #Arguments
     * `error_type`: The type of error.
     * `message`: A description of the error.
     */
    pub fn new(error_type: ErrorType, message: String) -> Self {
        ApplicationError { error_type, message }
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ApplicationError> for std::io::Error {
    fn from(err: ApplicationError) -> Self {
        std::io::Error::other(err.message)
    }
}
