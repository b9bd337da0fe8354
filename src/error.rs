use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

// One error type for the whole crate. The kind decides whether the session survives:
// transport and protocol errors leave the connection in an undefined state and abort
// the event loop, everything else is reported to the user and the session continues.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    // Socket read/write failed or the connection was refused.
    Transport,
    // Unexpected message type, sequence mismatch, malformed frame.
    Protocol,
    // Agent NACKed a request; payload is the target-side error code.
    ServerCommand(u8),
    // Source-level operation without a loaded program or at an address with no line info.
    NoDebugInfo,
    // STABS record stream violates a structural invariant.
    DebugInfoMalformed,
    // CLI command invoked in an incompatible target state.
    StateViolation,
    // Bad command line or command arguments.
    Usage,
    // Problems with local files: executable, source files, syscall db.
    Environment,
    // Should-not-happen conditions, e.g. the disassembler rejecting its own setup.
    Internal,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: String) -> Self { Self {kind, message} }

    pub fn is_fatal(&self) -> bool {
        match self.kind {
            ErrorKind::Transport | ErrorKind::Protocol => true,
            _ => false,
        }
    }

    pub fn server_error_code(&self) -> Option<u8> {
        match self.kind {
            ErrorKind::ServerCommand(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(ErrorKind::Environment, format!("{}", e))
    }
}

// error!(Kind, "fmt", ...) builds an Error, err!(Kind, "fmt", ...) builds Err(Error).
// ServerCommand errors carry a code and are built in commands.rs instead.
#[macro_export]
macro_rules! error {
    ($kind:ident, $($arg:tt)*) => ($crate::error::Error::new($crate::error::ErrorKind::$kind, format!($($arg)*)));
}
#[macro_export]
macro_rules! err {
    ($kind:ident, $($arg:tt)*) => (Err($crate::error!($kind, $($arg)*)));
}
