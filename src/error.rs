use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers all possible error conditions that can occur while parsing class files,
/// rewriting bytecode and driving retransformation through the host. Each variant provides
/// specific context about the failure mode to enable appropriate error handling.
///
/// # Error Categories
///
/// ## Class File Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid class file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond buffer boundaries
/// - [`Error::NotSupported`] - Unsupported class file version or construct
/// - [`Error::Empty`] - Empty input provided
///
/// ## Rewriting Errors
/// - [`Error::TransformFailure`] - A class could not be rewritten; it is left unmodified
/// - [`Error::UnmodifiableClass`] - The host refused to retransform a class
///
/// ## Runtime Errors
/// - [`Error::StackCapture`] - The stack provider failed; the record is kept with an empty stack
/// - [`Error::LockError`] - Thread synchronization failure
/// - [`Error::FileError`] - Filesystem I/O errors (debug dumps)
///
/// # Examples
///
/// ```rust
/// use mutscope::{classfile::ClassFile, Error};
///
/// match ClassFile::parse(&[0xCA, 0xFE]) {
///     Ok(_) => println!("parsed"),
///     Err(Error::OutOfBounds) => println!("truncated class file"),
///     Err(Error::Malformed { message, file, line }) => {
///         println!("malformed class: {} ({}:{})", message, file, line);
///     }
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be parsed.
    ///
    /// This error indicates that the buffer does not conform to the JVM class
    /// file format. The error includes the source location where the
    /// malformation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the buffer.
    ///
    /// This error occurs when trying to read data beyond the end of the class
    /// file. It's a safety check to prevent buffer overruns during parsing.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This class file is not supported.
    ///
    /// Indicates that the input uses a class file version or construct that is
    /// not implemented by this library.
    #[error("This class file is not supported")]
    NotSupported,

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// A class could not be rewritten.
    ///
    /// The named class is left unmodified; rewriting of sibling classes
    /// continues. The message carries the reason, e.g. a conditional branch
    /// displacement that no longer fits after insertion.
    #[error("Failed to rewrite {class_name}: {message}")]
    TransformFailure {
        /// Internal name of the class that could not be rewritten
        class_name: String,
        /// The reason the rewrite was abandoned
        message: String,
    },

    /// The host refused to retransform a class.
    ///
    /// Mirrors a JVMTI `UnmodifiableClassException`: the engine continues
    /// without this class's mutators captured.
    #[error("Class is not modifiable: {0}")]
    UnmodifiableClass(String),

    /// The stack provider failed to produce frames.
    ///
    /// The modification record is still appended, with an empty stack.
    #[error("Stack capture failed: {0}")]
    StackCapture(String),

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically when a
    /// lock is in an invalid state.
    #[error("Failed to lock target")]
    LockError,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while dumping rewritten
    /// class bytes to disk.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
