use failure::Fail;
use std::io;

#[derive(Debug, Fail)]
pub enum FcacheError {
    #[fail(display = "IO error: {}", _0)]
    Io(#[cause] io::Error),

    #[fail(display = "file not registered: {}", _0)]
    Unregistered(String),

    #[fail(display = "file handle is closed")]
    Closed,

    #[fail(display = "task finished without a result")]
    Canceled,
}

impl From<io::Error> for FcacheError {
    fn from(err: io::Error) -> FcacheError {
        FcacheError::Io(err)
    }
}

// The file handle exposes the std Read/Write/Seek traits, which speak
// io::Error, so the crate error has to map back.
impl From<FcacheError> for io::Error {
    fn from(err: FcacheError) -> io::Error {
        match err {
            FcacheError::Io(err) => err,
            FcacheError::Unregistered(path) => io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not registered: {}", path),
            ),
            FcacheError::Closed => {
                io::Error::new(io::ErrorKind::NotFound, "file handle is closed")
            }
            FcacheError::Canceled => {
                io::Error::new(io::ErrorKind::Other, "task finished without a result")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, FcacheError>;
