use std::error::Error;
use std::fmt;
use std::io;
use std::str;
use std::string;

use crate::tags::Tag;
use crate::value::TagValue;

/// Tiff error kinds.
#[derive(Debug)]
pub enum TiffError {
    /// The file is not formatted properly.
    FormatError(TiffFormatError),

    /// The file requires features that are not supported.
    UnsupportedError(TiffUnsupportedError),

    /// An I/O Error occurred while reading or writing the file.
    IoError(io::Error),

    /// An integer conversion to or from a platform size failed, either due to
    /// limits of the platform size or limits of the format.
    IntSizeError,

    /// The file does not support the requested operation.
    UsageError(UsageError),
}

/// The file is not formatted properly.
///
/// This indicates that the encoder producing the file might behave incorrectly or that the input
/// file has been corrupted.
///
/// The list of variants may grow to incorporate errors of future features. Matching against this
/// exhaustively is not covered by interface stability guarantees.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TiffFormatError {
    TiffSignatureNotFound,
    TiffSignatureInvalid,
    ImageFileDirectoryNotFound,
    PageHeaderMismatch,
    InvalidTag,
    InvalidTagValueType(Tag),
    RequiredTagNotFound(Tag),
    MissingDimensions,
    InvalidTileDimensions,
    UnknownPixelMode,
    UnknownDataOrganization,
    InvalidSamplesPerPixel(u64),
    ByteExpected(TagValue),
    UnsignedIntegerExpected(TagValue),
    SignedIntegerExpected(TagValue),
    AsciiExpected(TagValue),
    RationalExpected(TagValue),
    FloatExpected(TagValue),
    Format(String),
}

impl fmt::Display for TiffFormatError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::TiffFormatError::*;
        match *self {
            TiffSignatureNotFound => write!(fmt, "TIFF signature not found."),
            TiffSignatureInvalid => write!(fmt, "TIFF signature invalid."),
            ImageFileDirectoryNotFound => write!(fmt, "Image file directory not found."),
            PageHeaderMismatch => write!(
                fmt,
                "Header of appended page does not match the header of the first page."
            ),
            InvalidTag => write!(fmt, "File contains invalid tag."),
            InvalidTagValueType(ref tag) => {
                write!(fmt, "Tag `{:?}` did not have the expected value type.", tag)
            }
            RequiredTagNotFound(ref tag) => write!(fmt, "Required tag `{:?}` not found.", tag),
            MissingDimensions => write!(fmt, "Image width and length tags are missing."),
            InvalidTileDimensions => write!(fmt, "Invalid tile dimensions."),
            UnknownPixelMode => write!(fmt, "Unknown pixel mode."),
            UnknownDataOrganization => write!(fmt, "Unknown data organization."),
            InvalidSamplesPerPixel(samples) => {
                write!(fmt, "Invalid value for samples per pixel: {}.", samples)
            }
            ByteExpected(ref val) => write!(fmt, "Expected byte, {:?} found.", val),
            UnsignedIntegerExpected(ref val) => {
                write!(fmt, "Expected unsigned integer, {:?} found.", val)
            }
            SignedIntegerExpected(ref val) => {
                write!(fmt, "Expected signed integer, {:?} found.", val)
            }
            AsciiExpected(ref val) => write!(fmt, "Expected ascii string, {:?} found.", val),
            RationalExpected(ref val) => write!(fmt, "Expected rational, {:?} found.", val),
            FloatExpected(ref val) => write!(fmt, "Expected float, {:?} found.", val),
            Format(ref val) => write!(fmt, "Invalid format: {:?}.", val),
        }
    }
}

/// The file requires features that are not supported.
///
/// This only captures known failures for which the standard either does not require support or an
/// implementation has been planned but not yet completed.
///
/// The list of variants may grow. Matching against this exhaustively is not covered by interface
/// stability guarantees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TiffUnsupportedError {
    UnknownCompressionMethod(u16),
    WindowsMediaPhoto,
    MultiValueOffsetPromotion,
}

impl fmt::Display for TiffUnsupportedError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::TiffUnsupportedError::*;
        match *self {
            UnknownCompressionMethod(code) => {
                write!(fmt, "Compression method {} is unknown", code)
            }
            WindowsMediaPhoto => write!(fmt, "Windows Media Photo files are not supported"),
            MultiValueOffsetPromotion => write!(
                fmt,
                "Widening a multi-valued offset field while relocating a page is not implemented"
            ),
        }
    }
}

/// User attempted to use the library in a way that is incompatible with a specific file.
#[derive(Debug)]
pub enum UsageError {
    InvalidImageMode(String),
    InvalidQuality(i64),
    QualityWithoutJpeg,
    SeekOutOfRange(u64),
}

impl fmt::Display for UsageError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        use self::UsageError::*;
        match *self {
            InvalidImageMode(ref mode) => {
                write!(fmt, "Cannot write mode {} as TIFF.", mode)
            }
            InvalidQuality(quality) => write!(fmt, "Invalid quality setting ({}).", quality),
            QualityWithoutJpeg => {
                write!(fmt, "Quality setting is only supported for 'jpeg' compression.")
            }
            SeekOutOfRange(offset) => {
                write!(fmt, "Unable to seek to directory at offset {}.", offset)
            }
        }
    }
}

impl fmt::Display for TiffError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        match *self {
            TiffError::FormatError(ref e) => write!(fmt, "Format error: {}", e),
            TiffError::UnsupportedError(ref f) => write!(
                fmt,
                "The file is not supported: `{}`",
                f
            ),
            TiffError::IoError(ref e) => e.fmt(fmt),
            TiffError::IntSizeError => write!(fmt, "Platform or format size limits exceeded"),
            TiffError::UsageError(ref e) => write!(fmt, "Usage error: {}", e),
        }
    }
}

impl Error for TiffError {
    fn description(&self) -> &str {
        match *self {
            TiffError::FormatError(..) => "Format error",
            TiffError::UnsupportedError(..) => "Unsupported error",
            TiffError::IoError(..) => "IO error",
            TiffError::IntSizeError => "Platform or format size limits exceeded",
            TiffError::UsageError(..) => "Invalid usage",
        }
    }

    fn cause(&self) -> Option<&dyn Error> {
        match *self {
            TiffError::IoError(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TiffError {
    fn from(err: io::Error) -> TiffError {
        TiffError::IoError(err)
    }
}

impl From<str::Utf8Error> for TiffError {
    fn from(_err: str::Utf8Error) -> TiffError {
        TiffError::FormatError(TiffFormatError::InvalidTag)
    }
}

impl From<string::FromUtf8Error> for TiffError {
    fn from(_err: string::FromUtf8Error) -> TiffError {
        TiffError::FormatError(TiffFormatError::InvalidTag)
    }
}

impl From<TiffFormatError> for TiffError {
    fn from(err: TiffFormatError) -> TiffError {
        TiffError::FormatError(err)
    }
}

impl From<TiffUnsupportedError> for TiffError {
    fn from(err: TiffUnsupportedError) -> TiffError {
        TiffError::UnsupportedError(err)
    }
}

impl From<UsageError> for TiffError {
    fn from(err: UsageError) -> TiffError {
        TiffError::UsageError(err)
    }
}

impl From<std::num::TryFromIntError> for TiffError {
    fn from(_err: std::num::TryFromIntError) -> TiffError {
        TiffError::IntSizeError
    }
}

/// Result of a decoding/encoding process
pub type TiffResult<T> = Result<T, TiffError>;
