//! Decoding and encoding of the TIFF container structure
//!
//! TIFF (Tagged Image File Format) stores one or more images as a linked
//! list of image file directories (IFDs), each a table of typed tags. This
//! crate reads and writes that container: the header, the IFD chain, the
//! per-type tag value codec, BigTIFF, and an appending writer that adds
//! pages to an existing file. Pixel compression is left to external codecs;
//! the decoder hands them a list of [`decoder::Tile`] descriptors instead.
//!
//! # Related Links
//! * <https://web.archive.org/web/20210108073850/https://www.adobe.io/open/standards/TIFF.html> - The TIFF specification

mod bytes;
pub mod decoder;
mod directory;
pub mod encoder;
mod error;
mod rational;
pub mod tags;
mod value;

pub use self::bytes::ByteOrder;
pub use self::directory::Ifd;
pub use self::error::{TiffError, TiffFormatError, TiffResult, TiffUnsupportedError, UsageError};
pub use self::rational::Rational;
pub use self::value::TagValue;
