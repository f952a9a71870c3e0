//! Tag identifiers, value types, and the static tag dictionary.

use std::collections::HashMap;

use lazy_static::lazy_static;

macro_rules! tags {
    {
        // Permit arbitrary meta items, which include documentation.
        $( #[$enum_attr:meta] )*
        $vis:vis enum $name:ident($ty:tt) $(unknown(#[$unknown_meta:meta] $unknown_doc:ident))* {
            // Each of the `Name = Val,` permitting documentation.
            $($(#[$ident_attr:meta])* $tag:ident = $val:expr,)*
        }
    } => {
        $( #[$enum_attr] )*
        #[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
        #[non_exhaustive]
        pub enum $name {
            $($(#[$ident_attr])* $tag,)*
            $(
                #[$unknown_meta]
                Unknown($ty),
            )*
        }

        impl $name {
            #[inline(always)]
            fn __from_inner_type(n: $ty) -> Result<Self, $ty> {
                match n {
                    $( $val => Ok($name::$tag), )*
                    n => Err(n),
                }
            }

            #[inline(always)]
            fn __to_inner_type(&self) -> $ty {
                match *self {
                    $( $name::$tag => $val, )*
                    $( $name::Unknown($unknown_doc) => { $unknown_doc }, )*
                }
            }
        }

        tags!($name, $ty, $($unknown_doc)*);
    };
    // For u16 tags, provide direct inherent primitive conversion methods.
    ($name:tt, u16, $($unknown_doc:ident)*) => {
        impl $name {
            #[inline(always)]
            pub fn from_u16(val: u16) -> Option<Self> {
                Self::__from_inner_type(val).ok()
            }

            $(
            #[inline(always)]
            pub fn from_u16_exhaustive($unknown_doc: u16) -> Self {
                Self::__from_inner_type($unknown_doc).unwrap_or_else(|_| $name::Unknown($unknown_doc))
            }
            )*

            #[inline(always)]
            pub fn to_u16(&self) -> u16 {
                Self::__to_inner_type(self)
            }
        }
    };
    // For other tag types, do nothing for now. With concat_idents one could
    // provide inherent conversion methods for all types.
    ($name:tt, $ty:tt, $($unknown_doc:literal)*) => {};
}

// Note: These tags appear in the order they are mentioned in the TIFF reference
tags! {
/// TIFF tags
pub enum Tag(u16) unknown(
    /// A private or extension tag
    unknown
) {
    // Baseline tags:
    OSubFileType = 255,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    FillOrder = 266,
    ImageDescription = 270,
    Make = 271,
    Model = 272,
    StripOffsets = 273,
    Orientation = 274,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    XResolution = 282,
    YResolution = 283,
    PlanarConfiguration = 284,
    FreeOffsets = 288,
    FreeByteCounts = 289,
    ResolutionUnit = 296,
    TransferFunction = 301,
    Software = 305,
    DateTime = 306,
    Artist = 315,
    Predictor = 317,
    ColorMap = 320,
    // Advanced tags
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,
    SubIfd = 330,
    ExtraSamples = 338,
    // Data Sample Format
    SampleFormat = 339,
    // JPEG
    JPEGTables = 347,
    JPEGQTables = 519,
    JPEGDCTables = 520,
    JPEGACTables = 521,
    YCbCrSubSampling = 530,
    ReferenceBlackWhite = 532,
    Xmp = 700,
    // <https://web.archive.org/web/20131111073619/http://www.exif.org/Exif2-1.PDF>
    // *Do note its typo in the Decimal id*
    Copyright = 33_432,
    IptcNaa = 33723,
    PhotoshopChunk = 34377,
    ExifDirectory = 0x8769,
    GpsDirectory = 0x8825,
    // <https://www.color.org/technotes/ICC-Technote-ProfileEmbedding.pdf>
    IccProfile = 34675,
    // <https://github.com/imagej/ImageJA/blob/master/src/main/java/ij/io/TiffDecoder.java>
    ImageJMetaDataByteCounts = 50838,
    ImageJMetaData = 50839,
}
}

/// The tag whose presence marks a Windows Media Photo file.
pub const WINDOWS_MEDIA_PHOTO: u16 = 0xBC01;

tags! {
/// The type of an IFD entry (a 2 byte field).
pub enum Type(u16) {
    /// 8-bit unsigned integer
    BYTE = 1,
    /// 8-bit byte that contains a 7-bit ASCII code; the last byte must be zero
    ASCII = 2,
    /// 16-bit unsigned integer
    SHORT = 3,
    /// 32-bit unsigned integer
    LONG = 4,
    /// Fraction stored as two 32-bit unsigned integers
    RATIONAL = 5,
    /// 8-bit signed integer
    SBYTE = 6,
    /// 8-bit byte that may contain anything, depending on the field
    UNDEFINED = 7,
    /// 16-bit signed integer
    SSHORT = 8,
    /// 32-bit signed integer
    SLONG = 9,
    /// Fraction stored as two 32-bit signed integers
    SRATIONAL = 10,
    /// 32-bit IEEE floating point
    FLOAT = 11,
    /// 64-bit IEEE floating point
    DOUBLE = 12,
    /// 32-bit unsigned integer (offset)
    IFD = 13,
    /// BigTIFF 64-bit unsigned integer
    LONG8 = 16,
}
}

impl Type {
    /// Size in bytes of a single value of this type.
    pub fn size(self) -> usize {
        match self {
            Type::BYTE | Type::ASCII | Type::SBYTE | Type::UNDEFINED => 1,
            Type::SHORT | Type::SSHORT => 2,
            Type::LONG | Type::SLONG | Type::FLOAT | Type::IFD => 4,
            Type::RATIONAL | Type::SRATIONAL | Type::DOUBLE | Type::LONG8 => 8,
        }
    }
}

/// The accepted four-byte file prefixes. Two combinations with the magic in
/// the wrong byte order are seen in the wild and tolerated, the byte order is
/// then taken from the first two bytes alone.
pub(crate) const PREFIXES: [[u8; 4]; 6] = [
    *b"MM\x00\x2a", // Valid TIFF header with big-endian byte order
    *b"II\x2a\x00", // Valid TIFF header with little-endian byte order
    *b"MM\x2a\x00", // Invalid TIFF header, assume big-endian
    *b"II\x00\x2a", // Invalid TIFF header, assume little-endian
    *b"MM\x00\x2b", // BigTIFF with big-endian byte order
    *b"II\x2b\x00", // BigTIFF with little-endian byte order
];

pub(crate) fn accept_header(prefix: &[u8]) -> bool {
    prefix.len() >= 4 && PREFIXES.iter().any(|p| p == &prefix[..4])
}

/// Compression tag value to codec name.
pub(crate) const COMPRESSIONS: &[(u16, &str)] = &[
    (1, "raw"),
    (2, "tiff_ccitt"),
    (3, "group3"),
    (4, "group4"),
    (5, "tiff_lzw"),
    (6, "tiff_jpeg"), // obsolete
    (7, "jpeg"),
    (8, "tiff_adobe_deflate"),
    (32771, "tiff_raw_16"), // 16-bit padding
    (32773, "packbits"),
    (32809, "tiff_thunderscan"),
    (32946, "tiff_deflate"),
    (34676, "tiff_sgilog"),
    (34677, "tiff_sgilog24"),
    (34925, "lzma"),
    (50000, "zstd"),
    (50001, "webp"),
];

pub fn compression_name(code: u16) -> Option<&'static str> {
    COMPRESSIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

pub fn compression_code(name: &str) -> Option<u16> {
    COMPRESSIONS
        .iter()
        .find(|(_, n)| *n == name)
        .map(|(code, _)| *code)
}

/// Dictionary information about a known tag: its canonical name, the type it
/// is stored as when one is not given, and the expected value count
/// (`None` when variable).
pub struct TagInfo {
    pub name: &'static str,
    pub kind: Option<Type>,
    pub count: Option<usize>,
}

macro_rules! tag_info {
    ($($id:expr => ($name:expr, $kind:expr, $count:expr),)*) => {
        &[ $( ($id, TagInfo { name: $name, kind: $kind, count: $count }), )* ]
    };
}

const TAG_INFO: &[(u16, TagInfo)] = tag_info! {
    254 => ("NewSubfileType", Some(Type::LONG), Some(1)),
    255 => ("SubfileType", Some(Type::SHORT), Some(1)),
    256 => ("ImageWidth", Some(Type::LONG), Some(1)),
    257 => ("ImageLength", Some(Type::LONG), Some(1)),
    258 => ("BitsPerSample", Some(Type::SHORT), None),
    259 => ("Compression", Some(Type::SHORT), Some(1)),
    262 => ("PhotometricInterpretation", Some(Type::SHORT), Some(1)),
    266 => ("FillOrder", Some(Type::SHORT), Some(1)),
    269 => ("DocumentName", Some(Type::ASCII), Some(1)),
    270 => ("ImageDescription", Some(Type::ASCII), Some(1)),
    271 => ("Make", Some(Type::ASCII), Some(1)),
    272 => ("Model", Some(Type::ASCII), Some(1)),
    273 => ("StripOffsets", Some(Type::LONG), None),
    274 => ("Orientation", Some(Type::SHORT), Some(1)),
    277 => ("SamplesPerPixel", Some(Type::SHORT), Some(1)),
    278 => ("RowsPerStrip", Some(Type::LONG), Some(1)),
    279 => ("StripByteCounts", Some(Type::SHORT), None),
    282 => ("XResolution", Some(Type::RATIONAL), Some(1)),
    283 => ("YResolution", Some(Type::RATIONAL), Some(1)),
    284 => ("PlanarConfiguration", Some(Type::SHORT), Some(1)),
    288 => ("FreeOffsets", Some(Type::LONG), None),
    289 => ("FreeByteCounts", Some(Type::LONG), None),
    290 => ("GrayResponseUnit", Some(Type::SHORT), Some(1)),
    291 => ("GrayResponseCurve", Some(Type::SHORT), None),
    296 => ("ResolutionUnit", Some(Type::SHORT), Some(1)),
    301 => ("TransferFunction", Some(Type::SHORT), None),
    305 => ("Software", Some(Type::ASCII), Some(1)),
    306 => ("DateTime", Some(Type::ASCII), Some(1)),
    315 => ("Artist", Some(Type::ASCII), Some(1)),
    317 => ("Predictor", Some(Type::SHORT), Some(1)),
    320 => ("ColorMap", Some(Type::SHORT), None),
    322 => ("TileWidth", Some(Type::LONG), Some(1)),
    323 => ("TileLength", Some(Type::LONG), Some(1)),
    324 => ("TileOffsets", Some(Type::LONG), None),
    325 => ("TileByteCounts", Some(Type::LONG), None),
    330 => ("SubIfd", Some(Type::LONG), None),
    338 => ("ExtraSamples", Some(Type::SHORT), None),
    339 => ("SampleFormat", Some(Type::SHORT), None),
    347 => ("JPEGTables", Some(Type::UNDEFINED), Some(1)),
    519 => ("JPEGQTables", Some(Type::LONG), None),
    520 => ("JPEGDCTables", Some(Type::LONG), None),
    521 => ("JPEGACTables", Some(Type::LONG), None),
    530 => ("YCbCrSubSampling", Some(Type::SHORT), Some(2)),
    532 => ("ReferenceBlackWhite", Some(Type::RATIONAL), None),
    700 => ("XMP", Some(Type::BYTE), Some(1)),
    33432 => ("Copyright", Some(Type::ASCII), Some(1)),
    33723 => ("IptcNaaInfo", Some(Type::UNDEFINED), Some(1)),
    34377 => ("PhotoshopInfo", Some(Type::BYTE), Some(1)),
    34665 => ("ExifIFD", Some(Type::LONG), Some(1)),
    34675 => ("ICCProfile", Some(Type::UNDEFINED), Some(1)),
    34853 => ("GPSInfoIFD", Some(Type::LONG), Some(1)),
    // ImageJ sidecar metadata, stored and returned as raw bytes.
    50838 => ("ImageJMetaDataByteCounts", Some(Type::LONG), None),
    50839 => ("ImageJMetaData", Some(Type::UNDEFINED), Some(1)),
};

lazy_static! {
    static ref TAG_DICTIONARY: HashMap<u16, &'static TagInfo> =
        TAG_INFO.iter().map(|(id, info)| (*id, info)).collect();
}

/// Look up dictionary information for a tag id.
pub fn tag_info(tag: u16) -> Option<&'static TagInfo> {
    TAG_DICTIONARY.get(&tag).copied()
}

/// The name of a tag, or `None` for private/unknown tags.
pub fn tag_name(tag: u16) -> Option<&'static str> {
    tag_info(tag).map(|info| info.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_sizes_match_the_format() {
        assert_eq!(Type::BYTE.size(), 1);
        assert_eq!(Type::SHORT.size(), 2);
        assert_eq!(Type::LONG.size(), 4);
        assert_eq!(Type::RATIONAL.size(), 8);
        assert_eq!(Type::IFD.size(), 4);
        assert_eq!(Type::LONG8.size(), 8);
    }

    #[test]
    fn unknown_types_are_not_recognized() {
        assert_eq!(Type::from_u16(14), None);
        assert_eq!(Type::from_u16(17), None);
        assert_eq!(Type::from_u16(0), None);
        assert_eq!(Type::from_u16(16), Some(Type::LONG8));
    }

    #[test]
    fn header_prefix_tolerance() {
        assert!(accept_header(b"II\x2a\x00\x08\x00\x00\x00"));
        assert!(accept_header(b"MM\x2a\x00")); // invalid magic, tolerated
        assert!(accept_header(b"II\x2b\x00"));
        assert!(!accept_header(b"PK\x03\x04"));
    }

    #[test]
    fn compression_tables_are_symmetric() {
        assert_eq!(compression_name(1), Some("raw"));
        assert_eq!(compression_name(5), Some("tiff_lzw"));
        assert_eq!(compression_code("webp"), Some(50001));
        assert_eq!(compression_code("no_such"), None);
    }
}
