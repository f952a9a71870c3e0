//! Building directories for writing.

mod appender;

pub use self::appender::AppendingTiffWriter;

use log::debug;

use crate::bytes::ByteOrder;
use crate::directory::Ifd;
use crate::error::{TiffError, TiffResult, UsageError};
use crate::tags::{self, Tag, Type};
use crate::value::TagValue;

/// Target bytes per strip unless the caller asks otherwise.
pub const STRIP_SIZE: usize = 65536;

use crate::bytes::ByteOrder::BigEndian as MM;
use crate::bytes::ByteOrder::LittleEndian as II;

// mode => rawmode, byteorder, photometric, sample format, bits per sample,
// extra samples
type SaveRow = (
    &'static str,
    &'static str,
    ByteOrder,
    u16,
    u16,
    &'static [u16],
    Option<u16>,
);

#[rustfmt::skip]
const SAVE_INFO: &[SaveRow] = &[
    ("1",     "1",     II, 1, 1, &[1],            None),
    ("L",     "L",     II, 1, 1, &[8],            None),
    ("LA",    "LA",    II, 1, 1, &[8, 8],         Some(2)),
    ("P",     "P",     II, 3, 1, &[8],            None),
    ("PA",    "PA",    II, 3, 1, &[8, 8],         Some(2)),
    ("I",     "I;32S", II, 1, 2, &[32],           None),
    ("I;16",  "I;16",  II, 1, 1, &[16],           None),
    ("I;16L", "I;16L", II, 1, 1, &[16],           None),
    ("F",     "F;32F", II, 1, 3, &[32],           None),
    ("RGB",   "RGB",   II, 2, 1, &[8, 8, 8],      None),
    ("RGBX",  "RGBX",  II, 2, 1, &[8, 8, 8, 8],   Some(0)),
    ("RGBA",  "RGBA",  II, 2, 1, &[8, 8, 8, 8],   Some(2)),
    ("CMYK",  "CMYK",  II, 5, 1, &[8, 8, 8, 8],   None),
    ("YCbCr", "YCbCr", II, 6, 1, &[8, 8, 8],      None),
    ("LAB",   "LAB",   II, 8, 1, &[8, 8, 8],      None),
    ("I;16B", "I;16B", MM, 1, 1, &[16],           None),
];

/// Options recognized when preparing a page for writing.
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Codec name (`raw`, `tiff_lzw`, `jpeg`, ...). `tiff_jpeg` is upgraded
    /// to `jpeg` and `tiff_deflate` to `tiff_adobe_deflate`; unknown names
    /// fall back to `raw`.
    pub compression: Option<String>,
    /// Select the BigTIFF container.
    pub big_tiff: bool,
    /// JPEG quality, 0..=100. Only valid together with `jpeg` compression.
    pub quality: Option<i64>,
    /// Target bytes per strip, [`STRIP_SIZE`] when unset.
    pub strip_size: Option<usize>,
    /// Route the page through the external whole-image codec even for
    /// uncompressed data.
    pub force_libtiff: bool,
    /// Sets `ResolutionUnit` to inches and both resolution tags.
    pub dpi: Option<(f64, f64)>,
    /// A pre-filled directory merged into the page. `ExifIFD` (34665) and
    /// `SampleFormat` (339) are dropped from the supplied tags.
    pub tiffinfo: Option<Ifd>,
    /// A serialized EXIF segment merged like `tiffinfo`. An `Exif\0\0`
    /// marker prefix is tolerated; `tiffinfo` wins when both are given.
    pub exif: Option<Vec<u8>>,
    pub icc_profile: Option<Vec<u8>>,
    /// An `RGB;L`-layout lookup table (all R, then G, then B) for the P and
    /// PA modes.
    pub palette: Option<Vec<u8>>,
    pub description: Option<String>,
    pub resolution: Option<f64>,
    pub x_resolution: Option<f64>,
    pub y_resolution: Option<f64>,
    pub resolution_unit: Option<u16>,
    pub software: Option<String>,
    pub date_time: Option<String>,
    pub artist: Option<String>,
    pub copyright: Option<String>,
}

/// A directory ready to be saved, along with what the pixel codec needs to
/// pack the raster data that follows it.
#[derive(Debug)]
pub struct PreparedPage {
    pub ifd: Ifd,
    pub mode: &'static str,
    pub raw_mode: &'static str,
    pub compression: &'static str,
    /// Bytes per row of raster data.
    pub stride: u32,
    /// Whether the page goes through the external whole-image codec.
    pub libtiff: bool,
}

/// Tags never passed through to the external codec as attributes: offsets
/// and counts are recomputed from the data, the rest expect fixed-length
/// arrays the codec would reject.
const CODEC_ATTRIBUTE_BLOCKLIST: [u16; 6] = [
    255, // OSubFileType
    273, // StripOffsets
    279, // StripByteCounts
    301, // TransferFunction
    330, // SubIfd
    532, // ReferenceBlackWhite
];

/// Parse a serialized EXIF segment (a little TIFF container of its own)
/// into a directory.
fn parse_exif(blob: &[u8]) -> TiffResult<Ifd> {
    use crate::error::TiffFormatError;
    use std::io::{Cursor, Seek, SeekFrom};

    let blob = blob.strip_prefix(b"Exif\x00\x00").unwrap_or(blob);
    if !tags::accept_header(blob) {
        return Err(TiffError::FormatError(
            TiffFormatError::TiffSignatureNotFound,
        ));
    }
    let byte_order = ByteOrder::from_prefix(blob).ok_or(TiffError::FormatError(
        TiffFormatError::TiffSignatureNotFound,
    ))?;
    let bigtiff = blob[2..4].contains(&0x2b);
    let first_offset = if bigtiff {
        if blob.len() < 16 {
            return Err(TiffError::FormatError(
                TiffFormatError::TiffSignatureNotFound,
            ));
        }
        byte_order.u64(blob[8..16].try_into().unwrap())
    } else {
        if blob.len() < 8 {
            return Err(TiffError::FormatError(
                TiffFormatError::TiffSignatureNotFound,
            ));
        }
        u64::from(byte_order.u32(blob[4..8].try_into().unwrap()))
    };

    let mut cursor = Cursor::new(blob);
    cursor.seek(SeekFrom::Start(first_offset))?;
    let mut ifd = Ifd::new(byte_order, bigtiff);
    ifd.load(&mut cursor)?;
    Ok(ifd)
}

/// The attribute list handed to the external codec on the whole-image path.
pub fn codec_attributes(ifd: &mut Ifd) -> TiffResult<Vec<(u16, TagValue)>> {
    let mut attributes = Vec::new();
    for (tag, value) in ifd.iter()? {
        if CODEC_ATTRIBUTE_BLOCKLIST.contains(&tag) {
            continue;
        }
        attributes.push((tag, value.clone()));
    }
    Ok(attributes)
}

/// Translate a pixel mode, an image size and the caller's options into a
/// directory ready for [`Ifd::save`]. `StripOffsets` holds zero-based
/// placeholders which the serializer relocates past the directory.
pub fn prepare_page(
    mode: &str,
    size: (u32, u32),
    options: &EncodeOptions,
) -> TiffResult<PreparedPage> {
    let &(mode, raw_mode, byte_order, photometric, sample_format, bits, extra) = SAVE_INFO
        .iter()
        .find(|row| row.0 == mode)
        .ok_or_else(|| TiffError::UsageError(UsageError::InvalidImageMode(mode.to_string())))?;

    let requested = options.compression.as_deref().unwrap_or("raw");
    // OJPEG is obsolete, use new-style JPEG compression instead
    let requested = match requested {
        "tiff_jpeg" => "jpeg",
        "tiff_deflate" => "tiff_adobe_deflate",
        other => other,
    };
    let compression_code = tags::compression_code(requested).unwrap_or(1);
    let compression = tags::compression_name(compression_code).unwrap_or("raw");

    let libtiff = options.force_libtiff || compression != "raw";

    if let Some(quality) = options.quality {
        if !(0..=100).contains(&quality) {
            return Err(TiffError::UsageError(UsageError::InvalidQuality(quality)));
        }
        if compression != "jpeg" {
            return Err(TiffError::UsageError(UsageError::QualityWithoutJpeg));
        }
    }

    let (width, height) = size;
    let mut ifd = Ifd::new(byte_order, options.big_tiff);

    // required for color images on the whole-image codec path
    ifd.set(Tag::PlanarConfiguration.to_u16(), 1u16)?;
    ifd.set(Tag::ImageWidth.to_u16(), width)?;
    ifd.set(Tag::ImageLength.to_u16(), height)?;

    // arbitrary tags passed in as a pre-filled directory or an EXIF segment
    let supplied_info = match (&options.tiffinfo, &options.exif) {
        (Some(info), _) => Some(info.clone()),
        (None, Some(blob)) => Some(parse_exif(blob)?),
        (None, None) => None,
    };
    if let Some(info) = supplied_info {
        let mut info = info;
        debug!("tiffinfo tags: {:?}", info.tags().collect::<Vec<_>>());
        let supplied: Vec<u16> = info.tags().collect();
        for tag in supplied {
            if tag == 34665 || tag == Tag::SampleFormat.to_u16() {
                // the IFD offset would be wrong in the saved image; the
                // sample format is determined by the mode
                continue;
            }
            let kind = info.kind(tag);
            if let (Some(kind), Some(value)) = (kind, info.get(tag)?) {
                ifd.set_typed(tag, kind, value.clone())?;
            }
        }
    }

    if let Some(icc) = &options.icc_profile {
        ifd.set(Tag::IccProfile.to_u16(), icc.clone())?;
    }

    if let Some(description) = &options.description {
        ifd.set(Tag::ImageDescription.to_u16(), description.as_str())?;
    }
    if let Some(resolution) = options.resolution {
        ifd.set(Tag::XResolution.to_u16(), resolution)?;
        ifd.set(Tag::YResolution.to_u16(), resolution)?;
    }
    if let Some(resolution) = options.x_resolution {
        ifd.set(Tag::XResolution.to_u16(), resolution)?;
    }
    if let Some(resolution) = options.y_resolution {
        ifd.set(Tag::YResolution.to_u16(), resolution)?;
    }
    if let Some(unit) = options.resolution_unit {
        ifd.set(Tag::ResolutionUnit.to_u16(), unit)?;
    }
    if let Some(software) = &options.software {
        ifd.set(Tag::Software.to_u16(), software.as_str())?;
    }
    if let Some(date_time) = &options.date_time {
        ifd.set(Tag::DateTime.to_u16(), date_time.as_str())?;
    }
    if let Some(artist) = &options.artist {
        ifd.set(Tag::Artist.to_u16(), artist.as_str())?;
    }
    if let Some(copyright) = &options.copyright {
        ifd.set(Tag::Copyright.to_u16(), copyright.as_str())?;
    }

    if let Some((x, y)) = options.dpi {
        ifd.set(Tag::ResolutionUnit.to_u16(), 2u16)?;
        ifd.set(Tag::XResolution.to_u16(), x)?;
        ifd.set(Tag::YResolution.to_u16(), y)?;
    }

    if bits != [1] {
        ifd.set(Tag::BitsPerSample.to_u16(), bits.to_vec())?;
        if bits.len() != 1 {
            ifd.set(Tag::SamplesPerPixel.to_u16(), bits.len() as u64)?;
        }
    }
    if let Some(extra) = extra {
        ifd.set(Tag::ExtraSamples.to_u16(), extra)?;
    }
    if sample_format != 1 {
        ifd.set(Tag::SampleFormat.to_u16(), sample_format)?;
    }
    if !ifd.contains(Tag::PhotometricInterpretation.to_u16()) {
        ifd.set(Tag::PhotometricInterpretation.to_u16(), photometric)?;
    }

    if mode == "P" || mode == "PA" {
        if let Some(lut) = &options.palette {
            let colors = (lut.len() / 3).min(256);
            let mut colormap: Vec<u16> = Vec::with_capacity(3 * 256);
            for channel in 0..3 {
                colormap.extend(
                    lut[colors * channel..colors * (channel + 1)]
                        .iter()
                        .map(|&v| u16::from(v) * 256),
                );
                colormap.extend(std::iter::repeat(0).take(256 - colors));
            }
            ifd.set(Tag::ColorMap.to_u16(), colormap)?;
        }
    }

    // data orientation
    let stride = bits.len() as u32 * ((width * u32::from(bits[0]) + 7) / 8);
    if !ifd.contains(Tag::RowsPerStrip.to_u16()) {
        // aim for the configured strip size when the codec writes the data
        let rows_per_strip = if libtiff {
            let strip_size = options.strip_size.unwrap_or(STRIP_SIZE) as u32;
            let mut rows = if stride == 0 {
                1
            } else {
                (strip_size / stride).min(height)
            };
            // the JPEG encoder expects a multiple of 8 rows
            if compression == "jpeg" {
                rows = (rows.div_ceil(8) * 8).min(height);
            }
            rows
        } else {
            height
        };
        ifd.set(Tag::RowsPerStrip.to_u16(), rows_per_strip.max(1))?;
    }
    let rows_per_strip = ifd
        .get_u32(Tag::RowsPerStrip.to_u16())?
        .unwrap_or(1)
        .max(1);

    let strip_byte_counts = if stride == 0 {
        1u64
    } else {
        u64::from(stride) * u64::from(rows_per_strip)
    };
    let strips_per_image = u64::from(height.div_ceil(rows_per_strip)).max(1);
    let mut counts = vec![strip_byte_counts; strips_per_image as usize - 1];
    counts.push(
        (u64::from(stride) * u64::from(height))
            .saturating_sub(strip_byte_counts * (strips_per_image - 1)),
    );
    if strip_byte_counts >= 1 << 16 {
        // a single strip is larger than a SHORT can say
        ifd.set_typed(Tag::StripByteCounts.to_u16(), Type::LONG, counts)?;
    } else {
        ifd.set(Tag::StripByteCounts.to_u16(), counts)?;
    }
    let offsets: Vec<u64> = (0..strips_per_image).map(|i| i * strip_byte_counts).collect();
    // this is adjusted by the IFD serializer
    ifd.set(Tag::StripOffsets.to_u16(), offsets)?;

    ifd.set(Tag::Compression.to_u16(), compression_code)?;

    if mode == "YCbCr" {
        if !ifd.contains(Tag::YCbCrSubSampling.to_u16()) {
            ifd.set(Tag::YCbCrSubSampling.to_u16(), vec![1u16, 1])?;
        }
        if !ifd.contains(Tag::ReferenceBlackWhite.to_u16()) {
            ifd.set(
                Tag::ReferenceBlackWhite.to_u16(),
                vec![0i64, 255, 128, 255, 128, 255],
            )?;
        }
    }

    if !libtiff {
        for tag in [
            Tag::TileWidth,
            Tag::TileLength,
            Tag::TileOffsets,
            Tag::TileByteCounts,
        ] {
            ifd.remove(tag.to_u16());
        }
    }

    // the codec returns bytes in native order for 16-bit data
    let raw_mode = if libtiff && matches!(mode, "I;16" | "I;16B" | "I;16L") {
        "I;16N"
    } else {
        raw_mode
    };

    Ok(PreparedPage {
        ifd,
        mode,
        raw_mode,
        compression,
        stride,
        libtiff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_page_has_the_mandatory_tags() {
        let mut page = prepare_page("L", (4, 4), &EncodeOptions::default()).unwrap();
        let ifd = &mut page.ifd;
        assert_eq!(ifd.get_u32(Tag::ImageWidth.to_u16()).unwrap(), Some(4));
        assert_eq!(ifd.get_u32(Tag::ImageLength.to_u16()).unwrap(), Some(4));
        assert_eq!(ifd.get_u16_vec(Tag::BitsPerSample.to_u16()).unwrap(), Some(vec![8]));
        assert_eq!(ifd.get_u16(Tag::Compression.to_u16()).unwrap(), Some(1));
        assert_eq!(ifd.get_u16(Tag::PhotometricInterpretation.to_u16()).unwrap(), Some(1));
        assert_eq!(ifd.get_u32(Tag::RowsPerStrip.to_u16()).unwrap(), Some(4));
        assert_eq!(
            ifd.get_u64_vec(Tag::StripByteCounts.to_u16()).unwrap(),
            Some(vec![16])
        );
        assert_eq!(page.stride, 4);
        assert!(!page.libtiff);
    }

    #[test]
    fn unknown_mode_is_a_usage_error() {
        assert!(matches!(
            prepare_page("CMYK;16N", (1, 1), &EncodeOptions::default()),
            Err(TiffError::UsageError(UsageError::InvalidImageMode(_)))
        ));
    }

    #[test]
    fn compression_aliases_are_upgraded() {
        let options = EncodeOptions {
            compression: Some("tiff_jpeg".into()),
            ..Default::default()
        };
        let page = prepare_page("RGB", (16, 16), &options).unwrap();
        assert_eq!(page.compression, "jpeg");
        assert!(page.libtiff);

        let options = EncodeOptions {
            compression: Some("tiff_deflate".into()),
            ..Default::default()
        };
        let page = prepare_page("RGB", (16, 16), &options).unwrap();
        assert_eq!(page.compression, "tiff_adobe_deflate");

        let options = EncodeOptions {
            compression: Some("martian".into()),
            ..Default::default()
        };
        let page = prepare_page("RGB", (16, 16), &options).unwrap();
        assert_eq!(page.compression, "raw");
        assert!(!page.libtiff);
    }

    #[test]
    fn quality_requires_jpeg() {
        let options = EncodeOptions {
            quality: Some(90),
            ..Default::default()
        };
        assert!(matches!(
            prepare_page("RGB", (8, 8), &options),
            Err(TiffError::UsageError(UsageError::QualityWithoutJpeg))
        ));

        let options = EncodeOptions {
            compression: Some("jpeg".into()),
            quality: Some(101),
            ..Default::default()
        };
        assert!(matches!(
            prepare_page("RGB", (8, 8), &options),
            Err(TiffError::UsageError(UsageError::InvalidQuality(101)))
        ));

        let options = EncodeOptions {
            compression: Some("jpeg".into()),
            quality: Some(90),
            ..Default::default()
        };
        assert!(prepare_page("RGB", (8, 8), &options).is_ok());
    }

    #[test]
    fn jpeg_strips_round_to_eight_rows() {
        let options = EncodeOptions {
            compression: Some("jpeg".into()),
            strip_size: Some(1 << 10),
            ..Default::default()
        };
        let mut page = prepare_page("RGB", (64, 64), &options).unwrap();
        let rows = page.ifd.get_u32(Tag::RowsPerStrip.to_u16()).unwrap().unwrap();
        assert_eq!(rows % 8, 0);
    }

    #[test]
    fn dpi_sets_inch_resolution() {
        let options = EncodeOptions {
            dpi: Some((300.0, 150.0)),
            ..Default::default()
        };
        let mut page = prepare_page("L", (4, 4), &options).unwrap();
        assert_eq!(
            page.ifd.get_u16(Tag::ResolutionUnit.to_u16()).unwrap(),
            Some(2)
        );
        assert_eq!(
            page.ifd
                .get_rational(Tag::XResolution.to_u16())
                .unwrap()
                .unwrap()
                .to_f64(),
            300.0
        );
    }

    #[test]
    fn tiffinfo_merge_drops_exif_pointer_and_sample_format() {
        let mut info = Ifd::new(II, false);
        info.set(34665, 1234u32).unwrap();
        info.set(Tag::SampleFormat.to_u16(), 2u16).unwrap();
        info.set(Tag::Artist.to_u16(), "someone").unwrap();
        let options = EncodeOptions {
            tiffinfo: Some(info),
            ..Default::default()
        };
        let mut page = prepare_page("L", (4, 4), &options).unwrap();
        assert!(!page.ifd.contains(34665));
        assert!(!page.ifd.contains(Tag::SampleFormat.to_u16()));
        assert_eq!(
            page.ifd.get_string(Tag::Artist.to_u16()).unwrap().unwrap(),
            "someone"
        );
    }

    #[test]
    fn exif_blob_merges_like_tiffinfo() {
        let mut info = Ifd::new(II, false);
        info.set(Tag::Artist.to_u16(), "painter").unwrap();
        let mut stream = std::io::Cursor::new(Vec::new());
        info.save(&mut stream).unwrap();
        let mut blob = b"Exif\x00\x00".to_vec();
        blob.extend_from_slice(stream.get_ref());

        let options = EncodeOptions {
            exif: Some(blob),
            ..Default::default()
        };
        let mut page = prepare_page("L", (1, 1), &options).unwrap();
        assert_eq!(
            page.ifd.get_string(Tag::Artist.to_u16()).unwrap().unwrap(),
            "painter"
        );
    }

    #[test]
    fn large_strips_widen_the_byte_counts() {
        let mut page = prepare_page("RGB", (256, 256), &EncodeOptions::default()).unwrap();
        // one big raw strip of 192 KiB
        assert_eq!(
            page.ifd.kind(Tag::StripByteCounts.to_u16()),
            Some(Type::LONG)
        );
        let counts = page
            .ifd
            .get_u64_vec(Tag::StripByteCounts.to_u16())
            .unwrap()
            .unwrap();
        assert_eq!(counts.iter().sum::<u64>(), 256 * 256 * 3);
    }

    #[test]
    fn codec_attribute_blocklist_is_applied() {
        let mut page = prepare_page("YCbCr", (8, 8), &EncodeOptions::default()).unwrap();
        let attributes = codec_attributes(&mut page.ifd).unwrap();
        let tags: Vec<u16> = attributes.iter().map(|(tag, _)| *tag).collect();
        assert!(!tags.contains(&Tag::StripOffsets.to_u16()));
        assert!(!tags.contains(&Tag::StripByteCounts.to_u16()));
        assert!(!tags.contains(&Tag::ReferenceBlackWhite.to_u16()));
        assert!(tags.contains(&Tag::ImageWidth.to_u16()));
    }
}
