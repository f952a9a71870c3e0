//! Translation of a frame's tags into a canonical pixel mode and a tile
//! plan for the external codecs.

use std::collections::HashMap;

use lazy_static::lazy_static;
use log::{debug, error};

use crate::bytes::ByteOrder;
use crate::directory::Ifd;
use crate::error::{TiffError, TiffFormatError, TiffResult, TiffUnsupportedError};
use crate::rational::Rational;
use crate::tags::{self, Tag, WINDOWS_MEDIA_PHOTO};

/// Arguments handed to the codec together with a [`Tile`].
#[derive(Debug, Clone, PartialEq)]
pub enum TileArgs {
    /// The raw path: layout string, line stride (zero meaning the natural
    /// width) and orientation.
    Raw {
        raw_mode: String,
        stride: u32,
        orientation: u16,
    },
    /// The whole-image path for compressed data: the codec re-reads the
    /// directory at `base_offset` itself.
    Libtiff {
        raw_mode: String,
        compression: &'static str,
        base_offset: u64,
    },
}

/// One contiguous chunk of encoded pixel data.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// Codec name, e.g. `raw` or `libtiff`.
    pub codec: &'static str,
    /// Pixel bounding box `(x0, y0, x1, y1)`.
    pub bounds: (u32, u32, u32, u32),
    /// Absolute file offset of the chunk.
    pub offset: u64,
    pub args: TileArgs,
}

/// Everything the host needs to know about one frame.
#[derive(Debug, Clone)]
pub struct ImageSetup {
    pub mode: &'static str,
    pub raw_mode: String,
    /// Logical size; width and height swap for transposing orientations.
    pub size: (u32, u32),
    /// Physical pixel-order size as stored.
    pub tile_size: (u32, u32),
    pub compression: &'static str,
    pub tiles: Vec<Tile>,
    pub dpi: Option<(f64, f64)>,
    pub resolution: Option<(f64, f64)>,
    /// 8-bit RGB palette entries (all R, then G, then B) for P/PA modes.
    pub palette: Option<Vec<u8>>,
    pub icc_profile: Option<Vec<u8>>,
}

#[derive(PartialEq, Eq, Hash)]
struct ModeKey {
    order: ByteOrder,
    photometric: u16,
    sample_format: Vec<u16>,
    fill_order: u16,
    bits: Vec<u16>,
    extra: Vec<u16>,
}

type ModeRow = (
    ByteOrder,
    u16,
    &'static [u16],
    u16,
    &'static [u16],
    &'static [u16],
    &'static str,
    &'static str,
);

use crate::bytes::ByteOrder::BigEndian as MM;
use crate::bytes::ByteOrder::LittleEndian as II;

// (ByteOrder, PhotoInterpretation, SampleFormat, FillOrder, BitsPerSample,
//  ExtraSamples) => mode, rawmode
#[rustfmt::skip]
const MODE_ROWS: &[ModeRow] = &[
    (II, 0, &[1], 1, &[1], &[], "1", "1;I"),
    (MM, 0, &[1], 1, &[1], &[], "1", "1;I"),
    (II, 0, &[1], 2, &[1], &[], "1", "1;IR"),
    (MM, 0, &[1], 2, &[1], &[], "1", "1;IR"),
    (II, 1, &[1], 1, &[1], &[], "1", "1"),
    (MM, 1, &[1], 1, &[1], &[], "1", "1"),
    (II, 1, &[1], 2, &[1], &[], "1", "1;R"),
    (MM, 1, &[1], 2, &[1], &[], "1", "1;R"),
    (II, 0, &[1], 1, &[2], &[], "L", "L;2I"),
    (MM, 0, &[1], 1, &[2], &[], "L", "L;2I"),
    (II, 0, &[1], 2, &[2], &[], "L", "L;2IR"),
    (MM, 0, &[1], 2, &[2], &[], "L", "L;2IR"),
    (II, 1, &[1], 1, &[2], &[], "L", "L;2"),
    (MM, 1, &[1], 1, &[2], &[], "L", "L;2"),
    (II, 1, &[1], 2, &[2], &[], "L", "L;2R"),
    (MM, 1, &[1], 2, &[2], &[], "L", "L;2R"),
    (II, 0, &[1], 1, &[4], &[], "L", "L;4I"),
    (MM, 0, &[1], 1, &[4], &[], "L", "L;4I"),
    (II, 0, &[1], 2, &[4], &[], "L", "L;4IR"),
    (MM, 0, &[1], 2, &[4], &[], "L", "L;4IR"),
    (II, 1, &[1], 1, &[4], &[], "L", "L;4"),
    (MM, 1, &[1], 1, &[4], &[], "L", "L;4"),
    (II, 1, &[1], 2, &[4], &[], "L", "L;4R"),
    (MM, 1, &[1], 2, &[4], &[], "L", "L;4R"),
    (II, 0, &[1], 1, &[8], &[], "L", "L;I"),
    (MM, 0, &[1], 1, &[8], &[], "L", "L;I"),
    (II, 0, &[1], 2, &[8], &[], "L", "L;IR"),
    (MM, 0, &[1], 2, &[8], &[], "L", "L;IR"),
    (II, 1, &[1], 1, &[8], &[], "L", "L"),
    (MM, 1, &[1], 1, &[8], &[], "L", "L"),
    (II, 1, &[2], 1, &[8], &[], "L", "L"),
    (MM, 1, &[2], 1, &[8], &[], "L", "L"),
    (II, 1, &[1], 2, &[8], &[], "L", "L;R"),
    (MM, 1, &[1], 2, &[8], &[], "L", "L;R"),
    (II, 1, &[1], 1, &[12], &[], "I;16", "I;12"),
    (II, 0, &[1], 1, &[16], &[], "I;16", "I;16"),
    (II, 1, &[1], 1, &[16], &[], "I;16", "I;16"),
    (MM, 1, &[1], 1, &[16], &[], "I;16B", "I;16B"),
    (II, 1, &[1], 2, &[16], &[], "I;16", "I;16R"),
    (II, 1, &[2], 1, &[16], &[], "I", "I;16S"),
    (MM, 1, &[2], 1, &[16], &[], "I", "I;16BS"),
    (II, 0, &[3], 1, &[32], &[], "F", "F;32F"),
    (MM, 0, &[3], 1, &[32], &[], "F", "F;32BF"),
    (II, 1, &[1], 1, &[32], &[], "I", "I;32N"),
    (II, 1, &[2], 1, &[32], &[], "I", "I;32S"),
    (MM, 1, &[2], 1, &[32], &[], "I", "I;32BS"),
    (II, 1, &[3], 1, &[32], &[], "F", "F;32F"),
    (MM, 1, &[3], 1, &[32], &[], "F", "F;32BF"),
    (II, 1, &[1], 1, &[8, 8], &[2], "LA", "LA"),
    (MM, 1, &[1], 1, &[8, 8], &[2], "LA", "LA"),
    (II, 2, &[1], 1, &[8, 8, 8], &[], "RGB", "RGB"),
    (MM, 2, &[1], 1, &[8, 8, 8], &[], "RGB", "RGB"),
    (II, 2, &[1], 2, &[8, 8, 8], &[], "RGB", "RGB;R"),
    (MM, 2, &[1], 2, &[8, 8, 8], &[], "RGB", "RGB;R"),
    (II, 2, &[1], 1, &[8, 8, 8, 8], &[], "RGBA", "RGBA"), // missing ExtraSamples
    (MM, 2, &[1], 1, &[8, 8, 8, 8], &[], "RGBA", "RGBA"), // missing ExtraSamples
    (II, 2, &[1], 1, &[8, 8, 8, 8], &[0], "RGB", "RGBX"),
    (MM, 2, &[1], 1, &[8, 8, 8, 8], &[0], "RGB", "RGBX"),
    (II, 2, &[1], 1, &[8, 8, 8, 8, 8], &[0, 0], "RGB", "RGBXX"),
    (MM, 2, &[1], 1, &[8, 8, 8, 8, 8], &[0, 0], "RGB", "RGBXX"),
    (II, 2, &[1], 1, &[8, 8, 8, 8, 8, 8], &[0, 0, 0], "RGB", "RGBXXX"),
    (MM, 2, &[1], 1, &[8, 8, 8, 8, 8, 8], &[0, 0, 0], "RGB", "RGBXXX"),
    (II, 2, &[1], 1, &[8, 8, 8, 8], &[1], "RGBA", "RGBa"),
    (MM, 2, &[1], 1, &[8, 8, 8, 8], &[1], "RGBA", "RGBa"),
    (II, 2, &[1], 1, &[8, 8, 8, 8, 8], &[1, 0], "RGBA", "RGBaX"),
    (MM, 2, &[1], 1, &[8, 8, 8, 8, 8], &[1, 0], "RGBA", "RGBaX"),
    (II, 2, &[1], 1, &[8, 8, 8, 8, 8, 8], &[1, 0, 0], "RGBA", "RGBaXX"),
    (MM, 2, &[1], 1, &[8, 8, 8, 8, 8, 8], &[1, 0, 0], "RGBA", "RGBaXX"),
    (II, 2, &[1], 1, &[8, 8, 8, 8], &[2], "RGBA", "RGBA"),
    (MM, 2, &[1], 1, &[8, 8, 8, 8], &[2], "RGBA", "RGBA"),
    (II, 2, &[1], 1, &[8, 8, 8, 8, 8], &[2, 0], "RGBA", "RGBAX"),
    (MM, 2, &[1], 1, &[8, 8, 8, 8, 8], &[2, 0], "RGBA", "RGBAX"),
    (II, 2, &[1], 1, &[8, 8, 8, 8, 8, 8], &[2, 0, 0], "RGBA", "RGBAXX"),
    (MM, 2, &[1], 1, &[8, 8, 8, 8, 8, 8], &[2, 0, 0], "RGBA", "RGBAXX"),
    (II, 2, &[1], 1, &[8, 8, 8, 8], &[999], "RGBA", "RGBA"), // Corel Draw 10
    (MM, 2, &[1], 1, &[8, 8, 8, 8], &[999], "RGBA", "RGBA"), // Corel Draw 10
    (II, 2, &[1], 1, &[16, 16, 16], &[], "RGB", "RGB;16L"),
    (MM, 2, &[1], 1, &[16, 16, 16], &[], "RGB", "RGB;16B"),
    (II, 2, &[1], 1, &[16, 16, 16, 16], &[], "RGBA", "RGBA;16L"),
    (MM, 2, &[1], 1, &[16, 16, 16, 16], &[], "RGBA", "RGBA;16B"),
    (II, 2, &[1], 1, &[16, 16, 16, 16], &[0], "RGB", "RGBX;16L"),
    (MM, 2, &[1], 1, &[16, 16, 16, 16], &[0], "RGB", "RGBX;16B"),
    (II, 2, &[1], 1, &[16, 16, 16, 16], &[1], "RGBA", "RGBa;16L"),
    (MM, 2, &[1], 1, &[16, 16, 16, 16], &[1], "RGBA", "RGBa;16B"),
    (II, 2, &[1], 1, &[16, 16, 16, 16], &[2], "RGBA", "RGBA;16L"),
    (MM, 2, &[1], 1, &[16, 16, 16, 16], &[2], "RGBA", "RGBA;16B"),
    (II, 3, &[1], 1, &[1], &[], "P", "P;1"),
    (MM, 3, &[1], 1, &[1], &[], "P", "P;1"),
    (II, 3, &[1], 2, &[1], &[], "P", "P;1R"),
    (MM, 3, &[1], 2, &[1], &[], "P", "P;1R"),
    (II, 3, &[1], 1, &[2], &[], "P", "P;2"),
    (MM, 3, &[1], 1, &[2], &[], "P", "P;2"),
    (II, 3, &[1], 2, &[2], &[], "P", "P;2R"),
    (MM, 3, &[1], 2, &[2], &[], "P", "P;2R"),
    (II, 3, &[1], 1, &[4], &[], "P", "P;4"),
    (MM, 3, &[1], 1, &[4], &[], "P", "P;4"),
    (II, 3, &[1], 2, &[4], &[], "P", "P;4R"),
    (MM, 3, &[1], 2, &[4], &[], "P", "P;4R"),
    (II, 3, &[1], 1, &[8], &[], "P", "P"),
    (MM, 3, &[1], 1, &[8], &[], "P", "P"),
    (II, 3, &[1], 1, &[8, 8], &[0], "P", "PX"),
    (II, 3, &[1], 1, &[8, 8], &[2], "PA", "PA"),
    (MM, 3, &[1], 1, &[8, 8], &[2], "PA", "PA"),
    (II, 3, &[1], 2, &[8], &[], "P", "P;R"),
    (MM, 3, &[1], 2, &[8], &[], "P", "P;R"),
    (II, 5, &[1], 1, &[8, 8, 8, 8], &[], "CMYK", "CMYK"),
    (MM, 5, &[1], 1, &[8, 8, 8, 8], &[], "CMYK", "CMYK"),
    (II, 5, &[1], 1, &[8, 8, 8, 8, 8], &[0], "CMYK", "CMYKX"),
    (MM, 5, &[1], 1, &[8, 8, 8, 8, 8], &[0], "CMYK", "CMYKX"),
    (II, 5, &[1], 1, &[8, 8, 8, 8, 8, 8], &[0, 0], "CMYK", "CMYKXX"),
    (MM, 5, &[1], 1, &[8, 8, 8, 8, 8, 8], &[0, 0], "CMYK", "CMYKXX"),
    (II, 5, &[1], 1, &[16, 16, 16, 16], &[], "CMYK", "CMYK;16L"),
    (MM, 5, &[1], 1, &[16, 16, 16, 16], &[], "CMYK", "CMYK;16B"),
    (II, 6, &[1], 1, &[8], &[], "L", "L"),
    (MM, 6, &[1], 1, &[8], &[], "L", "L"),
    // JPEG compressed images handled by the external codec and
    // auto-converted to RGBX. Minimal Baseline TIFF requires YCbCr images to
    // have 3 SamplesPerPixel.
    (II, 6, &[1], 1, &[8, 8, 8], &[], "RGB", "RGBX"),
    (MM, 6, &[1], 1, &[8, 8, 8], &[], "RGB", "RGBX"),
    (II, 8, &[1], 1, &[8, 8, 8], &[], "LAB", "LAB"),
    (MM, 8, &[1], 1, &[8, 8, 8], &[], "LAB", "LAB"),
];

lazy_static! {
    static ref MODE_TABLE: HashMap<ModeKey, (&'static str, &'static str)> = MODE_ROWS
        .iter()
        .map(|&(order, photometric, sample_format, fill_order, bits, extra, mode, raw)| {
            (
                ModeKey {
                    order,
                    photometric,
                    sample_format: sample_format.to_vec(),
                    fill_order,
                    bits: bits.to_vec(),
                    extra: extra.to_vec(),
                },
                (mode, raw),
            )
        })
        .collect();

    /// The widest per-pixel layout any mode row describes, used as a guard
    /// against absurd SamplesPerPixel values.
    static ref MAX_SAMPLES_PER_PIXEL: u64 =
        MODE_ROWS.iter().map(|row| row.4.len() as u64).max().unwrap_or(1);
}

fn mode_lookup(
    order: ByteOrder,
    photometric: u16,
    sample_format: &[u16],
    fill_order: u16,
    bits: &[u16],
    extra: &[u16],
) -> Option<(&'static str, &'static str)> {
    MODE_TABLE
        .get(&ModeKey {
            order,
            photometric,
            sample_format: sample_format.to_vec(),
            fill_order,
            bits: bits.to_vec(),
            extra: extra.to_vec(),
        })
        .copied()
}

/// Set up the image description for one frame based on its tags.
pub(crate) fn setup(ifd: &mut Ifd, force_libtiff: bool) -> TiffResult<ImageSetup> {
    if ifd.contains(WINDOWS_MEDIA_PHOTO) {
        return Err(TiffError::UnsupportedError(
            TiffUnsupportedError::WindowsMediaPhoto,
        ));
    }

    let compression_code = ifd.get_u16(Tag::Compression.to_u16())?.unwrap_or(1);
    let compression = tags::compression_name(compression_code).ok_or(
        TiffError::UnsupportedError(TiffUnsupportedError::UnknownCompressionMethod(
            compression_code,
        )),
    )?;
    let planar_configuration = ifd.get_u16(Tag::PlanarConfiguration.to_u16())?.unwrap_or(1);

    // photometric is a required tag, but not everyone is reading the
    // specification; old style jpeg compressed images most certainly are
    // YCbCr
    let mut photometric = ifd
        .get_u16(Tag::PhotometricInterpretation.to_u16())?
        .unwrap_or(0);
    if compression == "tiff_jpeg" {
        photometric = 6;
    }

    let fill_order = ifd.get_u16(Tag::FillOrder.to_u16())?.unwrap_or(1);

    debug!("- compression: {}", compression);
    debug!("- photometric_interpretation: {}", photometric);
    debug!("- planar_configuration: {}", planar_configuration);
    debug!("- fill_order: {}", fill_order);

    let xsize = ifd
        .get_u32(Tag::ImageWidth.to_u16())?
        .ok_or(TiffError::FormatError(TiffFormatError::MissingDimensions))?;
    let ysize = ifd
        .get_u32(Tag::ImageLength.to_u16())?
        .ok_or(TiffError::FormatError(TiffFormatError::MissingDimensions))?;
    let tile_size = (xsize, ysize);

    let orientation = ifd.get_u16(Tag::Orientation.to_u16())?.unwrap_or(1);
    let size = if matches!(orientation, 5 | 6 | 7 | 8) {
        (ysize, xsize)
    } else {
        (xsize, ysize)
    };
    debug!("- size: {:?}", size);

    let mut sample_format = ifd
        .get_u16_vec(Tag::SampleFormat.to_u16())?
        .unwrap_or_else(|| vec![1]);
    if sample_format.len() > 1 && sample_format.iter().all(|&v| v == 1) {
        // SampleFormat is properly per band, so an RGB image will be
        // (1, 1, 1). Per-band pixel types are not supported, so collapse the
        // uniform unsigned case to a single entry.
        sample_format = vec![1];
    }

    let mut bits = ifd
        .get_u16_vec(Tag::BitsPerSample.to_u16())?
        .unwrap_or_else(|| vec![1]);
    let extra = ifd
        .get_u16_vec(Tag::ExtraSamples.to_u16())?
        .unwrap_or_default();
    let base_bands: usize = match photometric {
        2 | 6 | 8 => 3, // RGB, YCbCr, LAB
        5 => 4,         // CMYK
        _ => 1,
    };
    let bands = base_bands + extra.len();

    let samples_per_pixel = ifd.get_u64(Tag::SamplesPerPixel.to_u16())?.unwrap_or(
        if compression == "tiff_jpeg" && (photometric == 2 || photometric == 6) {
            3
        } else {
            1
        },
    );
    if samples_per_pixel > *MAX_SAMPLES_PER_PIXEL {
        // samples_per_pixel can be a LONG, and the bits tuple is broadcast
        // to its length below
        error!(
            "More samples per pixel than can be decoded: {}",
            samples_per_pixel
        );
        return Err(TiffError::FormatError(
            TiffFormatError::InvalidSamplesPerPixel(samples_per_pixel),
        ));
    }
    let samples_per_pixel = samples_per_pixel as usize;

    if samples_per_pixel < bits.len() {
        // the file has more entries than expected, remove the excess
        bits.truncate(samples_per_pixel);
    } else if samples_per_pixel > bits.len() && bits.len() == 1 {
        // a single entry stands for the same width on every sample
        bits = vec![bits[0]; samples_per_pixel];
    }
    if bits.len() != samples_per_pixel {
        return Err(TiffError::FormatError(
            TiffFormatError::UnknownDataOrganization,
        ));
    }

    let order = ifd.byte_order();
    let (mut mode, raw) = mode_lookup(
        order,
        photometric,
        &sample_format,
        fill_order,
        &bits,
        &extra,
    )
    .ok_or(TiffError::FormatError(TiffFormatError::UnknownPixelMode))?;
    let mut raw_mode = raw.to_string();
    debug!("- raw mode: {}", raw_mode);
    debug!("- pil mode: {}", mode);

    let xres = ifd
        .get_rational(Tag::XResolution.to_u16())?
        .unwrap_or(Rational::new(1, 1));
    let yres = ifd
        .get_rational(Tag::YResolution.to_u16())?
        .unwrap_or(Rational::new(1, 1));
    let mut dpi = None;
    let mut resolution = None;
    if xres.to_f64() != 0.0 && yres.to_f64() != 0.0 {
        let (x, y) = (xres.to_f64(), yres.to_f64());
        match ifd.get_u16(Tag::ResolutionUnit.to_u16())? {
            Some(2) => dpi = Some((x, y)),
            // dots per centimeter, convert to dpi
            Some(3) => dpi = Some((x * 2.54, y * 2.54)),
            // used to default to 1, but now 2; keep the old spelling too
            None => {
                dpi = Some((x, y));
                resolution = Some((x, y));
            }
            // no absolute unit of measurement
            Some(_) => resolution = Some((x, y)),
        }
    }

    // build the tile descriptors
    let mut tiles = Vec::new();
    let use_libtiff = force_libtiff || compression != "raw";
    if use_libtiff {
        // The external codec expects the entire file as one tile and
        // performs the bit reversal for fill order 2 itself, so look the
        // mode up again as fill order 1.
        if fill_order == 2 {
            if let Some((m, r)) =
                mode_lookup(order, photometric, &sample_format, 1, &bits, &extra)
            {
                mode = m;
                raw_mode = r.to_string();
            }
        }
        if photometric == 6 && compression == "jpeg" && planar_configuration == 1 {
            // YCbCr with new jpeg compression in one plane unpacks straight
            // into RGB values
            raw_mode = "RGB".to_string();
        } else if raw_mode == "I;16" {
            // the codec returns bytes in native order
            raw_mode = "I;16N".to_string();
        } else if raw_mode.ends_with(";16B") || raw_mode.ends_with(";16L") {
            raw_mode.pop();
            raw_mode.push('N');
        }
        tiles.push(Tile {
            codec: "libtiff",
            bounds: (0, 0, xsize, ysize),
            offset: 0,
            args: TileArgs::Libtiff {
                raw_mode: raw_mode.clone(),
                compression,
                base_offset: ifd.base_offset().unwrap_or(0),
            },
        });
    } else if ifd.contains(Tag::StripOffsets.to_u16()) || ifd.contains(Tag::TileOffsets.to_u16())
    {
        let (mut offsets, h, w) = if ifd.contains(Tag::StripOffsets.to_u16()) {
            let offsets = ifd
                .get_u64_vec(Tag::StripOffsets.to_u16())?
                .unwrap_or_default();
            let h = ifd.get_u32(Tag::RowsPerStrip.to_u16())?.unwrap_or(ysize);
            (offsets, h, xsize)
        } else {
            let offsets = ifd
                .get_u64_vec(Tag::TileOffsets.to_u16())?
                .unwrap_or_default();
            let w = ifd
                .get_u32(Tag::TileWidth.to_u16())
                .map_err(|_| TiffError::FormatError(TiffFormatError::InvalidTileDimensions))?
                .ok_or(TiffError::FormatError(TiffFormatError::InvalidTileDimensions))?;
            let h = ifd
                .get_u32(Tag::TileLength.to_u16())
                .map_err(|_| TiffError::FormatError(TiffFormatError::InvalidTileDimensions))?
                .ok_or(TiffError::FormatError(TiffFormatError::InvalidTileDimensions))?;
            (offsets, h, w)
        };

        if w == xsize && h == ysize && planar_configuration != 2 {
            // every chunk covers the whole image; only use the last offset
            if let Some(&last) = offsets.last() {
                offsets = vec![last];
            }
        }

        let sum_bits: u32 = bits.iter().map(|&b| u32::from(b)).sum();
        let (mut x, mut y, mut layer) = (0u32, 0u32, 0usize);
        for offset in offsets {
            // stride is only forced on the right edge, zero means natural
            let mut stride = if x.saturating_add(w) > xsize {
                (u64::from(w) * u64::from(sum_bits) / 8).min(u64::from(u32::MAX)) as u32
            } else {
                0
            };
            let tile_raw_mode = if planar_configuration == 2 {
                // each band on its own layer
                let band = raw_mode.chars().nth(layer).ok_or(TiffError::FormatError(
                    TiffFormatError::UnknownDataOrganization,
                ))?;
                stride /= bands as u32;
                band.to_string()
            } else {
                raw_mode.clone()
            };
            tiles.push(Tile {
                codec: compression,
                bounds: (
                    x,
                    y,
                    x.saturating_add(w).min(xsize),
                    y.saturating_add(h).min(ysize),
                ),
                offset,
                args: TileArgs::Raw {
                    raw_mode: tile_raw_mode,
                    stride,
                    orientation: 1,
                },
            });
            x = x.saturating_add(w);
            if x >= xsize {
                x = 0;
                y = y.saturating_add(h);
                if y >= ysize {
                    y = 0;
                    layer += 1;
                }
            }
        }
    } else {
        debug!("- unsupported data organization");
        return Err(TiffError::FormatError(
            TiffFormatError::UnknownDataOrganization,
        ));
    }

    let palette = if mode == "P" || mode == "PA" {
        let colormap = ifd
            .get_u16_vec(Tag::ColorMap.to_u16())?
            .ok_or(TiffError::FormatError(TiffFormatError::RequiredTagNotFound(
                Tag::ColorMap,
            )))?;
        // 16-bit palette entries; the high byte carries the 8-bit value
        Some(colormap.iter().map(|&v| (v >> 8) as u8).collect())
    } else {
        None
    };

    let icc_profile = match ifd.get(Tag::IccProfile.to_u16())? {
        Some(value) => value.as_bytes().ok().map(|bytes| bytes.to_vec()),
        None => None,
    };

    Ok(ImageSetup {
        mode,
        raw_mode,
        size,
        tile_size,
        compression,
        tiles,
        dpi,
        resolution,
        palette,
        icc_profile,
    })
}
