//! Reading the TIFF container: the header, the IFD chain and the per-frame
//! image setup.

use std::io::{Read, Seek};

use log::debug;

use crate::bytes::ByteOrder;
use crate::directory::Ifd;
use crate::error::{TiffError, TiffFormatError, TiffResult, UsageError};
use crate::tags::{accept_header, PREFIXES};

mod image;
mod stream;

pub use self::image::{ImageSetup, Tile, TileArgs};
use self::stream::EndianReader;

/// The representation of a multi-page TIFF reader.
///
/// The reader walks the linked list of image file directories lazily: the
/// total number of frames is unknown until a zero next-directory pointer is
/// seen, and a pointer that revisits an already-seen directory terminates
/// the list instead of looping.
#[derive(Debug)]
pub struct Decoder<R>
where
    R: Read + Seek,
{
    reader: EndianReader<R>,
    bigtiff: bool,
    first_offset: u64,
    frame_positions: Vec<u64>,
    current_frame: usize,
    next_offset: u64,
    n_frames: Option<usize>,
    is_animated: bool,
    force_libtiff: bool,
    ifd: Ifd,
}

impl<R: Read + Seek> Decoder<R> {
    pub fn new(mut r: R) -> TiffResult<Decoder<R>> {
        let mut header = [0u8; 4];
        r.read_exact(&mut header)
            .map_err(|_| TiffError::FormatError(TiffFormatError::TiffSignatureNotFound))?;
        if !accept_header(&header) {
            return Err(TiffError::FormatError(
                TiffFormatError::TiffSignatureInvalid,
            ));
        }
        let byte_order = match ByteOrder::from_prefix(&header) {
            Some(order) => order,
            None => {
                return Err(TiffError::FormatError(
                    TiffFormatError::TiffSignatureNotFound,
                ))
            }
        };
        let bigtiff = header == PREFIXES[4] || header == PREFIXES[5];

        let mut reader = EndianReader::new(r, byte_order);
        let first_offset = if bigtiff {
            // Read bytesize of offsets (in bigtiff it's always 8, but provide
            // a way to move to 16 some day)
            if reader.read_u16()? != 8 {
                return Err(TiffError::FormatError(
                    TiffFormatError::TiffSignatureNotFound,
                ));
            }
            // This constant should always be 0
            if reader.read_u16()? != 0 {
                return Err(TiffError::FormatError(
                    TiffFormatError::TiffSignatureNotFound,
                ));
            }
            reader.read_u64()?
        } else {
            u64::from(reader.read_u32()?)
        };

        debug!("first directory at {}", first_offset);

        let mut decoder = Decoder {
            reader,
            bigtiff,
            first_offset,
            frame_positions: Vec::new(),
            current_frame: 0,
            next_offset: first_offset,
            n_frames: None,
            is_animated: false,
            force_libtiff: false,
            ifd: Ifd::new(byte_order, bigtiff),
        };
        decoder.seek(0)?;
        Ok(decoder)
    }

    /// Route every frame through the external whole-image codec path even
    /// for uncompressed data.
    pub fn with_forced_libtiff(mut self) -> Decoder<R> {
        self.force_libtiff = true;
        self
    }

    /// Returns the byte_order of the file.
    pub fn byte_order(&self) -> ByteOrder {
        self.reader.byte_order()
    }

    pub fn is_bigtiff(&self) -> bool {
        self.bigtiff
    }

    /// Whether the file holds more than one frame.
    pub fn is_animated(&self) -> bool {
        self.is_animated
    }

    /// The offset of the first directory in the file.
    pub fn first_offset(&self) -> u64 {
        self.first_offset
    }

    /// The directory of the current frame.
    pub fn ifd(&self) -> &Ifd {
        &self.ifd
    }

    pub fn ifd_mut(&mut self) -> &mut Ifd {
        &mut self.ifd
    }

    /// Return the current frame number.
    pub fn tell(&self) -> usize {
        self.current_frame
    }

    /// Select a given frame as the current image.
    ///
    /// Frames already visited reload from their recorded offset; seeking
    /// ahead walks the chain, recording every directory position on the way.
    pub fn seek(&mut self, frame: usize) -> TiffResult<()> {
        while self.frame_positions.len() <= frame {
            if self.next_offset == 0 {
                return Err(TiffError::FormatError(
                    TiffFormatError::ImageFileDirectoryNotFound,
                ));
            }
            if self.next_offset >= 1 << 63 {
                return Err(TiffError::UsageError(UsageError::SeekOutOfRange(
                    self.next_offset,
                )));
            }
            debug!(
                "seeking to frame {}, on frame {}, next offset {}",
                frame,
                self.frame_positions.len(),
                self.next_offset
            );
            self.reader.goto_offset(self.next_offset)?;
            self.frame_positions.push(self.next_offset);
            self.ifd = Ifd::new(self.reader.byte_order(), self.bigtiff);
            self.ifd.load(self.reader.inner())?;

            let next = self.ifd.next_offset();
            self.next_offset = if self.frame_positions.contains(&next) {
                // This directory has already been processed; declare this to
                // be the end of the image.
                0
            } else {
                next
            };
            if self.next_offset == 0 {
                self.n_frames = Some(self.frame_positions.len());
            }
            if self.frame_positions.len() == 1 {
                self.is_animated = self.next_offset != 0;
            }
        }

        self.reader.goto_offset(self.frame_positions[frame])?;
        self.ifd = Ifd::new(self.reader.byte_order(), self.bigtiff);
        self.ifd.load(self.reader.inner())?;
        self.current_frame = frame;
        Ok(())
    }

    /// The number of frames in the file.
    ///
    /// Walking to the end of the chain may be required; the current frame is
    /// restored afterwards.
    pub fn n_frames(&mut self) -> TiffResult<usize> {
        if let Some(n) = self.n_frames {
            return Ok(n);
        }
        let current = self.current_frame;
        let probe: TiffResult<()> = (|| {
            let mut frame = self.frame_positions.len();
            while self.n_frames.is_none() {
                self.seek(frame)?;
                frame += 1;
            }
            Ok(())
        })();
        let restore = self.seek(current);
        probe?;
        restore?;
        match self.n_frames {
            Some(n) => Ok(n),
            None => Err(TiffError::FormatError(
                TiffFormatError::ImageFileDirectoryNotFound,
            )),
        }
    }

    /// Interpret the current frame's tags as an image description and tile
    /// plan for the external pixel codecs.
    pub fn image(&mut self) -> TiffResult<ImageSetup> {
        image::setup(&mut self.ifd, self.force_libtiff)
    }

    /// Read a directory from an arbitrary offset, e.g. a sub-IFD found in an
    /// EXIF or SubIfd tag. The group scopes tag names in the result.
    pub fn read_ifd_at(&mut self, offset: u64, group: Option<u16>) -> TiffResult<Ifd> {
        let mut ifd = match group {
            Some(group) => Ifd::with_group(self.reader.byte_order(), self.bigtiff, group),
            None => Ifd::new(self.reader.byte_order(), self.bigtiff),
        };
        self.reader.goto_offset(offset)?;
        ifd.load(self.reader.inner())?;
        Ok(ifd)
    }

    /// Returns a mutable reference to the stream being decoded.
    pub fn inner(&mut self) -> &mut R {
        self.reader.inner()
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}
