//! The appending multi-page writer.

use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::bytes::ByteOrder;
use crate::error::{TiffError, TiffFormatError, TiffResult, TiffUnsupportedError};
use crate::tags::{self, accept_header, Type};

/// Tags whose stored values are themselves file offsets and must move with
/// the page during relocation.
const OFFSET_TAGS: [u16; 6] = [
    273, // StripOffsets
    288, // FreeOffsets
    324, // TileOffsets
    519, // JPEGQTables
    520, // JPEGDCTables
    521, // JPEGACTables
];

fn read_up_to<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Wraps an existing (or empty) file so that additional fully serialized
/// pages can be appended to it.
///
/// Each new page is written as if it were a file of its own, header
/// included, at a 16-byte-aligned offset past the current end. On
/// [`finalize`](Self::finalize) the previous page's zero next-directory slot
/// is pointed at the new page and every offset inside the new page's
/// directory is shifted by the page's base offset, widening SHORT and LONG
/// offset fields when the shifted value no longer fits.
///
/// The [`Write`] and [`Seek`] impls are relative to the new page, so
/// [`Ifd::save`](crate::Ifd::save) sees a fresh stream and writes a header.
/// Dropping the writer finalizes the open page; a page that was never
/// written is skipped, leaving the file as it was.
#[derive(Debug)]
pub struct AppendingTiffWriter<W: Read + Write + Seek> {
    stream: W,
    byte_order: ByteOrder,
    bigtiff: bool,
    beginning: u64,
    header: [u8; 4],
    is_first: bool,
    offset_of_new_page: u64,
    new_ifd_offset_slot: Option<u64>,
    finalized: bool,
}

impl AppendingTiffWriter<std::fs::File> {
    /// Open (or create) a file on disk for appending. The file is closed
    /// when the writer goes out of scope.
    pub fn open<P: AsRef<Path>>(path: P) -> TiffResult<Self> {
        let path = path.as_ref();
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(_) => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
        };
        Self::new(file)
    }
}

impl<W: Read + Write + Seek> AppendingTiffWriter<W> {
    /// Wrap a stream positioned at the start of the TIFF data. The stream is
    /// only borrowed for the writer's lifetime when `W` is a `&mut` reference.
    pub fn new(mut stream: W) -> TiffResult<Self> {
        let beginning = stream.stream_position()?;
        let mut writer = AppendingTiffWriter {
            stream,
            byte_order: ByteOrder::LittleEndian,
            bigtiff: false,
            beginning,
            header: [0; 4],
            is_first: false,
            offset_of_new_page: 0,
            new_ifd_offset_slot: None,
            finalized: false,
        };
        writer.setup()?;
        Ok(writer)
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn is_bigtiff(&self) -> bool {
        self.bigtiff
    }

    /// Absolute file offset the next page will be written at.
    pub fn offset_of_new_page(&self) -> u64 {
        self.offset_of_new_page
    }

    fn offset_size(&self) -> usize {
        if self.bigtiff {
            8
        } else {
            4
        }
    }

    /// Re-read the file state: validate the header, find the zero slot at
    /// the end of the directory chain and pad out to the next page boundary.
    fn setup(&mut self) -> TiffResult<()> {
        self.stream.seek(SeekFrom::Start(self.beginning))?;
        self.new_ifd_offset_slot = None;
        self.offset_of_new_page = 0;
        self.finalized = false;

        let mut header = [0u8; 4];
        let got = read_up_to(&mut self.stream, &mut header)?;
        if got == 0 {
            // empty file - first page
            self.is_first = true;
            return Ok(());
        }

        self.is_first = false;
        if got < 4 || !accept_header(&header) {
            return Err(TiffError::FormatError(
                TiffFormatError::TiffSignatureInvalid,
            ));
        }
        self.header = header;
        // magic 43 in either byte of the version field
        self.bigtiff = header[2..].contains(&0x2b);
        self.byte_order = match ByteOrder::from_prefix(&header) {
            Some(order) => order,
            None => {
                return Err(TiffError::FormatError(
                    TiffFormatError::TiffSignatureNotFound,
                ))
            }
        };

        if self.bigtiff {
            // offset size and the reserved word
            self.stream.seek(SeekFrom::Current(4))?;
        }
        self.skip_ifds()?;
        self.go_to_end()
    }

    /// Walk the whole directory chain, remembering where the terminating
    /// zero next-directory slot lives.
    fn skip_ifds(&mut self) -> TiffResult<()> {
        let fmt_size = self.offset_size();
        let entry_len: u64 = if self.bigtiff { 20 } else { 12 };
        loop {
            let ifd_offset = self.read_field(fmt_size)?;
            if ifd_offset == 0 {
                self.new_ifd_offset_slot =
                    Some(self.stream.stream_position()? - fmt_size as u64);
                return Ok(());
            }
            self.stream.seek(SeekFrom::Start(ifd_offset))?;
            let num_tags = self.read_field(if self.bigtiff { 8 } else { 2 })?;
            self.stream
                .seek(SeekFrom::Current((num_tags * entry_len) as i64))?;
        }
    }

    fn go_to_end(&mut self) -> TiffResult<()> {
        let pos = self.stream.seek(SeekFrom::End(0))?;

        // pad to a 16 byte boundary
        let pad_bytes = 16 - pos % 16;
        if pad_bytes > 0 && pad_bytes < 16 {
            self.stream.write_all(&[0u8; 16][..pad_bytes as usize])?;
        }
        self.offset_of_new_page = self.stream.stream_position()?;
        Ok(())
    }

    /// Hook the page written since the last [`setup`](Self::setup) into the
    /// chain and relocate the offsets inside its directory. Called from
    /// [`new_frame`](Self::new_frame) and on drop; finishing without having
    /// written a page is fine and leaves the file untouched.
    pub fn finalize(&mut self) -> TiffResult<()> {
        if self.is_first || self.finalized {
            self.finalized = true;
            return Ok(());
        }

        self.stream.seek(SeekFrom::Start(self.offset_of_new_page))?;
        let mut header = [0u8; 4];
        let got = read_up_to(&mut self.stream, &mut header)?;
        if got == 0 {
            // no frame was committed to this page
            self.finalized = true;
            return Ok(());
        }
        if got < 4 || header != self.header {
            return Err(TiffError::FormatError(TiffFormatError::PageHeaderMismatch));
        }

        if self.bigtiff {
            self.stream.seek(SeekFrom::Current(4))?;
        }
        let fmt_size = self.offset_size();
        let ifd_offset = self.read_field(fmt_size)? + self.offset_of_new_page;
        let slot = self
            .new_ifd_offset_slot
            .ok_or(TiffError::FormatError(
                TiffFormatError::ImageFileDirectoryNotFound,
            ))?;
        self.stream.seek(SeekFrom::Start(slot))?;
        self.write_field(ifd_offset, fmt_size)?;
        self.stream.seek(SeekFrom::Start(ifd_offset))?;
        self.fix_ifd()?;
        self.finalized = true;
        Ok(())
    }

    /// Finish the current page and prepare for the next one.
    pub fn new_frame(&mut self) -> TiffResult<()> {
        self.finalize()?;
        self.setup()
    }

    /// Finish the last page. Equivalent to dropping the writer, but errors
    /// are reported instead of discarded.
    pub fn close(mut self) -> TiffResult<()> {
        self.finalize()
    }

    fn read_field(&mut self, field_size: usize) -> TiffResult<u64> {
        let mut buf = [0u8; 8];
        self.stream.read_exact(&mut buf[..field_size])?;
        Ok(match field_size {
            2 => u64::from(self.byte_order.u16(buf[..2].try_into().unwrap())),
            4 => u64::from(self.byte_order.u32(buf[..4].try_into().unwrap())),
            8 => self.byte_order.u64(buf),
            _ => {
                return Err(TiffError::FormatError(TiffFormatError::Format(
                    "offset size is not supported".into(),
                )))
            }
        })
    }

    fn write_field(&mut self, value: u64, field_size: usize) -> TiffResult<()> {
        let mut out = Vec::with_capacity(8);
        match field_size {
            2 => self.byte_order.put_u16(&mut out, u16::try_from(value)?),
            4 => self.byte_order.put_u32(&mut out, u32::try_from(value)?),
            8 => self.byte_order.put_u64(&mut out, value),
            _ => {
                return Err(TiffError::FormatError(TiffFormatError::Format(
                    "offset size is not supported".into(),
                )))
            }
        }
        self.stream.write_all(&out)?;
        Ok(())
    }

    /// Overwrite the field just read, optionally with a wider one.
    fn rewrite_field(
        &mut self,
        value: u64,
        field_size: usize,
        new_field_size: usize,
    ) -> TiffResult<()> {
        self.stream.seek(SeekFrom::Current(-(field_size as i64)))?;
        self.write_field(value, new_field_size)
    }

    /// Shift every out-of-line payload offset in the directory at the
    /// current position by the page's base offset, and do the same for the
    /// values of tags that store offsets themselves.
    fn fix_ifd(&mut self) -> TiffResult<()> {
        let fmt_size = self.offset_size();
        let num_tags = self.read_field(if self.bigtiff { 8 } else { 2 })?;

        for _ in 0..num_tags {
            let tag = self.read_field(2)? as u16;
            let type_pos = self.stream.stream_position()?;
            let field_type = self.read_field(2)? as u16;
            let count = self.read_field(if self.bigtiff { 8 } else { 4 })?;

            let field_size = match Type::from_u16(field_type) {
                Some(kind) => kind.size() as u64,
                None => 0,
            };
            if field_size == 0 {
                // nothing known about this entry's layout; leave the slot be
                self.stream.seek(SeekFrom::Current(fmt_size as i64))?;
                continue;
            }
            let total_size = field_size.saturating_mul(count);
            let is_local = total_size <= fmt_size as u64;
            let mut offset = 0;
            if !is_local {
                offset = self.read_field(fmt_size)? + self.offset_of_new_page;
                self.rewrite_field(offset, fmt_size, fmt_size)?;
            }

            if OFFSET_TAGS.contains(&tag) {
                debug!(
                    "fix_ifd: {} ({}) - type {} - count {}",
                    tags::tag_name(tag).unwrap_or("unknown"),
                    tag,
                    field_type,
                    count
                );
                let cur_pos = self.stream.stream_position()?;
                if is_local {
                    self.fix_offsets(count, field_size as usize, Some(type_pos))?;
                    self.stream.seek(SeekFrom::Start(cur_pos + fmt_size as u64))?;
                } else {
                    self.stream.seek(SeekFrom::Start(offset))?;
                    self.fix_offsets(count, field_size as usize, None)?;
                    self.stream.seek(SeekFrom::Start(cur_pos))?;
                }
            } else if is_local {
                // skip the locally stored value that is not an offset
                self.stream.seek(SeekFrom::Current(fmt_size as i64))?;
            }
        }
        Ok(())
    }

    /// Relocate `count` stored offsets of `field_size` bytes each at the
    /// current position. A relocated offset that no longer fits its field is
    /// widened in place (SHORT to LONG, and under BigTIFF on to LONG8) and
    /// the entry's type code rewritten, which is only possible for the
    /// single-value inline case.
    fn fix_offsets(
        &mut self,
        count: u64,
        field_size: usize,
        entry_type_pos: Option<u64>,
    ) -> TiffResult<()> {
        for _ in 0..count {
            let offset = self.read_field(field_size)? + self.offset_of_new_page;

            let new_field_size = if self.bigtiff
                && (field_size == 2 || field_size == 4)
                && offset >= 1 << 32
            {
                8
            } else if field_size == 2 && offset >= 1 << 16 {
                4
            } else {
                0
            };

            if new_field_size != 0 {
                let type_pos = match entry_type_pos {
                    Some(pos) if count == 1 => pos,
                    _ => {
                        return Err(TiffError::UnsupportedError(
                            TiffUnsupportedError::MultiValueOffsetPromotion,
                        ))
                    }
                };
                // the single value lives in the entry slot, so the widened
                // field still fits there
                self.rewrite_field(offset, field_size, new_field_size)?;
                let after = self.stream.stream_position()?;
                let promoted = if new_field_size == 8 {
                    Type::LONG8
                } else {
                    Type::LONG
                };
                self.stream.seek(SeekFrom::Start(type_pos))?;
                self.write_field(u64::from(promoted.to_u16()), 2)?;
                self.stream.seek(SeekFrom::Start(after))?;
            } else {
                self.rewrite_field(offset, field_size, field_size)?;
            }
        }
        Ok(())
    }
}

impl<W: Read + Write + Seek> Write for AppendingTiffWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl<W: Read + Write + Seek> Seek for AppendingTiffWriter<W> {
    /// Positions are relative to the start of the page being written.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let absolute = match pos {
            SeekFrom::Start(offset) => self
                .stream
                .seek(SeekFrom::Start(offset + self.offset_of_new_page))?,
            other => self.stream.seek(other)?,
        };
        Ok(absolute.saturating_sub(self.offset_of_new_page))
    }
}

impl<W: Read + Write + Seek> Drop for AppendingTiffWriter<W> {
    fn drop(&mut self) {
        if !self.finalized {
            // Errors while finishing the page are lost here; call `close`
            // or `finalize` to see them.
            let _ = self.finalize();
        }
    }
}
