//! The image file directory entity.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};

use log::{debug, warn};

use crate::bytes::ByteOrder;
use crate::error::TiffResult;
use crate::rational::Rational;
use crate::tags::{self, Tag, Type};
use crate::value::{type_handler, type_handler_for, TagValue};

/// One directory slot: the raw on-disk payload until the tag is first read,
/// the decoded value afterwards or once set by a caller.
#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Raw { kind: Type, data: Vec<u8> },
    Decoded { kind: Type, value: TagValue },
}

impl Entry {
    fn kind(&self) -> Type {
        match self {
            Entry::Raw { kind, .. } | Entry::Decoded { kind, .. } => *kind,
        }
    }
}

/// A TIFF image file directory: a mapping from tag ids to typed values, plus
/// the link to the next directory in the file.
///
/// Tags are decoded from their raw payload on first access. Serialization
/// always writes tags in ascending id order, stores small payloads inside
/// the entry's value slot and spills larger ones into a word-aligned
/// auxiliary block following the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Ifd {
    byte_order: ByteOrder,
    bigtiff: bool,
    group: Option<u16>,
    entries: BTreeMap<u16, Entry>,
    next_offset: u64,
    base_offset: Option<u64>,
}

fn is_eof(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::UnexpectedEof
}

/// Read up to `size` bytes, stopping early at end of stream. Reads in blocks
/// so a corrupt count field cannot force one giant upfront allocation.
fn safe_read<R: Read>(stream: &mut R, size: usize) -> io::Result<Vec<u8>> {
    const BLOCK: usize = 1 << 20;
    let mut data = Vec::new();
    while data.len() < size {
        let chunk = (size - data.len()).min(BLOCK);
        let start = data.len();
        data.resize(start + chunk, 0);
        let n = stream.read(&mut data[start..])?;
        data.truncate(start + n);
        if n == 0 {
            break;
        }
    }
    Ok(data)
}

fn tag_label(tag: u16) -> &'static str {
    tags::tag_name(tag).unwrap_or("unknown")
}

impl Ifd {
    pub fn new(byte_order: ByteOrder, bigtiff: bool) -> Ifd {
        Ifd {
            byte_order,
            bigtiff,
            group: None,
            entries: BTreeMap::new(),
            next_offset: 0,
            base_offset: None,
        }
    }

    /// A directory that is a sub-directory of `group` (e.g. the EXIF or GPS
    /// IFD); the group scopes tag name lookups.
    pub fn with_group(byte_order: ByteOrder, bigtiff: bool, group: u16) -> Ifd {
        Ifd {
            group: Some(group),
            ..Ifd::new(byte_order, bigtiff)
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn is_bigtiff(&self) -> bool {
        self.bigtiff
    }

    pub fn group(&self) -> Option<u16> {
        self.group
    }

    /// Absolute file offset of the next directory, zero at the end of the
    /// chain.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Absolute file offset this directory was read from.
    pub fn base_offset(&self) -> Option<u64> {
        self.base_offset
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, tag: u16) -> bool {
        self.entries.contains_key(&tag)
    }

    /// The stored type of a tag.
    pub fn kind(&self, tag: u16) -> Option<Type> {
        self.entries.get(&tag).map(Entry::kind)
    }

    /// All tag ids present, both decoded and not yet decoded.
    pub fn tags(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.keys().copied()
    }

    fn decode(&mut self, tag: u16) -> TiffResult<()> {
        let byte_order = self.byte_order;
        if let Some(entry) = self.entries.get_mut(&tag) {
            if let Entry::Raw { kind, data } = entry {
                let value = (type_handler(*kind).load)(byte_order, data)?;
                *entry = Entry::Decoded { kind: *kind, value };
            }
        }
        Ok(())
    }

    fn decode_all(&mut self) -> TiffResult<()> {
        let pending: Vec<u16> = self.entries.keys().copied().collect();
        for tag in pending {
            self.decode(tag)?;
        }
        Ok(())
    }

    /// The value of a tag, decoding it from the raw payload on first access.
    pub fn get(&mut self, tag: u16) -> TiffResult<Option<&TagValue>> {
        self.decode(tag)?;
        Ok(match self.entries.get(&tag) {
            Some(Entry::Decoded { value, .. }) => Some(value),
            _ => None,
        })
    }

    /// Iterate over all decoded `(tag, value)` pairs in ascending tag order.
    pub fn iter<'a>(&'a mut self) -> TiffResult<impl Iterator<Item = (u16, &'a TagValue)> + 'a> {
        self.decode_all()?;
        Ok(self.entries.iter().filter_map(|(&tag, entry)| match entry {
            Entry::Decoded { value, .. } => Some((tag, value)),
            Entry::Raw { .. } => None,
        }))
    }

    pub fn get_u16(&mut self, tag: u16) -> TiffResult<Option<u16>> {
        Ok(match self.get(tag)? {
            Some(value) => Some(value.as_u16()?),
            None => None,
        })
    }

    pub fn get_u32(&mut self, tag: u16) -> TiffResult<Option<u32>> {
        Ok(match self.get(tag)? {
            Some(value) => Some(value.as_u32()?),
            None => None,
        })
    }

    pub fn get_u64(&mut self, tag: u16) -> TiffResult<Option<u64>> {
        Ok(match self.get(tag)? {
            Some(value) => Some(value.as_u64()?),
            None => None,
        })
    }

    pub fn get_u16_vec(&mut self, tag: u16) -> TiffResult<Option<Vec<u16>>> {
        Ok(match self.get(tag)? {
            Some(value) => Some(value.to_u16_vec()?),
            None => None,
        })
    }

    pub fn get_u64_vec(&mut self, tag: u16) -> TiffResult<Option<Vec<u64>>> {
        Ok(match self.get(tag)? {
            Some(value) => Some(value.to_u64_vec()?),
            None => None,
        })
    }

    pub fn get_f64(&mut self, tag: u16) -> TiffResult<Option<f64>> {
        Ok(match self.get(tag)? {
            Some(value) => Some(value.as_f64()?),
            None => None,
        })
    }

    pub fn get_rational(&mut self, tag: u16) -> TiffResult<Option<Rational>> {
        Ok(match self.get(tag)? {
            Some(value) => Some(value.as_rational()?),
            None => None,
        })
    }

    pub fn get_string(&mut self, tag: u16) -> TiffResult<Option<String>> {
        Ok(match self.get(tag)? {
            Some(value) => Some(value.as_str()?.to_owned()),
            None => None,
        })
    }

    pub fn get_bytes(&mut self, tag: u16) -> TiffResult<Option<Vec<u8>>> {
        Ok(match self.get(tag)? {
            Some(value) => Some(value.as_bytes()?.to_vec()),
            None => None,
        })
    }

    /// Store a value, inferring the type from the tag dictionary when the tag
    /// is known and from the value itself otherwise. A known single-entry tag
    /// receiving more than one value is truncated with a warning.
    pub fn set(&mut self, tag: u16, value: impl Into<TagValue>) -> TiffResult<()> {
        let value = value.into();
        let kind = match tags::tag_info(tag).and_then(|info| info.kind) {
            Some(kind) => kind,
            None => value.kind(),
        };
        self.set_typed(tag, kind, value)
    }

    /// Store a value under an explicitly chosen type.
    pub fn set_typed(
        &mut self,
        tag: u16,
        kind: Type,
        value: impl Into<TagValue>,
    ) -> TiffResult<()> {
        let mut value = value.into().coerce(kind)?;
        let blob = matches!(kind, Type::BYTE | Type::ASCII | Type::UNDEFINED);
        if !blob && value.len() > 1 {
            if let Some(info) = tags::tag_info(tag) {
                if info.count == Some(1) {
                    warn!(
                        "tag {} ({}) had too many entries: {}, expected 1",
                        tag_label(tag),
                        tag,
                        value.len()
                    );
                    value.truncate(1);
                }
            }
        }
        self.entries.insert(tag, Entry::Decoded { kind, value });
        Ok(())
    }

    pub fn remove(&mut self, tag: u16) -> Option<Type> {
        self.entries.remove(&tag).map(|entry| entry.kind())
    }

    fn read_u16<R: Read>(&self, stream: &mut R) -> io::Result<u16> {
        let mut buf = [0; 2];
        stream.read_exact(&mut buf)?;
        Ok(self.byte_order.u16(buf))
    }

    fn read_u32<R: Read>(&self, stream: &mut R) -> io::Result<u32> {
        let mut buf = [0; 4];
        stream.read_exact(&mut buf)?;
        Ok(self.byte_order.u32(buf))
    }

    fn read_u64<R: Read>(&self, stream: &mut R) -> io::Result<u64> {
        let mut buf = [0; 8];
        stream.read_exact(&mut buf)?;
        Ok(self.byte_order.u64(buf))
    }

    fn read_offset_field<R: Read>(&self, stream: &mut R) -> io::Result<u64> {
        if self.bigtiff {
            self.read_u64(stream)
        } else {
            self.read_u32(stream).map(u64::from)
        }
    }

    /// Populate the directory from the stream's current position.
    ///
    /// Entries with an unrecognized type are skipped with a debug trace;
    /// truncated payloads are skipped with a warning. A short read in the
    /// directory itself aborts the load with a warning, leaving whatever was
    /// parsed so far in place.
    pub fn load<R: Read + Seek>(&mut self, stream: &mut R) -> TiffResult<()> {
        self.entries.clear();
        self.next_offset = 0;
        self.base_offset = Some(stream.stream_position()?);

        let slot_len = if self.bigtiff { 8usize } else { 4usize };
        let entry_count = match if self.bigtiff {
            self.read_u64(stream)
        } else {
            self.read_u16(stream).map(u64::from)
        } {
            Ok(count) => count,
            Err(err) if is_eof(&err) => {
                warn!("truncated directory at offset {:?}", self.base_offset);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        for _ in 0..entry_count {
            let parsed = (|| -> io::Result<(u16, u16, u64, [u8; 8])> {
                let tag = self.read_u16(stream)?;
                let type_id = self.read_u16(stream)?;
                let count = if self.bigtiff {
                    self.read_u64(stream)?
                } else {
                    u64::from(self.read_u32(stream)?)
                };
                let mut slot = [0u8; 8];
                stream.read_exact(&mut slot[..slot_len])?;
                Ok((tag, type_id, count, slot))
            })();
            let (tag, type_id, count, slot) = match parsed {
                Ok(entry) => entry,
                Err(err) if is_eof(&err) => {
                    warn!("truncated directory entry at offset {:?}", self.base_offset);
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            };

            let Some((kind, handler)) = type_handler_for(type_id) else {
                debug!(
                    "tag: {} ({}) - unsupported type {}",
                    tag_label(tag),
                    tag,
                    type_id
                );
                continue;
            };

            let size = match count
                .checked_mul(handler.size as u64)
                .and_then(|size| usize::try_from(size).ok())
            {
                Some(size) => size,
                None => {
                    warn!("tag {} ({}) has an implausible count {}", tag_label(tag), tag, count);
                    continue;
                }
            };

            let data = if size > slot_len {
                let offset = if self.bigtiff {
                    self.byte_order.u64(slot)
                } else {
                    u64::from(self.byte_order.u32(slot[..4].try_into().unwrap()))
                };
                let here = stream.stream_position()?;
                stream.seek(SeekFrom::Start(offset))?;
                let data = safe_read(stream, size)?;
                stream.seek(SeekFrom::Start(here))?;
                if data.len() != size {
                    warn!(
                        "possibly corrupt data: expected to read {} bytes but only got {}; \
                         skipping tag {} ({})",
                        size,
                        data.len(),
                        tag_label(tag),
                        tag
                    );
                    continue;
                }
                data
            } else {
                slot[..size].to_vec()
            };

            if data.is_empty() {
                debug!("tag: {} ({}) - type: {:?} - empty", tag_label(tag), tag, kind);
                continue;
            }

            debug!(
                "tag: {} ({}) - type: {:?} - {} bytes",
                tag_label(tag),
                tag,
                kind,
                data.len()
            );
            self.entries.insert(tag, Entry::Raw { kind, data });
        }

        self.next_offset = match self.read_offset_field(stream) {
            Ok(offset) => offset,
            Err(err) if is_eof(&err) => {
                warn!("truncated next-directory pointer at offset {:?}", self.base_offset);
                0
            }
            Err(err) => return Err(err.into()),
        };
        Ok(())
    }

    /// Serialize the directory as it would appear at `base_offset` in a file.
    ///
    /// Two passes: the first encodes every payload, placing small ones into
    /// the entry slot and reserving offsets into the auxiliary block for the
    /// rest, then relocates `StripOffsets` past the end of the directory.
    /// The second emits the entry table, a zero next-directory pointer and
    /// the word-padded auxiliary data.
    pub fn to_bytes(&mut self, base_offset: u64) -> TiffResult<Vec<u8>> {
        self.decode_all()?;

        let byte_order = self.byte_order;
        let bigtiff = self.bigtiff;
        let slot_len = if bigtiff { 8usize } else { 4usize };
        let entry_len = if bigtiff { 20u64 } else { 12u64 };
        let count_len = if bigtiff { 8u64 } else { 2u64 };

        struct Pending {
            tag: u16,
            type_id: u16,
            count: u64,
            slot: Vec<u8>,
            aux: Vec<u8>,
        }

        let mut offset =
            base_offset + count_len + self.entries.len() as u64 * entry_len + slot_len as u64;
        let mut pending: Vec<Pending> = Vec::with_capacity(self.entries.len());
        let mut stripoffsets = None;

        // pass 1: convert tags to binary format, in ascending tag order
        for (&tag, entry) in self.entries.iter() {
            let Entry::Decoded { kind, value } = entry else {
                continue;
            };

            let (type_id, count, data) = if let TagValue::Ifd(sub) = value {
                let mut sub = sub.clone();
                let data = sub.to_bytes(offset)?;
                (Type::LONG.to_u16(), 1, data)
            } else {
                let data = (type_handler(*kind).write)(byte_order, value)?;
                let count = match kind {
                    Type::BYTE | Type::ASCII | Type::UNDEFINED => data.len() as u64,
                    _ => value.len() as u64,
                };
                (kind.to_u16(), count, data)
            };

            debug!(
                "save: {} ({}) - type: {} - {} bytes",
                tag_label(tag),
                tag,
                type_id,
                data.len()
            );

            if tag == Tag::StripOffsets.to_u16() {
                stripoffsets = Some(pending.len());
            }

            if data.len() <= slot_len {
                let mut slot = data;
                slot.resize(slot_len, 0);
                pending.push(Pending { tag, type_id, count, slot, aux: Vec::new() });
            } else {
                let mut slot = Vec::with_capacity(slot_len);
                if bigtiff {
                    byte_order.put_u64(&mut slot, offset);
                } else {
                    byte_order.put_u32(&mut slot, u32::try_from(offset)?);
                }
                offset += (data.len() as u64 + 1) / 2 * 2; // pad to word
                pending.push(Pending { tag, type_id, count, slot, aux: data });
            }
        }

        // update strip offset data to point beyond the auxiliary data
        if let Some(index) = stripoffsets {
            let entry = &mut pending[index];
            if let Some((kind, handler)) = type_handler_for(entry.type_id) {
                let encoded = if entry.aux.is_empty() {
                    &entry.slot[..usize::try_from(entry.count)? * handler.size]
                } else {
                    &entry.aux[..]
                };
                let offsets = (handler.load)(byte_order, encoded)?;
                let relocated: Vec<u64> = offsets
                    .to_u64_vec()?
                    .into_iter()
                    .map(|v| v + offset)
                    .collect();
                let data =
                    (handler.write)(byte_order, &TagValue::Long8(relocated).coerce(kind)?)?;
                if entry.aux.is_empty() {
                    entry.slot = data;
                    entry.slot.resize(slot_len, 0);
                } else {
                    entry.aux = data;
                }
            }
        }

        // pass 2: the entry table, the next-directory pointer (overwritten
        // later when chaining pages), then the auxiliary data
        let mut result = Vec::new();
        if bigtiff {
            byte_order.put_u64(&mut result, pending.len() as u64);
        } else {
            byte_order.put_u16(&mut result, u16::try_from(pending.len())?);
        }
        for entry in &pending {
            byte_order.put_u16(&mut result, entry.tag);
            byte_order.put_u16(&mut result, entry.type_id);
            if bigtiff {
                byte_order.put_u64(&mut result, entry.count);
            } else {
                byte_order.put_u32(&mut result, u32::try_from(entry.count)?);
            }
            result.extend_from_slice(&entry.slot);
        }
        if bigtiff {
            byte_order.put_u64(&mut result, 0);
        } else {
            byte_order.put_u32(&mut result, 0);
        }
        for entry in &pending {
            result.extend_from_slice(&entry.aux);
            if entry.aux.len() % 2 == 1 {
                result.push(0);
            }
        }

        Ok(result)
    }

    fn header_bytes(&self) -> Vec<u8> {
        let byte_order = self.byte_order;
        let mut header = Vec::with_capacity(16);
        header.extend_from_slice(byte_order.prefix());
        if self.bigtiff {
            byte_order.put_u16(&mut header, 43);
            byte_order.put_u16(&mut header, 8);
            byte_order.put_u16(&mut header, 0);
            byte_order.put_u64(&mut header, 16);
        } else {
            byte_order.put_u16(&mut header, 42);
            byte_order.put_u32(&mut header, 8);
        }
        header
    }

    /// Write the directory at the stream's current position, preceded by the
    /// container header when the stream is still at its start. Returns the
    /// offset just past the written bytes.
    pub fn save<W: Write + Seek>(&mut self, stream: &mut W) -> TiffResult<u64> {
        if stream.stream_position()? == 0 {
            // skip the header on subsequent pages
            stream.write_all(&self.header_bytes())?;
        }
        let offset = stream.stream_position()?;
        let bytes = self.to_bytes(offset)?;
        stream.write_all(&bytes)?;
        Ok(offset + bytes.len() as u64)
    }
}
