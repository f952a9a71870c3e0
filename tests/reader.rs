use std::io::Cursor;

use tiffdir::decoder::{Decoder, TileArgs};
use tiffdir::{TiffError, TiffFormatError, TiffUnsupportedError, UsageError};

/// Append one little-endian classic entry to `out`.
fn le_entry(out: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: [u8; 4]) {
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&kind.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&value);
}

fn le_long(n: u32) -> [u8; 4] {
    n.to_le_bytes()
}

fn le_short(n: u16) -> [u8; 4] {
    let b = n.to_le_bytes();
    [b[0], b[1], 0, 0]
}

/// A single-strip grayscale file: header, one directory, raw pixel bytes.
fn gray_strip_file(width: u32, height: u32, orientation: Option<u16>, pixels: &[u8]) -> Vec<u8> {
    let mut file = vec![0x49, 0x49, 0x2a, 0x00, 0x08, 0x00, 0x00, 0x00];
    let extra = usize::from(orientation.is_some());
    let entries = 9 + extra;
    let pixel_offset = (8 + 2 + entries * 12 + 4) as u32;

    file.extend_from_slice(&(entries as u16).to_le_bytes());
    le_entry(&mut file, 256, 4, 1, le_long(width));
    le_entry(&mut file, 257, 4, 1, le_long(height));
    le_entry(&mut file, 258, 3, 1, le_short(8));
    le_entry(&mut file, 259, 3, 1, le_short(1));
    le_entry(&mut file, 262, 3, 1, le_short(1));
    le_entry(&mut file, 273, 4, 1, le_long(pixel_offset));
    if let Some(orientation) = orientation {
        le_entry(&mut file, 274, 3, 1, le_short(orientation));
    }
    le_entry(&mut file, 277, 3, 1, le_short(1));
    le_entry(&mut file, 278, 4, 1, le_long(height));
    le_entry(&mut file, 279, 4, 1, le_long(pixels.len() as u32));
    file.extend_from_slice(&0u32.to_le_bytes()); // end of chain
    assert_eq!(file.len() as u32, pixel_offset);
    file.extend_from_slice(pixels);
    file
}

#[test]
fn classic_grayscale_strip_read() {
    let _ = env_logger::builder().is_test(true).try_init();
    let file = gray_strip_file(2, 2, None, &[0x00, 0x55, 0xAA, 0xFF]);
    let mut decoder = Decoder::new(Cursor::new(&file)).unwrap();
    assert!(!decoder.is_bigtiff());
    assert!(!decoder.is_animated());

    let image = decoder.image().unwrap();
    assert_eq!(image.mode, "L");
    assert_eq!(image.raw_mode, "L");
    assert_eq!(image.size, (2, 2));
    assert_eq!(image.compression, "raw");
    assert_eq!(image.tiles.len(), 1);

    let tile = &image.tiles[0];
    assert_eq!(tile.codec, "raw");
    assert_eq!(tile.bounds, (0, 0, 2, 2));
    assert_eq!(
        tile.args,
        TileArgs::Raw {
            raw_mode: "L".to_string(),
            stride: 0,
            orientation: 1,
        }
    );
    let at = tile.offset as usize;
    assert_eq!(&file[at..at + 4], &[0x00, 0x55, 0xAA, 0xFF]);
}

#[test]
fn transposing_orientation_swaps_the_logical_size() {
    let file = gray_strip_file(2, 3, Some(6), &[0; 6]);
    let mut decoder = Decoder::new(Cursor::new(&file)).unwrap();
    let image = decoder.image().unwrap();
    assert_eq!(image.size, (3, 2));
    assert_eq!(image.tile_size, (2, 3));
}

#[test]
fn non_transposing_orientation_keeps_the_size() {
    let file = gray_strip_file(2, 3, Some(3), &[0; 6]);
    let mut decoder = Decoder::new(Cursor::new(&file)).unwrap();
    let image = decoder.image().unwrap();
    assert_eq!(image.size, (2, 3));
}

/// A chain of minimal one-tag directories with chosen next pointers.
fn chained_file(next_pointers: &[Option<u32>]) -> (Vec<u8>, Vec<u32>) {
    let mut file = vec![0x49, 0x49, 0x2a, 0x00, 0x08, 0x00, 0x00, 0x00];
    let ifd_len = 2 + 12 + 4;
    let positions: Vec<u32> = (0..next_pointers.len())
        .map(|i| (8 + i * ifd_len) as u32)
        .collect();
    for (i, next) in next_pointers.iter().enumerate() {
        file.extend_from_slice(&1u16.to_le_bytes());
        le_entry(&mut file, 256, 4, 1, le_long(1));
        let next = match next {
            Some(index) => positions[*index as usize],
            None => 0,
        };
        file.extend_from_slice(&next.to_le_bytes());
    }
    (file, positions)
}

#[test]
fn cycle_in_next_pointer_terminates_the_chain() {
    // the second directory points back at the first
    let (file, _) = chained_file(&[Some(1), Some(0)]);
    let mut decoder = Decoder::new(Cursor::new(file)).unwrap();
    assert_eq!(decoder.n_frames().unwrap(), 2);
    assert_eq!(decoder.tell(), 0);
}

#[test]
fn self_referential_directory_is_a_single_frame() {
    let (file, _) = chained_file(&[Some(0)]);
    let mut decoder = Decoder::new(Cursor::new(file)).unwrap();
    assert_eq!(decoder.n_frames().unwrap(), 1);
}

#[test]
fn seek_walks_forward_and_back() {
    let (file, positions) = chained_file(&[Some(1), Some(2), None]);
    let mut decoder = Decoder::new(Cursor::new(file)).unwrap();
    assert!(decoder.is_animated());

    decoder.seek(2).unwrap();
    assert_eq!(decoder.tell(), 2);
    assert_eq!(decoder.ifd().base_offset(), Some(u64::from(positions[2])));

    decoder.seek(0).unwrap();
    assert_eq!(decoder.tell(), 0);
    assert_eq!(decoder.ifd().base_offset(), Some(u64::from(positions[0])));

    assert_eq!(decoder.n_frames().unwrap(), 3);
    // the probe restores the cursor
    assert_eq!(decoder.tell(), 0);
}

#[test]
fn seeking_past_the_end_fails() {
    let (file, _) = chained_file(&[None]);
    let mut decoder = Decoder::new(Cursor::new(file)).unwrap();
    assert!(matches!(
        decoder.seek(3),
        Err(TiffError::FormatError(
            TiffFormatError::ImageFileDirectoryNotFound
        ))
    ));
    // the decoder stays usable
    decoder.seek(0).unwrap();
}

#[test]
fn implausible_next_offset_is_rejected() {
    // BigTIFF so the pointer field is wide enough to hold the bad value
    let mut file = vec![0x49, 0x49, 0x2b, 0x00, 0x08, 0x00, 0x00, 0x00];
    file.extend_from_slice(&16u64.to_le_bytes());
    file.extend_from_slice(&1u64.to_le_bytes()); // one entry
    file.extend_from_slice(&256u16.to_le_bytes());
    file.extend_from_slice(&4u16.to_le_bytes());
    file.extend_from_slice(&1u64.to_le_bytes());
    file.extend_from_slice(&1u64.to_le_bytes()); // width value
    file.extend_from_slice(&(1u64 << 63).to_le_bytes()); // next

    let mut decoder = Decoder::new(Cursor::new(file)).unwrap();
    assert!(decoder.is_bigtiff());
    assert_eq!(decoder.ifd().base_offset(), Some(16));
    assert!(matches!(
        decoder.seek(1),
        Err(TiffError::UsageError(UsageError::SeekOutOfRange(_)))
    ));
}

#[test]
fn tolerated_invalid_magic_still_opens() {
    // II with the magic bytes swapped, as written by some broken encoders
    let (mut file, _) = chained_file(&[None]);
    file[2] = 0x00;
    file[3] = 0x2a;
    let decoder = Decoder::new(Cursor::new(file)).unwrap();
    assert!(!decoder.is_bigtiff());
}

#[test]
fn unknown_compression_code_is_unsupported() {
    let mut file = gray_strip_file(2, 2, None, &[0; 4]);
    // the Compression entry value sits in the fourth entry
    let at = 8 + 2 + 3 * 12 + 8;
    file[at..at + 2].copy_from_slice(&9999u16.to_le_bytes());
    let mut decoder = Decoder::new(Cursor::new(&file)).unwrap();
    assert!(matches!(
        decoder.image(),
        Err(TiffError::UnsupportedError(
            TiffUnsupportedError::UnknownCompressionMethod(9999)
        ))
    ));
}

#[test]
fn windows_media_photo_is_rejected() {
    let mut file = vec![0x49, 0x49, 0x2a, 0x00, 0x08, 0x00, 0x00, 0x00];
    file.extend_from_slice(&1u16.to_le_bytes());
    le_entry(&mut file, 0xBC01, 3, 1, le_short(1));
    file.extend_from_slice(&0u32.to_le_bytes());
    let mut decoder = Decoder::new(Cursor::new(file)).unwrap();
    assert!(matches!(
        decoder.image(),
        Err(TiffError::UnsupportedError(
            TiffUnsupportedError::WindowsMediaPhoto
        ))
    ));
}

#[test]
fn compressed_frames_become_one_whole_image_tile() {
    let mut file = gray_strip_file(2, 2, None, &[0; 4]);
    // flip Compression to LZW
    let at = 8 + 2 + 3 * 12 + 8;
    file[at..at + 2].copy_from_slice(&5u16.to_le_bytes());
    let mut decoder = Decoder::new(Cursor::new(&file)).unwrap();
    let image = decoder.image().unwrap();
    assert_eq!(image.compression, "tiff_lzw");
    assert_eq!(image.tiles.len(), 1);
    let tile = &image.tiles[0];
    assert_eq!(tile.codec, "libtiff");
    assert_eq!(tile.bounds, (0, 0, 2, 2));
    assert_eq!(
        tile.args,
        TileArgs::Libtiff {
            raw_mode: "L".to_string(),
            compression: "tiff_lzw",
            base_offset: 8,
        }
    );
}
