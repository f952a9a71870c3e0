use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use tiffdir::decoder::Decoder;
use tiffdir::encoder::{prepare_page, AppendingTiffWriter, EncodeOptions};
use tiffdir::tags::{Tag, Type};

/// Write one grayscale page through the appending writer: the directory,
/// then the raster bytes at the relocated strip position.
fn append_gray_page<W: Read + Write + Seek>(
    writer: &mut AppendingTiffWriter<W>,
    size: (u32, u32),
    shade: u8,
    options: &EncodeOptions,
) {
    let mut page = prepare_page("L", size, options).unwrap();
    let end = page.ifd.save(writer).unwrap();
    assert_eq!(writer.stream_position().unwrap(), end);
    let pixels = vec![shade; (size.0 * size.1) as usize];
    writer.write_all(&pixels).unwrap();
    writer.new_frame().unwrap();
}

/// Walk the next-directory chain by hand, returning each visited offset.
fn walk_chain(file: &[u8]) -> Vec<u64> {
    assert_eq!(&file[..4], b"II\x2a\x00");
    let mut offsets = Vec::new();
    let mut at = u32::from_le_bytes(file[4..8].try_into().unwrap()) as u64;
    while at != 0 {
        assert!(
            !offsets.contains(&at),
            "chain revisits directory at {}",
            at
        );
        offsets.push(at);
        let entries = u16::from_le_bytes(file[at as usize..][..2].try_into().unwrap());
        let next_at = at as usize + 2 + usize::from(entries) * 12;
        at = u32::from_le_bytes(file[next_at..][..4].try_into().unwrap()) as u64;
    }
    offsets
}

#[test]
fn appended_pages_chain_in_insertion_order() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut file = Cursor::new(Vec::new());
    {
        let mut writer = AppendingTiffWriter::new(&mut file).unwrap();
        for shade in [0u8, 0x7f, 0xff] {
            append_gray_page(&mut writer, (2, 2), shade, &EncodeOptions::default());
        }
        writer.close().unwrap();
    }

    let bytes = file.get_ref().clone();
    let chain = walk_chain(&bytes);
    assert_eq!(chain.len(), 3);
    // later pages start on a 16 byte boundary, their directory 8 bytes in
    assert_eq!(chain[1] % 16, 8);
    assert_eq!(chain[2] % 16, 8);

    file.set_position(0);
    let mut decoder = Decoder::new(&mut file).unwrap();
    assert_eq!(decoder.n_frames().unwrap(), 3);
    assert!(decoder.is_animated());

    for (frame, shade) in [0u8, 0x7f, 0xff].into_iter().enumerate() {
        decoder.seek(frame).unwrap();
        let image = decoder.image().unwrap();
        assert_eq!(image.mode, "L");
        assert_eq!(image.size, (2, 2));
        let at = image.tiles[0].offset as usize;
        assert_eq!(&bytes[at..at + 4], &[shade; 4]);
    }
}

#[test]
fn abandoned_page_leaves_the_file_valid() {
    let mut file = Cursor::new(Vec::new());
    {
        let mut writer = AppendingTiffWriter::new(&mut file).unwrap();
        append_gray_page(&mut writer, (2, 2), 0x42, &EncodeOptions::default());
        // a new page was prepared but never written; dropping the writer
        // must not disturb the chain
    }

    file.set_position(0);
    let mut decoder = Decoder::new(&mut file).unwrap();
    assert_eq!(decoder.n_frames().unwrap(), 1);
}

#[test]
fn short_strip_offset_promotes_to_long_on_relocation() {
    let mut file = tempfile::tempfile().unwrap();
    {
        let mut writer = AppendingTiffWriter::new(&mut file).unwrap();
        append_gray_page(&mut writer, (2, 2), 0, &EncodeOptions::default());
        writer.close().unwrap();
    }

    // stretch the file so the next page lands past the SHORT range
    file.seek(SeekFrom::Start(70_000)).unwrap();
    file.write_all(&[0]).unwrap();

    let relative_offset;
    {
        let mut writer = AppendingTiffWriter::new(&mut file).unwrap();
        let page_base = writer.offset_of_new_page();
        assert_eq!(page_base, 70_016);

        let mut ifd = tiffdir::Ifd::new(tiffdir::ByteOrder::LittleEndian, false);
        ifd.set(Tag::ImageWidth.to_u16(), 1u32).unwrap();
        ifd.set_typed(Tag::StripOffsets.to_u16(), Type::SHORT, 100u64)
            .unwrap();
        let end = ifd.save(&mut writer).unwrap();
        relative_offset = 100 + end; // the serializer relocated the value
        writer.close().unwrap();
    }

    // the directory lives at page base + 8; StripOffsets is its second entry
    let entry = 70_016 + 8 + 2 + 12;
    let mut buf = [0u8; 12];
    file.seek(SeekFrom::Start(entry)).unwrap();
    file.read_exact(&mut buf).unwrap();
    assert_eq!(u16::from_le_bytes(buf[0..2].try_into().unwrap()), 273);
    // SHORT was widened to LONG, the count is untouched
    assert_eq!(u16::from_le_bytes(buf[2..4].try_into().unwrap()), 4);
    assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 1);
    assert_eq!(
        u64::from(u32::from_le_bytes(buf[8..12].try_into().unwrap())),
        70_016 + relative_offset
    );

    // both pages still walk
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut decoder = Decoder::new(&mut file).unwrap();
    assert_eq!(decoder.n_frames().unwrap(), 2);
    decoder.seek(1).unwrap();
    assert_eq!(
        decoder.ifd_mut().get_u64_vec(Tag::StripOffsets.to_u16()).unwrap(),
        Some(vec![70_016 + relative_offset])
    );
}

#[test]
fn bigtiff_long_offset_promotes_to_long8_on_relocation() {
    let options = EncodeOptions {
        big_tiff: true,
        ..Default::default()
    };

    let mut file = tempfile::tempfile().unwrap();
    {
        let mut writer = AppendingTiffWriter::new(&mut file).unwrap();
        append_gray_page(&mut writer, (1, 1), 0x10, &options);
        writer.close().unwrap();
    }

    // grow a hole so the second page begins past 2^32
    file.seek(SeekFrom::Start((1 << 32) + 5)).unwrap();
    file.write_all(&[0]).unwrap();

    let page_base;
    let relative_offset;
    {
        let mut writer = AppendingTiffWriter::new(&mut file).unwrap();
        assert!(writer.is_bigtiff());
        page_base = writer.offset_of_new_page();
        assert_eq!(page_base, (1 << 32) + 16);

        let mut page = prepare_page("L", (1, 1), &options).unwrap();
        let end = page.ifd.save(&mut writer).unwrap();
        relative_offset = end; // the single strip begins right after the IFD
        writer.write_all(&[0x20]).unwrap();
        writer.close().unwrap();
    }

    // find the StripOffsets entry of the second page's directory
    let ifd_at = page_base + 16;
    let mut count_buf = [0u8; 8];
    file.seek(SeekFrom::Start(ifd_at)).unwrap();
    file.read_exact(&mut count_buf).unwrap();
    let entries = u64::from_le_bytes(count_buf);
    let mut found = false;
    for index in 0..entries {
        let at = ifd_at + 8 + index * 20;
        let mut entry = [0u8; 20];
        file.seek(SeekFrom::Start(at)).unwrap();
        file.read_exact(&mut entry).unwrap();
        if u16::from_le_bytes(entry[0..2].try_into().unwrap()) != 273 {
            continue;
        }
        found = true;
        // LONG was widened to LONG8, the count is untouched, the offset
        // field now spans the full 8 byte slot
        assert_eq!(
            u16::from_le_bytes(entry[2..4].try_into().unwrap()),
            Type::LONG8.to_u16()
        );
        assert_eq!(u64::from_le_bytes(entry[4..12].try_into().unwrap()), 1);
        let stored = u64::from_le_bytes(entry[12..20].try_into().unwrap());
        assert_eq!(stored, page_base + relative_offset);
        assert!(stored >= 1 << 32);
    }
    assert!(found, "no StripOffsets entry in the appended page");

    // and the whole file still round-trips
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut decoder = Decoder::new(&mut file).unwrap();
    assert!(decoder.is_bigtiff());
    assert_eq!(decoder.n_frames().unwrap(), 2);
    decoder.seek(1).unwrap();
    assert_eq!(decoder.ifd().base_offset(), Some(ifd_at));
    assert_eq!(
        decoder.ifd_mut().get_u64_vec(Tag::StripOffsets.to_u16()).unwrap(),
        Some(vec![page_base + relative_offset])
    );

    let mut pixel = [0u8; 1];
    file.seek(SeekFrom::Start(page_base + relative_offset)).unwrap();
    file.read_exact(&mut pixel).unwrap();
    assert_eq!(pixel[0], 0x20);
}

#[test]
fn multi_valued_offset_promotion_is_a_defined_error() {
    let mut file = tempfile::tempfile().unwrap();
    {
        let mut writer = AppendingTiffWriter::new(&mut file).unwrap();
        append_gray_page(&mut writer, (2, 2), 0, &EncodeOptions::default());
        writer.close().unwrap();
    }

    file.seek(SeekFrom::Start(70_000)).unwrap();
    file.write_all(&[0]).unwrap();

    let mut writer = AppendingTiffWriter::new(&mut file).unwrap();
    let mut ifd = tiffdir::Ifd::new(tiffdir::ByteOrder::LittleEndian, false);
    ifd.set(Tag::ImageWidth.to_u16(), 1u32).unwrap();
    // two SHORT offsets fit the inline slot but cannot be widened there
    ifd.set_typed(Tag::StripOffsets.to_u16(), Type::SHORT, vec![100u64, 200])
        .unwrap();
    ifd.save(&mut writer).unwrap();
    assert!(matches!(
        writer.finalize(),
        Err(tiffdir::TiffError::UnsupportedError(
            tiffdir::TiffUnsupportedError::MultiValueOffsetPromotion
        ))
    ));
}
