//! VSIF scene image layout.
//!
//! The header points at a string table and a scene directory. Each scene
//! entry points at a summary (duration and sounds) and an LZMA-compressed
//! compiled scene.

use nohats_binary::{
    factory, Array, Compressed, DataPointer, Error as BinaryError, Fields, Format, Index, Magic,
    NulString, Pointer, Rest, Result, SizeField, SizeLink, Struct, Table,
};

pub const SIGNATURE: &[u8] = b"VSIF";

pub const VERSION: u64 = 3;

/// Method tag of a compressed scene.
pub const LZMA: &[u8] = b"LZMA";

fn scene_summary(strings: Table) -> Struct {
    Struct::new(move |f: &mut Fields<'_>| {
        f.add("milliseconds", Format::u32())?;
        f.add("milliseconds_2", Format::u32())?;
        let strings = strings.clone();
        f.add(
            "sounds",
            Array::prefixed(
                Format::u32(),
                factory(move |_| Index::new(strings.clone(), Format::u32())),
            ),
        )?;
        Ok(())
    })
}

/// An LZMA-alone payload with both sizes in front of it.
pub fn scene() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("method", Magic::new(LZMA))?;
        let unpacked = SizeLink::new();
        let packed = SizeLink::new();
        f.add("uncompressed_size", SizeField::new(Format::u32(), unpacked.clone()))?;
        f.add("compressed_size", SizeField::new(Format::u32(), packed.clone()))?;
        f.add(
            "scene_data",
            Compressed::lzma(Rest::new())
                .with_unpacked_size(unpacked, 0)
                .with_packed_size(packed),
        )?;
        Ok(())
    })
}

fn scene_entry(strings: Table) -> Struct {
    Struct::new(move |f: &mut Fields<'_>| {
        f.add("namecrc", Format::u32())?;
        let offset = f.add("offset", Format::u32())?.value().to_u64()?;
        f.add("length", Format::u32())?;
        f.add(
            "scenesummary",
            DataPointer::new(Format::u32(), scene_summary(strings.clone())),
        )?;
        f.add("scene", Pointer::new(offset, scene()))?;
        Ok(())
    })
}

pub fn vsif_layout(f: &mut Fields<'_>) -> Result<()> {
    f.add("magic", Magic::new(SIGNATURE))?;
    let version = f.add("version", Format::u32())?.value().to_u64()?;
    if version != VERSION {
        return Err(BinaryError::mismatch("vsif version", VERSION, version));
    }
    let scenes = f.add("nscenes", Format::u32())?.value().to_usize()?;
    let strings = f.add("nstrings", Format::u32())?.value().to_usize()?;
    let scenes_at = f.add("scenesoffset", Format::u32())?.value().to_u64()?;

    let table = Table::dependent(
        strings,
        factory(|_| DataPointer::new(Format::u32(), NulString::new())),
    );
    f.add("strings", table.clone())?;
    f.add(
        "scenes",
        Pointer::new(
            scenes_at,
            Array::fixed(scenes, factory(move |_| scene_entry(table.clone()))),
        ),
    )?;
    Ok(())
}
