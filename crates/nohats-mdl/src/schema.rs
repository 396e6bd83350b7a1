//! Studio model layouts.
//!
//! Only the leading part of the header is described: the fields after
//! `localnodenameindex` moved between engine versions. Records inside the
//! file address their strings and sub-arrays relative to their own start.

use nohats_binary::{
    factory, Array, BasePointer, Error as BinaryError, Fields, FixedString, Format, Magic, Offset,
    Pointer, Relative, RelativeString, Result, Scalar, Struct,
};

pub const SIGNATURE: &[u8] = b"IDST";

/// Byte size of the described header.
pub const HEADER_LEN: u64 = 260;

/// Byte size of a local sequence record.
pub const SEQUENCE_LEN: u64 = 212;

fn vec3() -> Format {
    Format::vector(Scalar::F32, 3)
}

/// A `(count, offset)` pair kept opaque.
fn pair() -> Format {
    Format::vector(Scalar::U32, 2)
}

fn position(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| BinaryError::contract(format!("negative offset {}", value)))
}

pub fn mdl_layout(f: &mut Fields<'_>) -> Result<()> {
    f.add("magic", Magic::new(SIGNATURE))?;
    f.add("version", Format::u32())?;
    f.add("checksum", Format::u32())?;
    f.add("name", FixedString::new(64))?;
    f.add("datalength", Format::u32())?;

    f.add("eyepos", vec3())?;
    f.add("illum", vec3())?;
    f.add("hull_min", vec3())?;
    f.add("hull_max", vec3())?;
    f.add("view_bbmin", vec3())?;
    f.add("view_bbmax", vec3())?;

    f.add("flags", Format::u32())?;

    f.add("bone", pair())?;
    f.add("bonecontroller", pair())?;
    f.add("hitbox", pair())?;

    f.add("numlocalanim", Format::u32())?;
    f.add("localanimoffset", Format::u32())?;

    let sequences = f.add("numlocalsequence", Format::u32())?.value().to_usize()?;
    let sequence_offset = f.add("localsequenceoffset", Format::u32())?.value().to_u64()?;

    f.add("texture", pair())?;
    f.add("cdtexture", pair())?;
    f.add("unknown", pair())?;

    let refs = f.add("numskinref", Format::u32())?.value().to_usize()?;
    let families = f.add("numskinfamilies", Format::u32())?.value().to_usize()?;
    let skin_offset = f.add("skinindex", Format::u32())?.value().to_u64()?;

    f.add("bodypart", pair())?;
    f.add("localattachment", pair())?;

    f.add("numlocalnodes", Format::u32())?;
    f.add("localnodeindex", Format::u32())?;
    f.add("localnodenameindex", Format::u32())?;

    f.add(
        "localsequence",
        Pointer::new(sequence_offset, Array::fixed(sequences, factory(|_| local_sequence()))),
    )?;
    // Families of zero references occupy no bytes; don't materialize them.
    let families = if refs == 0 { 0 } else { families };
    let family = move |_: usize| Array::fixed(refs, factory(|_| Format::i16()));
    f.add("skin", Pointer::new(skin_offset, Array::fixed(families, factory(family))))?;
    Ok(())
}

/// `mstudioseqdesc_t`.
pub fn local_sequence() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        let base = Offset::new();
        let at = base.marker();
        f.add("base", base)?;
        f.add("baseptr", BasePointer::new(at.clone()))?;
        f.add("labelindex", RelativeString::new(at.clone()))?;
        f.add("activitynameindex", RelativeString::new(at.clone()))?;
        f.add("flags", Format::u32())?;
        f.add("activity", Format::i32())?;
        f.add("actweight", Format::u32())?;
        f.add("numevents", Format::u32())?;
        f.add("eventindex", Relative::new(at.clone()))?;
        f.add("bbmin", vec3())?;
        f.add("bbmax", vec3())?;
        f.add("numblends", Format::u32())?;
        f.add("animindex", Relative::new(at.clone()))?;
        f.add("movementindex", Relative::new(at.clone()))?;
        f.add("groupsize", Format::vector(Scalar::U32, 2))?;
        f.add("paramindex", Format::vector(Scalar::I32, 2))?;
        f.add("paramstart", Format::vector(Scalar::F32, 2))?;
        f.add("paramend", Format::vector(Scalar::F32, 2))?;
        f.add("paramparent", Format::u32())?;
        f.add("fadeintime", Format::f32())?;
        f.add("fadeouttime", Format::f32())?;
        f.add("localentrynode", Format::u32())?;
        f.add("localexitnode", Format::u32())?;
        f.add("nodeflags", Format::u32())?;
        f.add("entryphase", Format::f32())?;
        f.add("exitphase", Format::f32())?;
        f.add("lastframe", Format::f32())?;
        f.add("nextseq", Format::u32())?;
        f.add("pose", Format::u32())?;
        f.add("numikrules", Format::u32())?;
        f.add("numautolayers", Format::u32())?;
        f.add("autolayerindex", Relative::new(at.clone()))?;
        f.add("weightlistindex", Relative::new(at.clone()))?;
        f.add("posekeyindex", Relative::new(at.clone()))?;
        f.add("numiklocks", Format::u32())?;
        f.add("iklockindex", Format::u32())?;
        f.add("keyvalueindex", Relative::new(at.clone()))?;
        f.add("keyvaluesize", Format::u32())?;
        f.add("cycleposeindex", Relative::new(at.clone()))?;
        let modifiers_at = f.add("activitymodifierindex", Relative::new(at))?.value().to_i64()?;
        let modifiers = f.add("numactivitymodifier", Format::u32())?.value().to_usize()?;
        f.add("unused", Format::vector(Scalar::U32, 5))?;

        f.add(
            "activitymodifier",
            Pointer::new(
                position(modifiers_at)?,
                Array::fixed(modifiers, factory(|_| activity_modifier())),
            ),
        )?;
        Ok(())
    })
}

/// `mstudioactivitymodifier_t`: a single relative name.
pub fn activity_modifier() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        let base = Offset::new();
        let at = base.marker();
        f.add("base", base)?;
        f.add("szindex", RelativeString::new(at))?;
        Ok(())
    })
}

/// `mstudioanimdesc_t`. Not reachable from the header; decode it at
/// `localanimoffset` when needed.
pub fn local_anim() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        let base = Offset::new();
        let at = base.marker();
        f.add("base", base)?;
        f.add("baseptr", BasePointer::new(at.clone()))?;
        f.add("nameindex", RelativeString::new(at.clone()))?;
        f.add("fps", Format::f32())?;
        f.add("flags", Format::u32())?;
        f.add("numframes", Format::u32())?;
        f.add("nummovements", Format::u32())?;
        f.add("movementindex", Relative::new(at.clone()))?;
        f.add("unused", Format::vector(Scalar::U32, 6))?;
        f.add("animblock", Format::i32())?;
        f.add("animindex", Relative::new(at.clone()))?;
        f.add("numikrules", Format::u32())?;
        f.add("ikruleindex", Relative::new(at.clone()))?;
        f.add("animblockikruleindex", Relative::new(at.clone()))?;
        f.add("numlocalhierarchy", Format::u32())?;
        f.add("localhierarchyindex", Relative::new(at.clone()))?;
        f.add("sectionindex", Relative::new(at.clone()))?;
        f.add("sectionframes", Format::u32())?;
        f.add("zeroframespan", Format::i16())?;
        f.add("zeroframecount", Format::i16())?;
        f.add("zeroframeindex", Relative::new(at))?;
        f.add("zeroframestalltime", Format::f32())?;
        Ok(())
    })
}

/// `mstudioevent_t`.
pub fn event() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        let base = Offset::new();
        let at = base.marker();
        f.add("base", base)?;
        f.add("cycle", Format::f32())?;
        f.add("event", Format::u32())?;
        f.add("type", Format::u32())?;
        f.add("options", FixedString::new(64))?;
        f.add("szeventindex", RelativeString::new(at))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nohats_binary::{encode_bytes, ByteStream, Field, Stream, Value};

    #[test]
    fn test_event_name_follows_record() {
        let mut data = Vec::new();
        data.extend_from_slice(&0.5f32.to_le_bytes());
        data.extend_from_slice(&5004u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        let mut options = b"hit".to_vec();
        options.resize(64, 0);
        data.extend(options);
        data.extend_from_slice(&80i32.to_le_bytes());
        data.extend_from_slice(b"AE_CL_PLAYSOUND\0");

        let mut e = event();
        let mut s = ByteStream::new(data.clone());
        e.decode(&mut s).unwrap();
        assert_eq!(s.tell(), 80);
        let v = e.value();
        assert_eq!(v.member("options").unwrap().as_str().unwrap(), "hit");
        assert_eq!(
            v.member("szeventindex").unwrap(),
            &Value::List(vec![Value::Int(80), Value::from("AE_CL_PLAYSOUND")])
        );
        assert_eq!(encode_bytes(&mut e).unwrap(), data[..80].to_vec());
    }

    #[test]
    fn test_local_anim_record() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&(-8i32).to_le_bytes());
        data.extend_from_slice(&100i32.to_le_bytes());
        data.extend_from_slice(&30.0f32.to_le_bytes());
        data.resize(8 + 100, 0);
        data.extend_from_slice(b"idle\0");

        let mut anim = local_anim();
        let mut s = ByteStream::new(data.clone());
        s.seek(8).unwrap();
        anim.decode(&mut s).unwrap();
        assert_eq!(s.tell(), 8 + 100);
        let v = anim.value();
        assert_eq!(v.member("fps").unwrap(), &Value::Float(30.0));
        assert_eq!(v.member("nameindex").unwrap().at(1).unwrap().as_str().unwrap(), "idle");
        // A zero delta stays zero rather than pointing at the record.
        assert_eq!(v.member("animindex").unwrap(), &Value::Int(0));

        let mut out = ByteStream::new(data.clone());
        out.seek(8).unwrap();
        anim.encode(&mut out).unwrap();
        assert_eq!(out.into_inner(), data);
    }
}
