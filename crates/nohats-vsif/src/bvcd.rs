//! Compiled choreography scenes (`bvcd`).
//!
//! Names in a compiled scene are 16-bit indices into the string table of
//! the scene image that holds it, so the layout takes that table.

use nohats_binary::{
    factory, Array, Error as BinaryError, Field, Fields, Flags, Format, Index, Magic, Mapping,
    Rest, Result, Scalar, Scaled, Struct, Table,
};

pub const SIGNATURE: &[u8] = b"bvcd";

pub const VERSION: u64 = 4;

pub const EVENT_TYPES: &[&str] = &[
    "unspecified",
    "section",
    "expression",
    "lookat",
    "moveto",
    "speak",
    "gesture",
    "sequence",
    "face",
    "firetrigger",
    "flexanimation",
    "subscene",
    "loop",
    "interrupt",
    "stoppoint",
    "permitresponses",
    "generic",
];

pub const EVENT_FLAGS: &[(u64, &str)] = &[
    (0x01, "resumecondition"),
    (0x02, "lockbodyfacing"),
    (0x04, "fixedlength"),
    (0x08, "inactive"),
    (0x10, "forceshortmovement"),
    (0x20, "playoverscript"),
];

pub const CC_FLAGS: &[(u64, &str)] = &[
    (0x01, "cc_usingcombinedfile"),
    (0x02, "cc_combinedusesgender"),
    (0x04, "cc_noattenuate"),
];

pub const CURVE_TYPES: &[&str] = &[
    "default",
    "catmullrom_normalize_x",
    "easein",
    "easeout",
    "easeinout",
    "bspline",
    "linear_interp",
    "kochanek",
    "kochanek_early",
    "kochanek_late",
    "simple_cubic",
    "catmullrom",
    "catmullrom_normalize",
    "catmullrom_tangent",
    "exponential_decay",
    "hold",
];

pub const TRACK_FLAGS: &[(u64, &str)] = &[(0x01, "disabled"), (0x02, "combo")];

fn name(strings: &Table) -> Index {
    Index::new(strings.clone(), Format::u16())
}

fn has_flag(field: &dyn Field, flag: &str) -> Result<bool> {
    Ok(field.value().as_list()?.iter().any(|v| v.as_str().ok() == Some(flag)))
}

fn ramp() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("p", Format::f32())?;
        f.add("t", Scaled::new(Format::f32(), 255.0))?;
        Ok(())
    })
}

fn flex_sample() -> Struct {
    Struct::new(|f: &mut Fields<'_>| {
        f.add("p", Format::f32())?;
        f.add("t", Scaled::new(Format::f32(), 255.0))?;
        f.add("from_type", Mapping::new(Format::u8(), CURVE_TYPES))?;
        f.add("to_type", Mapping::new(Format::u8(), CURVE_TYPES))?;
        Ok(())
    })
}

fn flex_track(strings: Table) -> Struct {
    Struct::new(move |f: &mut Fields<'_>| {
        f.add("name", name(&strings))?;
        let combo = has_flag(f.add("flags", Flags::new(Format::u8(), TRACK_FLAGS))?, "combo")?;
        f.add("range", Format::vector(Scalar::F32, 2))?;
        f.add("samples", Array::prefixed(Format::u16(), factory(|_| flex_sample())))?;
        if combo {
            f.add("combo_samples", Array::prefixed(Format::u16(), factory(|_| flex_sample())))?;
        }
        Ok(())
    })
}

/// A `(name, parameter)` pair with a caller-chosen parameter field.
fn tags<P: Field + 'static>(strings: &Table, param: fn() -> P) -> Array {
    let strings = strings.clone();
    Array::prefixed(
        Format::u8(),
        factory(move |_| {
            let strings = strings.clone();
            Struct::new(move |f: &mut Fields<'_>| {
                f.add("name", name(&strings))?;
                f.add("param", param())?;
                Ok(())
            })
        }),
    )
}

fn event(strings: Table) -> Struct {
    Struct::new(move |f: &mut Fields<'_>| {
        let kind = f
            .add("type", Mapping::new(Format::u8(), EVENT_TYPES))?
            .value()
            .as_str()?
            .to_string();
        f.add("name", name(&strings))?;
        f.add("time", Format::vector(Scalar::F32, 2))?;
        let params = strings.clone();
        f.add("params", Array::fixed(3, factory(move |_| name(&params))))?;
        f.add("ramp", Array::prefixed(Format::u8(), factory(|_| ramp())))?;
        f.add("flags", Flags::new(Format::u8(), EVENT_FLAGS))?;
        f.add("distancetotarget", Format::f32())?;
        f.add("tags", tags(&strings, || Scaled::new(Format::u8(), 255.0)))?;
        f.add("flextimingtags", tags(&strings, || Scaled::new(Format::u8(), 255.0)))?;
        f.add("shifted_time", tags(&strings, || Scaled::new(Format::u16(), 4096.0)))?;
        f.add("playback_time", tags(&strings, || Scaled::new(Format::u16(), 4096.0)))?;
        if kind == "gesture" {
            f.add("sequenceduration", Format::f32())?;
        }
        let relative = strings.clone();
        f.add(
            "relativetag",
            Array::prefixed(
                Format::u8(),
                factory(move |_| {
                    let strings = relative.clone();
                    Struct::new(move |f: &mut Fields<'_>| {
                        f.add("name", name(&strings))?;
                        f.add("param", name(&strings))?;
                        Ok(())
                    })
                }),
            ),
        )?;
        let tracks = strings.clone();
        f.add(
            "flex",
            Array::prefixed(Format::u8(), factory(move |_| flex_track(tracks.clone()))),
        )?;
        if kind == "loop" {
            f.add("loopcount", Format::u8())?;
        }
        if kind == "speak" {
            f.add("cctype", Format::u8())?;
            f.add("cctoken", name(&strings))?;
            f.add("ccflags", Flags::new(Format::u8(), CC_FLAGS))?;
        }
        Ok(())
    })
}

/// Layout of a compiled scene whose names index `strings`.
///
/// Events are decoded; the actor list that follows them is kept raw.
pub fn bvcd(strings: Table) -> Struct {
    Struct::new(move |f: &mut Fields<'_>| {
        f.add("magic", Magic::new(SIGNATURE))?;
        let version = f.add("version", Format::u8())?.value().to_u64()?;
        if version != VERSION {
            return Err(BinaryError::mismatch("bvcd version", VERSION, version));
        }
        f.add("unknown", Format::u32())?;
        let events = strings.clone();
        f.add(
            "events",
            Array::prefixed(Format::u8(), factory(move |_| event(events.clone()))),
        )?;
        f.add("trailer", Rest::new())?;
        Ok(())
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nohats_binary::{decode_bytes, encode_bytes, DataPointer, NulString, Value};

    /// A speak event named "laugh" with one ramp point, one tag and one
    /// combo flex track, against strings `["Hero.Laugh", "laugh"]`.
    pub(crate) fn sample_bvcd() -> Vec<u8> {
        let mut d = b"bvcd".to_vec();
        d.push(4);
        d.extend_from_slice(&0u32.to_le_bytes());
        d.push(1);

        d.push(5);
        d.extend_from_slice(&1u16.to_le_bytes());
        d.extend_from_slice(&0.0f32.to_le_bytes());
        d.extend_from_slice(&1.5f32.to_le_bytes());
        for p in [0u16, 1, 1] {
            d.extend_from_slice(&p.to_le_bytes());
        }
        d.push(1);
        d.extend_from_slice(&0.5f32.to_le_bytes());
        d.extend_from_slice(&255.0f32.to_le_bytes());
        d.push(0x04);
        d.extend_from_slice(&0.0f32.to_le_bytes());
        d.push(1);
        d.extend_from_slice(&1u16.to_le_bytes());
        d.push(255);
        d.extend_from_slice(&[0, 0, 0, 0]);

        d.push(1);
        d.extend_from_slice(&0u16.to_le_bytes());
        d.push(0x02);
        d.extend_from_slice(&0.0f32.to_le_bytes());
        d.extend_from_slice(&1.0f32.to_le_bytes());
        d.extend_from_slice(&1u16.to_le_bytes());
        d.extend_from_slice(&0.25f32.to_le_bytes());
        d.extend_from_slice(&0.0f32.to_le_bytes());
        d.push(0);
        d.push(7);
        d.extend_from_slice(&0u16.to_le_bytes());

        d.push(1);
        d.extend_from_slice(&0u16.to_le_bytes());
        d.push(0x05);

        // actors
        d.push(0);
        d
    }

    fn strings() -> Table {
        let table = Table::dependent(2, factory(|_| DataPointer::new(Format::u32(), NulString::new())));
        table.append_value(Value::from("Hero.Laugh")).unwrap();
        table.append_value(Value::from("laugh")).unwrap();
        table
    }

    #[test]
    fn test_decode_speak_event() {
        let raw = sample_bvcd();
        let mut scene = bvcd(strings());
        decode_bytes(&mut scene, &raw).unwrap();
        let v = scene.value();
        let e = v.member("events").unwrap().at(0).unwrap();
        assert_eq!(e.member("type").unwrap().as_str().unwrap(), "speak");
        assert_eq!(e.member("name").unwrap().as_str().unwrap(), "laugh");
        assert_eq!(
            e.member("params").unwrap(),
            &Value::List(vec!["Hero.Laugh".into(), "laugh".into(), "laugh".into()])
        );
        assert_eq!(e.member("flags").unwrap(), &Value::List(vec!["fixedlength".into()]));
        let ramp = e.member("ramp").unwrap().at(0).unwrap();
        assert_eq!(ramp.member("t").unwrap(), &Value::Float(1.0));
        let tag = e.member("tags").unwrap().at(0).unwrap();
        assert_eq!(tag.member("param").unwrap(), &Value::Float(1.0));

        let track = e.member("flex").unwrap().at(0).unwrap();
        assert_eq!(track.member("name").unwrap().as_str().unwrap(), "Hero.Laugh");
        assert!(track.get("combo_samples").is_some());
        let sample = track.member("samples").unwrap().at(0).unwrap();
        assert_eq!(sample.member("to_type").unwrap().as_str().unwrap(), "kochanek");

        assert_eq!(e.member("cctoken").unwrap().as_str().unwrap(), "Hero.Laugh");
        assert_eq!(
            e.member("ccflags").unwrap(),
            &Value::List(vec!["cc_usingcombinedfile".into(), "cc_noattenuate".into()])
        );
        assert!(e.get("loopcount").is_none());
        assert_eq!(v.member("trailer").unwrap(), &Value::bytes(vec![0]));

        assert_eq!(encode_bytes(&mut scene).unwrap(), raw);
    }

    #[test]
    fn test_version_and_names_checked() {
        let mut raw = sample_bvcd();
        raw[4] = 3;
        assert!(matches!(
            decode_bytes(&mut bvcd(strings()), &raw),
            Err(BinaryError::FormatMismatch { .. })
        ));

        let mut raw = sample_bvcd();
        // Event name index past the two strings.
        raw[11] = 9;
        assert!(matches!(
            decode_bytes(&mut bvcd(strings()), &raw),
            Err(BinaryError::LookupFailure { .. })
        ));
    }
}
