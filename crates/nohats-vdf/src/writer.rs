//! KeyValues text writer.

use std::io::Write;

use crate::kv::{KvList, KvValue};
use crate::Result;

fn indent(out: &mut impl Write, depth: usize) -> Result<()> {
    for _ in 0..depth {
        out.write_all(b"\t")?;
    }
    Ok(())
}

/// Write `list` with one tab of indentation per nesting level.
///
/// String entries are `"key"\t\t"value"`; blocks put their braces on lines
/// of their own at the key's indentation.
pub fn write(list: &KvList, out: &mut impl Write) -> Result<()> {
    write_at(list, out, 0)
}

fn write_at(list: &KvList, out: &mut impl Write, depth: usize) -> Result<()> {
    for (key, value) in list.iter() {
        indent(out, depth)?;
        write!(out, "\"{}\"", key)?;
        match value {
            KvValue::Str(s) => writeln!(out, "\t\t\"{}\"", s)?,
            KvValue::List(block) => {
                out.write_all(b"\n")?;
                indent(out, depth)?;
                out.write_all(b"{\n")?;
                write_at(block, out, depth + 1)?;
                indent(out, depth)?;
                out.write_all(b"}\n")?;
            }
        }
    }
    Ok(())
}

/// [`write`] into a string.
pub fn to_string(list: &KvList) -> String {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write(list, &mut out);
    String::from_utf8_lossy(&out).into_owned()
}
