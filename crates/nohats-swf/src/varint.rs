//! AVM2 variable-length integers.
//!
//! Seven data bits per byte, least significant group first, high bit set on
//! every byte but the last. Signed values are sign-extended from the top bit
//! of however many groups were read.

use nohats_binary::{Error, Field, Result, Stream, Value};

/// Longest accepted encoding. Well-formed files use at most five bytes.
const MAX_BYTES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    U30,
    U32,
    S32,
}

/// A `u30`, `u32` or `s32` ABC integer.
#[derive(Debug, Clone)]
pub struct VarInt {
    kind: Kind,
    value: i64,
}

impl VarInt {
    pub fn u30() -> Self {
        Self { kind: Kind::U30, value: 0 }
    }

    pub fn u32() -> Self {
        Self { kind: Kind::U32, value: 0 }
    }

    pub fn s32() -> Self {
        Self { kind: Kind::S32, value: 0 }
    }

    pub fn get(&self) -> i64 {
        self.value
    }
}

impl Field for VarInt {
    fn decode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let mut data: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            if shift >= 7 * MAX_BYTES {
                return Err(Error::mismatch("variable-length integer", "at most 10 bytes", shift / 7 + 1));
            }
            let byte = s.read_u8()?;
            if shift < 64 {
                data |= u64::from(byte & 0x7f) << shift;
            }
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        let shift = shift.min(64);
        self.value = match self.kind {
            Kind::S32 if (data >> (shift - 1)) & 1 == 1 => (i128::from(data) - (1i128 << shift)) as i64,
            _ => data as i64,
        };
        Ok(())
    }

    fn encode(&mut self, s: &mut dyn Stream) -> Result<()> {
        let mut out = Vec::with_capacity(5);
        match self.kind {
            Kind::S32 => {
                let mut rest = self.value;
                loop {
                    let byte = (rest & 0x7f) as u8;
                    rest >>= 7;
                    let done = if byte & 0x40 != 0 { rest == -1 } else { rest == 0 };
                    if done {
                        out.push(byte);
                        break;
                    }
                    out.push(byte | 0x80);
                }
            }
            Kind::U30 | Kind::U32 => {
                let mut rest = self.value as u64;
                loop {
                    let byte = (rest & 0x7f) as u8;
                    rest >>= 7;
                    if rest == 0 {
                        out.push(byte);
                        break;
                    }
                    out.push(byte | 0x80);
                }
            }
        }
        s.write_bytes(&out)
    }

    fn value(&self) -> Value {
        match self.kind {
            Kind::S32 => Value::Int(self.value),
            Kind::U30 | Kind::U32 => Value::UInt(self.value as u64),
        }
    }

    fn set_value(&mut self, value: Value) -> Result<()> {
        if value.is_null() {
            self.value = 0;
            return Ok(());
        }
        self.value = match self.kind {
            Kind::S32 => value.to_i64()?,
            Kind::U32 => i64::try_from(value.to_u64()?)
                .map_err(|_| Error::contract("u32 value out of range"))?,
            Kind::U30 => {
                let v = value.to_u64()?;
                if v >= 1 << 30 {
                    return Err(Error::contract(format!("{} does not fit in u30", v)));
                }
                v as i64
            }
        };
        Ok(())
    }
}
