//! Typed tag values and the per-type loader/writer registry.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::bytes::ByteOrder;
use crate::directory::Ifd;
use crate::error::{TiffError, TiffFormatError, TiffResult};
use crate::rational::Rational;
use crate::tags::Type;

/// A decoded tag value.
///
/// Values are width-qualified vectors; single-valued tags hold a vector of
/// length one and collapse to scalars through the `as_*` accessors. A nested
/// sub-directory (EXIF, GPS, SubIFD) is its own variant rather than a
/// LONG offset so that serialization can recurse through it.
#[allow(unused_qualifications)]
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum TagValue {
    Byte(Vec<u8>),
    Ascii(String),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Rational(Vec<Rational>),
    SByte(Vec<i8>),
    Undefined(Vec<u8>),
    SShort(Vec<i16>),
    SLong(Vec<i32>),
    SRational(Vec<Rational>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    Ifd(Ifd),
    Long8(Vec<u64>),
}

impl TagValue {
    /// The type this value is stored as. A nested directory is stored as a
    /// LONG offset to the serialized sub-directory.
    pub fn kind(&self) -> Type {
        match self {
            TagValue::Byte(_) => Type::BYTE,
            TagValue::Ascii(_) => Type::ASCII,
            TagValue::Short(_) => Type::SHORT,
            TagValue::Long(_) => Type::LONG,
            TagValue::Rational(_) => Type::RATIONAL,
            TagValue::SByte(_) => Type::SBYTE,
            TagValue::Undefined(_) => Type::UNDEFINED,
            TagValue::SShort(_) => Type::SSHORT,
            TagValue::SLong(_) => Type::SLONG,
            TagValue::SRational(_) => Type::SRATIONAL,
            TagValue::Float(_) => Type::FLOAT,
            TagValue::Double(_) => Type::DOUBLE,
            TagValue::Ifd(_) => Type::LONG,
            TagValue::Long8(_) => Type::LONG8,
        }
    }

    /// Number of logical values held.
    pub fn len(&self) -> usize {
        match self {
            TagValue::Byte(v) | TagValue::Undefined(v) => v.len(),
            TagValue::Ascii(_) | TagValue::Ifd(_) => 1,
            TagValue::Short(v) => v.len(),
            TagValue::Long(v) => v.len(),
            TagValue::Rational(v) | TagValue::SRational(v) => v.len(),
            TagValue::SByte(v) => v.len(),
            TagValue::SShort(v) => v.len(),
            TagValue::SLong(v) => v.len(),
            TagValue::Float(v) => v.len(),
            TagValue::Double(v) => v.len(),
            TagValue::Long8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The count stored in the directory entry: the byte length for
    /// BYTE/ASCII/UNDEFINED values (including the string terminator), one for
    /// a nested directory, the element count otherwise.
    pub fn count(&self) -> usize {
        match self {
            TagValue::Byte(v) | TagValue::Undefined(v) => v.len(),
            TagValue::Ascii(s) => s.len() + 1,
            TagValue::Ifd(_) => 1,
            other => other.len(),
        }
    }

    pub fn to_u64_vec(&self) -> TiffResult<Vec<u64>> {
        match self {
            TagValue::Byte(v) => Ok(v.iter().map(|&x| u64::from(x)).collect()),
            TagValue::Short(v) => Ok(v.iter().map(|&x| u64::from(x)).collect()),
            TagValue::Long(v) => Ok(v.iter().map(|&x| u64::from(x)).collect()),
            TagValue::Long8(v) => Ok(v.clone()),
            TagValue::SByte(v) => v.iter().map(|&x| Ok(u64::try_from(x)?)).collect(),
            TagValue::SShort(v) => v.iter().map(|&x| Ok(u64::try_from(x)?)).collect(),
            TagValue::SLong(v) => v.iter().map(|&x| Ok(u64::try_from(x)?)).collect(),
            val => Err(TiffError::FormatError(
                TiffFormatError::UnsignedIntegerExpected(val.clone()),
            )),
        }
    }

    pub fn to_i64_vec(&self) -> TiffResult<Vec<i64>> {
        match self {
            TagValue::Byte(v) => Ok(v.iter().map(|&x| i64::from(x)).collect()),
            TagValue::Short(v) => Ok(v.iter().map(|&x| i64::from(x)).collect()),
            TagValue::Long(v) => Ok(v.iter().map(|&x| i64::from(x)).collect()),
            TagValue::Long8(v) => v.iter().map(|&x| Ok(i64::try_from(x)?)).collect(),
            TagValue::SByte(v) => Ok(v.iter().map(|&x| i64::from(x)).collect()),
            TagValue::SShort(v) => Ok(v.iter().map(|&x| i64::from(x)).collect()),
            TagValue::SLong(v) => Ok(v.iter().map(|&x| i64::from(x)).collect()),
            val => Err(TiffError::FormatError(
                TiffFormatError::SignedIntegerExpected(val.clone()),
            )),
        }
    }

    pub fn to_f64_vec(&self) -> TiffResult<Vec<f64>> {
        match self {
            TagValue::Float(v) => Ok(v.iter().map(|&x| f64::from(x)).collect()),
            TagValue::Double(v) => Ok(v.clone()),
            TagValue::Rational(v) | TagValue::SRational(v) => {
                Ok(v.iter().map(|r| r.to_f64()).collect())
            }
            other => match other.to_i64_vec() {
                Ok(ints) => Ok(ints.into_iter().map(|x| x as f64).collect()),
                Err(_) => match other.to_u64_vec() {
                    Ok(ints) => Ok(ints.into_iter().map(|x| x as f64).collect()),
                    Err(_) => Err(TiffError::FormatError(TiffFormatError::FloatExpected(
                        other.clone(),
                    ))),
                },
            },
        }
    }

    pub fn to_rational_vec(&self) -> TiffResult<Vec<Rational>> {
        match self {
            TagValue::Rational(v) | TagValue::SRational(v) => Ok(v.clone()),
            TagValue::Float(_) | TagValue::Double(_) => Ok(self
                .to_f64_vec()?
                .into_iter()
                .map(Rational::from_f64)
                .collect()),
            other => match other.to_i64_vec() {
                Ok(ints) => Ok(ints.into_iter().map(Rational::from).collect()),
                Err(_) => Err(TiffError::FormatError(TiffFormatError::RationalExpected(
                    other.clone(),
                ))),
            },
        }
    }

    pub fn to_u32_vec(&self) -> TiffResult<Vec<u32>> {
        self.to_u64_vec()?
            .into_iter()
            .map(|x| Ok(u32::try_from(x)?))
            .collect()
    }

    pub fn to_u16_vec(&self) -> TiffResult<Vec<u16>> {
        self.to_u64_vec()?
            .into_iter()
            .map(|x| Ok(u16::try_from(x)?))
            .collect()
    }

    fn single<T>(&self, values: Vec<T>) -> TiffResult<T> {
        let mut values = values;
        if values.len() == 1 {
            Ok(values.remove(0))
        } else {
            Err(TiffError::FormatError(
                TiffFormatError::UnsignedIntegerExpected(self.clone()),
            ))
        }
    }

    pub fn as_u64(&self) -> TiffResult<u64> {
        let values = self.to_u64_vec()?;
        self.single(values)
    }

    pub fn as_u32(&self) -> TiffResult<u32> {
        Ok(u32::try_from(self.as_u64()?)?)
    }

    pub fn as_u16(&self) -> TiffResult<u16> {
        Ok(u16::try_from(self.as_u64()?)?)
    }

    pub fn as_f64(&self) -> TiffResult<f64> {
        let values = self.to_f64_vec()?;
        self.single(values)
    }

    pub fn as_rational(&self) -> TiffResult<Rational> {
        let values = self.to_rational_vec()?;
        self.single(values)
    }

    pub fn as_str(&self) -> TiffResult<&str> {
        match self {
            TagValue::Ascii(s) => Ok(s),
            val => Err(TiffError::FormatError(TiffFormatError::AsciiExpected(
                val.clone(),
            ))),
        }
    }

    pub fn as_bytes(&self) -> TiffResult<&[u8]> {
        match self {
            TagValue::Byte(v) | TagValue::Undefined(v) => Ok(v),
            val => Err(TiffError::FormatError(TiffFormatError::ByteExpected(
                val.clone(),
            ))),
        }
    }

    pub fn as_ifd(&self) -> TiffResult<&Ifd> {
        match self {
            TagValue::Ifd(ifd) => Ok(ifd),
            val => Err(TiffError::FormatError(
                TiffFormatError::UnsignedIntegerExpected(val.clone()),
            )),
        }
    }

    /// Drop all but the first `len` values. Blob-shaped variants (bytes,
    /// strings, nested directories) are left untouched.
    pub(crate) fn truncate(&mut self, len: usize) {
        match self {
            TagValue::Short(v) => v.truncate(len),
            TagValue::Long(v) => v.truncate(len),
            TagValue::Long8(v) => v.truncate(len),
            TagValue::SByte(v) => v.truncate(len),
            TagValue::SShort(v) => v.truncate(len),
            TagValue::SLong(v) => v.truncate(len),
            TagValue::Float(v) => v.truncate(len),
            TagValue::Double(v) => v.truncate(len),
            TagValue::Rational(v) | TagValue::SRational(v) => v.truncate(len),
            TagValue::Byte(_)
            | TagValue::Undefined(_)
            | TagValue::Ascii(_)
            | TagValue::Ifd(_) => {}
        }
    }

    /// Auto-typing for untyped integer values: SHORT when every value fits
    /// in `[0, 2^16)`, SSHORT within `(-2^15, 2^15)`, LONG within
    /// `[0, 2^32)`, LONG8 when non-negative but wider, SLONG otherwise.
    pub fn from_ints(values: Vec<i64>) -> TagValue {
        let mut short = true;
        let mut signed_short = true;
        let mut long = true;
        let mut long8 = true;
        for &v in &values {
            if short && !(0..1 << 16).contains(&v) {
                short = false;
            }
            if signed_short && !(-(1 << 15) < v && v < 1 << 15) {
                signed_short = false;
            }
            if long && !(0..1 << 32).contains(&v) {
                long = false;
            }
            if long8 && v < 0 {
                long8 = false;
            }
        }
        if short {
            TagValue::Short(values.into_iter().map(|v| v as u16).collect())
        } else if signed_short {
            TagValue::SShort(values.into_iter().map(|v| v as i16).collect())
        } else if long {
            TagValue::Long(values.into_iter().map(|v| v as u32).collect())
        } else if long8 {
            TagValue::Long8(values.into_iter().map(|v| v as u64).collect())
        } else {
            TagValue::SLong(values.into_iter().map(|v| v as i32).collect())
        }
    }

    fn from_rationals(values: Vec<Rational>) -> TagValue {
        if values.iter().any(|r| !r.is_nan() && r.to_f64() < 0.0) {
            TagValue::SRational(values)
        } else {
            TagValue::Rational(values)
        }
    }

    /// Re-shape this value into the canonical variant of the given type.
    pub(crate) fn coerce(self, kind: Type) -> TiffResult<TagValue> {
        if self.kind() == kind && !matches!(self, TagValue::Ifd(_)) {
            return Ok(self);
        }
        Ok(match kind {
            Type::BYTE => TagValue::Byte(self.into_raw_bytes()?),
            Type::UNDEFINED => TagValue::Undefined(self.into_raw_bytes()?),
            Type::ASCII => TagValue::Ascii(self.into_ascii()?),
            Type::SHORT => TagValue::Short(self.to_u16_vec()?),
            Type::SSHORT => TagValue::SShort(
                self.to_i64_vec()?
                    .into_iter()
                    .map(i16::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Type::LONG | Type::IFD => match self {
                TagValue::Ifd(ifd) => TagValue::Ifd(ifd),
                other => TagValue::Long(other.to_u32_vec()?),
            },
            Type::SLONG => TagValue::SLong(
                self.to_i64_vec()?
                    .into_iter()
                    .map(i32::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Type::LONG8 => TagValue::Long8(self.to_u64_vec()?),
            Type::SBYTE => TagValue::SByte(
                self.to_i64_vec()?
                    .into_iter()
                    .map(i8::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Type::FLOAT => TagValue::Float(
                self.to_f64_vec()?.into_iter().map(|v| v as f32).collect(),
            ),
            Type::DOUBLE => TagValue::Double(self.to_f64_vec()?),
            Type::RATIONAL => TagValue::Rational(self.to_rational_vec()?),
            Type::SRATIONAL => TagValue::SRational(self.to_rational_vec()?),
        })
    }

    fn into_raw_bytes(self) -> TiffResult<Vec<u8>> {
        match self {
            TagValue::Byte(v) | TagValue::Undefined(v) => Ok(v),
            TagValue::Ascii(s) => Ok(encode_ascii(&s)),
            other => match other.to_u64_vec() {
                Ok(ints) => ints.into_iter().map(|v| Ok(u8::try_from(v)?)).collect(),
                Err(_) => Err(TiffError::FormatError(TiffFormatError::ByteExpected(
                    other.clone(),
                ))),
            },
        }
    }

    fn into_ascii(self) -> TiffResult<String> {
        match self {
            TagValue::Ascii(s) => Ok(s),
            TagValue::Byte(v) | TagValue::Undefined(v) => {
                Ok(v.iter().map(|&b| b as char).collect())
            }
            other => {
                let n = other.as_u64()?;
                Ok(n.to_string())
            }
        }
    }
}

fn encode_ascii(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .collect()
}

impl From<&str> for TagValue {
    fn from(value: &str) -> TagValue {
        TagValue::Ascii(value.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> TagValue {
        TagValue::Ascii(value)
    }
}

impl From<Vec<u8>> for TagValue {
    fn from(value: Vec<u8>) -> TagValue {
        TagValue::Byte(value)
    }
}

impl From<&[u8]> for TagValue {
    fn from(value: &[u8]) -> TagValue {
        TagValue::Byte(value.to_vec())
    }
}

impl From<u16> for TagValue {
    fn from(value: u16) -> TagValue {
        TagValue::Short(vec![value])
    }
}

impl From<Vec<u16>> for TagValue {
    fn from(value: Vec<u16>) -> TagValue {
        TagValue::Short(value)
    }
}

impl From<u32> for TagValue {
    fn from(value: u32) -> TagValue {
        TagValue::Long(vec![value])
    }
}

impl From<Vec<u32>> for TagValue {
    fn from(value: Vec<u32>) -> TagValue {
        TagValue::Long(value)
    }
}

impl From<u64> for TagValue {
    fn from(value: u64) -> TagValue {
        match i64::try_from(value) {
            Ok(v) => TagValue::from_ints(vec![v]),
            Err(_) => TagValue::Long8(vec![value]),
        }
    }
}

impl From<Vec<u64>> for TagValue {
    fn from(value: Vec<u64>) -> TagValue {
        match value
            .iter()
            .map(|&v| i64::try_from(v))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(ints) => TagValue::from_ints(ints),
            Err(_) => TagValue::Long8(value),
        }
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> TagValue {
        TagValue::from_ints(vec![i64::from(value)])
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> TagValue {
        TagValue::from_ints(vec![value])
    }
}

impl From<Vec<i64>> for TagValue {
    fn from(value: Vec<i64>) -> TagValue {
        TagValue::from_ints(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> TagValue {
        TagValue::Double(vec![value])
    }
}

impl From<Vec<f64>> for TagValue {
    fn from(value: Vec<f64>) -> TagValue {
        TagValue::Double(value)
    }
}

impl From<Rational> for TagValue {
    fn from(value: Rational) -> TagValue {
        TagValue::from_rationals(vec![value])
    }
}

impl From<Vec<Rational>> for TagValue {
    fn from(value: Vec<Rational>) -> TagValue {
        TagValue::from_rationals(value)
    }
}

impl From<Ifd> for TagValue {
    fn from(value: Ifd) -> TagValue {
        TagValue::Ifd(value)
    }
}

/// Loader/writer pair for one entry type. The loader turns a raw payload of
/// `len / unit_size` values into a [`TagValue`]; the writer emits the byte
/// block for a value, converting compatible variants on the way.
pub(crate) struct TypeHandler {
    pub size: usize,
    pub load: fn(ByteOrder, &[u8]) -> TiffResult<TagValue>,
    pub write: fn(ByteOrder, &TagValue) -> TiffResult<Vec<u8>>,
}

fn load_byte(_: ByteOrder, data: &[u8]) -> TiffResult<TagValue> {
    Ok(TagValue::Byte(data.to_vec()))
}

fn write_byte(_: ByteOrder, value: &TagValue) -> TiffResult<Vec<u8>> {
    value.clone().into_raw_bytes()
}

fn load_undefined(_: ByteOrder, data: &[u8]) -> TiffResult<TagValue> {
    Ok(TagValue::Undefined(data.to_vec()))
}

fn load_ascii(_: ByteOrder, data: &[u8]) -> TiffResult<TagValue> {
    let data = match data.split_last() {
        Some((0, rest)) => rest,
        _ => data,
    };
    // Latin-1: every byte maps to the code point of the same value.
    Ok(TagValue::Ascii(data.iter().map(|&b| b as char).collect()))
}

fn write_ascii(_: ByteOrder, value: &TagValue) -> TiffResult<Vec<u8>> {
    let mut out = match value {
        TagValue::Ascii(s) => encode_ascii(s),
        TagValue::Byte(v) | TagValue::Undefined(v) => v.clone(),
        other => encode_ascii(&other.as_u64()?.to_string()),
    };
    out.push(0);
    Ok(out)
}

fn load_rational(bo: ByteOrder, data: &[u8]) -> TiffResult<TagValue> {
    let values = data
        .chunks_exact(8)
        .map(|pair| {
            let n = bo.u32(pair[..4].try_into().unwrap());
            let d = bo.u32(pair[4..].try_into().unwrap());
            Rational::new(i64::from(n), i64::from(d))
        })
        .collect();
    Ok(TagValue::Rational(values))
}

fn write_rational(bo: ByteOrder, value: &TagValue) -> TiffResult<Vec<u8>> {
    let values = value.to_rational_vec()?;
    let mut out = Vec::with_capacity(values.len() * 8);
    for rational in values {
        let (n, d) = rational.limit_unsigned(u64::from(u32::MAX));
        bo.put_u32(&mut out, u32::try_from(n)?);
        bo.put_u32(&mut out, u32::try_from(d)?);
    }
    Ok(out)
}

fn load_signed_rational(bo: ByteOrder, data: &[u8]) -> TiffResult<TagValue> {
    let values = data
        .chunks_exact(8)
        .map(|pair| {
            let n = bo.i32(pair[..4].try_into().unwrap());
            let d = bo.i32(pair[4..].try_into().unwrap());
            Rational::new(i64::from(n), i64::from(d))
        })
        .collect();
    Ok(TagValue::SRational(values))
}

fn write_signed_rational(bo: ByteOrder, value: &TagValue) -> TiffResult<Vec<u8>> {
    let values = value.to_rational_vec()?;
    let mut out = Vec::with_capacity(values.len() * 8);
    for rational in values {
        let (n, d) = rational.limit_signed(i64::from(i32::MAX), i64::from(i32::MIN));
        bo.put_i32(&mut out, i32::try_from(n)?);
        bo.put_i32(&mut out, i32::try_from(d)?);
    }
    Ok(out)
}

fn write_undefined(_: ByteOrder, value: &TagValue) -> TiffResult<Vec<u8>> {
    value.clone().into_raw_bytes()
}

// All fixed-width scalar types share the same unpack-many/pack-many path.
macro_rules! basic_handler {
    ($handlers:expr, $kind:expr, $prim:ty, $width:expr, $read:ident, $put:ident, $variant:ident, $convert:ident) => {{
        fn load(bo: ByteOrder, data: &[u8]) -> TiffResult<TagValue> {
            Ok(TagValue::$variant(
                data.chunks_exact($width)
                    .map(|chunk| bo.$read(chunk.try_into().unwrap()))
                    .collect(),
            ))
        }
        fn write(bo: ByteOrder, value: &TagValue) -> TiffResult<Vec<u8>> {
            let values = value.$convert()?;
            let mut out = Vec::with_capacity(values.len() * $width);
            for v in values {
                bo.$put(&mut out, <$prim>::try_from(v)?);
            }
            Ok(out)
        }
        $handlers.insert($kind.to_u16(), TypeHandler { size: $width, load, write });
    }};
}

fn load_float(bo: ByteOrder, data: &[u8]) -> TiffResult<TagValue> {
    Ok(TagValue::Float(
        data.chunks_exact(4)
            .map(|chunk| bo.f32(chunk.try_into().unwrap()))
            .collect(),
    ))
}

fn write_float(bo: ByteOrder, value: &TagValue) -> TiffResult<Vec<u8>> {
    let values = value.to_f64_vec()?;
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        bo.put_f32(&mut out, v as f32);
    }
    Ok(out)
}

fn load_long8(bo: ByteOrder, data: &[u8]) -> TiffResult<TagValue> {
    Ok(TagValue::Long8(
        data.chunks_exact(8)
            .map(|chunk| bo.u64(chunk.try_into().unwrap()))
            .collect(),
    ))
}

fn write_long8(bo: ByteOrder, value: &TagValue) -> TiffResult<Vec<u8>> {
    let values = value.to_u64_vec()?;
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        bo.put_u64(&mut out, v);
    }
    Ok(out)
}

fn load_double(bo: ByteOrder, data: &[u8]) -> TiffResult<TagValue> {
    Ok(TagValue::Double(
        data.chunks_exact(8)
            .map(|chunk| bo.f64(chunk.try_into().unwrap()))
            .collect(),
    ))
}

fn write_double(bo: ByteOrder, value: &TagValue) -> TiffResult<Vec<u8>> {
    let values = value.to_f64_vec()?;
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        bo.put_f64(&mut out, v);
    }
    Ok(out)
}

lazy_static! {
    static ref TYPE_HANDLERS: HashMap<u16, TypeHandler> = {
        let mut handlers = HashMap::new();
        handlers.insert(
            Type::BYTE.to_u16(),
            TypeHandler { size: 1, load: load_byte, write: write_byte },
        );
        handlers.insert(
            Type::ASCII.to_u16(),
            TypeHandler { size: 1, load: load_ascii, write: write_ascii },
        );
        handlers.insert(
            Type::UNDEFINED.to_u16(),
            TypeHandler { size: 1, load: load_undefined, write: write_undefined },
        );
        handlers.insert(
            Type::RATIONAL.to_u16(),
            TypeHandler { size: 8, load: load_rational, write: write_rational },
        );
        handlers.insert(
            Type::SRATIONAL.to_u16(),
            TypeHandler { size: 8, load: load_signed_rational, write: write_signed_rational },
        );
        handlers.insert(
            Type::FLOAT.to_u16(),
            TypeHandler { size: 4, load: load_float, write: write_float },
        );
        handlers.insert(
            Type::DOUBLE.to_u16(),
            TypeHandler { size: 8, load: load_double, write: write_double },
        );
        basic_handler!(handlers, Type::SHORT, u16, 2, u16, put_u16, Short, to_u64_vec);
        basic_handler!(handlers, Type::SSHORT, i16, 2, i16, put_i16, SShort, to_i64_vec);
        basic_handler!(handlers, Type::SBYTE, i8, 1, i8, put_i8, SByte, to_i64_vec);
        basic_handler!(handlers, Type::LONG, u32, 4, u32, put_u32, Long, to_u64_vec);
        basic_handler!(handlers, Type::SLONG, i32, 4, i32, put_i32, SLong, to_i64_vec);
        // IFD offsets are structurally LONGs pointing at a sub-directory.
        basic_handler!(handlers, Type::IFD, u32, 4, u32, put_u32, Long, to_u64_vec);
        handlers.insert(
            Type::LONG8.to_u16(),
            TypeHandler { size: 8, load: load_long8, write: write_long8 },
        );
        handlers
    };
}

/// The registered handler for a recognized entry type.
pub(crate) fn type_handler(kind: Type) -> &'static TypeHandler {
    TYPE_HANDLERS
        .get(&kind.to_u16())
        .expect("every recognized tag type is registered")
}

/// The registered handler for a raw type id, if the id is recognized.
pub(crate) fn type_handler_for(type_id: u16) -> Option<(Type, &'static TypeHandler)> {
    let kind = Type::from_u16(type_id)?;
    Some((kind, type_handler(kind)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_typing_ladder() {
        assert_eq!(TagValue::from(3i64).kind(), Type::SHORT);
        assert_eq!(TagValue::from(-5i64).kind(), Type::SSHORT);
        assert_eq!(TagValue::from(70_000i64).kind(), Type::LONG);
        assert_eq!(TagValue::from(-70_000i64).kind(), Type::SLONG);
        assert_eq!(TagValue::from(1u64 << 40).kind(), Type::LONG8);
        assert_eq!(TagValue::from(2.5f64).kind(), Type::DOUBLE);
        assert_eq!(TagValue::from("x").kind(), Type::ASCII);
        assert_eq!(TagValue::from(vec![1u8, 2]).kind(), Type::BYTE);
        assert_eq!(TagValue::from(Rational::new(1, 2)).kind(), Type::RATIONAL);
        assert_eq!(TagValue::from(Rational::new(-1, 2)).kind(), Type::SRATIONAL);
        // One negative value drags the whole tuple to the signed type.
        assert_eq!(
            TagValue::from_ints(vec![1, 2, -3]).kind(),
            Type::SSHORT
        );
    }

    #[test]
    fn ascii_payload_gets_terminated() {
        let bo = ByteOrder::LittleEndian;
        let handler = type_handler(Type::ASCII);
        let bytes = (handler.write)(bo, &TagValue::from("abc")).unwrap();
        assert_eq!(bytes, b"abc\0");

        let value = (handler.load)(bo, &bytes).unwrap();
        assert_eq!(value, TagValue::Ascii("abc".into()));
    }

    #[test]
    fn ascii_replaces_non_ascii() {
        let bo = ByteOrder::LittleEndian;
        let handler = type_handler(Type::ASCII);
        let bytes = (handler.write)(bo, &TagValue::from("caf\u{e9}")).unwrap();
        assert_eq!(bytes, b"caf?\0");
    }

    #[test]
    fn scalar_handlers_roundtrip() {
        for bo in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            for (kind, value) in [
                (Type::SHORT, TagValue::Short(vec![1, 65_535])),
                (Type::SSHORT, TagValue::SShort(vec![-1, 2])),
                (Type::LONG, TagValue::Long(vec![1, u32::MAX])),
                (Type::SLONG, TagValue::SLong(vec![-70_000])),
                (Type::LONG8, TagValue::Long8(vec![1u64 << 40])),
                (Type::DOUBLE, TagValue::Double(vec![0.5, -2.0])),
                (Type::FLOAT, TagValue::Float(vec![1.5])),
                (Type::SBYTE, TagValue::SByte(vec![-4])),
            ] {
                let handler = type_handler(kind);
                let bytes = (handler.write)(bo, &value).unwrap();
                assert_eq!(bytes.len(), value.len() * handler.size);
                assert_eq!((handler.load)(bo, &bytes).unwrap(), value);
            }
        }
    }

    #[test]
    fn rational_write_clamps_to_u32() {
        let bo = ByteOrder::LittleEndian;
        let handler = type_handler(Type::RATIONAL);
        let huge = TagValue::Rational(vec![Rational::new(1, i64::from(u32::MAX) * 8)]);
        let bytes = (handler.write)(bo, &huge).unwrap();
        let TagValue::Rational(back) = (handler.load)(bo, &bytes).unwrap() else {
            panic!("rational expected");
        };
        assert!(back[0].denominator() <= i64::from(u32::MAX));
    }

    #[test]
    fn degenerate_rational_roundtrips() {
        let bo = ByteOrder::BigEndian;
        let handler = type_handler(Type::RATIONAL);
        let nan = TagValue::Rational(vec![Rational::new(0, 0)]);
        let bytes = (handler.write)(bo, &nan).unwrap();
        assert_eq!(bytes, vec![0; 8]);
        assert_eq!((handler.load)(bo, &bytes).unwrap(), nan);
    }

    #[test]
    fn unknown_type_id_is_rejected() {
        assert!(type_handler_for(14).is_none());
        assert!(type_handler_for(0).is_none());
        assert!(type_handler_for(3).is_some());
    }
}
