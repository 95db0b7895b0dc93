//! XDR (External Data Representation, RFC 4506) encoding and decoding.
//!
//! Every structure that crosses the wire implements [`Serialize`] and
//! [`Deserialize`] over plain `std::io` streams. Integers are 4- or 8-byte
//! big endian, opaques and strings carry a length prefix and are padded to a
//! 4-byte boundary, booleans and enum discriminants travel as `u32`.
//!
//! The `SerializeStruct!` / `DeserializeStruct!` macros expand field-by-field
//! implementations; `SerializeEnum!` / `DeserializeEnum!` cover discriminant
//! enums derived with `num_derive`; the bool-union macros cover the XDR
//! `optional` idiom (a boolean discriminant followed by the payload).

use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

pub mod mount;
pub mod nfs3;
pub mod nfs4;
pub mod nlm;
pub mod nsm;
pub mod portmap;
pub mod rpc;

/// Byte order for every XDR field.
pub type XDREndian = byteorder::BigEndian;

/// Maximum length accepted for any counted opaque or array while decoding.
/// Bounds allocation from untrusted length prefixes; individual fields apply
/// tighter caps on top of this.
pub const MAX_DECODED_LENGTH: usize = 1024 * 1024;

/// Serialization half of the XDR codec.
pub trait Serialize {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()>;
}

/// Deserialization half of the XDR codec.
pub trait Deserialize: Default {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()>;
}

/// Decodes a value of type `T` from the stream.
pub fn deserialize<T: Deserialize>(src: &mut impl Read) -> std::io::Result<T> {
    let mut value = T::default();
    value.deserialize(src)?;
    Ok(value)
}

/// Encodes a value into a fresh byte vector.
pub fn serialize_to_vec<T: Serialize>(value: &T) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    value.serialize(&mut buf)?;
    Ok(buf)
}

pub(crate) fn invalid_data(message: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message.into())
}

/// Number of zero bytes required after `len` payload bytes.
pub const fn pad_len(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Writes the zero padding that aligns `len` payload bytes to 4 bytes.
pub fn write_padding(len: usize, dest: &mut impl Write) -> std::io::Result<()> {
    const ZEROS: [u8; 4] = [0; 4];
    dest.write_all(&ZEROS[..pad_len(len)])
}

/// Consumes and validates the padding after `len` payload bytes.
pub fn read_padding(len: usize, src: &mut impl Read) -> std::io::Result<()> {
    let mut pad = [0u8; 4];
    let n = pad_len(len);
    src.read_exact(&mut pad[..n])?;
    if pad[..n].iter().any(|b| *b != 0) {
        return Err(invalid_data("nonzero XDR padding"));
    }
    Ok(())
}

/// Reads a counted opaque with an explicit upper bound on its length.
pub fn read_opaque_bounded(src: &mut impl Read, max: usize) -> std::io::Result<Vec<u8>> {
    let len = deserialize::<u32>(src)? as usize;
    if len > max {
        return Err(invalid_data(format!("opaque length {len} exceeds limit {max}")));
    }
    let mut data = vec![0u8; len];
    src.read_exact(&mut data)?;
    read_padding(len, src)?;
    Ok(data)
}

/// Writes a counted opaque with trailing padding.
pub fn write_opaque(data: &[u8], dest: &mut impl Write) -> std::io::Result<()> {
    (data.len() as u32).serialize(dest)?;
    dest.write_all(data)?;
    write_padding(data.len(), dest)
}

impl Serialize for bool {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XDREndian>(*self as u32)
    }
}

impl Deserialize for bool {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match src.read_u32::<XDREndian>()? {
            0 => false,
            1 => true,
            other => return Err(invalid_data(format!("bad XDR boolean {other}"))),
        };
        Ok(())
    }
}

impl Serialize for u32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u32::<XDREndian>(*self)
    }
}

impl Deserialize for u32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u32::<XDREndian>()?;
        Ok(())
    }
}

impl Serialize for i32 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i32::<XDREndian>(*self)
    }
}

impl Deserialize for i32 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i32::<XDREndian>()?;
        Ok(())
    }
}

impl Serialize for u64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_u64::<XDREndian>(*self)
    }
}

impl Deserialize for u64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_u64::<XDREndian>()?;
        Ok(())
    }
}

impl Serialize for i64 {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_i64::<XDREndian>(*self)
    }
}

impl Deserialize for i64 {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = src.read_i64::<XDREndian>()?;
        Ok(())
    }
}

/// Fixed-length opaque: raw bytes, no length prefix, padded only when the
/// caller embeds it inside a counted field.
impl<const N: usize> Serialize for [u8; N] {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        dest.write_all(self)
    }
}

impl<const N: usize> Deserialize for [u8; N]
where
    [u8; N]: Default,
{
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_exact(self)
    }
}

impl Serialize for Vec<u8> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(self, dest)
    }
}

impl Deserialize for Vec<u8> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = read_opaque_bounded(src, MAX_DECODED_LENGTH)?;
        Ok(())
    }
}

impl Serialize for Vec<u32> {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        (self.len() as u32).serialize(dest)?;
        for item in self {
            item.serialize(dest)?;
        }
        Ok(())
    }
}

impl Deserialize for Vec<u32> {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let len = deserialize::<u32>(src)? as usize;
        if len > MAX_DECODED_LENGTH / 4 {
            return Err(invalid_data("u32 array too long"));
        }
        self.clear();
        self.reserve(len);
        for _ in 0..len {
            self.push(deserialize(src)?);
        }
        Ok(())
    }
}

impl Serialize for String {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        write_opaque(self.as_bytes(), dest)
    }
}

impl Deserialize for String {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        let raw = read_opaque_bounded(src, MAX_DECODED_LENGTH)?;
        *self = String::from_utf8(raw).map_err(|_| invalid_data("string is not UTF-8"))?;
        Ok(())
    }
}

/// Field-by-field struct serialization.
#[macro_export]
macro_rules! SerializeStruct {
    ($t:ident, $($field:ident),*) => {
        impl $crate::protocol::xdr::Serialize for $t {
            fn serialize<W: ::std::io::Write>(&self, dest: &mut W) -> ::std::io::Result<()> {
                $(self.$field.serialize(dest)?;)*
                Ok(())
            }
        }
    };
}

/// Field-by-field struct deserialization.
#[macro_export]
macro_rules! DeserializeStruct {
    ($t:ident, $($field:ident),*) => {
        impl $crate::protocol::xdr::Deserialize for $t {
            fn deserialize<R: ::std::io::Read>(&mut self, src: &mut R) -> ::std::io::Result<()> {
                $(self.$field.deserialize(src)?;)*
                Ok(())
            }
        }
    };
}

/// Discriminant-only enum serialization; relies on `Copy + as u32`.
#[macro_export]
macro_rules! SerializeEnum {
    ($t:ident) => {
        impl $crate::protocol::xdr::Serialize for $t {
            fn serialize<W: ::std::io::Write>(&self, dest: &mut W) -> ::std::io::Result<()> {
                (*self as u32).serialize(dest)
            }
        }
    };
}

/// Discriminant-only enum deserialization via `num_traits::FromPrimitive`.
#[macro_export]
macro_rules! DeserializeEnum {
    ($t:ident) => {
        impl $crate::protocol::xdr::Deserialize for $t {
            fn deserialize<R: ::std::io::Read>(&mut self, src: &mut R) -> ::std::io::Result<()> {
                let raw = $crate::protocol::xdr::deserialize::<u32>(src)?;
                match <$t as ::num_traits::FromPrimitive>::from_u32(raw) {
                    Some(v) => {
                        *self = v;
                        Ok(())
                    }
                    None => Err($crate::protocol::xdr::invalid_data(format!(
                        "invalid {} discriminant {raw}",
                        stringify!($t)
                    ))),
                }
            }
        }
    };
}

/// XDR optional: boolean discriminant, then the payload when true.
#[macro_export]
macro_rules! SerializeBoolUnion {
    ($t:ident, $case:ident, $ty:ty) => {
        impl $crate::protocol::xdr::Serialize for $t {
            fn serialize<W: ::std::io::Write>(&self, dest: &mut W) -> ::std::io::Result<()> {
                match self {
                    $t::Void => false.serialize(dest),
                    $t::$case(v) => {
                        true.serialize(dest)?;
                        v.serialize(dest)
                    }
                }
            }
        }
    };
}

#[macro_export]
macro_rules! DeserializeBoolUnion {
    ($t:ident, $case:ident, $ty:ty) => {
        impl $crate::protocol::xdr::Deserialize for $t {
            fn deserialize<R: ::std::io::Read>(&mut self, src: &mut R) -> ::std::io::Result<()> {
                if $crate::protocol::xdr::deserialize::<bool>(src)? {
                    *self = $t::$case($crate::protocol::xdr::deserialize::<$ty>(src)?);
                } else {
                    *self = $t::Void;
                }
                Ok(())
            }
        }
    };
}

pub use crate::{
    DeserializeBoolUnion, DeserializeEnum, DeserializeStruct, SerializeBoolUnion, SerializeEnum,
    SerializeStruct,
};
