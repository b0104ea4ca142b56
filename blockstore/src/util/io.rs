//! This module provides big-endian read and write extension traits for the primitive
//! types found in chunk store files.

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{self, Read, Write};


/// Generate big-endian primitive methods forwarding to byteorder.
macro_rules! data_methods {
    (read: $($name:ident => $inner:ident -> $ty:ty),* $(,)?) => {
        $(
            #[inline]
            fn $name(&mut self) -> io::Result<$ty> {
                ReadBytesExt::$inner::<BE>(self)
            }
        )*
    };
    (write: $($name:ident => $inner:ident($ty:ty)),* $(,)?) => {
        $(
            #[inline]
            fn $name(&mut self, n: $ty) -> io::Result<()> {
                WriteBytesExt::$inner::<BE>(self, n)
            }
        )*
    };
}

/// Extension trait with store-specific read methods.
pub trait ReadDataExt: Read {

    #[inline]
    fn read_data_byte(&mut self) -> io::Result<i8> {
        ReadBytesExt::read_i8(self)
    }

    data_methods! { read:
        read_data_short => read_i16 -> i16,
        read_data_int => read_i32 -> i32,
        read_data_long => read_i64 -> i64,
        read_data_float => read_f32 -> f32,
        read_data_double => read_f64 -> f64,
    }

    #[inline]
    fn read_data_boolean(&mut self) -> io::Result<bool> {
        Ok(self.read_data_byte()? != 0)
    }

    /// Read exactly `len` bytes. The buffer grows with the bytes actually read, so a 
    /// corrupted length fails on end of input instead of allocating it upfront.
    fn read_data_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {

        let mut buf = Vec::new();
        Read::take(&mut *self, len as u64).read_to_end(&mut buf)?;

        if buf.len() != len {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated byte sequence"));
        }

        Ok(buf)

    }

    /// Read a length-prefixed (u16) UTF-8 string.
    fn read_data_string(&mut self) -> io::Result<String> {
        let len = self.read_u16::<BE>()?;
        let buf = self.read_data_bytes(len as usize)?;
        String::from_utf8(buf).map_err(|_| new_invalid_data_err("invalid utf-8 string"))
    }

    /// Read a length-prefixed (i32) byte array.
    fn read_data_byte_array(&mut self) -> io::Result<Vec<u8>> {
        match usize::try_from(self.read_data_int()?) {
            Ok(len) => self.read_data_bytes(len),
            Err(_) => Err(new_invalid_data_err("negative length byte array")),
        }
    }

}

/// Extension trait with store-specific write methods.
pub trait WriteDataExt: Write {

    #[inline]
    fn write_data_byte(&mut self, b: i8) -> io::Result<()> {
        WriteBytesExt::write_i8(self, b)
    }

    data_methods! { write:
        write_data_short => write_i16(i16),
        write_data_int => write_i32(i32),
        write_data_long => write_i64(i64),
        write_data_float => write_f32(f32),
        write_data_double => write_f64(f64),
    }

    #[inline]
    fn write_data_boolean(&mut self, b: bool) -> io::Result<()> {
        self.write_data_byte(b as i8)
    }

    fn write_data_string(&mut self, s: &str) -> io::Result<()> {
        let len = u16::try_from(s.len()).map_err(|_| new_invalid_data_err("string too big"))?;
        self.write_u16::<BE>(len)?;
        self.write_all(s.as_bytes())
    }

    fn write_data_byte_array(&mut self, bytes: &[u8]) -> io::Result<()> {
        let len = i32::try_from(bytes.len()).map_err(|_| new_invalid_data_err("byte array too big"))?;
        self.write_data_int(len)?;
        self.write_all(bytes)
    }

}

impl<R: Read> ReadDataExt for R {}
impl<W: Write> WriteDataExt for W {}


/// Return an invalid data io error with specific message.
pub fn new_invalid_data_err(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn string_prefix() {

        let mut buf = Vec::new();
        buf.write_data_string("world").unwrap();
        assert_eq!(buf, b"\x00\x05world");

        let mut reader = &buf[..];
        assert_eq!(reader.read_data_string().unwrap(), "world");

    }

    #[test]
    fn int_big_endian() {

        let mut buf = Vec::new();
        buf.write_data_int(0x01020304).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);

    }

    #[test]
    fn oversized_byte_array_length() {
        // Claims 2 GiB but only carries three bytes.
        let mut reader = &[0x7Fu8, 0xFF, 0xFF, 0xFF, 1, 2, 3][..];
        let err = reader.read_data_byte_array().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn truncated_string() {
        let mut reader = &b"\x00\x09world"[..];
        let err = reader.read_data_string().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn byte_array_exact() {
        let mut buf = Vec::new();
        buf.write_data_byte_array(&[9, 8, 7]).unwrap();
        buf.push(0xAA);
        let mut reader = &buf[..];
        assert_eq!(reader.read_data_byte_array().unwrap(), [9, 8, 7]);
        assert_eq!(reader, [0xAA]);
    }

    #[test]
    fn negative_byte_array() {
        let mut reader = &[0xFFu8, 0xFF, 0xFF, 0xFF][..];
        let err = reader.read_data_byte_array().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

}
