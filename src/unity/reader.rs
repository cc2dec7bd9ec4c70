use super::{Result, UnityError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

macro_rules! impl_read_num {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty> {
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            buf.copy_from_slice(self.read_bytes(std::mem::size_of::<$ty>())?);
            Ok(match self.endian {
                Endian::Little => <$ty>::from_le_bytes(buf),
                Endian::Big => <$ty>::from_be_bytes(buf),
            })
        }
    };
}

/// Cursor over an in-memory byte slice with switchable byte order.
///
/// Alignment is always relative to the start of the slice.
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self {
            data,
            pos: 0,
            endian,
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn set_endian(&mut self, endian: Endian) {
        self.endian = endian;
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(UnityError::UnexpectedEof {
                offset: pos,
                wanted: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.read_bytes(count).map(|_| ())
    }

    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let rem = self.pos % alignment;
        if rem != 0 {
            // Trailing padding may be cut off at the very end of an object.
            self.pos = (self.pos + alignment - rem).min(self.data.len());
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or(UnityError::UnexpectedEof {
                offset: self.pos,
                wanted: count,
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    impl_read_num!(read_u16, u16);
    impl_read_num!(read_i16, i16);
    impl_read_num!(read_u32, u32);
    impl_read_num!(read_i32, i32);
    impl_read_num!(read_u64, u64);
    impl_read_num!(read_i64, i64);
    impl_read_num!(read_f32, f32);
    impl_read_num!(read_f64, f64);

    /// Reads a signed 32-bit count and rejects negative or absurd values.
    pub fn read_count(&mut self, limit: usize) -> Result<usize> {
        let offset = self.pos;
        let raw = self.read_i32()?;
        usize::try_from(raw)
            .ok()
            .filter(|count| *count <= limit)
            .ok_or_else(|| UnityError::Malformed(format!("invalid count {raw} at offset {offset}")))
    }

    /// Reads a NUL-terminated string. Invalid UTF-8 is replaced, not rejected.
    pub fn read_cstring(&mut self) -> Result<String> {
        let start = self.pos;
        let len = self.data[start.min(self.data.len())..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(UnityError::UnexpectedEof {
                offset: start,
                wanted: 1,
            })?;
        let bytes = self.read_bytes(len)?;
        self.pos += 1;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Length-prefixed string padded to a 4 byte boundary.
    pub fn read_aligned_string(&mut self) -> Result<String> {
        let len = self.read_count(self.remaining())?;
        let bytes = self.read_bytes(len)?;
        self.align(4)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_both_byte_orders() {
        let data = [0x00, 0x00, 0x01, 0x02, 0x02, 0x01, 0x00, 0x00];
        let mut reader = BinaryReader::new(&data, Endian::Big);
        assert_eq!(reader.read_u32().unwrap(), 0x0102);
        reader.set_endian(Endian::Little);
        assert_eq!(reader.read_u32().unwrap(), 0x0102);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_eof_is_reported_with_offset() {
        let data = [1u8, 2, 3];
        let mut reader = BinaryReader::new(&data, Endian::Little);
        reader.read_u8().unwrap();
        match reader.read_u32() {
            Err(UnityError::UnexpectedEof { offset, wanted }) => {
                assert_eq!(offset, 1);
                assert_eq!(wanted, 4);
            }
            other => panic!("expected eof, got {:?}", other),
        }
    }

    #[test]
    fn test_cstring_and_aligned_string() {
        let mut data = b"UnityFS\0".to_vec();
        data.extend_from_slice(&5i32.to_le_bytes());
        data.extend_from_slice(b"blade\0\0\0");
        data.extend_from_slice(&7u32.to_le_bytes());

        let mut reader = BinaryReader::new(&data, Endian::Little);
        assert_eq!(reader.read_cstring().unwrap(), "UnityFS");
        assert_eq!(reader.read_aligned_string().unwrap(), "blade");
        assert_eq!(reader.read_u32().unwrap(), 7);
    }

    #[test]
    fn test_negative_count_is_malformed() {
        let data = (-1i32).to_le_bytes();
        let mut reader = BinaryReader::new(&data, Endian::Little);
        assert!(matches!(
            reader.read_count(100),
            Err(UnityError::Malformed(_))
        ));
    }
}
