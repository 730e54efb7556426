use crate::{Error, Result};

/// Big endian cursor over a borrowed byte slice.
#[derive(Clone, Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn has_more_data(&self) -> bool {
        self.pos < self.data.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn skip(&mut self, bytes: usize) -> Result<()> {
        self.read_bytes(bytes).map(|_| ())
    }

    pub fn read_bytes(&mut self, bytes: usize) -> Result<&'a [u8]> {
        if bytes > self.remaining() {
            return Err(Error::UnexpectedEof {
                offset: self.pos,
                wanted: bytes,
                available: self.remaining(),
            });
        }

        let data = self.data;
        let slice = &data[self.pos..self.pos + bytes];
        self.pos += bytes;
        Ok(slice)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0; 2];
        buf.copy_from_slice(self.read_bytes(2)?);
        Ok(u16::from_be_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_be_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_integers() {
        let data = [0, 1, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 3];
        let mut reader = Reader::new(&data);

        assert_eq!(reader.read_u16().unwrap(), 1);
        assert_eq!(reader.read_u32().unwrap(), 2);
        assert_eq!(reader.read_u64().unwrap(), 3);
        assert!(!reader.has_more_data());
    }

    #[test]
    fn refuses_to_read_past_the_end() {
        let data = [1, 2, 3];
        let mut reader = Reader::new(&data);
        reader.skip(2).unwrap();

        let err = reader.read_u16().unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedEof {
                offset: 2,
                wanted: 2,
                available: 1
            }
        ));
        assert_eq!(reader.position(), 2);
    }
}
