// Var-int framing shared by the binary index snapshot format.
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Error as IoError, ErrorKind as IoErrorKind, Read, Write};

const MAX_VAR_STRING_LEN: u64 = 1024;

pub fn write_var_int<W: Write + WriteBytesExt>(w: &mut W, n: u64) -> Result<usize, IoError> {
    if n < 0xfd {
        w.write_u8(n as u8)?;
        Ok(1)
    } else if n <= 0xffff {
        w.write_u8(0xfd)?;
        w.write_u16::<LittleEndian>(n as u16)?;
        Ok(3)
    } else if n <= 0xffff_ffff {
        w.write_u8(0xfe)?;
        w.write_u32::<LittleEndian>(n as u32)?;
        Ok(5)
    } else {
        w.write_u8(0xff)?;
        w.write_u64::<LittleEndian>(n)?;
        Ok(9)
    }
}

pub fn read_var_int<R: Read + ReadBytesExt>(r: &mut R) -> Result<u64, IoError> {
    match r.read_u8()? {
        0xff => r.read_u64::<LittleEndian>(),
        0xfe => r.read_u32::<LittleEndian>().map(|x| x as u64),
        0xfd => r.read_u16::<LittleEndian>().map(|x| x as u64),
        n => Ok(n as u64),
    }
}

pub fn write_var_string<W: Write + WriteBytesExt>(w: &mut W, s: &str) -> Result<usize, IoError> {
    let mut written = write_var_int(w, s.len() as u64)?;
    w.write_all(s.as_bytes())?;
    written += s.len();
    Ok(written)
}

pub fn read_var_string<R: Read + ReadBytesExt>(r: &mut R) -> Result<String, IoError> {
    let len = read_var_int(r)?;
    if len > MAX_VAR_STRING_LEN {
        return Err(IoError::new(IoErrorKind::InvalidData, "VarString too long"));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| IoError::new(IoErrorKind::InvalidData, "Invalid UTF-8 in VarString"))
}
