use std::ops::RangeFrom;

use nom::bytes::complete::take;
use nom::error::{make_error, ErrorKind, ParseError};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult, InputIter, InputLength, Slice};

use crate::Error;

/// Largest value a DTLS 48 bit sequence number can hold.
pub const MAX_U48: u64 = (1 << 48) - 1;

pub fn be_u48<I, E: ParseError<I>>(input: I) -> IResult<I, u64, E>
where
    I: Slice<RangeFrom<usize>> + InputIter<Item = u8> + InputLength,
{
    let bound: usize = 6;

    if input.input_len() < bound {
        Err(Err::Error(make_error(input, ErrorKind::Eof)))
    } else {
        let mut res = 0u64;

        for byte in input.iter_elements().take(bound) {
            res = (res << 8) + byte as u64;
        }

        Ok((input.slice(bound..), res))
    }
}

/// A vector with a one byte length prefix.
pub fn vec_u8(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u8(input)?;
    take(len as usize)(input)
}

/// A vector with a two byte length prefix.
pub fn vec_u16(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, len) = be_u16(input)?;
    take(len as usize)(input)
}

pub fn put_u24(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes()[1..]);
}

pub fn put_u48(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes()[2..]);
}

/// Write `v` behind a one byte length prefix.
pub fn put_vec_u8(out: &mut Vec<u8>, v: &[u8]) -> Result<(), Error> {
    let len = u8::try_from(v.len())
        .map_err(|_| Error::Serialize(format!("{} bytes exceed a u8 length prefix", v.len())))?;
    out.push(len);
    out.extend_from_slice(v);
    Ok(())
}

/// Write `v` behind a two byte length prefix.
pub fn put_vec_u16(out: &mut Vec<u8>, v: &[u8]) -> Result<(), Error> {
    let len = u16::try_from(v.len())
        .map_err(|_| Error::Serialize(format!("{} bytes exceed a u16 length prefix", v.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(v);
    Ok(())
}
