//! Reading of the legacy chunk store format, version 1. This format is never written.
//! 
//! It differs from the current format in two places: placement bits are stored as a 
//! 16x64x16 array of booleans (X, Y then Z) and metadata locations are packed 
//! chunk-local coordinates instead of flat indices.

use std::io::{self, Read};

use arcstr::ArcStr;

use crate::util::{ReadDataExt, new_invalid_data_err};
use crate::loc::{calc_index, CHUNK_HEIGHT, CHUNK_WIDTH};
use crate::bits::PlacementBits;

use super::loaded::{read_chunk_loc, read_metadata};
use super::LoadedChunkStore;


pub(super) fn read(mut reader: impl Read, world: ArcStr) -> io::Result<LoadedChunkStore> {

    // The stored world name is not authoritative.
    let _ = reader.read_data_string()?;
    let chunk = read_chunk_loc(&mut reader)?;
    let placed = read_placed(&mut reader)?;
    let metadata = read_metadata(&mut reader, read_packed_index)?;

    Ok(LoadedChunkStore::from_parts(world, chunk, placed, metadata))

}

/// Read the nested boolean array and convert it to placement bits.
fn read_placed(reader: &mut impl Read) -> io::Result<PlacementBits> {

    let mut placed = PlacementBits::new();

    for x in 0..CHUNK_WIDTH {
        for y in 0..CHUNK_HEIGHT {
            for z in 0..CHUNK_WIDTH {
                placed.set(calc_index(x, y, z), reader.read_data_boolean()?);
            }
        }
    }

    Ok(placed)

}

/// Read a location packed in an integer, its little-endian bytes being X, Y and Z.
fn read_packed_index(reader: &mut impl Read) -> io::Result<usize> {

    let [x, y, z, _] = reader.read_data_int()?.to_le_bytes();
    let (x, y, z) = (x as usize, y as usize, z as usize);

    if x >= CHUNK_WIDTH || y >= CHUNK_HEIGHT || z >= CHUNK_WIDTH {
        return Err(new_invalid_data_err("packed block location out of chunk"));
    }

    Ok(calc_index(x, y, z))

}
