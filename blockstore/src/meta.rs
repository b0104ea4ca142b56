//! Per block metadata record, storing values keyed by plugin and key identifiers.

use std::io::{self, Read, Write};

use indexmap::IndexMap;

use crate::util::{ReadDataExt, WriteDataExt, new_invalid_data_err};


const TAG_BYTE       : i8 = 1;
const TAG_SHORT      : i8 = 2;
const TAG_INT        : i8 = 3;
const TAG_LONG       : i8 = 4;
const TAG_FLOAT      : i8 = 5;
const TAG_DOUBLE     : i8 = 6;
const TAG_BYTE_ARRAY : i8 = 7;
const TAG_STRING     : i8 = 8;
const TAG_BOOL       : i8 = 11;


/// All values stored by a single plugin in a block's metadata, keyed by key id.
pub type PluginValues = IndexMap<i32, MetaValue>;
/// All values stored in a block's metadata, keyed by plugin id.
pub type BlockValues = IndexMap<i32, PluginValues>;


/// A value that can be stored in block metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    String(String),
    ByteArray(Vec<u8>),
}

impl MetaValue {

    fn read_from(reader: &mut impl Read) -> io::Result<Self> {
        Ok(match reader.read_data_byte()? {
            TAG_BYTE => Self::Byte(reader.read_data_byte()?),
            TAG_SHORT => Self::Short(reader.read_data_short()?),
            TAG_INT => Self::Int(reader.read_data_int()?),
            TAG_LONG => Self::Long(reader.read_data_long()?),
            TAG_FLOAT => Self::Float(reader.read_data_float()?),
            TAG_DOUBLE => Self::Double(reader.read_data_double()?),
            TAG_BOOL => Self::Bool(reader.read_data_boolean()?),
            TAG_STRING => Self::String(reader.read_data_string()?),
            TAG_BYTE_ARRAY => Self::ByteArray(reader.read_data_byte_array()?),
            _ => return Err(new_invalid_data_err("unknown metadata value tag")),
        })
    }

    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        match self {
            Self::Byte(v) => {
                writer.write_data_byte(TAG_BYTE)?;
                writer.write_data_byte(*v)
            }
            Self::Short(v) => {
                writer.write_data_byte(TAG_SHORT)?;
                writer.write_data_short(*v)
            }
            Self::Int(v) => {
                writer.write_data_byte(TAG_INT)?;
                writer.write_data_int(*v)
            }
            Self::Long(v) => {
                writer.write_data_byte(TAG_LONG)?;
                writer.write_data_long(*v)
            }
            Self::Float(v) => {
                writer.write_data_byte(TAG_FLOAT)?;
                writer.write_data_float(*v)
            }
            Self::Double(v) => {
                writer.write_data_byte(TAG_DOUBLE)?;
                writer.write_data_double(*v)
            }
            Self::Bool(v) => {
                writer.write_data_byte(TAG_BOOL)?;
                writer.write_data_boolean(*v)
            }
            Self::String(v) => {
                writer.write_data_byte(TAG_STRING)?;
                writer.write_data_string(v)
            }
            Self::ByteArray(v) => {
                writer.write_data_byte(TAG_BYTE_ARRAY)?;
                writer.write_data_byte_array(v)
            }
        }
    }

}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for MetaValue {
                #[inline]
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_value! {
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    bool => Bool,
    String => String,
    Vec<u8> => ByteArray,
}

impl From<&str> for MetaValue {
    #[inline]
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}


/// Metadata of a single block, every plugin has its own key space. A plugin with no
/// values is never listed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockMeta {
    plugins: BlockValues,
}

impl BlockMeta {

    pub fn new() -> Self {
        Self::default()
    }

    /// Get a single value of a plugin.
    pub fn value(&self, plugin: i32, key: i32) -> Option<&MetaValue> {
        self.plugins.get(&plugin)?.get(&key)
    }

    /// Get a copy of all values of a plugin, empty if the plugin has no value.
    pub fn plugin_values(&self, plugin: i32) -> PluginValues {
        self.plugins.get(&plugin).cloned().unwrap_or_default()
    }

    /// Get a copy of all values of all plugins.
    pub fn values(&self) -> BlockValues {
        self.plugins.clone()
    }

    /// Set a value, returning the previous one if any.
    pub fn set_value(&mut self, plugin: i32, key: i32, value: MetaValue) -> Option<MetaValue> {
        self.plugins.entry(plugin).or_default().insert(key, value)
    }

    /// Remove a value, returning it if it was present.
    pub fn remove_value(&mut self, plugin: i32, key: i32) -> Option<MetaValue> {
        let values = self.plugins.get_mut(&plugin)?;
        let prev = values.shift_remove(&key);
        if values.is_empty() {
            self.plugins.shift_remove(&plugin);
        }
        prev
    }

    /// Iterate over plugins that have at least one value.
    pub fn plugins(&self) -> impl Iterator<Item = i32> + '_ {
        self.plugins.keys().copied()
    }

    #[inline]
    pub fn contains_plugin(&self, plugin: i32) -> bool {
        self.plugins.contains_key(&plugin)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Write the values of a single plugin, other plugins are not written.
    pub fn write_plugin(&self, mut writer: impl Write, plugin: i32) -> io::Result<()> {

        let Some(values) = self.plugins.get(&plugin) else {
            return writer.write_data_int(0);
        };

        writer.write_data_int(values.len() as i32)?;
        for (&key, value) in values {
            writer.write_data_int(key)?;
            value.write_to(&mut writer)?;
        }

        Ok(())

    }

    /// Read values of a single plugin previously written by [`Self::write_plugin`] and
    /// merge them into this metadata.
    pub fn read_plugin(&mut self, mut reader: impl Read, plugin: i32) -> io::Result<()> {

        let len = reader.read_data_int()?;
        if len < 0 {
            return Err(new_invalid_data_err("negative metadata value count"));
        }

        for _ in 0..len {
            let key = reader.read_data_int()?;
            let value = MetaValue::read_from(&mut reader)?;
            self.set_value(plugin, key, value);
        }

        Ok(())

    }

}
