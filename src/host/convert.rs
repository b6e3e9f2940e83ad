//! Conversions between Lua values and stored [`Value`]s.

use crate::codec::{Decoded, Value};
use crate::{Error, Result};
use mlua::{IntoLua, Lua, Value as LuaValue};

/// Converts a Lua argument into a storable value.
///
/// Strings are stored as raw bytes, integers and floats as numbers.
/// Anything else fails with [`Error::UnsupportedType`].
pub fn value_from_lua(value: &LuaValue<'_>) -> Result<Value> {
    match value {
        LuaValue::String(s) => Ok(Value::Text(s.as_bytes().to_vec())),
        LuaValue::Integer(i) => Ok(Value::Number(*i as f64)),
        LuaValue::Number(n) => Ok(Value::Number(*n)),
        LuaValue::Boolean(b) => Ok(Value::Boolean(*b)),
        other => Err(Error::unsupported_type(other.type_name())),
    }
}

/// Converts a Lua argument into key bytes. Numbers are keyed by their Lua
/// string form. Length limits are checked by the operation, not here.
pub fn key_from_lua(value: &LuaValue<'_>) -> Result<Vec<u8>> {
    match value {
        LuaValue::String(s) => Ok(s.as_bytes().to_vec()),
        LuaValue::Integer(i) => Ok(i.to_string().into_bytes()),
        LuaValue::Number(n) => Ok(number_key(*n).into_bytes()),
        other => Err(Error::unsupported_type(other.type_name())),
    }
}

// Lua 5.4 keeps the ".0" on integral floats.
fn number_key(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 {
        format!("{:.1}", n)
    } else {
        n.to_string()
    }
}

impl<'lua> IntoLua<'lua> for Value {
    fn into_lua(self, lua: &'lua Lua) -> mlua::Result<LuaValue<'lua>> {
        Ok(match self {
            Value::Text(bytes) => LuaValue::String(lua.create_string(&bytes)?),
            Value::Number(n) => LuaValue::Number(n),
            Value::Boolean(b) => LuaValue::Boolean(b),
        })
    }
}

impl<'lua> IntoLua<'lua> for Decoded {
    fn into_lua(self, lua: &'lua Lua) -> mlua::Result<LuaValue<'lua>> {
        match self {
            Decoded::Value(value) => value.into_lua(lua),
            Decoded::Unknown { .. } => Ok(LuaValue::Nil),
        }
    }
}
