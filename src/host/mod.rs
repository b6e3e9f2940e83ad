//! The `mdbx` Lua module.
//!
//! ```lua
//! local mdbx = require "mdbx"
//!
//! local env = assert(mdbx.open("./data.mdbx", { max_tables = 8 }))
//! env:set("greeting", "hello")
//!
//! local txn = assert(env:begin())
//! local users = assert(txn:open_table("users", mdbx.CREATE))
//! users:put(txn, "alice", 42)
//! assert(txn:commit())
//!
//! print(env:get("greeting"))          --> hello
//! local found = env:mget({ "greeting", "missing" })
//! env:close()
//! ```
//!
//! Every engine constant is exported by name (`mdbx.NOSUBDIR`,
//! `mdbx.TXN_RDONLY`, `mdbx.opt_sync_bytes`, ...).

pub mod convert;
pub mod runner;
pub mod userdata;

pub use runner::ScriptRunner;
pub use userdata::{LuaCursor, LuaEnv, LuaTable, LuaTxn};

use crate::config::EnvOptions;
use crate::constants::{DebugFlags, EnvFlags, LogLevel, CONSTANTS};
use crate::{Environment, Error, Result};
use mlua::{Lua, Table, Value as LuaValue};

/// Name the module is registered under.
pub const MODULE_NAME: &str = "mdbx";

/// Builds the `mdbx` module table.
pub fn module(lua: &Lua) -> mlua::Result<Table<'_>> {
    let module = lua.create_table()?;

    module.set(
        "open",
        lua.create_function(|lua, (path, opts): (LuaValue<'_>, Option<Table<'_>>)| {
            let opened = open_env(&path, opts.as_ref());
            match opened {
                Ok(env) => Ok((LuaValue::UserData(lua.create_userdata(LuaEnv::new(env))?), None)),
                Err(err) => Ok((LuaValue::Nil, Some(err.to_string()))),
            }
        })?,
    )?;

    module.set(
        "setup_debug",
        lua.create_function(|_, (level, flags): (i32, Option<u32>)| {
            let Some(level) = LogLevel::from_i32(level) else {
                return Ok((None, Some(format!("unknown log level {}", level))));
            };
            let flags = DebugFlags::from_bits_truncate(flags.unwrap_or(0));
            Ok((Some(crate::setup_debug(level, flags) as i32), None))
        })?,
    )?;

    module.set("strerror", lua.create_function(|_, code: i32| Ok(crate::strerror(code)))?)?;

    for (name, value) in CONSTANTS {
        module.set(*name, *value)?;
    }
    module.set("_VERSION", env!("CARGO_PKG_VERSION"))?;

    Ok(module)
}

/// Registers the module in `package.preload` so `require "mdbx"` finds it.
pub fn preload(lua: &Lua) -> mlua::Result<()> {
    let package: Table<'_> = lua.globals().get("package")?;
    let loaders: Table<'_> = package.get("preload")?;
    loaders.set(MODULE_NAME, lua.create_function(|lua, ()| module(lua))?)?;
    Ok(())
}

fn open_env(path: &LuaValue<'_>, opts: Option<&Table<'_>>) -> Result<Environment> {
    let path = match path {
        LuaValue::String(s) => s.to_str().map_err(Error::from)?.to_string(),
        LuaValue::Nil => return Err(Error::InvalidPath),
        other => return Err(Error::unsupported_type(other.type_name())),
    };
    let options = match opts {
        Some(opts) => options_from_lua(opts)?,
        None => EnvOptions::default(),
    };
    Environment::open(path, options)
}

fn options_from_lua(opts: &Table<'_>) -> Result<EnvOptions> {
    let mut options = EnvOptions::default();
    if let Some(flags) = opts.get::<_, Option<u32>>("flags")? {
        options = options.flags(EnvFlags::from_bits_retain(flags));
    }
    if let Some(max_readers) = opts.get::<_, Option<u32>>("max_readers")? {
        options = options.max_readers(max_readers);
    }
    if let Some(max_tables) = opts.get::<_, Option<u32>>("max_tables")? {
        options = options.max_tables(max_tables);
    }
    if let Some(mode) = opts.get::<_, Option<u32>>("mode")? {
        options = options.mode(mode);
    }
    Ok(options)
}
