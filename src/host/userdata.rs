//! Userdata wrappers for the handle types.
//!
//! Recoverable failures come back as `nil, message` (`false, message` for
//! operations whose success value is a boolean). Using a closed handle
//! raises a Lua error.
//!
//! Each child userdata holds its parent userdata as its user value: a
//! transaction its environment, a table its environment, a cursor its
//! transaction. Cursor methods find their transaction through it.

use super::convert::{key_from_lua, value_from_lua};
use crate::constants::{TableFlags, TxnFlags};
use crate::cursor::{Cursor, Entry};
use crate::{Environment, Error, Result, Table, Transaction};
use mlua::{AnyUserData, IntoLua, Lua, MetaMethod, UserData, UserDataMethods, Value as LuaValue};

type Reply<'lua> = (LuaValue<'lua>, Option<String>);

fn failure<'lua>(err: Error) -> mlua::Result<Reply<'lua>> {
    match err {
        Error::HandleClosed(_) => Err(mlua::Error::external(err)),
        err => Ok((LuaValue::Nil, Some(err.to_string()))),
    }
}

fn reply<'lua, T: IntoLua<'lua>>(lua: &'lua Lua, result: Result<T>) -> mlua::Result<Reply<'lua>> {
    match result {
        Ok(value) => Ok((value.into_lua(lua)?, None)),
        Err(err) => failure(err),
    }
}

fn status(result: Result<()>) -> mlua::Result<(bool, Option<String>)> {
    match result {
        Ok(()) => Ok((true, None)),
        Err(err @ Error::HandleClosed(_)) => Err(mlua::Error::external(err)),
        Err(err) => Ok((false, Some(err.to_string()))),
    }
}

/// The `Environment` userdata.
pub struct LuaEnv {
    env: Environment,
}

impl LuaEnv {
    /// Wraps an open environment.
    pub fn new(env: Environment) -> Self {
        Self { env }
    }

    /// The wrapped environment.
    pub fn env(&self) -> &Environment {
        &self.env
    }
}

impl UserData for LuaEnv {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("get", |lua, this, key: LuaValue<'lua>| {
            reply(lua, key_from_lua(&key).and_then(|key| this.env.get_one(key)))
        });

        methods.add_method("mget", |lua, this, keys: mlua::Table<'lua>| {
            let keys = keys
                .sequence_values::<LuaValue<'lua>>()
                .map(|key| key.map_err(Error::from).and_then(|key| key_from_lua(&key)))
                .collect::<Result<Vec<_>>>();
            let found = match keys.and_then(|keys| this.env.get_many(&keys)) {
                Ok(found) => found,
                Err(err) => return failure(err),
            };
            let out = lua.create_table()?;
            for (key, value) in found {
                out.set(lua.create_string(&key)?, value)?;
            }
            Ok((LuaValue::Table(out), None))
        });

        methods.add_method("set", |_, this, (key, value): (LuaValue<'lua>, LuaValue<'lua>)| {
            let key = key_from_lua(&key);
            status(key.and_then(|key| value_from_lua(&value).and_then(|value| this.env.set(key, &value))))
        });

        methods.add_method("close", |_, this, ()| {
            this.env.close();
            Ok(true)
        });

        methods.add_method("path", |lua, this, ()| {
            reply(lua, this.env.path().map(|path| path.to_string_lossy().into_owned()))
        });
        methods.add_method("fd", |lua, this, ()| reply(lua, this.env.fd()));
        methods.add_method("max_tables", |lua, this, ()| reply(lua, this.env.max_tables()));
        methods.add_method("max_readers", |lua, this, ()| reply(lua, this.env.max_readers()));
        methods.add_method("flags", |lua, this, ()| reply(lua, this.env.flags().map(|flags| flags.bits())));

        methods.add_method("set_option", |_, this, (option, value): (u32, u64)| {
            status(this.env.set_option(option, value))
        });
        methods.add_method("get_option", |lua, this, option: u32| reply(lua, this.env.get_option(option)));

        methods.add_method("sync", |_, this, force: Option<bool>| status(this.env.sync(force.unwrap_or(false))));
        methods.add_method("compact", |_, this, ()| status(this.env.compact()));

        methods.add_method("info", |lua, this, ()| {
            let info = match this.env.info() {
                Ok(info) => info,
                Err(err) => return failure(err),
            };
            let out = lua.create_table()?;
            out.set("last_txn_id", info.last_txn_id)?;
            out.set("max_readers", info.max_readers)?;
            out.set("readers_in_use", info.readers_in_use)?;
            out.set("open_tables", info.open_tables)?;
            out.set("data_size", info.data_size)?;
            Ok((LuaValue::Table(out), None))
        });

        methods.add_function("begin", |lua, (ud, flags): (AnyUserData<'lua>, Option<u32>)| {
            let flags = TxnFlags::from_bits_retain(flags.unwrap_or(0));
            let begun = ud.borrow::<LuaEnv>()?.env.begin(flags);
            match begun {
                Ok(txn) => {
                    let txn_ud = lua.create_userdata(LuaTxn { txn })?;
                    txn_ud.set_user_value(ud)?;
                    Ok((LuaValue::UserData(txn_ud), None))
                }
                Err(err) => failure(err),
            }
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(match this.env.path() {
                Ok(path) => format!("mdbx.env: {}", path.display()),
                Err(_) => "mdbx.env: closed".to_string(),
            })
        });
    }
}

/// The `Transaction` userdata.
pub struct LuaTxn {
    txn: Transaction,
}

impl UserData for LuaTxn {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method_mut("commit", |_, this, ()| status(this.txn.commit()));
        methods.add_method_mut("abort", |_, this, ()| status(this.txn.abort()));
        methods.add_method_mut("reset", |_, this, ()| status(this.txn.reset()));
        methods.add_method_mut("renew", |_, this, ()| status(this.txn.renew()));
        methods.add_method_mut("break_", |_, this, ()| status(this.txn.break_()));
        methods.add_method("state", |_, this, ()| Ok(this.txn.state().to_string()));
        methods.add_method("id", |_, this, ()| Ok(this.txn.id()));

        methods.add_function(
            "open_table",
            |lua, (ud, name, flags): (AnyUserData<'lua>, Option<String>, Option<u32>)| {
                let flags = TableFlags::from_bits_retain(flags.unwrap_or(0));
                let opened = ud.borrow_mut::<LuaTxn>()?.txn.open_table(name.as_deref(), flags);
                match opened {
                    Ok(table) => {
                        let env_ud: AnyUserData<'lua> = ud.user_value()?;
                        let table_ud = lua.create_userdata(LuaTable { table })?;
                        table_ud.set_user_value(env_ud)?;
                        Ok((LuaValue::UserData(table_ud), None))
                    }
                    Err(err) => failure(err),
                }
            },
        );

        methods.add_function("cursor", |lua, (ud, table_ud): (AnyUserData<'lua>, AnyUserData<'lua>)| {
            let opened = {
                let this = ud.borrow::<LuaTxn>()?;
                let table = table_ud.borrow::<LuaTable>()?;
                this.txn.cursor(&table.table)
            };
            match opened {
                Ok(cursor) => {
                    let cursor_ud = lua.create_userdata(LuaCursor { cursor })?;
                    cursor_ud.set_user_value(ud)?;
                    Ok((LuaValue::UserData(cursor_ud), None))
                }
                Err(err) => failure(err),
            }
        });

        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("mdbx.txn: {} ({})", this.txn.id(), this.txn.state()))
        });
    }
}

/// The `Table` userdata.
pub struct LuaTable {
    table: Table,
}

impl UserData for LuaTable {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_method("get", |lua, this, (txn_ud, key): (AnyUserData<'lua>, LuaValue<'lua>)| {
            let txn = txn_ud.borrow::<LuaTxn>()?;
            reply(lua, key_from_lua(&key).and_then(|key| this.table.get(&txn.txn, &key)))
        });

        methods.add_method(
            "put",
            |_, this, (txn_ud, key, value): (AnyUserData<'lua>, LuaValue<'lua>, LuaValue<'lua>)| {
                let mut txn = txn_ud.borrow_mut::<LuaTxn>()?;
                let key = key_from_lua(&key);
                status(key.and_then(|key| {
                    value_from_lua(&value).and_then(|value| this.table.put(&mut txn.txn, &key, &value))
                }))
            },
        );

        methods.add_method("delete", |_, this, (txn_ud, key): (AnyUserData<'lua>, LuaValue<'lua>)| {
            let mut txn = txn_ud.borrow_mut::<LuaTxn>()?;
            status(key_from_lua(&key).and_then(|key| this.table.delete(&mut txn.txn, &key)))
        });

        methods.add_method("close", |_, this, ()| status(this.table.close()));
        methods.add_method("name", |_, this, ()| Ok(this.table.name().map(str::to_string)));
    }
}

/// The `Cursor` userdata.
pub struct LuaCursor {
    cursor: Cursor,
}

/// Runs one cursor move. Returns `key, value`, a single `nil` past either
/// end, or `nil, message` on failure.
fn step<'lua, F>(lua: &'lua Lua, ud: AnyUserData<'lua>, op: F) -> mlua::Result<(LuaValue<'lua>, LuaValue<'lua>)>
where
    F: FnOnce(&mut Cursor, &Transaction) -> Result<Option<Entry>>,
{
    let txn_ud: AnyUserData<'lua> = ud.user_value()?;
    let txn = txn_ud.borrow::<LuaTxn>()?;
    let moved = {
        let mut this = ud.borrow_mut::<LuaCursor>()?;
        op(&mut this.cursor, &txn.txn)
    };
    match moved {
        Ok(Some((key, value))) => Ok((LuaValue::String(lua.create_string(&key)?), value.into_lua(lua)?)),
        Ok(None) => Ok((LuaValue::Nil, LuaValue::Nil)),
        Err(err @ Error::HandleClosed(_)) => Err(mlua::Error::external(err)),
        Err(err) => Ok((LuaValue::Nil, err.to_string().into_lua(lua)?)),
    }
}

impl UserData for LuaCursor {
    fn add_methods<'lua, M: UserDataMethods<'lua, Self>>(methods: &mut M) {
        methods.add_function("first", |lua, ud: AnyUserData<'lua>| step(lua, ud, |c, txn| c.first(txn)));
        methods.add_function("last", |lua, ud: AnyUserData<'lua>| step(lua, ud, |c, txn| c.last(txn)));
        methods.add_function("next", |lua, ud: AnyUserData<'lua>| step(lua, ud, |c, txn| c.next(txn)));
        methods.add_function("prev", |lua, ud: AnyUserData<'lua>| step(lua, ud, |c, txn| c.prev(txn)));
        methods.add_function("current", |lua, ud: AnyUserData<'lua>| step(lua, ud, |c, txn| c.current(txn)));
        methods.add_function("seek", |lua, (ud, key): (AnyUserData<'lua>, LuaValue<'lua>)| {
            step(lua, ud, move |c, txn| key_from_lua(&key).and_then(|key| c.seek(txn, &key)))
        });
        methods.add_method("close", |_, this, ()| {
            this.cursor.close();
            Ok(true)
        });
    }
}
