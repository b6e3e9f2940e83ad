// Lua Host Tests for mdbx-lua
// Scripts driving the `mdbx` module end to end

use mdbx_lua::host::{self, ScriptRunner};
use mdbx_lua::{EnvOptions, Environment, Error, Value};
use mlua::Lua;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// Prefixes `body` with a `path` local pointing at `file` in `dir`.
fn script(dir: &TempDir, file: &str, body: &str) -> String {
    let path = dir.path().join(file).to_string_lossy().into_owned();
    format!("local mdbx = require \"mdbx\"\nlocal path = {:?}\n{}", path, body)
}

fn run(dir: &TempDir, body: &str) -> Option<String> {
    ScriptRunner::new(Some(Duration::from_secs(10)))
        .run(&script(dir, "lua.mdbx", body))
        .unwrap()
}

/// Test autocommit set and get from a script
#[test]
fn test_set_and_get() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let result = run(
        &dir,
        r#"
        local env = assert(mdbx.open(path))
        assert(env:set("name", "lua"))
        assert(env:set("answer", 42))
        assert(env:set("flag", true))
        assert(env:get("name") == "lua")
        assert(env:get("answer") == 42)
        assert(env:get("flag") == true and type(env:get("flag")) == "boolean")
        assert(env:get("missing") == nil)
        env:close()
        return "ok"
        "#,
    );
    assert_eq!(result.as_deref(), Some("ok"));

    // The data is visible from Rust with the stored types.
    let env = Environment::open(dir.path().join("lua.mdbx"), EnvOptions::default()).unwrap();
    assert_eq!(env.get_one("name").unwrap(), Some(Value::from("lua")));
    assert_eq!(env.get_one("answer").unwrap(), Some(Value::Number(42.0)));
    assert_eq!(env.get_one("flag").unwrap(), Some(Value::Boolean(true)));
}

/// Test mget returns only present keys
#[test]
fn test_mget() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let result = run(
        &dir,
        r#"
        local env = assert(mdbx.open(path))
        env:set("a", "x")
        env:set("b", 3.5)
        local found = assert(env:mget({ "a", "b", "missing" }))
        local n = 0
        for _ in pairs(found) do n = n + 1 end
        assert(found.missing == nil)
        return string.format("%d %s %.1f", n, found.a, found.b)
        "#,
    );
    assert_eq!(result.as_deref(), Some("2 x 3.5"));
}

/// Test transactions, named tables and cursors from a script
#[test]
fn test_transactions_and_cursor() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let result = run(
        &dir,
        r#"
        local env = assert(mdbx.open(path, { max_tables = 4 }))
        local txn = assert(env:begin())
        local users = assert(txn:open_table("users", mdbx.CREATE))
        assert(users:put(txn, "carol", 3))
        assert(users:put(txn, "alice", 1))
        assert(users:put(txn, "bob", 2))
        assert(users:delete(txn, "carol"))
        assert(txn:commit())
        assert(txn:state() == "committed")

        local reader = assert(env:begin(mdbx.TXN_RDONLY))
        local cursor = assert(reader:cursor(users))
        local seen = {}
        local k, v = cursor:first()
        while k do
            seen[#seen + 1] = k .. "=" .. tostring(v)
            k, v = cursor:next()
        end
        local sk = cursor:seek("b")
        cursor:close()
        reader:abort()
        return table.concat(seen, ",") .. ";" .. sk .. ";" .. users:name()
        "#,
    );
    assert_eq!(result.as_deref(), Some("alice=1.0,bob=2.0;bob;users"));
}

/// Test that aborted writes are dropped and reset/renew work
#[test]
fn test_abort_reset_renew() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let result = run(
        &dir,
        r#"
        local env = assert(mdbx.open(path))
        env:set("k", "old")

        local reader = assert(env:begin(mdbx.TXN_RDONLY))
        local main = assert(reader:open_table())

        local txn = assert(env:begin())
        local t = assert(txn:open_table())
        assert(t:put(txn, "k", "aborted"))
        assert(txn:abort())
        assert(txn:state() == "aborted")

        env:set("k", "new")
        local before = main:get(reader, "k")
        assert(reader:reset())
        local ok, msg = main:get(reader, "k")
        assert(ok == nil and msg == "transaction is reset")
        assert(reader:renew())
        local after = main:get(reader, "k")
        return before .. " " .. after
        "#,
    );
    assert_eq!(result.as_deref(), Some("old new"));
}

/// Test the nil/false plus message convention for recoverable failures
#[test]
fn test_failure_conventions() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let result = run(
        &dir,
        r#"
        local env = assert(mdbx.open(path))
        local out = {}

        local ok, msg = env:set("", 1)
        out[#out + 1] = tostring(ok) .. ":" .. msg
        ok, msg = env:set("k", {})
        out[#out + 1] = tostring(ok) .. ":" .. msg

        local txn = assert(env:begin())
        local t = assert(txn:open_table())
        local v, err = t:get(txn, "missing")
        out[#out + 1] = tostring(v) .. ":" .. err:sub(1, 13)

        local named, err2 = txn:open_table("nope")
        out[#out + 1] = tostring(named) .. ":" .. err2:sub(1, 13)
        txn:abort()

        local bad, err3 = mdbx.open("")
        out[#out + 1] = tostring(bad) .. ":" .. err3
        return table.concat(out, "|")
        "#,
    );
    assert_eq!(
        result.as_deref(),
        Some("false:empty key|false:bad value type: table|nil:MDBX_NOTFOUND|nil:fail to open |nil:empty path")
    );
}

/// Test that using a closed handle raises a Lua error
#[test]
fn test_closed_handle_raises() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let result = run(
        &dir,
        r#"
        local env = assert(mdbx.open(path))
        local txn = assert(env:begin())
        local t = assert(txn:open_table())
        env:close()
        env:close()

        local ok1, e1 = pcall(env.path, env)
        local ok2, e2 = pcall(t.get, t, txn, "k")
        -- Closing a table on a closed environment is fine.
        local closed = t:close()
        return string.format("%s %s %s %s %s", tostring(ok1), tostring(e1):match("environment is closed") ~= nil,
            tostring(ok2), tostring(e2):match("environment is closed") ~= nil, tostring(closed))
        "#,
    );
    assert_eq!(result.as_deref(), Some("false true false true true"));
}

/// Test module constants, strerror and setup_debug
#[test]
fn test_module_functions() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let result = run(
        &dir,
        r#"
        local previous = mdbx.setup_debug(mdbx.LOG_DONTCHANGE)
        assert(type(previous) == "number")
        assert(mdbx.setup_debug(previous) == previous)
        assert(mdbx.strerror(0):match("^MDBX_SUCCESS"))
        assert(mdbx.REVERSEKEY == 2 and mdbx.TXN_TRY == 0x10000000)
        return mdbx._VERSION
        "#,
    );
    assert_eq!(result.as_deref(), Some(env!("CARGO_PKG_VERSION")));
}

/// Test options and environment info from a script
#[test]
fn test_options_and_info() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let result = run(
        &dir,
        r#"
        local env = assert(mdbx.open(path, { max_readers = 8 }))
        assert(env:set_option(mdbx.opt_sync_bytes, 65536))
        local ok, msg = env:set_option(mdbx.opt_max_db, 1)
        assert(ok == false and msg)
        env:set("k", 1)
        assert(env:sync(true))
        local info = assert(env:info())
        return string.format("%d %d %d %s", env:get_option(mdbx.opt_sync_bytes), env:max_readers(),
            info.readers_in_use, tostring(info.last_txn_id > 0))
        "#,
    );
    assert_eq!(result.as_deref(), Some("65536 8 0 true"));
}

/// Test compacting from a script
#[test]
fn test_compact() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let result = run(
        &dir,
        r#"
        local env = assert(mdbx.open(path))
        for i = 1, 200 do env:set("counter", i) end
        local before = env:info().data_size
        assert(env:compact())
        assert(env:info().data_size < before)
        return string.format("%d", env:get("counter"))
        "#,
    );
    assert_eq!(result.as_deref(), Some("200"));
}

/// Test running a script file and script failures
#[test]
fn test_script_files_and_failures() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("script.lua");
    std::fs::write(&file, script(&dir, "file.mdbx", "local env = assert(mdbx.open(path)); env:set('k', 'v'); return env:get('k')"))
        .unwrap();

    let runner = ScriptRunner::default();
    assert_eq!(runner.run_file(&file).unwrap().as_deref(), Some("v"));

    let err = runner.run("local mdbx = require 'mdbx'; error('stop here')").unwrap_err();
    assert!(matches!(err, Error::Script(ref msg) if msg.contains("stop here")));
    assert!(runner.run_file(Path::new("/nonexistent/script.lua")).is_err());
}

/// Test that the module can be installed into a caller-owned state
#[test]
fn test_embed_in_existing_state() {
    env_logger::try_init().ok();
    let dir = TempDir::new().unwrap();
    let lua = Lua::new();
    host::preload(&lua).unwrap();
    lua.globals().set("path", dir.path().join("embed.mdbx").to_string_lossy().into_owned()).unwrap();

    let count: i64 = lua
        .load(
            r#"
            local mdbx = require "mdbx"
            local env = assert(mdbx.open(path))
            for i = 1, 5 do env:set("k" .. i, i) end
            local n = 0
            for _ in pairs(env:mget({ "k1", "k2", "k3", "k4", "k5", "k6" })) do n = n + 1 end
            return n
            "#,
        )
        .eval()
        .unwrap();
    assert_eq!(count, 5);
}
