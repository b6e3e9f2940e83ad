//! Runs Lua scripts with the `mdbx` module available.

use crate::{Error, Result};
use mlua::Lua;
use std::path::Path;
use std::time::{Duration, Instant};

/// Runs scripts in fresh Lua states.
///
/// Each run gets its own state with `require "mdbx"` preloaded. With a
/// timeout, a hook checks the elapsed time every 1000 instructions and
/// aborts the script once it is exceeded.
///
/// # Example
///
/// ```rust,no_run
/// use mdbx_lua::host::ScriptRunner;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), mdbx_lua::Error> {
/// let runner = ScriptRunner::new(Some(Duration::from_secs(5)));
/// let result = runner.run(r#"
///     local mdbx = require "mdbx"
///     local env = assert(mdbx.open("./data.mdbx"))
///     env:set("counter", 1)
///     return tostring(env:get("counter"))
/// "#)?;
/// assert_eq!(result.as_deref(), Some("1.0"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptRunner {
    /// Maximum script execution time
    timeout: Option<Duration>,
}

impl ScriptRunner {
    /// Creates a runner with an optional time limit.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    /// Runs `script` and returns its result rendered as a string; `None`
    /// when it returns nothing or `nil`.
    ///
    /// # Errors
    ///
    /// [`Error::Script`] on a syntax error, a runtime error or a timeout.
    pub fn run(&self, script: &str) -> Result<Option<String>> {
        self.run_named(script, "script")
    }

    /// Reads and runs a script file.
    pub fn run_file(&self, path: impl AsRef<Path>) -> Result<Option<String>> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Script(format!("cannot read {}: {}", path.display(), e)))?;
        self.run_named(&source, &path.display().to_string())
    }

    fn run_named(&self, script: &str, name: &str) -> Result<Option<String>> {
        let start_time = Instant::now();
        let lua = Lua::new();

        if let Some(timeout) = self.timeout {
            lua.set_hook(
                mlua::HookTriggers {
                    every_nth_instruction: Some(1000),
                    ..Default::default()
                },
                move |_lua, _debug| {
                    if start_time.elapsed() > timeout {
                        Err(mlua::Error::RuntimeError("Script execution timeout".to_string()))
                    } else {
                        Ok(())
                    }
                },
            );
        }

        let result = (|| -> mlua::Result<Option<String>> {
            super::preload(&lua)?;
            let value = lua.load(script).set_name(name).eval::<mlua::Value<'_>>()?;
            Ok(match value {
                mlua::Value::Nil => None,
                mlua::Value::Boolean(b) => Some(b.to_string()),
                other => {
                    let type_name = other.type_name();
                    match lua.coerce_string(other)? {
                        Some(s) => Some(s.to_string_lossy().into_owned()),
                        None => Some(format!("<{}>", type_name)),
                    }
                }
            })
        })();

        match result {
            Ok(output) => {
                log::info!("Lua script {} finished in {:?}", name, start_time.elapsed());
                Ok(output)
            }
            Err(e) => {
                log::warn!("Lua script {} failed: {}", name, e);
                Err(Error::Script(format!("Lua script failed: {}", e)))
            }
        }
    }
}
