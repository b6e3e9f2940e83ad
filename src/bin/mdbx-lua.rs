//! Runs a Lua script with the `mdbx` module available.
//!
//! ```text
//! mdbx-lua <script.lua> [timeout-secs]
//! ```

use anyhow::{bail, Context, Result};
use mdbx_lua::host::ScriptRunner;
use std::time::Duration;

fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let Some(script) = args.next() else {
        bail!("usage: mdbx-lua <script.lua> [timeout-secs]");
    };
    let timeout = args
        .next()
        .map(|secs| secs.parse::<u64>().with_context(|| format!("invalid timeout {:?}", secs)))
        .transpose()?
        .map(Duration::from_secs);

    let runner = ScriptRunner::new(timeout);
    let output = runner.run_file(&script).with_context(|| format!("running {}", script))?;
    if let Some(output) = output {
        println!("{}", output);
    }
    Ok(())
}
