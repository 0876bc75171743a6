use std::ffi::OsStr;
use std::process::{Command, Output};

/// Runs the compiled `netagg` binary with quiet logging.
///
/// # Errors
///
/// Returns an error if the binary cannot be located or spawned.
pub fn run_netagg<I, S>(args: I) -> Result<Output, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let bin = netagg_bin()?;
    Command::new(bin)
        .args(args)
        .env("NETAGG_LOG", "error")
        .env_remove("NETAGG_CONFIG")
        .output()
        .map_err(|err| format!("run netagg failed: {}", err))
}

fn netagg_bin() -> Result<String, String> {
    option_env!("CARGO_BIN_EXE_netagg").map_or_else(
        || Err("CARGO_BIN_EXE_netagg missing at compile time.".to_owned()),
        |path| Ok(path.to_owned()),
    )
}

/// One packet event as a JSON line.
#[must_use]
pub fn packet_line(millis: u64, src: &str) -> String {
    format!(
        r#"{{"type":"packet","stamp":{{"secs":{},"nanos":{}}},"direction":"to_host","l3":"ipv4","l4":"tcp","size":64,"src":"{}"}}"#,
        millis / 1_000,
        (millis % 1_000) * 1_000_000,
        src
    )
}
