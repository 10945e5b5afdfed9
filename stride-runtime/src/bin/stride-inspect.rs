//! Print the effective flags and cache TTLs for a configuration as JSON.
//!
//! Usage: `stride-inspect --config <path> [--session <id>]`
//! (`STRIDE_CONFIG` may replace `--config`).

use stride_core::{SessionId, StrideError};
use stride_runtime::Runtime;

fn main() -> Result<(), StrideError> {
    let session = match session_from_args() {
        Some(id) => SessionId::new(id)?,
        None => SessionId::generate(),
    };
    let config = stride_core::RuntimeConfig::load()?;
    let runtime: Runtime<()> = Runtime::new(config, session, ())?;

    let report = serde_json::to_string_pretty(&runtime.report()).map_err(|e| {
        stride_core::TelemetryError::Serialization {
            reason: e.to_string(),
        }
    })?;
    println!("{report}");
    Ok(())
}

fn session_from_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--session" {
            return args.next();
        }
    }
    None
}
