pub mod profile;
pub mod session;

use std::path::Path;

use serde::Serialize;

use crate::Result;

/// Pretty JSON written to a sibling temp file, then renamed over `path`.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
