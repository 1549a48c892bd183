//! Machine-readable setup report.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

/// Where the proxies of a running testbed live.
#[derive(Debug, Serialize)]
pub struct Locations<'a> {
    /// baton proxy directory.
    pub baton: &'a Path,
    /// icommand proxy directory.
    pub icommands: &'a Path,
}

/// Writes the proxy locations as one JSON line and flushes, so a parent
/// process reading stdout sees them immediately.
///
/// # Errors
///
/// Returns an error if the report cannot be written.
pub fn write_locations(out: &mut impl Write, baton: &Path, icommands: &Path) -> anyhow::Result<()> {
    serde_json::to_writer(&mut *out, &Locations { baton, icommands })?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locations_are_one_json_line() {
        let mut out = Vec::new();
        write_locations(
            &mut out,
            Path::new("/tmp/baton-proxies-x"),
            Path::new("/tmp/icommands-proxies-y"),
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.lines().count(), 1);

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["baton"], "/tmp/baton-proxies-x");
        assert_eq!(value["icommands"], "/tmp/icommands-proxies-y");
    }
}
