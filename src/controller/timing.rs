/// Split a profiling entry `key:value` at its last `:`.
///
/// Keys may contain `:` themselves. Entries whose value is not an integer
/// yield `None`.
pub fn parse_timing_entry(entry: &str) -> Option<(&str, i64)> {
    let (key, value) = entry.rsplit_once(':')?;
    let value = value.trim().parse().ok()?;
    Some((key, value))
}
