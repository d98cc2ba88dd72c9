//! Per-archive configuration overrides parsed from a `.rarconfig` file.
//!
//! Grounded on `examples/original_source/src/rarconfig.c`: section headers
//! are located with the lexical rule `sscanf(" [ %[^]] ")`, key/value pairs
//! with `sscanf(" %[^#!=]=%[^\n]")` (so `#`, `!` and `=` all terminate a
//! key token), and alias values with a quoted
//! `"original","rewritten"` pair. Those exact lexical rules are
//! reimplemented below rather than re-derived from spec.md's prose alone.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Which per-archive properties [`ConfigStore::get_int`] may query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntProp {
    SeekLength,
    SaveEof,
}

/// One parsed `.rarconfig` section.
#[derive(Debug, Clone, Default)]
struct ConfigEntry {
    seek_length: Option<i64>,
    save_eof: Option<bool>,
    password: Option<String>,
    password_wide: Option<Vec<u16>>,
    aliases: Vec<(String, String)>,
}

/// Per-archive override store, keyed by archive path and guarded by a
/// single mutex (spec.md §4.3 / §5: "an internal mutex serializes all
/// operations; the store is initialized at most once").
#[derive(Default)]
pub struct ConfigStore {
    entries: Mutex<HashMap<String, ConfigEntry>>,
}

impl ConfigStore {
    /// Empty store, as if no `.rarconfig` was found.
    pub fn empty() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Parses `.rarconfig` contents into a store. Malformed lines are
    /// skipped; unrecognized keys are silently ignored, matching
    /// `rarconfig_init`'s behavior of only acting on four known keys.
    pub fn parse(contents: &str) -> Self {
        let mut entries: HashMap<String, ConfigEntry> = HashMap::new();
        let mut current: Option<String> = None;

        for raw_line in contents.lines() {
            if let Some(name) = parse_section_header(raw_line) {
                current = Some(name);
                entries.entry(current.clone().unwrap()).or_default();
                continue;
            }
            let Some(section) = current.as_ref() else { continue };
            let Some((key, value)) = parse_key_value(raw_line) else { continue };
            let entry = entries.entry(section.clone()).or_default();
            apply_key(entry, &key, &value);
        }

        Self { entries: Mutex::new(entries) }
    }

    /// Loads `<source>/.rarconfig`, or the file at `explicit` if given.
    /// Mirrors `rarconfig_init`'s `cfg ? cfg : "<source>/.rarconfig"`
    /// branch. A missing file yields an empty store rather than an error,
    /// matching the source silently skipping `fopen` failure.
    pub fn load_default(source: &Path, explicit: Option<&Path>) -> Self {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => source.join(".rarconfig"),
        };
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => Self::empty(),
        }
    }

    pub fn get_int(&self, path: &str, prop: IntProp) -> Option<i64> {
        let guard = self.entries.lock().expect("config mutex poisoned");
        let entry = guard.get(path)?;
        match prop {
            IntProp::SeekLength => entry.seek_length,
            IntProp::SaveEof => entry.save_eof.map(|b| b as i64),
        }
    }

    pub fn get_password(&self, path: &str) -> Option<String> {
        let guard = self.entries.lock().expect("config mutex poisoned");
        guard.get(path)?.password.clone()
    }

    pub fn get_password_wide(&self, path: &str) -> Option<Vec<u16>> {
        let guard = self.entries.lock().expect("config mutex poisoned");
        guard.get(path)?.password_wide.clone()
    }

    pub fn get_alias(&self, path: &str, member: &str) -> Option<String> {
        let guard = self.entries.lock().expect("config mutex poisoned");
        let entry = guard.get(path)?;
        entry.aliases.iter().find(|(file, _)| file == member).map(|(_, alias)| alias.clone())
    }

    /// Appends an alias under the exclusive lock, applying the same
    /// validation `rarconfig_setalias` / `__check_paths` perform.
    pub fn set_alias(&self, path: &str, member: &str, rewritten: &str) {
        if !aliases_valid(member, rewritten) {
            return;
        }
        let mut guard = self.entries.lock().expect("config mutex poisoned");
        let entry = guard.entry(path.to_owned()).or_default();
        entry.aliases.push((member.to_owned(), rewritten.to_owned()));
    }
}

/// `\s*\[\s*<name>\s*\]` per spec.md §6.
fn parse_section_header(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('[')?.strip_suffix(']')?;
    Some(inner.trim().to_owned())
}

/// `\s*<key>\s*=\s*<value>\s*`, with `#`/`!` terminating the key early
/// just as `sscanf("%[^#!=]=%[^\n]")` does in the source.
fn parse_key_value(line: &str) -> Option<(String, String)> {
    let stop = line.find(['#', '!', '=']);
    let eq = line.find('=')?;
    if let Some(stop) = stop {
        if stop != eq {
            // a `#`/`!` appears before `=`: the key token is truncated
            // there and no `=` remains within it, so this is a comment.
            return None;
        }
    }
    let (key, rest) = line.split_at(eq);
    let value = &rest[1..];
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.trim().to_string()))
}

fn apply_key(entry: &mut ConfigEntry, key: &str, value: &str) {
    if key.eq_ignore_ascii_case("seek-length") {
        if let Ok(n) = parse_c_int(value) {
            entry.seek_length = Some(n);
        }
    } else if key.eq_ignore_ascii_case("save-eof") {
        if value.eq_ignore_ascii_case("true") {
            entry.save_eof = Some(true);
        } else if value.eq_ignore_ascii_case("false") {
            entry.save_eof = Some(false);
        }
    } else if key.eq_ignore_ascii_case("password") {
        if let Some(pw) = extract_quoted(value) {
            entry.password_wide = Some(pw.encode_utf16().collect());
            entry.password = Some(pw);
        }
    } else if key.eq_ignore_ascii_case("alias") {
        if let Some((file, alias)) = extract_alias_pair(value) {
            if aliases_valid(&file, &alias) {
                entry.aliases.push((file, alias));
            }
        }
    }
    // Unrecognized keys are silently ignored, matching the source.
}

/// Parses an integer in any C-style base (`0x..` hex, `0..` octal, decimal).
fn parse_c_int(value: &str) -> std::result::Result<i64, std::num::ParseIntError> {
    let trimmed = value.trim();
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if trimmed.len() > 1 && trimmed.starts_with('0') {
        i64::from_str_radix(&trimmed[1..], 8)
    } else {
        trimmed.parse()
    }
}

/// First `"..."` substring, matching the `strchr`/`strrchr` pair in
/// `__entry_set_password`.
fn extract_quoted(value: &str) -> Option<String> {
    let start = value.find('"')? + 1;
    let end = start + value[start..].rfind('"')?;
    if end < start {
        return None;
    }
    Some(value[start..end].to_owned())
}

/// Parses `"file","alias"`, matching the source's
/// `sscanf(" \"%[^\"]%*[^,]%*[^\"]\" %[^\"]")`.
fn extract_alias_pair(value: &str) -> Option<(String, String)> {
    let mut parts = value.splitn(2, ',');
    let first = extract_quoted(parts.next()?)?;
    let second = extract_quoted(parts.next()?)?;
    Some((first, second))
}

/// `__check_paths`: both absolute, same directory depth, same parent.
fn aliases_valid(file: &str, alias: &str) -> bool {
    if !file.starts_with('/') || !alias.starts_with('/') {
        return false;
    }
    if file.len() < 2 || alias.len() < 2 {
        return false;
    }
    if dir_levels(file) != dir_levels(alias) {
        return false;
    }
    parent_of(file) == parent_of(alias)
}

fn dir_levels(path: &str) -> usize {
    path.trim_end_matches('/').matches('/').count()
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[ /x.rar ]
password   = "pw"
seek-length= 3
save-eof   = TRUE
alias      = "/x.rar/a.ext","/x.rar/b.ext"
# comment
! also comment
"#;

    #[test]
    fn config_parse_scenario() {
        let store = ConfigStore::parse(SAMPLE);
        assert_eq!(store.get_password("/x.rar").as_deref(), Some("pw"));
        assert_eq!(store.get_int("/x.rar", IntProp::SeekLength), Some(3));
        assert_eq!(store.get_int("/x.rar", IntProp::SaveEof), Some(1));
        assert_eq!(
            store.get_alias("/x.rar", "/x.rar/a.ext").as_deref(),
            Some("/x.rar/b.ext")
        );
    }

    #[test]
    fn password_wide_matches_utf16() {
        let store = ConfigStore::parse(SAMPLE);
        let wide = store.get_password_wide("/x.rar").unwrap();
        assert_eq!(wide, "pw".encode_utf16().collect::<Vec<_>>());
    }

    #[test]
    fn comment_leaders_terminate_a_key() {
        // a `#`/`!` trailing the value is part of the value, not stripped,
        // matching the source's `%[^\n]` value capture; it only breaks an
        // exact "true"/"false" match.
        let store = ConfigStore::parse("[ /y.rar ]\nsave-eof = true # trailing\n");
        assert_eq!(store.get_int("/y.rar", IntProp::SaveEof), None);
        let store = ConfigStore::parse("[ /z.rar ]\n# save-eof = true\n");
        assert_eq!(store.get_int("/z.rar", IntProp::SaveEof), None);
    }

    #[test]
    fn unset_property_returns_none() {
        let store = ConfigStore::parse(SAMPLE);
        assert_eq!(store.get_int("/unknown.rar", IntProp::SeekLength), None);
    }

    #[test]
    fn alias_violating_shared_parent_is_dropped() {
        let store = ConfigStore::parse(
            "[ /x.rar ]\nalias = \"/a/b.ext\",\"/c/d.ext\"\n",
        );
        assert_eq!(store.get_alias("/x.rar", "/a/b.ext"), None);
    }

    #[test]
    fn set_alias_appends_under_lock() {
        let store = ConfigStore::empty();
        store.set_alias("/x.rar", "/x.rar/a.ext", "/x.rar/b.ext");
        assert_eq!(store.get_alias("/x.rar", "/x.rar/a.ext").as_deref(), Some("/x.rar/b.ext"));
    }

    #[test]
    fn set_alias_rejects_mismatched_depth() {
        let store = ConfigStore::empty();
        store.set_alias("/x.rar", "/a/b.ext", "/a/b/c.ext");
        assert_eq!(store.get_alias("/x.rar", "/a/b.ext"), None);
    }

    #[test]
    fn default_config_path_falls_back_to_source_rarconfig() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".rarconfig"), "[ /a.rar ]\nseek-length=1\n").unwrap();
        let store = ConfigStore::load_default(dir.path(), None);
        assert_eq!(store.get_int("/a.rar", IntProp::SeekLength), Some(1));
    }

    #[test]
    fn missing_config_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::load_default(dir.path(), None);
        assert_eq!(store.get_int("/a.rar", IntProp::SeekLength), None);
    }
}
