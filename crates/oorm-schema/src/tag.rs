//! Field tag parsing.
//!
//! A tag is a `;`-separated list of `key[:value]` settings, e.g.
//! `field:user_name;size:64;unique:email`. A backslash before a `;` keeps it
//! inside the current value. Keys are trimmed, values are kept verbatim.

use indexmap::IndexMap;

/// Parsed tag settings in declaration order.
pub type TagSettings = IndexMap<String, String>;

/// Split a tag string into its settings.
///
/// ```
/// let s = oorm_schema::parse_tag(r"primaryKey;comment:a\;b");
/// assert_eq!(s["primaryKey"], "");
/// assert_eq!(s["comment"], "a;b");
/// ```
pub fn parse_tag(tag: &str) -> TagSettings {
    let mut settings = TagSettings::new();
    let mut pending = String::new();
    let mut escaped = false;

    for piece in tag.split(';') {
        if let Some(head) = piece.strip_suffix('\\') {
            if escaped {
                pending.push(';');
            }
            pending.push_str(head);
            escaped = true;
            continue;
        }

        let entry = if escaped {
            pending.push(';');
            pending.push_str(piece);
            escaped = false;
            std::mem::take(&mut pending)
        } else {
            piece.to_owned()
        };

        insert_setting(&mut settings, &entry);
    }

    // A trailing backslash escapes nothing and stays in the value.
    if escaped {
        pending.push('\\');
        insert_setting(&mut settings, &pending);
    }

    settings
}

fn insert_setting(settings: &mut TagSettings, entry: &str) {
    match entry.split_once(':') {
        Some((key, value)) => {
            settings.insert(key.trim().to_owned(), value.to_owned());
        }
        None => {
            let key = entry.trim();
            if !key.is_empty() {
                settings.insert(key.to_owned(), String::new());
            }
        }
    }
}

/// Convert an identifier to snake_case: `_` before every uppercase letter
/// after the first character, then lowercase.
///
/// Already snake-cased names pass through unchanged.
///
/// ```
/// assert_eq!(oorm_schema::snake_case("UserName"), "user_name");
/// assert_eq!(oorm_schema::snake_case("user_name"), "user_name");
/// ```
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() * 2);
    for (i, c) in name.chars().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            out.push('_');
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// Split an index setting value `name.priority` on its last `.`.
///
/// Missing parts come back as empty strings; the caller applies defaults.
pub(crate) fn split_index_spec(spec: &str) -> (&str, &str) {
    spec.rsplit_once('.').unwrap_or((spec, ""))
}
