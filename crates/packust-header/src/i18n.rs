//! Locale-aware lookup of i18n string entries.
//!
//! An `I18nString` entry is an array of translations parallel to the
//! `HEADER_I18NTABLE` locale table. Lookup walks the caller's locale
//! preferences with progressive fallback: exact, then stripped dialect,
//! then stripped encoding, then stripped country code. The last form is
//! a weak match that only applies when no stronger match exists anywhere
//! in the preference list.

use packust_common::{Error, ErrorKind, Result};

use crate::entry::{EntrySource, IndexEntry, TagData};
use crate::header::Header;
use crate::tags::Tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strength {
    Weak,
    NoEncoding,
    NoDialect,
    Exact,
}

fn match_locale(candidate: &str, locale: &str) -> Option<Strength> {
    if candidate == locale {
        return Some(Strength::Exact);
    }
    if let Some((prefix, _)) = locale.split_once('@') {
        if candidate == prefix {
            return Some(Strength::NoDialect);
        }
    }
    if let Some((prefix, _)) = locale.split_once('.') {
        if candidate == prefix {
            return Some(Strength::NoEncoding);
        }
    }
    if let Some((prefix, _)) = locale.split_once('_') {
        if candidate == prefix {
            return Some(Strength::Weak);
        }
    }
    None
}

/// Resolves the best translation for a colon-separated locale list.
fn resolve_list<'h>(values: &'h [String], table: &[String], lang: &str) -> Option<&'h str> {
    let mut weak: Option<&'h str> = None;
    for locale in lang.split(':').filter(|l| !l.is_empty()) {
        for (slot, candidate) in table.iter().enumerate() {
            if slot >= values.len() {
                break;
            }
            match match_locale(candidate, locale) {
                Some(Strength::Weak) => {
                    if weak.is_none() {
                        weak = Some(&values[slot]);
                    }
                }
                Some(_) => return Some(&values[slot]),
                None => {}
            }
        }
    }
    weak
}

/// The locale preference list from the environment, in lookup order.
fn env_lang() -> Option<String> {
    ["LANGUAGE", "LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
}

/// Returns the translation of an i18n entry matching the environment's
/// locale preferences, falling back to the first element.
pub(crate) fn resolve<'h>(h: &'h Header, entry: &'h IndexEntry) -> &'h str {
    let TagData::I18nString(values) = &entry.data else {
        return "";
    };
    let first = values.first().map_or("", String::as_str);
    let Some(lang) = env_lang() else {
        return first;
    };
    let Some(table) = h.get_string_array(Tag::I18NTABLE) else {
        return first;
    };
    resolve_list(values, table, &lang).unwrap_or(first)
}

/// Adds a translated string, maintaining the locale table.
pub(crate) fn add_i18n_string(
    h: &mut Header,
    tag: Tag,
    string: &str,
    lang: Option<&str>,
) -> Result<()> {
    let lang = match lang {
        Some(l) if !l.is_empty() => l,
        _ => "C",
    };

    let has_table = h.is_entry(Tag::I18NTABLE);
    let has_entry = h.is_entry(tag);
    if !has_table && has_entry {
        return Err(Error::new(ErrorKind::Internal)
            .with_detail("i18n entry present without a locale table"));
    }
    if !has_table {
        let mut locales = vec!["C".to_owned()];
        if lang != "C" {
            locales.push(lang.to_owned());
        }
        h.add(Tag::I18NTABLE, TagData::StringArray(locales))?;
    }

    let slot = {
        let table = h.entry_mut(Tag::I18NTABLE).ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_detail("locale table vanished")
        })?;
        let TagData::StringArray(locales) = &mut table.data else {
            return Err(Error::new(ErrorKind::Internal)
                .with_detail("locale table has a non-array type"));
        };
        match locales.iter().position(|l| l == lang) {
            Some(slot) => slot,
            None => {
                locales.push(lang.to_owned());
                table.source = EntrySource::Dribble;
                locales.len() - 1
            }
        }
    };

    if let Some(entry) = h.entry_mut(tag) {
        let TagData::I18nString(values) = &mut entry.data else {
            return Err(Error::new(ErrorKind::Internal)
                .with_detail("i18n add on a non-i18n tag"));
        };
        if slot >= values.len() {
            // Pad locales that never received a translation.
            values.resize(slot, String::new());
            values.push(string.to_owned());
        } else {
            values[slot] = string.to_owned();
        }
        entry.source = EntrySource::Dribble;
        return Ok(());
    }

    let mut values = vec![String::new(); slot];
    values.push(string.to_owned());
    h.add(tag, TagData::I18nString(values))
}
