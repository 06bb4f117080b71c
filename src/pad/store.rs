//! Persistent pad-usage bookkeeping.
//!
//! A [`PadRecordsStore`] maps pad identifiers to the byte ranges of
//! that pad which have already been consumed for encryption, so that
//! a range is never reused. It is loaded once at open, mutated in
//! memory as sessions register and finish, and persisted atomically
//! on [`PadRecordsStore::save`].

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::pad::{consolidate, next_offset, UsedRange};
use crate::{Error, Result};

/// A single pad's consumption record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PadRecord {
    /// Consolidated consumed byte ranges.
    pub used: Vec<UsedRange>,
    /// Unknown child elements of `<pad-record>`, preserved verbatim
    /// for forward compatibility: tag name to text content.
    pub extra: BTreeMap<String, String>,
}

/// Where a [`PadRecordsStore`] keeps its data.
#[derive(Debug)]
enum Location {
    /// `config_area == "-"`: nothing is ever read from or written to
    /// disk.
    Ephemeral,
    /// A real directory on disk, containing a `pad-records` file.
    Disk { records_file: PathBuf },
}

/// A persistent (or ephemeral) mapping from pad identifier to
/// [`PadRecord`].
#[derive(Debug)]
pub struct PadRecordsStore {
    location: Location,
    records: BTreeMap<String, PadRecord>,
}

impl PadRecordsStore {
    /// Opens (creating if necessary) the pad-records store at `path`.
    ///
    /// If `path` is `"-"`, the store is ephemeral: it is never read
    /// from or written to disk. Otherwise, the legacy `~/.otp`
    /// directory is migrated by rename into `path` if `path` does not
    /// yet exist and `~/.otp/pad-records` does; the directory and its
    /// `pad-records` file are created if still absent; and the file,
    /// if any, is parsed. A structurally invalid document is
    /// tolerated: it yields an empty store rather than an error, so a
    /// user can recover by simply re-running.
    pub fn open(path: &str) -> Result<Self> {
        if path == "-" {
            return Ok(Self { location: Location::Ephemeral, records: BTreeMap::new() });
        }

        let dir = PathBuf::from(path);
        if !dir.is_dir() {
            migrate_legacy_directory(&dir)?;
        }
        if !dir.is_dir() {
            fs::create_dir_all(&dir)?;
        }

        let records_file = dir.join("pad-records");
        if !records_file.is_file() {
            fs::File::create(&records_file)?;
        }

        let records = parse_pad_records_file(&records_file);
        Ok(Self { location: Location::Disk { records_file }, records })
    }

    /// Opens the store at the default location, `$HOME/.onetime`.
    pub fn open_default() -> Result<Self> {
        let home = home_dir()?;
        let path = home.join(".onetime");
        Self::open(path.to_string_lossy().as_ref())
    }

    /// Registers a pad session's identifiers, upgrading a legacy
    /// record to the current identifier if one is found, or creating
    /// a fresh empty record otherwise. Returns the next free offset
    /// for this pad.
    ///
    /// It is a [`Error::Configuration`] error for both `current_id`
    /// and `legacy_id` to already have records simultaneously; under
    /// correct operation this cannot happen.
    pub fn register(&mut self, current_id: &str, legacy_id: &str) -> Result<u64> {
        let has_current = self.records.contains_key(current_id);
        let has_legacy = self.records.contains_key(legacy_id);

        if has_current && has_legacy {
            return Err(Error::Configuration(format!(
                "pad has both current and legacy identifiers present in the \
                 pad-records file; this is supposed to be impossible:\n  \
                 current: {current_id}\n  legacy: {legacy_id}"
            )));
        }

        if !has_current {
            if has_legacy {
                let record = self.records.remove(legacy_id).expect("checked above");
                self.records.insert(current_id.to_string(), record);
            } else {
                self.records.insert(current_id.to_string(), PadRecord::default());
            }
        }

        let record = self.records.get(current_id).expect("just inserted or upgraded");
        Ok(next_offset(&record.used))
    }

    /// Records that `length` bytes starting at `offset` have been
    /// consumed for the pad identified by `current_id`.
    ///
    /// If `allow_overlap` is `false`, overlapping a previously
    /// consumed range (beyond merely touching it) is a
    /// [`Error::Configuration`] error.
    pub fn record_consumed(
        &mut self,
        current_id: &str,
        offset: u64,
        length: u64,
        allow_overlap: bool,
    ) -> Result<()> {
        let record = self
            .records
            .entry(current_id.to_string())
            .or_insert_with(PadRecord::default);
        record.used.push(UsedRange::new(offset, length));
        record.used = consolidate(&record.used, allow_overlap)?;
        Ok(())
    }

    /// Returns the next free offset for `current_id`, or
    /// [`crate::pad::ID_SOURCE_LENGTH`] if nothing is recorded yet.
    pub fn next_offset(&self, current_id: &str) -> u64 {
        self.records
            .get(current_id)
            .map(|r| next_offset(&r.used))
            .unwrap_or(crate::pad::ID_SOURCE_LENGTH)
    }

    /// Persists the store to disk.
    ///
    /// A no-op in ephemeral mode. Otherwise: write the new content to
    /// `pad-records.tmp`, rename the live file to `pad-records.int`,
    /// rename `.tmp` onto the live path, then remove `.int`. If `.int`
    /// already exists at save time, this is refused with
    /// [`Error::Configuration`]: it's leftover from a prior failed
    /// save and needs human intervention, rather than silently
    /// clobbering possibly-unmerged pad-usage records.
    pub fn save(&mut self) -> Result<()> {
        let records_file = match &self.location {
            Location::Ephemeral => return Ok(()),
            Location::Disk { records_file } => records_file.clone(),
        };

        let tmp = sibling(&records_file, "pad-records.tmp");
        let intermediate = sibling(&records_file, "pad-records.int");

        if intermediate.exists() {
            return Err(Error::Configuration(format!(
                "leftover intermediate pad-records file found; please sort \
                 things out: {}",
                intermediate.display()
            )));
        }

        fs::write(&tmp, serialize_pad_records_file(&self.records))?;
        fs::rename(&records_file, &intermediate)?;
        fs::rename(&tmp, &records_file)?;
        fs::remove_file(&intermediate)?;
        Ok(())
    }

    /// Returns the record for `current_id`, if any (test/inspection
    /// helper; the engine itself only needs the operations above).
    pub fn record(&self, current_id: &str) -> Option<&PadRecord> {
        self.records.get(current_id)
    }
}

fn sibling(path: &Path, file_name: &str) -> PathBuf {
    path.with_file_name(file_name)
}

fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from).ok_or_else(|| {
        Error::Configuration("cannot determine home directory: $HOME is not set".into())
    })
}

/// Migrates a legacy `~/.otp` directory to `dir` by rename, if and
/// only if `dir` does not exist and `~/.otp/pad-records` does.
///
/// This mirrors the original implementation's check, which keys the
/// migration off the well-known legacy path regardless of whether
/// `dir` is the default location or an explicit caller-supplied one.
fn migrate_legacy_directory(dir: &Path) -> Result<()> {
    let home = match home_dir() {
        Ok(h) => h,
        Err(_) => return Ok(()),
    };
    let old_dir = home.join(".otp");
    let old_records_file = old_dir.join("pad-records");
    if old_records_file.is_file() {
        fs::rename(&old_dir, dir)?;
    }
    Ok(())
}

fn parse_pad_records_file(path: &Path) -> BTreeMap<String, PadRecord> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return BTreeMap::new(),
    };
    parse_pad_records_str(&contents).unwrap_or_default()
}

fn parse_pad_records_str(xml: &str) -> Option<BTreeMap<String, PadRecord>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut records = BTreeMap::new();
    let mut buf = Vec::new();

    let mut cur_id: Option<String> = None;
    let mut cur_record = PadRecord::default();
    let mut used_offsets: Vec<(Option<u64>, Option<u64>)> = Vec::new();

    let mut element_stack: Vec<String> = Vec::new();
    let mut pending_text = String::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if name == "used" {
                    used_offsets.push((None, None));
                }
                element_stack.push(name);
                pending_text.clear();
            }
            Ok(Event::Text(t)) => {
                pending_text.push_str(&t.unescape().ok()?);
            }
            Ok(Event::End(e)) => {
                let name = local_name_end(&e);
                element_stack.pop();
                match name.as_str() {
                    "id" => cur_id = Some(pending_text.trim().to_string()),
                    "offset" => {
                        if let Some(last) = used_offsets.last_mut() {
                            last.0 = pending_text.trim().parse().ok();
                        }
                    }
                    "length" => {
                        if let Some(last) = used_offsets.last_mut() {
                            last.1 = pending_text.trim().parse().ok();
                        }
                    }
                    "used" => {}
                    "pad-record" => {
                        let used: Vec<UsedRange> = used_offsets
                            .drain(..)
                            .filter_map(|(o, l)| Some(UsedRange::new(o?, l?)))
                            .collect();
                        cur_record.used = consolidate(&used, true).unwrap_or(used);
                        if let Some(id) = cur_id.take() {
                            records.insert(id, std::mem::take(&mut cur_record));
                        }
                        cur_record = PadRecord::default();
                    }
                    "onetime-pad-records" => {}
                    other => {
                        // An unknown child of <pad-record>: preserve
                        // it verbatim for round-tripping.
                        if element_stack.last().map(String::as_str) == Some("pad-record") {
                            cur_record
                                .extra
                                .insert(other.to_string(), pending_text.trim().to_string());
                        }
                    }
                }
                pending_text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return None,
        }
    }

    Some(records)
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned()
}

fn local_name_end(e: &BytesEnd) -> String {
    String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned()
}

fn serialize_pad_records_file(records: &BTreeMap<String, PadRecord>) -> Vec<u8> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer
        .write_event(Event::Start(BytesStart::new("onetime-pad-records")))
        .expect("writing to a Vec<u8> never fails");

    for (id, record) in records {
        writer.write_event(Event::Start(BytesStart::new("pad-record"))).unwrap();

        write_text_element(&mut writer, "id", id);

        for range in &record.used {
            writer.write_event(Event::Start(BytesStart::new("used"))).unwrap();
            write_text_element(&mut writer, "offset", &range.offset.to_string());
            write_text_element(&mut writer, "length", &range.length.to_string());
            writer.write_event(Event::End(BytesEnd::new("used"))).unwrap();
        }

        for (tag, value) in &record.extra {
            write_text_element(&mut writer, tag, value);
        }

        writer.write_event(Event::End(BytesEnd::new("pad-record"))).unwrap();
    }

    writer
        .write_event(Event::End(BytesEnd::new("onetime-pad-records")))
        .unwrap();

    let mut out = writer.into_inner();
    out.write_all(b"\n").ok();
    out
}

fn write_text_element<W: std::io::Write>(writer: &mut Writer<W>, tag: &str, value: &str) {
    writer.write_event(Event::Start(BytesStart::new(tag))).unwrap();
    writer.write_event(Event::Text(BytesText::new(value))).unwrap();
    writer.write_event(Event::End(BytesEnd::new(tag))).unwrap();
}
