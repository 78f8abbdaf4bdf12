//! Persisted settings: known SIM cards and mobile-data policy.
//!
//! The store is a flat key-value interface with `/`-separated keys, e.g.
//! `Sims/8901.../Mcc`. [`FileSettingsStore`] keeps it in a TOML file where
//! each key segment is a nested table; [`MemorySettingsStore`] is the test
//! double.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::api::models::ConnectivityError;
use crate::core::sim::SimRecord;

/// File name of the settings store inside its directory.
pub const SETTINGS_FILE: &str = "settings.toml";

const KNOWN_SIMS: &str = "KnownSims";
const MOBILE_DATA_ENABLED: &str = "MobileDataEnabled";
const SIM_FOR_MOBILE_DATA: &str = "SimForMobileData";

/// A value held by a [`SettingsStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingValue {
    Bool(bool),
    String(String),
    StringList(Vec<String>),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(l) => Some(l),
            _ => None,
        }
    }
}

/// Key-value settings backend.
pub trait SettingsStore: Send {
    fn get(&self, key: &str) -> Option<SettingValue>;

    fn set(&mut self, key: &str, value: SettingValue);

    /// Removes every key under `group/`.
    fn remove_group(&mut self, group: &str);

    /// Flushes pending writes.
    fn sync(&mut self) -> Result<()>;
}

fn segments(key: &str) -> Vec<&str> {
    key.split('/').filter(|s| !s.is_empty()).collect()
}

/// TOML-file backed store.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    table: toml::Table,
}

impl FileSettingsStore {
    /// Opens `dir/settings.toml`. A missing file is an empty store.
    ///
    /// A file that does not parse is renamed to `settings.toml.corrupt` and
    /// the store starts empty.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(SETTINGS_FILE);
        let table = match fs::read_to_string(&path) {
            Ok(text) => match text.parse::<toml::Table>() {
                Ok(table) => table,
                Err(e) => {
                    let aside = path.with_extension("toml.corrupt");
                    warn!(
                        "Unreadable settings at {}, moving them to {}: {e}",
                        path.display(),
                        aside.display()
                    );
                    fs::rename(&path, &aside)?;
                    toml::Table::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, starting fresh", path.display());
                toml::Table::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn from_toml(value: &toml::Value) -> Option<SettingValue> {
    match value {
        toml::Value::Boolean(b) => Some(SettingValue::Bool(*b)),
        toml::Value::String(s) => Some(SettingValue::String(s.clone())),
        toml::Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_owned))
            .collect::<Option<Vec<_>>>()
            .map(SettingValue::StringList),
        _ => None,
    }
}

fn to_toml(value: SettingValue) -> toml::Value {
    match value {
        SettingValue::Bool(b) => toml::Value::Boolean(b),
        SettingValue::String(s) => toml::Value::String(s),
        SettingValue::StringList(l) => {
            toml::Value::Array(l.into_iter().map(toml::Value::String).collect())
        }
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, key: &str) -> Option<SettingValue> {
        let segs = segments(key);
        let (last, parents) = segs.split_last()?;
        let mut table = &self.table;
        for seg in parents {
            table = table.get(*seg)?.as_table()?;
        }
        from_toml(table.get(*last)?)
    }

    fn set(&mut self, key: &str, value: SettingValue) {
        let segs = segments(key);
        let Some((last, parents)) = segs.split_last() else {
            return;
        };
        let mut table = &mut self.table;
        for seg in parents {
            let entry = table
                .entry(seg.to_string())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            if !entry.is_table() {
                *entry = toml::Value::Table(toml::Table::new());
            }
            let toml::Value::Table(next) = entry else {
                return;
            };
            table = next;
        }
        table.insert(last.to_string(), to_toml(value));
    }

    fn remove_group(&mut self, group: &str) {
        let segs = segments(group);
        let Some((last, parents)) = segs.split_last() else {
            return;
        };
        let mut table = &mut self.table;
        for seg in parents {
            match table.get_mut(*seg).and_then(toml::Value::as_table_mut) {
                Some(next) => table = next,
                None => return,
            }
        }
        table.remove(*last);
    }

    fn sync(&mut self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let text = toml::to_string(&self.table)
            .map_err(|e| ConnectivityError::Settings(e.to_string()))?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default, Clone)]
pub struct MemorySettingsStore {
    values: BTreeMap<String, SettingValue>,
    syncs: usize,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times [`SettingsStore::sync`] was called.
    pub fn sync_count(&self) -> usize {
        self.syncs
    }
}

fn normalize(key: &str) -> String {
    segments(key).join("/")
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.get(&normalize(key)).cloned()
    }

    fn set(&mut self, key: &str, value: SettingValue) {
        self.values.insert(normalize(key), value);
    }

    fn remove_group(&mut self, group: &str) {
        let prefix = format!("{}/", normalize(group));
        self.values.retain(|k, _| !k.starts_with(&prefix));
    }

    fn sync(&mut self) -> Result<()> {
        self.syncs += 1;
        Ok(())
    }
}

/// Typed view over a [`SettingsStore`].
pub struct ConnectivitySettings {
    store: Box<dyn SettingsStore>,
}

impl std::fmt::Debug for ConnectivitySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivitySettings").finish_non_exhaustive()
    }
}

fn sim_group(iccid: &str) -> String {
    format!("Sims/{iccid}")
}

impl ConnectivitySettings {
    pub fn new(store: Box<dyn SettingsStore>) -> Self {
        Self { store }
    }

    fn write(&mut self, key: &str, value: SettingValue) -> Result<()> {
        self.store.set(key, value);
        self.store.sync()
    }

    /// ICCIDs of every SIM seen so far. The list is created empty on first
    /// access.
    pub fn known_sims(&mut self) -> Vec<String> {
        match self.store.get(KNOWN_SIMS) {
            Some(SettingValue::StringList(list)) => list,
            _ => {
                if let Err(e) = self.write(KNOWN_SIMS, SettingValue::StringList(Vec::new())) {
                    warn!("Failed to initialise known SIM list: {e}");
                }
                Vec::new()
            }
        }
    }

    pub fn set_known_sims(&mut self, iccids: Vec<String>) -> Result<()> {
        self.write(KNOWN_SIMS, SettingValue::StringList(iccids))
    }

    pub fn mobile_data_enabled(&self) -> Option<bool> {
        self.store
            .get(MOBILE_DATA_ENABLED)
            .and_then(|v| v.as_bool())
    }

    pub fn set_mobile_data_enabled(&mut self, enabled: bool) -> Result<()> {
        self.write(MOBILE_DATA_ENABLED, SettingValue::Bool(enabled))
    }

    pub fn sim_for_mobile_data(&self) -> Option<String> {
        self.store
            .get(SIM_FOR_MOBILE_DATA)
            .and_then(|v| v.as_str().map(str::to_owned))
            .filter(|s| !s.is_empty())
    }

    pub fn set_sim_for_mobile_data(&mut self, iccid: &str) -> Result<()> {
        self.write(SIM_FOR_MOBILE_DATA, SettingValue::String(iccid.to_owned()))
    }

    /// Loads a SIM record. A record missing any key is corrupt: it is
    /// deleted and `None` is returned, as if the SIM was never seen.
    pub fn sim_record(&mut self, iccid: &str) -> Option<SimRecord> {
        let group = sim_group(iccid);
        let get = |key: &str| self.store.get(&format!("{group}/{key}"));

        let record = (|| {
            Some(SimRecord {
                iccid: iccid.to_owned(),
                primary_phone_number: get("PrimaryPhoneNumber")?.as_str()?.to_owned(),
                mcc: get("Mcc")?.as_str()?.to_owned(),
                mnc: get("Mnc")?.as_str()?.to_owned(),
                preferred_languages: get("PreferredLanguages")?.as_list()?.to_vec(),
                data_roaming_enabled: get("DataRoamingEnabled")?.as_bool()?,
            })
        })();

        if record.is_none() {
            warn!("Corrupt settings for SIM: {iccid}");
            self.store.remove_group(&group);
            if let Err(e) = self.store.sync() {
                warn!("Failed to drop corrupt SIM record {iccid}: {e}");
            }
        }
        record
    }

    pub fn save_sim_record(&mut self, record: &SimRecord) -> Result<()> {
        let group = sim_group(&record.iccid);
        let key = |k: &str| format!("{group}/{k}");
        self.store.set(
            &key("PrimaryPhoneNumber"),
            SettingValue::String(record.primary_phone_number.clone()),
        );
        self.store
            .set(&key("Mcc"), SettingValue::String(record.mcc.clone()));
        self.store
            .set(&key("Mnc"), SettingValue::String(record.mnc.clone()));
        self.store.set(
            &key("PreferredLanguages"),
            SettingValue::StringList(record.preferred_languages.clone()),
        );
        self.store.set(
            &key("DataRoamingEnabled"),
            SettingValue::Bool(record.data_roaming_enabled),
        );
        self.store.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(iccid: &str) -> SimRecord {
        SimRecord {
            iccid: iccid.into(),
            primary_phone_number: "+358401234567".into(),
            mcc: "244".into(),
            mnc: "91".into(),
            preferred_languages: vec!["fi".into(), "en".into()],
            data_roaming_enabled: true,
        }
    }

    #[test]
    fn known_sims_created_lazily() {
        let mut settings = ConnectivitySettings::new(Box::new(MemorySettingsStore::new()));
        assert!(settings.known_sims().is_empty());
        settings.set_known_sims(vec!["8901".into()]).unwrap();
        assert_eq!(settings.known_sims(), vec!["8901".to_string()]);
    }

    #[test]
    fn sim_record_round_trips_in_memory() {
        let mut settings = ConnectivitySettings::new(Box::new(MemorySettingsStore::new()));
        settings.save_sim_record(&record("8901")).unwrap();
        assert_eq!(settings.sim_record("8901"), Some(record("8901")));
    }

    #[test]
    fn corrupt_record_is_discarded() {
        let mut store = MemorySettingsStore::new();
        store.set("Sims/8901/Mcc", SettingValue::String("244".into()));
        store.set("Sims/8901/Mnc", SettingValue::String("91".into()));
        store.set("Sims/89012/Mcc", SettingValue::String("310".into()));
        let mut settings = ConnectivitySettings::new(Box::new(store));

        assert_eq!(settings.sim_record("8901"), None);
        assert!(settings.store.get("Sims/8901/Mcc").is_none());
        // Only the exact group goes, not groups sharing its prefix.
        assert!(settings.store.get("Sims/89012/Mcc").is_some());
    }

    #[test]
    fn wrongly_typed_value_is_corrupt() {
        let mut settings = ConnectivitySettings::new(Box::new(MemorySettingsStore::new()));
        settings.save_sim_record(&record("8901")).unwrap();
        settings
            .store
            .set("Sims/8901/DataRoamingEnabled", SettingValue::String("yes".into()));
        assert_eq!(settings.sim_record("8901"), None);
    }

    #[test]
    fn empty_sim_for_mobile_data_reads_as_unset() {
        let mut settings = ConnectivitySettings::new(Box::new(MemorySettingsStore::new()));
        assert_eq!(settings.sim_for_mobile_data(), None);
        settings.set_sim_for_mobile_data("").unwrap();
        assert_eq!(settings.sim_for_mobile_data(), None);
        settings.set_sim_for_mobile_data("8901").unwrap();
        assert_eq!(settings.sim_for_mobile_data().as_deref(), Some("8901"));
    }

    #[test]
    fn file_store_nests_key_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSettingsStore::open(dir.path()).unwrap();
        store.set("MobileDataEnabled", SettingValue::Bool(true));
        store.set("Sims/8901/Mcc", SettingValue::String("244".into()));
        store.set(
            "KnownSims",
            SettingValue::StringList(vec!["8901".into()]),
        );
        store.sync().unwrap();

        let text = fs::read_to_string(dir.path().join(SETTINGS_FILE)).unwrap();
        let parsed: toml::Table = text.parse().unwrap();
        assert_eq!(parsed["Sims"]["8901"]["Mcc"].as_str(), Some("244"));

        let reopened = FileSettingsStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("MobileDataEnabled"),
            Some(SettingValue::Bool(true))
        );
        assert_eq!(
            reopened.get("KnownSims"),
            Some(SettingValue::StringList(vec!["8901".into()]))
        );
    }

    #[test]
    fn file_store_removes_groups() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileSettingsStore::open(dir.path()).unwrap();
        store.set("Sims/1/Mcc", SettingValue::String("244".into()));
        store.set("Sims/2/Mcc", SettingValue::String("310".into()));
        store.remove_group("Sims/1/");
        assert!(store.get("Sims/1/Mcc").is_none());
        assert!(store.get("Sims/2/Mcc").is_some());
    }

    #[test]
    fn garbage_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "this is = = not toml").unwrap();

        let mut store = FileSettingsStore::open(dir.path()).unwrap();
        assert!(store.get("KnownSims").is_none());
        assert!(!dir.path().join(SETTINGS_FILE).exists());
        let aside = fs::read_to_string(dir.path().join("settings.toml.corrupt")).unwrap();
        assert_eq!(aside, "this is = = not toml");

        store.set("MobileDataEnabled", SettingValue::Bool(false));
        store.sync().unwrap();
        let reopened = FileSettingsStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("MobileDataEnabled"),
            Some(SettingValue::Bool(false))
        );
    }
}
