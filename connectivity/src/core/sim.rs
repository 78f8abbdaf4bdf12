//! SIM and modem policy.
//!
//! [`SimManagerState`] is fed oFono property updates by the modem monitor
//! and decides what to persist and what to push back to oFono. It owns the
//! persisted SIM records and is the only place `Powered`/`RoamingAllowed`
//! policy is computed: any drift reported by oFono is answered with a
//! [`PolicyAction`] restoring the stored value.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::Result;
use crate::api::models::{ConnectivityError, PinType};
use crate::core::settings::ConnectivitySettings;
use crate::types::constants::ofono;
use crate::util::utils::trailing_index;
use crate::util::variant::PropertyValue;

/// The persisted part of a SIM card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimRecord {
    pub iccid: String,
    pub primary_phone_number: String,
    pub mcc: String,
    pub mnc: String,
    pub preferred_languages: Vec<String>,
    pub data_roaming_enabled: bool,
}

/// What oFono has reported so far about the card in one modem.
///
/// Identity fields fill in once and are never cleared by an empty update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSimData {
    pub present: bool,
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub phone_numbers: Option<Vec<String>>,
    pub mcc: Option<String>,
    pub mnc: Option<String>,
    pub preferred_languages: Option<Vec<String>>,
    pub required_pin: Option<PinType>,
    pub locked_pins: Vec<PinType>,
    pub retries: HashMap<PinType, u8>,
}

/// `SimManager` properties describing the inserted card. Forgotten along
/// with the card when it leaves.
pub const CARD_PROPERTIES: &[&str] = &[
    "CardIdentifier",
    "SubscriberIdentity",
    "SubscriberNumbers",
    "MobileCountryCode",
    "MobileNetworkCode",
    "PreferredLanguages",
    "PinRequired",
    "LockedPins",
    "Retries",
];

/// Whether a `SimManager` update reports the card being taken out.
pub fn card_left(name: &str, value: &PropertyValue) -> bool {
    name == "Present" && value.as_bool() == Some(false)
}

/// A PIN operation to issue on a SIM's `org.ofono.SimManager`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinRequest {
    Enter {
        pin_type: &'static str,
        pin: String,
    },
    Reset {
        pin_type: &'static str,
        puk: String,
        new_pin: String,
    },
}

fn check_code(what: &str, code: &str) -> Result<()> {
    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConnectivityError::InvalidPin(format!("{what} must be digits")));
    }
    Ok(())
}

/// Builds an `EnterPin` call. Nothing is sent for [`PinType::None`].
pub fn enter_pin_request(pin_type: PinType, pin: &str) -> Result<Option<PinRequest>> {
    let Some(name) = pin_type.as_ofono() else {
        return Ok(None);
    };
    check_code(name, pin)?;
    Ok(Some(PinRequest::Enter {
        pin_type: name,
        pin: pin.to_owned(),
    }))
}

/// Builds a `ResetPin` call. Only a PUK can reset the PIN.
pub fn reset_pin_request(pin_type: PinType, puk: &str, new_pin: &str) -> Result<Option<PinRequest>> {
    match pin_type {
        PinType::None => Ok(None),
        PinType::Pin => Err(ConnectivityError::InvalidPin(
            "only a PUK can reset the PIN".into(),
        )),
        PinType::Puk => {
            check_code("puk", puk)?;
            check_code("new pin", new_pin)?;
            Ok(Some(PinRequest::Reset {
                pin_type: "puk",
                puk: puk.to_owned(),
                new_pin: new_pin.to_owned(),
            }))
        }
    }
}

fn fill_str(slot: &mut Option<String>, value: &PropertyValue) -> bool {
    match value.as_str() {
        Some(v) if !v.is_empty() && slot.as_deref() != Some(v) => {
            *slot = Some(v.to_owned());
            true
        }
        _ => false,
    }
}

fn fill_list(slot: &mut Option<Vec<String>>, value: &PropertyValue) -> bool {
    match value.as_str_list() {
        Some(v) if !v.is_empty() && slot.as_deref() != Some(v) => {
            *slot = Some(v.to_vec());
            true
        }
        _ => false,
    }
}

impl LiveSimData {
    /// Applies one `org.ofono.SimManager` property. Returns whether anything
    /// changed.
    pub fn apply(&mut self, name: &str, value: &PropertyValue) -> bool {
        match name {
            "Present" => {
                let present = value.as_bool().unwrap_or(false);
                if present == self.present {
                    return false;
                }
                if !present {
                    // A different card may go in next.
                    *self = Self::default();
                }
                self.present = present;
                true
            }
            "CardIdentifier" => {
                if let (Some(old), Some(new)) = (self.iccid.as_deref(), value.as_str())
                    && !new.is_empty()
                    && old != new
                {
                    warn!("Unexpected update on ICCID: {old}, {new}");
                }
                fill_str(&mut self.iccid, value)
            }
            "SubscriberIdentity" => fill_str(&mut self.imsi, value),
            "SubscriberNumbers" => fill_list(&mut self.phone_numbers, value),
            "MobileCountryCode" => fill_str(&mut self.mcc, value),
            "MobileNetworkCode" => fill_str(&mut self.mnc, value),
            "PreferredLanguages" => fill_list(&mut self.preferred_languages, value),
            "PinRequired" => {
                let pin = value.as_str().map(PinType::from_ofono);
                if pin.is_none() || pin == self.required_pin {
                    return false;
                }
                self.required_pin = pin;
                true
            }
            "LockedPins" => {
                let pins: Vec<PinType> = value
                    .as_str_list()
                    .unwrap_or_default()
                    .iter()
                    .map(|p| PinType::from_ofono(p))
                    .filter(|p| *p != PinType::None)
                    .collect();
                if pins == self.locked_pins {
                    return false;
                }
                self.locked_pins = pins;
                true
            }
            "Retries" => {
                let retries: HashMap<PinType, u8> = value
                    .as_dict()
                    .into_iter()
                    .flatten()
                    .filter_map(|(k, v)| {
                        let pin = PinType::from_ofono(k);
                        (pin != PinType::None).then_some((pin, v.as_u8()?))
                    })
                    .collect();
                if retries == self.retries {
                    return false;
                }
                self.retries = retries;
                true
            }
            _ => false,
        }
    }

    /// Every identity field has been reported.
    pub fn is_ready(&self) -> bool {
        self.present
            && self.iccid.is_some()
            && self.imsi.is_some()
            && self.phone_numbers.is_some()
            && self.mcc.is_some()
            && self.mnc.is_some()
            && self.preferred_languages.is_some()
    }

    pub fn locked(&self) -> bool {
        self.required_pin.is_some_and(|p| p != PinType::None)
    }

    /// A fresh persisted record built from the live data. `None` until ready.
    fn to_record(&self) -> Option<SimRecord> {
        if !self.is_ready() {
            return None;
        }
        Some(SimRecord {
            iccid: self.iccid.clone()?,
            // Default to the first number.
            primary_phone_number: self.phone_numbers.as_ref()?.first()?.clone(),
            mcc: self.mcc.clone()?,
            mnc: self.mnc.clone()?,
            preferred_languages: self.preferred_languages.clone()?,
            data_roaming_enabled: false,
        })
    }
}

/// A write the driver must issue on an oFono `ConnectionManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    SetPowered(bool),
    SetRoamingAllowed(bool),
}

/// High-level notifications from the SIM manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// A SIM was seen for the first time and persisted.
    SimAdded(String),
    SimUpdated(String),
    ModemsChanged,
    MobileDataChanged,
}

/// Result of feeding one update into [`SimManagerState`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub events: Vec<SimEvent>,
    /// Writes keyed by modem path.
    pub actions: Vec<(String, PolicyAction)>,
}

impl Outcome {
    fn event(&mut self, event: SimEvent) {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
    }

    fn merge(&mut self, other: Outcome) {
        for event in other.events {
            self.event(event);
        }
        for action in other.actions {
            if !self.actions.contains(&action) {
                self.actions.push(action);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.actions.is_empty()
    }
}

#[derive(Debug, Default)]
struct ConnectionManagerState {
    powered: Option<bool>,
    roaming_allowed: Option<bool>,
}

#[derive(Debug)]
struct ModemEntry {
    index: Option<u32>,
    serial: String,
    interfaces: Vec<String>,
    sim: Option<LiveSimData>,
    connection: Option<ConnectionManagerState>,
    /// ICCID of the known SIM bound to this modem.
    bound: Option<String>,
}

impl ModemEntry {
    fn new(path: &str) -> Self {
        Self {
            index: trailing_index(path),
            serial: String::new(),
            interfaces: Vec::new(),
            sim: None,
            connection: None,
            bound: None,
        }
    }

    fn has_interface(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }
}

/// Snapshot of a SIM card.
#[derive(Debug, Clone, PartialEq)]
pub struct Sim {
    pub iccid: String,
    pub imsi: Option<String>,
    pub primary_phone_number: String,
    pub mcc: String,
    pub mnc: String,
    pub preferred_languages: Vec<String>,
    pub data_roaming_enabled: bool,
    /// Effective value: global mobile data on and this is the data SIM.
    pub mobile_data_enabled: bool,
    pub present: bool,
    pub locked: bool,
    pub required_pin: PinType,
    pub retries: HashMap<PinType, u8>,
    /// oFono modem path while present.
    pub modem: Option<String>,
}

/// Snapshot of an oFono modem.
#[derive(Debug, Clone, PartialEq)]
pub struct Modem {
    pub path: String,
    /// Parsed from the trailing digits of the path.
    pub index: Option<u32>,
    pub serial: String,
    /// ICCID of the known SIM in this modem, if any.
    pub sim: Option<String>,
}

/// SIM/modem policy owner.
#[derive(Debug)]
pub struct SimManagerState {
    settings: ConnectivitySettings,
    known: BTreeMap<String, SimRecord>,
    /// Order in which SIMs were first seen.
    known_order: Vec<String>,
    modems: BTreeMap<String, ModemEntry>,
    mobile_data_enabled: bool,
    sim_for_mobile_data: Option<String>,
}

impl SimManagerState {
    /// Loads known SIMs and mobile-data policy from `settings`.
    pub fn new(mut settings: ConnectivitySettings) -> Self {
        let listed = settings.known_sims();
        let mut known = BTreeMap::new();
        let mut known_order = Vec::new();
        for iccid in &listed {
            if let Some(record) = settings.sim_record(iccid) {
                known_order.push(iccid.clone());
                known.insert(iccid.clone(), record);
            }
        }
        if known_order.len() != listed.len()
            && let Err(e) = settings.set_known_sims(known_order.clone())
        {
            warn!("Failed to rewrite known SIM list: {e}");
        }

        let mobile_data_enabled = match settings.mobile_data_enabled() {
            Some(enabled) => enabled,
            None => {
                debug!("No stored mobile data policy, defaulting to off");
                if let Err(e) = settings.set_mobile_data_enabled(false) {
                    warn!("Failed to store mobile data policy: {e}");
                }
                false
            }
        };
        let sim_for_mobile_data = settings.sim_for_mobile_data();

        Self {
            settings,
            known,
            known_order,
            modems: BTreeMap::new(),
            mobile_data_enabled,
            sim_for_mobile_data,
        }
    }

    pub fn mobile_data_enabled(&self) -> bool {
        self.mobile_data_enabled
    }

    pub fn sim_for_mobile_data(&self) -> Option<&str> {
        self.sim_for_mobile_data.as_deref()
    }

    fn effective_mobile_data(&self, iccid: &str) -> bool {
        self.mobile_data_enabled && self.sim_for_mobile_data.as_deref() == Some(iccid)
    }

    pub fn modem_paths(&self) -> Vec<String> {
        self.modems.keys().cloned().collect()
    }

    pub fn has_modem(&self, path: &str) -> bool {
        self.modems.contains_key(path)
    }

    /// Interfaces last reported by a modem.
    pub fn modem_interfaces(&self, path: &str) -> &[String] {
        self.modems
            .get(path)
            .map(|m| m.interfaces.as_slice())
            .unwrap_or_default()
    }

    pub fn modems(&self) -> Vec<Modem> {
        self.modems
            .iter()
            .map(|(path, m)| Modem {
                path: path.clone(),
                index: m.index,
                serial: m.serial.clone(),
                sim: m.bound.clone(),
            })
            .collect()
    }

    fn modem_of(&self, iccid: &str) -> Option<(&String, &ModemEntry)> {
        self.modems
            .iter()
            .find(|(_, m)| m.bound.as_deref() == Some(iccid))
    }

    /// Known SIMs in first-seen order, present or not.
    pub fn sims(&self) -> Vec<Sim> {
        self.known_order
            .iter()
            .filter_map(|iccid| self.sim(iccid))
            .collect()
    }

    pub fn sim(&self, iccid: &str) -> Option<Sim> {
        let record = self.known.get(iccid)?;
        let bound = self.modem_of(iccid);
        let live = bound.and_then(|(_, m)| m.sim.as_ref());
        Some(Sim {
            iccid: record.iccid.clone(),
            imsi: live.and_then(|l| l.imsi.clone()),
            primary_phone_number: record.primary_phone_number.clone(),
            mcc: record.mcc.clone(),
            mnc: record.mnc.clone(),
            preferred_languages: record.preferred_languages.clone(),
            data_roaming_enabled: record.data_roaming_enabled,
            mobile_data_enabled: self.effective_mobile_data(iccid),
            present: bound.is_some(),
            locked: live.is_some_and(LiveSimData::locked),
            required_pin: live.and_then(|l| l.required_pin).unwrap_or(PinType::None),
            retries: live.map(|l| l.retries.clone()).unwrap_or_default(),
            modem: bound.map(|(p, _)| p.clone()),
        })
    }

    /// Modem path whose `SimManager` holds the SIM `iccid`.
    pub fn sim_manager_of(&self, iccid: &str) -> Result<String> {
        if !self.known.contains_key(iccid) {
            return Err(ConnectivityError::NotFound(format!("SIM {iccid}")));
        }
        let (path, modem) = self
            .modem_of(iccid)
            .ok_or_else(|| ConnectivityError::NotFound(format!("SIM {iccid} is not inserted")))?;
        if !modem.has_interface(ofono::SIM_MANAGER_INTERFACE) {
            return Err(ConnectivityError::NotFound(format!("SimManager on {path}")));
        }
        Ok(path.clone())
    }

    pub fn modem_added(&mut self, path: &str) -> Outcome {
        let mut outcome = Outcome::default();
        if self.modems.contains_key(path) {
            warn!("Trying to add already existing modem: {path}");
            return outcome;
        }
        debug!("Modem added: {path}");
        self.modems.insert(path.to_owned(), ModemEntry::new(path));
        outcome.event(SimEvent::ModemsChanged);
        outcome
    }

    pub fn modem_removed(&mut self, path: &str) -> Outcome {
        let mut outcome = Outcome::default();
        let Some(modem) = self.modems.remove(path) else {
            warn!("Trying to remove unknown modem: {path}");
            return outcome;
        };
        debug!("Modem removed: {path}");
        if let Some(iccid) = modem.bound {
            outcome.event(SimEvent::SimUpdated(iccid));
        }
        outcome.event(SimEvent::ModemsChanged);
        outcome
    }

    /// Applies an `org.ofono.Modem` property.
    pub fn modem_property(&mut self, path: &str, name: &str, value: &PropertyValue) -> Outcome {
        let mut outcome = Outcome::default();
        let Some(modem) = self.modems.get_mut(path) else {
            return outcome;
        };
        let mut connection_appeared = false;
        match name {
            "Serial" => {
                if let Some(serial) = value.as_str()
                    && serial != modem.serial
                {
                    modem.serial = serial.to_owned();
                    outcome.event(SimEvent::ModemsChanged);
                }
            }
            "Interfaces" => {
                modem.interfaces = value.as_str_list().unwrap_or_default().to_vec();
                let has_sim = modem.has_interface(ofono::SIM_MANAGER_INTERFACE);
                let has_conn = modem.has_interface(ofono::CONNECTION_MANAGER_INTERFACE);

                if has_sim && modem.sim.is_none() {
                    modem.sim = Some(LiveSimData::default());
                } else if !has_sim && modem.sim.is_some() {
                    modem.sim = None;
                    if let Some(iccid) = modem.bound.take() {
                        info!("SIM {iccid} left modem {path}");
                        outcome.event(SimEvent::SimUpdated(iccid));
                    }
                }

                if has_conn && modem.connection.is_none() {
                    modem.connection = Some(ConnectionManagerState::default());
                    connection_appeared = true;
                } else if !has_conn {
                    modem.connection = None;
                }
            }
            _ => {}
        }
        if connection_appeared {
            // Push the stored policy as soon as the interface shows up.
            outcome.merge(self.enforce(path, true));
        }
        outcome
    }

    /// Applies an `org.ofono.SimManager` property of the modem at `path`.
    pub fn sim_property(&mut self, path: &str, name: &str, value: &PropertyValue) -> Outcome {
        let mut outcome = Outcome::default();
        let Some(modem) = self.modems.get_mut(path) else {
            return outcome;
        };
        let Some(live) = modem.sim.as_mut() else {
            return outcome;
        };

        let was_ready = live.is_ready();
        if !live.apply(name, value) {
            return outcome;
        }
        let ready = live.is_ready();

        if !live.present {
            if let Some(iccid) = modem.bound.take() {
                info!("SIM {iccid} removed from {path}");
                outcome.event(SimEvent::SimUpdated(iccid));
            }
            return outcome;
        }

        let bound = modem.bound.clone();
        if ready && !was_ready {
            outcome.merge(self.sim_ready(path));
        } else if let Some(iccid) = bound {
            outcome.event(SimEvent::SimUpdated(iccid));
        }
        outcome
    }

    fn sim_ready(&mut self, path: &str) -> Outcome {
        let mut outcome = Outcome::default();
        let Some(record) = self
            .modems
            .get(path)
            .and_then(|m| m.sim.as_ref())
            .and_then(LiveSimData::to_record)
        else {
            return outcome;
        };
        let iccid = record.iccid.clone();

        if self.known.contains_key(&iccid) {
            info!("Known SIM {iccid} ready in {path}");
            outcome.event(SimEvent::SimUpdated(iccid.clone()));
        } else {
            info!("New SIM {iccid} ready in {path}");
            if let Err(e) = self.settings.save_sim_record(&record) {
                warn!("Failed to persist SIM {iccid}: {e}");
            }
            self.known.insert(iccid.clone(), record);
            self.known_order.push(iccid.clone());
            if let Err(e) = self.settings.set_known_sims(self.known_order.clone()) {
                warn!("Failed to persist known SIM list: {e}");
            }
            outcome.event(SimEvent::SimAdded(iccid.clone()));
        }

        if let Some(modem) = self.modems.get_mut(path) {
            modem.bound = Some(iccid);
        }
        outcome.merge(self.choose_sim_for_mobile_data());
        outcome.merge(self.enforce(path, true));
        outcome
    }

    /// Picks the only present SIM for mobile data when none is chosen yet.
    fn choose_sim_for_mobile_data(&mut self) -> Outcome {
        let mut outcome = Outcome::default();
        if self.sim_for_mobile_data.is_some() {
            return outcome;
        }
        let mut present = self.modems.values().filter_map(|m| m.bound.as_ref());
        let (Some(only), None) = (present.next(), present.next()) else {
            return outcome;
        };
        let only = only.clone();
        info!("Using SIM {only} for mobile data");
        if let Err(e) = self.settings.set_sim_for_mobile_data(&only) {
            warn!("Failed to persist SIM for mobile data: {e}");
        }
        self.sim_for_mobile_data = Some(only);
        outcome.event(SimEvent::MobileDataChanged);
        outcome.merge(self.enforce_all());
        outcome
    }

    /// Applies an `org.ofono.ConnectionManager` property of the modem at
    /// `path` and corrects any drift from the stored policy.
    pub fn connection_property(&mut self, path: &str, name: &str, value: &PropertyValue) -> Outcome {
        let Some(conn) = self
            .modems
            .get_mut(path)
            .and_then(|m| m.connection.as_mut())
        else {
            return Outcome::default();
        };
        let Some(value) = value.as_bool() else {
            return Outcome::default();
        };
        match name {
            "Powered" => conn.powered = Some(value),
            "RoamingAllowed" => conn.roaming_allowed = Some(value),
            _ => return Outcome::default(),
        }
        self.enforce(path, false)
    }

    /// Actions that bring the modem's connection manager in line with the
    /// policy of the SIM bound to it. With `force`, unknown live values
    /// are written as well.
    fn enforce(&self, path: &str, force: bool) -> Outcome {
        let mut outcome = Outcome::default();
        let Some(modem) = self.modems.get(path) else {
            return outcome;
        };
        let (Some(conn), Some(iccid)) = (modem.connection.as_ref(), modem.bound.as_deref()) else {
            return outcome;
        };
        let Some(record) = self.known.get(iccid) else {
            return outcome;
        };

        let powered = self.effective_mobile_data(iccid);
        let drifted = |live: Option<bool>, wanted: bool| match live {
            Some(v) => v != wanted,
            None => force,
        };
        if drifted(conn.powered, powered) {
            debug!("{path}: enforcing Powered={powered}");
            outcome
                .actions
                .push((path.to_owned(), PolicyAction::SetPowered(powered)));
        }
        if drifted(conn.roaming_allowed, record.data_roaming_enabled) {
            debug!(
                "{path}: enforcing RoamingAllowed={}",
                record.data_roaming_enabled
            );
            outcome.actions.push((
                path.to_owned(),
                PolicyAction::SetRoamingAllowed(record.data_roaming_enabled),
            ));
        }
        outcome
    }

    fn enforce_all(&self) -> Outcome {
        let mut outcome = Outcome::default();
        for path in self.modems.keys() {
            outcome.merge(self.enforce(path, true));
        }
        outcome
    }

    fn bound_sims_event(&self, outcome: &mut Outcome) {
        for iccid in self.modems.values().filter_map(|m| m.bound.clone()) {
            outcome.event(SimEvent::SimUpdated(iccid));
        }
    }

    pub fn set_mobile_data_enabled(&mut self, enabled: bool) -> Result<Outcome> {
        let mut outcome = Outcome::default();
        if enabled == self.mobile_data_enabled {
            return Ok(outcome);
        }
        self.settings.set_mobile_data_enabled(enabled)?;
        self.mobile_data_enabled = enabled;
        info!("Mobile data {}", if enabled { "enabled" } else { "disabled" });
        outcome.event(SimEvent::MobileDataChanged);
        self.bound_sims_event(&mut outcome);
        outcome.merge(self.enforce_all());
        Ok(outcome)
    }

    pub fn set_sim_for_mobile_data(&mut self, iccid: &str) -> Result<Outcome> {
        let mut outcome = Outcome::default();
        if !self.known.contains_key(iccid) {
            return Err(ConnectivityError::NotFound(format!("SIM {iccid}")));
        }
        if self.sim_for_mobile_data.as_deref() == Some(iccid) {
            return Ok(outcome);
        }
        self.settings.set_sim_for_mobile_data(iccid)?;
        self.sim_for_mobile_data = Some(iccid.to_owned());
        outcome.event(SimEvent::MobileDataChanged);
        self.bound_sims_event(&mut outcome);
        outcome.merge(self.enforce_all());
        Ok(outcome)
    }

    pub fn set_data_roaming_enabled(&mut self, iccid: &str, enabled: bool) -> Result<Outcome> {
        let mut outcome = Outcome::default();
        let record = self
            .known
            .get_mut(iccid)
            .ok_or_else(|| ConnectivityError::NotFound(format!("SIM {iccid}")))?;
        if record.data_roaming_enabled == enabled {
            return Ok(outcome);
        }
        record.data_roaming_enabled = enabled;
        let record = record.clone();
        self.settings.save_sim_record(&record)?;
        outcome.event(SimEvent::SimUpdated(iccid.to_owned()));
        if let Some(path) = self.modem_of(iccid).map(|(p, _)| p.clone()) {
            outcome.merge(self.enforce(&path, true));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::property_watcher::PropertyCache;
    use crate::core::settings::{MemorySettingsStore, SettingValue, SettingsStore};

    const MODEM: &str = "/ril_0";
    const ICCID: &str = "8901260882";

    fn state_with(store: MemorySettingsStore) -> SimManagerState {
        SimManagerState::new(ConnectivitySettings::new(Box::new(store)))
    }

    fn strs(list: &[&str]) -> PropertyValue {
        PropertyValue::StrList(list.iter().map(|s| s.to_string()).collect())
    }

    fn insert_modem(state: &mut SimManagerState) {
        state.modem_added(MODEM);
        state.modem_property(
            MODEM,
            "Interfaces",
            &strs(&[ofono::SIM_MANAGER_INTERFACE, ofono::CONNECTION_MANAGER_INTERFACE]),
        );
    }

    fn insert_sim(state: &mut SimManagerState) -> Outcome {
        let mut outcome = Outcome::default();
        for (name, value) in sim_props() {
            outcome.merge(state.sim_property(MODEM, name, &value));
        }
        outcome
    }

    fn sim_props() -> Vec<(&'static str, PropertyValue)> {
        vec![
            ("Present", PropertyValue::Bool(true)),
            ("CardIdentifier", PropertyValue::from(ICCID)),
            ("SubscriberIdentity", PropertyValue::from("244910000000001")),
            ("SubscriberNumbers", strs(&["+358401234567"])),
            ("MobileCountryCode", PropertyValue::from("244")),
            ("MobileNetworkCode", PropertyValue::from("91")),
            ("PreferredLanguages", strs(&["fi", "en"])),
            ("PinRequired", PropertyValue::from("none")),
        ]
    }

    /// Feeds a property the way the modem monitor does: through the
    /// watcher's cache, which drops the card's entries once it leaves.
    fn feed_cached(
        state: &mut SimManagerState,
        cache: &mut PropertyCache,
        name: &str,
        value: PropertyValue,
    ) -> Outcome {
        let Some(value) = cache.apply(name, value) else {
            return Outcome::default();
        };
        let outcome = state.sim_property(MODEM, name, &value);
        if card_left(name, &value) {
            for name in CARD_PROPERTIES {
                cache.remove(name);
            }
        }
        outcome
    }

    fn roaming_actions(outcome: &Outcome) -> Vec<bool> {
        outcome
            .actions
            .iter()
            .filter_map(|(_, a)| match a {
                PolicyAction::SetRoamingAllowed(value) => Some(*value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn pin_requests_carry_the_ofono_type() {
        assert_eq!(
            enter_pin_request(PinType::Pin, "1234").unwrap(),
            Some(PinRequest::Enter {
                pin_type: "pin",
                pin: "1234".into()
            })
        );
        assert_eq!(enter_pin_request(PinType::None, "1234").unwrap(), None);
        assert_eq!(
            reset_pin_request(PinType::Puk, "12345678", "0000").unwrap(),
            Some(PinRequest::Reset {
                pin_type: "puk",
                puk: "12345678".into(),
                new_pin: "0000".into()
            })
        );
        assert_eq!(reset_pin_request(PinType::None, "", "").unwrap(), None);
    }

    #[test]
    fn bad_pin_requests_are_refused() {
        assert!(matches!(
            enter_pin_request(PinType::Pin, ""),
            Err(ConnectivityError::InvalidPin(_))
        ));
        assert!(matches!(
            enter_pin_request(PinType::Puk, "12a4"),
            Err(ConnectivityError::InvalidPin(_))
        ));
        assert!(matches!(
            reset_pin_request(PinType::Pin, "12345678", "0000"),
            Err(ConnectivityError::InvalidPin(_))
        ));
        assert!(matches!(
            reset_pin_request(PinType::Puk, "12345678", ""),
            Err(ConnectivityError::InvalidPin(_))
        ));
    }

    #[test]
    fn pin_goes_to_the_modem_holding_the_sim() {
        let mut state = state_with(MemorySettingsStore::new());
        assert!(matches!(
            state.sim_manager_of(ICCID),
            Err(ConnectivityError::NotFound(_))
        ));
        insert_modem(&mut state);
        insert_sim(&mut state);
        assert_eq!(state.sim_manager_of(ICCID).unwrap(), MODEM);

        state.sim_property(MODEM, "Present", &PropertyValue::Bool(false));
        assert!(matches!(
            state.sim_manager_of(ICCID),
            Err(ConnectivityError::NotFound(_))
        ));
    }

    #[test]
    fn readiness_requires_every_field() {
        let mut live = LiveSimData::default();
        live.apply("Present", &PropertyValue::Bool(true));
        live.apply("CardIdentifier", &PropertyValue::from(ICCID));
        live.apply("SubscriberIdentity", &PropertyValue::from("2449"));
        live.apply("SubscriberNumbers", &strs(&["+358"]));
        live.apply("MobileCountryCode", &PropertyValue::from("244"));
        live.apply("MobileNetworkCode", &PropertyValue::from("91"));
        assert!(!live.is_ready());
        // Empty values do not count as reported.
        live.apply("PreferredLanguages", &strs(&[]));
        assert!(!live.is_ready());
        live.apply("PreferredLanguages", &strs(&["en"]));
        assert!(live.is_ready());
    }

    #[test]
    fn identity_fields_never_reset_to_empty() {
        let mut live = LiveSimData::default();
        live.apply("Present", &PropertyValue::Bool(true));
        assert!(live.apply("MobileCountryCode", &PropertyValue::from("244")));
        assert!(!live.apply("MobileCountryCode", &PropertyValue::from("")));
        assert_eq!(live.mcc.as_deref(), Some("244"));
    }

    #[test]
    fn pin_state_and_retries() {
        let mut live = LiveSimData::default();
        live.apply("Present", &PropertyValue::Bool(true));
        live.apply("PinRequired", &PropertyValue::from("pin"));
        assert!(live.locked());
        let mut retries = BTreeMap::new();
        retries.insert("pin".to_string(), PropertyValue::Byte(3));
        retries.insert("puk".to_string(), PropertyValue::Byte(10));
        assert!(live.apply("Retries", &PropertyValue::Dict(retries)));
        assert_eq!(live.retries.get(&PinType::Pin), Some(&3));
        assert_eq!(live.retries.get(&PinType::Puk), Some(&10));
        live.apply("PinRequired", &PropertyValue::from("none"));
        assert!(!live.locked());
    }

    #[test]
    fn new_sim_is_persisted_and_chosen_for_data() {
        let mut state = state_with(MemorySettingsStore::new());
        insert_modem(&mut state);
        let outcome = insert_sim(&mut state);

        assert!(outcome.events.contains(&SimEvent::SimAdded(ICCID.into())));
        assert!(outcome.events.contains(&SimEvent::MobileDataChanged));
        assert_eq!(state.sim_for_mobile_data(), Some(ICCID));

        let sim = state.sim(ICCID).unwrap();
        assert!(sim.present);
        assert_eq!(sim.primary_phone_number, "+358401234567");
        assert_eq!(sim.modem.as_deref(), Some(MODEM));
        assert!(!sim.mobile_data_enabled);
        assert!(!sim.data_roaming_enabled);
        assert_eq!(state.modems()[0].index, Some(0));
    }

    #[test]
    fn drift_is_forced_back() {
        let mut state = state_with(MemorySettingsStore::new());
        insert_modem(&mut state);
        insert_sim(&mut state);

        let outcome = state.connection_property(MODEM, "RoamingAllowed", &PropertyValue::Bool(true));
        assert_eq!(roaming_actions(&outcome), vec![false]);

        let outcome = state.connection_property(MODEM, "RoamingAllowed", &PropertyValue::Bool(false));
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn mobile_data_follows_data_sim() {
        let mut state = state_with(MemorySettingsStore::new());
        insert_modem(&mut state);
        insert_sim(&mut state);

        let outcome = state.set_mobile_data_enabled(true).unwrap();
        assert!(
            outcome
                .actions
                .contains(&(MODEM.to_string(), PolicyAction::SetPowered(true)))
        );
        assert!(state.sim(ICCID).unwrap().mobile_data_enabled);
        assert!(state.set_mobile_data_enabled(true).unwrap().is_empty());
    }

    #[test]
    fn unknown_sim_cannot_carry_data() {
        let mut state = state_with(MemorySettingsStore::new());
        assert!(matches!(
            state.set_sim_for_mobile_data("nope"),
            Err(ConnectivityError::NotFound(_))
        ));
    }

    #[test]
    fn reinserted_sim_gets_its_roaming_policy_back() {
        let mut state = state_with(MemorySettingsStore::new());
        insert_modem(&mut state);
        insert_sim(&mut state);
        state.set_data_roaming_enabled(ICCID, true).unwrap();

        let outcome = state.sim_property(MODEM, "Present", &PropertyValue::Bool(false));
        assert!(outcome.events.contains(&SimEvent::SimUpdated(ICCID.into())));
        assert!(!state.sim(ICCID).unwrap().present);

        let outcome = insert_sim(&mut state);
        assert!(!outcome.events.contains(&SimEvent::SimAdded(ICCID.into())));
        assert_eq!(roaming_actions(&outcome), vec![true]);
        assert!(state.sim(ICCID).unwrap().present);
    }

    #[test]
    fn same_card_reinserted_through_the_cache_is_ready_again() {
        let mut state = state_with(MemorySettingsStore::new());
        let mut cache = PropertyCache::new();
        insert_modem(&mut state);
        for (name, value) in sim_props() {
            feed_cached(&mut state, &mut cache, name, value);
        }
        state.set_data_roaming_enabled(ICCID, true).unwrap();

        feed_cached(&mut state, &mut cache, "Present", PropertyValue::Bool(false));
        assert!(!state.sim(ICCID).unwrap().present);
        assert!(cache.get("CardIdentifier").is_none());

        // oFono reports the very same values for the same card.
        let mut outcome = Outcome::default();
        for (name, value) in sim_props() {
            outcome.merge(feed_cached(&mut state, &mut cache, name, value));
        }
        assert_eq!(roaming_actions(&outcome), vec![true]);
        assert!(state.sim(ICCID).unwrap().present);
    }

    #[test]
    fn only_a_false_present_means_the_card_left() {
        assert!(card_left("Present", &PropertyValue::Bool(false)));
        assert!(!card_left("Present", &PropertyValue::Bool(true)));
        assert!(!card_left("CardIdentifier", &PropertyValue::from("")));
    }

    #[test]
    fn corrupt_records_are_dropped_on_load() {
        let mut store = MemorySettingsStore::new();
        store.set(
            "KnownSims",
            SettingValue::StringList(vec!["1".into(), "2".into()]),
        );
        store.set("Sims/1/Mcc", SettingValue::String("244".into()));
        let state = state_with(store);
        assert!(state.sims().is_empty());
    }

    #[test]
    fn modem_without_sim_manager_unbinds() {
        let mut state = state_with(MemorySettingsStore::new());
        insert_modem(&mut state);
        insert_sim(&mut state);
        let outcome = state.modem_property(MODEM, "Interfaces", &strs(&[ofono::MODEM_INTERFACE]));
        assert!(outcome.events.contains(&SimEvent::SimUpdated(ICCID.into())));
        assert!(state.modems()[0].sim.is_none());

        let outcome = state.modem_removed(MODEM);
        assert_eq!(outcome.events, vec![SimEvent::ModemsChanged]);
        assert!(state.modems().is_empty());
    }
}
