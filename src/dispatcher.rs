//! Client Dispatcher (§4.7): the single message-handling surface both
//! transports call into.
//!
//! Grounded directly in `original_source/src/modules/client.py`'s
//! `ClientModule.handle_received_message` (the behavior table) and
//! `RadioHandler` (the radio-side device-registration/state callbacks,
//! reproduced here as [`RadioHandler`] implementing
//! [`crate::radio::DeviceHandler`]). Session enforcement, auth-failure
//! handling, and response framing are delegated to [`Transport`] so this
//! module stays transport-agnostic, mirroring the original's
//! `CommunicationHandler` abstraction.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use base64::Engine;

use crate::auth::Authentication;
use crate::entities::{Entity, EntityCommand, EntityType, Registry};
use crate::history::HistoryLog;
use crate::localization::Localization;
use crate::persistence::Persistence;
use crate::radio::{DeviceHandler, LinkManager};
use crate::time::unix_now;
use crate::transport::{
    PeerId, Transport, MSG_COUNT_HISTORY, MSG_ERROR, MSG_KEEPALIVE, MSG_LIST_DEVICES, MSG_LIST_DEVICE_TYPES, MSG_LIST_HISTORY, MSG_LIST_USERS, MSG_LOAD_TYPE_IMAGE, MSG_LOGIN,
    MSG_RENAME_DEVICE, MSG_SEND_COMMAND, MSG_STATE_CHANGED, MSG_USERS_CHANGED, MSG_USER_CREATE, MSG_USER_DELETE, MSG_USER_EDIT,
};

/// Parses a `MSG_A_LIST_DEVICES` payload: `"{type_id};{name_like}"`,
/// `"{type_id}"`, `"{name_like}"`, or empty.
fn parse_list_devices(message: &str) -> (Option<u16>, Option<String>) {
    if message.is_empty() {
        return (None, None);
    }
    if let Some((type_part, name_part)) = message.split_once(';') {
        if let Ok(type_id) = type_part.parse::<u16>() {
            return (Some(type_id), if name_part.is_empty() { None } else { Some(name_part.to_string()) });
        }
    }
    if let Ok(type_id) = message.parse::<u16>() {
        return (Some(type_id), None);
    }
    (None, Some(message.to_string()))
}

/// Parses a `MSG_A_SEND_COMMAND` payload: `"{unique_id}#{cmd_id}"` or
/// `"{unique_id}#{cmd_id};{value}"`.
fn parse_send_command(message: &str) -> Option<(&str, u16, Option<&str>)> {
    let (entity_id, cmd) = message.split_once('#')?;
    let (cmd_id, value) = match cmd.split_once(';') {
        Some((id, value)) => (id, Some(value)),
        None => (cmd, None),
    };
    Some((entity_id, cmd_id.parse().ok()?, value))
}

fn parse_ms_timestamp(field: &str) -> Option<f64> {
    if field.is_empty() {
        None
    } else {
        field.parse::<f64>().ok().map(|ms| ms / 1000.0)
    }
}

fn non_empty(field: &str) -> Option<&str> {
    if field.is_empty() {
        None
    } else {
        Some(field)
    }
}

pub struct Dispatcher<P: Persistence + 'static> {
    store: &'static P,
    auth: Authentication<'static, P>,
    localization: &'static Localization,
    image_search_path: Vec<PathBuf>,
    link: std::sync::Arc<LinkManager>,
    transports: Mutex<Vec<std::sync::Arc<dyn Transport>>>,
}

impl<P: Persistence + 'static> Dispatcher<P> {
    pub fn new(store: &'static P, link: std::sync::Arc<LinkManager>, localization: &'static Localization, image_search_path: Vec<PathBuf>) -> Self {
        Dispatcher {
            store,
            auth: Authentication::new(store),
            localization,
            image_search_path,
            link,
            transports: Mutex::new(Vec::new()),
        }
    }

    pub fn configure(&self) -> Result<(), crate::error::HubError> {
        self.auth.configure()
    }

    pub fn add_transport(&self, transport: std::sync::Arc<dyn Transport>) {
        self.transports.lock().unwrap().push(transport);
    }

    fn registry(&self) -> Registry<'_, P> {
        Registry::new(self.store)
    }

    fn history(&self) -> HistoryLog<'_, P> {
        HistoryLog::new(self.store)
    }

    fn error_key(&self, key: &str, detail: &str) -> Vec<u8> {
        format!("{}: {}", self.localization.localize(key), detail).into_bytes()
    }

    fn error_plain(&self, key: &str) -> Vec<u8> {
        self.localization.localize(key).into_bytes()
    }

    /// Broadcasts `A5 STATE_CHANGED` with the serialized entity on every
    /// registered transport, the Rust analogue of `ClientModule.send_state_change`.
    pub fn broadcast_state_change(&self, entity: &Entity) {
        let payload = entity.serialize().into_bytes();
        for transport in self.transports.lock().unwrap().iter() {
            transport.broadcast(MSG_STATE_CHANGED, &payload);
        }
    }

    fn find_image_path(&self, name: &str) -> Option<PathBuf> {
        let requested = Path::new(name);
        if requested.is_absolute() {
            return requested.exists().then(|| requested.to_path_buf());
        }
        for dir in &self.image_search_path {
            let candidate = dir.join(requested);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    /// The single entry point both transports invoke for every reassembled
    /// (UDP) or framed (TCP) message — `ClientModule.handle_received_message`.
    pub fn handle(&self, transport: &dyn Transport, peer: PeerId, msg_type: u8, payload: &[u8]) {
        if msg_type == MSG_LOGIN {
            self.handle_login(transport, peer, payload);
            return;
        }

        if !transport.is_valid_session(payload, peer) {
            log::warn!("auth failed for message from {:?}", peer);
            transport.authentication_failed(peer);
            return;
        }

        let message = transport.strip_session_prefix(payload);
        let message = String::from_utf8_lossy(message).into_owned();

        match msg_type {
            MSG_KEEPALIVE => transport.send(MSG_KEEPALIVE, &[], peer),
            MSG_LIST_DEVICE_TYPES => self.handle_list_device_types(transport, peer),
            MSG_LIST_DEVICES => self.handle_list_devices(transport, peer, &message),
            MSG_SEND_COMMAND => self.handle_send_command(transport, peer, &message),
            MSG_LOAD_TYPE_IMAGE => self.handle_load_image(transport, peer, &message),
            MSG_RENAME_DEVICE => self.handle_rename_device(transport, peer, &message),
            MSG_COUNT_HISTORY => self.handle_count_history(transport, peer, &message),
            MSG_LIST_HISTORY => self.handle_list_history(transport, peer, &message),
            MSG_LIST_USERS => self.handle_list_users(transport, peer),
            MSG_USER_CREATE => self.handle_user_create(transport, peer, &message),
            MSG_USER_EDIT => self.handle_user_edit(transport, peer, &message),
            MSG_USER_DELETE => self.handle_user_delete(transport, peer, &message),
            other => log::debug!("no handler for message type 0x{:02X}", other),
        }
    }

    fn handle_login(&self, transport: &dyn Transport, peer: PeerId, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        let parsed = text.split_once(':').and_then(|(user, hash)| self.auth.authenticate(user, hash).ok().flatten());
        match parsed {
            Some((session_id, is_admin)) => {
                transport.authentication_succeeded(&session_id, peer);
                let mut response = session_id.into_bytes();
                if is_admin {
                    response.push(b'*');
                }
                transport.send(MSG_LOGIN, &response, peer);
            }
            None => transport.authentication_failed(peer),
        }
    }

    fn handle_list_device_types(&self, transport: &dyn Transport, peer: PeerId) {
        let serialized: Vec<String> = EntityType::all().iter().map(|t| t.serialize()).collect();
        let response = format!("[{}]", serialized.join(","));
        transport.send(MSG_LIST_DEVICE_TYPES, response.as_bytes(), peer);
    }

    fn handle_list_devices(&self, transport: &dyn Transport, peer: PeerId, message: &str) {
        let (type_id, name_pattern) = parse_list_devices(message);
        let registry = self.registry();
        let response = match registry.list(type_id, name_pattern.as_deref()) {
            Ok(entities) => {
                let serialized: Vec<String> = entities.iter().map(|e| e.serialize()).collect();
                format!("[{}]", serialized.join(","))
            }
            Err(err) => {
                log::error!("list devices failed: {:#}", err);
                String::from("[]")
            }
        };
        transport.send(MSG_LIST_DEVICES, response.as_bytes(), peer);
    }

    fn handle_send_command(&self, transport: &dyn Transport, peer: PeerId, message: &str) {
        let Some((unique_id, cmd_id, value)) = parse_send_command(message) else {
            transport.send(MSG_ERROR, &self.error_key("error.not.found.command", message), peer);
            return;
        };

        let registry = self.registry();
        let entity = match registry.find(unique_id) {
            Ok(Some(entity)) => entity,
            _ => {
                transport.send(MSG_ERROR, &self.error_key("error.not.found.device", unique_id), peer);
                return;
            }
        };

        // Resolved against the global command set, not the device type's own
        // command list: a command can be globally known but unhandled by a
        // particular class, in which case it is discarded rather than
        // rejected (see the `NoSuchCommand` arm below).
        let Some(command) = EntityCommand::find(cmd_id) else {
            transport.send(MSG_ERROR, &self.error_key("error.not.found.command", &cmd_id.to_string()), peer);
            return;
        };

        let handler = entity.entity_type.entity_class.handler();
        match handler.encode_command(cmd_id, value) {
            Ok(radio_payload) => {
                self.link.send_message(&entity.unique_id, &radio_payload);
                let action = handler.describe_command(&command.name, cmd_id, value);
                if let Err(err) = registry.log_command(&entity, &action, unix_now()) {
                    log::error!("failed to log command: {:#}", err);
                }
                transport.send(MSG_SEND_COMMAND, &[], peer);
            }
            // A command this device's class doesn't handle falls through to
            // the base entity's silent discard in the original -- still an
            // empty-success reply, not an error.
            Err(crate::error::HubError::NoSuchCommand(_)) => transport.send(MSG_SEND_COMMAND, &[], peer),
            Err(_) => transport.send(MSG_ERROR, &self.error_key("error.not.found.command", &cmd_id.to_string()), peer),
        }
    }

    fn handle_load_image(&self, transport: &dyn Transport, peer: PeerId, message: &str) {
        match self.find_image_path(message).and_then(|path| std::fs::read(path).ok()) {
            Some(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                transport.send(MSG_LOAD_TYPE_IMAGE, encoded.as_bytes(), peer);
            }
            None => transport.send(MSG_ERROR, &self.error_key("error.load.image", message), peer),
        }
    }

    fn handle_rename_device(&self, transport: &dyn Transport, peer: PeerId, message: &str) {
        let Some((unique_id, new_name)) = message.split_once(';') else {
            transport.send(MSG_ERROR, &self.error_key("error.not.found.device", message), peer);
            return;
        };

        let registry = self.registry();
        match registry.find(unique_id) {
            Ok(Some(mut entity)) => {
                entity.name = new_name.to_string();
                if let Err(err) = registry.save(&entity) {
                    log::error!("failed to save renamed entity: {:#}", err);
                }
                self.broadcast_state_change(&entity);
                transport.send(MSG_RENAME_DEVICE, &[], peer);
            }
            _ => transport.send(MSG_ERROR, &self.error_key("error.not.found.device", unique_id), peer),
        }
    }

    fn handle_count_history(&self, transport: &dyn Transport, peer: PeerId, message: &str) {
        let fields: Vec<&str> = message.split(';').collect();
        let from = fields.first().and_then(|f| parse_ms_timestamp(f));
        let to = fields.get(1).and_then(|f| parse_ms_timestamp(f));
        let entity_id = fields.get(2).and_then(|f| non_empty(f));

        match self.history().count(from, to, entity_id) {
            Ok(count) => transport.send(MSG_COUNT_HISTORY, count.to_string().as_bytes(), peer),
            Err(err) => {
                log::error!("count history failed: {:#}", err);
                transport.send(MSG_COUNT_HISTORY, b"0", peer);
            }
        }
    }

    fn handle_list_history(&self, transport: &dyn Transport, peer: PeerId, message: &str) {
        let fields: Vec<&str> = message.split(';').collect();
        let from = fields.first().and_then(|f| parse_ms_timestamp(f));
        let to = fields.get(1).and_then(|f| parse_ms_timestamp(f));
        let entity_id = fields.get(2).and_then(|f| non_empty(f));
        let limit = fields.get(3).and_then(|f| f.parse::<u64>().ok());
        let offset = fields.get(4).and_then(|f| f.parse::<u64>().ok());

        match self.history().query(from, to, entity_id, limit, offset) {
            Ok(rows) => {
                let mut response = String::new();
                for row in rows {
                    response.push_str(&format!("#{};{};{};{};{}", row.timestamp, row.entity_id, row.entity_name, row.action, row.kind.as_str()));
                }
                transport.send(MSG_LIST_HISTORY, response.as_bytes(), peer);
            }
            Err(err) => {
                log::error!("list history failed: {:#}", err);
                transport.send(MSG_LIST_HISTORY, &[], peer);
            }
        }
    }

    fn handle_list_users(&self, transport: &dyn Transport, peer: PeerId) {
        match self.auth.list_users() {
            Ok(users) => {
                let items: Vec<String> = users.into_iter().map(|u| format!("{}{}{}", u.uid, if u.is_admin { '*' } else { '#' }, u.username)).collect();
                transport.send(MSG_LIST_USERS, items.join(";").as_bytes(), peer);
            }
            Err(err) => {
                log::error!("list users failed: {:#}", err);
                transport.send(MSG_LIST_USERS, &[], peer);
            }
        }
    }

    fn handle_user_create(&self, transport: &dyn Transport, peer: PeerId, message: &str) {
        let Some((username, password_hash)) = message.split_once(';') else {
            transport.send(MSG_ERROR, &self.error_plain("error.create.user"), peer);
            return;
        };
        match self.auth.create_user(username, password_hash, false) {
            Ok(true) => transport.send(MSG_USERS_CHANGED, &[], peer),
            _ => transport.send(MSG_ERROR, &self.error_plain("error.create.user"), peer),
        }
    }

    fn handle_user_edit(&self, transport: &dyn Transport, peer: PeerId, message: &str) {
        let parts: Vec<&str> = message.splitn(3, ';').collect();
        let (Some(uid), Some(username), Some(password_hash)) = (parts.first().and_then(|s| s.parse::<u64>().ok()), parts.get(1), parts.get(2)) else {
            transport.send(MSG_ERROR, &self.error_plain("error.edit.user"), peer);
            return;
        };
        match self.auth.edit_user(uid, username, password_hash) {
            Ok(true) => transport.send(MSG_USERS_CHANGED, &[], peer),
            _ => transport.send(MSG_ERROR, &self.error_plain("error.edit.user"), peer),
        }
    }

    fn handle_user_delete(&self, transport: &dyn Transport, peer: PeerId, message: &str) {
        if let Ok(uid) = message.parse::<u64>() {
            if let Err(err) = self.auth.delete_user(uid) {
                log::error!("failed to delete user {}: {:#}", uid, err);
            }
        }
        transport.send(MSG_USERS_CHANGED, &[], peer);
    }
}

/// RF device handler: reproduces `RadioHandler.describe`/`receive` from
/// `original_source/src/modules/client.py`, registering new devices and
/// refreshing known ones on `describe`, and applying state changes on
/// `receive`.
pub struct RadioDeviceHandler<P: Persistence + 'static> {
    store: &'static P,
    dispatcher: std::sync::Arc<Dispatcher<P>>,
}

impl<P: Persistence + 'static> RadioDeviceHandler<P> {
    pub fn new(store: &'static P, dispatcher: std::sync::Arc<Dispatcher<P>>) -> Self {
        RadioDeviceHandler { store, dispatcher }
    }

    fn registry(&self) -> Registry<'_, P> {
        Registry::new(self.store)
    }
}

impl<P: Persistence + 'static> DeviceHandler for RadioDeviceHandler<P> {
    fn describe(&self, address: u8, serial: &str, payload: &[u8]) {
        let Some(&type_id_byte) = payload.first() else { return };
        let type_id = type_id_byte as u16;
        let Some(entity_type) = EntityType::find(type_id) else {
            log::warn!("entity type not found: {}", type_id);
            return;
        };

        let registry = self.registry();
        let now = unix_now();
        match registry.find(serial) {
            Ok(Some(mut entity)) => {
                entity.last_checkin = now;
                if let Err(err) = registry.save(&entity) {
                    log::error!("failed to refresh device {}: {:#}", serial, err);
                    return;
                }
                log::info!("device found: {} (address {})", serial, address);
                self.dispatcher.broadcast_state_change(&entity);
            }
            Ok(None) => {
                let mut entity = Entity::new(serial.to_string(), entity_type);
                entity.name = format!("Unknown device: {}", serial);
                entity.last_checkin = now;
                if let Err(err) = registry.save(&entity) {
                    log::error!("failed to register device {}: {:#}", serial, err);
                    return;
                }
                log::info!("device registered: {} (address {})", serial, address);
                self.dispatcher.broadcast_state_change(&entity);
            }
            Err(err) => log::error!("failed to look up device {}: {:#}", serial, err),
        }
    }

    fn receive(&self, _address: u8, serial: &str, _flags: u8, payload: &[u8]) {
        let registry = self.registry();
        let mut entity = match registry.find(serial) {
            Ok(Some(entity)) => entity,
            Ok(None) => {
                log::warn!("no device found with id: {}", serial);
                return;
            }
            Err(err) => {
                log::error!("failed to look up device {}: {:#}", serial, err);
                return;
            }
        };

        let handler = entity.entity_type.entity_class.handler();
        if let Some((state_id, value)) = handler.on_state_frame(entity.state_id, entity.state_value.as_deref(), payload) {
            if let Err(err) = registry.set_state(&mut entity, state_id, value, true, unix_now()) {
                log::error!("failed to apply state change for {}: {:#}", serial, err);
                return;
            }
            self.dispatcher.broadcast_state_change(&entity);
        }
    }
}
