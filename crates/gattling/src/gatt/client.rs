//! GATT discovery state machine
//!
//! [`GattClient`] owns the transport exclusively and drives discovery one
//! request at a time: primary services, then characteristic declarations,
//! then Client Characteristic Configuration descriptors. Each phase pages
//! over the handle space until the peer signals exhaustion.
//!
//! The caller provides the event loop: call [`GattClient::pump`] whenever the
//! socket is readable. One `pump` receives exactly one PDU, advances the
//! machine, and emits at most one request in response. Phase-completion
//! callbacks run with the machine already idle, so they may start the next
//! phase directly.
//!
//! Notifications and indications are demultiplexed inside the same receive
//! path: they may arrive between a request and its response and are
//! dispatched to their characteristic's callback without disturbing the
//! outstanding exchange.

use crate::att::constants::*;
use crate::att::error::{AttErrorCode, DecodeError};
use crate::att::pdu;
use crate::error::Error;
use crate::gatt::types::{Characteristic, CharacteristicProps, PrimaryService};
use crate::transport::AttTransport;
use crate::uuid::Uuid;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::mem;

/// Discovery phases. Exactly one request is outstanding in every state other
/// than `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    ReadingPrimaryServices,
    FindingCharacteristics,
    ReadingClientConfig,
    AwaitingWriteResponse,
}

/// Fired when a discovery phase or a configuration write completes. Receives
/// the machine, already idle, so the next phase can be started in place.
pub type PhaseCallback<T> = Box<dyn FnMut(&mut GattClient<T>)>;

/// Per-characteristic handler for pushed values.
pub type ValueCallback = Box<dyn FnMut(&[u8])>;

/// Fallback handler for pushed values on characteristics without their own.
pub type FallbackCallback = Box<dyn FnMut(&Characteristic, &[u8])>;

/// A GATT client: discovery driver, attribute database and subscription
/// controller over one connected ATT transport.
pub struct GattClient<T: AttTransport> {
    transport: T,
    services: Vec<PrimaryService>,

    state: State,
    /// Lower bound of the next discovery page. Wider than a handle so the
    /// page after 0xFFFF is representable as a terminator.
    next_handle: u32,
    /// Opcode of the outstanding request; `None` exactly while idle.
    last_request: Option<u8>,

    scratch: Vec<u8>,

    cb_services_read: Option<PhaseCallback<T>>,
    cb_characteristics_found: Option<PhaseCallback<T>>,
    cb_ccc_read: Option<PhaseCallback<T>>,
    cb_write_response: Option<PhaseCallback<T>>,
    cb_value: Option<FallbackCallback>,
    value_callbacks: HashMap<u16, ValueCallback>,
}

impl<T: AttTransport> GattClient<T> {
    /// Wraps a connected transport. The database starts empty.
    pub fn new(transport: T) -> Self {
        GattClient {
            transport,
            services: Vec::new(),
            state: State::Idle,
            next_handle: 0,
            last_request: None,
            scratch: vec![0u8; ATT_SCRATCH_LEN],
            cb_services_read: None,
            cb_characteristics_found: None,
            cb_ccc_read: None,
            cb_write_response: None,
            cb_value: None,
            value_callbacks: HashMap::new(),
        }
    }

    /// The underlying transport, e.g. to fetch its descriptor for an
    /// external readiness loop.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Everything discovered so far, services in ascending handle order.
    pub fn services(&self) -> &[PrimaryService] {
        &self.services
    }

    pub fn state(&self) -> State {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn outstanding_request(&self) -> Option<u8> {
        self.last_request
    }

    /// Abandons the outstanding exchange and returns to idle. Discovered
    /// services and characteristics are kept.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.next_handle = 0;
        self.last_request = None;
    }

    // --- Callback registration ---

    pub fn set_services_read_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut GattClient<T>) + 'static,
    {
        self.cb_services_read = Some(Box::new(callback));
    }

    pub fn set_characteristics_found_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut GattClient<T>) + 'static,
    {
        self.cb_characteristics_found = Some(Box::new(callback));
    }

    pub fn set_ccc_read_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut GattClient<T>) + 'static,
    {
        self.cb_ccc_read = Some(Box::new(callback));
    }

    pub fn set_write_response_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&mut GattClient<T>) + 'static,
    {
        self.cb_write_response = Some(Box::new(callback));
    }

    /// Handler for pushed values on characteristics that have no callback of
    /// their own.
    pub fn set_value_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&Characteristic, &[u8]) + 'static,
    {
        self.cb_value = Some(Box::new(callback));
    }

    /// Binds (or rebinds) the pushed-value handler of one characteristic.
    /// Only permitted while idle.
    pub fn bind_value_callback<F>(
        &mut self,
        service_idx: usize,
        char_idx: usize,
        callback: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&[u8]) + 'static,
    {
        if self.state != State::Idle {
            return Err(Error::InvalidState);
        }
        let chr = self.characteristic(service_idx, char_idx)?;
        let value_handle = chr.value_handle;
        self.value_callbacks
            .insert(value_handle, Box::new(callback));
        Ok(())
    }

    // --- Database queries ---

    /// Index of the first service with the given UUID.
    pub fn find_service(&self, uuid: &Uuid) -> Option<usize> {
        self.services.iter().position(|s| s.uuid == *uuid)
    }

    /// Index of the first characteristic with the given UUID inside a
    /// service.
    pub fn find_characteristic(&self, service_idx: usize, uuid: &Uuid) -> Option<usize> {
        self.services
            .get(service_idx)?
            .characteristics
            .iter()
            .position(|c| c.uuid == *uuid)
    }

    fn characteristic(&self, service_idx: usize, char_idx: usize) -> Result<&Characteristic, Error> {
        self.services
            .get(service_idx)
            .and_then(|s| s.characteristics.get(char_idx))
            .ok_or_else(|| {
                Error::Misuse(format!(
                    "no characteristic at service {} index {}",
                    service_idx, char_idx
                ))
            })
    }

    // --- Phase entry ---

    /// Starts primary-service discovery over the whole handle space.
    pub fn read_primary_services(&mut self) -> Result<(), Error> {
        self.enter_phase(State::ReadingPrimaryServices)
    }

    /// Starts characteristic-declaration discovery over the whole handle
    /// space. Declarations attach to the services found earlier.
    pub fn find_all_characteristics(&mut self) -> Result<(), Error> {
        self.enter_phase(State::FindingCharacteristics)
    }

    /// Starts discovery of Client Characteristic Configuration descriptors.
    /// Each one found attaches to the characteristic owning its handle.
    pub fn get_client_characteristic_configuration(&mut self) -> Result<(), Error> {
        self.enter_phase(State::ReadingClientConfig)
    }

    fn enter_phase(&mut self, state: State) -> Result<(), Error> {
        if self.state != State::Idle {
            return Err(Error::InvalidState);
        }
        debug!("entering {:?}", state);
        self.state = state;
        self.next_handle = u32::from(ATT_HANDLE_MIN);
        self.send_next_page()
    }

    /// Writes the Client Characteristic Configuration of one characteristic,
    /// enabling or disabling notifications and indications.
    ///
    /// The characteristic must advertise every mode requested and must have a
    /// configuration descriptor; violations are rejected before any byte is
    /// sent. The written value is cached optimistically; if the peer rejects
    /// the write the cache is stale and the caller may retry.
    pub fn enable_notify_indicate(
        &mut self,
        service_idx: usize,
        char_idx: usize,
        notify: bool,
        indicate: bool,
    ) -> Result<(), Error> {
        if self.state != State::Idle {
            return Err(Error::InvalidState);
        }

        let chr = self.characteristic(service_idx, char_idx)?;
        if notify && !chr.props.can_notify() {
            return Err(Error::Misuse(format!(
                "characteristic {} does not advertise notify",
                chr.uuid
            )));
        }
        if indicate && !chr.props.can_indicate() {
            return Err(Error::Misuse(format!(
                "characteristic {} does not advertise indicate",
                chr.uuid
            )));
        }
        if chr.ccc_handle == 0 {
            return Err(Error::Misuse(format!(
                "characteristic {} has no client configuration descriptor",
                chr.uuid
            )));
        }
        let ccc_handle = chr.ccc_handle;

        let mut value = 0u16;
        if notify {
            value |= CCC_NOTIFY;
        }
        if indicate {
            value |= CCC_INDICATE;
        }

        self.services[service_idx].characteristics[char_idx].ccc_last_known_value = value;
        self.state = State::AwaitingWriteResponse;
        self.last_request = Some(ATT_WRITE_REQ);
        self.transport
            .send(&pdu::write_req(ccc_handle, &value.to_le_bytes()))
    }

    // --- The receive path ---

    /// Receives exactly one PDU and feeds it through the state machine.
    ///
    /// Blocks in the transport until a PDU arrives. Call once per readable
    /// event on the socket. Callbacks run synchronously before this returns;
    /// they must not call `pump` again on the same instance.
    pub fn pump(&mut self) -> Result<(), Error> {
        let mut buf = mem::take(&mut self.scratch);
        let result = (|| {
            let received = self.transport.recv(&mut buf)?.len();
            self.process_pdu(&buf[..received])
        })();
        self.scratch = buf;
        result
    }

    fn process_pdu(&mut self, data: &[u8]) -> Result<(), Error> {
        let opcode = *data.first().ok_or(DecodeError::Truncated {
            expected: 1,
            actual: 0,
        })?;
        trace!("processing opcode {:#04x} in {:?}", opcode, self.state);

        // Unsolicited traffic is handled inline, whatever the state.
        if opcode == ATT_HANDLE_VALUE_NTF || opcode == ATT_HANDLE_VALUE_IND {
            return self.dispatch_value_push(data);
        }

        // Everything else must belong to the outstanding request.
        if opcode == ATT_ERROR_RSP {
            let err = self.checked(pdu::ErrorResponse::parse(data))?;
            if Some(err.request_opcode()) != self.last_request {
                let msg = format!(
                    "error response names request {:#04x}, outstanding is {:?}",
                    err.request_opcode(),
                    self.last_request
                );
                return Err(self.desync(msg));
            }
        } else if self.last_request.map(|req| req + 1) != Some(opcode) {
            let msg = format!(
                "unexpected response opcode {:#04x}, outstanding is {:?}",
                opcode, self.last_request
            );
            return Err(self.desync(msg));
        }

        match self.state {
            // Unreachable: with no outstanding request the checks above
            // already rejected the PDU.
            State::Idle => Ok(()),
            State::ReadingPrimaryServices => self.on_primary_services_page(data, opcode),
            State::FindingCharacteristics => self.on_characteristics_page(data, opcode),
            State::ReadingClientConfig => self.on_client_config_page(data, opcode),
            State::AwaitingWriteResponse => self.on_write_outcome(data, opcode),
        }
    }

    /// Routes a notification or indication to its characteristic's callback
    /// and confirms indications. Leaves the discovery context untouched.
    fn dispatch_value_push(&mut self, data: &[u8]) -> Result<(), Error> {
        let push = self.checked(pdu::ValuePush::parse(data))?;
        let handle = push.handle();

        let mut target = None;
        'scan: for (si, service) in self.services.iter().enumerate() {
            if !service.owns_handle(handle) {
                continue;
            }
            for (ci, chr) in service.characteristics.iter().enumerate() {
                if chr.value_handle == handle {
                    target = Some((si, ci));
                    break 'scan;
                }
            }
        }

        match target {
            Some((si, ci)) => {
                let chr = &self.services[si].characteristics[ci];
                if let Some(callback) = self.value_callbacks.get_mut(&handle) {
                    callback(push.value());
                } else if let Some(callback) = self.cb_value.as_mut() {
                    callback(chr, push.value());
                }
            }
            None => {
                warn!(
                    "pushed value for handle {:#06x} matches no discovered characteristic",
                    handle
                );
            }
        }

        // Indications are confirmed after the callback has run.
        if !push.is_notification() {
            self.transport.send(&pdu::handle_value_confirmation())?;
        }
        Ok(())
    }

    fn on_primary_services_page(&mut self, data: &[u8], opcode: u8) -> Result<(), Error> {
        if opcode == ATT_ERROR_RSP {
            return self.on_phase_error(data, Self::fire_services_read);
        }

        let group = self.checked(pdu::ReadByGroupResponse::parse(data))?;
        for i in 0..group.num_elements() {
            let service = PrimaryService {
                start_handle: group.start_handle(i),
                end_handle: group.end_handle(i),
                uuid: group.uuid(i),
                characteristics: Vec::new(),
            };
            debug!(
                "service {:#06x}..={:#06x} {}",
                service.start_handle, service.end_handle, service.uuid
            );
            self.services.push(service);
        }

        // The response is non-empty, so a last element exists.
        let last_end = group.end_handle(group.num_elements() - 1);
        if last_end == ATT_HANDLE_MAX {
            self.reset();
            self.fire_services_read();
            Ok(())
        } else {
            self.next_handle = u32::from(last_end) + 1;
            self.send_next_page()
        }
    }

    fn on_characteristics_page(&mut self, data: &[u8], opcode: u8) -> Result<(), Error> {
        if opcode == ATT_ERROR_RSP {
            return self.on_phase_error(data, Self::fire_characteristics_found);
        }

        let response = self.checked(pdu::ReadByTypeResponse::parse(data))?;
        let decls = self.checked(pdu::CharacteristicDeclarations::from_response(response))?;

        for i in 0..decls.num_elements() {
            let decl_handle = decls.handle(i);
            let Some(si) = self
                .services
                .iter()
                .position(|s| s.owns_handle(decl_handle))
            else {
                let msg = format!(
                    "characteristic declaration at {:#06x} lies in no known service",
                    decl_handle
                );
                return Err(self.desync(msg));
            };

            let service = &mut self.services[si];
            let chr = Characteristic {
                uuid: decls.uuid(i),
                props: CharacteristicProps(decls.flags(i)),
                value_handle: decls.value_handle(i),
                first_handle: decl_handle,
                // Provisionally runs to the end of the service; pulled back
                // when the next declaration lands.
                last_handle: service.end_handle,
                ccc_handle: 0,
                ccc_last_known_value: 0,
            };
            debug!(
                "characteristic {} at {:#06x}, value handle {:#06x} [{}]",
                chr.uuid, decl_handle, chr.value_handle, chr.props
            );
            if let Some(previous) = service.characteristics.last_mut() {
                previous.last_handle = decl_handle - 1;
            }
            service.characteristics.push(chr);

            self.next_handle = u32::from(decl_handle) + 1;
        }

        self.continue_or_finish(Self::fire_characteristics_found)
    }

    fn on_client_config_page(&mut self, data: &[u8], opcode: u8) -> Result<(), Error> {
        if opcode == ATT_ERROR_RSP {
            return self.on_phase_error(data, Self::fire_ccc_read);
        }

        let response = self.checked(pdu::ReadByTypeResponse::parse(data))?;
        let configs = self.checked(pdu::CccValues::from_response(response))?;

        for i in 0..configs.num_elements() {
            let handle = configs.handle(i);
            let value = configs.ccc(i);
            self.next_handle = u32::from(handle) + 1;

            let mut attached = false;
            for service in &mut self.services {
                if !service.owns_handle(handle) {
                    continue;
                }
                for chr in &mut service.characteristics {
                    if chr.owns_handle(handle) {
                        debug!(
                            "configuration descriptor {:#06x} = {:#06x} on {}",
                            handle, value, chr.uuid
                        );
                        chr.ccc_handle = handle;
                        chr.ccc_last_known_value = value;
                        attached = true;
                    }
                }
            }
            if !attached {
                warn!(
                    "configuration descriptor {:#06x} lies in no known characteristic",
                    handle
                );
            }
        }

        self.continue_or_finish(Self::fire_ccc_read)
    }

    fn on_write_outcome(&mut self, data: &[u8], opcode: u8) -> Result<(), Error> {
        if opcode == ATT_ERROR_RSP {
            let err = self.checked(pdu::ErrorResponse::parse(data))?;
            let (code, handle) = (err.error_code(), err.handle());
            self.reset();
            return Err(Error::Peer { code, handle });
        }
        self.reset();
        self.fire_write_response();
        Ok(())
    }

    /// Terminator-or-failure handling shared by the discovery phases: the
    /// peer ends pagination with an attribute-not-found error; anything else
    /// is a real failure.
    fn on_phase_error(
        &mut self,
        data: &[u8],
        complete: fn(&mut Self),
    ) -> Result<(), Error> {
        let err = self.checked(pdu::ErrorResponse::parse(data))?;
        if err.error_code() == AttErrorCode::AttributeNotFound {
            self.reset();
            complete(self);
            return Ok(());
        }
        let (code, handle) = (err.error_code(), err.handle());
        self.reset();
        Err(Error::Peer { code, handle })
    }

    /// After a page has been absorbed: request the next page, unless the
    /// next start handle has run off the end of the handle space, which
    /// completes the phase just like an explicit terminator.
    fn continue_or_finish(&mut self, complete: fn(&mut Self)) -> Result<(), Error> {
        if self.next_handle > u32::from(ATT_HANDLE_MAX) {
            self.reset();
            complete(self);
            Ok(())
        } else {
            self.send_next_page()
        }
    }

    /// Emits the paginated request for the current phase, starting at
    /// `next_handle`.
    fn send_next_page(&mut self) -> Result<(), Error> {
        let start = self.next_handle as u16;
        let pdu = match self.state {
            State::ReadingPrimaryServices => {
                self.last_request = Some(ATT_READ_BY_GROUP_TYPE_REQ);
                pdu::read_by_group_req(
                    start,
                    ATT_HANDLE_MAX,
                    &Uuid::from_u16(PRIMARY_SERVICE_UUID),
                )
            }
            State::FindingCharacteristics => {
                self.last_request = Some(ATT_READ_BY_TYPE_REQ);
                pdu::read_by_type_req(start, ATT_HANDLE_MAX, &Uuid::from_u16(CHARACTERISTIC_UUID))
            }
            State::ReadingClientConfig => {
                self.last_request = Some(ATT_READ_BY_TYPE_REQ);
                pdu::read_by_type_req(
                    start,
                    ATT_HANDLE_MAX,
                    &Uuid::from_u16(CLIENT_CHAR_CONFIG_UUID),
                )
            }
            State::Idle | State::AwaitingWriteResponse => return Ok(()),
        };
        trace!("requesting next page from {:#06x}", start);
        self.transport.send(&pdu)
    }

    /// Resets the machine and builds the desync error.
    fn desync(&mut self, msg: String) -> Error {
        warn!("{}", msg);
        self.reset();
        Error::Desync(msg)
    }

    /// Lifts a codec result into the session, resetting on decode failure.
    fn checked<V>(&mut self, result: Result<V, DecodeError>) -> Result<V, Error> {
        result.map_err(|e| {
            self.reset();
            e.into()
        })
    }

    // Completion callbacks are taken out for the duration of the call so
    // they can be handed the machine itself; a callback that installed a
    // replacement wins over the one being restored.

    fn fire_services_read(&mut self) {
        if let Some(mut callback) = self.cb_services_read.take() {
            callback(self);
            if self.cb_services_read.is_none() {
                self.cb_services_read = Some(callback);
            }
        }
    }

    fn fire_characteristics_found(&mut self) {
        if let Some(mut callback) = self.cb_characteristics_found.take() {
            callback(self);
            if self.cb_characteristics_found.is_none() {
                self.cb_characteristics_found = Some(callback);
            }
        }
    }

    fn fire_ccc_read(&mut self) {
        if let Some(mut callback) = self.cb_ccc_read.take() {
            callback(self);
            if self.cb_ccc_read.is_none() {
                self.cb_ccc_read = Some(callback);
            }
        }
    }

    fn fire_write_response(&mut self) {
        if let Some(mut callback) = self.cb_write_response.take() {
            callback(self);
            if self.cb_write_response.is_none() {
                self.cb_write_response = Some(callback);
            }
        }
    }
}
