//! Unit tests for the GATT discovery state machine
//!
//! A mock transport feeds literal peer byte traces through `pump` and records
//! every PDU the machine emits, so the exchanges are checked bit-exactly
//! without a socket.

use crate::att::constants::*;
use crate::att::pdu::RangeRequest;
use crate::error::Error;
use crate::gatt::client::{GattClient, State};
use crate::transport::AttTransport;
use crate::uuid::Uuid;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

/// Queues inbound PDUs for `recv` and records everything sent.
#[derive(Clone, Default)]
struct MockTransport {
    inbound: Rc<RefCell<VecDeque<Vec<u8>>>>,
    outbound: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl MockTransport {
    fn new() -> Self {
        Self::default()
    }

    fn queue(&self, pdu: Vec<u8>) {
        self.inbound.borrow_mut().push_back(pdu);
    }

    fn sent_count(&self) -> usize {
        self.outbound.borrow().len()
    }

    fn sent(&self, i: usize) -> Vec<u8> {
        self.outbound.borrow()[i].clone()
    }

    fn last_sent(&self) -> Vec<u8> {
        self.outbound.borrow().last().expect("nothing sent").clone()
    }
}

impl AttTransport for MockTransport {
    fn send(&mut self, pdu: &[u8]) -> Result<(), Error> {
        self.outbound.borrow_mut().push(pdu.to_vec());
        Ok(())
    }

    fn recv<'a>(&mut self, buf: &'a mut [u8]) -> Result<&'a [u8], Error> {
        let pdu = self.inbound.borrow_mut().pop_front().ok_or_else(|| {
            Error::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no queued PDUs left",
            ))
        })?;
        buf[..pdu.len()].copy_from_slice(&pdu);
        Ok(&buf[..pdu.len()])
    }
}

// --- Peer byte-trace builders ---

fn group_resp(services: &[(u16, u16, u16)]) -> Vec<u8> {
    let mut frame = vec![ATT_READ_BY_GROUP_TYPE_RSP, 6];
    for (start, end, uuid16) in services {
        frame.extend_from_slice(&start.to_le_bytes());
        frame.extend_from_slice(&end.to_le_bytes());
        frame.extend_from_slice(&uuid16.to_le_bytes());
    }
    frame
}

/// Declarations as `(declaration handle, flags, value handle, uuid16)`.
fn decl_resp(decls: &[(u16, u8, u16, u16)]) -> Vec<u8> {
    let mut frame = vec![ATT_READ_BY_TYPE_RSP, 7];
    for (handle, flags, value_handle, uuid16) in decls {
        frame.extend_from_slice(&handle.to_le_bytes());
        frame.push(*flags);
        frame.extend_from_slice(&value_handle.to_le_bytes());
        frame.extend_from_slice(&uuid16.to_le_bytes());
    }
    frame
}

fn ccc_resp(configs: &[(u16, u16)]) -> Vec<u8> {
    let mut frame = vec![ATT_READ_BY_TYPE_RSP, 4];
    for (handle, value) in configs {
        frame.extend_from_slice(&handle.to_le_bytes());
        frame.extend_from_slice(&value.to_le_bytes());
    }
    frame
}

fn error_resp(request_opcode: u8, handle: u16, code: u8) -> Vec<u8> {
    let mut frame = vec![ATT_ERROR_RSP, request_opcode];
    frame.extend_from_slice(&handle.to_le_bytes());
    frame.push(code);
    frame
}

fn attr_not_found(request_opcode: u8) -> Vec<u8> {
    error_resp(request_opcode, 0, ATT_ERROR_ATTRIBUTE_NOT_FOUND)
}

fn push_pdu(opcode: u8, handle: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![opcode];
    frame.extend_from_slice(&handle.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Runs the three phases against a thermometer-shaped peer:
/// one service 0x1809 spanning the whole handle space, a notify-capable
/// characteristic (value 0x0003, CCC 0x0004) and an indicate-capable
/// measurement characteristic (value 0x0010, CCC 0x0011).
fn discovered_client() -> (GattClient<MockTransport>, MockTransport) {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());

    client.read_primary_services().unwrap();
    transport.queue(group_resp(&[(0x0001, 0xFFFF, 0x1809)]));
    client.pump().unwrap();

    client.find_all_characteristics().unwrap();
    transport.queue(decl_resp(&[
        (0x0002, 0x12, 0x0003, 0x2A05),
        (0x000E, 0x22, 0x0010, 0x2A1C),
    ]));
    client.pump().unwrap();
    transport.queue(attr_not_found(ATT_READ_BY_TYPE_REQ));
    client.pump().unwrap();

    client.get_client_characteristic_configuration().unwrap();
    transport.queue(ccc_resp(&[(0x0004, 0x0000), (0x0011, 0x0000)]));
    client.pump().unwrap();
    transport.queue(attr_not_found(ATT_READ_BY_TYPE_REQ));
    client.pump().unwrap();

    assert_eq!(client.state(), State::Idle);
    (client, transport)
}

#[test]
fn single_service_with_terminal_end_handle() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());
    let completed = Rc::new(Cell::new(0u32));
    let seen = completed.clone();
    client.set_services_read_callback(move |_| seen.set(seen.get() + 1));

    client.read_primary_services().unwrap();
    assert_eq!(
        transport.sent(0),
        vec![0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28]
    );

    transport.queue(group_resp(&[(0x0001, 0xFFFF, 0x1800)]));
    client.pump().unwrap();

    assert_eq!(completed.get(), 1);
    assert_eq!(client.state(), State::Idle);
    assert_eq!(client.outstanding_request(), None);
    // The terminal end handle completes the phase without another request
    assert_eq!(transport.sent_count(), 1);

    let services = client.services();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].start_handle, 0x0001);
    assert_eq!(services[0].end_handle, 0xFFFF);
    assert_eq!(services[0].uuid, Uuid::from_u16(0x1800));
}

#[test]
fn pagination_advances_past_the_last_group_end() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());
    let completed = Rc::new(Cell::new(0u32));
    let seen = completed.clone();
    client.set_services_read_callback(move |_| seen.set(seen.get() + 1));

    client.read_primary_services().unwrap();
    transport.queue(group_resp(&[(0x0001, 0x000B, 0x1800)]));
    client.pump().unwrap();

    // The next page starts one past the received group end
    let page2 = transport.last_sent();
    let request = RangeRequest::parse_read_by_group(&page2).unwrap();
    assert_eq!(request.start_handle(), 0x000C);
    assert_eq!(request.end_handle(), 0xFFFF);
    assert_eq!(request.attribute_type(), Uuid::from_u16(0x2800));
    assert_eq!(completed.get(), 0);

    transport.queue(attr_not_found(ATT_READ_BY_GROUP_TYPE_REQ));
    client.pump().unwrap();

    assert_eq!(completed.get(), 1);
    assert_eq!(client.services().len(), 1);
    assert_eq!(client.state(), State::Idle);
}

#[test]
fn mixed_width_declaration_frame_is_a_decode_error() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());

    client.read_primary_services().unwrap();
    transport.queue(group_resp(&[(0x0001, 0xFFFF, 0x1809)]));
    client.pump().unwrap();

    client.find_all_characteristics().unwrap();
    // One frame cannot mix 16-bit and 128-bit declarations: the leftover
    // bytes of the second element make the payload ragged.
    let mut frame = vec![ATT_READ_BY_TYPE_RSP, 21];
    frame.extend_from_slice(&0x0021u16.to_le_bytes());
    frame.push(0x02);
    frame.extend_from_slice(&0x0022u16.to_le_bytes());
    frame.extend_from_slice(&[0xCC; 16]);
    frame.extend_from_slice(&[0x03, 0x00, 0x02, 0x04, 0x00, 0x00, 0x2A]);
    transport.queue(frame);

    let err = client.pump().unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert_eq!(client.state(), State::Idle);
    assert_eq!(client.outstanding_request(), None);
    assert!(client.services()[0].characteristics.is_empty());
}

#[test]
fn notification_dispatched_without_disturbing_discovery() {
    let (mut client, transport) = discovered_client();

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = received.clone();
    client
        .bind_value_callback(0, 1, move |value| sink.borrow_mut().push(value.to_vec()))
        .unwrap();

    // Re-read the descriptors; a notification arrives before the response
    client.get_client_characteristic_configuration().unwrap();
    let requests_before = transport.sent_count();

    transport.queue(push_pdu(ATT_HANDLE_VALUE_NTF, 0x0010, &[0x2A, 0x01]));
    client.pump().unwrap();

    assert_eq!(*received.borrow(), vec![vec![0x2A, 0x01]]);
    assert_eq!(client.state(), State::ReadingClientConfig);
    assert_eq!(client.outstanding_request(), Some(ATT_READ_BY_TYPE_REQ));
    // A notification needs no confirmation and triggers no request
    assert_eq!(transport.sent_count(), requests_before);

    // The expected response is then processed normally
    transport.queue(ccc_resp(&[(0x0011, 0x0002)]));
    client.pump().unwrap();
    transport.queue(attr_not_found(ATT_READ_BY_TYPE_REQ));
    client.pump().unwrap();

    assert_eq!(client.state(), State::Idle);
    assert_eq!(
        client.services()[0].characteristics[1].ccc_last_known_value,
        0x0002
    );
    assert_eq!(received.borrow().len(), 1);
}

#[test]
fn indication_confirmed_after_the_callback_returns() {
    let (mut client, transport) = discovered_client();

    let calls = Rc::new(Cell::new(0u32));
    let observed = transport.clone();
    let counter = calls.clone();
    client
        .bind_value_callback(0, 1, move |value| {
            assert_eq!(value, &[0x00]);
            // The confirmation must not precede the callback
            assert!(!observed
                .outbound
                .borrow()
                .iter()
                .any(|pdu| pdu == &[ATT_HANDLE_VALUE_CONF]));
            counter.set(counter.get() + 1);
        })
        .unwrap();

    transport.queue(push_pdu(ATT_HANDLE_VALUE_IND, 0x0010, &[0x00]));
    client.pump().unwrap();

    assert_eq!(calls.get(), 1);
    assert_eq!(transport.last_sent(), vec![ATT_HANDLE_VALUE_CONF]);
    assert_eq!(client.state(), State::Idle);
}

#[test]
fn fallback_callback_receives_unbound_characteristics() {
    let (mut client, transport) = discovered_client();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    client.set_value_callback(move |chr, value| {
        sink.borrow_mut().push((chr.uuid, value.to_vec()));
    });

    transport.queue(push_pdu(ATT_HANDLE_VALUE_NTF, 0x0003, &[0x07]));
    client.pump().unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![(Uuid::from_u16(0x2A05), vec![0x07])]
    );
}

#[test]
fn subscribe_writes_the_configuration_and_reports_completion() {
    let (mut client, transport) = discovered_client();
    let completed = Rc::new(Cell::new(0u32));
    let seen = completed.clone();
    client.set_write_response_callback(move |_| seen.set(seen.get() + 1));

    client.enable_notify_indicate(0, 1, false, true).unwrap();
    assert_eq!(
        transport.last_sent(),
        vec![ATT_WRITE_REQ, 0x11, 0x00, 0x02, 0x00]
    );
    assert_eq!(client.state(), State::AwaitingWriteResponse);
    // The written value is cached before the acknowledgement
    assert_eq!(
        client.services()[0].characteristics[1].ccc_last_known_value,
        0x0002
    );

    transport.queue(vec![ATT_WRITE_RSP]);
    client.pump().unwrap();

    assert_eq!(completed.get(), 1);
    assert_eq!(client.state(), State::Idle);
    assert_eq!(client.outstanding_request(), None);
}

#[test]
fn subscribe_rejects_requests_the_peer_cannot_serve() {
    let (mut client, transport) = discovered_client();
    let sent_before = transport.sent_count();

    // The measurement characteristic only indicates
    let err = client.enable_notify_indicate(0, 1, true, false).unwrap_err();
    assert!(matches!(err, Error::Misuse(_)));

    // The status characteristic only notifies
    let err = client.enable_notify_indicate(0, 0, false, true).unwrap_err();
    assert!(matches!(err, Error::Misuse(_)));

    // Out-of-range addressing is caught too
    let err = client.enable_notify_indicate(3, 0, true, false).unwrap_err();
    assert!(matches!(err, Error::Misuse(_)));

    // Nothing was transmitted and the machine stayed idle
    assert_eq!(transport.sent_count(), sent_before);
    assert_eq!(client.state(), State::Idle);
}

#[test]
fn subscribe_requires_a_configuration_descriptor() {
    // Discover a characteristic but never read its descriptors
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());
    client.read_primary_services().unwrap();
    transport.queue(group_resp(&[(0x0001, 0xFFFF, 0x180D)]));
    client.pump().unwrap();
    client.find_all_characteristics().unwrap();
    transport.queue(decl_resp(&[(0x0002, 0x10, 0x0003, 0x2A37)]));
    client.pump().unwrap();
    transport.queue(attr_not_found(ATT_READ_BY_TYPE_REQ));
    client.pump().unwrap();

    let sent_before = transport.sent_count();
    let err = client.enable_notify_indicate(0, 0, true, false).unwrap_err();
    assert!(matches!(err, Error::Misuse(_)));
    assert_eq!(transport.sent_count(), sent_before);
}

#[test]
fn rejected_write_surfaces_the_peer_error() {
    let (mut client, transport) = discovered_client();

    client.enable_notify_indicate(0, 1, false, true).unwrap();
    transport.queue(error_resp(
        ATT_WRITE_REQ,
        0x0011,
        ATT_ERROR_WRITE_NOT_PERMITTED,
    ));

    let err = client.pump().unwrap_err();
    assert!(matches!(err, Error::Peer { handle: 0x0011, .. }));
    assert_eq!(client.state(), State::Idle);
    // The optimistic cache is now stale until a retry succeeds
    assert_eq!(
        client.services()[0].characteristics[1].ccc_last_known_value,
        0x0002
    );
}

#[test]
fn phase_entry_is_rejected_while_a_request_is_outstanding() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());

    client.read_primary_services().unwrap();
    assert!(matches!(
        client.read_primary_services(),
        Err(Error::InvalidState)
    ));
    assert!(matches!(
        client.find_all_characteristics(),
        Err(Error::InvalidState)
    ));
    assert!(matches!(
        client.get_client_characteristic_configuration(),
        Err(Error::InvalidState)
    ));

    // The outstanding exchange is untouched
    assert_eq!(transport.sent_count(), 1);
    assert_eq!(
        client.outstanding_request(),
        Some(ATT_READ_BY_GROUP_TYPE_REQ)
    );
}

#[test]
fn unexpected_response_opcode_is_a_desync() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());

    client.read_primary_services().unwrap();
    // A read response does not answer a read-by-group request
    transport.queue(vec![0x0B, 0x42]);
    let err = client.pump().unwrap_err();
    assert!(matches!(err, Error::Desync(_)));
    assert_eq!(client.state(), State::Idle);
    assert_eq!(client.outstanding_request(), None);
}

#[test]
fn error_response_for_a_different_request_is_a_desync() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());

    client.read_primary_services().unwrap();
    // Terminator code, but blamed on a request that is not outstanding
    transport.queue(attr_not_found(ATT_READ_BY_TYPE_REQ));
    let err = client.pump().unwrap_err();
    assert!(matches!(err, Error::Desync(_)));
    assert_eq!(client.state(), State::Idle);
}

#[test]
fn peer_error_keeps_earlier_results() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());

    client.read_primary_services().unwrap();
    transport.queue(group_resp(&[(0x0001, 0xFFFF, 0x180D)]));
    client.pump().unwrap();

    client.find_all_characteristics().unwrap();
    transport.queue(error_resp(
        ATT_READ_BY_TYPE_REQ,
        0x0002,
        ATT_ERROR_READ_NOT_PERMITTED,
    ));
    let err = client.pump().unwrap_err();
    assert!(matches!(err, Error::Peer { handle: 0x0002, .. }));

    // The service table survives the failure
    assert_eq!(client.services().len(), 1);
    assert_eq!(client.state(), State::Idle);
}

#[test]
fn declaration_outside_every_service_is_a_desync() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());

    client.read_primary_services().unwrap();
    transport.queue(group_resp(&[(0x0001, 0x000B, 0x1800)]));
    client.pump().unwrap();
    transport.queue(attr_not_found(ATT_READ_BY_GROUP_TYPE_REQ));
    client.pump().unwrap();

    client.find_all_characteristics().unwrap();
    transport.queue(decl_resp(&[(0x000E, 0x02, 0x000F, 0x2A00)]));
    let err = client.pump().unwrap_err();
    assert!(matches!(err, Error::Desync(_)));
    assert_eq!(client.state(), State::Idle);
}

#[test]
fn characteristic_ranges_nest_inside_their_services() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());

    client.read_primary_services().unwrap();
    transport.queue(group_resp(&[
        (0x0001, 0x000B, 0x180D),
        (0x000C, 0xFFFF, 0x1809),
    ]));
    client.pump().unwrap();

    client.find_all_characteristics().unwrap();
    transport.queue(decl_resp(&[
        (0x0002, 0x12, 0x0003, 0x2A37),
        (0x0004, 0x02, 0x0005, 0x2A38),
    ]));
    client.pump().unwrap();
    transport.queue(decl_resp(&[(0x000E, 0x22, 0x0010, 0x2A1C)]));
    client.pump().unwrap();
    transport.queue(attr_not_found(ATT_READ_BY_TYPE_REQ));
    client.pump().unwrap();

    let services = client.services();
    let heart_rate = &services[0];
    assert_eq!(heart_rate.characteristics.len(), 2);
    // The earlier characteristic ends just before the next declaration
    assert_eq!(heart_rate.characteristics[0].first_handle, 0x0002);
    assert_eq!(heart_rate.characteristics[0].last_handle, 0x0003);
    // The final one runs to the end of its service
    assert_eq!(heart_rate.characteristics[1].first_handle, 0x0004);
    assert_eq!(heart_rate.characteristics[1].last_handle, 0x000B);

    let thermometer = &services[1];
    assert_eq!(thermometer.characteristics.len(), 1);
    assert_eq!(thermometer.characteristics[0].last_handle, 0xFFFF);

    // Every characteristic nests in its service and owns its value handle
    let mut value_handles = Vec::new();
    for service in services {
        for chr in &service.characteristics {
            assert!(service.start_handle < chr.first_handle);
            assert!(chr.first_handle <= chr.last_handle);
            assert!(chr.last_handle <= service.end_handle);
            assert!(chr.first_handle <= chr.value_handle);
            assert!(chr.value_handle <= chr.last_handle);
            value_handles.push(chr.value_handle);
        }
    }
    value_handles.sort_unstable();
    value_handles.dedup();
    assert_eq!(value_handles.len(), 3);
}

#[test]
fn descriptor_page_at_the_top_of_the_handle_space_terminates() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());
    let completed = Rc::new(Cell::new(0u32));
    let seen = completed.clone();
    client.set_ccc_read_callback(move |_| seen.set(seen.get() + 1));

    client.read_primary_services().unwrap();
    transport.queue(group_resp(&[(0x0001, 0xFFFF, 0x1809)]));
    client.pump().unwrap();
    client.find_all_characteristics().unwrap();
    transport.queue(decl_resp(&[(0x0002, 0x22, 0x0003, 0x2A1C)]));
    client.pump().unwrap();
    transport.queue(attr_not_found(ATT_READ_BY_TYPE_REQ));
    client.pump().unwrap();

    client.get_client_characteristic_configuration().unwrap();
    let requests_before = transport.sent_count();
    transport.queue(ccc_resp(&[(0xFFFF, 0x0001)]));
    client.pump().unwrap();

    // The next page would start past 0xFFFF; the phase completes with no
    // further request even though no terminator error followed.
    assert_eq!(transport.sent_count(), requests_before);
    assert_eq!(completed.get(), 1);
    assert_eq!(client.state(), State::Idle);
    assert_eq!(client.services()[0].characteristics[0].ccc_handle, 0xFFFF);
    assert_eq!(
        client.services()[0].characteristics[0].ccc_last_known_value,
        0x0001
    );
}

#[test]
fn completion_callback_may_start_the_next_phase() {
    let transport = MockTransport::new();
    let mut client = GattClient::new(transport.clone());
    client.set_services_read_callback(|c| {
        c.find_all_characteristics().unwrap();
    });

    client.read_primary_services().unwrap();
    transport.queue(group_resp(&[(0x0001, 0xFFFF, 0x1800)]));
    client.pump().unwrap();

    // The callback ran with the machine idle and chained straight into
    // characteristic discovery.
    assert_eq!(client.state(), State::FindingCharacteristics);
    let last_sent = transport.last_sent();
    let request = RangeRequest::parse_read_by_type(&last_sent).unwrap();
    assert_eq!(request.start_handle(), 0x0001);
    assert_eq!(request.attribute_type(), Uuid::from_u16(0x2803));
}
