//! IEC 60870-5-104 controlling-station (master) engine.
//!
//! Single-threaded and callback-driven: the host owns the socket and the
//! clock, and feeds the engine through `on_connect_tcp`, `on_disconnect_tcp`,
//! `on_timer_second` and `on_packet_ready`. The engine runs the APCI link
//! state machine, keeps the shifted VS/VR sequence counters, drives the four
//! protocol timers, decodes inbound ASDUs into unified records, and builds
//! outbound command frames. Upcalls are delivered as [`MasterEvent`] values
//! on the channel returned by [`Iec104Master::subscribe`].

use bytes::{BufMut, BytesMut};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, warn};

use crate::codec::{Apdu, Iec104Codec};
use crate::transport::Transport;
use crate::types::{
    Asdu, AsduHeader, CommandObject, Cot, Cp56Time2a, DataPoint, InformationObject, Ioa, TypeId,
    UFunction,
};
use crate::{builder, parser};

/// Default IEC 104 port.
pub const DEFAULT_PORT: u16 = 2404;

/// Default t1: seconds to wait for STARTDT confirmation before resending.
pub const DEFAULT_T1_STARTDT: i32 = 30;

/// Default t2: seconds before acknowledging received I-frames with an S-frame.
pub const DEFAULT_T2_SUPERVISORY: i32 = 10;

/// Default t3: idle seconds before probing the link with TESTFR-act.
pub const DEFAULT_T3_TESTFR: i32 = 20;

/// Default general-interrogation period in seconds.
pub const DEFAULT_GI_PERIOD: i32 = 330;

/// Default GI retry period, armed while a GI cycle is outstanding.
pub const DEFAULT_GI_RETRY_PERIOD: i32 = 45;

/// Seconds between entering data transfer and the first GI.
const GI_STARTUP_DELAY: i32 = 15;

/// Reconnection is attempted every this many ticks while disconnected.
const RECONNECT_TICKS: u32 = 5;

/// Bounded wait for the body of a partially received frame.
const FRAME_WAIT_MS: u64 = 500;

/// Qualifier of interrogation for a station (global) interrogation; group G
/// uses `QOI_STATION + G`.
const QOI_STATION: u8 = 0x14;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Primary peer address
    pub primary_host: String,
    /// Backup peer address; empty disables alternation
    pub backup_host: String,
    /// TCP port (default 2404)
    pub port: u16,
    /// Originator address of this master
    pub originator: u8,
    /// Common ASDU address of the slave
    pub common_address: u16,
    /// t1: STARTDT confirmation timeout, seconds
    pub t1_startdt: i32,
    /// t2: supervisory acknowledgement delay, seconds
    pub t2_supervisory: i32,
    /// t3: test-frame probe idle timeout, seconds
    pub t3_testfr: i32,
    /// Period between general interrogations, seconds
    pub gi_period: i32,
    /// GI retry period while a cycle is outstanding, seconds
    pub gi_retry_period: i32,
    /// Close the connection on a receive-sequence mismatch
    pub seq_order_check: bool,
    /// Accept an initial I-frame carrying send number 1, a tolerance for
    /// non-conformant slaves that start transmitting before our first frame
    pub allow_initial_tx_one: bool,
    /// Acknowledge via delayed S-frames (t2); when false every received
    /// I-frame is acknowledged immediately
    pub supervisory: bool,
}

impl MasterConfig {
    /// Configuration for the given primary peer, all defaults otherwise.
    pub fn new(primary_host: impl Into<String>) -> Self {
        Self {
            primary_host: primary_host.into(),
            ..Default::default()
        }
    }
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            primary_host: String::new(),
            backup_host: String::new(),
            port: DEFAULT_PORT,
            originator: 0,
            common_address: 0,
            t1_startdt: DEFAULT_T1_STARTDT,
            t2_supervisory: DEFAULT_T2_SUPERVISORY,
            t3_testfr: DEFAULT_T3_TESTFR,
            gi_period: DEFAULT_GI_PERIOD,
            gi_retry_period: DEFAULT_GI_RETRY_PERIOD,
            seq_order_check: true,
            allow_initial_tx_one: true,
            supervisory: true,
        }
    }
}

/// Upcalls delivered to the host.
#[derive(Debug, Clone)]
pub enum MasterEvent {
    /// TCP session established; STARTDT-act has been sent
    Connected,
    /// STARTDT confirmed, I-frames may flow
    DataTransferStarted,
    /// TCP session lost
    Disconnected,
    /// Monitoring values decoded from one ASDU
    DataIndication(Vec<DataPoint>),
    /// Command ACT-CON / ACT-TERM echo
    CommandResponse(CommandObject),
    /// Interrogation activation confirmed; object counting restarted
    InterrogationConfirmed,
    /// Interrogation terminated with the number of objects received
    InterrogationTerminated {
        /// Objects counted between ACT-CON and ACT-TERM
        objects: u32,
    },
}

/// IEC 60870-5-104 master engine.
pub struct Iec104Master<T: Transport> {
    config: MasterConfig,
    transport: T,
    codec: Iec104Codec,
    rx_buf: BytesMut,

    connected: bool,
    tx_ok: bool,
    allow_connect: bool,
    broken_frame: bool,

    /// Send sequence number, shifted (bit 0 clear)
    vs: u16,
    /// Receive sequence number, shifted (bit 0 clear)
    vr: u16,

    tout_startdt: i32,
    tout_supervisory: i32,
    tout_testfr: i32,
    tout_gi: i32,

    gi_object_count: u32,
    test_command_count: u16,
    connect_attempts: u32,
    reconnect_ticks: u32,

    event_tx: mpsc::UnboundedSender<MasterEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<MasterEvent>>,
}

impl<T: Transport> Iec104Master<T> {
    /// Create a new engine over the given transport.
    pub fn new(config: MasterConfig, transport: T) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            codec: Iec104Codec::new(),
            rx_buf: BytesMut::new(),
            connected: false,
            tx_ok: false,
            allow_connect: true,
            broken_frame: false,
            vs: 0,
            vr: 0,
            tout_startdt: -1,
            tout_supervisory: -1,
            tout_testfr: -1,
            tout_gi: -1,
            gi_object_count: 0,
            test_command_count: 0,
            connect_attempts: 0,
            reconnect_ticks: 0,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver. Can only be taken once.
    pub fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<MasterEvent>> {
        self.event_rx.take()
    }

    // ---- configuration surface -------------------------------------------

    /// Set the originator address of this master.
    pub fn set_primary_address(&mut self, oa: u8) {
        self.config.originator = oa;
    }

    /// Get the originator address of this master.
    pub fn get_primary_address(&self) -> u8 {
        self.config.originator
    }

    /// Set the common ASDU address of the slave.
    pub fn set_secondary_address(&mut self, ca: u16) {
        self.config.common_address = ca;
    }

    /// Get the common ASDU address of the slave.
    pub fn get_secondary_address(&self) -> u16 {
        self.config.common_address
    }

    /// Set the primary peer address.
    pub fn set_secondary_ip(&mut self, ip: &str) {
        self.config.primary_host = ip.to_string();
    }

    /// Set the backup peer address; an empty string disables alternation.
    pub fn set_secondary_ip_backup(&mut self, ip: &str) {
        self.config.backup_host = ip.to_string();
    }

    /// Set the TCP port.
    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }

    /// Set the general-interrogation period in seconds.
    pub fn set_gi_period(&mut self, seconds: u32) {
        self.config.gi_period = seconds as i32;
    }

    /// Tolerate receive-sequence mismatches instead of closing the session.
    pub fn disable_sequence_order_check(&mut self) {
        self.config.seq_order_check = false;
    }

    /// Allow the session driver to reconnect.
    pub fn enable_connect(&mut self) {
        self.allow_connect = true;
    }

    /// Stop reconnecting; tears down an established session.
    pub fn disable_connect(&mut self) {
        self.allow_connect = false;
        if self.connected {
            self.transport.disconnect();
        }
    }

    // ---- introspection ---------------------------------------------------

    /// TCP session established.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// STARTDT confirmed; I-frames may be sent.
    pub fn is_data_transfer_active(&self) -> bool {
        self.tx_ok
    }

    /// Current unshifted send sequence number.
    pub fn send_seq(&self) -> u16 {
        self.vs >> 1
    }

    /// Current unshifted receive sequence number.
    pub fn recv_seq(&self) -> u16 {
        self.vr >> 1
    }

    /// Objects counted during the current interrogation cycle.
    pub fn gi_object_count(&self) -> u32 {
        self.gi_object_count
    }

    /// Access the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ---- transport event hooks -------------------------------------------

    /// The host established the TCP session.
    pub fn on_connect_tcp(&mut self) {
        self.connected = true;
        self.tx_ok = false;
        self.vs = 0;
        self.vr = 0;
        self.test_command_count = 0;
        self.gi_object_count = 0;
        self.broken_frame = false;
        self.rx_buf.clear();
        self.codec = Iec104Codec::new();
        info!("*** TCP CONNECT");
        self.emit(MasterEvent::Connected);
        self.send_startdt_act();
    }

    /// The host observed the TCP session go down.
    pub fn on_disconnect_tcp(&mut self) {
        self.connected = false;
        self.tx_ok = false;
        self.tout_startdt = -1;
        self.tout_supervisory = -1;
        self.tout_testfr = -1;
        self.tout_gi = -1;
        self.broken_frame = false;
        self.rx_buf.clear();
        self.codec = Iec104Codec::new();
        info!("*** TCP DISCONNECT");
        self.emit(MasterEvent::Disconnected);
    }

    /// One-second scheduler tick: countdown timers and reconnection.
    pub fn on_timer_second(&mut self) {
        if self.connected {
            if self.tout_startdt > 0 {
                self.tout_startdt -= 1;
            }
            if self.tout_startdt == 0 {
                // STARTDT confirmation timed out: retry
                self.send_startdt_act();
            }

            if self.tout_gi > 0 {
                self.tout_gi -= 1;
                if self.tout_gi == 0 {
                    self.solicit_gi();
                }
            }

            if self.config.supervisory {
                // t2 counts down twice per tick while armed
                if self.tout_supervisory > 0 {
                    self.tout_supervisory -= 1;
                }
                if self.tout_supervisory > 0 {
                    self.tout_supervisory -= 1;
                }
                if self.tout_supervisory == 0 {
                    self.tout_supervisory = -1;
                    self.send_s_frame();
                }
            }

            if self.tx_ok && self.tout_testfr > 0 {
                self.tout_testfr -= 1;
                if self.tout_testfr == 0 {
                    self.send_u_frame(UFunction::TestFrAct);
                    info!("TESTFRACT");
                }
            }
        } else if self.allow_connect {
            self.reconnect_ticks = self.reconnect_ticks.wrapping_add(1);
            if self.reconnect_ticks % RECONNECT_TICKS == 0 {
                self.try_connect();
            }
        }
    }

    /// The transport has bytes ready to read.
    pub fn on_packet_ready(&mut self) {
        if !self.connected {
            return;
        }

        loop {
            self.fill_rx_buffer();

            loop {
                match self.codec.decode(&mut self.rx_buf) {
                    Ok(Some(apdu)) => {
                        self.broken_frame = false;
                        if !self.handle_apdu(apdu) {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => warn!("dropping frame: {e}"),
                }
            }

            if let Some(needed) = self.codec.bytes_needed(&self.rx_buf) {
                // partially received frame: bounded wait for the rest
                self.transport.wait_bytes(needed, FRAME_WAIT_MS);
                if self.fill_rx_buffer() == 0 {
                    if self.broken_frame {
                        warn!("discarding broken frame ({} bytes buffered)", self.rx_buf.len());
                        self.rx_buf.clear();
                        self.codec = Iec104Codec::new();
                        self.broken_frame = false;
                    } else {
                        warn!("broken frame, {needed} bytes missing");
                        self.broken_frame = true;
                    }
                    return;
                }
                continue;
            }

            if self.transport.bytes_available() == 0 {
                return;
            }
        }
    }

    // ---- host requests ---------------------------------------------------

    /// Issue a station (global) general interrogation.
    pub fn solicit_gi(&mut self) {
        let asdu = Asdu::interrogation_command(
            self.config.common_address,
            self.config.originator,
            QOI_STATION,
        );
        self.send_i_frame(asdu);
        info!("GENERAL INTERROGATION");
        self.tout_gi = self.config.gi_retry_period;
    }

    /// Issue an interrogation for group 1..=16.
    pub fn solicit_interrogation(&mut self, group: u8) {
        if !(1..=16).contains(&group) {
            warn!("interrogation group {group} out of range");
            return;
        }
        let asdu = Asdu::interrogation_command(
            self.config.common_address,
            self.config.originator,
            QOI_STATION + group,
        );
        self.send_i_frame(asdu);
        info!("INTERROGATION GROUP {group}");
        self.tout_gi = self.config.gi_retry_period;
    }

    /// Send a command, set-point, system or parameter ASDU.
    ///
    /// Returns false for type identifiers the master cannot transmit; no
    /// frame is emitted and no state changes in that case.
    pub fn send_command(&mut self, obj: &CommandObject) -> bool {
        let asdu = match builder::build_command(
            obj,
            self.config.originator,
            self.config.common_address,
            self.test_command_count,
        ) {
            Some(asdu) => asdu,
            None => return false,
        };

        if asdu.header.type_id == TypeId::TestCommandTime56 {
            self.test_command_count = self.test_command_count.wrapping_add(1);
        }
        self.send_i_frame(asdu);
        true
    }

    // ---- internals -------------------------------------------------------

    fn emit(&self, event: MasterEvent) {
        let _ = self.event_tx.send(event);
    }

    fn try_connect(&mut self) {
        self.connect_attempts = self.connect_attempts.wrapping_add(1);
        // alternate primary and backup peers, backup on even attempts only
        let host = if self.connect_attempts % 2 == 1 || self.config.backup_host.is_empty() {
            self.config.primary_host.clone()
        } else {
            self.config.backup_host.clone()
        };
        info!("try to connect {}:{}", host, self.config.port);
        self.transport.connect(&host, self.config.port);
    }

    fn fill_rx_buffer(&mut self) -> usize {
        let mut total = 0;
        let mut chunk = [0u8; 512];
        loop {
            let n = self.transport.read(&mut chunk);
            if n == 0 {
                break;
            }
            self.rx_buf.extend_from_slice(&chunk[..n]);
            total += n;
            if n < chunk.len() {
                break;
            }
        }
        total
    }

    fn send_apdu(&mut self, apdu: Apdu) {
        let mut buf = BytesMut::new();
        if let Err(e) = self.codec.encode(apdu, &mut buf) {
            warn!("encode failed: {e}");
            return;
        }
        debug!("T<-- {} bytes", buf.len());
        self.transport.send(&buf);
    }

    fn send_u_frame(&mut self, function: UFunction) {
        self.send_apdu(Apdu::u_frame(function));
    }

    fn send_s_frame(&mut self) {
        self.send_apdu(Apdu::s_frame(self.vr));
        debug!("SUPERVISORY {}", self.vr >> 1);
    }

    fn send_i_frame(&mut self, asdu: Asdu) {
        self.send_apdu(Apdu::i_frame(self.vs, self.vr, asdu));
        self.vs = self.vs.wrapping_add(2);
    }

    fn send_startdt_act(&mut self) {
        self.send_u_frame(UFunction::StartDtAct);
        info!("STARTDTACT");
        self.tout_startdt = self.config.t1_startdt;
    }

    /// Returns false when the session was torn down and processing of the
    /// remaining buffered frames must stop.
    fn handle_apdu(&mut self, apdu: Apdu) -> bool {
        debug!("R--> {apdu}");
        match apdu.apci {
            crate::types::Apci::UFrame { function } => {
                self.handle_u_frame(function);
                true
            }
            crate::types::Apci::SFrame { nr } => {
                debug!("SUPERVISORY R={}", nr >> 1);
                if self.tx_ok {
                    self.tout_testfr = self.config.t3_testfr;
                }
                true
            }
            crate::types::Apci::IFrame { ns, .. } => self.handle_i_frame(ns, apdu.asdu),
        }
    }

    fn handle_u_frame(&mut self, function: UFunction) {
        match function {
            UFunction::StartDtAct => {
                // a peer testing us: confirm
                info!("STARTDTACT");
                self.send_u_frame(UFunction::StartDtCon);
                info!("STARTDTCON");
            }
            UFunction::StartDtCon => {
                info!("STARTDTCON");
                self.tout_startdt = -1;
                self.tx_ok = true;
                self.tout_gi = GI_STARTUP_DELAY;
                self.tout_testfr = self.config.t3_testfr;
                self.emit(MasterEvent::DataTransferStarted);
            }
            UFunction::StopDtAct => {
                // only the slave side answers STOPDT; data transfer stays up
                info!("STOPDTACT");
            }
            UFunction::StopDtCon => {
                info!("STOPDTCON");
            }
            UFunction::TestFrAct => {
                info!("TESTFRACT");
                self.send_u_frame(UFunction::TestFrCon);
                info!("TESTFRCON");
            }
            UFunction::TestFrCon => {
                info!("TESTFRCON");
            }
        }
    }

    fn handle_i_frame(&mut self, ns: u16, asdu: Option<Asdu>) -> bool {
        let vr_new = ns;

        if vr_new != self.vr && !(self.config.allow_initial_tx_one && vr_new == 2) {
            error!(
                "*** SEQUENCE ERROR: expected {}, got {}",
                self.vr >> 1,
                vr_new >> 1
            );
            if self.config.seq_order_check {
                // fatal: close and let the session driver reconnect
                self.transport.disconnect();
                return false;
            }
        }

        self.vr = vr_new.wrapping_add(2);

        if let Some(asdu) = asdu {
            self.dispatch_asdu(&asdu);
        }

        self.tout_testfr = self.config.t3_testfr;

        if self.config.supervisory {
            if self.tout_supervisory < 0 {
                self.tout_supervisory = self.config.t2_supervisory;
            }
            if self.tout_supervisory > 0 {
                self.tout_supervisory -= 1;
            }
            if self.tout_supervisory == 0 {
                self.tout_supervisory = -1;
                self.send_s_frame();
            }
        } else {
            self.send_s_frame();
        }

        true
    }

    fn dispatch_asdu(&mut self, asdu: &Asdu) {
        let h = &asdu.header;
        info!(
            "OA {} CA {} TI {}:{} CAUSE {}:{} SQ {} ITEMS {}{}{}",
            h.originator,
            h.common_address,
            h.type_id.as_u8(),
            h.type_id,
            h.cot.as_u8(),
            h.cot,
            h.vsq.sequence as u8,
            h.vsq.count,
            if h.negative { " NEGATIVE" } else { " POSITIVE" },
            if h.test { " TEST" } else { "" },
        );

        match h.type_id {
            TypeId::InterrogationCommand => {
                // any GI response restarts the cycle timer
                self.tout_gi = self.config.gi_period;
                match h.cot {
                    Cot::ActivationConfirm => {
                        self.gi_object_count = 0;
                        info!("INTERROGATION ACT CON");
                        self.emit(MasterEvent::InterrogationConfirmed);
                    }
                    Cot::ActivationTermination => {
                        info!(
                            "INTERROGATION ACT TERM, {} objects",
                            self.gi_object_count
                        );
                        self.emit(MasterEvent::InterrogationTerminated {
                            objects: self.gi_object_count,
                        });
                    }
                    _ => info!("INTERROGATION"),
                }
            }

            TypeId::TestCommand | TypeId::TestCommandTime56 if h.cot == Cot::Activation => {
                self.confirm_test_command();
            }
            TypeId::TestCommandTime56 => {
                debug!("test command reply");
            }

            TypeId::CounterInterrogation => {
                info!("COUNTER INTERROGATION COMMAND");
            }
            TypeId::ClockSync => {
                info!("CLOCK SYNC COMMAND");
            }
            TypeId::EndOfInit => {
                info!("END OF INITIALIZATION");
            }

            t if t.is_command_response() => match parser::parse_command_response(asdu) {
                Ok(obj) => self.emit(MasterEvent::CommandResponse(obj)),
                Err(e) => warn!("bad command response: {e}"),
            },

            t if t.is_monitoring() => {
                if h.cot.is_interrogation_response() {
                    self.gi_object_count += h.vsq.count as u32;
                }
                match parser::parse_asdu(asdu) {
                    Ok(points) => self.emit(MasterEvent::DataIndication(points)),
                    Err(e) => warn!("bad ASDU: {e}"),
                }
            }

            other => warn!("!!! TYPE NOT IMPLEMENTED: {other}"),
        }
    }

    /// Answer a received test command (cause ACT) with the type-107
    /// confirmation stamped from the wall clock.
    fn confirm_test_command(&mut self) {
        let header = AsduHeader::new(
            TypeId::TestCommandTime56,
            1,
            Cot::ActivationConfirm,
            self.config.common_address,
        )
        .with_originator(self.config.originator);

        let mut data = BytesMut::with_capacity(9);
        data.put_u16_le(0);
        data.put_slice(&Cp56Time2a::now().to_bytes());

        let mut asdu = Asdu::new(header);
        asdu.objects
            .push(InformationObject::new(Ioa::new(0), data.freeze()));
        self.send_i_frame(asdu);
        info!("TEST COMMAND CONF");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataValue, Quality};
    use std::collections::VecDeque;

    const STARTDT_ACT: [u8; 6] = [0x68, 0x04, 0x07, 0x00, 0x00, 0x00];
    const STARTDT_CON: [u8; 6] = [0x68, 0x04, 0x0B, 0x00, 0x00, 0x00];
    const TESTFR_ACT: [u8; 6] = [0x68, 0x04, 0x43, 0x00, 0x00, 0x00];
    const TESTFR_CON: [u8; 6] = [0x68, 0x04, 0x83, 0x00, 0x00, 0x00];

    #[derive(Default)]
    struct MockTransport {
        inbound: VecDeque<u8>,
        sent: Vec<Vec<u8>>,
        connect_calls: Vec<(String, u16)>,
        disconnects: u32,
    }

    impl MockTransport {
        fn feed(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes.iter().copied());
        }
    }

    impl Transport for MockTransport {
        fn connect(&mut self, host: &str, port: u16) {
            self.connect_calls.push((host.to_string(), port));
        }

        fn disconnect(&mut self) {
            self.disconnects += 1;
        }

        fn send(&mut self, bytes: &[u8]) {
            self.sent.push(bytes.to_vec());
        }

        fn read(&mut self, buf: &mut [u8]) -> usize {
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            n
        }

        fn bytes_available(&self) -> usize {
            self.inbound.len()
        }

        fn wait_bytes(&mut self, _count: usize, _timeout_ms: u64) {}
    }

    fn make_master() -> Iec104Master<MockTransport> {
        let mut config = MasterConfig::new("10.0.0.1");
        config.common_address = 1;
        Iec104Master::new(config, MockTransport::default())
    }

    /// Connect and complete the STARTDT handshake, clearing sent frames.
    fn make_active_master() -> Iec104Master<MockTransport> {
        let mut master = make_master();
        master.on_connect_tcp();
        master.transport_mut().feed(&STARTDT_CON);
        master.on_packet_ready();
        master.transport_mut().sent.clear();
        master
    }

    /// Subscribe, discarding events already queued by the handshake.
    fn subscribe_drained(
        master: &mut Iec104Master<MockTransport>,
    ) -> mpsc::UnboundedReceiver<MasterEvent> {
        let mut events = master.subscribe().unwrap();
        while events.try_recv().is_ok() {}
        events
    }

    /// I-frame wrapping the given ASDU bytes, with the given send number.
    fn i_frame(send_seq: u16, asdu: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x68, (4 + asdu.len()) as u8];
        frame.extend_from_slice(&(send_seq << 1).to_le_bytes());
        frame.extend_from_slice(&[0x00, 0x00]);
        frame.extend_from_slice(asdu);
        frame
    }

    /// Minimal single-point ASDU: `count` objects in SQ=1 mode from IOA 10.
    fn single_point_asdu(cause: u8, count: u8) -> Vec<u8> {
        let mut asdu = vec![0x01, 0x80 | count, cause, 0x00, 0x01, 0x00];
        asdu.extend_from_slice(&[0x0A, 0x00, 0x00]);
        asdu.extend(std::iter::repeat(0x01).take(count as usize));
        asdu
    }

    #[test]
    fn test_connect_sends_startdt_act() {
        let mut master = make_master();
        master.on_connect_tcp();

        assert!(master.is_connected());
        assert!(!master.is_data_transfer_active());
        assert_eq!(master.transport().sent, vec![STARTDT_ACT.to_vec()]);
    }

    #[test]
    fn test_startdt_con_enables_data_transfer() {
        let mut master = make_master();
        let mut events = master.subscribe().unwrap();
        master.on_connect_tcp();

        master.transport_mut().feed(&STARTDT_CON);
        master.on_packet_ready();

        assert!(master.is_data_transfer_active());
        assert!(matches!(events.try_recv(), Ok(MasterEvent::Connected)));
        assert!(matches!(
            events.try_recv(),
            Ok(MasterEvent::DataTransferStarted)
        ));
    }

    #[test]
    fn test_startdt_retry_on_t1_expiry() {
        let mut master = make_master();
        master.on_connect_tcp();
        master.transport_mut().sent.clear();

        for _ in 0..DEFAULT_T1_STARTDT {
            master.on_timer_second();
        }
        assert_eq!(master.transport().sent, vec![STARTDT_ACT.to_vec()]);
    }

    #[test]
    fn test_first_gi_15s_after_data_transfer() {
        let mut master = make_active_master();

        for _ in 0..14 {
            master.on_timer_second();
        }
        assert!(master.transport().sent.is_empty());

        master.on_timer_second();
        assert_eq!(
            master.transport().sent,
            vec![vec![
                0x68, 0x0E, 0x00, 0x00, 0x00, 0x00, // I-frame VS=0 VR=0
                0x64, 0x01, 0x06, 0x00, 0x01, 0x00, // type 100, ACT, CA 1
                0x00, 0x00, 0x00, 0x14, // IOA 0, QOI station
            ]]
        );
        assert_eq!(master.send_seq(), 1);
    }

    #[test]
    fn test_testfr_probe_after_idle() {
        let mut master = make_active_master();
        // burn the GI so only the probe remains
        for _ in 0..15 {
            master.on_timer_second();
        }
        master.transport_mut().sent.clear();

        // t3 was re-armed at data-transfer start and runs while idle
        for _ in 0..DEFAULT_T3_TESTFR {
            master.on_timer_second();
        }
        let probes: Vec<_> = master
            .transport()
            .sent
            .iter()
            .filter(|f| f[..] == TESTFR_ACT)
            .collect();
        assert_eq!(probes.len(), 1);

        // the confirmation is log-only
        master.transport_mut().feed(&TESTFR_CON);
        master.on_packet_ready();
        assert!(master.is_data_transfer_active());
        assert_eq!(master.transport().disconnects, 0);
    }

    #[test]
    fn test_testfr_act_answered_with_con() {
        let mut master = make_active_master();
        master.transport_mut().feed(&TESTFR_ACT);
        master.on_packet_ready();
        assert_eq!(master.transport().sent, vec![TESTFR_CON.to_vec()]);
    }

    #[test]
    fn test_startdt_act_answered_with_con() {
        let mut master = make_active_master();
        master.transport_mut().feed(&STARTDT_ACT);
        master.on_packet_ready();
        assert_eq!(master.transport().sent, vec![STARTDT_CON.to_vec()]);
    }

    #[test]
    fn test_stopdt_is_log_only() {
        let mut master = make_active_master();
        master.transport_mut().feed(&[0x68, 0x04, 0x13, 0x00, 0x00, 0x00]);
        master.transport_mut().feed(&[0x68, 0x04, 0x23, 0x00, 0x00, 0x00]);
        master.on_packet_ready();
        assert!(master.is_data_transfer_active());
        assert!(master.transport().sent.is_empty());
    }

    #[test]
    fn test_measured_float_indication() {
        let mut master = make_active_master();
        let mut events = subscribe_drained(&mut master);

        // type 13, SQ=0, num=1, cause 3, CA 1, IOA 100, mv 12.5, quality 0
        let mut asdu = vec![0x0D, 0x01, 0x03, 0x00, 0x01, 0x00, 0x64, 0x00, 0x00];
        asdu.extend_from_slice(&12.5f32.to_le_bytes());
        asdu.push(0x00);
        let frame = i_frame(0, &asdu);
        master.transport_mut().feed(&frame);
        master.on_packet_ready();

        match events.try_recv() {
            Ok(MasterEvent::DataIndication(points)) => {
                assert_eq!(points.len(), 1);
                assert_eq!(points[0].ioa, 100);
                assert_eq!(points[0].value, DataValue::Float(12.5));
                assert_eq!(points[0].quality, Quality::GOOD);
                assert_eq!(points[0].common_address, 1);
            }
            other => panic!("expected DataIndication, got {other:?}"),
        }
        assert_eq!(master.recv_seq(), 1);
    }

    #[test]
    fn test_sequenced_monitoring() {
        let mut master = make_active_master();
        let mut events = subscribe_drained(&mut master);

        let frame = i_frame(0, &single_point_asdu(3, 3));
        master.transport_mut().feed(&frame);
        master.on_packet_ready();

        match events.try_recv() {
            Ok(MasterEvent::DataIndication(points)) => {
                assert_eq!(points.len(), 3);
                assert_eq!(points[0].ioa, 10);
                assert_eq!(points[1].ioa, 11);
                assert_eq!(points[2].ioa, 12);
            }
            other => panic!("expected DataIndication, got {other:?}"),
        }
    }

    #[test]
    fn test_single_command_activation() {
        let mut master = make_active_master();

        let sent = master.send_command(&CommandObject::single(42, true));
        assert!(sent);
        assert_eq!(
            master.transport().sent,
            vec![vec![
                0x68, 0x0E, 0x00, 0x00, 0x00, 0x00, // I-frame VS=0 VR=0
                0x2D, 0x01, 0x06, 0x00, 0x01, 0x00, // type 45, ACT, CA 1
                0x2A, 0x00, 0x00, // IOA 42
                0x01, // SCO: SCS=1, execute
            ]]
        );
    }

    #[test]
    fn test_send_command_unsupported_returns_false() {
        let mut master = make_active_master();
        let obj = CommandObject {
            type_id: TypeId::SinglePoint,
            ..Default::default()
        };
        assert!(!master.send_command(&obj));
        assert!(master.transport().sent.is_empty());
        assert_eq!(master.send_seq(), 0);
    }

    #[test]
    fn test_vs_monotonicity() {
        let mut master = make_active_master();

        for i in 0..3 {
            assert!(master.send_command(&CommandObject::single(i, true)));
        }

        let sent = &master.transport().sent;
        assert_eq!(sent.len(), 3);
        for (i, frame) in sent.iter().enumerate() {
            let ns = u16::from_le_bytes([frame[2], frame[3]]) >> 1;
            assert_eq!(ns as usize, i);
        }
        assert_eq!(master.send_seq(), 3);
    }

    #[test]
    fn test_sequence_discipline() {
        let mut master = make_active_master();

        for k in 0..5u16 {
            let frame = i_frame(k, &single_point_asdu(3, 1));
            master.transport_mut().feed(&frame);
        }
        master.on_packet_ready();

        assert_eq!(master.transport().disconnects, 0);
        assert_eq!(master.recv_seq(), 5);
    }

    #[test]
    fn test_sequence_mismatch_disconnects() {
        let mut master = make_active_master();

        for k in 0..3u16 {
            let frame = i_frame(k, &single_point_asdu(3, 1));
            master.transport_mut().feed(&frame);
        }
        // frame 3 replaced with send number 4
        let frame = i_frame(4, &single_point_asdu(3, 1));
        master.transport_mut().feed(&frame);
        master.on_packet_ready();

        assert_eq!(master.transport().disconnects, 1);
        // VR was not advanced past the good frames
        assert_eq!(master.recv_seq(), 3);
    }

    #[test]
    fn test_sequence_mismatch_tolerated_when_check_disabled() {
        let mut master = make_active_master();
        master.disable_sequence_order_check();

        let frame = i_frame(7, &single_point_asdu(3, 1));
        master.transport_mut().feed(&frame);
        master.on_packet_ready();

        assert_eq!(master.transport().disconnects, 0);
        // VR resynchronised optimistically
        assert_eq!(master.recv_seq(), 8);
    }

    #[test]
    fn test_initial_tx_one_tolerated() {
        let mut master = make_active_master();

        // slave opens with send number 1 instead of 0
        let frame = i_frame(1, &single_point_asdu(3, 1));
        master.transport_mut().feed(&frame);
        master.on_packet_ready();

        assert_eq!(master.transport().disconnects, 0);
        assert_eq!(master.recv_seq(), 2);
    }

    #[test]
    fn test_gi_timer_expiry_count() {
        let mut master = make_active_master();

        // ACT-TERM re-arms the GI timer to the full period
        let asdu = [0x64, 0x01, 0x0A, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x14];
        let frame = i_frame(0, &asdu);
        master.transport_mut().feed(&frame);
        master.on_packet_ready();
        master.transport_mut().sent.clear();

        for _ in 0..DEFAULT_GI_PERIOD {
            master.on_timer_second();
        }

        let gi_frames: Vec<_> = master
            .transport()
            .sent
            .iter()
            .filter(|f| f.len() == 16 && f[6] == 0x64)
            .collect();
        assert_eq!(gi_frames.len(), 1);
    }

    #[test]
    fn test_gi_accounting() {
        let mut master = make_active_master();
        let mut events = subscribe_drained(&mut master);

        // ACT-CON resets the object counter
        let act_con = [0x64, 0x01, 0x07, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x14];
        master.transport_mut().feed(&i_frame(0, &act_con));
        // two responses with interrogation causes: 2 + 1 objects
        master
            .transport_mut()
            .feed(&i_frame(1, &single_point_asdu(20, 2)));
        master
            .transport_mut()
            .feed(&i_frame(2, &single_point_asdu(21, 1)));
        // ACT-TERM reports the total
        let act_term = [0x64, 0x01, 0x0A, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x14];
        master.transport_mut().feed(&i_frame(3, &act_term));
        master.on_packet_ready();

        assert!(matches!(
            events.try_recv(),
            Ok(MasterEvent::InterrogationConfirmed)
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(MasterEvent::DataIndication(_))
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(MasterEvent::DataIndication(_))
        ));
        assert!(matches!(
            events.try_recv(),
            Ok(MasterEvent::InterrogationTerminated { objects: 3 })
        ));
    }

    #[test]
    fn test_spontaneous_data_does_not_count_toward_gi() {
        let mut master = make_active_master();

        let act_con = [0x64, 0x01, 0x07, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x14];
        master.transport_mut().feed(&i_frame(0, &act_con));
        master
            .transport_mut()
            .feed(&i_frame(1, &single_point_asdu(3, 5))); // SPONT
        master
            .transport_mut()
            .feed(&i_frame(2, &single_point_asdu(20, 2)));
        master.on_packet_ready();

        assert_eq!(master.gi_object_count(), 2);
    }

    #[test]
    fn test_test_command_reply() {
        let mut master = make_active_master();

        // type 107 with cause ACT, TSC 0x1234
        let mut asdu = vec![0x6B, 0x01, 0x06, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x34, 0x12];
        asdu.extend_from_slice(&Cp56Time2a::now().to_bytes());
        master.transport_mut().feed(&i_frame(0, &asdu));
        master.on_packet_ready();

        let sent = &master.transport().sent;
        assert_eq!(sent.len(), 1);
        let reply = &sent[0];
        assert_eq!(reply.len(), 24);
        assert_eq!(reply[1], 22); // APDU length
        assert_eq!(reply[6], 0x6B); // type 107
        assert_eq!(reply[8], 0x07); // cause ACT_CON
        // CP56Time2a within the current minute of the wall clock
        let stamped = Cp56Time2a::from_bytes(&reply[17..24]).unwrap();
        let now = Cp56Time2a::now();
        assert_eq!(stamped.day, now.day);
        assert_eq!(stamped.hours, now.hours);
    }

    #[test]
    fn test_command_response_event() {
        let mut master = make_active_master();
        let mut events = subscribe_drained(&mut master);

        // single command ACT-CON echo: type 45, cause 7, IOA 42, SCS=1
        let asdu = [0x2D, 0x01, 0x07, 0x00, 0x01, 0x00, 0x2A, 0x00, 0x00, 0x01];
        master.transport_mut().feed(&i_frame(0, &asdu));
        master.on_packet_ready();

        match events.try_recv() {
            Ok(MasterEvent::CommandResponse(obj)) => {
                assert_eq!(obj.ioa, 42);
                assert_eq!(obj.cot, Cot::ActivationConfirm);
                assert_eq!(obj.value, 1.0);
                assert!(!obj.negative);
            }
            other => panic!("expected CommandResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_resync_garbage_then_valid() {
        let mut master = make_active_master();
        let mut events = subscribe_drained(&mut master);

        let mut stream = vec![0xDE, 0xAD, 0x11, 0x22];
        stream.extend_from_slice(&i_frame(0, &single_point_asdu(3, 1)));
        master.transport_mut().feed(&stream);
        master.on_packet_ready();

        assert!(matches!(
            events.try_recv(),
            Ok(MasterEvent::DataIndication(_))
        ));
        assert_eq!(master.recv_seq(), 1);
    }

    #[test]
    fn test_broken_frame_resumes_on_next_ready() {
        let mut master = make_active_master();
        let mut events = subscribe_drained(&mut master);

        let frame = i_frame(0, &single_point_asdu(3, 1));
        let (head, tail) = frame.split_at(5);

        master.transport_mut().feed(head);
        master.on_packet_ready();
        assert!(events.try_recv().is_err());

        master.transport_mut().feed(tail);
        master.on_packet_ready();
        assert!(matches!(
            events.try_recv(),
            Ok(MasterEvent::DataIndication(_))
        ));
    }

    #[test]
    fn test_broken_frame_discarded_after_second_failure() {
        let mut master = make_active_master();
        let mut events = subscribe_drained(&mut master);

        let frame = i_frame(0, &single_point_asdu(3, 1));
        master.transport_mut().feed(&frame[..5]);
        master.on_packet_ready(); // strike one: flagged broken
        master.on_packet_ready(); // strike two: discarded

        // a fresh, complete frame decodes normally afterwards
        master.transport_mut().feed(&frame);
        master.on_packet_ready();
        assert!(matches!(
            events.try_recv(),
            Ok(MasterEvent::DataIndication(_))
        ));
    }

    #[test]
    fn test_supervisory_ack_on_t2_path() {
        let mut master = make_active_master();

        master
            .transport_mut()
            .feed(&i_frame(0, &single_point_asdu(3, 1)));
        master.on_packet_ready();
        master.transport_mut().sent.clear();

        // t2 decrements twice per tick, so 10 configured seconds elapse in 5
        for _ in 0..(DEFAULT_T2_SUPERVISORY / 2) {
            master.on_timer_second();
        }

        let s_frames: Vec<_> = master
            .transport()
            .sent
            .iter()
            .filter(|f| f.len() == 6 && f[2] == 0x01)
            .collect();
        assert_eq!(s_frames.len(), 1);
        // S-frame acknowledges VR = 1
        assert_eq!(master.transport().sent[0], vec![0x68, 0x04, 0x01, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn test_immediate_ack_when_supervisory_disabled() {
        let mut config = MasterConfig::new("10.0.0.1");
        config.common_address = 1;
        config.supervisory = false;
        let mut master = Iec104Master::new(config, MockTransport::default());
        master.on_connect_tcp();
        master.transport_mut().feed(&STARTDT_CON);
        master.on_packet_ready();
        master.transport_mut().sent.clear();

        master
            .transport_mut()
            .feed(&i_frame(0, &single_point_asdu(3, 1)));
        master.on_packet_ready();

        assert_eq!(
            master.transport().sent,
            vec![vec![0x68, 0x04, 0x01, 0x00, 0x02, 0x00]]
        );
    }

    #[test]
    fn test_reconnect_alternates_primary_backup() {
        let mut master = make_master();
        master.set_secondary_ip_backup("10.0.0.2");

        for _ in 0..20 {
            master.on_timer_second();
        }

        let calls = &master.transport().connect_calls;
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0].0, "10.0.0.1");
        assert_eq!(calls[1].0, "10.0.0.2");
        assert_eq!(calls[2].0, "10.0.0.1");
        assert_eq!(calls[3].0, "10.0.0.2");
        assert_eq!(calls[0].1, DEFAULT_PORT);
    }

    #[test]
    fn test_reconnect_primary_only_without_backup() {
        let mut master = make_master();

        for _ in 0..15 {
            master.on_timer_second();
        }

        let calls = &master.transport().connect_calls;
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(host, _)| host == "10.0.0.1"));
    }

    #[test]
    fn test_disable_connect_stops_reconnection() {
        let mut master = make_master();
        master.disable_connect();

        for _ in 0..20 {
            master.on_timer_second();
        }
        assert!(master.transport().connect_calls.is_empty());

        master.enable_connect();
        for _ in 0..5 {
            master.on_timer_second();
        }
        assert_eq!(master.transport().connect_calls.len(), 1);
    }

    #[test]
    fn test_disconnect_resets_session() {
        let mut master = make_active_master();
        master
            .transport_mut()
            .feed(&i_frame(0, &single_point_asdu(3, 1)));
        master.on_packet_ready();
        assert!(master.recv_seq() > 0);

        master.on_disconnect_tcp();
        assert!(!master.is_connected());
        assert!(!master.is_data_transfer_active());

        // reconnecting starts a fresh sequence space
        master.on_connect_tcp();
        assert_eq!(master.send_seq(), 0);
        assert_eq!(master.recv_seq(), 0);
    }

    #[test]
    fn test_solicit_interrogation_group_qualifier() {
        let mut master = make_active_master();

        master.solicit_interrogation(4);
        let frame = &master.transport().sent[0];
        assert_eq!(frame[6], 0x64);
        assert_eq!(*frame.last().unwrap(), 0x14 + 4);

        master.transport_mut().sent.clear();
        master.solicit_interrogation(0);
        master.solicit_interrogation(17);
        assert!(master.transport().sent.is_empty());
    }

    #[test]
    fn test_configuration_surface() {
        let mut master = make_master();

        master.set_primary_address(7);
        assert_eq!(master.get_primary_address(), 7);

        master.set_secondary_address(100);
        assert_eq!(master.get_secondary_address(), 100);

        master.set_port(2405);
        master.set_secondary_ip("192.168.0.10");
        for _ in 0..5 {
            master.on_timer_second();
        }
        assert_eq!(
            master.transport().connect_calls[0],
            ("192.168.0.10".to_string(), 2405)
        );
    }

    #[test]
    fn test_commands_carry_originator_and_ca() {
        let mut master = make_active_master();
        master.set_primary_address(9);
        master.set_secondary_address(55);

        master.send_command(&CommandObject::single(1, true));
        let frame = &master.transport().sent[0];
        assert_eq!(frame[9], 9); // OA
        assert_eq!(u16::from_le_bytes([frame[10], frame[11]]), 55); // CA
    }

    #[test]
    fn test_test_command_counter_increments() {
        let mut master = make_active_master();

        master.send_command(&CommandObject::test_with_time());
        master.send_command(&CommandObject::test_with_time());

        let sent = &master.transport().sent;
        // TSC lives right after the 3-byte IOA
        assert_eq!(u16::from_le_bytes([sent[0][15], sent[0][16]]), 0);
        assert_eq!(u16::from_le_bytes([sent[1][15], sent[1][16]]), 1);
    }

    #[test]
    fn test_unknown_type_discarded_without_event() {
        let mut master = make_active_master();
        let mut events = subscribe_drained(&mut master);

        // type 121 (file transfer) is not implemented
        let asdu = [0x79, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        master.transport_mut().feed(&i_frame(0, &asdu));
        master.on_packet_ready();

        assert!(events.try_recv().is_err());
        // sequence accounting still happened
        assert_eq!(master.recv_seq(), 1);
    }
}
