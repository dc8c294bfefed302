// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session orchestrator.
//!
//! One session owns one transport, from Connect to Disconnect. The
//! lifecycle is `Idle -> Connecting -> Authenticated -> Ready -> Busy ->
//! Ready -> Terminated`; there is no edge back to Idle. A surfaced
//! transport, framing or deadline error parks the session in `Error`,
//! from which only Disconnect is accepted.

use crate::auth::{authenticate_any, AuthArtifacts, AuthStrategy};
use crate::chipdb::{self, ChipConfig};
use crate::error::{Error, ExploitError, ProtocolError, Result};
use crate::event::{CancelToken, EventHook, Events};
use crate::exploit::{ExploitBridge, ExploitCtx, PayloadResult};
use crate::ops::{self, FirehoseIo, FlashIo, SprdIo, SuperChildStatus, XflashIo};
use crate::pipeline::{self, MtkLoaders, SprdLoader};
use crate::proto::firehose::{Firehose, MemoryName, PowerAction};
use crate::proto::preloader::{MtkDeviceInfo, Preloader};
use crate::proto::sahara::QcDeviceInfo;
use crate::proto::sprd::{SprdBoot, SprdDeviceInfo};
use crate::proto::xflash::{PartType, ShutdownMode, Xflash, XflashDevInfo};
use crate::storage::partition::{PartitionTable, Slot};
use crate::storage::{gpt, pac, pmt};
use crate::superdef::SuperDef;
use crate::transport::Transport;

/// SoC family the session speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    Qualcomm,
    Mediatek,
    Unisoc,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Authenticated,
    Ready,
    Busy,
    Error,
    Terminated,
}

/// Vendor-specific device identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceInfo {
    Qualcomm(QcDeviceInfo),
    Mediatek(MtkDeviceInfo),
    Unisoc(SprdDeviceInfo),
}

/// One flashing session over one transport.
pub struct Session {
    transport: Option<Box<dyn Transport>>,
    vendor: Vendor,
    state: SessionState,
    events: Events,
    cancel: CancelToken,
    chip: Option<&'static ChipConfig>,
    device_info: Option<DeviceInfo>,
    table: PartitionTable,
    /// Negotiated Firehose parameters, reapplied per operation.
    fh_max_payload: usize,
    fh_sector_size: u32,
    mtk_dev: Option<XflashDevInfo>,
    exploit_active: bool,
    current_op: Option<&'static str>,
}

impl Session {
    pub fn new(vendor: Vendor, transport: Box<dyn Transport>, hook: Option<EventHook>) -> Self {
        Session {
            transport: Some(transport),
            vendor,
            state: SessionState::Idle,
            events: Events::new(hook),
            cancel: CancelToken::new(),
            chip: None,
            device_info: None,
            table: PartitionTable::default(),
            fh_max_payload: 0x100000,
            fh_sector_size: 512,
            mtk_dev: None,
            exploit_active: false,
            current_op: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    pub fn chip(&self) -> Option<&'static ChipConfig> {
        self.chip
    }

    /// Storage geometry the MTK download agent reported, when connected
    /// to one.
    pub fn mtk_storage(&self) -> Option<&XflashDevInfo> {
        self.mtk_dev.as_ref()
    }

    pub fn partitions(&self) -> &PartitionTable {
        &self.table
    }

    /// Token long operations poll; cancel it from another thread to stop
    /// the in-flight op at its next chunk boundary.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            self.state = state;
            self.events.state_changed(state);
        }
    }

    fn transport(&mut self) -> Result<&mut (dyn Transport + 'static)> {
        match self.transport.as_mut() {
            Some(t) => Ok(t.as_mut()),
            None => Err(ProtocolError::UnexpectedState("transport closed").into()),
        }
    }

    fn require_state(&self, wanted: SessionState, doing: &'static str) -> Result<()> {
        if self.state == wanted {
            Ok(())
        } else {
            log::warn!("{doing} rejected in state {:?}", self.state);
            Err(ProtocolError::UnexpectedState(doing).into())
        }
    }

    /// Connect a Qualcomm EDL device: Sahara, Firehose, authentication,
    /// partition table.
    pub fn connect_qualcomm(
        &mut self,
        programmer: &[u8],
        memory: MemoryName,
        strategies: &mut [Box<dyn AuthStrategy>],
        artifacts: &AuthArtifacts,
    ) -> Result<()> {
        self.require_state(SessionState::Idle, "connect")?;
        self.set_state(SessionState::Connecting);
        let result = self.connect_qualcomm_inner(programmer, memory, strategies, artifacts);
        match result {
            Ok(()) => {
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Error);
                Err(e)
            }
        }
    }

    fn connect_qualcomm_inner(
        &mut self,
        programmer: &[u8],
        memory: MemoryName,
        strategies: &mut [Box<dyn AuthStrategy>],
        artifacts: &AuthArtifacts,
    ) -> Result<()> {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let transport = self.transport()?;

        let (max_payload, storage) =
            pipeline::qc_boot_to_firehose(transport, programmer, memory, &events, &cancel)?;
        self.fh_max_payload = max_payload;
        if let Some(info) = &storage {
            if info.block_size == 512 || info.block_size == 4096 {
                self.fh_sector_size = info.block_size;
            }
        }
        self.device_info = Some(DeviceInfo::Qualcomm(QcDeviceInfo::default()));

        {
            let fh_max_payload = self.fh_max_payload;
            let fh_sector_size = self.fh_sector_size;
            let transport = self.transport()?;
            let mut fh = Firehose::new(transport);
            fh.set_max_payload(fh_max_payload);
            fh.set_sector_size(fh_sector_size);
            authenticate_any(&mut fh, strategies, artifacts, &events)?;
        }
        self.set_state(SessionState::Authenticated);

        self.table = self.load_qualcomm_table()?;
        if let Some(info) = storage {
            self.table
                .validate(&[(0, info.total_blocks)])
                .map_err(Error::from)?;
        }
        events.info(format!("{} partitions enumerated", self.table.len()));
        Ok(())
    }

    fn load_qualcomm_table(&mut self) -> Result<PartitionTable> {
        let sector_size = self.fh_sector_size;
        let max_payload = self.fh_max_payload;
        let transport = self.transport()?;
        let mut fh = Firehose::new(transport);
        fh.set_max_payload(max_payload);
        fh.set_sector_size(sector_size);

        // Enough sectors to cover the header and a 128-entry array at
        // either sector size.
        let sectors = match sector_size {
            4096 => 8,
            _ => 64,
        };
        let promised = fh.start_read(0, 0, sectors)?;
        let raw = fh.read_raw(promised as usize)?;
        fh.finish_read()?;
        let parsed = gpt::Gpt::parse_auto(&raw)?;
        Ok(parsed.to_partition_table(0))
    }

    /// Connect an MTK device sitting in BROM/Preloader mode: handshake,
    /// identify, upload the two DA stages, enumerate partitions.
    pub fn connect_mediatek(&mut self, loaders: &MtkLoaders<'_>) -> Result<()> {
        self.require_state(SessionState::Idle, "connect")?;
        self.set_state(SessionState::Connecting);
        match self.connect_mediatek_inner(loaders) {
            Ok(()) => {
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Error);
                Err(e)
            }
        }
    }

    fn connect_mediatek_inner(&mut self, loaders: &MtkLoaders<'_>) -> Result<()> {
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        let info = {
            let transport = self.transport()?;
            let mut brom = Preloader::new(transport);
            brom.handshake()?;
            brom.read_device_info()?
        };
        events.info(format!(
            "hw code {:#06x}, target config {:?}",
            info.hw_code, info.target_config
        ));
        let chip = chipdb::by_hw_code(info.hw_code).ok_or_else(|| {
            Error::from(ProtocolError::Unsupported(format!(
                "unknown hw code {:#06x}",
                info.hw_code
            )))
        })?;
        self.chip = Some(chip);

        let transport = self.transport()?;
        let dev = pipeline::mtk_boot_to_da(transport, chip, &info, loaders, &events, &cancel)?;
        self.mtk_dev = Some(dev);
        self.device_info = Some(DeviceInfo::Mediatek(info));
        // MTK DAs are write-privileged once SLA/DAA are satisfied or
        // bypassed; no separate auth round.
        self.set_state(SessionState::Authenticated);

        self.table = self.load_mediatek_table()?;
        self.table
            .validate(&[(0, dev.user_size / 512)])
            .map_err(Error::from)?;
        events.info(format!("{} partitions enumerated", self.table.len()));
        Ok(())
    }

    fn load_mediatek_table(&mut self) -> Result<PartitionTable> {
        let cancel = self.cancel.clone();
        let transport = self.transport()?;
        let mut da = Xflash::new(transport);
        let mut raw = Vec::with_capacity(0x8000);
        da.read_flash(PartType::User, 0, 0x8000, &cancel, &mut |chunk| {
            raw.extend_from_slice(chunk);
            Ok(())
        })?;
        // Modern chips keep a GPT in the user area; older ones a PMT.
        match gpt::Gpt::parse_auto(&raw) {
            Ok(parsed) => Ok(parsed.to_partition_table(0)),
            Err(_) => Ok(pmt::to_partition_table(&pmt::parse(&raw)?, 512)),
        }
    }

    /// Connect a Unisoc device in BootROM mode through FDL1/FDL2. The
    /// partition list comes from the PAC table of contents.
    pub fn connect_unisoc(
        &mut self,
        fdl1: &SprdLoader<'_>,
        fdl2: &SprdLoader<'_>,
        pac_toc: &pac::Pac,
    ) -> Result<()> {
        self.require_state(SessionState::Idle, "connect")?;
        self.set_state(SessionState::Connecting);
        match self.connect_unisoc_inner(fdl1, fdl2, pac_toc) {
            Ok(()) => {
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Error);
                Err(e)
            }
        }
    }

    fn connect_unisoc_inner(
        &mut self,
        fdl1: &SprdLoader<'_>,
        fdl2: &SprdLoader<'_>,
        pac_toc: &pac::Pac,
    ) -> Result<()> {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let transport = self.transport()?;
        let mut info =
            pipeline::sprd_boot_to_fdl2(transport, fdl1, fdl2, None, &events, &cancel)?;
        if info.chip_name.is_empty() {
            info.chip_name = pac_toc.product.clone();
        }
        self.device_info = Some(DeviceInfo::Unisoc(info));
        self.set_state(SessionState::Authenticated);
        self.table = pac::to_partition_table(pac_toc);
        events.info(format!("{} partitions from PAC TOC", self.table.len()));
        Ok(())
    }

    fn begin_op(&mut self, doing: &'static str) -> Result<()> {
        if self.state == SessionState::Busy {
            return Err(ProtocolError::UnexpectedState("busy").into());
        }
        if self.exploit_active {
            return Err(ExploitError::AlreadyActive.into());
        }
        self.require_state(SessionState::Ready, doing)?;
        self.current_op = Some(doing);
        self.set_state(SessionState::Busy);
        Ok(())
    }

    fn end_op<T>(&mut self, result: Result<T>) -> Result<T> {
        let doing = self.current_op.take().unwrap_or("operation");
        match &result {
            Ok(_) => {
                self.events.emit(crate::event::Event::Completed(doing.to_string()));
                self.set_state(SessionState::Ready);
            }
            Err(e @ Error::Transport(_))
            | Err(e @ Error::Frame(_))
            | Err(e @ Error::Deadline { .. }) => {
                self.events
                    .emit(crate::event::Event::Failed(format!("{doing}: {e}")));
                self.set_state(SessionState::Error);
            }
            Err(e) => {
                self.events
                    .emit(crate::event::Event::Failed(format!("{doing}: {e}")));
                self.set_state(SessionState::Ready);
            }
        }
        result
    }

    fn with_io<T>(
        &mut self,
        f: &mut dyn FnMut(&mut dyn FlashIo, &PartitionTable, &Events, &CancelToken) -> Result<T>,
    ) -> Result<T> {
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        let table = self.table.clone();
        let vendor = self.vendor;
        let fh_max_payload = self.fh_max_payload;
        let fh_sector_size = self.fh_sector_size;
        let transport = self.transport()?;
        match vendor {
            Vendor::Qualcomm => {
                let mut fh = Firehose::new(transport);
                fh.set_max_payload(fh_max_payload);
                fh.set_sector_size(fh_sector_size);
                let mut io = FirehoseIo {
                    fh: &mut fh,
                    cancel: cancel.clone(),
                };
                f(&mut io, &table, &events, &cancel)
            }
            Vendor::Mediatek => {
                let mut da = Xflash::new(transport);
                let mut io = XflashIo {
                    da: &mut da,
                    part: PartType::User,
                    cancel: cancel.clone(),
                };
                f(&mut io, &table, &events, &cancel)
            }
            Vendor::Unisoc => {
                let mut bsl = SprdBoot::new(transport);
                let mut io = SprdIo { bsl: &mut bsl };
                f(&mut io, &table, &events, &cancel)
            }
        }
    }

    /// Read a partition into `sink`.
    pub fn read_partition(
        &mut self,
        name: &str,
        slot: Option<Slot>,
        sink: &mut dyn std::io::Write,
    ) -> Result<u64> {
        self.begin_op("read partition")?;
        let result = self.with_io(&mut |io, table, events, cancel| {
            ops::read_partition(io, table, name, slot, sink, events, cancel)
        });
        self.end_op(result)
    }

    /// Write raw or sparse bytes to a partition.
    pub fn write_partition(&mut self, name: &str, slot: Option<Slot>, data: &[u8]) -> Result<()> {
        self.begin_op("write partition")?;
        let result = self.with_io(&mut |io, table, events, cancel| {
            ops::write_partition(io, table, name, slot, data, events, cancel)
        });
        self.end_op(result)
    }

    pub fn erase_partition(&mut self, name: &str, slot: Option<Slot>) -> Result<()> {
        self.begin_op("erase partition")?;
        let result = self.with_io(&mut |io, table, events, _cancel| {
            ops::erase_partition(io, table, name, slot, events)
        });
        self.end_op(result)
    }

    pub fn format_partition(&mut self, name: &str, slot: Option<Slot>) -> Result<()> {
        self.begin_op("format partition")?;
        let result = self.with_io(&mut |io, table, events, _cancel| {
            ops::format_partition(io, table, name, slot, events)
        });
        self.end_op(result)
    }

    /// Flash a super definition; per-child statuses, meta last.
    pub fn flash_super(
        &mut self,
        def: &SuperDef,
        payload: &mut dyn FnMut(&str) -> Result<Vec<u8>>,
    ) -> Result<Vec<SuperChildStatus>> {
        self.begin_op("flash super")?;
        let result = self.with_io(&mut |io, table, events, cancel| {
            ops::flash_super(io, table, def, payload, events, cancel)
        });
        self.end_op(result)
    }

    /// Run an exploit bridge: the MTK ones pre-DA (a chip must have been
    /// identified first), the Unisoc RSA replay pre-FDL1 straight from
    /// Idle. Nested runs on one session are forbidden; partition
    /// operations are refused while a bridge is in flight.
    pub fn run_exploit(
        &mut self,
        bridge: &mut dyn ExploitBridge,
        payload: &[u8],
    ) -> Result<PayloadResult> {
        if self.exploit_active {
            return Err(ExploitError::AlreadyActive.into());
        }
        let chip = self.chip;
        self.exploit_active = true;
        let events = self.events.clone();
        let result = (|| {
            let transport = self.transport()?;
            let mut ctx = ExploitCtx {
                transport,
                chip,
                events: &events,
            };
            bridge.prepare(&mut ctx)?;
            bridge.run_payload(&mut ctx, payload)
        })();
        self.exploit_active = false;
        match &result {
            Ok(r) => events.info(format!(
                "exploit {} delivered {} bytes",
                bridge.name(),
                r.bytes
            )),
            Err(e) => events.warn(format!("exploit {} failed: {e}", bridge.name())),
        }
        result
    }

    /// Cancel any in-flight operation, say goodbye to the device
    /// (best-effort, short timeout) and close the transport. Valid from
    /// any state.
    pub fn disconnect(&mut self) {
        self.cancel.cancel();
        if let Some(transport) = self.transport.as_mut() {
            if matches!(
                self.state,
                SessionState::Ready | SessionState::Busy | SessionState::Authenticated
            ) {
                let t = transport.as_mut();
                let goodbye: Result<()> = match self.vendor {
                    Vendor::Qualcomm => {
                        let mut fh = Firehose::new(t);
                        fh.power(PowerAction::Reset)
                    }
                    Vendor::Mediatek => Xflash::new(t).shutdown(ShutdownMode::Reboot),
                    Vendor::Unisoc => SprdBoot::new(t).reset(),
                };
                if let Err(e) = goodbye {
                    log::debug!("shutdown handshake failed (ignored): {e}");
                }
            }
            let _ = transport.close();
        }
        // Loader buffers and the transport go away together.
        self.transport = None;
        self.set_state(SessionState::Terminated);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Safety net only; the polite shutdown belongs to an explicit
        // disconnect().
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exploit::rsa_replay::builtin_pairs;
    use crate::exploit::{Kamakiri, RsaReplay};
    use crate::framer::sprd::{
        SprdFrame, BSL_CMD_CONNECT, BSL_CMD_END_DATA, BSL_CMD_EXEC_DATA, BSL_CMD_MIDST_DATA,
        BSL_CMD_START_DATA, BSL_REP_ACK, BSL_REP_VER,
    };
    use crate::transport::testing::{Exchange, ScriptedTransport};

    fn idle_session() -> Session {
        Session::new(
            Vendor::Qualcomm,
            Box::new(ScriptedTransport::new(vec![])),
            None,
        )
    }

    #[test]
    fn ops_require_ready() {
        let mut s = idle_session();
        let mut sink = Vec::new();
        assert!(s.read_partition("boot", None, &mut sink).is_err());
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn busy_rejects_a_second_op() {
        let mut s = idle_session();
        s.state = SessionState::Ready;
        s.begin_op("first").unwrap();
        assert_eq!(s.state(), SessionState::Busy);
        match s.begin_op("second") {
            Err(Error::Protocol(ProtocolError::UnexpectedState("busy"))) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn error_state_only_accepts_disconnect() {
        let mut s = idle_session();
        s.state = SessionState::Error;
        assert!(s.write_partition("boot", None, &[1, 2, 3]).is_err());
        assert_eq!(s.state(), SessionState::Error);
        s.disconnect();
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[test]
    fn no_edge_back_to_idle() {
        let mut s = idle_session();
        s.disconnect();
        assert_eq!(s.state(), SessionState::Terminated);
        // A new connect on a terminated session is rejected.
        let mut strategies: Vec<Box<dyn AuthStrategy>> = vec![];
        assert!(s
            .connect_qualcomm(
                &[0u8; 16],
                MemoryName::Ufs,
                &mut strategies,
                &AuthArtifacts::default()
            )
            .is_err());
    }

    #[test]
    fn transport_errors_park_the_session_in_error() {
        let mut s = idle_session();
        s.state = SessionState::Busy;
        let r: Result<()> =
            Err(crate::error::TransportError::Disconnected.into());
        assert!(s.end_op(r).is_err());
        assert_eq!(s.state(), SessionState::Error);
    }

    #[test]
    fn mtk_bridges_still_require_an_identified_chip() {
        let mut s = idle_session();
        match s.run_exploit(&mut Kamakiri::new(), &[0u8; 4]) {
            Err(Error::Exploit(ExploitError::UnsupportedChip(_))) => {}
            other => panic!("unexpected: {other:?}"),
        }
        assert!(!s.exploit_active);
    }

    /// The Unisoc replay bridge runs through the same session entry
    /// point as the MTK ones: identify the BootROM, park the pair, send
    /// and exec the unsigned FDL1.
    #[test]
    fn unisoc_rsa_replay_runs_through_the_session() {
        let pair = &builtin_pairs()[0];
        let mut blob = pair.digest.to_vec();
        blob.extend_from_slice(&pair.signature);
        let fdl1 = vec![0xF1u8; 16];

        let ack = || SprdFrame::new(BSL_REP_ACK, Vec::new()).encode();
        let start_data = |addr: u32, len: u32| {
            let mut body = addr.to_be_bytes().to_vec();
            body.extend_from_slice(&len.to_be_bytes());
            SprdFrame::new(BSL_CMD_START_DATA, body).encode()
        };
        let transport = ScriptedTransport::new(vec![
            Exchange::Expect(SprdFrame::new(BSL_CMD_CONNECT, Vec::new()).encode()),
            Exchange::Reply(SprdFrame::new(BSL_REP_VER, b"SPRD3 eMMC\0".to_vec()).encode()),
            Exchange::Expect(start_data(pair.sig_addr, blob.len() as u32)),
            Exchange::Reply(ack()),
            Exchange::Expect(SprdFrame::new(BSL_CMD_MIDST_DATA, blob).encode()),
            Exchange::Reply(ack()),
            Exchange::Expect(SprdFrame::new(BSL_CMD_END_DATA, Vec::new()).encode()),
            Exchange::Reply(ack()),
            Exchange::Expect(start_data(pair.fdl1_addr, 16)),
            Exchange::Reply(ack()),
            Exchange::Expect(SprdFrame::new(BSL_CMD_MIDST_DATA, fdl1.clone()).encode()),
            Exchange::Reply(ack()),
            Exchange::Expect(SprdFrame::new(BSL_CMD_END_DATA, Vec::new()).encode()),
            Exchange::Reply(ack()),
            Exchange::Expect(
                SprdFrame::new(BSL_CMD_EXEC_DATA, pair.fdl1_addr.to_be_bytes().to_vec()).encode(),
            ),
            Exchange::Reply(ack()),
        ]);

        let mut s = Session::new(Vendor::Unisoc, Box::new(transport), None);
        let result = s.run_exploit(&mut RsaReplay::auto(), &fdl1).unwrap();
        assert_eq!(result.bytes, 16);
        assert!(result.jumped);
        assert!(!s.exploit_active);
    }

    #[test]
    fn protocol_naks_return_to_ready() {
        let mut s = idle_session();
        s.state = SessionState::Busy;
        let r: Result<()> = Err(ProtocolError::Nak {
            code: 1,
            msg: "no".into(),
        }
        .into());
        assert!(s.end_op(r).is_err());
        assert_eq!(s.state(), SessionState::Ready);
    }
}
