// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Two-stage code-upload pipeline.
//!
//! Every stack follows the same contract: negotiate, disable the watchdog,
//! send stage 1, jump, sync, initialize DRAM when stage 1 booted from the
//! BootROM, send stage 2, initialize device info. Failures carry the step
//! they happened in; anything at or before Sync is recoverable by
//! power-cycling the device.

use crate::chipdb::{ChipConfig, DaMode};
use crate::error::{Error, ProtocolError, Result};
use crate::event::{CancelToken, Events};
use crate::proto::firehose::{Firehose, MemoryName, StorageInfo};
use crate::proto::preloader::{MtkDeviceInfo, Preloader};
use crate::proto::sahara;
use crate::proto::sprd::{SprdBoot, SprdDeviceInfo};
use crate::proto::xflash::{ConnectionAgent, Xflash, XflashDevInfo};
use crate::transport::Transport;

/// Watchdog disable word for MTK chips.
const MTK_WDT_DISABLE: u32 = 0x2200_0064;

/// Pipeline step, carried in [`Error::Upload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStep {
    Negotiate,
    DisableWatchdog,
    SendStage1,
    Jump,
    Sync,
    InitDram,
    SendStage2,
    InitDeviceInfo,
}

impl UploadStep {
    /// Whether a failure here is recoverable by power-cycling.
    pub fn recoverable_by_powercycle(&self) -> bool {
        matches!(
            self,
            UploadStep::Negotiate
                | UploadStep::DisableWatchdog
                | UploadStep::SendStage1
                | UploadStep::Jump
                | UploadStep::Sync
        )
    }
}

impl std::fmt::Display for UploadStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UploadStep::Negotiate => "negotiate",
            UploadStep::DisableWatchdog => "disable-watchdog",
            UploadStep::SendStage1 => "send-stage1",
            UploadStep::Jump => "jump",
            UploadStep::Sync => "sync",
            UploadStep::InitDram => "init-dram",
            UploadStep::SendStage2 => "send-stage2",
            UploadStep::InitDeviceInfo => "init-device-info",
        };
        f.write_str(s)
    }
}

fn step<T>(r: Result<T>, s: UploadStep) -> Result<T> {
    r.map_err(|e| e.during(s))
}

/// MTK loader images for the two stages.
pub struct MtkLoaders<'d> {
    pub stage1: &'d [u8],
    pub stage2: &'d [u8],
    /// Stage-1 signature length (zero for exploit-patched images).
    pub sig_len: u32,
    /// Preloader image to carve EMI settings from when booting via BROM.
    pub preloader: Option<&'d [u8]>,
}

/// Boot an MTK device from BROM/Preloader into a running XFlash DA.
///
/// The caller has already run the BROM handshake and read the device info
/// (that is how it selected `chip` and the loader binaries).
pub fn mtk_boot_to_da(
    transport: &mut dyn Transport,
    chip: &ChipConfig,
    info: &MtkDeviceInfo,
    loaders: &MtkLoaders<'_>,
    events: &Events,
    cancel: &CancelToken,
) -> Result<XflashDevInfo> {
    if chip.da_mode == DaMode::Legacy {
        return step(
            Err(ProtocolError::Unsupported("legacy DA protocol".into()).into()),
            UploadStep::Negotiate,
        );
    }

    events.info(format!(
        "booting {} ({}) into download agent",
        chip.name, chip.description
    ));

    {
        let mut brom = Preloader::new(transport);
        step(
            brom.write32(chip.watchdog_addr, MTK_WDT_DISABLE),
            UploadStep::DisableWatchdog,
        )?;
        step(
            brom.send_da(chip.da_payload_addr, loaders.sig_len, loaders.stage1),
            UploadStep::SendStage1,
        )?;
        step(brom.jump_da(chip.da_payload_addr), UploadStep::Jump)?;
    }

    let mut da = Xflash::new(transport);
    step(da.wait_sync(), UploadStep::Sync)?;

    let agent = step(da.get_connection_agent(), UploadStep::Sync)?;
    if agent == ConnectionAgent::Brom {
        // DRAM is untouched; feed the EMI settings before stage 2.
        let preloader = loaders.preloader.ok_or(Error::Upload {
            step: UploadStep::InitDram,
            source: Box::new(
                ProtocolError::Unsupported("EMI init requires a preloader image".into()).into(),
            ),
        })?;
        let emi = step(extract_emi(preloader), UploadStep::InitDram)?;
        events.debug(format!("sending EMI settings ({} bytes)", emi.len()));
        step(da.send_emi(&emi), UploadStep::InitDram)?;
    }

    step(
        da.boot_to(chip.stage2_addr, loaders.stage2),
        UploadStep::SendStage2,
    )?;
    step(da.wait_sync(), UploadStep::SendStage2)?;

    cancel.check(0)?;
    step(da.get_packet_length(), UploadStep::InitDeviceInfo)?;
    let dev_info = step(da.get_dev_info(), UploadStep::InitDeviceInfo)?;
    events.info(format!(
        "DA ready: storage type {}, {} byte blocks, user area {} bytes (hw {:04x}/{:04x})",
        dev_info.storage_type, dev_info.block_size, dev_info.user_size, info.hw_code, info.sw_ver
    ));
    Ok(dev_info)
}

/// Boot a Qualcomm EDL device through Sahara into a configured Firehose.
pub fn qc_boot_to_firehose(
    transport: &mut dyn Transport,
    programmer: &[u8],
    memory: MemoryName,
    events: &Events,
    cancel: &CancelToken,
) -> Result<(usize, Option<StorageInfo>)> {
    // Sahara covers negotiate/send/jump in one guided exchange.
    step(
        sahara::serve_programmer(transport, programmer, events, cancel),
        UploadStep::SendStage1,
    )?;

    let mut fh = Firehose::new(transport);
    // The programmer needs a moment to bring storage up; nop doubles as
    // the liveness sync.
    step(fh.nop().map(|_| ()), UploadStep::Sync)?;
    let payload = step(
        fh.configure(memory, fh.max_payload()),
        UploadStep::InitDeviceInfo,
    )?;
    let storage = step(fh.get_storage_info(0), UploadStep::InitDeviceInfo)?;
    if let Some(info) = &storage {
        events.info(format!(
            "firehose ready: {} blocks of {} bytes ({})",
            info.total_blocks, info.block_size, info.mem_type
        ));
    }
    Ok((payload, storage))
}

/// SPRD loader stage: image plus its load address.
pub struct SprdLoader<'d> {
    pub addr: u32,
    pub image: &'d [u8],
}

/// Boot a Unisoc device from the BootROM through FDL1 into FDL2.
pub fn sprd_boot_to_fdl2(
    transport: &mut dyn Transport,
    fdl1: &SprdLoader<'_>,
    fdl2: &SprdLoader<'_>,
    baud: Option<u32>,
    events: &Events,
    cancel: &CancelToken,
) -> Result<SprdDeviceInfo> {
    let mut bsl = SprdBoot::new(transport);

    let boot_ver = step(bsl.connect(), UploadStep::Negotiate)?;
    events.info(format!("BootROM: {boot_ver}"));

    step(
        bsl.send_and_exec_loader(fdl1.addr, fdl1.image, cancel, &mut |_| {}),
        UploadStep::SendStage1,
    )?;

    // FDL1 answers the same CONNECT at a higher capability level.
    let fdl1_ver = step(bsl.connect(), UploadStep::Sync)?;
    events.debug(format!("FDL1: {fdl1_ver}"));
    if let Some(baud) = baud {
        step(bsl.change_baud(baud), UploadStep::Sync)?;
    }

    step(
        bsl.send_and_exec_loader(fdl2.addr, fdl2.image, cancel, &mut |_| {}),
        UploadStep::SendStage2,
    )?;
    let fdl2_ver = step(bsl.connect(), UploadStep::InitDeviceInfo)?;
    events.info(format!("FDL2: {fdl2_ver}"));

    Ok(SprdDeviceInfo {
        boot_ver,
        chip_name: fdl2_ver,
    })
}

/// Tag introducing the EMI container inside a preloader image.
const EMI_TAG: &[u8] = b"MTK_BLOADER_INFO_v";

/// Container header: tag, 2-byte version, 10 reserved bytes, then a
/// little-endian byte count of the settings blob that follows.
const EMI_HEADER_LEN: usize = EMI_TAG.len() + 2 + 10 + 4;

/// Carve the EMI (DRAM controller) settings blob out of a preloader image.
pub fn extract_emi(preloader: &[u8]) -> Result<Vec<u8>> {
    let tag_at = preloader
        .windows(EMI_TAG.len())
        .position(|w| w == EMI_TAG)
        .ok_or_else(|| {
            Error::from(ProtocolError::Unsupported(
                "preloader has no MTK_BLOADER_INFO block".into(),
            ))
        })?;
    let len_at = tag_at + EMI_HEADER_LEN - 4;
    let header_end = tag_at + EMI_HEADER_LEN;
    if preloader.len() < header_end {
        return Err(ProtocolError::Unsupported("truncated EMI header".into()).into());
    }
    let blob_len =
        u32::from_le_bytes(preloader[len_at..len_at + 4].try_into().unwrap()) as usize;
    if blob_len == 0 || preloader.len() < header_end + blob_len {
        return Err(ProtocolError::Unsupported("truncated EMI settings".into()).into());
    }
    Ok(preloader[header_end..header_end + blob_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preloader_with_emi(pad_before: usize, emi: &[u8]) -> Vec<u8> {
        let mut image = vec![0xFFu8; pad_before];
        image.extend_from_slice(EMI_TAG);
        image.extend_from_slice(b"20"); // version
        image.extend_from_slice(&[0u8; 10]);
        image.extend_from_slice(&(emi.len() as u32).to_le_bytes());
        image.extend_from_slice(emi);
        image.extend_from_slice(&[0u8; 64]); // trailing padding
        image
    }

    #[test]
    fn emi_extraction_ignores_padding() {
        let emi: Vec<u8> = (0u8..=0xFF).cycle().take(0x200).collect();
        for pad in [0usize, 1, 0x1000] {
            let image = preloader_with_emi(pad, &emi);
            assert_eq!(extract_emi(&image).unwrap(), emi, "pad {pad}");
        }
    }

    #[test]
    fn missing_emi_tag_is_an_error() {
        assert!(extract_emi(&[0u8; 1024]).is_err());
    }

    #[test]
    fn truncated_emi_is_an_error() {
        let emi = vec![0xAA; 0x100];
        let mut image = preloader_with_emi(0, &emi);
        image.truncate(image.len() - 0x120);
        assert!(extract_emi(&image).is_err());
    }

    #[test]
    fn step_recoverability_split() {
        assert!(UploadStep::Sync.recoverable_by_powercycle());
        assert!(UploadStep::SendStage1.recoverable_by_powercycle());
        assert!(!UploadStep::InitDram.recoverable_by_powercycle());
        assert!(!UploadStep::SendStage2.recoverable_by_powercycle());
    }
}
