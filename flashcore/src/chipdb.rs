// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-chip configuration, keyed by the BROM hardware code.
//!
//! Read-only after program start; sessions hold a `&'static` entry and the
//! entry never changes once the session reaches Ready.

/// Which download-agent protocol generation the chip speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaMode {
    /// Pre-2018 DA framing. Not spoken by this engine.
    Legacy,
    XFlash,
}

/// Exploit known to work against the chip's BROM, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExploitKind {
    None,
    Kamakiri,
    Amonet,
    Carbonara,
    Hashimoto,
}

/// One row of the chip database.
#[derive(Debug, Clone)]
pub struct ChipConfig {
    pub hw_code: u16,
    pub name: &'static str,
    pub description: &'static str,
    pub watchdog_addr: u32,
    pub uart0_addr: u32,
    pub sej_base: Option<u32>,
    pub cqdma_base: Option<u32>,
    pub gcpu_base: Option<u32>,
    pub dxcc_base: Option<u32>,
    /// SRAM address stage-1 DAs are loaded at.
    pub da_payload_addr: u32,
    /// DRAM address the XFlash stage 2 boots from.
    pub stage2_addr: u64,
    /// CQDMA bounce buffer inside always-writable SRAM.
    pub scratch_addr: u32,
    /// Addresses of the security blacklist entry arrays.
    pub blacklist_addrs: &'static [u32],
    pub da_mode: DaMode,
    pub recommended_exploit: ExploitKind,
}

pub fn by_hw_code(hw_code: u16) -> Option<&'static ChipConfig> {
    CHIPS.iter().find(|c| c.hw_code == hw_code)
}

pub fn all() -> &'static [ChipConfig] {
    CHIPS
}

macro_rules! chip {
    ($hw:expr, $name:expr, $desc:expr, wdt $wdt:expr, uart $uart:expr,
     sej $sej:expr, cqdma $cqdma:expr, gcpu $gcpu:expr, dxcc $dxcc:expr,
     da $da:expr, stage2 $s2:expr, scratch $scratch:expr,
     blacklist $bl:expr, $mode:ident, $exploit:ident) => {
        ChipConfig {
            hw_code: $hw,
            name: $name,
            description: $desc,
            watchdog_addr: $wdt,
            uart0_addr: $uart,
            sej_base: $sej,
            cqdma_base: $cqdma,
            gcpu_base: $gcpu,
            dxcc_base: $dxcc,
            da_payload_addr: $da,
            stage2_addr: $s2,
            scratch_addr: $scratch,
            blacklist_addrs: $bl,
            da_mode: DaMode::$mode,
            recommended_exploit: ExploitKind::$exploit,
        }
    };
}

static CHIPS: &[ChipConfig] = &[
    chip!(0x6572, "mt6572", "entry dual-core (2013)",
        wdt 0x10007000, uart 0x11005000,
        sej None, cqdma None, gcpu None, dxcc None,
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_0A00,
        blacklist &[], Legacy, None),
    chip!(0x6580, "mt6580", "entry quad-core (2015)",
        wdt 0x10007000, uart 0x11005000,
        sej Some(0x1000A000), cqdma None, gcpu Some(0x10216000), dxcc None,
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_0A00,
        blacklist &[0x0010_2868], Legacy, Amonet),
    chip!(0x0321, "mt6735", "Helio entry (2015)",
        wdt 0x10212000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10217C00), gcpu Some(0x10216000), dxcc None,
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_0A00,
        blacklist &[0x0010_2868], XFlash, Hashimoto),
    chip!(0x0335, "mt6737", "Helio entry (2016)",
        wdt 0x10212000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10217C00), gcpu Some(0x10216000), dxcc None,
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_0A00,
        blacklist &[0x0010_2868], XFlash, Hashimoto),
    chip!(0x0699, "mt6739", "entry LTE (2017)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10212000), gcpu None, dxcc None,
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_2460,
        blacklist &[0x0010_2830], XFlash, Kamakiri),
    chip!(0x0717, "mt6761", "Helio A22 (2018)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10212000), gcpu None, dxcc None,
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_2460,
        blacklist &[0x0010_2830], XFlash, Kamakiri),
    chip!(0x0766, "mt6765", "Helio P35 (2018)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10212000), gcpu None, dxcc None,
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_2460,
        blacklist &[0x0010_2834], XFlash, Kamakiri),
    chip!(0x0707, "mt6768", "Helio P65/G85 (2019)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10212000), gcpu None, dxcc Some(0x10210000),
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_2460,
        blacklist &[0x0010_2834], XFlash, Kamakiri),
    chip!(0x0788, "mt6771", "Helio P60 (2018)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10212000), gcpu Some(0x10050000), dxcc Some(0x10210000),
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_2460,
        blacklist &[0x0010_2830, 0x0010_6A60], XFlash, Hashimoto),
    chip!(0x0813, "mt6785", "Helio G90 (2019)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10212000), gcpu None, dxcc Some(0x10210000),
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_2460,
        blacklist &[0x0010_2834], XFlash, Kamakiri),
    chip!(0x0996, "mt6853", "Dimensity 720 (2020)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10212000), gcpu None, dxcc Some(0x10210000),
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_2460,
        blacklist &[0x0010_2838], XFlash, Carbonara),
    chip!(0x0886, "mt6873", "Dimensity 800 (2020)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10212000), gcpu None, dxcc Some(0x10210000),
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_2460,
        blacklist &[0x0010_2838], XFlash, Carbonara),
    chip!(0x0950, "mt6885", "Dimensity 1000 (2020)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma Some(0x10212000), gcpu None, dxcc Some(0x10210000),
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_2460,
        blacklist &[0x0010_2838], XFlash, Carbonara),
    chip!(0x8173, "mt8173", "tablet/Chromebook SoC (2015)",
        wdt 0x10007000, uart 0x11002000,
        sej Some(0x1000A000), cqdma None, gcpu Some(0x10216000), dxcc None,
        da 0x0020_0000, stage2 0x4000_0000, scratch 0x0010_0A00,
        blacklist &[], XFlash, None),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_hw_code() {
        let chip = by_hw_code(0x0766).unwrap();
        assert_eq!(chip.name, "mt6765");
        assert_eq!(chip.recommended_exploit, ExploitKind::Kamakiri);
        assert!(by_hw_code(0xFFFF).is_none());
    }

    #[test]
    fn hw_codes_are_unique() {
        for (i, a) in all().iter().enumerate() {
            for b in &all()[i + 1..] {
                assert_ne!(a.hw_code, b.hw_code, "{} vs {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn exploit_targets_have_the_engine_they_need() {
        for chip in all() {
            match chip.recommended_exploit {
                ExploitKind::Hashimoto => assert!(chip.cqdma_base.is_some(), "{}", chip.name),
                ExploitKind::Amonet => assert!(chip.gcpu_base.is_some(), "{}", chip.name),
                ExploitKind::Carbonara => assert!(chip.sej_base.is_some(), "{}", chip.name),
                _ => {}
            }
        }
    }
}
