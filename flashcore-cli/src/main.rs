// SPDX-FileCopyrightText: 2025 The flashcore Authors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reference command line for the flashcore engine: one subcommand tree
//! per vendor, file handling and confirmation prompts here, everything
//! protocol-shaped in the library.

use std::fs;
use std::io::{stdin, stdout, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use flashcore::auth::{AuthArtifacts, AuthStrategy, StandardAuth, VipAuth, XiaomiAuth};
use flashcore::pipeline::{MtkLoaders, SprdLoader};
use flashcore::proto::firehose::MemoryName;
use flashcore::storage::pac::Pac;
use flashcore::superdef::SuperDef;
use flashcore::{Event, SerialTransport, Session, Slot, Vendor};

#[derive(Parser)]
#[command(name = "flashcore", version, about = "Flash and recover Android devices over EDL, BROM and FDL")]
struct Cli {
    #[command(subcommand)]
    vendor: VendorCmd,
}

#[derive(Subcommand)]
enum VendorCmd {
    /// Qualcomm EDL (Sahara + Firehose)
    Qualcomm {
        #[command(flatten)]
        common: Common,
        /// Firehose programmer ELF
        #[arg(long)]
        loader: PathBuf,
        /// Storage medium
        #[arg(long, default_value = "ufs")]
        memory: String,
        /// VIP digest file
        #[arg(long)]
        digest: Option<PathBuf>,
        /// VIP signature file
        #[arg(long)]
        signature: Option<PathBuf>,
        /// Try the Xiaomi MiAuth bypass before standard auth
        #[arg(long)]
        miauth: bool,
        #[command(subcommand)]
        cmd: QualcommCmd,
    },
    /// MediaTek BROM / Preloader
    Mtk {
        #[command(flatten)]
        common: Common,
        /// Stage-1 download agent (not needed for dump-brom)
        #[arg(long)]
        loader: Option<PathBuf>,
        /// Stage-2 download agent (not needed for dump-brom)
        #[arg(long)]
        da2: Option<PathBuf>,
        /// Preloader image (EMI source when booting from BROM)
        #[arg(long)]
        preloader: Option<PathBuf>,
        #[command(subcommand)]
        cmd: MtkCmd,
    },
    /// Unisoc/Spreadtrum BootROM + FDL
    Unisoc {
        #[command(flatten)]
        common: Common,
        /// Firmware package (PAC)
        #[arg(long)]
        pac: PathBuf,
        #[command(subcommand)]
        cmd: UnisocCmd,
    },
}

#[derive(Args)]
struct Common {
    /// Serial/USB device path, e.g. /dev/ttyUSB0 or COM4
    #[arg(short, long)]
    port: String,
    #[arg(short, long, default_value_t = 115_200)]
    baudrate: u32,
    /// Skip the confirmation prompt for destructive operations
    #[arg(short = 'y', long)]
    yes: bool,
}

#[derive(Subcommand)]
enum QualcommCmd {
    /// Write a partition from a file (raw or Android-sparse)
    Flash {
        #[arg(long)]
        partition: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        slot: Option<Slot>,
    },
    /// Dump a partition to a file
    Read {
        #[arg(long)]
        partition: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        slot: Option<Slot>,
    },
    /// Erase a partition
    Erase {
        #[arg(long)]
        partition: String,
        #[arg(long)]
        slot: Option<Slot>,
    },
    /// Flash a dynamic-partition set from a super_def JSON
    FlashSuper {
        /// super_def.<nv>.json
        #[arg(long)]
        def: PathBuf,
    },
    /// Print the partition table
    Partitions,
}

#[derive(Subcommand)]
enum MtkCmd {
    Flash {
        #[arg(long)]
        partition: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        slot: Option<Slot>,
    },
    Read {
        #[arg(long)]
        partition: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        slot: Option<Slot>,
    },
    Erase {
        #[arg(long)]
        partition: String,
        #[arg(long)]
        slot: Option<Slot>,
    },
    /// Dump the BootROM region to a file
    DumpBrom {
        #[arg(long)]
        file: PathBuf,
    },
    Partitions,
}

#[derive(Subcommand)]
enum UnisocCmd {
    /// Flash every partition listed in the PAC
    Flash,
    /// Back up the PAC-listed partitions into a directory
    Backup {
        #[arg(long, default_value = "backup")]
        outdir: PathBuf,
    },
}

fn main() {
    pretty_env_logger::formatted_builder()
        .parse_filters(
            &std::env::var("FLASHCORE_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
        )
        .init();

    if let Err(e) = run(Cli::parse()) {
        log::error!("{e}");
        exit(1);
    }
}

fn event_hook() -> flashcore::EventHook {
    Arc::new(|event: Event| match event {
        Event::Progress { current, total } if total > 0 => {
            print!("\r  {current}/{total} bytes ({}%)", current * 100 / total);
            let _ = stdout().flush();
            if current == total {
                println!();
            }
        }
        Event::StateChanged(state) => log::debug!("session state: {state:?}"),
        _ => {}
    })
}

fn confirm(common: &Common, action: &str) {
    if common.yes {
        return;
    }
    print!("{action} - continue? [y/N] ");
    let _ = stdout().flush();
    let mut answer = String::new();
    let _ = stdin().lock().read_line(&mut answer);
    if !matches!(answer.trim(), "y" | "Y" | "yes") {
        println!("aborted");
        exit(0);
    }
}

fn open_session(vendor: Vendor, common: &Common) -> flashcore::Result<Session> {
    let transport = SerialTransport::open(&common.port, common.baudrate)?;
    Ok(Session::new(vendor, Box::new(transport), Some(event_hook())))
}

fn read_file(path: &Path) -> flashcore::Result<Vec<u8>> {
    fs::read(path).map_err(|e| flashcore::error::TransportError::Io(e).into())
}

fn print_partitions(session: &Session) {
    println!("{:<24} {:>4} {:>12} {:>14} {:>6}", "name", "lun", "start", "size", "ssize");
    for p in session.partitions().records() {
        println!(
            "{:<24} {:>4} {:>12} {:>14} {:>6}",
            p.name,
            p.lun,
            p.start_sector,
            p.size(),
            p.sector_size
        );
    }
}

fn run(cli: Cli) -> flashcore::Result<()> {
    match cli.vendor {
        VendorCmd::Qualcomm {
            common,
            loader,
            memory,
            digest,
            signature,
            miauth,
            cmd,
        } => {
            let programmer = read_file(&loader)?;
            let memory = match memory.to_ascii_lowercase().as_str() {
                "emmc" => MemoryName::Emmc,
                "nand" => MemoryName::Nand,
                "nor" => MemoryName::Nor,
                _ => MemoryName::Ufs,
            };
            let artifacts = AuthArtifacts {
                digest: digest.as_deref().map(read_file).transpose()?,
                signature: signature.as_deref().map(read_file).transpose()?,
                ..Default::default()
            };
            let mut strategies: Vec<Box<dyn AuthStrategy>> = Vec::new();
            if artifacts.digest.is_some() {
                strategies.push(Box::new(VipAuth));
            }
            if miauth {
                strategies.push(Box::new(XiaomiAuth::new()));
            }
            strategies.push(Box::new(StandardAuth));

            let mut session = open_session(Vendor::Qualcomm, &common)?;
            session.connect_qualcomm(&programmer, memory, &mut strategies, &artifacts)?;

            let result = match cmd {
                QualcommCmd::Partitions => {
                    print_partitions(&session);
                    Ok(())
                }
                QualcommCmd::Read {
                    partition,
                    file,
                    slot,
                } => dump_partition(&mut session, &partition, slot, &file),
                QualcommCmd::Flash {
                    partition,
                    file,
                    slot,
                } => {
                    confirm(&common, &format!("flash {partition} from {}", file.display()));
                    let data = read_file(&file)?;
                    session.write_partition(&partition, slot, &data)
                }
                QualcommCmd::Erase { partition, slot } => {
                    confirm(&common, &format!("erase {partition}"));
                    session.erase_partition(&partition, slot)
                }
                QualcommCmd::FlashSuper { def } => {
                    let def_text = String::from_utf8_lossy(&read_file(&def)?).into_owned();
                    let plan = SuperDef::parse(&def_text)?;
                    confirm(
                        &common,
                        &format!("flash {} super children", plan.partitions.len()),
                    );
                    let base = def.parent().unwrap_or(Path::new(".")).to_path_buf();
                    let statuses = session.flash_super(&plan, &mut |path| {
                        read_file(&base.join(path))
                    })?;
                    for s in &statuses {
                        match &s.result {
                            Ok(()) => println!("  {:<24} ok", s.name),
                            Err(e) => println!("  {:<24} FAILED: {e}", s.name),
                        }
                    }
                    Ok(())
                }
            };
            session.disconnect();
            result
        }
        VendorCmd::Mtk {
            common,
            loader,
            da2,
            preloader,
            cmd,
        } => {
            // BROM dumping talks to the mask ROM directly; no DA boot.
            if let MtkCmd::DumpBrom { file } = &cmd {
                return dump_brom(&common, file);
            }

            let (Some(loader), Some(da2)) = (loader, da2) else {
                log::error!("--loader and --da2 are required for this command");
                exit(2);
            };
            let stage1 = read_file(&loader)?;
            let stage2 = read_file(&da2)?;
            let preloader_data = preloader.as_deref().map(read_file).transpose()?;
            let loaders = MtkLoaders {
                stage1: &stage1,
                stage2: &stage2,
                sig_len: 0,
                preloader: preloader_data.as_deref(),
            };

            let mut session = open_session(Vendor::Mediatek, &common)?;
            session.connect_mediatek(&loaders)?;

            let result = match cmd {
                MtkCmd::Partitions => {
                    print_partitions(&session);
                    Ok(())
                }
                MtkCmd::Read {
                    partition,
                    file,
                    slot,
                } => dump_partition(&mut session, &partition, slot, &file),
                MtkCmd::Flash {
                    partition,
                    file,
                    slot,
                } => {
                    confirm(&common, &format!("flash {partition} from {}", file.display()));
                    let data = read_file(&file)?;
                    session.write_partition(&partition, slot, &data)
                }
                MtkCmd::Erase { partition, slot } => {
                    confirm(&common, &format!("erase {partition}"));
                    session.erase_partition(&partition, slot)
                }
                MtkCmd::DumpBrom { .. } => unreachable!("handled before DA boot"),
            };
            session.disconnect();
            result
        }
        VendorCmd::Unisoc { common, pac, cmd } => {
            let pac_data = read_file(&pac)?;
            let toc = Pac::parse(&pac_data)?;
            let fdl1_entry = toc
                .find("FDL")
                .ok_or(flashcore::error::StorageError::PartitionNotFound("FDL".into()))?
                .clone();
            let fdl2_entry = toc
                .find("FDL2")
                .ok_or(flashcore::error::StorageError::PartitionNotFound("FDL2".into()))?
                .clone();
            let fdl1 = SprdLoader {
                addr: fdl1_entry.base_addr as u32,
                image: toc.entry_data(&pac_data, &fdl1_entry),
            };
            let fdl2 = SprdLoader {
                addr: fdl2_entry.base_addr as u32,
                image: toc.entry_data(&pac_data, &fdl2_entry),
            };

            let mut session = open_session(Vendor::Unisoc, &common)?;
            session.connect_unisoc(&fdl1, &fdl2, &toc)?;

            let result = match cmd {
                UnisocCmd::Flash => {
                    confirm(&common, "flash all PAC partitions");
                    let mut failed = 0;
                    for record in session.partitions().records().to_vec() {
                        let entry = toc.find(&record.name).expect("record from TOC");
                        let data = toc.entry_data(&pac_data, entry).to_vec();
                        println!("flashing {} ({} bytes)", record.name, data.len());
                        if let Err(e) = session.write_partition(&record.name, None, &data) {
                            log::error!("{}: {e}", record.name);
                            failed += 1;
                        }
                    }
                    if failed > 0 {
                        log::warn!("{failed} partitions failed");
                    }
                    Ok(())
                }
                UnisocCmd::Backup { outdir } => {
                    fs::create_dir_all(&outdir)
                        .map_err(flashcore::error::TransportError::Io)?;
                    for record in session.partitions().records().to_vec() {
                        let path = outdir.join(format!("{}.img", record.name));
                        println!("backing up {} -> {}", record.name, path.display());
                        dump_partition(&mut session, &record.name, None, &path)?;
                    }
                    Ok(())
                }
            };
            session.disconnect();
            result
        }
    }
}

/// Dump the 128 KiB mask-ROM region word by word over the BROM's own
/// read primitive.
fn dump_brom(common: &Common, file: &Path) -> flashcore::Result<()> {
    use flashcore::proto::preloader::Preloader;
    use flashcore::Transport;

    const BROM_BASE: u32 = 0x0000_0000;
    const BROM_LEN: u32 = 0x0002_0000;
    const WORDS_PER_READ: u32 = 64;

    let mut transport = SerialTransport::open(&common.port, common.baudrate)?;
    let mut brom = Preloader::new(&mut transport);
    brom.handshake()?;
    let hw_code = brom.get_hw_code()?;
    println!("hw code {hw_code:#06x}, dumping {BROM_LEN:#x} bytes of BROM");

    let mut sink = fs::File::create(file).map_err(flashcore::error::TransportError::Io)?;
    let mut addr = BROM_BASE;
    while addr < BROM_BASE + BROM_LEN {
        let words = brom.read32_multi(addr, WORDS_PER_READ)?;
        for w in words {
            sink.write_all(&w.to_le_bytes())
                .map_err(flashcore::error::TransportError::Io)?;
        }
        addr += WORDS_PER_READ * 4;
    }
    transport.flush()?;
    println!("wrote {BROM_LEN:#x} bytes to {}", file.display());
    Ok(())
}

fn dump_partition(
    session: &mut Session,
    partition: &str,
    slot: Option<Slot>,
    file: &Path,
) -> flashcore::Result<()> {
    let mut sink =
        fs::File::create(file).map_err(flashcore::error::TransportError::Io)?;
    let n = session.read_partition(partition, slot, &mut sink)?;
    sink.flush().map_err(flashcore::error::TransportError::Io)?;
    println!("wrote {n} bytes to {}", file.display());
    Ok(())
}
