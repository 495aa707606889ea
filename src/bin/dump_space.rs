use retro_membus::SpaceSnapshot;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

// Hex dump of a saved address-space snapshot.
// Usage:
//   cargo run --release --bin dump_space -- nvram.snap --start 0x0000 --len 0x0200
//   cargo run --release --bin dump_space -- mmu.snap --bank 3 --nonzero
//   cargo run --release --bin dump_space -- mmu.snap --shared
// A banked snapshot without --bank/--shared dumps what the window shows:
// the selected bank with the shared store laid over its shared region.
// DUMP_START and DUMP_LEN can stand in for --start and --len.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
    Window,
    Bank(usize),
    Shared,
}

struct Args {
    path: PathBuf,
    start: u32,
    len: u32,
    selection: Selection,
    nonzero_only: bool,
}

/// Bytes chosen for dumping, with the label printed in the header.
#[derive(Debug, PartialEq, Eq)]
struct View {
    label: String,
    bytes: Vec<u8>,
}

fn parse_u32_hex_or_dec(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(stripped, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_args() -> Result<Args, String> {
    let mut args = env::args().skip(1);
    let mut path: Option<PathBuf> = None;
    let mut start: Option<u32> = None;
    let mut len: Option<u32> = None;
    let mut selection = Selection::Window;
    let mut nonzero_only = false;

    while let Some(a) = args.next() {
        match a.as_str() {
            "--start" => {
                let v = args.next().ok_or("--start needs a value")?;
                start = Some(parse_u32_hex_or_dec(&v).ok_or_else(|| format!("bad start: {v}"))?);
            }
            "--len" | "--length" => {
                let v = args.next().ok_or("--len needs a value")?;
                len = Some(parse_u32_hex_or_dec(&v).ok_or_else(|| format!("bad length: {v}"))?);
            }
            "--bank" => {
                let v = args.next().ok_or("--bank needs a value")?;
                let bank = parse_u32_hex_or_dec(&v).ok_or_else(|| format!("bad bank: {v}"))?;
                selection = Selection::Bank(bank as usize);
            }
            "--shared" => {
                selection = Selection::Shared;
            }
            "--nonzero" | "--nz" => {
                nonzero_only = true;
            }
            _ => {
                if path.is_none() {
                    path = Some(PathBuf::from(&a));
                }
            }
        }
    }

    let path = path.ok_or("snapshot path is required")?;
    let start = start
        .or_else(|| {
            env::var("DUMP_START")
                .ok()
                .and_then(|s| parse_u32_hex_or_dec(&s))
        })
        .unwrap_or(0x0000);
    let len = len
        .or_else(|| {
            env::var("DUMP_LEN")
                .ok()
                .and_then(|s| parse_u32_hex_or_dec(&s))
        })
        .unwrap_or(0x0200);

    Ok(Args {
        path,
        start,
        len,
        selection,
        nonzero_only,
    })
}

fn select(snapshot: &SpaceSnapshot, selection: Selection) -> Result<View, String> {
    let banked = !snapshot.banks.is_empty();
    match selection {
        Selection::Window if !banked => Ok(View {
            label: snapshot.label.clone(),
            bytes: snapshot.bytes.clone(),
        }),
        Selection::Window => {
            let bank = snapshot.bank.unwrap_or(0);
            let mut view = select(snapshot, Selection::Bank(bank))?;
            if let Some(shared) = &snapshot.shared {
                let start = snapshot.shared_start.ok_or_else(|| {
                    format!("`{}` does not record where its shared region starts", snapshot.label)
                })? as usize;
                let end = start.saturating_add(shared.bytes.len());
                let window = view.bytes.get_mut(start..end).ok_or_else(|| {
                    format!(
                        "shared region 0x{:05X}..0x{:05X} of `{}` exceeds its window",
                        start, end, snapshot.label
                    )
                })?;
                window.copy_from_slice(&shared.bytes);
            }
            view.label = format!("{} (bank {})", snapshot.label, bank);
            Ok(view)
        }
        Selection::Bank(n) => snapshot
            .banks
            .get(n)
            .map(|bank| View {
                label: bank.label.clone(),
                bytes: bank.bytes.clone(),
            })
            .ok_or_else(|| {
                format!(
                    "`{}` has {} banks, no bank {}",
                    snapshot.label,
                    snapshot.banks.len(),
                    n
                )
            }),
        Selection::Shared => snapshot
            .shared
            .as_ref()
            .map(|shared| View {
                label: shared.label.clone(),
                bytes: shared.bytes.clone(),
            })
            .ok_or_else(|| format!("`{}` has no shared region", snapshot.label)),
    }
}

fn dump(view: &View, start: u32, len: u32, nonzero_only: bool) {
    let bytes = &view.bytes;
    let end = (start as usize).saturating_add(len as usize).min(bytes.len());
    println!(
        "`{}` dump: start=0x{:05X} len=0x{:04X}{}",
        view.label,
        start,
        end - start as usize,
        if nonzero_only { " [nonzero only]" } else { "" }
    );

    let mut addr = start as usize;
    while addr < end {
        let line_end = (addr + 16).min(end);
        let line = &bytes[addr..line_end];
        if !nonzero_only || line.iter().any(|&b| b != 0) {
            print!("{:05X}:", addr);
            for b in line {
                print!(" {:02X}", b);
            }
            println!();
        }
        addr = line_end;
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: dump_space <file> [--start N] [--len N] [--bank N | --shared] [--nonzero]");
            return ExitCode::FAILURE;
        }
    };

    let snapshot = match SpaceSnapshot::load_from_file(&args.path) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("failed to load {}: {}", args.path.display(), e);
            return ExitCode::FAILURE;
        }
    };
    log::debug!(
        "loaded `{}` (version {}, {} bytes, {} banks)",
        snapshot.label,
        snapshot.version,
        snapshot.bytes.len(),
        snapshot.banks.len()
    );
    if let Some(bank) = snapshot.bank {
        println!("selected bank: {}", bank);
    }

    let view = match select(&snapshot, args.selection) {
        Ok(view) => view,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if args.start as usize >= view.bytes.len() {
        eprintln!(
            "start 0x{:05X} is outside `{}` (0x{:05X} bytes)",
            args.start,
            view.label,
            view.bytes.len()
        );
        return ExitCode::FAILURE;
    }
    dump(&view, args.start, args.len, args.nonzero_only);
    ExitCode::SUCCESS
}
