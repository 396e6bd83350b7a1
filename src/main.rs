//! nohats CLI - Command-line tool for inspecting and patching Dota 2 game files.
//!
//! This is the main entry point for the nohats command-line application.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn, LevelFilter};

use nohats::prelude::*;
use nohats::vsif::unknown_scene_name;

/// nohats - Dota 2 game file inspection and patching tool
#[derive(Parser)]
#[command(name = "nohats")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug output (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump a PCF particle file as JSON
    PcfDump {
        /// Input PCF file
        #[arg(short, long, env = "NOHATS_INPUT")]
        input: PathBuf,

        /// Output JSON file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the particle systems defined in a PCF file
    PcfSystems {
        /// Input PCF file
        #[arg(short, long, env = "NOHATS_INPUT")]
        input: PathBuf,
    },

    /// Minimize a PCF file and rebuild it, optionally swapping systems
    PcfRebuild {
        /// Input PCF file
        #[arg(short, long, env = "NOHATS_INPUT")]
        input: PathBuf,

        /// Output PCF file
        #[arg(short, long, env = "NOHATS_OUTPUT")]
        output: PathBuf,

        /// PCF file providing replacement systems
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// `SYSTEM=SOURCE_SYSTEM` to copy a system from --source, or
        /// `SYSTEM` alone to empty it
        #[arg(short, long)]
        replace: Vec<String>,
    },

    /// Dump a ScaleForm movie as JSON
    SwfDump {
        /// Input movie
        #[arg(short, long, env = "NOHATS_INPUT")]
        input: PathBuf,

        /// Output JSON file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only list top-level tag codes
        #[arg(short, long)]
        tags: bool,
    },

    /// Re-encode a ScaleForm movie, optionally patching method bytecode
    SwfRepack {
        /// Input movie
        #[arg(short, long, env = "NOHATS_INPUT")]
        input: PathBuf,

        /// Output movie
        #[arg(short, long, env = "NOHATS_OUTPUT")]
        output: PathBuf,

        /// `Instance.method` whose bytecode is patched
        #[arg(short, long, requires_all = ["find", "replace"])]
        method: Option<String>,

        /// Bytecode to find, in hex
        #[arg(long)]
        find: Option<String>,

        /// Replacement bytecode, in hex
        #[arg(long)]
        replace: Option<String>,

        /// Maximum number of replacements
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List contents of a VPK archive
    VpkList {
        /// Path to the `_dir.vpk` file
        #[arg(short = 'p', long, env = "NOHATS_INPUT")]
        vpk: PathBuf,

        /// Filter pattern (glob-style)
        #[arg(short, long)]
        filter: Option<String>,

        /// Show detailed information
        #[arg(short, long)]
        detailed: bool,

        /// Check every listed entry against its CRC
        #[arg(long)]
        verify: bool,
    },

    /// Extract files from a VPK archive
    VpkExtract {
        /// Path to the `_dir.vpk` file
        #[arg(short = 'p', long, env = "NOHATS_INPUT")]
        vpk: PathBuf,

        /// Output directory
        #[arg(short, long, env = "NOHATS_OUTPUT")]
        output: PathBuf,

        /// Filter pattern (glob-style)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Dump a model header as JSON
    MdlDump {
        /// Input MDL file
        #[arg(short, long, env = "NOHATS_INPUT")]
        input: PathBuf,

        /// Output JSON file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print sequences and skin families instead of the full header
        #[arg(short, long)]
        summary: bool,
    },

    /// Extract the compiled scenes of a scene image
    VsifExtract {
        /// Input scene image (`scenes.image`)
        #[arg(short, long, env = "NOHATS_INPUT")]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, env = "NOHATS_OUTPUT")]
        output: PathBuf,

        /// Text file with known scene names, one per line
        #[arg(short, long)]
        names: Option<PathBuf>,
    },

    /// Reformat a KeyValues text file
    VdfFormat {
        /// Input KeyValues file
        #[arg(short, long, env = "NOHATS_INPUT")]
        input: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write JSON instead of KeyValues
        #[arg(short, long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Commands::PcfDump { input, output } => {
            cmd_pcf_dump(&input, output.as_deref())?;
        }
        Commands::PcfSystems { input } => {
            cmd_pcf_systems(&input)?;
        }
        Commands::PcfRebuild {
            input,
            output,
            source,
            replace,
        } => {
            cmd_pcf_rebuild(&input, &output, source.as_deref(), &replace)?;
        }
        Commands::SwfDump { input, output, tags } => {
            cmd_swf_dump(&input, output.as_deref(), tags)?;
        }
        Commands::SwfRepack {
            input,
            output,
            method,
            find,
            replace,
            limit,
        } => {
            let patch = match (method, find, replace) {
                (Some(method), Some(find), Some(replace)) => Some(MethodPatch {
                    method,
                    find: parse_hex(&find).context("Invalid --find bytes")?,
                    replace: parse_hex(&replace).context("Invalid --replace bytes")?,
                    limit,
                }),
                _ => None,
            };
            cmd_swf_repack(&input, &output, patch)?;
        }
        Commands::VpkList {
            vpk,
            filter,
            detailed,
            verify,
        } => {
            cmd_vpk_list(&vpk, filter.as_deref(), detailed, verify)?;
        }
        Commands::VpkExtract { vpk, output, filter } => {
            cmd_vpk_extract(&vpk, &output, filter.as_deref())?;
        }
        Commands::MdlDump {
            input,
            output,
            summary,
        } => {
            cmd_mdl_dump(&input, output.as_deref(), summary)?;
        }
        Commands::VsifExtract {
            input,
            output,
            names,
        } => {
            cmd_vsif_extract(&input, &output, names.as_deref())?;
        }
        Commands::VdfFormat {
            input,
            output,
            json,
        } => {
            cmd_vdf_format(&input, output.as_deref(), json)?;
        }
    }

    Ok(())
}

/// Write pretty JSON to `output`, or stdout.
fn write_json(value: &serde_json::Value, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
            info!("Wrote {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, value)?;
            writeln!(lock)?;
        }
    }
    Ok(())
}

fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))
}

fn cmd_pcf_dump(input: &Path, output: Option<&Path>) -> Result<()> {
    let pcf = Pcf::open(input).context("Failed to read PCF file")?;
    write_json(&serde_json::to_value(pcf.value())?, output)
}

fn cmd_pcf_systems(input: &Path) -> Result<()> {
    let pcf = Pcf::open(input).context("Failed to read PCF file")?;
    for name in pcf.element_names(PARTICLE_SYSTEM)? {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_pcf_rebuild(
    input: &Path,
    output: &Path,
    source: Option<&Path>,
    replace: &[String],
) -> Result<()> {
    let start = Instant::now();
    let mut pcf = Pcf::open(input).context("Failed to read PCF file")?;
    let source = source
        .map(|path| Pcf::open(path).context("Failed to read source PCF file"))
        .transpose()?;

    pcf.minimize()?;

    for spec in replace {
        match spec.split_once('=') {
            Some((system, from)) => {
                let Some(source) = &source else {
                    bail!("--replace {} needs --source", spec);
                };
                pcf.replace_system(system, Some((source, from)))
                    .with_context(|| format!("Failed to replace {}", system))?;
                info!("Replaced {} with {}", system, from);
            }
            None => {
                pcf.replace_system(spec, None)
                    .with_context(|| format!("Failed to empty {}", spec))?;
                info!("Emptied {}", spec);
            }
        }
    }

    let data = pcf.to_bytes().context("Failed to encode PCF file")?;
    write_output(output, &data)?;
    info!(
        "Wrote {} ({} bytes) in {:?}",
        output.display(),
        data.len(),
        start.elapsed()
    );
    Ok(())
}

fn cmd_swf_dump(input: &Path, output: Option<&Path>, tags: bool) -> Result<()> {
    let swf = Swf::open(input).context("Failed to read movie")?;
    if tags {
        for code in swf.tag_codes() {
            println!("{}", code);
        }
        return Ok(());
    }
    write_json(&serde_json::to_value(swf.value())?, output)
}

struct MethodPatch {
    method: String,
    find: Vec<u8>,
    replace: Vec<u8>,
    limit: Option<usize>,
}

fn cmd_swf_repack(input: &Path, output: &Path, patch: Option<MethodPatch>) -> Result<()> {
    let mut swf = Swf::open(input).context("Failed to read movie")?;

    if let Some(patch) = patch {
        let Some((instance, method)) = patch.method.rsplit_once('.') else {
            bail!("--method must look like Instance.method, got {}", patch.method);
        };
        let count = swf
            .patch_method(instance, method, &patch.find, &patch.replace, patch.limit)
            .with_context(|| format!("Failed to patch {}", patch.method))?;
        if count == 0 {
            warn!("No matches in {}", patch.method);
        } else {
            info!("Patched {} occurrence(s) in {}", count, patch.method);
        }
    }

    let data = swf.to_bytes().context("Failed to encode movie")?;
    write_output(output, &data)?;
    info!("Wrote {} ({} bytes)", output.display(), data.len());
    Ok(())
}

fn open_vpk(path: &Path) -> Result<VpkArchive> {
    let start = Instant::now();
    let archive = VpkArchive::open(path).context("Failed to open VPK archive")?;
    info!(
        "Loaded {} entries in {:?}",
        archive.entry_count(),
        start.elapsed()
    );
    Ok(archive)
}

fn matching_entries<'a>(archive: &'a VpkArchive, filter: Option<&str>) -> Result<Vec<&'a VpkEntry>> {
    Ok(match filter {
        Some(pattern) => archive.glob(pattern).context("Invalid filter pattern")?,
        None => archive.iter().collect(),
    })
}

fn cmd_vpk_list(vpk: &Path, filter: Option<&str>, detailed: bool, verify: bool) -> Result<()> {
    let archive = open_vpk(vpk)?;
    let entries = matching_entries(&archive, filter)?;

    let mut bad = 0;
    for entry in &entries {
        if detailed {
            println!(
                "{:>5} {:>10} {:>10} {:08x} {}",
                entry.archive_index(),
                entry.archive_offset(),
                entry.size(),
                entry.crc32(),
                entry.path()
            );
        } else {
            println!("{}", entry.path());
        }
        if verify && !archive.verify(entry)? {
            bad += 1;
        }
    }

    info!("{} entries", entries.len());
    if bad > 0 {
        bail!("{} entries failed CRC verification", bad);
    }
    Ok(())
}

fn cmd_vpk_extract(vpk: &Path, output: &Path, filter: Option<&str>) -> Result<()> {
    let archive = open_vpk(vpk)?;
    let entries = matching_entries(&archive, filter)?;

    info!("Extracting {} entries...", entries.len());

    let pb = ProgressBar::new(entries.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-"),
    );

    fs::create_dir_all(output)?;

    let start = Instant::now();
    for entry in entries {
        let data = archive
            .read(entry)
            .with_context(|| format!("Failed to read {}", entry.path()))?;
        write_output(&output.join(entry.output_path()), &data)?;
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    info!("Extraction completed in {:?}", start.elapsed());
    Ok(())
}

fn cmd_mdl_dump(input: &Path, output: Option<&Path>, summary: bool) -> Result<()> {
    let mdl = Mdl::open(input).context("Failed to read model")?;
    if !summary {
        return write_json(&serde_json::to_value(mdl.value())?, output);
    }

    println!("{}", mdl.name()?);
    for (i, sequence) in mdl.sequences()?.iter().enumerate() {
        println!(
            "  seq {:>3} {} [{}] {}",
            i,
            sequence.label,
            sequence.activity,
            sequence.activity_modifiers.join(" ")
        );
    }
    for (i, family) in mdl.skin_families()?.iter().enumerate() {
        println!("  skin {:>2} {:?}", i, family);
    }
    Ok(())
}

fn cmd_vsif_extract(input: &Path, output: &Path, names: Option<&Path>) -> Result<()> {
    let vsif = Vsif::open(input).context("Failed to read scene image")?;

    let known: Vec<String> = match names {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };
    let names = vsif.scene_names(known)?;

    let scenes = vsif.scenes()?;
    info!("Extracting {} scenes...", scenes.len());

    let mut unnamed = 0;
    for (i, scene) in scenes.iter().enumerate() {
        let name = match names.get(&scene.name_crc) {
            Some(name) => name.clone(),
            None => {
                unnamed += 1;
                unknown_scene_name(scene.name_crc)
            }
        };
        debug!("{} ({} ms)", name, scene.milliseconds);
        let data = vsif
            .scene_data(i)
            .with_context(|| format!("Failed to unpack {}", name))?;
        write_output(&output.join(name), &data)?;
    }

    if unnamed > 0 {
        warn!("{} scenes have no known name", unnamed);
    }
    Ok(())
}

fn cmd_vdf_format(input: &Path, output: Option<&Path>, json: bool) -> Result<()> {
    let doc = nohats::vdf::open(input).context("Failed to parse KeyValues file")?;
    if json {
        return write_json(&serde_json::to_value(&doc)?, output);
    }

    let text = nohats::vdf::to_string(&doc);
    match output {
        Some(path) => write_output(path, text.as_bytes())?,
        None => print!("{}", text),
    }
    Ok(())
}

/// Parse hex bytes, ignoring whitespace (e.g. `"d0 30 47"`).
fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    digits
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)?;
            u8::from_str_radix(pair, 16).with_context(|| format!("invalid hex byte {:?}", pair))
        })
        .collect()
}
