// Human-readable layout report printed by `--extended`.

use std::io::{self, Write};

use crate::build::BuildReport;
use crate::elf::ElfFile;

fn print_file<O: Write>(out: &mut O, name: &str, elf: &ElfFile, base: u64) -> io::Result<()> {
    writeln!(out, "0x{:04x}: {}", base, name)?;
    writeln!(
        out,
        "\tELF{} {:?}-endian, entry 0x{:04x}",
        elf.identity.class.addr_width() * 8,
        elf.identity.encoding,
        elf.header.entry
    )?;
    let (id, h) = (&elf.identity, &elf.header);
    writeln!(
        out,
        "\ttype {} machine {} version {}/{} abi {} flags 0x{:x}",
        h.e_type, h.machine, id.version, h.version, id.os_abi, h.flags
    )?;
    writeln!(
        out,
        "\theader {} bytes, {} x {} byte segments, {} x {} byte sections, names in {}",
        h.ehsize, h.phnum, h.phentsize, h.shnum, h.shentsize, h.shstrndx
    )?;
    for (index, ph) in elf.program_headers.iter().enumerate() {
        writeln!(out, "\tsegment {} ({})", index, ph.type_name())?;
        writeln!(out, "\t\toffset 0x{:04x}\t\tvaddr 0x{:04x}", ph.offset, ph.vaddr)?;
        writeln!(out, "\t\tfilesz 0x{:04x}\t\tmemsz 0x{:04x}", ph.filesz, ph.memsz)?;
        writeln!(
            out,
            "\t\tpaddr 0x{:04x}\t\talign 0x{:x}\t\tflags 0x{:x}",
            ph.paddr, ph.align, ph.flags
        )?;
        if !ph.is_load() {
            writeln!(out, "\t\tnot loaded")?;
            continue;
        }
        writeln!(out, "\t\twriting 0x{:04x} bytes", ph.filesz)?;
        if ph.padding() > 0 {
            writeln!(out, "\t\tpadding up to 0x{:04x}", base + ph.vaddr + ph.memsz)?;
        }
    }
    // Index 0 is the reserved null section
    for (index, sh) in elf.section_headers.iter().enumerate().skip(1) {
        writeln!(
            out,
            "\tsection {} (type {}, name at {})",
            index, sh.sh_type, sh.name
        )?;
        writeln!(
            out,
            "\t\taddr 0x{:04x}\t\toffset 0x{:04x}\t\tsize 0x{:04x}",
            sh.addr, sh.offset, sh.size
        )?;
        writeln!(
            out,
            "\t\tflags 0x{:x} link {} info {} align {} entsize {}",
            sh.flags, sh.link, sh.info, sh.addralign, sh.entsize
        )?;
        if sh.is_loadable() {
            writeln!(out, "\t\twriting 0x{:04x} bytes", sh.size)?;
        } else {
            writeln!(out, "\t\tnot loaded")?;
        }
    }
    Ok(())
}

pub fn print_extended<O: Write>(report: &BuildReport, out: &mut O) -> io::Result<()> {
    print_file(
        out,
        &report.bootblock_name,
        &report.bootblock,
        report.layout.bootblock_base,
    )?;
    print_file(
        out,
        &report.kernel_name,
        &report.kernel,
        report.layout.kernel_base,
    )?;
    writeln!(out, "os_size: {} sectors", report.kernel_sectors)?;
    writeln!(out, "image size: 0x{:04x} bytes", report.image_extent)
}
