//! Compile units and function declarations read from an executable's DWARF

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::WrapErr;
use gimli::{EndianArcSlice, Reader as _, RunTimeEndian};
use object::{Object, ObjectSection};

use crate::types::{CompileUnit, LineEntry};

type Reader = EndianArcSlice<RunTimeEndian>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Function {
    name: String,
    linkage_name: Option<String>,
    location: LineEntry,
}

/// Debug information of one executable
#[derive(Debug, Default)]
pub struct DebugInfo {
    compile_units: Vec<CompileUnit>,
    functions: Vec<Function>,
}

fn load_section(
    id: gimli::SectionId,
    file: &object::File<'_>,
    endian: RunTimeEndian,
) -> Result<Reader, gimli::Error> {
    let data = file
        .section_by_name(id.name())
        .and_then(|section| section.uncompressed_data().ok())
        .unwrap_or(Cow::Borrowed(&[]));
    Ok(EndianArcSlice::new(Arc::from(&*data), endian))
}

impl DebugInfo {
    /// Parse the executable at `path`
    ///
    /// A binary without DWARF yields no compile units and no functions.
    #[tracing::instrument]
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("opening {}", path.display()))?;
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .wrap_err_with(|| format!("mapping {}", path.display()))?;
        let object = object::File::parse(&*mmap)
            .wrap_err_with(|| format!("{} is not an object file", path.display()))?;

        let endian = if object.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let dwarf = gimli::Dwarf::load(|id| load_section(id, &object, endian))
            .wrap_err("loading DWARF sections")?;

        let info = Self::parse(&dwarf).wrap_err("parsing DWARF")?;
        tracing::debug!(
            compile_units = info.compile_units.len(),
            functions = info.functions.len(),
            "read debug info"
        );
        Ok(info)
    }

    fn parse(dwarf: &gimli::Dwarf<Reader>) -> Result<Self, gimli::Error> {
        let mut info = Self::default();

        let mut headers = dwarf.units();
        while let Some(header) = headers.next()? {
            let unit = dwarf.unit(header)?;
            let comp_dir = match &unit.comp_dir {
                Some(dir) => Some(PathBuf::from(dir.to_string_lossy()?.as_ref())),
                None => None,
            };

            if let Some(name) = &unit.name {
                let name = PathBuf::from(name.to_string_lossy()?.as_ref());
                info.compile_units.push(compile_unit(comp_dir.as_deref(), &name));
            }

            let lines = parse_lines(&unit)?;
            let mut entries = unit.entries();
            while let Some((_, entry)) = entries.next_dfs()? {
                if entry.tag() != gimli::DW_TAG_subprogram {
                    continue;
                }
                // prototypes, usually from a header included by a caller
                if let Some(gimli::AttributeValue::Flag(true)) =
                    entry.attr_value(gimli::DW_AT_declaration)?
                {
                    continue;
                }

                let (Some(name), linkage_name) = names(dwarf, &unit, entry)? else {
                    continue;
                };

                let low_pc = match entry.attr_value(gimli::DW_AT_low_pc)? {
                    Some(value) => dwarf.attr_address(&unit, value)?.filter(|pc| *pc != 0),
                    None => None,
                };
                let location = match low_pc.and_then(|pc| place_from_pc(&lines, pc)) {
                    Some(row) => match decl_file_path(dwarf, &unit, row.file_index)? {
                        Some(file) => Some(LineEntry {
                            file,
                            line: row.line,
                        }),
                        None => None,
                    },
                    None => None,
                };
                let location = match location {
                    Some(location) => location,
                    None => match decl_location(dwarf, &unit, entry)? {
                        Some(location) => location,
                        None => continue,
                    },
                };

                info.functions.push(Function {
                    name,
                    linkage_name,
                    location,
                });
            }
        }

        Ok(info)
    }

    pub fn compile_units(&self) -> &[CompileUnit] {
        &self.compile_units
    }

    /// Source locations of every function called `name`, deduplicated
    pub fn find_function(&self, name: &str) -> Vec<LineEntry> {
        let mut found: Vec<LineEntry> = Vec::new();
        for function in &self.functions {
            let matches =
                function.name == name || function.linkage_name.as_deref() == Some(name);
            if matches && !found.contains(&function.location) {
                found.push(function.location.clone());
            }
        }
        found
    }
}

fn compile_unit(comp_dir: Option<&Path>, name: &Path) -> CompileUnit {
    let full = match comp_dir {
        Some(dir) => dir.join(name),
        None => name.to_path_buf(),
    };
    let directory = full
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf);
    let filename = full
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    CompileUnit {
        directory,
        filename,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineRow {
    address: u64,
    file_index: u64,
    line: u32,
}

/// Rows of the unit's line program, ordered by address
fn parse_lines(unit: &gimli::Unit<Reader>) -> Result<Vec<LineRow>, gimli::Error> {
    let Some(program) = &unit.line_program else {
        return Ok(Vec::new());
    };
    let mut rows = program.clone().rows();
    let mut lines = Vec::new();
    while let Some((_, row)) = rows.next_row()? {
        if row.end_sequence() {
            continue;
        }
        let Some(line) = row.line().and_then(|line| u32::try_from(line.get()).ok()) else {
            continue;
        };
        lines.push(LineRow {
            address: row.address(),
            file_index: row.file_index(),
            line,
        });
    }
    lines.sort_by_key(|row| row.address);
    Ok(lines)
}

/// The row covering `pc`: the first one at that address, else the closest before it
fn place_from_pc(lines: &[LineRow], pc: u64) -> Option<LineRow> {
    let pos = lines.partition_point(|row| row.address < pc);
    match lines.get(pos) {
        Some(row) if row.address == pc => Some(*row),
        _ => pos.checked_sub(1).and_then(|prev| lines.get(prev)).copied(),
    }
}

fn attr_text(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, Reader>,
    attr: gimli::DwAt,
) -> Result<Option<String>, gimli::Error> {
    match entry.attr_value(attr)? {
        Some(value) => Ok(Some(
            dwarf.attr_string(unit, value)?.to_string_lossy()?.into_owned(),
        )),
        None => Ok(None),
    }
}

fn origin_of(
    entry: &gimli::DebuggingInformationEntry<'_, '_, Reader>,
) -> Result<Option<gimli::UnitOffset>, gimli::Error> {
    for attr in [gimli::DW_AT_specification, gimli::DW_AT_abstract_origin] {
        if let Some(gimli::AttributeValue::UnitRef(offset)) = entry.attr_value(attr)? {
            return Ok(Some(offset));
        }
    }
    Ok(None)
}

const MAX_ORIGIN_DEPTH: usize = 4;

/// Name and linkage name of a subprogram
///
/// Out-of-line definitions and concrete inline instances carry neither;
/// they are read from the declaration the entry points at.
fn names(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, Reader>,
) -> Result<(Option<String>, Option<String>), gimli::Error> {
    let mut name = attr_text(dwarf, unit, entry, gimli::DW_AT_name)?;
    let mut linkage_name = attr_text(dwarf, unit, entry, gimli::DW_AT_linkage_name)?;
    let mut next = origin_of(entry)?;
    let mut depth = 0;
    while let Some(offset) = next {
        if (name.is_some() && linkage_name.is_some()) || depth == MAX_ORIGIN_DEPTH {
            break;
        }
        let origin = unit.entry(offset)?;
        if name.is_none() {
            name = attr_text(dwarf, unit, &origin, gimli::DW_AT_name)?;
        }
        if linkage_name.is_none() {
            linkage_name = attr_text(dwarf, unit, &origin, gimli::DW_AT_linkage_name)?;
        }
        next = origin_of(&origin)?;
        depth += 1;
    }
    Ok((name, linkage_name))
}

/// `DW_AT_decl_file`/`DW_AT_decl_line` of an entry without code of its own
fn decl_location(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, Reader>,
) -> Result<Option<LineEntry>, gimli::Error> {
    let file_index = match entry.attr(gimli::DW_AT_decl_file)? {
        Some(attr) => match attr.value() {
            gimli::AttributeValue::FileIndex(index) => Some(index),
            _ => attr.udata_value(),
        },
        None => None,
    };
    let line = entry
        .attr(gimli::DW_AT_decl_line)?
        .and_then(|attr| attr.udata_value())
        .and_then(|line| u32::try_from(line).ok());

    let (Some(file_index), Some(line)) = (file_index, line) else {
        return Ok(None);
    };
    Ok(decl_file_path(dwarf, unit, file_index)?.map(|file| LineEntry { file, line }))
}

fn decl_file_path(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    index: u64,
) -> Result<Option<PathBuf>, gimli::Error> {
    let Some(program) = &unit.line_program else {
        return Ok(None);
    };
    let header = program.header();
    let Some(file) = header.file(index) else {
        return Ok(None);
    };

    let mut path = match &unit.comp_dir {
        Some(dir) => PathBuf::from(dir.to_string_lossy()?.as_ref()),
        None => PathBuf::new(),
    };
    if file.directory_index() != 0 {
        if let Some(directory) = file.directory(header) {
            let directory = dwarf.attr_string(unit, directory)?;
            path.push(directory.to_string_lossy()?.as_ref());
        }
    }
    let name = dwarf.attr_string(unit, file.path_name())?;
    path.push(name.to_string_lossy()?.as_ref());

    Ok(Some(path))
}
