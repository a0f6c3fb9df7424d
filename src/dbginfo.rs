//! # DWARF/ELF Navigator
//!
//! Loads the debug information of the target executable and answers the
//! navigation queries the debugger needs: program counter to function,
//! program counter to line entry, function name to post-prologue address,
//! file and line to address, and ELF symbol lookup.
//!
//! All DWARF sections are copied into reference-counted readers at build
//! time and the unit tree is parsed once into owned [`OwnedSymbol`]s, so
//! nothing borrows from the executable's bytes afterwards. All addresses
//! on this level are DWARF addresses; the load bias is applied one level
//! up, in [`crate::debuggee::Debuggee`].

use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gimli::{
    Attribute, AttributeValue, DwTag, EndianRcSlice, NativeEndian, Reader, Unit, DW_AT_frame_base,
    DW_AT_high_pc, DW_AT_location, DW_AT_low_pc, DW_AT_name, DW_TAG_compile_unit,
    DW_TAG_formal_parameter, DW_TAG_lexical_block, DW_TAG_subprogram, DW_TAG_variable,
};
use object::{Object, ObjectKind, ObjectSection, ObjectSymbol};
use tracing::debug;

use crate::addr::Addr;
use crate::errors::{DebuggerError, Result};

/// The gimli::Reader backing all DWARF data
pub type GimliRd = EndianRcSlice<NativeEndian>;

/// A DWARF location expression over the crate's reader type.
pub type Expression = gimli::Expression<GimliRd>;

/// The kinds of debugging information entries the debugger works with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    CompileUnit,
    Function,
    Variable,
    Parameter,
    LexicalBlock,
}

impl TryFrom<DwTag> for SymbolKind {
    type Error = DebuggerError;

    fn try_from(tag: DwTag) -> std::result::Result<Self, Self::Error> {
        match tag {
            DW_TAG_compile_unit => Ok(SymbolKind::CompileUnit),
            DW_TAG_subprogram => Ok(SymbolKind::Function),
            DW_TAG_variable => Ok(SymbolKind::Variable),
            DW_TAG_formal_parameter => Ok(SymbolKind::Parameter),
            DW_TAG_lexical_block => Ok(SymbolKind::LexicalBlock),
            other => Err(DebuggerError::DwTagNotImplemented(other)),
        }
    }
}

/// A location-class attribute as stored in the debug info.
///
/// Only expression locations can be evaluated; location lists surface as
/// [`LocationAttr::Unsupported`] and make variable reading fail with
/// [`DebuggerError::UnhandledVariableLocation`].
#[derive(Debug, Clone)]
pub enum LocationAttr {
    Expr(Expression),
    Unsupported,
}

/// An owned view onto one debugging information entry, with its children.
#[derive(Debug, Clone)]
pub struct OwnedSymbol {
    kind: SymbolKind,
    name: Option<String>,
    low_addr: Option<Addr>,
    high_addr: Option<Addr>,
    location: Option<LocationAttr>,
    frame_base: Option<LocationAttr>,
    encoding: gimli::Encoding,
    children: Vec<OwnedSymbol>,
}

impl OwnedSymbol {
    pub fn kind(&self) -> SymbolKind {
        self.kind
    }
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    pub fn low_addr(&self) -> Option<Addr> {
        self.low_addr
    }
    pub fn high_addr(&self) -> Option<Addr> {
        self.high_addr
    }
    pub fn location(&self) -> Option<&LocationAttr> {
        self.location.as_ref()
    }
    pub fn frame_base(&self) -> Option<&LocationAttr> {
        self.frame_base.as_ref()
    }
    pub fn encoding(&self) -> gimli::Encoding {
        self.encoding
    }
    pub fn children(&self) -> &[OwnedSymbol] {
        &self.children
    }

    /// Whether `[low_pc, high_pc)` contains `pc`. `None` when the entry
    /// carries no contiguous range.
    pub fn pc_range_contains(&self, pc: Addr) -> Option<bool> {
        match (self.low_addr, self.high_addr) {
            (Some(low), Some(high)) => Some(low <= pc && pc < high),
            _ => None,
        }
    }
}

/// The kind of an ELF symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfSymbolKind {
    NoType,
    Object,
    Func,
    Section,
    File,
}

impl From<object::SymbolKind> for ElfSymbolKind {
    fn from(kind: object::SymbolKind) -> Self {
        match kind {
            object::SymbolKind::Text => ElfSymbolKind::Func,
            object::SymbolKind::Data => ElfSymbolKind::Object,
            object::SymbolKind::Section => ElfSymbolKind::Section,
            object::SymbolKind::File => ElfSymbolKind::File,
            _ => ElfSymbolKind::NoType,
        }
    }
}

impl std::fmt::Display for ElfSymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ElfSymbolKind::NoType => "notype",
            ElfSymbolKind::Object => "object",
            ElfSymbolKind::Func => "func",
            ElfSymbolKind::Section => "section",
            ElfSymbolKind::File => "file",
        };
        write!(f, "{name}")
    }
}

/// An owned ELF symbol table entry.
#[derive(Debug, Clone)]
pub struct ElfSymbol {
    pub kind: ElfSymbolKind,
    pub name: String,
    pub addr: Addr,
}

/// A view onto one DWARF line table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
    pub file: PathBuf,
    pub line: u64,
    pub addr: Addr,
    pub is_stmt: bool,
}

/// One raw line table row; end-of-sequence markers are kept so coverage
/// lookups know where a sequence stops.
#[derive(Debug, Clone)]
struct LineRow {
    addr: Addr,
    line: u64,
    is_stmt: bool,
    end_sequence: bool,
    file: PathBuf,
}

impl LineRow {
    fn to_entry(&self) -> LineEntry {
        LineEntry {
            file: self.file.clone(),
            line: self.line,
            addr: self.addr,
            is_stmt: self.is_stmt,
        }
    }
}

/// Index of the row covering `pc`, in a row list sorted by address.
///
/// A row covers `pc` when it is the last row at or below `pc` and the
/// sequence has not ended there.
fn covering_index(rows: &[LineRow], pc: Addr) -> Option<usize> {
    let idx = rows.partition_point(|r| r.addr <= pc);
    if idx == 0 {
        return None;
    }
    let row = &rows[idx - 1];
    if row.end_sequence {
        None
    } else {
        Some(idx - 1)
    }
}

/// Parsed debug information of the target executable.
pub struct DebugInfo {
    dwarf: gimli::Dwarf<GimliRd>,
    symbols: Vec<OwnedSymbol>,
    elf_symbols: Vec<ElfSymbol>,
    is_dynamic: bool,
}

impl DebugInfo {
    /// Reads the executable, loads its DWARF sections and parses the unit
    /// tree and the ELF symbol tables into owned form.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or the object/DWARF data cannot
    /// be parsed.
    pub fn build(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)?;
        let object_info = object::File::parse(&*raw)?;

        let loader = |section: gimli::SectionId| -> std::result::Result<GimliRd, gimli::Error> {
            let data = object_info
                .section_by_name(section.name())
                .map(|s| s.uncompressed_data().unwrap_or_default())
                .unwrap_or_default();
            Ok(GimliRd::new(Rc::from(data.as_ref()), NativeEndian))
        };
        let dwarf = gimli::Dwarf::load(loader)?;

        let mut symbols = Vec::new();
        let mut iter = dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = dwarf.unit(header)?;
            let mut tree = unit.entries_tree(None)?;
            symbols.push(Self::process_tree(&dwarf, &unit, tree.root()?)?);
        }

        let mut elf_symbols = Vec::new();
        for sym in object_info.symbols().chain(object_info.dynamic_symbols()) {
            let name = match sym.name() {
                Ok(n) if !n.is_empty() => n.to_string(),
                _ => continue,
            };
            elf_symbols.push(ElfSymbol {
                kind: sym.kind().into(),
                name,
                addr: Addr::from(sym.address()),
            });
        }

        Ok(Self {
            dwarf,
            symbols,
            elf_symbols,
            is_dynamic: object_info.kind() == ObjectKind::Dynamic,
        })
    }

    /// Whether the executable is position independent (ELF type dynamic).
    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    fn entry_from_gimli(
        dwarf: &gimli::Dwarf<GimliRd>,
        unit: &Unit<GimliRd>,
        entry: &gimli::DebuggingInformationEntry<'_, '_, GimliRd>,
    ) -> Result<OwnedSymbol> {
        let kind = SymbolKind::try_from(entry.tag())?;
        let name = Self::parse_string(dwarf, unit, entry.attr(DW_AT_name)?)?;
        let low = Self::parse_addr_low(dwarf, unit, entry.attr(DW_AT_low_pc)?)?;
        let high = Self::parse_addr_high(dwarf, unit, entry.attr(DW_AT_high_pc)?, low)?;
        let location = Self::parse_location_attr(entry.attr_value(DW_AT_location)?);
        let frame_base = Self::parse_location_attr(entry.attr_value(DW_AT_frame_base)?);

        Ok(OwnedSymbol {
            kind,
            name,
            low_addr: low,
            high_addr: high,
            location,
            frame_base,
            encoding: unit.encoding(),
            children: Vec::new(),
        })
    }

    fn process_tree(
        dwarf: &gimli::Dwarf<GimliRd>,
        unit: &Unit<GimliRd>,
        node: gimli::EntriesTreeNode<'_, '_, '_, GimliRd>,
    ) -> Result<OwnedSymbol> {
        let mut parent = Self::entry_from_gimli(dwarf, unit, node.entry())?;

        let mut children: Vec<OwnedSymbol> = Vec::new();
        let mut children_tree = node.children();
        while let Some(child) = children_tree.next()? {
            children.push(match Self::process_tree(dwarf, unit, child) {
                Err(e) => {
                    debug!("could not parse a leaf of the debug symbol tree: {e}");
                    continue;
                }
                Ok(s) => s,
            });
        }

        parent.children = children;
        Ok(parent)
    }

    fn parse_string(
        dwarf: &gimli::Dwarf<GimliRd>,
        unit: &Unit<GimliRd>,
        attribute: Option<Attribute<GimliRd>>,
    ) -> Result<Option<String>> {
        Ok(if let Some(a) = attribute {
            Some(
                dwarf
                    .attr_string(unit, a.value())?
                    .to_string_lossy()?
                    .to_string(),
            )
        } else {
            None
        })
    }

    fn parse_addr_low(
        dwarf: &gimli::Dwarf<GimliRd>,
        unit: &Unit<GimliRd>,
        attribute: Option<Attribute<GimliRd>>,
    ) -> Result<Option<Addr>> {
        Ok(if let Some(a) = attribute {
            dwarf.attr_address(unit, a.value())?.map(Addr::from)
        } else {
            None
        })
    }

    fn parse_addr_high(
        dwarf: &gimli::Dwarf<GimliRd>,
        unit: &Unit<GimliRd>,
        attribute: Option<Attribute<GimliRd>>,
        low: Option<Addr>,
    ) -> Result<Option<Addr>> {
        let Some(a) = attribute else { return Ok(None) };
        if let Some(addr) = dwarf.attr_address(unit, a.value())? {
            return Ok(Some(Addr::from(addr)));
        }
        // DW_AT_high_pc is more commonly an offset from DW_AT_low_pc
        match a.value().udata_value() {
            Some(offset) => match low {
                Some(low) => Ok(Some(low + offset as usize)),
                None => Err(DebuggerError::HighAddrExistsButNotLowAddr),
            },
            None => Ok(None),
        }
    }

    fn parse_location_attr(value: Option<AttributeValue<GimliRd>>) -> Option<LocationAttr> {
        match value {
            Some(AttributeValue::Exprloc(expr)) => Some(LocationAttr::Expr(expr)),
            Some(_) => Some(LocationAttr::Unsupported),
            None => None,
        }
    }

    /// The first subprogram entry of the matching compilation unit whose pc
    /// range contains `pc`.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::FunctionNotFound`] if no function covers `pc`.
    pub fn function_from_pc(&self, pc: Addr) -> Result<OwnedSymbol> {
        for cu in &self.symbols {
            // units without a contiguous range are searched anyway
            if cu.pc_range_contains(pc) == Some(false) {
                continue;
            }
            for child in cu.children() {
                if child.kind() == SymbolKind::Function
                    && child.pc_range_contains(pc) == Some(true)
                {
                    return Ok(child.clone());
                }
            }
        }
        Err(DebuggerError::FunctionNotFound(pc))
    }

    /// All compilation-unit children named `name` that carry a code range.
    pub fn functions_by_name(&self, name: &str) -> Vec<OwnedSymbol> {
        self.symbols
            .iter()
            .flat_map(|cu| cu.children())
            .filter(|sym| sym.name() == Some(name) && sym.low_addr().is_some())
            .cloned()
            .collect()
    }

    fn each_unit<T>(
        &self,
        mut f: impl FnMut(&Unit<GimliRd>) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let mut iter = self.dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = self.dwarf.unit(header)?;
            if let Some(found) = f(&unit)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// All line table rows of `unit`, sorted by address. End-of-sequence
    /// markers sort before same-address rows of a following sequence.
    fn unit_rows(&self, unit: &Unit<GimliRd>) -> Result<Vec<LineRow>> {
        let mut rows = Vec::new();
        let Some(program) = unit.line_program.clone() else {
            return Ok(rows);
        };

        let mut iter = program.rows();
        while let Some((header, row)) = iter.next_row()? {
            let file = if row.end_sequence() {
                PathBuf::new()
            } else {
                self.render_file(unit, header, row)?
            };
            rows.push(LineRow {
                addr: Addr::from(row.address()),
                line: row.line().map_or(0, std::num::NonZeroU64::get),
                is_stmt: row.is_stmt(),
                end_sequence: row.end_sequence(),
                file,
            });
        }
        rows.sort_by_key(|r| (r.addr, Reverse(r.end_sequence)));
        Ok(rows)
    }

    fn render_file(
        &self,
        unit: &Unit<GimliRd>,
        header: &gimli::LineProgramHeader<GimliRd>,
        row: &gimli::LineRow,
    ) -> Result<PathBuf> {
        let mut path = PathBuf::new();
        if let Some(dir) = &unit.comp_dir {
            path.push(&*dir.to_string_lossy()?);
        }
        if let Some(file) = row.file(header) {
            if file.directory_index() != 0 {
                if let Some(dir) = file.directory(header) {
                    path.push(&*self.dwarf.attr_string(unit, dir)?.to_string_lossy()?);
                }
            }
            path.push(
                &*self
                    .dwarf
                    .attr_string(unit, file.path_name())?
                    .to_string_lossy()?,
            );
        }
        Ok(path)
    }

    /// The line table entry covering `pc`.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::LineEntryNotFound`] if no row covers `pc`.
    pub fn line_entry_from_pc(&self, pc: Addr) -> Result<LineEntry> {
        self.each_unit(|unit| {
            let rows = self.unit_rows(unit)?;
            Ok(covering_index(&rows, pc).map(|idx| rows[idx].to_entry()))
        })?
        .ok_or(DebuggerError::LineEntryNotFound(pc))
    }

    /// The line table entry one past the one covering `low_pc`. For a
    /// function's low pc this is the first line after the prologue.
    ///
    /// # Errors
    ///
    /// [`DebuggerError::LineEntryNotFound`] if `low_pc` is not covered or
    /// the covering sequence ends right after it.
    pub fn post_prologue_entry(&self, low_pc: Addr) -> Result<LineEntry> {
        self.each_unit(|unit| {
            let rows = self.unit_rows(unit)?;
            let Some(idx) = covering_index(&rows, low_pc) else {
                return Ok(None);
            };
            Ok(rows[idx + 1..]
                .iter()
                .find(|r| !r.end_sequence)
                .map(LineRow::to_entry))
        })?
        .ok_or(DebuggerError::LineEntryNotFound(low_pc))
    }

    /// All line entries with addresses in `[low, high)`, across all units.
    pub fn line_entries_in_range(&self, low: Addr, high: Addr) -> Result<Vec<LineEntry>> {
        let mut entries = Vec::new();
        self.each_unit(|unit| {
            for row in self.unit_rows(unit)? {
                if !row.end_sequence && low <= row.addr && row.addr < high {
                    entries.push(row.to_entry());
                }
            }
            Ok(None::<()>)
        })?;
        Ok(entries)
    }

    /// The address of the first statement-boundary row for `line` in the
    /// first compilation unit whose name ends with `file_suffix`.
    ///
    /// Two units sharing a file name are resolved first-wins.
    pub fn source_line_to_addr(&self, file_suffix: &str, line: u64) -> Result<Option<Addr>> {
        self.each_unit(|unit| {
            let name = match &unit.name {
                Some(n) => n.to_string_lossy()?.to_string(),
                None => return Ok(None),
            };
            if !name.ends_with(file_suffix) {
                return Ok(None);
            }
            Ok(self
                .unit_rows(unit)?
                .iter()
                .find(|r| !r.end_sequence && r.is_stmt && r.line == line)
                .map(|r| r.addr))
        })
    }

    /// All ELF symbols (static and dynamic tables) whose name equals
    /// `name` exactly. No demangling is applied.
    pub fn lookup_symbol(&self, name: &str) -> Vec<ElfSymbol> {
        self.elf_symbols
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(addr: usize, line: u64, is_stmt: bool, end_sequence: bool) -> LineRow {
        LineRow {
            addr: Addr::from(addr),
            line,
            is_stmt,
            end_sequence,
            file: PathBuf::from("main.c"),
        }
    }

    #[test]
    fn test_covering_index() {
        let rows = vec![
            row(0x1000, 1, true, false),
            row(0x1008, 2, true, false),
            row(0x1010, 2, false, false),
            row(0x1020, 0, false, true),
        ];
        assert_eq!(covering_index(&rows, Addr::from(0x0fff_usize)), None);
        assert_eq!(covering_index(&rows, Addr::from(0x1000usize)), Some(0));
        assert_eq!(covering_index(&rows, Addr::from(0x1004usize)), Some(0));
        assert_eq!(covering_index(&rows, Addr::from(0x1008usize)), Some(1));
        assert_eq!(covering_index(&rows, Addr::from(0x101fusize)), Some(2));
        // past the end of the sequence
        assert_eq!(covering_index(&rows, Addr::from(0x1020usize)), None);
        assert_eq!(covering_index(&rows, Addr::from(0x2000usize)), None);
    }

    #[test]
    fn test_covering_index_adjacent_sequences() {
        // a new sequence starting where the previous one ended
        let mut rows = vec![
            row(0x1000, 1, true, false),
            row(0x1010, 0, false, true),
            row(0x1010, 7, true, false),
            row(0x1020, 0, false, true),
        ];
        rows.sort_by_key(|r| (r.addr, Reverse(r.end_sequence)));
        let idx = covering_index(&rows, Addr::from(0x1010usize));
        assert_eq!(idx.map(|i| rows[i].line), Some(7));
    }

    #[test]
    fn test_symbol_kind_from_tag() {
        assert_eq!(
            SymbolKind::try_from(DW_TAG_subprogram).unwrap(),
            SymbolKind::Function
        );
        assert_eq!(
            SymbolKind::try_from(DW_TAG_variable).unwrap(),
            SymbolKind::Variable
        );
        assert!(SymbolKind::try_from(gimli::DW_TAG_base_type).is_err());
    }

    #[test]
    fn test_elf_symbol_kind_display() {
        assert_eq!(ElfSymbolKind::from(object::SymbolKind::Text), ElfSymbolKind::Func);
        assert_eq!(ElfSymbolKind::from(object::SymbolKind::Data), ElfSymbolKind::Object);
        assert_eq!(format!("{}", ElfSymbolKind::Func), "func");
        assert_eq!(format!("{}", ElfSymbolKind::NoType), "notype");
    }

    #[test]
    fn test_pc_range_contains() {
        let sym = OwnedSymbol {
            kind: SymbolKind::Function,
            name: Some("f".to_string()),
            low_addr: Some(Addr::from(0x1000usize)),
            high_addr: Some(Addr::from(0x1100usize)),
            location: None,
            frame_base: None,
            encoding: gimli::Encoding {
                format: gimli::Format::Dwarf32,
                version: 4,
                address_size: 8,
            },
            children: Vec::new(),
        };
        assert_eq!(sym.pc_range_contains(Addr::from(0x1000usize)), Some(true));
        assert_eq!(sym.pc_range_contains(Addr::from(0x10ffusize)), Some(true));
        assert_eq!(sym.pc_range_contains(Addr::from(0x1100usize)), Some(false));
    }
}
