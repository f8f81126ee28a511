//! Symbol resolution: canonical names for code and data addresses.
//!
//! Names come from four address-keyed JSON tables (generic memory map,
//! KERNAL/BASIC routines, hardware registers, zero page) and from labels in the
//! listing itself. Anything left over gets a generated name. The resulting
//! [`SymbolTable`] is frozen: it has no mutators.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::parser::Candidates;
use crate::{Address, ZERO_PAGE_END};

/// Error type for loading a symbol table
#[derive(Debug, thiserror::Error)]
pub enum SymbolError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed symbol table: {0}")]
    Json(#[from] serde_json::Error),
}

/// What a named address is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Subroutine,
    KernalCall,
    HardwareRegister,
    ZeroPageVar,
    GenericLabel,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Subroutine => write!(f, "subroutine"),
            SymbolKind::KernalCall => write!(f, "kernal_call"),
            SymbolKind::HardwareRegister => write!(f, "hardware_register"),
            SymbolKind::ZeroPageVar => write!(f, "zero_page_var"),
            SymbolKind::GenericLabel => write!(f, "generic_label"),
        }
    }
}

/// A resolved name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub address: Address,
    pub name: String,
    pub kind: SymbolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One entry of an auxiliary table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, alias = "comment")]
        description: Option<String>,
    },
}

impl From<RawEntry> for SymbolEntry {
    fn from(raw: RawEntry) -> Self {
        match raw {
            RawEntry::Name(name) => SymbolEntry { name, description: None },
            RawEntry::Detailed { name, description } => SymbolEntry { name, description },
        }
    }
}

/// The four auxiliary tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSource {
    MemoryMap,
    Routines,
    Hardware,
    ZeroPage,
}

impl SymbolSource {
    pub const ALL: [SymbolSource; 4] =
        [SymbolSource::MemoryMap, SymbolSource::Routines, SymbolSource::Hardware, SymbolSource::ZeroPage];

    /// File name inside a symbols directory
    pub fn file_name(&self) -> &'static str {
        match self {
            SymbolSource::MemoryMap => "memory_map.json",
            SymbolSource::Routines => "kernal_routines.json",
            SymbolSource::Hardware => "hardware_registers.json",
            SymbolSource::ZeroPage => "zero_page.json",
        }
    }
}

impl fmt::Display for SymbolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolSource::MemoryMap => write!(f, "memory map"),
            SymbolSource::Routines => write!(f, "routine table"),
            SymbolSource::Hardware => write!(f, "hardware register table"),
            SymbolSource::ZeroPage => write!(f, "zero-page table"),
        }
    }
}

/// Where to find each table. `None` means "not supplied".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolPaths {
    pub memory_map: Option<PathBuf>,
    pub routines: Option<PathBuf>,
    pub hardware: Option<PathBuf>,
    pub zero_page: Option<PathBuf>,
}

impl SymbolPaths {
    /// All four tables under their default names in `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        let path = |source: SymbolSource| Some(dir.join(source.file_name()));
        SymbolPaths {
            memory_map: path(SymbolSource::MemoryMap),
            routines: path(SymbolSource::Routines),
            hardware: path(SymbolSource::Hardware),
            zero_page: path(SymbolSource::ZeroPage),
        }
    }

    pub fn get(&self, source: SymbolSource) -> Option<&Path> {
        match source {
            SymbolSource::MemoryMap => self.memory_map.as_deref(),
            SymbolSource::Routines => self.routines.as_deref(),
            SymbolSource::Hardware => self.hardware.as_deref(),
            SymbolSource::ZeroPage => self.zero_page.as_deref(),
        }
    }

    fn slot(&mut self, source: SymbolSource) -> &mut Option<PathBuf> {
        match source {
            SymbolSource::MemoryMap => &mut self.memory_map,
            SymbolSource::Routines => &mut self.routines,
            SymbolSource::Hardware => &mut self.hardware,
            SymbolSource::ZeroPage => &mut self.zero_page,
        }
    }

    /// Replace one table path, keeping the others
    pub fn with(mut self, source: SymbolSource, path: impl Into<PathBuf>) -> Self {
        *self.slot(source) = Some(path.into());
        self
    }
}

/// The loaded auxiliary tables. Immutable and shared between runs.
#[derive(Debug, Clone, Default)]
pub struct SymbolSources {
    pub memory_map: BTreeMap<Address, SymbolEntry>,
    pub routines: BTreeMap<Address, SymbolEntry>,
    pub hardware: BTreeMap<Address, SymbolEntry>,
    pub zero_page: BTreeMap<Address, SymbolEntry>,
}

impl SymbolSources {
    /// Load every table named in `paths`.
    ///
    /// A missing or malformed file leaves its table empty and logs a warning,
    /// so affected addresses fall back to generated names.
    pub fn load(paths: &SymbolPaths) -> Self {
        let mut sources = SymbolSources::default();
        for source in SymbolSource::ALL {
            let Some(path) = paths.get(source) else { continue };
            match load_table(path) {
                Ok(table) => {
                    log::debug!("Loaded {} entries from {} {}", table.len(), source, path.display());
                    *sources.table_mut(source) = table;
                }
                Err(err) => log::warn!("Ignoring {}: {}", source, err),
            }
        }
        sources
    }

    /// Load all four tables from `dir`
    pub fn load_dir(dir: impl AsRef<Path>) -> Self {
        Self::load(&SymbolPaths::from_dir(dir))
    }

    pub fn table(&self, source: SymbolSource) -> &BTreeMap<Address, SymbolEntry> {
        match source {
            SymbolSource::MemoryMap => &self.memory_map,
            SymbolSource::Routines => &self.routines,
            SymbolSource::Hardware => &self.hardware,
            SymbolSource::ZeroPage => &self.zero_page,
        }
    }

    pub fn table_mut(&mut self, source: SymbolSource) -> &mut BTreeMap<Address, SymbolEntry> {
        match source {
            SymbolSource::MemoryMap => &mut self.memory_map,
            SymbolSource::Routines => &mut self.routines,
            SymbolSource::Hardware => &mut self.hardware,
            SymbolSource::ZeroPage => &mut self.zero_page,
        }
    }
}

/// Read one table file
pub fn load_table(path: &Path) -> Result<BTreeMap<Address, SymbolEntry>, SymbolError> {
    let text = std::fs::read_to_string(path).map_err(|source| SymbolError::Io { path: path.to_path_buf(), source })?;
    parse_table(&text)
}

/// Parse one table. Entries with a malformed key or value are skipped.
pub fn parse_table(text: &str) -> Result<BTreeMap<Address, SymbolEntry>, SymbolError> {
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)?;
    let mut table = BTreeMap::new();

    for (key, value) in raw {
        let Some(address) = parse_address_key(&key) else {
            log::warn!("Skipping symbol entry with malformed address key `{}`", key);
            continue;
        };
        match serde_json::from_value::<RawEntry>(value) {
            Ok(entry) => {
                table.insert(address, SymbolEntry::from(entry));
            }
            Err(err) => log::warn!("Skipping symbol entry `{}`: {}", key, err),
        }
    }

    Ok(table)
}

/// `$D020`, `0xD020`, `D020` or `#53280`
pub fn parse_address_key(key: &str) -> Option<Address> {
    let key = key.trim();
    if let Some(decimal) = key.strip_prefix('#') {
        return decimal.parse().ok();
    }
    let hex = key
        .strip_prefix('$')
        .or_else(|| key.strip_prefix("0x"))
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key);
    Address::from_str_radix(hex, 16).ok()
}

/// Turn arbitrary text into an identifier
pub fn sanitize_name(raw: &str) -> String {
    let mut name: String =
        raw.trim().chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Generated name for a data address without a table entry
pub fn generated_data_name(address: Address) -> String {
    if address <= ZERO_PAGE_END {
        format!("ZVAR_{:02X}", address)
    } else {
        format!("VAR_{:04X}", address)
    }
}

/// Generated name for a jump/branch target
pub fn generated_label_name(address: Address) -> String {
    format!("LABEL_{:04X}", address)
}

/// Generated name for a JSR target
pub fn generated_subroutine_name(address: Address) -> String {
    format!("SUB_{:04X}", address)
}

/// Role an address plays in the listing, strongest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Role {
    Subroutine,
    Label,
    ZeroPage,
    Hardware,
    Memory,
}

impl Role {
    fn kind(self) -> SymbolKind {
        match self {
            Role::Subroutine => SymbolKind::Subroutine,
            Role::Label | Role::Memory => SymbolKind::GenericLabel,
            Role::ZeroPage => SymbolKind::ZeroPageVar,
            Role::Hardware => SymbolKind::HardwareRegister,
        }
    }

    fn fallback(self, address: Address) -> Option<String> {
        match self {
            Role::Subroutine => Some(generated_subroutine_name(address)),
            Role::Label => Some(generated_label_name(address)),
            Role::ZeroPage | Role::Hardware => Some(generated_data_name(address)),
            Role::Memory => None,
        }
    }
}

/// Frozen address → name mapping for one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolTable {
    symbols: BTreeMap<Address, Symbol>,
    subroutines: BTreeSet<Address>,
    labels: BTreeSet<Address>,
    recursive: BTreeSet<Address>,
}

impl SymbolTable {
    /// Name every candidate address.
    ///
    /// Source priority: routine table, hardware table, zero-page table,
    /// listing labels, memory map, generated fallback.
    pub fn resolve(candidates: &Candidates, sources: &SymbolSources) -> Self {
        let mut roles: BTreeMap<Address, Role> = BTreeMap::new();
        let sets = [
            (&candidates.subroutines, Role::Subroutine),
            (&candidates.jump_labels, Role::Label),
            (&candidates.zero_page, Role::ZeroPage),
            (&candidates.hardware, Role::Hardware),
            (&candidates.memory, Role::Memory),
        ];
        for (set, role) in sets {
            for address in set {
                let current = roles.entry(*address).or_insert(role);
                *current = (*current).min(role);
            }
        }

        let mut table = SymbolTable {
            subroutines: candidates.subroutines.clone(),
            labels: candidates.jump_labels.difference(&candidates.subroutines).copied().collect(),
            recursive: candidates.recursive.clone(),
            ..SymbolTable::default()
        };
        let mut taken: BTreeSet<String> = BTreeSet::new();

        for (address, role) in roles {
            let Some((raw, kind, description)) = Self::pick(address, role, candidates, sources) else { continue };

            let mut name = sanitize_name(&raw);
            if name.is_empty() {
                match role.fallback(address) {
                    Some(fallback) => name = fallback,
                    None => continue,
                }
            }
            if taken.contains(&name) {
                name = format!("{}_{:04X}", name, address);
            }
            taken.insert(name.clone());
            table.symbols.insert(address, Symbol { address, name, kind, description });
        }

        log::debug!(
            "Resolved {} symbols ({} subroutines, {} labels)",
            table.symbols.len(),
            table.subroutines.len(),
            table.labels.len()
        );
        table
    }

    fn pick(
        address: Address,
        role: Role,
        candidates: &Candidates,
        sources: &SymbolSources,
    ) -> Option<(String, SymbolKind, Option<String>)> {
        let entry = |table: &BTreeMap<Address, SymbolEntry>, kind: SymbolKind| {
            table.get(&address).map(|entry| (entry.name.clone(), kind, entry.description.clone()))
        };

        entry(&sources.routines, SymbolKind::KernalCall)
            .or_else(|| entry(&sources.hardware, SymbolKind::HardwareRegister))
            .or_else(|| entry(&sources.zero_page, SymbolKind::ZeroPageVar))
            .or_else(|| entry(&sources.memory_map, role.kind()))
            .or_else(|| candidates.source_labels.get(&address).map(|name| (name.clone(), role.kind(), None)))
            .or_else(|| role.fallback(address).map(|name| (name, role.kind(), None)))
    }

    pub fn get(&self, address: Address) -> Option<&Symbol> {
        self.symbols.get(&address)
    }

    pub fn name(&self, address: Address) -> Option<&str> {
        self.symbols.get(&address).map(|symbol| symbol.name.as_str())
    }

    pub fn kind(&self, address: Address) -> Option<SymbolKind> {
        self.symbols.get(&address).map(|symbol| symbol.kind)
    }

    /// Name of a code address, generated if the table has none
    pub fn code_name(&self, address: Address) -> String {
        match self.name(address) {
            Some(name) => name.to_string(),
            None if self.subroutines.contains(&address) => generated_subroutine_name(address),
            None => generated_label_name(address),
        }
    }

    /// Returns true for JSR targets
    pub fn is_subroutine(&self, address: Address) -> bool {
        self.subroutines.contains(&address)
    }

    /// Returns true for JMP/branch targets that are not also JSR targets
    pub fn is_label(&self, address: Address) -> bool {
        self.labels.contains(&address)
    }

    pub fn is_recursive(&self, address: Address) -> bool {
        self.recursive.contains(&address)
    }

    pub fn subroutines(&self) -> impl Iterator<Item = Address> + '_ {
        self.subroutines.iter().copied()
    }

    pub fn labels(&self) -> impl Iterator<Item = Address> + '_ {
        self.labels.iter().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
