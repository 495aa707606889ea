use thiserror::Error;

/// Problems detected while assembling a machine's memory layout.
///
/// These are raised eagerly by constructors and configuration calls and are
/// never partially applied: when one is returned, nothing has changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("address space `{0}` must have a non-zero size")]
    ZeroSize(String),
    #[error("page size {page_size:#X} does not evenly divide size {size:#X}")]
    InvalidPageSize { page_size: u32, size: u32 },
    #[error("bank count must be at least 1")]
    InvalidBankCount,
    #[error("page count must be at least 1")]
    InvalidPageCount,
    #[error("window of {pages} pages of {page_size:#X} bytes does not fit a 32-bit address")]
    WindowTooLarge { pages: u32, page_size: u32 },
    #[error("shared region pages {start}..{end} exceed the {page_count}-page window")]
    SharedRegionOutOfRange { start: u32, end: u32, page_count: u32 },
    #[error("{what} {value:#X} is not a multiple of the page size {page_size:#X}")]
    Misaligned {
        what: &'static str,
        value: u32,
        page_size: u32,
    },
    #[error("mapping must cover at least one page")]
    EmptyMapping,
    #[error("range {base:#X}+{len:#X} exceeds `{space}` (size {size:#X})")]
    RangeOutOfBounds {
        space: String,
        base: u32,
        len: u32,
        size: u32,
    },
    #[error("target range {offset:#X}+{len:#X} exceeds `{target}` (size {size:#X})")]
    TargetOutOfBounds {
        target: String,
        offset: u32,
        len: u32,
        size: u32,
    },
    #[error("`{0}` delegates its accesses and cannot be a mapping target")]
    NestedDelegation(String),
    #[error("`{0}` cannot be mapped onto itself")]
    SelfMapping(String),
    #[error("`{0}` is not a paged address space")]
    NotPaged(String),
    #[error("`{0}` is not a banked address space")]
    NotBanked(String),
    #[error("register `{name}` has invalid width {width} (expected 1..=32)")]
    InvalidWidth { name: String, width: u32 },
    #[error("bit field shift {shift} width {width} does not fit in a byte")]
    InvalidBitField { shift: u8, width: u8 },
    #[error("address {addr:#X} is outside `{space}` (size {size:#X})")]
    AddressOutOfRange { space: String, addr: u32, size: u32 },
    #[error("register `{0}` is already present")]
    DuplicateRegister(String),
}

/// Problems restoring or persisting an address space snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("snapshot version {found} is not supported (current: {current})")]
    UnsupportedVersion { found: u32, current: u32 },
    #[error("snapshot holds {found:#X} bytes but `{space}` has {expected:#X}")]
    SizeMismatch {
        space: String,
        expected: usize,
        found: usize,
    },
    #[error("snapshot layout does not match `{0}`")]
    LayoutMismatch(String),
}

/// Failures handing data to the owning thread through an inbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("inbound queue is full")]
    Full,
    #[error("inbound queue receiver was dropped")]
    Disconnected,
}
