/// Status code type alias.
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const INTERRUPTED: status_code_t = 27;
    pub const READ_ONLY_MODE: status_code_t = 34;
    pub const SERDE_INVALID_JSON: status_code_t = 50;
    pub const KV_STORE_OPEN_FAILED: status_code_t = 63;
    pub const IO_ERROR: status_code_t = 69;
    pub const FOUND_BUG: status_code_t = 998;
    pub const UNKNOWN: status_code_t = 999;
}

/// Transaction status codes (1xxx).
pub mod TransactionCode {
    use super::status_code_t;

    pub const CONFLICT: status_code_t = 1001;
    pub const TOO_OLD: status_code_t = 1003;
    pub const RETRYABLE: status_code_t = 1007;
}

/// Metadata engine status codes (3xxx).
///
/// Most of these are errno equivalents; see [`to_errno`].
pub mod MetaCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const NOT_EMPTY: status_code_t = 3001;
    pub const NOT_DIRECTORY: status_code_t = 3003;
    pub const TOO_MANY_SYMLINKS: status_code_t = 3005;
    pub const IS_DIRECTORY: status_code_t = 3006;
    pub const EXISTS: status_code_t = 3007;
    pub const NO_PERMISSION: status_code_t = 3008;
    pub const NOT_FILE: status_code_t = 3010;
    pub const INODE_ID_ALLOC_FAILED: status_code_t = 3012;
    pub const NAME_TOO_LONG: status_code_t = 3017;
    pub const NOT_PERMITTED: status_code_t = 3020;
    pub const NOT_SUPPORTED: status_code_t = 3021;
    pub const NO_SPACE: status_code_t = 3022;
    pub const NO_ATTR: status_code_t = 3023;
    pub const WOULD_BLOCK: status_code_t = 3024;
    pub const NOT_FORMATTED: status_code_t = 3025;
    pub const FILE_TOO_LARGE: status_code_t = 3102;
    pub const NO_SESSION: status_code_t = 3103;
    pub const FOUND_BUG: status_code_t = 3999;
}

/// Object storage status codes (4xxx).
pub mod StorageCode {
    use super::status_code_t;

    pub const OBJECT_NOT_FOUND: status_code_t = 4100;
    pub const OBJECT_READ_FAILED: status_code_t = 4101;
    pub const OBJECT_WRITE_FAILED: status_code_t = 4102;
    pub const OBJECT_LIST_FAILED: status_code_t = 4103;
    pub const INVALID_KEY: status_code_t = 4104;
    pub const UNKNOWN_STORAGE: status_code_t = 4105;
}

/// Classification of status code ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum StatusCodeType {
    Invalid = -1,
    Common = 0,
    Transaction = 1,
    Meta = 3,
    Storage = 4,
}

/// Determine the category of a status code.
pub fn type_of(code: status_code_t) -> StatusCodeType {
    match code {
        0..=999 => StatusCodeType::Common,
        1000..=1999 => StatusCodeType::Transaction,
        3000..=3999 => StatusCodeType::Meta,
        4000..=4999 => StatusCodeType::Storage,
        _ => StatusCodeType::Invalid,
    }
}

/// Convert a status code to its human-readable name.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::INTERRUPTED => "Interrupted",
        StatusCode::READ_ONLY_MODE => "ReadOnlyMode",
        StatusCode::SERDE_INVALID_JSON => "SerdeInvalidJson",
        StatusCode::KV_STORE_OPEN_FAILED => "KVStoreOpenFailed",
        StatusCode::IO_ERROR => "IOError",
        StatusCode::FOUND_BUG => "FoundBug",
        StatusCode::UNKNOWN => "Unknown",

        TransactionCode::CONFLICT => "Transaction::Conflict",
        TransactionCode::TOO_OLD => "Transaction::TooOld",
        TransactionCode::RETRYABLE => "Transaction::Retryable",

        MetaCode::NOT_FOUND => "Meta::NotFound",
        MetaCode::NOT_EMPTY => "Meta::NotEmpty",
        MetaCode::NOT_DIRECTORY => "Meta::NotDirectory",
        MetaCode::TOO_MANY_SYMLINKS => "Meta::TooManySymlinks",
        MetaCode::IS_DIRECTORY => "Meta::IsDirectory",
        MetaCode::EXISTS => "Meta::Exists",
        MetaCode::NO_PERMISSION => "Meta::NoPermission",
        MetaCode::NOT_FILE => "Meta::NotFile",
        MetaCode::INODE_ID_ALLOC_FAILED => "Meta::InodeIdAllocFailed",
        MetaCode::NAME_TOO_LONG => "Meta::NameTooLong",
        MetaCode::NOT_PERMITTED => "Meta::NotPermitted",
        MetaCode::NOT_SUPPORTED => "Meta::NotSupported",
        MetaCode::NO_SPACE => "Meta::NoSpace",
        MetaCode::NO_ATTR => "Meta::NoAttr",
        MetaCode::WOULD_BLOCK => "Meta::WouldBlock",
        MetaCode::NOT_FORMATTED => "Meta::NotFormatted",
        MetaCode::FILE_TOO_LARGE => "Meta::FileTooLarge",
        MetaCode::NO_SESSION => "Meta::NoSession",
        MetaCode::FOUND_BUG => "Meta::FoundBug",

        StorageCode::OBJECT_NOT_FOUND => "Storage::ObjectNotFound",
        StorageCode::OBJECT_READ_FAILED => "Storage::ObjectReadFailed",
        StorageCode::OBJECT_WRITE_FAILED => "Storage::ObjectWriteFailed",
        StorageCode::OBJECT_LIST_FAILED => "Storage::ObjectListFailed",
        StorageCode::INVALID_KEY => "Storage::InvalidKey",
        StorageCode::UNKNOWN_STORAGE => "Storage::UnknownStorage",

        _ => "UnknownStatusCode",
    }
}

/// Map a status code to the POSIX errno reported to file system callers.
///
/// `OK` maps to 0; anything without a closer match becomes `EIO`.
pub fn to_errno(code: status_code_t) -> i32 {
    match code {
        StatusCode::OK => 0,
        StatusCode::INVALID_ARG => libc::EINVAL,
        StatusCode::NOT_IMPLEMENTED => libc::ENOSYS,
        StatusCode::READ_ONLY_MODE => libc::EROFS,
        StatusCode::INTERRUPTED => libc::EINTR,

        MetaCode::NOT_FOUND | StorageCode::OBJECT_NOT_FOUND => libc::ENOENT,
        MetaCode::NOT_EMPTY => libc::ENOTEMPTY,
        MetaCode::NOT_DIRECTORY => libc::ENOTDIR,
        MetaCode::TOO_MANY_SYMLINKS => libc::ELOOP,
        MetaCode::IS_DIRECTORY => libc::EISDIR,
        MetaCode::EXISTS => libc::EEXIST,
        MetaCode::NO_PERMISSION => libc::EACCES,
        MetaCode::NOT_PERMITTED => libc::EPERM,
        MetaCode::NOT_FILE => libc::EBADF,
        MetaCode::NAME_TOO_LONG => libc::ENAMETOOLONG,
        MetaCode::NOT_SUPPORTED => libc::ENOTSUP,
        MetaCode::NO_SPACE => libc::ENOSPC,
        MetaCode::NO_ATTR => libc::ENODATA,
        MetaCode::WOULD_BLOCK => libc::EAGAIN,
        MetaCode::FILE_TOO_LARGE => libc::EFBIG,

        _ => libc::EIO,
    }
}
