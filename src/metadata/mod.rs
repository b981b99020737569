//! Metadata tokens, the coded TypeDefOrRef compression, and the
//! hand-emitted signature blobs behind the injected member references.

pub mod selector;
pub mod surgeon;

use core::fmt;

/// Table code of the TypeRef metadata table.
pub const TABLE_TYPE_REF: u8 = 0x01;
/// Table code of the TypeDef metadata table.
pub const TABLE_TYPE_DEF: u8 = 0x02;
/// Table code of the TypeSpec metadata table.
pub const TABLE_TYPE_SPEC: u8 = 0x1B;

/// A 32-bit metadata token: the top byte names the table, the low 24 bits
/// are the row index.
#[derive(PartialEq, Eq, Copy, Clone, Default, Hash)]
pub struct Token(pub u32);

impl Token {
    /// The nil token.
    pub const NIL: Token = Token(0);

    /// Builds a token from a table code and a row index.
    #[inline]
    pub fn new(table: u8, rid: u32) -> Self {
        Token(((table as u32) << 24) | (rid & 0x00ff_ffff))
    }

    /// The table code in the top byte.
    #[inline]
    pub fn table(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The row index in the low 24 bits.
    #[inline]
    pub fn rid(self) -> u32 {
        self.0 & 0x00ff_ffff
    }

    #[inline]
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(raw: u32) -> Self {
        Token(raw)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:#010x})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Packs a token into the coded TypeDefOrRef index: the two low bits tag
/// the table (TypeDef 0, TypeRef 1, anything else TypeSpec 2) and the row
/// index is shifted left by two.
pub fn code_type_def_or_ref(token: Token) -> u32 {
    let tag = match token.table() {
        TABLE_TYPE_DEF => 0,
        TABLE_TYPE_REF => 1,
        _ => 2,
    };
    (token.rid() << 2) | tag
}

/// Recovers `(table, rid)` from a coded TypeDefOrRef index.
pub fn decode_type_def_or_ref(coded: u32) -> (u8, u32) {
    let table = match coded & 0x3 {
        0 => TABLE_TYPE_DEF,
        1 => TABLE_TYPE_REF,
        _ => TABLE_TYPE_SPEC,
    };
    (table, coded >> 2)
}

/// Compresses a coded index per the metadata blob rules: one byte below
/// 0x80, two big-endian bytes below 0x4000 with the high bit set, else
/// four bytes with the top two bits set and only the low 5 bits of the
/// first byte significant. Returns the number of bytes written.
pub fn compress(coded: u32, out: &mut [u8; 4]) -> usize {
    if coded < 0x80 {
        out[0] = coded as u8;
        1
    } else if coded < 0x4000 {
        out[0] = 0x80 | (coded >> 8) as u8;
        out[1] = coded as u8;
        2
    } else {
        out[0] = 0xC0 | ((coded >> 24) & 0x1F) as u8;
        out[1] = (coded >> 16) as u8;
        out[2] = (coded >> 8) as u8;
        out[3] = coded as u8;
        4
    }
}

/// Inverse of [`compress`]; yields the coded value and the number of bytes
/// consumed, or `None` when `bytes` is truncated.
pub fn decompress(bytes: &[u8]) -> Option<(u32, usize)> {
    let &first = bytes.first()?;
    if first & 0x80 == 0 {
        Some((first as u32, 1))
    } else if first & 0x40 == 0 {
        let lo = *bytes.get(1)? as u32;
        Some(((((first & 0x3F) as u32) << 8) | lo, 2))
    } else if bytes.len() >= 4 {
        Some((
            (((first & 0x1F) as u32) << 24)
                | ((bytes[1] as u32) << 16)
                | ((bytes[2] as u32) << 8)
                | bytes[3] as u32,
            4,
        ))
    } else {
        None
    }
}

/// Calling-convention byte of a default (static) signature.
pub const SIG_CALLCONV_DEFAULT: u8 = 0x00;
/// Calling-convention flag marking an instance signature.
pub const SIG_CALLCONV_HASTHIS: u8 = 0x20;
/// ELEMENT_TYPE_STRING.
pub const ELEMENT_TYPE_STRING: u8 = 0x0E;
/// ELEMENT_TYPE_CLASS.
pub const ELEMENT_TYPE_CLASS: u8 = 0x12;
/// ELEMENT_TYPE_OBJECT.
pub const ELEMENT_TYPE_OBJECT: u8 = 0x1C;

/// Signature blob of `static Assembly LoadFrom(string)`: default calling
/// convention, one parameter, a class return typed by the compressed coded
/// index of `assembly` itself, and a string parameter.
pub fn load_from_sig(assembly: Token) -> Vec<u8> {
    let mut sig = Vec::with_capacity(8);
    sig.push(SIG_CALLCONV_DEFAULT);
    sig.push(0x01);
    sig.push(ELEMENT_TYPE_CLASS);
    let mut coded = [0u8; 4];
    let n = compress(code_type_def_or_ref(assembly), &mut coded);
    sig.extend_from_slice(&coded[..n]);
    sig.push(ELEMENT_TYPE_STRING);
    sig
}

/// Signature blob of `object Assembly.CreateInstance(string)`.
pub const CREATE_INSTANCE_SIG: [u8; 4] = [
    SIG_CALLCONV_HASTHIS,
    0x01,
    ELEMENT_TYPE_OBJECT,
    ELEMENT_TYPE_STRING,
];

/// The cross-module token set the injected prologue needs, produced by the
/// surgeon and published through the session once a target is chosen.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub struct PreparedTokens {
    /// `Assembly.LoadFrom(string)` member reference.
    pub load_from: Token,
    /// `Assembly.CreateInstance(string)` member reference.
    pub create_instance: Token,
    /// Type reference of the root exception type.
    pub exception: Token,
    /// User string holding the payload assembly path.
    pub payload_path: Token,
    /// User string holding the payload entry type name.
    pub entry_type: Token,
}

impl PreparedTokens {
    /// True when every token in the set is populated.
    pub fn is_complete(&self) -> bool {
        !(self.load_from.is_nil()
            || self.create_instance.is_nil()
            || self.exception.is_nil()
            || self.payload_path.is_nil()
            || self.entry_type.is_nil())
    }
}
