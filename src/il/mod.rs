//! IL method bodies: the two header forms, the injected prologue, and
//! fat-body synthesis with the exception-handling trailer.
//!
//! A body's first byte selects the header form through its low two bits.
//! Tiny bodies carry the code size in the remaining six bits and imply a
//! max-stack of 8 with no locals; fat bodies carry a 12-byte little-endian
//! header and may be followed by 4-byte-aligned extra sections.

pub mod rewriter;

use scroll::{LE, Pread, Pwrite, SizeWith};

use crate::error::{self, Error};
use crate::metadata::PreparedTokens;

/// Performs arbitrary alignment of values based on homogeneous numerical types.
#[inline]
pub(crate) fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Low-two-bits tag of a tiny-format header byte.
pub const COR_ILMETHOD_TINY_FORMAT: u8 = 0x02;
/// [`FatHeader::flags`]: fat-format tag bits.
pub const COR_ILMETHOD_FAT_FORMAT: u16 = 0x03;
/// [`FatHeader::flags`]: extra sections follow the code.
pub const COR_ILMETHOD_MORE_SECTS: u16 = 0x08;
/// [`FatHeader::flags`]: zero-initialize local variables.
pub const COR_ILMETHOD_INIT_LOCALS: u16 = 0x10;

/// Section kind byte of an exception-handling table.
pub const COR_ILMETHOD_SECT_EHTABLE: u8 = 0x01;
/// Section kind bit selecting the fat section format.
pub const COR_ILMETHOD_SECT_FAT_FORMAT: u8 = 0x40;

/// `ldstr` opcode.
pub const OP_LDSTR: u8 = 0x72;
/// `call` opcode.
pub const OP_CALL: u8 = 0x28;
/// `callvirt` opcode.
pub const OP_CALLVIRT: u8 = 0x6F;
/// `pop` opcode.
pub const OP_POP: u8 = 0x26;
/// `leave.s` opcode.
pub const OP_LEAVE_S: u8 = 0xDE;

/// Size of the fat method header in bytes.
pub const FAT_HEADER_SIZE: usize = 12;
/// Size of the injected prologue in bytes.
pub const PROLOGUE_SIZE: usize = 26;
/// Prologue byte range guarded by the catch clause.
pub const PROLOGUE_TRY_LEN: u32 = 23;
/// Offset of the catch handler inside the prologue.
pub const PROLOGUE_HANDLER_OFFSET: u32 = 23;
/// Length of the catch handler.
pub const PROLOGUE_HANDLER_LEN: u32 = 3;
/// One section header plus one fat clause.
pub const EH_SECTION_SIZE: usize = 4 + FAT_CLAUSE_SIZE;
/// Size of a fat exception clause in bytes.
pub const FAT_CLAUSE_SIZE: usize = 24;

/// The 12-byte fat method header.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct FatHeader {
    /// Format tag and body flags; the size-in-dwords field lives in the
    /// upper nibble.
    pub flags: u16,
    /// Maximum operand-stack depth.
    pub max_stack: u16,
    /// Code size in bytes, excluding the header and any sections.
    pub code_size: u32,
    /// Token of the local-variable signature, or nil.
    pub locals_sig: u32,
}

impl FatHeader {
    /// Whether extra sections follow the code.
    pub fn has_more_sects(&self) -> bool {
        self.flags & COR_ILMETHOD_MORE_SECTS != 0
    }

    /// Whether locals are zero-initialized.
    pub fn has_init_locals(&self) -> bool {
        self.flags & COR_ILMETHOD_INIT_LOCALS != 0
    }
}

/// A parsed original method body: normalized header fields plus a borrow
/// of the code bytes, which stay owned by the host.
#[derive(Debug, PartialEq, Copy, Clone)]
pub struct MethodBody<'a> {
    /// Maximum operand-stack depth; 8 for tiny bodies.
    pub max_stack: u16,
    /// Local-variable signature token; nil for tiny bodies.
    pub locals_sig: u32,
    /// Whether the original fat header carried InitLocals.
    pub init_locals: bool,
    /// Whether extra sections follow the code.
    pub more_sects: bool,
    /// Whether the original header was tiny.
    pub tiny: bool,
    /// The method's IL.
    pub code: &'a [u8],
}

impl<'a> MethodBody<'a> {
    /// Parses a tiny or fat header and borrows the trailing code bytes.
    pub fn parse(bytes: &'a [u8]) -> error::Result<Self> {
        let &first = bytes
            .first()
            .ok_or_else(|| Error::Malformed("empty method body".into()))?;
        if first & 0x03 == COR_ILMETHOD_TINY_FORMAT {
            let code_size = (first >> 2) as usize;
            let code = bytes.get(1..1 + code_size).ok_or_else(|| {
                Error::Malformed(format!(
                    "tiny code size {:#x} exceeds body of {:#x} bytes",
                    code_size,
                    bytes.len()
                ))
            })?;
            Ok(MethodBody {
                max_stack: 8,
                locals_sig: 0,
                init_locals: false,
                more_sects: false,
                tiny: true,
                code,
            })
        } else {
            let header = bytes.pread_with::<FatHeader>(0, LE)?;
            let code = bytes
                .get(FAT_HEADER_SIZE..FAT_HEADER_SIZE + header.code_size as usize)
                .ok_or_else(|| {
                    Error::Malformed(format!(
                        "fat code size {:#x} exceeds body of {:#x} bytes",
                        header.code_size,
                        bytes.len()
                    ))
                })?;
            Ok(MethodBody {
                max_stack: header.max_stack,
                locals_sig: header.locals_sig,
                init_locals: header.has_init_locals(),
                more_sects: header.has_more_sects(),
                tiny: false,
                code,
            })
        }
    }
}

/// One fat exception clause, six little-endian words.
#[repr(C)]
#[derive(Debug, PartialEq, Copy, Clone, Default, Pread, Pwrite, SizeWith)]
pub struct FatExceptionClause {
    /// Clause kind; 0 is a catch clause typed by [`Self::class_token`].
    pub flags: u32,
    pub try_offset: u32,
    pub try_length: u32,
    pub handler_offset: u32,
    pub handler_length: u32,
    /// Token of the caught type.
    pub class_token: u32,
}

/// A planned fat-format replacement body: new header, the 26-byte
/// prologue, the original code, padding, and a single-clause exception
/// trailer that swallows anything the prologue throws.
#[derive(Debug)]
pub struct RewrittenBody<'a> {
    header: FatHeader,
    tokens: PreparedTokens,
    code: &'a [u8],
}

impl<'a> RewrittenBody<'a> {
    /// Plans the rewrite of `original`.
    ///
    /// Bodies that already carry extra sections are refused; rewriting
    /// around an existing exception table is out of scope. The locals
    /// signature and InitLocals pass through untouched, and the max-stack
    /// is raised to the prologue's floor of 2 where needed.
    pub fn plan(original: &MethodBody<'a>, tokens: PreparedTokens) -> error::Result<Self> {
        if original.more_sects {
            return Err(Error::Unsupported(
                "body already carries extra sections".into(),
            ));
        }
        let mut flags = (3 << 12) | COR_ILMETHOD_FAT_FORMAT | COR_ILMETHOD_MORE_SECTS;
        if original.init_locals {
            flags |= COR_ILMETHOD_INIT_LOCALS;
        }
        Ok(RewrittenBody {
            header: FatHeader {
                flags,
                max_stack: original.max_stack.max(2),
                code_size: (PROLOGUE_SIZE + original.code.len()) as u32,
                locals_sig: original.locals_sig,
            },
            tokens,
            code: original.code,
        })
    }

    /// The replacement header.
    pub fn header(&self) -> &FatHeader {
        &self.header
    }

    /// Offset of the exception section, 4-byte aligned past the code.
    pub fn eh_offset(&self) -> usize {
        align_up(FAT_HEADER_SIZE + self.header.code_size as usize, 4)
    }

    /// Total byte size of the rendered body.
    pub fn total_size(&self) -> usize {
        self.eh_offset() + EH_SECTION_SIZE
    }

    /// The catch-everything clause covering the prologue.
    pub fn clause(&self) -> FatExceptionClause {
        FatExceptionClause {
            flags: 0,
            try_offset: 0,
            try_length: PROLOGUE_TRY_LEN,
            handler_offset: PROLOGUE_HANDLER_OFFSET,
            handler_length: PROLOGUE_HANDLER_LEN,
            class_token: self.tokens.exception.0,
        }
    }

    fn render_prologue(&self, buf: &mut [u8], offset: &mut usize) -> error::Result<()> {
        buf.gwrite_with(OP_LDSTR, offset, LE)?;
        buf.gwrite_with(self.tokens.payload_path.0, offset, LE)?;
        buf.gwrite_with(OP_CALL, offset, LE)?;
        buf.gwrite_with(self.tokens.load_from.0, offset, LE)?;
        buf.gwrite_with(OP_LDSTR, offset, LE)?;
        buf.gwrite_with(self.tokens.entry_type.0, offset, LE)?;
        buf.gwrite_with(OP_CALLVIRT, offset, LE)?;
        buf.gwrite_with(self.tokens.create_instance.0, offset, LE)?;
        buf.gwrite_with(OP_POP, offset, LE)?;
        // Jump over the handler into the original code.
        buf.gwrite_with(OP_LEAVE_S, offset, LE)?;
        buf.gwrite_with(3u8, offset, LE)?;
        // Catch handler: discard the exception object, resume.
        buf.gwrite_with(OP_POP, offset, LE)?;
        buf.gwrite_with(OP_LEAVE_S, offset, LE)?;
        buf.gwrite_with(0u8, offset, LE)?;
        Ok(())
    }

    /// Renders the complete body into `buf`, which must be at least
    /// [`Self::total_size`] bytes. Returns the rendered size.
    pub fn render_into(&self, buf: &mut [u8]) -> error::Result<usize> {
        let mut offset = 0;
        buf.gwrite_with(self.header, &mut offset, LE)?;
        self.render_prologue(buf, &mut offset)?;
        debug_assert_eq!(offset, FAT_HEADER_SIZE + PROLOGUE_SIZE);
        let code_end = offset + self.code.len();
        let buf_len = buf.len();
        let total_size = self.total_size();
        buf.get_mut(offset..code_end)
            .ok_or_else(|| {
                Error::Malformed(format!(
                    "buffer of {:#x} bytes cannot hold {:#x}-byte body",
                    buf_len, total_size
                ))
            })?
            .copy_from_slice(self.code);
        let eh_offset = self.eh_offset();
        for pad in buf
            .get_mut(code_end..eh_offset)
            .ok_or(scroll::Error::BadOffset(eh_offset))?
        {
            *pad = 0;
        }
        let mut offset = eh_offset;
        buf.gwrite_with(
            COR_ILMETHOD_SECT_EHTABLE | COR_ILMETHOD_SECT_FAT_FORMAT,
            &mut offset,
            LE,
        )?;
        // 24-bit little-endian section length.
        buf.gwrite_with((EH_SECTION_SIZE & 0xFF) as u8, &mut offset, LE)?;
        buf.gwrite_with(((EH_SECTION_SIZE >> 8) & 0xFF) as u8, &mut offset, LE)?;
        buf.gwrite_with(((EH_SECTION_SIZE >> 16) & 0xFF) as u8, &mut offset, LE)?;
        buf.gwrite_with(self.clause(), &mut offset, LE)?;
        Ok(offset)
    }

    /// Renders into a fresh buffer, for callers that own their storage.
    pub fn render(&self) -> error::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.total_size()];
        let rendered = self.render_into(&mut buf)?;
        debug_assert_eq!(rendered, buf.len());
        Ok(buf)
    }
}
