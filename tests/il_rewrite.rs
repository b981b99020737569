use scroll::{LE, Pread, Pwrite};

use uprooted_profiler::il::{
    FAT_HEADER_SIZE, FatExceptionClause, FatHeader, MethodBody, PROLOGUE_SIZE, RewrittenBody,
};
use uprooted_profiler::metadata::{PreparedTokens, Token};

fn tokens() -> PreparedTokens {
    PreparedTokens {
        load_from: Token(0x0A00_0021),
        create_instance: Token(0x0A00_0022),
        exception: Token(0x0100_000C),
        payload_path: Token(0x7000_0101),
        entry_type: Token(0x7000_0102),
    }
}

fn fat_body(flags: u16, max_stack: u16, code: &[u8], locals_sig: u32) -> Vec<u8> {
    let mut raw = vec![0u8; FAT_HEADER_SIZE];
    raw.pwrite_with(
        FatHeader {
            flags,
            max_stack,
            code_size: code.len() as u32,
            locals_sig,
        },
        0,
        LE,
    )
    .unwrap();
    raw.extend_from_slice(code);
    raw
}

#[test]
fn tiny_body_rewrites_to_a_68_byte_fat_body() {
    // Tiny header, one `ret`.
    let original = MethodBody::parse(&[0x06, 0x2A]).unwrap();
    let body = RewrittenBody::plan(&original, tokens()).unwrap();
    let rendered = body.render().unwrap();

    assert_eq!(rendered.len(), 68);
    let header = rendered.pread_with::<FatHeader>(0, LE).unwrap();
    assert_eq!(header.flags, 0x300B);
    assert_eq!(header.max_stack, 8);
    assert_eq!(header.code_size, 27);
    assert_eq!(header.locals_sig, 0);

    // Prologue, original code, one pad byte, aligned section.
    assert_eq!(rendered[12], 0x72);
    assert_eq!(rendered[38], 0x2A);
    assert_eq!(rendered[39], 0x00);
    assert_eq!(&rendered[40..44], &[0x41, 0x1C, 0x00, 0x00]);

    let clause = rendered.pread_with::<FatExceptionClause>(44, LE).unwrap();
    assert_eq!(clause.try_offset, 0);
    assert_eq!(clause.try_length, 23);
    assert_eq!(clause.handler_offset, 23);
    assert_eq!(clause.handler_length, 3);
    assert_eq!(clause.class_token, 0x0100_000C);
}

#[test]
fn fat_body_keeps_init_locals_and_signature() {
    let raw = fat_body(0x0013, 4, &[0x00; 10], 0x1100_0002);
    let original = MethodBody::parse(&raw).unwrap();
    let body = RewrittenBody::plan(&original, tokens()).unwrap();
    assert_eq!(body.header().flags, 0x301B);
    assert_eq!(body.header().max_stack, 4);
    assert_eq!(body.header().code_size, 36);
    assert_eq!(body.header().locals_sig, 0x1100_0002);
}

#[test]
fn a_rewritten_body_cannot_be_rewritten_again() {
    let original = MethodBody::parse(&[0x06, 0x2A]).unwrap();
    let first = RewrittenBody::plan(&original, tokens()).unwrap();
    let rendered = first.render().unwrap();

    // The product of the first pass carries MoreSects, so a second pass
    // over it must refuse.
    let reparsed = MethodBody::parse(&rendered).unwrap();
    assert!(reparsed.more_sects);
    assert!(RewrittenBody::plan(&reparsed, tokens()).is_err());
}

#[test]
fn pre_existing_exception_sections_abort_the_rewrite() {
    let raw = fat_body(0x001B, 4, &[0x00; 6], 0);
    let original = MethodBody::parse(&raw).unwrap();
    assert!(RewrittenBody::plan(&original, tokens()).is_err());
}

#[test]
fn locals_and_stack_invariants_hold_across_shapes() {
    for code_len in [0usize, 1, 2, 3, 4, 5, 29, 64, 200] {
        for (max_stack, locals) in [(0u16, 0u32), (1, 0), (2, 0x1100_0001), (9, 0x1100_0042)] {
            let code = vec![0x00u8; code_len];
            let raw = fat_body(0x0003, max_stack, &code, locals);
            let original = MethodBody::parse(&raw).unwrap();
            let body = RewrittenBody::plan(&original, tokens()).unwrap();

            // Locals pass through; the stack never shrinks and never
            // drops under the prologue's floor.
            assert_eq!(body.header().locals_sig, locals);
            assert!(body.header().max_stack >= max_stack.max(2));
            assert_eq!(body.header().code_size as usize, PROLOGUE_SIZE + code_len);

            // The section lands 4-byte aligned, right after the padding.
            let rendered = body.render().unwrap();
            let eh = body.eh_offset();
            assert_eq!(eh % 4, 0);
            assert_eq!(rendered[eh], 0x41);
            assert_eq!(rendered.len(), eh + 28);
        }
    }
}

#[test]
fn prologue_operands_carry_the_prepared_tokens() {
    let original = MethodBody::parse(&[0x06, 0x2A]).unwrap();
    let rendered = RewrittenBody::plan(&original, tokens())
        .unwrap()
        .render()
        .unwrap();

    let operand = |at: usize| rendered.pread_with::<u32>(at, LE).unwrap();
    assert_eq!(rendered[12], 0x72);
    assert_eq!(operand(13), 0x7000_0101);
    assert_eq!(rendered[17], 0x28);
    assert_eq!(operand(18), 0x0A00_0021);
    assert_eq!(rendered[22], 0x72);
    assert_eq!(operand(23), 0x7000_0102);
    assert_eq!(rendered[27], 0x6F);
    assert_eq!(operand(28), 0x0A00_0022);
    assert_eq!(&rendered[32..38], &[0x26, 0xDE, 0x03, 0x26, 0xDE, 0x00]);
}

#[test]
fn tiny_round_trip_matches_tiny_defaults() {
    for code_len in 1..=63usize {
        let mut raw = vec![(code_len as u8) << 2 | 0x02];
        raw.extend(std::iter::repeat_n(0x00u8, code_len));
        let parsed = MethodBody::parse(&raw).unwrap();
        assert!(parsed.tiny);
        assert_eq!(parsed.code.len(), code_len);
        assert_eq!(parsed.max_stack, 8);
        assert_eq!(parsed.locals_sig, 0);
        assert!(!parsed.more_sects);
    }
}
